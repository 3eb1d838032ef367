// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Client for talking to the control service from the worker and waker.
//!
//! Every method here treats a failed request as transient: log it, wait,
//! and let the caller ask again. Nothing in this module returns a fatal
//! error, matching the "transient remote" error-handling class (§7) --
//! losing touch with the control service should degrade the worker to
//! "can't see new rules" or the waker to "can't see schedule changes", not
//! crash the process.

use std::time::Duration;

use data::Data;
use http_body_util::{BodyExt, Empty, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::warn;

/// How long to wait before retrying after a failed request to the control
/// service.
pub const RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ControlClient {
    base_url: http::Uri,
    http: Client<HttpConnector, Full<bytes::Bytes>>,
}

impl ControlClient {
    pub fn new(base_url: http::Uri) -> Self {
        ControlClient {
            base_url,
            http: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    fn url(&self, mode: &str) -> http::Uri {
        format!("{}?mode={}", self.base_url, mode).parse().expect("base_url plus query is a valid URI")
    }

    async fn get(&self, mode: &str) -> Result<Data, base::Error> {
        let req = http::Request::builder()
            .method(http::Method::GET)
            .uri(self.url(mode))
            .body(Empty::<bytes::Bytes>::new().map_err(|never| match never {}).boxed())
            .expect("building a GET from a parsed URI cannot fail");
        let resp = self
            .http
            .request(req)
            .await
            .map_err(|e| base::err!(Unavailable, msg("requesting control service"), source(e)))?;
        if !resp.status().is_success() {
            return Err(base::err!(Unavailable, msg("control service returned {}", resp.status())));
        }
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| base::err!(Unavailable, msg("reading control service response"), source(e)))?
            .to_bytes();
        serde_json::from_slice(&body)
            .map_err(|e| base::err!(Internal, msg("control service sent invalid Data JSON"), source(e)))
    }

    /// Fetches the current `Data` snapshot, retrying forever on failure.
    pub async fn fetch(&self, shutdown: &base::shutdown::Receiver) -> Result<Data, base::shutdown::ShutdownError> {
        loop {
            match self.get("json").await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    shutdown.check()?;
                    warn!(err = %e.chain(), "fetching control service data, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Blocks until the control service reports a commit, then returns the
    /// fresh `Data`. Retries forever on a connection failure; a clean
    /// response is always returned immediately.
    pub async fn watch(&self, shutdown: &base::shutdown::Receiver) -> Result<Data, base::shutdown::ShutdownError> {
        loop {
            match self.get("event-stream").await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    shutdown.check()?;
                    warn!(err = %e.chain(), "watching control service for changes, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Posts `delta` to be merged into the control service's data.
    /// Retries forever; the merge is idempotent (whole-entry replacement),
    /// so a retried post after a response was lost in transit is safe.
    pub async fn post(&self, delta: &Data, shutdown: &base::shutdown::Receiver) -> Result<(), base::shutdown::ShutdownError> {
        let body = serde_json::to_vec(delta).expect("Data always serializes");
        loop {
            let req = http::Request::builder()
                .method(http::Method::POST)
                .uri(self.url("json"))
                .body(Full::new(bytes::Bytes::from(body.clone())).map_err(|never| match never {}).boxed())
                .expect("building a POST from a parsed URI cannot fail");
            match self.http.request(req).await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    shutdown.check()?;
                    warn!(status = %resp.status(), "posting to control service, retrying");
                }
                Err(e) => {
                    shutdown.check()?;
                    warn!(err = %e, "posting to control service, retrying");
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}
