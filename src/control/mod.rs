// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The control service: the single source of truth for [`data::Data`],
//! served over HTTP to the worker and waker. See SPEC §4.6.
//!
//! `?mode=json` serves/accepts the replicated `Data` as JSON; `POST` merges
//! a delta the same way [`data::merge_data`] does, persists it, and wakes
//! every `?mode=event-stream` subscriber so pollers don't need to busy-poll.
//! `?mode=html` renders a minimal read-only timetable and a rule-edit form,
//! since a TV recorder with no human-facing surface at all isn't useful.

mod html;
pub mod store;

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use data::Data;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use base::{err, Error, ErrorKind, ResultExt};
use store::Store;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

fn empty() -> BoxBody {
    Empty::new().map_err(|never| match never {}).boxed()
}

fn full(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

/// Maps an internal [`Error`] to the HTTP status the control service's
/// clients (worker, waker, browser) should see.
fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied | ErrorKind::Unauthenticated => StatusCode::FORBIDDEN,
        ErrorKind::FailedPrecondition | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Unavailable | ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: Error) -> Response<BoxBody> {
    warn!(err = %e.chain(), "request failed");
    Response::builder()
        .status(status_for(e.kind()))
        .body(full(e.to_string()))
        .expect("building an error response from static parts cannot fail")
}

struct Shared {
    store: Store,
    changed: watch::Sender<()>,
}

/// Runs the control service until `shutdown` resolves.
pub async fn serve(
    bind_addr: std::net::SocketAddr,
    store: Store,
    shutdown: base::shutdown::Receiver,
) -> Result<(), Error> {
    let (changed_tx, _) = watch::channel(());
    let shared = Arc::new(Shared { store, changed: changed_tx });

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| err!(Unavailable, msg("binding {}", bind_addr), source(e)))?;
    info!(addr = %bind_addr, "control service listening");

    let graceful = GracefulShutdown::new();
    let mut shutdown_fut = Box::pin(shutdown.into_future());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let shared = shared.clone();
                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service_fn(move |req| handle(shared.clone(), req)));
                let conn = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        warn!(err = %e, %peer, "connection error");
                    }
                });
            }
            _ = &mut shutdown_fut => {
                info!("control service shutting down");
                break;
            }
        }
    }

    tokio::select! {
        _ = graceful.shutdown() => {}
        _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
            warn!("connections still open after grace period, dropping them");
        }
    }
    Ok(())
}

fn query_param<'a>(req: &'a Request<Incoming>, key: &str) -> Option<&'a str> {
    let query = req.uri().query()?;
    query.split('&').find_map(|kv| {
        let (k, v) = kv.split_once('=')?;
        (k == key).then_some(v)
    })
}

async fn handle(shared: Arc<Shared>, req: Request<Incoming>) -> Result<Response<BoxBody>, Infallible> {
    let mode = query_param(&req, "mode").unwrap_or("json").to_string();
    let result = match (req.method().clone(), mode.as_str()) {
        (Method::GET, "json") => handle_get_json(&shared),
        (Method::GET, "event-stream") => handle_get_event_stream(&shared).await,
        (Method::GET, "html") => handle_get_html(&shared),
        (Method::POST, "json") => handle_post_json(&shared, req).await,
        (Method::POST, "html") => handle_post_html(&shared, req).await,
        _ => Err(err!(NotFound, msg("no such endpoint"))),
    };
    Ok(result.unwrap_or_else(error_response))
}

fn handle_get_json(shared: &Shared) -> Result<Response<BoxBody>, Error> {
    let data = shared.store.load()?;
    let body = serde_json::to_vec(&data).err_kind(ErrorKind::Internal)?;
    Ok(Response::builder()
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full(body))
        .expect("building a json response from static parts cannot fail"))
}

/// Blocks until the next commit, then returns the fresh `Data` as a single
/// JSON-lines event. Subscribers reconnect to keep watching: this is a
/// long-poll, not a persistent SSE stream, since the worker and waker are
/// both already built around a reconnect-on-drop client loop (§7).
async fn handle_get_event_stream(shared: &Shared) -> Result<Response<BoxBody>, Error> {
    let mut rx = shared.changed.subscribe();
    rx.changed().await.map_err(|e| err!(Unavailable, msg("server shutting down"), source(e)))?;
    let data = shared.store.load()?;
    let body = serde_json::to_vec(&data).err_kind(ErrorKind::Internal)?;
    Ok(Response::builder()
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full(body))
        .expect("building an event-stream response from static parts cannot fail"))
}

fn handle_get_html(shared: &Shared) -> Result<Response<BoxBody>, Error> {
    let data = shared.store.load()?;
    let body = html::render_timetable(&data);
    Ok(Response::builder()
        .header(http::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(full(body))
        .expect("building an html response from static parts cannot fail"))
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, Error> {
    req.collect()
        .await
        .map_err(|e| err!(InvalidArgument, msg("reading request body"), source(e)))
        .map(|c| c.to_bytes())
}

async fn handle_post_json(shared: &Shared, req: Request<Incoming>) -> Result<Response<BoxBody>, Error> {
    let body = read_body(req).await?;
    let delta: Data = serde_json::from_slice(&body)
        .map_err(|e| err!(InvalidArgument, msg("request body is not valid Data JSON"), source(e)))?;
    let merged = shared.store.merge_and_save(delta)?;
    let _ = shared.changed.send(());
    let body = serde_json::to_vec(&merged).err_kind(ErrorKind::Internal)?;
    Ok(Response::builder()
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full(body))
        .expect("building a json response from static parts cannot fail"))
}

async fn handle_post_html(shared: &Shared, req: Request<Incoming>) -> Result<Response<BoxBody>, Error> {
    let body = read_body(req).await?;
    let delta = html::parse_rule_form(&body)?;
    shared.store.merge_and_save(delta)?;
    let _ = shared.changed.send(());
    Ok(Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(http::header::LOCATION, "?mode=html")
        .body(empty())
        .expect("building a redirect response from static parts cannot fail"))
}
