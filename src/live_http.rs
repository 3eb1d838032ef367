// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The live-stream HTTP front. See SPEC §4.5.
//!
//! `GET /<program_number>` registers a demand with the worker's main loop
//! and streams whatever bytes a matching `PlayTask` writes into the
//! returned [`GuardedBody`]. The handshake that guarantees the task never
//! writes to an already-closed body runs on drop: hyper drops a response
//! body once the connection driver is done polling it (client disconnect,
//! or the connection otherwise ending), which is exactly the "client
//! disconnect" signal step 2 of §4.5 waits for. `Drop` can't itself wait
//! for step 4 (the task draining the writer), so it hands that off to a
//! detached task instead of blocking the connection driver.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body::{Body as HttpBody, Frame};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

use base::{err, Error};

use crate::live::{IdAllocator, LiveEvent, LiveRequest, WriterSlot};

/// A live-stream response body. Yields bytes written by a `PlayTask` until
/// it drops its sender; on its own drop, runs the disconnect handshake.
pub struct GuardedBody {
    rx: Option<mpsc::Receiver<Bytes>>,
    disconnect: Option<(mpsc::Sender<LiveEvent>, u64, Arc<WriterSlot>)>,
}

impl HttpBody for GuardedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &mut self.rx {
            Some(rx) => rx.poll_recv(cx).map(|opt| opt.map(|b| Ok(Frame::data(b)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }
}

impl Drop for GuardedBody {
    fn drop(&mut self) {
        if let Some((events, id, slot)) = self.disconnect.take() {
            tokio::spawn(async move {
                let _ = events.send(LiveEvent::Disconnected(id)).await;
                slot.wait_released().await;
            });
        }
    }
}

fn program_number_from_path(path: &str) -> Option<u32> {
    path.strip_prefix('/')?.parse().ok()
}

fn immediate(status: StatusCode) -> Response<GuardedBody> {
    Response::builder()
        .status(status)
        .body(GuardedBody { rx: None, disconnect: None })
        .expect("building a fixed-status response from static parts cannot fail")
}

async fn handle(
    events: mpsc::Sender<LiveEvent>,
    ids: IdAllocator,
    req: Request<Incoming>,
) -> Result<Response<GuardedBody>, Infallible> {
    let Some(program_number) = program_number_from_path(req.uri().path()) else {
        return Ok(immediate(StatusCode::NOT_FOUND));
    };

    let id = ids.next();
    let (writer_tx, writer_rx) = mpsc::channel::<Bytes>(16);
    let slot = WriterSlot::new(writer_tx);

    if events
        .send(LiveEvent::Connected(LiveRequest { id, program_number, writer: slot.clone() }))
        .await
        .is_err()
    {
        warn!(id, "worker main loop gone, rejecting live request");
        return Ok(immediate(StatusCode::SERVICE_UNAVAILABLE));
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "video/mp2t")
        .body(GuardedBody { rx: Some(writer_rx), disconnect: Some((events, id, slot)) })
        .expect("building a live-stream response from static parts cannot fail"))
}

/// Runs the live-stream HTTP front until `shutdown` resolves.
pub async fn serve(
    bind_addr: std::net::SocketAddr,
    events: mpsc::Sender<LiveEvent>,
    ids: IdAllocator,
    shutdown: base::shutdown::Receiver,
) -> Result<(), Error> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| err!(Unavailable, msg("binding live-stream listener on {}", bind_addr), source(e)))?;
    info!(addr = %bind_addr, "live-stream front listening");

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
                let events = events.clone();
                let ids = ids.clone();
                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service_fn(move |req| handle(events.clone(), ids.clone(), req)));
                let conn = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        warn!(err = %e, %peer, "live-stream connection error");
                    }
                });
            }
            _ = &mut shutdown_fut => {
                info!("live-stream front shutting down");
                break;
            }
        }
    }

    tokio::select! {
        _ = graceful.shutdown() => {}
        _ = tokio::time::sleep(std::time::Duration::from_secs(10)) => {
            warn!("live-stream connections still open after grace period, dropping them");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_program_number_from_path() {
        assert_eq!(program_number_from_path("/101"), Some(101));
        assert_eq!(program_number_from_path("/"), None);
        assert_eq!(program_number_from_path("/not-a-number"), None);
    }

    #[tokio::test]
    async fn dropping_the_body_runs_the_disconnect_handshake() {
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let ids = IdAllocator::default();
        let id = ids.next();

        let (writer_tx, _writer_rx) = mpsc::channel::<Bytes>(1);
        let slot = WriterSlot::new(writer_tx);

        let body = GuardedBody { rx: None, disconnect: Some((events_tx, id, slot.clone())) };
        drop(body);

        match events_rx.recv().await {
            Some(LiveEvent::Disconnected(got)) => assert_eq!(got, id),
            Some(LiveEvent::Connected(_)) => panic!("expected Disconnected, got Connected"),
            None => panic!("expected Disconnected, got channel closed"),
        }

        // The task side of the handshake: release once done with the writer,
        // which is what lets the spawned disconnect task above return.
        slot.release();
    }

    #[test]
    fn immediate_responses_end_the_stream_right_away() {
        let resp = immediate(StatusCode::NOT_FOUND);
        assert!(resp.body().is_end_stream());
    }
}
