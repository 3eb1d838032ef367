// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The live-stream HTTP front: turns a client connection into a demand the
//! scheduler can see, and hands the HTTP response writer to whatever
//! [`crate::task::PlayTask`] ends up serving it.
//!
//! The handshake in §4.5: the handler emits a request, waits for disconnect,
//! emits a cancellation, then waits for the one-slot channel to be drained
//! before returning. This guarantees a `PlayTask` never writes to a response
//! body the HTTP layer has already closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};

/// A cheaply-cloneable allocator for [`LiveRequest::id`]s, shared between
/// the HTTP front (which mints ids as clients connect, possibly from
/// several concurrently-accepted connections) and [`LiveRequests`] (which
/// only ever runs on the worker's main loop).
#[derive(Clone, Default)]
pub struct IdAllocator(Arc<AtomicU64>);

impl IdAllocator {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// The live segment of an HTTP response: bytes written here are flushed to
/// the client. A real server implementation would plug in its response
/// body's sender; tests substitute an in-memory buffer.
pub type Writer = mpsc::Sender<bytes::Bytes>;

/// One-slot handoff for a [`Writer`], per live-stream connection.
///
/// `PlayTask::run` takes the writer out with [`WriterSlot::take`] and must
/// call [`WriterSlot::release`] before its subprocess can be considered
/// fully stopped; the HTTP handler blocks on that release before returning.
pub struct WriterSlot {
    slot: Mutex<Option<Writer>>,
    released: Notify,
}

impl WriterSlot {
    pub fn new(writer: Writer) -> Arc<Self> {
        Arc::new(WriterSlot {
            slot: Mutex::new(Some(writer)),
            released: Notify::new(),
        })
    }

    /// Takes the writer, if it hasn't already been taken or released.
    pub fn take(&self) -> Option<Writer> {
        self.slot.lock().unwrap().take()
    }

    /// Marks the writer released, waking the HTTP handler's `wait` call.
    ///
    /// Idempotent: a task that never got as far as `take`-ing the writer
    /// (e.g. cancelled before start) must still call this so the handler
    /// doesn't hang.
    pub fn release(&self) {
        *self.slot.lock().unwrap() = None;
        self.released.notify_waiters();
    }

    /// Blocks until [`WriterSlot::release`] has been called.
    pub async fn wait_released(&self) {
        loop {
            if self.slot.lock().unwrap().is_none() {
                return;
            }
            self.released.notified().await;
        }
    }
}

/// A connected live-stream client's demand, as seen by the scheduler.
#[derive(Clone)]
pub struct LiveRequest {
    pub id: u64,
    pub program_number: u32,
    pub writer: Arc<WriterSlot>,
}

/// Tracks all currently-connected live-stream clients.
///
/// Owned by the worker's main loop; `register`/`unregister` are called from
/// the HTTP handler tasks via a channel, never directly, so all mutation
/// still happens on the main loop thread (§5: "state owned by the main loop
/// ... is mutated only by the main loop").
#[derive(Default)]
pub struct LiveRequests {
    ids: IdAllocator,
    requests: Vec<LiveRequest>,
}

impl LiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle other tasks (namely the HTTP front) can use to mint
    /// ids for requests they'll later send in as [`LiveEvent::Connected`].
    pub fn id_allocator(&self) -> IdAllocator {
        self.ids.clone()
    }

    pub fn next_id(&self) -> u64 {
        self.ids.next()
    }

    pub fn insert(&mut self, request: LiveRequest) {
        self.requests.push(request);
    }

    pub fn remove(&mut self, id: u64) -> Option<LiveRequest> {
        let i = self.requests.iter().position(|r| r.id == id)?;
        Some(self.requests.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveRequest> {
        self.requests.iter()
    }
}

/// Events the HTTP front sends to the worker's main loop.
pub enum LiveEvent {
    Connected(LiveRequest),
    Disconnected(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_before_take_does_not_hang() {
        let (tx, _rx) = mpsc::channel(1);
        let slot = WriterSlot::new(tx);
        slot.release();
        slot.wait_released().await;
    }

    #[tokio::test]
    async fn wait_released_unblocks_after_release() {
        let (tx, _rx) = mpsc::channel(1);
        let slot = WriterSlot::new(tx);
        assert!(slot.take().is_some());
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait_released().await })
        };
        tokio::task::yield_now().await;
        slot.release();
        waiter.await.unwrap();
    }

    #[test]
    fn requests_insert_and_remove_by_id() {
        let mut reqs = LiveRequests::new();
        let (tx, _rx) = mpsc::channel(1);
        let id = reqs.next_id();
        reqs.insert(LiveRequest {
            id,
            program_number: 101,
            writer: WriterSlot::new(tx),
        });
        assert_eq!(reqs.iter().count(), 1);
        assert!(reqs.remove(id).is_some());
        assert_eq!(reqs.iter().count(), 0);
    }
}
