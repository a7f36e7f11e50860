// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast Hub. A one-producer, many-consumer byte-stream distributor:
//! the Radio Controller's producer thread calls [`Hub::publish`] once per
//! delivered Sample Buffer, and every registered Client Connection gets a
//! clone of that buffer fanned out to its own bounded queue.
//!
//! The invariant that matters: `publish` never blocks. A session whose
//! queue is full has this buffer dropped for it and its drop counter
//! bumped; the producer thread is never made to wait on a slow client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::driver::DEFAULT_BUF_LENGTH;

pub type SessionId = u64;

/// Floor on the per-session queue bound regardless of sample rate.
pub const MIN_QUEUE_BUFFERS: usize = 4;

struct SessionHandle {
    tx: SyncSender<Arc<[u8]>>,
    drops: Arc<AtomicU64>,
    addr: SocketAddr,
}

/// Owns the set of registered Client Sessions exclusively; a session's
/// lifetime as far as the hub is concerned runs from `register` to
/// `unregister`.
pub struct Hub {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
    queue_capacity: AtomicUsize,
    capacity_override: Option<usize>,
}

impl Hub {
    /// `capacity_override`, when set, fixes every session's queue bound
    /// (the CLI's `-n` flag) instead of deriving it from the sample rate.
    pub fn new(capacity_override: Option<usize>) -> Arc<Hub> {
        let initial = capacity_override.unwrap_or(MIN_QUEUE_BUFFERS).max(1);
        Arc::new(Hub {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: AtomicUsize::new(initial),
            capacity_override,
        })
    }

    /// Recomputes the per-session queue bound for roughly one second of
    /// samples at `sample_rate_hz`, clamped to [`MIN_QUEUE_BUFFERS`]. A
    /// no-op if a fixed override was configured. Only sessions registered
    /// *after* this call observe the new bound: existing `sync_channel`s
    /// keep the capacity fixed at construction.
    pub fn set_rate_hint(&self, sample_rate_hz: u32) {
        if self.capacity_override.is_some() {
            return;
        }
        let bytes_per_sec = sample_rate_hz as u64 * 2; // I + Q bytes per complex sample
        let buffers = (bytes_per_sec / DEFAULT_BUF_LENGTH as u64).max(1) as usize;
        self.queue_capacity
            .store(buffers.max(MIN_QUEUE_BUFFERS), Ordering::Relaxed);
    }

    /// Registers a new session and returns its id, the receiving half of
    /// its TX queue, and a shared slow-client drop counter the caller can
    /// log on disconnect.
    pub fn register(&self, addr: SocketAddr) -> (SessionId, Receiver<Arc<[u8]>>, Arc<AtomicU64>) {
        let capacity = self.queue_capacity.load(Ordering::Relaxed).max(1);
        let (tx, rx) = sync_channel(capacity);
        let drops = Arc::new(AtomicU64::new(0));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle {
            tx,
            drops: drops.clone(),
            addr,
        };
        self.sessions.lock().unwrap().insert(id, handle);
        (id, rx, drops)
    }

    /// Removes a session. Idempotent: unregistering an unknown or
    /// already-removed id is a no-op, so the Client Connection state
    /// machine's draining path doesn't need to track whether it already
    /// ran.
    pub fn unregister(&self, id: SessionId) {
        self.sessions.lock().unwrap().remove(&id);
    }

    /// Number of currently registered sessions (testable property 8).
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Fans `buf` out to every registered session. O(n) in the number of
    /// sessions; never blocks. The session list is snapshotted under the
    /// lock and released before any `try_send`, so a slow or disconnected
    /// session never holds up registration/unregistration of others.
    pub fn publish(&self, buf: Arc<[u8]>) {
        let snapshot: Vec<(SyncSender<Arc<[u8]>>, Arc<AtomicU64>, SocketAddr)> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .map(|h| (h.tx.clone(), h.drops.clone(), h.addr))
                .collect()
        };
        for (tx, drops, addr) in snapshot {
            match tx.try_send(buf.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    drops.fetch_add(1, Ordering::Relaxed);
                    debug!("slow-client drop for {}", addr);
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Session is mid-teardown; its connection will
                    // unregister itself shortly.
                }
            }
        }
    }
}

#[cfg(test)]
mod hub_test;
