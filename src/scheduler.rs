//! The keep-alive scheduler (spec §4.5): times periodic `/meta/connect`
//! sends. Grounded on `ethers_providers`'s `WsBackend::spawn` keepalive
//! timer (`rpc/transports/ws2/backend.rs`), which does the same
//! sleep-then-send dance for websocket pings every 10 seconds — here the
//! interval is server-advised instead of fixed, and firing feeds back into
//! the actor's serial instruction queue instead of writing the socket
//! directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Schedules at most one logical keep-alive timer at a time (spec §3
/// invariant 4). Each call to [`Self::schedule`] bumps a generation counter;
/// when a sleeping timer wakes up it checks whether it's still the newest
/// one before firing, so a timer made stale by a later `schedule()` call is
/// silently dropped instead of firing twice.
///
/// Per spec §4.5, this must never fire synchronously: the shortest delay
/// accepted is clamped to be non-negative, but callers should always pass a
/// real `retryInterval`, never zero, on the handshake-success path.
#[derive(Clone, Default)]
pub struct KeepAliveScheduler {
    generation: Arc<AtomicU64>,
}

impl KeepAliveScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `on_fire` to run `after_secs` from now, unless a later
    /// `schedule()` call supersedes it first. Spawns its own Tokio task for
    /// the sleep; `on_fire` itself should hand control back to the worker
    /// queue (e.g. by sending an instruction) rather than mutating session
    /// state directly, since it does not run on the worker task.
    pub fn schedule<F>(&self, after_secs: f64, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(after_secs.max(0.0))).await;
            if slot.load(Ordering::SeqCst) == generation {
                on_fire();
            }
        });
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
