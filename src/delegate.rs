//! Delegate events and the two configurable dispatch queues (spec §5, §6).
//!
//! Design note (spec §9, "Delegate proxy for queue-posting"): the original
//! wraps the user's delegate in a proxy object so every notification is
//! posted to a configured queue before the real delegate method runs. There
//! is no need for a proxy object here — [`DelegateSink`] is that thin
//! function, just reified as a struct so it can be cloned into the actor.
//!
//! Open Question (resolved, recorded in DESIGN.md): the spec lists
//! `advisedToRetry`/`advisedToHandshake` as "fire-and-forget" delegate
//! events, but both carry an `inout` parameter whose result gates what the
//! reconnect controller does next. A fire-and-forget dispatch can't hand a
//! value back. This crate keeps those two calls synchronous and inline on
//! the worker task — the delegate returns the overridden value directly —
//! while the other five events are genuinely fire-and-forget and go through
//! the delegate queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BayeuxError;
use crate::message::Message;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A place to run fire-and-forget tasks: the delegate queue or the callback
/// queue (spec §5). The crate ships [`TokioQueue`]; callers may supply their
/// own to route onto e.g. a single-threaded UI-affinity executor.
pub trait Queue: Send + Sync + 'static {
    fn dispatch_boxed(&self, task: BoxFuture);
}

/// Ergonomic, non-object-safe companion to [`Queue`] so callers can pass a
/// plain `async` block instead of pinning/boxing it themselves.
pub trait QueueExt: Queue {
    fn dispatch<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.dispatch_boxed(Box::pin(fut));
    }
}

impl<T: Queue + ?Sized> QueueExt for T {}

/// Runs queued tasks on a Tokio runtime handle. The default queue used by
/// [`crate::client::BayeuxClient`] when none is configured explicitly.
#[derive(Clone)]
pub struct TokioQueue(tokio::runtime::Handle);

impl TokioQueue {
    /// Captures the handle of the runtime calling this constructor.
    pub fn current() -> Self {
        Self(tokio::runtime::Handle::current())
    }

    pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
        Self(handle)
    }
}

impl Queue for TokioQueue {
    fn dispatch_boxed(&self, task: BoxFuture) {
        self.0.spawn(task);
    }
}

/// Fire-and-forget notifications the session hands to its owner (spec §6).
/// Every method has a no-op default so implementers only override what they
/// care about.
pub trait Delegate: Send + Sync + 'static {
    fn connected(&self) {}
    fn disconnected(&self, _message: Option<String>, _error: Option<BayeuxError>) {}
    fn failed(&self, _error: BayeuxError) {}
    fn subscription_succeeded(&self, _channel: &str) {}
    fn received_unexpected_message(&self, _message: Message) {}

    /// `advice.reconnect == "retry"`. Returning a different value overrides
    /// `retryInterval` (spec §4.4); returning `interval` unchanged is the
    /// default and matches the server's instruction.
    fn advised_to_retry(&self, interval: f64) -> f64 {
        interval
    }

    /// `advice.reconnect == "handshake"`. Returning `true` (the default)
    /// re-enters the handshake; `false` leaves the session as-is.
    fn advised_to_handshake(&self, should_retry: bool) -> bool {
        should_retry
    }
}

/// A [`Delegate`] that ignores everything. Used when a caller doesn't supply
/// one.
#[derive(Default)]
pub struct NoopDelegate;

impl Delegate for NoopDelegate {}

/// Posts [`Delegate`] notifications onto a [`Queue`] on the caller's behalf.
/// Cloning is cheap — it's two `Arc`s.
#[derive(Clone)]
pub struct DelegateSink {
    delegate: Arc<dyn Delegate>,
    queue: Arc<dyn Queue>,
}

impl DelegateSink {
    pub fn new(delegate: Arc<dyn Delegate>, queue: Arc<dyn Queue>) -> Self {
        Self { delegate, queue }
    }

    pub fn connected(&self) {
        let delegate = self.delegate.clone();
        self.queue.dispatch(async move { delegate.connected() });
    }

    pub fn disconnected(&self, message: Option<String>, error: Option<BayeuxError>) {
        let delegate = self.delegate.clone();
        self.queue.dispatch(async move { delegate.disconnected(message, error) });
    }

    pub fn failed(&self, error: BayeuxError) {
        let delegate = self.delegate.clone();
        self.queue.dispatch(async move { delegate.failed(error) });
    }

    pub fn subscription_succeeded(&self, channel: String) {
        let delegate = self.delegate.clone();
        self.queue.dispatch(async move { delegate.subscription_succeeded(&channel) });
    }

    pub fn received_unexpected_message(&self, message: Message) {
        let delegate = self.delegate.clone();
        self.queue.dispatch(async move { delegate.received_unexpected_message(message) });
    }

    /// Synchronous and inline — see the module-level Open Question note.
    pub fn advised_to_retry(&self, interval: f64) -> f64 {
        self.delegate.advised_to_retry(interval)
    }

    /// Synchronous and inline — see the module-level Open Question note.
    pub fn advised_to_handshake(&self, should_retry: bool) -> bool {
        self.delegate.advised_to_handshake(should_retry)
    }
}

/// A place to run subscription-message and connect-success callbacks (spec
/// §5). Distinct from the delegate queue so a caller can route UI-facing
/// delegate events and message callbacks to different executors.
#[derive(Clone)]
pub struct CallbackQueue(Arc<dyn Queue>);

impl CallbackQueue {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self(queue)
    }

    pub fn dispatch<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.0.dispatch(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Recording {
        connected: AtomicUsize,
        last_retry_override: Mutex<Option<f64>>,
    }

    impl Delegate for Recording {
        fn connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn advised_to_retry(&self, interval: f64) -> f64 {
            *self.last_retry_override.lock().unwrap() = Some(interval);
            interval * 2.0
        }
    }

    #[tokio::test]
    async fn connected_is_dispatched_on_the_queue() {
        let delegate = Arc::new(Recording {
            connected: AtomicUsize::new(0),
            last_retry_override: Mutex::new(None),
        });
        let queue: Arc<dyn Queue> = Arc::new(TokioQueue::current());
        let sink = DelegateSink::new(delegate.clone(), queue);

        sink.connected();
        // give the spawned task a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(delegate.connected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn advice_callbacks_run_synchronously_and_return_overrides() {
        let delegate = Arc::new(Recording {
            connected: AtomicUsize::new(0),
            last_retry_override: Mutex::new(None),
        });
        let queue: Arc<dyn Queue> = Arc::new(NoOpQueueForTest);
        let sink = DelegateSink::new(delegate.clone(), queue);

        let overridden = sink.advised_to_retry(5.0);
        assert_eq!(overridden, 10.0);
        assert_eq!(*delegate.last_retry_override.lock().unwrap(), Some(5.0));
    }

    struct NoOpQueueForTest;
    impl Queue for NoOpQueueForTest {
        fn dispatch_boxed(&self, _task: BoxFuture) {}
    }
}
