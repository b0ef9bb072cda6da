//! The reconnect controller (spec §4.4): interprets server advice and
//! transport-layer failures, and decides what the actor should do about
//! them. This module is pure decision logic plus the delegate's synchronous
//! advice callbacks; the actual timer/await plumbing lives in
//! [`crate::client`], the same split `ethers_providers` draws between
//! `RequestManager::reconnect` (decides/acts) and `WsBackend` (owns the
//! socket).

use std::future::Future;
use std::pin::Pin;

use crate::delegate::DelegateSink;
use crate::message::{Advice, Message, ReconnectAdvice};
use crate::session::Session;

/// What to do after folding a reply's `advice` into session state (spec
/// §4.4.A). The caller still has to act on this — e.g. `Handshake` means
/// "now go send a handshake envelope", it doesn't send it itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviceOutcome {
    /// No advice present, or advice present but none of the three reconnect
    /// kinds applied (nothing to do).
    Ignored,
    /// `retryInterval` was updated on `session`; no further action.
    Retried,
    /// `session` has been moved to `Handshaking`; send a new handshake.
    Handshake,
    /// `session` has been moved to `Disconnected`; surface
    /// `BayeuxError::ReceivedAdviceReconnectTypeNone` to the delegate.
    Terminated,
}

/// Folds `msg.advice` into `session`, consulting the delegate for the two
/// overridable decisions. Spec §5 ordering guarantee: this must run before
/// the message's meta-channel handler, so callers invoke it first in the
/// dispatch pipeline.
pub fn apply_advice(msg: &Message, session: &mut Session, delegate: &DelegateSink) -> AdviceOutcome {
    let Some(advice) = msg.advice.as_ref() else {
        return AdviceOutcome::Ignored;
    };

    match advice.reconnect {
        Some(ReconnectAdvice::Retry) => {
            let proposed = proposed_retry_interval(advice, session.retry_interval_secs);
            session.retry_interval_secs = delegate.advised_to_retry(proposed);
            AdviceOutcome::Retried
        }
        Some(ReconnectAdvice::Handshake) => {
            if delegate.advised_to_handshake(true) {
                session.begin_rehandshake();
                AdviceOutcome::Handshake
            } else {
                AdviceOutcome::Ignored
            }
        }
        Some(ReconnectAdvice::None) => {
            if is_connection_level(msg) {
                session.reset_to_disconnected();
                AdviceOutcome::Terminated
            } else {
                AdviceOutcome::Ignored
            }
        }
        None => AdviceOutcome::Ignored,
    }
}

fn proposed_retry_interval(advice: &Advice, current_secs: f64) -> f64 {
    match advice.interval {
        Some(0) => crate::session::DEFAULT_RETRY_INTERVAL_SECS,
        Some(ms) => ms as f64 / 1000.0,
        None => current_secs,
    }
}

fn is_connection_level(msg: &Message) -> bool {
    matches!(msg.subscription.as_ref(), Some(spec) if spec.channels() == ["connection"])
}

/// The POSIX error classes the transport collaborator may report (spec
/// §4.4.B, §6). Named rather than raw `errno` values so this crate doesn't
/// need a libc dependency just to pattern-match eight constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosixError {
    NetworkDown,
    NetworkUnreachable,
    HostDown,
    HostUnreachable,
    ConnectionReset,
    NotConnected,
    TimedOut,
    ConnectionRefused,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportErrorKind {
    NetworkUnreachable,
    ConnectionLevel,
    Other,
}

impl From<PosixError> for TransportErrorKind {
    fn from(err: PosixError) -> Self {
        use PosixError::*;
        match err {
            NetworkDown | NetworkUnreachable | HostDown | HostUnreachable => {
                TransportErrorKind::NetworkUnreachable
            }
            ConnectionReset | NotConnected | TimedOut | ConnectionRefused => {
                TransportErrorKind::ConnectionLevel
            }
            Other => TransportErrorKind::Other,
        }
    }
}

/// What the actor should do in response to a transport error (spec §4.4.B).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportErrorAction {
    /// Register a reachability observer; reconnect once it resolves (subject
    /// to [`should_reconnect_after_reachable`]).
    AwaitReachability,
    /// Call `reconnect()` after this many seconds.
    ScheduleReconnect { after_secs: f64 },
    /// Not one of the eight recognized codes; no automatic action.
    Ignored,
}

/// Classifies a transport error into the action spec §4.4.B prescribes.
/// `reconnect_interval_secs < 0` disables reconnection outright, overriding
/// any classification.
pub fn classify_transport_error(error: PosixError, reconnect_interval_secs: f64) -> TransportErrorAction {
    if reconnect_interval_secs < 0.0 {
        return TransportErrorAction::Ignored;
    }
    match TransportErrorKind::from(error) {
        TransportErrorKind::NetworkUnreachable => TransportErrorAction::AwaitReachability,
        TransportErrorKind::ConnectionLevel => {
            TransportErrorAction::ScheduleReconnect { after_secs: reconnect_interval_secs }
        }
        TransportErrorKind::Other => TransportErrorAction::Ignored,
    }
}

/// Whether, once a host becomes reachable again, the actor should actually
/// call `reconnect()` (spec §4.4.B: "...and no connection-required
/// transient flag is set... if not already reconnecting and
/// reconnectInterval>0").
pub fn should_reconnect_after_reachable(
    connection_required_transient: bool,
    already_reconnecting: bool,
    reconnect_interval_secs: f64,
) -> bool {
    !connection_required_transient && !already_reconnecting && reconnect_interval_secs > 0.0
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Bridges platform-specific network-reachability notification (spec §1:
/// "out of scope... treated as an external collaborator"; spec §9:
/// "Reachability callback bridging"). An implementation resolves the
/// returned future once `host` is reachable; dropping the future before it
/// resolves tears down whatever observer it installed.
pub trait Reachability: Send + Sync + 'static {
    fn await_reachable(&self, host: &str) -> BoxFuture<'static, ()>;
}

/// A [`Reachability`] that resolves immediately. Useful for tests and for
/// callers who don't want the network-unreachable class handled specially
/// (transport errors of that class then just never recover automatically).
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    fn await_reachable(&self, _host: &str) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{Delegate, DelegateSink, NoopDelegate, Queue, TokioQueue};
    use std::sync::Arc;
    use url::Url;

    fn delegate_sink() -> DelegateSink {
        let delegate: Arc<dyn Delegate> = Arc::new(NoopDelegate);
        let queue: Arc<dyn Queue> = Arc::new(TokioQueue::current());
        DelegateSink::new(delegate, queue)
    }

    fn session() -> Session {
        Session::new(Url::parse("wss://example.com/bayeux").unwrap())
    }

    #[tokio::test]
    async fn retry_advice_with_interval_updates_session() {
        let mut s = session();
        let sink = delegate_sink();
        let msg = Message {
            advice: Some(Advice { reconnect: Some(ReconnectAdvice::Retry), interval: Some(5000) }),
            ..Default::default()
        };

        let outcome = apply_advice(&msg, &mut s, &sink);
        assert_eq!(outcome, AdviceOutcome::Retried);
        assert_eq!(s.retry_interval_secs, 5.0);
    }

    #[tokio::test]
    async fn retry_advice_with_zero_interval_resets_to_default() {
        let mut s = session();
        s.retry_interval_secs = 5.0;
        let sink = delegate_sink();
        let msg = Message {
            advice: Some(Advice { reconnect: Some(ReconnectAdvice::Retry), interval: Some(0) }),
            ..Default::default()
        };

        apply_advice(&msg, &mut s, &sink);
        assert_eq!(s.retry_interval_secs, crate::session::DEFAULT_RETRY_INTERVAL_SECS);
    }

    #[tokio::test]
    async fn handshake_advice_moves_to_handshaking_and_clears_client_id() {
        let mut s = session();
        s.begin_handshake(None);
        s.complete_handshake("abc".to_owned(), "websocket".to_owned());
        s.mark_connected();

        let sink = delegate_sink();
        let msg = Message {
            advice: Some(Advice { reconnect: Some(ReconnectAdvice::Handshake), interval: None }),
            ..Default::default()
        };

        let outcome = apply_advice(&msg, &mut s, &sink);
        assert_eq!(outcome, AdviceOutcome::Handshake);
        assert!(s.client_id.is_none());
        assert_eq!(s.state, crate::session::SessionState::Handshaking);
    }

    #[tokio::test]
    async fn none_advice_on_connection_channel_terminates_session() {
        let mut s = session();
        s.begin_handshake(None);
        s.complete_handshake("abc".to_owned(), "websocket".to_owned());
        s.mark_connected();

        let sink = delegate_sink();
        let msg = Message {
            advice: Some(Advice { reconnect: Some(ReconnectAdvice::None), interval: None }),
            subscription: Some("connection".into()),
            ..Default::default()
        };

        let outcome = apply_advice(&msg, &mut s, &sink);
        assert_eq!(outcome, AdviceOutcome::Terminated);
        assert!(s.client_id.is_none());
        assert_eq!(s.state, crate::session::SessionState::Disconnected);
    }

    #[tokio::test]
    async fn none_advice_elsewhere_is_ignored() {
        let mut s = session();
        s.begin_handshake(None);
        s.complete_handshake("abc".to_owned(), "websocket".to_owned());
        s.mark_connected();

        let sink = delegate_sink();
        let msg = Message {
            advice: Some(Advice { reconnect: Some(ReconnectAdvice::None), interval: None }),
            subscription: Some("/chat/room1".into()),
            ..Default::default()
        };

        let outcome = apply_advice(&msg, &mut s, &sink);
        assert_eq!(outcome, AdviceOutcome::Ignored);
        assert!(s.client_id.is_some());
    }

    #[test]
    fn network_unreachable_codes_await_reachability() {
        for err in [
            PosixError::NetworkDown,
            PosixError::NetworkUnreachable,
            PosixError::HostDown,
            PosixError::HostUnreachable,
        ] {
            assert_eq!(classify_transport_error(err, 1.0), TransportErrorAction::AwaitReachability);
        }
    }

    #[test]
    fn connection_level_codes_schedule_a_reconnect() {
        for err in [
            PosixError::ConnectionReset,
            PosixError::NotConnected,
            PosixError::TimedOut,
            PosixError::ConnectionRefused,
        ] {
            assert_eq!(
                classify_transport_error(err, 2.5),
                TransportErrorAction::ScheduleReconnect { after_secs: 2.5 }
            );
        }
    }

    #[test]
    fn negative_reconnect_interval_disables_everything() {
        assert_eq!(
            classify_transport_error(PosixError::ConnectionReset, -1.0),
            TransportErrorAction::Ignored
        );
        assert_eq!(
            classify_transport_error(PosixError::NetworkUnreachable, -1.0),
            TransportErrorAction::Ignored
        );
    }

    #[test]
    fn reachable_gate_respects_transient_flag_and_reconnecting_state() {
        assert!(should_reconnect_after_reachable(false, false, 1.0));
        assert!(!should_reconnect_after_reachable(true, false, 1.0));
        assert!(!should_reconnect_after_reachable(false, true, 1.0));
        assert!(!should_reconnect_after_reachable(false, false, 0.0));
    }
}
