//! The Bayeux session state machine (spec §3, §4.1).

use serde_json::Value;
use url::Url;

/// Keep-alive period, in seconds, before any server advice has overridden it.
pub const DEFAULT_RETRY_INTERVAL_SECS: f64 = 45.0;
/// Delay, in seconds, before retrying after a transport-level failure.
pub const DEFAULT_RECONNECT_INTERVAL_SECS: f64 = 1.0;

/// `Disconnected -> Handshaking -> Connecting -> Connected -> Disconnecting
/// -> Disconnected`, per the transition table in spec §4.1.
///
/// `Handshaking` and `Connecting` share the "is-connecting" bit called out in
/// spec §3 so callers can test it without a `matches!` at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    pub fn is_connecting(self) -> bool {
        matches!(self, SessionState::Handshaking | SessionState::Connecting)
    }
}

/// Per-session state (spec §3: "Session"). One instance per client.
pub struct Session {
    pub base_url: Url,
    pub client_id: Option<String>,
    pub state: SessionState,
    pub connection_type: Option<String>,
    pub connection_extension: Option<Value>,
    pub retry_interval_secs: f64,
    pub reconnect_interval_secs: f64,
    pub may_send_handshake_async: bool,
    pub await_only_handshake: bool,
    pub reconnecting: bool,
    pub should_reconnect_on_foreground: bool,
}

impl Session {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            client_id: None,
            state: SessionState::Disconnected,
            connection_type: None,
            connection_extension: None,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            may_send_handshake_async: false,
            await_only_handshake: false,
            reconnecting: false,
            should_reconnect_on_foreground: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    /// `connect()`: records the extension and moves to `Handshaking`.
    pub fn begin_handshake(&mut self, extension: Option<Value>) {
        self.connection_extension = extension;
        self.client_id = None;
        self.state = SessionState::Handshaking;
    }

    /// A successful `/meta/handshake` reply: stores `clientId`, records the
    /// negotiated connection type, and moves to `Connecting` (spec §4.1
    /// invariant: `clientId` is non-null for the rest of `Connecting`).
    pub fn complete_handshake(&mut self, client_id: String, connection_type: String) {
        self.client_id = Some(client_id);
        self.connection_type = Some(connection_type);
        self.state = SessionState::Connecting;
    }

    /// Socket-open (async handshake path) or handshake success (sync path)
    /// once a `clientId` is already held: the session is now `Connected`.
    pub fn mark_connected(&mut self) {
        debug_assert!(self.client_id.is_some(), "clientId must be set before Connected");
        self.state = SessionState::Connected;
    }

    /// `disconnect()` with a live `clientId`: emit `/meta/disconnect` and
    /// wait for the ack.
    pub fn begin_disconnect(&mut self) {
        self.state = SessionState::Disconnecting;
    }

    /// The disconnect ack arrived, or the transport closed: clear identity
    /// and return to `Disconnected`.
    pub fn complete_disconnect(&mut self) {
        self.client_id = None;
        self.connection_type = None;
        self.state = SessionState::Disconnected;
        self.reconnecting = false;
    }

    /// A fatal error (unsuccessful handshake/connect, or advice `none` on the
    /// connection channel): revert to `Disconnected` without a disconnect
    /// round-trip.
    pub fn reset_to_disconnected(&mut self) {
        self.client_id = None;
        self.connection_type = None;
        self.state = SessionState::Disconnected;
        self.reconnecting = false;
    }

    /// `advice.reconnect == "handshake"`: clear the identity and re-enter
    /// `Handshaking` without touching `connection_extension`.
    pub fn begin_rehandshake(&mut self) {
        self.client_id = None;
        self.state = SessionState::Handshaking;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Url::parse("wss://example.com/bayeux").unwrap())
    }

    #[test]
    fn starts_disconnected_with_no_client_id() {
        let s = session();
        assert_eq!(s.state, SessionState::Disconnected);
        assert!(s.client_id.is_none());
        assert!(!s.is_connecting());
        assert!(!s.is_connected());
    }

    #[test]
    fn handshake_then_connect_sets_client_id_before_connected() {
        let mut s = session();
        s.begin_handshake(None);
        assert!(s.is_connecting());
        assert!(s.client_id.is_none());

        s.complete_handshake("abc".to_owned(), "websocket".to_owned());
        assert_eq!(s.client_id.as_deref(), Some("abc"));
        assert!(s.is_connecting());
        assert!(!s.is_connected());

        s.mark_connected();
        assert!(s.is_connected());
        assert!(!s.is_connecting());
    }

    #[test]
    fn disconnect_clears_identity() {
        let mut s = session();
        s.begin_handshake(None);
        s.complete_handshake("abc".to_owned(), "websocket".to_owned());
        s.mark_connected();

        s.begin_disconnect();
        assert!(s.client_id.is_some(), "clientId survives until the ack");

        s.complete_disconnect();
        assert!(s.client_id.is_none());
        assert_eq!(s.state, SessionState::Disconnected);
    }

    #[test]
    fn rehandshake_clears_client_id_but_keeps_extension() {
        let mut s = session();
        s.begin_handshake(Some(serde_json::json!({"token": "t"})));
        s.complete_handshake("abc".to_owned(), "websocket".to_owned());
        s.mark_connected();

        s.begin_rehandshake();
        assert!(s.client_id.is_none());
        assert_eq!(s.state, SessionState::Handshaking);
        assert!(s.connection_extension.is_some());
    }
}
