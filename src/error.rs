use thiserror::Error;

/// Errors surfaced by the Bayeux client.
///
/// Every variant corresponds to one of the failure modes a Bayeux session can
/// run into; the propagation policy is: transient transport failures are
/// handled internally by the reconnect controller ([`crate::reconnect`]),
/// everything else reaches the caller via [`crate::delegate::Delegate::failed`]
/// or [`crate::delegate::Delegate::disconnected`]. No variant is ever returned
/// synchronously from a public API call.
#[derive(Error, Debug)]
pub enum BayeuxError {
    /// A send was attempted while the transport was not open.
    #[error("socket is not open")]
    SocketNotOpen,

    /// The transport closed unexpectedly (non-clean, or with a reason).
    #[error("socket closed unexpectedly: {0}")]
    SocketClosed(String),

    /// The HTTP handshake response was not `200 OK`.
    #[error("unexpected HTTP status code: {0}")]
    HttpUnexpectedStatusCode(u16),

    /// An inbound payload failed to decode, or was not a JSON array.
    #[error("malformed JSON data: {0}")]
    MalformedJsonData(String),

    /// An outbound value failed to encode.
    #[error("malformed object data: {0}")]
    MalformedObjectData(String),

    /// A message arrived on a `/meta/*` channel that isn't one of the five
    /// known meta-channels.
    #[error("unhandled meta channel message on {0}")]
    UnhandledMetaChannelMessage(String),

    /// The handshake reply advertised no connection type the client supports.
    #[error("no common supported connection type")]
    NoCommonSupportedConnectionType,

    /// The handshake reply was unsuccessful.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// `/meta/connect` was unsuccessful after a successful handshake.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// `/meta/subscribe` was unsuccessful.
    #[error("subscribe failed for {channel}: {reason}")]
    SubscribeFailed { channel: String, reason: String },

    /// `/meta/unsubscribe` was unsuccessful.
    #[error("unsubscribe failed for {channel}: {reason}")]
    UnsubscribeFailed { channel: String, reason: String },

    /// The server sent `advice.reconnect == "none"` on the connection.
    #[error("server terminated the session (advice: none)")]
    ReceivedAdviceReconnectTypeNone,

    /// The reconnect attempt ceiling configured via
    /// [`crate::client::ClientConfig::max_reconnect_attempts`] was reached.
    ///
    /// Not part of the protocol itself; an addition mirroring
    /// `ethers_providers`'s `WsClientError::TooManyReconnects` so callers who
    /// want bounded reconnection have somewhere to land.
    #[error("reconnect attempt limit reached")]
    TooManyReconnects,

    /// A channel path did not begin with `/`.
    #[error("invalid channel path: {0:?}")]
    InvalidChannel(String),

    /// The worker task has gone away; the client handle is unusable.
    #[error("the session's worker task is no longer running")]
    WorkerGone,
}
