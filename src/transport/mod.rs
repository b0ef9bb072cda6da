//! The WebSocket transport and its HTTP handshake-only fallback (spec §4,
//! §9: "the WebSocket/HTTP split"). Grounded on `ethers_providers`'s
//! `ws2::backend`/`ws2::manager` split: a backend task owns the socket and
//! only speaks in plain text frames and [`TransportEvent`]s, while the actor
//! in [`crate::client`] (the counterpart of `RequestManager`) owns Bayeux
//! semantics.

pub mod http;
pub mod ws;

use url::Url;

use crate::reconnect::PosixError;

/// What a live WS connection was opened against. Stored alongside the
/// session so reconnect can redial the same place.
#[derive(Debug, Clone)]
pub struct ConnectionDetails {
    pub url: Url,
}

/// Events the backend task reports up to the actor. There is no `Opened`
/// variant: opening is the result of `WsBackend::connect`, not something
/// observed after the fact, matching the teacher's `RequestManager::connect`
/// shape.
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete text frame arrived.
    Text(String),
    /// The socket closed, cleanly or otherwise.
    Closed(Option<String>),
    /// The socket failed in a way the reconnect controller can classify.
    Failed(PosixError),
}
