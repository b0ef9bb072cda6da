//! The WebSocket backend task (spec §4, primary transport). Adapted from
//! `ethers_providers`'s `WsBackend`/`Backend` split
//! (`rpc/transports/ws2/backend.rs`): a [`WsBackend`] owns the socket and
//! runs on its own Tokio task; the [`WsHandle`] left behind in the actor only
//! sees plain text frames and [`TransportEvent`]s, never the socket itself.
//!
//! Unlike the teacher, there is no fixed keepalive ping here — Bayeux's own
//! `/meta/connect` long-poll cycle (driven by [`crate::scheduler`]) is the
//! heartbeat, so this backend just shuttles frames.

use futures_channel::mpsc;
use futures_util::{
    select,
    sink::SinkExt,
    stream::{Fuse, StreamExt},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

use crate::error::BayeuxError;
use crate::macros::{bx_error, bx_trace};
use crate::reconnect::PosixError;

use super::{ConnectionDetails, TransportEvent};

type Socket = Fuse<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Runs on its own task once [`Self::spawn`] is called; never touched by the
/// actor again.
pub struct WsBackend {
    socket: Socket,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

/// What the actor keeps after handing the socket off to [`WsBackend`].
/// [`Self::split`] separates the outbound sender (which the actor keeps for
/// the life of the connection) from the event stream (which is handed to a
/// forwarder task and never touched again).
pub struct WsHandle {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    outbound: mpsc::UnboundedSender<String>,
}

impl WsHandle {
    pub fn split(self) -> (WsSender, mpsc::UnboundedReceiver<TransportEvent>) {
        (WsSender { outbound: self.outbound }, self.events)
    }
}

/// The actor's handle to a live backend task: enough to send text and to
/// close the connection, nothing else.
pub struct WsSender {
    outbound: mpsc::UnboundedSender<String>,
}

impl WsSender {
    /// Queues `text` for the backend task to send. Fails only once the
    /// backend has already torn itself down.
    pub fn send_text(&self, text: String) -> Result<(), BayeuxError> {
        self.outbound.unbounded_send(text).map_err(|_| BayeuxError::SocketNotOpen)
    }

    /// Closes the outbound side; the backend finishes sending what's queued,
    /// sends a close frame, then exits.
    pub fn close(self) {
        drop(self.outbound);
    }
}

impl WsBackend {
    pub async fn connect(details: ConnectionDetails) -> Result<(Self, WsHandle), BayeuxError> {
        let (socket, _response) = connect_async(details.url.as_str())
            .await
            .map_err(|e| BayeuxError::SocketClosed(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded();
        let (outbound_tx, outbound_rx) = mpsc::unbounded();

        Ok((
            Self { socket: socket.fuse(), events: events_tx, outbound: outbound_rx },
            WsHandle { events: events_rx, outbound: outbound_tx },
        ))
    }

    pub fn spawn(mut self) {
        tokio::spawn(async move {
            loop {
                select! {
                    incoming = self.socket.next() => {
                        if self.handle_incoming(incoming) { break; }
                    }
                    outgoing = self.outbound.next() => {
                        if self.handle_outgoing(outgoing).await { break; }
                    }
                }
            }
        });
    }

    /// Returns `true` when the backend should stop.
    fn handle_incoming(&mut self, incoming: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>) -> bool {
        match incoming {
            Some(Ok(WsMessage::Text(t))) => {
                bx_trace!("received text frame ({} bytes)", t.len());
                self.events.unbounded_send(TransportEvent::Text(t)).is_err()
            }
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => false,
            Some(Ok(WsMessage::Binary(_))) => {
                bx_trace!("dropping unexpected binary frame");
                false
            }
            Some(Ok(WsMessage::Close(frame))) => {
                let reason = frame.map(|f| f.reason.to_string());
                let _ = self.events.unbounded_send(TransportEvent::Closed(reason));
                true
            }
            Some(Err(e)) => {
                bx_error!(err = %e, "websocket error");
                let _ = self.events.unbounded_send(TransportEvent::Failed(classify_ws_error(&e)));
                true
            }
            None => {
                let _ = self.events.unbounded_send(TransportEvent::Closed(None));
                true
            }
        }
    }

    /// Returns `true` when the backend should stop.
    async fn handle_outgoing(&mut self, outgoing: Option<String>) -> bool {
        match outgoing {
            Some(text) => {
                if let Err(e) = self.socket.get_mut().send(WsMessage::Text(text)).await {
                    bx_error!(err = %e, "failed to send websocket frame");
                    let _ = self.events.unbounded_send(TransportEvent::Failed(classify_ws_error(&e)));
                    true
                } else {
                    false
                }
            }
            None => {
                let _ = self.socket.get_mut().close(None).await;
                true
            }
        }
    }
}

fn classify_ws_error(err: &tokio_tungstenite::tungstenite::Error) -> PosixError {
    use tokio_tungstenite::tungstenite::Error as TErr;
    match err {
        TErr::ConnectionClosed | TErr::AlreadyClosed => PosixError::NotConnected,
        TErr::Io(io_err) => classify_io_error(io_err),
        _ => PosixError::Other,
    }
}

fn classify_io_error(err: &std::io::Error) -> PosixError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionReset => PosixError::ConnectionReset,
        ErrorKind::ConnectionRefused => PosixError::ConnectionRefused,
        ErrorKind::NotConnected => PosixError::NotConnected,
        ErrorKind::TimedOut => PosixError::TimedOut,
        ErrorKind::NetworkDown => PosixError::NetworkDown,
        ErrorKind::NetworkUnreachable => PosixError::NetworkUnreachable,
        ErrorKind::HostUnreachable => PosixError::HostUnreachable,
        _ => PosixError::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn network_level_io_errors_classify_as_unreachable() {
        assert_eq!(
            classify_io_error(&std::io::Error::from(ErrorKind::NetworkDown)),
            PosixError::NetworkDown
        );
        assert_eq!(
            classify_io_error(&std::io::Error::from(ErrorKind::NetworkUnreachable)),
            PosixError::NetworkUnreachable
        );
        assert_eq!(
            classify_io_error(&std::io::Error::from(ErrorKind::HostUnreachable)),
            PosixError::HostUnreachable
        );
    }

    #[test]
    fn connection_level_io_errors_classify_accordingly() {
        assert_eq!(
            classify_io_error(&std::io::Error::from(ErrorKind::ConnectionReset)),
            PosixError::ConnectionReset
        );
        assert_eq!(
            classify_io_error(&std::io::Error::from(ErrorKind::TimedOut)),
            PosixError::TimedOut
        );
    }
}
