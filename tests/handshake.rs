//! End-to-end smoke test against a fake Bayeux server, in the same style as
//! the teacher's `tests/ws_errors.rs`: bind a local listener, speak just
//! enough of the wire protocol to exercise the real client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bayeux_client::{BayeuxClient, ClientConfig, Delegate};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use url::Url;

const ADDR: &str = "127.0.0.1:9911";
const ADDR2: &str = "127.0.0.1:9912";

#[derive(Default)]
struct Recording {
    connected: std::sync::atomic::AtomicUsize,
}

impl Delegate for Recording {
    fn connected(&self) {
        self.connected.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[tokio::test]
async fn handshake_and_connect_reach_the_connected_state() {
    spawn_fake_server().await;

    let delegate = std::sync::Arc::new(Recording::default());
    let config = ClientConfig::new(Url::parse(&format!("ws://{ADDR}/bayeux")).unwrap())
        .with_delegate(delegate.clone())
        .with_retry_interval_secs(0.01);
    let client = BayeuxClient::new(config);

    client.connect(None);

    for _ in 0..50 {
        if client.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(client.is_connected(), "client never reached Connected");
    assert!(delegate.connected.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn disconnecting_before_handshake_completes_defers_until_the_client_id_arrives() {
    let received = Arc::new(Mutex::new(Vec::new()));
    spawn_recording_fake_server(received.clone()).await;

    let config = ClientConfig::new(Url::parse(&format!("ws://{ADDR2}/bayeux")).unwrap());
    let client = BayeuxClient::new(config);

    client.connect(None);
    client.disconnect();

    for _ in 0..50 {
        if received.lock().unwrap().iter().any(|f: &String| f.contains("/meta/disconnect")) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let frames = received.lock().unwrap();
    let disconnect_frame =
        frames.iter().find(|f| f.contains("/meta/disconnect")).expect("no /meta/disconnect frame sent");
    assert!(disconnect_frame.contains("fake-client-id"), "disconnect must carry the handshake's clientId");
    assert!(!frames.iter().any(|f| f.contains("/meta/connect")), "connect must never be sent once deferred");
}

async fn spawn_fake_server() {
    let listener = TcpListener::bind(ADDR).await.expect("bind fake bayeux server");
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream));
        }
    });
}

async fn serve(stream: TcpStream) {
    let mut ws = accept_async(stream).await.expect("fake server handshake");
    while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
        if text.contains("/meta/handshake") {
            let reply = r#"[{"channel":"/meta/handshake","successful":true,"clientId":"fake-client-id","supportedConnectionTypes":["websocket"],"version":"1.0"}]"#;
            let _ = ws.send(WsMessage::Text(reply.to_owned())).await;
        } else if text.contains("/meta/connect") {
            let reply = r#"[{"channel":"/meta/connect","successful":true,"clientId":"fake-client-id"}]"#;
            let _ = ws.send(WsMessage::Text(reply.to_owned())).await;
        }
    }
}

async fn spawn_recording_fake_server(received: Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind(ADDR2).await.expect("bind fake bayeux server");
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_recording(stream, received));
        }
    });
}

async fn serve_recording(stream: TcpStream, received: Arc<Mutex<Vec<String>>>) {
    let mut ws = accept_async(stream).await.expect("fake server handshake");
    while let Some(Ok(WsMessage::Text(text))) = ws.next().await {
        received.lock().unwrap().push(text.clone());
        if text.contains("/meta/handshake") {
            let reply = r#"[{"channel":"/meta/handshake","successful":true,"clientId":"fake-client-id","supportedConnectionTypes":["websocket"],"version":"1.0"}]"#;
            let _ = ws.send(WsMessage::Text(reply.to_owned())).await;
        } else if text.contains("/meta/connect") {
            let reply = r#"[{"channel":"/meta/connect","successful":true,"clientId":"fake-client-id"}]"#;
            let _ = ws.send(WsMessage::Text(reply.to_owned())).await;
        } else if text.contains("/meta/disconnect") {
            let reply = r#"[{"channel":"/meta/disconnect","successful":true,"clientId":"fake-client-id"}]"#;
            let _ = ws.send(WsMessage::Text(reply.to_owned())).await;
        }
    }
}
