//! Bayeux envelope types and the protocol encoder/decoder (spec §3, §4.6).
//!
//! Adapted from `ethers_providers`'s JSON-RPC envelope handling
//! (`transports/common.rs::{Request, Response}`), but Bayeux messages are
//! flatter than JSON-RPC: there is one object shape, and `channel` plays the
//! role `method` plays there.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BayeuxError;

pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_DISCONNECT: &str = "/meta/disconnect";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";

const BAYEUX_VERSION: &str = "1.0";
const BAYEUX_MIN_VERSION: &str = "1.0beta";
pub(crate) const WEBSOCKET_CONNECTION_TYPE: &str = "websocket";

/// One of the five reserved `/meta/*` channels that carry session-control
/// replies (spec glossary: "Meta-channel").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaChannel {
    Handshake,
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
}

impl MetaChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            MetaChannel::Handshake => META_HANDSHAKE,
            MetaChannel::Connect => META_CONNECT,
            MetaChannel::Disconnect => META_DISCONNECT,
            MetaChannel::Subscribe => META_SUBSCRIBE,
            MetaChannel::Unsubscribe => META_UNSUBSCRIBE,
        }
    }

    /// All five, in a fixed order. Used to seed the dispatcher's handler map.
    pub fn all() -> [MetaChannel; 5] {
        [
            MetaChannel::Handshake,
            MetaChannel::Connect,
            MetaChannel::Disconnect,
            MetaChannel::Subscribe,
            MetaChannel::Unsubscribe,
        ]
    }

    pub fn parse(channel: &str) -> Option<MetaChannel> {
        match channel {
            META_HANDSHAKE => Some(MetaChannel::Handshake),
            META_CONNECT => Some(MetaChannel::Connect),
            META_DISCONNECT => Some(MetaChannel::Disconnect),
            META_SUBSCRIBE => Some(MetaChannel::Subscribe),
            META_UNSUBSCRIBE => Some(MetaChannel::Unsubscribe),
            _ => None,
        }
    }
}

/// The server's instruction about reconnection semantics (spec glossary:
/// "Advice").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectAdvice {
    Retry,
    Handshake,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<ReconnectAdvice>,
    /// Milliseconds. `Session::retry_interval` stores this in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

/// Either a single channel path or a batch of them — `/meta/subscribe` and
/// `/meta/unsubscribe` accept both, and acknowledgements echo back whichever
/// shape was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSpec {
    Single(String),
    Multiple(Vec<String>),
}

impl ChannelSpec {
    pub fn channels(&self) -> Vec<&str> {
        match self {
            ChannelSpec::Single(c) => vec![c.as_str()],
            ChannelSpec::Multiple(cs) => cs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for ChannelSpec {
    fn from(c: &str) -> Self {
        ChannelSpec::Single(c.to_owned())
    }
}

impl From<Vec<String>> for ChannelSpec {
    fn from(cs: Vec<String>) -> Self {
        if cs.len() == 1 {
            ChannelSpec::Single(cs.into_iter().next().unwrap())
        } else {
            ChannelSpec::Multiple(cs)
        }
    }
}

/// A single Bayeux envelope, inbound or outbound (spec §3).
///
/// All fields except `channel` are optional: the wire format is sparse, and
/// this struct mirrors that with `skip_serializing_if` everywhere so outbound
/// envelopes only carry the fields the spec's encoder table requires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,

    #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<ChannelSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(rename = "connectionType", default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,

    #[serde(
        rename = "supportedConnectionTypes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub supported_connection_types: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "minimumVersion", default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Message {
    pub fn meta_channel(&self) -> Option<MetaChannel> {
        MetaChannel::parse(&self.channel)
    }

    pub fn is_successful(&self) -> bool {
        self.successful.unwrap_or(false)
    }

    /// `/meta/handshake` request. Only ever sent without a `clientId`.
    pub fn handshake(ext: Option<Value>) -> Message {
        Message {
            channel: META_HANDSHAKE.to_owned(),
            version: Some(BAYEUX_VERSION.to_owned()),
            minimum_version: Some(BAYEUX_MIN_VERSION.to_owned()),
            supported_connection_types: Some(vec![WEBSOCKET_CONNECTION_TYPE.to_owned()]),
            ext,
            ..Default::default()
        }
    }

    /// `/meta/connect`. `ext` is sent as JSON `null` when absent, per spec §4.6.
    pub fn connect(client_id: &str, connection_type: &str, ext: Option<Value>) -> Message {
        Message {
            channel: META_CONNECT.to_owned(),
            client_id: Some(client_id.to_owned()),
            connection_type: Some(connection_type.to_owned()),
            ext: Some(ext.unwrap_or(Value::Null)),
            ..Default::default()
        }
    }

    /// `/meta/disconnect`.
    pub fn disconnect(client_id: &str) -> Message {
        Message {
            channel: META_DISCONNECT.to_owned(),
            client_id: Some(client_id.to_owned()),
            ..Default::default()
        }
    }

    /// `/meta/subscribe` for one or more channels sharing a single envelope.
    pub fn subscribe(client_id: &str, channels: ChannelSpec, ext: Option<Value>) -> Message {
        Message {
            channel: META_SUBSCRIBE.to_owned(),
            client_id: Some(client_id.to_owned()),
            subscription: Some(channels),
            ext: Some(ext.unwrap_or(Value::Null)),
            ..Default::default()
        }
    }

    /// `/meta/unsubscribe` for one or more channels.
    pub fn unsubscribe(client_id: &str, channels: ChannelSpec) -> Message {
        Message {
            channel: META_UNSUBSCRIBE.to_owned(),
            client_id: Some(client_id.to_owned()),
            subscription: Some(channels),
            ..Default::default()
        }
    }

    /// A publish to an application channel.
    pub fn publish(
        channel: &str,
        client_id: &str,
        data: Value,
        id: String,
        ext: Option<Value>,
    ) -> Message {
        Message {
            channel: channel.to_owned(),
            client_id: Some(client_id.to_owned()),
            data: Some(data),
            id: Some(id),
            ext,
            ..Default::default()
        }
    }

    /// Serializes this envelope as the single JSON object WebSocket sends.
    pub fn to_ws_text(&self) -> Result<String, BayeuxError> {
        serde_json::to_string(self).map_err(|e| BayeuxError::MalformedObjectData(e.to_string()))
    }

    /// Serializes this envelope as the one-element JSON array HTTP sends.
    pub fn to_http_body(&self) -> Result<String, BayeuxError> {
        serde_json::to_string(std::slice::from_ref(self))
            .map_err(|e| BayeuxError::MalformedObjectData(e.to_string()))
    }
}

/// Parses an inbound text frame into the batch of messages it carries.
///
/// Bayeux batches are always JSON arrays (spec §4.6, §6); a bare object or
/// any other top-level shape is `MalformedJsonData`.
pub fn decode_batch(text: &str) -> Result<Vec<Message>, BayeuxError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| BayeuxError::MalformedJsonData(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(BayeuxError::MalformedJsonData(format!(
            "expected a JSON array, got {}",
            value_kind(&value)
        )));
    };
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| BayeuxError::MalformedJsonData(e.to_string())))
        .collect()
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Generates monotonically increasing, opaque correlation ids for outbound
/// publishes (spec §4.6: "Message id generator"). Uniqueness is only
/// guaranteed within one generator instance — i.e. within one session.
pub struct MessageIdGenerator {
    counter: AtomicU64,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self { counter: AtomicU64::new(0) }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        format!("msg_{}.{}_{}", now.as_secs(), now.subsec_millis(), n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_channel_roundtrip() {
        for mc in MetaChannel::all() {
            assert_eq!(MetaChannel::parse(mc.as_str()), Some(mc));
        }
        assert_eq!(MetaChannel::parse("/chat/room1"), None);
    }

    #[test]
    fn handshake_message_has_required_fields() {
        let msg = Message::handshake(None);
        assert_eq!(msg.channel, META_HANDSHAKE);
        assert_eq!(msg.version.as_deref(), Some("1.0"));
        assert_eq!(msg.minimum_version.as_deref(), Some("1.0beta"));
        assert_eq!(msg.supported_connection_types, Some(vec!["websocket".to_owned()]));
        assert!(msg.client_id.is_none());
    }

    #[test]
    fn connect_message_sends_null_ext_when_absent() {
        let msg = Message::connect("abc", "websocket", None);
        let encoded = msg.to_ws_text().unwrap();
        assert!(encoded.contains(r#""ext":null"#));
        assert!(encoded.contains(r#""clientId":"abc""#));
    }

    #[test]
    fn decode_batch_rejects_non_array_payload() {
        let err = decode_batch(r#"{"channel":"/meta/handshake"}"#).unwrap_err();
        assert!(matches!(err, BayeuxError::MalformedJsonData(_)));
    }

    #[test]
    fn decode_batch_parses_multiple_messages() {
        let batch = decode_batch(
            r#"[{"channel":"/meta/handshake","successful":true,"clientId":"abc"},
               {"channel":"/chat/room1","data":{"text":"hi"}}]"#,
        )
        .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].client_id.as_deref(), Some("abc"));
        assert_eq!(batch[1].channel, "/chat/room1");
    }

    #[test]
    fn channel_spec_single_vs_multiple_round_trip() {
        let single: ChannelSpec = "/chat/room1".into();
        assert_eq!(serde_json::to_string(&single).unwrap(), r#""/chat/room1""#);

        let multi: ChannelSpec = vec!["/a".to_owned(), "/b".to_owned()].into();
        assert_eq!(serde_json::to_string(&multi).unwrap(), r#"["/a","/b"]"#);
    }

    #[test]
    fn id_generator_is_monotonic_and_unique() {
        let gen = MessageIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        assert!(a.starts_with("msg_"));
    }
}
