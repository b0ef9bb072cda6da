//! The subscription registry (spec §4.3): maps channel paths to callback
//! wrappers, and knows how to re-issue itself after a reconnect.
//!
//! Grounded on `ethers_providers`'s `SubscriptionManager`
//! (`rpc/transports/ws2/manager.rs`), which keeps an id-indexed map of active
//! subscriptions alongside an alias map and re-issues them verbatim on
//! reconnect (`RequestManager::reconnect`). Bayeux subscriptions don't need
//! the server-assigned alias indirection `eth_subscribe` does — a channel
//! path is already the stable key — so this is simpler than the teacher's
//! version: one map, no aliasing.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::BayeuxError;
use crate::message::{ChannelSpec, Message};

/// A subscription callback. Invoked on the configured callback queue
/// (spec §5), never inline on the worker task.
pub type Callback = Arc<dyn Fn(Value) + Send + Sync>;

struct Entry {
    channels: Vec<String>,
    callback: Callback,
    ext: Option<Value>,
}

/// Local bookkeeping for "what channels is this session subscribed to".
///
/// A single callback registered across multiple channels (spec §3:
/// "SubscriptionEntry") shares one [`Entry`]; removing the last channel from
/// an entry drops it. The registry never talks to the transport directly —
/// it only builds the [`Message`]s the caller (the session/dispatcher) sends.
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    entries: HashMap<u64, Entry>,
    channels: HashMap<String, u64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(channels: &[String]) -> Result<(), BayeuxError> {
        for c in channels {
            if !c.starts_with('/') {
                return Err(BayeuxError::InvalidChannel(c.clone()));
            }
        }
        Ok(())
    }

    /// Registers `callback` on every channel in `channels`, sharing one
    /// entry, and returns the `/meta/subscribe` envelope to send.
    pub fn subscribe(
        &mut self,
        client_id: &str,
        channels: Vec<String>,
        callback: Callback,
        ext: Option<Value>,
    ) -> Result<Message, BayeuxError> {
        Self::validate(&channels)?;
        let id = self.next_id;
        self.next_id += 1;
        for c in &channels {
            self.channels.insert(c.clone(), id);
        }
        let spec: ChannelSpec = channels.clone().into();
        self.entries.insert(id, Entry { channels, callback, ext: ext.clone() });
        Ok(Message::subscribe(client_id, spec, ext))
    }

    /// Eagerly removes the local entries for `channels`, then returns the
    /// `/meta/unsubscribe` envelope. Server acknowledgement is informational
    /// (spec §4.3): by the time the ack arrives the channels are already gone.
    pub fn unsubscribe(&mut self, client_id: &str, channels: &[String]) -> Message {
        for c in channels {
            if let Some(id) = self.channels.remove(c) {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.channels.retain(|existing| existing != c);
                    if entry.channels.is_empty() {
                        self.entries.remove(&id);
                    }
                }
            }
        }
        Message::unsubscribe(client_id, channels.to_vec().into())
    }

    /// Builds one `/meta/unsubscribe` envelope per entry, for every channel
    /// currently tracked. Unlike [`Self::unsubscribe`], local entries are
    /// **not** cleared — callers clear them from the ack handler, or keep
    /// them around across a reconnect (spec §4.3).
    pub fn unsubscribe_all(&self, client_id: &str) -> Vec<Message> {
        self.entries
            .values()
            .map(|entry| Message::unsubscribe(client_id, entry.channels.clone().into()))
            .collect()
    }

    /// The `/meta/subscribe` envelopes needed to restore every currently
    /// tracked entry against a fresh `clientId` after a reconnect (spec
    /// §4.1: "re-issue `/meta/subscribe` for every preserved entry
    /// directly").
    pub fn resubscribe_messages(&self, client_id: &str) -> Vec<Message> {
        self.entries
            .values()
            .map(|entry| {
                Message::subscribe(client_id, entry.channels.clone().into(), entry.ext.clone())
            })
            .collect()
    }

    /// Dispatches `data` to the callback registered for `channel`, if any.
    /// Per spec §4.2 rule 4, callers only invoke this for non-null data.
    pub fn callback_for(&self, channel: &str) -> Option<Callback> {
        let id = self.channels.get(channel)?;
        self.entries.get(id).map(|entry| entry.callback.clone())
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn clear(&mut self) {
        self.next_id = 0;
        self.entries.clear();
        self.channels.clear();
    }
}
