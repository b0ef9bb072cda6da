//! The meta-channel dispatcher (spec §4.2): routes inbound messages to
//! per-meta-channel handlers, and supports one-shot interception of the next
//! reply on a channel (`chainOnce`, used to run the user's `connect()`
//! success callback and the deferred-disconnect trick of spec §9).
//!
//! Design note (spec §9, "Actor block chaining"): the original represents a
//! handler as an object wrapping either a selector-target or a block. Here
//! that becomes a two-case enum — a permanent handler (a plain function
//! pointer to a method on the dispatch context) or a one-shot closure that
//! carries its own replacement — exactly the "tagged variant with two cases"
//! the design notes call for. The chain is a single mutable slot per
//! meta-channel, so "at most one active handler chain head" (spec §3
//! invariant) holds by construction: there is nowhere else to put a second
//! one.

use crate::message::{Message, MetaChannel};
use crate::registry::SubscriptionRegistry;

/// Implemented by whatever owns Bayeux session state and runs the permanent,
/// built-in reply handlers. The actor in [`crate::client`] implements this.
pub trait MetaChannelHandlers {
    fn on_handshake_reply(&mut self, msg: Message);
    fn on_connect_reply(&mut self, msg: Message);
    fn on_disconnect_reply(&mut self, msg: Message);
    fn on_subscribe_reply(&mut self, msg: Message);
    fn on_unsubscribe_reply(&mut self, msg: Message);
}

fn no_op<C>(_: &mut C, _: Message) {}

enum Slot<C> {
    Permanent(fn(&mut C, Message)),
    OneShot(Box<dyn FnOnce(&mut C, Message) + Send>, Box<Slot<C>>),
}

/// The classification of an inbound message, per spec §4.2's routing rule
/// (advice is applied separately, before this is consulted — see
/// [`crate::reconnect::ReconnectController::apply_advice`]).
pub enum Route {
    /// Dispatch to this meta-channel's handler chain head.
    Meta(MetaChannel),
    /// `/meta/*` but not one of the five known channels.
    UnhandledMeta,
    /// A channel the subscription registry has a callback for.
    Subscription,
    /// Neither of the above.
    Unexpected,
}

/// Classifies `msg` per the routing rule in spec §4.2 (steps 2-5; advice,
/// step 1, is the caller's concern).
pub fn classify(msg: &Message, registry: &SubscriptionRegistry) -> Route {
    if let Some(mc) = msg.meta_channel() {
        Route::Meta(mc)
    } else if msg.channel.starts_with("/meta") {
        Route::UnhandledMeta
    } else if registry.contains(&msg.channel) {
        Route::Subscription
    } else {
        Route::Unexpected
    }
}

/// Holds the five meta-channel handler chains.
pub struct MetaChannelDispatcher<C> {
    handshake: Slot<C>,
    connect: Slot<C>,
    disconnect: Slot<C>,
    subscribe: Slot<C>,
    unsubscribe: Slot<C>,
}

impl<C: MetaChannelHandlers> Default for MetaChannelDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MetaChannelHandlers> MetaChannelDispatcher<C> {
    pub fn new() -> Self {
        Self {
            handshake: Slot::Permanent(C::on_handshake_reply),
            connect: Slot::Permanent(C::on_connect_reply),
            disconnect: Slot::Permanent(C::on_disconnect_reply),
            subscribe: Slot::Permanent(C::on_subscribe_reply),
            unsubscribe: Slot::Permanent(C::on_unsubscribe_reply),
        }
    }

    fn slot_mut(&mut self, channel: MetaChannel) -> &mut Slot<C> {
        match channel {
            MetaChannel::Handshake => &mut self.handshake,
            MetaChannel::Connect => &mut self.connect,
            MetaChannel::Disconnect => &mut self.disconnect,
            MetaChannel::Subscribe => &mut self.subscribe,
            MetaChannel::Unsubscribe => &mut self.unsubscribe,
        }
    }

    /// Wraps a one-shot handler in front of the current head. `f` runs
    /// exactly once, for the next reply on `channel`, then the previous head
    /// is restored — whether that was the permanent handler or an earlier
    /// one-shot (chainOnce calls nest).
    pub fn chain_once<F>(&mut self, channel: MetaChannel, f: F)
    where
        F: FnOnce(&mut C, Message) + Send + 'static,
    {
        let slot = self.slot_mut(channel);
        let placeholder = Slot::OneShot(Box::new(no_op), Box::new(Slot::Permanent(no_op::<C>)));
        let previous = std::mem::replace(slot, placeholder);
        *self.slot_mut(channel) = Slot::OneShot(Box::new(f), Box::new(previous));
    }

    /// Runs the current head for `msg`'s meta-channel exactly once, then
    /// restores whatever was underneath it.
    pub fn dispatch(&mut self, ctx: &mut C, channel: MetaChannel, msg: Message) {
        let slot = self.slot_mut(channel);
        let placeholder = Slot::OneShot(Box::new(no_op), Box::new(Slot::Permanent(no_op::<C>)));
        let current = std::mem::replace(slot, placeholder);
        match current {
            Slot::Permanent(f) => {
                f(ctx, msg);
                *self.slot_mut(channel) = Slot::Permanent(f);
            }
            Slot::OneShot(f, previous) => {
                f(ctx, msg);
                *self.slot_mut(channel) = *previous;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        handshake_calls: usize,
        connect_calls: usize,
    }

    impl MetaChannelHandlers for Recorder {
        fn on_handshake_reply(&mut self, _msg: Message) {
            self.handshake_calls += 1;
        }
        fn on_connect_reply(&mut self, _msg: Message) {
            self.connect_calls += 1;
        }
        fn on_disconnect_reply(&mut self, _msg: Message) {}
        fn on_subscribe_reply(&mut self, _msg: Message) {}
        fn on_unsubscribe_reply(&mut self, _msg: Message) {}
    }

    fn msg(channel: &str) -> Message {
        Message { channel: channel.to_owned(), ..Default::default() }
    }

    #[test]
    fn permanent_handler_runs_every_time() {
        let mut ctx = Recorder::default();
        let mut dispatcher = MetaChannelDispatcher::<Recorder>::new();
        dispatcher.dispatch(&mut ctx, MetaChannel::Handshake, msg("/meta/handshake"));
        dispatcher.dispatch(&mut ctx, MetaChannel::Handshake, msg("/meta/handshake"));
        assert_eq!(ctx.handshake_calls, 2);
    }

    #[test]
    fn one_shot_runs_once_then_restores_permanent() {
        let mut ctx = Recorder::default();
        let mut dispatcher = MetaChannelDispatcher::<Recorder>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();

        dispatcher.chain_once(MetaChannel::Connect, move |_ctx, _msg| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&mut ctx, MetaChannel::Connect, msg("/meta/connect"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.connect_calls, 0, "one-shot should have run instead of the permanent handler");

        // second reply falls through to the restored permanent handler
        dispatcher.dispatch(&mut ctx, MetaChannel::Connect, msg("/meta/connect"));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "one-shot must not run twice");
        assert_eq!(ctx.connect_calls, 1);
    }

    #[test]
    fn nested_chain_once_restores_the_earlier_one_shot() {
        let mut ctx = Recorder::default();
        let mut dispatcher = MetaChannelDispatcher::<Recorder>::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order1 = order.clone();
        dispatcher.chain_once(MetaChannel::Handshake, move |_ctx, _msg| {
            order1.lock().unwrap().push("first");
        });
        let order2 = order.clone();
        dispatcher.chain_once(MetaChannel::Handshake, move |_ctx, _msg| {
            order2.lock().unwrap().push("second");
        });

        dispatcher.dispatch(&mut ctx, MetaChannel::Handshake, msg("/meta/handshake"));
        dispatcher.dispatch(&mut ctx, MetaChannel::Handshake, msg("/meta/handshake"));
        dispatcher.dispatch(&mut ctx, MetaChannel::Handshake, msg("/meta/handshake"));

        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
        assert_eq!(ctx.handshake_calls, 1, "third dispatch falls through to the permanent handler");
    }

    #[test]
    fn classify_routes_meta_subscription_and_unexpected() {
        let registry = {
            let mut r = SubscriptionRegistry::new();
            r.subscribe("abc", vec!["/chat/a".to_owned()], Arc::new(|_| {}), None).unwrap();
            r
        };

        assert!(matches!(
            classify(&msg("/meta/connect"), &registry),
            Route::Meta(MetaChannel::Connect)
        ));
        assert!(matches!(classify(&msg("/meta/bogus"), &registry), Route::UnhandledMeta));
        assert!(matches!(classify(&msg("/chat/a"), &registry), Route::Subscription));
        assert!(matches!(classify(&msg("/chat/other"), &registry), Route::Unexpected));
    }
}
