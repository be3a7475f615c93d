//! Fan-out of inbound envelopes to typed subscribers.
//!
//! Each link owns one dispatcher mapping a message type (or the wildcard)
//! to its current subscribers. Delivery is per-subscriber-channel, so one
//! misbehaving or departed subscriber can never disturb delivery to the
//! rest of the set, and socket arrival order is preserved per subscriber.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uplink_wire::Envelope;

/// Subscription kind matching every delivered envelope.
pub const WILDCARD: &str = "*";

/// Identifier handed out for each registration; used to unsubscribe.
pub type SubscriberId = u64;

#[derive(Debug)]
struct Slot {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Per-link subscriber registry.
///
/// Ids are assigned monotonically, so registering the same logical consumer
/// twice yields two independent subscriptions. Unsubscribing takes effect
/// for frames after the current delivery pass.
#[derive(Debug, Default)]
pub struct Dispatcher {
    routes: HashMap<String, Vec<Slot>>,
    next_id: SubscriberId,
}

impl Dispatcher {
    /// Register a subscriber for `kind` (or [`WILDCARD`]).
    ///
    /// Returns the id used to unsubscribe and the receiving end of the
    /// subscription channel.
    pub fn subscribe(&mut self, kind: &str) -> (SubscriberId, mpsc::UnboundedReceiver<Envelope>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .entry(kind.to_string())
            .or_default()
            .push(Slot { id, tx });
        (id, rx)
    }

    /// Remove one subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, kind: &str, id: SubscriberId) {
        if let Some(slots) = self.routes.get_mut(kind) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                self.routes.remove(kind);
            }
        }
    }

    /// Deliver one envelope: wildcard subscribers first, then exact-type.
    ///
    /// Subscribers whose receiver has been dropped are pruned as a side
    /// effect; the rest of the pass is unaffected.
    pub fn deliver(&mut self, envelope: &Envelope) {
        self.deliver_kind(WILDCARD, envelope);
        if envelope.kind != WILDCARD {
            let kind = envelope.kind.clone();
            self.deliver_kind(&kind, envelope);
        }
    }

    fn deliver_kind(&mut self, kind: &str, envelope: &Envelope) {
        let Some(slots) = self.routes.get_mut(kind) else {
            return;
        };
        slots.retain(|slot| {
            if slot.tx.send(envelope.clone()).is_ok() {
                true
            } else {
                debug!("pruning departed subscriber {} for kind {}", slot.id, kind);
                false
            }
        });
        if slots.is_empty() {
            self.routes.remove(kind);
        }
    }

    /// Drop every subscriber; their channels observe end-of-stream.
    ///
    /// Invoked on manual disconnect only, never on transient errors.
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Number of live registrations across all kinds
    pub fn subscriber_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }
}
