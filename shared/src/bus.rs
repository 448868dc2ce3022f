//! Per-type event queues and the sequenced envelope stream
//!
//! A peer publishes through its own [`EventBus`]. Published events are
//! looped back into the local queues and copied to the outbox, where the
//! network layer picks them up as [`Envelope`]s. Receivers put incoming
//! envelopes through a [`ReorderBuffer`] before handing them to their bus, so
//! that events are applied in publish order exactly once even though the
//! transport may duplicate or reorder datagrams.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::events::{EventKind, TableEvent};

/// Broadcast channels; every table event travels on the world topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    World,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sequence: u64,
    pub topic: Topic,
    pub event: TableEvent,
}

#[derive(Debug)]
pub struct EventBus {
    queues: HashMap<EventKind, VecDeque<(u64, TableEvent)>>,
    outbox: Vec<Envelope>,
    next_sequence: u64,
    delivered_through: u64,
    dropped: u64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            outbox: Vec::new(),
            next_sequence: 1,
            delivered_through: 0,
            dropped: 0,
        }
    }

    /// Validates and publishes an event, returning its sequence number.
    ///
    /// Returns `None` when the event is malformed; it is counted and logged
    /// but never queued.
    pub fn publish(&mut self, topic: Topic, event: TableEvent) -> Option<u64> {
        if let Err(e) = event.validate() {
            warn!("Dropping malformed {:?} event: {}", event.kind(), e);
            self.dropped += 1;
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        debug!("Published #{} {:?}", sequence, event);
        self.enqueue(sequence, event.clone());
        self.outbox.push(Envelope {
            sequence,
            topic,
            event,
        });
        Some(sequence)
    }

    /// Queues an envelope that arrived from a remote publisher
    pub fn receive(&mut self, envelope: Envelope) -> bool {
        if let Err(e) = envelope.event.validate() {
            warn!(
                "Dropping malformed remote {:?} event #{}: {}",
                envelope.event.kind(),
                envelope.sequence,
                e
            );
            self.dropped += 1;
            return false;
        }
        self.enqueue(envelope.sequence, envelope.event);
        true
    }

    fn enqueue(&mut self, sequence: u64, event: TableEvent) {
        self.queues
            .entry(event.kind())
            .or_default()
            .push_back((sequence, event));
    }

    /// Takes every pending event of one type, oldest first
    pub fn drain(&mut self, kind: EventKind) -> Vec<TableEvent> {
        self.queues
            .get_mut(&kind)
            .map(|queue| queue.drain(..).map(|(_, event)| event).collect())
            .unwrap_or_default()
    }

    /// Takes every pending event of every type in publish order.
    ///
    /// Events of different types do not commute in the store (a mode change
    /// clears the ball, a later spawn sets it); stores are fed through here.
    pub fn drain_all(&mut self) -> Vec<TableEvent> {
        let mut pending: Vec<(u64, TableEvent)> = self
            .queues
            .values_mut()
            .flat_map(|queue| queue.drain(..))
            .collect();
        pending.sort_by_key(|(sequence, _)| *sequence);
        pending.into_iter().map(|(_, event)| event).collect()
    }

    pub fn pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    /// Records that every event published so far has reached the local store
    pub fn mark_delivered(&mut self) {
        self.delivered_through = self.last_sequence();
    }

    pub fn delivered_through(&self) -> u64 {
        self.delivered_through
    }

    pub fn last_sequence(&self) -> u64 {
        self.next_sequence.saturating_sub(1)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Receiver-side ordering for one publisher's envelope stream
#[derive(Debug)]
pub struct ReorderBuffer {
    next: u64,
    held: BTreeMap<u64, Envelope>,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self {
            next: 1,
            held: BTreeMap::new(),
        }
    }

    /// Starts over after a snapshot that already reflects `base` and earlier
    pub fn reset(&mut self, base: u64) {
        self.next = base + 1;
        self.held.retain(|sequence, _| *sequence > base);
    }

    /// Highest sequence released so far
    pub fn acknowledged(&self) -> u64 {
        self.next - 1
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Accepts one envelope and releases everything that is now contiguous
    pub fn accept(&mut self, envelope: Envelope) -> Vec<Envelope> {
        if envelope.sequence < self.next || self.held.contains_key(&envelope.sequence) {
            debug!("Ignoring duplicate envelope #{}", envelope.sequence);
            return Vec::new();
        }
        self.held.insert(envelope.sequence, envelope);

        let mut released = Vec::new();
        while let Some(envelope) = self.held.remove(&self.next) {
            released.push(envelope);
            self.next += 1;
        }
        released
    }
}
