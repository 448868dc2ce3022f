use log::{debug, info};
use shared::netlog::{self, NetLog};
use shared::{
    Applied, Authority, EntityId, Envelope, EventBus, PlayerId, ReorderBuffer, SessionStore,
    TableEvent,
};
use std::collections::HashMap;

/// Ticks to wait before asking again for a paddle that is still server driven
pub const REQUEST_RETRY_TICKS: u64 = 40;

/// Mirror of the server's tables, rebuilt purely from received events
pub struct ClientGameState {
    pub store: SessionStore,
    pub bus: EventBus,
    reorder: ReorderBuffer,
    applied_through: u64,
    synced: bool,
    tick: u64,
    /// Paddle -> tick of the last authority request
    requested: HashMap<EntityId, u64>,
    netlog: NetLog,
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientGameState {
    pub fn new() -> Self {
        Self {
            store: SessionStore::new(),
            bus: EventBus::new(),
            reorder: ReorderBuffer::new(),
            applied_through: 0,
            synced: false,
            tick: 0,
            requested: HashMap::new(),
            netlog: NetLog::new("client"),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Highest server sequence whose effects are in the local store
    pub fn applied_through(&self) -> u64 {
        self.applied_through
    }

    pub fn held(&self) -> usize {
        self.reorder.held()
    }

    pub fn set_origin(&mut self, player: PlayerId) {
        self.netlog = NetLog::new(player.to_string());
    }

    /// Replaces the mirror with a snapshot reflecting everything up to `base`
    pub fn apply_snapshot(&mut self, base: u64, events: Vec<TableEvent>) {
        let mut store = SessionStore::new();
        for event in &events {
            if store.apply(event) == Applied::Stale {
                debug!("Snapshot event {:?} did not apply", event.kind());
            }
        }
        self.store = store;
        self.bus = EventBus::new();
        self.reorder.reset(base);
        self.applied_through = base;
        self.requested.clear();
        self.synced = true;
        info!(
            "Snapshot at #{} with {} table(s)",
            base,
            self.store.tables().len()
        );
    }

    /// Queues envelopes that are now contiguous; returns how many were released
    pub fn accept_envelopes(&mut self, envelopes: Vec<Envelope>) -> usize {
        if !self.synced {
            debug!("Ignoring {} envelopes before the first snapshot", envelopes.len());
            return 0;
        }

        let mut released = 0;
        for envelope in envelopes {
            for ready in self.reorder.accept(envelope) {
                self.bus.receive(ready);
                released += 1;
            }
        }
        released
    }

    /// Applies queued events in publish order and returns how many changed
    /// the mirror
    pub fn apply_pending(&mut self) -> usize {
        self.tick += 1;
        let mut changed = 0;
        for event in self.bus.drain_all() {
            if let TableEvent::Log { .. } = event {
                netlog::echo(&event);
            }
            if self.store.apply(&event) == Applied::Changed {
                changed += 1;
            }
        }
        self.applied_through = self.reorder.acknowledged();
        changed
    }

    /// Authority requests for paddles owned by `me` that the server still
    /// drives. Each paddle is asked for once, and again only after
    /// [`REQUEST_RETRY_TICKS`] without an answer.
    pub fn authority_requests(&mut self, me: PlayerId) -> Vec<TableEvent> {
        let store = &self.store;
        self.requested
            .retain(|paddle, _| store.paddle(*paddle).is_some_and(|r| r.owner == me));

        let mut requests = Vec::new();
        for table_id in self.store.tables() {
            for (paddle_id, record) in self.store.paddles_for(table_id) {
                if record.owner != me || record.authority != Authority::Server {
                    continue;
                }
                let due = self
                    .requested
                    .get(&paddle_id)
                    .map_or(true, |asked| self.tick >= asked + REQUEST_RETRY_TICKS);
                if !due {
                    continue;
                }
                let event = TableEvent::AuthorityRequest {
                    paddle_id,
                    requester: me,
                };
                if event.validate().is_ok() {
                    self.requested.insert(paddle_id, self.tick);
                    requests.push(event);
                }
            }
        }
        requests
    }

    /// A log line for the shared channel, unless it repeats the last one
    pub fn log_line(&mut self, message: impl Into<String>) -> Option<TableEvent> {
        self.netlog.line(message)
    }

    pub fn owned_paddles(&self, me: PlayerId) -> Vec<EntityId> {
        self.store
            .tables()
            .into_iter()
            .flat_map(|table| {
                self.store
                    .paddles_for(table)
                    .into_iter()
                    .filter(|(_, record)| record.owner == me)
                    .map(|(id, _)| id)
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
