use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

use crate::config::GameConfig;
use crate::paddles::{grant_authority, PoseOutcome};
use crate::session::TableRuntime;
use crate::world::{Pose, Role, World};
use shared::netlog::{self, NetLog};
use shared::{
    Applied, EntityId, Envelope, EventBus, PlayerId, SessionStore, TableEvent, TableId,
    Topic, MAX_SLOTS,
};

/// Authoritative state of every table on the server
#[derive(Debug)]
pub struct GameState {
    pub tick: u32,
    pub now_ms: u64,
    pub store: SessionStore,
    pub bus: EventBus,
    runtimes: BTreeMap<TableId, TableRuntime>,
    config: GameConfig,
    rng: StdRng,
    netlog: NetLog,
}

impl GameState {
    pub fn new(config: GameConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic ball launches for a given seed
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, rng: StdRng) -> Self {
        Self {
            tick: 0,
            now_ms: 0,
            store: SessionStore::new(),
            bus: EventBus::new(),
            runtimes: BTreeMap::new(),
            config,
            rng,
            netlog: NetLog::new("server"),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn runtime(&self, table_id: TableId) -> Option<&TableRuntime> {
        self.runtimes.get(&table_id)
    }

    pub fn tick(&mut self, world: &mut dyn World, dt_ms: u64) {
        self.tick = self.tick.wrapping_add(1);
        self.now_ms += dt_ms;

        self.apply_pending();
        self.store.advance(dt_ms as i64);
        self.sync_tables(world);

        for runtime in self.runtimes.values_mut() {
            runtime.tick(&self.store, world, &mut self.bus, &mut self.rng, self.now_ms);
        }
    }

    /// Applies everything published since the last tick in publish order
    fn apply_pending(&mut self) {
        let mut grants = Vec::new();
        let mut notes = Vec::new();

        for event in self.bus.drain_all() {
            let applied = self.store.apply(&event);
            match &event {
                TableEvent::AuthorityRequest {
                    paddle_id,
                    requester,
                } if applied == Applied::Changed => grants.push((*paddle_id, *requester)),
                TableEvent::ModeChange { table_id, mode } if applied == Applied::Changed => {
                    notes.push(format!("table {} is now {}", table_id, mode))
                }
                TableEvent::Log { .. } => netlog::echo(&event),
                _ => {}
            }
        }
        self.bus.mark_delivered();

        for (paddle, requester) in grants {
            grant_authority(&self.store, paddle, requester, &mut self.bus);
        }
        for note in notes {
            self.log(note);
        }
    }

    /// Starts tables that appeared in the world and ends those that are gone
    fn sync_tables(&mut self, world: &mut dyn World) {
        let present = world.tables();

        for table_id in present.iter() {
            if self.runtimes.contains_key(table_id) {
                continue;
            }
            let Some(Role::Table { slots, max_damage }) = world.role(*table_id) else {
                continue;
            };
            let clamped = slots.clamp(1, MAX_SLOTS as u8);
            if clamped != slots {
                warn!("Table {} declares {} slots, using {}", table_id, slots, clamped);
            }
            let max_damage = max_damage.max(1);

            info!("Discovered table {}", table_id);
            self.runtimes.insert(
                *table_id,
                TableRuntime::new(*table_id, clamped, &self.config),
            );
            self.bus.publish(
                Topic::World,
                TableEvent::StartGame {
                    table_id: *table_id,
                    slots: clamped,
                    max_damage,
                },
            );
            self.log(format!("table {} opened", table_id));
        }

        let gone: Vec<TableId> = self
            .runtimes
            .keys()
            .filter(|id| !present.contains(*id))
            .copied()
            .collect();
        for table_id in gone {
            if let Some(mut runtime) = self.runtimes.remove(&table_id) {
                runtime.teardown(world, &mut self.bus);
            }
            info!("Table {} left the world", table_id);
            self.bus
                .publish(Topic::World, TableEvent::EndGame { table_id });
            self.log(format!("table {} closed", table_id));
        }
    }

    /// Accepts an event published by a client.
    ///
    /// Clients may only ask for authority on their own behalf and share log
    /// lines; everything else is the server's to decide.
    pub fn publish_remote(&mut self, sender: PlayerId, event: TableEvent) -> bool {
        match event {
            TableEvent::AuthorityRequest {
                paddle_id,
                requester,
            } if requester == sender => self
                .bus
                .publish(
                    Topic::World,
                    TableEvent::AuthorityRequest {
                        paddle_id,
                        requester,
                    },
                )
                .is_some(),
            TableEvent::Log { message, .. } => self
                .bus
                .publish(
                    Topic::World,
                    TableEvent::Log {
                        origin: sender.to_string(),
                        message,
                    },
                )
                .is_some(),
            other => {
                warn!("Refusing {:?} from {}", other.kind(), sender);
                false
            }
        }
    }

    pub fn submit_paddle_pose(
        &mut self,
        world: &mut dyn World,
        sender: PlayerId,
        paddle: EntityId,
        pose: Pose,
    ) -> PoseOutcome {
        let Some(table_id) = self.store.paddle(paddle).map(|r| r.table_id) else {
            return PoseOutcome::Rejected;
        };
        match self.runtimes.get_mut(&table_id) {
            Some(runtime) => runtime
                .paddles
                .submit_pose(&self.store, world, sender, paddle, pose),
            None => PoseOutcome::Rejected,
        }
    }

    /// Publishes a line on the shared log channel
    pub fn log(&mut self, message: impl Into<String>) {
        if let Some(event) = self.netlog.line(message) {
            self.bus.publish(Topic::World, event);
        }
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        self.bus.take_outbox()
    }

    /// State for a late joiner: the sequence it reflects and the events
    /// that rebuild it
    pub fn snapshot(&self) -> (u64, Vec<TableEvent>) {
        (self.bus.delivered_through(), self.store.snapshot_events())
    }
}
