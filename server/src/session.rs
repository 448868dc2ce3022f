//! Round state machine and the per-table authoritative runtime

use log::{debug, info};
use rand::Rng;

use crate::balls::BallLifecycle;
use crate::binder::TableBindings;
use crate::config::GameConfig;
use crate::paddles::PaddleBinder;
use crate::presence::PlateSensor;
use crate::scoring::{self, Resolution};
use crate::world::World;
use shared::{
    EventBus, InstanceState, Mode, SessionStore, TableEvent, TableId, Topic, MAX_SLOTS,
};

/// Next mode for a table, or `None` to stay put.
///
/// Defined for every combination of inputs.
pub fn evaluate(mode: Mode, occupied: usize, round_over: bool) -> Option<Mode> {
    match mode {
        Mode::Stopped if occupied > 0 => Some(Mode::Starting),
        Mode::Stopped => None,
        Mode::Starting if occupied == 0 => Some(Mode::Stopped),
        Mode::Starting => Some(Mode::Playing),
        Mode::Playing if occupied == 0 => Some(Mode::Stopped),
        Mode::Playing if round_over => Some(Mode::Completed),
        Mode::Playing => None,
        Mode::Completed if occupied == 0 => Some(Mode::Stopped),
        Mode::Completed => None,
    }
}

/// Everything the server tracks for one table beyond the replicated state
#[derive(Debug)]
pub struct TableRuntime {
    pub table_id: TableId,
    pub slots: u8,
    pub bindings: TableBindings,
    pub sensor: PlateSensor,
    pub balls: BallLifecycle,
    pub paddles: PaddleBinder,
    config: GameConfig,
    /// Transition published but not yet seen in the store
    pending_mode: Option<Mode>,
    shown_scores: [Option<u32>; MAX_SLOTS],
}

impl TableRuntime {
    pub fn new(table_id: TableId, slots: u8, config: &GameConfig) -> Self {
        Self {
            table_id,
            slots,
            bindings: TableBindings::new(table_id),
            sensor: PlateSensor::new(config.occupancy_grace_ms),
            balls: BallLifecycle::new(config.clone()),
            paddles: PaddleBinder::new(),
            config: config.clone(),
            pending_mode: None,
            shown_scores: [None; MAX_SLOTS],
        }
    }

    pub fn pending_mode(&self) -> Option<Mode> {
        self.pending_mode
    }

    /// Runs one tick for this table.
    ///
    /// A table whose goals and plates are not all bound yet does nothing.
    pub fn tick(
        &mut self,
        store: &SessionStore,
        world: &mut dyn World,
        bus: &mut EventBus,
        rng: &mut impl Rng,
        now_ms: u64,
    ) {
        let Some(instance) = store.instance(self.table_id) else {
            return;
        };

        self.bindings.prune(world);
        self.bindings.bind(world, self.slots);
        if !self.bindings.is_ready(self.slots) {
            return;
        }
        self.balls.adopt(&self.bindings, world, now_ms);

        for (slot, player) in self.sensor.sense(&self.bindings, world, self.slots, now_ms) {
            bus.publish(
                Topic::World,
                TableEvent::PlayerChange {
                    table_id: self.table_id,
                    slot,
                    player,
                },
            );
        }

        self.paddles.reconcile(instance, &self.bindings, world, bus);
        self.paddles.follow_owners(store, world);
        self.paddles.flush_granted(store, world);

        self.drive(instance, world, bus, rng, now_ms);
        self.show_scores(instance, world);
    }

    fn drive(
        &mut self,
        instance: &InstanceState,
        world: &mut dyn World,
        bus: &mut EventBus,
        rng: &mut impl Rng,
        now_ms: u64,
    ) {
        if let Some(pending) = self.pending_mode {
            if instance.mode != pending {
                debug!("Table {} waiting for mode {}", self.table_id, pending);
                return;
            }
            self.pending_mode = None;
        }

        let mode = instance.mode;
        let mut next = evaluate(mode, instance.occupied_count(), instance.is_round_over());

        if mode == Mode::Playing && next.is_none() {
            let resolution = self.play(instance, world, bus, rng, now_ms);
            if resolution.round_over {
                next = Some(Mode::Completed);
            }
        }

        let Some(next) = next else {
            return;
        };
        match (mode, next) {
            (Mode::Starting, Mode::Playing) => self.reset(instance, world, bus),
            (Mode::Playing, _) => self.leave_play(instance, world, bus),
            _ => {}
        }

        info!("Table {} {} -> {}", self.table_id, mode, next);
        bus.publish(Topic::World, TableEvent::mode_change(self.table_id, next));
        self.pending_mode = Some(next);
    }

    fn play(
        &mut self,
        instance: &InstanceState,
        world: &mut dyn World,
        bus: &mut EventBus,
        rng: &mut impl Rng,
        now_ms: u64,
    ) -> Resolution {
        self.balls
            .maybe_spawn(instance, &self.bindings, world, bus, rng, now_ms);
        self.balls
            .volley(instance, &self.bindings, world, rng, now_ms);
        scoring::resolve(
            instance,
            &self.bindings,
            &mut self.balls,
            world,
            bus,
            self.config.floor_threshold,
            now_ms,
        )
    }

    /// Clears the scoreboard and takes every ball out of play
    fn reset(&mut self, instance: &InstanceState, world: &mut dyn World, bus: &mut EventBus) {
        for slot in 0..instance.slot_count() {
            bus.publish(
                Topic::World,
                TableEvent::GoalDamage {
                    table_id: self.table_id,
                    slot: slot as u8,
                    damage: 0,
                },
            );
        }
        self.balls.park_all(world, self.table_id);
    }

    fn leave_play(&mut self, instance: &InstanceState, world: &mut dyn World, bus: &mut EventBus) {
        if let Some(ball) = instance.ball {
            if self.balls.record(ball).is_some() {
                bus.publish(
                    Topic::World,
                    TableEvent::DestroyBall {
                        table_id: self.table_id,
                        ball_id: ball,
                    },
                );
            }
        }
        self.balls.park_all(world, self.table_id);
    }

    fn show_scores(&mut self, instance: &InstanceState, world: &mut dyn World) {
        for slot in 0..instance.slot_count().min(MAX_SLOTS) {
            let Some(display) = self.bindings.goal(slot).and_then(|g| g.score_display) else {
                continue;
            };
            let score = instance.score(slot);
            if self.shown_scores[slot] != score {
                if let Some(score) = score {
                    world.set_display_text(display, &score.to_string());
                }
                self.shown_scores[slot] = score;
            }
        }
    }

    /// Removes everything the table put into the world
    pub fn teardown(&mut self, world: &mut dyn World, bus: &mut EventBus) {
        self.paddles.release_all(self.table_id, world, bus);
        self.balls.teardown(world);
        self.sensor.clear();
    }
}
