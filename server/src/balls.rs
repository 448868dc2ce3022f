//! Ball pool of one table: spawn, volley, recycle and despawn

use glam::{EulerRot, Quat, Vec3};
use log::{debug, info};
use rand::Rng;
use std::f32::consts::TAU;

use crate::binder::TableBindings;
use crate::config::GameConfig;
use crate::world::{Role, World};
use shared::{EntityId, EventBus, InstanceState, Mode, TableEvent, TableId, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallPhase {
    /// Hidden and parked below the table
    Pooled,
    Active,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BallRecord {
    pub id: EntityId,
    pub last_active_ms: u64,
    pub phase: BallPhase,
    /// Created at runtime rather than authored with the table
    pub spawned: bool,
}

#[derive(Debug)]
pub struct BallLifecycle {
    config: GameConfig,
    pool: Vec<BallRecord>,
    next_volley_ms: u64,
    volley_slot: usize,
    spawn_slot: usize,
}

impl BallLifecycle {
    pub fn new(config: GameConfig) -> Self {
        Self {
            next_volley_ms: config.volley_period_ms,
            config,
            pool: Vec::new(),
            volley_slot: 0,
            spawn_slot: 0,
        }
    }

    pub fn records(&self) -> &[BallRecord] {
        &self.pool
    }

    pub fn record(&self, ball: EntityId) -> Option<&BallRecord> {
        self.pool.iter().find(|r| r.id == ball)
    }

    pub fn in_play(&self) -> Vec<EntityId> {
        self.pool
            .iter()
            .filter(|r| r.phase == BallPhase::Active)
            .map(|r| r.id)
            .collect()
    }

    /// Takes over bound balls that are not yet in the pool
    pub fn adopt(&mut self, bindings: &TableBindings, world: &mut dyn World, now_ms: u64) {
        self.pool.retain(|r| world.exists(r.id));
        for ball in bindings.balls.iter() {
            if self.pool.iter().any(|r| r.id == *ball) {
                continue;
            }
            debug!("Table {} adopted ball {}", bindings.table, ball);
            self.pool.push(BallRecord {
                id: *ball,
                last_active_ms: now_ms,
                phase: BallPhase::Pooled,
                spawned: false,
            });
            park(world, bindings.table, *ball, self.config.park_position);
        }
    }

    /// Spawns the table's active ball once the cooldown has run out
    pub fn maybe_spawn(
        &mut self,
        instance: &InstanceState,
        bindings: &TableBindings,
        world: &mut dyn World,
        bus: &mut EventBus,
        rng: &mut impl Rng,
        now_ms: u64,
    ) -> Option<EntityId> {
        if instance.mode != Mode::Playing
            || instance.ball.is_some()
            || instance.ball_cooldown_ms > 0
            || self.pool.iter().any(|r| r.spawned && r.phase == BallPhase::Active)
        {
            return None;
        }

        let table = bindings.table;
        let center = world.world_transform(table)?;
        let target = next_occupied(instance, self.spawn_slot)?;
        self.spawn_slot = target;
        let goal = bindings
            .goal(target)
            .and_then(|g| g.goal)
            .and_then(|g| world.world_position(g))?;

        let ball = world.spawn(Role::Ball, Some(table));
        let position = center.transform_point3(Vec3::new(0.0, self.config.spawn_height, 0.0));
        world.set_position(ball, position);
        world.set_rotation(ball, random_orientation(rng));
        world.set_visible(ball, true);

        let magnitude = self.config.spawn_impulse * (1.0 + rng.gen::<f32>());
        world.apply_impulse(ball, (goal - position).normalize_or_zero() * magnitude);

        self.pool.push(BallRecord {
            id: ball,
            last_active_ms: now_ms,
            phase: BallPhase::Active,
            spawned: true,
        });
        info!("Table {} spawned ball {} toward slot {}", table, ball, target);
        bus.publish(
            Topic::World,
            TableEvent::SpawnBall {
                table_id: table,
                ball_id: ball,
            },
        );
        Some(ball)
    }

    /// Relaunches the longest idle ball toward the next occupied goal.
    ///
    /// Runs at most once per volley period.
    pub fn volley(
        &mut self,
        instance: &InstanceState,
        bindings: &TableBindings,
        world: &mut dyn World,
        rng: &mut impl Rng,
        now_ms: u64,
    ) -> Option<EntityId> {
        if now_ms < self.next_volley_ms {
            return None;
        }
        self.next_volley_ms = now_ms + self.config.volley_period_ms;

        let age = self.config.ball_age_ms;
        let index = self
            .pool
            .iter()
            .enumerate()
            .filter(|(_, r)| now_ms.saturating_sub(r.last_active_ms) > age)
            .min_by_key(|(_, r)| (r.last_active_ms, r.id))
            .map(|(i, _)| i)?;

        let target = next_occupied(instance, self.volley_slot)?;
        self.volley_slot = target;

        let table = bindings.table;
        let center = world.world_transform(table)?;
        let table_position = center.transform_point3(Vec3::ZERO);
        let goal = bindings
            .goal(target)
            .and_then(|g| g.goal)
            .and_then(|g| world.world_position(g))?;

        let record = &mut self.pool[index];
        let launch = center.transform_point3(Vec3::new(0.0, self.config.volley_height, 0.0));
        world.set_position(record.id, launch);
        world.set_visible(record.id, true);
        let magnitude = rng.gen::<f32>() + self.config.volley_base_impulse;
        world.apply_impulse(
            record.id,
            (goal - table_position).normalize_or_zero() * magnitude,
        );

        record.last_active_ms = now_ms;
        record.phase = BallPhase::Active;
        debug!("Table {} volleyed ball {} at slot {}", table, record.id, target);
        Some(record.id)
    }

    /// Marks a ball as still live
    pub fn refresh(&mut self, ball: EntityId, now_ms: u64) {
        if let Some(record) = self.pool.iter_mut().find(|r| r.id == ball) {
            record.last_active_ms = now_ms;
        }
    }

    /// Hides a ball and returns it to the pool
    pub fn recycle(&mut self, world: &mut dyn World, table: TableId, ball: EntityId) {
        if let Some(record) = self.pool.iter_mut().find(|r| r.id == ball) {
            record.phase = BallPhase::Pooled;
        }
        park(world, table, ball, self.config.park_position);
    }

    /// Removes a ball from play for good: runtime balls leave the world,
    /// authored balls go back to the pool.
    pub fn despawn(&mut self, world: &mut dyn World, table: TableId, ball: EntityId) {
        let spawned = self.record(ball).map_or(true, |r| r.spawned);
        if spawned {
            self.pool.retain(|r| r.id != ball);
            world.despawn(ball);
        } else {
            self.recycle(world, table, ball);
        }
    }

    /// Takes every ball out of play
    pub fn park_all(&mut self, world: &mut dyn World, table: TableId) {
        let balls: Vec<EntityId> = self.pool.iter().map(|r| r.id).collect();
        for ball in balls {
            self.despawn(world, table, ball);
        }
    }

    /// Removes runtime balls when the table goes away
    pub fn teardown(&mut self, world: &mut dyn World) {
        for record in self.pool.drain(..) {
            if record.spawned {
                world.despawn(record.id);
            }
        }
    }
}

fn park(world: &mut dyn World, table: TableId, ball: EntityId, park_position: Vec3) {
    world.set_visible(ball, false);
    if let Some(center) = world.world_transform(table) {
        world.set_position(ball, center.transform_point3(park_position));
    }
}

fn random_orientation(rng: &mut impl Rng) -> Quat {
    Quat::from_euler(
        EulerRot::XYZ,
        rng.gen_range(0.0..TAU),
        rng.gen_range(0.0..TAU),
        rng.gen_range(0.0..TAU),
    )
}

/// Next occupied slot after `last`, wrapping around
fn next_occupied(instance: &InstanceState, last: usize) -> Option<usize> {
    let slots = instance.slot_count();
    (1..=slots)
        .map(|step| (last + step) % slots)
        .find(|slot| instance.occupant(*slot).is_some())
}
