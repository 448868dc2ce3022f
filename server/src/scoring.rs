//! Goal hits and floor exits for the balls of one table

use glam::Vec3;
use log::{debug, info};

use crate::balls::BallLifecycle;
use crate::binder::TableBindings;
use crate::world::{Contact, Role, World};
use shared::{EntityId, EventBus, InstanceState, TableEvent, Topic};

/// Slot whose side of the table a table-local position lies on.
///
/// The table is sliced along its diagonals: slot 0 faces +z, slot 1 faces
/// -z, slot 2 faces +x and slot 3 faces -x.
pub fn quadrant(local: Vec3) -> u8 {
    let (x, z) = (local.x, local.z);
    if z > x.abs() {
        0
    } else if z < -x.abs() {
        1
    } else if x > z.abs() {
        2
    } else if x < -z.abs() {
        3
    } else {
        0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub round_over: bool,
    /// Slots whose guarded plate was hit this tick
    pub damaged: Vec<u8>,
    /// Slots that lost a point to a ball leaving through the floor
    pub floor_exits: Vec<u8>,
    /// Balls taken out of play this tick
    pub destroyed: Vec<EntityId>,
}

struct Resolver<'a> {
    instance: &'a InstanceState,
    bindings: &'a TableBindings,
    balls: &'a mut BallLifecycle,
    world: &'a mut dyn World,
    bus: &'a mut EventBus,
    damage: Vec<u32>,
    resolution: Resolution,
}

impl Resolver<'_> {
    /// Hides a ball right away; the active ball is also destroyed in the store
    fn retire(&mut self, ball: EntityId) {
        let table_id = self.bindings.table;
        if self.instance.ball == Some(ball) {
            self.bus.publish(
                Topic::World,
                TableEvent::DestroyBall {
                    table_id,
                    ball_id: ball,
                },
            );
            self.balls.despawn(self.world, table_id, ball);
        } else {
            self.balls.recycle(self.world, table_id, ball);
        }
        self.resolution.destroyed.push(ball);
    }

    /// Adds one point of damage to a goal and publishes the new total
    fn damage_goal(&mut self, slot: usize) -> u32 {
        let max = self.instance.max_damage;
        let damage = &mut self.damage[slot];
        *damage = (*damage + 1).min(max);
        let damage = *damage;
        self.bus.publish(
            Topic::World,
            TableEvent::GoalDamage {
                table_id: self.bindings.table,
                slot: slot as u8,
                damage,
            },
        );
        damage
    }

    fn plate_hit(&mut self, ball: EntityId, slot: usize) {
        if self.instance.occupant(slot).is_some() {
            let damage = self.damage_goal(slot);
            info!(
                "Ball {} hit goal {} on table {}, damage {}",
                ball, slot, self.bindings.table, damage
            );
            self.resolution.damaged.push(slot as u8);
        }
        self.retire(ball);
    }

    fn floor_exit(&mut self, ball: EntityId, local: Vec3) {
        let slot = quadrant(local) as usize;
        debug!("Ball {} left through the floor on slot {}", ball, slot);
        self.retire(ball);

        if self.instance.occupant(slot).is_none() {
            return;
        }
        self.damage_goal(slot);
        self.resolution.floor_exits.push(slot as u8);
    }

    fn other_contacts(&mut self, ball: EntityId, contacts: &[Contact], now_ms: u64) {
        for contact in contacts {
            if Some(contact.other) == self.bindings.floor {
                self.retire(ball);
                return;
            }

            let hit_player = self.world.is_avatar(contact.other)
                || matches!(self.world.role(contact.other), Some(Role::Paddle { .. }));
            if hit_player {
                self.balls.refresh(ball, now_ms);
            }
        }
    }
}

/// Resolves every ball of a playing table for this tick.
///
/// A plate contact wins over the floor height test, which wins over the
/// remaining contacts. Damage is accumulated from the stored values, so two
/// points on one goal in the same tick publish successive absolute values.
pub fn resolve(
    instance: &InstanceState,
    bindings: &TableBindings,
    balls: &mut BallLifecycle,
    world: &mut dyn World,
    bus: &mut EventBus,
    floor_threshold: f32,
    now_ms: u64,
) -> Resolution {
    let candidates = balls.in_play();
    let mut resolver = Resolver {
        instance,
        bindings,
        balls,
        world,
        bus,
        damage: instance.players.iter().map(|p| p.damage).collect(),
        resolution: Resolution::default(),
    };

    for ball in candidates {
        if !resolver.world.is_visible(ball) {
            continue;
        }
        let Some(local) = resolver.world.local_position(bindings.table, ball) else {
            continue;
        };
        let contacts = resolver.world.collision_pairs(ball);

        let plate = contacts.iter().find_map(|contact| {
            bindings
                .slot_for_plate(contact.other)
                .filter(|slot| *slot < instance.slot_count())
        });
        if let Some(slot) = plate {
            resolver.plate_hit(ball, slot);
        } else if local.y < floor_threshold {
            resolver.floor_exit(ball, local);
        } else {
            resolver.other_contacts(ball, &contacts, now_ms);
        }
    }

    let max = instance.max_damage;
    let mut resolution = resolver.resolution;
    resolution.round_over = resolver.damage.iter().any(|d| *d >= max);
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::sim_world::SimWorld;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use shared::{EventKind, Mode, PlayerId, SessionStore};

    const THRESHOLD: f32 = 0.2;

    struct Fixture {
        world: SimWorld,
        bindings: TableBindings,
        balls: BallLifecycle,
        bus: EventBus,
        instance: InstanceState,
    }

    fn fixture(slots: u8) -> Fixture {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, slots, 9);
        let mut bindings = TableBindings::new(table);
        bindings.bind(&world, slots);
        let mut balls = BallLifecycle::new(GameConfig::default());
        balls.adopt(&bindings, &mut world, 0);

        let mut instance = InstanceState::new(slots, 9);
        instance.mode = Mode::Playing;
        instance.ball_cooldown_ms = 0;
        instance.players[0].connected_player = Some(PlayerId(1));

        Fixture {
            world,
            bindings,
            balls,
            bus: EventBus::new(),
            instance,
        }
    }

    impl Fixture {
        fn spawn_active(&mut self) -> EntityId {
            let mut rng = StdRng::seed_from_u64(1);
            let ball = self
                .balls
                .maybe_spawn(
                    &self.instance,
                    &self.bindings,
                    &mut self.world,
                    &mut self.bus,
                    &mut rng,
                    0,
                )
                .unwrap();
            self.bus.drain(EventKind::SpawnBall);
            self.instance.ball = Some(ball);
            ball
        }

        fn plate(&self, slot: usize) -> EntityId {
            self.bindings.goal(slot).unwrap().plate.unwrap()
        }

        fn resolve(&mut self) -> Resolution {
            resolve(
                &self.instance,
                &self.bindings,
                &mut self.balls,
                &mut self.world,
                &mut self.bus,
                THRESHOLD,
                100,
            )
        }
    }

    #[test]
    fn test_quadrants() {
        assert_eq!(quadrant(Vec3::new(0.1, 0.0, 1.0)), 0);
        assert_eq!(quadrant(Vec3::new(-0.3, 0.0, -1.0)), 1);
        assert_eq!(quadrant(Vec3::new(2.0, 0.0, 0.5)), 2);
        assert_eq!(quadrant(Vec3::new(-2.0, 0.0, -0.5)), 3);
        assert_eq!(quadrant(Vec3::ZERO), 0);
    }

    #[test]
    fn test_hit_on_occupied_goal_dispatches_absolute_damage() {
        let mut f = fixture(2);
        f.instance.players[0].damage = 2;
        let ball = f.spawn_active();
        let plate = f.plate(0);
        f.world.inject_contact(ball, plate);

        let resolution = f.resolve();
        assert_eq!(resolution.damaged, vec![0]);
        assert!(!resolution.round_over);
        assert!(!f.world.exists(ball));

        assert_eq!(
            f.bus.drain(EventKind::GoalDamage),
            vec![TableEvent::GoalDamage {
                table_id: f.bindings.table,
                slot: 0,
                damage: 3
            }]
        );
        assert_eq!(f.bus.drain(EventKind::DestroyBall).len(), 1);
    }

    #[test]
    fn test_hit_on_empty_goal_only_recycles() {
        let mut f = fixture(2);
        f.balls
            .volley(
                &f.instance,
                &f.bindings,
                &mut f.world,
                &mut StdRng::seed_from_u64(3),
                5001,
            )
            .unwrap();
        let in_play = f.balls.in_play()[0];
        let plate = f.plate(1);
        f.world.inject_contact(in_play, plate);

        let resolution = f.resolve();
        assert!(resolution.damaged.is_empty());
        assert_eq!(resolution.destroyed, vec![in_play]);
        assert!(!f.world.is_visible(in_play));
        assert_eq!(f.bus.pending(), 0);
    }

    #[test]
    fn test_two_hits_same_tick_accumulate() {
        let mut f = fixture(2);
        let active = f.spawn_active();
        f.balls
            .volley(
                &f.instance,
                &f.bindings,
                &mut f.world,
                &mut StdRng::seed_from_u64(3),
                5001,
            )
            .unwrap();
        let plate = f.plate(0);
        for ball in f.balls.in_play() {
            f.world.inject_contact(ball, plate);
        }
        assert_eq!(f.balls.in_play().len(), 2);
        assert!(f.balls.in_play().contains(&active));

        f.resolve();
        let damages: Vec<TableEvent> = f.bus.drain(EventKind::GoalDamage);
        let values: Vec<u32> = damages
            .iter()
            .map(|e| match e {
                TableEvent::GoalDamage { damage, .. } => *damage,
                _ => 0,
            })
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_reaching_max_damage_ends_round() {
        let mut f = fixture(2);
        f.instance.players[0].damage = 8;
        let ball = f.spawn_active();
        let plate = f.plate(0);
        f.world.inject_contact(ball, plate);

        let resolution = f.resolve();
        assert!(resolution.round_over);
    }

    #[test]
    fn test_floor_exit_scores_against_quadrant() {
        let mut f = fixture(2);
        f.instance.players[0].damage = 4;
        let ball = f.spawn_active();
        f.world.set_position(ball, Vec3::new(0.2, 0.1, 1.0));

        let resolution = f.resolve();
        assert_eq!(resolution.floor_exits, vec![0]);
        assert!(resolution.damaged.is_empty());
        assert!(!f.world.exists(ball));
        assert_eq!(
            f.bus.drain(EventKind::GoalDamage),
            vec![TableEvent::GoalDamage {
                table_id: f.bindings.table,
                slot: 0,
                damage: 5
            }]
        );
        assert!(f.bus.drain(EventKind::PlayerScore).is_empty());
        assert_eq!(
            f.bus.drain(EventKind::DestroyBall),
            vec![TableEvent::DestroyBall {
                table_id: f.bindings.table,
                ball_id: ball
            }]
        );
    }

    #[test]
    fn test_floor_exit_into_empty_slot_does_not_score() {
        let mut f = fixture(2);
        let ball = f.spawn_active();
        // Quadrant 2 is not a slot on a two player table.
        f.world.set_position(ball, Vec3::new(1.5, 0.1, 0.0));

        let resolution = f.resolve();
        assert!(resolution.floor_exits.is_empty());
        assert_eq!(resolution.destroyed, vec![ball]);
        assert!(f.bus.drain(EventKind::GoalDamage).is_empty());
        assert_eq!(f.bus.drain(EventKind::DestroyBall).len(), 1);
    }

    #[test]
    fn test_floor_exit_and_plate_hit_same_tick_count_once_each() {
        let mut f = fixture(2);
        let active = f.spawn_active();
        let volleyed = f
            .balls
            .volley(
                &f.instance,
                &f.bindings,
                &mut f.world,
                &mut StdRng::seed_from_u64(3),
                5001,
            )
            .unwrap();
        f.world.set_position(volleyed, Vec3::new(0.2, 0.1, 1.0));
        let plate = f.plate(0);
        f.world.inject_contact(active, plate);

        let resolution = f.resolve();
        assert_eq!(resolution.floor_exits, vec![0]);
        assert_eq!(resolution.damaged, vec![0]);

        let mut store = SessionStore::new();
        store.apply(&TableEvent::StartGame {
            table_id: f.bindings.table,
            slots: 2,
            max_damage: 9,
        });
        for event in f.bus.drain_all() {
            store.apply(&event);
        }
        assert_eq!(store.instance(f.bindings.table).unwrap().damage(0), Some(2));
    }

    #[test]
    fn test_falling_ball_lands_on_guarded_plate() {
        let mut f = fixture(2);
        let ball = f.spawn_active();
        let plate = f.plate(0);
        let above = f.world.world_position(plate).unwrap() + Vec3::new(0.0, 1.0, 0.0);
        f.world.set_position(ball, above);

        let mut resolution = Resolution::default();
        for _ in 0..40 {
            f.world.step(0.05);
            resolution = f.resolve();
            if !resolution.destroyed.is_empty() {
                break;
            }
        }

        assert_eq!(resolution.damaged, vec![0]);
        assert!(resolution.floor_exits.is_empty());
        assert_eq!(resolution.destroyed, vec![ball]);
    }

    #[test]
    fn test_paddle_contact_refreshes_ball() {
        let mut f = fixture(2);
        let ball = f.spawn_active();
        let anchor = f
            .bindings
            .goal(0)
            .unwrap()
            .anchor(shared::Handedness::Left)
            .unwrap();
        f.world.inject_contact(ball, anchor);

        let resolution = f.resolve();
        assert!(resolution.destroyed.is_empty());
        assert_eq!(f.balls.record(ball).unwrap().last_active_ms, 100);
        assert!(f.world.is_visible(ball));
    }

    #[test]
    fn test_invisible_ball_is_ignored() {
        let mut f = fixture(2);
        let ball = f.spawn_active();
        f.world.set_visible(ball, false);
        f.world.set_position(ball, Vec3::new(0.0, -5.0, 1.0));

        let resolution = f.resolve();
        assert_eq!(resolution, Resolution::default());
    }
}
