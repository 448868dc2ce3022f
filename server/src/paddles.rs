//! Paddles that follow goal occupancy, and who may move them
//!
//! A player gets a left and a right paddle while they hold a goal. The
//! server drives both paddles from the player's body pose until the owning
//! client has asked for authority and the grant has gone through the store.

use glam::Vec3;
use log::{debug, info, warn};
use std::collections::HashMap;

use crate::binder::TableBindings;
use crate::world::{Pose, Role, World};
use shared::{
    Authority, EntityId, EventBus, Handedness, InstanceState, PlayerId, SessionStore, TableEvent,
    Topic, MAX_SLOTS,
};

/// Paddle offset from the owner's body, in the body's frame
fn hand_offset(hand: Handedness) -> Vec3 {
    match hand {
        Handedness::Left => Vec3::new(-0.35, 0.2, 0.3),
        Handedness::Right => Vec3::new(0.35, 0.2, 0.3),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BoundPlayer {
    player: PlayerId,
    paddles: [EntityId; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseOutcome {
    Applied,
    /// Held until the sender's authority request is granted
    Queued,
    Rejected,
}

#[derive(Debug, Default)]
pub struct PaddleBinder {
    bound: [Option<BoundPlayer>; MAX_SLOTS],
    queued: HashMap<EntityId, Pose>,
}

impl PaddleBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paddles_of(&self, slot: usize) -> Option<[EntityId; 2]> {
        self.bound
            .get(slot)
            .and_then(|b| b.as_ref())
            .map(|b| b.paddles)
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Spawns or destroys paddles so every occupied slot has a pair
    pub fn reconcile(
        &mut self,
        instance: &InstanceState,
        bindings: &TableBindings,
        world: &mut dyn World,
        bus: &mut EventBus,
    ) {
        for slot in 0..instance.slot_count().min(MAX_SLOTS) {
            let desired = instance.occupant(slot);
            let current = self.bound[slot].as_ref().map(|b| b.player);
            if desired == current {
                continue;
            }
            if current.is_some() {
                self.release(slot, bindings.table, world, bus);
            }
            if let Some(player) = desired {
                self.bind(slot, player, bindings, world, bus);
            }
        }
    }

    fn bind(
        &mut self,
        slot: usize,
        player: PlayerId,
        bindings: &TableBindings,
        world: &mut dyn World,
        bus: &mut EventBus,
    ) {
        let table_id = bindings.table;
        let mut paddles = [EntityId(0); 2];

        for hand in Handedness::BOTH {
            let paddle = world.spawn(Role::Paddle { hand }, Some(table_id));
            let pose = spawn_pose(world, bindings, slot, player, hand);
            if let Some(pose) = pose {
                world.set_position(paddle, pose.position);
                world.set_rotation(paddle, pose.rotation);
            }
            paddles[hand.index()] = paddle;

            bus.publish(
                Topic::World,
                TableEvent::SpawnPaddle {
                    table_id,
                    paddle_id: paddle,
                    slot: slot as u8,
                    owner: player,
                    handedness: hand,
                },
            );
        }

        info!(
            "{} joined table {} on slot {}, paddles {} and {}",
            player, table_id, slot, paddles[0], paddles[1]
        );
        self.bound[slot] = Some(BoundPlayer { player, paddles });
    }

    fn release(&mut self, slot: usize, table_id: EntityId, world: &mut dyn World, bus: &mut EventBus) {
        let Some(bound) = self.bound[slot].take() else {
            return;
        };
        for paddle in bound.paddles {
            self.queued.remove(&paddle);
            world.despawn(paddle);
            bus.publish(
                Topic::World,
                TableEvent::DestroyPaddle {
                    table_id,
                    paddle_id: paddle,
                },
            );
        }
        info!("{} left table {} slot {}", bound.player, table_id, slot);
    }

    /// Destroys every paddle of the table
    pub fn release_all(&mut self, table_id: EntityId, world: &mut dyn World, bus: &mut EventBus) {
        for slot in 0..MAX_SLOTS {
            self.release(slot, table_id, world, bus);
        }
        self.queued.clear();
    }

    /// Moves paddles nobody else drives yet along with their owner's body
    pub fn follow_owners(&self, store: &SessionStore, world: &mut dyn World) {
        for bound in self.bound.iter().flatten() {
            let Some(body) = world.body_pose(bound.player) else {
                continue;
            };
            for hand in Handedness::BOTH {
                let paddle = bound.paddles[hand.index()];
                let server_driven = store
                    .paddle(paddle)
                    .map_or(true, |r| !matches!(r.authority, Authority::Granted(_)));
                if server_driven {
                    let pose = offset_pose(body, hand);
                    world.set_position(paddle, pose.position);
                    world.set_rotation(paddle, pose.rotation);
                }
            }
        }
    }

    /// Routes a pose command from `sender` through the authority gate
    pub fn submit_pose(
        &mut self,
        store: &SessionStore,
        world: &mut dyn World,
        sender: PlayerId,
        paddle: EntityId,
        pose: Pose,
    ) -> PoseOutcome {
        let Some(record) = store.paddle(paddle) else {
            debug!("Pose for unknown paddle {} from {}", paddle, sender);
            return PoseOutcome::Rejected;
        };
        if record.owner != sender {
            warn!("{} tried to move paddle {} owned by {}", sender, paddle, record.owner);
            return PoseOutcome::Rejected;
        }
        match record.authority {
            Authority::Granted(holder) if holder == sender => {
                world.set_position(paddle, pose.position);
                world.set_rotation(paddle, pose.rotation);
                PoseOutcome::Applied
            }
            Authority::Pending(requester) if requester == sender => {
                self.queued.insert(paddle, pose);
                PoseOutcome::Queued
            }
            _ => PoseOutcome::Rejected,
        }
    }

    /// Applies queued poses whose grant has since reached the store
    pub fn flush_granted(&mut self, store: &SessionStore, world: &mut dyn World) -> usize {
        let mut flushed = 0;
        self.queued.retain(|paddle, pose| match store.paddle(*paddle) {
            Some(record) => match record.authority {
                Authority::Granted(_) => {
                    world.set_position(*paddle, pose.position);
                    world.set_rotation(*paddle, pose.rotation);
                    flushed += 1;
                    false
                }
                Authority::Pending(_) | Authority::Server => true,
            },
            None => false,
        });
        flushed
    }
}

/// Answers an authority request that has been applied to the store.
///
/// Only the owner of a paddle is ever granted authority over it.
pub fn grant_authority(
    store: &SessionStore,
    paddle: EntityId,
    requester: PlayerId,
    bus: &mut EventBus,
) -> bool {
    let Some(record) = store.paddle(paddle) else {
        return false;
    };
    if record.owner != requester || record.authority != Authority::Pending(requester) {
        return false;
    }
    info!("Granting {} authority over paddle {}", requester, paddle);
    bus.publish(
        Topic::World,
        TableEvent::AuthorityGranted {
            paddle_id: paddle,
            authority: requester,
        },
    )
    .is_some()
}

fn offset_pose(body: Pose, hand: Handedness) -> Pose {
    Pose {
        position: body.position + body.rotation * hand_offset(hand),
        rotation: body.rotation,
    }
}

fn spawn_pose(
    world: &dyn World,
    bindings: &TableBindings,
    slot: usize,
    player: PlayerId,
    hand: Handedness,
) -> Option<Pose> {
    if let Some(body) = world.body_pose(player) {
        return Some(offset_pose(body, hand));
    }
    let goal = bindings.goal(slot)?;
    let anchor = goal.anchor(hand).or(goal.goal)?;
    let transform = world.world_transform(anchor)?;
    let (_, rotation, position) = transform.to_scale_rotation_translation();
    Some(Pose { position, rotation })
}
