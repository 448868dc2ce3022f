//! In-memory world used by the server binary and the tests
//!
//! Bodies form a parent/child hierarchy with local transforms. Contacts are
//! axis-aligned box overlaps in world space, and visible balls follow a
//! simple ballistic path under gravity. It stands in for a real physics
//! engine and scene graph, nothing more.

use glam::{Mat4, Quat, Vec3};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

use crate::world::{Contact, Pose, Role, World};
use shared::{EntityId, Handedness, PlayerId};

pub const GRAVITY: f32 = 9.81;

/// Distance from the table center to each goal
pub const GOAL_DISTANCE: f32 = 2.0;

/// Goal placement in table-local space, indexed by slot
pub const GOAL_DIRECTIONS: [Vec3; 4] = [Vec3::Z, Vec3::NEG_Z, Vec3::X, Vec3::NEG_X];

const LOBBY: Vec3 = Vec3::new(0.0, 0.9, -50.0);
const AUTHORED_BALLS: usize = 2;

#[derive(Debug, Clone)]
struct Body {
    role: Role,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    position: Vec3,
    rotation: Quat,
    /// World-space velocity, only integrated for balls
    velocity: Vec3,
    half_extents: Vec3,
    visible: bool,
    text: String,
}

impl Body {
    fn new(role: Role, parent: Option<EntityId>) -> Self {
        Self {
            role,
            parent,
            children: Vec::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            half_extents: half_extents_for(role),
            visible: true,
            text: String::new(),
        }
    }
}

fn half_extents_for(role: Role) -> Vec3 {
    match role {
        Role::Plate => Vec3::new(0.5, 0.05, 0.5),
        Role::Paddle { .. } => Vec3::new(0.15, 0.15, 0.03),
        Role::Ball => Vec3::splat(0.1),
        Role::Avatar { .. } => Vec3::new(0.25, 0.9, 0.25),
        Role::Floor => Vec3::new(3.0, 0.05, 3.0),
        Role::Table { .. } | Role::Goal { .. } | Role::ScoreDisplay => Vec3::ZERO,
    }
}

fn overlaps(a_center: Vec3, a_half: Vec3, b_center: Vec3, b_half: Vec3) -> bool {
    let a_min = a_center - a_half;
    let a_max = a_center + a_half;
    let b_min = b_center - b_half;
    let b_max = b_center + b_half;

    !(a_max.x <= b_min.x
        || a_min.x >= b_max.x
        || a_max.y <= b_min.y
        || a_min.y >= b_max.y
        || a_max.z <= b_min.z
        || a_min.z >= b_max.z)
}

#[derive(Debug)]
pub struct SimWorld {
    bodies: BTreeMap<EntityId, Body>,
    next_id: u64,
    avatars: HashMap<PlayerId, EntityId>,
    injected: HashMap<EntityId, Vec<Contact>>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self {
            bodies: BTreeMap::new(),
            next_id: 1,
            avatars: HashMap::new(),
            injected: HashMap::new(),
        }
    }

    /// A row of identical tables, eight units apart
    pub fn demo(tables: usize, slots: u8, max_damage: u32) -> Self {
        let mut world = Self::new();
        for index in 0..tables {
            let origin = Vec3::new(index as f32 * 8.0, 0.0, 0.0);
            world.author_table(origin, 0.0, slots, max_damage);
        }
        world
    }

    pub fn entity_count(&self) -> usize {
        self.bodies.len()
    }

    /// Lays out a complete table: goals with plate, paddle attachment points
    /// and score display, a pool of balls and a floor.
    pub fn author_table(&mut self, origin: Vec3, yaw: f32, slots: u8, max_damage: u32) -> EntityId {
        let table = self.spawn(Role::Table { slots, max_damage }, None);
        self.set_local(table, origin, Quat::from_rotation_y(yaw));

        for slot in 0..slots.min(GOAL_DIRECTIONS.len() as u8) {
            let goal = self.spawn(Role::Goal { slot }, Some(table));
            self.set_local(
                goal,
                GOAL_DIRECTIONS[slot as usize] * GOAL_DISTANCE,
                Quat::IDENTITY,
            );

            let plate = self.spawn(Role::Plate, Some(goal));
            self.set_local(plate, Vec3::new(0.0, 0.05, 0.0), Quat::IDENTITY);

            for hand in Handedness::BOTH {
                let anchor = self.spawn(Role::Paddle { hand }, Some(goal));
                let x = match hand {
                    Handedness::Left => -0.4,
                    Handedness::Right => 0.4,
                };
                self.set_local(anchor, Vec3::new(x, 1.0, 0.0), Quat::IDENTITY);
                self.set_visible(anchor, false);
            }

            let display = self.spawn(Role::ScoreDisplay, Some(goal));
            self.set_local(display, Vec3::new(0.0, 2.0, 0.0), Quat::IDENTITY);
        }

        for _ in 0..AUTHORED_BALLS {
            let ball = self.spawn(Role::Ball, Some(table));
            self.set_local(ball, Vec3::new(0.0, -100.0, 0.0), Quat::IDENTITY);
            self.set_visible(ball, false);
        }

        let floor = self.spawn(Role::Floor, Some(table));
        self.set_local(floor, Vec3::new(0.0, -0.05, 0.0), Quat::IDENTITY);

        debug!("Authored table {} with {} slots", table, slots);
        table
    }

    fn set_local(&mut self, entity: EntityId, position: Vec3, rotation: Quat) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.position = position;
            body.rotation = rotation;
        }
    }

    fn parent_transform(&self, entity: EntityId) -> Mat4 {
        self.bodies
            .get(&entity)
            .and_then(|body| body.parent)
            .and_then(|parent| self.world_transform(parent))
            .unwrap_or(Mat4::IDENTITY)
    }

    pub fn spawn_avatar(&mut self, player: PlayerId) -> EntityId {
        if let Some(existing) = self.avatars.get(&player) {
            return *existing;
        }
        let avatar = self.spawn(Role::Avatar { player }, None);
        let offset = Vec3::new(player.0 as f32 * 1.5, 0.0, 0.0);
        self.set_local(avatar, LOBBY + offset, Quat::IDENTITY);
        self.avatars.insert(player, avatar);
        avatar
    }

    pub fn remove_avatar(&mut self, player: PlayerId) {
        if let Some(avatar) = self.avatars.remove(&player) {
            self.despawn(avatar);
        }
    }

    pub fn avatar_of(&self, player: PlayerId) -> Option<EntityId> {
        self.avatars.get(&player).copied()
    }

    /// Moves a player's avatar onto the plate of `slot`, or back to the
    /// lobby when `slot` is `None`. Returns false when the target is unknown.
    pub fn walk_avatar_to(&mut self, player: PlayerId, table: EntityId, slot: Option<u8>) -> bool {
        let Some(avatar) = self.avatars.get(&player).copied() else {
            return false;
        };

        let target = match slot {
            None => LOBBY + Vec3::new(player.0 as f32 * 1.5, 0.0, 0.0),
            Some(slot) => match self.plate_of(table, slot) {
                Some(plate) => match self.world_position(plate) {
                    Some(position) => position + Vec3::new(0.0, 0.9, 0.0),
                    None => return false,
                },
                None => {
                    warn!("Table {} has no plate for slot {}", table, slot);
                    return false;
                }
            },
        };

        let facing = self
            .world_transform(table)
            .map(|m| m.to_scale_rotation_translation().1)
            .unwrap_or(Quat::IDENTITY);
        self.set_local(avatar, target, facing);
        true
    }

    fn plate_of(&self, table: EntityId, slot: u8) -> Option<EntityId> {
        let goal = self
            .children(table)
            .into_iter()
            .find(|child| self.role(*child) == Some(Role::Goal { slot }))?;
        self.children(goal)
            .into_iter()
            .find(|child| self.role(*child) == Some(Role::Plate))
    }

    /// Adds a contact that `collision_pairs` reports until cleared
    pub fn inject_contact(&mut self, entity: EntityId, other: EntityId) {
        let point = self.world_position(entity).unwrap_or(Vec3::ZERO);
        self.injected
            .entry(entity)
            .or_default()
            .push(Contact { other, point });
    }

    pub fn clear_contacts(&mut self) {
        self.injected.clear();
    }

    pub fn display_text(&self, entity: EntityId) -> Option<&str> {
        self.bodies.get(&entity).map(|body| body.text.as_str())
    }

    pub fn velocity(&self, entity: EntityId) -> Option<Vec3> {
        self.bodies.get(&entity).map(|body| body.velocity)
    }

    /// Integrates every visible ball over `dt` seconds
    pub fn step(&mut self, dt: f32) {
        let balls: Vec<EntityId> = self
            .bodies
            .iter()
            .filter(|(_, body)| body.role == Role::Ball && body.visible)
            .map(|(id, _)| *id)
            .collect();

        for ball in balls {
            let Some(world) = self.world_position(ball) else {
                continue;
            };
            let parent_inverse = self.parent_transform(ball).inverse();
            if let Some(body) = self.bodies.get_mut(&ball) {
                body.velocity.y -= GRAVITY * dt;
                let next = world + body.velocity * dt;
                body.position = parent_inverse.transform_point3(next);
            }
        }
    }
}

impl World for SimWorld {
    fn exists(&self, entity: EntityId) -> bool {
        self.bodies.contains_key(&entity)
    }

    fn role(&self, entity: EntityId) -> Option<Role> {
        self.bodies.get(&entity).map(|body| body.role)
    }

    fn children(&self, entity: EntityId) -> Vec<EntityId> {
        self.bodies
            .get(&entity)
            .map(|body| body.children.clone())
            .unwrap_or_default()
    }

    fn tables(&self) -> Vec<EntityId> {
        self.bodies
            .iter()
            .filter(|(_, body)| matches!(body.role, Role::Table { .. }))
            .map(|(id, _)| *id)
            .collect()
    }

    fn spawn(&mut self, role: Role, parent: Option<EntityId>) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;

        let parent = parent.filter(|p| self.bodies.contains_key(p));
        if let Some(parent) = parent.and_then(|p| self.bodies.get_mut(&p)) {
            parent.children.push(id);
        }
        self.bodies.insert(id, Body::new(role, parent));
        id
    }

    fn despawn(&mut self, entity: EntityId) {
        let Some(body) = self.bodies.remove(&entity) else {
            return;
        };
        if let Some(parent) = body.parent.and_then(|p| self.bodies.get_mut(&p)) {
            parent.children.retain(|child| *child != entity);
        }
        self.injected.remove(&entity);
        for child in body.children {
            self.despawn(child);
        }
    }

    fn world_transform(&self, entity: EntityId) -> Option<Mat4> {
        let body = self.bodies.get(&entity)?;
        let local = Mat4::from_rotation_translation(body.rotation, body.position);
        match body.parent {
            Some(parent) => Some(self.world_transform(parent)? * local),
            None => Some(local),
        }
    }

    fn collision_pairs(&self, entity: EntityId) -> Vec<Contact> {
        let mut contacts = self.injected.get(&entity).cloned().unwrap_or_default();

        let Some(body) = self.bodies.get(&entity) else {
            return contacts;
        };
        if !body.visible || body.half_extents == Vec3::ZERO {
            return contacts;
        }
        let Some(center) = self.world_position(entity) else {
            return contacts;
        };

        for (other_id, other) in self.bodies.iter() {
            if *other_id == entity || !other.visible || other.half_extents == Vec3::ZERO {
                continue;
            }
            let Some(other_center) = self.world_position(*other_id) else {
                continue;
            };
            if overlaps(center, body.half_extents, other_center, other.half_extents) {
                contacts.push(Contact {
                    other: *other_id,
                    point: (center + other_center) * 0.5,
                });
            }
        }
        contacts
    }

    fn set_position(&mut self, entity: EntityId, position: Vec3) {
        let parent_inverse = self.parent_transform(entity).inverse();
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.position = parent_inverse.transform_point3(position);
            body.velocity = Vec3::ZERO;
        }
    }

    fn set_rotation(&mut self, entity: EntityId, rotation: Quat) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.rotation = rotation;
        }
    }

    fn apply_impulse(&mut self, entity: EntityId, impulse: Vec3) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.velocity += impulse;
        }
    }

    fn set_visible(&mut self, entity: EntityId, visible: bool) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.visible = visible;
        }
    }

    fn is_visible(&self, entity: EntityId) -> bool {
        self.bodies.get(&entity).map_or(false, |body| body.visible)
    }

    fn body_pose(&self, player: PlayerId) -> Option<Pose> {
        let avatar = self.avatars.get(&player)?;
        let (_, rotation, position) = self.world_transform(*avatar)?.to_scale_rotation_translation();
        Some(Pose { position, rotation })
    }

    fn set_display_text(&mut self, entity: EntityId, text: &str) {
        if let Some(body) = self.bodies.get_mut(&entity) {
            if body.text != text {
                body.text = text.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f32::consts::FRAC_PI_2;

    fn child_with_role(world: &SimWorld, parent: EntityId, role: Role) -> Option<EntityId> {
        world
            .children(parent)
            .into_iter()
            .find(|c| world.role(*c) == Some(role))
    }

    #[test]
    fn test_demo_world_has_every_table() {
        let world = SimWorld::demo(3, 4, 5);
        let tables = world.tables();
        assert_eq!(tables.len(), 3);
        for table in tables {
            assert_eq!(
                world.role(table),
                Some(Role::Table {
                    slots: 4,
                    max_damage: 5
                })
            );
        }
    }

    #[test]
    fn test_author_table_hierarchy() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 4, 9);

        assert_eq!(world.tables(), vec![table]);
        let children = world.children(table);
        let goals = children
            .iter()
            .filter(|c| matches!(world.role(**c), Some(Role::Goal { .. })))
            .count();
        let balls = children
            .iter()
            .filter(|c| world.role(**c) == Some(Role::Ball))
            .count();
        assert_eq!(goals, 4);
        assert_eq!(balls, AUTHORED_BALLS);
        assert!(child_with_role(&world, table, Role::Floor).is_some());

        let goal = child_with_role(&world, table, Role::Goal { slot: 2 }).unwrap();
        assert!(child_with_role(&world, goal, Role::Plate).is_some());
        assert!(child_with_role(&world, goal, Role::ScoreDisplay).is_some());
        assert!(child_with_role(
            &world,
            goal,
            Role::Paddle {
                hand: Handedness::Right
            }
        )
        .is_some());
    }

    #[test]
    fn test_local_position_undoes_table_transform() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::new(10.0, 1.0, -4.0), FRAC_PI_2, 2, 9);
        let goal = child_with_role(&world, table, Role::Goal { slot: 0 }).unwrap();

        let global = world.world_position(goal).unwrap();
        assert_approx_eq!(global.x, 12.0, 1e-4);
        assert_approx_eq!(global.z, -4.0, 1e-4);

        let local = world.local_position(table, goal).unwrap();
        assert_approx_eq!(local.x, 0.0, 1e-4);
        assert_approx_eq!(local.y, 0.0, 1e-4);
        assert_approx_eq!(local.z, GOAL_DISTANCE, 1e-4);
    }

    #[test]
    fn test_ball_falls_under_gravity() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let ball = world.spawn(Role::Ball, Some(table));
        world.set_position(ball, Vec3::new(0.0, 2.0, 0.0));
        world.apply_impulse(ball, Vec3::new(1.0, 0.0, 0.0));

        for _ in 0..10 {
            world.step(0.05);
        }

        let position = world.world_position(ball).unwrap();
        assert!(position.y < 2.0);
        assert_approx_eq!(position.x, 0.5, 1e-4);
    }

    #[test]
    fn test_set_position_discards_velocity() {
        let mut world = SimWorld::new();
        let ball = world.spawn(Role::Ball, None);
        world.apply_impulse(ball, Vec3::new(0.0, 5.0, 0.0));
        world.set_position(ball, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(world.velocity(ball), Some(Vec3::ZERO));
    }

    #[test]
    fn test_hidden_ball_does_not_move_or_collide() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let ball = world.spawn(Role::Ball, Some(table));
        world.set_position(ball, Vec3::new(0.0, 0.0, 0.0));
        world.set_visible(ball, false);

        world.step(1.0);
        assert_eq!(world.world_position(ball), Some(Vec3::ZERO));
        assert!(world.collision_pairs(ball).is_empty());
    }

    #[test]
    fn test_avatar_on_plate_touches_it() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let player = PlayerId(1);
        let avatar = world.spawn_avatar(player);
        let plate = world.plate_of(table, 1).unwrap();

        assert!(!world
            .collision_pairs(plate)
            .iter()
            .any(|c| c.other == avatar));

        assert!(world.walk_avatar_to(player, table, Some(1)));
        assert!(world
            .collision_pairs(plate)
            .iter()
            .any(|c| c.other == avatar));
        assert!(world.is_avatar(avatar));
        assert_eq!(world.player_of(avatar), Some(player));

        assert!(world.walk_avatar_to(player, table, None));
        assert!(!world
            .collision_pairs(plate)
            .iter()
            .any(|c| c.other == avatar));
    }

    #[test]
    fn test_walk_to_unknown_slot() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        world.spawn_avatar(PlayerId(1));
        assert!(!world.walk_avatar_to(PlayerId(1), table, Some(3)));
        assert!(!world.walk_avatar_to(PlayerId(2), table, Some(0)));
    }

    #[test]
    fn test_despawn_removes_subtree() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        world.spawn_avatar(PlayerId(1));
        world.despawn(table);
        assert!(world.tables().is_empty());
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_injected_contacts() {
        let mut world = SimWorld::new();
        let a = world.spawn(Role::Ball, None);
        let b = world.spawn(Role::Plate, None);
        world.set_position(b, Vec3::new(100.0, 0.0, 0.0));

        world.inject_contact(a, b);
        assert_eq!(world.collision_pairs(a)[0].other, b);
        world.clear_contacts();
        assert!(world.collision_pairs(a).is_empty());
    }

    #[test]
    fn test_display_text() {
        let mut world = SimWorld::new();
        let display = world.spawn(Role::ScoreDisplay, None);
        world.set_display_text(display, "7");
        assert_eq!(world.display_text(display), Some("7"));
    }
}
