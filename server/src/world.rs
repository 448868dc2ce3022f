//! The narrow view of the scene the session engine depends on
//!
//! Physics, transforms, avatars and display surfaces all live outside this
//! crate. The engine only talks to them through [`World`], which keeps the
//! table logic testable against [`crate::sim_world::SimWorld`].

use glam::{Mat4, Quat, Vec3};
use shared::{EntityId, Handedness, PlayerId};

/// Role tag declared on an entity when the table is authored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Table { slots: u8, max_damage: u32 },
    Goal { slot: u8 },
    Plate,
    Paddle { hand: Handedness },
    ScoreDisplay,
    Ball,
    Avatar { player: PlayerId },
    Floor,
}

/// One entity currently touching another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub other: EntityId,
    pub point: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

pub trait World {
    fn exists(&self, entity: EntityId) -> bool;
    fn role(&self, entity: EntityId) -> Option<Role>;
    fn children(&self, entity: EntityId) -> Vec<EntityId>;
    /// Table roots currently active in the world
    fn tables(&self) -> Vec<EntityId>;
    fn spawn(&mut self, role: Role, parent: Option<EntityId>) -> EntityId;
    fn despawn(&mut self, entity: EntityId);

    fn world_transform(&self, entity: EntityId) -> Option<Mat4>;

    fn world_position(&self, entity: EntityId) -> Option<Vec3> {
        self.world_transform(entity)
            .map(|m| m.transform_point3(Vec3::ZERO))
    }

    /// Position of `entity` in the frame of `table`
    fn local_position(&self, table: EntityId, entity: EntityId) -> Option<Vec3> {
        let table = self.world_transform(table)?;
        let position = self.world_position(entity)?;
        Some(table.inverse().transform_point3(position))
    }

    fn collision_pairs(&self, entity: EntityId) -> Vec<Contact>;
    /// Teleports an entity; any velocity it had is discarded
    fn set_position(&mut self, entity: EntityId, position: Vec3);
    fn set_rotation(&mut self, entity: EntityId, rotation: Quat);
    fn apply_impulse(&mut self, entity: EntityId, impulse: Vec3);
    fn set_visible(&mut self, entity: EntityId, visible: bool);
    fn is_visible(&self, entity: EntityId) -> bool;

    fn is_avatar(&self, entity: EntityId) -> bool {
        matches!(self.role(entity), Some(Role::Avatar { .. }))
    }
    fn player_of(&self, entity: EntityId) -> Option<PlayerId> {
        match self.role(entity) {
            Some(Role::Avatar { player }) => Some(player),
            _ => None,
        }
    }
    fn body_pose(&self, player: PlayerId) -> Option<Pose>;

    fn set_display_text(&mut self, entity: EntityId, text: &str);
}
