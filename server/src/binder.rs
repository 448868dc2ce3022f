//! Resolves a table's goals, plates, paddle attachment points and balls
//!
//! Scene content can show up over several ticks, so binding is partial and
//! retried every tick. A reference, once bound, is never searched for again
//! unless the entity it points to disappears.

use log::debug;

use crate::world::{Role, World};
use shared::{EntityId, Handedness, TableId, MAX_SLOTS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalBinding {
    pub goal: Option<EntityId>,
    pub plate: Option<EntityId>,
    /// Attachment points indexed by [`Handedness::index`]
    pub anchors: [Option<EntityId>; 2],
    pub score_display: Option<EntityId>,
}

impl GoalBinding {
    pub fn anchor(&self, hand: Handedness) -> Option<EntityId> {
        self.anchors[hand.index()]
    }
}

/// What a single `bind` call achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindProgress {
    pub newly_bound: usize,
    pub missing: usize,
}

impl BindProgress {
    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }
}

#[derive(Debug, Clone)]
pub struct TableBindings {
    pub table: TableId,
    pub goals: [GoalBinding; MAX_SLOTS],
    pub balls: Vec<EntityId>,
    pub floor: Option<EntityId>,
}

impl TableBindings {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            goals: Default::default(),
            balls: Vec::new(),
            floor: None,
        }
    }

    /// Walks the table hierarchy and fills in whatever is still unbound
    pub fn bind(&mut self, world: &dyn World, slots: u8) -> BindProgress {
        let mut progress = BindProgress::default();

        for child in world.children(self.table) {
            match world.role(child) {
                Some(Role::Goal { slot }) => {
                    if let Some(binding) = self.goals.get_mut(slot as usize) {
                        if binding.goal.is_none() {
                            binding.goal = Some(child);
                            progress.newly_bound += 1;
                        }
                    }
                }
                Some(Role::Ball) => {
                    if !self.balls.contains(&child) {
                        self.balls.push(child);
                        progress.newly_bound += 1;
                    }
                }
                Some(Role::Floor) => {
                    if self.floor.is_none() {
                        self.floor = Some(child);
                        progress.newly_bound += 1;
                    }
                }
                _ => {}
            }
        }

        for binding in self.goals.iter_mut().take(slots as usize) {
            let Some(goal) = binding.goal else {
                progress.missing += 1;
                continue;
            };
            progress.newly_bound += bind_goal_children(world, goal, binding);
            if binding.plate.is_none() {
                progress.missing += 1;
            }
        }

        if progress.newly_bound > 0 {
            debug!(
                "Table {} bound {} references, {} still missing",
                self.table, progress.newly_bound, progress.missing
            );
        }
        progress
    }

    /// Goals and plates for every slot are bound
    pub fn is_ready(&self, slots: u8) -> bool {
        slots as usize <= MAX_SLOTS
            && self
                .goals
                .iter()
                .take(slots as usize)
                .all(|g| g.goal.is_some() && g.plate.is_some())
    }

    pub fn goal(&self, slot: usize) -> Option<&GoalBinding> {
        self.goals.get(slot)
    }

    pub fn slot_for_plate(&self, plate: EntityId) -> Option<usize> {
        self.goals.iter().position(|g| g.plate == Some(plate))
    }

    /// Drops references to entities that are gone
    pub fn prune(&mut self, world: &dyn World) {
        let gone = |entity: &mut Option<EntityId>| {
            if entity.map_or(false, |e| !world.exists(e)) {
                *entity = None;
            }
        };
        for binding in self.goals.iter_mut() {
            gone(&mut binding.goal);
            gone(&mut binding.plate);
            gone(&mut binding.score_display);
            for anchor in binding.anchors.iter_mut() {
                gone(anchor);
            }
        }
        gone(&mut self.floor);
        self.balls.retain(|ball| world.exists(*ball));
    }
}

fn bind_goal_children(world: &dyn World, goal: EntityId, binding: &mut GoalBinding) -> usize {
    let mut bound = 0;
    for child in world.children(goal) {
        let slot = match world.role(child) {
            Some(Role::Plate) => &mut binding.plate,
            Some(Role::ScoreDisplay) => &mut binding.score_display,
            Some(Role::Paddle { hand }) => &mut binding.anchors[hand.index()],
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(child);
            bound += 1;
        }
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_world::SimWorld;
    use glam::Vec3;

    #[test]
    fn test_bind_authored_table() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let mut bindings = TableBindings::new(table);

        let progress = bindings.bind(&world, 2);
        assert!(progress.is_complete());
        assert!(bindings.is_ready(2));
        assert_eq!(bindings.balls.len(), 2);
        assert!(bindings.floor.is_some());

        let goal = bindings.goal(1).unwrap();
        assert!(goal.anchor(Handedness::Left).is_some());
        assert!(goal.anchor(Handedness::Right).is_some());
        assert!(goal.score_display.is_some());
        assert_eq!(bindings.slot_for_plate(goal.plate.unwrap()), Some(1));

        assert_eq!(bindings.bind(&world, 2).newly_bound, 0);
    }

    #[test]
    fn test_partial_binding_retries() {
        let mut world = SimWorld::new();
        let table = world.spawn(Role::Table { slots: 2, max_damage: 9 }, None);
        let goal0 = world.spawn(Role::Goal { slot: 0 }, Some(table));
        let mut bindings = TableBindings::new(table);

        let progress = bindings.bind(&world, 2);
        assert_eq!(progress.missing, 2);
        assert!(!bindings.is_ready(2));

        world.spawn(Role::Plate, Some(goal0));
        let goal1 = world.spawn(Role::Goal { slot: 1 }, Some(table));
        world.spawn(Role::Plate, Some(goal1));

        let progress = bindings.bind(&world, 2);
        assert!(progress.is_complete());
        assert!(bindings.is_ready(2));
    }

    #[test]
    fn test_bindings_are_monotonic() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let mut bindings = TableBindings::new(table);
        bindings.bind(&world, 2);
        let plate = bindings.goal(0).unwrap().plate;

        let goal = bindings.goal(0).unwrap().goal.unwrap();
        world.spawn(Role::Plate, Some(goal));
        bindings.bind(&world, 2);
        assert_eq!(bindings.goal(0).unwrap().plate, plate);
    }

    #[test]
    fn test_prune_clears_destroyed_entities() {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let mut bindings = TableBindings::new(table);
        bindings.bind(&world, 2);

        let plate = bindings.goal(0).unwrap().plate.unwrap();
        let ball = bindings.balls[0];
        world.despawn(plate);
        world.despawn(ball);
        bindings.prune(&world);

        assert_eq!(bindings.goal(0).unwrap().plate, None);
        assert!(!bindings.balls.contains(&ball));
        assert!(!bindings.is_ready(2));

        let replacement = world.spawn(Role::Plate, bindings.goal(0).unwrap().goal);
        bindings.bind(&world, 2);
        assert_eq!(bindings.goal(0).unwrap().plate, Some(replacement));
    }
}
