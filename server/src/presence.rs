//! Goal occupancy from avatar contacts on each plate

use log::debug;

use crate::binder::TableBindings;
use crate::world::World;
use shared::{PlayerId, MAX_SLOTS};

#[derive(Debug, Clone, Copy, Default)]
struct Occupancy {
    player: Option<PlayerId>,
    last_seen_ms: u64,
}

/// Debounced plate sensor for one table
#[derive(Debug, Clone)]
pub struct PlateSensor {
    grace_ms: u64,
    slots: [Occupancy; MAX_SLOTS],
}

impl PlateSensor {
    pub fn new(grace_ms: u64) -> Self {
        Self {
            grace_ms,
            slots: [Occupancy::default(); MAX_SLOTS],
        }
    }

    pub fn occupant(&self, slot: usize) -> Option<PlayerId> {
        self.slots.get(slot).and_then(|o| o.player)
    }

    /// Reads the plates and returns the slots whose occupant changed.
    ///
    /// The current occupant is kept while their avatar is on the plate. When
    /// it is not, another avatar on the plate takes the goal over; an empty
    /// plate only releases the goal after the grace window.
    pub fn sense(
        &mut self,
        bindings: &TableBindings,
        world: &dyn World,
        slots: u8,
        now_ms: u64,
    ) -> Vec<(u8, Option<PlayerId>)> {
        let mut changes = Vec::new();

        for slot in 0..(slots as usize).min(MAX_SLOTS) {
            let Some(plate) = bindings.goal(slot).and_then(|g| g.plate) else {
                continue;
            };

            let mut present: Vec<PlayerId> = world
                .collision_pairs(plate)
                .iter()
                .filter_map(|contact| world.player_of(contact.other))
                .collect();
            present.sort();
            present.dedup();

            let occupancy = &mut self.slots[slot];
            match occupancy.player {
                Some(current) if present.contains(&current) => {
                    occupancy.last_seen_ms = now_ms;
                }
                _ if !present.is_empty() => {
                    let next = present[0];
                    debug!("Plate {} now occupied by {}", plate, next);
                    occupancy.player = Some(next);
                    occupancy.last_seen_ms = now_ms;
                    changes.push((slot as u8, Some(next)));
                }
                Some(current) => {
                    if now_ms.saturating_sub(occupancy.last_seen_ms) >= self.grace_ms {
                        debug!("{} left plate {}", current, plate);
                        occupancy.player = None;
                        changes.push((slot as u8, None));
                    }
                }
                None => {}
            }
        }

        changes
    }

    pub fn clear(&mut self) {
        self.slots = [Occupancy::default(); MAX_SLOTS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_world::SimWorld;
    use glam::Vec3;

    fn setup() -> (SimWorld, TableBindings) {
        let mut world = SimWorld::new();
        let table = world.author_table(Vec3::ZERO, 0.0, 2, 9);
        let mut bindings = TableBindings::new(table);
        bindings.bind(&world, 2);
        (world, bindings)
    }

    #[test]
    fn test_occupy_and_release_after_grace() {
        let (mut world, bindings) = setup();
        let mut sensor = PlateSensor::new(1000);
        let player = PlayerId(1);
        world.spawn_avatar(player);
        world.walk_avatar_to(player, bindings.table, Some(0));

        assert_eq!(
            sensor.sense(&bindings, &world, 2, 0),
            vec![(0, Some(player))]
        );
        assert!(sensor.sense(&bindings, &world, 2, 100).is_empty());

        world.walk_avatar_to(player, bindings.table, None);
        assert!(sensor.sense(&bindings, &world, 2, 600).is_empty());
        assert_eq!(sensor.occupant(0), Some(player));
        assert_eq!(sensor.sense(&bindings, &world, 2, 1100), vec![(0, None)]);
        assert_eq!(sensor.occupant(0), None);
    }

    #[test]
    fn test_brief_step_off_does_not_flicker() {
        let (mut world, bindings) = setup();
        let mut sensor = PlateSensor::new(1000);
        let player = PlayerId(3);
        world.spawn_avatar(player);
        world.walk_avatar_to(player, bindings.table, Some(1));
        sensor.sense(&bindings, &world, 2, 0);

        world.walk_avatar_to(player, bindings.table, None);
        assert!(sensor.sense(&bindings, &world, 2, 500).is_empty());
        world.walk_avatar_to(player, bindings.table, Some(1));
        assert!(sensor.sense(&bindings, &world, 2, 900).is_empty());
        assert!(sensor.sense(&bindings, &world, 2, 2000).is_empty());
        assert_eq!(sensor.occupant(1), Some(player));
    }

    #[test]
    fn test_other_player_takes_over_vacated_goal() {
        let (mut world, bindings) = setup();
        let mut sensor = PlateSensor::new(5000);
        let first = PlayerId(1);
        let second = PlayerId(2);
        world.spawn_avatar(first);
        world.spawn_avatar(second);

        world.walk_avatar_to(first, bindings.table, Some(0));
        sensor.sense(&bindings, &world, 2, 0);

        world.walk_avatar_to(first, bindings.table, None);
        world.walk_avatar_to(second, bindings.table, Some(0));
        assert_eq!(
            sensor.sense(&bindings, &world, 2, 100),
            vec![(0, Some(second))]
        );
    }
}
