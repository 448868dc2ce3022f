//! Replicated per-table session state
//!
//! [`SessionStore::apply`] is the only way to change anything in here. Every
//! peer runs the same apply logic over the same event stream, which is what
//! keeps the server and its observers in agreement.

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

use crate::events::{Handedness, Mode, TableEvent};
use crate::{EntityId, PlayerId, TableId, BALL_COOLDOWN_MS};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerSlot {
    /// Accumulated goal damage, clamped to `[0, max_damage]`
    pub damage: u32,
    pub connected_player: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceState {
    pub players: Vec<PlayerSlot>,
    pub max_damage: u32,
    pub ball: Option<EntityId>,
    pub ball_cooldown_ms: i64,
    pub mode: Mode,
}

impl InstanceState {
    pub fn new(slots: u8, max_damage: u32) -> Self {
        Self {
            players: vec![PlayerSlot::default(); slots as usize],
            max_damage,
            ball: None,
            ball_cooldown_ms: BALL_COOLDOWN_MS,
            mode: Mode::Stopped,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.players.len()
    }

    /// Remaining score of a slot, `max_damage - damage`
    pub fn score(&self, slot: usize) -> Option<u32> {
        self.players
            .get(slot)
            .map(|p| self.max_damage.saturating_sub(p.damage))
    }

    pub fn damage(&self, slot: usize) -> Option<u32> {
        self.players.get(slot).map(|p| p.damage)
    }

    pub fn occupant(&self, slot: usize) -> Option<PlayerId> {
        self.players.get(slot).and_then(|p| p.connected_player)
    }

    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.players
            .iter()
            .enumerate()
            .filter(|(_, p)| p.connected_player.is_some())
            .map(|(i, _)| i)
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied_slots().count()
    }

    /// True once any goal has taken the full damage allowance
    pub fn is_round_over(&self) -> bool {
        self.players.iter().any(|p| p.damage >= self.max_damage)
    }
}

/// Who may drive a paddle's motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Server,
    Pending(PlayerId),
    Granted(PlayerId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaddleRecord {
    pub table_id: TableId,
    pub slot: u8,
    pub owner: PlayerId,
    pub handedness: Handedness,
    pub authority: Authority,
}

/// Outcome of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// The event had already taken effect
    Unchanged,
    /// The event refers to a table, slot, ball or paddle that is not there
    Stale,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    instances: HashMap<TableId, InstanceState>,
    paddles: HashMap<EntityId, PaddleRecord>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(&self, table_id: TableId) -> Option<&InstanceState> {
        self.instances.get(&table_id)
    }

    /// Known tables in ascending id order
    pub fn tables(&self) -> Vec<TableId> {
        let mut tables: Vec<TableId> = self.instances.keys().copied().collect();
        tables.sort();
        tables
    }

    pub fn paddle(&self, paddle_id: EntityId) -> Option<&PaddleRecord> {
        self.paddles.get(&paddle_id)
    }

    pub fn paddles_for(&self, table_id: TableId) -> Vec<(EntityId, &PaddleRecord)> {
        let mut paddles: Vec<(EntityId, &PaddleRecord)> = self
            .paddles
            .iter()
            .filter(|(_, record)| record.table_id == table_id)
            .map(|(id, record)| (*id, record))
            .collect();
        paddles.sort_by_key(|(id, _)| *id);
        paddles
    }

    pub fn apply(&mut self, event: &TableEvent) -> Applied {
        let applied = self.apply_inner(event);
        if applied == Applied::Stale {
            debug!("Ignoring stale {:?}", event);
        }
        applied
    }

    fn apply_inner(&mut self, event: &TableEvent) -> Applied {
        match event {
            TableEvent::StartGame {
                table_id,
                slots,
                max_damage,
            } => {
                if self.instances.contains_key(table_id) {
                    return Applied::Unchanged;
                }
                info!(
                    "Table {} started with {} slots, max damage {}",
                    table_id, slots, max_damage
                );
                self.instances
                    .insert(*table_id, InstanceState::new(*slots, *max_damage));
                Applied::Changed
            }
            TableEvent::EndGame { table_id } => {
                self.paddles.retain(|_, record| record.table_id != *table_id);
                match self.instances.remove(table_id) {
                    Some(_) => {
                        info!("Table {} ended", table_id);
                        Applied::Changed
                    }
                    None => Applied::Unchanged,
                }
            }
            TableEvent::PlayerChange {
                table_id,
                slot,
                player,
            } => {
                let Some(slot) = self.slot_mut(*table_id, *slot) else {
                    return Applied::Stale;
                };
                if slot.connected_player == *player {
                    return Applied::Unchanged;
                }
                slot.connected_player = *player;
                Applied::Changed
            }
            TableEvent::PlayerScore { table_id, slot } => {
                let Some(instance) = self.instances.get_mut(table_id) else {
                    return Applied::Stale;
                };
                let max_damage = instance.max_damage;
                let Some(slot) = instance.players.get_mut(*slot as usize) else {
                    return Applied::Stale;
                };
                if slot.damage >= max_damage {
                    return Applied::Unchanged;
                }
                slot.damage += 1;
                Applied::Changed
            }
            TableEvent::GoalDamage {
                table_id,
                slot,
                damage,
            } => {
                let Some(instance) = self.instances.get_mut(table_id) else {
                    return Applied::Stale;
                };
                let max_damage = instance.max_damage;
                let Some(slot) = instance.players.get_mut(*slot as usize) else {
                    return Applied::Stale;
                };
                let mut damage = *damage;
                if damage > max_damage {
                    warn!(
                        "Goal damage {} exceeds max {} on table {}, clamping",
                        damage, max_damage, table_id
                    );
                    damage = max_damage;
                }
                if slot.damage == damage {
                    return Applied::Unchanged;
                }
                slot.damage = damage;
                Applied::Changed
            }
            TableEvent::SpawnBall { table_id, ball_id } => {
                let Some(instance) = self.instances.get_mut(table_id) else {
                    return Applied::Stale;
                };
                if instance.ball == Some(*ball_id) {
                    return Applied::Unchanged;
                }
                instance.ball = Some(*ball_id);
                Applied::Changed
            }
            TableEvent::DestroyBall { table_id, ball_id } => {
                let Some(instance) = self.instances.get_mut(table_id) else {
                    return Applied::Stale;
                };
                if instance.ball != Some(*ball_id) {
                    return Applied::Stale;
                }
                instance.ball = None;
                instance.ball_cooldown_ms = BALL_COOLDOWN_MS;
                Applied::Changed
            }
            TableEvent::ModeChange { table_id, mode } => {
                let Ok(mode) = mode.parse::<Mode>() else {
                    warn!("Unknown mode '{}' reached the store", mode);
                    return Applied::Stale;
                };
                let Some(instance) = self.instances.get_mut(table_id) else {
                    return Applied::Stale;
                };
                if instance.mode == mode {
                    return Applied::Unchanged;
                }
                info!("Table {} mode {} -> {}", table_id, instance.mode, mode);
                instance.mode = mode;
                if mode != Mode::Playing && instance.ball.take().is_some() {
                    instance.ball_cooldown_ms = BALL_COOLDOWN_MS;
                }
                Applied::Changed
            }
            TableEvent::SpawnPaddle {
                table_id,
                paddle_id,
                slot,
                owner,
                handedness,
            } => {
                if !self.instances.contains_key(table_id) {
                    return Applied::Stale;
                }
                if self.paddles.contains_key(paddle_id) {
                    return Applied::Unchanged;
                }
                self.paddles.insert(
                    *paddle_id,
                    PaddleRecord {
                        table_id: *table_id,
                        slot: *slot,
                        owner: *owner,
                        handedness: *handedness,
                        authority: Authority::Server,
                    },
                );
                Applied::Changed
            }
            TableEvent::DestroyPaddle { paddle_id, .. } => match self.paddles.remove(paddle_id) {
                Some(_) => Applied::Changed,
                None => Applied::Stale,
            },
            TableEvent::AuthorityRequest {
                paddle_id,
                requester,
            } => {
                let Some(record) = self.paddles.get_mut(paddle_id) else {
                    return Applied::Stale;
                };
                if record.owner != *requester {
                    warn!(
                        "{} requested authority over paddle {} owned by {}",
                        requester, paddle_id, record.owner
                    );
                    return Applied::Unchanged;
                }
                match record.authority {
                    Authority::Server => {
                        record.authority = Authority::Pending(*requester);
                        Applied::Changed
                    }
                    Authority::Pending(_) | Authority::Granted(_) => Applied::Unchanged,
                }
            }
            TableEvent::AuthorityGranted {
                paddle_id,
                authority,
            } => {
                let Some(record) = self.paddles.get_mut(paddle_id) else {
                    return Applied::Stale;
                };
                if record.authority == Authority::Granted(*authority) {
                    return Applied::Unchanged;
                }
                record.authority = Authority::Granted(*authority);
                Applied::Changed
            }
            TableEvent::Log { .. } => Applied::Unchanged,
        }
    }

    fn slot_mut(&mut self, table_id: TableId, slot: u8) -> Option<&mut PlayerSlot> {
        self.instances
            .get_mut(&table_id)
            .and_then(|instance| instance.players.get_mut(slot as usize))
    }

    /// Runs the local cooldown clock of every table.
    ///
    /// Only the reset to the full cooldown is replicated; the countdown is
    /// local to each peer.
    pub fn advance(&mut self, dt_ms: i64) {
        for instance in self.instances.values_mut() {
            if instance.mode == Mode::Playing && instance.ball.is_none() {
                instance.ball_cooldown_ms = (instance.ball_cooldown_ms - dt_ms).max(0);
            }
        }
    }

    /// Events that rebuild the current state on an empty store
    pub fn snapshot_events(&self) -> Vec<TableEvent> {
        let mut events = Vec::new();

        for table_id in self.tables() {
            let Some(instance) = self.instances.get(&table_id) else {
                continue;
            };
            events.push(TableEvent::StartGame {
                table_id,
                slots: instance.players.len() as u8,
                max_damage: instance.max_damage,
            });
            for (slot, player) in instance.players.iter().enumerate() {
                if player.connected_player.is_some() {
                    events.push(TableEvent::PlayerChange {
                        table_id,
                        slot: slot as u8,
                        player: player.connected_player,
                    });
                }
                if player.damage > 0 {
                    events.push(TableEvent::GoalDamage {
                        table_id,
                        slot: slot as u8,
                        damage: player.damage,
                    });
                }
            }
            if instance.mode != Mode::Stopped {
                events.push(TableEvent::mode_change(table_id, instance.mode));
            }
            if let Some(ball_id) = instance.ball {
                events.push(TableEvent::SpawnBall { table_id, ball_id });
            }
        }

        let paddles: BTreeMap<EntityId, &PaddleRecord> =
            self.paddles.iter().map(|(id, r)| (*id, r)).collect();
        for (paddle_id, record) in paddles {
            events.push(TableEvent::SpawnPaddle {
                table_id: record.table_id,
                paddle_id,
                slot: record.slot,
                owner: record.owner,
                handedness: record.handedness,
            });
            match record.authority {
                Authority::Server => {}
                Authority::Pending(requester) => events.push(TableEvent::AuthorityRequest {
                    paddle_id,
                    requester,
                }),
                Authority::Granted(authority) => events.push(TableEvent::AuthorityGranted {
                    paddle_id,
                    authority,
                }),
            }
        }

        events
    }
}
