//! Typed events replicated over the world topic
//!
//! Every change to a table's session state travels as one of these records.
//! Receivers validate the shape before anything is applied, so a malformed
//! event is dropped at the bus and never reaches the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{EntityId, PlayerId, TableId, MAX_LOG_LEN, MAX_SLOTS};

/// Phase of a table's round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Stopped,
    Starting,
    Playing,
    Completed,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Stopped, Mode::Starting, Mode::Playing, Mode::Completed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Stopped => "stopped",
            Mode::Starting => "starting",
            Mode::Playing => "playing",
            Mode::Completed => "completed",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Mode::Stopped),
            "starting" => Ok(Mode::Starting),
            "playing" => Ok(Mode::Playing),
            "completed" => Ok(Mode::Completed),
            other => Err(EventError::UnknownMode(other.to_string())),
        }
    }
}

/// Which hand a paddle is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub const BOTH: [Handedness; 2] = [Handedness::Left, Handedness::Right];

    pub fn index(&self) -> usize {
        match self {
            Handedness::Left => 0,
            Handedness::Right => 1,
        }
    }
}

/// Shape errors detected before an event is accepted by a bus
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("slot index {slot} is outside the supported range 0..{max}")]
    SlotOutOfRange { slot: u8, max: usize },
    #[error("unknown session mode '{0}'")]
    UnknownMode(String),
    #[error("a table needs between 1 and {max} slots, got {slots}")]
    InvalidSlotCount { slots: u8, max: usize },
    #[error("max damage must be positive")]
    ZeroMaxDamage,
    #[error("log line of {len} bytes exceeds the {max} byte limit")]
    LogTooLong { len: usize, max: usize },
}

/// Discriminant used to keep one FIFO queue per event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    StartGame,
    EndGame,
    PlayerChange,
    PlayerScore,
    GoalDamage,
    SpawnBall,
    DestroyBall,
    ModeChange,
    SpawnPaddle,
    DestroyPaddle,
    AuthorityRequest,
    AuthorityGranted,
    Log,
}

impl EventKind {
    pub const ALL: [EventKind; 13] = [
        EventKind::StartGame,
        EventKind::EndGame,
        EventKind::PlayerChange,
        EventKind::PlayerScore,
        EventKind::GoalDamage,
        EventKind::SpawnBall,
        EventKind::DestroyBall,
        EventKind::ModeChange,
        EventKind::SpawnPaddle,
        EventKind::DestroyPaddle,
        EventKind::AuthorityRequest,
        EventKind::AuthorityGranted,
        EventKind::Log,
    ];
}

/// A replicated record on the world topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableEvent {
    StartGame {
        table_id: TableId,
        slots: u8,
        max_damage: u32,
    },
    EndGame {
        table_id: TableId,
    },
    PlayerChange {
        table_id: TableId,
        slot: u8,
        player: Option<PlayerId>,
    },
    /// One point lost by the slot; the only delta-valued event
    PlayerScore {
        table_id: TableId,
        slot: u8,
    },
    /// Absolute accumulated damage of the goal defending `slot`
    GoalDamage {
        table_id: TableId,
        slot: u8,
        damage: u32,
    },
    SpawnBall {
        table_id: TableId,
        ball_id: EntityId,
    },
    DestroyBall {
        table_id: TableId,
        ball_id: EntityId,
    },
    /// Mode travels as its string name, see [`Mode::as_str`]
    ModeChange {
        table_id: TableId,
        mode: String,
    },
    SpawnPaddle {
        table_id: TableId,
        paddle_id: EntityId,
        slot: u8,
        owner: PlayerId,
        handedness: Handedness,
    },
    DestroyPaddle {
        table_id: TableId,
        paddle_id: EntityId,
    },
    AuthorityRequest {
        paddle_id: EntityId,
        requester: PlayerId,
    },
    AuthorityGranted {
        paddle_id: EntityId,
        authority: PlayerId,
    },
    Log {
        origin: String,
        message: String,
    },
}

impl TableEvent {
    pub fn mode_change(table_id: TableId, mode: Mode) -> Self {
        TableEvent::ModeChange {
            table_id,
            mode: mode.as_str().to_string(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TableEvent::StartGame { .. } => EventKind::StartGame,
            TableEvent::EndGame { .. } => EventKind::EndGame,
            TableEvent::PlayerChange { .. } => EventKind::PlayerChange,
            TableEvent::PlayerScore { .. } => EventKind::PlayerScore,
            TableEvent::GoalDamage { .. } => EventKind::GoalDamage,
            TableEvent::SpawnBall { .. } => EventKind::SpawnBall,
            TableEvent::DestroyBall { .. } => EventKind::DestroyBall,
            TableEvent::ModeChange { .. } => EventKind::ModeChange,
            TableEvent::SpawnPaddle { .. } => EventKind::SpawnPaddle,
            TableEvent::DestroyPaddle { .. } => EventKind::DestroyPaddle,
            TableEvent::AuthorityRequest { .. } => EventKind::AuthorityRequest,
            TableEvent::AuthorityGranted { .. } => EventKind::AuthorityGranted,
            TableEvent::Log { .. } => EventKind::Log,
        }
    }

    /// Table this event belongs to, if it is table scoped
    pub fn table_id(&self) -> Option<TableId> {
        match self {
            TableEvent::StartGame { table_id, .. }
            | TableEvent::EndGame { table_id }
            | TableEvent::PlayerChange { table_id, .. }
            | TableEvent::PlayerScore { table_id, .. }
            | TableEvent::GoalDamage { table_id, .. }
            | TableEvent::SpawnBall { table_id, .. }
            | TableEvent::DestroyBall { table_id, .. }
            | TableEvent::ModeChange { table_id, .. }
            | TableEvent::SpawnPaddle { table_id, .. }
            | TableEvent::DestroyPaddle { table_id, .. } => Some(*table_id),
            TableEvent::AuthorityRequest { .. }
            | TableEvent::AuthorityGranted { .. }
            | TableEvent::Log { .. } => None,
        }
    }

    /// Checks the declared shape of the event.
    ///
    /// Slot indices are only checked against the protocol maximum here; a
    /// slot beyond a particular table's size is a stale reference that the
    /// store ignores.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            TableEvent::StartGame {
                slots, max_damage, ..
            } => {
                if *slots == 0 || *slots as usize > MAX_SLOTS {
                    return Err(EventError::InvalidSlotCount {
                        slots: *slots,
                        max: MAX_SLOTS,
                    });
                }
                if *max_damage == 0 {
                    return Err(EventError::ZeroMaxDamage);
                }
                Ok(())
            }
            TableEvent::PlayerChange { slot, .. }
            | TableEvent::PlayerScore { slot, .. }
            | TableEvent::GoalDamage { slot, .. }
            | TableEvent::SpawnPaddle { slot, .. } => check_slot(*slot),
            TableEvent::ModeChange { mode, .. } => mode.parse::<Mode>().map(|_| ()),
            TableEvent::Log { message, .. } => {
                if message.len() > MAX_LOG_LEN {
                    Err(EventError::LogTooLong {
                        len: message.len(),
                        max: MAX_LOG_LEN,
                    })
                } else {
                    Ok(())
                }
            }
            TableEvent::EndGame { .. }
            | TableEvent::SpawnBall { .. }
            | TableEvent::DestroyBall { .. }
            | TableEvent::DestroyPaddle { .. }
            | TableEvent::AuthorityRequest { .. }
            | TableEvent::AuthorityGranted { .. } => Ok(()),
        }
    }
}

fn check_slot(slot: u8) -> Result<(), EventError> {
    if (slot as usize) < MAX_SLOTS {
        Ok(())
    } else {
        Err(EventError::SlotOutOfRange {
            slot,
            max: MAX_SLOTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: TableId = EntityId(7);

    #[test]
    fn test_mode_string_roundtrip() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>(), Ok(mode));
        }
        assert_eq!(
            "paused".parse::<Mode>(),
            Err(EventError::UnknownMode("paused".to_string()))
        );
    }

    #[test]
    fn test_mode_change_carries_string_name() {
        match TableEvent::mode_change(TABLE, Mode::Completed) {
            TableEvent::ModeChange { table_id, mode } => {
                assert_eq!(table_id, TABLE);
                assert_eq!(mode, "completed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_mode() {
        let event = TableEvent::ModeChange {
            table_id: TABLE,
            mode: "bogus".to_string(),
        };
        assert!(matches!(event.validate(), Err(EventError::UnknownMode(_))));
    }

    #[test]
    fn test_validate_slot_bounds() {
        let ok = TableEvent::PlayerScore {
            table_id: TABLE,
            slot: 3,
        };
        assert!(ok.validate().is_ok());

        let bad = TableEvent::GoalDamage {
            table_id: TABLE,
            slot: 4,
            damage: 1,
        };
        assert_eq!(
            bad.validate(),
            Err(EventError::SlotOutOfRange { slot: 4, max: 4 })
        );
    }

    #[test]
    fn test_validate_start_game() {
        let zero_slots = TableEvent::StartGame {
            table_id: TABLE,
            slots: 0,
            max_damage: 9,
        };
        assert!(matches!(
            zero_slots.validate(),
            Err(EventError::InvalidSlotCount { .. })
        ));

        let zero_damage = TableEvent::StartGame {
            table_id: TABLE,
            slots: 2,
            max_damage: 0,
        };
        assert_eq!(zero_damage.validate(), Err(EventError::ZeroMaxDamage));
    }

    #[test]
    fn test_validate_log_length() {
        let event = TableEvent::Log {
            origin: "server".to_string(),
            message: "x".repeat(MAX_LOG_LEN + 1),
        };
        assert!(matches!(event.validate(), Err(EventError::LogTooLong { .. })));
    }

    #[test]
    fn test_all_kinds_are_distinct() {
        let mut kinds = EventKind::ALL.to_vec();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_table_scope() {
        let grant = TableEvent::AuthorityGranted {
            paddle_id: EntityId(1),
            authority: PlayerId(2),
        };
        assert_eq!(grant.table_id(), None);
        assert_eq!(grant.kind(), EventKind::AuthorityGranted);

        let end = TableEvent::EndGame { table_id: TABLE };
        assert_eq!(end.table_id(), Some(TABLE));
    }
}
