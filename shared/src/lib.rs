use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod bus;
pub mod events;
pub mod netlog;
pub mod store;

pub use bus::{Envelope, EventBus, ReorderBuffer, Topic};
pub use events::{EventError, EventKind, Handedness, Mode, TableEvent};
pub use netlog::NetLog;
pub use store::{Applied, Authority, InstanceState, PaddleRecord, PlayerSlot, SessionStore};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_SLOTS: usize = 4;
pub const DEFAULT_MAX_DAMAGE: u32 = 9;
pub const BALL_COOLDOWN_MS: i64 = 3000;
pub const MAX_LOG_LEN: usize = 512;

/// Stable identifier of any object in the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stable identifier of a connected participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player {}", self.0)
    }
}

/// A table is addressed by the id of its root entity
pub type TableId = EntityId;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Ack {
        sequence: u64,
    },
    Publish {
        event: TableEvent,
    },
    WalkTo {
        table_id: TableId,
        slot: Option<u8>,
    },
    PaddlePose {
        paddle_id: EntityId,
        position: Vec3,
        rotation: Quat,
    },
    Heartbeat,
    Disconnect,

    Connected {
        player_id: PlayerId,
    },
    Snapshot {
        base_sequence: u64,
        events: Vec<TableEvent>,
    },
    Events {
        envelopes: Vec<Envelope>,
    },
    Disconnected {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(EntityId(42).to_string(), "#42");
        assert_eq!(PlayerId(3).to_string(), "player 3");
    }

    #[test]
    fn test_packet_serialization_connect() {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Connect { client_version } => assert_eq!(client_version, PROTOCOL_VERSION),
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_events() {
        let table_id = EntityId(10);
        let envelopes = vec![
            Envelope {
                sequence: 4,
                topic: Topic::World,
                event: TableEvent::GoalDamage {
                    table_id,
                    slot: 1,
                    damage: 3,
                },
            },
            Envelope {
                sequence: 5,
                topic: Topic::World,
                event: TableEvent::mode_change(table_id, Mode::Completed),
            },
        ];

        let serialized = bincode::serialize(&Packet::Events { envelopes }).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Events { envelopes } => {
                assert_eq!(envelopes.len(), 2);
                assert_eq!(envelopes[0].sequence, 4);
                assert_eq!(
                    envelopes[0].event,
                    TableEvent::GoalDamage {
                        table_id,
                        slot: 1,
                        damage: 3
                    }
                );
                assert_eq!(envelopes[1].event.kind(), EventKind::ModeChange);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_paddle_pose() {
        let packet = Packet::PaddlePose {
            paddle_id: EntityId(99),
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.5),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::PaddlePose {
                paddle_id,
                position,
                rotation,
            } => {
                assert_eq!(paddle_id, EntityId(99));
                assert_eq!(position, Vec3::new(1.0, 2.0, 3.0));
                assert!(rotation.abs_diff_eq(Quat::from_rotation_y(0.5), 1e-6));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_snapshot_carries_optional_player() {
        let packet = Packet::Snapshot {
            base_sequence: 17,
            events: vec![TableEvent::PlayerChange {
                table_id: EntityId(1),
                slot: 0,
                player: None,
            }],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::Snapshot {
                base_sequence,
                events,
            } => {
                assert_eq!(base_sequence, 17);
                assert!(matches!(
                    events[0],
                    TableEvent::PlayerChange { player: None, .. }
                ));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }
}
