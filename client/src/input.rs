//! Pose commands for the paddles this client is allowed to move

use glam::{Quat, Vec3};
use shared::{Authority, EntityId, Handedness, PlayerId, SessionStore};

/// Sideways reach of the synthetic sweep
const SWEEP_AMPLITUDE: f32 = 0.4;
const SWEEP_RATE: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseCommand {
    pub paddle_id: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
}

/// Drives owned paddles with a side to side sweep around `anchor`.
///
/// Commands are only produced for paddles whose authority has been granted
/// to the local player; the rest are counted as withheld.
#[derive(Debug)]
pub struct PaddleDriver {
    anchor: Vec3,
    elapsed: f32,
    sent: u64,
    withheld: u64,
}

impl Default for PaddleDriver {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 1.0, 0.0))
    }
}

impl PaddleDriver {
    pub fn new(anchor: Vec3) -> Self {
        Self {
            anchor,
            elapsed: 0.0,
            sent: 0,
            withheld: 0,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn withheld(&self) -> u64 {
        self.withheld
    }

    pub fn update(&mut self, store: &SessionStore, me: PlayerId, dt: f32) -> Vec<PoseCommand> {
        self.elapsed += dt;

        let mut commands = Vec::new();
        for table_id in store.tables() {
            for (paddle_id, record) in store.paddles_for(table_id) {
                if record.owner != me {
                    continue;
                }
                if record.authority != Authority::Granted(me) {
                    self.withheld += 1;
                    continue;
                }
                let (position, rotation) = self.sweep(record.handedness);
                commands.push(PoseCommand {
                    paddle_id,
                    position,
                    rotation,
                });
            }
        }
        self.sent += commands.len() as u64;
        commands
    }

    fn sweep(&self, hand: Handedness) -> (Vec3, Quat) {
        let side = match hand {
            Handedness::Left => -0.35,
            Handedness::Right => 0.35,
        };
        let phase = (self.elapsed * SWEEP_RATE).sin();
        let position = self.anchor + Vec3::new(side + SWEEP_AMPLITUDE * phase, 0.0, 0.0);
        (position, Quat::from_rotation_z(0.3 * phase))
    }
}
