use glam::Vec3;
use shared::DEFAULT_MAX_DAMAGE;

/// Gameplay tuning shared by every table on the server
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// How often idle balls are considered for a volley
    pub volley_period_ms: u64,
    /// A ball must have been idle this long to be volleyed
    pub ball_age_ms: u64,
    pub volley_height: f32,
    pub volley_base_impulse: f32,
    pub spawn_height: f32,
    pub spawn_impulse: f32,
    /// Table-local height below which a ball has left play
    pub floor_threshold: f32,
    /// Table-local position of balls that are out of play
    pub park_position: Vec3,
    pub occupancy_grace_ms: u64,
    pub max_damage: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            volley_period_ms: 5000,
            ball_age_ms: 5000,
            volley_height: 3.0,
            volley_base_impulse: 3.0,
            spawn_height: 2.0,
            spawn_impulse: 2.0,
            floor_threshold: 0.2,
            park_position: Vec3::new(0.0, -100.0, 0.0),
            occupancy_grace_ms: 5000,
            max_damage: DEFAULT_MAX_DAMAGE,
        }
    }
}
