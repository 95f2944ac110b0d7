//! Player-related constants

/// Player height (for capsule)
pub const PLAYER_HEIGHT: f32 = 1.8;

/// Player radius (for capsule)
pub const PLAYER_RADIUS: f32 = 0.3;

/// Eye height above the feet, where shots are traced from
pub const EYE_HEIGHT: f32 = 1.6;

/// New players are spread on a ring of this radius around the origin
pub const SPAWN_RADIUS: f32 = 8.0;

/// Health every player spawns with
pub const PLAYER_MAX_HEALTH: f32 = 100.0;

/// Seconds a dead player waits before respawning
pub const RESPAWN_TIME: f32 = 4.0;
