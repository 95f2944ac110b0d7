//! Projectile flight
//!
//! Projectiles fall with scaled gravity and slow down with quadratic air drag.

use bevy::prelude::*;

/// Gravity acceleration for projectiles (m/s²)
pub const PROJECTILE_GRAVITY: f32 = -9.81;

/// Air drag coefficient (simplified model)
pub const PROJECTILE_DRAG_COEFFICIENT: f32 = 0.0004;

/// Minimum speed before a projectile is removed (m/s)
pub const PROJECTILE_MIN_SPEED: f32 = 2.0;

/// Maximum distance from the spawn point before removal (m)
pub const PROJECTILE_MAX_RANGE: f32 = 800.0;

/// Simulate one physics step for a projectile
///
/// Returns (new_position, new_velocity)
pub fn step_projectile(position: Vec3, velocity: Vec3, gravity_scale: f32, dt: f32) -> (Vec3, Vec3) {
    let mut vel = velocity;

    vel.y += PROJECTILE_GRAVITY * gravity_scale * dt;

    // F_drag = -k * v² * v_hat
    let speed = vel.length();
    if speed > 0.1 {
        let drag_magnitude = PROJECTILE_DRAG_COEFFICIENT * speed * speed;
        vel -= vel.normalize() * drag_magnitude * dt;
    }

    (position + vel * dt, vel)
}

/// Check if a projectile should be removed without a hit
pub fn should_despawn_projectile(
    velocity: Vec3,
    spawn_position: Vec3,
    current_position: Vec3,
    lifetime: f32,
    max_lifetime: f32,
) -> bool {
    velocity.length() < PROJECTILE_MIN_SPEED
        || (current_position - spawn_position).length() > PROJECTILE_MAX_RANGE
        || lifetime > max_lifetime
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_physics() {
        let pos = Vec3::ZERO;
        let vel = Vec3::new(0.0, 0.0, -60.0);

        let (new_pos, new_vel) = step_projectile(pos, vel, 1.0, 0.016);

        assert!(new_pos.z < 0.0);
        assert!(new_vel.y < 0.0);
        assert!(new_vel.length() < vel.length());
    }

    #[test]
    fn test_despawn_rules() {
        let fast = Vec3::new(0.0, 0.0, -60.0);
        assert!(!should_despawn_projectile(fast, Vec3::ZERO, Vec3::Z, 1.0, 5.0));
        assert!(should_despawn_projectile(fast, Vec3::ZERO, Vec3::Z, 5.5, 5.0));
        assert!(should_despawn_projectile(Vec3::ZERO, Vec3::ZERO, Vec3::Z, 1.0, 5.0));
        assert!(should_despawn_projectile(fast, Vec3::ZERO, Vec3::Z * 900.0, 1.0, 5.0));
    }
}
