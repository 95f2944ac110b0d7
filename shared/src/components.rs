//! Shared ECS components used by both server and client

use bevy::prelude::*;
use lightyear::prelude::PeerId;
use serde::{Deserialize, Serialize};

use crate::player::PLAYER_MAX_HEALTH;
use crate::weapons::{ProjectileConfig, WeaponKind};

// =============================================================================
// PLAYER
// =============================================================================

/// Player marker component - replicated across network
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Player {
    pub client_id: PeerId,
}

/// Feet position - replicated across network
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PlayerPosition(pub Vec3);

/// Normalized aim direction - replicated across network
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlayerAim(pub Vec3);

impl Default for PlayerAim {
    fn default() -> Self {
        Self(Vec3::NEG_Z)
    }
}

// =============================================================================
// COMBAT
// =============================================================================

/// Health component for damageable entities
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Default for Health {
    fn default() -> Self {
        Self::new(PLAYER_MAX_HEALTH)
    }
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    /// Returns true when this damage killed the entity.
    pub fn take_damage(&mut self, amount: f32) -> bool {
        let was_alive = !self.is_dead();
        self.current = (self.current - amount).max(0.0);
        was_alive && self.is_dead()
    }

    pub fn is_dead(&self) -> bool {
        self.current <= 0.0
    }
}

/// Which weapon a player holds. Observers build their replicas from it.
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EquippedWeapon {
    pub kind: WeaponKind,
}

/// Ammo left in the held weapon on the server. Refills reach the holder
/// through it; shot-by-shot counts come with each fire broadcast.
#[derive(Component, Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct WeaponAmmo(pub u32);

// =============================================================================
// PROJECTILES
// =============================================================================

/// Server-simulated projectile
#[derive(Component, Clone, Debug, PartialEq)]
pub struct Projectile {
    pub owner_id: u64,
    pub fire_mode: u8,
    pub spawn_position: Vec3,
    /// Game time in seconds
    pub spawn_time: f32,
    pub config: ProjectileConfig,
}

#[derive(Component, Clone, Debug, PartialEq, Default)]
pub struct ProjectileVelocity(pub Vec3);

/// Position at the start of the last step, for swept hit detection
#[derive(Component, Clone, Debug, PartialEq, Default)]
pub struct ProjectilePrevPosition(pub Vec3);

/// Stable numeric id of a peer, used as the damage target id and shooter id
pub fn peer_id_to_u64(peer_id: PeerId) -> u64 {
    match peer_id {
        PeerId::Netcode(id) => id,
        PeerId::Steam(id) => id,
        PeerId::Local(id) => id,
        PeerId::Entity(id) => id,
        PeerId::Raw(addr) => {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            addr.hash(&mut hasher);
            hasher.finish()
        }
        PeerId::Server => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_damage_reports_kill_once() {
        let mut health = Health::new(50.0);
        assert!(!health.take_damage(20.0));
        assert!(health.take_damage(40.0));
        assert_eq!(health.current, 0.0);
        // Already dead, no second kill
        assert!(!health.take_damage(10.0));
    }

    #[test]
    fn test_netcode_peer_id_is_kept() {
        assert_eq!(peer_id_to_u64(PeerId::Netcode(42)), 42);
        assert_eq!(peer_id_to_u64(PeerId::Server), 0);
    }
}
