//! Weapon system - fire modes, weapon state machine, shot resolution
//!
//! A `Weapon` owns its fire modes and drives them from a single-threaded
//! timer scheduler. The host supplies clock, world queries and transport
//! through `WeaponEnv`.

pub mod ballistics;
pub mod basic;
pub mod config;
pub mod damage;
pub mod fire_mode;
pub mod shot;
pub mod timers;
pub mod weapon;

use serde::{Deserialize, Serialize};

pub use basic::{BasicFireMode, ServerFireOutcome};
pub use config::{
    FireModeConfig, HitscanConfig, ProjectileConfig, ShotKind, ShotOriginPolicy, WeaponConfig,
    WeaponTable,
};
pub use damage::{DamageFalloff, HitZone};
pub use fire_mode::{FireBroadcast, FireRequest, HitscanVisualInfo, SimulatedShotInfo};
pub use shot::{PointDamage, ProjectileSpawn, ShotWorld, TargetId, TraceHit};
pub use weapon::{NetRole, SwapAnimation, Weapon, WeaponEnv, WeaponState};

/// Available weapon kinds
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum WeaponKind {
    /// Automatic hitscan primary, grenade alt fire
    #[default]
    Rifle,
    /// Slow single projectile
    Launcher,
    /// Semi-automatic hitscan
    Pistol,
}

impl WeaponKind {
    /// Get the built-in config for this weapon kind
    pub fn config(&self) -> WeaponConfig {
        match self {
            WeaponKind::Rifle => WeaponConfig {
                name: "Rifle".to_string(),
                max_ammo: 120,
                starting_ammo: 60,
                bring_up_time: 0.3,
                put_down_time: 0.3,
                cooldown_delays_put_down_by_percent: 0.5,
                reduce_put_down_delay_by_put_down_time: false,
                shot_origin: ShotOriginPolicy::TrustClient,
                fire_modes: vec![
                    FireModeConfig {
                        index: 0,
                        fire_interval: 0.12,
                        ammo_cost: 1,
                        shot: ShotKind::Hitscan(HitscanConfig {
                            range: 250.0,
                            damage: 18.0,
                            sweep_radius: 0.05,
                            falloff: DamageFalloff {
                                start: 40.0,
                                end: 200.0,
                                min_mult: 0.6,
                                headshot_mult: 2.2,
                            },
                        }),
                    },
                    FireModeConfig {
                        index: 1,
                        fire_interval: 0.9,
                        ammo_cost: 5,
                        shot: ShotKind::Projectile(ProjectileConfig {
                            speed: 35.0,
                            damage: 70.0,
                            gravity_scale: 1.0,
                            max_lifetime: 4.0,
                            muzzle_offset: 0.8,
                            radius: 0.12,
                            falloff: DamageFalloff::none(),
                        }),
                    },
                ],
            },
            WeaponKind::Launcher => WeaponConfig {
                name: "Launcher".to_string(),
                max_ammo: 20,
                starting_ammo: 8,
                bring_up_time: 0.5,
                put_down_time: 0.4,
                cooldown_delays_put_down_by_percent: 1.0,
                reduce_put_down_delay_by_put_down_time: true,
                shot_origin: ShotOriginPolicy::TrustClient,
                fire_modes: vec![FireModeConfig {
                    index: 0,
                    fire_interval: 1.0,
                    ammo_cost: 1,
                    shot: ShotKind::Projectile(ProjectileConfig {
                        speed: 50.0,
                        damage: 100.0,
                        gravity_scale: 0.2,
                        max_lifetime: 6.0,
                        muzzle_offset: 1.0,
                        radius: 0.15,
                        falloff: DamageFalloff::none(),
                    }),
                }],
            },
            WeaponKind::Pistol => WeaponConfig {
                name: "Pistol".to_string(),
                max_ammo: 60,
                starting_ammo: 30,
                bring_up_time: 0.2,
                put_down_time: 0.2,
                cooldown_delays_put_down_by_percent: 0.0,
                reduce_put_down_delay_by_put_down_time: false,
                shot_origin: ShotOriginPolicy::TrustClient,
                fire_modes: vec![FireModeConfig {
                    index: 0,
                    fire_interval: 0.35,
                    ammo_cost: 1,
                    shot: ShotKind::Hitscan(HitscanConfig {
                        range: 120.0,
                        damage: 25.0,
                        sweep_radius: 0.03,
                        falloff: DamageFalloff {
                            start: 25.0,
                            end: 100.0,
                            min_mult: 0.55,
                            headshot_mult: 2.0,
                        },
                    }),
                }],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_fire_mode_indices_are_unique() {
        for kind in [WeaponKind::Rifle, WeaponKind::Launcher, WeaponKind::Pistol] {
            let config = kind.config();
            let mut indices: Vec<u8> = config.fire_modes.iter().map(|mode| mode.index).collect();
            indices.dedup();
            assert_eq!(indices.len(), config.fire_modes.len(), "{:?}", kind);
            assert!(config.starting_ammo <= config.max_ammo);
            assert!(config.fire_modes.iter().all(|mode| mode.fire_interval > 0.0));
        }
    }

    #[test]
    fn test_rifle_has_hitscan_primary_and_projectile_alt() {
        let rifle = WeaponKind::Rifle.config();
        assert!(rifle.fire_modes[0].is_hitscan());
        assert!(!rifle.fire_modes[1].is_hitscan());
    }
}
