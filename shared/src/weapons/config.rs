//! Weapon and fire mode configuration
//!
//! Built-in values come from `WeaponKind::config()`. A RON file can override
//! any weapon at start-up through `WeaponTable::load`.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::damage::DamageFalloff;
use super::WeaponKind;

/// Shots arriving later than this (in seconds) are never bridged by a delay.
pub const MAX_FIRE_DELAY: f64 = 0.2;

/// Cooldowns shorter than this end on the next tick instead.
pub const MIN_FIRE_INTERVAL: f64 = 1e-3;

/// Poll interval while the holder keeps firing an empty weapon.
pub const OUT_OF_AMMO_RETRY_INTERVAL: f64 = 0.5;

/// Poll interval for a put-down requested while the weapon is `Busy`.
pub const BUSY_PUT_DOWN_POLL_INTERVAL: f64 = 1.0;

/// Readiness reported by a weapon that cannot fire at all right now.
/// Larger than `MAX_FIRE_DELAY`, so the authority discards the shot.
pub const NOT_READY_DELAY: f64 = 1.0;

/// Where the authority takes the origin of a client-simulated shot from.
///
/// Clients send the fire origin they simulated. The authority has no rewind
/// history to check it against, so by default the claimed origin is used as
/// is. `Authority` swaps it for the authority's own view point instead, at
/// the cost of shots missing under latency. The direction is always taken
/// from the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotOriginPolicy {
    #[default]
    TrustClient,
    Authority,
}

/// Instant sweep resolution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitscanConfig {
    /// Trace length in meters
    pub range: f32,
    /// Damage at point blank
    pub damage: f32,
    /// Radius of the swept sphere
    pub sweep_radius: f32,
    pub falloff: DamageFalloff,
}

impl Default for HitscanConfig {
    fn default() -> Self {
        Self {
            range: 200.0,
            damage: 20.0,
            sweep_radius: 0.05,
            falloff: DamageFalloff::default(),
        }
    }
}

/// Simulated projectile resolution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileConfig {
    /// Launch speed in m/s
    pub speed: f32,
    pub damage: f32,
    /// Multiplier applied to bullet gravity (0 = flies straight)
    pub gravity_scale: f32,
    /// Seconds before the projectile is removed without hitting anything
    pub max_lifetime: f32,
    /// Distance in front of the eye where the projectile spawns
    pub muzzle_offset: f32,
    /// Radius of the projectile used for hit detection
    pub radius: f32,
    pub falloff: DamageFalloff,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self {
            speed: 60.0,
            damage: 80.0,
            gravity_scale: 1.0,
            max_lifetime: 5.0,
            muzzle_offset: 0.8,
            radius: 0.1,
            falloff: DamageFalloff::none(),
        }
    }
}

/// How an accepted shot is resolved
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShotKind {
    Hitscan(HitscanConfig),
    Projectile(ProjectileConfig),
}

impl Default for ShotKind {
    fn default() -> Self {
        ShotKind::Hitscan(HitscanConfig::default())
    }
}

/// One firing behaviour of a weapon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireModeConfig {
    /// Slot of this fire mode inside its weapon
    pub index: u8,
    /// Minimum seconds between two shots
    pub fire_interval: f32,
    /// Ammo consumed by one accepted shot
    pub ammo_cost: u32,
    pub shot: ShotKind,
}

impl Default for FireModeConfig {
    fn default() -> Self {
        Self {
            index: 0,
            fire_interval: 0.5,
            ammo_cost: 1,
            shot: ShotKind::default(),
        }
    }
}

impl FireModeConfig {
    pub fn is_hitscan(&self) -> bool {
        matches!(self.shot, ShotKind::Hitscan(_))
    }
}

/// Complete configuration for one weapon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponConfig {
    pub name: String,
    pub max_ammo: u32,
    pub starting_ammo: u32,
    /// Seconds for a full bring-up
    pub bring_up_time: f32,
    /// Seconds for a full put-down
    pub put_down_time: f32,
    /// Fraction (0..=1) of a running cooldown that must elapse before a
    /// requested put-down actually starts
    pub cooldown_delays_put_down_by_percent: f32,
    /// Let the put-down animation overlap the end of the cooldown
    pub reduce_put_down_delay_by_put_down_time: bool,
    pub shot_origin: ShotOriginPolicy,
    pub fire_modes: Vec<FireModeConfig>,
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            name: "Weapon".to_string(),
            max_ammo: 100,
            starting_ammo: 50,
            bring_up_time: 0.3,
            put_down_time: 0.3,
            cooldown_delays_put_down_by_percent: 1.0,
            reduce_put_down_delay_by_put_down_time: false,
            shot_origin: ShotOriginPolicy::TrustClient,
            fire_modes: vec![FireModeConfig::default()],
        }
    }
}

/// Failure to read a weapon table file
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(ron::error::SpannedError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read weapon config: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse weapon config: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<ron::error::SpannedError> for ConfigError {
    fn from(err: ron::error::SpannedError) -> Self {
        ConfigError::Parse(err)
    }
}

/// Weapon configs by kind, built-ins overridden by an optional file
#[derive(Resource, Clone, Debug, Default)]
pub struct WeaponTable {
    overrides: HashMap<WeaponKind, WeaponConfig>,
}

impl WeaponTable {
    /// Parse a RON map of `WeaponKind` to `WeaponConfig`.
    pub fn from_ron(source: &str) -> Result<Self, ConfigError> {
        let overrides: HashMap<WeaponKind, WeaponConfig> = ron::from_str(source)?;
        Ok(Self { overrides })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_ron(&source)
    }

    /// Load `path`, falling back to built-ins when it is missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(table) => {
                info!("Loaded {} weapon override(s) from {:?}", table.overrides.len(), path);
                table
            }
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("No weapon config at {:?}, using built-in weapons", path);
                Self::default()
            }
            Err(err) => {
                warn!("{} ({:?}), using built-in weapons", err, path);
                Self::default()
            }
        }
    }

    pub fn get(&self, kind: WeaponKind) -> WeaponConfig {
        self.overrides
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let table = WeaponTable::from_ron(
            r#"{
                Pistol: (
                    name: "Training pistol",
                    starting_ammo: 3,
                    fire_modes: [(index: 0, fire_interval: 0.25)],
                ),
            }"#,
        )
        .unwrap();

        let pistol = table.get(WeaponKind::Pistol);
        assert_eq!(pistol.name, "Training pistol");
        assert_eq!(pistol.starting_ammo, 3);
        assert_eq!(pistol.max_ammo, WeaponConfig::default().max_ammo);
        assert_eq!(pistol.fire_modes[0].fire_interval, 0.25);
        assert_eq!(pistol.fire_modes[0].ammo_cost, 1);
        assert!(pistol.fire_modes[0].is_hitscan());
    }

    #[test]
    fn test_unlisted_kinds_keep_builtins() {
        let table = WeaponTable::from_ron("{}").unwrap();
        assert_eq!(table.get(WeaponKind::Launcher), WeaponKind::Launcher.config());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = WeaponTable::from_ron("{ Pistol: (fire_modes: 3) }").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
