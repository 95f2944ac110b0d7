//! Damage calculation
//!
//! Handles distance falloff and hit zones.

use serde::{Deserialize, Serialize};

/// Body zones for hit detection with different damage multipliers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitZone {
    Head,
    #[default]
    Chest,
    Stomach,
    Legs,
}

impl HitZone {
    /// Get the base damage multiplier for this hit zone
    pub fn base_multiplier(&self) -> f32 {
        match self {
            HitZone::Head => 1.0, // Headshot mult applied separately
            HitZone::Chest => 1.0,
            HitZone::Stomach => 0.95,
            HitZone::Legs => 0.65,
        }
    }

    /// Determine hit zone based on relative hit position
    /// `relative_height` is 0.0 at feet, 1.0 at top of head
    pub fn from_relative_height(relative_height: f32) -> Self {
        if relative_height > 0.85 {
            HitZone::Head
        } else if relative_height > 0.65 {
            HitZone::Chest
        } else if relative_height > 0.35 {
            HitZone::Stomach
        } else {
            HitZone::Legs
        }
    }
}

/// Linear damage falloff over distance plus the headshot bonus
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageFalloff {
    /// Distance where falloff begins (meters)
    pub start: f32,
    /// Distance where minimum damage is reached (meters)
    pub end: f32,
    /// Multiplier at and beyond `end`
    pub min_mult: f32,
    pub headshot_mult: f32,
}

impl Default for DamageFalloff {
    fn default() -> Self {
        Self {
            start: 30.0,
            end: 120.0,
            min_mult: 0.6,
            headshot_mult: 2.0,
        }
    }
}

impl DamageFalloff {
    /// Full damage at any distance, no headshot bonus
    pub fn none() -> Self {
        Self {
            start: f32::MAX,
            end: f32::MAX,
            min_mult: 1.0,
            headshot_mult: 1.0,
        }
    }

    /// Returns a multiplier between `min_mult` and 1.0
    pub fn multiplier(&self, distance: f32) -> f32 {
        if distance <= self.start {
            1.0
        } else if distance >= self.end {
            self.min_mult
        } else {
            let t = (distance - self.start) / (self.end - self.start);
            1.0 - t * (1.0 - self.min_mult)
        }
    }
}

/// Calculate final damage for a hit
///
/// Factors in:
/// - Base damage of the fire mode
/// - Distance falloff
/// - Hit zone multiplier
/// - Headshot multiplier (if head)
pub fn calculate_damage(base: f32, falloff: &DamageFalloff, distance: f32, hit_zone: HitZone) -> f32 {
    let headshot_mult = if hit_zone == HitZone::Head {
        falloff.headshot_mult
    } else {
        1.0
    };

    base * falloff.multiplier(distance) * hit_zone.base_multiplier() * headshot_mult
}
