//! Fire mode base: Idle/Busy status, cooldown and the owner callbacks
//!
//! A fire mode never holds a reference to its weapon. The weapon lends
//! itself as a `FireModeOwner` for the duration of every call.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::basic::BasicFireMode;
use super::config::MIN_FIRE_INTERVAL;
use super::timers::Timers;

/// Shot geometry simulated by the issuer and trusted by the authority
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatedShotInfo {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Where a hitscan shot landed, for cosmetics only
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HitscanVisualInfo {
    pub impact: Vec3,
    pub normal: Vec3,
}

/// Client to authority: this fire mode fired with this geometry
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FireRequest {
    pub fire_mode: u8,
    pub shot: SimulatedShotInfo,
}

/// Authority to observers: a shot was accepted
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FireBroadcast {
    pub fire_mode: u8,
    pub hitscan: Option<HitscanVisualInfo>,
    /// Ammo left on the authority after the shot
    pub ammo: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FireModeTimer {
    Cooldown,
    DelayedFire,
}

/// State shared by every fire mode kind
#[derive(Debug)]
pub struct FireModeBase {
    pub index: u8,
    /// Seconds between two shots
    pub fire_interval: f64,
    busy: bool,
    pub(crate) timers: Timers<FireModeTimer>,
}

impl FireModeBase {
    pub fn new(index: u8, fire_interval: f64) -> Self {
        Self {
            index,
            fire_interval,
            busy: false,
            timers: Timers::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Returns true when the status actually changed.
    pub(crate) fn set_busy(&mut self, busy: bool) -> bool {
        let changed = self.busy != busy;
        self.busy = busy;
        changed
    }

    /// Remaining cooldown, 0 when idle.
    pub fn time_until_idle(&self, now: f64) -> f64 {
        if !self.busy {
            return 0.0;
        }
        self.timers
            .remaining(FireModeTimer::Cooldown, now)
            .unwrap_or(0.0)
    }

    /// When the running cooldown was armed, `None` without one.
    pub fn cooldown_start_time(&self) -> Option<f64> {
        self.timers.started_at(FireModeTimer::Cooldown)
    }

    /// Arm the cooldown for `delay` seconds, or for the next tick when the
    /// delay is not positive.
    pub(crate) fn arm_cooldown(&mut self, now: f64, delay: f64) {
        if delay >= MIN_FIRE_INTERVAL {
            self.timers.set(FireModeTimer::Cooldown, now, delay);
        } else {
            self.timers.set_for_next_tick(FireModeTimer::Cooldown, now);
        }
    }
}

/// Callbacks a fire mode needs from the weapon that owns it
pub trait FireModeOwner {
    fn now(&self) -> f64;

    fn is_authority(&self) -> bool;

    /// Called when `mode` went busy. Going idle is reported by the weapon
    /// itself once the mode is back in its slot.
    fn fire_mode_changed_status(&mut self, mode: &BasicFireMode);

    /// Seconds until `mode` may fire on the authority. Positive values
    /// delay or discard a fire request.
    fn time_until_ready_to_fire(&mut self, mode: &BasicFireMode) -> f64;

    fn simulate_shot(&mut self, mode: &BasicFireMode) -> SimulatedShotInfo;

    fn simulate_hitscan_shot(&mut self, mode: &BasicFireMode) -> (SimulatedShotInfo, HitscanVisualInfo);

    fn authority_shot(&mut self, mode: &BasicFireMode, shot: &SimulatedShotInfo);

    fn authority_hitscan_shot(&mut self, mode: &BasicFireMode, shot: &SimulatedShotInfo) -> HitscanVisualInfo;

    fn play_fire_effects(&mut self, mode: &BasicFireMode);

    fn play_hitscan_effects(&mut self, mode: &BasicFireMode, hitscan: &HitscanVisualInfo);

    fn send_fire_request(&mut self, mode: &BasicFireMode, shot: SimulatedShotInfo);

    fn broadcast_fired(&mut self, mode: &BasicFireMode, hitscan: Option<HitscanVisualInfo>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_mode_reports_zero() {
        let base = FireModeBase::new(0, 0.5);
        assert!(!base.is_busy());
        assert_eq!(base.time_until_idle(3.0), 0.0);
        assert_eq!(base.cooldown_start_time(), None);
    }

    #[test]
    fn test_busy_mode_reports_remaining_cooldown() {
        let mut base = FireModeBase::new(0, 0.5);
        assert!(base.set_busy(true));
        assert!(!base.set_busy(true));
        base.arm_cooldown(1.0, 0.5);

        assert!((base.time_until_idle(1.2) - 0.3).abs() < 1e-9);
        assert_eq!(base.cooldown_start_time(), Some(1.0));
    }

    #[test]
    fn test_vanishing_delay_cooldown_waits_for_next_tick() {
        let mut base = FireModeBase::new(0, 1e-12);
        base.set_busy(true);
        base.arm_cooldown(1.0e6, 1e-12);

        assert_eq!(base.timers.pop_due(1.0e6), None);
        base.timers.begin_tick();
        assert!(base.timers.pop_due(1.0e6).is_some());
    }

    #[test]
    fn test_zero_delay_cooldown_waits_for_next_tick() {
        let mut base = FireModeBase::new(0, 0.0);
        base.set_busy(true);
        base.arm_cooldown(1.0, 0.0);

        assert_eq!(base.timers.pop_due(1.0), None);
        base.timers.begin_tick();
        assert_eq!(base.timers.pop_due(1.0), Some((FireModeTimer::Cooldown, 1.0)));
    }
}
