//! Basic fire mode: one shot per activation, predicted by the issuer and
//! confirmed by the authority
//!
//! Issuer: go busy, simulate the shot, play effects, arm the local cooldown
//! and send the simulated geometry to the authority.
//!
//! Authority: ask the weapon how long until it could fire. Late requests
//! within `min(MAX_FIRE_DELAY, fire_interval / 2)` are re-checked after that
//! delay, anything later is dropped. Accepted shots are resolved, broadcast
//! and start the authoritative cooldown.
//!
//! Observers: the issuer re-times its cooldown from the observed round trip,
//! everybody else plays the effects.

use bevy::prelude::*;

use super::config::{FireModeConfig, MAX_FIRE_DELAY};
use super::fire_mode::{
    FireModeBase, FireModeOwner, FireModeTimer, HitscanVisualInfo, SimulatedShotInfo,
};

/// What the authority did with a fire request
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServerFireOutcome {
    Accepted,
    /// Re-checked after this many seconds
    Delayed(f64),
    Discarded,
}

#[derive(Debug)]
pub struct BasicFireMode {
    base: FireModeBase,
    config: FireModeConfig,
    /// When this side last predicted a shot
    local_fire_time: Option<f64>,
    /// Geometry of a request waiting on the delayed-fire timer
    pending_shot: Option<SimulatedShotInfo>,
}

impl BasicFireMode {
    pub fn new(config: FireModeConfig) -> Self {
        Self {
            base: FireModeBase::new(config.index, f64::from(config.fire_interval)),
            config,
            local_fire_time: None,
            pending_shot: None,
        }
    }

    pub fn index(&self) -> u8 {
        self.base.index
    }

    pub fn config(&self) -> &FireModeConfig {
        &self.config
    }

    pub fn is_hitscan(&self) -> bool {
        self.config.is_hitscan()
    }

    pub fn ammo_cost(&self) -> u32 {
        self.config.ammo_cost
    }

    pub fn fire_interval(&self) -> f64 {
        self.base.fire_interval
    }

    pub fn is_busy(&self) -> bool {
        self.base.is_busy()
    }

    pub fn time_until_idle(&self, now: f64) -> f64 {
        self.base.time_until_idle(now)
    }

    pub fn cooldown_start_time(&self) -> Option<f64> {
        self.base.cooldown_start_time()
    }

    /// Longest wait the authority bridges for a late request
    pub fn max_fire_delay(&self) -> f64 {
        MAX_FIRE_DELAY.min(self.base.fire_interval / 2.0)
    }

    /// Start one shot. Returns false when already busy.
    pub fn start_fire<O: FireModeOwner + ?Sized>(&mut self, owner: &mut O) -> bool {
        if self.base.is_busy() {
            return false;
        }

        if owner.is_authority() {
            // The holder lives on the authority: no prediction, no request.
            let shot = self.simulate(owner).0;
            let hitscan = self.fire_confirmed(owner, shot);
            self.play_effects(owner, hitscan.as_ref());
            return true;
        }

        self.base.set_busy(true);
        owner.fire_mode_changed_status(self);

        let (shot, hitscan) = self.simulate(owner);
        self.play_effects(owner, hitscan.as_ref());

        let now = owner.now();
        self.local_fire_time = Some(now);
        self.base.arm_cooldown(now, self.base.fire_interval);
        owner.send_fire_request(self, shot);
        true
    }

    /// The cooldown keeps running, a basic shot cannot be interrupted.
    pub fn stop_fire(&mut self) {}

    fn simulate<O: FireModeOwner + ?Sized>(
        &self,
        owner: &mut O,
    ) -> (SimulatedShotInfo, Option<HitscanVisualInfo>) {
        if self.is_hitscan() {
            let (shot, hitscan) = owner.simulate_hitscan_shot(self);
            (shot, Some(hitscan))
        } else {
            (owner.simulate_shot(self), None)
        }
    }

    /// Authority side of a fire request.
    pub fn server_fire<O: FireModeOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        shot: SimulatedShotInfo,
    ) -> ServerFireOutcome {
        let delay = owner.time_until_ready_to_fire(self);
        let max_delay = self.max_fire_delay();

        if delay > max_delay {
            debug!(
                "Fire mode {} discarded shot, not ready for {:.3}s (max {:.3}s)",
                self.index(),
                delay,
                max_delay
            );
            return ServerFireOutcome::Discarded;
        }

        if delay > 0.0 {
            debug!("Fire mode {} delaying shot by {:.3}s", self.index(), delay);
            self.pending_shot = Some(shot);
            self.base
                .timers
                .set(FireModeTimer::DelayedFire, owner.now(), delay);
            return ServerFireOutcome::Delayed(delay);
        }

        self.fire_confirmed(owner, shot);
        ServerFireOutcome::Accepted
    }

    fn fire_confirmed<O: FireModeOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        shot: SimulatedShotInfo,
    ) -> Option<HitscanVisualInfo> {
        if self.base.set_busy(true) {
            owner.fire_mode_changed_status(self);
        }

        let hitscan = if self.is_hitscan() {
            Some(owner.authority_hitscan_shot(self, &shot))
        } else {
            owner.authority_shot(self, &shot);
            None
        };
        owner.broadcast_fired(self, hitscan);

        let now = owner.now();
        self.base.arm_cooldown(now, self.base.fire_interval);
        hitscan
    }

    /// An authority broadcast for this fire mode arrived.
    /// Returns true when the mode went idle.
    pub fn multicast_fired<O: FireModeOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        hitscan: Option<HitscanVisualInfo>,
    ) -> bool {
        if owner.is_authority() {
            return false;
        }

        if self.local_fire_time.is_some() {
            return self.local_confirm_fired(owner.now());
        }

        self.play_effects(owner, hitscan.as_ref());
        false
    }

    /// Muzzle effects for every shot, impact effects on top for hitscan.
    fn play_effects<O: FireModeOwner + ?Sized>(
        &self,
        owner: &mut O,
        hitscan: Option<&HitscanVisualInfo>,
    ) {
        owner.play_fire_effects(self);
        if let Some(hitscan) = hitscan {
            owner.play_hitscan_effects(self, hitscan);
        }
    }

    /// Re-time the local cooldown so the next shot reaches the authority
    /// just after its own cooldown ends.
    fn local_confirm_fired(&mut self, now: f64) -> bool {
        let Some(fired_at) = self.local_fire_time else {
            return false;
        };
        if !self.base.is_busy() {
            return false;
        }

        let ping = (now - fired_at).max(0.0);
        let delay = self.base.fire_interval - ping / 2.0;
        if delay > 0.0 {
            self.base.arm_cooldown(now, delay);
            false
        } else {
            self.base.timers.clear(FireModeTimer::Cooldown);
            self.base.set_busy(false)
        }
    }

    /// Returns true when the mode went idle.
    fn cooldown_timer(&mut self) -> bool {
        self.base.set_busy(false)
    }

    fn delayed_fire_timer<O: FireModeOwner + ?Sized>(&mut self, owner: &mut O) {
        if let Some(shot) = self.pending_shot.take() {
            self.server_fire(owner, shot);
        }
    }

    pub(crate) fn begin_tick(&mut self) {
        self.base.timers.begin_tick();
    }

    pub(crate) fn peek_due(&mut self, now: f64) -> Option<f64> {
        self.base.timers.peek_due(now)
    }

    /// Run the earliest timer due at or before `now`.
    /// Returns `None` when nothing was due, else whether the mode went idle.
    pub(crate) fn run_due_timer<O: FireModeOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        now: f64,
    ) -> Option<bool> {
        let (timer, _) = self.base.timers.pop_due(now)?;
        let went_idle = match timer {
            FireModeTimer::Cooldown => self.cooldown_timer(),
            FireModeTimer::DelayedFire => {
                self.delayed_fire_timer(owner);
                false
            }
        };
        Some(went_idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weapons::config::{ProjectileConfig, ShotKind};

    #[derive(Debug, PartialEq)]
    enum Event {
        Busy(u8),
        Effects(u8),
        HitscanEffects(u8),
        Request(u8),
        AuthorityShot(u8),
        Broadcast(u8),
    }

    struct MockOwner {
        now: f64,
        authority: bool,
        ready_in: f64,
        events: Vec<Event>,
    }

    impl MockOwner {
        fn new(authority: bool) -> Self {
            Self {
                now: 0.0,
                authority,
                ready_in: 0.0,
                events: Vec::new(),
            }
        }

        fn count(&self, wanted: fn(&Event) -> bool) -> usize {
            self.events.iter().filter(|event| wanted(event)).count()
        }
    }

    impl FireModeOwner for MockOwner {
        fn now(&self) -> f64 {
            self.now
        }

        fn is_authority(&self) -> bool {
            self.authority
        }

        fn fire_mode_changed_status(&mut self, mode: &BasicFireMode) {
            assert!(mode.is_busy());
            self.events.push(Event::Busy(mode.index()));
        }

        fn time_until_ready_to_fire(&mut self, _mode: &BasicFireMode) -> f64 {
            self.ready_in
        }

        fn simulate_shot(&mut self, _mode: &BasicFireMode) -> SimulatedShotInfo {
            SimulatedShotInfo {
                origin: Vec3::ZERO,
                direction: Vec3::NEG_Z,
            }
        }

        fn simulate_hitscan_shot(
            &mut self,
            mode: &BasicFireMode,
        ) -> (SimulatedShotInfo, HitscanVisualInfo) {
            (self.simulate_shot(mode), HitscanVisualInfo::default())
        }

        fn authority_shot(&mut self, mode: &BasicFireMode, _shot: &SimulatedShotInfo) {
            self.events.push(Event::AuthorityShot(mode.index()));
        }

        fn authority_hitscan_shot(
            &mut self,
            mode: &BasicFireMode,
            _shot: &SimulatedShotInfo,
        ) -> HitscanVisualInfo {
            self.events.push(Event::AuthorityShot(mode.index()));
            HitscanVisualInfo::default()
        }

        fn play_fire_effects(&mut self, mode: &BasicFireMode) {
            self.events.push(Event::Effects(mode.index()));
        }

        fn play_hitscan_effects(&mut self, mode: &BasicFireMode, _hitscan: &HitscanVisualInfo) {
            self.events.push(Event::HitscanEffects(mode.index()));
        }

        fn send_fire_request(&mut self, mode: &BasicFireMode, _shot: SimulatedShotInfo) {
            self.events.push(Event::Request(mode.index()));
        }

        fn broadcast_fired(&mut self, mode: &BasicFireMode, _hitscan: Option<HitscanVisualInfo>) {
            self.events.push(Event::Broadcast(mode.index()));
        }
    }

    fn hitscan_mode(interval: f32) -> BasicFireMode {
        BasicFireMode::new(FireModeConfig {
            index: 0,
            fire_interval: interval,
            ..Default::default()
        })
    }

    fn projectile_mode(interval: f32) -> BasicFireMode {
        BasicFireMode::new(FireModeConfig {
            index: 1,
            fire_interval: interval,
            shot: ShotKind::Projectile(ProjectileConfig::default()),
            ..Default::default()
        })
    }

    fn advance(mode: &mut BasicFireMode, owner: &mut MockOwner, to: f64) -> bool {
        let mut went_idle = false;
        mode.begin_tick();
        while let Some(deadline) = mode.peek_due(to) {
            owner.now = deadline;
            went_idle |= mode.run_due_timer(owner, deadline).unwrap_or(false);
        }
        owner.now = to;
        went_idle
    }

    #[test]
    fn test_start_fire_predicts_and_requests() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(false);

        assert!(mode.start_fire(&mut owner));
        assert!(mode.is_busy());
        assert_eq!(
            owner.events,
            vec![
                Event::Busy(0),
                Event::Effects(0),
                Event::HitscanEffects(0),
                Event::Request(0)
            ]
        );
        assert_eq!(mode.local_fire_time, Some(0.0));
        assert_eq!(mode.cooldown_start_time(), Some(0.0));
    }

    #[test]
    fn test_start_fire_while_busy_is_noop() {
        let mut mode = projectile_mode(0.5);
        let mut owner = MockOwner::new(false);

        assert!(mode.start_fire(&mut owner));
        owner.now = 0.2;
        assert!(!mode.start_fire(&mut owner));
        assert_eq!(owner.count(|event| matches!(event, Event::Request(_))), 1);
        assert_eq!(mode.cooldown_start_time(), Some(0.0));
    }

    #[test]
    fn test_busy_until_single_cooldown_expiry() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(false);
        mode.start_fire(&mut owner);

        assert!(!advance(&mut mode, &mut owner, 0.49));
        assert!(mode.is_busy());
        assert!((mode.time_until_idle(0.49) - 0.01).abs() < 1e-9);

        assert!(advance(&mut mode, &mut owner, 0.5));
        assert!(!mode.is_busy());
        assert_eq!(mode.time_until_idle(0.5), 0.0);
    }

    #[test]
    fn test_max_fire_delay_is_capped_by_half_interval() {
        assert!((hitscan_mode(1.0).max_fire_delay() - 0.2).abs() < 1e-9);
        assert!((hitscan_mode(0.2).max_fire_delay() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_server_fire_accepts_when_ready() {
        let mut mode = projectile_mode(0.5);
        let mut owner = MockOwner::new(true);
        let shot = SimulatedShotInfo::default();

        assert_eq!(mode.server_fire(&mut owner, shot), ServerFireOutcome::Accepted);
        assert!(mode.is_busy());
        assert_eq!(
            owner.events,
            vec![Event::Busy(1), Event::AuthorityShot(1), Event::Broadcast(1)]
        );
        assert_eq!(mode.cooldown_start_time(), Some(0.0));
    }

    #[test]
    fn test_server_fire_discards_late_request() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(true);
        owner.ready_in = 0.21;

        let outcome = mode.server_fire(&mut owner, SimulatedShotInfo::default());
        assert_eq!(outcome, ServerFireOutcome::Discarded);
        assert!(owner.events.is_empty());
        assert!(!mode.pending_shot.is_some());
    }

    #[test]
    fn test_server_fire_delays_then_accepts() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(true);
        owner.ready_in = 0.15;

        let outcome = mode.server_fire(&mut owner, SimulatedShotInfo::default());
        assert_eq!(outcome, ServerFireOutcome::Delayed(0.15));
        assert!(mode.pending_shot.is_some());
        assert!(owner.events.is_empty());

        owner.ready_in = 0.0;
        advance(&mut mode, &mut owner, 0.2);
        assert!(!mode.pending_shot.is_some());
        assert_eq!(owner.count(|event| matches!(event, Event::Broadcast(_))), 1);
        assert_eq!(mode.cooldown_start_time(), Some(0.15));
    }

    #[test]
    fn test_issuer_retimes_cooldown_from_ping() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(false);
        mode.start_fire(&mut owner);

        // Round trip of 0.2s: next shot allowed 0.4s after the confirm.
        owner.now = 0.2;
        assert!(!mode.multicast_fired(&mut owner, Some(HitscanVisualInfo::default())));
        assert!((mode.time_until_idle(0.2) - 0.4).abs() < 1e-9);
        assert_eq!(owner.count(|event| matches!(event, Event::HitscanEffects(_))), 1);

        assert!(!advance(&mut mode, &mut owner, 0.55));
        assert!(advance(&mut mode, &mut owner, 0.61));
    }

    #[test]
    fn test_issuer_goes_idle_on_huge_ping() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(false);
        mode.start_fire(&mut owner);
        mode.begin_tick();

        // Confirm arrives before the local cooldown timer ran.
        owner.now = 1.2;
        assert!(mode.multicast_fired(&mut owner, None));
        assert!(!mode.is_busy());
        assert!(mode.peek_due(10.0).is_none());
    }

    #[test]
    fn test_third_party_plays_effects() {
        let mut mode = projectile_mode(0.5);
        let mut owner = MockOwner::new(false);

        assert!(!mode.multicast_fired(&mut owner, None));
        assert_eq!(owner.events, vec![Event::Effects(1)]);
        assert!(!mode.is_busy());
    }

    #[test]
    fn test_third_party_hitscan_plays_muzzle_and_impact() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(false);

        assert!(!mode.multicast_fired(&mut owner, Some(HitscanVisualInfo::default())));
        assert_eq!(owner.events, vec![Event::Effects(0), Event::HitscanEffects(0)]);
    }

    #[test]
    fn test_authority_ignores_multicast() {
        let mut mode = projectile_mode(0.5);
        let mut owner = MockOwner::new(true);

        assert!(!mode.multicast_fired(&mut owner, None));
        assert!(owner.events.is_empty());
    }

    #[test]
    fn test_authority_start_fire_resolves_directly() {
        let mut mode = hitscan_mode(0.5);
        let mut owner = MockOwner::new(true);

        assert!(mode.start_fire(&mut owner));
        assert_eq!(
            owner.events,
            vec![
                Event::Busy(0),
                Event::AuthorityShot(0),
                Event::Broadcast(0),
                Event::Effects(0),
                Event::HitscanEffects(0)
            ]
        );
        assert_eq!(mode.local_fire_time, None);
    }
}
