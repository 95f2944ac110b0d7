//! Weapon state machine
//!
//! `Inactive -> BringUp -> Idle <-> Firing -> PutDown -> Inactive`, plus
//! `Busy` for external actions that lock the weapon.
//!
//! The weapon keeps its own logical clock. Every entry point first runs the
//! timers that came due since the last call, each one at its own deadline,
//! then catches up with `WeaponEnv::now`.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::basic::{BasicFireMode, ServerFireOutcome};
use super::config::{
    ShotKind, WeaponConfig, BUSY_PUT_DOWN_POLL_INTERVAL, MIN_FIRE_INTERVAL, NOT_READY_DELAY,
    OUT_OF_AMMO_RETRY_INTERVAL,
};
use super::fire_mode::{
    FireBroadcast, FireModeOwner, FireRequest, HitscanVisualInfo, SimulatedShotInfo,
};
use super::shot::{self, ShotWorld};
use super::timers::Timers;

/// Put-down delays shorter than this start the put-down right away
const MIN_PUT_DOWN_DELAY: f64 = 1e-6;

/// Which side of the connection a weapon lives on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetRole {
    /// Resolves shots, owns ammo
    Authority,
    /// Predicts its own shots or replays other shooters
    Client,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeaponState {
    #[default]
    Inactive,
    BringUp,
    Idle,
    Firing,
    PutDown,
    /// Locked by an external action
    Busy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapAnimation {
    BringUp,
    PutDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum WeaponTimer {
    SwapAnimation,
    PutDownDelay,
    RetryStartFire,
}

/// Everything a weapon needs from its host
pub trait WeaponEnv: ShotWorld {
    /// Current time in seconds
    fn now(&self) -> f64;

    fn is_locally_controlled(&self) -> bool {
        true
    }

    /// Holder is alive and controlled
    fn can_fire(&self) -> bool {
        true
    }

    /// Fire mode the holder is pressing right now
    fn held_fire_mode(&self) -> Option<u8> {
        None
    }

    fn weapon_state_changed(&mut self, _old: WeaponState, _new: WeaponState) {}

    /// `from` is the start position (0 = fully down, 1 = fully up for
    /// bring-up, the reverse for put-down), `duration` a full swap.
    fn play_swap_animation(&mut self, _swap: SwapAnimation, _from: f64, _duration: f64) {}

    fn play_fire_effects(&mut self, _fire_mode: u8) {}

    fn play_hitscan_effects(&mut self, _fire_mode: u8, _hitscan: &HitscanVisualInfo) {}

    fn play_out_of_ammo(&mut self, _fire_mode: u8) {}

    fn send_fire_request(&mut self, _request: FireRequest) {}

    fn broadcast_fired(&mut self, _fired: FireBroadcast) {}
}

#[derive(Debug)]
pub struct Weapon {
    config: WeaponConfig,
    role: NetRole,
    now: f64,
    state: WeaponState,
    ammo: u32,
    equipped: bool,
    /// Indexed by fire mode index, `None` for gaps. A slot is also empty
    /// while its fire mode is running a callback.
    fire_modes: Vec<Option<BasicFireMode>>,
    /// Requested fire modes, most recent first
    desired: Vec<u8>,
    current: Option<u8>,
    timers: Timers<WeaponTimer>,
    retry_fire_mode: Option<u8>,
}

/// A weapon lent to one of its fire modes together with the host
struct Armed<'a, E: ?Sized> {
    weapon: &'a mut Weapon,
    env: &'a mut E,
}

enum DueTimer {
    Weapon,
    FireMode(u8),
}

impl Weapon {
    pub fn new(config: WeaponConfig, role: NetRole) -> Self {
        let mut fire_modes: Vec<Option<BasicFireMode>> = Vec::new();
        for mode_config in &config.fire_modes {
            let slot = usize::from(mode_config.index);
            if fire_modes.len() <= slot {
                fire_modes.resize_with(slot + 1, || None);
            }
            if fire_modes[slot].is_some() {
                warn!(
                    "{}: duplicate fire mode index {}, ignoring",
                    config.name, mode_config.index
                );
                continue;
            }
            if f64::from(mode_config.fire_interval) < MIN_FIRE_INTERVAL {
                warn!(
                    "{}: fire mode {} has no fire interval, cooldown lasts one tick",
                    config.name, mode_config.index
                );
            }
            fire_modes[slot] = Some(BasicFireMode::new(mode_config.clone()));
        }

        Self {
            ammo: config.starting_ammo.min(config.max_ammo),
            config,
            role,
            now: 0.0,
            state: WeaponState::Inactive,
            equipped: false,
            fire_modes,
            desired: Vec::new(),
            current: None,
            timers: Timers::new(),
            retry_fire_mode: None,
        }
    }

    pub fn config(&self) -> &WeaponConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> WeaponState {
        self.state
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn ammo(&self) -> u32 {
        self.ammo
    }

    pub fn set_ammo(&mut self, ammo: u32) {
        self.ammo = ammo.min(self.config.max_ammo);
    }

    pub fn has_enough_ammo(&self, cost: u32) -> bool {
        self.ammo >= cost
    }

    fn consume_ammo(&mut self, cost: u32) {
        self.ammo = self.ammo.saturating_sub(cost);
    }

    pub fn is_equipped(&self) -> bool {
        self.equipped
    }

    pub fn current_fire_mode(&self) -> Option<u8> {
        self.current
    }

    pub fn desired_fire_modes(&self) -> &[u8] {
        &self.desired
    }

    pub fn fire_mode(&self, index: u8) -> Option<&BasicFireMode> {
        self.fire_modes.get(usize::from(index))?.as_ref()
    }

    /// Seconds until a deferred put-down is re-checked
    pub fn pending_put_down(&self) -> Option<f64> {
        self.timers.remaining(WeaponTimer::PutDownDelay, self.now)
    }

    /// Seconds left on the running swap animation
    pub fn swap_remaining(&self) -> Option<f64> {
        self.timers.remaining(WeaponTimer::SwapAnimation, self.now)
    }

    // Host entry points

    /// Once per host frame: release next-tick timers and run due timers.
    pub fn tick<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        self.timers.begin_tick();
        for mode in self.fire_modes.iter_mut().flatten() {
            mode.begin_tick();
        }
        self.advance(env);
    }

    pub fn set_equipped<E: WeaponEnv + ?Sized>(&mut self, equipped: bool, env: &mut E) {
        self.advance(env);
        self.equipped = equipped;
        if equipped {
            self.bring_up_requested(env);
        } else {
            self.timers.clear(WeaponTimer::SwapAnimation);
            self.timers.clear(WeaponTimer::PutDownDelay);
            self.set_weapon_state(WeaponState::Inactive, env);
        }
    }

    pub fn request_start_fire<E: WeaponEnv + ?Sized>(&mut self, index: u8, env: &mut E) {
        self.advance(env);
        self.start_fire_requested(index, env);
    }

    pub fn request_stop_fire<E: WeaponEnv + ?Sized>(&mut self, index: u8, env: &mut E) {
        self.advance(env);
        let Some(Some(mode)) = self.fire_modes.get_mut(usize::from(index)) else {
            return;
        };
        self.desired.retain(|&desired| desired != index);
        if mode.is_busy() {
            mode.stop_fire();
        }
    }

    pub fn request_bring_up<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        self.advance(env);
        self.bring_up_requested(env);
    }

    pub fn request_put_down<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        self.advance(env);
        self.put_down_requested(env);
    }

    /// Lock the weapon for an external action, or release it.
    pub fn set_busy<E: WeaponEnv + ?Sized>(&mut self, busy: bool, env: &mut E) {
        self.advance(env);
        match (busy, self.state) {
            (true, WeaponState::Idle | WeaponState::Firing) => {
                self.set_weapon_state(WeaponState::Busy, env)
            }
            (false, WeaponState::Busy) => self.set_weapon_state(WeaponState::Idle, env),
            _ => {}
        }
    }

    /// Authority: a client asked to fire. Invalid fire modes are discarded.
    pub fn receive_fire_request<E: WeaponEnv + ?Sized>(
        &mut self,
        request: FireRequest,
        env: &mut E,
    ) -> ServerFireOutcome {
        self.advance(env);
        if self.role != NetRole::Authority {
            return ServerFireOutcome::Discarded;
        }
        self.with_fire_mode(request.fire_mode, env, |mode, owner| {
            mode.server_fire(owner, request.shot)
        })
        .unwrap_or(ServerFireOutcome::Discarded)
    }

    /// Client: the authority accepted a shot of this weapon.
    pub fn receive_fire_broadcast<E: WeaponEnv + ?Sized>(&mut self, fired: FireBroadcast, env: &mut E) {
        self.advance(env);
        if self.role == NetRole::Authority {
            return;
        }
        self.ammo = fired.ammo.min(self.config.max_ammo);

        let went_idle = self
            .with_fire_mode(fired.fire_mode, env, |mode, owner| {
                mode.multicast_fired(owner, fired.hitscan)
            })
            .unwrap_or(false);
        if went_idle {
            self.fire_mode_went_idle(fired.fire_mode, env);
        }
    }

    /// How long until `index` could fire, as the authority sees it.
    pub fn time_until_ready_to_fire(&self, index: u8) -> f64 {
        match self.fire_mode(index) {
            Some(mode) => self.readiness(mode),
            None => NOT_READY_DELAY,
        }
    }

    // Timers

    fn advance<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        let target = env.now().max(self.now);

        loop {
            let mut next = self
                .timers
                .peek_due(target)
                .map(|deadline| (deadline, DueTimer::Weapon));
            for (slot, mode) in self.fire_modes.iter_mut().enumerate() {
                let Some(deadline) = mode.as_mut().and_then(|mode| mode.peek_due(target)) else {
                    continue;
                };
                if next.as_ref().map_or(true, |(best, _)| deadline < *best) {
                    next = Some((deadline, DueTimer::FireMode(slot as u8)));
                }
            }

            let Some((deadline, due)) = next else {
                break;
            };
            self.now = deadline.max(self.now);

            match due {
                DueTimer::Weapon => {
                    if let Some((timer, _)) = self.timers.pop_due(deadline) {
                        self.weapon_timer(timer, env);
                    }
                }
                DueTimer::FireMode(index) => {
                    let went_idle = self
                        .with_fire_mode(index, env, |mode, owner| {
                            mode.run_due_timer(owner, deadline)
                        })
                        .flatten()
                        .unwrap_or(false);
                    if went_idle {
                        self.fire_mode_went_idle(index, env);
                    }
                }
            }
        }

        self.now = target;
    }

    fn weapon_timer<E: WeaponEnv + ?Sized>(&mut self, timer: WeaponTimer, env: &mut E) {
        match timer {
            WeaponTimer::SwapAnimation => match self.state {
                WeaponState::BringUp => self.bring_up_finished(env),
                WeaponState::PutDown => self.put_down_finished(env),
                _ => {}
            },
            WeaponTimer::PutDownDelay => self.put_down_requested(env),
            WeaponTimer::RetryStartFire => {
                let Some(index) = self.retry_fire_mode else {
                    return;
                };
                if self.desired.first() == Some(&index) {
                    self.try_start_fire(index, env);
                }
            }
        }
    }

    // State machine

    fn set_weapon_state<E: WeaponEnv + ?Sized>(&mut self, new_state: WeaponState, env: &mut E) {
        if new_state != self.state {
            let old_state = self.state;
            self.state = new_state;
            debug!("{}: {:?} -> {:?}", self.config.name, old_state, new_state);
            env.weapon_state_changed(old_state, new_state);
        }

        match self.state {
            WeaponState::BringUp => {
                if env.is_locally_controlled() {
                    if let Some(index) = env.held_fire_mode() {
                        self.start_fire_requested(index, env);
                    }
                }
            }
            WeaponState::Idle => {
                if self.timers.is_active(WeaponTimer::PutDownDelay) {
                    self.timers.clear(WeaponTimer::PutDownDelay);
                    self.put_down_requested(env);
                } else if let Some(&index) = self.desired.first() {
                    self.try_start_fire(index, env);
                }
            }
            WeaponState::PutDown | WeaponState::Inactive => self.stop_all_fire(),
            WeaponState::Firing | WeaponState::Busy => {}
        }
    }

    fn bring_up<E: WeaponEnv + ?Sized>(&mut self, from: f64, env: &mut E) {
        self.timers.clear(WeaponTimer::SwapAnimation);
        self.set_weapon_state(WeaponState::BringUp, env);

        let duration = f64::from(self.config.bring_up_time);
        env.play_swap_animation(SwapAnimation::BringUp, from, duration);

        let delay = (1.0 - from) * duration;
        if delay > 0.0 {
            self.timers.set(WeaponTimer::SwapAnimation, self.now, delay);
        } else {
            self.bring_up_finished(env);
        }
    }

    fn bring_up_finished<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        if self.state != WeaponState::BringUp {
            return;
        }
        // Swaps can be faster than cooldowns.
        let still_busy = self
            .current
            .and_then(|index| self.fire_mode(index))
            .is_some_and(|mode| mode.is_busy());
        if still_busy {
            self.set_weapon_state(WeaponState::Firing, env);
        } else {
            self.set_weapon_state(WeaponState::Idle, env);
        }
    }

    fn put_down<E: WeaponEnv + ?Sized>(&mut self, from: f64, env: &mut E) {
        self.timers.clear(WeaponTimer::SwapAnimation);
        self.set_weapon_state(WeaponState::PutDown, env);

        let duration = f64::from(self.config.put_down_time);
        env.play_swap_animation(SwapAnimation::PutDown, from, duration);

        let delay = from * duration;
        if delay > 0.0 {
            self.timers.set(WeaponTimer::SwapAnimation, self.now, delay);
        } else {
            self.put_down_finished(env);
        }
    }

    fn put_down_finished<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        if self.state == WeaponState::PutDown {
            self.set_weapon_state(WeaponState::Inactive, env);
        }
    }

    fn bring_up_requested<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        self.timers.clear(WeaponTimer::PutDownDelay);

        match self.state {
            WeaponState::Inactive => self.bring_up(0.0, env),
            WeaponState::PutDown => {
                let remaining = self.swap_remaining().unwrap_or(0.0);
                let from = fraction(remaining, f64::from(self.config.put_down_time));
                self.bring_up(from, env);
            }
            _ => {}
        }
    }

    fn put_down_requested<E: WeaponEnv + ?Sized>(&mut self, env: &mut E) {
        match self.state {
            WeaponState::BringUp => {
                let remaining = self.swap_remaining().unwrap_or(0.0);
                let from = 1.0 - fraction(remaining, f64::from(self.config.bring_up_time));
                self.put_down(from, env);
            }
            WeaponState::Idle => self.put_down(1.0, env),
            WeaponState::Firing => {
                let delay = self.put_down_delay();
                if delay > MIN_PUT_DOWN_DELAY {
                    // Re-checked when the timer runs, bring-up cancels it.
                    self.timers.set(WeaponTimer::PutDownDelay, self.now, delay);
                } else {
                    self.put_down(1.0, env);
                }
            }
            WeaponState::Busy => {
                self.timers
                    .set(WeaponTimer::PutDownDelay, self.now, BUSY_PUT_DOWN_POLL_INTERVAL);
            }
            WeaponState::PutDown | WeaponState::Inactive => {}
        }
    }

    /// Seconds until the current cooldown allows a put-down
    fn put_down_delay(&self) -> f64 {
        let Some(mode) = self.current.and_then(|index| self.fire_mode(index)) else {
            return 0.0;
        };
        let Some(cooldown_start) = mode.cooldown_start_time() else {
            return 0.0;
        };
        let percent = f64::from(self.config.cooldown_delays_put_down_by_percent);
        let remaining = mode.time_until_idle(self.now);
        if remaining <= 0.0 || percent <= 0.0 {
            return 0.0;
        }

        let total_cooldown = (self.now - cooldown_start) + remaining;
        let mut total_delay = total_cooldown * percent;
        if self.config.reduce_put_down_delay_by_put_down_time {
            total_delay -= f64::from(self.config.put_down_time);
        }
        cooldown_start + total_delay - self.now
    }

    fn stop_all_fire(&mut self) {
        self.desired.clear();
        if let Some(index) = self.current {
            if let Some(Some(mode)) = self.fire_modes.get_mut(usize::from(index)) {
                mode.stop_fire();
            }
        }
    }

    fn start_fire_requested<E: WeaponEnv + ?Sized>(&mut self, index: u8, env: &mut E) {
        if self.fire_mode(index).is_none() {
            return;
        }
        self.desired.retain(|&desired| desired != index);
        self.desired.insert(0, index);
        self.try_start_fire(index, env);
    }

    fn try_start_fire<E: WeaponEnv + ?Sized>(&mut self, index: u8, env: &mut E) {
        if self.state != WeaponState::Idle {
            return;
        }
        if !self.equipped || !env.can_fire() {
            self.desired.clear();
            return;
        }
        let Some(cost) = self.fire_mode(index).map(|mode| mode.ammo_cost()) else {
            return;
        };

        if self.has_enough_ammo(cost) {
            self.with_fire_mode(index, env, |mode, owner| mode.start_fire(owner));
            return;
        }

        // Keep polling while the holder keeps asking for this mode.
        if self.retry_fire_mode == Some(index) && self.timers.is_active(WeaponTimer::RetryStartFire) {
            return;
        }
        debug!("{}: out of ammo for fire mode {}", self.config.name, index);
        env.play_out_of_ammo(index);
        self.retry_fire_mode = Some(index);
        self.timers
            .set(WeaponTimer::RetryStartFire, self.now, OUT_OF_AMMO_RETRY_INTERVAL);
    }

    fn fire_mode_went_idle<E: WeaponEnv + ?Sized>(&mut self, index: u8, env: &mut E) {
        if self.current != Some(index) {
            return;
        }
        self.current = None;
        if self.state == WeaponState::Firing {
            self.set_weapon_state(WeaponState::Idle, env);
        }
    }

    fn readiness(&self, mode: &BasicFireMode) -> f64 {
        let mut delay = match self.state {
            WeaponState::BringUp => self.swap_remaining().unwrap_or(0.0),
            WeaponState::Idle => 0.0,
            WeaponState::Firing => match self.current {
                Some(index) if index == mode.index() => mode.time_until_idle(self.now),
                Some(index) => self
                    .fire_mode(index)
                    .map_or(0.0, |current| current.time_until_idle(self.now)),
                None => 0.0,
            },
            WeaponState::PutDown | WeaponState::Inactive | WeaponState::Busy => NOT_READY_DELAY,
        };
        if delay <= 0.0 && !self.has_enough_ammo(mode.ammo_cost()) {
            delay = NOT_READY_DELAY;
        }
        delay
    }

    /// Take fire mode `index` out of its slot and run `f` with it and this
    /// weapon as its owner.
    fn with_fire_mode<E, R>(
        &mut self,
        index: u8,
        env: &mut E,
        f: impl FnOnce(&mut BasicFireMode, &mut dyn FireModeOwner) -> R,
    ) -> Option<R>
    where
        E: WeaponEnv + ?Sized,
    {
        let slot = usize::from(index);
        let mut mode = self.fire_modes.get_mut(slot)?.take()?;
        let mut owner = Armed { weapon: self, env };
        let result = f(&mut mode, &mut owner);
        self.fire_modes[slot] = Some(mode);
        Some(result)
    }
}

fn fraction(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl<E: WeaponEnv + ?Sized> FireModeOwner for Armed<'_, E> {
    fn now(&self) -> f64 {
        self.weapon.now
    }

    fn is_authority(&self) -> bool {
        self.weapon.role == NetRole::Authority
    }

    fn fire_mode_changed_status(&mut self, mode: &BasicFireMode) {
        if mode.is_busy() {
            self.weapon.current = Some(mode.index());
            self.weapon.set_weapon_state(WeaponState::Firing, &mut *self.env);
        }
    }

    fn time_until_ready_to_fire(&mut self, mode: &BasicFireMode) -> f64 {
        self.weapon.readiness(mode)
    }

    fn simulate_shot(&mut self, mode: &BasicFireMode) -> SimulatedShotInfo {
        match &mode.config().shot {
            ShotKind::Projectile(config) => shot::simulate_shot(&*self.env, config),
            ShotKind::Hitscan(_) => {
                let (origin, direction) = shot::fire_vector(&*self.env);
                SimulatedShotInfo { origin, direction }
            }
        }
    }

    fn simulate_hitscan_shot(&mut self, mode: &BasicFireMode) -> (SimulatedShotInfo, HitscanVisualInfo) {
        match &mode.config().shot {
            ShotKind::Hitscan(config) => shot::simulate_hitscan_shot(&*self.env, config),
            ShotKind::Projectile(_) => (self.simulate_shot(mode), HitscanVisualInfo::default()),
        }
    }

    fn authority_shot(&mut self, mode: &BasicFireMode, simulated: &SimulatedShotInfo) {
        self.weapon.consume_ammo(mode.ammo_cost());
        if let ShotKind::Projectile(config) = &mode.config().shot {
            let policy = self.weapon.config.shot_origin;
            shot::authority_shot(&mut *self.env, policy, mode.index(), config, simulated);
        }
    }

    fn authority_hitscan_shot(
        &mut self,
        mode: &BasicFireMode,
        simulated: &SimulatedShotInfo,
    ) -> HitscanVisualInfo {
        self.weapon.consume_ammo(mode.ammo_cost());
        match &mode.config().shot {
            ShotKind::Hitscan(config) => {
                let policy = self.weapon.config.shot_origin;
                shot::authority_hitscan_shot(&mut *self.env, policy, config, simulated)
            }
            ShotKind::Projectile(_) => HitscanVisualInfo::default(),
        }
    }

    fn play_fire_effects(&mut self, mode: &BasicFireMode) {
        self.env.play_fire_effects(mode.index());
    }

    fn play_hitscan_effects(&mut self, mode: &BasicFireMode, hitscan: &HitscanVisualInfo) {
        self.env.play_hitscan_effects(mode.index(), hitscan);
    }

    fn send_fire_request(&mut self, mode: &BasicFireMode, simulated: SimulatedShotInfo) {
        self.env.send_fire_request(FireRequest {
            fire_mode: mode.index(),
            shot: simulated,
        });
    }

    fn broadcast_fired(&mut self, mode: &BasicFireMode, hitscan: Option<HitscanVisualInfo>) {
        info!(
            "{}: fire mode {} fired, {} ammo left",
            self.weapon.config.name,
            mode.index(),
            self.weapon.ammo
        );
        self.env.broadcast_fired(FireBroadcast {
            fire_mode: mode.index(),
            hitscan,
            ammo: self.weapon.ammo,
        });
    }
}
