//! Headless bot that drives the local weapon
//!
//! Sweeps its aim across the arena center while holding the primary fire,
//! switches to the alternate fire for short bursts, and now and then puts
//! the weapon away and brings it back.

use bevy::prelude::*;
use shared::{Health, PlayerPosition, WeaponCommand};

use crate::weapons::LocalPlayer;

/// Max yaw offset of the aim sweep, radians
const SWEEP_HALF_ANGLE: f32 = 0.5;
/// Radians per second of sweep phase
const SWEEP_SPEED: f32 = 0.8;
/// Seconds between alternate fire bursts
const ALT_FIRE_EVERY: f32 = 6.0;
/// Length of one alternate fire burst
const ALT_FIRE_FOR: f32 = 1.0;
/// Seconds between two put-downs
const HOLSTER_EVERY: f32 = 15.0;
/// Seconds the weapon stays put away
const HOLSTER_FOR: f32 = 1.5;

/// What the bot wants from its weapon this tick
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct BotInput {
    pub aim: Vec3,
    pub held_fire_mode: Option<u8>,
    pub commands: Vec<WeaponCommand>,
}

impl Default for BotInput {
    fn default() -> Self {
        Self {
            aim: Vec3::NEG_Z,
            held_fire_mode: None,
            commands: Vec::new(),
        }
    }
}

#[derive(Resource, Debug)]
pub struct BotBrain {
    sweep_phase: f32,
    alt_fire: Timer,
    alt_fire_left: f32,
    holster: Timer,
    holstered_left: Option<f32>,
    equipped: bool,
}

impl Default for BotBrain {
    fn default() -> Self {
        Self::new(rand::random::<f32>() * std::f32::consts::TAU)
    }
}

impl BotBrain {
    pub fn new(sweep_phase: f32) -> Self {
        Self {
            sweep_phase,
            alt_fire: Timer::from_seconds(ALT_FIRE_EVERY, TimerMode::Repeating),
            alt_fire_left: 0.0,
            holster: Timer::from_seconds(HOLSTER_EVERY, TimerMode::Repeating),
            holstered_left: None,
            equipped: false,
        }
    }

    /// Advance by `dt` seconds for a living or dead player at `feet`.
    pub fn step(&mut self, dt: f32, feet: Vec3, alive: bool, input: &mut BotInput) {
        if !self.equipped {
            self.equipped = true;
            input.commands.push(WeaponCommand::BringUp);
        }

        self.sweep_phase = (self.sweep_phase + SWEEP_SPEED * dt) % std::f32::consts::TAU;
        let to_center = Vec3::new(-feet.x, 0.0, -feet.z).normalize_or(Vec3::NEG_Z);
        let yaw = self.sweep_phase.sin() * SWEEP_HALF_ANGLE;
        input.aim = Quat::from_rotation_y(yaw) * to_center;

        let delta = std::time::Duration::from_secs_f32(dt.max(0.0));
        if let Some(left) = self.holstered_left {
            let left = left - dt;
            if left <= 0.0 {
                self.holstered_left = None;
                input.commands.push(WeaponCommand::BringUp);
            } else {
                self.holstered_left = Some(left);
            }
        } else if self.holster.tick(delta).just_finished() {
            self.holstered_left = Some(HOLSTER_FOR);
            input.commands.push(WeaponCommand::PutDown);
        }

        if self.alt_fire.tick(delta).just_finished() {
            self.alt_fire_left = ALT_FIRE_FOR;
        }
        self.alt_fire_left = (self.alt_fire_left - dt).max(0.0);

        input.held_fire_mode = match (alive, self.alt_fire_left > 0.0) {
            (false, _) => None,
            (true, true) => Some(1),
            (true, false) => Some(0),
        };
    }
}

/// Decide aim, fire and swaps for the local player
pub fn run_bot(
    time: Res<Time>,
    mut brain: ResMut<BotBrain>,
    mut input: ResMut<BotInput>,
    local: Query<(&PlayerPosition, &Health), With<LocalPlayer>>,
) {
    let Ok((position, health)) = local.single() else {
        return;
    };
    brain.step(time.delta_secs(), position.0, !health.is_dead(), &mut input);
}

/// Forget the last session's weapon so the next player gets equipped again
pub fn reset_bot(mut brain: ResMut<BotBrain>, mut input: ResMut<BotInput>) {
    *brain = BotBrain::default();
    *input = BotInput::default();
}
