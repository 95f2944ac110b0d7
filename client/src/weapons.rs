//! Client-side weapons
//!
//! The local player gets a predicting `Weapon`: shots play at once and are
//! sent to the server, whose broadcasts re-time the cooldown. Every other
//! player gets an observer replica that only plays effects for their
//! confirmed shots.

use bevy::prelude::*;
use lightyear::prelude::*;

use shared::hitbox::{ground_trace, sweep_targets, CapsuleTarget};
use shared::weapons::{HitscanVisualInfo, ShotWorld, SwapAnimation, TraceHit};
use shared::{
    peer_id_to_u64, AimInput, EquippedWeapon, FireRequest, Health, InputChannel, NetRole, Player,
    PlayerPosition, ReliableChannel, Weapon, WeaponAmmo, WeaponCommand, WeaponEnv, WeaponFired,
    WeaponState, WeaponTable, EYE_HEIGHT,
};

use crate::bot::BotInput;
use crate::systems::LocalClientId;

/// Marks the player entity controlled by this client
#[derive(Component, Debug)]
pub struct LocalPlayer;

/// Predicting weapon of the local player
#[derive(Component, Debug)]
pub struct PredictedWeapon(pub Weapon);

/// Observer copy of another player's weapon
#[derive(Component, Debug)]
pub struct ReplicaWeapon(pub Weapon);

/// Messages produced by the local weapon this tick
#[derive(Resource, Default, Debug)]
pub struct WeaponOutbox {
    pub requests: Vec<FireRequest>,
    pub commands: Vec<WeaponCommand>,
}

/// Cosmetic effects played so far
#[derive(Resource, Default, Debug, Clone, PartialEq)]
pub struct EffectStats {
    pub predicted_shots: u32,
    pub observed_shots: u32,
    pub out_of_ammo: u32,
}

/// Host side of a client weapon for the duration of a call
struct ClientWeaponEnv<'a> {
    now: f64,
    holder: u64,
    feet: Vec3,
    aim: Vec3,
    alive: bool,
    local: bool,
    held_fire_mode: Option<u8>,
    targets: &'a [CapsuleTarget],
    outbox: &'a mut WeaponOutbox,
    stats: &'a mut EffectStats,
}

impl ShotWorld for ClientWeaponEnv<'_> {
    fn view_point(&self) -> (Vec3, Vec3) {
        (self.feet + Vec3::Y * EYE_HEIGHT, self.aim)
    }

    fn sweep(&self, start: Vec3, end: Vec3, radius: f32) -> Vec<TraceHit> {
        sweep_targets(self.targets, self.holder, start, end, radius)
    }

    fn line_trace(&self, start: Vec3, end: Vec3) -> Option<TraceHit> {
        ground_trace(start, end)
    }
}

impl WeaponEnv for ClientWeaponEnv<'_> {
    fn now(&self) -> f64 {
        self.now
    }

    fn is_locally_controlled(&self) -> bool {
        self.local
    }

    fn can_fire(&self) -> bool {
        self.alive
    }

    fn held_fire_mode(&self) -> Option<u8> {
        self.held_fire_mode
    }

    fn weapon_state_changed(&mut self, old: WeaponState, new: WeaponState) {
        if self.local {
            debug!("Weapon {:?} -> {:?}", old, new);
        }
    }

    fn play_swap_animation(&mut self, swap: SwapAnimation, from: f64, duration: f64) {
        debug!("Swap animation {:?} from {:.2} over {:.2}s", swap, from, duration);
    }

    fn play_fire_effects(&mut self, fire_mode: u8) {
        if self.local {
            self.stats.predicted_shots += 1;
        } else {
            self.stats.observed_shots += 1;
        }
        debug!("Player {} fire mode {} muzzle flash", self.holder, fire_mode);
    }

    fn play_hitscan_effects(&mut self, fire_mode: u8, hitscan: &HitscanVisualInfo) {
        debug!(
            "Player {} fire mode {} impact at {:?}",
            self.holder, fire_mode, hitscan.impact
        );
    }

    fn play_out_of_ammo(&mut self, fire_mode: u8) {
        self.stats.out_of_ammo += 1;
        info!("Fire mode {} is out of ammo", fire_mode);
    }

    fn send_fire_request(&mut self, request: FireRequest) {
        self.outbox.requests.push(request);
    }
}

fn snapshot_targets<'a>(
    players: impl Iterator<Item = (&'a Player, &'a PlayerPosition, &'a Health)>,
) -> Vec<CapsuleTarget> {
    players
        .map(|(player, position, health)| CapsuleTarget {
            id: peer_id_to_u64(player.client_id),
            feet: position.0,
            alive: !health.is_dead(),
        })
        .collect()
}

/// Give newly replicated players their client-side weapon
pub fn attach_weapons(
    mut commands: Commands,
    local_id: Option<Res<LocalClientId>>,
    table: Res<WeaponTable>,
    new_players: Query<
        (Entity, &Player, &EquippedWeapon),
        (Without<PredictedWeapon>, Without<ReplicaWeapon>),
    >,
) {
    let Some(local_id) = local_id else {
        return;
    };

    for (entity, player, equipped) in new_players.iter() {
        let weapon = Weapon::new(table.get(equipped.kind), NetRole::Client);
        if peer_id_to_u64(player.client_id) == local_id.0 {
            info!("Local player spawned with {}", weapon.name());
            commands.entity(entity).insert((LocalPlayer, PredictedWeapon(weapon)));
        } else {
            debug!("Player {:?} appeared with {}", player.client_id, weapon.name());
            commands.entity(entity).insert(ReplicaWeapon(weapon));
        }
    }
}

/// Adopt authoritative ammo refills
pub fn apply_weapon_ammo(mut weapons: Query<(&WeaponAmmo, &mut PredictedWeapon), Changed<WeaponAmmo>>) {
    for (ammo, mut weapon) in weapons.iter_mut() {
        weapon.0.set_ammo(ammo.0);
    }
}

/// Route confirmed shots: our own reconcile the predicting weapon, the
/// others play on the shooter's replica.
pub fn receive_weapon_fired(
    time: Res<Time>,
    local_id: Option<Res<LocalClientId>>,
    input: Res<BotInput>,
    mut outbox: ResMut<WeaponOutbox>,
    mut stats: ResMut<EffectStats>,
    mut client: Query<&mut MessageReceiver<WeaponFired>, (With<crate::GameClient>, With<Connected>)>,
    players: Query<(&Player, &PlayerPosition, &Health)>,
    mut local: Query<(&PlayerPosition, &Health, &mut PredictedWeapon), With<LocalPlayer>>,
    mut replicas: Query<(&Player, &PlayerPosition, &mut ReplicaWeapon)>,
) {
    let (Some(local_id), Ok(mut receiver)) = (local_id, client.single_mut()) else {
        return;
    };
    let now = time.elapsed_secs_f64();
    let targets = snapshot_targets(players.iter());

    for message in receiver.receive() {
        if message.shooter == local_id.0 {
            let Ok((position, health, mut weapon)) = local.single_mut() else {
                continue;
            };
            // A cooldown ending here may refire the held mode
            let mut env = ClientWeaponEnv {
                now,
                holder: message.shooter,
                feet: position.0,
                aim: input.aim,
                alive: !health.is_dead(),
                local: true,
                held_fire_mode: input.held_fire_mode,
                targets: &targets,
                outbox: &mut *outbox,
                stats: &mut *stats,
            };
            weapon.0.receive_fire_broadcast(message.fired, &mut env);
            continue;
        }

        let Some((_, position, mut replica)) = replicas
            .iter_mut()
            .find(|(p, ..)| peer_id_to_u64(p.client_id) == message.shooter)
        else {
            continue;
        };
        let mut env = ClientWeaponEnv {
            now,
            holder: message.shooter,
            feet: position.0,
            aim: Vec3::NEG_Z,
            alive: true,
            local: false,
            held_fire_mode: None,
            targets: &[],
            outbox: &mut *outbox,
            stats: &mut *stats,
        };
        replica.0.receive_fire_broadcast(message.fired, &mut env);
    }
}

/// Feed the bot's decisions into the predicting weapon and run its timers
pub fn drive_local_weapon(
    time: Res<Time>,
    local_id: Option<Res<LocalClientId>>,
    mut input: ResMut<BotInput>,
    mut outbox: ResMut<WeaponOutbox>,
    mut stats: ResMut<EffectStats>,
    mut last_held: Local<Option<u8>>,
    players: Query<(&Player, &PlayerPosition, &Health)>,
    mut local: Query<(&PlayerPosition, &Health, &mut PredictedWeapon), With<LocalPlayer>>,
) {
    let Some(local_id) = local_id else {
        return;
    };
    let targets = snapshot_targets(players.iter());
    let Ok((position, health, mut weapon)) = local.single_mut() else {
        return;
    };
    if weapon.is_added() {
        *last_held = None;
    }

    let commands: Vec<WeaponCommand> = input.commands.drain(..).collect();
    let held = input.held_fire_mode;
    let mut env = ClientWeaponEnv {
        now: time.elapsed_secs_f64(),
        holder: local_id.0,
        feet: position.0,
        aim: input.aim,
        alive: !health.is_dead(),
        local: true,
        held_fire_mode: held,
        targets: &targets,
        outbox: &mut *outbox,
        stats: &mut *stats,
    };

    for command in commands {
        match command {
            WeaponCommand::BringUp if !weapon.0.is_equipped() => weapon.0.set_equipped(true, &mut env),
            WeaponCommand::BringUp => weapon.0.request_bring_up(&mut env),
            WeaponCommand::PutDown => weapon.0.request_put_down(&mut env),
        }
        env.outbox.commands.push(command);
    }

    if *last_held != held {
        if let Some(released) = *last_held {
            weapon.0.request_stop_fire(released, &mut env);
        }
        if let Some(pressed) = held {
            weapon.0.request_start_fire(pressed, &mut env);
        }
        *last_held = held;
    }

    weapon.0.tick(&mut env);
}

/// Send this tick's aim, commands and fire requests
pub fn send_weapon_messages(
    input: Res<BotInput>,
    mut outbox: ResMut<WeaponOutbox>,
    mut client: Query<
        (
            &mut MessageSender<AimInput>,
            &mut MessageSender<WeaponCommand>,
            &mut MessageSender<FireRequest>,
        ),
        (With<crate::GameClient>, With<Connected>),
    >,
) {
    let Ok((mut aim_sender, mut command_sender, mut fire_sender)) = client.single_mut() else {
        outbox.commands.clear();
        outbox.requests.clear();
        return;
    };

    aim_sender.send::<InputChannel>(AimInput { direction: input.aim });
    // Commands first so the server swaps before it judges the requests
    for command in outbox.commands.drain(..) {
        command_sender.send::<ReliableChannel>(command);
    }
    for request in outbox.requests.drain(..) {
        fire_sender.send::<ReliableChannel>(request);
    }
}

/// Periodic summary of what the weapons did
pub fn log_effect_stats(
    time: Res<Time>,
    stats: Res<EffectStats>,
    mut timer: Local<Option<Timer>>,
    local: Query<&PredictedWeapon, With<LocalPlayer>>,
) {
    let timer = timer.get_or_insert_with(|| Timer::from_seconds(5.0, TimerMode::Repeating));
    if !timer.tick(time.delta()).just_finished() {
        return;
    }
    let Ok(weapon) = local.single() else {
        return;
    };
    info!(
        "{} {:?} (mode {:?}, held {:?}), ammo {}, predicted {}, observed {}, dry {}",
        weapon.0.name(),
        weapon.0.state(),
        weapon.0.current_fire_mode(),
        weapon.0.desired_fire_modes(),
        weapon.0.ammo(),
        stats.predicted_shots,
        stats.observed_shots,
        stats.out_of_ammo
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::weapons::FireBroadcast;
    use shared::WeaponKind;

    fn env<'a>(
        now: f64,
        local: bool,
        outbox: &'a mut WeaponOutbox,
        stats: &'a mut EffectStats,
    ) -> ClientWeaponEnv<'a> {
        ClientWeaponEnv {
            now,
            holder: 7,
            feet: Vec3::ZERO,
            aim: Vec3::NEG_Z,
            alive: true,
            local,
            held_fire_mode: None,
            targets: &[],
            outbox,
            stats,
        }
    }

    #[test]
    fn test_predicted_shot_is_queued_for_the_server() {
        let mut outbox = WeaponOutbox::default();
        let mut stats = EffectStats::default();
        let mut weapon = Weapon::new(WeaponKind::Pistol.config(), NetRole::Client);

        weapon.set_equipped(true, &mut env(0.0, true, &mut outbox, &mut stats));
        weapon.tick(&mut env(1.0, true, &mut outbox, &mut stats));
        weapon.request_start_fire(0, &mut env(1.0, true, &mut outbox, &mut stats));

        assert_eq!(outbox.requests.len(), 1);
        assert_eq!(outbox.requests[0].fire_mode, 0);
        assert!((outbox.requests[0].shot.origin.y - EYE_HEIGHT).abs() < 1e-5);
        assert_eq!(stats.predicted_shots, 1);
    }

    #[test]
    fn test_observer_replica_counts_observed_shots() {
        let mut outbox = WeaponOutbox::default();
        let mut stats = EffectStats::default();
        let mut replica = Weapon::new(WeaponKind::Rifle.config(), NetRole::Client);

        let fired = FireBroadcast {
            fire_mode: 0,
            hitscan: Some(HitscanVisualInfo::default()),
            ammo: 10,
        };
        replica.receive_fire_broadcast(fired, &mut env(2.0, false, &mut outbox, &mut stats));

        assert_eq!(stats.observed_shots, 1);
        assert_eq!(stats.predicted_shots, 0);
        assert!(outbox.requests.is_empty());
        assert_eq!(replica.ammo(), 10);
    }
}
