//! Server-side weapon systems - authoritative fire resolution and projectiles
//!
//! Each player carries an authority `Weapon`. Fire requests from the owning
//! client are checked against its state machine, accepted shots are traced
//! against the other players' capsules and broadcast to every client.

use bevy::prelude::*;
use lightyear::prelude::*;
use lightyear::prelude::server::*;

use shared::hitbox::{
    ground_hit, ground_trace, player_capsule_endpoints, player_hit_zone, sweep_capsule,
    sweep_targets, CapsuleTarget,
};
use shared::weapons::ballistics;
use shared::weapons::damage::calculate_damage;
use shared::weapons::{PointDamage, ProjectileSpawn, ShotWorld, TraceHit};
use shared::{
    peer_id_to_u64, EquippedWeapon, FireBroadcast, FireRequest, Health, NetRole, Player,
    PlayerAim, PlayerPosition, Projectile, ProjectilePrevPosition, ProjectileVelocity,
    ReliableChannel, ServerFireOutcome, Weapon, WeaponAmmo, WeaponCommand, WeaponEnv, WeaponFired,
    WeaponTable, EYE_HEIGHT, FIXED_TIMESTEP_HZ, PLAYER_RADIUS,
};

use crate::systems::RespawnTimer;

/// Authoritative weapon of a player. Not replicated.
#[derive(Component, Debug)]
pub struct HeldWeapon(pub Weapon);

impl HeldWeapon {
    pub fn new(table: &WeaponTable, equipped: &EquippedWeapon) -> Self {
        Self(Weapon::new(table.get(equipped.kind), NetRole::Authority))
    }
}

/// Shot side effects collected during a tick, flushed by later systems
#[derive(Resource, Default)]
pub struct ShotEvents {
    pub damage: Vec<(u64, PointDamage)>,
    pub projectiles: Vec<(u64, ProjectileSpawn)>,
    pub fired: Vec<WeaponFired>,
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

/// Host side of one authority weapon for the duration of a call
struct ServerWeaponEnv<'a> {
    now: f64,
    shooter: u64,
    feet: Vec3,
    aim: Vec3,
    alive: bool,
    targets: &'a [CapsuleTarget],
    events: &'a mut ShotEvents,
}

impl ShotWorld for ServerWeaponEnv<'_> {
    fn view_point(&self) -> (Vec3, Vec3) {
        (self.feet + Vec3::Y * EYE_HEIGHT, self.aim)
    }

    fn sweep(&self, start: Vec3, end: Vec3, radius: f32) -> Vec<TraceHit> {
        sweep_targets(self.targets, self.shooter, start, end, radius)
    }

    fn line_trace(&self, start: Vec3, end: Vec3) -> Option<TraceHit> {
        ground_trace(start, end)
    }

    fn apply_point_damage(&mut self, damage: PointDamage) {
        self.events.damage.push((self.shooter, damage));
    }

    fn spawn_projectile(&mut self, spawn: ProjectileSpawn) {
        self.events.projectiles.push((self.shooter, spawn));
    }
}

impl WeaponEnv for ServerWeaponEnv<'_> {
    fn now(&self) -> f64 {
        self.now
    }

    // Every holder is driven by a remote client.
    fn is_locally_controlled(&self) -> bool {
        false
    }

    fn can_fire(&self) -> bool {
        self.alive
    }

    fn broadcast_fired(&mut self, fired: FireBroadcast) {
        self.events.fired.push(WeaponFired {
            shooter: self.shooter,
            fired,
        });
    }
}

/// Attach the authority weapon to newly spawned players and equip it
pub fn equip_new_players(
    mut commands: Commands,
    time: Res<Time>,
    table: Res<WeaponTable>,
    mut events: ResMut<ShotEvents>,
    new_players: Query<(Entity, &Player, &PlayerPosition, &PlayerAim, &EquippedWeapon), Without<HeldWeapon>>,
) {
    for (entity, player, position, aim, equipped) in new_players.iter() {
        let mut held = HeldWeapon::new(&table, equipped);
        let mut env = ServerWeaponEnv {
            now: time.elapsed_secs_f64(),
            shooter: peer_id_to_u64(player.client_id),
            feet: position.0,
            aim: aim.0,
            alive: true,
            targets: &[],
            events: &mut *events,
        };
        held.0.set_equipped(true, &mut env);
        info!(
            "Player {:?} holds {} ({} ammo)",
            player.client_id,
            held.0.name(),
            held.0.ammo()
        );
        commands.entity(entity).insert(held);
    }
}

/// Update aim from the latest client input
pub fn receive_aim_input(
    mut client_links: Query<(&RemoteId, &mut MessageReceiver<shared::AimInput>), With<ClientOf>>,
    mut players: Query<(&Player, &mut PlayerAim)>,
) {
    for (remote_id, mut receiver) in client_links.iter_mut() {
        let peer_id = remote_id.0;
        let Some(latest) = receiver.receive().last() else {
            continue;
        };
        let Some(direction) = latest.direction.try_normalize() else {
            continue;
        };
        if let Some((_, mut aim)) = players.iter_mut().find(|(p, _)| p.client_id == peer_id) {
            aim.0 = direction;
        }
    }
}

/// Mirror swap requests on the authoritative weapon
pub fn handle_weapon_commands(
    time: Res<Time>,
    mut events: ResMut<ShotEvents>,
    mut client_links: Query<(&RemoteId, &mut MessageReceiver<WeaponCommand>), With<ClientOf>>,
    mut players: Query<(&Player, &PlayerPosition, &PlayerAim, &Health, &mut HeldWeapon)>,
) {
    let now = time.elapsed_secs_f64();
    // Commands run due timers first, a delayed shot may resolve here
    let targets = snapshot_targets(players.iter().map(|(p, pos, _, h, _)| (p, pos, h)));

    for (remote_id, mut receiver) in client_links.iter_mut() {
        let peer_id = remote_id.0;

        for command in receiver.receive() {
            let Some((player, position, aim, health, mut held)) =
                players.iter_mut().find(|(p, ..)| p.client_id == peer_id)
            else {
                continue;
            };
            let mut env = ServerWeaponEnv {
                now,
                shooter: peer_id_to_u64(player.client_id),
                feet: position.0,
                aim: aim.0,
                alive: !health.is_dead(),
                targets: &targets,
                events: &mut *events,
            };
            debug!("Player {:?} weapon command {:?}", peer_id, command);
            apply_weapon_command(&mut held.0, command, &mut env);
        }
    }
}

fn apply_weapon_command<E: WeaponEnv + ?Sized>(weapon: &mut Weapon, command: WeaponCommand, env: &mut E) {
    match command {
        WeaponCommand::BringUp if !weapon.is_equipped() => weapon.set_equipped(true, env),
        WeaponCommand::BringUp => weapon.request_bring_up(env),
        WeaponCommand::PutDown => {
            weapon.request_put_down(env);
            if let Some(delay) = weapon.pending_put_down() {
                debug!("{} put-down deferred {:.3}s by cooldown", weapon.name(), delay);
            }
        }
    }
}

/// Check fire requests against the shooter's authoritative weapon
pub fn handle_fire_requests(
    time: Res<Time>,
    mut events: ResMut<ShotEvents>,
    mut client_links: Query<(&RemoteId, &mut MessageReceiver<FireRequest>), With<ClientOf>>,
    mut players: Query<(&Player, &PlayerPosition, &PlayerAim, &Health, &mut HeldWeapon)>,
) {
    let now = time.elapsed_secs_f64();
    let targets = snapshot_targets(players.iter().map(|(p, pos, _, h, _)| (p, pos, h)));

    for (remote_id, mut receiver) in client_links.iter_mut() {
        let peer_id = remote_id.0;

        for request in receiver.receive() {
            let Some((player, position, aim, health, mut held)) =
                players.iter_mut().find(|(p, ..)| p.client_id == peer_id)
            else {
                continue;
            };
            if health.is_dead() {
                debug!("Player {:?} is dead, fire request discarded", peer_id);
                continue;
            }
            let mut env = ServerWeaponEnv {
                now,
                shooter: peer_id_to_u64(player.client_id),
                feet: position.0,
                aim: aim.0,
                alive: true,
                targets: &targets,
                events: &mut *events,
            };
            match held.0.receive_fire_request(request, &mut env) {
                ServerFireOutcome::Accepted => {}
                ServerFireOutcome::Delayed(delay) => {
                    debug!(
                        "Player {:?} fire mode {} delayed by {:.3}s",
                        peer_id, request.fire_mode, delay
                    );
                }
                ServerFireOutcome::Discarded => {
                    debug!("Player {:?} fire mode {} discarded", peer_id, request.fire_mode);
                }
            }
        }
    }
}

/// Run due weapon timers: cooldowns, delayed fires, swaps
pub fn tick_weapons(
    time: Res<Time>,
    mut events: ResMut<ShotEvents>,
    mut players: Query<(&Player, &PlayerPosition, &PlayerAim, &Health, &mut HeldWeapon)>,
) {
    let now = time.elapsed_secs_f64();
    let targets = snapshot_targets(players.iter().map(|(p, pos, _, h, _)| (p, pos, h)));

    for (player, position, aim, health, mut held) in players.iter_mut() {
        let mut env = ServerWeaponEnv {
            now,
            shooter: peer_id_to_u64(player.client_id),
            feet: position.0,
            aim: aim.0,
            alive: !health.is_dead(),
            targets: &targets,
            events: &mut *events,
        };
        held.0.tick(&mut env);
    }
}

/// Spawn the projectiles of accepted shots
pub fn spawn_projectiles(mut commands: Commands, time: Res<Time>, mut events: ResMut<ShotEvents>) {
    let current_time = time.elapsed_secs();

    for (owner_id, spawn) in events.projectiles.drain(..) {
        commands.spawn((
            Projectile {
                owner_id,
                fire_mode: spawn.fire_mode,
                spawn_position: spawn.position,
                spawn_time: current_time,
                config: spawn.config,
            },
            ProjectileVelocity(spawn.velocity),
            ProjectilePrevPosition(spawn.position),
            Transform::from_translation(spawn.position),
        ));
    }
}

/// Simulate projectile physics
pub fn simulate_projectiles(
    mut projectiles: Query<(
        &Projectile,
        &mut ProjectileVelocity,
        &mut ProjectilePrevPosition,
        &mut Transform,
    )>,
) {
    let dt = 1.0 / FIXED_TIMESTEP_HZ as f32;

    for (projectile, mut velocity, mut prev_pos, mut transform) in projectiles.iter_mut() {
        prev_pos.0 = transform.translation;

        let (new_pos, new_vel) = ballistics::step_projectile(
            transform.translation,
            velocity.0,
            projectile.config.gravity_scale,
            dt,
        );

        transform.translation = new_pos;
        velocity.0 = new_vel;
    }
}

/// Detect projectile hits against players and the ground
pub fn detect_projectile_hits(
    mut commands: Commands,
    mut events: ResMut<ShotEvents>,
    projectiles: Query<(Entity, &Projectile, &ProjectileVelocity, &ProjectilePrevPosition, &Transform)>,
    players: Query<(&Player, &PlayerPosition, &Health)>,
) {
    let targets = snapshot_targets(players.iter());

    for (entity, projectile, velocity, prev_pos, transform) in projectiles.iter() {
        let start = prev_pos.0;
        let end = transform.translation;

        // Closest player along this step
        let player_hit = targets
            .iter()
            .filter(|target| target.alive && target.id != projectile.owner_id)
            .filter_map(|target| {
                let (a, b) = player_capsule_endpoints(target.feet);
                sweep_capsule(start, end, projectile.config.radius, a, b, PLAYER_RADIUS)
                    .map(|(distance, location)| (distance, location, target))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        let ground_distance = ground_hit(start, end).map(|(distance, _)| distance);

        match (player_hit, ground_distance) {
            (Some((distance, location, target)), ground)
                if ground.map_or(true, |g| distance <= g) =>
            {
                let travelled = projectile.spawn_position.distance(location);
                let zone = player_hit_zone(target.feet, location);
                let amount = calculate_damage(
                    projectile.config.damage,
                    &projectile.config.falloff,
                    travelled,
                    zone,
                );
                events.damage.push((
                    projectile.owner_id,
                    PointDamage {
                        target: target.id,
                        amount,
                        zone,
                        location,
                        direction: velocity.0.normalize_or_zero(),
                        distance: travelled,
                    },
                ));
                commands.entity(entity).despawn();
            }
            (_, Some(_)) => {
                debug!("Projectile from {} hit the ground", projectile.owner_id);
                commands.entity(entity).despawn();
            }
            _ => {}
        }
    }
}

/// Remove projectiles that slowed down, flew too far or lived too long
pub fn cleanup_projectiles(
    mut commands: Commands,
    projectiles: Query<(Entity, &Projectile, &ProjectileVelocity, &Transform)>,
    time: Res<Time>,
) {
    let current_time = time.elapsed_secs();

    for (entity, projectile, velocity, transform) in projectiles.iter() {
        if ballistics::should_despawn_projectile(
            velocity.0,
            projectile.spawn_position,
            transform.translation,
            current_time - projectile.spawn_time,
            projectile.config.max_lifetime,
        ) {
            commands.entity(entity).despawn();
        }
    }
}

/// Apply collected damage to players
pub fn apply_damage(
    mut commands: Commands,
    mut events: ResMut<ShotEvents>,
    mut players: Query<(Entity, &Player, &mut Health)>,
) {
    for (shooter, damage) in events.damage.drain(..) {
        let Some((entity, player, mut health)) = players
            .iter_mut()
            .find(|(_, p, _)| peer_id_to_u64(p.client_id) == damage.target)
        else {
            continue;
        };

        let killed = health.take_damage(damage.amount);
        debug!(
            "Player {:?} took {:.1} damage ({:?}) from {}, {:.0} left",
            player.client_id, damage.amount, damage.zone, shooter, health.current
        );
        if killed {
            info!("Player {:?} was killed by {}", player.client_id, shooter);
            commands.entity(entity).insert(RespawnTimer::default());
        }
    }
}

/// Mirror authoritative ammo into the replicated component
pub fn sync_weapon_ammo(mut players: Query<(&HeldWeapon, &mut WeaponAmmo)>) {
    for (held, mut ammo) in players.iter_mut() {
        if ammo.0 != held.0.ammo() {
            ammo.0 = held.0.ammo();
        }
    }
}

/// Send accepted shots to every connected client
pub fn broadcast_fired(
    mut events: ResMut<ShotEvents>,
    mut senders: Query<&mut MessageSender<WeaponFired>, (With<ClientOf>, With<Connected>)>,
) {
    for fired in events.fired.drain(..) {
        for mut sender in senders.iter_mut() {
            sender.send::<ReliableChannel>(fired.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::weapons::SimulatedShotInfo;

    fn env_with<'a>(targets: &'a [CapsuleTarget], events: &'a mut ShotEvents) -> ServerWeaponEnv<'a> {
        ServerWeaponEnv {
            now: 0.0,
            shooter: 1,
            feet: Vec3::ZERO,
            aim: Vec3::NEG_Z,
            alive: true,
            targets,
            events,
        }
    }

    #[test]
    fn test_accepted_shot_damages_and_broadcasts() {
        let targets = [CapsuleTarget { id: 2, feet: Vec3::new(0.0, 0.0, -10.0), alive: true }];
        let mut events = ShotEvents::default();
        let table = WeaponTable::default();
        let mut held = HeldWeapon::new(&table, &EquippedWeapon::default());

        {
            let mut env = env_with(&targets, &mut events);
            held.0.set_equipped(true, &mut env);
            env.now = 1.0;
            held.0.tick(&mut env);
            let request = FireRequest {
                fire_mode: 0,
                shot: SimulatedShotInfo {
                    origin: Vec3::new(0.0, 1.2, 0.0),
                    direction: Vec3::NEG_Z,
                },
            };
            assert_eq!(
                held.0.receive_fire_request(request, &mut env),
                ServerFireOutcome::Accepted
            );
        }

        assert_eq!(events.damage.len(), 1);
        assert_eq!(events.damage[0].0, 1);
        assert_eq!(events.damage[0].1.target, 2);
        assert_eq!(events.fired.len(), 1);
        assert_eq!(events.fired[0].shooter, 1);
        assert_eq!(events.fired[0].fired.ammo, held.0.ammo());
    }

    #[test]
    fn test_delayed_shot_resolved_by_command_hits_players() {
        let shooter = Player { client_id: PeerId::Netcode(1) };
        let target = Player { client_id: PeerId::Netcode(2) };
        let positions = [PlayerPosition(Vec3::ZERO), PlayerPosition(Vec3::new(0.0, 0.0, -10.0))];
        let health = Health::default();
        let targets = snapshot_targets(
            [(&shooter, &positions[0], &health), (&target, &positions[1], &health)].into_iter(),
        );
        let mut events = ShotEvents::default();
        let mut held = HeldWeapon::new(&WeaponTable::default(), &EquippedWeapon::default());

        {
            let mut env = env_with(&targets, &mut events);
            held.0.set_equipped(true, &mut env);
            env.now = 0.25;
            let request = FireRequest {
                fire_mode: 0,
                shot: SimulatedShotInfo {
                    origin: Vec3::new(0.0, 1.2, 0.0),
                    direction: Vec3::NEG_Z,
                },
            };
            assert!(matches!(
                held.0.receive_fire_request(request, &mut env),
                ServerFireOutcome::Delayed(_)
            ));

            // The bring-up ends and the delayed shot comes due before the
            // next tick; the command runs it.
            env.now = 0.31;
            apply_weapon_command(&mut held.0, WeaponCommand::BringUp, &mut env);
        }

        assert_eq!(events.fired.len(), 1);
        assert_eq!(events.damage.len(), 1);
        assert_eq!(events.damage[0].1.target, 2);
    }
}
