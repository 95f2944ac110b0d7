//! Server-side connection and player lifecycle systems
//!
//! Lightyear 0.25

use bevy::prelude::*;
use lightyear::prelude::*;
use lightyear::prelude::server::*;

use shared::{
    peer_id_to_u64, AimInput, EquippedWeapon, FireRequest, Health, Player, PlayerAim,
    PlayerPosition, WeaponAmmo, WeaponCommand, WeaponFired, RESPAWN_TIME, SPAWN_RADIUS,
};

use crate::weapons::HeldWeapon;

/// Component added to dead players while waiting to respawn
#[derive(Component)]
pub struct RespawnTimer {
    pub time_remaining: f32,
}

impl Default for RespawnTimer {
    fn default() -> Self {
        Self {
            time_remaining: RESPAWN_TIME,
        }
    }
}

/// Spawn slot on the ring around the origin, facing the center
pub fn spawn_point(peer: u64) -> (Vec3, Vec3) {
    const SLOTS: u64 = 12;
    let angle = (peer % SLOTS) as f32 * std::f32::consts::TAU / SLOTS as f32;
    let position = Vec3::new(angle.cos(), 0.0, angle.sin()) * SPAWN_RADIUS;
    let aim = (-position).normalize_or(Vec3::NEG_Z);
    (position, aim)
}

/// Handle new client connections: enable replication and message I/O on
/// the link, then spawn the player.
pub fn handle_connections(
    mut commands: Commands,
    // Client links that just got Connected
    new_clients: Query<(Entity, &RemoteId), Added<Connected>>,
    // Filter to only get client links (not the server itself)
    client_filter: Query<(), With<ClientOf>>,
) {
    for (client_entity, remote_id) in new_clients.iter() {
        if client_filter.get(client_entity).is_err() {
            continue;
        }

        let peer_id = remote_id.0;
        info!("Client connected: {:?}", peer_id);

        commands.entity(client_entity).insert((
            // Replication out: server -> this client
            ReplicationSender::new(shared::protocol::tick_duration(), SendUpdatesMode::SinceLastAck, false),
            // Client -> Server
            MessageReceiver::<AimInput>::default(),
            MessageReceiver::<FireRequest>::default(),
            MessageReceiver::<WeaponCommand>::default(),
            // Server -> Client
            MessageSender::<WeaponFired>::default(),
        ));

        let (position, aim) = spawn_point(peer_id_to_u64(peer_id));
        commands.spawn((
            Player { client_id: peer_id },
            PlayerPosition(position),
            PlayerAim(aim),
            Health::default(),
            EquippedWeapon::default(),
            WeaponAmmo::default(),
            Replicate::new(ReplicationMode::SingleServer(NetworkTarget::All)),
        ));
        info!("Spawned player for {:?} at {:?}", peer_id, position);
    }
}

/// Despawn the player of a client that disconnected
pub fn handle_disconnections(
    trigger: On<Add, Disconnected>,
    mut commands: Commands,
    client_entities: Query<&RemoteId>,
    players: Query<(Entity, &Player)>,
) {
    let client_entity = trigger.entity;

    let Ok(remote_id) = client_entities.get(client_entity) else {
        warn!("Disconnect trigger for entity {:?} but no RemoteId found", client_entity);
        return;
    };
    let peer_id = remote_id.0;
    info!("Client {:?} disconnected: {:?}", client_entity, peer_id);

    for (player_entity, player) in players.iter() {
        if player.client_id == peer_id {
            commands.entity(player_entity).despawn();
        }
    }
}

/// Count down dead players and bring them back at full health and ammo
pub fn respawn_players(
    mut commands: Commands,
    time: Res<Time>,
    mut dead: Query<(
        Entity,
        &Player,
        &mut RespawnTimer,
        &mut Health,
        &mut PlayerPosition,
        &mut PlayerAim,
        Option<&mut HeldWeapon>,
    )>,
) {
    for (entity, player, mut timer, mut health, mut position, mut aim, held) in dead.iter_mut() {
        timer.time_remaining -= time.delta_secs();
        if timer.time_remaining > 0.0 {
            continue;
        }

        let (spawn, facing) = spawn_point(peer_id_to_u64(player.client_id));
        health.current = health.max;
        position.0 = spawn;
        aim.0 = facing;
        if let Some(mut held) = held {
            let starting_ammo = held.0.config().starting_ammo;
            held.0.set_ammo(starting_ammo);
        }
        commands.entity(entity).remove::<RespawnTimer>();
        info!("Player {:?} respawned", player.client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_points_face_the_center() {
        for peer in 0..12 {
            let (position, aim) = spawn_point(peer);
            assert!((position.length() - SPAWN_RADIUS).abs() < 1e-4);
            assert!(aim.dot(-position.normalize()) > 0.999);
        }
    }

    #[test]
    fn test_spawn_points_differ_per_slot() {
        assert_ne!(spawn_point(1).0, spawn_point(2).0);
        assert_eq!(spawn_point(1).0, spawn_point(13).0);
    }
}
