//! Connection systems
//!
//! Connecting, connection status and reconnect backoff.

use bevy::prelude::*;
use lightyear::prelude::*;
use lightyear::prelude::client::*;
use shared::{
    get_server_addr, get_server_port, AimInput, FireRequest, Player, WeaponCommand, WeaponFired,
    PRIVATE_KEY, PROTOCOL_ID,
};
use std::net::SocketAddr;

use crate::states::GameState;

/// Seconds between two connection attempts
const RECONNECT_DELAY: f32 = 3.0;

/// Netcode id of this bot, shooter id in `WeaponFired`
#[derive(Resource, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalClientId(pub u64);

#[derive(Resource)]
pub struct ReconnectTimer(pub Timer);

/// Start connection to server
/// In Lightyear 0.25, we spawn a Client entity with the networking components
/// and then trigger the Connect event to initiate the connection
pub fn start_connection(
    mut commands: Commands,
    existing_clients: Query<Entity, With<crate::GameClient>>,
) {
    let server_ip = get_server_addr();
    let server_port = get_server_port();
    info!("Initiating connection to server at {}:{}...", server_ip, server_port);

    // Only ever one GameClient entity
    for e in existing_clients.iter() {
        commands.entity(e).despawn();
    }

    let server_addr: SocketAddr = format!("{}:{}", server_ip, server_port)
        .parse()
        .expect("Invalid server address");
    let local_addr: SocketAddr = "0.0.0.0:0".parse().expect("Invalid local address");

    // Generate a unique client ID
    let client_id = rand::random::<u64>();
    commands.insert_resource(LocalClientId(client_id));

    // Build authentication (netcode connect token)
    let auth = Authentication::Manual {
        server_addr,
        protocol_id: PROTOCOL_ID,
        private_key: PRIVATE_KEY,
        client_id,
    };

    // Spawn client entity with UDP + Netcode
    let client_entity = commands.spawn((
        crate::GameClient,
        Client::default(),
        UdpIo::default(),
        LocalAddr(local_addr),
        PeerAddr(server_addr),
        NetcodeClient::new(auth, NetcodeConfig::default()).expect("Failed to create netcode client"),
        // Receive replicated players
        ReplicationReceiver::default(),
        // Client -> Server
        MessageSender::<AimInput>::default(),
        MessageSender::<FireRequest>::default(),
        MessageSender::<WeaponCommand>::default(),
        // Server -> Client
        MessageReceiver::<WeaponFired>::default(),
    )).id();

    commands.trigger(Connect { entity: client_entity });

    info!("Client entity spawned, client_id: {}", client_id);
}

/// Check connection status
pub fn check_connection(
    mut next_state: ResMut<NextState<GameState>>,
    new_connections: Query<Entity, (With<crate::GameClient>, Added<Connected>)>,
    new_disconnections: Query<Entity, (With<crate::GameClient>, Added<Disconnected>)>,
) {
    for _entity in new_connections.iter() {
        info!("Connected to server!");
        next_state.set(GameState::Playing);
    }

    for _entity in new_disconnections.iter() {
        warn!("Connection failed or disconnected");
        next_state.set(GameState::Disconnected);
    }
}

/// Leaving the game: forget every replicated player and arm the retry
pub fn enter_disconnected(mut commands: Commands, players: Query<Entity, With<Player>>) {
    for entity in players.iter() {
        commands.entity(entity).despawn();
    }
    commands.insert_resource(ReconnectTimer(Timer::from_seconds(
        RECONNECT_DELAY,
        TimerMode::Once,
    )));
}

pub fn retry_connection(
    time: Res<Time>,
    timer: Option<ResMut<ReconnectTimer>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    let Some(mut timer) = timer else {
        return;
    };
    if timer.0.tick(time.delta()).just_finished() {
        info!("Retrying connection");
        next_state.set(GameState::Connecting);
    }
}
