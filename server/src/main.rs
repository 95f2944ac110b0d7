//! Weapon Server - headless Bevy app that owns every weapon
//!
//! Lightyear 0.25 / Bevy 0.17

mod systems;
mod weapons;

use bevy::prelude::*;
use bevy::app::ScheduleRunnerPlugin;
use lightyear::prelude::*;
use lightyear::prelude::server::*;
use shared::{
    get_server_bind_addr, get_server_port, get_weapon_config_path, protocol::*, ProtocolPlugin,
    WeaponTable, PRIVATE_KEY, PROTOCOL_ID,
};
use std::net::SocketAddr;

/// Marker for our server entity
#[derive(Component)]
struct GameServer;

/// Spawn the server entity with all required networking components
fn spawn_server(mut commands: Commands) {
    let server_addr: SocketAddr = format!("{}:{}", get_server_bind_addr(), get_server_port())
        .parse()
        .expect("Invalid server bind address");

    info!("Spawning server entity, binding to {:?}", server_addr);

    // Spawn server entity with UDP + Netcode
    commands.spawn((
        GameServer,
        Server::default(),
        ServerUdpIo::default(),
        LocalAddr(server_addr),
        NetcodeServer::new(NetcodeConfig {
            protocol_id: PROTOCOL_ID,
            private_key: PRIVATE_KEY,
            ..default()
        }),
    ));
}

/// Start the server after it's spawned
fn start_server(
    mut commands: Commands,
    server_query: Query<Entity, (With<GameServer>, Without<Started>, Without<Starting>)>,
) {
    for server_entity in server_query.iter() {
        info!("Starting server...");
        commands.trigger(Start { entity: server_entity });
    }
}

/// Check if server is started (run condition)
fn server_is_started(server_query: Query<(), (With<GameServer>, With<Started>)>) -> bool {
    !server_query.is_empty()
}

fn main() {
    let mut app = App::new();

    // Headless plugins (no rendering)
    // Run the main loop at the fixed tick rate so message buffers cleared in
    // `Last` are still there when `FixedUpdate` reads them.
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick_duration())));
    app.add_plugins(bevy::log::LogPlugin::default());
    app.add_plugins(bevy::state::app::StatesPlugin);

    app.insert_resource(WeaponTable::load_or_default(get_weapon_config_path()));
    app.init_resource::<weapons::ShotEvents>();

    // Lightyear server plugins (tick_duration = 60Hz)
    app.add_plugins(ServerPlugins {
        tick_duration: tick_duration(),
    });

    // Protocol plugin (component/message registration)
    app.add_plugins(ProtocolPlugin);

    app.add_systems(Startup, spawn_server);
    app.add_systems(Update, start_server);
    app.add_observer(systems::handle_disconnections);

    // Fixed tick: connections, client messages, weapon timers, projectiles,
    // then flush damage and broadcasts.
    app.add_systems(
        FixedUpdate,
        (
            systems::handle_connections,
            weapons::equip_new_players,
            weapons::receive_aim_input,
            weapons::handle_weapon_commands,
            weapons::handle_fire_requests,
            weapons::tick_weapons,
            weapons::spawn_projectiles,
            weapons::simulate_projectiles,
            weapons::detect_projectile_hits,
            weapons::cleanup_projectiles,
            weapons::apply_damage,
            systems::respawn_players,
            weapons::sync_weapon_ammo,
            weapons::broadcast_fired,
        )
            .chain()
            .run_if(server_is_started),
    );

    info!("Starting server on port {}", get_server_port());
    app.run();
}
