//! Weapon Client - headless bot that connects, fires and reconciles
//!
//! Lightyear 0.25 / Bevy 0.17

mod bot;
mod states;
mod systems;
mod weapons;

use bevy::prelude::*;
use bevy::app::ScheduleRunnerPlugin;
use lightyear::prelude::client::ClientPlugins;
use shared::{get_weapon_config_path, protocol::*, ProtocolPlugin, WeaponTable};
use states::GameState;

/// Marker component for our client entity
#[derive(Component)]
pub struct GameClient;

fn main() {
    let mut app = App::new();

    // Headless: tick the main loop at the fixed rate so received messages
    // survive until `FixedUpdate` reads them.
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick_duration())));
    app.add_plugins(bevy::log::LogPlugin::default());
    app.add_plugins(bevy::state::app::StatesPlugin);

    app.init_state::<GameState>();

    app.add_plugins(ClientPlugins {
        tick_duration: tick_duration(),
    });
    app.add_plugins(ProtocolPlugin);

    app.insert_resource(WeaponTable::load_or_default(get_weapon_config_path()));
    app.init_resource::<bot::BotBrain>();
    app.init_resource::<bot::BotInput>();
    app.init_resource::<weapons::WeaponOutbox>();
    app.init_resource::<weapons::EffectStats>();

    app.add_systems(OnEnter(GameState::Connecting), systems::start_connection);
    app.add_systems(
        Update,
        systems::check_connection
            .run_if(in_state(GameState::Connecting).or(in_state(GameState::Playing))),
    );
    app.add_systems(
        OnEnter(GameState::Disconnected),
        (systems::enter_disconnected, bot::reset_bot),
    );
    app.add_systems(
        Update,
        systems::retry_connection.run_if(in_state(GameState::Disconnected)),
    );

    // Fixed tick: weapons for new players, confirmed shots, bot decisions,
    // local weapon, then everything outgoing.
    app.add_systems(
        FixedUpdate,
        (
            weapons::attach_weapons,
            weapons::apply_weapon_ammo,
            weapons::receive_weapon_fired,
            bot::run_bot,
            weapons::drive_local_weapon,
            weapons::send_weapon_messages,
        )
            .chain()
            .run_if(in_state(GameState::Playing)),
    );

    app.add_systems(
        Update,
        weapons::log_effect_stats.run_if(in_state(GameState::Playing)),
    );

    app.run();
}
