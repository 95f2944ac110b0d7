//! Lightyear network protocol definition
//!
//! Lightyear 0.25 - merged entity model

use bevy::prelude::*;
use lightyear::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::components::{EquippedWeapon, Health, Player, PlayerAim, PlayerPosition, WeaponAmmo};
use crate::weapons::{FireBroadcast, FireRequest};

// --- Messages ---

/// Client -> Server: where the player is looking, sent every tick
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct AimInput {
    /// Normalized aim direction in world space
    pub direction: Vec3,
}

/// Client -> Server: swap requests mirrored on the authoritative weapon
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub enum WeaponCommand {
    BringUp,
    PutDown,
}

/// Server -> Client: a shot by `shooter` was accepted
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct WeaponFired {
    pub shooter: u64,
    pub fired: FireBroadcast,
}

// --- Channels ---

/// Reliable channel for fire requests, commands and broadcasts
pub struct ReliableChannel;

/// Unreliable channel for frequent input (lowest latency)
pub struct InputChannel;

// --- Protocol Plugin ---

pub struct ProtocolPlugin;

impl Plugin for ProtocolPlugin {
    fn build(&self, app: &mut App) {
        // === PLAYER COMPONENTS ===
        app.register_component::<Player>()
            .add_prediction();

        app.register_component::<PlayerPosition>()
            .add_prediction();

        app.register_component::<PlayerAim>()
            .add_prediction();

        // === COMBAT COMPONENTS ===
        app.register_component::<Health>()
            .add_prediction();

        app.register_component::<EquippedWeapon>()
            .add_prediction();

        app.register_component::<WeaponAmmo>()
            .add_prediction();

        // === MESSAGES ===

        // Client -> Server
        app.register_message::<AimInput>()
            .add_direction(NetworkDirection::ClientToServer);
        app.register_message::<FireRequest>()
            .add_direction(NetworkDirection::ClientToServer);
        app.register_message::<WeaponCommand>()
            .add_direction(NetworkDirection::ClientToServer);

        // Server -> Client
        app.register_message::<WeaponFired>()
            .add_direction(NetworkDirection::ServerToClient);

        // === CHANNELS ===

        app.add_channel::<ReliableChannel>(ChannelSettings {
            mode: ChannelMode::OrderedReliable(ReliableSettings::default()),
            ..default()
        })
        // Fire requests must reach the authority in order, broadcasts too
        .add_direction(NetworkDirection::Bidirectional);

        app.add_channel::<InputChannel>(ChannelSettings {
            mode: ChannelMode::UnorderedUnreliable,
            ..default()
        })
        .add_direction(NetworkDirection::ClientToServer);
    }
}

// --- Network Configuration ---

pub const SERVER_PORT: u16 = 5000;
pub const SERVER_ADDR: &str = "127.0.0.1";
pub const PROTOCOL_ID: u64 = 0x1234567890ABCDEF;

/// Default location of the weapon override table
pub const WEAPON_CONFIG_PATH: &str = "assets/weapons.ron";

/// Address the server binds to.
pub fn get_server_bind_addr() -> &'static str {
    "0.0.0.0"
}

/// Server address the client connects to, `WEAPON_SERVER_ADDR` overrides it.
pub fn get_server_addr() -> String {
    std::env::var("WEAPON_SERVER_ADDR").unwrap_or_else(|_| SERVER_ADDR.to_string())
}

/// Server port, `WEAPON_SERVER_PORT` overrides it.
pub fn get_server_port() -> u16 {
    match std::env::var("WEAPON_SERVER_PORT") {
        Ok(port) => port.parse().unwrap_or_else(|_| {
            warn!("Invalid WEAPON_SERVER_PORT '{}', using {}", port, SERVER_PORT);
            SERVER_PORT
        }),
        Err(_) => SERVER_PORT,
    }
}

/// Weapon table path, `WEAPON_CONFIG` overrides it.
pub fn get_weapon_config_path() -> String {
    std::env::var("WEAPON_CONFIG").unwrap_or_else(|_| WEAPON_CONFIG_PATH.to_string())
}

/// Shared private key for local development (use proper key management in production!)
pub const PRIVATE_KEY: [u8; 32] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
    0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10,
    0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18,
    0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f, 0x20,
];

/// Fixed timestep for game logic (60 Hz)
pub const FIXED_TIMESTEP_HZ: f64 = 60.0;

/// Tick duration for lightyear plugins
pub fn tick_duration() -> Duration {
    Duration::from_secs_f64(1.0 / FIXED_TIMESTEP_HZ)
}
