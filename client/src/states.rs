//! Bot state machine

use bevy::prelude::*;

/// Connection states of the bot
#[derive(States, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GameState {
    #[default]
    Connecting,
    Playing,
    /// Waiting before the next connection attempt
    Disconnected,
}
