//! Shared code for the weapon server and client: the weapon core,
//! replicated components and the network protocol

pub mod components;
pub mod hitbox;
pub mod player;
pub mod protocol;
pub mod weapons;

pub use components::*;
pub use player::*;
pub use protocol::*;
pub use weapons::{
    FireBroadcast, FireRequest, NetRole, ServerFireOutcome, Weapon, WeaponEnv, WeaponKind,
    WeaponState, WeaponTable,
};
