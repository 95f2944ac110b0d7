//! Client-side game systems

mod connection;

pub use connection::*;
