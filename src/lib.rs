//! X32 Bridge - console connection core
//!
//! Bridges a web control surface to a Behringer X32 digital mixer over
//! its OSC/UDP control protocol. This library is the connection core:
//! session management, wire codec, channel mapping, meter decoding, and
//! the update bus the front end subscribes to. The HTTP/WebSocket front
//! end itself lives outside this crate and attaches through
//! [`X32Connection`] and [`UpdateBus`].

pub mod cache;
pub mod channels;
pub mod config;
pub mod connection;
pub mod events;
pub mod meters;
pub mod osc;

pub use cache::ValueCache;
pub use channels::{ChannelMap, MASTER};
pub use config::BridgeConfig;
pub use connection::{ConnectionError, ConnectionState, X32Connection};
pub use events::{Update, UpdateBus};
pub use meters::MeterFrame;
pub use osc::{OscArg, OscMessage};
