//! Channel name mapping.
//!
//! Bidirectional map between the display names the front end uses
//! ("Headset 1", "Hand 2", ...) and the console's numeric channels,
//! plus the address templates for fader and mute parameters. The map is
//! built once from configuration and immutable afterwards.

use std::collections::HashMap;
use thiserror::Error;

/// Display name of the main stereo bus. Not a numeric channel; it maps
/// to the fixed `/main/st` addresses.
pub const MASTER: &str = "master";

/// Main stereo fader address.
pub const MASTER_FADER: &str = "/main/st/mix/fader";
/// Main stereo mute address.
pub const MASTER_MUTE: &str = "/main/st/mix/on";

/// Error building a [`ChannelMap`] from configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelMapError {
    #[error("channel number {0} is mapped to more than one name")]
    DuplicateNumber(u16),
    #[error("channel name {0:?} appears more than once")]
    DuplicateName(String),
    #[error("channel number {0} is outside the console range 1-32")]
    OutOfRange(u16),
    #[error("the name {MASTER:?} is reserved for the main stereo bus")]
    ReservedName,
}

/// Ordered, immutable mapping between display names and channel numbers.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    entries: Vec<(String, u16)>,
    by_name: HashMap<String, u16>,
    by_number: HashMap<u16, String>,
}

impl ChannelMap {
    /// Build the map, rejecting duplicate names or numbers so the
    /// reverse lookup stays well-defined.
    pub fn new(entries: Vec<(String, u16)>) -> Result<Self, ChannelMapError> {
        let mut by_name = HashMap::new();
        let mut by_number = HashMap::new();

        for (name, number) in &entries {
            if name == MASTER {
                return Err(ChannelMapError::ReservedName);
            }
            if !(1..=32).contains(number) {
                return Err(ChannelMapError::OutOfRange(*number));
            }
            if by_name.insert(name.clone(), *number).is_some() {
                return Err(ChannelMapError::DuplicateName(name.clone()));
            }
            if by_number.insert(*number, name.clone()).is_some() {
                return Err(ChannelMapError::DuplicateNumber(*number));
            }
        }

        Ok(Self {
            entries,
            by_name,
            by_number,
        })
    }

    /// Display names in configuration order, master excluded.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Fader address for a display name or [`MASTER`].
    pub fn fader_address(&self, name: &str) -> Option<String> {
        if name == MASTER {
            return Some(MASTER_FADER.to_string());
        }
        self.by_name
            .get(name)
            .map(|n| format!("/ch/{n:02}/mix/fader"))
    }

    /// Mute address for a display name or [`MASTER`].
    pub fn mute_address(&self, name: &str) -> Option<String> {
        if name == MASTER {
            return Some(MASTER_MUTE.to_string());
        }
        self.by_name.get(name).map(|n| format!("/ch/{n:02}/mix/on"))
    }

    /// Fader addresses for every mapped channel plus master, in
    /// configuration order. This is the subscription list sent to the
    /// console after the handshake.
    pub fn all_fader_addresses(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(_, n)| format!("/ch/{n:02}/mix/fader"))
            .chain(std::iter::once(MASTER_FADER.to_string()))
            .collect()
    }

    /// Classify an inbound parameter address back to a display name.
    ///
    /// `/ch/NN/...` resolves through the number map; `/main/st/...`
    /// resolves to [`MASTER`]. Unmapped channels and unrelated
    /// addresses return `None` and are dropped upstream.
    pub fn name_for_address(&self, address: &str) -> Option<&str> {
        if address.starts_with("/main/st/") {
            return Some(MASTER);
        }
        let number: u16 = address
            .strip_prefix("/ch/")?
            .split('/')
            .next()?
            .parse()
            .ok()?;
        self.by_number.get(&number).map(String::as_str)
    }
}
