//! Last-observed parameter values.
//!
//! Written by the inbound dispatch path, read by command issuers to
//! skip redundant round trips to the console. Last write wins; the
//! protocol carries no sequence numbers, so receipt order is the only
//! order there is.

use crate::osc::OscArg;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared map from parameter address to last observed value.
#[derive(Debug, Clone, Default)]
pub struct ValueCache {
    values: Arc<RwLock<HashMap<String, OscArg>>>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest value for an address.
    pub fn insert(&self, address: &str, value: OscArg) {
        self.values.write().insert(address.to_string(), value);
    }

    /// Last observed value for an address, if any.
    pub fn get(&self, address: &str) -> Option<OscArg> {
        self.values.read().get(address).cloned()
    }

    /// Drop everything. Called when a session is torn down so a new
    /// session starts from console truth.
    pub fn clear(&self) {
        self.values.write().clear();
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let cache = ValueCache::new();
        cache.insert("/ch/01/mix/fader", OscArg::Float(0.25));
        cache.insert("/ch/01/mix/fader", OscArg::Float(0.5));
        assert_eq!(cache.get("/ch/01/mix/fader"), Some(OscArg::Float(0.5)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = ValueCache::new();
        assert_eq!(cache.get("/ch/02/mix/on"), None);
    }

    #[test]
    fn test_clones_share_storage() {
        let cache = ValueCache::new();
        let alias = cache.clone();
        alias.insert("/main/st/mix/on", OscArg::Int(1));
        assert_eq!(cache.get("/main/st/mix/on"), Some(OscArg::Int(1)));

        cache.clear();
        assert!(alias.is_empty());
    }
}
