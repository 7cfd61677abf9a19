//! Collector configuration


use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_INITIAL_CAPACITY;


/// Settings for a `Collector`. Missing fields take their default when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// check every reference before and after each collection
    pub verify_heap: bool,
    /// cells the heap reserves room for up front
    pub initial_capacity: usize,
    /// log the stats logger summary after each collection
    pub log_stats: bool,
}


impl GcConfig {
    /// Read a configuration from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<GcConfig> {
        serde_json::from_str(json)
    }
}


impl Default for GcConfig {
    fn default() -> GcConfig {
        GcConfig {
            verify_heap: false,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            log_stats: false,
        }
    }
}
