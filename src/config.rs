use std::{collections::HashMap, time::Duration};

use crate::common::{NodeRecord, DEFAULT_DIMENSION, DEFAULT_NEIGHBOUR_TABLE_SIZE};

/// Base sleep between two purge cycles.
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(60);
/// Added to the purge sleep after every cycle that purged nothing.
pub const DEFAULT_INCREMENT_TIME: Duration = Duration::from_secs(30);
/// Sweeps per purge cycle, the table is persisted after each cycle.
pub const DEFAULT_PURGE_LOOP_COUNT: u32 = 4;
/// Consecutive failed probes after which an entry is purged.
pub const DEFAULT_PURGE_THRESHOLD: u8 = 4;
/// Timeout of a single reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
/// Interval at which the ingest buffer is polled.
pub const DEFAULT_INGEST_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Layers created at startup, in id order.
pub const DEFAULT_LAYERS: [&str; 2] = ["base", "storage"];

#[derive(Debug, Clone)]
/// Overlay Configurations
pub struct Config {
    /// Number of hex digits of every Id, and columns of every routing table (`RT_length`).
    ///
    /// Defaults to [DEFAULT_DIMENSION]
    pub dimension: usize,
    /// Maximum number of entries of every neighbour table (`NT_length`).
    ///
    /// Defaults to [DEFAULT_NEIGHBOUR_TABLE_SIZE]
    pub neighbour_table_size: usize,
    /// Base sleep of the purge supervisor between cycles (`Sleep_time`).
    ///
    /// Defaults to [DEFAULT_SLEEP_TIME]
    pub sleep_time: Duration,
    /// Additive backoff applied to the purge sleep after an idle cycle (`Increment_time`).
    ///
    /// Defaults to [DEFAULT_INCREMENT_TIME]
    pub increment_time: Duration,
    /// Sweeps per purge cycle (`PurgeLoopCount`).
    ///
    /// Defaults to [DEFAULT_PURGE_LOOP_COUNT]
    pub purge_loop_count: u32,
    /// Consecutive failed probes before an entry is purged.
    ///
    /// Defaults to [DEFAULT_PURGE_THRESHOLD]
    pub purge_threshold: u8,
    /// Reachability probe timeout.
    ///
    /// Defaults to [DEFAULT_PROBE_TIMEOUT]
    pub probe_timeout: Duration,
    /// How often the ingest consumer checks for new snapshots.
    ///
    /// Defaults to [DEFAULT_INGEST_POLL_INTERVAL]
    pub ingest_poll_interval: Duration,
    /// Node merged into every new layer that could not be restored from persistence.
    ///
    /// Defaults to None
    pub bootstrap: Option<NodeRecord>,
    /// Names of the layers created at startup, their position is their id.
    ///
    /// Defaults to [DEFAULT_LAYERS]
    pub layers: Vec<String>,
    /// Per layer access flag, layers missing from this map are enabled.
    pub layer_access: HashMap<String, bool>,
}

impl Config {
    /// Whether snapshots for the layer `name` should be merged.
    pub fn layer_enabled(&self, name: &str) -> bool {
        self.layer_access.get(name).copied().unwrap_or(true)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            neighbour_table_size: DEFAULT_NEIGHBOUR_TABLE_SIZE,
            sleep_time: DEFAULT_SLEEP_TIME,
            increment_time: DEFAULT_INCREMENT_TIME,
            purge_loop_count: DEFAULT_PURGE_LOOP_COUNT,
            purge_threshold: DEFAULT_PURGE_THRESHOLD,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            ingest_poll_interval: DEFAULT_INGEST_POLL_INTERVAL,
            bootstrap: None,
            layers: DEFAULT_LAYERS.iter().map(|s| s.to_string()).collect(),
            layer_access: HashMap::new(),
        }
    }
}
