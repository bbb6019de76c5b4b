//! Persistence and snapshot exchange boundary.
//!
//! The overlay never touches files directly: received snapshots are loaded,
//! RTT probe requests are written, and tables are persisted and restored
//! through a [SnapshotStore].

mod memory;
#[cfg(feature = "xml-store")]
mod fs;
#[cfg(feature = "xml-store")]
pub mod xml;

use std::fmt::Debug;

use crate::common::{Id, MergeSnapshot, NodeRecord, SnapshotHandle};
use crate::core::{LayerId, LayerTables};
use crate::Result;

pub use memory::MemoryStore;
#[cfg(feature = "xml-store")]
pub use fs::XmlStore;

/// Loads and writes the snapshots exchanged with the transport, and persists layer tables.
pub trait SnapshotStore: Debug + Send + Sync {
    /// Load a received snapshot, rejecting Ids that do not have `dimension` digits.
    fn load(&self, handle: &SnapshotHandle, dimension: usize) -> Result<MergeSnapshot>;

    /// Write a request to measure the RTT of `peers`, on behalf of the remote `target`
    /// whose snapshot was just merged, and return its handle.
    fn write_rtt_request(
        &self,
        layer: LayerId,
        local: &NodeRecord,
        target: &Id,
        peers: &[NodeRecord],
    ) -> Result<SnapshotHandle>;

    /// Persist the tables of a layer.
    fn persist(&self, layer: LayerId, local: &NodeRecord, tables: &LayerTables) -> Result<()>;

    /// Restore previously persisted tables of a layer, if any.
    fn restore(
        &self,
        layer: LayerId,
        local: &NodeRecord,
        neighbour_table_size: usize,
    ) -> Result<Option<LayerTables>>;
}
