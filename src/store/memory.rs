//! In memory [SnapshotStore], for embedding without a filesystem and for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::common::{Id, MergeSnapshot, NodeRecord, SnapshotHandle, SnapshotKind};
use crate::core::{LayerId, LayerTables};
use crate::store::SnapshotStore;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    snapshots: HashMap<PathBuf, MergeSnapshot>,
    persisted: HashMap<LayerId, LayerTables>,
    persist_count: usize,
}

#[derive(Debug, Default)]
/// [SnapshotStore] keeping everything in memory, keyed by handle path and layer id.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot under `name` and return a handle the ingest pipeline can load.
    pub fn insert(&self, name: &str, snapshot: MergeSnapshot) -> SnapshotHandle {
        let handle = SnapshotHandle::new(name);
        self.lock()
            .snapshots
            .insert(handle.path().to_path_buf(), snapshot);

        handle
    }

    /// A previously written snapshot, such as an RTT probe request.
    pub fn get(&self, handle: &SnapshotHandle) -> Option<MergeSnapshot> {
        self.lock().snapshots.get(handle.path()).cloned()
    }

    /// Last persisted tables of `layer`.
    pub fn persisted(&self, layer: LayerId) -> Option<LayerTables> {
        self.lock().persisted.get(&layer).cloned()
    }

    /// Number of [SnapshotStore::persist] calls so far.
    pub fn persist_count(&self) -> usize {
        self.lock().persist_count
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, handle: &SnapshotHandle, dimension: usize) -> Result<MergeSnapshot> {
        let snapshot = self.get(handle).ok_or_else(|| {
            Error::IO(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                handle.path().display().to_string(),
            ))
        })?;
        snapshot.validate(dimension)?;

        Ok(snapshot)
    }

    fn write_rtt_request(
        &self,
        layer: LayerId,
        local: &NodeRecord,
        target: &Id,
        peers: &[NodeRecord],
    ) -> Result<SnapshotHandle> {
        let mut request = MergeSnapshot::new(local.clone());
        request.neighbours = peers.iter().map(|p| p.clone().with_rtt(None)).collect();

        Ok(self.insert(&SnapshotKind::rtt_request_file_name(layer, target), request))
    }

    fn persist(&self, layer: LayerId, _local: &NodeRecord, tables: &LayerTables) -> Result<()> {
        let mut inner = self.lock();
        inner.persisted.insert(layer, tables.clone());
        inner.persist_count += 1;

        Ok(())
    }

    fn restore(
        &self,
        layer: LayerId,
        _local: &NodeRecord,
        _neighbour_table_size: usize,
    ) -> Result<Option<LayerTables>> {
        Ok(self.persisted(layer))
    }
}
