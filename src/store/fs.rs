//! [SnapshotStore] backed by XML files in a single directory.

use std::fs;
use std::io::ErrorKind;
use std::iter;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::common::{Id, MergeSnapshot, NodeRecord, SnapshotHandle, SnapshotKind};
use crate::core::{LayerId, LayerTables};
use crate::store::xml::{self, NEIGHBOUR_TABLE_ROOT, ROUTING_TABLE_ROOT, RTT_REQUEST_ROOT};
use crate::store::SnapshotStore;
use crate::Result;

#[derive(Debug, Clone)]
/// Reads received snapshots from, and writes requests and persisted tables to, a directory.
///
/// Persisted tables are stored as `RT_<layer>.xml` and `NT_<layer>.xml`.
pub struct XmlStore {
    directory: PathBuf,
}

impl XmlStore {
    /// Open a store in `directory`, creating it if missing.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        Ok(XmlStore { directory })
    }

    // === Getters ===

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the persisted routing table of `layer`.
    pub fn routing_table_path(&self, layer: LayerId) -> PathBuf {
        self.directory.join(format!("RT_{layer}.xml"))
    }

    /// Path of the persisted neighbour table of `layer`.
    pub fn neighbour_table_path(&self, layer: LayerId) -> PathBuf {
        self.directory.join(format!("NT_{layer}.xml"))
    }

    // === Private Methods ===

    /// Write `contents` next to `path` then rename it over, so readers never see partial files.
    fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        let temporary = path.with_extension("xml.tmp");

        fs::write(&temporary, contents)?;
        fs::rename(&temporary, path)?;

        trace!(?path, "Wrote snapshot");

        Ok(())
    }

    /// Read a persisted file, `None` if it doesn't exist or belongs to another node.
    fn read_persisted(
        &self,
        path: &Path,
        local: &NodeRecord,
        dimension: usize,
    ) -> Result<Option<MergeSnapshot>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let snapshot = xml::decode(&contents, dimension)?;

        if snapshot.sender.id() != local.id() {
            warn!(
                ?path,
                owner = %snapshot.sender.id(),
                local = %local.id(),
                "Ignoring persisted table of another node"
            );

            return Ok(None);
        }

        Ok(Some(snapshot))
    }
}

impl SnapshotStore for XmlStore {
    fn load(&self, handle: &SnapshotHandle, dimension: usize) -> Result<MergeSnapshot> {
        let path = if handle.path().is_absolute() {
            handle.path().to_path_buf()
        } else {
            self.directory.join(handle.path())
        };

        xml::decode(&fs::read_to_string(path)?, dimension)
    }

    fn write_rtt_request(
        &self,
        layer: LayerId,
        local: &NodeRecord,
        target: &Id,
        peers: &[NodeRecord],
    ) -> Result<SnapshotHandle> {
        let path = self
            .directory
            .join(SnapshotKind::rtt_request_file_name(layer, target));
        let unmeasured: Vec<NodeRecord> = peers.iter().map(|p| p.clone().with_rtt(None)).collect();

        let contents = xml::encode(RTT_REQUEST_ROOT, local, iter::empty(), unmeasured.iter())?;
        self.write_atomic(&path, &contents)?;

        Ok(SnapshotHandle::new(path))
    }

    fn persist(&self, layer: LayerId, local: &NodeRecord, tables: &LayerTables) -> Result<()> {
        let routing = xml::encode(
            ROUTING_TABLE_ROOT,
            local,
            tables.routing.entries(),
            iter::empty(),
        )?;
        let neighbours = xml::encode(
            NEIGHBOUR_TABLE_ROOT,
            local,
            iter::empty(),
            tables.neighbours.iter(),
        )?;

        self.write_atomic(&self.routing_table_path(layer), &routing)?;
        self.write_atomic(&self.neighbour_table_path(layer), &neighbours)?;

        debug!(
            layer,
            routing = tables.routing.size(),
            neighbours = tables.neighbours.len(),
            "Persisted layer tables"
        );

        Ok(())
    }

    fn restore(
        &self,
        layer: LayerId,
        local: &NodeRecord,
        neighbour_table_size: usize,
    ) -> Result<Option<LayerTables>> {
        let dimension = local.id().len();

        let routing = self.read_persisted(&self.routing_table_path(layer), local, dimension)?;
        let neighbours = self.read_persisted(&self.neighbour_table_path(layer), local, dimension)?;

        if routing.is_none() && neighbours.is_none() {
            return Ok(None);
        }

        let mut tables = LayerTables::new(local.id(), neighbour_table_size);

        for entry in routing.map(|s| s.routing).unwrap_or_default() {
            if let Err(error) = tables.routing.set(entry.position, entry.row, entry.node) {
                warn!(layer, ?error, "Skipping persisted routing entry");
            }
        }

        for node in neighbours.map(|s| s.neighbours).unwrap_or_default() {
            let index = tables.neighbours.len();
            if !tables.neighbours.restore(index, node) {
                warn!(layer, index, "Skipping persisted neighbour entry");
            }
        }

        tables.routing.repair();

        debug!(
            layer,
            routing = tables.routing.size(),
            neighbours = tables.neighbours.len(),
            "Restored layer tables"
        );

        Ok(Some(tables))
    }
}
