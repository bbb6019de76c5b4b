//! Remote table snapshots handed to the merge pipeline, and the file naming that routes them.

use std::path::{Path, PathBuf};

use crate::common::{Id, NodeRecord, Row};
use crate::core::LayerId;
use crate::{Error, Result};

/// File name prefix of an RTT measurement response.
pub const RTT_RESPONSE_PREFIX: &str = "RcvRTT_";
/// File name prefix of an RTT probe request.
pub const RTT_REQUEST_PREFIX: &str = "GetRTT_";

#[derive(Debug, Clone, PartialEq)]
/// One populated routing table slot of a remote peer.
pub struct RoutingEntry {
    pub position: usize,
    pub row: Row,
    pub node: NodeRecord,
}

#[derive(Debug, Clone)]
/// A remote peer's self record and the contents of its routing and/or neighbour tables.
pub struct MergeSnapshot {
    pub sender: NodeRecord,
    pub routing: Vec<RoutingEntry>,
    pub neighbours: Vec<NodeRecord>,
}

impl MergeSnapshot {
    pub fn new(sender: NodeRecord) -> Self {
        MergeSnapshot {
            sender,
            routing: Vec::new(),
            neighbours: Vec::new(),
        }
    }

    /// Check every Id in this snapshot against the ring `dimension`.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        self.sender.id().expect_len(dimension)?;

        for entry in &self.routing {
            entry.node.id().expect_len(dimension)?;

            if entry.position >= dimension {
                return Err(Error::MalformedSnapshot(format!(
                    "routing entry index [{}][{}] out of range",
                    entry.position,
                    entry.row.index()
                )));
            }
        }

        for node in &self.neighbours {
            node.id().expect_len(dimension)?;
        }

        Ok(())
    }

    /// The sender followed by every distinct node of its routing entries.
    pub fn routing_nodes(&self) -> Vec<&NodeRecord> {
        let mut nodes = vec![&self.sender];

        for entry in &self.routing {
            if !nodes.contains(&&entry.node) {
                nodes.push(&entry.node);
            }
        }

        nodes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a snapshot file carries, derived from its file name.
pub enum SnapshotKind {
    /// `<layerId>_…`: a remote routing table for this layer.
    RoutingTable { layer: LayerId },
    /// `RcvRTT_<layerId>…`: RTT measurements for this layer.
    RttResponse { layer: LayerId },
    /// `GetRTT_<layerId>_<nodeId>.xml`: a request to measure RTTs, produced locally.
    RttRequest { layer: LayerId, node: Id },
}

impl SnapshotKind {
    /// Classify a snapshot by its file name.
    pub fn from_file_name(name: &str) -> Result<SnapshotKind> {
        let unrecognized = || Error::UnrecognizedSnapshotName(name.to_string());

        if let Some(rest) = name.strip_prefix(RTT_RESPONSE_PREFIX) {
            let (layer, _) = leading_layer(rest).ok_or_else(unrecognized)?;

            return Ok(SnapshotKind::RttResponse { layer });
        }

        if let Some(rest) = name.strip_prefix(RTT_REQUEST_PREFIX) {
            let (layer, rest) = leading_layer(rest).ok_or_else(unrecognized)?;
            let node = rest
                .strip_prefix('_')
                .map(|rest| rest.split('.').next().unwrap_or(rest))
                .ok_or_else(unrecognized)?;

            return Ok(SnapshotKind::RttRequest {
                layer,
                node: node.parse()?,
            });
        }

        let (layer, _) = leading_layer(name).ok_or_else(unrecognized)?;

        Ok(SnapshotKind::RoutingTable { layer })
    }

    /// File name of an RTT probe request for `node` in `layer`.
    pub fn rtt_request_file_name(layer: LayerId, node: &Id) -> String {
        format!("{RTT_REQUEST_PREFIX}{layer}_{node}.xml")
    }

    pub fn layer(&self) -> LayerId {
        match self {
            SnapshotKind::RoutingTable { layer }
            | SnapshotKind::RttResponse { layer }
            | SnapshotKind::RttRequest { layer, .. } => *layer,
        }
    }
}

/// Split a leading decimal layer id off `s`, which must be followed by `_`, `.` or nothing.
fn leading_layer(s: &str) -> Option<(LayerId, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, rest) = s.split_at(end);

    if !(rest.is_empty() || rest.starts_with('_') || rest.starts_with('.')) {
        return None;
    }

    Some((digits.parse().ok()?, rest))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Opaque handle to a snapshot file exchanged with the transport.
pub struct SnapshotHandle {
    path: PathBuf,
}

impl SnapshotHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotHandle { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of this snapshot, empty if the path has none.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> Result<SnapshotKind> {
        SnapshotKind::from_file_name(self.file_name())
    }
}
