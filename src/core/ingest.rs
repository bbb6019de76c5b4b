//! Consumer of the [IngestBuffer], routing received snapshots to their layer.

use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use tracing::{debug, info, warn};

use crate::common::{NodeRecord, SnapshotHandle, SnapshotKind};
use crate::core::buffer::{EgressBuffer, IngestBuffer};
use crate::core::registry::{LayerId, LayerRegistry};
use crate::core::wait_for_shutdown;
use crate::store::SnapshotStore;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
/// What processing one snapshot did.
pub enum Ingested {
    /// A routing snapshot was merged and an RTT probe request queued for the transport.
    Routing {
        layer: LayerId,
        /// Number of merges that changed the routing table.
        changed: usize,
        request: SnapshotHandle,
    },
    /// An RTT response was merged into the neighbour table.
    Neighbours { layer: LayerId, inserted: usize },
    /// The layer is disabled, nothing was read.
    Disabled { layer: LayerId },
}

#[derive(Debug)]
/// Polls the [IngestBuffer] and feeds every snapshot into the merge pipeline.
pub struct IngestConsumer {
    registry: Arc<LayerRegistry>,
    store: Arc<dyn SnapshotStore>,
    ingest: Arc<IngestBuffer>,
    egress: Arc<EgressBuffer>,
    poll_interval: Duration,
}

impl IngestConsumer {
    pub fn new(
        registry: Arc<LayerRegistry>,
        store: Arc<dyn SnapshotStore>,
        ingest: Arc<IngestBuffer>,
        egress: Arc<EgressBuffer>,
        poll_interval: Duration,
    ) -> Self {
        IngestConsumer {
            registry,
            store,
            ingest,
            egress,
            poll_interval,
        }
    }

    // === Public Methods ===

    /// Drain the buffer every poll interval, until `shutdown` receives a message
    /// or is disconnected.
    pub fn run(&self, shutdown: Receiver<()>) {
        info!(interval = ?self.poll_interval, "Ingest consumer started");

        while wait_for_shutdown(&shutdown, self.poll_interval) {
            self.drain();
        }

        debug!("Ingest consumer stopped");
    }

    /// Process every queued snapshot in FIFO order, returning how many were processed.
    ///
    /// Failures are logged and the snapshot dropped.
    pub fn drain(&self) -> usize {
        let handles = self.ingest.drain();

        for handle in &handles {
            match self.process(handle) {
                Ok(ingested) => debug!(file = handle.file_name(), ?ingested, "Ingested snapshot"),
                Err(error) => warn!(file = handle.file_name(), ?error, "Dropped snapshot"),
            }
        }

        handles.len()
    }

    /// Route a single snapshot by its file name and merge it into its layer.
    pub fn process(&self, handle: &SnapshotHandle) -> Result<Ingested> {
        let kind = handle.kind()?;
        let layer = self.registry.layer(kind.layer())?;

        if !layer.is_enabled() {
            debug!(layer = layer.id(), name = layer.name(), "Skipping snapshot of disabled layer");

            return Ok(Ingested::Disabled { layer: layer.id() });
        }

        let dimension = self.registry.local().id().len();

        match kind {
            SnapshotKind::RoutingTable { .. } => {
                let snapshot = self.store.load(handle, dimension)?;

                let changed = layer
                    .merge_routing_snapshot(&snapshot)?
                    .iter()
                    .filter(|outcome| outcome.changed())
                    .count();

                let peers: Vec<NodeRecord> =
                    snapshot.routing_nodes().into_iter().cloned().collect();
                let request = self.store.write_rtt_request(
                    layer.id(),
                    self.registry.local(),
                    snapshot.sender.id(),
                    &peers,
                )?;

                self.egress.push(request.clone());

                Ok(Ingested::Routing {
                    layer: layer.id(),
                    changed,
                    request,
                })
            }
            SnapshotKind::RttResponse { .. } => {
                let snapshot = self.store.load(handle, dimension)?;
                let inserted = layer.merge_neighbour_table(&snapshot)?;

                Ok(Ingested::Neighbours {
                    layer: layer.id(),
                    inserted,
                })
            }
            SnapshotKind::RttRequest { .. } => Err(Error::UnrecognizedSnapshotName(
                handle.file_name().to_string(),
            )),
        }
    }
}
