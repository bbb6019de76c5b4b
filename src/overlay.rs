//! Overlay node handle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::common::{
    Id, MergeSnapshot, NeighbourTable, NodeRecord, RoutingTable, SnapshotHandle,
};
use crate::config::Config;
use crate::core::{
    EgressBuffer, IngestBuffer, IngestConsumer, Layer, LayerId, LayerRegistry, MergeOutcome,
    NextHop, Prober, PurgeSupervisor, TcpProber,
};
use crate::store::{MemoryStore, SnapshotStore};
use crate::Result;

#[derive(Debug)]
/// A node of the layered overlay: its layers, their tables, and the background
/// ingest and purge threads maintaining them.
///
/// Background threads stop on [Overlay::shutdown] or when the overlay is dropped.
pub struct Overlay {
    config: Config,
    registry: Arc<LayerRegistry>,
    store: Arc<dyn SnapshotStore>,
    prober: Arc<dyn Prober>,
    ingest: Arc<IngestBuffer>,
    egress: Arc<EgressBuffer>,
    consumer: Arc<IngestConsumer>,

    background: bool,
    shutdown: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Overlay {
    /// Create a new overlay with default configuration, a random local Id and background threads.
    pub fn new() -> Result<Self> {
        OverlayBuilder::default().build()
    }

    /// Returns a builder to edit configuration before creating the overlay.
    pub fn builder() -> OverlayBuilder {
        OverlayBuilder::default()
    }

    // === Getters ===

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The local node record.
    pub fn local(&self) -> &NodeRecord {
        self.registry.local()
    }

    pub fn layer(&self, id: LayerId) -> Result<Arc<Layer>> {
        self.registry.layer(id)
    }

    pub fn layer_id(&self, name: &str) -> Option<LayerId> {
        self.registry.id_of(name)
    }

    /// All layers in id order.
    pub fn layers(&self) -> Vec<Arc<Layer>> {
        self.registry.layers()
    }

    /// Queue where the transport deposits received snapshots.
    pub fn ingest(&self) -> &IngestBuffer {
        &self.ingest
    }

    /// Queue of produced snapshots, such as RTT probe requests, for the transport to send.
    pub fn egress(&self) -> &EgressBuffer {
        &self.egress
    }

    /// A copy of the routing table of `layer`.
    pub fn routing_table(&self, layer: LayerId) -> Result<RoutingTable> {
        Ok(self.layer(layer)?.read().routing.clone())
    }

    /// A copy of the neighbour table of `layer`.
    pub fn neighbour_table(&self, layer: LayerId) -> Result<NeighbourTable> {
        Ok(self.layer(layer)?.read().neighbours.clone())
    }

    // === Public Methods ===

    /// Append a new layer, restoring its tables from the store if it has any, and
    /// start its purge supervisor.
    pub fn create_layer(&self, name: &str) -> Result<LayerId> {
        let layer = create_layer(&self.registry, self.store.as_ref(), &self.config, name)?;

        if self.background {
            self.spawn_purge(layer.clone())?;
        }

        Ok(layer.id())
    }

    /// Allow or refuse merging snapshots into `layer`.
    pub fn set_layer_enabled(&self, layer: LayerId, enabled: bool) -> Result<()> {
        self.layer(layer)?.set_enabled(enabled);

        info!(layer, enabled, "Changed layer access");

        Ok(())
    }

    /// Fold a single node into the routing table of `layer`.
    pub fn merge_routing_table(&self, layer: LayerId, node: &NodeRecord) -> Result<MergeOutcome> {
        self.layer(layer)?.merge_routing_table(node)
    }

    /// Fold a remote routing snapshot into the routing table of `layer`.
    pub fn merge_routing_snapshot(
        &self,
        layer: LayerId,
        snapshot: &MergeSnapshot,
    ) -> Result<Vec<MergeOutcome>> {
        self.layer(layer)?.merge_routing_snapshot(snapshot)
    }

    /// Fold measured nodes of a remote snapshot into the neighbour table of `layer`.
    pub fn merge_neighbour_table(&self, layer: LayerId, snapshot: &MergeSnapshot) -> Result<usize> {
        self.layer(layer)?.merge_neighbour_table(snapshot)
    }

    /// Resolve the next hop towards `target` in `layer`.
    pub fn find_next_hop(&self, layer: LayerId, target: &Id) -> Result<NextHop> {
        target.expect_len(self.config.dimension)?;

        self.layer(layer)?.find_next_hop(target)
    }

    /// Queue a received snapshot, shorthand for `self.ingest().push(handle)`.
    pub fn receive(&self, handle: SnapshotHandle) {
        self.ingest.push(handle);
    }

    /// Process every queued snapshot now, instead of waiting for the next poll.
    pub fn drain_ingest(&self) -> usize {
        self.consumer.drain()
    }

    /// Persist the tables of `layer` through the snapshot store.
    pub fn persist(&self, layer: LayerId) -> Result<()> {
        let layer = self.layer(layer)?;
        let tables = layer.read();

        self.store.persist(layer.id(), self.local(), &tables)
    }

    /// Stop the background threads and wait for them to finish.
    ///
    /// Idempotent, also called on drop.
    pub fn shutdown(&self) {
        if lock(&self.shutdown).take().is_none() {
            return;
        }

        let handles: Vec<JoinHandle<()>> = lock(&self.handles).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Background thread panicked");
            }
        }

        debug!(local = %self.local().id(), "Overlay shut down");
    }

    // === Private Methods ===

    fn spawn_purge(&self, layer: Arc<Layer>) -> Result<()> {
        if lock(&self.shutdown).is_none() {
            return Ok(());
        }

        let supervisor = PurgeSupervisor::new(
            layer.clone(),
            self.local().clone(),
            &self.config,
            self.store.clone(),
            self.prober.clone(),
        );
        let receiver = self.receiver.clone();

        let handle = thread::Builder::new()
            .name(format!("purge-{}", layer.name()))
            .spawn(move || supervisor.run(receiver))?;

        lock(&self.handles).push(handle);

        Ok(())
    }

    fn spawn_ingest(&self) -> Result<()> {
        let consumer = self.consumer.clone();
        let receiver = self.receiver.clone();

        let handle = thread::Builder::new()
            .name("ingest".to_string())
            .spawn(move || consumer.run(receiver))?;

        lock(&self.handles).push(handle);

        Ok(())
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create a layer in `registry`, restoring its tables from `store` when possible.
fn create_layer(
    registry: &LayerRegistry,
    store: &dyn SnapshotStore,
    config: &Config,
    name: &str,
) -> Result<Arc<Layer>> {
    let local = registry.local();

    registry.create_layer_with(name, |id| {
        match store.restore(id, local, config.neighbour_table_size) {
            Ok(restored) => restored,
            Err(error) => {
                warn!(layer = id, name, ?error, "Could not restore layer tables, starting empty");
                None
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
/// Configure and create an [Overlay].
pub struct OverlayBuilder {
    config: Config,
    local: Option<NodeRecord>,
    store: Option<Arc<dyn SnapshotStore>>,
    prober: Option<Arc<dyn Prober>>,
    background: bool,
}

impl Default for OverlayBuilder {
    fn default() -> Self {
        OverlayBuilder {
            config: Config::default(),
            local: None,
            store: None,
            prober: None,
            background: true,
        }
    }
}

impl OverlayBuilder {
    /// Start from an existing [Config].
    pub fn with_config(config: Config) -> Self {
        OverlayBuilder {
            config,
            ..Default::default()
        }
    }

    /// Set the local node record.
    ///
    /// Defaults to a random Id of [Config::dimension] digits on `0.0.0.0:0`.
    pub fn local(mut self, local: NodeRecord) -> Self {
        self.local = Some(local);

        self
    }

    /// Set the number of hex digits of every Id.
    pub fn dimension(mut self, dimension: usize) -> Self {
        self.config.dimension = dimension;

        self
    }

    /// Set the maximum number of entries of every neighbour table.
    pub fn neighbour_table_size(mut self, size: usize) -> Self {
        self.config.neighbour_table_size = size;

        self
    }

    /// Set the base sleep between purge cycles.
    pub fn sleep_time(mut self, sleep_time: Duration) -> Self {
        self.config.sleep_time = sleep_time;

        self
    }

    /// Set the additive backoff of the purge sleep after idle cycles.
    pub fn increment_time(mut self, increment_time: Duration) -> Self {
        self.config.increment_time = increment_time;

        self
    }

    /// Set the number of sweeps per purge cycle.
    pub fn purge_loop_count(mut self, count: u32) -> Self {
        self.config.purge_loop_count = count;

        self
    }

    /// Set the consecutive failed probes after which an entry is purged.
    pub fn purge_threshold(mut self, threshold: u8) -> Self {
        self.config.purge_threshold = threshold;

        self
    }

    /// Set the timeout of a single reachability probe.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe_timeout = timeout;

        self
    }

    /// Set how often the ingest buffer is polled.
    pub fn ingest_poll_interval(mut self, interval: Duration) -> Self {
        self.config.ingest_poll_interval = interval;

        self
    }

    /// Set the node merged into every new, non restored, layer.
    pub fn bootstrap(mut self, bootstrap: NodeRecord) -> Self {
        self.config.bootstrap = Some(bootstrap);

        self
    }

    /// Set the names of the layers created at startup, in id order.
    pub fn layers<S: AsRef<str>>(mut self, layers: &[S]) -> Self {
        self.config.layers = layers.iter().map(|s| s.as_ref().to_string()).collect();

        self
    }

    /// Set the access flag of a layer.
    pub fn layer_access(mut self, name: &str, enabled: bool) -> Self {
        self.config.layer_access.insert(name.to_string(), enabled);

        self
    }

    /// Set the snapshot store.
    ///
    /// Defaults to a [MemoryStore].
    pub fn store(mut self, store: impl SnapshotStore + 'static) -> Self {
        self.store = Some(Arc::new(store));

        self
    }

    /// Load, write and persist snapshots as XML files in `directory`.
    #[cfg(feature = "xml-store")]
    pub fn storage_directory(self, directory: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(self.store(crate::store::XmlStore::new(directory)?))
    }

    /// Set the reachability prober used by purge supervisors.
    ///
    /// Defaults to [TcpProber].
    pub fn prober(mut self, prober: impl Prober + 'static) -> Self {
        self.prober = Some(Arc::new(prober));

        self
    }

    /// Don't start the ingest consumer and purge threads.
    ///
    /// Snapshots are then only merged on [Overlay::drain_ingest].
    pub fn without_background_tasks(mut self) -> Self {
        self.background = false;

        self
    }

    /// Create the overlay, its startup layers, and start the background threads.
    pub fn build(self) -> Result<Overlay> {
        let config = self.config;

        let local = match self.local {
            Some(local) => local,
            None => NodeRecord::new(
                Id::random(config.dimension),
                SocketAddr::from(([0, 0, 0, 0], 0)),
            ),
        };
        local.id().expect_len(config.dimension)?;
        if let Some(bootstrap) = &config.bootstrap {
            bootstrap.id().expect_len(config.dimension)?;
        }

        let store: Arc<dyn SnapshotStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let prober: Arc<dyn Prober> = match self.prober {
            Some(prober) => prober,
            None => Arc::new(TcpProber),
        };

        let registry = Arc::new(LayerRegistry::new(local, &config));
        for name in &config.layers {
            create_layer(&registry, store.as_ref(), &config, name)?;
        }

        let ingest = Arc::new(IngestBuffer::new());
        let egress = Arc::new(EgressBuffer::new());
        let consumer = Arc::new(IngestConsumer::new(
            registry.clone(),
            store.clone(),
            ingest.clone(),
            egress.clone(),
            config.ingest_poll_interval,
        ));

        let (sender, receiver) = flume::bounded::<()>(1);

        let overlay = Overlay {
            config,
            registry,
            store,
            prober,
            ingest,
            egress,
            consumer,

            background: self.background,
            shutdown: Mutex::new(Some(sender)),
            receiver,
            handles: Mutex::new(Vec::new()),
        };

        if overlay.background {
            overlay.spawn_ingest()?;
            for layer in overlay.layers() {
                overlay.spawn_purge(layer)?;
            }
        }

        info!(
            local = %overlay.local().id(),
            layers = overlay.registry.len(),
            background = overlay.background,
            "Overlay started"
        );

        Ok(overlay)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use crate::core::merge::merge_routing_table;
    use crate::core::LayerTables;
    use crate::Error;

    use super::*;

    fn overlay() -> Overlay {
        Overlay::builder()
            .dimension(4)
            .local(NodeRecord::local_test("0000"))
            .without_background_tasks()
            .build()
            .unwrap()
    }

    #[test]
    fn startup_layers() {
        let overlay = overlay();

        assert_eq!(overlay.layer_id("base"), Some(0));
        assert_eq!(overlay.layer_id("storage"), Some(1));
        assert_eq!(overlay.create_layer("messaging").unwrap(), 2);
        assert!(matches!(
            overlay.create_layer("base"),
            Err(Error::DuplicateLayer(_))
        ));
    }

    #[test]
    fn rejects_mismatched_dimension() {
        let result = Overlay::builder()
            .dimension(4)
            .local(NodeRecord::local_test("00000"))
            .without_background_tasks()
            .build();

        assert!(matches!(result, Err(Error::InvalidIdLength { .. })));

        let overlay = overlay();
        assert!(overlay
            .find_next_hop(0, &Id::from_str("12345").unwrap())
            .is_err());
    }

    #[test]
    fn merge_and_route() {
        let overlay = overlay();

        overlay
            .merge_routing_table(0, &NodeRecord::local_test("8000"))
            .unwrap();
        overlay
            .merge_routing_table(0, &NodeRecord::local_test("4000"))
            .unwrap();

        let hop = overlay
            .find_next_hop(0, &Id::from_str("2000").unwrap())
            .unwrap();
        assert_eq!(hop.relay().unwrap().id().to_string(), "4000");

        assert!(overlay
            .find_next_hop(1, &Id::from_str("2000").unwrap())
            .unwrap()
            .is_local_root());
        assert!(matches!(
            overlay.find_next_hop(9, &Id::from_str("2000").unwrap()),
            Err(Error::UnknownLayer(9))
        ));
    }

    #[test]
    fn bootstrap_seeds_every_layer() {
        let overlay = Overlay::builder()
            .dimension(4)
            .local(NodeRecord::local_test("0000"))
            .bootstrap(NodeRecord::local_test("8000"))
            .without_background_tasks()
            .build()
            .unwrap();

        let messaging = overlay.create_layer("messaging").unwrap();

        for layer in [0, 1, messaging] {
            assert_eq!(overlay.routing_table(layer).unwrap().size(), 2);
        }
    }

    #[test]
    fn layers_restore_from_store() {
        let store = MemoryStore::new();
        let local = NodeRecord::local_test("0000");
        let mut tables = LayerTables::new(local.id(), 4);
        merge_routing_table(&mut tables.routing, &NodeRecord::local_test("c000")).unwrap();
        store.persist(1, &local, &tables).unwrap();

        let overlay = Overlay::builder()
            .dimension(4)
            .local(local)
            .bootstrap(NodeRecord::local_test("8000"))
            .store(store)
            .without_background_tasks()
            .build()
            .unwrap();

        let restored = overlay.routing_table(1).unwrap();
        assert_eq!(
            restored.column(0).unwrap().predecessor().unwrap().id().to_string(),
            "c000"
        );
        let base = overlay.routing_table(0).unwrap();
        assert_eq!(
            base.column(0).unwrap().predecessor().unwrap().id().to_string(),
            "8000"
        );
    }

    #[test]
    fn disabled_layers() {
        let overlay = Overlay::builder()
            .dimension(4)
            .local(NodeRecord::local_test("0000"))
            .layer_access("storage", false)
            .without_background_tasks()
            .build()
            .unwrap();

        assert!(overlay.layer(0).unwrap().is_enabled());
        assert!(!overlay.layer(1).unwrap().is_enabled());

        overlay.set_layer_enabled(1, true).unwrap();
        assert!(overlay.layer(1).unwrap().is_enabled());
        assert!(overlay.set_layer_enabled(5, true).is_err());
    }

    #[test]
    fn shutdown_joins_threads() {
        let overlay = Overlay::builder()
            .dimension(4)
            .local(NodeRecord::local_test("0000"))
            .prober(TcpProber)
            .sleep_time(Duration::from_secs(3600))
            .build()
            .unwrap();

        overlay.create_layer("messaging").unwrap();
        assert_eq!(lock(&overlay.handles).len(), 4);

        overlay.shutdown();
        assert!(lock(&overlay.handles).is_empty());

        overlay.shutdown();
        assert!(overlay.create_layer("late").is_ok());
        assert!(lock(&overlay.handles).is_empty());
    }

    #[derive(Debug, Default)]
    struct SlowStore {
        inner: MemoryStore,
    }

    impl SnapshotStore for SlowStore {
        fn load(&self, handle: &SnapshotHandle, dimension: usize) -> Result<MergeSnapshot> {
            self.inner.load(handle, dimension)
        }

        fn write_rtt_request(
            &self,
            layer: LayerId,
            local: &NodeRecord,
            target: &Id,
            peers: &[NodeRecord],
        ) -> Result<SnapshotHandle> {
            self.inner.write_rtt_request(layer, local, target, peers)
        }

        fn persist(&self, layer: LayerId, local: &NodeRecord, tables: &LayerTables) -> Result<()> {
            self.inner.persist(layer, local, tables)
        }

        fn restore(
            &self,
            layer: LayerId,
            local: &NodeRecord,
            neighbour_table_size: usize,
        ) -> Result<Option<LayerTables>> {
            thread::sleep(Duration::from_millis(50));
            self.inner.restore(layer, local, neighbour_table_size)
        }
    }

    #[test]
    fn concurrent_layer_creation_restores_own_tables() {
        let local = NodeRecord::local_test("0000");
        let store = SlowStore::default();

        for (layer, id) in [(0, "c000"), (1, "4000")] {
            let mut tables = LayerTables::new(local.id(), 4);
            merge_routing_table(&mut tables.routing, &NodeRecord::local_test(id)).unwrap();
            store.persist(layer, &local, &tables).unwrap();
        }

        let overlay = Overlay::builder()
            .dimension(4)
            .local(local)
            .layers(&[] as &[&str])
            .store(store)
            .without_background_tasks()
            .build()
            .unwrap();

        thread::scope(|scope| {
            for name in ["alpha", "beta"] {
                let overlay = &overlay;
                scope.spawn(move || overlay.create_layer(name).unwrap());
            }
        });

        let nodes = |layer| -> Vec<String> {
            let table = overlay.routing_table(layer).unwrap();
            table.nodes().iter().map(|node| node.id().to_string()).collect()
        };

        assert_eq!(nodes(0), ["c000"]);
        assert_eq!(nodes(1), ["4000"]);
    }

    #[test]
    fn unbounded_intervals_shut_down_cleanly() {
        let overlay = Overlay::builder()
            .dimension(4)
            .local(NodeRecord::local_test("0000"))
            .sleep_time(Duration::MAX)
            .ingest_poll_interval(Duration::MAX)
            .build()
            .unwrap();

        assert_eq!(lock(&overlay.handles).len(), 3);
        thread::sleep(Duration::from_millis(20));

        drop(lock(&overlay.shutdown).take());

        let handles: Vec<JoinHandle<()>> = lock(&overlay.handles).drain(..).collect();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
    }
}
