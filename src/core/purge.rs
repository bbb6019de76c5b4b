//! Liveness driven eviction of unreachable routing and neighbour entries.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use tracing::{debug, info, trace, warn};

use crate::common::{Id, NodeRecord, Row};
use crate::config::Config;
use crate::core::registry::{Layer, LayerTables};
use crate::core::wait_for_shutdown;
use crate::store::SnapshotStore;

/// Checks whether a remote node is reachable.
pub trait Prober: Debug + Send + Sync {
    /// Returns `true` if `node` answered within `timeout`.
    ///
    /// Any I/O failure counts as unreachable.
    fn is_reachable(&self, node: &NodeRecord, timeout: Duration) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
/// [Prober] that opens, and immediately closes, a TCP connection to the node's address.
pub struct TcpProber;

impl Prober for TcpProber {
    fn is_reachable(&self, node: &NodeRecord, timeout: Duration) -> bool {
        TcpStream::connect_timeout(&node.address(), timeout).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Additive sleep backoff between purge cycles.
pub struct Backoff {
    base: Duration,
    increment: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, increment: Duration) -> Self {
        Backoff {
            base,
            increment,
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Compute the sleep after a cycle that purged `purged` entries.
    ///
    /// Idle cycles grow the sleep by the increment, any purge resets it to the base.
    pub fn next(&mut self, purged: usize) -> Duration {
        self.current = if purged > 0 {
            self.base
        } else {
            self.current.saturating_add(self.increment)
        };

        self.current
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A node held by a routing column or by the neighbour table.
///
/// Routing failures are counted per column rather than per row, so a node moved
/// between rows of its column, like a predecessor demoted to the middle, keeps
/// its count, while a node newly entering a column starts from zero.
enum Slot {
    Routing { position: usize, occupant: Id },
    Neighbour { occupant: Id },
}

impl Slot {
    fn occupant(&self) -> &Id {
        match self {
            Slot::Routing { occupant, .. } | Slot::Neighbour { occupant } => occupant,
        }
    }

    /// Remove the occupant from this slot, returning `false` if it already left.
    fn clear(&self, tables: &mut LayerTables) -> bool {
        match self {
            Slot::Routing { position, occupant } => {
                let mut cleared = false;

                for row in Row::ALL {
                    if tables.routing.get(*position, row).map(NodeRecord::id) == Some(occupant) {
                        cleared |= tables.routing.clear(*position, row).is_some();
                    }
                }

                cleared
            }
            Slot::Neighbour { occupant } => tables.neighbours.remove(occupant).is_some(),
        }
    }
}

#[derive(Debug)]
/// Background liveness sweep of one [Layer].
pub struct PurgeSupervisor {
    layer: Arc<Layer>,
    local: NodeRecord,
    store: Arc<dyn SnapshotStore>,
    prober: Arc<dyn Prober>,

    threshold: u8,
    loop_count: u32,
    probe_timeout: Duration,

    failures: HashMap<Slot, u8>,
    backoff: Backoff,
}

impl PurgeSupervisor {
    pub fn new(
        layer: Arc<Layer>,
        local: NodeRecord,
        config: &Config,
        store: Arc<dyn SnapshotStore>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        PurgeSupervisor {
            layer,
            local,
            store,
            prober,

            threshold: config.purge_threshold.max(1),
            loop_count: config.purge_loop_count.max(1),
            probe_timeout: config.probe_timeout,

            failures: HashMap::new(),
            backoff: Backoff::new(config.sleep_time, config.increment_time),
        }
    }

    // === Getters ===

    pub fn layer(&self) -> &Arc<Layer> {
        &self.layer
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Highest consecutive failure count among the slots held by `node`.
    pub fn failures(&self, node: &Id) -> u8 {
        self.failures
            .iter()
            .filter(|(slot, _)| slot.occupant() == node)
            .map(|(_, count)| *count)
            .max()
            .unwrap_or(0)
    }

    // === Public Methods ===

    /// Run until `shutdown` receives a message or is disconnected.
    pub fn run(mut self, shutdown: Receiver<()>) {
        info!(layer = self.layer.id(), "Purge supervisor started");

        loop {
            let sleep = self.run_cycle();

            if !wait_for_shutdown(&shutdown, sleep) {
                break;
            }
        }

        debug!(layer = self.layer.id(), "Purge supervisor stopped");
    }

    /// Run `purge_loop_count` sweeps, persist the layer, and return the next sleep.
    pub fn run_cycle(&mut self) -> Duration {
        let purged: usize = (0..self.loop_count).map(|_| self.sweep()).sum();

        {
            let tables = self.layer.read();
            if let Err(error) = self.store.persist(self.layer.id(), &self.local, &tables) {
                warn!(layer = self.layer.id(), ?error, "Failed to persist layer tables");
            }
        }

        let sleep = self.backoff.next(purged);
        debug!(layer = self.layer.id(), purged, ?sleep, "Purge cycle done");

        sleep
    }

    /// Probe every populated slot once, returning the number of purged slots.
    pub fn sweep(&mut self) -> usize {
        let observed = self.observe();

        let mut reachable: HashMap<&Id, bool> = HashMap::new();
        for (slot, node) in &observed {
            if !reachable.contains_key(slot.occupant()) {
                let up = self.prober.is_reachable(node, self.probe_timeout);
                trace!(layer = self.layer.id(), id = ?node.id(), up, "Probed node");

                reachable.insert(slot.occupant(), up);
            }
        }

        let current: HashSet<&Slot> = observed.iter().map(|(slot, _)| slot).collect();
        self.failures.retain(|slot, _| current.contains(slot));

        let mut tables = self.layer.write();
        let mut purged = 0;

        for (slot, _) in &observed {
            if reachable.get(slot.occupant()).copied().unwrap_or(false) {
                self.failures.remove(slot);
                continue;
            }

            let failures = self.failures.entry(slot.clone()).or_insert(0);
            *failures = failures.saturating_add(1);

            if *failures < self.threshold {
                continue;
            }

            self.failures.remove(slot);

            if slot.clear(&mut tables) {
                debug!(layer = self.layer.id(), ?slot, "Purged unreachable node");
                purged += 1;
            }
        }

        if purged > 0 {
            tables.routing.repair();
        }

        purged
    }

    // === Private Methods ===

    /// Every populated slot with its current occupant.
    fn observe(&self) -> Vec<(Slot, NodeRecord)> {
        let tables = self.layer.read();

        let mut slots: Vec<(Slot, NodeRecord)> = Vec::new();

        for (position, _, node) in tables.routing.entries() {
            let slot = Slot::Routing {
                position,
                occupant: node.id().clone(),
            };

            if !slots.iter().any(|(seen, _)| seen == &slot) {
                slots.push((slot, node.clone()));
            }
        }

        let neighbours = tables.neighbours.iter().map(|node| {
            let slot = Slot::Neighbour {
                occupant: node.id().clone(),
            };

            (slot, node.clone())
        });

        slots.extend(neighbours);

        slots
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    use crate::common::MergeSnapshot;
    use crate::core::registry::LayerRegistry;
    use crate::store::MemoryStore;

    use super::*;

    #[derive(Debug, Default)]
    struct ScriptedProber {
        down: Mutex<HashSet<String>>,
        probes: AtomicUsize,
    }

    impl ScriptedProber {
        fn set_down(&self, id: &str, down: bool) {
            let mut set = self.down.lock().unwrap();
            if down {
                set.insert(id.to_string());
            } else {
                set.remove(id);
            }
        }
    }

    impl Prober for ScriptedProber {
        fn is_reachable(&self, node: &NodeRecord, _timeout: Duration) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            !self.down.lock().unwrap().contains(&node.id().to_string())
        }
    }

    struct Fixture {
        supervisor: PurgeSupervisor,
        prober: Arc<ScriptedProber>,
        store: Arc<MemoryStore>,
    }

    fn fixture(config: Config) -> Fixture {
        let local = NodeRecord::local_test("0000");
        let registry = LayerRegistry::new(local.clone(), &config);
        let layer = registry.create_layer("base").unwrap();

        layer
            .merge_routing_table(&NodeRecord::local_test("8000"))
            .unwrap();
        layer
            .merge_routing_table(&NodeRecord::local_test("4000"))
            .unwrap();
        layer
            .write()
            .neighbours
            .insert(NodeRecord::local_test("4000").with_rtt(Some(5.0)));

        let prober = Arc::new(ScriptedProber::default());
        let store = Arc::new(MemoryStore::new());
        let supervisor =
            PurgeSupervisor::new(layer, local, &config, store.clone(), prober.clone());

        Fixture {
            supervisor,
            prober,
            store,
        }
    }

    #[test]
    fn four_failures_purge() {
        let Fixture {
            mut supervisor,
            prober,
            ..
        } = fixture(Config::default());
        let down: Id = "4000".parse().unwrap();

        prober.set_down("4000", true);

        for expected in 1..=3 {
            assert_eq!(supervisor.sweep(), 0);
            assert_eq!(supervisor.failures(&down), expected);
        }

        // Successor of column 0 and the neighbour entry.
        assert_eq!(supervisor.sweep(), 2);
        assert_eq!(supervisor.failures(&down), 0);

        let tables = supervisor.layer().tables();
        let column = tables.routing.column(0).unwrap();

        assert_eq!(column.predecessor().unwrap().id().to_string(), "8000");
        assert_eq!(column.successor().unwrap().id().to_string(), "8000");
        assert!(!tables.routing.columns().iter().any(|c| c.contains(&down)));
        assert!(tables.neighbours.is_empty());
    }

    #[test]
    fn success_resets_counter() {
        let Fixture {
            mut supervisor,
            prober,
            ..
        } = fixture(Config::default());
        let flaky: Id = "4000".parse().unwrap();

        prober.set_down("4000", true);
        for _ in 0..3 {
            supervisor.sweep();
        }

        prober.set_down("4000", false);
        assert_eq!(supervisor.sweep(), 0);
        assert_eq!(supervisor.failures(&flaky), 0);

        prober.set_down("4000", true);
        for _ in 0..3 {
            assert_eq!(supervisor.sweep(), 0);
        }
        assert_eq!(supervisor.failures(&flaky), 3);
        assert!(supervisor.layer().tables().neighbours.contains(&flaky));

        assert_eq!(supervisor.sweep(), 2);
    }

    #[test]
    fn demoted_node_keeps_failures() {
        let Fixture {
            mut supervisor,
            prober,
            ..
        } = fixture(Config::default());
        let demoted: Id = "8000".parse().unwrap();

        prober.set_down("8000", true);
        for _ in 0..3 {
            assert_eq!(supervisor.sweep(), 0);
        }

        // c000 takes the predecessor row and pushes 8000 to the middle of column 0.
        supervisor
            .layer()
            .merge_routing_table(&NodeRecord::local_test("c000"))
            .unwrap();
        let column = supervisor.layer().tables().routing.column(0).unwrap().clone();
        assert_eq!(column.middle().unwrap().id(), &demoted);
        assert_eq!(supervisor.failures(&demoted), 3);

        assert_eq!(supervisor.sweep(), 1);

        let tables = supervisor.layer().tables();
        let column = tables.routing.column(0).unwrap();
        assert_eq!(column.predecessor().unwrap().id().to_string(), "c000");
        assert_eq!(column.successor().unwrap().id().to_string(), "4000");
        assert!(column.middle().is_none());
    }

    #[test]
    fn probes_each_node_once_per_sweep() {
        let Fixture {
            mut supervisor,
            prober,
            ..
        } = fixture(Config::default());

        supervisor.sweep();

        assert_eq!(prober.probes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn all_unreachable_empties_tables() {
        let config = Config {
            purge_threshold: 1,
            ..Default::default()
        };
        let Fixture {
            mut supervisor,
            prober,
            ..
        } = fixture(config);

        prober.set_down("4000", true);
        prober.set_down("8000", true);

        assert_eq!(supervisor.sweep(), 3);

        let tables = supervisor.layer().tables();
        assert!(tables.routing.is_empty());
        assert!(tables.neighbours.is_empty());
    }

    #[test]
    fn backoff() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(30));

        assert_eq!(backoff.current(), Duration::from_secs(60));
        assert_eq!(backoff.next(0), Duration::from_secs(90));
        assert_eq!(backoff.next(0), Duration::from_secs(120));
        assert_eq!(backoff.next(3), Duration::from_secs(60));
        assert_eq!(backoff.next(0), Duration::from_secs(90));

        let mut saturating = Backoff::new(Duration::MAX, Duration::from_secs(1));
        assert_eq!(saturating.next(0), Duration::MAX);
    }

    #[test]
    fn cycle_persists_and_backs_off() {
        let config = Config {
            sleep_time: Duration::from_secs(10),
            increment_time: Duration::from_secs(5),
            purge_loop_count: 2,
            purge_threshold: 2,
            ..Default::default()
        };
        let Fixture {
            mut supervisor,
            prober,
            store,
        } = fixture(config);

        assert_eq!(supervisor.run_cycle(), Duration::from_secs(15));
        assert_eq!(supervisor.run_cycle(), Duration::from_secs(20));
        assert_eq!(store.persist_count(), 2);

        prober.set_down("4000", true);

        assert_eq!(supervisor.run_cycle(), Duration::from_secs(10));
        assert_eq!(store.persist_count(), 3);

        let persisted = store.persisted(0).unwrap();
        assert!(persisted.neighbours.is_empty());
        assert_eq!(persisted.routing.size(), 2);
    }

    #[test]
    fn run_stops_on_shutdown() {
        let Fixture { supervisor, .. } = fixture(Config::default());
        let (sender, receiver) = flume::bounded::<()>(1);

        let handle = thread::spawn(move || supervisor.run(receiver));
        drop(sender);

        handle.join().unwrap();
    }

    #[test]
    fn unbounded_sleep_stops_on_shutdown() {
        let config = Config {
            sleep_time: Duration::MAX,
            ..Default::default()
        };
        let Fixture { supervisor, .. } = fixture(config);
        let (sender, receiver) = flume::bounded::<()>(1);

        let handle = thread::spawn(move || supervisor.run(receiver));
        thread::sleep(Duration::from_millis(20));
        drop(sender);

        assert!(handle.join().is_ok());
    }

    #[derive(Debug, Default)]
    struct Flaky {
        calls: AtomicUsize,
    }

    impl Prober for Flaky {
        fn is_reachable(&self, _node: &NodeRecord, _timeout: Duration) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0
        }
    }

    fn assert_consistent(tables: &LayerTables) {
        for column in tables.routing.columns() {
            assert!(column.is_empty() || column.bounds().is_some(), "{column:?}");
        }

        let neighbours = &tables.neighbours;
        assert!(neighbours.len() <= neighbours.capacity());

        let rtts: Vec<f64> = neighbours.iter().filter_map(NodeRecord::rtt).collect();
        assert_eq!(rtts.len(), neighbours.len());
        assert!(rtts.windows(2).all(|pair| pair[0] <= pair[1]), "{rtts:?}");
    }

    #[test]
    fn sweeps_and_merges_interleave() {
        let config = Config {
            purge_threshold: 1,
            neighbour_table_size: 4,
            ..Default::default()
        };
        let local = NodeRecord::local_test("0000");
        let registry = LayerRegistry::new(local.clone(), &config);
        let layer = registry.create_layer("base").unwrap();

        let mut supervisor = PurgeSupervisor::new(
            layer.clone(),
            local,
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(Flaky::default()),
        );

        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    supervisor.sweep();
                }
            });

            for worker in 0..4 {
                let layer = &layer;

                scope.spawn(move || {
                    for round in 0..200 {
                        let node = NodeRecord::local_test(&Id::random(4).to_string());
                        let _ = layer.merge_routing_table(&node);

                        let rtt = ((worker * 200 + round) % 37) as f64 + 0.5;
                        let mut snapshot = MergeSnapshot::new(node.with_rtt(Some(rtt)));
                        snapshot.neighbours.push(
                            NodeRecord::local_test(&Id::random(4).to_string())
                                .with_rtt(Some(rtt / 2.0)),
                        );
                        layer.merge_neighbour_table(&snapshot).unwrap();

                        assert_consistent(&layer.read());
                    }
                });
            }
        });

        assert_consistent(&layer.tables());
    }
}
