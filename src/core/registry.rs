//! Layers by id and name, each owning a lock protected routing and neighbour table pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::common::{Id, MergeSnapshot, NeighbourTable, NodeRecord, RoutingTable};
use crate::config::Config;
use crate::core::merge::{self, MergeOutcome};
use crate::core::next_hop::{self, NextHop};
use crate::{Error, Result};

/// Sequential layer id, also the layer's index in the [LayerRegistry].
pub type LayerId = usize;

#[derive(Debug, Clone)]
/// Routing and neighbour tables of one layer.
pub struct LayerTables {
    pub routing: RoutingTable,
    pub neighbours: NeighbourTable,
}

impl LayerTables {
    /// Empty tables for the local `id`.
    pub fn new(id: &Id, neighbour_table_size: usize) -> Self {
        LayerTables {
            routing: RoutingTable::new(id.clone()),
            neighbours: NeighbourTable::new(id.clone(), neighbour_table_size),
        }
    }
}

#[derive(Debug)]
/// An independently maintained routing and neighbour table pair.
///
/// Every mutation of the tables happens under the write guard, so merges and
/// purges never interleave.
pub struct Layer {
    id: LayerId,
    name: String,
    enabled: AtomicBool,
    tables: RwLock<LayerTables>,
}

impl Layer {
    pub(crate) fn new(id: LayerId, name: String, enabled: bool, tables: LayerTables) -> Self {
        Layer {
            id,
            name,
            enabled: AtomicBool::new(enabled),
            tables: RwLock::new(tables),
        }
    }

    // === Getters ===

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Shared access to the tables.
    pub fn read(&self) -> RwLockReadGuard<'_, LayerTables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the tables.
    pub fn write(&self) -> RwLockWriteGuard<'_, LayerTables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current tables.
    pub fn tables(&self) -> LayerTables {
        self.read().clone()
    }

    // === Public Methods ===

    /// Fold a single node into the routing table.
    pub fn merge_routing_table(&self, candidate: &NodeRecord) -> Result<MergeOutcome> {
        merge::merge_routing_table(&mut self.write().routing, candidate)
    }

    /// Fold a remote routing snapshot into the routing table.
    ///
    /// The whole snapshot is validated before anything is merged.
    pub fn merge_routing_snapshot(&self, snapshot: &MergeSnapshot) -> Result<Vec<MergeOutcome>> {
        let mut tables = self.write();
        snapshot.validate(tables.routing.dimension())?;

        merge::merge_routing_snapshot(&mut tables.routing, snapshot)
    }

    /// Fold a remote neighbour snapshot into the neighbour table.
    pub fn merge_neighbour_table(&self, snapshot: &MergeSnapshot) -> Result<usize> {
        let mut tables = self.write();
        snapshot.validate(tables.routing.dimension())?;

        Ok(merge::merge_neighbour_table(&mut tables.neighbours, snapshot))
    }

    pub fn find_next_hop(&self, target: &Id) -> Result<NextHop> {
        next_hop::find_next_hop(&self.read().routing, target)
    }
}

#[derive(Debug, Default)]
struct Layers {
    by_id: Vec<Arc<Layer>>,
    by_name: HashMap<String, LayerId>,
}

#[derive(Debug)]
/// Ordered collection of [Layer]s, with O(1) lookup by id.
pub struct LayerRegistry {
    local: NodeRecord,
    config: Config,
    layers: RwLock<Layers>,
}

impl LayerRegistry {
    /// Create an empty registry for the `local` node.
    pub fn new(local: NodeRecord, config: &Config) -> Self {
        LayerRegistry {
            local,
            config: config.clone(),
            layers: RwLock::new(Layers::default()),
        }
    }

    // === Getters ===

    pub fn local(&self) -> &NodeRecord {
        &self.local
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }

    pub fn get(&self, id: LayerId) -> Option<Arc<Layer>> {
        self.read().by_id.get(id).cloned()
    }

    /// Like [Self::get] but returns [Error::UnknownLayer] for unregistered ids.
    pub fn layer(&self, id: LayerId) -> Result<Arc<Layer>> {
        self.get(id).ok_or(Error::UnknownLayer(id))
    }

    pub fn id_of(&self, name: &str) -> Option<LayerId> {
        self.read().by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<Layer>> {
        let layers = self.read();

        layers
            .by_name
            .get(name)
            .and_then(|id| layers.by_id.get(*id))
            .cloned()
            .ok_or_else(|| Error::UnknownLayerName(name.to_string()))
    }

    /// All layers in id order.
    pub fn layers(&self) -> Vec<Arc<Layer>> {
        self.read().by_id.clone()
    }

    // === Public Methods ===

    /// Append a new layer with empty tables, seeded with the bootstrap node.
    pub fn create_layer(&self, name: &str) -> Result<Arc<Layer>> {
        self.create_layer_with(name, |_| None)
    }

    /// Append a new layer, using the tables `restore` returns for the allocated id
    /// if some, or empty tables seeded with the bootstrap node otherwise.
    ///
    /// `restore` runs under the registry write lock, so the id it receives is the
    /// id the layer gets.
    pub fn create_layer_with<F>(&self, name: &str, restore: F) -> Result<Arc<Layer>>
    where
        F: FnOnce(LayerId) -> Option<LayerTables>,
    {
        let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);

        if layers.by_name.contains_key(name) {
            return Err(Error::DuplicateLayer(name.to_string()));
        }

        let id = layers.by_id.len();

        let restored = restore(id);
        let was_restored = restored.is_some();
        let mut tables = restored
            .unwrap_or_else(|| LayerTables::new(self.local.id(), self.config.neighbour_table_size));

        if !was_restored {
            if let Some(bootstrap) = &self.config.bootstrap {
                let outcome = merge::merge_routing_table(&mut tables.routing, bootstrap)?;
                debug!(layer = name, ?outcome, "Merged bootstrap node");
            }
        }

        let enabled = self.config.layer_enabled(name);
        let layer = Arc::new(Layer::new(id, name.to_string(), enabled, tables));

        layers.by_id.push(layer.clone());
        layers.by_name.insert(name.to_string(), id);

        info!(id, layer = name, enabled, restored = was_restored, "Created layer");

        Ok(layer)
    }

    // === Private Methods ===

    fn read(&self) -> RwLockReadGuard<'_, Layers> {
        self.layers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn registry(bootstrap: Option<&str>) -> LayerRegistry {
        let config = Config {
            neighbour_table_size: 4,
            bootstrap: bootstrap.map(NodeRecord::local_test),
            layer_access: [("storage".to_string(), false)].into(),
            ..Default::default()
        };

        LayerRegistry::new(NodeRecord::local_test("0000"), &config)
    }

    #[test]
    fn sequential_ids() {
        let registry = registry(None);

        let base = registry.create_layer("base").unwrap();
        let storage = registry.create_layer("storage").unwrap();
        let messaging = registry.create_layer("messaging").unwrap();

        assert_eq!((base.id(), storage.id(), messaging.id()), (0, 1, 2));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.id_of("messaging"), Some(2));
        assert_eq!(registry.get(1).unwrap().name(), "storage");
        assert!(registry.get(3).is_none());
        assert!(matches!(registry.layer(7), Err(Error::UnknownLayer(7))));
        assert!(matches!(
            registry.by_name("nope"),
            Err(Error::UnknownLayerName(_))
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = registry(None);

        registry.create_layer("base").unwrap();

        assert!(matches!(
            registry.create_layer("base"),
            Err(Error::DuplicateLayer(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn access_flag_from_config() {
        let registry = registry(None);

        let base = registry.create_layer("base").unwrap();
        let storage = registry.create_layer("storage").unwrap();

        assert!(base.is_enabled());
        assert!(!storage.is_enabled());

        storage.set_enabled(true);
        assert!(storage.is_enabled());
    }

    #[test]
    fn new_layers_merge_bootstrap() {
        let registry = registry(Some("8000"));

        let layer = registry.create_layer("base").unwrap();
        let tables = layer.tables();

        assert_eq!(tables.routing.size(), 2);
        assert_eq!(
            tables.routing.column(0).unwrap().predecessor().unwrap().id(),
            &Id::from_str("8000").unwrap()
        );
        assert!(tables.neighbours.is_empty());
    }

    #[test]
    fn restored_layers_skip_bootstrap() {
        let registry = registry(Some("8000"));
        let local = registry.local().id().clone();

        let layer = registry
            .create_layer_with("base", |id| {
                assert_eq!(id, 0);
                Some(LayerTables::new(&local, 4))
            })
            .unwrap();

        assert!(layer.tables().routing.is_empty());
    }

    #[test]
    fn restore_sees_the_allocated_id() {
        let registry = registry(None);

        std::thread::scope(|scope| {
            for name in ["a", "b", "c", "d"] {
                let registry = &registry;

                scope.spawn(move || {
                    let mut seen = None;
                    let layer = registry
                        .create_layer_with(name, |id| {
                            seen = Some(id);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            None
                        })
                        .unwrap();

                    assert_eq!(seen, Some(layer.id()));
                });
            }
        });

        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn layer_operations() {
        let registry = registry(None);
        let layer = registry.create_layer("base").unwrap();

        layer
            .merge_routing_table(&NodeRecord::local_test("8000"))
            .unwrap();
        layer
            .merge_routing_table(&NodeRecord::local_test("4000"))
            .unwrap();

        let hop = layer.find_next_hop(&Id::from_str("2000").unwrap()).unwrap();
        assert_eq!(hop.relay().unwrap().id().to_string(), "4000");

        let bad = MergeSnapshot::new(NodeRecord::local_test("12345"));
        assert!(layer.merge_routing_snapshot(&bad).is_err());
        assert!(layer.merge_neighbour_table(&bad).is_err());
    }
}
