//! Bounded list of peers ranked by measured round trip time.

use std::slice::Iter;

use crate::common::{Id, NodeRecord};

/// K = the default maximum size of a neighbour table.
pub const DEFAULT_NEIGHBOUR_TABLE_SIZE: usize = 16;

#[derive(Debug, Clone)]
/// Neighbours of the local node, sorted by ascending RTT.
///
/// Only measured nodes are stored, so the empty slots of a table that is not
/// full always trail the populated ones.
pub struct NeighbourTable {
    id: Id,
    capacity: usize,
    nodes: Vec<NodeRecord>,
}

impl NeighbourTable {
    /// Create an empty table for the local `id` holding at most `capacity` nodes.
    pub fn new(id: Id, capacity: usize) -> Self {
        NeighbourTable {
            id,
            capacity,
            nodes: Vec::with_capacity(capacity),
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&NodeRecord> {
        self.nodes.get(index)
    }

    pub fn iter(&self) -> Iter<'_, NodeRecord> {
        self.nodes.iter()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.nodes.iter().any(|node| node.id() == id)
    }

    // === Public Methods ===

    /// Insert a measured node at its RTT rank, returning `true` if the table changed.
    ///
    /// The node goes in front of the first entry with a strictly greater RTT, and
    /// the last entry of a full table is dropped to make room. A node that is
    /// slower than every entry of a full table is discarded.
    pub fn insert(&mut self, node: NodeRecord) -> bool {
        let rtt = match node.rtt() {
            Some(rtt) => rtt,
            None => return false,
        };

        if node.id() == &self.id || self.capacity == 0 {
            return false;
        }

        if let Some(index) = self.position(node.id()) {
            if self.nodes[index].rtt() == Some(rtt) {
                return false;
            }
            self.nodes.remove(index);
        }

        let index = self
            .nodes
            .iter()
            .position(|existing| existing.rtt().is_some_and(|existing| existing > rtt))
            .unwrap_or(self.nodes.len());

        if index >= self.capacity {
            return false;
        }

        self.nodes.insert(index, node);
        self.nodes.truncate(self.capacity);

        true
    }

    /// Remove the node at `index`, shifting the following entries forward.
    pub fn evict(&mut self, index: usize) -> Option<NodeRecord> {
        (index < self.nodes.len()).then(|| self.nodes.remove(index))
    }

    /// Remove a node from this table.
    pub fn remove(&mut self, id: &Id) -> Option<NodeRecord> {
        let index = self.position(id)?;

        self.evict(index)
    }

    /// Write the slot at `index` verbatim, used when restoring a persisted table.
    ///
    /// Returns `false` if the node would break the ordering or the table bounds.
    pub fn restore(&mut self, index: usize, node: NodeRecord) -> bool {
        let in_order = self
            .nodes
            .last()
            .and_then(NodeRecord::rtt)
            .zip(node.rtt())
            .map_or(node.rtt().is_some(), |(last, rtt)| last <= rtt);

        if index != self.nodes.len()
            || index >= self.capacity
            || !in_order
            || node.id() == &self.id
            || self.contains(node.id())
        {
            return false;
        }

        self.nodes.push(node);

        true
    }

    // === Private Methods ===

    fn position(&self, id: &Id) -> Option<usize> {
        self.nodes.iter().position(|node| node.id() == id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn measured(id: &str, rtt: f64) -> NodeRecord {
        NodeRecord::local_test(id).with_rtt(Some(rtt))
    }

    fn rtts(table: &NeighbourTable) -> Vec<f64> {
        table.iter().filter_map(NodeRecord::rtt).collect()
    }

    fn local() -> Id {
        NodeRecord::local_test("0000").id().clone()
    }

    #[test]
    fn keeps_ascending_rtt() {
        let mut table = NeighbourTable::new(local(), 4);

        assert!(table.insert(measured("1000", 30.0)));
        assert!(table.insert(measured("2000", 10.0)));
        assert!(table.insert(measured("3000", 20.0)));

        assert_eq!(rtts(&table), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn equal_rtt_goes_after_existing() {
        let mut table = NeighbourTable::new(local(), 4);

        table.insert(measured("1000", 10.0));
        table.insert(measured("2000", 10.0));

        assert_eq!(table.get(0).unwrap().id().to_string(), "1000");
        assert_eq!(table.get(1).unwrap().id().to_string(), "2000");
    }

    #[test]
    fn full_table_evicts_slowest() {
        let mut table = NeighbourTable::new(local(), 3);

        table.insert(measured("1000", 10.0));
        table.insert(measured("2000", 20.0));
        table.insert(measured("3000", 30.0));

        assert!(table.insert(measured("4000", 15.0)));
        assert_eq!(rtts(&table), vec![10.0, 15.0, 20.0]);
        assert!(!table.contains(&measured("3000", 0.0).id().clone()));

        assert!(!table.insert(measured("5000", 25.0)));
        assert!(!table.insert(measured("6000", 20.0)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn rejects_unmeasured_and_self() {
        let mut table = NeighbourTable::new(local(), 3);

        assert!(!table.insert(NodeRecord::local_test("1000")));
        assert!(!table.insert(measured("0000", 1.0)));
        assert!(table.is_empty());
    }

    #[test]
    fn reinsert_updates_rank() {
        let mut table = NeighbourTable::new(local(), 3);

        table.insert(measured("1000", 10.0));
        table.insert(measured("2000", 20.0));

        assert!(!table.insert(measured("1000", 10.0)));
        assert!(table.insert(measured("1000", 30.0)));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().id().to_string(), "1000");
    }

    #[test]
    fn remove_keeps_order() {
        let mut table = NeighbourTable::new(local(), 3);

        table.insert(measured("1000", 10.0));
        table.insert(measured("2000", 20.0));
        table.insert(measured("3000", 30.0));

        let removed = table.remove(&Id::from_digits([2, 0, 0, 0]).unwrap());

        assert!(removed.is_some());
        assert_eq!(rtts(&table), vec![10.0, 30.0]);
        assert!(table.evict(5).is_none());
    }

    #[test]
    fn invariants_hold_for_any_sequence() {
        let mut table = NeighbourTable::new(local(), 5);

        for i in 0..200u32 {
            let id = format!("{:04x}", (i * 7919) % 0xffff + 1);
            let rtt = f64::from((i * 37) % 101);

            table.insert(measured(&id, rtt));

            let ranked = rtts(&table);
            assert!(table.len() <= table.capacity());
            assert_eq!(ranked.len(), table.len());
            assert!(ranked.windows(2).all(|w| w[0] <= w[1]), "{ranked:?}");
        }
    }

    #[test]
    fn restore_checks_order() {
        let mut table = NeighbourTable::new(local(), 2);

        assert!(table.restore(0, measured("1000", 5.0)));
        assert!(!table.restore(1, measured("2000", 1.0)));
        assert!(table.restore(1, measured("2000", 9.0)));
        assert!(!table.restore(2, measured("3000", 10.0)));
    }
}
