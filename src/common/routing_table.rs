//! Prefix routing table: one (predecessor, successor, middle) column per Id digit.

use crate::common::{Id, NodeRecord};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Slot of a routing table [Column].
pub enum Row {
    Predecessor,
    Successor,
    Middle,
}

impl Row {
    pub const ALL: [Row; 3] = [Row::Predecessor, Row::Successor, Row::Middle];

    /// Position of this row in the `[i][j]` snapshot index.
    pub fn index(&self) -> usize {
        match self {
            Row::Predecessor => 0,
            Row::Successor => 1,
            Row::Middle => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Row> {
        Row::ALL.get(index).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Routing entries for one digit position.
///
/// Either fully empty, or with both predecessor and successor populated.
pub struct Column {
    predecessor: Option<NodeRecord>,
    successor: Option<NodeRecord>,
    middle: Option<NodeRecord>,
}

impl Column {
    // === Getters ===

    pub fn get(&self, row: Row) -> Option<&NodeRecord> {
        match row {
            Row::Predecessor => self.predecessor.as_ref(),
            Row::Successor => self.successor.as_ref(),
            Row::Middle => self.middle.as_ref(),
        }
    }

    pub fn predecessor(&self) -> Option<&NodeRecord> {
        self.predecessor.as_ref()
    }

    pub fn successor(&self) -> Option<&NodeRecord> {
        self.successor.as_ref()
    }

    pub fn middle(&self) -> Option<&NodeRecord> {
        self.middle.as_ref()
    }

    /// Predecessor and successor, if this column is populated.
    pub fn bounds(&self) -> Option<(&NodeRecord, &NodeRecord)> {
        Some((self.predecessor.as_ref()?, self.successor.as_ref()?))
    }

    pub fn is_empty(&self) -> bool {
        Row::ALL.iter().all(|row| self.get(*row).is_none())
    }

    /// Returns `true` if any slot of this column holds a node with this `id`.
    pub fn contains(&self, id: &Id) -> bool {
        self.iter().any(|(_, node)| node.id() == id)
    }

    /// Populated slots in row order.
    pub fn iter(&self) -> impl Iterator<Item = (Row, &NodeRecord)> {
        Row::ALL
            .into_iter()
            .filter_map(move |row| self.get(row).map(|node| (row, node)))
    }

    // === Public Methods ===

    /// Put `node` in `row`, returning the previous occupant.
    pub fn replace(&mut self, row: Row, node: Option<NodeRecord>) -> Option<NodeRecord> {
        let slot = match row {
            Row::Predecessor => &mut self.predecessor,
            Row::Successor => &mut self.successor,
            Row::Middle => &mut self.middle,
        };

        std::mem::replace(slot, node)
    }

    /// Restore the column invariant after individual slots were cleared.
    ///
    /// A missing predecessor or successor is refilled from the middle entry,
    /// or from the remaining bound when there is no middle entry.
    pub fn repair(&mut self) {
        if self.predecessor.is_none() {
            self.predecessor = self.middle.take().or_else(|| self.successor.clone());
        }
        if self.successor.is_none() {
            self.successor = self.middle.take().or_else(|| self.predecessor.clone());
        }
    }
}

#[derive(Debug, Clone)]
/// Prefix routing table of one layer.
pub struct RoutingTable {
    id: Id,
    columns: Vec<Column>,
}

impl RoutingTable {
    /// Create a new empty [RoutingTable] for the local `id`, with one column per digit.
    pub fn new(id: Id) -> Self {
        let columns = vec![Column::default(); id.len()];

        RoutingTable { id, columns }
    }

    /// Returns the [Id] of this node, where ring positions are measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Number of columns, equal to the number of digits of the local [Id].
    pub fn dimension(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, position: usize) -> Option<&Column> {
        self.columns.get(position)
    }

    pub(crate) fn column_mut(&mut self, position: usize) -> Option<&mut Column> {
        self.columns.get_mut(position)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get(&self, position: usize, row: Row) -> Option<&NodeRecord> {
        self.column(position)?.get(row)
    }

    // === Public Methods ===

    /// Write a slot verbatim, used when restoring a persisted table.
    ///
    /// Rejects the local node, nodes from another ring dimension and out of range positions.
    pub fn set(&mut self, position: usize, row: Row, node: NodeRecord) -> Result<()> {
        node.id().expect_len(self.dimension())?;

        if node.id() == &self.id {
            return Err(Error::InvalidNodeField {
                field: "NODEID",
                value: node.id().to_string(),
            });
        }

        let column = self
            .columns
            .get_mut(position)
            .ok_or_else(|| Error::MalformedSnapshot(format!("column {position} out of range")))?;
        column.replace(row, Some(node));

        Ok(())
    }

    /// Empty a slot, returning the previous occupant.
    pub fn clear(&mut self, position: usize, row: Row) -> Option<NodeRecord> {
        self.columns.get_mut(position)?.replace(row, None)
    }

    /// [Column::repair] every column.
    pub fn repair(&mut self) {
        self.columns.iter_mut().for_each(Column::repair);
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Column::is_empty)
    }

    /// Return the number of populated slots in this routing table.
    pub fn size(&self) -> usize {
        self.columns.iter().map(|column| column.iter().count()).sum()
    }

    /// Returns an iterator over every populated slot as `(position, row, node)`.
    pub fn entries(&self) -> impl Iterator<Item = (usize, Row, &NodeRecord)> {
        self.columns
            .iter()
            .enumerate()
            .flat_map(|(position, column)| {
                column.iter().map(move |(row, node)| (position, row, node))
            })
    }

    /// Distinct nodes in this routing table, in column order.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = Vec::with_capacity(self.size());

        for (_, _, node) in self.entries() {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }

        nodes
    }
}
