//! Picking the next relay towards a target Id.

use crate::common::{ring_arc, Column, Id, NodeRecord, RoutingTable};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
/// Result of [find_next_hop].
pub enum NextHop {
    /// Forward to this node.
    Relay(NodeRecord),
    /// No known node is closer to the target than the local node.
    LocalIsRoot,
}

impl NextHop {
    pub fn relay(&self) -> Option<&NodeRecord> {
        match self {
            NextHop::Relay(node) => Some(node),
            NextHop::LocalIsRoot => None,
        }
    }

    pub fn is_local_root(&self) -> bool {
        matches!(self, NextHop::LocalIsRoot)
    }
}

/// Decision taken at a single column.
enum Step<'a> {
    /// The target lies behind the predecessor, look at the next column.
    Behind,
    Relay(&'a NodeRecord),
}

/// Walk `table` to find the next relay towards `target`.
///
/// Never returns the local node. Returns Err if `target` is from a ring of another dimension.
pub fn find_next_hop(table: &RoutingTable, target: &Id) -> Result<NextHop> {
    target.expect_len(table.dimension())?;

    let local = table.id();

    let Some(first) = local.first_difference(target) else {
        return Ok(NextHop::LocalIsRoot);
    };

    for (position, column) in table.columns().iter().enumerate().skip(first) {
        let step = step(
            column,
            position,
            local.digit(position),
            target.digit(position),
        );

        match step {
            Some(Step::Relay(node)) => return Ok(NextHop::Relay(node.clone())),
            Some(Step::Behind) => continue,
            // Nothing is known at the first differing digit.
            None if position == first => return Ok(NextHop::LocalIsRoot),
            None => continue,
        }
    }

    Ok(NextHop::LocalIsRoot)
}

/// Three way test of the target digit against one column, `None` if the column is empty.
fn step(column: &Column, position: usize, local: u8, target: u8) -> Option<Step<'_>> {
    let (predecessor, successor) = column.bounds()?;
    let p = predecessor.id().digit(position);
    let s = successor.id().digit(position);

    if ring_arc(p, local, target) {
        return Some(Step::Behind);
    }

    if ring_arc(local, s, target) {
        return Some(Step::Relay(successor));
    }

    let step = match column.middle() {
        Some(middle) if !ring_arc(s, middle.id().digit(position), target) => Step::Relay(middle),
        _ => Step::Relay(successor),
    };

    Some(step)
}
