//! Folding remote nodes and snapshots into the local tables.
//!
//! A candidate only ever touches the routing column of the first digit where its
//! [Id] differs from the local one. Within that column the candidate is judged
//! against one slot rule per [Row], in the order predecessor, successor, middle,
//! and the first rule that changes the column ends the merge.
//!
//! With `P`, `S`, `L` and `M` the digits of the predecessor, successor, local
//! node and candidate at that column:
//!
//! ```md
//!            predecessor region       successor region
//!        [P ─────────────────── L) (L ─────────────────── S]
//!   ... ─┼─────────────────────────┼──────────────────────────┼─ ...
//!        └──────────── middle region (S, P) ──────────────────┘
//! ```

use tracing::trace;

use crate::common::{
    antipode, ring_arc, ring_distance, Column, Id, MergeSnapshot, NeighbourTable, NodeRecord,
    RoutingTable, Row,
};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a single [merge_routing_table] call did.
pub enum MergeOutcome {
    /// The candidate is the local node.
    Local,
    /// The column was empty, the candidate is now both predecessor and successor.
    Seeded { position: usize },
    /// The candidate took this slot.
    Updated { position: usize, row: Row },
    /// Nothing changed.
    Unchanged,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            MergeOutcome::Seeded { .. } | MergeOutcome::Updated { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of comparing two Ids that share a digit at a column.
pub enum TieBreak {
    /// The candidate wins at the first deeper digit where the two differ.
    Candidate,
    /// The occupant wins at the first deeper digit where the two differ.
    Occupant,
    /// The Ids are identical from this column to the end.
    Identical,
}

/// Compare `candidate` and `occupant` from `position` onwards.
///
/// The candidate wins if its digit at the first difference is greater when
/// `prefer_greater`, or smaller otherwise.
pub fn tie_break(candidate: &Id, occupant: &Id, position: usize, prefer_greater: bool) -> TieBreak {
    match candidate.first_difference_from(occupant, position) {
        None => TieBreak::Identical,
        Some(i) if i >= candidate.len() || i >= occupant.len() => TieBreak::Identical,
        Some(i) => {
            let wins = if prefer_greater {
                candidate.digit(i) > occupant.digit(i)
            } else {
                candidate.digit(i) < occupant.digit(i)
            };

            if wins {
                TieBreak::Candidate
            } else {
                TieBreak::Occupant
            }
        }
    }
}

/// Digit values at the column being merged.
#[derive(Debug, Clone, Copy)]
struct Digits {
    predecessor: u8,
    successor: u8,
    local: u8,
    candidate: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Leave the slot as is and try the next rule.
    Keep,
    /// Overwrite the slot with the candidate.
    Replace,
    /// Move the current occupant to the middle slot and install the candidate.
    Demote,
}

/// Fold `candidate` into `table`.
///
/// Returns Err only if the candidate belongs to a ring of another dimension.
pub fn merge_routing_table(
    table: &mut RoutingTable,
    candidate: &NodeRecord,
) -> Result<MergeOutcome> {
    candidate.id().expect_len(table.dimension())?;

    let local = table.id().clone();

    let Some(position) = local.first_difference(candidate.id()) else {
        return Ok(MergeOutcome::Local);
    };

    let Some(column) = table.column_mut(position) else {
        return Ok(MergeOutcome::Unchanged);
    };

    if column.contains(candidate.id()) {
        return Ok(MergeOutcome::Unchanged);
    }

    column.repair();

    let Some((predecessor, successor)) = column.bounds() else {
        column.replace(Row::Predecessor, Some(candidate.clone()));
        column.replace(Row::Successor, Some(candidate.clone()));

        trace!(?position, id = ?candidate.id(), "Seeded routing column");

        return Ok(MergeOutcome::Seeded { position });
    };

    let digits = Digits {
        predecessor: predecessor.id().digit(position),
        successor: successor.id().digit(position),
        local: local.digit(position),
        candidate: candidate.id().digit(position),
    };

    for row in Row::ALL {
        if !covers(row, &digits) {
            continue;
        }

        let verdict = judge(row, column, candidate, position, &digits);

        if update_slot(column, row, candidate, verdict) {
            trace!(?position, ?row, id = ?candidate.id(), "Updated routing column");

            return Ok(MergeOutcome::Updated { position, row });
        }
    }

    Ok(MergeOutcome::Unchanged)
}

/// Fold the sender of `snapshot` and every node of its routing entries into `table`.
pub fn merge_routing_snapshot(
    table: &mut RoutingTable,
    snapshot: &MergeSnapshot,
) -> Result<Vec<MergeOutcome>> {
    snapshot
        .routing_nodes()
        .into_iter()
        .map(|node| merge_routing_table(table, node))
        .collect()
}

/// Fold the measured sender and the neighbours of `snapshot` into `table`.
///
/// Returns the number of insertions that changed the table.
pub fn merge_neighbour_table(table: &mut NeighbourTable, snapshot: &MergeSnapshot) -> usize {
    let sender = snapshot
        .sender
        .rtt()
        .is_some()
        .then_some(&snapshot.sender);

    sender
        .into_iter()
        .chain(snapshot.neighbours.iter())
        .filter(|node| table.insert((*node).clone()))
        .count()
}

// === Slot rules ===

/// Whether the candidate digit falls in the region guarded by `row`.
fn covers(row: Row, d: &Digits) -> bool {
    match row {
        Row::Predecessor => ring_arc(d.predecessor, d.local, d.candidate),
        Row::Successor => {
            d.candidate == d.successor || ring_arc(d.local, d.successor, d.candidate)
        }
        Row::Middle => {
            d.candidate != d.successor && ring_arc(d.successor, d.predecessor, d.candidate)
        }
    }
}

fn judge(
    row: Row,
    column: &Column,
    candidate: &NodeRecord,
    position: usize,
    d: &Digits,
) -> Verdict {
    let Some(occupant) = column.get(row) else {
        return Verdict::Replace;
    };

    match row {
        Row::Predecessor | Row::Successor => {
            let occupant_digit = if row == Row::Predecessor {
                d.predecessor
            } else {
                d.successor
            };

            if d.candidate == occupant_digit {
                // Predecessors are better the further they reach towards the
                // local node clockwise, successors the less they overshoot it.
                let prefer_greater = row == Row::Predecessor;

                let tie = tie_break(candidate.id(), occupant.id(), position + 1, prefer_greater);

                return match tie {
                    TieBreak::Candidate => Verdict::Replace,
                    TieBreak::Occupant => Verdict::Keep,
                    TieBreak::Identical => {
                        trace!(
                            ?position,
                            id = ?candidate.id(),
                            "Identical beyond column, keeping occupant"
                        );
                        Verdict::Keep
                    }
                };
            }

            match column.bounds() {
                Some((predecessor, successor)) if predecessor.same_id(successor) => {
                    Verdict::Replace
                }
                _ => Verdict::Demote,
            }
        }
        Row::Middle => {
            let target = antipode(d.local);
            let occupant_digit = occupant.id().digit(position);

            if ring_distance(d.candidate, target) < ring_distance(occupant_digit, target) {
                Verdict::Replace
            } else {
                Verdict::Keep
            }
        }
    }
}

/// Apply a verdict to `row`, returning `true` if the column changed.
fn update_slot(column: &mut Column, row: Row, candidate: &NodeRecord, verdict: Verdict) -> bool {
    match verdict {
        Verdict::Keep => false,
        Verdict::Replace => {
            column.replace(row, Some(candidate.clone()));
            true
        }
        Verdict::Demote => {
            let previous = column.replace(row, Some(candidate.clone()));
            column.replace(Row::Middle, previous);
            true
        }
    }
}
