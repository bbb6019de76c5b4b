#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

mod common;
pub mod config;
pub mod core;
mod error;
mod overlay;
pub mod store;

pub use crate::common::{
    antipode, ring_arc, ring_distance, Column, Id, MergeSnapshot, NeighbourTable, NodeRecord,
    RoutingEntry, RoutingTable, Row, SnapshotHandle, SnapshotKind, DEFAULT_DIMENSION,
    DEFAULT_NEIGHBOUR_TABLE_SIZE, DEFAULT_TRANSPORT, RING_SIZE, RTT_REQUEST_PREFIX,
    RTT_RESPONSE_PREFIX,
};
pub use crate::core::{LayerId, MergeOutcome, NextHop};
pub use config::Config;
pub use error::{Error, Result};
pub use overlay::{Overlay, OverlayBuilder};
