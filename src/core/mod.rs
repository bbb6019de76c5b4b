//! Overlay core logic.
//!
//! Pure table algorithms (`merge`, `next_hop`) and the stateful pieces that
//! drive them concurrently (`registry`, `buffer`, `ingest`, `purge`).

pub mod buffer;
pub mod ingest;
pub mod merge;
pub mod next_hop;
pub mod purge;
pub mod registry;

use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};

pub use buffer::{Buffer, EgressBuffer, IngestBuffer};
pub use ingest::{IngestConsumer, Ingested};
pub use merge::{MergeOutcome, TieBreak};
pub use next_hop::NextHop;
pub use purge::{Backoff, Prober, PurgeSupervisor, TcpProber};
pub use registry::{Layer, LayerId, LayerRegistry, LayerTables};

/// Wait up to `timeout` for `shutdown` to receive a message or disconnect.
///
/// Returns `true` if the timeout elapsed and the caller should keep running. A
/// timeout too large to express as a deadline waits for shutdown only.
pub(crate) fn wait_for_shutdown(shutdown: &Receiver<()>, timeout: Duration) -> bool {
    match Instant::now().checked_add(timeout) {
        Some(deadline) => matches!(
            shutdown.recv_deadline(deadline),
            Err(RecvTimeoutError::Timeout)
        ),
        None => {
            let _ = shutdown.recv();
            false
        }
    }
}
