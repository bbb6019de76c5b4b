mod id;
mod neighbour_table;
mod node;
mod routing_table;
mod snapshot;

pub use id::*;
pub use neighbour_table::*;
pub use node::*;
pub use routing_table::*;
pub use snapshot::*;
