//! Struct and implementation of the Node entry in the routing and neighbour tables
use std::net::{IpAddr, SocketAddr};

use crate::common::Id;

/// Transport tag used when none is specified.
pub const DEFAULT_TRANSPORT: &str = "TCP";

#[derive(Debug, Clone)]
/// Node entry in routing and neighbour tables.
///
/// Two records are equal if they have the same [Id], regardless of address or RTT.
pub struct NodeRecord {
    id: Id,
    public_key: String,
    hash_id: String,
    address: SocketAddr,
    transport: String,
    /// Round trip time in milliseconds, `None` if unmeasured.
    rtt: Option<f64>,
}

impl NodeRecord {
    /// Creates a new unmeasured NodeRecord from an id and socket address.
    pub fn new(id: Id, address: SocketAddr) -> NodeRecord {
        NodeRecord {
            id,
            public_key: String::new(),
            hash_id: String::new(),
            address,
            transport: DEFAULT_TRANSPORT.to_string(),
            rtt: None,
        }
    }

    /// Creates a node with a given id and a random loopback address, useful for testing.
    #[cfg(test)]
    pub(crate) fn local_test(id: &str) -> NodeRecord {
        use std::str::FromStr;

        let id = Id::from_str(id).expect("valid test id");
        let port = rand::random::<u16>().max(1);

        NodeRecord::new(id, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    // === Options ===

    pub fn with_rtt(mut self, rtt: Option<f64>) -> Self {
        self.rtt = rtt.filter(|rtt| *rtt >= 0.0);
        self
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = public_key.into();
        self
    }

    pub fn with_hash_id(mut self, hash_id: impl Into<String>) -> Self {
        self.hash_id = hash_id.into();
        self
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn hash_id(&self) -> &str {
        &self.hash_id
    }

    pub fn rtt(&self) -> Option<f64> {
        self.rtt
    }

    // === Public Methods ===

    /// Returns `true` if both records have the same [Id].
    pub fn same_id(&self, other: &NodeRecord) -> bool {
        self.id == other.id
    }
}

impl PartialEq for NodeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.same_id(other)
    }
}

impl Eq for NodeRecord {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality_is_by_id() {
        let a = NodeRecord::local_test("abcd");
        let b = NodeRecord::new(a.id().clone(), SocketAddr::from(([10, 0, 0, 1], 9000)))
            .with_rtt(Some(12.0));

        assert_eq!(a, b);
        assert_ne!(a, NodeRecord::local_test("abce"));
    }

    #[test]
    fn negative_rtt_is_unmeasured() {
        let node = NodeRecord::local_test("abcd").with_rtt(Some(-1.0));

        assert_eq!(node.rtt(), None);
    }
}
