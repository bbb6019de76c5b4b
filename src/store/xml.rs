//! Serialize and deserialize table snapshot documents.
//!
//! ```xml
//! <ROUTING_TABLE SELF_NODE_ID="…" SELF_IP_ADDRESS="…" SELF_PORT_ADDRESS="…" …>
//!   <RT_ENTRY INDEX="[0][1]">
//!     <NODEID>…</NODEID><NODEIP>…</NODEIP><NODEPORT>…</NODEPORT>…
//!   </RT_ENTRY>
//!   <NT_ENTRY INDEX="[0]">
//!     … <NODERTT>12.5</NODERTT>
//!   </NT_ENTRY>
//! </ROUTING_TABLE>
//! ```

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::{Id, MergeSnapshot, NodeRecord, RoutingEntry, Row};
use crate::{Error, Result};

/// Root element of a persisted or exchanged routing table.
pub const ROUTING_TABLE_ROOT: &str = "ROUTING_TABLE";
/// Root element of a persisted neighbour table or an RTT response.
pub const NEIGHBOUR_TABLE_ROOT: &str = "NEIGHBOUR_TABLE";
/// Root element of an RTT probe request.
pub const RTT_REQUEST_ROOT: &str = "RTT_REQUEST";

/// RTT value written for unmeasured nodes.
const UNMEASURED_RTT: &str = "-1";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct Document {
    #[serde(rename = "@SELF_NODE_ID")]
    self_node_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "@SELF_PUBLIC_KEY")]
    self_public_key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "@SELF_HASHID")]
    self_hash_id: String,

    #[serde(rename = "@SELF_IP_ADDRESS")]
    self_ip_address: String,

    #[serde(rename = "@SELF_PORT_ADDRESS")]
    self_port_address: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "@SELF_TRANSPORT")]
    self_transport: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "@SELF_RTT")]
    self_rtt: Option<String>,

    #[serde(default, rename = "RT_ENTRY")]
    routing: Vec<Entry>,

    #[serde(default, rename = "NT_ENTRY")]
    neighbours: Vec<Entry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct Entry {
    #[serde(rename = "@INDEX")]
    index: String,

    #[serde(rename = "NODEID")]
    node_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "PUBLICKEY")]
    public_key: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "HASHID")]
    hash_id: String,

    #[serde(rename = "NODEIP")]
    ip: String,

    #[serde(rename = "NODEPORT")]
    port: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "NODETRANSPORT")]
    transport: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "NODERTT")]
    rtt: Option<String>,
}

// === Decoding ===

/// Parse a snapshot document, validating every Id against `dimension`.
pub fn decode(xml: &str, dimension: usize) -> Result<MergeSnapshot> {
    let document: Document =
        quick_xml::de::from_str(xml).map_err(|error| Error::Xml(error.to_string()))?;

    let sender = node(
        &document.self_node_id,
        &document.self_public_key,
        &document.self_hash_id,
        &document.self_ip_address,
        &document.self_port_address,
        &document.self_transport,
        document.self_rtt.as_deref(),
        dimension,
    )?;

    let mut snapshot = MergeSnapshot::new(sender);

    for entry in &document.routing {
        let (position, row) = match parse_index(&entry.index)?.as_slice() {
            [position, row] => (*position, *row),
            _ => return Err(malformed_index(&entry.index)),
        };
        let row = Row::from_index(row).ok_or_else(|| malformed_index(&entry.index))?;

        snapshot.routing.push(RoutingEntry {
            position,
            row,
            node: entry_node(entry, dimension)?,
        });
    }

    let mut neighbours = Vec::with_capacity(document.neighbours.len());
    for entry in &document.neighbours {
        let slot = match parse_index(&entry.index)?.as_slice() {
            [slot] => *slot,
            _ => return Err(malformed_index(&entry.index)),
        };

        neighbours.push((slot, entry_node(entry, dimension)?));
    }
    neighbours.sort_by_key(|(slot, _)| *slot);
    snapshot.neighbours = neighbours.into_iter().map(|(_, node)| node).collect();

    snapshot.validate(dimension)?;

    Ok(snapshot)
}

fn entry_node(entry: &Entry, dimension: usize) -> Result<NodeRecord> {
    node(
        &entry.node_id,
        &entry.public_key,
        &entry.hash_id,
        &entry.ip,
        &entry.port,
        &entry.transport,
        entry.rtt.as_deref(),
        dimension,
    )
}

#[allow(clippy::too_many_arguments)]
fn node(
    id: &str,
    public_key: &str,
    hash_id: &str,
    ip: &str,
    port: &str,
    transport: &str,
    rtt: Option<&str>,
    dimension: usize,
) -> Result<NodeRecord> {
    let id = Id::parse(id.trim(), dimension)?;
    let ip = IpAddr::from_str(ip.trim()).map_err(|_| invalid("NODEIP", ip))?;
    let port = u16::from_str(port.trim()).map_err(|_| invalid("NODEPORT", port))?;
    let rtt = rtt.map(parse_rtt).transpose()?.flatten();

    let mut node = NodeRecord::new(id, SocketAddr::new(ip, port))
        .with_public_key(public_key.trim())
        .with_hash_id(hash_id.trim())
        .with_rtt(rtt);

    if !transport.trim().is_empty() {
        node = node.with_transport(transport.trim());
    }

    Ok(node)
}

/// Parse an RTT, where negative values mean unmeasured.
fn parse_rtt(rtt: &str) -> Result<Option<f64>> {
    let value = f64::from_str(rtt.trim()).map_err(|_| invalid("NODERTT", rtt))?;

    if value.is_nan() {
        return Err(invalid("NODERTT", rtt));
    }

    Ok((value >= 0.0).then_some(value))
}

/// Parse an `INDEX` attribute such as `[3][1]` or `[7]`.
fn parse_index(index: &str) -> Result<Vec<usize>> {
    let inner = index
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| malformed_index(index))?;

    inner
        .split("][")
        .map(|part| usize::from_str(part.trim()).map_err(|_| malformed_index(index)))
        .collect()
}

fn malformed_index(index: &str) -> Error {
    Error::MalformedSnapshot(format!("invalid INDEX {index:?}"))
}

fn invalid(field: &'static str, value: &str) -> Error {
    Error::InvalidNodeField {
        field,
        value: value.to_string(),
    }
}

// === Encoding ===

/// Serialize a snapshot document under the `root` element.
///
/// Neighbours are written with their RTT, or `-1` when unmeasured.
pub fn encode<'a>(
    root: &str,
    sender: &NodeRecord,
    routing: impl IntoIterator<Item = (usize, Row, &'a NodeRecord)>,
    neighbours: impl IntoIterator<Item = &'a NodeRecord>,
) -> Result<String> {
    let document = Document {
        self_node_id: sender.id().to_string(),
        self_public_key: sender.public_key().to_string(),
        self_hash_id: sender.hash_id().to_string(),
        self_ip_address: sender.ip().to_string(),
        self_port_address: sender.port().to_string(),
        self_transport: sender.transport().to_string(),
        self_rtt: sender.rtt().map(|rtt| rtt.to_string()),
        routing: routing
            .into_iter()
            .map(|(position, row, node)| {
                let mut entry = entry(node);
                entry.index = format!("[{}][{}]", position, row.index());
                entry
            })
            .collect(),
        neighbours: neighbours
            .into_iter()
            .enumerate()
            .map(|(slot, node)| {
                let mut entry = entry(node);
                entry.index = format!("[{}]", slot);
                entry.rtt = Some(
                    node.rtt()
                        .map(|rtt| rtt.to_string())
                        .unwrap_or_else(|| UNMEASURED_RTT.to_string()),
                );
                entry
            })
            .collect(),
    };

    quick_xml::se::to_string_with_root(root, &document)
        .map_err(|error| Error::Xml(error.to_string()))
}

/// Serialize a [MergeSnapshot] under the `root` element.
pub fn encode_snapshot(root: &str, snapshot: &MergeSnapshot) -> Result<String> {
    encode(
        root,
        &snapshot.sender,
        snapshot
            .routing
            .iter()
            .map(|entry| (entry.position, entry.row, &entry.node)),
        snapshot.neighbours.iter(),
    )
}

fn entry(node: &NodeRecord) -> Entry {
    Entry {
        index: String::new(),
        node_id: node.id().to_string(),
        public_key: node.public_key().to_string(),
        hash_id: node.hash_id().to_string(),
        ip: node.ip().to_string(),
        port: node.port().to_string(),
        transport: node.transport().to_string(),
        rtt: None,
    }
}
