//! Main Crate Error

use crate::core::LayerId;

/// Crate result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
/// Overlay crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    /// An identifier was empty.
    #[error("Identifier is empty")]
    EmptyId,

    /// An identifier contained a character that is not a hex digit.
    #[error("Invalid identifier character {character:?} at position {position}")]
    InvalidIdDigit { position: usize, character: char },

    /// An identifier did not match the ring dimension it is used in.
    #[error("Invalid identifier length: expected {expected} digits, found {found}")]
    InvalidIdLength { expected: usize, found: usize },

    /// A node record field could not be parsed.
    #[error("Invalid node field {field}: {value:?}")]
    InvalidNodeField { field: &'static str, value: String },

    /// A snapshot document is structurally valid XML but carries invalid content.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// The snapshot document could not be encoded or decoded.
    #[error("Snapshot encoding failed: {0}")]
    Xml(String),

    /// A snapshot file name does not follow any known naming convention.
    #[error("Unrecognized snapshot name: {0:?}")]
    UnrecognizedSnapshotName(String),

    /// No layer with this id is registered.
    #[error("Unknown layer: {0}")]
    UnknownLayer(LayerId),

    /// No layer with this name is registered.
    #[error("Unknown layer name: {0:?}")]
    UnknownLayerName(String),

    /// A layer with this name already exists.
    #[error("Layer {0:?} already exists")]
    DuplicateLayer(String),
}
