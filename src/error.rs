//! Error types for the import core

use thiserror::Error;

/// Position in query text an identifier is woven into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Label,
    RelationshipType,
    PropertyKey,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Label => "label",
            IdentifierKind::RelationshipType => "relationship type",
            IdentifierKind::PropertyKey => "property key",
        }
    }
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Invalid {kind}: {value:?}")]
    InvalidIdentifier { kind: IdentifierKind, value: String },
    #[error("Invalid property key: {0:?}")]
    InvalidPropertyKey(String),
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
    #[error("Missing unique identifier '{field}' for {entity_type}")]
    MissingUniqueIdentifier { entity_type: String, field: String },
    #[error("Missing identifier '{field}' on {entity_type} node")]
    MissingIdentifier { entity_type: String, field: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

pub type Result<T> = std::result::Result<T, ImportError>;
