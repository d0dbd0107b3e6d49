//! Tabular banking records to property graph.
//!
//! Foreign-key detection over column headers, rule-based relationship
//! inference, injection-safe Cypher generation and a batched, retrying
//! transactional writer.

pub mod batch;
pub mod cypher;
pub mod error;
pub mod executor;
pub mod foreign_key;
pub mod identifier;
pub mod inference;
pub mod pipeline;
pub mod query_builder;

#[cfg(test)]
pub(crate) mod mock;

pub use batch::{execute_batch, BatchItem, BatchOptions, BatchProgress, BatchResult};
pub use cypher::{CypherStatement, Params};
pub use error::{IdentifierKind, ImportError};
pub use executor::{Neo4jExecutor, TransactionalExecutor, WriteTransaction};
pub use foreign_key::{detect_foreign_keys, DetectorOptions, ForeignKey, ForeignKeyDetector};
pub use inference::{
    generate_batch_relationship_cypher, generate_relationship_cypher, infer_relationships, InferredRelationship,
    RelationshipInferenceEngine, RelationshipType,
};
pub use pipeline::{EntityTable, GraphImporter, ImportOptions, ImportPhase, ImportSummary};
pub use query_builder::{generate_node_query, generate_relationship_query, NodeRef, RecordData};
