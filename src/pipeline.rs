//! Graph Import Pipeline
//!
//! Tabular records in, graph writes out: detect foreign keys per table,
//! infer relationships, build MERGE statements for every row and every
//! resolvable link, then hand them to the batch manager. Nodes are written
//! before relationships so each relationship's MATCH sees committed nodes.

use crate::batch::{execute_batch, BatchItem, BatchOptions, BatchProgress, BatchResult, ProgressCallback};
use crate::error::ImportError;
use crate::executor::TransactionalExecutor;
use crate::foreign_key::{DetectorOptions, ForeignKeyDetector};
use crate::inference::{InferredRelationship, RelationshipInferenceEngine};
use crate::identifier::{canonical_label, unique_identifier_field};
use crate::query_builder::{
    generate_node_query, generate_relationship_query, NodeQueryOptions, NodeRef, RecordData,
    RelationshipQueryOptions,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Rows of one sheet/file, as handed over by the tabular parser.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    pub entity_type: String,
    pub headers: Vec<String>,
    pub rows: Vec<RecordData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Nodes,
    Relationships,
}

pub type PhaseProgressCallback = Arc<dyn Fn(ImportPhase, BatchProgress) + Send + Sync>;

#[derive(Clone)]
pub struct ImportOptions {
    pub dataset_id: Option<String>,
    /// Inferred relationships below this are not written
    pub min_confidence: f64,
    /// `on_progress` here is ignored; use the phase-aware callback below
    pub batch: BatchOptions,
    pub on_progress: Option<PhaseProgressCallback>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dataset_id: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            batch: BatchOptions::default(),
            on_progress: None,
        }
    }
}

/// Relationships inferred for one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableInference {
    pub entity_type: String,
    pub relationships: Vec<InferredRelationship>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub node_items: Vec<BatchItem>,
    pub relationship_items: Vec<BatchItem>,
    pub inferences: Vec<TableInference>,
    /// FK cells that could not become a relationship statement
    pub skipped_links: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub nodes: BatchResult,
    pub relationships: BatchResult,
    pub inferences: Vec<TableInference>,
    pub skipped_links: usize,
}

pub struct GraphImporter {
    detector: ForeignKeyDetector,
    engine: RelationshipInferenceEngine,
}

impl GraphImporter {
    pub fn new(detector: DetectorOptions) -> std::result::Result<Self, ImportError> {
        Ok(Self {
            detector: ForeignKeyDetector::new(detector)?,
            engine: RelationshipInferenceEngine::new()?,
        })
    }

    pub fn with_engine(detector: ForeignKeyDetector, engine: RelationshipInferenceEngine) -> Self {
        Self { detector, engine }
    }

    /// Build every statement up front. Any malformed record fails here,
    /// before a single write is issued.
    pub fn plan(&self, tables: &[EntityTable], options: &ImportOptions) -> std::result::Result<ImportPlan, ImportError> {
        let mut plan = ImportPlan::default();

        let node_options = NodeQueryOptions {
            merge: true,
            dataset_id: options.dataset_id.clone(),
        };

        for table in tables {
            let label = canonical_label(&table.entity_type);

            for row in &table.rows {
                plan.node_items.push(generate_node_query(&label, row, &node_options)?);
            }

            // A table's own key column is not a reference to another entity,
            // whatever case the header is spelled in
            let mut foreign_keys = self.detector.detect(&table.headers);
            if let Some(own_key) = unique_identifier_field(&label) {
                foreign_keys.retain(|fk| !fk.column_name.trim().eq_ignore_ascii_case(own_key));
            }

            let relationships: Vec<InferredRelationship> = self
                .engine
                .infer(&foreign_keys, &table.entity_type)
                .into_iter()
                .filter(|rel| rel.confidence >= options.min_confidence)
                .collect();

            for rel in &relationships {
                self.plan_links(&label, table, rel, options, &mut plan)?;
            }

            info!(
                "📋 {}: {} rows, {} foreign keys, {} relationships kept",
                table.entity_type,
                table.rows.len(),
                foreign_keys.len(),
                relationships.len()
            );
            plan.inferences.push(TableInference {
                entity_type: table.entity_type.clone(),
                relationships,
            });
        }

        Ok(plan)
    }

    fn plan_links(
        &self,
        row_label: &str,
        table: &EntityTable,
        rel: &InferredRelationship,
        options: &ImportOptions,
        plan: &mut ImportPlan,
    ) -> std::result::Result<(), ImportError> {
        let source_label = canonical_label(&rel.source_entity);
        let target_label = canonical_label(&rel.target_entity);

        // The row is whichever side carries the table's own label
        let (row_is_source, other_label) = if source_label == row_label {
            (true, target_label)
        } else if target_label == row_label {
            (false, source_label)
        } else {
            debug!(
                "Skipping {} on {}: neither side is the row's entity",
                rel.relationship_type, rel.foreign_key_column
            );
            plan.skipped_links += table.rows.len();
            return Ok(());
        };

        let Some(other_key) = unique_identifier_field(&other_label) else {
            debug!(
                "Skipping {} via {}: no unique identifier registered for {}",
                rel.relationship_type, rel.foreign_key_column, other_label
            );
            plan.skipped_links += table.rows.len();
            return Ok(());
        };

        let link_options = RelationshipQueryOptions {
            merge: true,
            dataset_id: options.dataset_id.clone(),
            properties: RecordData::from([
                ("confidence".to_string(), Some(Value::from(rel.confidence))),
                ("foreign_key_column".to_string(), Some(Value::from(rel.foreign_key_column.trim()))),
            ]),
        };

        for row in &table.rows {
            let Some(reference) = lookup_reference(row, &rel.foreign_key_column) else {
                plan.skipped_links += 1;
                continue;
            };
            let other = RecordData::from([(other_key.to_string(), Some(reference))]);

            let row_node = NodeRef::new(row_label, row);
            let other_node = NodeRef::new(&other_label, &other);
            let (source, target) = if row_is_source {
                (row_node, other_node)
            } else {
                (other_node, row_node)
            };

            plan.relationship_items.push(generate_relationship_query(
                rel.relationship_type.as_str(),
                source,
                target,
                &link_options,
            )?);
        }

        Ok(())
    }

    pub async fn import<E>(&self, executor: &E, tables: &[EntityTable], options: &ImportOptions) -> Result<ImportSummary>
    where
        E: TransactionalExecutor + ?Sized,
    {
        let plan = self.plan(tables, options)?;
        info!(
            "💾 Importing {} nodes and {} relationships",
            plan.node_items.len(),
            plan.relationship_items.len()
        );

        let nodes = execute_batch(executor, &plan.node_items, &phase_options(options, ImportPhase::Nodes))
            .await
            .context("Failed to write nodes")?;

        let relationships = execute_batch(
            executor,
            &plan.relationship_items,
            &phase_options(options, ImportPhase::Relationships),
        )
        .await
        .context("Failed to write relationships")?;

        Ok(ImportSummary {
            nodes,
            relationships,
            inferences: plan.inferences,
            skipped_links: plan.skipped_links,
        })
    }
}

fn phase_options(options: &ImportOptions, phase: ImportPhase) -> BatchOptions {
    let on_progress = options.on_progress.clone().map(|callback| {
        Arc::new(move |progress: BatchProgress| callback(phase, progress)) as ProgressCallback
    });
    BatchOptions {
        on_progress,
        ..options.batch.clone()
    }
}

/// FK cell value, ignoring absent, null and blank cells. Falls back to the
/// trimmed header when the row was keyed by cleaned-up column names.
fn lookup_reference(row: &RecordData, column: &str) -> Option<Value> {
    let value = row
        .get(column)
        .or_else(|| row.get(column.trim()))?
        .as_ref()?;
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        other => Some(other.clone()),
    }
}
