//! Relationship Inference Engine
//!
//! Turns detected foreign keys into typed relationships. Domain rules are
//! tried top to bottom and the first match wins; a foreign key no rule
//! claims falls back to a generic `OWNS` guess at a reduced confidence.

use crate::cypher::{CypherStatement, CypherTemplate, ParamStyle, Params};
use crate::error::{IdentifierKind, ImportError, Result};
use crate::foreign_key::ForeignKey;
use crate::identifier::{canonical_label, normalize_entity, unique_identifier_field, validate_identifier};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Confidence multiplier for relationships guessed without a domain rule.
pub const GENERIC_CONFIDENCE_PENALTY: f64 = 0.8;

/// Target entities too vague to guess a relationship for.
const AMBIGUOUS_TARGETS: &[&str] = &["Reference", "Unknown"];

/// Match key used when an entity has no registered unique identifier.
const FALLBACK_MATCH_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Owns,
    HeldAt,
    From,
    To,
    ReportsTo,
    Controls,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Owns => "OWNS",
            RelationshipType::HeldAt => "HELD_AT",
            RelationshipType::From => "FROM",
            RelationshipType::To => "TO",
            RelationshipType::ReportsTo => "REPORTS_TO",
            RelationshipType::Controls => "CONTROLS",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredRelationship {
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub source_entity: String,
    pub target_entity: String,
    pub foreign_key_column: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Params>,
    pub bidirectional: bool,
}

/// `(source entity, target entity, column) -> relationship type`, with an
/// optional direction override. All three patterns are case-insensitive.
#[derive(Debug, Clone)]
pub struct RelationshipRule {
    pub source_pattern: String,
    pub target_pattern: String,
    pub column_pattern: String,
    pub relationship_type: RelationshipType,
    pub actual_source: Option<String>,
    pub actual_target: Option<String>,
    pub bidirectional: bool,
}

impl RelationshipRule {
    pub fn new(
        source_pattern: &str,
        target_pattern: &str,
        column_pattern: &str,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            source_pattern: source_pattern.to_string(),
            target_pattern: target_pattern.to_string(),
            column_pattern: column_pattern.to_string(),
            relationship_type,
            actual_source: None,
            actual_target: None,
            bidirectional: false,
        }
    }

    /// Emit `source -> target` instead of the row's entity -> referenced entity.
    pub fn directed(mut self, source: &str, target: &str) -> Self {
        self.actual_source = Some(source.to_string());
        self.actual_target = Some(target.to_string());
        self
    }
}

pub fn builtin_relationship_rules() -> Vec<RelationshipRule> {
    use RelationshipType::*;

    const ACCOUNT: &str = r"^(Bank)?Account$";

    vec![
        RelationshipRule::new(r"^Transaction$", ACCOUNT, r"^from_?iban$", From),
        RelationshipRule::new(r"^Transaction$", ACCOUNT, r"^to_?iban$", To),
        RelationshipRule::new(ACCOUNT, r"^Person$", r"^person_?id$", Owns).directed("Person", "Account"),
        RelationshipRule::new(ACCOUNT, r"^Company$", r"^company_?id$", Owns).directed("Company", "Account"),
        RelationshipRule::new(ACCOUNT, r"^Bank$", r"^bank_?id$", HeldAt),
        RelationshipRule::new(r"^Person$", r"^(Person|Manager)$", r"^(manager|parent)_?id$", ReportsTo),
        RelationshipRule::new(r"^Company$", r"^Person$", r"^person_?id$", Controls).directed("Person", "Company"),
    ]
}

struct CompiledRelationshipRule {
    source: Regex,
    target: Regex,
    column: Regex,
    rule: RelationshipRule,
}

impl CompiledRelationshipRule {
    fn compile(rule: RelationshipRule) -> Result<Self> {
        Ok(Self {
            source: compile_pattern(&rule.source_pattern)?,
            target: compile_pattern(&rule.target_pattern)?,
            column: compile_pattern(&rule.column_pattern)?,
            rule,
        })
    }

    fn matches(&self, source_entity: &str, fk: &ForeignKey) -> bool {
        let Some(target) = fk.target_entity.as_deref() else {
            return false;
        };
        self.source.is_match(source_entity)
            && self.target.is_match(target)
            && self.column.is_match(fk.column_name.trim())
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ImportError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

pub struct RelationshipInferenceEngine {
    rules: Vec<CompiledRelationshipRule>,
}

impl RelationshipInferenceEngine {
    pub fn new() -> Result<Self> {
        Self::with_rules(Vec::new())
    }

    /// Built-in rules followed by `extra_rules`, in that order.
    pub fn with_rules(extra_rules: Vec<RelationshipRule>) -> Result<Self> {
        let rules = builtin_relationship_rules()
            .into_iter()
            .chain(extra_rules)
            .map(CompiledRelationshipRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn infer(&self, foreign_keys: &[ForeignKey], source_entity: &str) -> Vec<InferredRelationship> {
        let mut inferred: Vec<InferredRelationship> = foreign_keys
            .iter()
            .filter_map(|fk| self.infer_one(fk, source_entity))
            .collect();

        inferred.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!(
            "Inferred {} relationships for {} from {} foreign keys",
            inferred.len(),
            source_entity,
            foreign_keys.len()
        );
        inferred
    }

    fn infer_one(&self, fk: &ForeignKey, source_entity: &str) -> Option<InferredRelationship> {
        if let Some(compiled) = self.rules.iter().find(|r| r.matches(source_entity, fk)) {
            let rule = &compiled.rule;
            let source = rule.actual_source.as_deref().unwrap_or(source_entity);
            let target = rule
                .actual_target
                .as_deref()
                .or(fk.target_entity.as_deref())
                .unwrap_or_default();

            return Some(InferredRelationship {
                relationship_type: rule.relationship_type,
                source_entity: normalize_entity(source),
                target_entity: normalize_entity(target),
                foreign_key_column: fk.column_name.clone(),
                confidence: fk.confidence,
                properties: None,
                bidirectional: rule.bidirectional,
            });
        }

        let target = fk.target_entity.as_deref()?;
        if AMBIGUOUS_TARGETS.contains(&target) {
            return None;
        }

        Some(InferredRelationship {
            relationship_type: RelationshipType::Owns,
            source_entity: normalize_entity(source_entity),
            target_entity: normalize_entity(target),
            foreign_key_column: fk.column_name.clone(),
            confidence: fk.confidence * GENERIC_CONFIDENCE_PENALTY,
            properties: None,
            bidirectional: false,
        })
    }
}

pub fn infer_relationships(foreign_keys: &[ForeignKey], source_entity: &str) -> Result<Vec<InferredRelationship>> {
    Ok(RelationshipInferenceEngine::new()?.infer(foreign_keys, source_entity))
}

// ============================================================================
// Cypher for a single inferred relationship
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct CypherOptions {
    pub use_merge: bool,
    /// `false` inlines escaped values; meant for human-readable output only.
    pub use_parameters: bool,
}

impl Default for CypherOptions {
    fn default() -> Self {
        Self {
            use_merge: true,
            use_parameters: true,
        }
    }
}

pub fn generate_relationship_cypher(
    relationship: &InferredRelationship,
    source_id: Value,
    target_id: Value,
    options: CypherOptions,
) -> Result<CypherStatement> {
    let source_label = canonical_label(&relationship.source_entity);
    let target_label = canonical_label(&relationship.target_entity);
    let rel_type = relationship.relationship_type.as_str();

    validate_identifier(&source_label, IdentifierKind::Label)?;
    validate_identifier(&target_label, IdentifierKind::Label)?;
    validate_identifier(rel_type, IdentifierKind::RelationshipType)?;

    let source_key = unique_identifier_field(&source_label).unwrap_or(FALLBACK_MATCH_KEY);
    let target_key = unique_identifier_field(&target_label).unwrap_or(FALLBACK_MATCH_KEY);

    let mut props = relationship.properties.clone().unwrap_or_default();
    props.insert("confidence".to_string(), Value::from(relationship.confidence));

    let mut t = CypherTemplate::new();
    t.text(format!("MATCH (source:{} {{{}: ", source_label, source_key))
        .value("sourceId", source_id)
        .text("})\n")
        .text(format!("MATCH (target:{} {{{}: ", target_label, target_key))
        .value("targetId", target_id)
        .text("})\n");

    if options.use_merge {
        t.text(format!("MERGE (source)-[r:{}]->(target)\nSET r += ", rel_type))
            .property_map("prop_", &props)?;
    } else {
        t.text(format!("CREATE (source)-[r:{} ", rel_type))
            .property_map("prop_", &props)?
            .text("]->(target)");
    }
    t.text("\nRETURN r");

    let style = if options.use_parameters {
        ParamStyle::Parameters
    } else {
        ParamStyle::Literal
    };
    Ok(t.render(style))
}

/// Human-readable summary of a set of inferred relationships, written as
/// Cypher comments. Not an executable statement; writes go through the
/// per-relationship generators and the batch manager.
pub fn generate_batch_relationship_cypher(relationships: &[InferredRelationship]) -> String {
    let mut out = format!("// Inferred relationships: {}\n", relationships.len());
    for rel in relationships {
        out.push_str(&format!(
            "// ({})-[:{}]->({}) via {} (confidence {:.2}{})\n",
            rel.source_entity,
            rel.relationship_type,
            rel.target_entity,
            rel.foreign_key_column.trim(),
            rel.confidence,
            if rel.bidirectional { ", bidirectional" } else { "" },
        ));
    }
    out
}
