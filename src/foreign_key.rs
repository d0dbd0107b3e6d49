//! Foreign Key Detector
//!
//! Scores column headers against an ordered rule table and reports the
//! columns that look like references to another entity. Built-in rules come
//! first, caller-supplied rules are appended after them and go through the
//! exact same matching, so a custom rule only wins a column by scoring
//! strictly higher than every built-in that also matches.

use crate::error::{ImportError, Result};
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    DomainSpecific,
    Hierarchical,
    IbanSnakeCase,
    IbanCamelCase,
    GenericSnakeCase,
    GenericCamelCase,
    WeakReference,
    Custom,
}

/// How the referenced entity is derived from a matching header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetExtraction {
    Fixed(String),
    /// First capture group, `owner_account` -> `OwnerAccount`
    PascalCasePrefix,
    /// First capture group, `ownerAccount` -> `OwnerAccount`
    CapitalizedPrefix,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ForeignKeyRule {
    pub pattern: String,
    pub confidence: f64,
    pub target: TargetExtraction,
    pub pattern_type: PatternType,
}

impl ForeignKeyRule {
    pub fn new(
        pattern: impl Into<String>,
        confidence: f64,
        target: TargetExtraction,
        pattern_type: PatternType,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            confidence,
            target,
            pattern_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column_name: String,
    pub confidence: f64,
    pub target_entity: Option<String>,
    pub pattern_type: PatternType,
}

#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub custom_patterns: Vec<ForeignKeyRule>,
    pub min_confidence: f64,
    pub case_insensitive: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            custom_patterns: Vec::new(),
            min_confidence: 0.0,
            case_insensitive: true,
        }
    }
}

// Camel-case suffixes must start on a case boundary: a lower-case letter or
// digit followed by an upper-case `I`. Only that boundary is pinned with
// `(?-i:..)`; the rest of each pattern follows `case_insensitive`, so
// `customerID` matches while `paid` and `valid` do not.
const CAMEL_PREFIX: &str = r"([a-z](?:[a-zA-Z0-9]*(?-i:[a-z0-9]))?)(?-i:I)";

/// Built-in rules in priority order.
pub fn builtin_rules() -> Vec<ForeignKeyRule> {
    use PatternType::*;
    use TargetExtraction::*;

    let fixed = |entity: &str| Fixed(entity.to_string());

    vec![
        ForeignKeyRule::new(r"^bank_id$", 0.95, fixed("Bank"), DomainSpecific),
        ForeignKeyRule::new(r"^person_id$", 0.95, fixed("Person"), DomainSpecific),
        ForeignKeyRule::new(r"^company_id$", 0.95, fixed("Company"), DomainSpecific),
        ForeignKeyRule::new(r"^account_id$", 0.95, fixed("BankAccount"), DomainSpecific),
        ForeignKeyRule::new(r"^transaction_id$", 0.95, fixed("Transaction"), DomainSpecific),
        ForeignKeyRule::new(r"^parent_id$", 0.90, fixed("Person"), Hierarchical),
        ForeignKeyRule::new(r"^[a-z0-9_]*[a-z0-9]_iban$", 0.90, fixed("BankAccount"), IbanSnakeCase),
        ForeignKeyRule::new(format!("^{}ban$", CAMEL_PREFIX), 0.80, fixed("BankAccount"), IbanCamelCase),
        ForeignKeyRule::new(
            r"^([a-z][a-z0-9]*(?:_[a-z0-9]+)*)_id$",
            0.90,
            PascalCasePrefix,
            GenericSnakeCase,
        ),
        ForeignKeyRule::new(format!("^{}d$", CAMEL_PREFIX), 0.75, CapitalizedPrefix, GenericCamelCase),
        ForeignKeyRule::new(r"ref(?:erence)?", 0.50, Unknown, WeakReference),
    ]
}

struct CompiledRule {
    regex: Regex,
    rule: ForeignKeyRule,
}

pub struct ForeignKeyDetector {
    rules: Vec<CompiledRule>,
    min_confidence: f64,
}

impl ForeignKeyDetector {
    pub fn new(options: DetectorOptions) -> Result<Self> {
        check_confidence("min_confidence", options.min_confidence)?;

        let mut rules = Vec::new();
        for rule in builtin_rules().into_iter().chain(options.custom_patterns) {
            check_confidence(&format!("confidence of pattern {:?}", rule.pattern), rule.confidence)?;
            let regex = RegexBuilder::new(&rule.pattern)
                .case_insensitive(options.case_insensitive)
                .build()
                .map_err(|source| ImportError::InvalidPattern {
                    pattern: rule.pattern.clone(),
                    source,
                })?;
            rules.push(CompiledRule { regex, rule });
        }

        Ok(Self {
            rules,
            min_confidence: options.min_confidence,
        })
    }

    /// Best-scoring rule per header, sorted by confidence (highest first).
    /// Ties between rules go to the earlier rule in the table.
    pub fn detect<S: AsRef<str>>(&self, headers: &[S]) -> Vec<ForeignKey> {
        let mut found = Vec::new();

        for header in headers {
            let original = header.as_ref();
            let trimmed = original.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut best: Option<(&CompiledRule, Captures)> = None;
            for compiled in &self.rules {
                if let Some(caps) = compiled.regex.captures(trimmed) {
                    let better = best
                        .as_ref()
                        .map_or(true, |(current, _)| compiled.rule.confidence > current.rule.confidence);
                    if better {
                        best = Some((compiled, caps));
                    }
                }
            }

            if let Some((compiled, caps)) = best {
                if compiled.rule.confidence < self.min_confidence {
                    continue;
                }
                found.push(ForeignKey {
                    column_name: original.to_string(),
                    confidence: compiled.rule.confidence,
                    target_entity: extract_target(&compiled.rule.target, &caps),
                    pattern_type: compiled.rule.pattern_type,
                });
            }
        }

        found.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!("Detected {} foreign keys in {} headers", found.len(), headers.len());
        found
    }
}

pub fn detect_foreign_keys<S: AsRef<str>>(headers: &[S], options: DetectorOptions) -> Result<Vec<ForeignKey>> {
    Ok(ForeignKeyDetector::new(options)?.detect(headers))
}

fn check_confidence(what: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ImportError::InvalidArgument(format!("{} must be within [0, 1], got {}", what, value)))
    }
}

fn extract_target(target: &TargetExtraction, caps: &Captures) -> Option<String> {
    let prefix = || caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty());
    match target {
        TargetExtraction::Fixed(entity) => Some(entity.clone()),
        TargetExtraction::PascalCasePrefix => prefix().map(pascal_case),
        TargetExtraction::CapitalizedPrefix => prefix().map(capitalize),
        TargetExtraction::Unknown => None,
    }
}

fn pascal_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| capitalize(&part.to_lowercase()))
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
