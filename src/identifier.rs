//! Identifier Validation and Entity Registry
//!
//! Labels, relationship types and property keys cannot be passed to Cypher
//! as parameters, so they are checked against `^[A-Za-z_][A-Za-z0-9_]*$`
//! before being written into query text. Everything else goes in as a
//! parameter value.
//!
//! The unique-identifier table lives here as well: node and relationship
//! generators both resolve an entity's natural key through it.

use crate::error::{IdentifierKind, ImportError, Result};

// ============================================================================
// Validation
// ============================================================================

pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_identifier(s: &str, kind: IdentifierKind) -> Result<()> {
    if s.is_empty() || !is_valid_identifier(s) {
        return Err(ImportError::InvalidIdentifier {
            kind,
            value: s.to_string(),
        });
    }
    Ok(())
}

/// Property keys get their own error variant so callers can tell a bad
/// property map apart from a bad label.
pub fn validate_property_key(key: &str) -> Result<()> {
    if is_valid_identifier(key) {
        Ok(())
    } else {
        Err(ImportError::InvalidPropertyKey(key.to_string()))
    }
}

// ============================================================================
// Entity Registry
// ============================================================================

/// entity type -> natural key field
const UNIQUE_IDENTIFIERS: &[(&str, &str)] = &[
    ("Person", "person_id"),
    ("BankAccount", "iban"),
    ("Bank", "bank_id"),
    ("Company", "company_id"),
    ("Transaction", "transaction_id"),
];

/// Names the inference engine emits that differ from the registered label.
const LABEL_ALIASES: &[(&str, &str)] = &[("Account", "BankAccount"), ("Manager", "Person")];

/// Short names emitted on inferred relationships.
const ENTITY_ALIASES: &[(&str, &str)] = &[("BankAccount", "Account"), ("Manager", "Person")];

pub fn unique_identifier_field(entity_type: &str) -> Option<&'static str> {
    UNIQUE_IDENTIFIERS
        .iter()
        .find(|(entity, _)| *entity == entity_type)
        .map(|(_, field)| *field)
}

pub fn require_unique_identifier_field(entity_type: &str) -> Result<&'static str> {
    unique_identifier_field(entity_type)
        .ok_or_else(|| ImportError::UnknownEntityType(entity_type.to_string()))
}

/// `BankAccount` -> `Account`, `Manager` -> `Person`, anything else unchanged.
pub fn normalize_entity(name: &str) -> String {
    ENTITY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, normalized)| normalized.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Map an inferred entity name back to the label nodes are stored under.
pub fn canonical_label(name: &str) -> String {
    LABEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| name.to_string())
}
