//! Node and Relationship Query Generation
//!
//! Builds parameterized Cypher for a single record or a single link between
//! two records. Labels and relationship types are validated identifiers;
//! every value travels as a parameter.

use crate::cypher::{CypherStatement, CypherTemplate, ParamStyle, Params};
use crate::error::{IdentifierKind, ImportError, Result};
use crate::identifier::{require_unique_identifier_field, validate_identifier};
use serde_json::Value;
use std::collections::BTreeMap;

/// One record's fields. `None` marks a field absent from the source row and
/// is dropped; `Some(Value::Null)` is an explicit null and is written.
pub type RecordData = BTreeMap<String, Option<Value>>;

const DATASET_ID_KEY: &str = "dataset_id";

#[derive(Debug, Clone, Default)]
pub struct NodeQueryOptions {
    pub merge: bool,
    pub dataset_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipQueryOptions {
    pub merge: bool,
    pub dataset_id: Option<String>,
    pub properties: RecordData,
}

/// One side of a relationship: its label and the record carrying its key.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub entity_type: &'a str,
    pub data: &'a RecordData,
}

impl<'a> NodeRef<'a> {
    pub fn new(entity_type: &'a str, data: &'a RecordData) -> Self {
        Self { entity_type, data }
    }
}

fn prepare_properties(data: &RecordData, dataset_id: Option<&str>) -> Params {
    let mut props: Params = data
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.clone(), v.clone())))
        .collect();
    if let Some(dataset_id) = dataset_id {
        props.insert(DATASET_ID_KEY.to_string(), Value::from(dataset_id));
    }
    props
}

/// `CREATE` replaces the property set (`SET n = $props`); `MERGE` matches on
/// the entity's unique identifier and only adds or overwrites the supplied
/// keys (`SET n += $props`), so re-imports keep properties set earlier.
pub fn generate_node_query(entity_type: &str, data: &RecordData, options: &NodeQueryOptions) -> Result<CypherStatement> {
    validate_identifier(entity_type, IdentifierKind::Label)?;
    let props = prepare_properties(data, options.dataset_id.as_deref());

    let mut t = CypherTemplate::new();
    if !options.merge {
        t.text(format!("CREATE (n:{}) SET n = ", entity_type))
            .value("props", Value::Object(props))
            .text(" RETURN n");
        return Ok(t.render(ParamStyle::Parameters));
    }

    let id_field = require_unique_identifier_field(entity_type)?;
    let id_value = match props.get(id_field) {
        Some(value) if !value.is_null() => value.clone(),
        _ => {
            return Err(ImportError::MissingUniqueIdentifier {
                entity_type: entity_type.to_string(),
                field: id_field.to_string(),
            })
        }
    };

    t.text(format!("MERGE (n:{} {{{}: ", entity_type, id_field))
        .value(id_field, id_value)
        .text("}) SET n += ")
        .value("props", Value::Object(props))
        .text(" RETURN n");
    Ok(t.render(ParamStyle::Parameters))
}

fn node_identifier(node: &NodeRef) -> Result<(&'static str, Value)> {
    let field = require_unique_identifier_field(node.entity_type)?;
    match node.data.get(field) {
        Some(Some(value)) if !value.is_null() => Ok((field, value.clone())),
        _ => Err(ImportError::MissingIdentifier {
            entity_type: node.entity_type.to_string(),
            field: field.to_string(),
        }),
    }
}

pub fn generate_relationship_query(
    relationship_type: &str,
    source: NodeRef,
    target: NodeRef,
    options: &RelationshipQueryOptions,
) -> Result<CypherStatement> {
    validate_identifier(relationship_type, IdentifierKind::RelationshipType)?;
    validate_identifier(source.entity_type, IdentifierKind::Label)?;
    validate_identifier(target.entity_type, IdentifierKind::Label)?;

    let (from_key, from_id) = node_identifier(&source)?;
    let (to_key, to_id) = node_identifier(&target)?;

    let mut t = CypherTemplate::new();
    t.text(format!("MATCH (from:{} {{{}: ", source.entity_type, from_key))
        .value("fromId", from_id)
        .text("})\n")
        .text(format!("MATCH (to:{} {{{}: ", target.entity_type, to_key))
        .value("toId", to_id)
        .text("})\n")
        .text(format!(
            "{} (from)-[r:{}]->(to)\n",
            if options.merge { "MERGE" } else { "CREATE" },
            relationship_type
        ));

    let props = prepare_properties(&options.properties, options.dataset_id.as_deref());
    if !props.is_empty() {
        t.text(if options.merge { "SET r += " } else { "SET r = " })
            .value("props", Value::Object(props))
            .text("\n");
    }
    t.text("RETURN r");

    Ok(t.render(ParamStyle::Parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: &[(&str, Option<Value>)]) -> RecordData {
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_create_node_query() {
        let data = record(&[("person_id", Some(json!("P1"))), ("first_name", Some(json!("Ada")))]);
        let stmt = generate_node_query("Person", &data, &NodeQueryOptions::default()).unwrap();

        assert_eq!(stmt.query, "CREATE (n:Person) SET n = $props RETURN n");
        assert_eq!(stmt.params["props"], json!({"person_id": "P1", "first_name": "Ada"}));
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_null_kept_absent_dropped() {
        let data = record(&[
            ("person_id", Some(json!("P1"))),
            ("alias", Some(Value::Null)),
            ("occupation", None),
        ]);
        let stmt = generate_node_query("Person", &data, &NodeQueryOptions::default()).unwrap();
        let props = stmt.params["props"].as_object().unwrap();

        assert_eq!(props.get("alias"), Some(&Value::Null));
        assert!(!props.contains_key("occupation"));
    }

    #[test]
    fn test_merge_node_query() {
        let data = record(&[("iban", Some(json!("DE89370400440532013000"))), ("currency", Some(json!("EUR")))]);
        let options = NodeQueryOptions {
            merge: true,
            dataset_id: Some("ds-1".to_string()),
        };
        let stmt = generate_node_query("BankAccount", &data, &options).unwrap();

        assert_eq!(stmt.query, "MERGE (n:BankAccount {iban: $iban}) SET n += $props RETURN n");
        assert_eq!(stmt.params["iban"], json!("DE89370400440532013000"));
        assert_eq!(stmt.params["props"]["dataset_id"], json!("ds-1"));
        assert_eq!(stmt.params["props"]["currency"], json!("EUR"));
    }

    #[test]
    fn test_merge_requires_unique_identifier() {
        let data = record(&[("first_name", Some(json!("x")))]);
        let options = NodeQueryOptions {
            merge: true,
            ..Default::default()
        };
        let err = generate_node_query("Person", &data, &options).unwrap_err();

        assert!(matches!(err, ImportError::MissingUniqueIdentifier { ref field, .. } if field == "person_id"));
        assert!(err.to_string().contains("person_id"));
    }

    #[test]
    fn test_merge_rejects_null_identifier() {
        let data = record(&[("person_id", Some(Value::Null))]);
        let options = NodeQueryOptions {
            merge: true,
            ..Default::default()
        };
        assert!(matches!(
            generate_node_query("Person", &data, &options),
            Err(ImportError::MissingUniqueIdentifier { .. })
        ));
    }

    #[test]
    fn test_merge_unknown_entity_type() {
        let data = record(&[("id", Some(json!(1)))]);
        let options = NodeQueryOptions {
            merge: true,
            ..Default::default()
        };
        assert!(matches!(
            generate_node_query("Merchant", &data, &options),
            Err(ImportError::UnknownEntityType(_))
        ));
        // CREATE does not need a registered key
        assert!(generate_node_query("Merchant", &data, &NodeQueryOptions::default()).is_ok());
    }

    #[test]
    fn test_node_label_validated() {
        let data = RecordData::new();
        let err = generate_node_query("Person) DETACH DELETE (n", &data, &NodeQueryOptions::default()).unwrap_err();
        assert!(matches!(err, ImportError::InvalidIdentifier { kind: IdentifierKind::Label, .. }));
    }

    #[test]
    fn test_relationship_query_merge_with_properties() {
        let person = record(&[("person_id", Some(json!("P1")))]);
        let account = record(&[("iban", Some(json!("NL91ABNA0417164300"))), ("balance", Some(json!(10)))]);
        let options = RelationshipQueryOptions {
            merge: true,
            dataset_id: Some("ds-7".to_string()),
            properties: record(&[("since", Some(json!("2020-01-01"))), ("note", None)]),
        };

        let stmt = generate_relationship_query(
            "OWNS",
            NodeRef::new("Person", &person),
            NodeRef::new("BankAccount", &account),
            &options,
        )
        .unwrap();

        assert_eq!(
            stmt.query,
            "MATCH (from:Person {person_id: $fromId})\n\
             MATCH (to:BankAccount {iban: $toId})\n\
             MERGE (from)-[r:OWNS]->(to)\n\
             SET r += $props\n\
             RETURN r"
        );
        assert_eq!(stmt.params["fromId"], json!("P1"));
        assert_eq!(stmt.params["toId"], json!("NL91ABNA0417164300"));
        assert_eq!(stmt.params["props"], json!({"since": "2020-01-01", "dataset_id": "ds-7"}));
    }

    #[test]
    fn test_relationship_query_without_properties_omits_set() {
        let account = record(&[("iban", Some(json!("I1")))]);
        let bank = record(&[("bank_id", Some(json!("B1")))]);
        let stmt = generate_relationship_query(
            "HELD_AT",
            NodeRef::new("BankAccount", &account),
            NodeRef::new("Bank", &bank),
            &RelationshipQueryOptions::default(),
        )
        .unwrap();

        assert!(!stmt.query.contains("SET"));
        assert!(stmt.query.contains("CREATE (from)-[r:HELD_AT]->(to)"));
        assert!(stmt.query.contains("$fromId") && stmt.query.contains("$toId"));
        assert!(!stmt.query.contains("I1") && !stmt.query.contains("B1"));
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_relationship_query_missing_identifier() {
        let person = record(&[("first_name", Some(json!("Ada")))]);
        let account = record(&[("iban", Some(json!("I1")))]);
        let err = generate_relationship_query(
            "OWNS",
            NodeRef::new("Person", &person),
            NodeRef::new("BankAccount", &account),
            &RelationshipQueryOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ImportError::MissingIdentifier { ref entity_type, ref field } if entity_type == "Person" && field == "person_id"
        ));
    }

    #[test]
    fn test_relationship_query_validates_type() {
        let person = record(&[("person_id", Some(json!("P1")))]);
        let err = generate_relationship_query(
            "OWNS]->(x) DETACH DELETE x //",
            NodeRef::new("Person", &person),
            NodeRef::new("Person", &person),
            &RelationshipQueryOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ImportError::InvalidIdentifier {
                kind: IdentifierKind::RelationshipType,
                ..
            }
        ));
    }
}
