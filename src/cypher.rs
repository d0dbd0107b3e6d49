//! Cypher Query Template
//!
//! Query text is assembled once as a list of text segments and named value
//! placeholders, then materialized either as `$name` tokens plus a parameter
//! map, or as inline literals for debug output. Keeping a single builder
//! means the two forms can never disagree on structure or escaping.

use crate::error::Result;
use crate::identifier::validate_property_key;
use serde::Serialize;
use serde_json::Value;

pub type Params = serde_json::Map<String, Value>;

/// A query plus the parameter values it references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CypherStatement {
    pub query: String,
    pub params: Params,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `$name` placeholders, values returned in `params`
    Parameters,
    /// Values escaped and written into the query text
    Literal,
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Value { name: String, value: Value },
}

#[derive(Debug, Clone, Default)]
pub struct CypherTemplate {
    segments: Vec<Segment>,
}

impl CypherTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.segments.push(Segment::Text(text.into()));
        self
    }

    pub fn value(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.segments.push(Segment::Value {
            name: name.into(),
            value,
        });
        self
    }

    /// Append `{key: <value>, ...}`. Each key is validated; each value gets
    /// its own placeholder named `<prefix><key>`.
    pub fn property_map(&mut self, prefix: &str, props: &Params) -> Result<&mut Self> {
        for key in props.keys() {
            validate_property_key(key)?;
        }

        self.text("{");
        for (idx, (key, value)) in props.iter().enumerate() {
            if idx > 0 {
                self.text(", ");
            }
            self.text(format!("{}: ", key));
            self.value(format!("{}{}", prefix, key), value.clone());
        }
        self.text("}");
        Ok(self)
    }

    pub fn render(&self, style: ParamStyle) -> CypherStatement {
        let mut query = String::new();
        let mut params = Params::new();

        for segment in &self.segments {
            match segment {
                Segment::Text(text) => query.push_str(text),
                Segment::Value { name, value } => match style {
                    ParamStyle::Parameters => {
                        query.push('$');
                        query.push_str(name);
                        params.insert(name.clone(), value.clone());
                    }
                    ParamStyle::Literal => query.push_str(&literal(value)),
                },
            }
        }

        CypherStatement { query, params }
    }
}

/// Backslashes first, then single quotes.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape_string(s)),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", literal_key(k), literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn literal_key(key: &str) -> String {
    if crate::identifier::is_valid_identifier(key) {
        key.to_string()
    } else {
        format!("`{}`", key.replace('`', "``"))
    }
}
