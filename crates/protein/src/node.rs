//! The data tree.
//!
//! A [`Node`] is the closed sum of everything a preprocessed document can
//! contain: scalars, ordered mappings, and sequences. Strings carry a
//! `literal` flag when the source prefixed them with the `#!literal `
//! sentinel; such strings are never submitted to the template engine and the
//! sentinel is stripped on final emission.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{ProteinError, Result};

/// Sentinel that marks a string as literal (exempt from template evaluation).
pub const LITERAL_PREFIX: &str = "#!literal ";

/// Ordered, string-keyed mapping with unique keys.
pub type Mapping = IndexMap<String, Node>;

/// A node of the data tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<FixedOffset>),
    String { text: String, literal: bool },
    Sequence(Vec<Node>),
    Mapping(Mapping),
}

impl Node {
    /// Plain (template-eligible) string.
    pub fn string(text: impl Into<String>) -> Self {
        Self::String {
            text: text.into(),
            literal: false,
        }
    }

    /// Literal-tagged string (sentinel already stripped).
    pub fn literal(text: impl Into<String>) -> Self {
        Self::String {
            text: text.into(),
            literal: true,
        }
    }

    /// Build a string node from raw scalar text, honoring the sentinel.
    pub fn from_scalar_text(text: &str) -> Self {
        match text.strip_prefix(LITERAL_PREFIX) {
            Some(rest) => Self::literal(rest),
            None => Self::string(text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Node]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Human-readable kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Timestamp(_) => "timestamp",
            Self::String { .. } => "string",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Truthiness used by `.if`: null is false, numbers are non-zero,
    /// strings are non-empty and not "false", collections are non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Timestamp(_) => true,
            Self::String { text, .. } => !text.is_empty() && text != "false" && text != "False",
            Self::Sequence(items) => !items.is_empty(),
            Self::Mapping(map) => !map.is_empty(),
        }
    }

    /// Render a scalar to its text form. Sequences and mappings have no
    /// scalar rendering and return `None`.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Null => Some(String::new()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::String { text, .. } => Some(text.clone()),
            Self::Sequence(_) | Self::Mapping(_) => None,
        }
    }

    /// Recursively strip literal flags, producing a pure data tree ready for
    /// serialization.
    pub fn normalized(&self) -> Node {
        match self {
            Self::String { text, .. } => Node::string(text.clone()),
            Self::Sequence(items) => Node::Sequence(items.iter().map(Node::normalized).collect()),
            Self::Mapping(map) => Node::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.normalized()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// True when any mapping in the tree still carries a dotted key.
    pub fn has_dotted_keys(&self) -> bool {
        match self {
            Self::Mapping(map) => map
                .iter()
                .any(|(k, v)| k.starts_with('.') || v.has_dotted_keys()),
            Self::Sequence(items) => items.iter().any(Node::has_dotted_keys),
            _ => false,
        }
    }
}

/// Insert into a mapping, failing on duplicates.
pub fn insert_unique(map: &mut Mapping, key: String, value: Node) -> Result<()> {
    if map.contains_key(&key) {
        return Err(ProteinError::duplicate_key(key));
    }
    map.insert(key, value);
    Ok(())
}

// === Collapse rules ===

/// Reduce the results of a block of actions (the `.do` rule):
/// empty to null, singleton to its element, a run of distinct single-key
/// mappings to one merged mapping, anything else to the sequence unchanged.
pub fn collapse(items: Vec<Node>) -> Result<Node> {
    if items.is_empty() {
        return Ok(Node::Null);
    }
    if items.len() == 1 {
        return Ok(items.into_iter().next().unwrap());
    }
    if items
        .iter()
        .all(|item| item.as_mapping().is_some_and(|m| m.len() == 1))
    {
        let mut merged = Mapping::new();
        for item in items {
            let Node::Mapping(map) = item else {
                unreachable!()
            };
            for (key, value) in map {
                insert_unique(&mut merged, key, value)?;
            }
        }
        return Ok(Node::Mapping(merged));
    }
    Ok(Node::Sequence(items))
}

/// The `.foreach` variant: never reduces below a sequence. A non-empty run
/// of single-key mappings with pairwise distinct keys merges into one
/// mapping (unless `collect_mappings` is disabled); everything else is the
/// sequence as-is.
pub fn collapse_foreach(items: Vec<Node>, collect_mappings: bool) -> Node {
    if collect_mappings && !items.is_empty() {
        let single_keyed = items
            .iter()
            .all(|item| item.as_mapping().is_some_and(|m| m.len() == 1));
        if single_keyed {
            let mut merged = Mapping::new();
            let mut distinct = true;
            for item in &items {
                let Node::Mapping(map) = item else {
                    unreachable!()
                };
                for (key, value) in map {
                    if merged.insert(key.clone(), value.clone()).is_some() {
                        distinct = false;
                        break;
                    }
                }
            }
            if distinct {
                return Node::Mapping(merged);
            }
        }
    }
    Node::Sequence(items)
}

// === YAML boundary ===

/// Convert a parsed YAML value into a node tree.
///
/// Duplicate mapping keys are rejected, tagged values are unwrapped, and
/// plain scalars in RFC 3339 date-time form become timestamps.
pub fn from_yaml(value: serde_yaml::Value) -> Result<Node> {
    match value {
        serde_yaml::Value::Null => Ok(Node::Null),
        serde_yaml::Value::Bool(b) => Ok(Node::Bool(b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Node::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Node::Float(f))
            } else {
                Err(ProteinError::type_error(format!(
                    "unrepresentable number: {n}"
                )))
            }
        }
        serde_yaml::Value::String(s) => Ok(string_scalar(&s)),
        serde_yaml::Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_yaml(item)?);
            }
            Ok(Node::Sequence(out))
        }
        serde_yaml::Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, value) in map {
                let key = yaml_key_to_string(key)?;
                insert_unique(&mut out, key, from_yaml(value)?)?;
            }
            Ok(Node::Mapping(out))
        }
        serde_yaml::Value::Tagged(tagged) => from_yaml(tagged.value),
    }
}

fn string_scalar(text: &str) -> Node {
    if text.starts_with(LITERAL_PREFIX) {
        return Node::from_scalar_text(text);
    }
    // RFC 3339 date-times round-trip as timestamps; everything else,
    // including bare dates, stays a string.
    if text.len() >= 19 && text.as_bytes().get(10) == Some(&b'T') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
            return Node::Timestamp(ts);
        }
    }
    Node::string(text)
}

fn yaml_key_to_string(key: serde_yaml::Value) -> Result<String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(ProteinError::type_error(format!(
            "mapping keys must be scalars, found {other:?}"
        ))),
    }
}

/// Convert a node tree back into a YAML value for emission. Literal flags
/// are stripped here: only the inner text remains.
pub fn to_yaml(node: &Node) -> serde_yaml::Value {
    match node {
        Node::Null => serde_yaml::Value::Null,
        Node::Bool(b) => serde_yaml::Value::Bool(*b),
        Node::Int(i) => serde_yaml::Value::Number((*i).into()),
        Node::Float(f) => serde_yaml::Value::Number(serde_yaml::Number::from(*f)),
        Node::Timestamp(ts) => {
            serde_yaml::Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Node::String { text, .. } => serde_yaml::Value::String(text.clone()),
        Node::Sequence(items) => serde_yaml::Value::Sequence(items.iter().map(to_yaml).collect()),
        Node::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (key, value) in map {
                out.insert(serde_yaml::Value::String(key.clone()), to_yaml(value));
            }
            serde_yaml::Value::Mapping(out)
        }
    }
}

/// Parse YAML source text into a node tree.
pub fn parse_yaml(source: &str) -> Result<Node> {
    let value: serde_yaml::Value = serde_yaml::from_str(source)?;
    from_yaml(value)
}

/// Convert a parsed JSON value into a node tree. Object order is preserved.
pub fn from_json(value: serde_json::Value) -> Result<Node> {
    match value {
        serde_json::Value::Null => Ok(Node::Null),
        serde_json::Value::Bool(b) => Ok(Node::Bool(b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Node::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Node::Float(f))
            } else {
                Err(ProteinError::type_error(format!(
                    "unrepresentable number: {n}"
                )))
            }
        }
        serde_json::Value::String(s) => Ok(Node::from_scalar_text(&s)),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_json(item)?);
            }
            Ok(Node::Sequence(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, value) in map {
                insert_unique(&mut out, key, from_json(value)?)?;
            }
            Ok(Node::Mapping(out))
        }
    }
}

/// Serialization view: literal flags are dropped, mappings keep their order.
impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Int(i) => serializer.serialize_i64(*i),
            Node::Float(f) => serializer.serialize_f64(*f),
            Node::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Node::String { text, .. } => serializer.serialize_str(text),
            Node::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Mapping(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}
