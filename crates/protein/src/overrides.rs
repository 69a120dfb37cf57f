//! `--set` overrides.
//!
//! Each `key=value` pair is applied to the top-level `.define` block of the
//! input tree before rendering, so overrides win over in-document
//! definitions. Values are YAML: scalars pass through, and compound
//! payloads like `users="[Laurent, Paul]"` arrive as real sequences.

use crate::error::{ProteinError, Result};
use crate::node::{self, Mapping, Node};

/// One parsed `key=value` override.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub key: String,
    pub value: Node,
}

impl Override {
    /// Parse a raw `key=value` argument.
    pub fn parse(raw: &str) -> Result<Self> {
        let (key, payload) = raw.split_once('=').ok_or_else(|| {
            ProteinError::arg(format!("override '{raw}' must have the form key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProteinError::arg(format!(
                "override '{raw}' is missing a key"
            )));
        }
        let value = match serde_yaml::from_str::<serde_yaml::Value>(payload) {
            Ok(parsed) => node::from_yaml(parsed)?,
            // Anything YAML refuses is kept as plain text.
            Err(_) => Node::string(payload),
        };
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

/// Apply overrides onto the tree's top-level `.define` block, creating the
/// block when absent. A non-mapping root is wrapped in a synthesized
/// mapping whose `.do` carries the original document.
pub fn apply(tree: Node, overrides: &[Override]) -> Result<Node> {
    if overrides.is_empty() {
        return Ok(tree);
    }

    let mut root = match tree {
        Node::Mapping(map) => map,
        other => {
            let mut map = Mapping::new();
            map.insert(".do".to_string(), other);
            map
        }
    };

    let mut defines = match root.shift_remove(".define") {
        None => Mapping::new(),
        Some(Node::Mapping(map)) => map,
        Some(other) => {
            return Err(ProteinError::type_error(format!(
                "the top-level .define block must be a mapping, found {}",
                other.kind()
            )))
        }
    };
    for Override { key, value } in overrides {
        defines.insert(key.clone(), value.clone());
    }

    // Definitions go first so every sibling sees them.
    let mut rebuilt = Mapping::with_capacity(root.len() + 1);
    rebuilt.insert(".define".to_string(), Node::Mapping(defines));
    for (key, value) in root {
        rebuilt.insert(key, value);
    }
    Ok(Node::Mapping(rebuilt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse_yaml;

    #[test]
    fn test_parse_scalar_override() {
        let o = Override::parse("name=Alice").unwrap();
        assert_eq!(o.key, "name");
        assert_eq!(o.value, Node::string("Alice"));
    }

    #[test]
    fn test_parse_typed_override() {
        assert_eq!(Override::parse("n=3").unwrap().value, Node::Int(3));
        assert_eq!(Override::parse("ok=true").unwrap().value, Node::Bool(true));
    }

    #[test]
    fn test_parse_compound_override() {
        let o = Override::parse("users=[Laurent, Paul]").unwrap();
        assert_eq!(
            o.value,
            Node::Sequence(vec![Node::string("Laurent"), Node::string("Paul")])
        );
    }

    #[test]
    fn test_missing_equals_fails() {
        assert_eq!(Override::parse("oops").unwrap_err().label(), "argument");
    }

    #[test]
    fn test_apply_creates_define_block_first() {
        let tree = parse_yaml("a: 1").unwrap();
        let overrides = [Override::parse("x=2").unwrap()];
        let out = apply(tree, &overrides).unwrap();
        let map = out.as_mapping().unwrap();
        assert_eq!(map.keys().next().map(String::as_str), Some(".define"));
        let defines = map.get(".define").unwrap().as_mapping().unwrap();
        assert_eq!(defines.get("x"), Some(&Node::Int(2)));
    }

    #[test]
    fn test_apply_overwrites_existing_definition() {
        let tree = parse_yaml(".define:\n  x: 1\na: \"{{ x }}\"").unwrap();
        let overrides = [Override::parse("x=9").unwrap()];
        let out = apply(tree, &overrides).unwrap();
        let defines = out
            .as_mapping()
            .unwrap()
            .get(".define")
            .unwrap()
            .as_mapping()
            .unwrap();
        assert_eq!(defines.get("x"), Some(&Node::Int(9)));
    }

    #[test]
    fn test_apply_wraps_non_mapping_root() {
        let tree = parse_yaml("- 1\n- 2").unwrap();
        let overrides = [Override::parse("x=1").unwrap()];
        let out = apply(tree, &overrides).unwrap();
        let map = out.as_mapping().unwrap();
        assert!(map.contains_key(".define"));
        assert!(map.contains_key(".do"));
    }
}
