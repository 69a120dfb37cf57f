//! Construct recognition and argument binding.
//!
//! Dotted keys route through a closed table; the handlers themselves live
//! on the interpreter. Parameter keys of construct blocks (`.cond`,
//! `.values`, ...) are consumed by their handlers and are not constructs.

use crate::error::{ProteinError, Result};
use crate::node::Node;

/// The built-in construct table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construct {
    Define,
    Local,
    Do,
    If,
    Switch,
    Foreach,
    Function,
    Call,
    ImportModule,
    Load,
    Export,
    Print,
    Exit,
    DefSql,
    ExecSql,
    LoadSql,
    OpenBuffer,
    WriteBuffer,
    SaveBuffer,
    Write,
}

impl Construct {
    /// Look up a dotted key. `.context` is the historical alias of
    /// `.define`; `.module` aliases `.import_module`.
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            ".define" | ".context" => Self::Define,
            ".local" => Self::Local,
            ".do" => Self::Do,
            ".if" => Self::If,
            ".switch" => Self::Switch,
            ".foreach" => Self::Foreach,
            ".function" => Self::Function,
            ".call" => Self::Call,
            ".import_module" | ".module" => Self::ImportModule,
            ".load" => Self::Load,
            ".export" => Self::Export,
            ".print" => Self::Print,
            ".exit" => Self::Exit,
            ".def_sql" => Self::DefSql,
            ".exec_sql" => Self::ExecSql,
            ".load_sql" => Self::LoadSql,
            ".open_buffer" => Self::OpenBuffer,
            ".write_buffer" => Self::WriteBuffer,
            ".save_buffer" => Self::SaveBuffer,
            ".write" => Self::Write,
            _ => return None,
        })
    }
}

/// Bind call arguments to a parameter list.
///
/// A sequence binds positionally and must match the parameter count; a
/// mapping binds by name and must cover every parameter exactly once. Any
/// other argument node is rejected.
pub fn bind_args(params: &[String], args: &Node) -> Result<Vec<(String, Node)>> {
    match args {
        Node::Null => {
            if params.is_empty() {
                Ok(Vec::new())
            } else {
                Err(ProteinError::arg(format!(
                    "expected {} argument(s), found none",
                    params.len()
                )))
            }
        }
        Node::Sequence(values) => {
            if values.len() != params.len() {
                return Err(ProteinError::arg(format!(
                    "expected {} argument(s), found {}",
                    params.len(),
                    values.len()
                )));
            }
            Ok(params
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect())
        }
        Node::Mapping(map) => {
            for key in map.keys() {
                if !params.iter().any(|p| p == key) {
                    return Err(ProteinError::arg(format!("unknown argument '{key}'")));
                }
            }
            let mut bound = Vec::with_capacity(params.len());
            for param in params {
                let value = map.get(param).ok_or_else(|| {
                    ProteinError::arg(format!("missing argument '{param}'"))
                })?;
                bound.push((param.clone(), value.clone()));
            }
            Ok(bound)
        }
        other => Err(ProteinError::arg(format!(
            "arguments must be a sequence or a mapping, found {}",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Mapping;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(Construct::from_key(".context"), Some(Construct::Define));
        assert_eq!(Construct::from_key(".define"), Some(Construct::Define));
        assert_eq!(
            Construct::from_key(".module"),
            Some(Construct::ImportModule)
        );
        assert_eq!(Construct::from_key(".nope"), None);
        assert_eq!(Construct::from_key("plain"), None);
    }

    #[test]
    fn test_positional_binding_in_order() {
        let args = Node::Sequence(vec![Node::Int(1), Node::Int(2)]);
        let bound = bind_args(&params(&["a", "b"]), &args).unwrap();
        assert_eq!(bound[0], ("a".to_string(), Node::Int(1)));
        assert_eq!(bound[1], ("b".to_string(), Node::Int(2)));
    }

    #[test]
    fn test_positional_count_mismatch() {
        let args = Node::Sequence(vec![Node::Int(1)]);
        let err = bind_args(&params(&["a", "b"]), &args).unwrap_err();
        assert_eq!(err.label(), "argument");
    }

    #[test]
    fn test_named_binding_follows_parameter_order() {
        let mut map = Mapping::new();
        map.insert("b".into(), Node::Int(2));
        map.insert("a".into(), Node::Int(1));
        let bound = bind_args(&params(&["a", "b"]), &Node::Mapping(map)).unwrap();
        assert_eq!(bound[0].0, "a");
        assert_eq!(bound[1].0, "b");
    }

    #[test]
    fn test_named_unknown_argument() {
        let mut map = Mapping::new();
        map.insert("c".into(), Node::Int(3));
        let err = bind_args(&params(&["a"]), &Node::Mapping(map)).unwrap_err();
        assert_eq!(err.label(), "argument");
    }

    #[test]
    fn test_named_missing_argument() {
        let mut map = Mapping::new();
        map.insert("a".into(), Node::Int(1));
        let err = bind_args(&params(&["a", "b"]), &Node::Mapping(map)).unwrap_err();
        assert_eq!(err.label(), "argument");
    }

    #[test]
    fn test_scalar_arguments_rejected() {
        let err = bind_args(&params(&["a"]), &Node::Int(123)).unwrap_err();
        assert_eq!(err.label(), "argument");
    }
}
