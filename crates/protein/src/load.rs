//! Input parsing for `.load`.
//!
//! Files are parsed according to `.format`, inferred from the extension
//! when absent. YAML sources may themselves contain constructs and are
//! preprocessed recursively by the caller; JSON and TOML are spliced in as
//! plain data. Parser arguments arrive through `.args` and are validated
//! per format.

use camino::Utf8Path;

use crate::error::{ProteinError, Result};
use crate::node::{self, Mapping, Node};

/// Source formats `.load` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    Yaml,
    Json,
    Toml,
}

impl LoadFormat {
    pub fn from_extension(path: &Utf8Path) -> Option<Self> {
        match path.extension()?.to_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(ProteinError::arg(format!("unknown load format '{other}'"))),
        }
    }

    /// YAML sources run through the preprocessor after parsing.
    pub fn is_preprocessed(&self) -> bool {
        matches!(self, Self::Yaml)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }
}

/// Options recognized by `.load`'s `.args`.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// YAML only: run the parsed tree through the preprocessor (default)
    /// or splice it as plain data.
    pub preprocess: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { preprocess: true }
    }
}

/// Validate `.args` against the format's argument set. YAML accepts
/// `typ` (round-trip only, mirroring the emitter) and `preprocess`; the
/// JSON and TOML parsers take no arguments.
pub fn parse_args(format: LoadFormat, args: &Mapping) -> Result<LoadOptions> {
    let mut options = LoadOptions::default();
    for (key, value) in args {
        match (format, key.as_str()) {
            (LoadFormat::Yaml, "typ") => {
                if value.as_str() != Some("rt") {
                    return Err(ProteinError::arg(
                        "only the round-trip parser is available",
                    ));
                }
            }
            (LoadFormat::Yaml, "preprocess") => match value {
                Node::Bool(b) => options.preprocess = *b,
                other => {
                    return Err(ProteinError::arg(format!(
                        "preprocess must be a bool, found {}",
                        other.kind()
                    )))
                }
            },
            _ => {
                return Err(ProteinError::arg(format!(
                    "the {} parser takes no argument '{key}'",
                    format.name()
                )))
            }
        }
    }
    Ok(options)
}

/// Parse file content in the given format.
pub fn parse(content: &str, format: LoadFormat) -> Result<Node> {
    match format {
        LoadFormat::Yaml => node::parse_yaml(content),
        LoadFormat::Json => {
            let value: serde_json::Value = serde_json::from_str(content).map_err(|err| {
                ProteinError::Parse {
                    message: format!("invalid JSON: {err}"),
                    line: Some(err.line() as u64),
                }
            })?;
            node::from_json(value)
        }
        LoadFormat::Toml => {
            let value: toml::Value = content.parse().map_err(|err: toml::de::Error| {
                ProteinError::parse(format!("invalid TOML: {err}"))
            })?;
            from_toml(value)
        }
    }
}

/// Read and parse a file, resolving the format from `explicit` or the
/// extension.
pub fn read_file(path: &Utf8Path, explicit: Option<&str>) -> Result<(Node, LoadFormat)> {
    let format = match explicit {
        Some(name) => LoadFormat::from_name(name)?,
        None => LoadFormat::from_extension(path).ok_or_else(|| {
            ProteinError::arg(format!(
                "cannot infer a load format for '{path}'; pass .format"
            ))
        })?,
    };
    let content = std::fs::read_to_string(path)
        .map_err(|err| ProteinError::io(format!("cannot read '{path}': {err}")))?;
    let node = parse(&content, format)?;
    Ok((node, format))
}

fn from_toml(value: toml::Value) -> Result<Node> {
    Ok(match value {
        toml::Value::String(s) => Node::from_scalar_text(&s),
        toml::Value::Integer(i) => Node::Int(i),
        toml::Value::Float(f) => Node::Float(f),
        toml::Value::Boolean(b) => Node::Bool(b),
        toml::Value::Datetime(dt) => Node::string(dt.to_string()),
        toml::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_toml(item)?);
            }
            Node::Sequence(out)
        }
        toml::Value::Table(table) => {
            let mut out = crate::node::Mapping::with_capacity(table.len());
            for (key, value) in table {
                crate::node::insert_unique(&mut out, key, from_toml(value)?)?;
            }
            Node::Mapping(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_inference() {
        assert_eq!(
            LoadFormat::from_extension(Utf8Path::new("cfg.yaml")),
            Some(LoadFormat::Yaml)
        );
        assert_eq!(
            LoadFormat::from_extension(Utf8Path::new("cfg.json")),
            Some(LoadFormat::Json)
        );
        assert_eq!(
            LoadFormat::from_extension(Utf8Path::new("cfg.toml")),
            Some(LoadFormat::Toml)
        );
        assert_eq!(LoadFormat::from_extension(Utf8Path::new("cfg.ini")), None);
    }

    #[test]
    fn test_parse_json_preserves_order() {
        let node = parse(r#"{"b": 1, "a": 2}"#, LoadFormat::Json).unwrap();
        let keys: Vec<_> = node.as_mapping().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_parse_toml_tables() {
        let node = parse("[server]\nhost = \"db1\"\nport = 5432", LoadFormat::Toml).unwrap();
        let server = node.as_mapping().unwrap().get("server").unwrap();
        assert_eq!(
            server.as_mapping().unwrap().get("port"),
            Some(&Node::Int(5432))
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_file(Utf8Path::new("/definitely/not/here.yaml"), None).unwrap_err();
        assert_eq!(err.label(), "io");
    }

    #[test]
    fn test_only_yaml_is_preprocessed() {
        assert!(LoadFormat::Yaml.is_preprocessed());
        assert!(!LoadFormat::Json.is_preprocessed());
        assert!(!LoadFormat::Toml.is_preprocessed());
    }

    #[test]
    fn test_parse_args_per_format() {
        let mut args = Mapping::new();
        args.insert("typ".into(), Node::string("rt"));
        args.insert("preprocess".into(), Node::Bool(false));
        let options = parse_args(LoadFormat::Yaml, &args).unwrap();
        assert!(!options.preprocess);

        // Defaults when no arguments are given.
        assert!(parse_args(LoadFormat::Yaml, &Mapping::new())
            .unwrap()
            .preprocess);

        // Only the round-trip parser exists.
        let mut bad = Mapping::new();
        bad.insert("typ".into(), Node::string("safe"));
        assert_eq!(
            parse_args(LoadFormat::Yaml, &bad).unwrap_err().label(),
            "argument"
        );

        // JSON and TOML take no arguments.
        assert_eq!(
            parse_args(LoadFormat::Json, &args).unwrap_err().label(),
            "argument"
        );
        assert_eq!(
            parse_args(LoadFormat::Toml, &args).unwrap_err().label(),
            "argument"
        );
    }
}
