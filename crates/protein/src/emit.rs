//! Serializer dispatch for `.export` and the CLI output.
//!
//! Formats: YAML (round-trip emitter), JSON (indent / sort_keys /
//! ensure_ascii / separators / allow_nan), TOML, and a `repr`-style Python
//! rendering. Comment injection prefixes the document where the format has
//! a comment syntax.

use camino::Utf8Path;

use crate::error::{ProteinError, Result};
use crate::node::{to_yaml, Mapping, Node};

/// Output formats understood by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Toml,
    Python,
}

impl Format {
    /// Infer a format from a filename extension.
    pub fn from_extension(path: &Utf8Path) -> Option<Self> {
        match path.extension()?.to_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "py" => Some(Self::Python),
            _ => None,
        }
    }

    /// Resolve an explicit `.format` name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "python" | "py" => Ok(Self::Python),
            other => Err(ProteinError::arg(format!("unknown format '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Python => "python",
        }
    }
}

/// Serialize a normalized tree in the given format.
pub fn serialize(node: &Node, format: Format, args: &Mapping) -> Result<String> {
    match format {
        Format::Yaml => serialize_yaml(node, args),
        Format::Json => serialize_json(node, args),
        Format::Toml => serialize_toml(node, args),
        Format::Python => {
            expect_no_args(args, "python")?;
            let mut out = String::new();
            write_python(node, &mut out);
            out.push('\n');
            Ok(out)
        }
    }
}

/// Prefix the serialized document with a comment block.
pub fn inject_comment(text: &str, comment: &str, format: Format) -> Result<String> {
    if format == Format::Json {
        return Err(ProteinError::arg("JSON has no comment syntax"));
    }
    let mut out = String::new();
    for line in comment.lines() {
        if line.is_empty() {
            out.push_str("#\n");
        } else {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str(text);
    Ok(out)
}

fn expect_no_args(args: &Mapping, format: &str) -> Result<()> {
    if let Some(name) = args.keys().next() {
        return Err(ProteinError::arg(format!(
            "the {format} emitter takes no argument '{name}'"
        )));
    }
    Ok(())
}

// === YAML ===

const YAML_ARGS: &[&str] = &["indent", "offset", "width", "explicit_start", "typ"];

fn serialize_yaml(node: &Node, args: &Mapping) -> Result<String> {
    for key in args.keys() {
        if !YAML_ARGS.contains(&key.as_str()) {
            return Err(ProteinError::arg(format!(
                "unknown yaml emitter argument '{key}'"
            )));
        }
    }
    if let Some(typ) = args.get("typ") {
        if typ.as_str() != Some("rt") {
            return Err(ProteinError::arg("only the round-trip emitter is available"));
        }
    }
    let body = serde_yaml::to_string(&to_yaml(node))
        .map_err(|err| ProteinError::io(format!("yaml emission failed: {err}")))?;
    let explicit_start = args
        .get("explicit_start")
        .map(Node::is_truthy)
        .unwrap_or(false);
    if explicit_start {
        Ok(format!("---\n{body}"))
    } else {
        Ok(body)
    }
}

// === JSON ===

struct JsonOptions {
    indent: Option<usize>,
    sort_keys: bool,
    ensure_ascii: bool,
    item_sep: String,
    key_sep: String,
    allow_nan: bool,
}

impl JsonOptions {
    fn from_args(args: &Mapping) -> Result<Self> {
        let mut opts = Self {
            indent: None,
            sort_keys: false,
            ensure_ascii: true,
            item_sep: ", ".to_string(),
            key_sep: ": ".to_string(),
            allow_nan: true,
        };
        for (key, value) in args {
            match key.as_str() {
                "indent" => {
                    opts.indent = match value {
                        Node::Null => None,
                        Node::Int(i) if *i >= 0 => Some(*i as usize),
                        other => {
                            return Err(ProteinError::arg(format!(
                                "indent must be a non-negative int, found {}",
                                other.kind()
                            )))
                        }
                    };
                }
                "sort_keys" => opts.sort_keys = value.is_truthy(),
                "ensure_ascii" => opts.ensure_ascii = value.is_truthy(),
                "allow_nan" => opts.allow_nan = value.is_truthy(),
                // String dict keys are the only kind the tree can hold, so
                // skipkeys never has anything to skip.
                "skipkeys" => {}
                "separators" => {
                    let parts = value.as_sequence().ok_or_else(|| {
                        ProteinError::arg("separators must be a two-element sequence")
                    })?;
                    if parts.len() != 2 {
                        return Err(ProteinError::arg(
                            "separators must be a two-element sequence",
                        ));
                    }
                    opts.item_sep = parts[0]
                        .as_str()
                        .ok_or_else(|| ProteinError::arg("separators must be strings"))?
                        .to_string();
                    opts.key_sep = parts[1]
                        .as_str()
                        .ok_or_else(|| ProteinError::arg("separators must be strings"))?
                        .to_string();
                }
                other => {
                    return Err(ProteinError::arg(format!(
                        "unknown json emitter argument '{other}'"
                    )))
                }
            }
        }
        // Indented output drops the trailing space after items.
        if opts.indent.is_some() && !args.contains_key("separators") {
            opts.item_sep = ",".to_string();
        }
        Ok(opts)
    }
}

fn serialize_json(node: &Node, args: &Mapping) -> Result<String> {
    let opts = JsonOptions::from_args(args)?;
    let mut out = String::new();
    write_json(node, &opts, 0, &mut out)?;
    out.push('\n');
    Ok(out)
}

fn write_json(node: &Node, opts: &JsonOptions, depth: usize, out: &mut String) -> Result<()> {
    match node {
        Node::Null => out.push_str("null"),
        Node::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Node::Int(i) => out.push_str(&i.to_string()),
        Node::Float(f) => {
            if f.is_finite() {
                out.push_str(&format!("{f:?}"));
            } else if !opts.allow_nan {
                return Err(ProteinError::type_error(
                    "non-finite float is not valid JSON",
                ));
            } else if f.is_nan() {
                out.push_str("NaN");
            } else if *f > 0.0 {
                out.push_str("Infinity");
            } else {
                out.push_str("-Infinity");
            }
        }
        Node::Timestamp(_) | Node::String { .. } => {
            let text = node.scalar_text().expect("scalars render");
            write_json_string(&text, opts.ensure_ascii, out);
        }
        Node::Sequence(items) => {
            if items.is_empty() {
                out.push_str("[]");
                return Ok(());
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&opts.item_sep);
                }
                newline_indent(opts, depth + 1, out);
                write_json(item, opts, depth + 1, out)?;
            }
            newline_indent(opts, depth, out);
            out.push(']');
        }
        Node::Mapping(map) => {
            if map.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            let mut keys: Vec<&String> = map.keys().collect();
            if opts.sort_keys {
                keys.sort();
            }
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push_str(&opts.item_sep);
                }
                newline_indent(opts, depth + 1, out);
                write_json_string(key, opts.ensure_ascii, out);
                out.push_str(&opts.key_sep);
                write_json(&map[key.as_str()], opts, depth + 1, out)?;
            }
            newline_indent(opts, depth, out);
            out.push('}');
        }
    }
    Ok(())
}

fn newline_indent(opts: &JsonOptions, depth: usize, out: &mut String) {
    if let Some(width) = opts.indent {
        out.push('\n');
        out.push_str(&" ".repeat(width * depth));
    }
}

fn write_json_string(text: &str, ensure_ascii: bool, out: &mut String) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if ensure_ascii && !c.is_ascii() => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

// === TOML ===

fn serialize_toml(node: &Node, args: &Mapping) -> Result<String> {
    expect_no_args(args, "toml")?;
    let value = to_toml(node)?;
    if !value.is_table() {
        return Err(ProteinError::type_error(
            "TOML documents must have a mapping at the root",
        ));
    }
    toml::to_string(&value).map_err(|err| ProteinError::io(format!("toml emission failed: {err}")))
}

fn to_toml(node: &Node) -> Result<toml::Value> {
    Ok(match node {
        Node::Null => {
            return Err(ProteinError::type_error("TOML has no null value"));
        }
        Node::Bool(b) => toml::Value::Boolean(*b),
        Node::Int(i) => toml::Value::Integer(*i),
        Node::Float(f) => toml::Value::Float(*f),
        Node::Timestamp(_) | Node::String { .. } => {
            toml::Value::String(node.scalar_text().expect("scalars render"))
        }
        Node::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(to_toml(item)?);
            }
            toml::Value::Array(out)
        }
        Node::Mapping(map) => {
            let mut table = toml::map::Map::new();
            for (key, value) in map {
                table.insert(key.clone(), to_toml(value)?);
            }
            toml::Value::Table(table)
        }
    })
}

// === Python ===

fn write_python(node: &Node, out: &mut String) {
    match node {
        Node::Null => out.push_str("None"),
        Node::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        Node::Int(i) => out.push_str(&i.to_string()),
        Node::Float(f) => out.push_str(&format!("{f:?}")),
        Node::Timestamp(_) | Node::String { .. } => {
            let text = node.scalar_text().expect("scalars render");
            write_python_string(&text, out);
        }
        Node::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_python(item, out);
            }
            out.push(']');
        }
        Node::Mapping(map) => {
            out.push('{');
            for (i, (key, value)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_python_string(key, out);
                out.push_str(": ");
                write_python(value, out);
            }
            out.push('}');
        }
    }
}

fn write_python_string(text: &str, out: &mut String) {
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::parse_yaml;

    fn tree(source: &str) -> Node {
        parse_yaml(source).unwrap()
    }

    #[test]
    fn test_format_inference() {
        assert_eq!(
            Format::from_extension(Utf8Path::new("out.yaml")),
            Some(Format::Yaml)
        );
        assert_eq!(
            Format::from_extension(Utf8Path::new("out.yml")),
            Some(Format::Yaml)
        );
        assert_eq!(
            Format::from_extension(Utf8Path::new("out.json")),
            Some(Format::Json)
        );
        assert_eq!(
            Format::from_extension(Utf8Path::new("out.toml")),
            Some(Format::Toml)
        );
        assert_eq!(Format::from_extension(Utf8Path::new("out.txt")), None);
    }

    #[test]
    fn test_yaml_explicit_start() {
        let node = tree("a: 1");
        let mut args = Mapping::new();
        args.insert(".ignore".into(), Node::Null);
        assert!(serialize(&node, Format::Yaml, &args).is_err());

        let mut args = Mapping::new();
        args.insert("explicit_start".into(), Node::Bool(true));
        let out = serialize(&node, Format::Yaml, &args).unwrap();
        assert!(out.starts_with("---\n"));
    }

    #[test]
    fn test_json_compact_default() {
        let node = tree("a: 1\nb: [x, y]");
        let out = serialize(&node, Format::Json, &Mapping::new()).unwrap();
        assert_eq!(out, "{\"a\": 1, \"b\": [\"x\", \"y\"]}\n");
    }

    #[test]
    fn test_json_indent() {
        let node = tree("a: 1");
        let mut args = Mapping::new();
        args.insert("indent".into(), Node::Int(2));
        let out = serialize(&node, Format::Json, &args).unwrap();
        assert_eq!(out, "{\n  \"a\": 1\n}\n");
    }

    #[test]
    fn test_json_sort_keys() {
        let node = tree("b: 1\na: 2");
        let mut args = Mapping::new();
        args.insert("sort_keys".into(), Node::Bool(true));
        let out = serialize(&node, Format::Json, &args).unwrap();
        assert_eq!(out, "{\"a\": 2, \"b\": 1}\n");
    }

    #[test]
    fn test_json_ensure_ascii() {
        let node = tree("name: caf\u{e9}");
        let out = serialize(&node, Format::Json, &Mapping::new()).unwrap();
        assert_eq!(out, "{\"name\": \"caf\\u00e9\"}\n");

        let mut args = Mapping::new();
        args.insert("ensure_ascii".into(), Node::Bool(false));
        let out = serialize(&node, Format::Json, &args).unwrap();
        assert_eq!(out, "{\"name\": \"caf\u{e9}\"}\n");
    }

    #[test]
    fn test_toml_round_trip() {
        let node = tree("server:\n  host: db1\n  port: 5432");
        let out = serialize(&node, Format::Toml, &Mapping::new()).unwrap();
        let parsed: toml::Value = toml::from_str(&out).unwrap();
        assert_eq!(parsed["server"]["host"].as_str(), Some("db1"));
        assert_eq!(parsed["server"]["port"].as_integer(), Some(5432));
    }

    #[test]
    fn test_toml_requires_mapping_root() {
        let node = tree("- 1\n- 2");
        assert!(serialize(&node, Format::Toml, &Mapping::new()).is_err());
    }

    #[test]
    fn test_python_repr() {
        let node = tree("a: [1, two]\nok: true\nnothing: null");
        let out = serialize(&node, Format::Python, &Mapping::new()).unwrap();
        assert_eq!(out, "{'a': [1, 'two'], 'ok': True, 'nothing': None}\n");
    }

    #[test]
    fn test_comment_injection() {
        let out = inject_comment("a: 1\n", "generated file\ndo not edit", Format::Yaml).unwrap();
        assert_eq!(out, "# generated file\n# do not edit\na: 1\n");
    }

    #[test]
    fn test_comment_rejected_for_json() {
        assert!(inject_comment("{}", "nope", Format::Json).is_err());
    }
}
