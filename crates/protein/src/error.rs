//! Error taxonomy for the preprocessor.
//!
//! Every variant carries the source line where one is known; YAML parse
//! errors and template errors report positions, tree-level errors usually
//! cannot (the data model keeps no spans).

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ProteinError>;

/// Error variants surfaced by the preprocessor.
#[derive(Debug, Error)]
pub enum ProteinError {
    #[error("invalid YAML: {message}")]
    Parse { message: String, line: Option<u64> },

    #[error("duplicate key '{key}'")]
    DuplicateKey { key: String, line: Option<u64> },

    #[error("unknown construct '{name}'")]
    UnknownConstruct { name: String, line: Option<u64> },

    #[error("undefined name '{name}'")]
    Undefined { name: String, line: Option<u64> },

    #[error("expression error: {message}")]
    Expr { message: String, line: Option<u64> },

    #[error("type error: {message}")]
    Type { message: String, line: Option<u64> },

    #[error("argument error: {message}")]
    Arg { message: String, line: Option<u64> },

    #[error("I/O error: {message}")]
    Io { message: String, line: Option<u64> },

    #[error("SQL error: {message}")]
    Sql { message: String, line: Option<u64> },

    /// Orderly termination requested by `.exit`.
    #[error("exit ({code}): {message}")]
    Exit { code: i32, message: String },
}

impl ProteinError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            line: None,
        }
    }

    pub fn duplicate_key(key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            key: key.into(),
            line: None,
        }
    }

    pub fn unknown_construct(name: impl Into<String>) -> Self {
        Self::UnknownConstruct {
            name: name.into(),
            line: None,
        }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        Self::Undefined {
            name: name.into(),
            line: None,
        }
    }

    pub fn expr(message: impl Into<String>) -> Self {
        Self::Expr {
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
            line: None,
        }
    }

    pub fn arg(message: impl Into<String>) -> Self {
        Self::Arg {
            message: message.into(),
            line: None,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            line: None,
        }
    }

    pub fn sql(message: impl Into<String>) -> Self {
        Self::Sql {
            message: message.into(),
            line: None,
        }
    }

    /// Source line associated with the error, when one is known.
    pub fn line(&self) -> Option<u64> {
        match self {
            Self::Parse { line, .. }
            | Self::DuplicateKey { line, .. }
            | Self::UnknownConstruct { line, .. }
            | Self::Undefined { line, .. }
            | Self::Expr { line, .. }
            | Self::Type { line, .. }
            | Self::Arg { line, .. }
            | Self::Io { line, .. }
            | Self::Sql { line, .. } => *line,
            Self::Exit { .. } => None,
        }
    }

    /// Short category label used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::DuplicateKey { .. } => "duplicate-key",
            Self::UnknownConstruct { .. } => "unknown-construct",
            Self::Undefined { .. } => "undefined",
            Self::Expr { .. } => "expression",
            Self::Type { .. } => "type",
            Self::Arg { .. } => "argument",
            Self::Io { .. } => "io",
            Self::Sql { .. } => "sql",
            Self::Exit { .. } => "exit",
        }
    }
}

impl From<std::io::Error> for ProteinError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            line: None,
        }
    }
}

impl From<serde_yaml::Error> for ProteinError {
    fn from(err: serde_yaml::Error) -> Self {
        let line = err.location().map(|loc| loc.line() as u64);
        Self::Parse {
            message: err.to_string(),
            line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_key() {
        let err = ProteinError::duplicate_key("name");
        assert_eq!(err.to_string(), "duplicate key 'name'");
        assert_eq!(err.label(), "duplicate-key");
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err: ProteinError = serde_yaml::from_str::<serde_yaml::Value>("a: [1,\nb: 2")
            .unwrap_err()
            .into();
        assert_eq!(err.label(), "parse");
        assert!(err.line().is_some());
    }
}
