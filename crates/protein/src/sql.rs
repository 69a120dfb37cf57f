//! SQL collaborator seam.
//!
//! The core never interprets SQL. `.def_sql` opens an engine through a
//! registered factory, `.exec_sql` runs a statement ignoring rows, and
//! `.load_sql` runs a query and returns one mapping per row, columns in the
//! order the driver reports them. Engines are dropped at interpreter
//! teardown together with the frames that hold their handles.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ProteinError, Result};
use crate::node::Mapping;

/// A live database engine.
pub trait SqlDriver {
    /// Execute a statement, discarding any rows it may produce.
    fn execute(&self, statement: &str) -> Result<()>;

    /// Run a query, returning rows as ordered column-name to value mappings.
    fn query(&self, query: &str) -> Result<Vec<Mapping>>;
}

/// Opens engines for the URL schemes it understands.
pub trait SqlEngineFactory {
    /// Scheme this factory serves (the part before `://`).
    fn scheme(&self) -> &str;

    /// Open an engine for `url` with driver-specific arguments.
    fn open(&self, url: &str, args: &Mapping) -> Result<Arc<dyn SqlDriver>>;
}

/// Shared handle to an opened engine, as stored in frames.
#[derive(Clone)]
pub struct SqlHandle {
    pub name: String,
    pub driver: Arc<dyn SqlDriver>,
}

impl std::fmt::Debug for SqlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlHandle").field("name", &self.name).finish()
    }
}

/// Factories keyed by URL scheme.
#[derive(Default)]
pub struct SqlRegistry {
    factories: Vec<Arc<dyn SqlEngineFactory>>,
}

impl SqlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn SqlEngineFactory>) {
        self.factories.push(factory);
    }

    /// Open an engine for `url`, consulting factories by scheme.
    pub fn open(&self, name: &str, url: &str, args: &Mapping) -> Result<SqlHandle> {
        let scheme = url.split("://").next().unwrap_or_default();
        let factory = self
            .factories
            .iter()
            .find(|f| f.scheme() == scheme)
            .ok_or_else(|| {
                ProteinError::sql(format!("no engine registered for scheme '{scheme}'"))
            })?;
        let driver = factory.open(url, args)?;
        Ok(SqlHandle {
            name: name.to_string(),
            driver,
        })
    }
}

/// Deterministic in-memory engine used in tests and demos. Tables are
/// seeded up front; `query` understands only `SELECT * FROM <table>` and
/// `execute` accepts anything without effect.
pub struct MemoryEngine {
    tables: IndexMap<String, Vec<Mapping>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            tables: IndexMap::new(),
        }
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Mapping>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDriver for MemoryEngine {
    fn execute(&self, _statement: &str) -> Result<()> {
        Ok(())
    }

    fn query(&self, query: &str) -> Result<Vec<Mapping>> {
        let table = query
            .trim()
            .trim_end_matches(';')
            .strip_prefix("SELECT * FROM ")
            .ok_or_else(|| {
                ProteinError::sql(format!("memory engine cannot run query: {query}"))
            })?;
        self.tables
            .get(table.trim())
            .cloned()
            .ok_or_else(|| ProteinError::sql(format!("unknown table '{}'", table.trim())))
    }
}

/// Factory exposing a pre-seeded [`MemoryEngine`] under `memory://` URLs.
pub struct MemoryEngineFactory {
    engine: Arc<MemoryEngine>,
}

impl MemoryEngineFactory {
    pub fn new(engine: MemoryEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl SqlEngineFactory for MemoryEngineFactory {
    fn scheme(&self) -> &str {
        "memory"
    }

    fn open(&self, _url: &str, _args: &Mapping) -> Result<Arc<dyn SqlDriver>> {
        Ok(self.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn row(pairs: &[(&str, Node)]) -> Mapping {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_registry_dispatches_by_scheme() {
        let engine = MemoryEngine::new().with_table(
            "users",
            vec![row(&[("id", Node::Int(1)), ("name", Node::string("joe"))])],
        );
        let mut registry = SqlRegistry::new();
        registry.register(Arc::new(MemoryEngineFactory::new(engine)));

        let handle = registry
            .open("db", "memory://main", &Mapping::new())
            .unwrap();
        let rows = handle.driver.query("SELECT * FROM users").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Node::string("joe")));
    }

    #[test]
    fn test_unknown_scheme_fails() {
        let registry = SqlRegistry::new();
        let err = registry
            .open("db", "postgres://nope", &Mapping::new())
            .unwrap_err();
        assert_eq!(err.label(), "sql");
    }

    #[test]
    fn test_unknown_table_fails() {
        let engine = MemoryEngine::new();
        let err = engine.query("SELECT * FROM ghosts").unwrap_err();
        assert_eq!(err.label(), "sql");
    }
}
