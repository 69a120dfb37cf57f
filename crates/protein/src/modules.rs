//! Module protocol and host builtins.
//!
//! A module populates a [`ModuleEnvironment`] with plain variables, exported
//! functions (usable in expressions and as dotted constructs), and filters.
//! The loader seam keeps the host runtime out of the core: the default
//! implementation resolves modules registered natively by name.

use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use indexmap::IndexMap;

use crate::error::{ProteinError, Result};
use crate::frame::HostFn;
use crate::node::Node;

/// The surface a module sees while it is being loaded.
pub struct ModuleEnvironment {
    /// Directory of the source file that requested the import.
    pub source_dir: Utf8PathBuf,
    variables: IndexMap<String, Node>,
    exports: IndexMap<String, HostFn>,
    filters: IndexMap<String, HostFn>,
}

impl ModuleEnvironment {
    pub fn new(source_dir: Utf8PathBuf) -> Self {
        Self {
            source_dir,
            variables: IndexMap::new(),
            exports: IndexMap::new(),
            filters: IndexMap::new(),
        }
    }

    /// Bind an inert value into the importing frame.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Node) {
        self.variables.insert(name.into(), value);
    }

    /// Export a function: callable from expressions and as `.name`.
    pub fn export(&mut self, name: impl Into<String>, f: HostFn) {
        self.exports.insert(name.into(), f);
    }

    /// Register a template filter.
    pub fn filter(&mut self, name: impl Into<String>, f: HostFn) {
        self.filters.insert(name.into(), f);
    }

    pub fn variables(&self) -> &IndexMap<String, Node> {
        &self.variables
    }

    pub fn exports(&self) -> &IndexMap<String, HostFn> {
        &self.exports
    }

    pub fn filters(&self) -> &IndexMap<String, HostFn> {
        &self.filters
    }
}

/// Resolves module paths and runs their entry points.
pub trait ModuleLoader {
    fn load(&self, path: &str, env: &mut ModuleEnvironment) -> Result<()>;
}

type ModuleInit = Arc<dyn Fn(&mut ModuleEnvironment) -> Result<()> + Send + Sync>;

/// Loader backed by modules registered in-process under their import paths.
#[derive(Default)]
pub struct NativeModuleRegistry {
    modules: HashMap<String, ModuleInit>,
}

impl NativeModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: impl Into<String>,
        init: impl Fn(&mut ModuleEnvironment) -> Result<()> + Send + Sync + 'static,
    ) {
        self.modules.insert(path.into(), Arc::new(init));
    }
}

impl ModuleLoader for NativeModuleRegistry {
    fn load(&self, path: &str, env: &mut ModuleEnvironment) -> Result<()> {
        let init = self.modules.get(path).ok_or_else(|| {
            ProteinError::io(format!("module '{path}' is not registered"))
        })?;
        init(env)
    }
}

/// Host bindings placed in the bottom frame of every stack.
pub fn builtin_frame() -> crate::frame::Frame {
    let mut frame = crate::frame::Frame::new();

    let get_env: HostFn = Arc::new(|args, _kwargs| {
        let name = args
            .first()
            .and_then(Node::as_str)
            .ok_or_else(|| ProteinError::arg("get_env expects a variable name"))?;
        match std::env::var(name) {
            Ok(value) => Ok(Node::string(value)),
            Err(_) => Ok(args.get(1).cloned().unwrap_or(Node::Null)),
        }
    });
    frame.insert("get_env".into(), crate::frame::Value::Callable(get_env.clone()));
    frame.insert("getenv".into(), crate::frame::Value::Callable(get_env));

    // Debugging hook: fail evaluation with a message when a condition does
    // not hold, render as empty text otherwise.
    let assert_fn: HostFn = Arc::new(|args, _kwargs| {
        let condition = args.first().cloned().unwrap_or(Node::Null);
        if condition.is_truthy() {
            Ok(Node::string(""))
        } else {
            let message = args
                .get(1)
                .and_then(Node::as_str)
                .unwrap_or("assertion failed");
            Err(ProteinError::expr(message))
        }
    });
    frame.insert("assert".into(), crate::frame::Value::Callable(assert_fn));

    // Markdown rendering, GitHub flavor; raw HTML is escaped unless
    // allow_html is passed.
    let to_html_fn: HostFn = Arc::new(|args, kwargs| {
        let text = args
            .first()
            .and_then(Node::as_str)
            .ok_or_else(|| ProteinError::type_error("to_html expects a string"))?;
        let allow_html = match args.get(1) {
            Some(Node::Bool(b)) => *b,
            Some(other) => {
                return Err(ProteinError::type_error(format!(
                    "allow_html must be a bool, found {}",
                    other.kind()
                )))
            }
            None => kwargs
                .iter()
                .find(|(name, _)| name == "allow_html")
                .map(|(_, value)| value.is_truthy())
                .unwrap_or(false),
        };
        Ok(Node::string(crate::markdown::to_html(text, allow_html)))
    });
    frame.insert("to_html".into(), crate::frame::Value::Callable(to_html_fn));

    frame
}
