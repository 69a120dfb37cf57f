//! The tree walker and construct dispatcher.
//!
//! The interpreter descends a parsed tree, evaluates string leaves through
//! the expression shim, executes dotted constructs, and merges their
//! results back into the surrounding node. Scope frames are pushed and
//! popped around `.local` blocks, loop iterations, and closure calls; the
//! stack height is identical before and after a render.

use std::io::Write;
use std::rc::Rc;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::buffers::BufferRegistry;
use crate::constructs::{bind_args, Construct};
use crate::emit;
use crate::error::{ProteinError, Result};
use crate::expr::ExprEngine;
use crate::frame::{Closure, Frame, FrameStack, HostFn, Value};
use crate::load;
use crate::modules::{builtin_frame, ModuleEnvironment, ModuleLoader, NativeModuleRegistry};
use crate::node::{collapse, collapse_foreach, insert_unique, Mapping, Node};
use crate::sql::{SqlEngineFactory, SqlRegistry};

/// The preprocessor. One instance renders one document at a time; buffers
/// and SQL engines live for the lifetime of the instance.
pub struct Interpreter {
    stack: FrameStack,
    expr: ExprEngine,
    buffers: BufferRegistry,
    sql: SqlRegistry,
    loader: Box<dyn ModuleLoader>,
    source_dir: Utf8PathBuf,
    diagnostics: Box<dyn Write>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            stack: FrameStack::new(builtin_frame()),
            expr: ExprEngine::new(),
            buffers: BufferRegistry::new(),
            sql: SqlRegistry::new(),
            loader: Box::new(NativeModuleRegistry::new()),
            source_dir: Utf8PathBuf::from("."),
            diagnostics: Box::new(std::io::stderr()),
        }
    }

    /// Directory that `.load`, `.export`, and buffer saves resolve against.
    pub fn set_source_dir(&mut self, dir: impl Into<Utf8PathBuf>) {
        self.source_dir = dir.into();
    }

    pub fn set_module_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = loader;
    }

    pub fn register_sql_factory(&mut self, factory: Arc<dyn SqlEngineFactory>) {
        self.sql.register(factory);
    }

    /// Redirect `.print` output (defaults to stderr).
    pub fn set_diagnostics(&mut self, sink: Box<dyn Write>) {
        self.diagnostics = sink;
    }

    /// Bind a value in the initial frame before rendering.
    pub fn define(&mut self, name: impl Into<String>, node: Node) {
        self.stack.set_top(name.into(), Value::Node(node));
    }

    /// Render a parsed tree into a pure data tree.
    pub fn render(&mut self, tree: &Node) -> Result<Node> {
        let height = self.stack.height();
        let result = self.walk(tree);
        debug_assert_eq!(self.stack.height(), height, "unbalanced scope frames");
        result
    }

    /// Parse and render YAML source text.
    pub fn render_str(&mut self, source: &str) -> Result<Node> {
        let tree = crate::node::parse_yaml(source)?;
        self.render(&tree)
    }

    /// Load, parse, and render a file; the file's directory becomes the
    /// source directory.
    pub fn render_file(&mut self, path: &Utf8Path) -> Result<Node> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ProteinError::io(format!("cannot read '{path}': {err}")))?;
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                self.source_dir = parent.to_owned();
            }
        }
        self.render_str(&content)
    }

    /// Serialize a rendered tree as YAML.
    pub fn to_yaml_string(node: &Node) -> Result<String> {
        emit::serialize(&node.normalized(), emit::Format::Yaml, &Mapping::new())
    }

    // === Walking ===

    fn walk(&mut self, node: &Node) -> Result<Node> {
        match node {
            Node::String {
                text,
                literal: false,
            } => self.eval_expr(text),
            Node::Sequence(items) => self.walk_sequence(items),
            Node::Mapping(map) => self.walk_mapping(map),
            other => Ok(other.clone()),
        }
    }

    fn eval_expr(&self, text: &str) -> Result<Node> {
        let snapshot = self.stack.merged_snapshot();
        self.expr.evaluate(text, &snapshot)
    }

    fn walk_sequence(&mut self, items: &[Node]) -> Result<Node> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let was_mapping = matches!(item, Node::Mapping(_));
            let walked = self.walk(item)?;
            // Construct-only mappings (.define, .print, ...) vanish.
            if walked.is_null() && was_mapping {
                continue;
            }
            out.push(walked);
        }
        Ok(Node::Sequence(out))
    }

    fn walk_mapping(&mut self, map: &Mapping) -> Result<Node> {
        if map.is_empty() {
            return Ok(Node::Mapping(Mapping::new()));
        }

        let scoped = if let Some(defs) = map.get(".local") {
            let frame = self.scope_frame(defs)?;
            self.stack.push(frame);
            true
        } else {
            false
        };

        let result = self.walk_mapping_entries(map);
        if scoped {
            self.stack.pop();
        }
        result
    }

    fn walk_mapping_entries(&mut self, map: &Mapping) -> Result<Node> {
        enum Entry {
            Plain(String, Node),
            FromConstruct(Node),
        }

        let visible: Vec<(&String, &Node)> =
            map.iter().filter(|(key, _)| *key != ".local").collect();
        if visible.is_empty() {
            return Ok(Node::Null);
        }

        let sole_construct = visible.len() == 1 && visible[0].0.starts_with('.');

        let mut results = Vec::with_capacity(visible.len());
        let mut saw_construct = false;
        for (key, value) in visible {
            if key.starts_with('.') {
                saw_construct = true;
                let produced = self.dispatch(key, value)?;
                if sole_construct {
                    return Ok(produced);
                }
                results.push(Entry::FromConstruct(produced));
            } else {
                let rendered_key = self.render_key(key)?;
                results.push(Entry::Plain(rendered_key, self.walk(value)?));
            }
        }

        let mut out = Mapping::new();
        let mut had_plain = false;
        for entry in results {
            match entry {
                Entry::Plain(key, value) => {
                    had_plain = true;
                    insert_unique(&mut out, key, value)?;
                }
                Entry::FromConstruct(Node::Null) => {}
                Entry::FromConstruct(Node::Mapping(produced)) => {
                    for (key, value) in produced {
                        insert_unique(&mut out, key, value)?;
                    }
                }
                Entry::FromConstruct(other) => {
                    return Err(ProteinError::type_error(format!(
                        "a construct with sibling keys must produce a mapping, found {}",
                        other.kind()
                    )));
                }
            }
        }

        if out.is_empty() && saw_construct && !had_plain {
            return Ok(Node::Null);
        }
        Ok(Node::Mapping(out))
    }

    /// Plain mapping keys may themselves carry template expressions
    /// (`"{{ u.name }}":`); they must render to scalar text.
    fn render_key(&self, key: &str) -> Result<String> {
        if !key.contains("{{") && !key.contains("{%") {
            return Ok(key.to_string());
        }
        let rendered = self.eval_expr(key)?;
        rendered.scalar_text().ok_or_else(|| {
            ProteinError::type_error(format!(
                "mapping key '{key}' must render to a scalar, found {}",
                rendered.kind()
            ))
        })
    }

    /// Evaluate a `.local` definitions block into a fresh frame. Values are
    /// resolved against the enclosing scope, then the frame is pushed.
    fn scope_frame(&mut self, defs: &Node) -> Result<Frame> {
        let map = defs.as_mapping().ok_or_else(|| {
            ProteinError::type_error(format!(
                "a definitions block must be a mapping, found {}",
                defs.kind()
            ))
        })?;
        let mut frame = Frame::new();
        for (name, value) in map {
            frame.insert(name.clone(), Value::Node(self.walk(value)?));
        }
        Ok(frame)
    }

    // === Construct dispatch ===

    fn dispatch(&mut self, key: &str, value: &Node) -> Result<Node> {
        tracing::debug!(construct = key, "dispatching");
        match Construct::from_key(key) {
            Some(construct) => self.handle(construct, value),
            None => {
                let name = &key[1..];
                let callable = match self.stack.resolve(name) {
                    Some(Value::Callable(f)) => Some(f.clone()),
                    _ => None,
                };
                match callable {
                    Some(f) => self.call_host(&f, value),
                    None => Err(ProteinError::unknown_construct(key)),
                }
            }
        }
    }

    fn handle(&mut self, construct: Construct, value: &Node) -> Result<Node> {
        match construct {
            Construct::Define => self.handle_define(value),
            // Consumed by the mapping walker; a bare occurrence scopes nothing.
            Construct::Local => Ok(Node::Null),
            Construct::Do => self.handle_do(value),
            Construct::If => self.handle_if(value),
            Construct::Switch => self.handle_switch(value),
            Construct::Foreach => self.handle_foreach(value),
            Construct::Function => self.handle_function(value),
            Construct::Call => self.handle_call(value),
            Construct::ImportModule => self.handle_import_module(value),
            Construct::Load => self.handle_load(value),
            Construct::Export => self.handle_export(value),
            Construct::Print => self.handle_print(value),
            Construct::Exit => self.handle_exit(value),
            Construct::DefSql => self.handle_def_sql(value),
            Construct::ExecSql => self.handle_exec_sql(value),
            Construct::LoadSql => self.handle_load_sql(value),
            Construct::OpenBuffer => self.handle_open_buffer(value),
            Construct::WriteBuffer => self.handle_write_buffer(value),
            Construct::SaveBuffer => self.handle_save_buffer(value),
            Construct::Write => self.handle_write(value),
        }
    }

    fn handle_define(&mut self, value: &Node) -> Result<Node> {
        let map = value.as_mapping().ok_or_else(|| {
            ProteinError::type_error(format!(
                ".define expects a mapping, found {}",
                value.kind()
            ))
        })?;
        for (name, v) in map {
            let walked = self.walk(v)?;
            self.stack.set_top(name.clone(), Value::Node(walked));
        }
        Ok(Node::Null)
    }

    fn handle_do(&mut self, value: &Node) -> Result<Node> {
        match value {
            Node::Sequence(items) => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let walked = self.walk(item)?;
                    if !walked.is_null() {
                        results.push(walked);
                    }
                }
                collapse(results)
            }
            Node::Mapping(_) => self.walk(value),
            other => Err(ProteinError::type_error(format!(
                ".do expects a sequence or a mapping, found {}",
                other.kind()
            ))),
        }
    }

    fn handle_if(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".if")?;
        validate_keys(map, &[".cond", ".then", ".else"], ".if")?;
        let cond = require_key(map, ".cond", ".if")?;
        let truth = self.walk(cond)?.is_truthy();
        let branch = if truth {
            map.get(".then")
        } else {
            map.get(".else")
        };
        match branch {
            Some(node) => self.walk(node),
            None => Ok(Node::Null),
        }
    }

    fn handle_switch(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".switch")?;
        validate_keys(map, &[".expr", ".cases", ".default"], ".switch")?;
        let expr = require_key(map, ".expr", ".switch")?;
        let key = self.walk_to_text(expr)?;
        let cases = require_key(map, ".cases", ".switch")?
            .as_mapping()
            .ok_or_else(|| ProteinError::type_error(".cases must be a mapping"))?;
        let chosen = cases.get(key.as_str()).or_else(|| map.get(".default"));
        match chosen {
            Some(node) => self.walk(node),
            None => Ok(Node::Null),
        }
    }

    fn handle_foreach(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".foreach")?;
        validate_keys(map, &[".values", ".do", ".collect_mappings"], ".foreach")?;

        let values = require_key(map, ".values", ".foreach")?
            .as_sequence()
            .filter(|items| items.len() == 2)
            .ok_or_else(|| {
                ProteinError::arg(".values must be a [name, iterable] pair")
            })?;
        let name = values[0].as_str().ok_or_else(|| {
            ProteinError::type_error(".values binding name must be a string")
        })?;
        let iterable = self.resolve_iterable(&values[1])?;
        let body = require_key(map, ".do", ".foreach")?;

        let collect_mappings = match map.get(".collect_mappings") {
            None => true,
            Some(node) => match self.walk(node)? {
                Node::Bool(b) => b,
                other => {
                    return Err(ProteinError::type_error(format!(
                        ".collect_mappings must be a bool, found {}",
                        other.kind()
                    )))
                }
            },
        };

        let items: Vec<Node> = match iterable {
            Node::Sequence(items) => items,
            Node::Mapping(map) => map
                .into_iter()
                .map(|(k, v)| Node::Sequence(vec![Node::string(k), v]))
                .collect(),
            other => {
                return Err(ProteinError::type_error(format!(
                    ".foreach iterable must be a sequence or a mapping, found {}",
                    other.kind()
                )))
            }
        };

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let mut frame = Frame::new();
            frame.insert(name.to_string(), Value::Node(item));
            self.stack.push(frame);
            let walked = self.handle_do(body);
            self.stack.pop();
            let walked = walked?;
            if !walked.is_null() {
                results.push(walked);
            }
        }
        Ok(collapse_foreach(results, collect_mappings))
    }

    /// The iterable of `.values` may be a template-expression string or a
    /// bare identifier treated as one.
    fn resolve_iterable(&mut self, node: &Node) -> Result<Node> {
        match node {
            Node::String {
                text,
                literal: false,
            } => {
                if text.contains("{{") || text.contains("{%") {
                    self.eval_expr(text)
                } else if is_identifier(text) {
                    self.eval_expr(&format!("{{{{ {text} }}}}"))
                } else {
                    self.eval_expr(text)
                }
            }
            other => self.walk(other),
        }
    }

    fn handle_function(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".function")?;
        validate_keys(map, &[".name", ".args", ".do"], ".function")?;
        let name = require_key(map, ".name", ".function")?
            .as_str()
            .ok_or_else(|| ProteinError::type_error(".name must be a string"))?
            .to_string();
        let params = match map.get(".args") {
            None => Vec::new(),
            Some(node) => node
                .as_sequence()
                .ok_or_else(|| ProteinError::arg(".args must be a sequence of names"))?
                .iter()
                .map(|p| {
                    p.as_str().map(str::to_string).ok_or_else(|| {
                        ProteinError::type_error("parameter names must be strings")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };
        let body = require_key(map, ".do", ".function")?.clone();
        let captured = self.stack.merged_snapshot();
        let closure = Closure {
            name: name.clone(),
            params,
            body,
            captured,
        };
        self.stack.set_top(name, Value::Closure(Rc::new(closure)));
        Ok(Node::Null)
    }

    fn handle_call(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".call")?;
        validate_keys(map, &[".name", ".args"], ".call")?;
        let name = require_key(map, ".name", ".call")?
            .as_str()
            .ok_or_else(|| ProteinError::type_error(".name must be a string"))?
            .to_string();

        let args = match map.get(".args") {
            None => Node::Null,
            Some(node) => self.walk(node)?,
        };

        let resolved = self.stack.require(&name)?.clone();
        match resolved {
            Value::Closure(closure) => {
                let bound = bind_args(&closure.params, &args).map_err(|err| {
                    ProteinError::arg(format!("calling '{name}': {err}"))
                })?;

                // The captured environment is the base scope of the call;
                // the caller's frames are not visible inside the body.
                let mut frame = closure.captured.clone();
                for (param, value) in bound {
                    frame.insert(param, Value::Node(value));
                }
                let saved = std::mem::replace(&mut self.stack, FrameStack::isolated(frame));
                let result = self.handle_do(&closure.body);
                self.stack = saved;
                result
            }
            Value::Callable(f) => self.invoke_host(&f, &args),
            other => Err(ProteinError::type_error(format!(
                "'{name}' is not callable (found {})",
                other.kind()
            ))),
        }
    }

    /// A module export used directly as a construct: `.name: [args]` or
    /// `.name: {name: value}`.
    fn call_host(&mut self, f: &HostFn, value: &Node) -> Result<Node> {
        let args = self.walk(value)?;
        self.invoke_host(f, &args)
    }

    fn invoke_host(&mut self, f: &HostFn, args: &Node) -> Result<Node> {
        let result = match args {
            Node::Null => f(&[], &[])?,
            Node::Sequence(items) => f(items, &[])?,
            Node::Mapping(map) => {
                let named: Vec<(String, Node)> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                f(&[], &named)?
            }
            scalar => f(std::slice::from_ref(scalar), &[])?,
        };
        Ok(result)
    }

    fn handle_import_module(&mut self, value: &Node) -> Result<Node> {
        let path = self.walk_to_text(value)?;
        let mut env = ModuleEnvironment::new(self.source_dir.clone());
        self.loader.load(&path, &mut env)?;

        for (name, node) in env.variables() {
            self.stack.set_top(name.clone(), Value::Node(node.clone()));
        }
        for (name, f) in env.exports() {
            self.stack.set_top(name.clone(), Value::Callable(f.clone()));
        }
        for (name, f) in env.filters() {
            self.expr.add_filter(name, f.clone());
            self.stack.set_top(name.clone(), Value::Filter(f.clone()));
        }
        tracing::info!(module = %path, "imported module");
        Ok(Node::Null)
    }

    fn handle_load(&mut self, value: &Node) -> Result<Node> {
        let (filename, explicit_format, args) = match value {
            Node::Mapping(map) => {
                validate_keys(map, &[".filename", ".format", ".args"], ".load")?;
                let filename = self.walk_to_text(require_key(map, ".filename", ".load")?)?;
                let format = match map.get(".format") {
                    Some(node) => Some(self.walk_to_text(node)?),
                    None => None,
                };
                let args = match map.get(".args") {
                    None => Mapping::new(),
                    Some(node) => match self.walk(node)? {
                        Node::Mapping(args) => args,
                        other => {
                            return Err(ProteinError::arg(format!(
                                ".args must be a mapping, found {}",
                                other.kind()
                            )))
                        }
                    },
                };
                (filename, format, args)
            }
            other => (self.walk_to_text(other)?, None, Mapping::new()),
        };

        let path = self.source_dir.join(&filename);
        let (tree, format) = load::read_file(&path, explicit_format.as_deref())?;
        let options = load::parse_args(format, &args)?;
        tracing::info!(path = %path, format = format.name(), "loaded file");
        if format.is_preprocessed() && options.preprocess {
            self.walk(&tree)
        } else {
            Ok(tree)
        }
    }

    fn handle_export(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".export")?;
        validate_keys(
            map,
            &[".filename", ".format", ".args", ".comment", ".do"],
            ".export",
        )?;
        let filename = self.walk_to_text(require_key(map, ".filename", ".export")?)?;
        let path = self.source_dir.join(&filename);

        let format = match map.get(".format") {
            Some(node) => emit::Format::from_name(&self.walk_to_text(node)?)?,
            None => emit::Format::from_extension(&path).ok_or_else(|| {
                ProteinError::arg(format!(
                    "cannot infer an export format for '{filename}'; pass .format"
                ))
            })?,
        };

        let args = match map.get(".args") {
            None => Mapping::new(),
            Some(node) => match self.walk(node)? {
                Node::Mapping(args) => args,
                other => {
                    return Err(ProteinError::arg(format!(
                        ".args must be a mapping, found {}",
                        other.kind()
                    )))
                }
            },
        };

        let content = self.handle_do(require_key(map, ".do", ".export")?)?;
        let mut serialized = emit::serialize(&content.normalized(), format, &args)?;

        if let Some(comment) = map.get(".comment") {
            let comment = self.walk_to_text(comment)?;
            serialized = emit::inject_comment(&serialized, &comment, format)?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serialized)
            .map_err(|err| ProteinError::io(format!("cannot write '{path}': {err}")))?;
        tracing::info!(path = %path, format = format.name(), "exported");
        Ok(Node::Null)
    }

    fn handle_print(&mut self, value: &Node) -> Result<Node> {
        let walked = self.walk(value)?;
        let line = match walked.scalar_text() {
            Some(text) => text,
            None => Self::to_yaml_string(&walked)?.trim_end().to_string(),
        };
        writeln!(self.diagnostics, "{line}")
            .map_err(|err| ProteinError::io(format!("diagnostics write failed: {err}")))?;
        Ok(Node::Null)
    }

    fn handle_exit(&mut self, value: &Node) -> Result<Node> {
        let (code, message) = match value {
            Node::Mapping(map) => {
                validate_keys(map, &[".code", ".message"], ".exit")?;
                let code = match map.get(".code") {
                    None => 0,
                    Some(node) => match self.walk(node)? {
                        Node::Int(i) => i as i32,
                        other => {
                            return Err(ProteinError::type_error(format!(
                                ".code must be an int, found {}",
                                other.kind()
                            )))
                        }
                    },
                };
                let message = match map.get(".message") {
                    None => String::new(),
                    Some(node) => self.walk_to_text(node)?,
                };
                (code, message)
            }
            other => (0, self.walk_to_text(other)?),
        };
        Err(ProteinError::Exit { code, message })
    }

    // === SQL ===

    fn handle_def_sql(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".def_sql")?;
        validate_keys(map, &[".name", ".url", ".args"], ".def_sql")?;
        let name = self.walk_to_text(require_key(map, ".name", ".def_sql")?)?;
        let url = self.walk_to_text(require_key(map, ".url", ".def_sql")?)?;
        let args = match map.get(".args") {
            None => Mapping::new(),
            Some(node) => match self.walk(node)? {
                Node::Mapping(args) => args,
                other => {
                    return Err(ProteinError::arg(format!(
                        ".args must be a mapping, found {}",
                        other.kind()
                    )))
                }
            },
        };
        let handle = self.sql.open(&name, &url, &args)?;
        self.stack.set_top(name, Value::Sql(handle));
        Ok(Node::Null)
    }

    fn resolve_engine(&mut self, map: &Mapping, construct: &str) -> Result<crate::sql::SqlHandle> {
        let name = self.walk_to_text(require_key(map, ".engine", construct)?)?;
        match self.stack.require(&name)? {
            Value::Sql(handle) => Ok(handle.clone()),
            other => Err(ProteinError::type_error(format!(
                "'{name}' is not a SQL engine (found {})",
                other.kind()
            ))),
        }
    }

    fn handle_exec_sql(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".exec_sql")?;
        validate_keys(map, &[".engine", ".statement"], ".exec_sql")?;
        let engine = self.resolve_engine(map, ".exec_sql")?;
        let statement = self.walk_to_text(require_key(map, ".statement", ".exec_sql")?)?;
        engine.driver.execute(&statement)?;
        Ok(Node::Null)
    }

    fn handle_load_sql(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".load_sql")?;
        validate_keys(map, &[".engine", ".query"], ".load_sql")?;
        let engine = self.resolve_engine(map, ".load_sql")?;
        let query = self.walk_to_text(require_key(map, ".query", ".load_sql")?)?;
        let rows = engine.driver.query(&query)?;
        Ok(Node::Sequence(rows.into_iter().map(Node::Mapping).collect()))
    }

    // === Buffers ===

    fn handle_open_buffer(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".open_buffer")?;
        validate_keys(map, &[".name", ".language", ".init", ".indent"], ".open_buffer")?;
        let name = self.walk_to_text(require_key(map, ".name", ".open_buffer")?)?;
        let language = match map.get(".language") {
            Some(node) => Some(self.walk_to_text(node)?),
            None => None,
        };
        let indent_width = match map.get(".indent") {
            None => 4,
            Some(node) => match self.walk(node)? {
                Node::Int(i) if i > 0 => i as usize,
                other => {
                    return Err(ProteinError::type_error(format!(
                        ".indent must be a positive int, found {}",
                        other.kind()
                    )))
                }
            },
        };
        let init = match map.get(".init") {
            Some(node) => Some(self.buffer_text(node)?),
            None => None,
        };
        let buffer = self.buffers.open(&name, language, indent_width)?;
        if let Some(init) = init {
            buffer.set_text(init);
        }
        Ok(Node::Null)
    }

    fn handle_write_buffer(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".write_buffer")?;
        validate_keys(map, &[".name", ".text", ".indent"], ".write_buffer")?;
        let name = self.walk_to_text(require_key(map, ".name", ".write_buffer")?)?;
        let text = match map.get(".text") {
            Some(node) => self.buffer_text(node)?,
            None => String::new(),
        };
        let indent = match map.get(".indent") {
            None => 0,
            Some(node) => match self.walk(node)? {
                Node::Int(i) => i,
                other => {
                    return Err(ProteinError::type_error(format!(
                        ".indent must be an int, found {}",
                        other.kind()
                    )))
                }
            },
        };
        self.buffers.get_mut(&name)?.append(&text, indent);
        Ok(Node::Null)
    }

    fn handle_save_buffer(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".save_buffer")?;
        validate_keys(map, &[".name", ".filename"], ".save_buffer")?;
        let name = self.walk_to_text(require_key(map, ".name", ".save_buffer")?)?;
        let filename = self.walk_to_text(require_key(map, ".filename", ".save_buffer")?)?;
        let path = self.source_dir.join(filename);
        self.buffers.save(&name, &path)?;
        Ok(Node::Null)
    }

    fn handle_write(&mut self, value: &Node) -> Result<Node> {
        let map = block(value, ".write")?;
        validate_keys(map, &[".filename", ".text"], ".write")?;
        let filename = self.walk_to_text(require_key(map, ".filename", ".write")?)?;
        let text = self.buffer_text(require_key(map, ".text", ".write")?)?;
        let path = self.source_dir.join(filename);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, text)
            .map_err(|err| ProteinError::io(format!("cannot write '{path}': {err}")))?;
        Ok(Node::Null)
    }

    // === Helpers ===

    /// Walk a node and require scalar text from the result.
    fn walk_to_text(&mut self, node: &Node) -> Result<String> {
        let walked = self.walk(node)?;
        walked.scalar_text().ok_or_else(|| {
            ProteinError::type_error(format!("expected scalar text, found {}", walked.kind()))
        })
    }

    /// Buffer text rule: a literal-tagged string is taken verbatim,
    /// anything else is walked and rendered as text.
    fn buffer_text(&mut self, node: &Node) -> Result<String> {
        match node {
            Node::String {
                text,
                literal: true,
            } => Ok(text.clone()),
            other => self.walk_to_text(other),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn block<'a>(value: &'a Node, construct: &str) -> Result<&'a Mapping> {
    value.as_mapping().ok_or_else(|| {
        ProteinError::type_error(format!(
            "{construct} expects a mapping block, found {}",
            value.kind()
        ))
    })
}

fn require_key<'a>(map: &'a Mapping, key: &str, construct: &str) -> Result<&'a Node> {
    map.get(key)
        .ok_or_else(|| ProteinError::arg(format!("{construct} requires {key}")))
}

fn validate_keys(map: &Mapping, allowed: &[&str], construct: &str) -> Result<()> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ProteinError::arg(format!(
                "{construct} does not accept '{key}'"
            )));
        }
    }
    Ok(())
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
