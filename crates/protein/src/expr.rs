//! Expression evaluator shim.
//!
//! Wraps the template engine behind the narrow interface the walker needs:
//! take a string leaf and a merged snapshot of the frame stack, render, and
//! recover composite values from the printed result through literal parsing.
//! Literal-tagged strings never reach the engine; `{% raw %}` remains the
//! engine-level escape for partial suppression.

use std::collections::BTreeMap;

use minijinja::value::{Kwargs, Rest, Value as TemplateValue};
use minijinja::{Environment, Error as TemplateError, ErrorKind, UndefinedBehavior};

use crate::error::{ProteinError, Result};
use crate::frame::{Frame, HostFn, Value};
use crate::literal::parse_literal;
use crate::node::{Node, LITERAL_PREFIX};

/// The wrapped engine plus the filter registry layered onto it.
pub struct ExprEngine {
    env: Environment<'static>,
}

impl ExprEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("quote", quote_filter);
        env.add_filter("dequote", dequote_filter);
        env.add_filter("to_html", to_html_filter);
        Self { env }
    }

    /// Register a host filter under `name`. The filter receives the piped
    /// value followed by any extra arguments.
    pub fn add_filter(&mut self, name: &str, f: HostFn) {
        self.env.add_filter(
            name.to_string(),
            move |value: TemplateValue,
                  args: Rest<TemplateValue>|
                  -> std::result::Result<TemplateValue, TemplateError> {
                let mut positional = vec![template_value_to_node(&value)?];
                for arg in args.iter() {
                    positional.push(template_value_to_node(arg)?);
                }
                let out = f(&positional, &[]).map_err(into_template_error)?;
                Ok(TemplateValue::from_serialize(&out))
            },
        );
    }

    /// Evaluate a string leaf against a snapshot of the visible bindings.
    ///
    /// Literal-flagged strings must be filtered out by the caller; this
    /// entry point always consults the engine.
    pub fn evaluate(&self, raw: &str, snapshot: &Frame) -> Result<Node> {
        let ctx = context_from(snapshot);
        let rendered = self
            .env
            .render_str(raw, ctx)
            .map_err(|err| map_template_error(err, raw))?;
        match parse_literal(&rendered)? {
            Some(node) => Ok(node),
            // A rendered literal sentinel (e.g. from the `quote` filter)
            // turns the result into a literal-tagged string.
            None => Ok(Node::from_scalar_text(&rendered)),
        }
    }

}

impl Default for ExprEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the template context from a merged snapshot. Nodes become plain
/// values, host callables become callable values; closures and engine
/// handles are not visible to expressions.
fn context_from(snapshot: &Frame) -> BTreeMap<String, TemplateValue> {
    let mut ctx = BTreeMap::new();
    for (name, value) in snapshot {
        match value {
            Value::Node(node) => {
                ctx.insert(name.clone(), TemplateValue::from_serialize(node));
            }
            Value::Callable(f) => {
                ctx.insert(name.clone(), callable_value(f.clone()));
            }
            Value::Filter(_) | Value::Closure(_) | Value::Sql(_) => {}
        }
    }
    ctx
}

/// Wrap a host function as a template-callable value.
fn callable_value(f: HostFn) -> TemplateValue {
    TemplateValue::from_function(
        move |args: Rest<TemplateValue>,
              kwargs: Kwargs|
              -> std::result::Result<TemplateValue, TemplateError> {
            let mut positional = Vec::with_capacity(args.len());
            for arg in args.iter() {
                positional.push(template_value_to_node(arg)?);
            }
            let mut named = Vec::new();
            for key in kwargs.args() {
                let value: TemplateValue = kwargs.get(key)?;
                named.push((key.to_string(), template_value_to_node(&value)?));
            }
            let out = f(&positional, &named).map_err(into_template_error)?;
            Ok(TemplateValue::from_serialize(&out))
        },
    )
}

fn template_value_to_node(
    value: &TemplateValue,
) -> std::result::Result<Node, TemplateError> {
    let json = serde_json::to_value(value).map_err(|err| {
        TemplateError::new(
            ErrorKind::InvalidOperation,
            format!("value cannot cross the host boundary: {err}"),
        )
    })?;
    crate::node::from_json(json).map_err(into_template_error)
}

fn into_template_error(err: ProteinError) -> TemplateError {
    TemplateError::new(ErrorKind::InvalidOperation, err.to_string())
}

fn map_template_error(err: TemplateError, raw: &str) -> ProteinError {
    let line = err.line().map(|l| l as u64);
    if err.kind() == ErrorKind::UndefinedError {
        ProteinError::Undefined {
            name: format!("{err} (in expression {raw:?})"),
            line,
        }
    } else {
        ProteinError::Expr {
            message: format!("{err} (in expression {raw:?})"),
            line,
        }
    }
}

/// `quote`: idempotently mark a string as literal.
fn quote_filter(value: String) -> String {
    if value.starts_with(LITERAL_PREFIX) {
        value
    } else {
        format!("{LITERAL_PREFIX}{value}")
    }
}

/// `to_html`: render Markdown, escaping raw HTML unless told otherwise.
fn to_html_filter(value: String, allow_html: Option<bool>) -> String {
    crate::markdown::to_html(&value, allow_html.unwrap_or(false))
}

/// `dequote`: strip the sentinel and parse the remaining text as a value
/// literal, keeping it a string when it is not one.
fn dequote_filter(value: String) -> std::result::Result<TemplateValue, TemplateError> {
    let inner = value.strip_prefix(LITERAL_PREFIX).unwrap_or(&value);
    match parse_literal(inner).map_err(into_template_error)? {
        Some(node) => Ok(TemplateValue::from_serialize(&node)),
        None => Ok(TemplateValue::from(inner.to_string())),
    }
}
