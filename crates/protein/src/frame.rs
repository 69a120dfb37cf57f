//! Frames and the scope stack.
//!
//! Name resolution is dynamic: each lookup walks the live stack top-down.
//! Closures escape this by carrying their own merged snapshot, taken at
//! definition time.

use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{ProteinError, Result};
use crate::node::Node;
use crate::sql::SqlHandle;

/// A host function: invocable from expressions, and as a dotted construct
/// when bound under a frame name. Shared by reference.
pub type HostFn =
    Arc<dyn Fn(&[Node], &[(String, Node)]) -> Result<Node> + Send + Sync>;

/// A value bound in a frame: a data node, or one of the host-provided
/// callables the data model extends it with.
#[derive(Clone)]
pub enum Value {
    Node(Node),
    /// Function from a loaded module; usable in expressions and as a construct.
    Callable(HostFn),
    /// Function usable only as a template filter.
    Filter(HostFn),
    /// User-defined function created by `.function`.
    Closure(Rc<Closure>),
    /// Handle to a registered database engine.
    Sql(SqlHandle),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Node(node) => node.kind(),
            Self::Callable(_) => "callable",
            Self::Filter(_) => "filter",
            Self::Closure(_) => "function",
            Self::Sql(_) => "sql engine",
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(node) => node.fmt(f),
            other => f.write_str(other.kind()),
        }
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

/// A user-defined function: parameter list, unevaluated body, and a shallow
/// snapshot of every binding visible when `.function` ran.
pub struct Closure {
    pub name: String,
    pub params: Vec<String>,
    pub body: Node,
    pub captured: Frame,
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// One level of the scope stack.
pub type Frame = IndexMap<String, Value>;

/// A non-empty stack of frames. The bottom frame holds the builtins, the
/// next one up is the initial frame mutated by `--set` overrides and module
/// imports; scoped constructs push and pop above that.
#[derive(Debug)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    /// Stack with a builtins frame and an empty initial frame on top.
    pub fn new(builtins: Frame) -> Self {
        Self {
            frames: vec![builtins, Frame::new()],
        }
    }

    /// Single-frame stack used for closure calls: the captured environment
    /// is the base scope, and caller frames are not visible.
    pub fn isolated(base: Frame) -> Self {
        Self { frames: vec![base] }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn height(&self) -> usize {
        self.frames.len()
    }

    /// Search top-down, returning the first binding for `name`.
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Resolve or fail with an undefined-name error.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.resolve(name)
            .ok_or_else(|| ProteinError::undefined(name))
    }

    /// Overwrite (or insert) a binding in the top frame.
    pub fn set_top(&mut self, name: impl Into<String>, value: Value) {
        self.frames
            .last_mut()
            .expect("frame stack is never empty")
            .insert(name.into(), value);
    }

    /// Flat view built by overlaying each frame bottom to top. Node values
    /// are cloned; callables, closures, and engine handles stay shared.
    pub fn merged_snapshot(&self) -> Frame {
        let mut merged = Frame::new();
        for frame in &self.frames {
            for (name, value) in frame {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_top_frame() {
        let mut stack = FrameStack::new(Frame::new());
        stack.set_top("x", Node::Int(1).into());
        let mut inner = Frame::new();
        inner.insert("x".into(), Node::Int(2).into());
        stack.push(inner);
        assert_eq!(stack.resolve("x").unwrap().as_node(), Some(&Node::Int(2)));
        stack.pop();
        assert_eq!(stack.resolve("x").unwrap().as_node(), Some(&Node::Int(1)));
    }

    #[test]
    fn test_require_unknown_name_fails() {
        let stack = FrameStack::new(Frame::new());
        let err = stack.require("missing").unwrap_err();
        assert_eq!(err.label(), "undefined");
    }

    #[test]
    fn test_merged_snapshot_overlays_bottom_to_top() {
        let mut builtins = Frame::new();
        builtins.insert("a".into(), Node::Int(1).into());
        builtins.insert("b".into(), Node::Int(1).into());
        let mut stack = FrameStack::new(builtins);
        stack.set_top("b", Node::Int(2).into());

        let snapshot = stack.merged_snapshot();
        assert_eq!(snapshot.get("a").unwrap().as_node(), Some(&Node::Int(1)));
        assert_eq!(snapshot.get("b").unwrap().as_node(), Some(&Node::Int(2)));
    }

    #[test]
    fn test_snapshot_is_detached_from_later_defines() {
        let mut stack = FrameStack::new(Frame::new());
        stack.set_top("x", Node::Int(1).into());
        let snapshot = stack.merged_snapshot();
        stack.set_top("x", Node::Int(99).into());
        assert_eq!(snapshot.get("x").unwrap().as_node(), Some(&Node::Int(1)));
    }

    #[test]
    fn test_pop_never_drops_last_frame() {
        let mut stack = FrameStack::isolated(Frame::new());
        stack.pop();
        assert_eq!(stack.height(), 1);
    }
}
