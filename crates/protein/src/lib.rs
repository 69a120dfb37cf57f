//! protein - a YAML-tree macro preprocessor
//!
//! A protein document is ordinary YAML whose mappings may carry
//! **constructs**: keys beginning with a dot, such as `.define`,
//! `.foreach`, `.if`, `.function`, `.call`, `.load`, and `.export`. The
//! interpreter walks the tree, executes each construct, replaces it with
//! the node(s) it produces, and emits a pure data tree as YAML, JSON, TOML,
//! or as text buffers written to files.
//!
//! # Example
//!
//! ```
//! use protein::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let tree = interp
//!     .render_str(".define:\n  name: Alice\nmessage: \"Hello, {{ name }}!\"")
//!     .unwrap();
//! let yaml = Interpreter::to_yaml_string(&tree).unwrap();
//! assert!(yaml.contains("Hello, Alice!"));
//! ```

pub mod buffers;
pub mod constructs;
pub mod emit;
mod error;
pub mod expr;
pub mod frame;
mod literal;
pub mod load;
pub mod logging;
pub mod markdown;
pub mod modules;
pub mod node;
pub mod overrides;
pub mod sql;
mod walker;

pub use error::{ProteinError, Result};
pub use frame::{Closure, Frame, FrameStack, HostFn, Value};
pub use modules::{ModuleEnvironment, ModuleLoader, NativeModuleRegistry};
pub use node::{Mapping, Node, LITERAL_PREFIX};
pub use sql::{MemoryEngine, MemoryEngineFactory, SqlDriver, SqlEngineFactory};
pub use walker::Interpreter;
