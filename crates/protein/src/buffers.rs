//! Text-buffer registry.
//!
//! Buffers accumulate generated text (code, markup) that is not a data
//! tree. They are created by `.open_buffer`, appended to by
//! `.write_buffer`, and written to disk by `.save_buffer`; unsaved buffers
//! are discarded when the interpreter is dropped.

use camino::Utf8Path;
use indexmap::IndexMap;

use crate::error::{ProteinError, Result};

/// A named mutable text accumulator.
#[derive(Debug)]
pub struct Buffer {
    pub name: String,
    /// Informational language tag ("python", "sql", ...), not interpreted.
    pub language: Option<String>,
    /// Spaces per indentation unit.
    pub indent_width: usize,
    /// Base alignment in indentation units.
    pub base_indent: i64,
    text: String,
}

impl Buffer {
    fn new(name: String, language: Option<String>, indent_width: usize) -> Self {
        Self {
            name,
            language,
            indent_width,
            base_indent: 0,
            text: String::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the accumulated text (used for `.init`).
    pub fn set_text(&mut self, text: String) {
        self.text = text;
    }

    /// Append a block of text aligned `indent` units relative to the base
    /// alignment. Common leading whitespace is stripped from the block,
    /// then every line is re-indented and newline-terminated.
    pub fn append(&mut self, block: &str, indent: i64) {
        let column = (self.base_indent + indent).max(0) as usize * self.indent_width;
        let prefix = " ".repeat(column);
        let margin = common_margin(block);
        for line in block.lines() {
            if line.trim().is_empty() {
                self.text.push('\n');
                continue;
            }
            let stripped = if line.len() >= margin {
                &line[margin..]
            } else {
                line.trim_start()
            };
            self.text.push_str(&prefix);
            self.text.push_str(stripped);
            self.text.push('\n');
        }
    }
}

/// Common leading-whitespace width across the non-blank lines of a block.
fn common_margin(block: &str) -> usize {
    block
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0)
}

/// Buffers keyed by name. Only the walker touches the registry, so no
/// locking is involved.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: IndexMap<String, Buffer>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &mut self,
        name: &str,
        language: Option<String>,
        indent_width: usize,
    ) -> Result<&mut Buffer> {
        if self.buffers.contains_key(name) {
            return Err(ProteinError::duplicate_key(format!("buffer '{name}'")));
        }
        self.buffers.insert(
            name.to_string(),
            Buffer::new(name.to_string(), language, indent_width),
        );
        Ok(self.buffers.get_mut(name).expect("just inserted"))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Buffer> {
        self.buffers
            .get_mut(name)
            .ok_or_else(|| ProteinError::undefined(format!("buffer '{name}'")))
    }

    /// Write the buffer to `path` and drop it from the registry.
    pub fn save(&mut self, name: &str, path: &Utf8Path) -> Result<()> {
        let buffer = self
            .buffers
            .shift_remove(name)
            .ok_or_else(|| ProteinError::undefined(format!("buffer '{name}'")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, buffer.text())?;
        tracing::info!(buffer = %name, path = %path, "saved buffer");
        Ok(())
    }
}
