//! Literal parsing of template output.
//!
//! The template engine is string-typed; composite results come back as
//! printed literals. This parser recovers numbers, booleans, nulls, quoted
//! strings, sequences, and mappings from that text so an expression like
//! `{{ servers('live') }}` can yield a real sequence. Both Python-style
//! (`'a'`, `True`, `None`) and JSON-style (`"a"`, `true`, `null`) spellings
//! are accepted, since either may appear in rendered output.
//!
//! Text that is not a complete literal is not an error: the caller keeps it
//! as a plain string.

use crate::error::{ProteinError, Result};
use crate::node::{insert_unique, Mapping, Node};

/// Try to parse `text` as a value literal. `Ok(None)` means the text is not
/// a literal and should be kept as a string. Duplicate mapping keys are the
/// only hard error.
pub fn parse_literal(text: &str) -> Result<Option<Node>> {
    let mut cursor = Cursor::new(text);
    cursor.skip_ws();
    let node = match cursor.try_value() {
        Ok(Some(node)) => node,
        Ok(None) => return Ok(None),
        Err(err @ ProteinError::DuplicateKey { .. }) => return Err(err),
        // Malformed literals ("[1, 2") are just strings.
        Err(_) => return Ok(None),
    };
    cursor.skip_ws();
    if cursor.at_end() {
        Ok(Some(node))
    } else {
        // Trailing garbage: "3 apples" is a string, not the number 3.
        Ok(None)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn starts_with_word(&self, word: &str) -> bool {
        let end = self.pos + word.len();
        if self.bytes.len() < end || &self.bytes[self.pos..end] != word.as_bytes() {
            return false;
        }
        // A word literal must not continue into an identifier.
        !matches!(self.bytes.get(end), Some(b) if b.is_ascii_alphanumeric() || *b == b'_')
    }

    fn try_word(&mut self, word: &str) -> bool {
        if self.starts_with_word(word) {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    /// Parse one value, or return `None` if the head is not literal-shaped.
    fn try_value(&mut self) -> Result<Option<Node>> {
        match self.peek() {
            None => Ok(None),
            Some(b'[') => self.sequence().map(Some),
            Some(b'{') => self.mapping().map(Some),
            Some(b'\'' | b'"') => self.quoted().map(Some),
            Some(b'-' | b'+' | b'0'..=b'9') => Ok(self.number()),
            Some(_) => {
                if self.try_word("true") || self.try_word("True") {
                    Ok(Some(Node::Bool(true)))
                } else if self.try_word("false") || self.try_word("False") {
                    Ok(Some(Node::Bool(false)))
                } else if self.try_word("null") || self.try_word("None") || self.try_word("none") {
                    Ok(Some(Node::Null))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Parse one value, failing where a value is mandatory (inside brackets).
    fn value(&mut self) -> Result<Node> {
        let start = self.pos;
        self.try_value()?.ok_or_else(|| {
            ProteinError::expr(format!("expected a value literal at offset {start}"))
        })
    }

    fn sequence(&mut self) -> Result<Node> {
        self.bump(); // '['
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(b']') {
                return Ok(Node::Sequence(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b']') {
                return Ok(Node::Sequence(items));
            }
            return Err(ProteinError::expr("unterminated sequence literal"));
        }
    }

    fn mapping(&mut self) -> Result<Node> {
        self.bump(); // '{'
        let mut map = Mapping::new();
        loop {
            self.skip_ws();
            if self.eat(b'}') {
                return Ok(Node::Mapping(map));
            }
            let key = match self.value()? {
                Node::String { text, .. } => text,
                other => other.scalar_text().ok_or_else(|| {
                    ProteinError::type_error("mapping literal keys must be scalars")
                })?,
            };
            self.skip_ws();
            if !self.eat(b':') {
                return Err(ProteinError::expr("expected ':' in mapping literal"));
            }
            self.skip_ws();
            let value = self.value()?;
            insert_unique(&mut map, key, value)?;
            self.skip_ws();
            if self.eat(b',') {
                continue;
            }
            if self.eat(b'}') {
                return Ok(Node::Mapping(map));
            }
            return Err(ProteinError::expr("unterminated mapping literal"));
        }
    }

    fn quoted(&mut self) -> Result<Node> {
        let quote = self.bump().expect("caller checked the quote");
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(ProteinError::expr("unterminated string literal")),
                Some(b) if b == quote => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => text.push('\n'),
                    Some(b't') => text.push('\t'),
                    Some(b'r') => text.push('\r'),
                    Some(b'\\') => text.push('\\'),
                    Some(b'\'') => text.push('\''),
                    Some(b'"') => text.push('"'),
                    Some(b'0') => text.push('\0'),
                    Some(b'u') => text.push(self.unicode_escape()?),
                    Some(other) => {
                        text.push('\\');
                        text.push(other as char);
                    }
                    None => return Err(ProteinError::expr("unterminated string literal")),
                },
                Some(b) if b.is_ascii() => text.push(b as char),
                Some(b) => {
                    // Re-assemble a UTF-8 sequence starting at this byte.
                    let start = self.pos - 1;
                    let width = utf8_width(b);
                    let end = (start + width).min(self.bytes.len());
                    let chunk = std::str::from_utf8(&self.bytes[start..end])
                        .map_err(|_| ProteinError::expr("invalid UTF-8 in string literal"))?;
                    text.push_str(chunk);
                    self.pos = end;
                }
            }
        }
        Ok(Node::string(text))
    }

    /// `\uXXXX`, with surrogate pairs combined.
    fn unicode_escape(&mut self) -> Result<char> {
        let high = self.hex4()?;
        if (0xD800..=0xDBFF).contains(&high) {
            if self.eat(b'\\') && self.eat(b'u') {
                let low = self.hex4()?;
                if (0xDC00..=0xDFFF).contains(&low) {
                    let combined =
                        0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(combined)
                        .ok_or_else(|| ProteinError::expr("invalid unicode escape"));
                }
            }
            return Err(ProteinError::expr("unpaired surrogate in string literal"));
        }
        char::from_u32(high).ok_or_else(|| ProteinError::expr("invalid unicode escape"))
    }

    fn hex4(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let digit = match self.bump() {
                Some(b @ b'0'..=b'9') => (b - b'0') as u32,
                Some(b @ b'a'..=b'f') => (b - b'a' + 10) as u32,
                Some(b @ b'A'..=b'F') => (b - b'A' + 10) as u32,
                _ => return Err(ProteinError::expr("malformed \\u escape")),
            };
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn number(&mut self) -> Option<Node> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        let mut saw_digit = false;
        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => {
                    saw_digit = true;
                    self.pos += 1;
                }
                b'.' | b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'-' | b'+')) {
                        self.pos += 1;
                    }
                }
                b'_' => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if !saw_digit {
            self.pos = start;
            return None;
        }
        let raw: String = std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if !is_float {
            if let Ok(i) = raw.parse::<i64>() {
                return Some(Node::Int(i));
            }
        }
        match raw.parse::<f64>() {
            Ok(f) => Some(Node::Float(f)),
            Err(_) => {
                self.pos = start;
                None
            }
        }
    }
}

fn utf8_width(first: u8) -> usize {
    match first {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}
