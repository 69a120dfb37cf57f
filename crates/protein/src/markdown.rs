//! Markdown to HTML conversion (GitHub-flavored), exposed to documents as
//! the `to_html` function and filter.
//!
//! Tables, footnotes, strikethrough, and task lists come from the parser;
//! container blocks (`:::note` ... `:::`) are handled by a line
//! preprocessor that splits the document at container fences and wraps the
//! rendered segments in classed `<div>`s. Raw HTML in the input is escaped
//! unless `allow_html` is set.

use pulldown_cmark::{html, Event, Options, Parser};

/// Container names that open a classed `<div>` block.
const CONTAINERS: &[&str] = &[
    "note", "tip", "warning", "danger", "info", "error", "example", "quote",
];

/// Render Markdown to HTML with a GitHub-like flavor.
///
/// Deterministic output; with `allow_html` false (the default surface),
/// raw HTML tags in the input are escaped instead of passed through.
pub fn to_html(text: &str, allow_html: bool) -> String {
    let mut out = String::new();
    let mut chunk = String::new();
    let mut depth = 0usize;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(name) = container_open(trimmed) {
            render_chunk(&chunk, allow_html, &mut out);
            chunk.clear();
            out.push_str("<div class=\"");
            out.push_str(name);
            out.push_str("\">\n");
            depth += 1;
        } else if depth > 0 && is_container_close(trimmed) {
            render_chunk(&chunk, allow_html, &mut out);
            chunk.clear();
            out.push_str("</div>\n");
            depth -= 1;
        } else {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    render_chunk(&chunk, allow_html, &mut out);

    // A missing closing fence closes at end of input.
    while depth > 0 {
        out.push_str("</div>\n");
        depth -= 1;
    }
    out
}

/// `:::name` (three or more colons) with a registered container name.
fn container_open(line: &str) -> Option<&'static str> {
    let rest = line.trim_start_matches(':');
    if line.len() - rest.len() < 3 {
        return None;
    }
    let name = rest.trim();
    CONTAINERS.iter().copied().find(|c| *c == name)
}

/// A closing fence is a line of colons only.
fn is_container_close(line: &str) -> bool {
    line.len() >= 3 && line.bytes().all(|b| b == b':')
}

fn render_chunk(chunk: &str, allow_html: bool, out: &mut String) {
    if chunk.trim().is_empty() {
        return;
    }
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(chunk, options);
    if allow_html {
        html::push_html(out, parser);
    } else {
        html::push_html(out, parser.map(escape_raw_html));
    }
}

/// Demote raw HTML events to text so the writer escapes them.
fn escape_raw_html(event: Event<'_>) -> Event<'_> {
    match event {
        Event::Html(raw) => Event::Text(raw),
        Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    }
}
