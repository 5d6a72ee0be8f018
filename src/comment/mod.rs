use crate::expr::{fixup, references_of, FixupMode, Node, Reference};
use crate::io::{BinaryReader, BinaryWriter};
use crate::symbol::SymbolTables;

/// One line of a parsed [`Comment`]: plain text, a successfully parsed
/// `{expr}` segment, or a segment that failed to parse (in which case the
/// line's contribution to `full_comment_text` is preserved verbatim so
/// the user can edit their way back to valid syntax).
#[derive(Clone, Debug)]
pub enum LineItem {
    Text(String),
    Expression(Node),
    Error { text: String, message: String },
}

/// The comment sub-language: free text with inline `{expr}` segments.
/// `{{` escapes a literal brace. Reparsing never discards the user's
/// original keystrokes: `full_comment_text` always matches the last
/// successful `set()` call, even when some of its lines contain errors.
#[derive(Clone, Debug, Default)]
pub struct Comment {
    full_comment_text: String,
    lines: Vec<Vec<LineItem>>,
}

impl Comment {
    pub fn set(&mut self, text: &str) {
        self.full_comment_text = text.to_string();
        self.lines = text.lines().map(parse_line).collect();
        if text.is_empty() {
            self.lines.clear();
        }
    }

    pub fn text(&self) -> &str {
        &self.full_comment_text
    }

    pub fn is_empty(&self) -> bool {
        self.full_comment_text.is_empty()
    }

    pub fn lines(&self) -> &[Vec<LineItem>] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Only the original text is persisted; the parsed line items are a
    /// cache rebuilt by `set` on load, so format changes to the expression
    /// encoding never invalidate stored comments.
    pub fn save(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.full_comment_text);
    }

    pub fn load(reader: &mut BinaryReader) -> Result<Comment, String> {
        let mut comment = Comment::default();
        comment.set(&reader.read_string()?);
        Ok(comment)
    }

    /// Runs fixup on every parsed expression segment and returns the
    /// union of everything they reference, for the reference graph to
    /// record against this comment's owning location.
    pub fn fixup(&mut self, tables: &mut SymbolTables) -> Vec<Reference> {
        let mut references = Vec::new();
        for line in &mut self.lines {
            for item in line.iter_mut() {
                if let LineItem::Expression(node) = item {
                    if fixup(node, tables, FixupMode::ResolveExisting).is_ok() {
                        references.extend(references_of(node));
                    }
                }
            }
        }
        references
    }
}

fn parse_line(line: &str) -> Vec<LineItem> {
    let mut items = Vec::new();
    let mut text = String::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '{' => {
                if !text.is_empty() {
                    items.push(LineItem::Text(std::mem::take(&mut text)));
                }
                let start = i + 1;
                let mut depth = 1;
                let mut j = start;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                if j >= chars.len() {
                    let raw: String = chars[start..].iter().collect();
                    items.push(LineItem::Error { text: raw, message: "unterminated '{' in comment".to_string() });
                    i = chars.len();
                } else {
                    let inner: String = chars[start..j].iter().collect();
                    match crate::expr::parse(&inner) {
                        Ok(node) => items.push(LineItem::Expression(node)),
                        Err(message) => items.push(LineItem::Error { text: inner, message }),
                    }
                    i = j + 1;
                }
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        items.push(LineItem::Text(text));
    }
    items
}
