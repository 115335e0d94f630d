//! Code analysis for DSD files.
//!
//! DSD documents are line oriented. This module locates the word under the
//! cursor and classifies it by the sigil in front of it:
//!
//! - `#Name` - a subtree, defined in the same document
//! - `@Name` - an action, implemented by a Python class
//! - `$Name` - a decision, implemented by a Python class
//! - `-->Name` - the entry point of the behavior

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tower_lsp::lsp_types::{Location, Position, Range, Url};

/// A word found in a line, with character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordAt {
    /// The word text. Empty when the cursor sits at the end of the line.
    pub word: String,
    /// Start offset (in characters).
    pub start: usize,
    /// End offset (in characters, exclusive).
    pub end: usize,
}

/// The kind of DSD symbol a word refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// `-->Name`
    EntryPoint,
    /// `@Name`
    Action,
    /// `$Name`
    Decision,
    /// `#Name`
    Subtree,
}

/// Completion context types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionContext {
    /// After `@` - suggest action classes.
    Action,
    /// After `$` - suggest decision classes.
    Decision,
    /// After `#` (not at the start of a line) - suggest subtrees.
    Subtree,
    /// Nothing to suggest.
    Unknown,
}

fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| Regex::new(r"[A-Za-z]\w*").expect("valid regex"))
}

fn subtree_definition_regex() -> &'static Regex {
    static SUBTREE_RE: OnceLock<Regex> = OnceLock::new();
    SUBTREE_RE.get_or_init(|| Regex::new(r"^#(\w+)").expect("valid regex"))
}

/// Convert a byte offset in `s` to a character offset.
fn char_offset(s: &str, byte: usize) -> usize {
    s[..byte].chars().count()
}

/// Find the word at `position` (a character offset) in `line`.
///
/// A cursor placed directly after a word still selects it. When no word
/// covers the position, the single character under the cursor is returned,
/// or an empty word at the end of the line. Positions past the end of the
/// line yield `None`.
pub fn find_word(line: &str, position: usize) -> Option<WordAt> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    for m in word_regex().find_iter(line) {
        let start = char_offset(line, m.start());
        let end = char_offset(line, m.end());
        if start <= position && end >= position {
            return Some(WordAt {
                word: m.as_str().to_string(),
                start,
                end,
            });
        }
    }

    let len = line.chars().count();
    if position == len {
        return Some(WordAt {
            word: String::new(),
            start: position,
            end: position,
        });
    }
    line.chars().nth(position).map(|c| WordAt {
        word: c.to_string(),
        start: position,
        end: position,
    })
}

/// Find the word at an LSP position in a document.
pub fn find_word_at(lines: &[String], position: Position) -> Option<(&str, WordAt)> {
    let line = lines.get(position.line as usize)?;
    let word = find_word(line, position.character as usize)?;
    Some((line.as_str(), word))
}

/// Classify the word starting at `start` by the characters preceding it.
pub fn symbol_kind(line: &str, start: usize) -> Option<SymbolKind> {
    let before: Vec<char> = line.chars().take(start).collect();
    if before.ends_with(&['-', '-', '>']) {
        return Some(SymbolKind::EntryPoint);
    }
    match before.last()? {
        '@' => Some(SymbolKind::Action),
        '$' => Some(SymbolKind::Decision),
        '#' => Some(SymbolKind::Subtree),
        _ => None,
    }
}

/// Determine the completion context at a position.
pub fn get_completion_context(lines: &[String], position: Position) -> CompletionContext {
    let Some((line, word)) = find_word_at(lines, position) else {
        return CompletionContext::Unknown;
    };
    if word.start < 1 {
        return CompletionContext::Unknown;
    }
    match line.chars().nth(word.start - 1) {
        Some('@') => CompletionContext::Action,
        Some('$') => CompletionContext::Decision,
        // A `#` in the first column starts a subtree definition
        Some('#') if word.start - 1 != 0 => CompletionContext::Subtree,
        _ => CompletionContext::Unknown,
    }
}

/// Collect the names of all subtrees defined in a document.
pub fn subtree_names(lines: &[String]) -> BTreeSet<String> {
    lines
        .iter()
        .filter_map(|line| subtree_definition_regex().captures(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// A `#Name` occurrence: line index and character range of the whole token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

impl Occurrence {
    /// Convert to an LSP location in `uri`.
    pub fn to_location(self, uri: &Url) -> Location {
        make_location(uri, self.line, self.start, self.end)
    }
}

/// Find every `#name` occurrence that is not a prefix of a longer name.
pub fn subtree_occurrences(lines: &[String], name: &str) -> Vec<Occurrence> {
    let Ok(re) = Regex::new(&format!(r"#{}\b", regex::escape(name))) else {
        return Vec::new();
    };
    let mut occurrences = Vec::new();
    for (line_index, line) in lines.iter().enumerate() {
        for m in re.find_iter(line) {
            occurrences.push(Occurrence {
                line: line_index,
                start: char_offset(line, m.start()),
                end: char_offset(line, m.end()),
            });
        }
    }
    occurrences
}

/// Find where a subtree is defined.
///
/// Definitions start in the first column; if there is none, the first
/// occurrence anywhere is used.
pub fn subtree_definition(lines: &[String], name: &str) -> Option<Occurrence> {
    let occurrences = subtree_occurrences(lines, name);
    occurrences
        .iter()
        .find(|o| o.start == 0)
        .or_else(|| occurrences.first())
        .copied()
}

/// Build a single-line location.
pub fn make_location(uri: &Url, line: usize, start: usize, end: usize) -> Location {
    Location {
        uri: uri.clone(),
        range: Range {
            start: Position {
                line: line as u32,
                character: start as u32,
            },
            end: Position {
                line: line as u32,
                character: end as u32,
            },
        },
    }
}
