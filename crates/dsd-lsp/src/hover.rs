//! Hover provider for DSD.
//!
//! Provides documentation on hover for:
//! - Entry points (class docstring)
//! - Actions (docstring and accepted parameters, including inherited ones)
//! - Decisions (docstring)
//! - Subtrees

use tower_lsp::lsp_types::{Hover, HoverContents, MarkupContent, MarkupKind, Position, Range};

use crate::analysis::{symbol_kind, SymbolKind, WordAt};
use crate::python_index::{
    action_parameters, class_docstring, find_class, ClassFolder, PythonFile, PythonIndex,
    REEVALUATE_PARAMETER,
};

/// Get hover information for the word at `line_index`.
pub fn get_hover(
    line: &str,
    line_index: u32,
    word: &WordAt,
    index: &PythonIndex,
) -> Option<Hover> {
    if word.word.is_empty() {
        return None;
    }
    let value = match symbol_kind(line, word.start)? {
        SymbolKind::EntryPoint => entry_point_hover(&word.word, index),
        SymbolKind::Action => action_hover(&word.word, index),
        SymbolKind::Decision => decision_hover(&word.word, index),
        SymbolKind::Subtree => format!("Subtree: {}", word.word),
    };
    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range: Some(Range {
            start: Position {
                line: line_index,
                character: word.start as u32,
            },
            end: Position {
                line: line_index,
                character: word.end as u32,
            },
        }),
    })
}

/// Docstring of `name` looked up in `folder`, empty if unknown.
fn docstring(files: &[PythonFile], name: &str) -> String {
    let refs: Vec<&PythonFile> = files.iter().collect();
    find_class(&refs, name)
        .map(|class| class_docstring(&class))
        .unwrap_or_default()
}

fn entry_point_hover(name: &str, index: &PythonIndex) -> String {
    let comment = docstring(&index.files_in(ClassFolder::Any), name);
    let mut value = format!("Entrypoint: {}", name);
    if !comment.is_empty() {
        value.push_str(&format!(" \n\n_{}_", comment));
    }
    value
}

fn action_hover(name: &str, index: &PythonIndex) -> String {
    let files = index.files_in(ClassFolder::Actions);
    let refs: Vec<&PythonFile> = files.iter().collect();

    let (comment, parameters) = match find_class(&refs, name) {
        Some(class) => (class_docstring(&class), action_parameters(&refs, &class)),
        None => (String::new(), vec![REEVALUATE_PARAMETER.to_string()]),
    };

    let mut value = format!("### {}\n----------", name);
    if !comment.is_empty() {
        value.push_str(&format!(" \n\n{}", comment));
    }
    value.push_str(&format!(" \n\n**Parameters**:\n{}", parameters.join(", ")));
    value
}

fn decision_hover(name: &str, index: &PythonIndex) -> String {
    let comment = docstring(&index.files_in(ClassFolder::Decisions), name);
    let mut value = format!("Decision: {}", name);
    if !comment.is_empty() {
        value.push_str(&format!(" \n\n{}", comment));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::find_word;
    use std::path::Path;

    fn index() -> PythonIndex {
        let index = PythonIndex::new();
        index.refresh(
            Path::new("/ws/behavior/striker.py"),
            "class Striker(Behavior):\n    \"\"\"Plays offense.\"\"\"\n",
        );
        index.refresh(
            Path::new("/ws/actions/kick.py"),
            "class Kick(AbstractActionElement):\n    \"\"\"Kicks.\"\"\"\n    def __init__(self, b, d, parameters):\n        self.foot = parameters.get(\"foot\")\n",
        );
        index.refresh(
            Path::new("/ws/decisions/ball.py"),
            "class BallSeen(AbstractDecisionElement):\n    \"\"\"Is the ball visible?\"\"\"\n",
        );
        index
    }

    fn hover_text(line: &str, character: usize) -> Option<String> {
        let word = find_word(line, character)?;
        get_hover(line, 0, &word, &index()).map(|h| match h.contents {
            HoverContents::Markup(m) => m.value,
            other => panic!("unexpected hover contents {:?}", other),
        })
    }

    #[test]
    fn test_entry_point_hover() {
        assert_eq!(hover_text("-->Striker", 5).unwrap(), "Entrypoint: Striker \n\n_Plays offense._");
    }

    #[test]
    fn test_action_hover_lists_parameters() {
        assert_eq!(
            hover_text("    YES --> @Kick + foot:left", 14).unwrap(),
            "### Kick\n---------- \n\nKicks. \n\n**Parameters**:\nfoot, r / reevaluate"
        );
    }

    #[test]
    fn test_unknown_action_still_lists_reevaluate() {
        assert_eq!(
            hover_text("@Unknown", 3).unwrap(),
            "### Unknown\n---------- \n\n**Parameters**:\nr / reevaluate"
        );
    }

    #[test]
    fn test_decision_and_subtree_hover() {
        assert_eq!(hover_text("$BallSeen", 2).unwrap(), "Decision: BallSeen \n\nIs the ball visible?");
        assert_eq!(hover_text("    NO --> #Search", 13).unwrap(), "Subtree: Search");
    }

    #[test]
    fn test_no_hover_on_plain_words() {
        assert!(hover_text("    YES --> @Kick", 5).is_none());
        assert!(hover_text("    NO --> @", 12).is_none());
    }

    #[test]
    fn test_hover_range_covers_word() {
        let word = find_word("$BallSeen", 3).unwrap();
        let hover = get_hover("$BallSeen", 7, &word, &index()).unwrap();
        let range = hover.range.unwrap();
        assert_eq!((range.start.line, range.start.character, range.end.character), (7, 1, 9));
    }
}
