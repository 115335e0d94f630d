//! Completion provider for DSD.
//!
//! Provides completion for:
//! - Action classes after `@`
//! - Decision classes after `$`
//! - Subtrees of the current document after `#`

use std::collections::BTreeSet;

use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind, CompletionList};

use crate::analysis::{subtree_names, CompletionContext};
use crate::python_index::{class_names, ClassFolder, PythonIndex};

/// Characters that open a completion session.
pub const TRIGGER_CHARACTERS: [&str; 3] = ["@", "$", "#"];

/// Get completions for a given context.
///
/// Returns `None` when the cursor is not behind a DSD sigil.
pub fn get_completions(
    context: CompletionContext,
    lines: &[String],
    index: &PythonIndex,
) -> Option<CompletionList> {
    let items = match context {
        CompletionContext::Action => {
            symbol_items(class_names(&index.files_in(ClassFolder::Actions)), "action")
        }
        CompletionContext::Decision => {
            symbol_items(class_names(&index.files_in(ClassFolder::Decisions)), "decision")
        }
        CompletionContext::Subtree => symbol_items(subtree_names(lines), "subtree"),
        CompletionContext::Unknown => return None,
    };
    Some(CompletionList {
        is_incomplete: false,
        items,
    })
}

fn symbol_items(names: BTreeSet<String>, detail: &str) -> Vec<CompletionItem> {
    let kind = if detail == "subtree" {
        CompletionItemKind::MODULE
    } else {
        CompletionItemKind::CLASS
    };
    names
        .into_iter()
        .map(|name| CompletionItem {
            label: name,
            kind: Some(kind),
            detail: Some(detail.to_string()),
            ..Default::default()
        })
        .collect()
}
