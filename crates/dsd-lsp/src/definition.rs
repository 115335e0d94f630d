//! Go-to-definition and find-references providers for DSD.
//!
//! Provides go-to-definition for:
//! - Entry points, actions and decisions (jumps to the Python class)
//! - Subtrees (jumps to the `#Name` definition in the document)
//!
//! References are only tracked for subtrees.

use tower_lsp::lsp_types::{GotoDefinitionResponse, Location, Url};

use crate::analysis::{subtree_definition, subtree_occurrences, symbol_kind, SymbolKind, WordAt};
use crate::python_index::{find_class, ClassFolder, PythonFile, PythonIndex};

/// Get the definition location for the word under the cursor.
pub fn get_definition(
    line: &str,
    word: &WordAt,
    lines: &[String],
    document_uri: &Url,
    index: &PythonIndex,
) -> Option<GotoDefinitionResponse> {
    if word.word.trim().is_empty() {
        return None;
    }
    let location = match symbol_kind(line, word.start)? {
        SymbolKind::EntryPoint => class_location(index, ClassFolder::Any, &word.word),
        SymbolKind::Action => class_location(index, ClassFolder::Actions, &word.word),
        SymbolKind::Decision => class_location(index, ClassFolder::Decisions, &word.word),
        SymbolKind::Subtree => {
            subtree_definition(lines, &word.word).map(|o| o.to_location(document_uri))
        }
    }?;
    Some(GotoDefinitionResponse::Scalar(location))
}

fn class_location(index: &PythonIndex, folder: ClassFolder, name: &str) -> Option<Location> {
    let files = index.files_in(folder);
    let refs: Vec<&PythonFile> = files.iter().collect();
    find_class(&refs, name)?.location()
}

/// Find all references to the subtree under the cursor.
pub fn get_references(
    line: &str,
    word: &WordAt,
    lines: &[String],
    document_uri: &Url,
) -> Option<Vec<Location>> {
    if word.word.trim().is_empty() || symbol_kind(line, word.start)? != SymbolKind::Subtree {
        return None;
    }
    Some(
        subtree_occurrences(lines, &word.word)
            .into_iter()
            .map(|o| o.to_location(document_uri))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::find_word;
    use crate::document::split_lines;
    use std::path::Path;

    const BEHAVIOR: &str = "\
-->Striker
$BallSeen
    YES --> #Attack
    NO --> @LookAround

#Attack
@Kick
";

    fn uri() -> Url {
        Url::parse("file:///ws/striker.dsd").unwrap()
    }

    fn index() -> PythonIndex {
        let index = PythonIndex::new();
        index.refresh(Path::new("/ws/actions/kick.py"), "import x\n\nclass Kick(Base):\n    pass\n");
        index.refresh(Path::new("/ws/actions/look_around.py"), "from y import LookAround\n");
        index.refresh(Path::new("/ws/decisions/ball.py"), "class BallSeen(Base):\n");
        index.refresh(Path::new("/ws/striker.py"), "class Striker(Behavior):\n");
        index
    }

    fn definition(line: usize, character: usize) -> Option<Location> {
        let lines = split_lines(BEHAVIOR);
        let word = find_word(&lines[line], character)?;
        match get_definition(&lines[line], &word, &lines, &uri(), &index())? {
            GotoDefinitionResponse::Scalar(location) => Some(location),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_definition_of_action_class() {
        let location = definition(6, 2).unwrap();
        assert_eq!(location.uri, Url::from_file_path("/ws/actions/kick.py").unwrap());
        assert_eq!(location.range.start.line, 2);
        assert_eq!((location.range.start.character, location.range.end.character), (6, 10));
    }

    #[test]
    fn test_definition_falls_back_to_module_file() {
        let location = definition(3, 14).unwrap();
        assert_eq!(location.uri, Url::from_file_path("/ws/actions/look_around.py").unwrap());
        assert_eq!(location.range.start.line, 0);
    }

    #[test]
    fn test_definition_of_decision_and_entry_point() {
        let decision = definition(1, 3).unwrap();
        assert_eq!(decision.uri, Url::from_file_path("/ws/decisions/ball.py").unwrap());
        let entry = definition(0, 4).unwrap();
        assert_eq!(entry.uri, Url::from_file_path("/ws/striker.py").unwrap());
    }

    #[test]
    fn test_definition_of_subtree() {
        let location = definition(2, 14).unwrap();
        assert_eq!(location.uri, uri());
        assert_eq!(location.range.start.line, 5);
        assert_eq!((location.range.start.character, location.range.end.character), (0, 7));
    }

    #[test]
    fn test_no_definition_for_plain_words() {
        assert!(definition(2, 5).is_none());
    }

    #[test]
    fn test_references_only_for_subtrees() {
        let lines = split_lines(BEHAVIOR);
        let word = find_word(&lines[5], 3).unwrap();
        let refs = get_references(&lines[5], &word, &lines, &uri()).unwrap();
        let found: Vec<u32> = refs.iter().map(|l| l.range.start.line).collect();
        assert_eq!(found, vec![2, 5]);

        let word = find_word(&lines[6], 2).unwrap();
        assert!(get_references(&lines[6], &word, &lines, &uri()).is_none());
    }
}
