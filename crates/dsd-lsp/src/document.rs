//! Document management for the LSP server.
//!
//! Tracks open documents (DSD files as well as Python classes the user
//! is editing) using rope data structures. Documents that are not open
//! are read from disk on demand.

use std::path::Path;

use dashmap::DashMap;
use ropey::Rope;
use tower_lsp::lsp_types::Url;

/// A document being edited.
#[derive(Debug, Clone)]
pub struct Document {
    /// The document content as a rope for efficient editing.
    pub content: Rope,
    /// The document version.
    pub version: i32,
}

impl Document {
    /// Create a new document with the given content.
    pub fn new(content: &str, version: i32) -> Self {
        Self {
            content: Rope::from_str(content),
            version,
        }
    }

    /// Get the full text of the document.
    pub fn text(&self) -> String {
        self.content.to_string()
    }

    /// Get the lines of the document without their line terminators.
    pub fn lines(&self) -> Vec<String> {
        split_lines(&self.text())
    }
}

/// Split text into lines, dropping `\n` / `\r\n` terminators.
///
/// A trailing newline yields a final empty line so that a cursor placed
/// after it still addresses a valid line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

/// Document store for managing all open documents.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<Url, Document>,
}

impl DocumentStore {
    /// Create a new document store.
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    /// Open a document.
    pub fn open(&self, uri: Url, content: &str, version: i32) {
        self.documents.insert(uri, Document::new(content, version));
    }

    /// Update a document.
    pub fn update(&self, uri: &Url, content: &str, version: i32) {
        if let Some(mut doc) = self.documents.get_mut(uri) {
            doc.content = Rope::from_str(content);
            doc.version = version;
        }
    }

    /// Close a document.
    pub fn close(&self, uri: &Url) {
        self.documents.remove(uri);
    }

    /// Get a document.
    pub fn get(&self, uri: &Url) -> Option<Document> {
        self.documents.get(uri).map(|doc| doc.clone())
    }

    /// Get the text of an open document at `path`, if any.
    pub fn text_for_path(&self, path: &Path) -> Option<String> {
        let uri = Url::from_file_path(path).ok()?;
        self.get(&uri).map(|doc| doc.text())
    }

    /// Get the lines of a document, reading it from disk if it is not open.
    pub fn lines(&self, uri: &Url) -> Option<Vec<String>> {
        if let Some(doc) = self.get(uri) {
            return Some(doc.lines());
        }
        let path = uri.to_file_path().ok()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(split_lines(&content)),
            Err(e) => {
                log::debug!("Could not read {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_strips_terminators() {
        let lines = split_lines("-->Root\r\n$Decide\n    YES --> @Act\n");
        assert_eq!(lines, vec!["-->Root", "$Decide", "    YES --> @Act", ""]);
    }

    #[test]
    fn test_open_documents_shadow_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.dsd");
        std::fs::write(&path, "-->OnDisk\n").unwrap();
        let uri = Url::from_file_path(&path).unwrap();

        let store = DocumentStore::new();
        assert_eq!(store.lines(&uri).unwrap()[0], "-->OnDisk");

        store.open(uri.clone(), "-->InEditor\n", 1);
        assert_eq!(store.lines(&uri).unwrap()[0], "-->InEditor");
        assert_eq!(store.text_for_path(&path).as_deref(), Some("-->InEditor\n"));

        store.update(&uri, "-->Edited", 2);
        assert_eq!(store.get(&uri).unwrap().version, 2);

        store.close(&uri);
        assert_eq!(store.lines(&uri).unwrap()[0], "-->OnDisk");
    }
}
