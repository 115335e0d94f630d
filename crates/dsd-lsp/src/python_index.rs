//! Index of the Python sources that implement DSD elements.
//!
//! Actions and decisions referenced from DSD files are Python classes:
//! actions live in folders whose name ends in `actions`, decisions in
//! folders ending in `decisions`. Entry points may be defined anywhere.
//! The index keeps the lines of every `.py` file below the workspace
//! roots so lookups do not touch the disk.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use regex::Regex;
use tower_lsp::lsp_types::{Location, Url};

use crate::analysis::make_location;
use crate::document::split_lines;

/// Parameter every action accepts, whether or not the class reads it.
pub const REEVALUATE_PARAMETER: &str = "r / reevaluate";

/// Which part of the workspace a class is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassFolder {
    /// Files directly inside a folder ending in `actions`.
    Actions,
    /// Files directly inside a folder ending in `decisions`.
    Decisions,
    /// Any Python file.
    Any,
}

impl ClassFolder {
    /// Check whether a file belongs to this folder.
    pub fn contains(self, path: &Path) -> bool {
        let suffix = match self {
            ClassFolder::Actions => "actions",
            ClassFolder::Decisions => "decisions",
            ClassFolder::Any => return true,
        };
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.ends_with(suffix))
    }
}

/// A Python source file.
#[derive(Debug, Clone)]
pub struct PythonFile {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

impl PythonFile {
    /// Create a file from its text.
    pub fn new(path: PathBuf, text: &str) -> Self {
        Self {
            path,
            lines: split_lines(text),
        }
    }

    fn uri(&self) -> Option<Url> {
        Url::from_file_path(&self.path).ok()
    }
}

/// A class found in a Python file.
#[derive(Debug, Clone, Copy)]
pub struct ClassMatch<'a> {
    pub file: &'a PythonFile,
    /// Line of the `class` statement (0 for a file matched by name only).
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

impl ClassMatch<'_> {
    /// Convert to an LSP location.
    pub fn location(&self) -> Option<Location> {
        let uri = self.file.uri()?;
        Some(make_location(&uri, self.line, self.start, self.end))
    }
}

fn top_level_class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^class\s+(\w+)").expect("valid regex"))
}

fn class_with_bases_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^class\s+(\w+)\s*\(").expect("valid regex"))
}

fn parent_class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*class\s+\w+\s*\((\w+)\)").expect("valid regex"))
}

fn docstring_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\A\s*"""([\s\S]*?)""""#).expect("valid regex"))
}

fn parameter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"parameters\.get\((?:"([A-Za-z_]+?)"|'([A-Za-z_]+?)')"#).expect("valid regex")
    })
}

fn snake_case_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z]+[a-z]*").expect("valid regex"))
}

/// Convert a PascalCase class name to the snake_case module name.
pub fn to_snake(pascal: &str) -> String {
    snake_case_regex()
        .find_iter(pascal)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Names of all non-abstract top-level classes in `files`.
pub fn class_names<'a>(files: impl IntoIterator<Item = &'a PythonFile>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for file in files {
        for line in &file.lines {
            let Some(cap) = top_level_class_regex().captures(line) else {
                continue;
            };
            let name = &cap[1];
            if name.to_lowercase().starts_with("abstract") {
                continue;
            }
            names.insert(name.to_string());
        }
    }
    names
}

/// Find the definition of `class_name`.
///
/// The first `class Name(` statement wins. Failing that, a file named after
/// the class (`KickBall` -> `kick_ball.py`) is returned at its first line.
pub fn find_class<'a>(files: &[&'a PythonFile], class_name: &str) -> Option<ClassMatch<'a>> {
    let snake = to_snake(class_name);
    let mut direct_file = None;

    for &file in files {
        if file.path.file_stem().and_then(|s| s.to_str()) == Some(snake.as_str()) {
            direct_file = Some(file);
        }
        for (line_index, line) in file.lines.iter().enumerate() {
            let Some(cap) = class_with_bases_regex().captures(line) else {
                continue;
            };
            let Some(name) = cap.get(1) else { continue };
            if name.as_str() != class_name {
                continue;
            }
            return Some(ClassMatch {
                file,
                line: line_index,
                start: line[..name.start()].chars().count(),
                end: line[..name.end()].chars().count(),
            });
        }
    }

    direct_file.map(|file| ClassMatch {
        file,
        line: 0,
        start: 0,
        end: 0,
    })
}

/// Extract the docstring directly following the class statement.
///
/// Line breaks are turned into markdown hard breaks.
pub fn class_docstring(class: &ClassMatch<'_>) -> String {
    let first = class.line + 1;
    if class.file.lines.len() <= first {
        return String::new();
    }
    let content = class.file.lines[first..].join("\n");
    docstring_regex()
        .captures(&content)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().replace('\n', " \\\n"))
        .unwrap_or_default()
}

/// The class statement plus the lines belonging to its body.
fn class_body(lines: &[String], start: usize) -> &[String] {
    let Some(rest) = lines.get(start + 1..) else {
        return &lines[start.min(lines.len())..];
    };
    let body_len = rest
        .iter()
        .take_while(|line| {
            line.is_empty()
                || line.starts_with(char::is_whitespace)
                || line.starts_with('#')
                || line.starts_with("\"\"\"")
        })
        .count();
    &lines[start..start + 1 + body_len]
}

/// Parameters read by the class through `parameters.get("...")`.
pub fn class_parameters(class: &ClassMatch<'_>) -> BTreeSet<String> {
    let body = class_body(&class.file.lines, class.line).join("\n");
    parameter_regex()
        .captures_iter(&body)
        .filter_map(|cap| cap.get(1).or_else(|| cap.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Find the parent class of `class` among `files`.
pub fn parent_class<'a>(files: &[&'a PythonFile], class: &ClassMatch<'_>) -> Option<ClassMatch<'a>> {
    let line = class.file.lines.get(class.line)?;
    let cap = parent_class_regex().captures(line)?;
    find_class(files, &cap[1])
}

/// Parameters inherited from all ancestors of `class`.
pub fn inherited_parameters(files: &[&PythonFile], class: &ClassMatch<'_>) -> BTreeSet<String> {
    let mut parameters = BTreeSet::new();
    let mut visited = HashSet::new();
    visited.insert((class.file.path.clone(), class.line));

    let mut current = parent_class(files, class);
    while let Some(parent) = current {
        if !visited.insert((parent.file.path.clone(), parent.line)) {
            break;
        }
        parameters.extend(class_parameters(&parent));
        current = parent_class(files, &parent);
    }
    parameters
}

/// All parameters an action accepts, sorted.
pub fn action_parameters(files: &[&PythonFile], class: &ClassMatch<'_>) -> Vec<String> {
    let mut parameters = class_parameters(class);
    parameters.extend(inherited_parameters(files, class));
    parameters.insert(REEVALUATE_PARAMETER.to_string());
    parameters.into_iter().collect()
}

/// Python sources of the workspace, keyed by path.
#[derive(Debug, Default)]
pub struct PythonIndex {
    files: RwLock<BTreeMap<PathBuf, PythonFile>>,
}

impl PythonIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with every `.py` file below `roots`.
    pub fn rescan(&self, roots: &[PathBuf]) -> usize {
        let mut files = BTreeMap::new();
        for root in roots {
            scan_directory(root, &mut files);
        }
        let count = files.len();
        log::debug!("Indexed {} Python files in {} roots", count, roots.len());
        *self.files.write().unwrap_or_else(|e| e.into_inner()) = files;
        count
    }

    /// Update a single file, e.g. after it was edited or saved.
    pub fn refresh(&self, path: &Path, text: &str) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), PythonFile::new(path.to_path_buf(), text));
    }

    /// Drop a deleted file.
    pub fn remove(&self, path: &Path) {
        self.files.write().unwrap_or_else(|e| e.into_inner()).remove(path);
    }

    /// Number of indexed files.
    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the files inside `folder`, sorted by path.
    pub fn files_in(&self, folder: ClassFolder) -> Vec<PythonFile> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|f| folder.contains(&f.path))
            .cloned()
            .collect()
    }
}

fn scan_directory(dir: &Path, files: &mut BTreeMap<PathBuf, PythonFile>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_dir() {
            if name.starts_with('.') || name == "__pycache__" {
                continue;
            }
            scan_directory(&path, files);
        } else if path.extension().is_some_and(|e| e == "py") {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    files.insert(path.clone(), PythonFile::new(path, &content));
                }
                Err(e) => log::debug!("Skipping {}: {}", path.display(), e),
            }
        }
    }
}
