//! LSP backend implementation for DSD.
//!
//! This module implements the Language Server Protocol handler
//! using tower-lsp.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::{json, Value};
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::analysis::{find_word_at, get_completion_context};
use crate::completion::{get_completions, TRIGGER_CHARACTERS};
use crate::definition::{get_definition, get_references};
use crate::document::DocumentStore;
use crate::hover::get_hover;
use crate::python_index::{class_names, ClassFolder, PythonIndex};
use crate::settings::{InitializationOptions, SettingsRegistry};

/// Re-index all Python files of the workspace.
pub const RESCAN_COMMAND: &str = "dsd.rescanWorkspace";
/// List the names of all action classes.
pub const LIST_ACTIONS_COMMAND: &str = "dsd.listActions";
/// List the names of all decision classes.
pub const LIST_DECISIONS_COMMAND: &str = "dsd.listDecisions";

/// DSD Language Server.
pub struct DsdLanguageServer {
    /// The LSP client connection.
    client: Client,
    /// Document store for open files.
    documents: DocumentStore,
    /// Python classes implementing actions, decisions and entry points.
    python_index: PythonIndex,
    /// Settings received at initialization.
    settings: RwLock<SettingsRegistry>,
    /// Workspace roots that are indexed.
    roots: RwLock<Vec<PathBuf>>,
}

fn python_path(uri: &Url) -> Option<PathBuf> {
    let path = uri.to_file_path().ok()?;
    path.extension().is_some_and(|e| e == "py").then_some(path)
}

impl DsdLanguageServer {
    /// Create a new DSD language server.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: DocumentStore::new(),
            python_index: PythonIndex::new(),
            settings: RwLock::new(SettingsRegistry::default()),
            roots: RwLock::new(Vec::new()),
        }
    }

    fn settings(&self) -> std::sync::RwLockReadGuard<'_, SettingsRegistry> {
        self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Log a message to the client's output channel.
    async fn log_to_output(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.client.log_message(MessageType::LOG, message).await;
    }

    /// Log an error, showing it to the user if the policy asks for it.
    async fn log_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        let show = self.settings().show_notifications().shows_errors();
        self.client.log_message(MessageType::ERROR, &message).await;
        if show {
            self.client.show_message(MessageType::ERROR, message).await;
        }
    }

    /// Log a warning, showing it to the user if the policy asks for it.
    async fn log_warning(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        let show = self.settings().show_notifications().shows_warnings();
        self.client.log_message(MessageType::WARNING, &message).await;
        if show {
            self.client.show_message(MessageType::WARNING, message).await;
        }
    }

    /// Log an informational message, showing it if the policy is `always`.
    async fn log_always(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        let show = self.settings().show_notifications().shows_info();
        self.client.log_message(MessageType::INFO, &message).await;
        if show {
            self.client.show_message(MessageType::INFO, message).await;
        }
    }

    /// Re-read every Python file below the workspace roots.
    async fn rescan(&self) -> usize {
        let roots = self.roots.read().unwrap_or_else(|e| e.into_inner()).clone();
        if roots.is_empty() {
            self.log_warning("No workspace root, Python classes cannot be resolved").await;
            return 0;
        }
        let count = self.python_index.rescan(&roots);
        // Open documents are newer than what is on disk
        for root in &roots {
            self.refresh_open_python_documents(root);
        }
        self.log_to_output(format!("Indexed {} Python files", count)).await;
        count
    }

    fn refresh_open_python_documents(&self, root: &Path) {
        for file in self.python_index.files_in(ClassFolder::Any) {
            if !file.path.starts_with(root) {
                continue;
            }
            if let Some(text) = self.documents.text_for_path(&file.path) {
                self.python_index.refresh(&file.path, &text);
            }
        }
    }

    fn reload_python_from_disk(&self, path: &Path) {
        match std::fs::read_to_string(path) {
            Ok(text) => self.python_index.refresh(path, &text),
            Err(_) => self.python_index.remove(path),
        }
    }

    fn lines(&self, uri: &Url) -> Option<Vec<String>> {
        self.documents.lines(uri)
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for DsdLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.log_to_output(format!("CWD Server: {}", cwd.display())).await;

        let options = InitializationOptions::from_value(params.initialization_options);
        let has_workspace_settings = !options.settings.is_empty();
        let registry = SettingsRegistry::new(options, &cwd);

        // Index roots: workspace settings, workspace folders and the root URI
        let mut roots: BTreeSet<PathBuf> = BTreeSet::new();
        if has_workspace_settings {
            roots.extend(registry.roots());
        }
        for folder in params.workspace_folders.iter().flatten() {
            if let Ok(path) = folder.uri.to_file_path() {
                roots.insert(path);
            }
        }
        #[allow(deprecated)]
        let root_uri = params.root_uri.as_ref();
        if let Some(path) = root_uri.and_then(|u| u.to_file_path().ok()) {
            roots.insert(path);
        }
        if roots.is_empty() {
            roots.extend(registry.roots());
        }

        self.log_to_output(format!(
            "Global settings:\r\n{}\r\n",
            serde_json::to_string_pretty(registry.global()).unwrap_or_default()
        ))
        .await;
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = registry;
        *self.roots.write().unwrap_or_else(|e| e.into_inner()) = roots.into_iter().collect();

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                            include_text: Some(true),
                        })),
                        ..Default::default()
                    },
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(
                        TRIGGER_CHARACTERS.iter().map(|c| c.to_string()).collect(),
                    ),
                    resolve_provider: Some(false),
                    ..Default::default()
                }),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                references_provider: Some(OneOf::Left(true)),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![
                        RESCAN_COMMAND.to_string(),
                        LIST_ACTIONS_COMMAND.to_string(),
                        LIST_DECISIONS_COMMAND.to_string(),
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "DSD Language Server".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.rescan().await;
        self.log_always("DSD language server initialized").await;
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("Shutdown requested");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        if let Some(path) = python_path(&uri) {
            self.python_index.refresh(&path, &text);
        }
        self.documents.open(uri, &text, params.text_document.version);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // Get the full text (we use FULL sync mode)
        if let Some(change) = params.content_changes.into_iter().next() {
            self.documents.update(&uri, &change.text, version);
            if let Some(path) = python_path(&uri) {
                self.python_index.refresh(&path, &change.text);
            }
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let Some(path) = python_path(&params.text_document.uri) else {
            return;
        };
        match params.text {
            Some(text) => self.python_index.refresh(&path, &text),
            None => self.reload_python_from_disk(&path),
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.close(&uri);
        if let Some(path) = python_path(&uri) {
            self.reload_python_from_disk(&path);
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        for change in params.changes {
            let Some(path) = python_path(&change.uri) else {
                continue;
            };
            if change.typ == FileChangeType::DELETED {
                self.python_index.remove(&path);
            } else if self.documents.get(&change.uri).is_none() {
                self.reload_python_from_disk(&path);
            }
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        log::debug!("Completions requested");
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let Some(lines) = self.lines(&uri) else {
            return Ok(None);
        };
        let context = get_completion_context(&lines, position);
        Ok(get_completions(context, &lines, &self.python_index).map(CompletionResponse::List))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let Some(lines) = self.lines(&uri) else {
            return Ok(None);
        };
        let Some((line, word)) = find_word_at(&lines, position) else {
            return Ok(None);
        };
        Ok(get_hover(line, position.line, &word, &self.python_index))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        let Some(lines) = self.lines(&uri) else {
            return Ok(None);
        };
        let Some((line, word)) = find_word_at(&lines, position) else {
            return Ok(None);
        };
        log::debug!("word: {}, range: ({}, {})", word.word, word.start, word.end);
        Ok(get_definition(line, &word, &lines, &uri, &self.python_index))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let Some(lines) = self.lines(&uri) else {
            return Ok(None);
        };
        let Some((line, word)) = find_word_at(&lines, position) else {
            return Ok(None);
        };
        Ok(get_references(line, &word, &lines, &uri))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<Value>> {
        match params.command.as_str() {
            RESCAN_COMMAND => {
                let count = self.rescan().await;
                Ok(Some(json!({ "indexedFiles": count })))
            }
            LIST_ACTIONS_COMMAND => {
                let names = class_names(&self.python_index.files_in(ClassFolder::Actions));
                Ok(Some(json!(names)))
            }
            LIST_DECISIONS_COMMAND => {
                let names = class_names(&self.python_index.files_in(ClassFolder::Decisions));
                Ok(Some(json!(names)))
            }
            other => {
                self.log_error(format!("Unknown command: {}", other)).await;
                Err(Error::invalid_params(format!("unknown command {}", other)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tower_lsp::jsonrpc::ErrorCode;
    use tower_lsp::LspService;

    const KICK: &str = "class KickBall(AbstractActionElement):\n    pass\n";
    const BALL_SEEN: &str = "class BallSeen(AbstractDecisionElement):\n    pass\n";

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("actions")).unwrap();
        fs::create_dir_all(dir.path().join("decisions")).unwrap();
        fs::write(dir.path().join("actions/kick.py"), KICK).unwrap();
        fs::write(dir.path().join("decisions/ball_seen.py"), BALL_SEEN).unwrap();
        fs::write(dir.path().join("main.dsd"), "-->Striker\n$BallSeen\n").unwrap();
        dir
    }

    fn folder_uri(path: &Path) -> Url {
        Url::from_directory_path(path).unwrap()
    }

    async fn initialize(server: &DsdLanguageServer, params: InitializeParams) {
        server.initialize(params).await.unwrap();
        server.initialized(InitializedParams {}).await;
    }

    fn with_folder(path: &Path) -> InitializeParams {
        InitializeParams {
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: folder_uri(path),
                name: "robot".to_string(),
            }]),
            ..Default::default()
        }
    }

    async fn command(server: &DsdLanguageServer, name: &str) -> Result<Option<Value>> {
        server
            .execute_command(ExecuteCommandParams {
                command: name.to_string(),
                arguments: Vec::new(),
                work_done_progress_params: Default::default(),
            })
            .await
    }

    fn roots(server: &DsdLanguageServer) -> Vec<PathBuf> {
        server.roots.read().unwrap().clone()
    }

    #[tokio::test]
    async fn test_advertises_commands() {
        let dir = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let result = service.inner().initialize(with_folder(dir.path())).await.unwrap();
        let commands = result.capabilities.execute_command_provider.unwrap().commands;
        assert_eq!(
            commands,
            vec![RESCAN_COMMAND, LIST_ACTIONS_COMMAND, LIST_DECISIONS_COMMAND]
        );
    }

    #[tokio::test]
    async fn test_rescan_reports_indexed_files() {
        let dir = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        initialize(server, with_folder(dir.path())).await;

        fs::write(dir.path().join("actions/dribble.py"), "class Dribble:\n    pass\n").unwrap();
        let result = command(server, RESCAN_COMMAND).await.unwrap();
        assert_eq!(result, Some(json!({ "indexedFiles": 3 })));
    }

    #[tokio::test]
    async fn test_list_actions_and_decisions() {
        let dir = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        initialize(server, with_folder(dir.path())).await;

        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["KickBall"])));
        let decisions = command(server, LIST_DECISIONS_COMMAND).await.unwrap();
        assert_eq!(decisions, Some(json!(["BallSeen"])));
    }

    #[tokio::test]
    async fn test_unknown_command_is_invalid_params() {
        let dir = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        initialize(server, with_folder(dir.path())).await;

        let err = command(server, "dsd.frobnicate").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert!(err.message.contains("dsd.frobnicate"));
    }

    #[tokio::test]
    async fn test_open_python_document_overrides_disk() {
        let dir = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        initialize(server, with_folder(dir.path())).await;
        let uri = Url::from_file_path(dir.path().join("actions/kick.py")).unwrap();

        server
            .did_open(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.clone(),
                    language_id: "python".to_string(),
                    version: 1,
                    text: "class DribbleBall(AbstractActionElement):\n    pass\n".to_string(),
                },
            })
            .await;
        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["DribbleBall"])));

        server
            .did_change(DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version: 2,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: "class PassBall(AbstractActionElement):\n    pass\n".to_string(),
                }],
            })
            .await;
        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["PassBall"])));

        // A rescan reads the disk but keeps the edited text
        command(server, RESCAN_COMMAND).await.unwrap();
        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["PassBall"])));

        server
            .did_close(DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
            })
            .await;
        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["KickBall"])));
    }

    #[tokio::test]
    async fn test_roots_from_workspace_settings() {
        let configured = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        let params = InitializeParams {
            initialization_options: Some(json!({
                "settings": [{ "workspace": folder_uri(configured.path()) }],
                "globalSettings": {}
            })),
            ..Default::default()
        };
        initialize(server, params).await;

        assert_eq!(roots(server), vec![configured.path().to_path_buf()]);
        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["KickBall"])));
    }

    #[tokio::test]
    async fn test_roots_from_workspace_folders() {
        let folder = workspace();
        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        initialize(server, with_folder(folder.path())).await;

        // No settings: the folder is indexed, not the current directory
        assert_eq!(roots(server), vec![folder.path().to_path_buf()]);
        let result = command(server, RESCAN_COMMAND).await.unwrap();
        assert_eq!(result, Some(json!({ "indexedFiles": 2 })));
    }

    #[tokio::test]
    async fn test_settings_and_folders_are_combined() {
        let configured = workspace();
        let folder = tempfile::tempdir().unwrap();
        fs::create_dir_all(folder.path().join("actions")).unwrap();
        fs::write(folder.path().join("actions/pass.py"), "class PassBall:\n    pass\n").unwrap();

        let (service, _) = LspService::new(DsdLanguageServer::new);
        let server = service.inner();
        let mut params = with_folder(folder.path());
        params.initialization_options = Some(json!({
            "settings": [{ "workspace": folder_uri(configured.path()) }]
        }));
        initialize(server, params).await;

        assert_eq!(roots(server).len(), 2);
        let actions = command(server, LIST_ACTIONS_COMMAND).await.unwrap();
        assert_eq!(actions, Some(json!(["KickBall", "PassBall"])));
    }
}
