//! Language Server Protocol implementation for DSD.
//!
//! This crate provides an LSP server for the Dynamic Stack Decider
//! behavior language that can be used by any editor supporting the
//! Language Server Protocol.
//!
//! Features:
//! - Auto-completion for actions (`@`), decisions (`$`) and subtrees (`#`)
//! - Hover documentation taken from the implementing Python classes
//! - Go-to-definition for entry points, actions, decisions and subtrees
//! - Find-references for subtrees

pub mod analysis;
mod backend;
pub mod completion;
pub mod definition;
pub mod document;
pub mod hover;
pub mod python_index;
pub mod settings;

pub use backend::{
    DsdLanguageServer, LIST_ACTIONS_COMMAND, LIST_DECISIONS_COMMAND, RESCAN_COMMAND,
};

use tokio::net::TcpListener;
use tower_lsp::{LspService, Server};

/// Default address for the TCP transport.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default port for the TCP transport.
pub const DEFAULT_PORT: u16 = 8085;

/// Run the LSP server over stdio.
///
/// This function blocks until the client disconnects.
pub async fn run_lsp_server() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(DsdLanguageServer::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

/// Run the LSP server over TCP, serving a single client connection.
///
/// This function blocks until the client disconnects.
pub async fn run_tcp_server(host: &str, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    log::info!("Server starting on {}:{}", host, port);

    let (stream, peer) = listener.accept().await?;
    log::info!("Client connected from {}", peer);
    let (read, write) = tokio::io::split(stream);

    let (service, socket) = LspService::new(DsdLanguageServer::new);
    Server::new(read, write, socket).serve(service).await;

    Ok(())
}
