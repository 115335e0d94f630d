//! Interactive prompts on the terminal.
//!
//! Questions are printed to stderr one at a time. The next input line is
//! routed to the pending question instead of being parsed as a host event;
//! a later question waits until the current one is answered.

use std::sync::Mutex;

use async_trait::async_trait;
use dsd_supervisor::{CommandPicker, Notifier};
use tokio::sync::oneshot;

#[derive(Default)]
pub struct ConsolePrompt {
    turn: tokio::sync::Mutex<()>,
    pending: Mutex<Option<oneshot::Sender<String>>>,
}

impl ConsolePrompt {
    /// Hand `line` to a waiting question. Returns false if none is waiting.
    pub fn answer(&self, line: &str) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        match pending {
            Some(sender) => sender.send(line.trim().to_string()).is_ok(),
            None => false,
        }
    }

    async fn ask(&self, question: &str) -> Option<String> {
        let _turn = self.turn.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        eprintln!("{}", question);
        rx.await.ok()
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Resolve an answer to one of `commands`, by number or by name.
fn choose(commands: &[String], answer: &str) -> Option<String> {
    if let Ok(index) = answer.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| commands.get(i)).cloned();
    }
    commands.iter().find(|c| *c == answer).cloned()
}

#[async_trait]
impl Notifier for ConsolePrompt {
    async fn confirm(&self, message: &str, action: &str) -> bool {
        let question = format!("{}\n{}? [y/N]", message, action);
        self.ask(&question).await.is_some_and(|a| is_yes(&a))
    }
}

#[async_trait]
impl CommandPicker for ConsolePrompt {
    async fn pick(&self, commands: &[String]) -> Option<String> {
        let mut question = String::from("Select a command to execute:");
        for (i, command) in commands.iter().enumerate() {
            question.push_str(&format!("\n  {}) {}", i + 1, command));
        }
        let answer = self.ask(&question).await?;
        let picked = choose(commands, &answer);
        if picked.is_none() && !answer.is_empty() {
            log::warn!("'{}' is not one of the listed commands", answer);
        }
        picked
    }
}
