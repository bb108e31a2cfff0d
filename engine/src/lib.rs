//! The automated opponent.
//!
//! A `SearchEngine` is an asynchronous black box: the session layer sends a
//! position and a thinking budget, and some time later an event comes back
//! with a candidate move or no move. The search itself is CPU-bound and runs
//! on the blocking pool so a long think never stalls the runtime.

pub mod search;

use std::time::Duration;

use rules::CandidateMove;
use tokio::sync::mpsc;

/// Commands sent to the search task.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Search { fen: String, budget: Duration },
    Quit,
}

/// Events received from the search task.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `None` means no legal move was found within the budget.
    SearchResult(Option<CandidateMove>),
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine channel closed")]
    ChannelClosed,
}

/// Handle for communicating with a search task.
pub struct SearchEngine {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
}

impl SearchEngine {
    /// Spawn the search task. `label` shows up in log lines only.
    pub fn spawn(label: impl Into<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        tokio::spawn(run_search_task(label.into(), cmd_rx, event_tx));
        Self { cmd_tx, event_rx }
    }

    pub async fn send_command(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn recv_event(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(EngineCommand::Quit).await;
    }
}

async fn run_search_task(
    label: String,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    tracing::debug!(engine = %label, "search task started");

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            EngineCommand::Search { fen, budget } => {
                let result =
                    tokio::task::spawn_blocking(move || search::search_fen(&fen, budget)).await;
                let event = match result {
                    Ok(Ok(mv)) => EngineEvent::SearchResult(mv),
                    Ok(Err(e)) => EngineEvent::Error(e.to_string()),
                    Err(e) => EngineEvent::Error(format!("search task failed: {e}")),
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            EngineCommand::Quit => break,
        }
    }

    tracing::debug!(engine = %label, "search task exited");
}
