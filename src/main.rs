use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_relay::traits::{SinkError, UiSink};
use chat_relay::{ChatRelay, RelayConfig, TurnRequest, TurnStatus, UiUpdate};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SESSION_ID: &str = "cli";

/// Prints the part of each update not yet on screen.
#[derive(Default)]
struct TerminalSink {
    printed: Mutex<usize>,
}

#[async_trait]
impl UiSink for TerminalSink {
    async fn notify(&self, update: UiUpdate) -> std::result::Result<(), SinkError> {
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        let mut stdout = std::io::stdout().lock();
        if let Some(delta) = update.text.get(*printed..) {
            write!(stdout, "{}", delta).map_err(|_| SinkError::Disconnected)?;
            *printed = update.text.len();
        }
        match &update.status {
            TurnStatus::Streaming => {}
            TurnStatus::Complete => writeln!(stdout).map_err(|_| SinkError::Disconnected)?,
            TurnStatus::Stopped => {
                writeln!(stdout, "\n[stopped by user]").map_err(|_| SinkError::Disconnected)?
            }
            TurnStatus::Failed { message } => {
                writeln!(stdout, "\n[{}]", message).map_err(|_| SinkError::Disconnected)?
            }
        }
        stdout.flush().map_err(|_| SinkError::Disconnected)
    }
}

fn main() -> Result<()> {
    // Handle --version flag before any initialization
    if std::env::args().any(|arg| arg == "--version") {
        println!("chat-relay {}", VERSION);
        std::process::exit(0);
    }

    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: chat-relay <message>");
        std::process::exit(2);
    }

    let config = RelayConfig::from_env()?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async move {
        let relay = ChatRelay::with_reqwest(config)?;

        let interrupt = {
            let relay = relay.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    relay.cancel_turn(SESSION_ID);
                }
            })
        };

        let report = relay
            .submit_turn(SESSION_ID, TurnRequest::new(prompt), Arc::new(TerminalSink::default()))
            .await;
        interrupt.abort();
        relay.shutdown().await;
        let report = report?;

        eprintln!(
            "{} payloads, {} attempt(s), {} ms",
            report.payloads,
            report.attempts,
            (report.finished_at - report.started_at).num_milliseconds()
        );
        if let TurnStatus::Failed { .. } = report.status {
            std::process::exit(1);
        }
        Ok::<(), color_eyre::Report>(())
    })
}
