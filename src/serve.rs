//! JSON-lines IPC loop standing in for the desktop window.
//!
//! stdin:  `{"command": "...", "payload": ..., "ticket": ...}` per line
//! stdout: `{"ticket": ..., "response": ...}` per handled command, and
//!         `{"event": {...}}` for every bridge event

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use deck_bridge::commands::error_reply;
use deck_bridge::Bridge;
use deck_core::BridgeEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct IncomingCommand {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
    /// Echoed back so the caller can match responses to commands.
    #[serde(default)]
    pub ticket: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutgoingLine<'a> {
    Response { ticket: Value, response: Value },
    Event { event: &'a BridgeEvent },
}

pub async fn run(bridge: Arc<Bridge>) -> Result<()> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!("stdout closed, dropping output");
                break;
            }
        }
    });

    let forwarder = tokio::spawn(forward_events(bridge.subscribe(), out_tx.clone()));

    let pid = bridge.start().context("Failed to start worker")?;
    info!(?pid, "agentdeck serving on stdin/stdout");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    dispatch_line(&bridge, &line, &out_tx);
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }

    bridge.teardown().await;
    forwarder.abort();
    drop(out_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        warn!("pending responses were not written before shutdown");
    }
    Ok(())
}

/// Handle one stdin line on its own task so slow commands do not block
/// the ones behind them.
fn dispatch_line(bridge: &Arc<Bridge>, line: &str, out_tx: &mpsc::UnboundedSender<String>) {
    let incoming: IncomingCommand = match serde_json::from_str(line) {
        Ok(incoming) => incoming,
        Err(e) => {
            warn!(error = %e, "unparseable command line");
            send(
                out_tx,
                &OutgoingLine::Response {
                    ticket: Value::Null,
                    response: error_reply(format!("Invalid command line: {e}")),
                },
            );
            return;
        }
    };

    let bridge = Arc::clone(bridge);
    let out_tx = out_tx.clone();
    tokio::spawn(async move {
        debug!(command = %incoming.command, "handling command");
        let response = bridge.handle(&incoming.command, incoming.payload).await;
        send(
            &out_tx,
            &OutgoingLine::Response {
                ticket: incoming.ticket,
                response,
            },
        );
    });
}

async fn forward_events(
    mut rx: broadcast::Receiver<BridgeEvent>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => send(&out_tx, &OutgoingLine::Event { event: &event }),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event forwarder lagged, dropped events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn send(out_tx: &mpsc::UnboundedSender<String>, line: &OutgoingLine<'_>) {
    match serde_json::to_string(line) {
        Ok(json) => {
            let _ = out_tx.send(json);
        }
        Err(e) => warn!(error = %e, "failed to serialize output line"),
    }
}
