//! Routes worker output: correlated replies go to the registry, everything
//! else is broadcast to passive listeners.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deck_core::envelope::reply_result;
use deck_core::{classify_line, BridgeError, BridgeEvent, Diagnostic, InboundLine};
use deck_telemetry::record_diagnostic;
use deck_worker::WorkerOutput;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::CorrelationRegistry;

pub struct Router {
    registry: Arc<CorrelationRegistry>,
    events: broadcast::Sender<BridgeEvent>,
    ready: Arc<AtomicBool>,
    fail_pending_on_exit: bool,
}

impl Router {
    pub fn new(
        registry: Arc<CorrelationRegistry>,
        events: broadcast::Sender<BridgeEvent>,
        ready: Arc<AtomicBool>,
        fail_pending_on_exit: bool,
    ) -> Self {
        Self {
            registry,
            events,
            ready,
            fail_pending_on_exit,
        }
    }

    /// Consume worker output until the channel closes.
    pub fn start(self, mut rx: mpsc::UnboundedReceiver<WorkerOutput>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(output) = rx.recv().await {
                self.handle(output);
            }
            debug!("worker output channel closed, router stopping");
        })
    }

    pub fn handle(&self, output: WorkerOutput) {
        match output {
            WorkerOutput::Stdout(line) => self.handle_stdout(&line),
            WorkerOutput::Stderr(line) => {
                if line.trim().is_empty() {
                    return;
                }
                let diag = Diagnostic::error(line);
                record_diagnostic(&diag);
                self.emit(BridgeEvent::Diagnostic(diag));
            }
            WorkerOutput::Exited { code } => self.handle_exit(code),
        }
    }

    fn handle_stdout(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match classify_line(line) {
            InboundLine::Ready { message } => {
                self.ready.store(true, Ordering::SeqCst);
                info!("worker ready");
                self.emit(BridgeEvent::Ready { message });
            }
            InboundLine::Result { id, result, message } => {
                if let Some(id) = id.as_deref() {
                    self.registry.resolve(id, reply_result(&message));
                }
                self.emit(BridgeEvent::AgentResult { id, result });
            }
            InboundLine::Reply { id, message } => {
                if !self.registry.resolve(&id, reply_result(&message)) {
                    debug!(request_id = %id, "reply matched no pending request");
                    self.emit(BridgeEvent::Message { message });
                }
            }
            InboundLine::Notice { message } => self.emit(BridgeEvent::Message { message }),
            InboundLine::Diagnostic(diag) => {
                record_diagnostic(&diag);
                self.emit(BridgeEvent::Diagnostic(diag));
            }
        }
    }

    fn handle_exit(&self, code: Option<i32>) {
        self.ready.store(false, Ordering::SeqCst);
        let err = BridgeError::WorkerExited { code };

        if code != Some(0) {
            let diag = Diagnostic::error(err.to_string());
            record_diagnostic(&diag);
            self.emit(BridgeEvent::Diagnostic(diag));
        }
        self.emit(BridgeEvent::WorkerExited { code });

        if self.fail_pending_on_exit {
            let failed = self.registry.fail_all(&err);
            if failed > 0 {
                warn!(failed, ?code, "rejected pending requests after worker exit");
            }
        }
    }

    fn emit(&self, event: BridgeEvent) {
        // No subscribers is normal when nothing is displaying output.
        let _ = self.events.send(event);
    }
}
