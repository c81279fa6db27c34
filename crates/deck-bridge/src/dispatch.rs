//! Dispatch facade: builds envelopes, registers them and awaits replies.

use std::sync::Arc;
use std::time::Duration;

use deck_core::{BridgeError, OutboundEnvelope, RequestId};
use deck_worker::WorkerChannel;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::registry::CorrelationRegistry;

#[derive(Clone)]
pub struct Dispatcher {
    worker: Arc<dyn WorkerChannel>,
    registry: Arc<CorrelationRegistry>,
}

impl Dispatcher {
    pub fn new(worker: Arc<dyn WorkerChannel>, registry: Arc<CorrelationRegistry>) -> Self {
        Self { worker, registry }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Send `action` and wait for the correlated reply's `result`.
    ///
    /// The id is taken from `data.id` when that is a non-empty string,
    /// otherwise a fresh one is generated.
    pub async fn invoke(
        &self,
        action: &str,
        data: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let id = RequestId::from_value_or_new(data.as_ref().and_then(|d| d.get("id")));
        self.invoke_with_id(action, data, id, timeout).await
    }

    #[instrument(skip(self, data, id), fields(request_id = %id))]
    pub async fn invoke_with_id(
        &self,
        action: &str,
        data: Option<Value>,
        id: RequestId,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if !self.worker.is_running() {
            return Err(BridgeError::NotRunning);
        }
        let pending = self.registry.register(&id, action)?;

        let sent = OutboundEnvelope::request(action, data, id.clone())
            .to_line()
            .map_err(BridgeError::from)
            .and_then(|line| self.worker.send_line(&line));
        if let Err(e) = sent {
            self.registry.expire(id.as_str());
            return Err(e);
        }

        debug!(?timeout, "request sent");
        self.registry.wait(pending, timeout).await
    }

    /// Send `action` without tracking a reply.
    pub fn fire_and_forget(&self, action: &str, data: Option<Value>) -> Result<(), BridgeError> {
        if !self.worker.is_running() {
            return Err(BridgeError::NotRunning);
        }
        let line = OutboundEnvelope::command(action, data).to_line()?;
        self.worker.send_line(&line)?;
        debug!(action, "command sent");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// In-memory worker that records every line sent to it.
    #[derive(Default)]
    pub struct MockWorker {
        running: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl MockWorker {
        pub fn running() -> Arc<Self> {
            let worker = Self::default();
            worker.running.store(true, Ordering::SeqCst);
            Arc::new(worker)
        }

        pub fn stopped() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_running(&self, running: bool) {
            self.running.store(running, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Value> {
            self.sent
                .lock()
                .iter()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl WorkerChannel for MockWorker {
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn send_line(&self, line: &str) -> Result<(), BridgeError> {
            if !self.is_running() {
                return Err(BridgeError::NotRunning);
            }
            self.sent.lock().push(line.to_string());
            Ok(())
        }
    }

    /// Poll until the mock has seen `n` lines.
    pub async fn wait_for_sent(worker: &MockWorker, n: usize) -> Vec<Value> {
        for _ in 0..1000 {
            let sent = worker.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::task::yield_now().await;
        }
        panic!("mock worker never received {n} lines");
    }
}
