//! Process-wide bridge: owns the worker, the registry and the router, and
//! ties them to an explicit `init`/`teardown` lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deck_core::{BridgeError, BridgeEvent, Diagnostic};
use deck_settings::AgentdeckSettings;
use deck_telemetry::record_diagnostic;
use deck_worker::{WorkerProcess, WorkerSpec};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::CommandSurface;
use crate::configs::ConfigStore;
use crate::dispatch::Dispatcher;
use crate::registry::CorrelationRegistry;
use crate::router::Router;

/// Extra time teardown allows beyond the stop grace for the exit to surface.
const TEARDOWN_SLACK: Duration = Duration::from_secs(2);

pub struct Bridge {
    settings: AgentdeckSettings,
    worker: Arc<WorkerProcess>,
    events: broadcast::Sender<BridgeEvent>,
    ready: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    surface: CommandSurface,
    router: Mutex<Option<JoinHandle<()>>>,
    handshake: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Bridge {
    /// Wire up the bridge without starting the worker. Must be called from
    /// within a tokio runtime.
    pub fn new(settings: AgentdeckSettings) -> Self {
        let (output_tx, output_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = Arc::new(WorkerProcess::new(output_tx));
        let registry = Arc::new(CorrelationRegistry::new());
        let (events, _) = broadcast::channel(settings.bridge.event_capacity);
        let ready = Arc::new(AtomicBool::new(false));

        let router = Router::new(
            Arc::clone(&registry),
            events.clone(),
            Arc::clone(&ready),
            settings.bridge.fail_pending_on_exit,
        )
        .start(output_rx);

        let dispatcher = Dispatcher::new(worker.clone(), registry);
        let surface = CommandSurface::new(
            dispatcher.clone(),
            ConfigStore::new(&settings.storage.configs_dir),
            settings.timeouts.long_request(),
            settings.timeouts.short_request(),
        );

        Self {
            settings,
            worker,
            events,
            ready,
            dispatcher,
            surface,
            router: Mutex::new(Some(router)),
            handshake: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Build the bridge and start the worker.
    pub fn init(settings: AgentdeckSettings) -> Result<Self, BridgeError> {
        let bridge = Self::new(settings);
        bridge.start()?;
        Ok(bridge)
    }

    /// Spawn the worker and schedule the init handshake.
    ///
    /// Fails with `AlreadyRunning` until a stopped worker's exit has been
    /// collected, and with `Closed` after [`teardown`](Self::teardown).
    pub fn start(&self) -> Result<Option<u32>, BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        let spec = worker_spec(&self.settings);
        let pid = match self.worker.start(&spec) {
            Ok(pid) => pid,
            Err(e) => {
                if matches!(e, BridgeError::Spawn(_)) {
                    let diag = Diagnostic::error(format!("Process error: {e}"));
                    record_diagnostic(&diag);
                    let _ = self.events.send(BridgeEvent::Diagnostic(diag));
                }
                return Err(e);
            }
        };

        let _ = self.events.send(BridgeEvent::WorkerStarted { pid });
        self.schedule_handshake();
        Ok(pid)
    }

    fn schedule_handshake(&self) {
        let delay = self.settings.timeouts.init_delay();
        let dispatcher = self.dispatcher.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let data = json!({ "timestamp": chrono::Utc::now().timestamp_millis() });
            match dispatcher.fire_and_forget("init", Some(data)) {
                Ok(()) => debug!("init handshake sent"),
                Err(e) => debug!(error = %e, "init handshake skipped"),
            }
        });
        if let Some(previous) = self.handshake.lock().replace(task) {
            previous.abort();
        }
    }

    /// Ask the worker to exit. Outstanding requests are settled by the exit.
    /// With nothing running this does nothing.
    pub fn stop(&self) {
        self.abort_handshake();
        self.ready.store(false, Ordering::SeqCst);
        if !self.worker.stop() {
            debug!("stop requested with no live worker");
        }
    }

    /// Stop the worker, wait for its exit to be routed, then stop the router.
    /// The bridge cannot be started again afterwards.
    pub async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.abort_handshake();
        self.ready.store(false, Ordering::SeqCst);

        let mut events = self.events.subscribe();
        let had_worker = self.worker.pid().is_some();
        let bound = self.settings.timeouts.stop_grace() + TEARDOWN_SLACK;

        if !self.worker.stop_and_wait(bound).await {
            warn!(?bound, "worker did not exit during teardown");
        } else if had_worker {
            let routed = tokio::time::timeout(TEARDOWN_SLACK, async {
                loop {
                    match events.recv().await {
                        Ok(BridgeEvent::WorkerExited { .. }) => break,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
            .await;
            if routed.is_err() {
                warn!("worker exit was not routed before teardown finished");
            }
        }

        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        info!("bridge torn down");
    }

    fn abort_handshake(&self) {
        if let Some(task) = self.handshake.lock().take() {
            task.abort();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// The worker answered the init handshake and has not exited since.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// A stop was requested and the worker's exit is still outstanding.
    pub fn is_stopping(&self) -> bool {
        self.worker.is_stopping()
    }

    pub fn pid(&self) -> Option<u32> {
        self.worker.pid()
    }

    pub fn settings(&self) -> &AgentdeckSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn commands(&self) -> &CommandSurface {
        &self.surface
    }

    /// Run one UI command. Always answers with a JSON value.
    pub async fn handle(&self, command: &str, payload: Value) -> Value {
        self.surface.handle(command, payload).await
    }
}

/// Launch description for the worker derived from settings.
pub fn worker_spec(settings: &AgentdeckSettings) -> WorkerSpec {
    let worker = &settings.worker;
    let mut spec = WorkerSpec::new(&worker.program)
        .args(worker.args())
        .stop_grace(settings.timeouts.stop_grace())
        .max_line_bytes(settings.bridge.max_line_bytes);
    for (key, value) in worker.env_vars() {
        spec = spec.env(key, value);
    }
    if let Some(dir) = &worker.working_dir {
        spec = spec.working_dir(dir);
    }
    spec
}
