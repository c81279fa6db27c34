//! Spawned worker process with line-oriented stdio.
//!
//! One supervisor task per process owns the `Child`. It waits for either a
//! natural exit or a stop request, drains the output readers, and only then
//! emits [`WorkerOutput::Exited`], so every line the worker printed is
//! delivered before its exit.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use deck_core::BridgeError;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::WorkerChannel;
use crate::spec::WorkerSpec;

/// Upper bound on waiting for stdout/stderr to reach EOF after the child
/// exits. A grandchild holding the pipes open must not stall exit reporting.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the worker produces, in emission order per stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerOutput {
    Stdout(String),
    Stderr(String),
    /// Raised exactly once per started process. `code` is `None` when the
    /// process was terminated by a signal.
    Exited { code: Option<i32> },
}

struct Running {
    generation: u64,
    pid: Option<u32>,
    /// `None` once stop has been requested; dropping it closes the worker's stdin.
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
    stop_tx: Option<oneshot::Sender<()>>,
    exited_rx: watch::Receiver<bool>,
}

#[derive(Default)]
struct Slot {
    running: Option<Running>,
    generation: u64,
}

/// Handle owning at most one live worker process.
pub struct WorkerProcess {
    slot: Arc<Mutex<Slot>>,
    output_tx: mpsc::UnboundedSender<WorkerOutput>,
}

impl WorkerProcess {
    pub fn new(output_tx: mpsc::UnboundedSender<WorkerOutput>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            output_tx,
        }
    }

    /// Handle plus the receiving end of its output stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerOutput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn start(&self, spec: &WorkerSpec) -> Result<Option<u32>, BridgeError> {
        let mut slot = self.slot.lock();
        if let Some(running) = slot.running.as_ref() {
            return Err(BridgeError::AlreadyRunning { pid: running.pid });
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {e}", spec.program)))?;
        let pid = child.id();

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(BridgeError::Spawn("worker stdio was not captured".into()));
        };

        slot.generation += 1;
        let generation = slot.generation;

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);

        tokio::spawn(write_stdin(stdin, stdin_rx));
        let readers = vec![
            tokio::spawn(read_lines(
                stdout,
                spec.max_line_bytes,
                WorkerOutput::Stdout,
                self.output_tx.clone(),
                "stdout",
            )),
            tokio::spawn(read_lines(
                stderr,
                spec.max_line_bytes,
                WorkerOutput::Stderr,
                self.output_tx.clone(),
                "stderr",
            )),
        ];

        tokio::spawn(supervise(Supervised {
            child,
            pid,
            generation,
            stop_rx,
            grace: spec.stop_grace,
            readers,
            slot: Arc::clone(&self.slot),
            output_tx: self.output_tx.clone(),
            exited_tx,
        }));

        slot.running = Some(Running {
            generation,
            pid,
            stdin_tx: Some(stdin_tx),
            stop_tx: Some(stop_tx),
            exited_rx,
        });

        info!(?pid, command = %spec.display_command(), "worker started");
        Ok(pid)
    }

    /// Write one line to the worker's stdin.
    pub fn send(&self, line: &str) -> Result<(), BridgeError> {
        if line.contains('\n') {
            return Err(BridgeError::Io("outbound line contains a newline".into()));
        }
        let slot = self.slot.lock();
        let tx = slot
            .running
            .as_ref()
            .and_then(|r| r.stdin_tx.as_ref())
            .ok_or(BridgeError::NotRunning)?;
        tx.send(format!("{line}\n"))
            .map_err(|_| BridgeError::NotRunning)
    }

    /// Ask the worker to exit: close stdin, then kill after the grace period.
    ///
    /// Idempotent. Returns whether this call initiated the stop; `false`
    /// means nothing was running or a stop is already under way, which is
    /// not a failure.
    pub fn stop(&self) -> bool {
        let mut slot = self.slot.lock();
        let Some(running) = slot.running.as_mut() else {
            return false;
        };
        let Some(stop_tx) = running.stop_tx.take() else {
            return false;
        };
        running.stdin_tx = None;
        debug!(pid = ?running.pid, "stopping worker");
        let _ = stop_tx.send(());
        true
    }

    /// [`stop`](Self::stop), then wait up to `timeout` for the exit to be
    /// reported. Returns `true` when no process is left running.
    pub async fn stop_and_wait(&self, timeout: Duration) -> bool {
        let exited_rx = {
            let slot = self.slot.lock();
            slot.running.as_ref().map(|r| r.exited_rx.clone())
        };
        let Some(mut exited_rx) = exited_rx else {
            return true;
        };
        self.stop();
        let exited = matches!(
            tokio::time::timeout(timeout, exited_rx.wait_for(|exited| *exited)).await,
            Ok(Ok(_))
        );
        exited
    }

    /// Stop was requested but the exit has not been collected yet. While
    /// stopping, [`is_running`](Self::is_running) is `false` and
    /// [`start`](Self::start) still fails with `AlreadyRunning`.
    pub fn is_stopping(&self) -> bool {
        self.slot
            .lock()
            .running
            .as_ref()
            .is_some_and(|r| r.stdin_tx.is_none())
    }

    /// Live and accepting input (stop not yet requested).
    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .running
            .as_ref()
            .is_some_and(|r| r.stdin_tx.is_some())
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot.lock().running.as_ref().and_then(|r| r.pid)
    }
}

impl WorkerChannel for WorkerProcess {
    fn is_running(&self) -> bool {
        WorkerProcess::is_running(self)
    }

    fn send_line(&self, line: &str) -> Result<(), BridgeError> {
        self.send(line)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Supervised {
    child: Child,
    pid: Option<u32>,
    generation: u64,
    stop_rx: oneshot::Receiver<()>,
    grace: Duration,
    readers: Vec<JoinHandle<()>>,
    slot: Arc<Mutex<Slot>>,
    output_tx: mpsc::UnboundedSender<WorkerOutput>,
    exited_tx: watch::Sender<bool>,
}

async fn supervise(mut s: Supervised) {
    let pid = s.pid;
    let status = tokio::select! {
        status = s.child.wait() => status,
        _ = &mut s.stop_rx => {
            match tokio::time::timeout(s.grace, s.child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(?pid, grace = ?s.grace, "worker ignored stdin close, killing");
                    if let Err(e) = s.child.start_kill() {
                        warn!(?pid, error = %e, "failed to kill worker");
                    }
                    s.child.wait().await
                }
            }
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(?pid, error = %e, "failed to collect worker exit status");
            None
        }
    };

    for reader in s.readers {
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            warn!(?pid, "worker output still open after exit, abandoning reader");
        }
    }

    {
        let mut slot = s.slot.lock();
        if slot
            .running
            .as_ref()
            .is_some_and(|r| r.generation == s.generation)
        {
            slot.running = None;
        }
    }

    info!(?pid, ?code, "worker exited");
    let _ = s.output_tx.send(WorkerOutput::Exited { code });
    let _ = s.exited_tx.send(true);
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(error = %e, "worker stdin write failed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!(error = %e, "worker stdin flush failed");
            break;
        }
    }
}

/// Forward newline-delimited output. Bytes are decoded lossily so a stray
/// non-UTF-8 byte cannot end the stream.
///
/// At most `max_line_bytes` plus the line terminator is buffered per line.
/// Longer lines are skipped through to their newline without being stored.
async fn read_lines<R>(
    stream: R,
    max_line_bytes: usize,
    wrap: fn(String) -> WorkerOutput,
    tx: mpsc::UnboundedSender<WorkerOutput>,
    stream_name: &'static str,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    // Room for the line plus "\r\n".
    let limit = (max_line_bytes as u64).saturating_add(2);
    loop {
        buf.clear();
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                let terminated = buf.last() == Some(&b'\n');
                if !terminated && buf.len() as u64 >= limit {
                    match skip_line(&mut reader).await {
                        Ok(rest) => warn!(
                            stream = stream_name,
                            len = buf.len() + rest,
                            "dropping oversized worker line"
                        ),
                        Err(e) => {
                            warn!(stream = stream_name, error = %e, "worker output read failed");
                            break;
                        }
                    }
                    continue;
                }
                if terminated {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                if buf.len() > max_line_bytes {
                    warn!(stream = stream_name, len = buf.len(), "dropping oversized worker line");
                    continue;
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(stream = stream_name, error = %e, "worker output read failed");
                break;
            }
        }
    }
}

/// Consume input up to and including the next newline (or EOF) without
/// keeping it. Returns the number of bytes discarded.
async fn skip_line<R>(reader: &mut BufReader<R>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let (used, done) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(skipped);
            }
            match chunk.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (chunk.len(), false),
            }
        };
        reader.consume(used);
        skipped += used;
        if done {
            return Ok(skipped);
        }
    }
}
