use std::sync::Arc;
use std::time::Duration;

use mcpanel_core::CoreError;
use mcpanel_core::proto::{LogEvent, LogStream, ProcessState, ProcessStatus};
use mcpanel_utils::now_millis;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::launch::LaunchSpec;
use super::logs::LogStore;
use super::metrics::ProcessProbe;
use super::monitor::watch_exit;
use super::state::SupervisorState;

pub(crate) struct Inner {
    pub(crate) launch: LaunchSpec,
    pub(crate) state: Mutex<SupervisorState>,
    // Held across the running-check and the spawn so two starts cannot both spawn.
    start_lock: Mutex<()>,
    pub(crate) logs: LogStore,
    pub(crate) status_tx: broadcast::Sender<ProcessState>,
    probe: Arc<dyn ProcessProbe>,
    stop_grace: Duration,
}

/// Owns the lifecycle of the single supervised server process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(launch: LaunchSpec, logs: LogStore, probe: Arc<dyn ProcessProbe>, stop_grace: Duration) -> Self {
        let (status_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                launch,
                state: Mutex::new(SupervisorState::new()),
                start_lock: Mutex::new(()),
                logs,
                status_tx,
                probe,
                stop_grace,
            }),
        }
    }

    /// Spawn the server unless it is already running. The state flips to
    /// `Running` as soon as the process is spawned; there is no readiness probe.
    pub async fn start(&self) -> Result<(), CoreError> {
        let _start = self.inner.start_lock.lock().await;
        if self.inner.state.lock().await.is_running() {
            debug!("start requested while server is running; ignoring");
            return Ok(());
        }

        let launch = &self.inner.launch;
        let mut child = launch.command().spawn().map_err(|err| {
            CoreError::Process(format!("failed to spawn `{}`: {err}", launch.program))
        })?;

        if let Some(stdout) = child.stdout.take() {
            pump_output(stdout, LogStream::Stdout, self.inner.logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pump_output(stderr, LogStream::Stderr, self.inner.logs.clone());
        }

        let pid = child.id();
        let generation = {
            let mut guard = self.inner.state.lock().await;
            guard.generation += 1;
            guard.state = ProcessState::Running;
            guard.pid = pid;
            guard.stdin = child.stdin.take().map(|stdin| Arc::new(Mutex::new(stdin)));
            guard.started_at_ms = Some(now_millis());
            guard.stop_requested = false;
            guard.generation
        };
        let _ = self.inner.status_tx.send(ProcessState::Running);
        info!("server started: pid={pid:?} cwd={}", launch.cwd.display());

        watch_exit(Arc::clone(&self.inner), child, generation);
        Ok(())
    }

    /// Send SIGTERM and return without waiting for the process to exit.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let pid = {
            let mut guard = self.inner.state.lock().await;
            let Some(pid) = guard.pid.filter(|_| guard.is_running()) else {
                debug!("stop requested while server is not running; ignoring");
                return Ok(());
            };
            guard.stop_requested = true;
            pid
        };

        send_signal(pid, Signal::Term)?;
        info!("sent SIGTERM to server pid={pid}");
        Ok(())
    }

    /// SIGTERM, wait up to `grace` for the exit, then SIGKILL.
    pub async fn stop_and_wait(&self, grace: Duration) -> Result<(), CoreError> {
        let mut status_rx = self.subscribe_status();
        let Some(pid) = self.running_pid().await else {
            return Ok(());
        };

        self.stop().await?;
        if timeout(grace, self.wait_for_exit(&mut status_rx)).await.is_ok() {
            return Ok(());
        }

        warn!("server pid={pid} ignored SIGTERM for {}s; killing", grace.as_secs());
        send_signal(pid, Signal::Kill)?;
        timeout(Duration::from_secs(5), self.wait_for_exit(&mut status_rx))
            .await
            .map_err(|_| CoreError::Process(format!("server pid={pid} did not exit after SIGKILL")))
    }

    pub async fn restart(&self) -> Result<(), CoreError> {
        self.stop_and_wait(self.inner.stop_grace).await?;
        self.start().await
    }

    /// Write one console line to the server's stdin. A child that stops
    /// reading stalls only the writers, not status or stop.
    pub async fn write(&self, cmd: &str) -> Result<(), CoreError> {
        let stdin = self
            .inner
            .state
            .lock()
            .await
            .stdin
            .clone()
            .ok_or_else(|| CoreError::Process("server is not running".into()))?;

        let mut line = cmd.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let mut stdin = stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| CoreError::Process(format!("failed to write to server stdin: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| CoreError::Process(format!("failed to flush server stdin: {err}")))
    }

    pub async fn get_status(&self) -> ProcessStatus {
        let (state, pid, started_at_ms) = {
            let guard = self.inner.state.lock().await;
            (guard.state, guard.pid, guard.started_at_ms)
        };

        let running = state == ProcessState::Running;
        let uptime_ms = match started_at_ms {
            Some(start) if running => now_millis().saturating_sub(start),
            _ => 0,
        };

        // Metrics are best-effort; status must stay available without them.
        let (cpu, mem_mb) = match pid.filter(|_| running) {
            Some(pid) => match self.inner.probe.sample(pid) {
                Ok(sample) => (sample.cpu, sample.memory_bytes / 1024 / 1024),
                Err(err) => {
                    debug!("process metrics unavailable: {err}");
                    (0.0, 0)
                }
            },
            None => (0.0, 0),
        };

        ProcessStatus {
            state,
            pid,
            uptime_ms,
            cpu,
            mem_mb,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.is_running()
    }

    pub fn stop_grace(&self) -> Duration {
        self.inner.stop_grace
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.logs.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ProcessState> {
        self.inner.status_tx.subscribe()
    }

    pub fn tail_logs(&self, lines: usize) -> Vec<LogEvent> {
        self.inner.logs.tail(lines)
    }

    async fn running_pid(&self) -> Option<u32> {
        let guard = self.inner.state.lock().await;
        guard.pid.filter(|_| guard.is_running())
    }

    async fn wait_for_exit(&self, rx: &mut broadcast::Receiver<ProcessState>) {
        loop {
            if !self.is_running().await {
                return;
            }
            match rx.recv().await {
                Ok(ProcessState::Running) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Ok(_) | Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

fn pump_output<R>(reader: R, stream: LogStream, logs: LogStore)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    logs.push(stream, line.trim_end_matches(['\r', '\n']).to_string());
                }
            }
        }
    });
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> Result<(), CoreError> {
    let signo = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, signo) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // Already gone; the exit watcher will settle the state.
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(CoreError::Process(format!("failed to signal pid {pid} with {signal:?}: {err}")))
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: Signal) -> Result<(), CoreError> {
    Err(CoreError::Process(format!(
        "sending {signal:?} to pid {pid} is only supported on unix"
    )))
}
