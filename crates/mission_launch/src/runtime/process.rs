//! Managed process abstraction

use crate::config::ReadySignal;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

/// Event reported by a supervised unit, keyed by unit id on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    /// Process spawned (includes have no pid)
    Started { pid: Option<u32> },
    /// Readiness signal observed
    Ready,
    /// Output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Unit finished; `None` means terminated by a signal or stop request
    Exited { code: Option<i32> },
    /// Unit could not run to completion
    Failed { error: String },
}

pub type EventSender = mpsc::UnboundedSender<(String, UnitEvent)>;

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Unit id, used as the event key
    pub id: String,
    /// Log label (unit id prefixed with the include scope)
    pub label: String,
    /// Executable path or name
    pub executable: PathBuf,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    /// When the process counts as ready
    pub ready: ReadySignal,
}

/// A managed child process
pub struct ManagedProcess {
    config: ProcessConfig,
    ready_pattern: Option<Regex>,
    ready: Arc<AtomicBool>,
    pid: Option<u32>,
    started_at: Option<Instant>,
    child: Option<Child>,
    event_tx: EventSender,
}

impl ManagedProcess {
    /// Create a new managed process
    pub fn new(config: ProcessConfig, event_tx: EventSender) -> Result<Self, ProcessError> {
        let ready_pattern = match &config.ready {
            ReadySignal::Pattern { regex } => {
                Some(Regex::new(regex).map_err(|e| ProcessError::InvalidPattern {
                    name: config.label.clone(),
                    source: e,
                })?)
            }
            _ => None,
        };

        Ok(Self {
            config,
            ready_pattern,
            ready: Arc::new(AtomicBool::new(false)),
            pid: None,
            started_at: None,
            child: None,
            event_tx,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send(&self, event: UnitEvent) {
        let _ = self.event_tx.send((self.config.id.clone(), event));
    }

    fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            self.send(UnitEvent::Ready);
        }
    }

    /// Spawn the process. Spawn errors are returned, not just reported.
    pub fn start(&mut self) -> Result<u32, ProcessError> {
        if self.child.is_some() {
            return Err(ProcessError::AlreadyRunning(self.config.label.clone()));
        }

        log::info!(
            "[{}] Starting: {} {}",
            self.config.label,
            self.config.executable.display(),
            self.config.args.join(" ")
        );

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            name: self.config.label.clone(),
            source: e,
        })?;

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.started_at = Some(Instant::now());
        self.send(UnitEvent::Started { pid: Some(pid) });

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, true);
        }

        if self.config.ready == ReadySignal::Started {
            self.mark_ready();
        }

        self.child = Some(child);
        Ok(pid)
    }

    fn spawn_reader<R>(&self, stream: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let id = self.config.id.clone();
        let tx = self.event_tx.clone();
        let pattern = self.ready_pattern.clone();
        let ready = self.ready.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let matched = pattern.as_ref().is_some_and(|p| p.is_match(&line));
                let _ = tx.send((id.clone(), UnitEvent::Output { line, is_stderr }));
                if matched && !ready.swap(true, Ordering::SeqCst) {
                    let _ = tx.send((id.clone(), UnitEvent::Ready));
                }
            }
        });
    }

    /// Supervise the started process until it exits or a stop is requested.
    ///
    /// On stop the process gets SIGTERM and is killed once `grace` elapses.
    /// Always reports a terminal event before returning.
    pub async fn run(
        mut self,
        mut stop_rx: watch::Receiver<()>,
        grace: Duration,
    ) -> Result<Option<i32>, ProcessError> {
        let Some(mut child) = self.child.take() else {
            let error = ProcessError::NotRunning(self.config.label.clone());
            self.send(UnitEvent::Failed {
                error: error.to_string(),
            });
            return Err(error);
        };

        enum Next {
            Exited(std::io::Result<ExitStatus>),
            ReadyDelayElapsed,
            Stop,
        }

        let mut ready_delay = match self.config.ready {
            ReadySignal::Delay { ms } => Some(Duration::from_millis(ms)),
            _ => None,
        };

        let result = loop {
            let delay = ready_delay;
            let next = tokio::select! {
                status = child.wait() => Next::Exited(status),
                _ = sleep_or_pending(delay) => Next::ReadyDelayElapsed,
                _ = stop_requested(&mut stop_rx) => Next::Stop,
            };

            match next {
                Next::Exited(status) => break status,
                Next::ReadyDelayElapsed => {
                    ready_delay = None;
                    log::debug!("[{}] Ready after {:?}", self.config.label, delay);
                    self.mark_ready();
                }
                Next::Stop => break self.terminate(&mut child, grace).await,
            }
        };

        match result {
            Ok(status) => {
                let code = status.code();
                log_exit(&self.config.label, &status, self.started_at);
                if code == Some(0) && self.config.ready == ReadySignal::Exited {
                    self.mark_ready();
                }
                self.send(UnitEvent::Exited { code });
                Ok(code)
            }
            Err(e) => {
                log::error!("[{}] Error waiting for process: {}", self.config.label, e);
                let error = ProcessError::Wait {
                    name: self.config.label.clone(),
                    source: e,
                };
                self.send(UnitEvent::Failed {
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Stop gracefully (SIGTERM), then SIGKILL after the grace period
    async fn terminate(&self, child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
        log::info!("[{}] Stopping process...", self.config.label);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    log::debug!("[{}] SIGTERM failed: {}", self.config.label, e);
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit within {:?}, forcing kill",
                    self.config.label,
                    grace
                );
                child.kill().await?;
                child.wait().await
            }
        }
    }
}

async fn sleep_or_pending(delay: Option<Duration>) {
    match delay {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Resolves once a stop is broadcast. A dropped sender never resolves.
pub(crate) async fn stop_requested(rx: &mut watch::Receiver<()>) {
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn log_exit(label: &str, status: &ExitStatus, started_at: Option<Instant>) {
    let uptime = started_at.map(|t| t.elapsed()).unwrap_or_default();

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            log::info!("[{}] Process terminated by signal {} after {:?}", label, signal, uptime);
            return;
        }
    }

    log::info!(
        "[{}] Process exited with code: {:?} after {:?}",
        label,
        status.code(),
        uptime
    );
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for process '{name}': {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ready pattern for '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Process '{0}' is not running")]
    NotRunning(String),
}
