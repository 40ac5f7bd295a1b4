//! Process supervisor - activates a resolved plan and tracks unit lifecycles

use crate::error::LaunchError;
use crate::resolve::PackageLocator;
use crate::runtime::graph::{PlannedUnit, ResolvedPlan, UnitKind};
use crate::runtime::include::{run_include, IncludeTask};
use crate::runtime::process::{stop_requested, ManagedProcess, ProcessConfig, ProcessError, UnitEvent};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Environment variable carrying the unit id into spawned processes
pub const UNIT_ID_ENV: &str = "LAUNCH_UNIT_ID";
/// Environment variable carrying the registration name into spawned processes
pub const NODE_NAME_ENV: &str = "LAUNCH_NODE_NAME";

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Grace period between SIGTERM and SIGKILL
    pub shutdown_timeout: Duration,
    /// Longest time to wait for a dependency to become ready
    pub ready_timeout: Duration,
    /// Maximum include nesting
    pub max_include_depth: usize,
    /// Passed on to included launch files
    pub allow_reregistration: bool,
    /// Current include nesting
    pub depth: usize,
    /// Log prefix for units of this supervisor
    pub scope: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(30),
            max_include_depth: 8,
            allow_reregistration: false,
            depth: 0,
            scope: String::new(),
        }
    }
}

impl SupervisorConfig {
    pub(crate) fn nested(&self, unit: &str) -> Self {
        Self {
            depth: self.depth + 1,
            scope: self.label(unit),
            ..self.clone()
        }
    }

    pub(crate) fn label(&self, unit: &str) -> String {
        if self.scope.is_empty() {
            unit.to_string()
        } else {
            format!("{}/{}", self.scope, unit)
        }
    }
}

/// Lifecycle state of a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum UnitState {
    /// Condition held; not started yet
    Activated,
    /// Condition false or superseded; never started
    Skipped,
    Starting,
    Running,
    /// Finished; `None` when terminated by a signal
    Exited(Option<i32>),
    Failed(String),
    /// Aborted before it was started
    Cancelled,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Skipped | UnitState::Exited(_) | UnitState::Failed(_) | UnitState::Cancelled
        )
    }

    /// Terminal and not a failure
    pub fn is_success(&self) -> bool {
        matches!(self, UnitState::Skipped | UnitState::Exited(Some(0)))
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Activated => write!(f, "activated"),
            UnitState::Skipped => write!(f, "skipped"),
            UnitState::Starting => write!(f, "starting"),
            UnitState::Running => write!(f, "running"),
            UnitState::Exited(Some(code)) => write!(f, "exited with code {}", code),
            UnitState::Exited(None) => write!(f, "terminated by signal"),
            UnitState::Failed(cause) => write!(f, "failed: {}", cause),
            UnitState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone)]
struct UnitRecord {
    state: UnitState,
    ready: bool,
    required: bool,
    pid: Option<u32>,
}

/// How a supervised launch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Every unit reached a terminal state
    Completed,
    /// Shutdown was requested
    Interrupted,
    /// A required unit failed
    Failed { unit: String, cause: String },
}

enum Gate {
    Open,
    Interrupted,
}

/// Drives a [`ResolvedPlan`]: starts units in order, honours readiness
/// edges and stops everything on shutdown.
pub struct Supervisor {
    plan: ResolvedPlan,
    locator: Arc<PackageLocator>,
    config: SupervisorConfig,
    records: IndexMap<String, UnitRecord>,
    tasks: JoinSet<()>,
    stop_tx: watch::Sender<()>,
    event_tx: mpsc::UnboundedSender<(String, UnitEvent)>,
    event_rx: mpsc::UnboundedReceiver<(String, UnitEvent)>,
    failure: Option<(String, String)>,
    stopping: bool,
}

impl Supervisor {
    /// Create a supervisor for a resolved plan
    pub fn new(plan: ResolvedPlan, locator: Arc<PackageLocator>, config: SupervisorConfig) -> Self {
        let mut records = IndexMap::new();
        for skipped in &plan.skipped {
            records.insert(
                skipped.id.clone(),
                UnitRecord {
                    state: UnitState::Skipped,
                    ready: false,
                    required: false,
                    pid: None,
                },
            );
        }
        for planned in &plan.units {
            records.insert(
                planned.unit.id.clone(),
                UnitRecord {
                    state: UnitState::Activated,
                    ready: false,
                    required: planned.unit.required,
                    pid: None,
                },
            );
        }

        let (stop_tx, _) = watch::channel(());
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            plan,
            locator,
            config,
            records,
            tasks: JoinSet::new(),
            stop_tx,
            event_tx,
            event_rx,
            failure: None,
            stopping: false,
        }
    }

    pub fn plan(&self) -> &ResolvedPlan {
        &self.plan
    }

    /// Current state of every unit, activated and skipped
    pub fn states(&self) -> Vec<(String, UnitState)> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.state.clone()))
            .collect()
    }

    pub fn state(&self, id: &str) -> Option<&UnitState> {
        self.records.get(id).map(|r| &r.state)
    }

    pub fn pid(&self, id: &str) -> Option<u32> {
        self.records.get(id).and_then(|r| r.pid)
    }

    /// True once every unit is terminal without failure
    pub fn all_succeeded(&self) -> bool {
        self.records.values().all(|r| r.state.is_success())
    }

    /// Activate all units in plan order.
    ///
    /// Returns once every unit has been started or handed off, or early when
    /// shutdown is requested. Started units keep running either way; the
    /// caller stops them with [`Supervisor::shutdown`].
    pub async fn launch(&mut self, mut shutdown_rx: watch::Receiver<()>) -> Result<(), LaunchError> {
        log::info!(
            "{}Launching {} units ({} skipped)...",
            self.scope_prefix(),
            self.plan.units.len(),
            self.plan.skipped.len()
        );

        let units = self.plan.units.clone();
        for (index, planned) in units.iter().enumerate() {
            if shutdown_rx.has_changed().unwrap_or(false) {
                log::info!("{}Shutdown requested, aborting launch", self.scope_prefix());
                self.cancel_from(&units[index..]);
                return Ok(());
            }

            self.drain_events();
            if let Err(e) = self.check_failure() {
                self.cancel_from(&units[index..]);
                return Err(e);
            }

            match self.start_unit(planned, &mut shutdown_rx).await {
                Ok(Gate::Open) => {}
                Ok(Gate::Interrupted) => {
                    log::info!("{}Shutdown requested, aborting launch", self.scope_prefix());
                    self.cancel_from(&units[index..]);
                    return Ok(());
                }
                Err(e) => {
                    self.cancel_from(&units[index..]);
                    return Err(e);
                }
            }
        }

        self.drain_events();
        self.check_failure()?;

        log::info!("{}All units launched", self.scope_prefix());
        Ok(())
    }

    /// Wait until every unit is terminal, shutdown is requested, or a
    /// required unit fails.
    pub async fn wait(&mut self, mut shutdown_rx: watch::Receiver<()>) -> LaunchOutcome {
        if shutdown_rx.has_changed().unwrap_or(false) {
            return LaunchOutcome::Interrupted;
        }

        loop {
            if let Some((unit, cause)) = self.failure.clone() {
                return LaunchOutcome::Failed { unit, cause };
            }
            if self.records.values().all(|r| r.state.is_terminal()) {
                log::info!("{}All units have finished", self.scope_prefix());
                return LaunchOutcome::Completed;
            }

            tokio::select! {
                _ = stop_requested(&mut shutdown_rx) => {
                    log::info!("{}Shutdown signal received", self.scope_prefix());
                    return LaunchOutcome::Interrupted;
                }
                event = self.event_rx.recv() => {
                    if let Some((id, event)) = event {
                        self.handle_event(&id, event);
                    }
                }
            }
        }
    }

    /// Stop every started unit and wait for them to terminate.
    ///
    /// Units never started become `Cancelled`. Tasks that outlive the grace
    /// period (plus one second) are aborted, which kills their processes.
    pub async fn shutdown(&mut self) {
        log::info!("{}Shutting down all units...", self.scope_prefix());
        self.stopping = true;
        self.stop_tx.send_replace(());

        for record in self.records.values_mut() {
            if record.state == UnitState::Activated {
                record.state = UnitState::Cancelled;
            }
        }

        let deadline = self.config.shutdown_timeout + Duration::from_secs(1);
        let tasks = &mut self.tasks;
        let joined = tokio::time::timeout(deadline, async move {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        log::error!("Unit task panicked: {}", e);
                    }
                }
            }
        })
        .await;

        if joined.is_err() {
            log::warn!(
                "{}Units still running after {:?}, aborting",
                self.scope_prefix(),
                deadline
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        self.drain_events();

        let scope = self.config.clone();
        for (id, record) in self.records.iter_mut() {
            if !record.state.is_terminal() {
                log::warn!("[{}] Killed without exit status", scope.label(id));
                record.state = UnitState::Failed("killed after shutdown timeout".to_string());
            }
        }

        log::info!("{}All units shut down", self.scope_prefix());
    }

    async fn start_unit(
        &mut self,
        planned: &PlannedUnit,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> Result<Gate, LaunchError> {
        let unit = &planned.unit;
        let label = self.config.label(&unit.id);

        for dep in &unit.depends_on {
            match self.wait_ready(&unit.id, dep, shutdown_rx).await {
                Ok(Gate::Open) => {}
                Ok(Gate::Interrupted) => return Ok(Gate::Interrupted),
                Err(e @ LaunchError::RequiredUnitFailed { .. }) => return Err(e),
                Err(e) => {
                    log::warn!("[{}] Not started: {}", label, e);
                    self.set_state(&unit.id, UnitState::Failed(e.to_string()));
                    if unit.required {
                        return Err(e);
                    }
                    return Ok(Gate::Open);
                }
            }
        }

        if let Some(delay) = unit.startup_delay_ms {
            log::debug!("[{}] Waiting {}ms before start", label, delay);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = stop_requested(shutdown_rx) => return Ok(Gate::Interrupted),
            }
        }

        self.set_state(&unit.id, UnitState::Starting);
        let stop_rx = self.stop_tx.subscribe();

        match &unit.kind {
            UnitKind::Process { .. } => {
                let config = self.process_config(planned, label.clone());
                let started = ManagedProcess::new(config, self.event_tx.clone())
                    .and_then(|mut process| process.start().map(|pid| (process, pid)));

                match started {
                    Ok((process, pid)) => {
                        if let Some(record) = self.records.get_mut(&unit.id) {
                            record.pid = Some(pid);
                        }
                        let grace = self.config.shutdown_timeout;
                        self.tasks.spawn(async move {
                            let _ = process.run(stop_rx, grace).await;
                        });
                    }
                    Err(ProcessError::SpawnFailed { source, .. }) => {
                        log::error!("[{}] Failed to spawn: {}", label, source);
                        self.set_state(&unit.id, UnitState::Failed(source.to_string()));
                        if unit.required {
                            return Err(LaunchError::Spawn {
                                unit: unit.id.clone(),
                                source,
                            });
                        }
                    }
                    Err(e) => {
                        log::error!("[{}] {}", label, e);
                        self.set_state(&unit.id, UnitState::Failed(e.to_string()));
                        if unit.required {
                            return Err(LaunchError::RequiredUnitFailed {
                                unit: unit.id.clone(),
                                cause: e.to_string(),
                            });
                        }
                    }
                }
            }
            UnitKind::Include { path, args } => {
                log::info!("[{}] Including {}", label, path.display());
                let task = IncludeTask {
                    id: unit.id.clone(),
                    path: path.clone(),
                    args: args.clone(),
                    ready: unit.ready.clone(),
                    locator: self.locator.clone(),
                    config: self.config.nested(&unit.id),
                    events: self.event_tx.clone(),
                    stop_rx,
                };
                self.tasks.spawn(run_include(task));
            }
        }

        Ok(Gate::Open)
    }

    fn process_config(&self, planned: &PlannedUnit, label: String) -> ProcessConfig {
        let unit = &planned.unit;
        let (executable, raw_args, working_dir) = match &unit.kind {
            UnitKind::Process {
                executable,
                args,
                working_dir,
                ..
            } => (executable.clone(), args.clone(), working_dir.clone()),
            UnitKind::Include { path, .. } => (path.clone(), Vec::new(), None),
        };

        let mut args = raw_args;
        for (key, value) in &planned.parameters {
            args.push(format!("--{}", key));
            args.push(value.render());
        }

        let mut env: HashMap<String, String> = self
            .plan
            .env
            .iter()
            .chain(unit.env.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.insert(UNIT_ID_ENV.to_string(), unit.id.clone());
        if let Some(name) = unit.node_name() {
            env.insert(NODE_NAME_ENV.to_string(), name);
        }

        ProcessConfig {
            id: unit.id.clone(),
            label,
            executable,
            args,
            env,
            working_dir,
            ready: unit.ready.clone(),
        }
    }

    /// Block until `dep` is ready, processing events meanwhile
    async fn wait_ready(
        &mut self,
        unit: &str,
        dep: &str,
        shutdown_rx: &mut watch::Receiver<()>,
    ) -> Result<Gate, LaunchError> {
        let timeout = self.config.ready_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            self.check_failure()?;

            let Some(record) = self.records.get(dep) else {
                return Err(LaunchError::DependencyFailed {
                    unit: unit.to_string(),
                    dependency: dep.to_string(),
                    reason: "not part of the plan".to_string(),
                });
            };
            if record.ready {
                return Ok(Gate::Open);
            }
            if record.state.is_terminal() {
                return Err(LaunchError::DependencyFailed {
                    unit: unit.to_string(),
                    dependency: dep.to_string(),
                    reason: format!("{} before becoming ready", record.state),
                });
            }

            tokio::select! {
                event = self.event_rx.recv() => {
                    if let Some((id, event)) = event {
                        self.handle_event(&id, event);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(LaunchError::DependencyFailed {
                        unit: unit.to_string(),
                        dependency: dep.to_string(),
                        reason: format!("not ready within {:?}", timeout),
                    });
                }
                _ = stop_requested(shutdown_rx) => return Ok(Gate::Interrupted),
            }
        }
    }

    fn drain_events(&mut self) {
        while let Ok((id, event)) = self.event_rx.try_recv() {
            self.handle_event(&id, event);
        }
    }

    fn handle_event(&mut self, id: &str, event: UnitEvent) {
        let label = self.config.label(id);
        match event {
            UnitEvent::Started { pid } => {
                if let Some(pid) = pid {
                    log::info!("[{}] Process started with PID: {}", label, pid);
                }
                if let Some(record) = self.records.get_mut(id) {
                    record.pid = pid.or(record.pid);
                }
                self.set_state(id, UnitState::Running);
            }
            UnitEvent::Ready => {
                log::debug!("[{}] Ready", label);
                if let Some(record) = self.records.get_mut(id) {
                    record.ready = true;
                }
            }
            UnitEvent::Output { line, is_stderr } => {
                if is_stderr {
                    log::warn!("[{}] {}", label, line);
                } else {
                    log::info!("[{}] {}", label, line);
                }
            }
            UnitEvent::Exited { code } => {
                let state = UnitState::Exited(code);
                if code != Some(0) {
                    self.record_failure(id, state.to_string());
                }
                self.set_state(id, state);
            }
            UnitEvent::Failed { error } => {
                log::error!("[{}] Failed: {}", label, error);
                self.record_failure(id, error.clone());
                self.set_state(id, UnitState::Failed(error));
            }
        }
    }

    fn record_failure(&mut self, id: &str, cause: String) {
        let required = self.records.get(id).is_some_and(|r| r.required);
        if required && !self.stopping && self.failure.is_none() {
            log::error!("[{}] Required unit failed: {}", self.config.label(id), cause);
            self.failure = Some((id.to_string(), cause));
        }
    }

    fn check_failure(&self) -> Result<(), LaunchError> {
        match &self.failure {
            Some((unit, cause)) => Err(LaunchError::RequiredUnitFailed {
                unit: unit.clone(),
                cause: cause.clone(),
            }),
            None => Ok(()),
        }
    }

    fn set_state(&mut self, id: &str, state: UnitState) {
        if let Some(record) = self.records.get_mut(id) {
            // Terminal states are final
            if !record.state.is_terminal() {
                record.state = state;
            }
        }
    }

    fn cancel_from(&mut self, units: &[PlannedUnit]) {
        for planned in units {
            if let Some(record) = self.records.get_mut(&planned.unit.id) {
                if record.state == UnitState::Activated {
                    log::debug!("[{}] Cancelled", self.config.label(&planned.unit.id));
                    record.state = UnitState::Cancelled;
                }
            }
        }
    }

    fn scope_prefix(&self) -> String {
        if self.config.scope.is_empty() {
            String::new()
        } else {
            format!("[{}] ", self.config.scope)
        }
    }
}
