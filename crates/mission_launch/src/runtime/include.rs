//! Sub-launch inclusion

use crate::config::ReadySignal;
use crate::resolve::PackageLocator;
use crate::runtime::graph::load_plan;
use crate::runtime::process::{EventSender, UnitEvent};
use crate::runtime::supervisor::{LaunchOutcome, Supervisor, SupervisorConfig};
use futures::future::{BoxFuture, FutureExt};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// An included launch file, run by a nested supervisor
pub(crate) struct IncludeTask {
    pub id: String,
    pub path: PathBuf,
    pub args: IndexMap<String, String>,
    pub ready: ReadySignal,
    pub locator: Arc<PackageLocator>,
    /// Configuration of the nested supervisor
    pub config: SupervisorConfig,
    pub events: EventSender,
    pub stop_rx: watch::Receiver<()>,
}

impl IncludeTask {
    fn send(&self, event: UnitEvent) {
        let _ = self.events.send((self.id.clone(), event));
    }
}

/// Run an included launch file to completion.
///
/// Boxed because a nested supervisor may itself run includes.
pub(crate) fn run_include(task: IncludeTask) -> BoxFuture<'static, ()> {
    async move {
        let label = task.config.scope.clone();

        if task.config.depth > task.config.max_include_depth {
            task.send(UnitEvent::Failed {
                error: format!(
                    "include depth exceeds {} at '{}'",
                    task.config.max_include_depth,
                    task.path.display()
                ),
            });
            return;
        }

        task.send(UnitEvent::Started { pid: None });

        let overrides: HashMap<String, String> = task
            .args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let plan = match load_plan(
            &task.path,
            &overrides,
            task.locator.clone(),
            task.config.allow_reregistration,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                task.send(UnitEvent::Failed {
                    error: format!("{}: {}", task.path.display(), e),
                });
                return;
            }
        };

        let mut nested = Supervisor::new(plan, task.locator.clone(), task.config.clone());
        if let Err(e) = nested.launch(task.stop_rx.clone()).await {
            nested.shutdown().await;
            task.send(UnitEvent::Failed {
                error: e.to_string(),
            });
            return;
        }

        if task.ready == ReadySignal::Started {
            task.send(UnitEvent::Ready);
        }

        let outcome = match task.ready {
            ReadySignal::Delay { ms } => {
                tokio::select! {
                    outcome = nested.wait(task.stop_rx.clone()) => outcome,
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        log::debug!("[{}] Ready after {}ms", label, ms);
                        task.send(UnitEvent::Ready);
                        nested.wait(task.stop_rx.clone()).await
                    }
                }
            }
            _ => nested.wait(task.stop_rx.clone()).await,
        };

        nested.shutdown().await;

        match outcome {
            // Nested non-required failures stay local, as for siblings
            LaunchOutcome::Completed => {
                let failed: Vec<String> = nested
                    .states()
                    .into_iter()
                    .filter(|(_, state)| !state.is_success())
                    .map(|(id, state)| format!("{} ({})", id, state))
                    .collect();
                if failed.is_empty() {
                    log::info!("[{}] Included launch finished", label);
                } else {
                    log::warn!(
                        "[{}] Included launch finished; non-required units failed: {}",
                        label,
                        failed.join(", ")
                    );
                }
                if task.ready == ReadySignal::Exited {
                    task.send(UnitEvent::Ready);
                }
                task.send(UnitEvent::Exited { code: Some(0) });
            }
            LaunchOutcome::Interrupted => {
                task.send(UnitEvent::Exited { code: None });
            }
            LaunchOutcome::Failed { unit, cause } => {
                task.send(UnitEvent::Failed {
                    error: format!("required unit '{}' failed: {}", unit, cause),
                });
            }
        }
    }
    .boxed()
}
