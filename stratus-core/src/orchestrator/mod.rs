//! Multi-region stack orchestration.
//!
//! A `MultiRegionOrchestrator` owns one parent stack whose children live in
//! independent regions. It fans the create and delete calls out to one task per
//! child, polls every child through a [`ChildStackMonitor`](crate::monitor::ChildStackMonitor),
//! and folds each observation into the parent's aggregate status.
//!
//! All parent state sits behind a single `watch` channel: tasks mutate it with
//! `send_if_modified`, queries read a snapshot, waiters use `wait_for`.

mod state;
mod task;

pub use state::{aggregate_status, ParentStack, Phase, Settled};

use crate::config::OrchestratorConfig;
use crate::driver::RemoteStackDriver;
use crate::error::{Result, StratusError};
use crate::events::{EventBus, EventSubscriber};
use crate::monitor::WaitMode;
use crate::observability::metrics;
use crate::outputs::ParentOutputs;
use crate::types::{ChildDeclaration, RemoteStackHandle, StackStatus};
use state::ChildUpdate;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use task::{ChildContext, ChildTask, MonitorSettings};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Tasks of the phase currently being driven.
struct PhaseTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Orchestrates a parent stack whose children live in several regions.
pub struct MultiRegionOrchestrator {
    name: String,
    driver: Arc<dyn RemoteStackDriver>,
    config: OrchestratorConfig,
    state: Arc<watch::Sender<ParentStack>>,
    events: EventBus,
    shutdown: CancellationToken,
    tasks: Mutex<PhaseTasks>,
}

impl MultiRegionOrchestrator {
    /// Create an orchestrator for the parent stack `name`.
    ///
    /// # Arguments
    /// * `name` - Parent stack name, used in logs and events
    /// * `driver` - Regional driver shared by every child task
    /// * `config` - Poll interval, timeouts and policies
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn RemoteStackDriver>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        config.validate()?;

        let name = name.into();
        let parent = ParentStack::new(
            name.clone(),
            config.success_on_not_found,
            config.output_projection.clone(),
        );
        let (state, _) = watch::channel(parent);
        let shutdown = CancellationToken::new();

        debug!(parent = %name, driver = driver.name(), "Orchestrator created");

        Ok(Self {
            name,
            driver,
            config,
            state: Arc::new(state),
            events: EventBus::new(),
            tasks: Mutex::new(PhaseTasks { cancel: shutdown.child_token(), handles: Vec::new() }),
            shutdown,
        })
    }

    /// Publish lifecycle events on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn context(&self) -> ChildContext {
        ChildContext {
            parent: self.name.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }

    fn settings(&self, mode: WaitMode) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.config.poll_interval(),
            deadline: self.config.monitor_deadline(),
            // A create wait never turns NOT_FOUND into success.
            success_on_not_found: mode == WaitMode::Delete && self.config.success_on_not_found,
        }
    }

    /// Register the children and start creating them.
    ///
    /// Returns as soon as one task per child is spawned; use
    /// [`wait_for_create`](Self::wait_for_create) to observe completion.
    #[instrument(skip(self, children), fields(parent = %self.name, children = children.len()))]
    pub async fn create_all(&self, children: Vec<ChildDeclaration>) -> Result<()> {
        let mut tasks = self.tasks.lock().await;

        let phase = self.state.borrow().phase;
        if phase != Phase::Idle {
            return Err(StratusError::AlreadyCreated { parent: self.name.clone() });
        }

        let mut seen = HashSet::new();
        for child in &children {
            if child.logical_name.is_empty() {
                return Err(StratusError::InvalidState {
                    reason: "child stack logical name must not be empty".to_string(),
                });
            }
            if !seen.insert(child.logical_name.as_str()) {
                return Err(StratusError::DuplicateChild { name: child.logical_name.clone() });
            }
        }

        let handles: Vec<RemoteStackHandle> =
            children.into_iter().map(RemoteStackHandle::new).collect();

        info!(parent = %self.name, count = handles.len(), "Creating child stacks");

        let ctx = self.context();
        let mut transition = None;
        self.state.send_modify(|parent| transition = parent.begin_create(handles.clone()));
        if let Some((from, to)) = transition {
            ctx.announce_parent(from, to);
        }

        let settings = self.settings(WaitMode::Create);
        for handle in &handles {
            ctx.apply(&handle.logical_name, &handle.region_id, ChildUpdate::TaskStarted);
            let task = ChildTask::new(
                ctx.clone(),
                Arc::clone(&self.driver),
                settings.clone(),
                tasks.cancel.clone(),
                handle,
            );
            tasks.handles.push(tokio::spawn(task.create()));
        }

        Ok(())
    }

    /// Wait until the parent is CREATE_COMPLETE or CREATE_FAILED.
    ///
    /// `None` uses the configured create timeout. Returns the terminal status;
    /// fails with `Timeout` when the timeout elapses or every unfinished child
    /// stopped being monitored.
    #[instrument(skip(self), fields(parent = %self.name))]
    pub async fn wait_for_create(&self, timeout: Option<Duration>) -> Result<StackStatus> {
        let timeout = timeout.or(self.config.create_timeout());
        self.wait_for_phase(Phase::Create, timeout).await
    }

    /// Delete every child that is not already gone.
    ///
    /// Create monitors are cancelled and in-flight create calls are allowed to
    /// finish first, so a stack accepted by its region is never leaked.
    /// Calling this again only touches children that still need work: nothing
    /// in flight is deleted twice and DELETE_FAILED children are retried.
    #[instrument(skip(self), fields(parent = %self.name))]
    pub async fn delete_all(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let ctx = self.context();

        let phase = self.state.borrow().phase;
        if phase != Phase::Delete || tasks.cancel.is_cancelled() {
            // Monitors of an aborted or timed-out delete are replaced too.
            self.restart_phase(&mut tasks).await;
        }

        if phase != Phase::Delete {
            let mut transition = None;
            self.state.send_modify(|parent| transition = parent.begin_delete());
            if let Some((from, to)) = transition {
                ctx.announce_parent(from, to);
            }
        } else {
            tasks.handles.retain(|handle| !handle.is_finished());
        }

        let targets: Vec<RemoteStackHandle> = {
            let parent = self.state.borrow();
            parent
                .children
                .iter()
                .filter(|c| !c.status.is_gone() && !parent.is_active(&c.logical_name))
                .cloned()
                .collect()
        };

        info!(parent = %self.name, count = targets.len(), "Deleting child stacks");

        let settings = self.settings(WaitMode::Delete);
        for handle in &targets {
            ctx.apply(&handle.logical_name, &handle.region_id, ChildUpdate::TaskStarted);
            let task = ChildTask::new(
                ctx.clone(),
                Arc::clone(&self.driver),
                settings.clone(),
                tasks.cancel.clone(),
                handle,
            );
            tasks.handles.push(tokio::spawn(task.delete()));
        }

        Ok(())
    }

    /// Wait until the parent is DELETE_COMPLETE or DELETE_FAILED.
    ///
    /// `None` uses the configured delete timeout.
    #[instrument(skip(self), fields(parent = %self.name))]
    pub async fn wait_for_delete(&self, timeout: Option<Duration>) -> Result<StackStatus> {
        let timeout = timeout.or(self.config.delete_timeout());
        self.wait_for_phase(Phase::Delete, timeout).await
    }

    async fn wait_for_phase(&self, phase: Phase, timeout: Option<Duration>) -> Result<StackStatus> {
        let operation = match phase {
            Phase::Delete => "delete",
            _ => "create",
        };

        let current = self.state.borrow().phase;
        if current != phase {
            return Err(StratusError::InvalidState {
                reason: format!("parent {} is not in the {} phase", self.name, phase),
            });
        }

        let started = Instant::now();
        let mut rx = self.state.subscribe();
        let waited = match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, wait_settled(&mut rx, phase)).await.ok()
            }
            None => Some(wait_settled(&mut rx, phase).await),
        };
        metrics::record_parent_wait(operation, started.elapsed().as_secs_f64());

        let (current, settled, status) = match waited {
            Some(result) => result?,
            None => {
                self.cancel_phase().await;
                let last_status = self.status();
                warn!(parent = %self.name, last_status = %last_status, "Timed out waiting for parent {}", operation);
                return Err(StratusError::Timeout {
                    operation: format!("{operation} of {}", self.name),
                    last_status,
                });
            }
        };

        if current != phase {
            return Err(StratusError::InvalidState {
                reason: format!("parent {} moved to the {} phase during the wait", self.name, current),
            });
        }

        match settled {
            Some(Settled::Terminal(status)) => {
                info!(parent = %self.name, status = %status, "Parent {} settled", operation);
                Ok(status)
            }
            _ => {
                warn!(parent = %self.name, last_status = %status, "Every unfinished child stopped being monitored");
                Err(StratusError::Timeout {
                    operation: format!("{operation} of {}", self.name),
                    last_status: status,
                })
            }
        }
    }

    /// Wait until one child reaches `expected`.
    ///
    /// NOT_FOUND satisfies an expected DELETE_COMPLETE when
    /// `success_on_not_found` is set. Fails with `UnexpectedStatus` when the
    /// child settles in another terminal status, and with `Timeout` when the
    /// timeout elapses or the child is no longer being monitored.
    #[instrument(skip(self), fields(parent = %self.name))]
    pub async fn wait_for_child_status(
        &self,
        logical_name: &str,
        expected: StackStatus,
        success_on_not_found: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if self.child(logical_name).is_none() {
            return Err(StratusError::ChildNotFound { name: logical_name.to_string() });
        }

        let verdict = move |parent: &ParentStack| -> Option<ChildVerdict> {
            let child = parent.child(logical_name)?;
            let status = child.status;
            let satisfied = status == expected
                || (status == StackStatus::NotFound
                    && expected == StackStatus::DeleteComplete
                    && success_on_not_found);
            if satisfied {
                return Some(ChildVerdict::Reached);
            }

            let relevant_terminal = if expected.is_delete() {
                status.is_delete() && status.is_terminal()
            } else {
                status.is_terminal()
            };
            if relevant_terminal {
                Some(ChildVerdict::Unexpected(status))
            } else if parent.is_stalled(logical_name) {
                Some(ChildVerdict::Stalled(status))
            } else {
                None
            }
        };

        let mut rx = self.state.subscribe();
        let wait = async {
            let parent = rx
                .wait_for(|parent| verdict(parent).is_some())
                .await
                .map_err(|_| StratusError::Internal("parent state channel closed".to_string()))?;
            verdict(&parent).ok_or_else(|| StratusError::Internal("child verdict vanished".to_string()))
        };
        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
            None => Some(wait.await),
        };

        let operation = format!("{logical_name} to reach {expected}");
        match waited {
            Some(result) => match result? {
                ChildVerdict::Reached => Ok(()),
                ChildVerdict::Unexpected(actual) => Err(StratusError::UnexpectedStatus {
                    name: logical_name.to_string(),
                    expected,
                    actual,
                }),
                ChildVerdict::Stalled(last_status) => {
                    Err(StratusError::Timeout { operation, last_status })
                }
            },
            None => {
                let last_status =
                    self.child(logical_name).map_or(StackStatus::Pending, |c| c.status);
                Err(StratusError::Timeout { operation, last_status })
            }
        }
    }

    /// Cancel every monitor of the current phase.
    ///
    /// Children keep their last observed status. A later `delete_all` starts
    /// fresh monitors.
    #[instrument(skip(self), fields(parent = %self.name))]
    pub async fn abort(&self) {
        self.cancel_phase().await;
        info!(parent = %self.name, "Child stack monitors aborted");
    }

    /// Stop every task of the current phase and hand out a fresh token.
    async fn restart_phase(&self, tasks: &mut PhaseTasks) {
        tasks.cancel.cancel();
        for handle in tasks.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(parent = %self.name, error = %e, "Child task ended abnormally");
            }
        }
        tasks.cancel = self.shutdown.child_token();
    }

    async fn cancel_phase(&self) {
        let tasks = self.tasks.lock().await;
        tasks.cancel.cancel();
    }

    /// Current aggregate status of the parent.
    pub fn status(&self) -> StackStatus {
        self.state.borrow().status
    }

    /// Snapshot of every child, in declaration order.
    pub fn children(&self) -> Vec<RemoteStackHandle> {
        self.state.borrow().children.clone()
    }

    /// Snapshot of one child.
    pub fn child(&self, logical_name: &str) -> Option<RemoteStackHandle> {
        self.state.borrow().child(logical_name).cloned()
    }

    /// Snapshot of the whole parent stack.
    pub fn parent(&self) -> ParentStack {
        self.state.borrow().clone()
    }

    /// Merged child outputs; only available once the parent is CREATE_COMPLETE.
    pub fn outputs(&self) -> Result<ParentOutputs> {
        let parent = self.state.borrow();
        match (&parent.outputs, parent.status) {
            (Some(outputs), StackStatus::CreateComplete) => Ok(outputs.clone()),
            (_, status) => Err(StratusError::NotReady { status }),
        }
    }

    /// Subscribe to this orchestrator's lifecycle events.
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        self.events.subscribe(filters)
    }

    /// Watch raw parent snapshots.
    pub fn watch(&self) -> watch::Receiver<ParentStack> {
        self.state.subscribe()
    }
}

impl Drop for MultiRegionOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum ChildVerdict {
    Reached,
    Unexpected(StackStatus),
    Stalled(StackStatus),
}

async fn wait_settled(
    rx: &mut watch::Receiver<ParentStack>,
    phase: Phase,
) -> Result<(Phase, Option<Settled>, StackStatus)> {
    let parent = rx
        .wait_for(|parent| parent.phase != phase || parent.settled().is_some())
        .await
        .map_err(|_| StratusError::Internal("parent state channel closed".to_string()))?;
    Ok((parent.phase, parent.settled(), parent.status))
}
