//! Per-child tasks spawned by the orchestrator.

use super::state::{Applied, ChildUpdate, ParentStack};
use crate::driver::RemoteStackDriver;
use crate::events::{Event, EventBus, EventType};
use crate::monitor::{ChildStackMonitor, MonitorOutcome, MonitorReport, WaitMode};
use crate::observability::metrics;
use crate::types::{
    Parameters, RegionId, RemoteStackHandle, RemoteStackId, RemoteStackState, StackStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handle on the single aggregation point.
///
/// Every mutation of the parent goes through [`ChildContext::apply`], which
/// runs inside `send_if_modified` and then announces what changed.
#[derive(Clone)]
pub(crate) struct ChildContext {
    pub parent: String,
    pub state: Arc<watch::Sender<ParentStack>>,
    pub events: EventBus,
}

impl ChildContext {
    pub fn apply(&self, child: &str, region: &RegionId, update: ChildUpdate) -> Applied {
        let mut applied = Applied::default();
        self.state.send_if_modified(|parent| {
            applied = parent.apply(child, update);
            applied.modified
        });

        if let Some(status) = applied.child {
            info!(parent = %self.parent, child = %child, region = %region, status = %status, "Child stack status changed");
            if status.is_terminal() {
                metrics::record_child_terminal(region, status);
            }
            self.events.publish(
                Event::new(EventType::ChildStatusChanged, child, &format!("{child} is {status}"))
                    .with_metadata("parent", &self.parent)
                    .with_metadata("region", region.as_str())
                    .with_metadata("status", status.as_str()),
            );
        }
        if let Some((from, to)) = applied.parent {
            self.announce_parent(from, to);
        }
        applied
    }

    /// Log and publish a parent status transition.
    pub fn announce_parent(&self, from: StackStatus, to: StackStatus) {
        info!(parent = %self.parent, from = %from, to = %to, "Parent stack status changed");
        if let Some(event_type) = EventType::for_parent_status(to) {
            self.events.publish(
                Event::new(event_type, &self.parent, &format!("{} is {to}", self.parent))
                    .with_metadata("from", from.as_str())
                    .with_metadata("status", to.as_str()),
            );
        }
    }
}

/// Monitor settings shared by every child of a phase.
#[derive(Debug, Clone)]
pub(crate) struct MonitorSettings {
    pub poll_interval: Duration,
    pub deadline: Option<Duration>,
    pub success_on_not_found: bool,
}

/// Work for one child in one phase.
pub(crate) struct ChildTask {
    pub ctx: ChildContext,
    pub driver: Arc<dyn RemoteStackDriver>,
    pub settings: MonitorSettings,
    pub cancel: CancellationToken,
    pub logical_name: String,
    pub region: RegionId,
    pub parameters: Parameters,
    pub remote_id: Option<RemoteStackId>,
    pub status: StackStatus,
}

impl ChildTask {
    pub fn new(
        ctx: ChildContext,
        driver: Arc<dyn RemoteStackDriver>,
        settings: MonitorSettings,
        cancel: CancellationToken,
        handle: &RemoteStackHandle,
    ) -> Self {
        Self {
            ctx,
            driver,
            settings,
            cancel,
            logical_name: handle.logical_name.clone(),
            region: handle.region_id.clone(),
            parameters: handle.parameters.clone(),
            remote_id: handle.remote_id.clone(),
            status: handle.status,
        }
    }

    fn apply(&self, update: ChildUpdate) -> Applied {
        self.ctx.apply(&self.logical_name, &self.region, update)
    }

    fn observe(&self, state: RemoteStackState) {
        self.apply(ChildUpdate::Observed(state));
    }

    fn finish(&self, settled: bool) {
        self.apply(ChildUpdate::TaskFinished { settled });
    }

    /// Issue the create call, then monitor the child until it settles.
    pub async fn create(self) {
        // The call itself is not cancelled: an accepted create must be
        // recorded so a later delete can find the remote stack.
        let remote_id = match self.driver.create(&self.region, &self.parameters).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                warn!(child = %self.logical_name, region = %self.region, error = %e, "Failed to create child stack");
                self.observe(RemoteStackState::failed(StackStatus::CreateFailed, e.to_string()));
                self.finish(true);
                return;
            }
        };

        metrics::record_child_created(&self.region);
        self.apply(ChildUpdate::Created(remote_id.clone()));
        self.ctx.events.publish(
            Event::new(EventType::ChildCreated, &self.logical_name, "create accepted")
                .with_metadata("parent", &self.ctx.parent)
                .with_metadata("region", self.region.as_str())
                .with_metadata("remote_id", remote_id.as_str()),
        );

        if self.cancel.is_cancelled() {
            self.finish(false);
            return;
        }

        let report = self
            .monitor(remote_id, WaitMode::Create)
            .run(self.cancel.clone(), |state| self.observe(state.clone()))
            .await;
        self.report(report);
    }

    /// Issue the delete call (unless one is in flight), then monitor the
    /// child until it is gone.
    pub async fn delete(self) {
        let Some(remote_id) = self.remote_id.clone() else {
            // Never created: nothing to delete.
            self.observe(RemoteStackState::new(StackStatus::NotFound));
            self.finish(true);
            return;
        };

        if self.status != StackStatus::DeleteInProgress {
            match self.driver.delete(&self.region, &remote_id).await {
                Ok(()) => self.observe(RemoteStackState::new(StackStatus::DeleteInProgress)),
                Err(e) if e.is_not_found() => {
                    self.observe(RemoteStackState::new(StackStatus::NotFound));
                    self.finish(true);
                    return;
                }
                Err(e) => {
                    warn!(child = %self.logical_name, region = %self.region, error = %e, "Failed to delete child stack");
                    self.observe(RemoteStackState::failed(StackStatus::DeleteFailed, e.to_string()));
                    self.finish(true);
                    return;
                }
            }
        }

        if self.cancel.is_cancelled() {
            self.finish(false);
            return;
        }

        let report = self
            .monitor(remote_id, WaitMode::Delete)
            .run(self.cancel.clone(), |state| self.observe(state.clone()))
            .await;
        self.report(report);
    }

    fn monitor(&self, remote_id: RemoteStackId, mode: WaitMode) -> ChildStackMonitor {
        ChildStackMonitor::new(
            self.logical_name.clone(),
            self.region.clone(),
            remote_id,
            Arc::clone(&self.driver),
            mode,
        )
        .with_poll_interval(self.settings.poll_interval)
        .with_deadline(self.settings.deadline)
        .with_success_on_not_found(self.settings.success_on_not_found)
    }

    fn report(&self, report: Option<MonitorReport>) {
        match report {
            Some(MonitorReport { outcome: MonitorOutcome::Finished { .. }, .. }) => {
                self.finish(true)
            }
            Some(MonitorReport { outcome: MonitorOutcome::TimedOut { last_status }, polls, .. }) => {
                warn!(
                    parent = %self.ctx.parent,
                    child = %self.logical_name,
                    last_status = %last_status,
                    polls,
                    "Child stack did not settle before its deadline"
                );
                self.ctx.events.publish(
                    Event::new(EventType::ChildTimedOut, &self.logical_name, "monitor deadline elapsed")
                        .with_metadata("parent", &self.ctx.parent)
                        .with_metadata("region", self.region.as_str())
                        .with_metadata("status", last_status.as_str()),
                );
                self.finish(false);
            }
            // Cancelled
            None => self.finish(false),
        }
    }
}
