//! Child stack monitoring.
//!
//! A `ChildStackMonitor` polls one remote stack until it reaches a terminal
//! status, its deadline passes, or it is cancelled. Every observation is
//! handed to an observer callback before the monitor decides whether to keep
//! polling, so the caller's view never lags behind the final report.

use crate::driver::RemoteStackDriver;
use crate::observability::metrics;
use crate::types::{Outputs, RegionId, RemoteStackId, RemoteStackState, StackStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Error detail recorded when a child leaves the create half while it is
/// being created.
pub const DISAPPEARED_DETAIL: &str = "remote stack disappeared";

/// Which half of the lifecycle the monitor is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Create,
    Delete,
}

impl WaitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitMode::Create => "create",
            WaitMode::Delete => "delete",
        }
    }
}

/// Decision taken after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not terminal yet, poll again
    Continue,
    /// Stop polling; the child settled with this status
    Finished(StackStatus),
}

/// Classify an observed status.
///
/// NOT_FOUND while waiting for a deletion counts as DELETE_COMPLETE when
/// `success_on_not_found` is set; otherwise it is reported as is. While
/// waiting for a creation, any delete-side status (NOT_FOUND included) means
/// the creation failed.
pub fn classify(mode: WaitMode, success_on_not_found: bool, status: StackStatus) -> Verdict {
    match status {
        status if mode == WaitMode::Create && status.is_delete() => {
            Verdict::Finished(StackStatus::CreateFailed)
        }
        StackStatus::NotFound if mode == WaitMode::Delete && success_on_not_found => {
            Verdict::Finished(StackStatus::DeleteComplete)
        }
        status if status.is_terminal() => Verdict::Finished(status),
        _ => Verdict::Continue,
    }
}

/// Final result of a monitor that was not cancelled.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// The child reached a terminal status
    Finished {
        status: StackStatus,
        outputs: Outputs,
        error_detail: Option<String>,
    },

    /// The deadline passed first; the child keeps its last observed status
    TimedOut { last_status: StackStatus },
}

/// Report emitted by a monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    pub logical_name: String,
    pub outcome: MonitorOutcome,
    /// Number of `get_status` calls issued, failed ones included
    pub polls: u32,
}

/// Polls a single child stack.
pub struct ChildStackMonitor {
    logical_name: String,
    region: RegionId,
    remote_id: RemoteStackId,
    driver: Arc<dyn RemoteStackDriver>,
    mode: WaitMode,
    poll_interval: Duration,
    deadline: Option<Duration>,
    success_on_not_found: bool,
}

impl ChildStackMonitor {
    pub fn new(
        logical_name: impl Into<String>,
        region: RegionId,
        remote_id: RemoteStackId,
        driver: Arc<dyn RemoteStackDriver>,
        mode: WaitMode,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            region,
            remote_id,
            driver,
            mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
            success_on_not_found: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_success_on_not_found(mut self, enabled: bool) -> Self {
        self.success_on_not_found = enabled;
        self
    }

    fn initial_status(&self) -> StackStatus {
        match self.mode {
            WaitMode::Create => StackStatus::CreateInProgress,
            WaitMode::Delete => StackStatus::DeleteInProgress,
        }
    }

    /// Rewrite an observation that makes no sense for the wait mode.
    fn normalize(&self, state: RemoteStackState) -> RemoteStackState {
        if self.mode == WaitMode::Create && state.status.is_delete() {
            RemoteStackState::failed(StackStatus::CreateFailed, DISAPPEARED_DETAIL)
        } else {
            state
        }
    }

    /// Poll until terminal, deadline or cancellation.
    ///
    /// `observe` is called with every successful observation. Returns `None`
    /// when cancelled; no report is produced in that case.
    pub async fn run<F>(self, cancel: CancellationToken, mut observe: F) -> Option<MonitorReport>
    where
        F: FnMut(&RemoteStackState) + Send,
    {
        // A deadline too far out to represent is no deadline.
        let deadline = self.deadline.and_then(|d| Instant::now().checked_add(d));
        let mut last_status = self.initial_status();
        let mut polls = 0u32;

        debug!(
            child = %self.logical_name,
            region = %self.region,
            remote_id = %self.remote_id,
            mode = self.mode.as_str(),
            "Monitoring child stack"
        );

        loop {
            let poll = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.driver.get_status(&self.region, &self.remote_id) => result,
            };
            polls += 1;

            let observed = match poll {
                Ok(state) => Some(state),
                Err(e) if e.is_not_found() => Some(RemoteStackState::new(StackStatus::NotFound)),
                Err(e) => {
                    warn!(
                        child = %self.logical_name,
                        region = %self.region,
                        error = %e,
                        "Failed to read child stack status, retrying"
                    );
                    metrics::record_poll_error(&self.region);
                    None
                }
            };

            if let Some(state) = observed.map(|state| self.normalize(state)) {
                observe(&state);
                last_status = state.status;

                if let Verdict::Finished(status) =
                    classify(self.mode, self.success_on_not_found, state.status)
                {
                    debug!(child = %self.logical_name, status = %status, polls, "Child stack settled");
                    return Some(MonitorReport {
                        logical_name: self.logical_name,
                        outcome: MonitorOutcome::Finished {
                            status,
                            outputs: state.outputs.unwrap_or_default(),
                            error_detail: state.error_detail,
                        },
                        polls,
                    });
                }
            }

            let mut wake = Instant::now() + self.poll_interval;
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep_until(wake) => {}
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(
                    child = %self.logical_name,
                    region = %self.region,
                    last_status = %last_status,
                    "Child stack monitor deadline elapsed"
                );
                metrics::record_monitor_timeout(&self.region);
                return Some(MonitorReport {
                    logical_name: self.logical_name,
                    outcome: MonitorOutcome::TimedOut { last_status },
                    polls,
                });
            }
        }
    }
}
