//! Parent stack state and status aggregation.
//!
//! `ParentStack` is only ever mutated through [`ParentStack::apply`], which
//! updates one child and recomputes the aggregate in the same step. The
//! orchestrator runs `apply` inside the watch channel's modify closure, so
//! concurrent monitors are serialized and readers always see a consistent
//! snapshot.

use crate::outputs::{OutputProjection, ParentOutputs, StackOutputAggregator};
use crate::types::{RemoteStackHandle, RemoteStackId, RemoteStackState, StackStatus};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error};

/// Lifecycle half the parent is currently driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No children declared yet
    Idle,
    Create,
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Aggregate status of a set of children.
///
/// Any failure fails the parent; completion requires every child. An empty
/// set is vacuously complete. Outside the delete phase NOT_FOUND children are
/// failures; inside it they count as deleted when `success_on_not_found` is
/// set and as failed deletions otherwise.
pub fn aggregate_status(
    phase: Phase,
    children: &[RemoteStackHandle],
    success_on_not_found: bool,
) -> StackStatus {
    match phase {
        Phase::Idle => StackStatus::Pending,
        Phase::Create => {
            if children.iter().any(|c| c.status == StackStatus::CreateFailed) {
                StackStatus::CreateFailed
            } else if children.iter().all(|c| c.status == StackStatus::CreateComplete) {
                StackStatus::CreateComplete
            } else {
                StackStatus::CreateInProgress
            }
        }
        Phase::Delete => {
            let gone = |c: &RemoteStackHandle| match c.status {
                StackStatus::DeleteComplete => true,
                StackStatus::NotFound => success_on_not_found,
                _ => false,
            };
            let failed = |c: &RemoteStackHandle| match c.status {
                StackStatus::DeleteFailed => true,
                StackStatus::NotFound => !success_on_not_found,
                _ => false,
            };

            if children.iter().any(failed) {
                StackStatus::DeleteFailed
            } else if children.iter().all(gone) {
                StackStatus::DeleteComplete
            } else {
                StackStatus::DeleteInProgress
            }
        }
    }
}

/// Change applied to one child through the aggregation point.
#[derive(Debug, Clone)]
pub(crate) enum ChildUpdate {
    /// A task for the child started in the current phase
    TaskStarted,
    /// The region accepted the create call
    Created(RemoteStackId),
    /// A status read (or a locally decided status)
    Observed(RemoteStackState),
    /// The child's task ended; `settled` is false when it stopped early
    TaskFinished { settled: bool },
}

/// Result of [`ParentStack::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Applied {
    /// New child status, when it changed
    pub child: Option<StackStatus>,
    /// Parent status transition `(from, to)`, when it changed
    pub parent: Option<(StackStatus, StackStatus)>,
    /// Whether anything observable changed
    pub modified: bool,
}

/// How a wait on the current phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Parent reached a terminal status for the phase
    Terminal(StackStatus),
    /// Every unfinished child lost its monitor (deadline or cancellation)
    Stalled,
}

/// A parent stack and its children.
#[derive(Debug, Clone, Serialize)]
pub struct ParentStack {
    /// Parent stack name
    pub name: String,

    /// Children in declaration order
    pub children: Vec<RemoteStackHandle>,

    /// Aggregate status, derived from the children
    pub status: StackStatus,

    /// Lifecycle half being driven
    pub phase: Phase,

    /// Merged outputs, present only while CREATE_COMPLETE
    pub outputs: Option<ParentOutputs>,

    #[serde(skip)]
    success_on_not_found: bool,

    #[serde(skip)]
    projection: OutputProjection,

    /// Children with a running task in the current phase
    #[serde(skip)]
    active: BTreeSet<String>,

    /// Children whose task stopped before they settled
    #[serde(skip)]
    stalled: BTreeSet<String>,
}

impl ParentStack {
    pub fn new(
        name: impl Into<String>,
        success_on_not_found: bool,
        projection: OutputProjection,
    ) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            status: StackStatus::Pending,
            phase: Phase::Idle,
            outputs: None,
            success_on_not_found,
            projection,
            active: BTreeSet::new(),
            stalled: BTreeSet::new(),
        }
    }

    pub fn child(&self, logical_name: &str) -> Option<&RemoteStackHandle> {
        self.children.iter().find(|c| c.logical_name == logical_name)
    }

    /// Whether a task is currently running for the child.
    pub fn is_active(&self, logical_name: &str) -> bool {
        self.active.contains(logical_name)
    }

    /// Whether the child's last task stopped before it settled.
    pub fn is_stalled(&self, logical_name: &str) -> bool {
        self.stalled.contains(logical_name)
    }

    /// Register children and enter the create phase.
    pub(crate) fn begin_create(
        &mut self,
        children: Vec<RemoteStackHandle>,
    ) -> Option<(StackStatus, StackStatus)> {
        self.children = children;
        self.phase = Phase::Create;
        self.stalled.clear();
        self.recompute()
    }

    /// Enter the delete phase.
    pub(crate) fn begin_delete(&mut self) -> Option<(StackStatus, StackStatus)> {
        self.phase = Phase::Delete;
        self.stalled.clear();
        self.recompute()
    }

    /// Apply an update to one child and recompute the aggregate.
    pub(crate) fn apply(&mut self, logical_name: &str, update: ChildUpdate) -> Applied {
        let Some(child) = self.children.iter_mut().find(|c| c.logical_name == logical_name)
        else {
            debug!(parent = %self.name, child = %logical_name, "Update for unknown child ignored");
            return Applied::default();
        };

        let before = child.status;
        let mut modified = match update {
            ChildUpdate::TaskStarted => {
                self.stalled.remove(logical_name);
                self.active.insert(logical_name.to_string())
            }
            ChildUpdate::Created(remote_id) => child.mark_created(remote_id),
            ChildUpdate::Observed(state) => {
                let previous = (child.outputs.clone(), child.error_detail.clone());
                child.observe(state);
                before != child.status || previous != (child.outputs.clone(), child.error_detail.clone())
            }
            ChildUpdate::TaskFinished { settled } => {
                let was_active = self.active.remove(logical_name);
                let newly_stalled = !settled && self.stalled.insert(logical_name.to_string());
                was_active || newly_stalled
            }
        };

        let after = child.status;
        let parent = self.recompute();
        modified |= parent.is_some();

        Applied { child: (before != after).then_some(after), parent, modified }
    }

    /// Recompute the aggregate status (and outputs on completion).
    fn recompute(&mut self) -> Option<(StackStatus, StackStatus)> {
        let next = aggregate_status(self.phase, &self.children, self.success_on_not_found);
        let previous = self.status;

        if next == StackStatus::CreateComplete {
            if self.outputs.is_none() {
                match StackOutputAggregator::new(self.projection.clone()).aggregate(&self.children)
                {
                    Ok(outputs) => self.outputs = Some(outputs),
                    Err(e) => error!(parent = %self.name, error = %e, "Failed to merge child outputs"),
                }
            }
        } else {
            self.outputs = None;
        }

        if next == previous {
            return None;
        }
        self.status = next;
        Some((previous, next))
    }

    /// Whether a child has settled for the current phase.
    fn child_settled(&self, child: &RemoteStackHandle) -> bool {
        match self.phase {
            Phase::Idle => false,
            Phase::Create => {
                matches!(child.status, StackStatus::CreateComplete | StackStatus::CreateFailed)
            }
            Phase::Delete => {
                matches!(
                    child.status,
                    StackStatus::DeleteComplete | StackStatus::DeleteFailed | StackStatus::NotFound
                )
            }
        }
    }

    /// How the current phase ended, if it did.
    pub fn settled(&self) -> Option<Settled> {
        let terminal = match self.phase {
            Phase::Idle => false,
            Phase::Create => {
                matches!(self.status, StackStatus::CreateComplete | StackStatus::CreateFailed)
            }
            Phase::Delete => {
                matches!(self.status, StackStatus::DeleteComplete | StackStatus::DeleteFailed)
            }
        };
        if terminal {
            return Some(Settled::Terminal(self.status));
        }

        let mut unfinished =
            self.children.iter().filter(|c| !self.child_settled(c)).peekable();
        if unfinished.peek().is_none() {
            return None;
        }
        unfinished
            .all(|c| self.stalled.contains(&c.logical_name))
            .then_some(Settled::Stalled)
    }
}
