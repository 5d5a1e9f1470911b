//! Child stack domain types.

use crate::types::StackStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Input parameters of a child stack.
pub type Parameters = BTreeMap<String, String>;

/// Outputs reported by a completed child stack.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Opaque identifier of a regional deployment endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier assigned by a region once a create call is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteStackId(String);

impl RemoteStackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteStackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declaration of one child stack, as produced by the resource graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildDeclaration {
    /// Unique key within the parent (e.g. `stack_one`)
    pub logical_name: String,

    /// Target region
    pub region_id: RegionId,

    /// Desired input parameters
    #[serde(default)]
    pub parameters: Parameters,
}

impl ChildDeclaration {
    pub fn new(logical_name: impl Into<String>, region_id: impl Into<RegionId>) -> Self {
        Self {
            logical_name: logical_name.into(),
            region_id: region_id.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Remote status as read from a region in one `get_status` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStackState {
    pub status: StackStatus,

    /// Present only for CREATE_COMPLETE
    #[serde(default)]
    pub outputs: Option<Outputs>,

    /// Present only for failed statuses
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl RemoteStackState {
    pub fn new(status: StackStatus) -> Self {
        Self { status, outputs: None, error_detail: None }
    }

    pub fn complete(outputs: Outputs) -> Self {
        Self { status: StackStatus::CreateComplete, outputs: Some(outputs), error_detail: None }
    }

    pub fn failed(status: StackStatus, detail: impl Into<String>) -> Self {
        Self { status, outputs: None, error_detail: Some(detail.into()) }
    }
}

/// One child stack tracked by a parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStackHandle {
    /// Target region
    pub region_id: RegionId,

    /// Unique key within the parent
    pub logical_name: String,

    /// Input parameters (fixed once the create call is issued)
    pub parameters: Parameters,

    /// Remote identifier, set once the region accepted the create call
    pub remote_id: Option<RemoteStackId>,

    /// Latest known status
    pub status: StackStatus,

    /// Outputs, non-empty only in CREATE_COMPLETE
    pub outputs: Outputs,

    /// Failure message, set only in a failed status
    pub error_detail: Option<String>,
}

impl RemoteStackHandle {
    /// Create a PENDING handle from its declaration.
    pub fn new(declaration: ChildDeclaration) -> Self {
        Self {
            region_id: declaration.region_id,
            logical_name: declaration.logical_name,
            parameters: declaration.parameters,
            remote_id: None,
            status: StackStatus::Pending,
            outputs: Outputs::new(),
            error_detail: None,
        }
    }

    /// Record the identifier returned by a successful create call.
    pub fn mark_created(&mut self, remote_id: RemoteStackId) -> bool {
        if self.remote_id.is_some() || self.status != StackStatus::Pending {
            return false;
        }
        self.remote_id = Some(remote_id);
        self.status = StackStatus::CreateInProgress;
        true
    }

    /// Apply an observed remote state.
    ///
    /// Returns `false` (and leaves the handle untouched) when the observation
    /// would move the status backwards or sideways.
    pub fn observe(&mut self, state: RemoteStackState) -> bool {
        if !self.status.can_transition_to(state.status) {
            debug!(
                child = %self.logical_name,
                from = %self.status,
                to = %state.status,
                "Ignoring out-of-order status observation"
            );
            return false;
        }

        let changed = self.status != state.status;
        self.status = state.status;

        self.outputs = match state.status {
            StackStatus::CreateComplete => state.outputs.unwrap_or_default(),
            _ => Outputs::new(),
        };
        self.error_detail = if state.status.is_failed() {
            Some(state.error_detail.unwrap_or_else(|| format!("{} reported", state.status)))
        } else {
            None
        };

        changed
    }
}
