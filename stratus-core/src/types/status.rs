//! Stack lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by child stacks and the parent aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    /// Declared, no create call has succeeded yet
    Pending,

    /// Remote create accepted, still converging
    CreateInProgress,

    /// Remote stack created
    CreateComplete,

    /// Remote create failed
    CreateFailed,

    /// Remote delete accepted, still converging
    DeleteInProgress,

    /// Remote stack deleted
    DeleteComplete,

    /// Remote delete failed
    DeleteFailed,

    /// Remote system has no record of the stack
    NotFound,
}

impl StackStatus {
    /// Status name as reported by regional endpoints (e.g. `CREATE_COMPLETE`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::DeleteFailed => "DELETE_FAILED",
            Self::NotFound => "NOT_FOUND",
        }
    }

    /// `*_COMPLETE` statuses.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::CreateComplete | Self::DeleteComplete)
    }

    /// `*_FAILED` statuses.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::CreateFailed | Self::DeleteFailed)
    }

    /// Polling stops on these. NOT_FOUND is terminal; what it means is decided
    /// by the waiting operation.
    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_failed() || *self == Self::NotFound
    }

    /// Whether the stack no longer exists remotely.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::DeleteComplete | Self::NotFound)
    }

    /// Whether the status belongs to the delete half of the lifecycle.
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Self::DeleteInProgress | Self::DeleteComplete | Self::DeleteFailed | Self::NotFound
        )
    }

    /// Legal transitions of a child stack.
    ///
    /// Repeating the current status is always allowed. Creation only moves
    /// forward; any state may enter deletion; a failed delete may be retried.
    pub fn can_transition_to(&self, next: StackStatus) -> bool {
        use StackStatus::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Pending, CreateInProgress | CreateFailed) => true,
            (CreateInProgress, CreateComplete | CreateFailed) => true,
            (DeleteComplete | NotFound, _) => false,
            (DeleteFailed, DeleteInProgress | DeleteComplete | NotFound) => true,
            (DeleteFailed, _) => false,
            (DeleteInProgress, DeleteComplete | DeleteFailed | NotFound) => true,
            (DeleteInProgress, _) => false,
            (_, DeleteInProgress | DeleteComplete | DeleteFailed | NotFound) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StackStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CREATE_IN_PROGRESS" => Ok(Self::CreateInProgress),
            "CREATE_COMPLETE" => Ok(Self::CreateComplete),
            "CREATE_FAILED" => Ok(Self::CreateFailed),
            "DELETE_IN_PROGRESS" => Ok(Self::DeleteInProgress),
            "DELETE_COMPLETE" => Ok(Self::DeleteComplete),
            "DELETE_FAILED" => Ok(Self::DeleteFailed),
            "NOT_FOUND" => Ok(Self::NotFound),
            other => Err(format!("unknown stack status: {other}")),
        }
    }
}
