//! Regional deployment driver abstraction.
//!
//! The orchestrator talks to every region through the `RemoteStackDriver`
//! trait. Concrete transports live outside this crate; `InMemoryDriver`
//! simulates a set of regions for tests and local harnesses.

use crate::error::Result;
use crate::types::{Parameters, RegionId, RemoteStackId, RemoteStackState};
use async_trait::async_trait;

pub mod memory;

pub use memory::{InMemoryDriver, SimulationConfig};

/// Regional deployment API consumed by the orchestrator.
///
/// One driver instance is shared by all monitors, so implementations must be
/// stateless per call or synchronize internally.
#[async_trait]
pub trait RemoteStackDriver: Send + Sync {
    /// Ask `region` to create a stack with `parameters`.
    ///
    /// Returns the remote identifier once the region accepted the request.
    /// Errors surface as the child's CREATE_FAILED; they are not retried.
    async fn create(&self, region: &RegionId, parameters: &Parameters) -> Result<RemoteStackId>;

    /// Read the current status of a remote stack.
    ///
    /// Must return within a single bounded call. A stack the region no longer
    /// knows is reported as NOT_FOUND or as `StratusError::RemoteNotFound`.
    async fn get_status(
        &self,
        region: &RegionId,
        remote_id: &RemoteStackId,
    ) -> Result<RemoteStackState>;

    /// Request deletion of a remote stack.
    ///
    /// Deleting a stack that is already gone may return `Ok` or
    /// `StratusError::RemoteNotFound`; callers treat both as success.
    async fn delete(&self, region: &RegionId, remote_id: &RemoteStackId) -> Result<()>;

    /// Driver name (for logging).
    fn name(&self) -> &str;
}
