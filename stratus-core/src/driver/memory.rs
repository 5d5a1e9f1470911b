//! In-memory driver simulating a set of regions.
//!
//! Every simulated stack behaves like a stack holding a single test resource:
//! its `value` parameter is echoed back as the `value` output, and a `fail`
//! parameter set to `true` makes the creation fail. Stacks converge after a
//! configurable number of polls, which keeps tests deterministic.

use super::RemoteStackDriver;
use crate::error::{Result, StratusError};
use crate::types::{
    Outputs, Parameters, RegionId, RemoteStackId, RemoteStackState, StackStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Parameter echoed back as the `value` output.
pub const VALUE_PARAMETER: &str = "value";

/// Parameter that makes a simulated stack fail when set to `true`.
pub const FAIL_PARAMETER: &str = "fail";

/// Timing of simulated stacks.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Polls answered with CREATE_IN_PROGRESS before a stack settles
    pub create_polls: u32,

    /// Polls answered with DELETE_IN_PROGRESS before a stack is gone
    pub delete_polls: u32,

    /// Answer DELETE_COMPLETE once before the stack disappears (NOT_FOUND)
    pub report_delete_complete: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { create_polls: 2, delete_polls: 1, report_delete_complete: true }
    }
}

#[derive(Debug)]
struct SimulatedStack {
    parameters: Parameters,
    status: StackStatus,
    remaining_polls: u32,
}

impl SimulatedStack {
    fn should_fail(&self) -> bool {
        self.parameters.get(FAIL_PARAMETER).is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn settle_create(&mut self) {
        self.status = if self.should_fail() {
            StackStatus::CreateFailed
        } else {
            StackStatus::CreateComplete
        };
    }

    fn state(&self) -> RemoteStackState {
        match self.status {
            StackStatus::CreateComplete => {
                let mut outputs = Outputs::new();
                let value = self
                    .parameters
                    .get(VALUE_PARAMETER)
                    .map(|v| serde_json::Value::String(v.clone()))
                    .unwrap_or(serde_json::Value::Null);
                outputs.insert(VALUE_PARAMETER.to_string(), value);
                RemoteStackState::complete(outputs)
            }
            StackStatus::CreateFailed => RemoteStackState::failed(
                StackStatus::CreateFailed,
                "Resource CREATE failed: ValueError: Test Resource failed string",
            ),
            status => RemoteStackState::new(status),
        }
    }
}

#[derive(Debug, Default)]
struct RegionState {
    stacks: HashMap<RemoteStackId, SimulatedStack>,
    unreachable: bool,
    pending_poll_errors: u32,
}

/// Driver backed by in-process simulated regions.
pub struct InMemoryDriver {
    config: SimulationConfig,
    regions: Mutex<HashMap<RegionId, RegionState>>,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryDriver {
    /// Create a driver serving `regions`.
    pub fn new<I, R>(regions: I, config: SimulationConfig) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RegionId>,
    {
        let regions = regions.into_iter().map(|r| (r.into(), RegionState::default())).collect();
        Self {
            config,
            regions: Mutex::new(regions),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Make a region refuse every call until reset.
    pub async fn set_unreachable(&self, region: &RegionId, unreachable: bool) {
        let mut regions = self.regions.lock().await;
        regions.entry(region.clone()).or_default().unreachable = unreachable;
    }

    /// Fail the next `count` status reads in `region` with a transient error.
    pub async fn inject_poll_errors(&self, region: &RegionId, count: u32) {
        let mut regions = self.regions.lock().await;
        regions.entry(region.clone()).or_default().pending_poll_errors = count;
    }

    /// Number of stacks a region still knows about.
    pub async fn stack_count(&self, region: &RegionId) -> usize {
        let regions = self.regions.lock().await;
        regions.get(region).map_or(0, |r| r.stacks.len())
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStackDriver for InMemoryDriver {
    async fn create(&self, region: &RegionId, parameters: &Parameters) -> Result<RemoteStackId> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let mut regions = self.regions.lock().await;
        let state = regions.get_mut(region).ok_or_else(|| StratusError::CreateFailed {
            region: region.clone(),
            reason: "unknown region".to_string(),
        })?;
        if state.unreachable {
            return Err(StratusError::CreateFailed {
                region: region.clone(),
                reason: "endpoint unreachable".to_string(),
            });
        }

        let remote_id = RemoteStackId::new(uuid::Uuid::new_v4().to_string());
        state.stacks.insert(
            remote_id.clone(),
            SimulatedStack {
                parameters: parameters.clone(),
                status: StackStatus::CreateInProgress,
                remaining_polls: self.config.create_polls,
            },
        );

        debug!(region = %region, remote_id = %remote_id, "Simulated stack create accepted");
        Ok(remote_id)
    }

    async fn get_status(
        &self,
        region: &RegionId,
        remote_id: &RemoteStackId,
    ) -> Result<RemoteStackState> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let mut regions = self.regions.lock().await;
        let state = regions.get_mut(region).ok_or_else(|| StratusError::Poll {
            region: region.clone(),
            reason: "unknown region".to_string(),
        })?;
        if state.unreachable {
            return Err(StratusError::Poll {
                region: region.clone(),
                reason: "endpoint unreachable".to_string(),
            });
        }
        if state.pending_poll_errors > 0 {
            state.pending_poll_errors -= 1;
            return Err(StratusError::Poll {
                region: region.clone(),
                reason: "transient read failure".to_string(),
            });
        }

        let Some(stack) = state.stacks.get_mut(remote_id) else {
            return Ok(RemoteStackState::new(StackStatus::NotFound));
        };

        match stack.status {
            StackStatus::CreateInProgress if stack.remaining_polls > 0 => {
                stack.remaining_polls -= 1;
            }
            StackStatus::CreateInProgress => stack.settle_create(),
            StackStatus::DeleteInProgress if stack.remaining_polls > 0 => {
                stack.remaining_polls -= 1;
            }
            StackStatus::DeleteInProgress if self.config.report_delete_complete => {
                stack.status = StackStatus::DeleteComplete;
            }
            StackStatus::DeleteInProgress | StackStatus::DeleteComplete => {
                state.stacks.remove(remote_id);
                return Ok(RemoteStackState::new(StackStatus::NotFound));
            }
            _ => {}
        }

        Ok(stack.state())
    }

    async fn delete(&self, region: &RegionId, remote_id: &RemoteStackId) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let mut regions = self.regions.lock().await;
        let state = regions.get_mut(region).ok_or_else(|| StratusError::DeleteFailed {
            region: region.clone(),
            reason: "unknown region".to_string(),
        })?;
        if state.unreachable {
            return Err(StratusError::DeleteFailed {
                region: region.clone(),
                reason: "endpoint unreachable".to_string(),
            });
        }

        let stack = state.stacks.get_mut(remote_id).ok_or_else(|| {
            StratusError::RemoteNotFound { region: region.clone(), remote_id: remote_id.clone() }
        })?;

        if !matches!(stack.status, StackStatus::DeleteInProgress | StackStatus::DeleteComplete) {
            stack.status = StackStatus::DeleteInProgress;
            stack.remaining_polls = self.config.delete_polls;
        }

        debug!(region = %region, remote_id = %remote_id, "Simulated stack delete accepted");
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> RegionId {
        RegionId::new("RegionOne")
    }

    fn params(value: &str) -> Parameters {
        let mut params = Parameters::new();
        params.insert(VALUE_PARAMETER.to_string(), value.to_string());
        params
    }

    #[tokio::test]
    async fn test_stack_completes_after_configured_polls() {
        let driver = InMemoryDriver::new(["RegionOne"], SimulationConfig::default());
        let id = driver.create(&region(), &params("test1")).await.unwrap();

        for _ in 0..2 {
            let state = driver.get_status(&region(), &id).await.unwrap();
            assert_eq!(state.status, StackStatus::CreateInProgress);
        }

        let state = driver.get_status(&region(), &id).await.unwrap();
        assert_eq!(state.status, StackStatus::CreateComplete);
        assert_eq!(state.outputs.unwrap()["value"], serde_json::json!("test1"));
    }

    #[tokio::test]
    async fn test_fail_parameter_fails_creation() {
        let config = SimulationConfig { create_polls: 0, ..Default::default() };
        let driver = InMemoryDriver::new(["RegionOne"], config);
        let mut parameters = params("test2");
        parameters.insert(FAIL_PARAMETER.to_string(), "True".to_string());

        let id = driver.create(&region(), &parameters).await.unwrap();
        let state = driver.get_status(&region(), &id).await.unwrap();

        assert_eq!(state.status, StackStatus::CreateFailed);
        assert!(state.error_detail.unwrap().contains("Test Resource failed"));
    }

    #[tokio::test]
    async fn test_deleted_stack_reports_not_found() {
        let config = SimulationConfig { create_polls: 0, delete_polls: 0, ..Default::default() };
        let driver = InMemoryDriver::new(["RegionOne"], config);
        let id = driver.create(&region(), &params("x")).await.unwrap();

        driver.delete(&region(), &id).await.unwrap();
        let state = driver.get_status(&region(), &id).await.unwrap();
        assert_eq!(state.status, StackStatus::DeleteComplete);

        let state = driver.get_status(&region(), &id).await.unwrap();
        assert_eq!(state.status, StackStatus::NotFound);
        assert_eq!(driver.stack_count(&region()).await, 0);

        let err = driver.delete(&region(), &id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_region_rejects_create() {
        let driver = InMemoryDriver::new(["RegionOne"], SimulationConfig::default());
        let err = driver.create(&RegionId::new("Nowhere"), &params("x")).await.unwrap_err();
        assert!(matches!(err, StratusError::CreateFailed { .. }));
    }

    #[tokio::test]
    async fn test_injected_poll_errors_are_transient() {
        let driver = InMemoryDriver::new(["RegionOne"], SimulationConfig::default());
        let id = driver.create(&region(), &params("x")).await.unwrap();
        driver.inject_poll_errors(&region(), 1).await;

        assert!(matches!(
            driver.get_status(&region(), &id).await,
            Err(StratusError::Poll { .. })
        ));
        assert!(driver.get_status(&region(), &id).await.is_ok());
    }
}
