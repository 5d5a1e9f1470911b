//! Stratus Core Library
//!
//! Orchestration of nested stacks whose children are deployed into several
//! independent regions: concurrent fan-out of create and delete calls, one
//! status monitor per child, and a single aggregation point that folds child
//! statuses and outputs into the parent.

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod monitor;
pub mod observability;
pub mod orchestrator;
pub mod outputs;
pub mod types;

// Re-export commonly used items
pub use config::OrchestratorConfig;
pub use driver::{InMemoryDriver, RemoteStackDriver, SimulationConfig};
pub use error::{Result, StratusError};
pub use events::{Event, EventBus, EventSubscriber, EventType};
pub use monitor::{ChildStackMonitor, MonitorOutcome, MonitorReport, WaitMode};
pub use observability::init as init_observability;
pub use orchestrator::{MultiRegionOrchestrator, ParentStack, Phase};
pub use outputs::{OutputProjection, ParentOutputs, StackOutputAggregator};
pub use types::{
    ChildDeclaration, Outputs, Parameters, RegionId, RemoteStackHandle, RemoteStackId,
    RemoteStackState, StackStatus,
};
