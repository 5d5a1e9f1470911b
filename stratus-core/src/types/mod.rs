//! Core domain types for stratus.

pub mod handle;
pub mod status;

// Re-exports
pub use handle::{
    ChildDeclaration, Outputs, Parameters, RegionId, RemoteStackHandle, RemoteStackId,
    RemoteStackState,
};
pub use status::StackStatus;
