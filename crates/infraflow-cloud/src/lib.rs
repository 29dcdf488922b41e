//! infraflow cloud layer
//!
//! Provides the resource graph that component builders declare into, the
//! provider abstraction that turns a graph into a plan, and the state file
//! that records what has been applied.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 infra CLI                        │
//! │           (preview / up / destroy)               │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               infraflow-aws                      │
//! │   VpcNetwork, SecurityGroup, LaunchTemplate ...  │
//! └─────────────────┬───────────────────────────────┘
//!                   │ declares into
//! ┌─────────────────▼───────────────────────────────┐
//! │               infraflow-cloud                    │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ Stack/Output │  │ trait CloudProvider      │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │  State Mgmt  │  │ LocalProvider            │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod error;
pub mod graph;
pub mod local;
pub mod output;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{Action, ActionType, ApplyResult, Plan, PlanSummary};
pub use error::{CloudError, Result};
pub use graph::{Resource, ResourceBuilder, ResourceKind, ResourceRef, Stack};
pub use local::LocalProvider;
pub use output::{Output, resolve_value, value_references};
pub use provider::{
    CloudInventory, CloudProvider, ImageQuery, ImageRecord, ResourceConfig, ResourceSet,
};
pub use state::{
    GlobalState, ProviderState, RecordedExports, ResourceState, ResourceStatus, StateLock,
    StateManager,
};
