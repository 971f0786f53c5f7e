//! StackFlow Core
//!
//! OpenStack lifecycle operations for an orchestration host: servers,
//! volumes, networking, identity, DNS and shared file systems.
//!
//! The host hands over an [`OperationContext`] (node or relationship, its
//! properties and runtime properties) and an operation name;
//! [`Plugin::invoke`] resolves configuration, talks to the cloud through a
//! [`stackflow_cloud::CloudClient`], updates the runtime properties in place
//! and reports the outcome as an [`OperationError`] class: non-recoverable,
//! recoverable or retry.
//!
//! ```text
//! OperationContext ──▶ registry ──▶ dispatch::run_operation
//!                                     │  resolve config (resolver)
//!                                     │  external resources (external)
//!                                     ▼
//!                              operations::<family>
//!                                     │
//!                                     ▼
//!                       resource::Resource ──▶ CloudClient
//! ```

pub mod compact;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod external;
pub mod operations;
pub mod pairing;
pub mod quota;
pub mod registry;
pub mod resolver;
pub mod resource;
pub mod runtime;
pub mod tasks;
pub mod types;
pub mod userdata;

// Re-exports
pub use context::{
    AgentInfo, Endpoint, Entity, InstanceInfo, NodeInfo, OperationContext, OperationInfo,
    RelationshipContext, RelationshipInstance, Side,
};
pub use error::{OperationError, Result};
pub use registry::{Plugin, describe_routes};
pub use runtime::RuntimeProperties;
