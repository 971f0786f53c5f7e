//! StackFlow Cloud
//!
//! Cloud client abstraction shared by the StackFlow plugin and its backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 stackflow-core                   │
//! │        (operations, dispatcher, resolvers)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │ ClientFactory::connect
//! ┌─────────────────▼───────────────────────────────┐
//! │                stackflow-cloud                   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait CloudClient { create, get, ... }  │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ ResourceKind │  │ Log bridge   │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │  OpenStack    │ │  MemoryCloud  │
//! │  REST client  │ │  (in-process) │
//! └───────────────┘ └───────────────┘
//! ```

pub mod action;
pub mod client;
pub mod config;
pub mod error;
pub mod kind;
pub mod logging;
pub mod memory;

// Re-exports
pub use action::{Action, ListQuery};
pub use client::{ClientFactory, CloudClient, Target};
pub use config::ClientConfig;
pub use error::{CloudError, Result};
pub use kind::{ResourceKind, Service};
pub use logging::{
    DiscardLogger, HostLogLayer, HostLogger, LogLevel, LoggingConfig, RecordingLogger,
    bridge_dispatch,
};
pub use memory::{Call, MemoryCloud};
