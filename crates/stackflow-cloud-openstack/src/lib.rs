//! OpenStack backend for StackFlow
//!
//! Implements [`stackflow_cloud::CloudClient`] over the OpenStack REST APIs.
//!
//! # Features
//!
//! - Keystone v3 password authentication with project scope
//! - Endpoint discovery from the service catalog (region and interface aware)
//! - Nova, Glance, Keystone, Neutron, Cinder, Designate and Manila resources
//! - Quota lookup per project
//!
//! # Example
//!
//! ```ignore
//! use stackflow_cloud::{ClientConfig, ClientFactory, ResourceKind, Target};
//! use stackflow_cloud_openstack::OpenStackConnector;
//!
//! let config = ClientConfig::from_value(&client_config)?;
//! let client = OpenStackConnector::new().connect(&config).await?;
//!
//! let server = client.get(Target::of(ResourceKind::Server), "5f1c...").await?;
//! ```

pub mod auth;
pub mod catalog;
pub mod client;
pub mod error;
pub mod factory;

pub use auth::Session;
pub use catalog::Catalog;
pub use client::OpenStackClient;
pub use error::{OpenStackError, Result};
pub use factory::OpenStackConnector;
