//! Opaque cloud client seam

use crate::action::{Action, ListQuery};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::kind::ResourceKind;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Address of a resource collection
///
/// Most kinds are addressed by kind alone; DNS recordsets also need the
/// owning zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub kind: ResourceKind,
    pub parent: Option<&'a str>,
}

impl<'a> Target<'a> {
    pub fn of(kind: ResourceKind) -> Self {
        Self { kind, parent: None }
    }

    pub fn within(kind: ResourceKind, parent: &'a str) -> Self {
        Self {
            kind,
            parent: Some(parent),
        }
    }
}

impl From<ResourceKind> for Target<'_> {
    fn from(kind: ResourceKind) -> Self {
        Target::of(kind)
    }
}

/// Cloud API abstraction
///
/// Implementations speak to one authenticated project. Resource bodies are
/// the plain (unenveloped) JSON objects of the underlying API. A missing
/// resource is always reported as [`CloudError::NotFound`](crate::CloudError).
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Create a resource and return the remote record
    async fn create(&self, target: Target<'_>, body: Value) -> Result<Value>;

    /// Fetch a resource by id
    async fn get(&self, target: Target<'_>, id: &str) -> Result<Value>;

    /// List resources matching every filter in `query`
    async fn list(&self, target: Target<'_>, query: &ListQuery) -> Result<Vec<Value>>;

    /// Apply a partial update and return the new record
    async fn update(&self, target: Target<'_>, id: &str, body: Value) -> Result<Value>;

    /// Delete a resource
    async fn delete(&self, target: Target<'_>, id: &str) -> Result<()>;

    /// Run a kind-specific action
    async fn action(&self, target: Target<'_>, id: &str, action: Action) -> Result<Value>;

    /// Project quota for a kind; `-1` means unlimited
    async fn quota(&self, kind: ResourceKind, project_id: &str) -> Result<i64>;

    /// Id of the project the client is scoped to
    async fn project_id(&self) -> Result<String>;
}

/// Builds a fresh client for one operation
///
/// Clients are request-scoped: the dispatcher calls `connect` once per
/// operation invocation and drops the handle when the operation returns.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn CloudClient>>;
}
