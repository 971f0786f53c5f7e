//! Resource instances
//!
//! A [`Resource`] binds one kind to a connected client, the effective
//! `client_config` and `resource_config`, and the remote id once known.
//! Kind-specific calls live on small borrowed views (`resource.server()`,
//! `resource.router()`, ...).

mod admin;
mod network;
mod server;
mod share;

pub use admin::{AggregateApi, ExtraSpecsApi, ProjectApi};
pub use network::{RbacApi, RouterApi};
pub use server::ServerApi;
pub use share::ShareApi;

use crate::error::{OperationError, Result};
use serde_json::{Map, Value};
use stackflow_cloud::{Action, ClientConfig, CloudClient, ListQuery, ResourceKind, Target};
use std::sync::Arc;

pub struct Resource {
    pub kind: ResourceKind,
    client: Arc<dyn CloudClient>,
    pub client_config: ClientConfig,
    /// Effective `resource_config`
    pub config: Map<String, Value>,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Owning zone of a DNS recordset
    pub parent_id: Option<String>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent_id", &self.parent_id)
            .finish_non_exhaustive()
    }
}

impl Resource {
    pub fn new(
        kind: ResourceKind,
        client: Arc<dyn CloudClient>,
        client_config: ClientConfig,
        config: Map<String, Value>,
    ) -> Self {
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            kind,
            client,
            client_config,
            config,
            id: None,
            name,
            parent_id: None,
        }
    }

    /// Another resource on the same connection
    pub fn sibling(&self, kind: ResourceKind, id: Option<&str>) -> Resource {
        let mut resource = Resource::new(
            kind,
            self.client.clone(),
            self.client_config.clone(),
            Map::new(),
        );
        resource.id = id.map(str::to_string);
        resource
    }

    pub fn client(&self) -> &Arc<dyn CloudClient> {
        &self.client
    }

    pub fn target(&self) -> Target<'_> {
        Target {
            kind: self.kind,
            parent: self.parent_id.as_deref(),
        }
    }

    pub fn require_id(&self) -> Result<&str> {
        self.id.as_deref().ok_or_else(|| {
            OperationError::non_recoverable(format!(
                "{} has no id; it was never created or adopted",
                self.kind
            ))
        })
    }

    /// Display label used in messages: the id, or `<unknown>`
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or("<unknown>")
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Create from the effective `resource_config`
    pub async fn create(&mut self) -> Result<Value> {
        let body = self.config.clone();
        self.create_with(body).await
    }

    /// Create from an explicit body
    ///
    /// `id` is never sent; the remote assigns it.
    pub async fn create_with(&mut self, mut body: Map<String, Value>) -> Result<Value> {
        body.remove("id");
        if !self.kind.accepts_name() {
            body.remove("name");
        }
        tracing::debug!(kind = %self.kind, "creating");
        let record = self.client.create(self.target(), Value::Object(body)).await?;
        if let Some(id) = record.get("id").and_then(Value::as_str) {
            self.id = Some(id.to_string());
        }
        if let Some(name) = record.get("name").and_then(Value::as_str) {
            self.name = Some(name.to_string());
        }
        Ok(record)
    }

    pub async fn get(&self) -> Result<Value> {
        let id = self.require_id()?;
        Ok(self.client.get(self.target(), id).await?)
    }

    /// Look up the remote by id, then by name
    ///
    /// The id is `self.id` or `resource_config.id`; an id that does not
    /// resolve is retried as a name, since blueprints may reference external
    /// resources either way.
    pub async fn find(&self) -> Result<Option<Value>> {
        let key = self
            .id
            .clone()
            .or_else(|| self.config_str("id").map(str::to_string));

        if let Some(key) = &key {
            match self.client.get(self.target(), key).await {
                Ok(record) => return Ok(Some(record)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let name = match key.or_else(|| self.name.clone()) {
            Some(name) if self.kind.accepts_name() => name,
            _ => return Ok(None),
        };
        let mut matches = self
            .client
            .list(self.target(), &ListQuery::new().with("name", name.as_str()))
            .await?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(OperationError::non_recoverable(format!(
                "{} {} is ambiguous: {} resources carry that name",
                self.kind, name, n
            ))),
        }
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Value>> {
        Ok(self.client.list(self.target(), query).await?)
    }

    pub async fn update(&self, body: Map<String, Value>) -> Result<Value> {
        let id = self.require_id()?;
        Ok(self
            .client
            .update(self.target(), id, Value::Object(body))
            .await?)
    }

    pub async fn delete(&self) -> Result<()> {
        let id = self.require_id()?;
        tracing::debug!(kind = %self.kind, id, "deleting");
        Ok(self.client.delete(self.target(), id).await?)
    }

    pub async fn action(&self, action: Action) -> Result<Value> {
        let id = self.require_id()?;
        Ok(self.client.action(self.target(), id, action).await?)
    }

    pub fn server(&self) -> ServerApi<'_> {
        ServerApi::new(self)
    }

    pub fn router(&self) -> RouterApi<'_> {
        RouterApi::new(self)
    }

    pub fn rbac(&self) -> RbacApi<'_> {
        RbacApi::new(self)
    }

    pub fn aggregate(&self) -> AggregateApi<'_> {
        AggregateApi::new(self)
    }

    pub fn project(&self) -> ProjectApi<'_> {
        ProjectApi::new(self)
    }

    pub fn extra_specs(&self) -> ExtraSpecsApi<'_> {
        ExtraSpecsApi::new(self)
    }

    pub fn share(&self) -> ShareApi<'_> {
        ShareApi::new(self)
    }
}

/// Default resource name: `<type>-<deployment>-<instance>`
///
/// Characters of the instance id outside `[A-Za-z0-9-]` become `-`.
pub fn default_name(kind: ResourceKind, deployment_id: &str, instance_id: &str) -> String {
    let instance: String = instance_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("{}-{}-{}", kind.resource_type(), deployment_id, instance)
}

pub(crate) fn record_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackflow_cloud::MemoryCloud;

    fn resource(cloud: &MemoryCloud, kind: ResourceKind, config: Value) -> Resource {
        Resource::new(
            kind,
            Arc::new(cloud.clone()),
            ClientConfig::default(),
            config.as_object().cloned().unwrap_or_default(),
        )
    }

    #[test]
    fn test_default_name_sanitizes_instance() {
        assert_eq!(
            default_name(ResourceKind::Port, "dep1", "port_a1b2.c"),
            "port-dep1-port-a1b2-c"
        );
    }

    #[tokio::test]
    async fn test_create_never_sends_id() {
        let cloud = MemoryCloud::new();
        let mut net = resource(&cloud, ResourceKind::Network, json!({"id": "ext", "name": "n"}));
        let record = net.create().await.unwrap();

        assert_ne!(record["id"], "ext");
        assert_eq!(net.id.as_deref(), record["id"].as_str());
        assert!(net.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_find_falls_back_to_name() {
        let cloud = MemoryCloud::new();
        let id = cloud.insert(ResourceKind::Network, json!({"name": "public"}));

        let by_name = resource(&cloud, ResourceKind::Network, json!({"id": "public"}));
        let found = by_name.find().await.unwrap().unwrap();
        assert_eq!(found["id"], id.as_str());

        let missing = resource(&cloud, ResourceKind::Network, json!({"id": "nope"}));
        assert!(missing.find().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_without_id_is_non_recoverable() {
        let cloud = MemoryCloud::new();
        let net = resource(&cloud, ResourceKind::Network, json!({}));
        assert!(net.get().await.unwrap_err().is_non_recoverable());
    }
}
