//! Operation dispatcher
//!
//! Every operation body runs through [`run_operation`], which:
//!
//! 1. resolves which endpoint the operation acts on,
//! 2. merges `client_config` / `resource_config` from the node, the runtime
//!    properties and the task inputs,
//! 3. routes `tracing` events to the host logger and connects a client,
//! 4. reconciles external resources,
//! 5. runs the body, then records identity (create) or clears state
//!    (delete),
//! 6. classifies client errors for the host.

use crate::compact;
use crate::context::{AgentInfo, Endpoint, Entity, NodeInfo, OperationContext, RelationshipInstance, Side};
use crate::error::{OperationError, Result};
use crate::external::{self, Outcome, USE_EXTERNAL_RESOURCE};
use crate::resolver::{PropertyRule, Sources, merge_layers, related_targets, resolve_property, targets_through};
use crate::resource::{Resource, default_name, record_str};
use crate::runtime::{ID, NAME, RESOURCE_CONFIG, RuntimeProperties, TYPE};
use crate::types::operations;
use serde_json::{Map, Value};
use stackflow_cloud::{ClientConfig, ClientFactory, CloudError, HostLogger, ResourceKind, bridge_dispatch};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument::WithSubscriber;

pub use futures_util::future::BoxFuture;

pub const IGNORE_UNEXISTED_RESOURCE: &str = "ignore_unexisted_resource";
/// Runtime key holding the zone of a DNS recordset
pub const ZONE_ID: &str = "zone_id";

/// An operation body
pub type Handler = for<'s, 'c> fn(&'s mut Scope<'c>) -> BoxFuture<'s, Result<()>>;

/// Wrap `async fn op(scope: &mut Scope<'_>) -> Result<()>` as a [`Handler`]
macro_rules! handler {
    ($op:path) => {{
        fn wrapped<'s, 'c>(
            scope: &'s mut $crate::dispatch::Scope<'c>,
        ) -> $crate::dispatch::BoxFuture<'s, $crate::error::Result<()>> {
            Box::pin($op(scope))
        }
        wrapped as $crate::dispatch::Handler
    }};
}
pub(crate) use handler;

/// How to run one operation
#[derive(Clone, Copy)]
pub struct OperationSpec {
    /// Kind of the endpoint the operation acts on
    pub kind: ResourceKind,
    pub handler: Handler,
    /// Check run instead of the body when both relationship ends are
    /// external
    pub external_check: Option<Handler>,
}

impl OperationSpec {
    pub fn new(kind: ResourceKind, handler: Handler) -> Self {
        Self {
            kind,
            handler,
            external_check: None,
        }
    }

    pub fn with_external_check(mut self, check: Handler) -> Self {
        self.external_check = Some(check);
        self
    }
}

/// Type of the relationship a relationship operation runs for
#[derive(Debug, Clone)]
pub struct RelationshipMeta {
    pub type_name: String,
    pub type_hierarchy: Vec<String>,
}

impl RelationshipMeta {
    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.type_hierarchy.iter().any(|t| t == type_name)
    }
}

/// Everything an operation body works with
pub struct Scope<'c> {
    /// The endpoint the operation acts on
    pub endpoint: &'c mut Endpoint,
    /// The opposite endpoint of a relationship operation
    pub other: Option<&'c mut Endpoint>,
    pub side: Side,
    pub relationship: Option<RelationshipMeta>,
    pub deployment_id: String,
    pub operation: String,
    pub retry_number: u32,
    pub agent: Option<AgentInfo>,
    pub logger: Arc<dyn HostLogger>,
    /// Node properties, after compact translation
    pub properties: Map<String, Value>,
    pub inputs: Map<String, Value>,
    pub resource: Resource,
}

impl<'c> Scope<'c> {
    pub fn node(&self) -> &NodeInfo {
        &self.endpoint.node
    }

    pub fn instance_id(&self) -> &str {
        &self.endpoint.instance.id
    }

    pub fn runtime(&self) -> &RuntimeProperties {
        &self.endpoint.instance.runtime_properties
    }

    pub fn runtime_mut(&mut self) -> &mut RuntimeProperties {
        &mut self.endpoint.instance.runtime_properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.property(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Boolean flag from the inputs or, failing that, the node properties
    pub fn bool_property(&self, key: &str) -> bool {
        match self.inputs.get(key).or_else(|| self.properties.get(key)) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key).filter(|v| !v.is_null())
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn relationships(&self) -> &[RelationshipInstance] {
        &self.endpoint.instance.relationships
    }

    /// Related instances of `kind`
    pub fn related(&self, kind: ResourceKind) -> Vec<&Endpoint> {
        related_targets(self.relationships(), kind, None)
    }

    /// Related instances connected through `relationship`
    pub fn related_through(&self, relationship: &str) -> Vec<&Endpoint> {
        targets_through(self.relationships(), relationship)
    }

    pub fn resolve(&self, rule: &PropertyRule) -> Result<Option<Value>> {
        let sources = Sources {
            config: &self.resource.config,
            inputs: &self.inputs,
            runtime: &self.endpoint.instance.runtime_properties,
            relationships: &self.endpoint.instance.relationships,
        };
        resolve_property(rule, &sources)
    }

    /// Resolve a single string value
    pub fn resolve_str(&self, rule: &PropertyRule) -> Result<Option<String>> {
        Ok(match self.resolve(rule)? {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Array(items)) => items
                .into_iter()
                .find_map(|item| item.as_str().map(str::to_string)),
            _ => None,
        })
    }

    /// Resolve a list of string values
    pub fn resolve_list(&self, rule: &PropertyRule) -> Result<Vec<Value>> {
        Ok(match self.resolve(rule)? {
            Some(Value::Array(items)) => items,
            Some(value) => vec![value],
            None => Vec::new(),
        })
    }

    /// Opposite endpoint of a relationship operation
    pub fn other(&self) -> Result<&Endpoint> {
        self.other
            .as_deref()
            .ok_or_else(|| OperationError::non_recoverable("operation has no relationship peer"))
    }

    pub fn other_mut(&mut self) -> Result<&mut Endpoint> {
        self.other
            .as_deref_mut()
            .ok_or_else(|| OperationError::non_recoverable("operation has no relationship peer"))
    }

    /// Resource of the opposite endpoint, on the same connection
    pub fn other_resource(&self, kind: ResourceKind) -> Result<Resource> {
        let other = self.other()?;
        let id = endpoint_id(other).ok_or_else(|| {
            OperationError::non_recoverable(format!(
                "{} {} has no id",
                kind, other.node.id
            ))
        })?;
        Ok(self.resource.sibling(kind, Some(id)))
    }

    /// Resource for a related endpoint, on the same connection
    pub fn resource_for(&self, endpoint: &Endpoint, kind: ResourceKind) -> Option<Resource> {
        endpoint_id(endpoint).map(|id| self.resource.sibling(kind, Some(id)))
    }

    /// Whether the acting endpoint is an adopted external resource
    pub fn is_external(&self) -> bool {
        let runtime = self.runtime();
        runtime.is_external() && !runtime.is_conditionally_created()
    }

    /// Record `id`, `name` and `type` of a remote record
    pub fn persist_identity(&mut self, record: &Value) {
        let kind = self.resource.kind;
        let id = record_str(record, "id")
            .map(str::to_string)
            .or_else(|| self.resource.id.clone());
        let name = record_str(record, "name")
            .map(str::to_string)
            .or_else(|| self.resource.name.clone());
        let runtime = self.runtime_mut();
        if let Some(id) = id {
            runtime.set(ID, id);
        }
        if let Some(name) = name {
            runtime.set(NAME, name);
        }
        runtime.set(TYPE, kind.resource_type());
    }

    /// Create the resource unless a previous invocation already did
    ///
    /// The id is recorded as soon as the remote returns it, so a retry
    /// raised later in the same operation resumes instead of creating a
    /// second resource.
    pub async fn create_once(&mut self) -> Result<Value> {
        let body = self.resource.config.clone();
        self.create_once_with(body).await
    }

    pub async fn create_once_with(&mut self, body: Map<String, Value>) -> Result<Value> {
        if self.resource.id.is_some() {
            let record = self.resource.get().await?;
            tracing::debug!(
                kind = %self.resource.kind,
                id = self.resource.label(),
                "already created, resuming"
            );
            return Ok(record);
        }
        let record = self.resource.create_with(body).await?;
        self.persist_identity(&record);
        tracing::info!(
            kind = %self.resource.kind,
            id = self.resource.label(),
            "created"
        );
        Ok(record)
    }

    pub fn retry(&self, message: impl Into<String>, delay: Duration) -> OperationError {
        OperationError::retry(message, delay)
    }
}

/// Remote id recorded on an endpoint
pub fn endpoint_id(endpoint: &Endpoint) -> Option<&str> {
    let runtime = &endpoint.instance.runtime_properties;
    runtime
        .id()
        .or_else(|| runtime.get_str(crate::runtime::EXTERNAL_ID))
}

fn split(ctx: &mut OperationContext, side: Side) -> Option<(&mut Endpoint, Option<&mut Endpoint>)> {
    match (&mut ctx.entity, side) {
        (Entity::Node(endpoint), Side::Current) => Some((endpoint, None)),
        (Entity::Relationship(rel), Side::Source) => Some((&mut rel.source, Some(&mut rel.target))),
        (Entity::Relationship(rel), Side::Target) => Some((&mut rel.target, Some(&mut rel.source))),
        _ => None,
    }
}

/// Message for a client error that reaches the host
fn failure_message(operation: &str, kind: ResourceKind, id: &str, cause: &CloudError) -> String {
    format!("{} failed for {} {}: {}", operation, kind, id, cause)
}

/// Turn an unclassified client error into a host-facing error
fn classify(operation: &str, kind: ResourceKind, id: &str, err: OperationError) -> OperationError {
    match err {
        OperationError::Cloud(cause) => {
            let message = failure_message(operation, kind, id, &cause);
            if cause.is_transient() {
                OperationError::recoverable(message).caused_by(cause)
            } else {
                OperationError::non_recoverable(message).caused_by(cause)
            }
        }
        other => other,
    }
}

/// Run one operation body for `ctx`
pub async fn run_operation(
    ctx: &mut OperationContext,
    factory: &dyn ClientFactory,
    spec: OperationSpec,
    inputs: Map<String, Value>,
) -> Result<()> {
    let side = ctx.resolve()?;
    let operation = ctx.operation.name.clone();
    let deployment_id = ctx.deployment_id.clone();
    let retry_number = ctx.operation.retry_number;
    let agent = ctx.agent.clone();
    let logger = ctx.logger.clone();
    let relationship = ctx.relationship_context().map(|rel| RelationshipMeta {
        type_name: rel.type_name.clone(),
        type_hierarchy: rel.type_hierarchy.clone(),
    });

    let (endpoint, other) = split(ctx, side).ok_or_else(|| {
        OperationError::non_recoverable(format!("no {} endpoint in context", side.as_str()))
    })?;

    let kind = spec.kind;
    let properties = compact::translate(kind, &endpoint.node.properties);
    let runtime = &endpoint.instance.runtime_properties;
    let client_config = merge_layers([
        properties.get("client_config"),
        runtime.get("client_config"),
        inputs.get("client_config"),
    ]);
    let resource_config = merge_layers([
        properties.get("resource_config"),
        runtime.get(RESOURCE_CONFIG),
        inputs.get("resource_config"),
    ]);
    let client_config = ClientConfig::from_value(&Value::Object(client_config))
        .map_err(|e| OperationError::non_recoverable(format!("invalid client_config for {}", kind)).caused_by(e))?;
    let dispatch = bridge_dispatch(logger.clone(), &client_config.logging);

    async move {
        tracing::debug!(operation = %operation, kind = %kind, side = side.as_str(), "running operation");

        let client = match factory.connect(&client_config).await {
            Ok(client) => client,
            Err(e) => {
                let err = classify(&operation, kind, "<unknown>", e.into());
                tracing::error!("{}", err);
                return Err(err);
            }
        };

        let mut resource = Resource::new(kind, client, client_config, resource_config);
        let runtime = &endpoint.instance.runtime_properties;
        if kind.accepts_name() && resource.name.is_none() {
            let name = runtime
                .get_str(NAME)
                .map(str::to_string)
                .unwrap_or_else(|| default_name(kind, &deployment_id, &endpoint.instance.id));
            resource.config.insert("name".into(), Value::String(name.clone()));
            resource.name = Some(name);
        }
        resource.id = runtime.id().map(str::to_string);

        let mut scope = Scope {
            endpoint,
            other,
            side,
            relationship,
            deployment_id,
            operation,
            retry_number,
            agent,
            logger,
            properties,
            inputs,
            resource,
        };

        let result = execute(&mut scope, &spec).await;
        finish(&mut scope, result)
    }
    .with_subscriber(dispatch)
    .await
}

async fn execute(scope: &mut Scope<'_>, spec: &OperationSpec) -> Result<()> {
    if scope.resource.kind.requires_parent() {
        let recorded = scope.runtime().get_str(ZONE_ID).map(str::to_string);
        scope.resource.parent_id = match recorded {
            Some(zone) => Some(zone),
            None => scope.resolve_str(&PropertyRule::related(ZONE_ID, ResourceKind::DnsZone))?,
        };
    }

    match &scope.relationship {
        None => {
            if scope.bool_property(USE_EXTERNAL_RESOURCE)
                && external::reconcile(scope).await? == Outcome::Skip
            {
                return Ok(());
            }
        }
        Some(relationship) => {
            let both_external = external::is_unowned_external(&*scope.endpoint)
                && scope.other.as_deref().is_some_and(external::is_unowned_external);
            if both_external {
                let type_name = relationship.type_name.clone();
                if let Some(check) = spec.external_check {
                    check(scope).await?;
                }
                tracing::info!(
                    relationship = %type_name,
                    "both ends are external resources, skipping {}",
                    crate::types::verb(&scope.operation)
                );
                return Ok(());
            }
        }
    }

    (spec.handler)(scope).await
}

fn finish(scope: &mut Scope<'_>, result: Result<()>) -> Result<()> {
    let is_node_op = scope.relationship.is_none();
    let kind = scope.resource.kind;

    match result {
        Ok(()) => {
            if is_node_op && scope.operation == operations::CREATE {
                let id = scope.resource.id.clone();
                let name = scope.resource.name.clone();
                let runtime = scope.runtime_mut();
                if let Some(id) = id {
                    runtime.set(ID, id);
                }
                match name {
                    Some(name) => runtime.set(NAME, name),
                    // nameless kinds still expose the key
                    None if !runtime.contains(NAME) => runtime.set(NAME, ""),
                    None => {}
                }
                runtime.set(TYPE, kind.resource_type());
            } else if is_node_op && scope.operation == operations::DELETE {
                scope.runtime_mut().clear();
            }
            tracing::debug!(operation = %scope.operation, "operation succeeded");
            Ok(())
        }
        Err(err)
            if is_node_op
                && scope.operation == operations::DELETE
                && err.is_not_found()
                && scope.bool_property(IGNORE_UNEXISTED_RESOURCE) =>
        {
            tracing::info!(kind = %kind, id = scope.resource.label(), "resource not found, nothing to delete");
            scope.runtime_mut().clear();
            Ok(())
        }
        Err(err) => {
            let err = classify(&scope.operation, kind, scope.resource.label(), err);
            if err.is_retry() {
                tracing::info!("{}", err);
            } else {
                tracing::error!("{}", err);
            }
            Err(err)
        }
    }
}
