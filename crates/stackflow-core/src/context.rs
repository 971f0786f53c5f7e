//! Operation context supplied by the host
//!
//! One [`OperationContext`] describes a single operation invocation: the
//! node (or relationship) being operated on, its runtime properties, and the
//! host logger. The host serializes it as JSON; the `stackflow` binary reads it
//! from a file.

use crate::error::{OperationError, Result};
use crate::runtime::RuntimeProperties;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stackflow_cloud::{DiscardLogger, HostLogger};
use std::sync::Arc;

#[derive(Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub deployment_id: String,

    pub operation: OperationInfo,

    #[serde(flatten)]
    pub entity: Entity,

    /// Agent installation details, present when the host installs an agent
    /// on the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,

    #[serde(skip, default = "default_logger")]
    pub logger: Arc<dyn HostLogger>,
}

fn default_logger() -> Arc<dyn HostLogger> {
    Arc::new(DiscardLogger)
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("deployment_id", &self.deployment_id)
            .field("operation", &self.operation)
            .field("entity", &self.entity)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    #[serde(default)]
    pub retry_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_method: Option<String>,
}

impl AgentInfo {
    /// Init script to inject into user data, if the agent is installed
    /// through it
    pub fn init_script(&self) -> Option<&str> {
        let method = self.install_method.as_deref().unwrap_or("init_script");
        if method != "init_script" {
            return None;
        }
        self.init_script.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// What the operation runs on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Node(Endpoint),
    Relationship(RelationshipContext),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipContext {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub type_hierarchy: Vec<String>,
    /// Node id of the side the host invoked the operation on
    pub caller_node_id: String,
    pub source: Endpoint,
    pub target: Endpoint,
}

impl RelationshipContext {
    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.type_hierarchy.iter().any(|t| t == type_name)
    }
}

/// A node and one of its instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeInfo,
    pub instance: InstanceInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub type_hierarchy: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl NodeInfo {
    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.type_hierarchy.iter().any(|t| t == type_name)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    pub fn bool_property(&self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    #[serde(default)]
    pub runtime_properties: RuntimeProperties,
    #[serde(default)]
    pub relationships: Vec<RelationshipInstance>,
}

/// Outgoing relationship of an instance, with the target's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipInstance {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub type_hierarchy: Vec<String>,
    pub target: Endpoint,
}

impl RelationshipInstance {
    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name == type_name || self.type_hierarchy.iter().any(|t| t == type_name)
    }
}

/// Which endpoint an operation reads and mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Current,
    Source,
    Target,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Current => "current",
            Side::Source => "source",
            Side::Target => "target",
        }
    }
}

impl OperationContext {
    /// Context for a node operation
    pub fn node(
        deployment_id: impl Into<String>,
        operation: impl Into<String>,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            operation: OperationInfo {
                name: operation.into(),
                ..Default::default()
            },
            entity: Entity::Node(endpoint),
            agent: None,
            logger: default_logger(),
        }
    }

    /// Context for a relationship operation
    pub fn relationship(
        deployment_id: impl Into<String>,
        operation: impl Into<String>,
        relationship: RelationshipContext,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            operation: OperationInfo {
                name: operation.into(),
                ..Default::default()
            },
            entity: Entity::Relationship(relationship),
            agent: None,
            logger: default_logger(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn HostLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.entity, Entity::Relationship(_))
    }

    pub fn relationship_context(&self) -> Option<&RelationshipContext> {
        match &self.entity {
            Entity::Relationship(rel) => Some(rel),
            Entity::Node(_) => None,
        }
    }

    /// Pick the side the operation should act on
    pub fn resolve(&self) -> Result<Side> {
        match &self.entity {
            Entity::Node(_) => Ok(Side::Current),
            Entity::Relationship(rel) => {
                if rel.caller_node_id == rel.source.node.id {
                    Ok(Side::Source)
                } else if rel.caller_node_id == rel.target.node.id {
                    Ok(Side::Target)
                } else {
                    Err(OperationError::non_recoverable(format!(
                        "caller node {} is neither the source ({}) nor the target ({}) of {}",
                        rel.caller_node_id, rel.source.node.id, rel.target.node.id, rel.type_name
                    )))
                }
            }
        }
    }

    pub fn endpoint(&self, side: Side) -> Option<&Endpoint> {
        match (&self.entity, side) {
            (Entity::Node(endpoint), Side::Current) => Some(endpoint),
            (Entity::Relationship(rel), Side::Source) => Some(&rel.source),
            (Entity::Relationship(rel), Side::Target) => Some(&rel.target),
            _ => None,
        }
    }

    pub fn endpoint_mut(&mut self, side: Side) -> Option<&mut Endpoint> {
        match (&mut self.entity, side) {
            (Entity::Node(endpoint), Side::Current) => Some(endpoint),
            (Entity::Relationship(rel), Side::Source) => Some(&mut rel.source),
            (Entity::Relationship(rel), Side::Target) => Some(&mut rel.target),
            _ => None,
        }
    }

    /// The endpoint opposite to `side` in a relationship
    pub fn other(&self, side: Side) -> Option<&Endpoint> {
        match side {
            Side::Source => self.endpoint(Side::Target),
            Side::Target => self.endpoint(Side::Source),
            Side::Current => None,
        }
    }

    pub fn other_mut(&mut self, side: Side) -> Option<&mut Endpoint> {
        match side {
            Side::Source => self.endpoint_mut(Side::Target),
            Side::Target => self.endpoint_mut(Side::Source),
            Side::Current => None,
        }
    }
}
