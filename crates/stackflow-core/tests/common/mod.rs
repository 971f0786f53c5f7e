use serde_json::{Map, Value, json};
use stackflow_cloud::{MemoryCloud, RecordingLogger, ResourceKind};
use stackflow_core::types::node_type;
use stackflow_core::{
    Endpoint, InstanceInfo, NodeInfo, OperationContext, Plugin, RelationshipContext,
    RelationshipInstance, Result, RuntimeProperties,
};
use std::sync::Arc;

pub const DEPLOYMENT: &str = "dep1";

pub struct TestCloud {
    pub cloud: MemoryCloud,
    pub plugin: Plugin,
    pub logger: Arc<RecordingLogger>,
}

impl TestCloud {
    pub fn new() -> Self {
        let cloud = MemoryCloud::new();
        let plugin = Plugin::new(Arc::new(cloud.clone()));
        Self {
            cloud,
            plugin,
            logger: Arc::new(RecordingLogger::new()),
        }
    }

    /// Invoke once, then bump the retry counter the way the host does
    pub async fn invoke(&self, ctx: &mut OperationContext, inputs: Value) -> Result<()> {
        let inputs = match inputs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let result = self.plugin.invoke(ctx, inputs).await;
        if result.as_ref().is_err_and(|e| e.is_retry()) {
            ctx.operation.retry_number += 1;
        }
        result
    }

    pub fn node_ctx(&self, operation: &str, endpoint: Endpoint) -> OperationContext {
        OperationContext::node(DEPLOYMENT, operation, endpoint).with_logger(self.logger.clone())
    }

    #[allow(dead_code)]
    pub fn relationship_ctx(
        &self,
        operation: &str,
        type_name: &str,
        source: Endpoint,
        target: Endpoint,
    ) -> OperationContext {
        let relationship = RelationshipContext {
            type_name: type_name.to_string(),
            type_hierarchy: vec!["cloudify.relationships.connected_to".to_string()],
            caller_node_id: source.node.id.clone(),
            source,
            target,
        };
        OperationContext::relationship(DEPLOYMENT, operation, relationship)
            .with_logger(self.logger.clone())
    }
}

/// Endpoint for a node of `kind` with the given properties
pub fn endpoint(kind: ResourceKind, node_id: &str, properties: Value) -> Endpoint {
    let properties = match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Endpoint {
        node: NodeInfo {
            id: node_id.to_string(),
            type_name: node_type(kind).unwrap_or_default().to_string(),
            type_hierarchy: vec!["cloudify.nodes.Root".to_string()],
            properties,
        },
        instance: InstanceInfo {
            id: format!("{}_inst", node_id),
            ..Default::default()
        },
    }
}

/// Endpoint that already carries runtime properties
#[allow(dead_code)]
pub fn with_runtime(mut endpoint: Endpoint, runtime: Value) -> Endpoint {
    endpoint.instance.runtime_properties = runtime_of(runtime);
    endpoint
}

pub fn runtime_of(value: Value) -> RuntimeProperties {
    serde_json::from_value(value).unwrap()
}

/// Add an outgoing relationship from `endpoint` to `target`
#[allow(dead_code)]
pub fn relate(mut endpoint: Endpoint, type_name: &str, target: Endpoint) -> Endpoint {
    endpoint.instance.relationships.push(RelationshipInstance {
        type_name: type_name.to_string(),
        type_hierarchy: vec!["cloudify.relationships.connected_to".to_string()],
        target,
    });
    endpoint
}

/// Runtime properties of a node context
pub fn runtime(ctx: &OperationContext) -> &RuntimeProperties {
    match &ctx.entity {
        stackflow_core::Entity::Node(endpoint) => &endpoint.instance.runtime_properties,
        stackflow_core::Entity::Relationship(rel) => &rel.source.instance.runtime_properties,
    }
}

#[allow(dead_code)]
pub fn external(id: &str) -> Value {
    json!({"use_external_resource": true, "resource_config": {"id": id}})
}
