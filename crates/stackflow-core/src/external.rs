//! External resources
//!
//! Nodes with `use_external_resource` reference remote resources created
//! outside the deployment. Before the operation body runs, the remote is
//! looked up and either adopted (validated, recorded as external) or, with
//! `create_if_missing`, turned into a normal create.

use crate::context::Endpoint;
use crate::dispatch::Scope;
use crate::error::{OperationError, Result};
use crate::resource::record_str;
use crate::runtime::{
    CONDITIONALLY_CREATED, EXTERNAL_ID, EXTERNAL_NAME, EXTERNAL_RESOURCE, EXTERNAL_TYPE,
};
use crate::types::operations;
use serde_json::Value;
use stackflow_cloud::ResourceKind;

pub const USE_EXTERNAL_RESOURCE: &str = "use_external_resource";
pub const CREATE_IF_MISSING: &str = "create_if_missing";

/// What the dispatcher does after reconciling an external resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Run the operation body
    Proceed,
    /// Do not touch the remote; the operation is complete
    Skip,
}

/// Operations that never touch an adopted remote
fn skipped(operation: &str) -> bool {
    operation == operations::CREATE || operation == operations::DELETE
}

/// Kind-specific checks a remote must pass before it is adopted
pub fn validate(kind: ResourceKind, record: &Value, allow_reallocation: bool) -> Result<()> {
    let id = record_str(record, "id").unwrap_or_default();
    match kind {
        ResourceKind::Network => {
            if record.get("admin_state_up") == Some(&Value::Bool(false)) {
                return Err(OperationError::non_recoverable(format!(
                    "external network {} is not admin_state_up",
                    id
                )));
            }
        }
        ResourceKind::FloatingIp if !allow_reallocation => {
            let active = record_str(record, "status").is_some_and(|s| s.eq_ignore_ascii_case("ACTIVE"));
            let bound = record_str(record, "port_id").is_some();
            if active || bound {
                return Err(OperationError::recoverable(format!(
                    "floating ip {} is already in use; set allow_reallocation to reuse it",
                    record_str(record, "floating_ip_address").unwrap_or(id)
                )));
            }
        }
        ResourceKind::Image => {
            let status = record_str(record, "status").unwrap_or_default();
            if !status.eq_ignore_ascii_case("active") {
                return Err(OperationError::non_recoverable(format!(
                    "external image {} is not active (status {})",
                    id, status
                )));
            }
        }
        ResourceKind::Volume => {
            let status = record_str(record, "status").unwrap_or_default();
            if status.starts_with("error") {
                return Err(OperationError::non_recoverable(format!(
                    "external volume {} is in status {}",
                    id, status
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Reconcile the node's external remote before a node operation
pub async fn reconcile(scope: &mut Scope<'_>) -> Result<Outcome> {
    if scope.runtime().is_conditionally_created() {
        return Ok(Outcome::Proceed);
    }

    let kind = scope.resource.kind;
    let operation = scope.operation.clone();
    let reference = scope
        .resource
        .id
        .clone()
        .or_else(|| scope.resource.config_str("id").map(str::to_string))
        .or_else(|| scope.resource.name.clone())
        .unwrap_or_default();

    match scope.resource.find().await? {
        Some(record) => {
            validate(kind, &record, scope.bool_property("allow_reallocation"))?;

            let id = record_str(&record, "id").unwrap_or(&reference).to_string();
            let name = record_str(&record, "name").map(str::to_string);
            scope.resource.id = Some(id.clone());
            if name.is_some() {
                scope.resource.name = name.clone();
            }

            let runtime = scope.runtime_mut();
            runtime.set(EXTERNAL_RESOURCE, true);
            runtime.set(EXTERNAL_ID, id.as_str());
            runtime.set(EXTERNAL_NAME, name.clone().unwrap_or_default());
            runtime.set(EXTERNAL_TYPE, kind.resource_type());

            if skipped(&operation) {
                tracing::info!(kind = %kind, id = %id, "using external resource, skipping {}", crate::types::verb(&operation));
                if operation == operations::CREATE {
                    scope.persist_identity(&record);
                }
                return Ok(Outcome::Skip);
            }
            Ok(Outcome::Proceed)
        }
        None if scope.bool_property(CREATE_IF_MISSING) => {
            tracing::info!(
                kind = %kind,
                reference = %reference,
                "external resource not found, creating it"
            );
            scope.resource.config.remove("id");
            scope.resource.id = None;
            scope.runtime_mut().set(CONDITIONALLY_CREATED, true);
            Ok(Outcome::Proceed)
        }
        None if operation == operations::DELETE => {
            tracing::info!(kind = %kind, reference = %reference, "external resource already gone");
            Ok(Outcome::Skip)
        }
        None => Err(OperationError::non_recoverable(format!(
            "external {} {} not found and create_if_missing is not set",
            kind, reference
        ))),
    }
}

/// Whether an endpoint is an adopted external resource that the deployment
/// does not own
pub fn is_unowned_external(endpoint: &Endpoint) -> bool {
    let runtime = &endpoint.instance.runtime_properties;
    let declared = endpoint.node.bool_property(USE_EXTERNAL_RESOURCE) || runtime.is_external();
    declared && !runtime.is_conditionally_created()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_floating_ip_in_use_is_recoverable() {
        let record = json!({"id": "f1", "status": "ACTIVE", "floating_ip_address": "172.24.4.10"});
        let err = validate(ResourceKind::FloatingIp, &record, false).unwrap_err();
        assert!(err.is_recoverable());
        assert!(validate(ResourceKind::FloatingIp, &record, true).is_ok());

        let bound = json!({"id": "f2", "status": "DOWN", "port_id": "p1"});
        assert!(validate(ResourceKind::FloatingIp, &bound, false).is_err());
    }

    #[test]
    fn test_network_must_be_up() {
        let down = json!({"id": "n1", "admin_state_up": false});
        assert!(validate(ResourceKind::Network, &down, false).unwrap_err().is_non_recoverable());
        assert!(validate(ResourceKind::Network, &json!({"id": "n1", "admin_state_up": true}), false).is_ok());
    }

    #[test]
    fn test_image_must_be_active() {
        assert!(validate(ResourceKind::Image, &json!({"id": "i", "status": "queued"}), false).is_err());
        assert!(validate(ResourceKind::Image, &json!({"id": "i", "status": "active"}), false).is_ok());
    }
}
