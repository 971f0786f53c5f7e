use super::{Resource, record_str};
use crate::error::{OperationError, Result};
use serde_json::{Map, Value, json};
use stackflow_cloud::{Action, ListQuery, ResourceKind};

/// Router-only calls
#[derive(Clone, Copy)]
pub struct RouterApi<'a> {
    resource: &'a Resource,
}

impl<'a> RouterApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub async fn add_interface(&self, subnet_id: Option<&str>, port_id: Option<&str>) -> Result<Value> {
        self.resource
            .action(Action::AddRouterInterface {
                subnet_id: subnet_id.map(str::to_string),
                port_id: port_id.map(str::to_string),
            })
            .await
    }

    pub async fn remove_interface(&self, subnet_id: Option<&str>, port_id: Option<&str>) -> Result<Value> {
        self.resource
            .action(Action::RemoveRouterInterface {
                subnet_id: subnet_id.map(str::to_string),
                port_id: port_id.map(str::to_string),
            })
            .await
    }

    pub async fn routes(&self) -> Result<Vec<Value>> {
        let router = self.resource.get().await?;
        Ok(router
            .get("routes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn set_routes(&self, routes: Vec<Value>) -> Result<Value> {
        let mut body = Map::new();
        body.insert("routes".into(), Value::Array(routes));
        self.resource.update(body).await
    }

    /// Ports owned by the router
    pub async fn ports(&self) -> Result<Vec<Value>> {
        let id = self.resource.require_id()?;
        self.resource
            .sibling(ResourceKind::Port, None)
            .list(&ListQuery::new().with("device_id", id))
            .await
    }

    /// Whether one of the router's ports has an address in `subnet_id`
    pub async fn has_port_in_subnet(&self, subnet_id: &str) -> Result<bool> {
        let ports = self.ports().await?;
        Ok(ports.iter().any(|port| {
            port.get("fixed_ips")
                .and_then(Value::as_array)
                .is_some_and(|ips| ips.iter().any(|ip| record_str(ip, "subnet_id") == Some(subnet_id)))
        }))
    }
}

/// Fields that identify an RBAC policy, as the API reports them
const RBAC_KEYS: [&str; 4] = ["object_type", "object_id", "action", "target_tenant"];

/// Normalize an RBAC policy record for comparison
///
/// The API reports the grantee as `target_tenant` while newer blueprints
/// spell it `target_project_id`; both map to `target_tenant`.
pub fn normalize_policy(record: &Value) -> Map<String, Value> {
    let mut normalized = Map::new();
    if let Value::Object(map) = record {
        for (key, value) in map {
            let key = if key == "target_project_id" {
                "target_tenant"
            } else {
                key.as_str()
            };
            if RBAC_KEYS.contains(&key) && !value.is_null() {
                normalized.insert(key.to_string(), value.clone());
            }
        }
    }
    normalized
}

/// RBAC policy calls
#[derive(Clone, Copy)]
pub struct RbacApi<'a> {
    resource: &'a Resource,
}

impl<'a> RbacApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    /// Object the policy applies to, from `object_type` and `object_id`
    pub fn target_object(&self) -> Option<(&str, &str)> {
        Some((
            self.resource.config_str("object_type")?,
            self.resource.config_str("object_id")?,
        ))
    }

    /// Request body for the policy with the target object filled in
    pub fn body(&self, object_type: &str, object_id: &str) -> Map<String, Value> {
        let mut body = self.resource.config.clone();
        body.insert("object_type".into(), json!(object_type));
        body.insert("object_id".into(), json!(object_id));
        if let Some(tenant) = body.remove("target_project_id") {
            body.entry("target_tenant").or_insert(tenant);
        }
        body
    }

    /// Existing policies equal to `wanted` on every identifying field
    pub async fn find_matching(&self, wanted: &Value) -> Result<Vec<Value>> {
        let wanted = normalize_policy(wanted);
        if !wanted.contains_key("object_id") {
            return Err(OperationError::non_recoverable(
                "rbac policy lookup needs an object_id",
            ));
        }
        let query = wanted
            .iter()
            .filter(|(key, _)| key.as_str() != "target_tenant")
            .fold(ListQuery::new(), |query, (key, value)| {
                query.with(key.clone(), value.clone())
            });
        let policies = self.resource.list(&query).await?;
        Ok(policies
            .into_iter()
            .filter(|policy| {
                let found = normalize_policy(policy);
                wanted.iter().all(|(key, value)| found.get(key) == Some(value))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_renames_target_project() {
        let user = json!({
            "object_type": "network",
            "object_id": "n1",
            "action": "access_as_shared",
            "target_project_id": "p2",
            "name": "ignored"
        });
        let api = json!({
            "id": "r1",
            "object_type": "network",
            "object_id": "n1",
            "action": "access_as_shared",
            "target_tenant": "p2",
            "project_id": "p1"
        });
        assert_eq!(normalize_policy(&user), normalize_policy(&api));
    }
}
