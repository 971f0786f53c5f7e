//! Shared file systems and share networks

use super::common::wait_for;
use crate::dispatch::Scope;
use crate::error::Result;
use crate::resolver::PropertyRule;
use crate::resource::record_str;
use crate::tasks::{self, SHARE_DELETE_TASK, VOLUME_RETRY};
use crate::types::relationships;
use serde_json::{Value, json};
use stackflow_cloud::{ListQuery, ResourceKind};

const ACCESS_RULES: &str = "access_rules";

pub async fn create_share_network(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        return scope.create_once().await.map(drop);
    }
    let mut body = scope.resource.config.clone();
    let network = PropertyRule::related("neutron_net_id", ResourceKind::Network)
        .through(relationships::NETWORK_SHARE_CONNECTED_TO_NETWORK);
    if let Some(id) = scope.resolve_str(&network)? {
        body.insert("neutron_net_id".into(), json!(id));
    }
    let subnet = PropertyRule::related("neutron_subnet_id", ResourceKind::Subnet)
        .through(relationships::NETWORK_SHARE_CONNECTED_TO_SUBNET);
    if let Some(id) = scope.resolve_str(&subnet)? {
        body.insert("neutron_subnet_id".into(), json!(id));
    }
    scope.create_once_with(body).await.map(drop)
}

fn rule_matches(existing: &Value, wanted: &Value) -> bool {
    record_str(existing, "access_type") == record_str(wanted, "access_type")
        && record_str(existing, "access_to") == record_str(wanted, "access_to")
}

/// Create the share once by name, wait for it, then grant access rules
pub async fn create_share(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_none() {
        let existing = match scope.resource.name.as_deref() {
            Some(name) => scope.resource.list(&ListQuery::new().with("name", name)).await?,
            None => Vec::new(),
        };
        if let Some(record) = existing.first() {
            tracing::info!(share = ?record_str(record, "id"), "share with this name exists, reusing it");
            scope.resource.id = record_str(record, "id").map(str::to_string);
            scope.persist_identity(record);
        } else {
            let mut body = scope.resource.config.clone();
            body.remove(ACCESS_RULES);
            let rule = PropertyRule::related("share_network_id", ResourceKind::ShareNetwork)
                .through(relationships::SHARE_CONNECTED_TO_NETWORK_SHARE);
            if let Some(id) = scope.resolve_str(&rule)? {
                body.insert("share_network_id".into(), json!(id));
            }
            scope.create_once_with(body).await?;
        }
    }

    wait_for(scope, &["available"], &["error"], VOLUME_RETRY).await?;

    let wanted = scope
        .property(ACCESS_RULES)
        .or_else(|| scope.resource.config.get(ACCESS_RULES))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if wanted.is_empty() {
        return Ok(());
    }
    let existing = scope.resource.share().rules().await?;
    let mut granted = Vec::new();
    for rule in &wanted {
        if let Some(present) = existing.iter().find(|e| rule_matches(e, rule)) {
            if let Some(id) = record_str(present, "id") {
                granted.push(id.to_string());
            }
            continue;
        }
        let (Some(access_type), Some(access_to)) =
            (record_str(rule, "access_type"), record_str(rule, "access_to"))
        else {
            continue;
        };
        let level = record_str(rule, "access_level").unwrap_or("rw");
        if let Some(id) = scope.resource.share().allow(access_type, access_to, level).await? {
            granted.push(id);
        }
    }
    scope.runtime_mut().set(ACCESS_RULES, granted);
    Ok(())
}

pub async fn delete_share(scope: &mut Scope<'_>) -> Result<()> {
    let resource = &scope.resource;
    let runtime = &mut scope.endpoint.instance.runtime_properties;
    tasks::delete_with_marker(runtime, resource, SHARE_DELETE_TASK, VOLUME_RETRY).await
}
