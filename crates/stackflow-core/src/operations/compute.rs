//! Keypairs, images and host aggregates

use super::common::{string_list, wait_for};
use crate::dispatch::Scope;
use crate::error::{OperationError, Result};
use crate::resource::record_str;
use crate::tasks::SERVER_RETRY;
use serde_json::Value;
use stackflow_cloud::CloudError;

pub async fn create_keypair(scope: &mut Scope<'_>) -> Result<()> {
    let record = scope.create_once().await?;
    let runtime = scope.runtime_mut();
    for key in ["public_key", "private_key"] {
        if let Some(value) = record_str(&record, key) {
            runtime.set(key, value);
        }
    }
    Ok(())
}

pub async fn start_image(scope: &mut Scope<'_>) -> Result<()> {
    wait_for(scope, &["active"], &["killed", "deleted"], SERVER_RETRY)
        .await
        .map(drop)
}

const HOSTS: &str = "hosts";

fn requested_hosts(scope: &Scope<'_>) -> Vec<String> {
    let mut hosts = string_list(scope.input(HOSTS));
    if hosts.is_empty() {
        hosts = string_list(scope.property(HOSTS));
    }
    if hosts.is_empty() {
        hosts = string_list(scope.resource.config.get(HOSTS));
    }
    hosts
}

async fn aggregate_hosts(scope: &Scope<'_>) -> Result<Vec<String>> {
    let record = scope.resource.get().await?;
    Ok(string_list(record.get(HOSTS)))
}

async fn add_hosts_to(scope: &mut Scope<'_>, hosts: Vec<String>) -> Result<()> {
    let present = aggregate_hosts(scope).await?;
    for host in &hosts {
        if present.contains(host) {
            continue;
        }
        match scope.resource.aggregate().add_host(host).await {
            Ok(_) => tracing::info!(aggregate = scope.resource.label(), host = %host, "host added"),
            Err(OperationError::Cloud(CloudError::Conflict(_))) => {}
            Err(e) => return Err(e),
        }
    }
    let mut recorded = string_list(scope.runtime().get(HOSTS));
    for host in hosts {
        if !recorded.contains(&host) {
            recorded.push(host);
        }
    }
    scope.runtime_mut().set(HOSTS, recorded);
    Ok(())
}

async fn remove_hosts_from(scope: &mut Scope<'_>, hosts: Vec<String>) -> Result<()> {
    let present = aggregate_hosts(scope).await?;
    for host in &hosts {
        if !present.contains(host) {
            continue;
        }
        scope.resource.aggregate().remove_host(host).await?;
        tracing::info!(aggregate = scope.resource.label(), host = %host, "host removed");
    }
    let recorded: Vec<String> = string_list(scope.runtime().get(HOSTS))
        .into_iter()
        .filter(|h| !hosts.contains(h))
        .collect();
    scope.runtime_mut().set(HOSTS, recorded);
    Ok(())
}

pub async fn create_aggregate(scope: &mut Scope<'_>) -> Result<()> {
    let mut body = scope.resource.config.clone();
    let inline_metadata = body.remove("metadata");
    body.remove(HOSTS);
    scope.create_once_with(body).await?;

    let metadata = scope
        .property("metadata")
        .or(inline_metadata.as_ref())
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if !metadata.is_empty() {
        scope.resource.aggregate().set_metadata(metadata).await?;
    }

    let hosts = requested_hosts(scope);
    if !hosts.is_empty() {
        add_hosts_to(scope, hosts).await?;
    }
    Ok(())
}

/// Remove every host, then the aggregate
pub async fn delete_aggregate(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_none() {
        return Ok(());
    }
    let hosts = aggregate_hosts(scope).await?;
    remove_hosts_from(scope, hosts).await?;
    scope.resource.delete().await
}

pub async fn add_hosts(scope: &mut Scope<'_>) -> Result<()> {
    let hosts = string_list(scope.input(HOSTS));
    if hosts.is_empty() {
        return Err(OperationError::non_recoverable("add_hosts needs a hosts input"));
    }
    add_hosts_to(scope, hosts).await
}

pub async fn remove_hosts(scope: &mut Scope<'_>) -> Result<()> {
    let hosts = string_list(scope.input(HOSTS));
    if hosts.is_empty() {
        return Err(OperationError::non_recoverable("remove_hosts needs a hosts input"));
    }
    remove_hosts_from(scope, hosts).await
}
