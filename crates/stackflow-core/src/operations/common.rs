//! Operation bodies shared by most kinds

use crate::dispatch::Scope;
use crate::error::{OperationError, Result};
use crate::quota;
use crate::resolver::deep_merge;
use crate::runtime::RESOURCE_CONFIG;
use crate::tasks::{Progress, progress, status_of};
use crate::resource::record_str;
use serde_json::{Map, Value, json};
use stackflow_cloud::{ListQuery, ResourceKind};
use std::time::Duration;

pub async fn create(scope: &mut Scope<'_>) -> Result<()> {
    scope.create_once().await.map(drop)
}

pub async fn delete(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_none() {
        tracing::info!(kind = %scope.resource.kind, "nothing to delete, resource was never created");
        return Ok(());
    }
    scope.resource.delete().await
}

/// Apply the `args` input (or the input `resource_config`) as an update
pub async fn update(scope: &mut Scope<'_>) -> Result<()> {
    let changes = scope
        .input("args")
        .or_else(|| scope.input(RESOURCE_CONFIG))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if changes.is_empty() {
        tracing::info!(kind = %scope.resource.kind, "no changes to apply");
        return Ok(());
    }

    scope.resource.update(changes.clone()).await?;

    let mut stored = scope
        .runtime()
        .get(RESOURCE_CONFIG)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    deep_merge(&mut stored, Value::Object(changes));
    scope.runtime_mut().set(RESOURCE_CONFIG, stored);
    tracing::info!(kind = %scope.resource.kind, id = scope.resource.label(), "updated");
    Ok(())
}

/// List resources of this kind into `<type>_list`
pub async fn list(scope: &mut Scope<'_>) -> Result<()> {
    let filters = scope
        .input("query")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut query = ListQuery::from_map(filters);
    if let Some(project) = scope.input_str("project_id") {
        query = query.with(scope.resource.kind.project_filter(), project);
    }

    let records = scope.resource.list(&query).await?;
    let key = format!("{}_list", scope.resource.kind.resource_type());
    tracing::debug!(kind = %scope.resource.kind, count = records.len(), "listed");
    scope.runtime_mut().set(key, Value::Array(records));
    Ok(())
}

pub async fn creation(scope: &mut Scope<'_>) -> Result<()> {
    quota::validate_creation(&scope.resource).await
}

pub async fn unsupported_update(scope: &mut Scope<'_>) -> Result<()> {
    Err(OperationError::non_recoverable(format!(
        "Update operation is not supported for {}",
        scope.resource.kind
    )))
}

/// Poll until the remote reaches one of `ready`
pub async fn wait_for(
    scope: &Scope<'_>,
    ready: &[&str],
    failed: &[&str],
    delay: Duration,
) -> Result<Value> {
    let record = scope.resource.get().await?;
    let status = status_of(&record);
    match progress(status, ready, failed) {
        Progress::Ready => Ok(record),
        Progress::Failed => Err(OperationError::non_recoverable(format!(
            "{} {} is in status {}",
            scope.resource.kind,
            scope.resource.label(),
            status
        ))),
        Progress::Pending => Err(scope.retry(
            format!(
                "waiting for {} {} to become {} (status {})",
                scope.resource.kind,
                scope.resource.label(),
                ready.join("/"),
                status
            ),
            delay,
        )),
    }
}

/// String list from a JSON value
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Create a flavor or volume type, then apply its `extra_specs`
pub async fn create_with_extra_specs(scope: &mut Scope<'_>) -> Result<()> {
    let mut body = scope.resource.config.clone();
    let inline = body.remove("extra_specs");
    scope.create_once_with(body).await?;

    let specs = scope
        .property("extra_specs")
        .or(inline.as_ref())
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if !specs.is_empty() {
        scope.resource.extra_specs().set(specs).await?;
        tracing::debug!(kind = %scope.resource.kind, id = scope.resource.label(), "extra specs set");
    }
    Ok(())
}

/// The only element of `values`, or an empty string
pub fn singleton(values: &[String]) -> String {
    match values {
        [only] => only.clone(),
        _ => String::new(),
    }
}

/// Id of a resource referenced by id or by name
pub async fn lookup_id(scope: &Scope<'_>, kind: ResourceKind, reference: &str) -> Result<String> {
    let mut probe = scope.resource.sibling(kind, None);
    probe.config.insert("id".into(), json!(reference));
    match probe.find().await? {
        Some(record) => Ok(record_str(&record, "id").unwrap_or(reference).to_string()),
        None => Err(OperationError::non_recoverable(format!(
            "{} {} not found",
            kind, reference
        ))),
    }
}
