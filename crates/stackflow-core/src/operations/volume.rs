//! Volumes, volume types and volume backups/snapshots

use super::common::wait_for;
use crate::dispatch::Scope;
use crate::error::{OperationError, Result};
use crate::resolver::PropertyRule;
use crate::resource::{Resource, record_str};
use crate::tasks::{
    self, ArtifactSource, BACKUP_ID, BACKUP_VOLUME_TASK, DELETE_VOLUME_TASK, RESTORE_VOLUME_TASK,
    SNAPSHOT_ID, SNAPSHOT_VOLUME_TASK, VOLUME_RETRY, artifact_name, status_of,
};
use serde_json::{Map, Value, json};
use stackflow_cloud::{Action, ListQuery, ResourceKind};

const READY: &[&str] = &["available"];
const FAILED: &[&str] = &["error", "error_deleting", "error_restoring", "error_extending"];

pub async fn create(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_none() {
        let mut body = scope.resource.config.clone();
        let image = body
            .remove("image_id")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty());
        let image = match image {
            Some(image) => Some(image),
            None => scope.resolve_str(&PropertyRule::related("imageRef", ResourceKind::Image))?,
        };
        if let Some(image) = image {
            body.insert("imageRef".into(), json!(image));
        }
        scope.create_once_with(body).await?;
    }
    wait_for(scope, READY, FAILED, VOLUME_RETRY).await.map(drop)
}

pub async fn start(scope: &mut Scope<'_>) -> Result<()> {
    wait_for(scope, &["available", "in-use"], FAILED, VOLUME_RETRY)
        .await
        .map(drop)
}

pub async fn delete(scope: &mut Scope<'_>) -> Result<()> {
    let resource = &scope.resource;
    let runtime = &mut scope.endpoint.instance.runtime_properties;
    tasks::delete_with_marker(runtime, resource, DELETE_VOLUME_TASK, VOLUME_RETRY).await
}

/// Backup or snapshot request from the snapshot inputs
struct ArtifactRequest {
    name: String,
    incremental: bool,
}

impl ArtifactRequest {
    fn from_inputs(scope: &Scope<'_>, volume_id: &str) -> Self {
        let user_name = scope.input_str("snapshot_name").unwrap_or("snapshot");
        let incremental = !matches!(scope.input("snapshot_incremental"), Some(Value::Bool(false)));
        Self {
            name: artifact_name(ArtifactSource::Volume, volume_id, user_name, incremental),
            incremental,
        }
    }

    /// Snapshots for incremental requests, backups otherwise
    fn kind(&self) -> ResourceKind {
        if self.incremental {
            ResourceKind::VolumeSnapshot
        } else {
            ResourceKind::VolumeBackup
        }
    }

    fn markers(&self) -> (&'static str, &'static str) {
        if self.incremental {
            (SNAPSHOT_VOLUME_TASK, SNAPSHOT_ID)
        } else {
            (BACKUP_VOLUME_TASK, BACKUP_ID)
        }
    }
}

async fn artifacts(scope: &Scope<'_>, request: &ArtifactRequest, volume_id: &str) -> Result<Vec<Value>> {
    scope
        .resource
        .sibling(request.kind(), None)
        .list(
            &ListQuery::new()
                .with("volume_id", volume_id)
                .with("name", request.name.as_str()),
        )
        .await
}

fn artifact_progress(scope: &Scope<'_>, artifact: &Resource, record: &Value) -> Result<bool> {
    match status_of(record).to_ascii_lowercase().as_str() {
        "available" => Ok(true),
        s if s.starts_with("error") => Err(OperationError::non_recoverable(format!(
            "{} {} of volume {} failed (status {})",
            artifact.kind,
            artifact.label(),
            scope.resource.label(),
            s
        ))),
        _ => Ok(false),
    }
}

pub async fn snapshot_create(scope: &mut Scope<'_>) -> Result<()> {
    let volume_id = scope.resource.require_id()?.to_string();
    let request = ArtifactRequest::from_inputs(scope, &volume_id);
    let (task, id_key) = request.markers();

    if !scope.runtime().get_bool(task) {
        let mut artifact = scope.resource.sibling(request.kind(), None);
        let mut body = Map::new();
        body.insert("volume_id".into(), json!(volume_id));
        body.insert("name".into(), json!(request.name));
        if request.incremental {
            body.insert("force".into(), json!(true));
        }
        let record = artifact.create_with(body).await?;
        let artifact_id = record_str(&record, "id").unwrap_or_default().to_string();
        let runtime = scope.runtime_mut();
        runtime.set(task, true);
        runtime.set(id_key, artifact_id);
        tracing::info!(volume = %volume_id, artifact = %request.name, kind = %request.kind(), "volume artifact requested");
    }

    let artifact_id = scope.runtime().get_str(id_key).map(str::to_string);
    let artifact = scope.resource.sibling(request.kind(), artifact_id.as_deref());
    let record = artifact.get().await?;
    if artifact_progress(scope, &artifact, &record)? {
        let runtime = scope.runtime_mut();
        runtime.remove(task);
        runtime.remove(id_key);
        return Ok(());
    }
    Err(scope.retry(
        format!("waiting for {} {} of volume {}", request.kind(), request.name, volume_id),
        VOLUME_RETRY,
    ))
}

pub async fn snapshot_apply(scope: &mut Scope<'_>) -> Result<()> {
    let volume_id = scope.resource.require_id()?.to_string();
    let request = ArtifactRequest::from_inputs(scope, &volume_id);
    if request.incremental {
        return Err(OperationError::non_recoverable(format!(
            "volume {} can only be restored from a backup; snapshots cannot be applied",
            volume_id
        )));
    }

    if !scope.runtime().get_bool(RESTORE_VOLUME_TASK) {
        let backup_id = artifacts(scope, &request, &volume_id)
            .await?
            .iter()
            .find_map(|backup| record_str(backup, "id").map(str::to_string))
            .ok_or_else(|| {
                OperationError::non_recoverable(format!(
                    "no backup {} found for volume {}",
                    request.name, volume_id
                ))
            })?;
        scope
            .resource
            .sibling(ResourceKind::VolumeBackup, Some(&backup_id))
            .action(Action::RestoreBackup {
                volume_id: Some(volume_id.clone()),
                name: None,
            })
            .await?;
        scope.runtime_mut().set(RESTORE_VOLUME_TASK, true);
        tracing::info!(volume = %volume_id, backup = %backup_id, "restoring volume");
    }

    let record = scope.resource.get().await?;
    match status_of(&record).to_ascii_lowercase().as_str() {
        "available" | "in-use" => {
            scope.runtime_mut().remove(RESTORE_VOLUME_TASK);
            Ok(())
        }
        s if s.starts_with("error") => {
            scope.runtime_mut().remove(RESTORE_VOLUME_TASK);
            Err(OperationError::non_recoverable(format!(
                "restoring volume {} failed (status {})",
                volume_id, s
            )))
        }
        s => Err(scope.retry(
            format!("waiting for volume {} to be restored (status {})", volume_id, s),
            VOLUME_RETRY,
        )),
    }
}

pub async fn snapshot_delete(scope: &mut Scope<'_>) -> Result<()> {
    let volume_id = scope.resource.require_id()?.to_string();
    let request = ArtifactRequest::from_inputs(scope, &volume_id);

    let found = artifacts(scope, &request, &volume_id).await?;
    if found.is_empty() {
        let (task, id_key) = request.markers();
        scope.runtime_mut().remove(task);
        scope.runtime_mut().remove(id_key);
        return Ok(());
    }
    for record in &found {
        let Some(id) = record_str(record, "id") else {
            continue;
        };
        match scope.resource.sibling(request.kind(), Some(id)).delete().await {
            Ok(()) => tracing::info!(volume = %volume_id, artifact = id, "deleting volume artifact"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    Err(scope.retry(
        format!("waiting for {} {} to be deleted", request.kind(), request.name),
        VOLUME_RETRY,
    ))
}
