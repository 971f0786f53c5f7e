//! Resumable asynchronous tasks
//!
//! Remote operations that take longer than one invocation are split into a
//! trigger step and a polling step. The trigger records a marker in the
//! runtime properties and asks the host to retry; later invocations see the
//! marker and only poll.

use crate::error::{OperationError, Result};
use crate::resource::Resource;
use crate::runtime::RuntimeProperties;
use std::time::Duration;

pub const SERVER_RETRY: Duration = Duration::from_secs(30);
pub const VOLUME_RETRY: Duration = Duration::from_secs(15);

pub const DELETE_SERVER_TASK: &str = "delete_server_task";
pub const STOP_SERVER_TASK: &str = "stop_server_task";
pub const REBOOT_SERVER_TASK: &str = "reboot_server_task";
pub const SUSPEND_SERVER_TASK: &str = "suspend_server_task";
pub const RESUME_SERVER_TASK: &str = "resume_server_task";

pub const DELETE_VOLUME_TASK: &str = "delete_volume_task";
pub const BACKUP_VOLUME_TASK: &str = "backup_volume_task";
pub const BACKUP_ID: &str = "backup_id";
pub const SNAPSHOT_VOLUME_TASK: &str = "snapshot_volume_task";
pub const SNAPSHOT_ID: &str = "snapshot_id";
pub const RESTORE_VOLUME_TASK: &str = "restore_volume_task";

pub const BACKUP_DONE: &str = "backup_done";
pub const RESTORE_STATE: &str = "restore_state";
pub const STOP_STATE: &str = "stop";
pub const START_STATE: &str = "start";

pub const PENDING: &str = "PENDING";
pub const DONE: &str = "DONE";
pub const REBUILD: &str = "REBUILD";

pub const SHARE_DELETE_TASK: &str = "delete_share_task";

pub fn attach_volume_task(volume_id: &str, server_id: &str) -> String {
    format!("attach_volume_task-{}-{}", volume_id, server_id)
}

pub fn attach_volume_id(volume_id: &str, server_id: &str) -> String {
    format!("attach_volume_id-{}-{}", volume_id, server_id)
}

pub fn detach_volume_task(volume_id: &str, server_id: &str) -> String {
    format!("detach_volume_task-{}-{}", volume_id, server_id)
}

/// Source object of a snapshot or backup artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    Vm,
    Volume,
}

impl ArtifactSource {
    fn as_str(self) -> &'static str {
        match self {
            ArtifactSource::Vm => "vm",
            ArtifactSource::Volume => "volume",
        }
    }
}

/// Deterministic name of a backup or snapshot artifact
///
/// `<source>-<source id>-<name>-(backup|increment)`, so that a later
/// invocation can find the artifact again by listing.
pub fn artifact_name(source: ArtifactSource, source_id: &str, name: &str, incremental: bool) -> String {
    let suffix = if incremental { "increment" } else { "backup" };
    format!("{}-{}-{}-{}", source.as_str(), source_id, name, suffix)
}

/// Result of comparing a remote status with what a task waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Ready,
    Pending,
    Failed,
}

/// Classify `status` (case-insensitive)
pub fn progress(status: &str, ready: &[&str], failed: &[&str]) -> Progress {
    if ready.iter().any(|s| s.eq_ignore_ascii_case(status)) {
        Progress::Ready
    } else if failed.iter().any(|s| s.eq_ignore_ascii_case(status)) {
        Progress::Failed
    } else {
        Progress::Pending
    }
}

pub fn status_of(record: &serde_json::Value) -> &str {
    record
        .get("status")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

pub fn retry(message: impl Into<String>, delay: Duration) -> OperationError {
    OperationError::retry(message, delay)
}

/// Delete `resource` once and wait until it no longer resolves
///
/// The first invocation issues the delete, sets `marker` and retries.
/// Later invocations only poll. A resource that is already gone completes
/// the task.
pub async fn delete_with_marker(
    runtime: &mut RuntimeProperties,
    resource: &Resource,
    marker: &str,
    delay: Duration,
) -> Result<()> {
    if resource.id.is_none() {
        tracing::info!(kind = %resource.kind, "nothing to delete, resource was never created");
        return Ok(());
    }

    if !runtime.get_bool(marker) {
        match resource.delete().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(kind = %resource.kind, id = resource.label(), "already deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        runtime.set(marker, true);
        return Err(retry(
            format!("waiting for {} {} to be deleted", resource.kind, resource.label()),
            delay,
        ));
    }

    match resource.get().await {
        Ok(record) => {
            if progress(status_of(&record), &[], &["error_deleting"]) == Progress::Failed {
                runtime.remove(marker);
                return Err(OperationError::non_recoverable(format!(
                    "{} {} failed to delete (status {})",
                    resource.kind,
                    resource.label(),
                    status_of(&record)
                )));
            }
            Err(retry(
                format!("{} {} is still being deleted", resource.kind, resource.label()),
                delay,
            ))
        }
        Err(e) if e.is_not_found() => {
            runtime.remove(marker);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
