//! Quota check run by `validation.creation`

use crate::error::{OperationError, Result};
use crate::resource::Resource;
use stackflow_cloud::ListQuery;

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub count: usize,
    /// `-1` is unlimited
    pub limit: i64,
}

impl QuotaUsage {
    pub fn allows_one_more(&self) -> bool {
        self.limit == -1 || (self.count as i64) < self.limit
    }
}

/// Count the project's resources of this kind and compare with its quota
pub async fn usage(resource: &Resource) -> Result<Option<QuotaUsage>> {
    if resource.kind.quota_key().is_none() {
        return Ok(None);
    }
    let client = resource.client();
    let project_id = client.project_id().await?;
    let query = ListQuery::new().with(resource.kind.project_filter(), project_id.as_str());
    let count = client.list(resource.target(), &query).await?.len();
    let limit = client.quota(resource.kind, &project_id).await?;
    Ok(Some(QuotaUsage { count, limit }))
}

/// Fail when creating one more resource of this kind would exceed the quota
pub async fn validate_creation(resource: &Resource) -> Result<()> {
    match usage(resource).await? {
        None => {
            tracing::info!(kind = %resource.kind, "no quota applies, skipping creation validation");
            Ok(())
        }
        Some(usage) if usage.allows_one_more() => {
            tracing::debug!(
                kind = %resource.kind,
                count = usage.count,
                limit = usage.limit,
                "quota check passed"
            );
            Ok(())
        }
        Some(usage) => Err(OperationError::non_recoverable(format!(
            "{} quota exceeded: {} of {} in use",
            resource.kind, usage.count, usage.limit
        ))),
    }
}
