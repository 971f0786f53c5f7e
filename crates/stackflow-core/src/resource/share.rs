use super::{Resource, record_str};
use crate::error::Result;
use serde_json::Value;
use stackflow_cloud::Action;

/// File share access rules
#[derive(Clone, Copy)]
pub struct ShareApi<'a> {
    resource: &'a Resource,
}

impl<'a> ShareApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    /// Grant access, returning the new rule id
    pub async fn allow(&self, access_type: &str, access_to: &str, access_level: &str) -> Result<Option<String>> {
        let rule = self
            .resource
            .action(Action::AllowAccess {
                access_type: access_type.to_string(),
                access_to: access_to.to_string(),
                access_level: access_level.to_string(),
            })
            .await?;
        Ok(record_str(&rule, "id").map(str::to_string))
    }

    pub async fn deny(&self, access_id: &str) -> Result<()> {
        self.resource
            .action(Action::DenyAccess {
                access_id: access_id.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn rules(&self) -> Result<Vec<Value>> {
        let share = self.resource.get().await?;
        Ok(share
            .get("access_rules")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}
