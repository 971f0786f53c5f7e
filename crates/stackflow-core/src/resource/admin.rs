use super::Resource;
use crate::error::Result;
use serde_json::{Map, Value};
use stackflow_cloud::Action;

/// Host aggregate calls
#[derive(Clone, Copy)]
pub struct AggregateApi<'a> {
    resource: &'a Resource,
}

impl<'a> AggregateApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub async fn set_metadata(&self, metadata: Map<String, Value>) -> Result<Value> {
        self.resource.action(Action::SetMetadata { metadata }).await
    }

    pub async fn add_host(&self, host: &str) -> Result<Value> {
        self.resource
            .action(Action::AddHost {
                host: host.to_string(),
            })
            .await
    }

    pub async fn remove_host(&self, host: &str) -> Result<Value> {
        self.resource
            .action(Action::RemoveHost {
                host: host.to_string(),
            })
            .await
    }
}

/// Identity project calls
#[derive(Clone, Copy)]
pub struct ProjectApi<'a> {
    resource: &'a Resource,
}

impl<'a> ProjectApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub async fn assign_user_role(&self, user_id: &str, role_id: &str) -> Result<()> {
        self.resource
            .action(Action::AssignRole {
                user_id: Some(user_id.to_string()),
                group_id: None,
                role_id: role_id.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn assign_group_role(&self, group_id: &str, role_id: &str) -> Result<()> {
        self.resource
            .action(Action::AssignRole {
                user_id: None,
                group_id: Some(group_id.to_string()),
                role_id: role_id.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn set_quota(&self, quota: Map<String, Value>) -> Result<Value> {
        self.resource.action(Action::SetQuota { quota }).await
    }
}

/// Flavor and volume type extra specs
#[derive(Clone, Copy)]
pub struct ExtraSpecsApi<'a> {
    resource: &'a Resource,
}

impl<'a> ExtraSpecsApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub async fn set(&self, specs: Map<String, Value>) -> Result<Value> {
        self.resource.action(Action::SetExtraSpecs { specs }).await
    }
}
