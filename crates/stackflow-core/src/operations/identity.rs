//! Identity projects
//!
//! Users, groups and roles only need the shared create/delete/update/list
//! bodies. A project additionally grants roles and applies its quota on
//! `start`.

use super::common::{lookup_id, string_list};
use crate::dispatch::Scope;
use crate::error::Result;
use serde_json::Value;
use stackflow_cloud::ResourceKind;

/// `{name, roles}` entries of the `users` / `groups` node properties
fn members(scope: &Scope<'_>, key: &str) -> Vec<(String, Vec<String>)> {
    scope
        .property(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| match entry {
            Value::String(name) => Some((name.clone(), Vec::new())),
            Value::Object(map) => {
                let name = map.get("name").and_then(Value::as_str)?;
                Some((name.to_string(), string_list(map.get("roles"))))
            }
            _ => None,
        })
        .collect()
}

pub async fn start_project(scope: &mut Scope<'_>) -> Result<()> {
    let project_id = scope.resource.require_id()?.to_string();

    for (user, roles) in members(scope, "users") {
        let user_id = lookup_id(scope, ResourceKind::User, &user).await?;
        for role in roles {
            let role_id = lookup_id(scope, ResourceKind::Role, &role).await?;
            scope.resource.project().assign_user_role(&user_id, &role_id).await?;
            tracing::info!(project = %project_id, user = %user, role = %role, "role granted to user");
        }
    }

    for (group, roles) in members(scope, "groups") {
        let group_id = lookup_id(scope, ResourceKind::Group, &group).await?;
        for role in roles {
            let role_id = lookup_id(scope, ResourceKind::Role, &role).await?;
            scope.resource.project().assign_group_role(&group_id, &role_id).await?;
            tracing::info!(project = %project_id, group = %group, role = %role, "role granted to group");
        }
    }

    let quota = scope
        .property("quota")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if !quota.is_empty() {
        scope.resource.project().set_quota(quota).await?;
        tracing::info!(project = %project_id, "project quota set");
    }
    Ok(())
}
