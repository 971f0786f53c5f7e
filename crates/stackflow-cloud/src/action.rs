//! Kind-specific calls beyond create/get/list/update/delete

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind-specific remote action
///
/// Each variant documents the kind it applies to. Clients reject a variant
/// sent for the wrong kind with [`CloudError::UnsupportedAction`](crate::CloudError).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    // --- server ---
    Start,
    Stop,
    Reboot {
        hard: bool,
    },
    Suspend,
    Resume,
    Rebuild {
        image_id: String,
    },
    /// Snapshot the server into a new image
    CreateImage {
        name: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    /// Rotating backup of the server into images
    CreateBackup {
        name: String,
        backup_type: String,
        rotation: u32,
    },
    AddSecurityGroup {
        name: String,
    },
    RemoveSecurityGroup {
        name: String,
    },
    AddFloatingIp {
        address: String,
        fixed_address: Option<String>,
    },
    RemoveFloatingIp {
        address: String,
    },
    ListInterfaces,
    AttachInterface {
        port_id: Option<String>,
        net_id: Option<String>,
    },
    DetachInterface {
        port_id: String,
    },
    ListVolumeAttachments,
    AttachVolume {
        volume_id: String,
        device: Option<String>,
    },
    DetachVolume {
        volume_id: String,
    },
    GetPassword,

    // --- router ---
    AddRouterInterface {
        subnet_id: Option<String>,
        port_id: Option<String>,
    },
    RemoveRouterInterface {
        subnet_id: Option<String>,
        port_id: Option<String>,
    },

    // --- host aggregate ---
    SetMetadata {
        metadata: Map<String, Value>,
    },
    AddHost {
        host: String,
    },
    RemoveHost {
        host: String,
    },

    // --- volume backup ---
    RestoreBackup {
        volume_id: Option<String>,
        name: Option<String>,
    },

    // --- identity ---
    /// Grant a role on the project to a user or a group
    AssignRole {
        user_id: Option<String>,
        group_id: Option<String>,
        role_id: String,
    },
    AddUserToGroup {
        user_id: String,
    },
    /// Quota update, keyed by service (`compute`, `network`, `volume`)
    SetQuota {
        quota: Map<String, Value>,
    },

    // --- flavor / volume type ---
    SetExtraSpecs {
        specs: Map<String, Value>,
    },

    // --- file share ---
    AllowAccess {
        access_type: String,
        access_to: String,
        access_level: String,
    },
    DenyAccess {
        access_id: String,
    },
}

impl Action {
    /// Stable action name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Reboot { .. } => "reboot",
            Action::Suspend => "suspend",
            Action::Resume => "resume",
            Action::Rebuild { .. } => "rebuild",
            Action::CreateImage { .. } => "create_image",
            Action::CreateBackup { .. } => "create_backup",
            Action::AddSecurityGroup { .. } => "add_security_group",
            Action::RemoveSecurityGroup { .. } => "remove_security_group",
            Action::AddFloatingIp { .. } => "add_floating_ip",
            Action::RemoveFloatingIp { .. } => "remove_floating_ip",
            Action::ListInterfaces => "list_interfaces",
            Action::AttachInterface { .. } => "attach_interface",
            Action::DetachInterface { .. } => "detach_interface",
            Action::ListVolumeAttachments => "list_volume_attachments",
            Action::AttachVolume { .. } => "attach_volume",
            Action::DetachVolume { .. } => "detach_volume",
            Action::GetPassword => "get_password",
            Action::AddRouterInterface { .. } => "add_router_interface",
            Action::RemoveRouterInterface { .. } => "remove_router_interface",
            Action::SetMetadata { .. } => "set_metadata",
            Action::AddHost { .. } => "add_host",
            Action::RemoveHost { .. } => "remove_host",
            Action::RestoreBackup { .. } => "restore_backup",
            Action::AssignRole { .. } => "assign_role",
            Action::AddUserToGroup { .. } => "add_user_to_group",
            Action::SetQuota { .. } => "set_quota",
            Action::SetExtraSpecs { .. } => "set_extra_specs",
            Action::AllowAccess { .. } => "allow_access",
            Action::DenyAccess { .. } => "deny_access",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Equality filters applied to a list call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filters: Map<String, Value>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn from_map(filters: Map<String, Value>) -> Self {
        Self { filters }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Whether a record satisfies every filter
    ///
    /// Scalars compare by their string form so that `"1"` matches `1`.
    pub fn matches(&self, record: &Value) -> bool {
        self.filters.iter().all(|(key, expected)| match record.get(key) {
            Some(actual) => scalar_text(actual) == scalar_text(expected),
            None => expected.is_null(),
        })
    }

    /// Filters rendered as URL query pairs
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|(k, v)| (k.clone(), scalar_text(v)))
            .collect()
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_matches_scalars() {
        let query = ListQuery::new().with("name", "web").with("size", 1);
        assert!(query.matches(&json!({"name": "web", "size": "1"})));
        assert!(!query.matches(&json!({"name": "db", "size": 1})));
        assert!(!query.matches(&json!({"name": "web"})));
    }

    #[test]
    fn test_action_serialization_is_tagged() {
        let action = Action::Reboot { hard: true };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value, json!({"action": "reboot", "hard": true}));
        assert_eq!(action.name(), "reboot");
    }
}
