//! Compact (v2) node layout
//!
//! Older blueprints declare `openstack_config`, `resource_id` and a per-kind
//! section such as `server` or `port`. Nodes flagged `use_compact_node` are
//! rewritten to the `client_config` / `resource_config` layout before any
//! configuration is merged.

use crate::resolver::deep_merge;
use serde_json::{Map, Value, json};
use stackflow_cloud::ResourceKind;

pub const USE_COMPACT_NODE: &str = "use_compact_node";

/// Property holding the per-kind section of a compact node
pub fn section_key(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::SecurityGroup => "security_group",
        ResourceKind::SecurityGroupRule => "security_group_rule",
        ResourceKind::ServerGroup => "server_group",
        ResourceKind::RbacPolicy => "rbac_policy",
        ResourceKind::VolumeType => "volume_type",
        ResourceKind::ShareNetwork => "share_network",
        other => other.singular(),
    }
}

/// Rewrite compact node properties; other nodes are returned unchanged
pub fn translate(kind: ResourceKind, properties: &Map<String, Value>) -> Map<String, Value> {
    let compact = matches!(properties.get(USE_COMPACT_NODE), Some(Value::Bool(true)));
    if !compact {
        return properties.clone();
    }

    let mut translated = properties.clone();

    if let Some(openstack_config) = translated.remove("openstack_config") {
        let mut client_config = json!({});
        deep_merge(&mut client_config, openstack_config);
        if let Some(existing) = translated.remove("client_config") {
            deep_merge(&mut client_config, existing);
        }
        translated.insert("client_config".into(), client_config);
    }

    let mut resource_config = json!({});
    if let Some(section) = translated.remove(section_key(kind)) {
        deep_merge(&mut resource_config, section);
    }
    if let Some(existing) = translated.remove("resource_config") {
        deep_merge(&mut resource_config, existing);
    }
    if let Some(resource_id) = translated.remove("resource_id")
        && !crate::resolver::is_empty(&resource_id)
    {
        resource_config["id"] = resource_id;
    }
    translated.insert("resource_config".into(), resource_config);

    tracing::debug!(kind = %kind, "translated compact node properties");
    translated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_translates_compact_port() {
        let translated = translate(
            ResourceKind::Port,
            &props(json!({
                "use_compact_node": true,
                "openstack_config": {"username": "admin", "region": "RegionOne"},
                "resource_id": "port-1",
                "port": {"name": "p", "network_id": "n1"},
                "use_external_resource": true
            })),
        );

        assert_eq!(translated["client_config"], json!({"username": "admin", "region": "RegionOne"}));
        assert_eq!(
            translated["resource_config"],
            json!({"name": "p", "network_id": "n1", "id": "port-1"})
        );
        assert_eq!(translated["use_external_resource"], true);
        assert!(!translated.contains_key("port"));
    }

    #[test]
    fn test_regular_node_untouched() {
        let original = props(json!({"resource_config": {"name": "x"}, "port": {"name": "y"}}));
        assert_eq!(translate(ResourceKind::Port, &original), original);
    }

    #[test]
    fn test_empty_resource_id_ignored() {
        let translated = translate(
            ResourceKind::FloatingIp,
            &props(json!({"use_compact_node": true, "resource_id": "", "floatingip": {"floating_network_id": "ext"}})),
        );
        assert_eq!(translated["resource_config"], json!({"floating_network_id": "ext"}));
    }
}
