mod common;

use common::*;
use serde_json::json;
use stackflow_cloud::ResourceKind;
use stackflow_core::types::{operations as op, relationships as rel};

#[tokio::test]
async fn test_create_keypair_exports_keys() {
    let t = TestCloud::new();
    t.cloud.set_create_defaults(
        ResourceKind::Keypair,
        json!({"public_key": "PUB", "private_key": "PRIV"}),
    );
    let mut ctx = t.node_ctx(op::CREATE, endpoint(ResourceKind::Keypair, "kp", json!({})));

    t.invoke(&mut ctx, json!({"resource_config": {"name": "kp1"}}))
        .await
        .unwrap();

    let rt = runtime(&ctx);
    assert_eq!(rt.get_str("id"), Some("kp1"));
    assert_eq!(rt.get_str("name"), Some("kp1"));
    assert_eq!(rt.get_str("type"), Some("key_pair"));
    assert_eq!(rt.get_str("public_key"), Some("PUB"));
    assert_eq!(rt.get_str("private_key"), Some("PRIV"));
}

#[tokio::test]
async fn test_create_port_splits_fixed_ips() {
    let t = TestCloud::new();
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));
    let port = endpoint(
        ResourceKind::Port,
        "port",
        json!({
            "resource_config": {
                "network_id": net,
                "fixed_ips": [{"ip_address": "10.0.0.1"}, {"ip_address": "10.0.0.2"}],
                "allowed_address_pairs": [{"ip_address": "10.0.0.3"}, {"ip_address": "10.0.0.4"}],
            }
        }),
    );
    let mut ctx = t.node_ctx(op::CREATE, port);

    t.invoke(&mut ctx, json!({})).await.unwrap();

    let rt = runtime(&ctx);
    assert_eq!(rt.get("fixed_ips"), Some(&json!(["10.0.0.1", "10.0.0.2"])));
    assert_eq!(rt.get("ipv4_addresses"), Some(&json!(["10.0.0.1", "10.0.0.2"])));
    assert_eq!(rt.get_str("ipv4_address"), None);
    assert_eq!(rt.get("ipv4_address"), Some(&json!("")));
    assert_eq!(rt.get("ipv6_addresses"), Some(&json!([])));
    assert_eq!(rt.get("ipv6_address"), Some(&json!("")));
    assert_eq!(rt.get_str("network_id"), Some(net.as_str()));
}

#[tokio::test]
async fn test_server_configure_retries_until_active() {
    let t = TestCloud::new();
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "BUILD"}));
    t.cloud.insert(
        ResourceKind::Port,
        json!({
            "network_id": net,
            "device_id": server_id,
            "status": "ACTIVE",
            "mac_address": "fa:16:3e:00:00:01",
            "fixed_ips": [{"subnet_id": "", "ip_address": "10.0.0.7"}],
        }),
    );
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );
    let mut ctx = t.node_ctx(op::CONFIGURE, server);

    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_retry());
    assert!(runtime(&ctx).get("server").is_none());
    assert_eq!(ctx.operation.retry_number, 1);

    t.cloud.set_field(ResourceKind::Server, &server_id, "status", json!("ACTIVE"));
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let rt = runtime(&ctx);
    assert_eq!(rt.get("server").and_then(|s| s.get("id")), Some(&json!(server_id)));
    assert_eq!(rt.get_str("ip"), Some("10.0.0.7"));
    assert_eq!(rt.get_str("ipv4_address"), Some("10.0.0.7"));
    assert_eq!(rt.get("ipv4_addresses"), Some(&json!(["10.0.0.7"])));
}

#[tokio::test]
async fn test_delete_volume_polls_until_gone() {
    let t = TestCloud::new();
    let volume_id = t.cloud.insert(ResourceKind::Volume, json!({"name": "data", "status": "available"}));
    let volume = with_runtime(
        endpoint(ResourceKind::Volume, "data", json!({})),
        json!({"id": volume_id, "name": "data", "type": "volume"}),
    );
    let mut ctx = t.node_ctx(op::DELETE, volume);

    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_retry());
    assert!(runtime(&ctx).get_bool("delete_volume_task"));
    assert_eq!(t.cloud.count("delete", ResourceKind::Volume), 1);

    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert!(runtime(&ctx).is_empty());
    assert_eq!(t.cloud.count("delete", ResourceKind::Volume), 1);
}

#[tokio::test]
async fn test_external_router_without_subnet_interface_fails() {
    let t = TestCloud::new();
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "ext", "subnets": []}));
    let subnet_id = t.cloud.insert(
        ResourceKind::Subnet,
        json!({"name": "ext-sub", "network_id": net, "cidr": "192.168.0.0/24"}),
    );
    let router_id = t.cloud.insert(ResourceKind::Router, json!({"name": "gw", "routes": []}));

    let subnet = with_runtime(
        endpoint(ResourceKind::Subnet, "subnet", external(&subnet_id)),
        json!({"id": subnet_id, "external_resource": true}),
    );
    let router = with_runtime(
        endpoint(ResourceKind::Router, "router", external(&router_id)),
        json!({"id": router_id, "external_resource": true}),
    );
    let mut ctx = t.relationship_ctx(op::ESTABLISH, rel::SUBNET_CONNECTED_TO_ROUTER, subnet, router);

    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
    let message = err.to_string();
    assert!(message.contains(&router_id), "{}", message);
    assert!(message.contains(&subnet_id), "{}", message);
    assert_eq!(t.cloud.count("add_router_interface", ResourceKind::Router), 0);
}

#[tokio::test]
async fn test_external_router_with_subnet_interface_is_skipped() {
    let t = TestCloud::new();
    let subnet_id = t.cloud.insert(ResourceKind::Subnet, json!({"name": "ext-sub"}));
    let router_id = t.cloud.insert(ResourceKind::Router, json!({"name": "gw"}));
    t.cloud.insert(
        ResourceKind::Port,
        json!({
            "device_id": router_id,
            "device_owner": "network:router_interface",
            "fixed_ips": [{"subnet_id": subnet_id, "ip_address": "192.168.0.1"}],
        }),
    );

    let subnet = with_runtime(
        endpoint(ResourceKind::Subnet, "subnet", external(&subnet_id)),
        json!({"id": subnet_id, "external_resource": true}),
    );
    let router = with_runtime(
        endpoint(ResourceKind::Router, "router", external(&router_id)),
        json!({"id": router_id, "external_resource": true}),
    );
    let mut ctx = t.relationship_ctx(op::ESTABLISH, rel::SUBNET_CONNECTED_TO_ROUTER, subnet, router);

    t.invoke(&mut ctx, json!({})).await.unwrap();
}

#[tokio::test]
async fn test_active_external_floating_ip_is_recoverable() {
    let t = TestCloud::new();
    let fip_id = t.cloud.insert(
        ResourceKind::FloatingIp,
        json!({"floating_ip_address": "172.24.4.10", "status": "ACTIVE", "port_id": null}),
    );
    let mut props = external(&fip_id);
    props["allow_reallocation"] = json!(false);
    let mut ctx = t.node_ctx(op::CREATE, endpoint(ResourceKind::FloatingIp, "fip", props));

    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_recoverable());
    assert!(runtime(&ctx).is_empty());
    assert_eq!(t.cloud.count("create", ResourceKind::FloatingIp), 0);
}
