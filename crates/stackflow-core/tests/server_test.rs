mod common;

use base64::Engine;
use common::*;
use serde_json::{Value, json};
use stackflow_cloud::ResourceKind;
use stackflow_core::types::{operations as op, relationships as rel};
use stackflow_core::userdata::split_multipart;
use stackflow_core::{AgentInfo, OperationContext, Result};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLOUD_CONFIG: &str = "#cloud-config\npackages:\n  - nginx";
const INIT_SCRIPT: &str = "#!/bin/bash\necho install agent";

/// Run an operation until it stops asking for a retry
async fn settle(t: &TestCloud, ctx: &mut OperationContext) -> Result<()> {
    settle_with(t, ctx, json!({})).await
}

async fn settle_with(t: &TestCloud, ctx: &mut OperationContext, inputs: Value) -> Result<()> {
    for _ in 0..5 {
        match t.invoke(ctx, inputs.clone()).await {
            Err(err) if err.is_retry() => continue,
            other => return other,
        }
    }
    panic!("operation {} never settled", ctx.operation.name);
}

#[tokio::test]
async fn test_create_server_wires_related_resources_and_user_data() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userdata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CLOUD_CONFIG))
        .mount(&mock)
        .await;

    let t = TestCloud::new();
    let image = t.cloud.insert(ResourceKind::Image, json!({"name": "cirros", "status": "active"}));
    let flavor = t.cloud.insert(ResourceKind::Flavor, json!({"name": "m1.small"}));
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));

    let keypair = with_runtime(
        endpoint(ResourceKind::Keypair, "kp", json!({})),
        json!({"id": "kp1", "name": "kp1", "type": "key_pair"}),
    );
    let network = with_runtime(
        endpoint(ResourceKind::Network, "net", json!({})),
        json!({"id": net, "type": "network"}),
    );
    let server = endpoint(
        ResourceKind::Server,
        "web",
        json!({
            "resource_config": {
                "name": "web",
                "image_id": "cirros",
                "flavor_id": flavor,
                "user_data": {"type": "http", "url": format!("{}/userdata", mock.uri())},
            }
        }),
    );
    let server = relate(relate(server, rel::DEPENDS_ON, keypair), rel::CONNECTED_TO, network);

    let mut ctx = t.node_ctx(op::CREATE, server);
    ctx.agent = Some(AgentInfo {
        init_script: Some(INIT_SCRIPT.to_string()),
        install_method: None,
    });
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let id = runtime(&ctx).id().unwrap().to_string();
    let record = t.cloud.record(ResourceKind::Server, &id).unwrap();
    assert_eq!(record["imageRef"], json!(image));
    assert_eq!(record["flavorRef"], json!(flavor));
    assert_eq!(record["key_name"], "kp1");
    assert!(record["addresses"]["private"].as_array().is_some_and(|a| a.len() == 1));

    let encoded = record["user_data"].as_str().unwrap();
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
    let decoded = String::from_utf8(decoded).unwrap();
    assert_eq!(
        split_multipart(&decoded),
        vec![CLOUD_CONFIG.to_string(), INIT_SCRIPT.to_string()]
    );
}

#[tokio::test]
async fn test_unknown_image_is_non_recoverable() {
    let t = TestCloud::new();
    let server = endpoint(
        ResourceKind::Server,
        "web",
        json!({"resource_config": {"image_id": "missing"}}),
    );
    let mut ctx = t.node_ctx(op::CREATE, server);
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
    assert!(err.to_string().contains("missing"), "{}", err);
    assert_eq!(t.cloud.count("create", ResourceKind::Server), 0);
}

#[tokio::test]
async fn test_user_data_download_failure_is_non_recoverable() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let t = TestCloud::new();
    let server = endpoint(
        ResourceKind::Server,
        "web",
        json!({"resource_config": {"user_data": {"url": format!("{}/nothing", mock.uri())}}}),
    );
    let mut ctx = t.node_ctx(op::CREATE, server);
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
    assert_eq!(t.cloud.count("create", ResourceKind::Server), 0);
}

#[tokio::test]
async fn test_stop_then_start_server() {
    let t = TestCloud::new();
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "ACTIVE"}));
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );

    let mut ctx = t.node_ctx(op::STOP, server);
    settle(&t, &mut ctx).await.unwrap();
    assert_eq!(t.cloud.record(ResourceKind::Server, &server_id).unwrap()["status"], "SHUTOFF");
    assert_eq!(t.cloud.count("stop", ResourceKind::Server), 1);
    assert!(!runtime(&ctx).get_bool("stop_server_task"));

    ctx.operation.name = op::START.to_string();
    settle(&t, &mut ctx).await.unwrap();
    assert_eq!(t.cloud.record(ResourceKind::Server, &server_id).unwrap()["status"], "ACTIVE");
}

#[tokio::test]
async fn test_hard_reboot() {
    let t = TestCloud::new();
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "ACTIVE"}));
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );
    let mut ctx = t.node_ctx(op::REBOOT, server);

    settle_with(&t, &mut ctx, json!({"reboot_type": "HARD"}))
        .await
        .unwrap();
    assert_eq!(t.cloud.count("reboot", ResourceKind::Server), 1);
    assert!(!runtime(&ctx).get_bool("reboot_server_task"));
}

#[tokio::test]
async fn test_delete_server_clears_runtime() {
    let t = TestCloud::new();
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "ACTIVE"}));
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server", "ip": "10.0.0.4"}),
    );
    let mut ctx = t.node_ctx(op::DELETE, server);
    settle(&t, &mut ctx).await.unwrap();
    assert!(runtime(&ctx).is_empty());
    assert!(t.cloud.record(ResourceKind::Server, &server_id).is_none());
}

#[tokio::test]
async fn test_security_groups_are_requested_once() {
    let t = TestCloud::new();
    let group = with_runtime(
        endpoint(ResourceKind::SecurityGroup, "web_sg", json!({})),
        json!({"id": "sg1", "name": "web", "type": "security_group"}),
    );
    let server = relate(
        endpoint(
            ResourceKind::Server,
            "web",
            json!({"resource_config": {"name": "web", "security_groups": ["web", "default"]}}),
        ),
        rel::CONNECTED_TO,
        group,
    );
    let mut ctx = t.node_ctx(op::CREATE, server);
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let id = runtime(&ctx).id().unwrap().to_string();
    let record = t.cloud.record(ResourceKind::Server, &id).unwrap();
    assert_eq!(
        record["security_groups"],
        json!([{"name": "default"}, {"name": "web"}])
    );
}

#[tokio::test]
async fn test_stop_detaches_interfaces_of_shutoff_server() {
    let t = TestCloud::new();
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "SHUTOFF"}));
    let port_id = t.cloud.insert(
        ResourceKind::Port,
        json!({"network_id": net, "device_id": server_id, "status": "ACTIVE", "fixed_ips": []}),
    );
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );

    let mut ctx = t.node_ctx(op::STOP, server);
    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert_eq!(t.cloud.record(ResourceKind::Port, &port_id).unwrap()["device_id"], "");
    assert_eq!(t.cloud.count("detach_interface", ResourceKind::Server), 1);
    assert_eq!(t.cloud.count("stop", ResourceKind::Server), 0);
}

#[tokio::test]
async fn test_external_server_adopts_and_releases_interfaces() {
    let t = TestCloud::new();
    let mgmt = t.cloud.insert(ResourceKind::Network, json!({"name": "mgmt", "subnets": []}));
    let private = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "legacy", "status": "ACTIVE"}));
    let mgmt_port = t.cloud.insert(
        ResourceKind::Port,
        json!({"network_id": mgmt, "device_id": server_id, "status": "ACTIVE", "fixed_ips": []}),
    );
    let network = with_runtime(
        endpoint(ResourceKind::Network, "private", json!({})),
        json!({"id": private, "name": "private", "type": "network"}),
    );
    let server = relate(
        endpoint(ResourceKind::Server, "legacy", external(&server_id)),
        rel::CONNECTED_TO,
        network,
    );

    let mut ctx = t.node_ctx(op::CONFIGURE, server);
    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert!(runtime(&ctx).is_external());
    assert_eq!(t.cloud.count("attach_interface", ResourceKind::Server), 1);
    let adopted = runtime(&ctx).get("interfaces").cloned().unwrap();
    let adopted = adopted.as_array().unwrap();
    assert_eq!(adopted.len(), 1);
    let adopted_port = adopted[0].as_str().unwrap().to_string();
    assert_ne!(adopted_port, mgmt_port);
    assert_eq!(
        t.cloud.record(ResourceKind::Port, &adopted_port).unwrap()["network_id"],
        json!(private)
    );

    ctx.operation.name = op::STOP.to_string();
    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert_eq!(t.cloud.record(ResourceKind::Port, &adopted_port).unwrap()["device_id"], "");
    assert_eq!(
        t.cloud.record(ResourceKind::Port, &mgmt_port).unwrap()["device_id"],
        json!(server_id)
    );
    assert_eq!(t.cloud.count("stop", ResourceKind::Server), 0);
    assert!(!runtime(&ctx).contains("interfaces"));
}

#[tokio::test]
async fn test_unlink_security_group_cleans_ports() {
    let t = TestCloud::new();
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));
    let group_id = t.cloud.insert(ResourceKind::SecurityGroup, json!({"name": "web"}));
    let server_id = t.cloud.insert(
        ResourceKind::Server,
        json!({"name": "web", "status": "ACTIVE", "security_groups": [{"name": "web"}]}),
    );
    let port_id = t.cloud.insert(
        ResourceKind::Port,
        json!({
            "network_id": net,
            "device_id": server_id,
            "status": "ACTIVE",
            "security_groups": [group_id, "sg-other"],
        }),
    );
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );
    let group = with_runtime(
        endpoint(ResourceKind::SecurityGroup, "web_sg", json!({})),
        json!({"id": group_id, "name": "web", "type": "security_group"}),
    );

    let mut ctx = t.relationship_ctx(
        op::UNLINK,
        rel::SERVER_CONNECTED_TO_SECURITY_GROUP,
        server,
        group,
    );
    t.invoke(&mut ctx, json!({})).await.unwrap();

    assert_eq!(t.cloud.count("remove_security_group", ResourceKind::Server), 1);
    assert_eq!(
        t.cloud.record(ResourceKind::Server, &server_id).unwrap()["security_groups"],
        json!([])
    );
    assert_eq!(
        t.cloud.record(ResourceKind::Port, &port_id).unwrap()["security_groups"],
        json!(["sg-other"])
    );
}

#[tokio::test]
async fn test_server_snapshot_create_restore_delete() {
    let t = TestCloud::new();
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "ACTIVE"}));
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );
    let inputs = json!({"snapshot_name": "weekly"});

    let mut ctx = t.node_ctx(op::SNAPSHOT_CREATE, server);
    t.invoke(&mut ctx, inputs.clone()).await.unwrap();
    assert_eq!(t.cloud.count("create_image", ResourceKind::Server), 1);
    assert_eq!(runtime(&ctx).get_str("backup_done"), Some("DONE"));
    let images = t.cloud.records(ResourceKind::Image);
    assert_eq!(images.len(), 1);
    let image_id = images[0]["id"].clone();

    ctx.operation.name = op::SNAPSHOT_APPLY.to_string();
    let err = t.invoke(&mut ctx, inputs.clone()).await.unwrap_err();
    assert!(err.is_retry());
    assert_eq!(runtime(&ctx).get_str("restore_state"), Some("PENDING"));
    assert_eq!(t.cloud.count("stop", ResourceKind::Server), 1);

    let err = t.invoke(&mut ctx, inputs.clone()).await.unwrap_err();
    assert!(err.is_retry());
    assert_eq!(runtime(&ctx).get_str("restore_state"), Some("REBUILD"));
    assert_eq!(runtime(&ctx).get_str("stop"), Some("DONE"));
    assert_eq!(t.cloud.count("rebuild", ResourceKind::Server), 1);

    settle_with(&t, &mut ctx, inputs.clone()).await.unwrap();
    let record = t.cloud.record(ResourceKind::Server, &server_id).unwrap();
    assert_eq!(record["status"], "ACTIVE");
    assert_eq!(record["image"]["id"], image_id);
    for key in ["restore_state", "stop", "start"] {
        assert!(!runtime(&ctx).contains(key), "{} left behind", key);
    }

    ctx.operation.name = op::SNAPSHOT_DELETE.to_string();
    settle_with(&t, &mut ctx, inputs).await.unwrap();
    assert!(t.cloud.records(ResourceKind::Image).is_empty());
    assert!(!runtime(&ctx).contains("backup_done"));
}

#[tokio::test]
async fn test_snapshot_rotation_out_of_range_is_non_recoverable() {
    let t = TestCloud::new();
    let server_id = t.cloud.insert(ResourceKind::Server, json!({"name": "web", "status": "ACTIVE"}));
    let server = with_runtime(
        endpoint(ResourceKind::Server, "web", json!({})),
        json!({"id": server_id, "name": "web", "type": "server"}),
    );
    let mut ctx = t.node_ctx(op::SNAPSHOT_CREATE, server);
    let inputs = json!({"snapshot_incremental": false, "snapshot_rotation": u64::from(u32::MAX) + 1});

    let err = t.invoke(&mut ctx, inputs).await.unwrap_err();
    assert!(err.is_non_recoverable());
    assert!(err.to_string().contains("snapshot_rotation"), "{}", err);
    assert_eq!(t.cloud.count("create_backup", ResourceKind::Server), 0);
}
