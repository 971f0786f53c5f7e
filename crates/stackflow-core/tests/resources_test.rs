mod common;

use common::*;
use serde_json::json;
use stackflow_cloud::ResourceKind;
use stackflow_core::types::{operations as op, relationships as rel};

#[tokio::test]
async fn test_project_start_grants_roles_and_quota() {
    let t = TestCloud::new();
    let project_id = t.cloud.insert(ResourceKind::Project, json!({"name": "tenant-a"}));
    let alice = t.cloud.insert(ResourceKind::User, json!({"name": "alice"}));
    t.cloud.insert(ResourceKind::Role, json!({"name": "member"}));
    t.cloud.insert(ResourceKind::Role, json!({"name": "reader"}));

    let project = with_runtime(
        endpoint(
            ResourceKind::Project,
            "project",
            json!({
                "users": [{"name": "alice", "roles": ["member", "reader"]}],
                "quota": {"network": 1},
            }),
        ),
        json!({"id": project_id, "name": "tenant-a", "type": "project"}),
    );
    let mut ctx = t.node_ctx(op::START, project);
    t.invoke(&mut ctx, json!({})).await.unwrap();

    assert_eq!(t.cloud.count("assign_role", ResourceKind::Project), 2);
    assert_eq!(t.cloud.count("set_quota", ResourceKind::Project), 1);
    let record = t.cloud.record(ResourceKind::Project, &project_id).unwrap();
    let assignments = record["role_assignments"].as_array().unwrap();
    assert!(assignments.iter().all(|a| a["user_id"] == json!(alice)));
}

#[tokio::test]
async fn test_project_start_with_unknown_user_fails() {
    let t = TestCloud::new();
    let project_id = t.cloud.insert(ResourceKind::Project, json!({"name": "tenant-a"}));
    let project = with_runtime(
        endpoint(
            ResourceKind::Project,
            "project",
            json!({"users": [{"name": "nobody", "roles": ["member"]}]}),
        ),
        json!({"id": project_id, "type": "project"}),
    );
    let mut ctx = t.node_ctx(op::START, project);
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
    assert!(err.to_string().contains("nobody"), "{}", err);
}

#[tokio::test]
async fn test_project_quota_update_is_unsupported() {
    let t = TestCloud::new();
    let project = with_runtime(
        endpoint(ResourceKind::Project, "project", json!({})),
        json!({"id": "p1", "type": "project"}),
    );
    let mut ctx = t.node_ctx(op::UPDATE_PROJECT_QUOTA, project);
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
    assert!(t.cloud.calls().is_empty());
}

#[tokio::test]
async fn test_recordset_lives_in_related_zone() {
    let t = TestCloud::new();
    let zone_id = t.cloud.insert(ResourceKind::DnsZone, json!({"name": "example.org."}));
    let zone = with_runtime(
        endpoint(ResourceKind::DnsZone, "zone", json!({})),
        json!({"id": zone_id, "type": "zone"}),
    );
    let recordset = relate(
        endpoint(
            ResourceKind::DnsRecordset,
            "www",
            json!({"resource_config": {"name": "www.example.org.", "type": "A", "records": ["10.0.0.5"]}}),
        ),
        rel::CONNECTED_TO,
        zone,
    );

    let mut ctx = t.node_ctx(op::CREATE, recordset);
    t.invoke(&mut ctx, json!({})).await.unwrap();
    let id = runtime(&ctx).id().unwrap().to_string();
    assert_eq!(runtime(&ctx).get_str("zone_id"), Some(zone_id.as_str()));
    assert_eq!(
        t.cloud.record(ResourceKind::DnsRecordset, &id).unwrap()["zone_id"],
        json!(zone_id)
    );

    ctx.operation.name = op::DELETE.to_string();
    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert!(t.cloud.records(ResourceKind::DnsRecordset).is_empty());
    assert!(runtime(&ctx).is_empty());
}

#[tokio::test]
async fn test_recordset_without_zone_fails() {
    let t = TestCloud::new();
    let recordset = endpoint(
        ResourceKind::DnsRecordset,
        "www",
        json!({"resource_config": {"name": "www.example.org.", "type": "A"}}),
    );
    let mut ctx = t.node_ctx(op::CREATE, recordset);
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
    assert_eq!(t.cloud.count("create", ResourceKind::DnsRecordset), 0);
}

#[tokio::test]
async fn test_share_grants_access_rules_once() {
    let t = TestCloud::new();
    let share_net = t.cloud.insert(ResourceKind::ShareNetwork, json!({"name": "storage"}));
    let network = with_runtime(
        endpoint(ResourceKind::ShareNetwork, "storage", json!({})),
        json!({"id": share_net, "type": "share_network"}),
    );
    let share = relate(
        endpoint(
            ResourceKind::FileShare,
            "share",
            json!({"resource_config": {
                "name": "exports",
                "size": 1,
                "share_proto": "NFS",
                "access_rules": [{"access_type": "ip", "access_to": "10.0.0.0/24"}],
            }}),
        ),
        rel::SHARE_CONNECTED_TO_NETWORK_SHARE,
        network,
    );

    let mut ctx = t.node_ctx(op::CREATE, share);
    t.invoke(&mut ctx, json!({})).await.unwrap();
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let id = runtime(&ctx).id().unwrap().to_string();
    let record = t.cloud.record(ResourceKind::FileShare, &id).unwrap();
    assert_eq!(record["share_network_id"], json!(share_net));
    assert_eq!(record["access_rules"].as_array().unwrap().len(), 1);
    assert_eq!(record["access_rules"][0]["access_level"], "rw");
    assert_eq!(t.cloud.count("create", ResourceKind::FileShare), 1);
    assert_eq!(t.cloud.count("allow_access", ResourceKind::FileShare), 1);
    let rule_id = record["access_rules"][0]["id"].clone();
    assert_eq!(runtime(&ctx).get("access_rules"), Some(&json!([rule_id])));
}

#[tokio::test]
async fn test_share_with_existing_name_is_reused_then_deleted() {
    let t = TestCloud::new();
    let share_id = t.cloud.insert(
        ResourceKind::FileShare,
        json!({"name": "exports", "status": "available", "access_rules": []}),
    );
    let share = endpoint(
        ResourceKind::FileShare,
        "share",
        json!({"resource_config": {"name": "exports", "size": 1, "share_proto": "NFS"}}),
    );

    let mut ctx = t.node_ctx(op::CREATE, share);
    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert_eq!(runtime(&ctx).id(), Some(share_id.as_str()));
    assert_eq!(t.cloud.count("create", ResourceKind::FileShare), 0);

    ctx.operation.name = op::DELETE.to_string();
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_retry());
    assert!(runtime(&ctx).get_bool("delete_share_task"));
    assert!(t.cloud.record(ResourceKind::FileShare, &share_id).is_none());

    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert!(runtime(&ctx).is_empty());
    assert_eq!(t.cloud.count("delete", ResourceKind::FileShare), 1);
}

#[tokio::test]
async fn test_share_network_takes_related_network() {
    let t = TestCloud::new();
    let net = t.cloud.insert(ResourceKind::Network, json!({"name": "private", "subnets": []}));
    let network = with_runtime(
        endpoint(ResourceKind::Network, "net", json!({})),
        json!({"id": net, "type": "network"}),
    );
    let share_network = relate(
        endpoint(ResourceKind::ShareNetwork, "storage", json!({})),
        rel::NETWORK_SHARE_CONNECTED_TO_NETWORK,
        network,
    );
    let mut ctx = t.node_ctx(op::CREATE, share_network);
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let id = runtime(&ctx).id().unwrap().to_string();
    let record = t.cloud.record(ResourceKind::ShareNetwork, &id).unwrap();
    assert_eq!(record["neutron_net_id"], json!(net));
}

#[tokio::test]
async fn test_host_aggregate_hosts() {
    let t = TestCloud::new();
    let aggregate = endpoint(
        ResourceKind::HostAggregate,
        "agg",
        json!({
            "resource_config": {"name": "fast", "availability_zone": "nova"},
            "hosts": ["compute-1", "compute-2"],
            "metadata": {"ssd": "true"},
        }),
    );
    let mut ctx = t.node_ctx(op::CREATE, aggregate);
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let id = runtime(&ctx).id().unwrap().to_string();
    let record = t.cloud.record(ResourceKind::HostAggregate, &id).unwrap();
    assert_eq!(record["hosts"], json!(["compute-1", "compute-2"]));
    assert_eq!(record["metadata"]["ssd"], "true");

    ctx.operation.name = op::ADD_HOSTS.to_string();
    t.invoke(&mut ctx, json!({"hosts": ["compute-2", "compute-3"]}))
        .await
        .unwrap();
    assert_eq!(t.cloud.count("add_host", ResourceKind::HostAggregate), 3);

    ctx.operation.name = op::REMOVE_HOSTS.to_string();
    t.invoke(&mut ctx, json!({"hosts": ["compute-1"]})).await.unwrap();
    let record = t.cloud.record(ResourceKind::HostAggregate, &id).unwrap();
    assert_eq!(record["hosts"], json!(["compute-2", "compute-3"]));
    assert_eq!(runtime(&ctx).get("hosts"), Some(&json!(["compute-2", "compute-3"])));

    ctx.operation.name = op::DELETE.to_string();
    t.invoke(&mut ctx, json!({})).await.unwrap();
    assert_eq!(t.cloud.count("remove_host", ResourceKind::HostAggregate), 3);
    assert!(t.cloud.record(ResourceKind::HostAggregate, &id).is_none());
}

#[tokio::test]
async fn test_add_hosts_requires_input() {
    let t = TestCloud::new();
    let aggregate = with_runtime(
        endpoint(ResourceKind::HostAggregate, "agg", json!({})),
        json!({"id": "a1", "type": "aggregate"}),
    );
    let mut ctx = t.node_ctx(op::ADD_HOSTS, aggregate);
    let err = t.invoke(&mut ctx, json!({})).await.unwrap_err();
    assert!(err.is_non_recoverable());
}

#[tokio::test]
async fn test_flavor_extra_specs() {
    let t = TestCloud::new();
    let flavor = endpoint(
        ResourceKind::Flavor,
        "flavor",
        json!({
            "resource_config": {"name": "m1.pinned", "ram": 2048, "vcpus": 2, "disk": 20},
            "extra_specs": {"hw:cpu_policy": "dedicated"},
        }),
    );
    let mut ctx = t.node_ctx(op::CREATE, flavor);
    t.invoke(&mut ctx, json!({})).await.unwrap();

    let id = runtime(&ctx).id().unwrap().to_string();
    let record = t.cloud.record(ResourceKind::Flavor, &id).unwrap();
    assert_eq!(record["extra_specs"]["hw:cpu_policy"], "dedicated");
    assert_eq!(t.cloud.count("set_extra_specs", ResourceKind::Flavor), 1);
}
