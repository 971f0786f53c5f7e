mod common;

use serde_json::json;
use stackflow_cloud::{ClientFactory, CloudClient, CloudError, ListQuery, ResourceKind, Target};
use stackflow_cloud_openstack::OpenStackConnector;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_connect_and_get_server() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("GET"))
        .and(path("/compute/v2.1/servers/s1"))
        .and(header("X-Auth-Token", common::TOKEN))
        .and(header("X-OpenStack-Nova-API-Version", "2.45"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "server": {"id": "s1", "name": "web", "status": "ACTIVE"}
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();

    assert_eq!(client.project_id().await.unwrap(), common::PROJECT_ID);
    let record = client
        .get(Target::of(ResourceKind::Server), "s1")
        .await
        .unwrap();
    assert_eq!(record["name"], "web");
    assert_eq!(record["status"], "ACTIVE");
}

#[tokio::test]
async fn test_missing_resource_is_not_found() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("GET"))
        .and(path("/network/v2.0/ports/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "NeutronError": {"type": "PortNotFound", "message": "Port gone could not be found."}
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    let err = client
        .get(Target::of(ResourceKind::Port), "gone")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_sends_filters() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("GET"))
        .and(path("/network/v2.0/networks"))
        .and(query_param("name", "private"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "networks": [{"id": "n1", "name": "private", "admin_state_up": true}]
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    let networks = client
        .list(
            Target::of(ResourceKind::Network),
            &ListQuery::new().with("name", "private"),
        )
        .await
        .unwrap();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0]["id"], "n1");
}

#[tokio::test]
async fn test_keypair_list_is_unwrapped() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("GET"))
        .and(path("/compute/v2.1/os-keypairs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keypairs": [{"keypair": {"name": "kp1", "public_key": "ssh-rsa AAA"}}]
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    let keypairs = client
        .list(Target::of(ResourceKind::Keypair), &ListQuery::new())
        .await
        .unwrap();
    assert_eq!(keypairs[0]["id"], "kp1");
    assert_eq!(keypairs[0]["public_key"], "ssh-rsa AAA");
}

#[tokio::test]
async fn test_create_volume_is_enveloped() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("POST"))
        .and(path("/volume/v3/p1/volumes"))
        .and(body_json(json!({"volume": {"name": "data", "size": 10}})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "volume": {"id": "v1", "name": "data", "size": 10, "status": "creating"}
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    let volume = client
        .create(
            Target::of(ResourceKind::Volume),
            json!({"name": "data", "size": 10}),
        )
        .await
        .unwrap();
    assert_eq!(volume["id"], "v1");
    assert_eq!(volume["status"], "creating");
}

#[tokio::test]
async fn test_image_update_uses_json_patch() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("PATCH"))
        .and(path("/image/v2/images/i1"))
        .and(header(
            "Content-Type",
            "application/openstack-images-v2.1-json-patch",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "i1", "name": "renamed", "status": "active"
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    let image = client
        .update(
            Target::of(ResourceKind::Image),
            "i1",
            json!({"name": "renamed"}),
        )
        .await
        .unwrap();
    assert_eq!(image["name"], "renamed");
}

#[tokio::test]
async fn test_compute_quota() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("GET"))
        .and(path("/compute/v2.1/os-quota-sets/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quota_set": {"instances": 10, "key_pairs": -1}
        })))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    assert_eq!(client.quota(ResourceKind::Server, "p1").await.unwrap(), 10);
    assert_eq!(client.quota(ResourceKind::Keypair, "p1").await.unwrap(), -1);
    assert_eq!(client.quota(ResourceKind::Image, "p1").await.unwrap(), -1);
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    Mock::given(method("DELETE"))
        .and(path("/compute/v2.1/servers/s1"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&server)
        .await;

    let client = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await
        .unwrap();
    let err = client
        .delete(Target::of(ResourceKind::Server), "s1")
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RateLimited(_)));
}

#[tokio::test]
async fn test_rejected_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/identity/v3/auth/tokens"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "The request you have made requires authentication."}
        })))
        .mount(&server)
        .await;

    let result = OpenStackConnector::new()
        .connect(&common::config(&server))
        .await;
    assert!(matches!(result, Err(CloudError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_missing_region_endpoint() {
    let server = MockServer::start().await;
    common::mount_keystone(&server).await;

    let mut config = common::config(&server);
    config.region_name = Some("RegionThree".into());
    let client = OpenStackConnector::new().connect(&config).await.unwrap();
    let err = client
        .get(Target::of(ResourceKind::Server), "s1")
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::EndpointNotFound(_)));
}
