use serde_json::{Value, json};
use stackflow_cloud::ClientConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "gAAAAABtest-token";
pub const PROJECT_ID: &str = "p1";

pub fn catalog(uri: &str) -> Value {
    json!([
        {
            "type": "compute",
            "endpoints": [
                {"interface": "public", "region": "RegionOne", "url": format!("{}/compute/v2.1", uri)},
                {"interface": "public", "region": "RegionTwo", "url": format!("{}/elsewhere/v2.1", uri)}
            ]
        },
        {
            "type": "network",
            "endpoints": [{"interface": "public", "region": "RegionOne", "url": format!("{}/network", uri)}]
        },
        {
            "type": "image",
            "endpoints": [{"interface": "public", "region": "RegionOne", "url": format!("{}/image", uri)}]
        },
        {
            "type": "volumev3",
            "endpoints": [{"interface": "public", "region": "RegionOne", "url": format!("{}/volume/v3/{}", uri, PROJECT_ID)}]
        }
    ])
}

/// Mount a Keystone token endpoint on `server`
pub async fn mount_keystone(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/identity/v3/auth/tokens"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", TOKEN)
                .set_body_json(json!({
                    "token": {
                        "project": {"id": PROJECT_ID, "name": "demo"},
                        "catalog": catalog(&server.uri())
                    }
                })),
        )
        .mount(server)
        .await;
}

pub fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::from_value(&json!({
        "auth_url": format!("{}/identity", server.uri()),
        "username": "admin",
        "password": "secret",
        "project_name": "demo",
        "region_name": "RegionOne"
    }))
    .unwrap()
}
