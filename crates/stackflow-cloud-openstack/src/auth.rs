//! Keystone v3 password authentication

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{OpenStackError, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use stackflow_cloud::ClientConfig;

const TOKEN_HEADER: &str = "X-Subject-Token";

/// Scoped token plus the catalog it came with
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub project_id: String,
    pub identity_url: String,
    pub catalog: Catalog,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    project: Option<TokenProject>,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenProject {
    id: String,
}

/// Request body for a project-scoped password token
pub fn password_request(config: &ClientConfig) -> Value {
    let project = match (&config.project_id, &config.project_name) {
        (Some(id), _) => json!({"id": id}),
        (None, name) => json!({
            "name": name,
            "domain": {"name": config.project_domain()},
        }),
    };

    json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": config.username,
                        "domain": {"name": config.user_domain()},
                        "password": config.password,
                    }
                }
            },
            "scope": {"project": project}
        }
    })
}

/// Obtain a scoped token from Keystone
pub async fn authenticate(http: &reqwest::Client, config: &ClientConfig) -> Result<Session> {
    config
        .validate()
        .map_err(|e| OpenStackError::InvalidConfig(e.to_string()))?;
    let identity_url = config
        .identity_url()
        .ok_or_else(|| OpenStackError::InvalidConfig("auth_url is not set".into()))?;
    let url = format!("{}/auth/tokens", identity_url);

    tracing::debug!(
        target: "keystoneauth.identity",
        url = %url,
        user = config.username.as_deref().unwrap_or_default(),
        "requesting project-scoped token"
    );

    let response = http.post(&url).json(&password_request(config)).send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(
            target: "keystoneauth.identity",
            status = status.as_u16(),
            "authentication rejected"
        );
        return Err(OpenStackError::Authentication(format!(
            "{} returned {}: {}",
            url, status, message
        )));
    }

    let token = response
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| OpenStackError::Authentication(format!("no {} header", TOKEN_HEADER)))?;
    let body: TokenResponse = response.json().await?;

    let project_id = body
        .token
        .project
        .map(|p| p.id)
        .or_else(|| config.project_id.clone())
        .ok_or_else(|| OpenStackError::Authentication("token is not project scoped".into()))?;

    Ok(Session {
        token,
        project_id,
        identity_url,
        catalog: Catalog::new(body.token.catalog),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_request_scopes_by_name() {
        let config = ClientConfig::from_value(&json!({
            "auth_url": "https://keystone:5000/v3",
            "username": "admin",
            "password": "secret",
            "project_name": "demo",
            "user_domain_name": "users"
        }))
        .unwrap();
        let body = password_request(&config);
        assert_eq!(body["auth"]["identity"]["password"]["user"]["domain"]["name"], "users");
        assert_eq!(body["auth"]["scope"]["project"]["name"], "demo");
        assert_eq!(body["auth"]["scope"]["project"]["domain"]["name"], "Default");
    }

    #[test]
    fn test_password_request_prefers_project_id() {
        let config = ClientConfig::from_value(&json!({
            "project_id": "p-1",
            "project_name": "demo"
        }))
        .unwrap();
        let body = password_request(&config);
        assert_eq!(body["auth"]["scope"]["project"], json!({"id": "p-1"}));
    }
}
