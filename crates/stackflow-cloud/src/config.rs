//! Client configuration
//!
//! The `client_config` mapping a node carries (merged with runtime properties
//! and task inputs by the dispatcher) deserializes into [`ClientConfig`].

use crate::error::{CloudError, Result};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_DOMAIN: &str = "Default";

/// Connection settings for one operation
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_domain_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_domain_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,

    /// Disable TLS certificate verification
    #[serde(default)]
    pub insecure: bool,

    /// Custom trust root: a PEM file path or inline PEM text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,

    /// Options passed through to the client untouched
    #[serde(default)]
    pub kwargs: Map<String, Value>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ClientConfig {
    /// Parse a merged `client_config` mapping
    ///
    /// Keys this type does not know are folded into `kwargs`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value.clone()
        };
        let mut config: ClientConfig = serde_json::from_value(value)
            .map_err(|e| CloudError::InvalidConfig(format!("client_config: {}", e)))?;
        let extra = std::mem::take(&mut config.extra);
        for (key, value) in extra {
            config.kwargs.entry(key).or_insert(value);
        }
        Ok(config)
    }

    /// Check that password authentication has everything it needs
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.auth_url.is_none() {
            missing.push("auth_url");
        }
        if self.username.is_none() {
            missing.push("username");
        }
        if self.password.is_none() {
            missing.push("password");
        }
        if self.project_name.is_none() && self.project_id.is_none() {
            missing.push("project_name");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CloudError::InvalidConfig(format!(
                "client_config is missing: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn user_domain(&self) -> &str {
        self.user_domain_name.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    pub fn project_domain(&self) -> &str {
        self.project_domain_name.as_deref().unwrap_or(DEFAULT_DOMAIN)
    }

    /// Keystone v3 base URL derived from `auth_url`
    pub fn identity_url(&self) -> Option<String> {
        let url = self.auth_url.as_deref()?.trim_end_matches('/');
        if url.ends_with("/v3") {
            Some(url.to_string())
        } else if let Some(base) = url.strip_suffix("/v2.0") {
            Some(format!("{}/v3", base))
        } else {
            Some(format!("{}/v3", url))
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("project_name", &self.project_name)
            .field("project_id", &self.project_id)
            .field("region_name", &self.region_name)
            .field("insecure", &self.insecure)
            .field("ca_cert", &self.ca_cert)
            .field("kwargs", &self.kwargs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_keys_become_kwargs() {
        let config = ClientConfig::from_value(&json!({
            "auth_url": "https://keystone:5000",
            "username": "admin",
            "password": "secret",
            "project_name": "demo",
            "interface": "internal",
            "kwargs": {"timeout": 30}
        }))
        .unwrap();

        assert_eq!(config.kwargs.get("interface"), Some(&json!("internal")));
        assert_eq!(config.kwargs.get("timeout"), Some(&json!(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_keys() {
        let config = ClientConfig::from_value(&json!({"username": "admin"})).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("auth_url"));
        assert!(err.contains("password"));
        assert!(err.contains("project_name"));
    }

    #[test]
    fn test_identity_url_normalization() {
        let mut config = ClientConfig::default();
        config.auth_url = Some("https://keystone:5000/v2.0".into());
        assert_eq!(config.identity_url().unwrap(), "https://keystone:5000/v3");
        config.auth_url = Some("https://keystone:5000/".into());
        assert_eq!(config.identity_url().unwrap(), "https://keystone:5000/v3");
        config.auth_url = Some("https://keystone:5000/v3".into());
        assert_eq!(config.identity_url().unwrap(), "https://keystone:5000/v3");
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ClientConfig::from_value(&json!({"password": "hunter2"})).unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
