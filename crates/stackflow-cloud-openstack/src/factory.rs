//! Client factory backed by Keystone

use crate::auth::authenticate;
use crate::client::OpenStackClient;
use crate::error::{OpenStackError, Result};
use async_trait::async_trait;
use stackflow_cloud::{ClientConfig, ClientFactory, CloudClient};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_INTERFACE: &str = "public";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connects to OpenStack with password authentication
#[derive(Debug, Clone, Default)]
pub struct OpenStackConnector;

impl OpenStackConnector {
    pub fn new() -> Self {
        Self
    }

    /// HTTP client honouring `insecure`, `ca_cert` and `kwargs.timeout`
    pub fn http_client(config: &ClientConfig) -> Result<reqwest::Client> {
        let timeout = config
            .kwargs
            .get("timeout")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(timeout));

        if config.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca_cert) = &config.ca_cert {
            let pem = if Path::new(ca_cert).is_file() {
                std::fs::read(ca_cert)?
            } else {
                ca_cert.as_bytes().to_vec()
            };
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| OpenStackError::InvalidConfig(format!("ca_cert: {}", e)))?;
            builder = builder.add_root_certificate(certificate);
        }

        Ok(builder.build()?)
    }

    pub async fn open(&self, config: &ClientConfig) -> Result<OpenStackClient> {
        let http = Self::http_client(config)?;
        let session = authenticate(&http, config).await?;
        let interface = config
            .kwargs
            .get("interface")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(DEFAULT_INTERFACE)
            .to_string();

        tracing::debug!(
            target: "openstack.identity",
            project_id = %session.project_id,
            region = config.region_name.as_deref().unwrap_or("any"),
            "session established"
        );

        Ok(OpenStackClient::new(
            http,
            session,
            config.region_name.clone(),
            interface,
        ))
    }
}

#[async_trait]
impl ClientFactory for OpenStackConnector {
    async fn connect(&self, config: &ClientConfig) -> stackflow_cloud::Result<Arc<dyn CloudClient>> {
        let client = self.open(config).await?;
        Ok(Arc::new(client))
    }
}
