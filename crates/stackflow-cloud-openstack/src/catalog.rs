//! Keystone service catalog

use crate::error::{OpenStackError, Result};
use serde::Deserialize;
use stackflow_cloud::Service;

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

impl Endpoint {
    fn in_region(&self, region: Option<&str>) -> bool {
        match region {
            None => true,
            Some(region) => {
                self.region.as_deref() == Some(region) || self.region_id.as_deref() == Some(region)
            }
        }
    }
}

/// Service catalog returned with a token
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Endpoint URL for `service`, without a trailing slash
    pub fn endpoint(&self, service: Service, region: Option<&str>, interface: &str) -> Result<String> {
        for service_type in service.catalog_types() {
            let found = self
                .entries
                .iter()
                .filter(|entry| entry.service_type == *service_type)
                .flat_map(|entry| entry.endpoints.iter())
                .find(|endpoint| endpoint.interface == interface && endpoint.in_region(region));
            if let Some(endpoint) = found {
                return Ok(endpoint.url.trim_end_matches('/').to_string());
            }
        }
        Err(OpenStackError::EndpointNotFound {
            service: service.to_string(),
            region: region.unwrap_or("any").to_string(),
            interface: interface.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Catalog {
        serde_json::from_value(json!([
            {
                "type": "compute",
                "name": "nova",
                "endpoints": [
                    {"interface": "public", "region": "RegionOne", "url": "https://nova.one/v2.1/"},
                    {"interface": "internal", "region": "RegionOne", "url": "http://nova.internal/v2.1"},
                    {"interface": "public", "region": "RegionTwo", "url": "https://nova.two/v2.1"}
                ]
            },
            {
                "type": "volumev3",
                "endpoints": [
                    {"interface": "public", "region_id": "RegionOne", "url": "https://cinder.one/v3/p1"}
                ]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_endpoint_by_region_and_interface() {
        let catalog = catalog();
        assert_eq!(
            catalog
                .endpoint(Service::Compute, Some("RegionTwo"), "public")
                .unwrap(),
            "https://nova.two/v2.1"
        );
        assert_eq!(
            catalog
                .endpoint(Service::Compute, Some("RegionOne"), "internal")
                .unwrap(),
            "http://nova.internal/v2.1"
        );
    }

    #[test]
    fn test_fallback_service_type() {
        let catalog = catalog();
        assert_eq!(
            catalog
                .endpoint(Service::BlockStorage, Some("RegionOne"), "public")
                .unwrap(),
            "https://cinder.one/v3/p1"
        );
        assert!(catalog.endpoint(Service::Dns, None, "public").is_err());
    }
}
