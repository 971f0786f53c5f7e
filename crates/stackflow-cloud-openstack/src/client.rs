//! OpenStack REST client
//!
//! Speaks the public REST APIs of Nova, Glance, Keystone, Neutron, Cinder,
//! Designate and Manila with a token obtained from Keystone. Request and
//! response envelopes are stripped so callers only see plain resource
//! objects.

use crate::auth::Session;
use crate::error::OpenStackError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value, json};
use stackflow_cloud::{
    Action, CloudClient, CloudError, ListQuery, ResourceKind, Result, Service, Target,
};

/// Compute microversion: 2.45 returns `image_id` from createImage/createBackup
pub const COMPUTE_MICROVERSION: &str = "2.45";

const JSON_PATCH: &str = "application/openstack-images-v2.1-json-patch";

macro_rules! sdk_event {
    ($service:expr, $($arg:tt)+) => {
        match $service {
            Service::Compute => tracing::debug!(target: "openstack.compute", $($arg)+),
            Service::Image => tracing::debug!(target: "openstack.image", $($arg)+),
            Service::Identity => tracing::debug!(target: "openstack.identity", $($arg)+),
            Service::Network => tracing::debug!(target: "openstack.network", $($arg)+),
            Service::BlockStorage => tracing::debug!(target: "openstack.block_storage", $($arg)+),
            Service::Dns => tracing::debug!(target: "openstack.dns", $($arg)+),
            Service::SharedFileSystem => {
                tracing::debug!(target: "openstack.shared_file_system", $($arg)+)
            }
        }
    };
}

enum Body {
    Json(Value),
    JsonPatch(Value),
}

/// Authenticated client for one project
pub struct OpenStackClient {
    http: reqwest::Client,
    session: Session,
    region: Option<String>,
    interface: String,
}

impl OpenStackClient {
    pub fn new(
        http: reqwest::Client,
        session: Session,
        region: Option<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            http,
            session,
            region,
            interface: interface.into(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn base(&self, service: Service) -> Result<String> {
        if service == Service::Identity {
            return Ok(self.session.identity_url.clone());
        }
        self.session
            .catalog
            .endpoint(service, self.region.as_deref(), &self.interface)
            .map_err(CloudError::from)
    }

    fn collection_url(&self, target: Target<'_>) -> Result<String> {
        let kind = target.kind;
        let path = match (kind.requires_parent(), target.parent) {
            (true, Some(parent)) => kind.path().replace("{parent}", parent),
            (true, None) => {
                return Err(CloudError::InvalidConfig(format!(
                    "{} needs a parent resource id",
                    kind
                )));
            }
            (false, _) => kind.path().to_string(),
        };
        Ok(format!("{}/{}", self.base(kind.service())?, path))
    }

    fn resource_url(&self, target: Target<'_>, id: &str) -> Result<String> {
        Ok(format!("{}/{}", self.collection_url(target)?, id))
    }

    async fn execute(
        &self,
        service: Service,
        method: Method,
        url: &str,
        body: Option<Body>,
        kind: ResourceKind,
        id: Option<&str>,
    ) -> Result<Value> {
        sdk_event!(service, method = %method, url = %url, "request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .header("X-Auth-Token", &self.session.token)
            .header("Accept", "application/json");
        if service == Service::Compute {
            request = request.header("X-OpenStack-Nova-API-Version", COMPUTE_MICROVERSION);
        }
        request = match body {
            Some(Body::Json(value)) => request.json(&value),
            Some(Body::JsonPatch(value)) => request
                .header("Content-Type", JSON_PATCH)
                .body(serde_json::to_vec(&value)?),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| OpenStackError::from(e).into_cloud(kind.resource_type(), id))?;
        let status = response.status();
        sdk_event!(service, method = %method, url = %url, status = status.as_u16(), "response");

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OpenStackError::Status {
                status: status.as_u16(),
                message: error_message(&message),
            }
            .into_cloud(kind.resource_type(), id));
        }

        let text = response
            .text()
            .await
            .map_err(|e| OpenStackError::from(e).into_cloud(kind.resource_type(), id))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn call(
        &self,
        kind: ResourceKind,
        method: Method,
        url: &str,
        body: Option<Value>,
        id: Option<&str>,
    ) -> Result<Value> {
        self.execute(kind.service(), method, url, body.map(Body::Json), kind, id)
            .await
    }

    async fn server_action(&self, id: &str, body: Value) -> Result<Value> {
        let url = format!("{}/action", self.resource_url(Target::of(ResourceKind::Server), id)?);
        self.call(ResourceKind::Server, Method::POST, &url, Some(body), Some(id))
            .await
    }

    fn server_sub(&self, id: &str, sub: &str) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.resource_url(Target::of(ResourceKind::Server), id)?,
            sub
        ))
    }

    async fn floating_ip_by_address(&self, address: &str) -> Result<Value> {
        self.list(
            Target::of(ResourceKind::FloatingIp),
            &ListQuery::new().with("floating_ip_address", address),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::not_found("floating_ip", address))
    }

    async fn set_floating_ip_port(
        &self,
        fip: &Value,
        port_id: Option<String>,
        fixed_address: Option<String>,
    ) -> Result<Value> {
        let fip_id = fip.get("id").and_then(Value::as_str).unwrap_or_default();
        let mut changes = json!({"port_id": port_id});
        if let Some(fixed) = fixed_address {
            changes["fixed_ip_address"] = json!(fixed);
        }
        self.update(Target::of(ResourceKind::FloatingIp), fip_id, changes)
            .await
    }

    async fn quota_set(&self, service: Service, project_id: &str) -> Result<Map<String, Value>> {
        let (kind, url, key) = match service {
            Service::Compute => (
                ResourceKind::Server,
                format!("{}/os-quota-sets/{}", self.base(service)?, project_id),
                Some("quota_set"),
            ),
            Service::Network => (
                ResourceKind::Network,
                format!("{}/v2.0/quotas/{}", self.base(service)?, project_id),
                Some("quota"),
            ),
            Service::BlockStorage => (
                ResourceKind::Volume,
                format!("{}/os-quota-sets/{}", self.base(service)?, project_id),
                Some("quota_set"),
            ),
            Service::SharedFileSystem => (
                ResourceKind::FileShare,
                format!("{}/quota-sets/{}", self.base(service)?, project_id),
                Some("quota_set"),
            ),
            Service::Dns => (
                ResourceKind::DnsZone,
                format!("{}/v2/quotas/{}", self.base(service)?, project_id),
                None,
            ),
            Service::Image | Service::Identity => return Ok(Map::new()),
        };
        let body = self.call(kind, Method::GET, &url, None, Some(project_id)).await?;
        let body = match key {
            Some(key) => body.get(key).cloned().unwrap_or(Value::Null),
            None => body,
        };
        Ok(match body {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }

    async fn update_quota(&self, project_id: &str, quota: Map<String, Value>) -> Result<Value> {
        let mut applied = Map::new();
        for (section, limits) in quota {
            let (kind, url, wrapper) = match section.as_str() {
                "compute" => (
                    ResourceKind::Server,
                    format!("{}/os-quota-sets/{}", self.base(Service::Compute)?, project_id),
                    "quota_set",
                ),
                "network" => (
                    ResourceKind::Network,
                    format!("{}/v2.0/quotas/{}", self.base(Service::Network)?, project_id),
                    "quota",
                ),
                "volume" => (
                    ResourceKind::Volume,
                    format!(
                        "{}/os-quota-sets/{}",
                        self.base(Service::BlockStorage)?,
                        project_id
                    ),
                    "quota_set",
                ),
                other => {
                    return Err(CloudError::InvalidConfig(format!(
                        "unknown quota section: {}",
                        other
                    )));
                }
            };
            let body = json!({ wrapper: limits });
            let result = self
                .call(kind, Method::PUT, &url, Some(body), Some(project_id))
                .await?;
            applied.insert(section, result.get(wrapper).cloned().unwrap_or(Value::Null));
        }
        Ok(Value::Object(applied))
    }
}

/// Best-effort extraction of the human readable part of an error body
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    if let Some(message) = value.get("NeutronError").and_then(|e| e.get("message")) {
        return message.as_str().unwrap_or_default().to_string();
    }
    if let Some(message) = value.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(Value::Object(map)) = value.as_object().and_then(|m| m.values().next()).cloned()
        && let Some(message) = map.get("message").and_then(Value::as_str)
    {
        return message.to_string();
    }
    body.trim().to_string()
}

/// Strip the `{singular: {...}}` envelope and fill missing ids
fn unwrap_record(kind: ResourceKind, body: Value) -> Value {
    let mut record = if kind.enveloped() {
        match body {
            Value::Object(mut map) => map.remove(kind.singular()).unwrap_or(Value::Object(map)),
            other => other,
        }
    } else {
        body
    };
    if kind == ResourceKind::Keypair
        && record.get("id").is_none()
        && let Some(name) = record.get("name").cloned()
    {
        record["id"] = name;
    }
    record
}

fn envelope(kind: ResourceKind, body: Value) -> Value {
    if kind.enveloped() {
        json!({ kind.singular(): body })
    } else {
        body
    }
}

fn json_patch(changes: Value) -> Value {
    let ops: Vec<Value> = match changes {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| json!({"op": "replace", "path": format!("/{}", key), "value": value}))
            .collect(),
        _ => Vec::new(),
    };
    Value::Array(ops)
}

#[async_trait]
impl CloudClient for OpenStackClient {
    async fn create(&self, target: Target<'_>, body: Value) -> Result<Value> {
        let url = self.collection_url(target)?;
        let response = self
            .call(target.kind, Method::POST, &url, Some(envelope(target.kind, body)), None)
            .await?;
        Ok(unwrap_record(target.kind, response))
    }

    async fn get(&self, target: Target<'_>, id: &str) -> Result<Value> {
        let url = self.resource_url(target, id)?;
        let response = self
            .call(target.kind, Method::GET, &url, None, Some(id))
            .await?;
        Ok(unwrap_record(target.kind, response))
    }

    async fn list(&self, target: Target<'_>, query: &ListQuery) -> Result<Vec<Value>> {
        let mut url = self.collection_url(target)?;
        if let Some(suffix) = target.kind.detail_suffix() {
            url = format!("{}/{}", url, suffix);
        }
        if !query.is_empty() {
            url = reqwest::Url::parse_with_params(&url, query.to_pairs())
                .map_err(|e| CloudError::InvalidConfig(format!("{}: {}", url, e)))?
                .to_string();
        }

        let response = self
            .call(target.kind, Method::GET, &url, None, None)
            .await?;
        let items = match response {
            Value::Object(mut map) => map.remove(target.kind.plural()).unwrap_or(Value::Null),
            other => other,
        };
        let Value::Array(items) = items else {
            return Ok(Vec::new());
        };

        // Keypair lists wrap every element in its own envelope
        Ok(items
            .into_iter()
            .map(|item| match target.kind {
                ResourceKind::Keypair => unwrap_record(target.kind, item),
                _ => item,
            })
            .collect())
    }

    async fn update(&self, target: Target<'_>, id: &str, body: Value) -> Result<Value> {
        let kind = target.kind;
        let url = self.resource_url(target, id)?;
        let response = match kind.service() {
            Service::Image => {
                self.execute(
                    kind.service(),
                    Method::PATCH,
                    &url,
                    Some(Body::JsonPatch(json_patch(body))),
                    kind,
                    Some(id),
                )
                .await?
            }
            Service::Identity | Service::Dns => {
                self.call(kind, Method::PATCH, &url, Some(envelope(kind, body)), Some(id))
                    .await?
            }
            _ => {
                self.call(kind, Method::PUT, &url, Some(envelope(kind, body)), Some(id))
                    .await?
            }
        };
        Ok(unwrap_record(kind, response))
    }

    async fn delete(&self, target: Target<'_>, id: &str) -> Result<()> {
        let url = self.resource_url(target, id)?;
        self.call(target.kind, Method::DELETE, &url, None, Some(id))
            .await?;
        Ok(())
    }

    async fn action(&self, target: Target<'_>, id: &str, action: Action) -> Result<Value> {
        let kind = target.kind;
        match (kind, action) {
            (ResourceKind::Server, Action::Start) => self.server_action(id, json!({"os-start": null})).await,
            (ResourceKind::Server, Action::Stop) => self.server_action(id, json!({"os-stop": null})).await,
            (ResourceKind::Server, Action::Reboot { hard }) => {
                let kind = if hard { "HARD" } else { "SOFT" };
                self.server_action(id, json!({"reboot": {"type": kind}})).await
            }
            (ResourceKind::Server, Action::Suspend) => self.server_action(id, json!({"suspend": null})).await,
            (ResourceKind::Server, Action::Resume) => self.server_action(id, json!({"resume": null})).await,
            (ResourceKind::Server, Action::Rebuild { image_id }) => {
                self.server_action(id, json!({"rebuild": {"imageRef": image_id}}))
                    .await
            }
            (ResourceKind::Server, Action::CreateImage { name, metadata }) => {
                self.server_action(id, json!({"createImage": {"name": name, "metadata": metadata}}))
                    .await
            }
            (
                ResourceKind::Server,
                Action::CreateBackup {
                    name,
                    backup_type,
                    rotation,
                },
            ) => {
                self.server_action(
                    id,
                    json!({"createBackup": {"name": name, "backup_type": backup_type, "rotation": rotation}}),
                )
                .await
            }
            (ResourceKind::Server, Action::AddSecurityGroup { name }) => {
                self.server_action(id, json!({"addSecurityGroup": {"name": name}}))
                    .await
            }
            (ResourceKind::Server, Action::RemoveSecurityGroup { name }) => {
                self.server_action(id, json!({"removeSecurityGroup": {"name": name}}))
                    .await
            }
            (
                ResourceKind::Server,
                Action::AddFloatingIp {
                    address,
                    fixed_address,
                },
            ) => {
                let fip = self.floating_ip_by_address(&address).await?;
                let ports = self
                    .list(
                        Target::of(ResourceKind::Port),
                        &ListQuery::new().with("device_id", id),
                    )
                    .await?;
                let port = ports
                    .iter()
                    .find(|port| match &fixed_address {
                        Some(fixed) => port
                            .get("fixed_ips")
                            .and_then(Value::as_array)
                            .is_some_and(|ips| {
                                ips.iter().any(|ip| {
                                    ip.get("ip_address").and_then(Value::as_str)
                                        == Some(fixed.as_str())
                                })
                            }),
                        None => true,
                    })
                    .ok_or_else(|| CloudError::not_found("port", format!("device_id={}", id)))?;
                let port_id = port.get("id").and_then(Value::as_str).map(str::to_string);
                self.set_floating_ip_port(&fip, port_id, fixed_address).await
            }
            (ResourceKind::Server, Action::RemoveFloatingIp { address }) => {
                let fip = self.floating_ip_by_address(&address).await?;
                self.set_floating_ip_port(&fip, None, None).await
            }
            (ResourceKind::Server, Action::ListInterfaces) => {
                let url = self.server_sub(id, "os-interface")?;
                let body = self.call(kind, Method::GET, &url, None, Some(id)).await?;
                Ok(body.get("interfaceAttachments").cloned().unwrap_or(json!([])))
            }
            (ResourceKind::Server, Action::AttachInterface { port_id, net_id }) => {
                let url = self.server_sub(id, "os-interface")?;
                let mut attachment = Map::new();
                if let Some(port_id) = port_id {
                    attachment.insert("port_id".into(), json!(port_id));
                }
                if let Some(net_id) = net_id {
                    attachment.insert("net_id".into(), json!(net_id));
                }
                let body = self
                    .call(
                        kind,
                        Method::POST,
                        &url,
                        Some(json!({"interfaceAttachment": attachment})),
                        Some(id),
                    )
                    .await?;
                Ok(body.get("interfaceAttachment").cloned().unwrap_or(Value::Null))
            }
            (ResourceKind::Server, Action::DetachInterface { port_id }) => {
                let url = self.server_sub(id, &format!("os-interface/{}", port_id))?;
                self.call(kind, Method::DELETE, &url, None, Some(port_id.as_str()))
                    .await
            }
            (ResourceKind::Server, Action::ListVolumeAttachments) => {
                let url = self.server_sub(id, "os-volume_attachments")?;
                let body = self.call(kind, Method::GET, &url, None, Some(id)).await?;
                Ok(body.get("volumeAttachments").cloned().unwrap_or(json!([])))
            }
            (ResourceKind::Server, Action::AttachVolume { volume_id, device }) => {
                let url = self.server_sub(id, "os-volume_attachments")?;
                let mut attachment = json!({"volumeId": volume_id});
                if let Some(device) = device {
                    attachment["device"] = json!(device);
                }
                let body = self
                    .call(
                        kind,
                        Method::POST,
                        &url,
                        Some(json!({"volumeAttachment": attachment})),
                        Some(id),
                    )
                    .await?;
                Ok(body.get("volumeAttachment").cloned().unwrap_or(Value::Null))
            }
            (ResourceKind::Server, Action::DetachVolume { volume_id }) => {
                let url = self.server_sub(id, &format!("os-volume_attachments/{}", volume_id))?;
                self.call(kind, Method::DELETE, &url, None, Some(volume_id.as_str()))
                    .await
            }
            (ResourceKind::Server, Action::GetPassword) => {
                let url = self.server_sub(id, "os-server-password")?;
                self.call(kind, Method::GET, &url, None, Some(id)).await
            }
            (ResourceKind::Router, Action::AddRouterInterface { subnet_id, port_id }) => {
                let url = format!("{}/add_router_interface", self.resource_url(target, id)?);
                let body = json!({"subnet_id": subnet_id, "port_id": port_id});
                self.call(kind, Method::PUT, &url, Some(strip_nulls(body)), Some(id))
                    .await
            }
            (ResourceKind::Router, Action::RemoveRouterInterface { subnet_id, port_id }) => {
                let url = format!("{}/remove_router_interface", self.resource_url(target, id)?);
                let body = json!({"subnet_id": subnet_id, "port_id": port_id});
                self.call(kind, Method::PUT, &url, Some(strip_nulls(body)), Some(id))
                    .await
            }
            (ResourceKind::HostAggregate, action @ (Action::SetMetadata { .. }
            | Action::AddHost { .. }
            | Action::RemoveHost { .. })) => {
                let url = format!("{}/action", self.resource_url(target, id)?);
                let body = match action {
                    Action::SetMetadata { metadata } => json!({"set_metadata": {"metadata": metadata}}),
                    Action::AddHost { host } => json!({"add_host": {"host": host}}),
                    Action::RemoveHost { host } => json!({"remove_host": {"host": host}}),
                    _ => Value::Null,
                };
                let response = self.call(kind, Method::POST, &url, Some(body), Some(id)).await?;
                Ok(unwrap_record(kind, response))
            }
            (ResourceKind::VolumeBackup, Action::RestoreBackup { volume_id, name }) => {
                let url = format!("{}/restore", self.resource_url(target, id)?);
                let body = json!({"restore": strip_nulls(json!({"volume_id": volume_id, "name": name}))});
                let response = self.call(kind, Method::POST, &url, Some(body), Some(id)).await?;
                Ok(response.get("restore").cloned().unwrap_or(response))
            }
            (
                ResourceKind::Project,
                Action::AssignRole {
                    user_id,
                    group_id,
                    role_id,
                },
            ) => {
                let project = self.resource_url(target, id)?;
                let url = match (user_id, group_id) {
                    (Some(user), _) => format!("{}/users/{}/roles/{}", project, user, role_id),
                    (None, Some(group)) => format!("{}/groups/{}/roles/{}", project, group, role_id),
                    (None, None) => {
                        return Err(CloudError::InvalidConfig(
                            "role assignment needs a user or a group".into(),
                        ));
                    }
                };
                self.call(kind, Method::PUT, &url, None, Some(id)).await
            }
            (ResourceKind::Group, Action::AddUserToGroup { user_id }) => {
                let url = format!("{}/users/{}", self.resource_url(target, id)?, user_id);
                self.call(kind, Method::PUT, &url, None, Some(id)).await
            }
            (ResourceKind::Project, Action::SetQuota { quota }) => {
                self.update_quota(id, quota).await
            }
            (ResourceKind::Flavor, Action::SetExtraSpecs { specs }) => {
                let url = format!("{}/os-extra_specs", self.resource_url(target, id)?);
                let body = self
                    .call(kind, Method::POST, &url, Some(json!({"extra_specs": specs})), Some(id))
                    .await?;
                Ok(body.get("extra_specs").cloned().unwrap_or(Value::Null))
            }
            (ResourceKind::VolumeType, Action::SetExtraSpecs { specs }) => {
                let url = format!("{}/extra_specs", self.resource_url(target, id)?);
                let body = self
                    .call(kind, Method::POST, &url, Some(json!({"extra_specs": specs})), Some(id))
                    .await?;
                Ok(body.get("extra_specs").cloned().unwrap_or(Value::Null))
            }
            (
                ResourceKind::FileShare,
                Action::AllowAccess {
                    access_type,
                    access_to,
                    access_level,
                },
            ) => {
                let url = format!("{}/action", self.resource_url(target, id)?);
                let body = json!({"allow_access": {
                    "access_type": access_type,
                    "access_to": access_to,
                    "access_level": access_level,
                }});
                let response = self.call(kind, Method::POST, &url, Some(body), Some(id)).await?;
                Ok(response.get("access").cloned().unwrap_or(response))
            }
            (ResourceKind::FileShare, Action::DenyAccess { access_id }) => {
                let url = format!("{}/action", self.resource_url(target, id)?);
                let body = json!({"deny_access": {"access_id": access_id}});
                self.call(kind, Method::POST, &url, Some(body), Some(id)).await
            }
            (kind, action) => Err(CloudError::UnsupportedAction {
                kind: kind.resource_type().to_string(),
                action: action.name().to_string(),
            }),
        }
    }

    async fn quota(&self, kind: ResourceKind, project_id: &str) -> Result<i64> {
        let Some(key) = kind.quota_key() else {
            return Ok(-1);
        };
        let quotas = self.quota_set(kind.service(), project_id).await?;
        Ok(quotas.get(key).and_then(quota_limit).unwrap_or(-1))
    }

    async fn project_id(&self) -> Result<String> {
        Ok(self.session.project_id.clone())
    }
}

/// Quota values are either plain numbers or `{"limit": n, ...}` detail maps
fn quota_limit(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.get("limit").and_then(Value::as_i64))
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => other,
    }
}
