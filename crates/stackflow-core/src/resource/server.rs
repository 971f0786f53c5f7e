use super::{Resource, record_str};
use crate::error::Result;
use serde_json::{Map, Value};
use stackflow_cloud::{Action, ResourceKind};

/// Server-only calls
#[derive(Clone, Copy)]
pub struct ServerApi<'a> {
    resource: &'a Resource,
}

impl<'a> ServerApi<'a> {
    pub(super) fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    pub async fn start(&self) -> Result<()> {
        self.resource.action(Action::Start).await.map(drop)
    }

    pub async fn stop(&self) -> Result<()> {
        self.resource.action(Action::Stop).await.map(drop)
    }

    pub async fn reboot(&self, hard: bool) -> Result<()> {
        self.resource.action(Action::Reboot { hard }).await.map(drop)
    }

    pub async fn suspend(&self) -> Result<()> {
        self.resource.action(Action::Suspend).await.map(drop)
    }

    pub async fn resume(&self) -> Result<()> {
        self.resource.action(Action::Resume).await.map(drop)
    }

    pub async fn rebuild(&self, image_id: &str) -> Result<()> {
        self.resource
            .action(Action::Rebuild {
                image_id: image_id.to_string(),
            })
            .await
            .map(drop)
    }

    /// Snapshot into a new image, returning the image id when reported
    pub async fn create_image(&self, name: &str, metadata: Map<String, Value>) -> Result<Option<String>> {
        let reply = self
            .resource
            .action(Action::CreateImage {
                name: name.to_string(),
                metadata,
            })
            .await?;
        Ok(record_str(&reply, "image_id").map(str::to_string))
    }

    pub async fn backup(&self, name: &str, backup_type: &str, rotation: u32) -> Result<Option<String>> {
        let reply = self
            .resource
            .action(Action::CreateBackup {
                name: name.to_string(),
                backup_type: backup_type.to_string(),
                rotation,
            })
            .await?;
        Ok(record_str(&reply, "image_id").map(str::to_string))
    }

    pub async fn interfaces(&self) -> Result<Vec<Value>> {
        let reply = self.resource.action(Action::ListInterfaces).await?;
        Ok(match reply {
            Value::Array(items) => items,
            _ => Vec::new(),
        })
    }

    /// Attach a port or a network, returning the interface (port) id
    pub async fn attach_interface(&self, port_id: Option<&str>, net_id: Option<&str>) -> Result<Option<String>> {
        let reply = self
            .resource
            .action(Action::AttachInterface {
                port_id: port_id.map(str::to_string),
                net_id: net_id.map(str::to_string),
            })
            .await?;
        Ok(record_str(&reply, "port_id")
            .or(port_id)
            .map(str::to_string))
    }

    pub async fn detach_interface(&self, port_id: &str) -> Result<()> {
        self.resource
            .action(Action::DetachInterface {
                port_id: port_id.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn add_security_group(&self, name: &str) -> Result<()> {
        self.resource
            .action(Action::AddSecurityGroup {
                name: name.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn remove_security_group(&self, name: &str) -> Result<()> {
        self.resource
            .action(Action::RemoveSecurityGroup {
                name: name.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn add_floating_ip(&self, address: &str, fixed_address: Option<&str>) -> Result<()> {
        self.resource
            .action(Action::AddFloatingIp {
                address: address.to_string(),
                fixed_address: fixed_address.map(str::to_string),
            })
            .await
            .map(drop)
    }

    pub async fn remove_floating_ip(&self, address: &str) -> Result<()> {
        self.resource
            .action(Action::RemoveFloatingIp {
                address: address.to_string(),
            })
            .await
            .map(drop)
    }

    pub async fn volume_attachments(&self) -> Result<Vec<Value>> {
        let reply = self.resource.action(Action::ListVolumeAttachments).await?;
        Ok(match reply {
            Value::Array(items) => items,
            _ => Vec::new(),
        })
    }

    /// Attach a volume, returning the attachment record
    pub async fn attach_volume(&self, volume_id: &str, device: Option<&str>) -> Result<Value> {
        self.resource
            .action(Action::AttachVolume {
                volume_id: volume_id.to_string(),
                device: device.map(str::to_string),
            })
            .await
    }

    pub async fn detach_volume(&self, volume_id: &str) -> Result<()> {
        self.resource
            .action(Action::DetachVolume {
                volume_id: volume_id.to_string(),
            })
            .await
            .map(drop)
    }

    /// Decrypted admin password, if the server has one
    pub async fn password(&self) -> Result<Option<String>> {
        let reply = self.resource.action(Action::GetPassword).await?;
        Ok(record_str(&reply, "password").map(str::to_string))
    }

    /// Ports bound to this server
    pub async fn ports(&self) -> Result<Vec<Value>> {
        let id = self.resource.require_id()?;
        let ports = self.resource.sibling(ResourceKind::Port, None);
        ports
            .list(&stackflow_cloud::ListQuery::new().with("device_id", id))
            .await
    }
}
