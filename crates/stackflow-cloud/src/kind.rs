//! Resource kinds and their static metadata
//!
//! Every cloud resource the plugin manages is one of the variants of
//! [`ResourceKind`]. The kind is the tag the dispatcher uses to pick the
//! service, the REST collection, the JSON envelope and the quota key.

use serde::{Deserialize, Serialize};

/// OpenStack service owning a resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Compute,
    Image,
    Identity,
    Network,
    BlockStorage,
    Dns,
    SharedFileSystem,
}

impl Service {
    /// Service catalog types, most preferred first
    pub fn catalog_types(self) -> &'static [&'static str] {
        match self {
            Service::Compute => &["compute"],
            Service::Image => &["image"],
            Service::Identity => &["identity"],
            Service::Network => &["network"],
            Service::BlockStorage => &["block-storage", "volumev3", "volumev2"],
            Service::Dns => &["dns"],
            Service::SharedFileSystem => &["shared-file-system", "sharev2"],
        }
    }

    /// Name used for log targets (`openstack.<name>`)
    pub fn log_name(self) -> &'static str {
        match self {
            Service::Compute => "compute",
            Service::Image => "image",
            Service::Identity => "identity",
            Service::Network => "network",
            Service::BlockStorage => "block_storage",
            Service::Dns => "dns",
            Service::SharedFileSystem => "shared_file_system",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.log_name())
    }
}

/// Closed set of resource kinds managed by the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Server,
    ServerGroup,
    HostAggregate,
    Image,
    Flavor,
    Keypair,
    Project,
    User,
    Group,
    Role,
    Network,
    Subnet,
    Router,
    Port,
    FloatingIp,
    SecurityGroup,
    SecurityGroupRule,
    RbacPolicy,
    Volume,
    VolumeType,
    VolumeBackup,
    VolumeSnapshot,
    DnsZone,
    DnsRecordset,
    FileShare,
    ShareNetwork,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 26] = [
        ResourceKind::Server,
        ResourceKind::ServerGroup,
        ResourceKind::HostAggregate,
        ResourceKind::Image,
        ResourceKind::Flavor,
        ResourceKind::Keypair,
        ResourceKind::Project,
        ResourceKind::User,
        ResourceKind::Group,
        ResourceKind::Role,
        ResourceKind::Network,
        ResourceKind::Subnet,
        ResourceKind::Router,
        ResourceKind::Port,
        ResourceKind::FloatingIp,
        ResourceKind::SecurityGroup,
        ResourceKind::SecurityGroupRule,
        ResourceKind::RbacPolicy,
        ResourceKind::Volume,
        ResourceKind::VolumeType,
        ResourceKind::VolumeBackup,
        ResourceKind::VolumeSnapshot,
        ResourceKind::DnsZone,
        ResourceKind::DnsRecordset,
        ResourceKind::FileShare,
        ResourceKind::ShareNetwork,
    ];

    pub fn service(self) -> Service {
        use ResourceKind::*;
        match self {
            Server | ServerGroup | HostAggregate | Flavor | Keypair => Service::Compute,
            Image => Service::Image,
            Project | User | Group | Role => Service::Identity,
            Network | Subnet | Router | Port | FloatingIp | SecurityGroup | SecurityGroupRule
            | RbacPolicy => Service::Network,
            Volume | VolumeType | VolumeBackup | VolumeSnapshot => Service::BlockStorage,
            DnsZone | DnsRecordset => Service::Dns,
            FileShare | ShareNetwork => Service::SharedFileSystem,
        }
    }

    /// Value written to the `type` runtime property
    pub fn resource_type(self) -> &'static str {
        use ResourceKind::*;
        match self {
            Server => "server",
            ServerGroup => "server_group",
            HostAggregate => "aggregate",
            Image => "image",
            Flavor => "flavor",
            Keypair => "key_pair",
            Project => "project",
            User => "user",
            Group => "group",
            Role => "role",
            Network => "network",
            Subnet => "subnet",
            Router => "router",
            Port => "port",
            FloatingIp => "floating_ip",
            SecurityGroup => "security_group",
            SecurityGroupRule => "security_group_rule",
            RbacPolicy => "rbac_policy",
            Volume => "volume",
            VolumeType => "volume_type",
            VolumeBackup => "backup",
            VolumeSnapshot => "snapshot",
            DnsZone => "zone",
            DnsRecordset => "recordset",
            FileShare => "share",
            ShareNetwork => "share_network",
        }
    }

    /// JSON key wrapping a single resource in request/response bodies
    pub fn singular(self) -> &'static str {
        use ResourceKind::*;
        match self {
            Keypair => "keypair",
            FloatingIp => "floatingip",
            HostAggregate => "aggregate",
            VolumeBackup => "backup",
            VolumeSnapshot => "snapshot",
            DnsZone => "zone",
            DnsRecordset => "recordset",
            FileShare => "share",
            other => other.resource_type(),
        }
    }

    /// JSON key wrapping a collection in list responses
    pub fn plural(self) -> &'static str {
        use ResourceKind::*;
        match self {
            Server => "servers",
            ServerGroup => "server_groups",
            HostAggregate => "aggregates",
            Image => "images",
            Flavor => "flavors",
            Keypair => "keypairs",
            Project => "projects",
            User => "users",
            Group => "groups",
            Role => "roles",
            Network => "networks",
            Subnet => "subnets",
            Router => "routers",
            Port => "ports",
            FloatingIp => "floatingips",
            SecurityGroup => "security_groups",
            SecurityGroupRule => "security_group_rules",
            RbacPolicy => "rbac_policies",
            Volume => "volumes",
            VolumeType => "volume_types",
            VolumeBackup => "backups",
            VolumeSnapshot => "snapshots",
            DnsZone => "zones",
            DnsRecordset => "recordsets",
            FileShare => "shares",
            ShareNetwork => "share_networks",
        }
    }

    /// REST collection path relative to the service endpoint
    ///
    /// Recordsets live below their zone; the `{parent}` placeholder is filled
    /// with the zone id by the client.
    pub fn path(self) -> &'static str {
        use ResourceKind::*;
        match self {
            Server => "servers",
            ServerGroup => "os-server-groups",
            HostAggregate => "os-aggregates",
            Image => "v2/images",
            Flavor => "flavors",
            Keypair => "os-keypairs",
            Project => "projects",
            User => "users",
            Group => "groups",
            Role => "roles",
            Network => "v2.0/networks",
            Subnet => "v2.0/subnets",
            Router => "v2.0/routers",
            Port => "v2.0/ports",
            FloatingIp => "v2.0/floatingips",
            SecurityGroup => "v2.0/security-groups",
            SecurityGroupRule => "v2.0/security-group-rules",
            RbacPolicy => "v2.0/rbac-policies",
            Volume => "volumes",
            VolumeType => "types",
            VolumeBackup => "backups",
            VolumeSnapshot => "snapshots",
            DnsZone => "v2/zones",
            DnsRecordset => "v2/zones/{parent}/recordsets",
            FileShare => "shares",
            ShareNetwork => "share-networks",
        }
    }

    /// Suffix appended to the collection path to list full records
    pub fn detail_suffix(self) -> Option<&'static str> {
        use ResourceKind::*;
        match self {
            Server | Flavor | Volume | VolumeBackup | VolumeSnapshot | FileShare
            | ShareNetwork => Some("detail"),
            _ => None,
        }
    }

    /// Whether request and response bodies wrap the resource in a
    /// `{singular: {...}}` envelope
    pub fn enveloped(self) -> bool {
        !matches!(
            self,
            ResourceKind::Image | ResourceKind::DnsZone | ResourceKind::DnsRecordset
        )
    }

    /// Whether the kind carries a user-visible name
    pub fn accepts_name(self) -> bool {
        !matches!(
            self,
            ResourceKind::SecurityGroupRule | ResourceKind::FloatingIp | ResourceKind::RbacPolicy
        )
    }

    /// Whether the kind needs a parent resource id to be addressed
    pub fn requires_parent(self) -> bool {
        matches!(self, ResourceKind::DnsRecordset)
    }

    /// Key of the project quota limiting this kind, if any
    pub fn quota_key(self) -> Option<&'static str> {
        use ResourceKind::*;
        match self {
            Server => Some("instances"),
            ServerGroup => Some("server_groups"),
            Keypair => Some("key_pairs"),
            Network => Some("network"),
            Subnet => Some("subnet"),
            Router => Some("router"),
            Port => Some("port"),
            FloatingIp => Some("floatingip"),
            SecurityGroup => Some("security_group"),
            SecurityGroupRule => Some("security_group_rule"),
            RbacPolicy => Some("rbac_policy"),
            Volume => Some("volumes"),
            VolumeBackup => Some("backups"),
            VolumeSnapshot => Some("snapshots"),
            DnsZone => Some("zones"),
            DnsRecordset => Some("zone_recordsets"),
            FileShare => Some("shares"),
            ShareNetwork => Some("share_networks"),
            HostAggregate | Image | Flavor | Project | User | Group | Role | VolumeType => None,
        }
    }

    /// Field carrying the owning project in list filters
    pub fn project_filter(self) -> &'static str {
        match self.service() {
            Service::Compute => "tenant_id",
            Service::Image => "owner",
            _ => "project_id",
        }
    }

    pub fn from_resource_type(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.resource_type() == value)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.resource_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_resource_type(kind.resource_type()), Some(kind));
        }
    }

    #[test]
    fn test_keypair_metadata() {
        let kind = ResourceKind::Keypair;
        assert_eq!(kind.resource_type(), "key_pair");
        assert_eq!(kind.singular(), "keypair");
        assert_eq!(kind.service(), Service::Compute);
        assert!(kind.enveloped());
    }

    #[test]
    fn test_unnamed_kinds() {
        assert!(!ResourceKind::FloatingIp.accepts_name());
        assert!(!ResourceKind::SecurityGroupRule.accepts_name());
        assert!(ResourceKind::Port.accepts_name());
    }

    #[test]
    fn test_recordset_needs_zone() {
        assert!(ResourceKind::DnsRecordset.requires_parent());
        assert!(ResourceKind::DnsRecordset.path().contains("{parent}"));
    }
}
