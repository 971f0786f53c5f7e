//! Node, relationship and operation names understood by the plugin

use stackflow_cloud::ResourceKind;

pub const NODE_PREFIX: &str = "cloudify.nodes.openstack.";
pub const RELATIONSHIP_PREFIX: &str = "cloudify.relationships.openstack.";

pub const WINDOWS_SERVER: &str = "cloudify.nodes.openstack.WindowsServer";

pub mod relationships {
    pub const CONNECTED_TO: &str = "cloudify.relationships.connected_to";
    pub const DEPENDS_ON: &str = "cloudify.relationships.depends_on";
    pub const VOLUME_ATTACHED_TO_SERVER: &str =
        "cloudify.relationships.openstack.volume_attached_to_server";
    pub const SERVER_CONNECTED_TO_FLOATING_IP: &str =
        "cloudify.relationships.openstack.server_connected_to_floating_ip";
    pub const SERVER_CONNECTED_TO_SECURITY_GROUP: &str =
        "cloudify.relationships.openstack.server_connected_to_security_group";
    pub const SUBNET_CONNECTED_TO_ROUTER: &str =
        "cloudify.relationships.openstack.subnet_connected_to_router";
    pub const RBAC_POLICY_APPLIED_TO: &str =
        "cloudify.relationships.openstack.rbac_policy_applied_to";
    pub const SHARE_CONNECTED_TO_NETWORK_SHARE: &str =
        "cloudify.relationships.openstack.share_connected_to_network_share";
    pub const NETWORK_SHARE_CONNECTED_TO_NETWORK: &str =
        "cloudify.relationships.openstack.network_share_connected_to_network";
    pub const NETWORK_SHARE_CONNECTED_TO_SUBNET: &str =
        "cloudify.relationships.openstack.network_share_connected_to_subnet";
    pub const ROUTER_CONNECTED_TO_EXTERNAL_NETWORK: &str =
        "cloudify.relationships.openstack.router_connected_to_external_network";
    pub const PAIRED_WITH: &str = "cloudify.relationships.openstack.paired_with";
}

pub mod operations {
    pub const CREATE: &str = "cloudify.interfaces.lifecycle.create";
    pub const CONFIGURE: &str = "cloudify.interfaces.lifecycle.configure";
    pub const START: &str = "cloudify.interfaces.lifecycle.start";
    pub const STOP: &str = "cloudify.interfaces.lifecycle.stop";
    pub const DELETE: &str = "cloudify.interfaces.lifecycle.delete";

    pub const UPDATE: &str = "cloudify.interfaces.operations.update";
    pub const UPDATE_PROJECT_QUOTA: &str = "cloudify.interfaces.operations.update_project_quota";
    pub const LIST: &str = "cloudify.interfaces.operations.list";
    pub const REBOOT: &str = "cloudify.interfaces.operations.reboot";
    pub const SUSPEND: &str = "cloudify.interfaces.operations.suspend";
    pub const RESUME: &str = "cloudify.interfaces.operations.resume";
    pub const ADD_HOSTS: &str = "cloudify.interfaces.operations.add_hosts";
    pub const REMOVE_HOSTS: &str = "cloudify.interfaces.operations.remove_hosts";
    pub const FIND_AND_DELETE: &str = "cloudify.interfaces.operations.find_and_delete";

    pub const CREATION: &str = "cloudify.interfaces.validation.creation";

    pub const SNAPSHOT_CREATE: &str = "cloudify.interfaces.snapshot.create";
    pub const SNAPSHOT_APPLY: &str = "cloudify.interfaces.snapshot.apply";
    pub const SNAPSHOT_DELETE: &str = "cloudify.interfaces.snapshot.delete";

    pub const PRECONFIGURE: &str = "cloudify.interfaces.relationship_lifecycle.preconfigure";
    pub const POSTCONFIGURE: &str = "cloudify.interfaces.relationship_lifecycle.postconfigure";
    pub const ESTABLISH: &str = "cloudify.interfaces.relationship_lifecycle.establish";
    pub const UNLINK: &str = "cloudify.interfaces.relationship_lifecycle.unlink";

    pub const PAIRING_ASSIGN: &str = "cloudify.interfaces.pairing.assign";
    pub const PAIRING_RELEASE: &str = "cloudify.interfaces.pairing.release";

    pub const NODE_OPERATIONS: &[&str] = &[
        CREATE,
        CONFIGURE,
        START,
        STOP,
        DELETE,
        UPDATE,
        UPDATE_PROJECT_QUOTA,
        LIST,
        REBOOT,
        SUSPEND,
        RESUME,
        ADD_HOSTS,
        REMOVE_HOSTS,
        FIND_AND_DELETE,
        CREATION,
        SNAPSHOT_CREATE,
        SNAPSHOT_APPLY,
        SNAPSHOT_DELETE,
    ];

    pub const RELATIONSHIP_OPERATIONS: &[&str] = &[PRECONFIGURE, POSTCONFIGURE, ESTABLISH, UNLINK];
}

/// Node type for a kind, for kinds that can be declared as nodes
pub fn node_type(kind: ResourceKind) -> Option<&'static str> {
    use ResourceKind::*;
    let name = match kind {
        Server => "cloudify.nodes.openstack.Server",
        ServerGroup => "cloudify.nodes.openstack.ServerGroup",
        HostAggregate => "cloudify.nodes.openstack.HostAggregate",
        Image => "cloudify.nodes.openstack.Image",
        Flavor => "cloudify.nodes.openstack.Flavor",
        Keypair => "cloudify.nodes.openstack.KeyPair",
        Project => "cloudify.nodes.openstack.Project",
        User => "cloudify.nodes.openstack.User",
        Group => "cloudify.nodes.openstack.Group",
        Role => "cloudify.nodes.openstack.Role",
        Network => "cloudify.nodes.openstack.Network",
        Subnet => "cloudify.nodes.openstack.Subnet",
        Router => "cloudify.nodes.openstack.Router",
        Port => "cloudify.nodes.openstack.Port",
        FloatingIp => "cloudify.nodes.openstack.FloatingIP",
        SecurityGroup => "cloudify.nodes.openstack.SecurityGroup",
        SecurityGroupRule => "cloudify.nodes.openstack.SecurityGroupRule",
        RbacPolicy => "cloudify.nodes.openstack.RBACPolicy",
        Volume => "cloudify.nodes.openstack.Volume",
        VolumeType => "cloudify.nodes.openstack.VolumeType",
        DnsZone => "cloudify.nodes.openstack.DNSZone",
        DnsRecordset => "cloudify.nodes.openstack.DNSRecordSet",
        FileShare => "cloudify.nodes.openstack.SharedFileSystem",
        ShareNetwork => "cloudify.nodes.openstack.ShareNetwork",
        VolumeBackup | VolumeSnapshot => return None,
    };
    Some(name)
}

/// Kind declared by a node type name
pub fn kind_for_node_type(type_name: &str) -> Option<ResourceKind> {
    if type_name == WINDOWS_SERVER {
        return Some(ResourceKind::Server);
    }
    ResourceKind::ALL
        .into_iter()
        .find(|kind| node_type(*kind) == Some(type_name))
}

/// Last dotted segment of an operation name (`create`, `establish`, ...)
pub fn verb(operation: &str) -> &str {
    operation.rsplit('.').next().unwrap_or(operation)
}
