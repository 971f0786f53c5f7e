//! Operation registry
//!
//! Maps `(node type, operation)` and `(relationship type, side, operation)`
//! to operation bodies. [`Plugin::invoke`] is the single entry point the
//! host (or the `stackflow` binary) calls.

use crate::context::{Entity, NodeInfo, OperationContext, RelationshipContext, Side};
use crate::dispatch::{Handler, OperationSpec, handler, run_operation};
use crate::error::{OperationError, Result};
use crate::operations::common::{self, string_list};
use crate::operations::{compute, dns, identity, network, server, share, volume};
use crate::pairing::{CANDIDATES, PAIRED_INSTANCE_ID, PairingDb};
use crate::types::{kind_for_node_type, node_type, operations as op, relationships as rel};
use serde_json::{Map, Value};
use stackflow_cloud::{ClientFactory, LoggingConfig, ResourceKind, bridge_dispatch};
use std::sync::{Arc, LazyLock};
use tracing::instrument::WithSubscriber;

#[derive(Clone, Copy)]
pub struct NodeRoute {
    pub kind: ResourceKind,
    pub operation: &'static str,
    pub handler: Handler,
}

#[derive(Clone, Copy)]
pub struct RelationshipRoute {
    pub relationship: &'static str,
    pub side: Side,
    pub operation: &'static str,
    /// Kind of the endpoint on `side`
    pub kind: ResourceKind,
    pub handler: Handler,
    pub external_check: Option<Handler>,
}

static NODE_ROUTES: LazyLock<Vec<NodeRoute>> = LazyLock::new(build_node_routes);
static RELATIONSHIP_ROUTES: LazyLock<Vec<RelationshipRoute>> =
    LazyLock::new(build_relationship_routes);

fn build_node_routes() -> Vec<NodeRoute> {
    use ResourceKind::*;

    let mut routes = Vec::new();
    let mut add = |kinds: &[ResourceKind], operation: &'static str, handler: Handler| {
        for &kind in kinds {
            routes.push(NodeRoute {
                kind,
                operation,
                handler,
            });
        }
    };

    let listable = [
        Server, ServerGroup, HostAggregate, Image, Flavor, Keypair, Project, User, Group, Role,
        Network, Subnet, Router, Port, FloatingIp, SecurityGroup, SecurityGroupRule, RbacPolicy,
        Volume, DnsZone, DnsRecordset, FileShare, ShareNetwork,
    ];
    let updatable = [
        Server, Image, Project, User, Group, Role, Network, Subnet, Router, Port, FloatingIp,
        SecurityGroup, Volume, VolumeType, DnsZone, DnsRecordset,
    ];
    let plain_create = [
        ServerGroup, Image, Project, User, Group, Role, Network, DnsZone,
    ];
    let plain_delete = [
        ServerGroup, Image, Flavor, Keypair, Project, User, Group, Role, Network, Subnet, Router,
        Port, FloatingIp, SecurityGroup, SecurityGroupRule, RbacPolicy, VolumeType, DnsZone,
        DnsRecordset, ShareNetwork,
    ];

    add(&plain_create, op::CREATE, handler!(common::create));
    add(&plain_delete, op::DELETE, handler!(common::delete));
    add(&updatable, op::UPDATE, handler!(common::update));
    add(&listable, op::LIST, handler!(common::list));
    add(&ResourceKind::ALL, op::CREATION, handler!(common::creation));
    add(
        &[Flavor, HostAggregate, ServerGroup],
        op::UPDATE,
        handler!(common::unsupported_update),
    );

    add(&[Server], op::CREATE, handler!(server::create));
    add(&[Server], op::CONFIGURE, handler!(server::configure));
    add(&[Server], op::START, handler!(server::start));
    add(&[Server], op::STOP, handler!(server::stop));
    add(&[Server], op::DELETE, handler!(server::delete));
    add(&[Server], op::REBOOT, handler!(server::reboot));
    add(&[Server], op::SUSPEND, handler!(server::suspend));
    add(&[Server], op::RESUME, handler!(server::resume));
    add(&[Server], op::SNAPSHOT_CREATE, handler!(server::snapshot_create));
    add(&[Server], op::SNAPSHOT_APPLY, handler!(server::snapshot_apply));
    add(&[Server], op::SNAPSHOT_DELETE, handler!(server::snapshot_delete));

    add(&[HostAggregate], op::CREATE, handler!(compute::create_aggregate));
    add(&[HostAggregate], op::DELETE, handler!(compute::delete_aggregate));
    add(&[HostAggregate], op::ADD_HOSTS, handler!(compute::add_hosts));
    add(&[HostAggregate], op::REMOVE_HOSTS, handler!(compute::remove_hosts));
    add(&[Image], op::START, handler!(compute::start_image));
    add(&[Keypair], op::CREATE, handler!(compute::create_keypair));
    add(&[Flavor, VolumeType], op::CREATE, handler!(common::create_with_extra_specs));

    add(&[Project], op::START, handler!(identity::start_project));
    add(
        &[Project],
        op::UPDATE_PROJECT_QUOTA,
        handler!(common::unsupported_update),
    );

    add(&[Subnet], op::CREATE, handler!(network::create_subnet));
    add(&[Port], op::CREATE, handler!(network::create_port));
    add(&[Router], op::CREATE, handler!(network::create_router));
    add(&[Router], op::START, handler!(network::start_router));
    add(&[Router], op::STOP, handler!(network::stop_router));
    add(&[FloatingIp], op::CREATE, handler!(network::create_floating_ip));
    add(&[SecurityGroup], op::CREATE, handler!(network::create_security_group));
    add(
        &[SecurityGroupRule],
        op::CREATE,
        handler!(network::create_security_group_rule),
    );
    add(&[RbacPolicy], op::CREATE, handler!(network::create_rbac_policy));
    add(
        &[RbacPolicy],
        op::FIND_AND_DELETE,
        handler!(network::find_and_delete_rbac_policy),
    );

    add(&[Volume], op::CREATE, handler!(volume::create));
    add(&[Volume], op::START, handler!(volume::start));
    add(&[Volume], op::DELETE, handler!(volume::delete));
    add(&[Volume], op::SNAPSHOT_CREATE, handler!(volume::snapshot_create));
    add(&[Volume], op::SNAPSHOT_APPLY, handler!(volume::snapshot_apply));
    add(&[Volume], op::SNAPSHOT_DELETE, handler!(volume::snapshot_delete));

    add(&[DnsRecordset], op::CREATE, handler!(dns::create_recordset));

    add(&[FileShare], op::CREATE, handler!(share::create_share));
    add(&[FileShare], op::DELETE, handler!(share::delete_share));
    add(&[ShareNetwork], op::CREATE, handler!(share::create_share_network));

    routes
}

fn build_relationship_routes() -> Vec<RelationshipRoute> {
    let route = |relationship: &'static str,
                 operation: &'static str,
                 kind: ResourceKind,
                 handler: Handler| RelationshipRoute {
        relationship,
        side: Side::Source,
        operation,
        kind,
        handler,
        external_check: None,
    };

    vec![
        route(
            rel::VOLUME_ATTACHED_TO_SERVER,
            op::ESTABLISH,
            ResourceKind::Volume,
            handler!(server::attach_volume),
        ),
        route(
            rel::VOLUME_ATTACHED_TO_SERVER,
            op::UNLINK,
            ResourceKind::Volume,
            handler!(server::detach_volume),
        ),
        route(
            rel::SERVER_CONNECTED_TO_FLOATING_IP,
            op::ESTABLISH,
            ResourceKind::Server,
            handler!(server::connect_floating_ip),
        ),
        route(
            rel::SERVER_CONNECTED_TO_FLOATING_IP,
            op::UNLINK,
            ResourceKind::Server,
            handler!(server::disconnect_floating_ip),
        ),
        route(
            rel::SERVER_CONNECTED_TO_SECURITY_GROUP,
            op::ESTABLISH,
            ResourceKind::Server,
            handler!(server::connect_security_group),
        ),
        route(
            rel::SERVER_CONNECTED_TO_SECURITY_GROUP,
            op::UNLINK,
            ResourceKind::Server,
            handler!(server::disconnect_security_group),
        ),
        RelationshipRoute {
            external_check: Some(handler!(network::check_router_interface)),
            ..route(
                rel::SUBNET_CONNECTED_TO_ROUTER,
                op::ESTABLISH,
                ResourceKind::Subnet,
                handler!(network::connect_router),
            )
        },
        route(
            rel::SUBNET_CONNECTED_TO_ROUTER,
            op::UNLINK,
            ResourceKind::Subnet,
            handler!(network::disconnect_router),
        ),
    ]
}

/// Kind of a node, from its type or its type hierarchy
pub fn node_kind(node: &NodeInfo) -> Option<ResourceKind> {
    std::iter::once(&node.type_name)
        .chain(node.type_hierarchy.iter().rev())
        .find_map(|type_name| kind_for_node_type(type_name))
}

pub fn node_handler(kind: ResourceKind, operation: &str) -> Option<Handler> {
    NODE_ROUTES
        .iter()
        .rev()
        .find(|route| route.kind == kind && route.operation == operation)
        .map(|route| route.handler)
}

pub fn relationship_route(
    relationship: &RelationshipContext,
    side: Side,
    operation: &str,
) -> Option<RelationshipRoute> {
    RELATIONSHIP_ROUTES
        .iter()
        .find(|route| {
            route.side == side
                && route.operation == operation
                && relationship.is_type(route.relationship)
        })
        .copied()
}

/// Every routed `(target, operation)` pair, for display
pub fn describe_routes() -> Vec<(String, &'static str)> {
    let mut described: Vec<(String, &'static str)> = Vec::new();
    for route in NODE_ROUTES.iter() {
        let Some(type_name) = node_type(route.kind) else {
            continue;
        };
        if !described
            .iter()
            .any(|(t, o)| t == type_name && *o == route.operation)
        {
            described.push((type_name.to_string(), route.operation));
        }
    }
    for route in RELATIONSHIP_ROUTES.iter() {
        described.push((
            format!("{} ({})", route.relationship, route.side.as_str()),
            route.operation,
        ));
    }
    described.push(("*".to_string(), op::PAIRING_ASSIGN));
    described.push(("*".to_string(), op::PAIRING_RELEASE));
    described.sort();
    described
}

/// The plugin: an operation registry bound to a client factory
#[derive(Clone)]
pub struct Plugin {
    factory: Arc<dyn ClientFactory>,
}

impl Plugin {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Run the operation named by `ctx.operation.name`
    ///
    /// Runtime properties in `ctx` are updated in place; the caller persists
    /// them whatever the outcome.
    pub async fn invoke(&self, ctx: &mut OperationContext, inputs: Map<String, Value>) -> Result<()> {
        let operation = ctx.operation.name.clone();
        if operation == op::PAIRING_ASSIGN || operation == op::PAIRING_RELEASE {
            return pairing(ctx, &inputs).await;
        }

        let spec = match &ctx.entity {
            Entity::Node(endpoint) => {
                let kind = node_kind(&endpoint.node).ok_or_else(|| {
                    OperationError::non_recoverable(format!(
                        "unsupported node type {}",
                        endpoint.node.type_name
                    ))
                })?;
                let handler = node_handler(kind, &operation).ok_or_else(|| {
                    OperationError::non_recoverable(format!(
                        "operation {} is not supported for {}",
                        operation, endpoint.node.type_name
                    ))
                })?;
                OperationSpec::new(kind, handler)
            }
            Entity::Relationship(relationship) => {
                let side = ctx.resolve()?;
                let route = relationship_route(relationship, side, &operation).ok_or_else(|| {
                    OperationError::non_recoverable(format!(
                        "operation {} is not supported on the {} side of {}",
                        operation,
                        side.as_str(),
                        relationship.type_name
                    ))
                })?;
                let spec = OperationSpec::new(route.kind, route.handler);
                match route.external_check {
                    Some(check) => spec.with_external_check(check),
                    None => spec,
                }
            }
        };

        run_operation(ctx, self.factory.as_ref(), spec, inputs).await
    }
}

/// `pairing.assign` / `pairing.release`; no cloud client involved
async fn pairing(ctx: &mut OperationContext, inputs: &Map<String, Value>) -> Result<()> {
    let dispatch = bridge_dispatch(ctx.logger.clone(), &LoggingConfig::default());
    let operation = ctx.operation.name.clone();

    async move {
        let Entity::Node(endpoint) = &mut ctx.entity else {
            return Err(OperationError::non_recoverable(
                "pairing operations run on node instances",
            ));
        };
        let db = PairingDb::from_inputs(inputs)?;
        let instance_id = endpoint.instance.id.clone();

        if operation == op::PAIRING_RELEASE {
            db.release(&instance_id).await?;
            endpoint
                .instance
                .runtime_properties
                .remove(PAIRED_INSTANCE_ID);
            return Ok(());
        }

        let mut candidates: Vec<String> = endpoint
            .instance
            .relationships
            .iter()
            .filter(|r| r.is_type(rel::PAIRED_WITH))
            .map(|r| r.target.instance.id.clone())
            .collect();
        if candidates.is_empty() {
            candidates = string_list(inputs.get(CANDIDATES));
        }

        match db.assign(&instance_id, &candidates).await? {
            Some(peer) => {
                endpoint
                    .instance
                    .runtime_properties
                    .set(PAIRED_INSTANCE_ID, peer);
                Ok(())
            }
            None => Err(OperationError::non_recoverable(format!(
                "no free peer for {} among {} candidates",
                instance_id,
                candidates.len()
            ))),
        }
    }
    .with_subscriber(dispatch)
    .await
}
