//! Networking: subnets, ports, routers, floating IPs, security groups and
//! RBAC policies

use super::common::{lookup_id, singleton};
use crate::dispatch::{Scope, endpoint_id};
use crate::error::{OperationError, Result};
use crate::resolver::{PropertyRule, endpoint_is_kind};
use crate::resource::record_str;
use crate::runtime::TYPE;
use crate::types::{kind_for_node_type, relationships};
use serde_json::{Map, Value, json};
use stackflow_cloud::{CloudError, ListQuery, ResourceKind};

const NETWORK_ID: PropertyRule = PropertyRule::related("network_id", ResourceKind::Network);
const SUBNET_ID: PropertyRule = PropertyRule::related("subnet_id", ResourceKind::Subnet);

pub async fn create_subnet(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        return scope.create_once().await.map(drop);
    }
    let mut body = scope.resource.config.clone();
    if let Some(network_id) = scope.resolve_str(&NETWORK_ID)? {
        body.insert("network_id".into(), json!(network_id));
    }
    scope.create_once_with(body).await.map(drop)
}

// --- subnet_connected_to_router (runs on the subnet) ---

pub async fn connect_router(scope: &mut Scope<'_>) -> Result<()> {
    let subnet_id = scope.resource.require_id()?.to_string();
    let router = scope.other_resource(ResourceKind::Router)?;
    if router.router().has_port_in_subnet(&subnet_id).await? {
        tracing::info!(router = router.label(), subnet = %subnet_id, "router already has an interface on the subnet");
        return Ok(());
    }
    router.router().add_interface(Some(&subnet_id), None).await?;
    tracing::info!(router = router.label(), subnet = %subnet_id, "router interface added");
    Ok(())
}

pub async fn disconnect_router(scope: &mut Scope<'_>) -> Result<()> {
    let Some(subnet_id) = scope.resource.id.clone() else {
        return Ok(());
    };
    let router = scope.other_resource(ResourceKind::Router)?;
    match router.router().remove_interface(Some(&subnet_id), None).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::info!(router = router.label(), subnet = %subnet_id, "router interface already removed");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Check run when both the subnet and the router are external
pub async fn check_router_interface(scope: &mut Scope<'_>) -> Result<()> {
    let subnet_id = scope.resource.require_id()?.to_string();
    let router = scope.other_resource(ResourceKind::Router)?;
    if router.router().has_port_in_subnet(&subnet_id).await? {
        return Ok(());
    }
    Err(OperationError::non_recoverable(format!(
        "external router {} has no interface on external subnet {}",
        router.label(),
        subnet_id
    )))
}

// --- ports ---

#[derive(Debug, Default, PartialEq)]
struct PortAddresses {
    ipv4: Vec<String>,
    ipv6: Vec<String>,
}

/// Fixed addresses of a port, without the allowed address pairs
fn port_addresses(record: &Value) -> PortAddresses {
    let pairs: Vec<&str> = record
        .get("allowed_address_pairs")
        .and_then(Value::as_array)
        .map(|pairs| pairs.iter().filter_map(|p| record_str(p, "ip_address")).collect())
        .unwrap_or_default();

    let mut addresses = PortAddresses::default();
    for fixed in record
        .get("fixed_ips")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let Some(ip) = record_str(fixed, "ip_address") else {
            continue;
        };
        if pairs.contains(&ip) {
            continue;
        }
        if ip.contains(':') {
            addresses.ipv6.push(ip.to_string());
        } else {
            addresses.ipv4.push(ip.to_string());
        }
    }
    addresses
}

fn export_port(scope: &mut Scope<'_>, record: &Value) {
    let addresses = port_addresses(record);
    let fixed_ips: Vec<String> = addresses.ipv4.iter().chain(&addresses.ipv6).cloned().collect();
    let runtime = scope.runtime_mut();
    runtime.set("ipv4_address", singleton(&addresses.ipv4));
    runtime.set("ipv6_address", singleton(&addresses.ipv6));
    runtime.set("ipv4_addresses", addresses.ipv4);
    runtime.set("ipv6_addresses", addresses.ipv6);
    runtime.set("fixed_ips", fixed_ips);
    if let Some(mac) = record_str(record, "mac_address") {
        runtime.set("mac_address", mac);
    }
    if let Some(network) = record_str(record, "network_id") {
        runtime.set("network_id", network);
    }
}

pub async fn create_port(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        let record = scope.create_once().await?;
        export_port(scope, &record);
        return Ok(());
    }

    let mut body = scope.resource.config.clone();
    if let Some(network_id) = scope.resolve_str(&NETWORK_ID)? {
        body.insert("network_id".into(), json!(network_id));
    }

    let groups = scope.resolve_list(
        &PropertyRule::related("security_groups", ResourceKind::SecurityGroup).multiple(),
    )?;
    if !groups.is_empty() {
        body.insert("security_groups".into(), Value::Array(groups));
    }

    let subnet = scope.resolve_str(&SUBNET_ID)?;
    body.remove("subnet_id");
    let fixed_ip = scope.str_property("fixed_ip").map(str::to_string);
    if fixed_ip.is_some() || subnet.is_some() {
        let mut entry = Map::new();
        if let Some(ip) = fixed_ip {
            entry.insert("ip_address".into(), json!(ip));
        }
        if let Some(subnet) = subnet {
            entry.insert("subnet_id".into(), json!(subnet));
        }
        let fixed_ips = body.entry("fixed_ips").or_insert_with(|| json!([]));
        if let Some(items) = fixed_ips.as_array_mut() {
            items.push(Value::Object(entry));
        }
    }

    let record = scope.create_once_with(body).await?;
    export_port(scope, &record);
    Ok(())
}

// --- routers ---

pub async fn create_router(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        return scope.create_once().await.map(drop);
    }
    let mut body = scope.resource.config.clone();
    let rule = PropertyRule::related("external_network", ResourceKind::Network)
        .through(relationships::ROUTER_CONNECTED_TO_EXTERNAL_NETWORK);
    let external = match scope.resolve_str(&rule)? {
        Some(network) => Some(network),
        None => scope
            .related_through(relationships::ROUTER_CONNECTED_TO_EXTERNAL_NETWORK)
            .into_iter()
            .find_map(endpoint_id)
            .map(str::to_string),
    };
    body.remove("external_network");
    if let Some(network) = external {
        let network_id = lookup_id(scope, ResourceKind::Network, &network).await?;
        let gateway = body
            .entry("external_gateway_info")
            .or_insert_with(|| json!({}));
        gateway["network_id"] = json!(network_id);
    }
    scope.create_once_with(body).await.map(drop)
}

fn requested_routes(scope: &Scope<'_>) -> Vec<Value> {
    scope
        .input("routes")
        .or_else(|| scope.property("routes"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn same_route(a: &Value, b: &Value) -> bool {
    record_str(a, "destination") == record_str(b, "destination")
        && record_str(a, "nexthop") == record_str(b, "nexthop")
}

/// Add the node's static routes to the router
pub async fn start_router(scope: &mut Scope<'_>) -> Result<()> {
    let wanted = requested_routes(scope);
    if wanted.is_empty() {
        return Ok(());
    }
    let mut routes = scope.resource.router().routes().await?;
    let mut added = Vec::new();
    for route in wanted {
        if !routes.iter().any(|r| same_route(r, &route)) {
            routes.push(route.clone());
        }
        added.push(route);
    }
    scope.resource.router().set_routes(routes).await?;
    tracing::info!(router = scope.resource.label(), count = added.len(), "static routes set");
    scope.runtime_mut().set("routes", added);
    Ok(())
}

/// Remove the routes `start` added
pub async fn stop_router(scope: &mut Scope<'_>) -> Result<()> {
    let added = scope
        .runtime()
        .get("routes")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if added.is_empty() || scope.resource.id.is_none() {
        return Ok(());
    }
    let remaining: Vec<Value> = scope
        .resource
        .router()
        .routes()
        .await?
        .into_iter()
        .filter(|route| !added.iter().any(|a| same_route(a, route)))
        .collect();
    scope.resource.router().set_routes(remaining).await?;
    scope.runtime_mut().remove("routes");
    Ok(())
}

// --- floating IPs ---

pub async fn create_floating_ip(scope: &mut Scope<'_>) -> Result<()> {
    let record = if scope.resource.id.is_some() {
        scope.create_once().await?
    } else {
        let mut body = scope.resource.config.clone();
        let network = match body
            .remove("floating_network_name")
            .and_then(|v| v.as_str().map(str::to_string))
        {
            Some(name) => Some(lookup_id(scope, ResourceKind::Network, &name).await?),
            None => scope.resolve_str(&PropertyRule::related(
                "floating_network_id",
                ResourceKind::Network,
            ))?,
        };
        if let Some(network) = network {
            body.insert("floating_network_id".into(), json!(network));
        }
        if let Some(port) = scope.resolve_str(&PropertyRule::related("port_id", ResourceKind::Port))? {
            body.insert("port_id".into(), json!(port));
        }
        scope.create_once_with(body).await?
    };
    if let Some(address) = record_str(&record, "floating_ip_address") {
        scope.runtime_mut().set("floating_ip_address", address);
    }
    Ok(())
}

// --- security groups ---

pub async fn create_security_group(scope: &mut Scope<'_>) -> Result<()> {
    let mut body = scope.resource.config.clone();
    body.remove("security_group_rules");
    scope.create_once_with(body).await?;
    let group_id = scope.resource.require_id()?.to_string();

    if scope.runtime().contains("security_group_rules") {
        return Ok(());
    }

    if scope.bool_property("disable_default_egress_rules") {
        let rules = scope.resource.sibling(ResourceKind::SecurityGroupRule, None);
        let egress = rules
            .list(
                &ListQuery::new()
                    .with("security_group_id", group_id.as_str())
                    .with("direction", "egress"),
            )
            .await?;
        for rule in &egress {
            if let Some(id) = record_str(rule, "id") {
                rules.sibling(ResourceKind::SecurityGroupRule, Some(id)).delete().await?;
            }
        }
        tracing::debug!(group = %group_id, removed = egress.len(), "default egress rules removed");
    }

    let requested = scope
        .property("security_group_rules")
        .or_else(|| scope.resource.config.get("security_group_rules"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut created = Vec::new();
    for rule in requested {
        let Value::Object(mut body) = rule else {
            continue;
        };
        body.insert("security_group_id".into(), json!(group_id));
        let mut resource = scope.resource.sibling(ResourceKind::SecurityGroupRule, None);
        match resource.create_with(body).await {
            Ok(record) => {
                if let Some(id) = record_str(&record, "id") {
                    created.push(id.to_string());
                }
            }
            Err(OperationError::Cloud(CloudError::Conflict(message))) => {
                tracing::info!(group = %group_id, "rule already exists: {}", message);
            }
            Err(e) => return Err(e),
        }
    }
    scope.runtime_mut().set("security_group_rules", created);
    Ok(())
}

pub async fn create_security_group_rule(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        return scope.create_once().await.map(drop);
    }
    let mut body = scope.resource.config.clone();
    let rule = PropertyRule::related("security_group_id", ResourceKind::SecurityGroup);
    if let Some(group) = scope.resolve_str(&rule)? {
        body.insert("security_group_id".into(), json!(group));
    }
    if let Some(remote) = scope.resolve_str(&PropertyRule::new("remote_group_id"))? {
        body.insert("remote_group_id".into(), json!(remote));
    }
    scope.create_once_with(body).await.map(drop)
}

// --- RBAC policies ---

/// Type of the object an endpoint represents, as RBAC names it
fn object_type(endpoint: &crate::context::Endpoint) -> Option<String> {
    endpoint
        .instance
        .runtime_properties
        .get_str(TYPE)
        .map(str::to_string)
        .or_else(|| kind_for_node_type(&endpoint.node.type_name).map(|k| k.resource_type().to_string()))
        .or_else(|| endpoint_is_kind(endpoint, ResourceKind::Network).then(|| "network".to_string()))
}

/// Object the policy applies to: inline, or through `rbac_policy_applied_to`
fn rbac_object(scope: &Scope<'_>) -> Result<(String, String)> {
    let inline = scope
        .resource
        .rbac()
        .target_object()
        .map(|(t, id)| (t.to_string(), id.to_string()));
    let related = scope.related_through(relationships::RBAC_POLICY_APPLIED_TO);
    if related.len() > 1 {
        return Err(OperationError::non_recoverable(format!(
            "rbac policy is applied to {} objects; only one is allowed",
            related.len()
        )));
    }
    let related = related
        .first()
        .and_then(|target| Some((object_type(target)?, endpoint_id(target)?.to_string())));

    match (inline, related) {
        (Some(_), Some(_)) => Err(OperationError::non_recoverable(
            "rbac policy object is set both inline and through rbac_policy_applied_to; use only one",
        )),
        (Some(object), None) | (None, Some(object)) => Ok(object),
        (None, None) => Err(OperationError::non_recoverable(
            "rbac policy needs object_type and object_id or an rbac_policy_applied_to relationship",
        )),
    }
}

pub async fn create_rbac_policy(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        return scope.create_once().await.map(drop);
    }
    let (object_type, object_id) = rbac_object(scope)?;
    let body = scope.resource.rbac().body(&object_type, &object_id);
    scope.create_once_with(body).await.map(drop)
}

/// Delete every existing policy equal to the configured one
pub async fn find_and_delete_rbac_policy(scope: &mut Scope<'_>) -> Result<()> {
    let (object_type, object_id) = rbac_object(scope)?;
    let wanted = Value::Object(scope.resource.rbac().body(&object_type, &object_id));
    let matches = scope.resource.rbac().find_matching(&wanted).await?;
    for policy in &matches {
        let Some(id) = record_str(policy, "id") else {
            continue;
        };
        match scope.resource.sibling(ResourceKind::RbacPolicy, Some(id)).delete().await {
            Ok(()) => tracing::info!(policy = id, object = %object_id, "rbac policy deleted"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    if matches.is_empty() {
        tracing::info!(object = %object_id, "no matching rbac policy found");
    }
    Ok(())
}
