//! Server lifecycle and server relationships

use super::common::{lookup_id, singleton, string_list};
use crate::context::Endpoint;
use crate::dispatch::{Scope, endpoint_id};
use crate::error::{OperationError, Result};
use crate::resolver::PropertyRule;
use crate::resource::{Resource, record_str};
use crate::runtime::NAME;
use crate::tasks::{
    self, ArtifactSource, BACKUP_DONE, DELETE_SERVER_TASK, DONE, PENDING, REBOOT_SERVER_TASK,
    REBUILD, RESTORE_STATE, RESUME_SERVER_TASK, SERVER_RETRY, START_STATE, STOP_SERVER_TASK,
    STOP_STATE, SUSPEND_SERVER_TASK, VOLUME_RETRY, artifact_name, status_of,
};
use crate::types::WINDOWS_SERVER;
use crate::userdata::{self, OsFamily};
use serde_json::{Map, Value, json};
use stackflow_cloud::{ListQuery, ResourceKind};

const PENDING_STATES: [&str; 7] = [
    "BUILD",
    "REBUILD",
    "REBOOT",
    "HARD_REBOOT",
    "MIGRATING",
    "RESIZE",
    "VERIFY_RESIZE",
];

pub const INTERFACES: &str = "interfaces";
pub const SERVER: &str = "server";

/// First of `keys` present in the resource config, removed from `body`
fn take_reference(body: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    let mut found = None;
    for key in keys {
        if let Some(value) = body.remove(*key)
            && found.is_none()
            && let Some(s) = value.as_str().filter(|s| !s.is_empty())
        {
            found = Some(s.to_string());
        }
    }
    found
}

/// Related volume flagged as the boot device, if any
fn boot_volume<'a>(scope: &'a Scope<'_>) -> Result<Option<&'a Endpoint>> {
    let boot: Vec<&Endpoint> = scope
        .related(ResourceKind::Volume)
        .into_iter()
        .filter(|volume| volume.node.bool_property("boot"))
        .collect();
    match boot.len() {
        0 => Ok(None),
        1 => Ok(boot.into_iter().next()),
        n => Err(OperationError::non_recoverable(format!(
            "{} related volumes are marked as boot volume; only one is allowed",
            n
        ))),
    }
}

/// Network of a related port, from its runtime properties or its config
fn port_network(port: &Endpoint) -> Option<String> {
    port.instance
        .runtime_properties
        .get_str("network_id")
        .map(str::to_string)
        .or_else(|| {
            port.node
                .property("resource_config")
                .and_then(|config| config.get("network_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

/// `networks` request entries: inline first, then related ports and
/// networks
fn networks(scope: &Scope<'_>) -> Vec<Value> {
    let mut entries: Vec<Value> = scope
        .resource
        .config
        .get("networks")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let ports = scope.related(ResourceKind::Port);
    let port_networks: Vec<String> = ports.iter().filter_map(|port| port_network(port)).collect();
    for port in &ports {
        if let Some(id) = endpoint_id(port) {
            entries.push(json!({"port": id}));
        }
    }
    for network in scope.related(ResourceKind::Network) {
        let Some(id) = endpoint_id(network) else {
            continue;
        };
        if port_networks.iter().any(|net| net == id) {
            continue;
        }
        if !entries.iter().any(|entry| record_str(entry, "uuid") == Some(id)) {
            entries.push(json!({"uuid": id}));
        }
    }
    entries
}

/// Security group names: inline first, then related groups
fn security_groups(scope: &Scope<'_>) -> Vec<Value> {
    let mut names: Vec<String> = Vec::new();
    if let Some(Value::Array(items)) = scope.resource.config.get("security_groups") {
        for item in items {
            let name = item
                .as_str()
                .or_else(|| record_str(item, "name"))
                .map(str::to_string);
            if let Some(name) = name {
                names.push(name);
            }
        }
    }
    for group in scope.related(ResourceKind::SecurityGroup) {
        let runtime = &group.instance.runtime_properties;
        if let Some(name) = runtime.get_str(NAME).or_else(|| runtime.get_str("external_name")) {
            names.push(name.to_string());
        }
    }
    names.sort();
    names.dedup();
    names.into_iter().map(|name| json!({"name": name})).collect()
}

async fn compose_user_data(scope: &Scope<'_>) -> Result<Option<String>> {
    let inline = match scope.resource.config.get("user_data") {
        Some(value) => userdata::load(value).await?,
        None => None,
    };
    let init_script = scope.agent.as_ref().and_then(|agent| agent.init_script());
    let os = if scope.node().is_type(WINDOWS_SERVER) {
        OsFamily::Windows
    } else {
        OsFamily::from_property(scope.str_property("os_family"))
    };

    let Some(composed) = userdata::compose(inline.as_deref(), init_script, os) else {
        return Ok(None);
    };
    let encode = !matches!(scope.property("encode_user_data"), Some(Value::Bool(false)));
    Ok(Some(if encode {
        userdata::encode(&composed)
    } else {
        composed
    }))
}

pub async fn create(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_some() {
        scope.create_once().await?;
        return Ok(());
    }

    let mut body = scope.resource.config.clone();

    let boot = boot_volume(scope)?.and_then(endpoint_id).map(str::to_string);

    let image = match take_reference(&mut body, &["image_id", "imageRef", "image"]) {
        Some(reference) => Some(reference),
        None => scope.resolve_str(&PropertyRule::related("image_id", ResourceKind::Image))?,
    };
    if let Some(image) = image {
        let id = lookup_id(scope, ResourceKind::Image, &image).await?;
        body.insert("imageRef".into(), json!(id));
    } else if boot.is_none() {
        tracing::warn!("server has neither an image nor a boot volume");
    }

    let flavor = match take_reference(&mut body, &["flavor_id", "flavorRef", "flavor"]) {
        Some(reference) => Some(reference),
        None => scope.resolve_str(&PropertyRule::related("flavor_id", ResourceKind::Flavor))?,
    };
    if let Some(flavor) = flavor {
        let id = lookup_id(scope, ResourceKind::Flavor, &flavor).await?;
        body.insert("flavorRef".into(), json!(id));
    }

    let key_rule = PropertyRule::related("key_name", ResourceKind::Keypair).reading(NAME);
    if let Some(key_name) = scope.resolve_str(&key_rule)? {
        body.insert("key_name".into(), json!(key_name));
    }

    let group_rule = PropertyRule::related("server_group_id", ResourceKind::ServerGroup);
    if let Some(group) = scope.resolve_str(&group_rule)? {
        body.remove("server_group_id");
        let hints = body
            .entry("scheduler_hints")
            .or_insert_with(|| json!({}));
        hints["group"] = json!(group);
    }

    let networks = networks(scope);
    if networks.is_empty() {
        body.remove("networks");
    } else {
        body.insert("networks".into(), Value::Array(networks));
    }

    let groups = security_groups(scope);
    if groups.is_empty() {
        body.remove("security_groups");
    } else {
        body.insert("security_groups".into(), Value::Array(groups));
    }

    if let Some(volume_id) = boot {
        let mut mappings = vec![json!({
            "uuid": volume_id,
            "source_type": "volume",
            "destination_type": "volume",
            "boot_index": 0,
            "delete_on_termination": false,
        })];
        if let Some(Value::Array(existing)) = body.remove("block_device_mapping_v2") {
            mappings.extend(existing);
        }
        body.insert("block_device_mapping_v2".into(), Value::Array(mappings));
    }

    body.remove("user_data");
    if let Some(user_data) = compose_user_data(scope).await? {
        body.insert("user_data".into(), json!(user_data));
    }

    if let Some(Value::Object(metadata)) = scope.property("metadata") {
        let merged = body.entry("metadata").or_insert_with(|| json!({}));
        for (key, value) in metadata {
            merged[key.as_str()] = value.clone();
        }
    }

    scope.create_once_with(body).await?;
    Ok(())
}

/// Fetch the server and map its status onto the state machine
///
/// `ACTIVE` completes, building states retry, `SHUTOFF` is started and
/// retried, `ERROR` and unknown states fail.
async fn wait_active(scope: &Scope<'_>) -> Result<Value> {
    let record = scope.resource.get().await?;
    let status = status_of(&record).to_ascii_uppercase();
    let label = scope.resource.label();

    match status.as_str() {
        "ACTIVE" => Ok(record),
        s if PENDING_STATES.contains(&s) => Err(scope.retry(
            format!("waiting for server {} to become ACTIVE (status {})", label, s),
            SERVER_RETRY,
        )),
        "SHUTOFF" => {
            scope.resource.server().start().await?;
            Err(scope.retry(
                format!("server {} was SHUTOFF, starting it", label),
                SERVER_RETRY,
            ))
        }
        "ERROR" => {
            let fault = record
                .get("fault")
                .and_then(|f| record_str(f, "message"))
                .unwrap_or("no fault reported");
            Err(OperationError::non_recoverable(format!(
                "server {} is in ERROR: {}",
                label, fault
            )))
        }
        other => Err(OperationError::non_recoverable(format!(
            "server {} has unexpected status {:?}",
            label, other
        ))),
    }
}

#[derive(Debug, Default, PartialEq)]
struct AddressExport {
    ipv4: Vec<String>,
    ipv6: Vec<String>,
    access_ipv4: Option<String>,
    access_ipv6: Option<String>,
}

fn collect_addresses(record: &Value, management_network: Option<&str>) -> AddressExport {
    let mut export = AddressExport::default();
    let mut management = (None, None);

    if let Some(Value::Object(networks)) = record.get("addresses") {
        for (network, entries) in networks {
            for entry in entries.as_array().into_iter().flatten() {
                let Some(addr) = record_str(entry, "addr") else {
                    continue;
                };
                let v6 = entry.get("version").and_then(Value::as_u64) == Some(6) || addr.contains(':');
                let is_management = management_network == Some(network.as_str());
                if v6 {
                    export.ipv6.push(addr.to_string());
                    if is_management && management.1.is_none() {
                        management.1 = Some(addr.to_string());
                    }
                } else {
                    export.ipv4.push(addr.to_string());
                    if is_management && management.0.is_none() {
                        management.0 = Some(addr.to_string());
                    }
                }
            }
        }
    }

    export.access_ipv4 = record_str(record, "accessIPv4")
        .map(str::to_string)
        .or(management.0)
        .or_else(|| export.ipv4.first().cloned());
    export.access_ipv6 = record_str(record, "accessIPv6")
        .map(str::to_string)
        .or(management.1)
        .or_else(|| export.ipv6.first().cloned());
    export
}

fn export_addresses(scope: &mut Scope<'_>, record: &Value) {
    let management = scope.str_property("management_network_name").map(str::to_string);
    let export = collect_addresses(record, management.as_deref());
    let runtime = scope.runtime_mut();
    runtime.set("ipv4_address", singleton(&export.ipv4));
    runtime.set("ipv6_address", singleton(&export.ipv6));
    runtime.set("ipv4_addresses", export.ipv4);
    runtime.set("ipv6_addresses", export.ipv6);
    runtime.set("access_ipv4", export.access_ipv4.clone().unwrap_or_default());
    runtime.set("access_ipv6", export.access_ipv6.unwrap_or_default());
    if let Some(ip) = export.access_ipv4 {
        runtime.set("ip", ip);
    }
}

/// Attach related ports and networks that an external server lacks,
/// returning the ids of the interfaces attached here
async fn adopt_interfaces(scope: &Scope<'_>, record: &Value) -> Result<Vec<String>> {
    let server = scope.resource.server();
    let server_id = scope.resource.require_id()?;
    let current = server.interfaces().await?;
    let attached_ports: Vec<&str> = current.iter().filter_map(|i| record_str(i, "port_id")).collect();
    let attached_nets: Vec<&str> = current.iter().filter_map(|i| record_str(i, "net_id")).collect();
    let address_networks: Vec<&str> = record
        .get("addresses")
        .and_then(Value::as_object)
        .map(|map| map.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut attached = Vec::new();
    for port in scope.related(ResourceKind::Port) {
        let Some(port_id) = endpoint_id(port) else {
            continue;
        };
        if attached_ports.contains(&port_id) {
            continue;
        }
        tracing::info!(server = server_id, port = port_id, "attaching port to external server");
        if let Some(id) = server.attach_interface(Some(port_id), None).await? {
            attached.push(id);
        }
    }
    for network in scope.related(ResourceKind::Network) {
        let Some(net_id) = endpoint_id(network) else {
            continue;
        };
        let name = network.instance.runtime_properties.get_str(NAME);
        let present = attached_nets.contains(&net_id)
            || name.is_some_and(|name| address_networks.contains(&name));
        if present {
            continue;
        }
        tracing::info!(server = server_id, network = net_id, "attaching network to external server");
        if let Some(id) = server.attach_interface(None, Some(net_id)).await? {
            attached.push(id);
        }
    }
    Ok(attached)
}

pub async fn configure(scope: &mut Scope<'_>) -> Result<()> {
    let mut record = wait_active(scope).await?;

    if scope.is_external() {
        let newly = adopt_interfaces(scope, &record).await?;
        if !newly.is_empty() {
            let mut recorded = string_list(scope.runtime().get(INTERFACES));
            recorded.extend(newly);
            scope.runtime_mut().set(INTERFACES, recorded);
            record = scope.resource.get().await?;
        }
    } else {
        let interfaces: Vec<String> = scope
            .resource
            .server()
            .interfaces()
            .await?
            .iter()
            .filter_map(|i| record_str(i, "port_id").map(str::to_string))
            .collect();
        scope.runtime_mut().set(INTERFACES, interfaces);
    }

    export_addresses(scope, &record);

    if scope.bool_property("use_password") {
        let password = scope.resource.server().password().await?;
        match password {
            Some(password) => scope.runtime_mut().set("password", password),
            None => {
                scope.runtime_mut().set(SERVER, record);
                return Err(scope.retry(
                    format!("waiting for the admin password of server {}", scope.resource.label()),
                    SERVER_RETRY,
                ));
            }
        }
    }

    scope.runtime_mut().set(SERVER, record);
    Ok(())
}

pub async fn start(scope: &mut Scope<'_>) -> Result<()> {
    let record = wait_active(scope).await?;
    export_addresses(scope, &record);
    Ok(())
}

pub async fn stop(scope: &mut Scope<'_>) -> Result<()> {
    if scope.resource.id.is_none() {
        return Ok(());
    }

    if scope.is_external() {
        let recorded = string_list(scope.runtime().get(INTERFACES));
        for port_id in &recorded {
            match scope.resource.server().detach_interface(port_id).await {
                Ok(()) => tracing::info!(port = %port_id, "detached interface from external server"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        scope.runtime_mut().remove(INTERFACES);
        return Ok(());
    }

    if scope.runtime().get_bool(STOP_SERVER_TASK) {
        let record = scope.resource.get().await?;
        if status_of(&record).eq_ignore_ascii_case("SHUTOFF") {
            scope.runtime_mut().remove(STOP_SERVER_TASK);
            return Ok(());
        }
        return Err(scope.retry(
            format!("waiting for server {} to stop", scope.resource.label()),
            SERVER_RETRY,
        ));
    }

    let record = scope.resource.get().await?;
    let server = scope.resource.server();
    for interface in server.interfaces().await? {
        if let Some(port_id) = record_str(&interface, "port_id") {
            server.detach_interface(port_id).await?;
        }
    }
    if status_of(&record).eq_ignore_ascii_case("SHUTOFF") {
        return Ok(());
    }
    server.stop().await?;
    scope.runtime_mut().set(STOP_SERVER_TASK, true);
    Err(scope.retry(
        format!("stopping server {}", scope.resource.label()),
        SERVER_RETRY,
    ))
}

/// Server power transitions that are triggered once and then polled
#[derive(Debug, Clone, Copy)]
enum Transition {
    Reboot { hard: bool },
    Suspend,
    Resume,
}

impl Transition {
    fn marker(self) -> &'static str {
        match self {
            Transition::Reboot { .. } => REBOOT_SERVER_TASK,
            Transition::Suspend => SUSPEND_SERVER_TASK,
            Transition::Resume => RESUME_SERVER_TASK,
        }
    }

    fn target(self) -> &'static str {
        match self {
            Transition::Suspend => "SUSPENDED",
            Transition::Reboot { .. } | Transition::Resume => "ACTIVE",
        }
    }

    async fn trigger(self, server: &Resource) -> Result<()> {
        let api = server.server();
        match self {
            Transition::Reboot { hard } => api.reboot(hard).await,
            Transition::Suspend => api.suspend().await,
            Transition::Resume => api.resume().await,
        }
    }
}

async fn transition(scope: &mut Scope<'_>, transition: Transition) -> Result<()> {
    let (marker, target) = (transition.marker(), transition.target());
    if !scope.runtime().get_bool(marker) {
        transition.trigger(&scope.resource).await?;
        scope.runtime_mut().set(marker, true);
        return Err(scope.retry(
            format!("waiting for server {} to become {}", scope.resource.label(), target),
            SERVER_RETRY,
        ));
    }
    let record = scope.resource.get().await?;
    let status = status_of(&record).to_ascii_uppercase();
    if status == target {
        scope.runtime_mut().remove(marker);
        Ok(())
    } else if status == "ERROR" {
        scope.runtime_mut().remove(marker);
        Err(OperationError::non_recoverable(format!(
            "server {} went into ERROR while becoming {}",
            scope.resource.label(),
            target
        )))
    } else {
        Err(scope.retry(
            format!(
                "waiting for server {} to become {} (status {})",
                scope.resource.label(),
                target,
                status
            ),
            SERVER_RETRY,
        ))
    }
}

pub async fn reboot(scope: &mut Scope<'_>) -> Result<()> {
    let hard = scope
        .input_str("reboot_type")
        .is_some_and(|t| t.eq_ignore_ascii_case("HARD"));
    transition(scope, Transition::Reboot { hard }).await
}

pub async fn suspend(scope: &mut Scope<'_>) -> Result<()> {
    transition(scope, Transition::Suspend).await
}

pub async fn resume(scope: &mut Scope<'_>) -> Result<()> {
    transition(scope, Transition::Resume).await
}

pub async fn delete(scope: &mut Scope<'_>) -> Result<()> {
    let resource = &scope.resource;
    let runtime = &mut scope.endpoint.instance.runtime_properties;
    tasks::delete_with_marker(runtime, resource, DELETE_SERVER_TASK, SERVER_RETRY).await
}

/// Snapshot inputs shared by create, apply and delete
struct SnapshotRequest {
    name: String,
    backup_type: String,
    rotation: u32,
    incremental: bool,
}

impl SnapshotRequest {
    fn from_inputs(scope: &Scope<'_>) -> Result<Self> {
        let rotation = match scope.input("snapshot_rotation").and_then(Value::as_u64) {
            Some(r) => u32::try_from(r).map_err(|_| {
                OperationError::non_recoverable(format!("snapshot_rotation {} is out of range", r))
            })?,
            None => 1,
        };
        Ok(Self {
            name: scope.input_str("snapshot_name").unwrap_or("snapshot").to_string(),
            backup_type: scope.input_str("snapshot_type").unwrap_or("daily").to_string(),
            rotation,
            incremental: !matches!(scope.input("snapshot_incremental"), Some(Value::Bool(false))),
        })
    }

    fn artifact(&self, source: ArtifactSource, source_id: &str) -> String {
        artifact_name(source, source_id, &self.name, self.incremental)
    }
}

async fn images_named(scope: &Scope<'_>, name: &str) -> Result<Vec<Value>> {
    scope
        .resource
        .sibling(ResourceKind::Image, None)
        .list(&ListQuery::new().with("name", name))
        .await
}

pub async fn snapshot_create(scope: &mut Scope<'_>) -> Result<()> {
    let request = SnapshotRequest::from_inputs(scope)?;
    let server_id = scope.resource.require_id()?.to_string();
    let name = request.artifact(ArtifactSource::Vm, &server_id);

    if scope.runtime().get_str(BACKUP_DONE) != Some(PENDING) {
        let server = scope.resource.server();
        if request.incremental {
            server.create_image(&name, Map::new()).await?;
        } else {
            server
                .backup(&name, &request.backup_type, request.rotation)
                .await?;
        }
        scope.runtime_mut().set(BACKUP_DONE, PENDING);
        tracing::info!(server = %server_id, snapshot = %name, "snapshot requested");
    }

    let images = images_named(scope, &name).await?;
    if images
        .iter()
        .any(|image| status_of(image).eq_ignore_ascii_case("active"))
    {
        scope.runtime_mut().set(BACKUP_DONE, DONE);
        return Ok(());
    }
    if let Some(failed) = images
        .iter()
        .find(|image| matches!(status_of(image), "killed" | "error" | "deleted"))
    {
        scope.runtime_mut().remove(BACKUP_DONE);
        return Err(OperationError::non_recoverable(format!(
            "snapshot {} of server {} failed (status {})",
            name,
            server_id,
            status_of(failed)
        )));
    }
    Err(scope.retry(format!("waiting for snapshot {}", name), SERVER_RETRY))
}

pub async fn snapshot_apply(scope: &mut Scope<'_>) -> Result<()> {
    let request = SnapshotRequest::from_inputs(scope)?;
    let server_id = scope.resource.require_id()?.to_string();
    let name = request.artifact(ArtifactSource::Vm, &server_id);

    let image_id = images_named(scope, &name)
        .await?
        .iter()
        .find_map(|image| record_str(image, "id").map(str::to_string))
        .ok_or_else(|| {
            OperationError::non_recoverable(format!(
                "no snapshot {} found for server {}",
                name, server_id
            ))
        })?;

    if scope.runtime().get_str(RESTORE_STATE).is_none() {
        scope.runtime_mut().set(RESTORE_STATE, PENDING);
    }

    if scope.runtime().get_str(STOP_STATE) != Some(DONE) {
        let status = status_of(&scope.resource.get().await?).to_ascii_uppercase();
        if status == "SHUTOFF" {
            scope.runtime_mut().set(STOP_STATE, DONE);
        } else {
            if status == "ACTIVE" {
                scope.resource.server().stop().await?;
            }
            return Err(scope.retry(
                format!("stopping server {} before restoring {}", server_id, name),
                SERVER_RETRY,
            ));
        }
    }

    if scope.runtime().get_str(RESTORE_STATE) == Some(PENDING) {
        scope.resource.server().rebuild(&image_id).await?;
        scope.runtime_mut().set(RESTORE_STATE, REBUILD);
        return Err(scope.retry(
            format!("rebuilding server {} from {}", server_id, name),
            SERVER_RETRY,
        ));
    }

    if scope.runtime().get_str(START_STATE) != Some(DONE) {
        let status = status_of(&scope.resource.get().await?).to_ascii_uppercase();
        match status.as_str() {
            "ACTIVE" => scope.runtime_mut().set(START_STATE, DONE),
            "SHUTOFF" => {
                scope.resource.server().start().await?;
                return Err(scope.retry(
                    format!("starting server {} after restore", server_id),
                    SERVER_RETRY,
                ));
            }
            "ERROR" => {
                return Err(OperationError::non_recoverable(format!(
                    "server {} went into ERROR while restoring {}",
                    server_id, name
                )));
            }
            other => {
                return Err(scope.retry(
                    format!("waiting for server {} after rebuild (status {})", server_id, other),
                    SERVER_RETRY,
                ));
            }
        }
    }

    let runtime = scope.runtime_mut();
    runtime.remove(RESTORE_STATE);
    runtime.remove(STOP_STATE);
    runtime.remove(START_STATE);
    tracing::info!(server = %server_id, snapshot = %name, "snapshot restored");
    Ok(())
}

pub async fn snapshot_delete(scope: &mut Scope<'_>) -> Result<()> {
    let request = SnapshotRequest::from_inputs(scope)?;
    let server_id = scope.resource.require_id()?.to_string();
    let name = request.artifact(ArtifactSource::Vm, &server_id);

    let images = images_named(scope, &name).await?;
    if images.is_empty() {
        scope.runtime_mut().remove(BACKUP_DONE);
        return Ok(());
    }
    for image in &images {
        if let Some(id) = record_str(image, "id") {
            match scope.resource.sibling(ResourceKind::Image, Some(id)).delete().await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
    }
    Err(scope.retry(format!("waiting for snapshot {} to be deleted", name), SERVER_RETRY))
}

// --- volume_attached_to_server (runs on the volume) ---

fn volume_status(record: &Value) -> String {
    status_of(record).to_ascii_lowercase()
}

pub async fn attach_volume(scope: &mut Scope<'_>) -> Result<()> {
    let volume_id = scope.resource.require_id()?.to_string();
    let server = scope.other_resource(ResourceKind::Server)?;
    let server_id = server.require_id()?.to_string();
    let task_key = tasks::attach_volume_task(&volume_id, &server_id);
    let id_key = tasks::attach_volume_id(&volume_id, &server_id);

    if !scope.runtime().get_bool(&task_key) {
        let attachments = server.server().volume_attachments().await?;
        let existing = attachments
            .iter()
            .find(|a| record_str(a, "volumeId") == Some(volume_id.as_str()));
        let attachment = match existing {
            Some(attachment) => attachment.clone(),
            None => {
                let device = scope
                    .str_property("device_name")
                    .filter(|d| *d != "auto")
                    .map(str::to_string);
                server
                    .server()
                    .attach_volume(&volume_id, device.as_deref())
                    .await?
            }
        };
        let attachment_id = record_str(&attachment, "id").unwrap_or(&volume_id).to_string();
        let device = record_str(&attachment, "device").map(str::to_string);
        let runtime = scope.runtime_mut();
        runtime.set(task_key.as_str(), true);
        runtime.set(id_key.as_str(), attachment_id);
        if let Some(device) = device {
            runtime.set("device_name", device);
        }
    }

    let record = scope.resource.get().await?;
    match volume_status(&record).as_str() {
        "in-use" => {
            scope.runtime_mut().remove(&task_key);
            tracing::info!(volume = %volume_id, server = %server_id, "volume attached");
            Ok(())
        }
        s if s.starts_with("error") => Err(OperationError::non_recoverable(format!(
            "volume {} failed to attach to server {} (status {})",
            volume_id, server_id, s
        ))),
        s => Err(scope.retry(
            format!("waiting for volume {} to attach (status {})", volume_id, s),
            VOLUME_RETRY,
        )),
    }
}

pub async fn detach_volume(scope: &mut Scope<'_>) -> Result<()> {
    let Some(volume_id) = scope.resource.id.clone() else {
        return Ok(());
    };
    let server = scope.other_resource(ResourceKind::Server)?;
    let server_id = server.require_id()?.to_string();
    let task_key = tasks::detach_volume_task(&volume_id, &server_id);

    if !scope.runtime().get_bool(&task_key) {
        match server.server().detach_volume(&volume_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(volume = %volume_id, server = %server_id, "volume already detached");
            }
            Err(e) => return Err(e),
        }
        scope.runtime_mut().set(task_key.as_str(), true);
    }

    let record = match scope.resource.get().await {
        Ok(record) => record,
        Err(e) if e.is_not_found() => json!({"status": "available"}),
        Err(e) => return Err(e),
    };
    match volume_status(&record).as_str() {
        "available" => {
            let runtime = scope.runtime_mut();
            runtime.remove(&task_key);
            runtime.remove(&tasks::attach_volume_id(&volume_id, &server_id));
            runtime.remove(&tasks::attach_volume_task(&volume_id, &server_id));
            runtime.remove("device_name");
            Ok(())
        }
        s if s.starts_with("error") => Err(OperationError::non_recoverable(format!(
            "volume {} failed to detach from server {} (status {})",
            volume_id, server_id, s
        ))),
        s => Err(scope.retry(
            format!("waiting for volume {} to detach (status {})", volume_id, s),
            VOLUME_RETRY,
        )),
    }
}

// --- server_connected_to_floating_ip (runs on the server) ---

async fn server_port_ids(server: &Resource) -> Result<Vec<String>> {
    Ok(server
        .server()
        .ports()
        .await?
        .iter()
        .filter_map(|port| record_str(port, "id").map(str::to_string))
        .collect())
}

pub async fn connect_floating_ip(scope: &mut Scope<'_>) -> Result<()> {
    let fip = scope.other_resource(ResourceKind::FloatingIp)?;
    let record = fip.get().await?;
    let address = record_str(&record, "floating_ip_address")
        .ok_or_else(|| {
            OperationError::non_recoverable(format!("floating ip {} has no address", fip.label()))
        })?
        .to_string();

    if let Some(port_id) = record_str(&record, "port_id") {
        if server_port_ids(&scope.resource).await?.iter().any(|p| p == port_id) {
            tracing::info!(address = %address, "floating ip already associated with this server");
            return Ok(());
        }
        return Err(OperationError::recoverable(format!(
            "floating ip {} is associated with port {}; it can only be reassigned once released",
            address, port_id
        )));
    }

    let fixed_ip = scope.input_str("fixed_ip").map(str::to_string);
    scope
        .resource
        .server()
        .add_floating_ip(&address, fixed_ip.as_deref())
        .await?;
    scope.other_mut()?.instance.runtime_properties.set("floating_ip_address", address.as_str());
    tracing::info!(server = scope.resource.label(), address = %address, "floating ip associated");
    Ok(())
}

pub async fn disconnect_floating_ip(scope: &mut Scope<'_>) -> Result<()> {
    let fip = scope.other_resource(ResourceKind::FloatingIp)?;
    let record = match fip.get().await {
        Ok(record) => record,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };
    let (Some(address), Some(port_id)) = (
        record_str(&record, "floating_ip_address"),
        record_str(&record, "port_id"),
    ) else {
        return Ok(());
    };
    if !server_port_ids(&scope.resource).await?.iter().any(|p| p == port_id) {
        return Ok(());
    }
    match scope.resource.server().remove_floating_ip(address).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

// --- server_connected_to_security_group (runs on the server) ---

async fn group_identity(scope: &Scope<'_>) -> Result<(String, String)> {
    let group = scope.other_resource(ResourceKind::SecurityGroup)?;
    let group_id = group.require_id()?.to_string();
    let recorded = scope
        .other()?
        .instance
        .runtime_properties
        .get_str(NAME)
        .map(str::to_string);
    let name = match recorded {
        Some(name) => name,
        None => record_str(&group.get().await?, "name")
            .unwrap_or(&group_id)
            .to_string(),
    };
    Ok((group_id, name))
}

pub async fn connect_security_group(scope: &mut Scope<'_>) -> Result<()> {
    let (_, name) = group_identity(scope).await?;
    let record = scope.resource.get().await?;
    let present = record
        .get("security_groups")
        .and_then(Value::as_array)
        .is_some_and(|groups| groups.iter().any(|g| record_str(g, "name") == Some(name.as_str())));
    if present {
        return Ok(());
    }
    scope.resource.server().add_security_group(&name).await
}

pub async fn disconnect_security_group(scope: &mut Scope<'_>) -> Result<()> {
    let (group_id, name) = group_identity(scope).await?;
    match scope.resource.server().remove_security_group(&name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    for port in scope.resource.server().ports().await? {
        let groups = string_list(port.get("security_groups"));
        if !groups.contains(&group_id) {
            continue;
        }
        let Some(port_id) = record_str(&port, "id") else {
            continue;
        };
        let remaining: Vec<String> = groups.into_iter().filter(|g| *g != group_id).collect();
        let mut body = Map::new();
        body.insert("security_groups".into(), json!(remaining));
        scope
            .resource
            .sibling(ResourceKind::Port, Some(port_id))
            .update(body)
            .await?;
        tracing::debug!(port = port_id, group = %group_id, "removed security group from port");
    }
    Ok(())
}
