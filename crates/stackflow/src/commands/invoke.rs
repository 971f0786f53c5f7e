use crate::console::ConsoleLogger;
use anyhow::{Context, bail};
use colored::Colorize;
use serde_json::{Map, Value, json};
use stackflow_cloud::{ClientFactory, MemoryCloud};
use stackflow_cloud_openstack::OpenStackConnector;
use stackflow_core::{Entity, OperationContext, OperationError, Plugin};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Exit code for a recoverable failure
pub const EXIT_RECOVERABLE: i32 = 2;
/// Exit code when the operation asks to be retried
pub const EXIT_RETRY: i32 = 3;

pub struct Request {
    pub context: PathBuf,
    pub operation: Option<String>,
    pub inputs: Option<PathBuf>,
    pub memory: Option<PathBuf>,
    pub write_back: bool,
}

fn load_context(path: &Path) -> anyhow::Result<OperationContext> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read context {}", path.display()))?;
    let mut ctx: OperationContext = serde_json::from_str(&raw)
        .with_context(|| format!("invalid context {}", path.display()))?;
    ctx.logger = Arc::new(ConsoleLogger);
    Ok(ctx)
}

/// Inputs file parsed as YAML, which also accepts JSON
fn load_inputs(path: Option<&Path>) -> anyhow::Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read inputs {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("invalid inputs {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => bail!("inputs {} must be a mapping", path.display()),
    }
}

fn save_context(path: &Path, ctx: &OperationContext) -> anyhow::Result<()> {
    let raw = serde_json::to_string_pretty(ctx)?;
    std::fs::write(path, raw).with_context(|| format!("failed to write context {}", path.display()))
}

/// Run the operation and report the outcome; returns the process exit code
pub async fn handle(request: Request) -> anyhow::Result<i32> {
    let mut ctx = load_context(&request.context)?;
    if let Some(operation) = request.operation {
        ctx.operation.name = operation;
    }
    if ctx.operation.name.is_empty() {
        bail!("no operation given and none in the context");
    }
    let inputs = load_inputs(request.inputs.as_deref())?;

    let memory = match &request.memory {
        Some(path) => Some(MemoryCloud::load(path)?),
        None => None,
    };
    let factory: Arc<dyn ClientFactory> = match &memory {
        Some(cloud) => Arc::new(cloud.clone()),
        None => Arc::new(OpenStackConnector::new()),
    };

    tracing::debug!(operation = %ctx.operation.name, "invoking");
    let result = Plugin::new(factory).invoke(&mut ctx, inputs).await;

    if let (Some(cloud), Some(path)) = (&memory, &request.memory) {
        cloud.save(path)?;
    }
    if request.write_back {
        save_context(&request.context, &ctx)?;
    }

    let code = report(&ctx.operation.name, result);
    println!("{}", serde_json::to_string_pretty(&runtime_summary(&ctx))?);
    Ok(code)
}

/// Runtime properties after the operation, per endpoint
fn runtime_summary(ctx: &OperationContext) -> Value {
    match &ctx.entity {
        Entity::Node(endpoint) => json!(endpoint.instance.runtime_properties),
        Entity::Relationship(rel) => json!({
            "source": rel.source.instance.runtime_properties,
            "target": rel.target.instance.runtime_properties,
        }),
    }
}

fn report(operation: &str, result: Result<(), OperationError>) -> i32 {
    match result {
        Ok(()) => {
            eprintln!("{} {}", "✓".green().bold(), operation);
            0
        }
        Err(err) => {
            let class = err.class();
            let detail = match err.retry_after() {
                Some(delay) => format!("{} (retry after {}s)", err, delay.as_secs()),
                None => err.to_string(),
            };
            if err.is_retry() {
                eprintln!("{} {}: {}", "↻".yellow().bold(), class.yellow(), detail);
                EXIT_RETRY
            } else if err.is_recoverable() {
                eprintln!("{} {}: {}", "✗".yellow().bold(), class.yellow(), detail);
                EXIT_RECOVERABLE
            } else {
                eprintln!("{} {}: {}", "✗".red().bold(), class.red(), detail);
                1
            }
        }
    }
}
