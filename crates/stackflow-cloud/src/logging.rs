//! Bridge from `tracing` events to the host logger
//!
//! The host hands every operation a logger. SDK and plugin code log through
//! `tracing`; while an operation runs, the dispatcher installs a subscriber
//! built by [`bridge_dispatch`] so that events reach the host logger at their
//! numeric level.
//!
//! Targets are grouped by prefix:
//!
//! - `openstack.*`: REST client (SDK) events, DEBUG by default
//! - `keystoneauth.*`: authentication events, pinned at WARNING
//! - `stackflow*`: plugin events, DEBUG by default

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

pub const SDK_GROUP: &str = "openstack";
pub const AUTH_GROUP: &str = "keystoneauth";
pub const PLUGIN_GROUP: &str = "stackflow";

/// Numeric log level (10 = DEBUG, 20 = INFO, 30 = WARNING, 40 = ERROR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogLevel(pub u8);

impl LogLevel {
    pub const TRACE: LogLevel = LogLevel(5);
    pub const DEBUG: LogLevel = LogLevel(10);
    pub const INFO: LogLevel = LogLevel(20);
    pub const WARNING: LogLevel = LogLevel(30);
    pub const ERROR: LogLevel = LogLevel(40);
    pub const CRITICAL: LogLevel = LogLevel(50);

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::TRACE),
            "DEBUG" => Some(Self::DEBUG),
            "INFO" => Some(Self::INFO),
            "WARN" | "WARNING" => Some(Self::WARNING),
            "ERROR" => Some(Self::ERROR),
            "CRITICAL" | "FATAL" => Some(Self::CRITICAL),
            other => other.parse::<u8>().ok().map(LogLevel),
        }
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0..=9 => "TRACE",
            10..=19 => "DEBUG",
            20..=29 => "INFO",
            30..=39 => "WARNING",
            40..=49 => "ERROR",
            _ => "CRITICAL",
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        if level == Level::ERROR {
            LogLevel::ERROR
        } else if level == Level::WARN {
            LogLevel::WARNING
        } else if level == Level::INFO {
            LogLevel::INFO
        } else if level == Level::DEBUG {
            LogLevel::DEBUG
        } else {
            LogLevel::TRACE
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u8),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(LogLevel(n)),
            Raw::Name(name) => LogLevel::parse(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown log level: {}", name))),
        }
    }
}

/// `client_config.logging`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Forward SDK log records to the host logger
    #[serde(default = "default_true")]
    pub use_cfy_logger: bool,

    /// Level per logger group (target prefix)
    #[serde(default)]
    pub groups: BTreeMap<String, LogLevel>,

    /// Level per individual logger (exact or more specific prefix)
    #[serde(default)]
    pub loggers: BTreeMap<String, LogLevel>,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            use_cfy_logger: true,
            groups: BTreeMap::new(),
            loggers: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Effective prefix → threshold table
    pub fn level_map(&self) -> LevelMap {
        let mut levels = BTreeMap::new();
        levels.insert(PLUGIN_GROUP.to_string(), LogLevel::DEBUG);
        if self.use_cfy_logger {
            levels.insert(SDK_GROUP.to_string(), LogLevel::DEBUG);
        }

        for (name, level) in self.groups.iter().chain(self.loggers.iter()) {
            let is_sdk = name.starts_with(SDK_GROUP) || name.starts_with(AUTH_GROUP);
            if is_sdk && !self.use_cfy_logger {
                continue;
            }
            levels.insert(name.clone(), *level);
        }

        // Authentication records carry credentials at DEBUG
        if self.use_cfy_logger {
            levels.retain(|name, _| !name.starts_with(AUTH_GROUP));
            levels.insert(AUTH_GROUP.to_string(), LogLevel::WARNING);
        }

        let mut entries: Vec<(String, LogLevel)> = levels.into_iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        LevelMap { entries }
    }
}

/// Prefix table resolved from [`LoggingConfig`], longest prefix first
#[derive(Debug, Clone)]
pub struct LevelMap {
    entries: Vec<(String, LogLevel)>,
}

impl LevelMap {
    /// Minimum level forwarded for `target`, `None` when the target is not
    /// forwarded at all
    pub fn threshold(&self, target: &str) -> Option<LogLevel> {
        self.entries
            .iter()
            .find(|(prefix, _)| target.starts_with(prefix.as_str()))
            .map(|(_, level)| *level)
    }
}

/// Logger supplied by the host for one operation
pub trait HostLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Drops every record
#[derive(Debug, Default)]
pub struct DiscardLogger;

impl HostLogger for DiscardLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|(_, line)| line.contains(needle))
    }
}

impl HostLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, message.to_string()));
        }
    }
}

/// `tracing` layer forwarding matching events to a [`HostLogger`]
pub struct HostLogLayer {
    logger: Arc<dyn HostLogger>,
    levels: LevelMap,
}

impl HostLogLayer {
    pub fn new(logger: Arc<dyn HostLogger>, config: &LoggingConfig) -> Self {
        Self {
            logger,
            levels: config.level_map(),
        }
    }
}

impl<S: Subscriber> Layer<S> for HostLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());
        let Some(threshold) = self.levels.threshold(metadata.target()) else {
            return;
        };
        if level < threshold {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.logger.log(level, &visitor.finish());
    }
}

/// Subscriber routing one operation's events into the host logger
pub fn bridge_dispatch(logger: Arc<dyn HostLogger>, config: &LoggingConfig) -> tracing::Dispatch {
    let subscriber = Registry::default().with(HostLogLayer::new(logger, config));
    tracing::Dispatch::new(subscriber)
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_level_map() {
        let map = LoggingConfig::default().level_map();
        assert_eq!(map.threshold("openstack.compute"), Some(LogLevel::DEBUG));
        assert_eq!(map.threshold("keystoneauth.identity"), Some(LogLevel::WARNING));
        assert_eq!(map.threshold("stackflow_core::dispatch"), Some(LogLevel::DEBUG));
        assert_eq!(map.threshold("hyper::client"), None);
    }

    #[test]
    fn test_auth_group_stays_pinned() {
        let config: LoggingConfig = serde_json::from_value(json!({
            "groups": {"keystoneauth": "DEBUG", "openstack": "INFO"},
            "loggers": {"openstack.network": 10}
        }))
        .unwrap();
        let map = config.level_map();
        assert_eq!(map.threshold("keystoneauth.session"), Some(LogLevel::WARNING));
        assert_eq!(map.threshold("openstack.compute"), Some(LogLevel::INFO));
        assert_eq!(map.threshold("openstack.network"), Some(LogLevel::DEBUG));
    }

    #[test]
    fn test_sdk_not_forwarded_without_flag() {
        let config: LoggingConfig =
            serde_json::from_value(json!({"use_cfy_logger": false})).unwrap();
        let map = config.level_map();
        assert_eq!(map.threshold("openstack.compute"), None);
        assert_eq!(map.threshold("stackflow_core::server"), Some(LogLevel::DEBUG));
    }

    #[test]
    fn test_bridge_forwards_events() {
        let logger = Arc::new(RecordingLogger::new());
        let dispatch = bridge_dispatch(logger.clone(), &LoggingConfig::default());

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(target: "openstack.compute", server = "s1", "GET servers");
            tracing::debug!(target: "keystoneauth.identity", "token issued");
            tracing::warn!(target: "unrelated", "ignored");
        });

        let records = logger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, LogLevel::INFO);
        assert_eq!(records[0].1, "GET servers server=s1");
    }
}
