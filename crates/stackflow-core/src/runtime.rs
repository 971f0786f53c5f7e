//! Runtime properties
//!
//! The per-instance key/value map the host persists between operation
//! invocations. It is the only durable store the plugin has: identity keys,
//! exported attributes and async task markers all live here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ID: &str = "id";
pub const NAME: &str = "name";
pub const TYPE: &str = "type";
pub const EXTERNAL_RESOURCE: &str = "external_resource";
pub const EXTERNAL_ID: &str = "external_id";
pub const EXTERNAL_NAME: &str = "external_name";
pub const EXTERNAL_TYPE: &str = "external_type";
pub const CONDITIONALLY_CREATED: &str = "conditionally_created";
pub const RESOURCE_CONFIG: &str = "resource_config";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeProperties(Map<String, Value>);

impl RuntimeProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Non-empty string value
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Resource id recorded by a previous create or adoption
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID)
    }

    pub fn is_external(&self) -> bool {
        self.get_bool(EXTERNAL_RESOURCE)
    }

    pub fn is_conditionally_created(&self) -> bool {
        self.get_bool(CONDITIONALLY_CREATED)
    }
}

impl From<Map<String, Value>> for RuntimeProperties {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let mut props = RuntimeProperties::new();
        props.set(ID, "abc");
        props.set(EXTERNAL_RESOURCE, true);
        props.set(NAME, "");

        assert_eq!(props.id(), Some("abc"));
        assert!(props.is_external());
        assert_eq!(props.get_str(NAME), None);
        assert!(!props.is_conditionally_created());

        props.clear();
        assert!(props.is_empty());
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut props = RuntimeProperties::new();
        props.set("fixed_ips", json!(["10.0.0.1"]));
        assert_eq!(serde_json::to_value(&props).unwrap(), json!({"fixed_ips": ["10.0.0.1"]}));
    }
}
