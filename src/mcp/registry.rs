//! Process-local catalog of tool definitions.
//!
//! [`ToolRegistry`] maps `(agent_id, tool_name)` to a [`ToolDefinition`]
//! describing the tool's parameters, version and tags. It is the single source
//! of truth for argument validation: the server consults it before invoking a
//! handler, and peers can inspect it through `tools/list` and `/capabilities`.
//!
//! The registry wraps a `HashMap` behind `Arc<Mutex<..>>` so one instance can
//! be cloned into every component of a process. There is no persistence and no
//! global instance; callers construct one and pass it around.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version assigned to definitions that do not declare one.
pub const DEFAULT_TOOL_VERSION: &str = "1.0.0";

fn default_version() -> String {
    DEFAULT_TOOL_VERSION.to_string()
}

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }
}

/// Constraints on a single named parameter.
///
/// `min`/`max` bound the value for numeric types and the length for strings
/// and arrays. `pattern` is a regex searched (not anchored) in string values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: false,
            min: None,
            max: None,
            pattern: None,
            allowed: None,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(ParamType::String)
    }

    pub fn number() -> Self {
        Self::new(ParamType::Number)
    }

    pub fn integer() -> Self {
        Self::new(ParamType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(ParamType::Boolean)
    }

    pub fn object() -> Self {
        Self::new(ParamType::Object)
    }

    pub fn array() -> Self {
        Self::new(ParamType::Array)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn one_of(mut self, allowed: Vec<Value>) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Reject schemas that cannot be evaluated, compiling the pattern once.
    fn compile(&self, field: &str) -> Result<Option<Regex>, String> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(format!("malformed schema for '{field}': min {min} > max {max}"));
            }
        }
        self.pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("malformed schema for '{field}': bad pattern: {e}"))
    }

    /// Check one provided value against this spec.
    fn check(&self, field: &str, value: &Value, pattern: Option<&Regex>) -> Result<(), String> {
        if !self.param_type.matches(value) {
            return Err(format!(
                "'{field}' must be of type {:?}",
                self.param_type
            ));
        }

        let measured = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::Array(items) => Some(items.len() as f64),
            _ => None,
        };
        if let Some(measured) = measured {
            if let Some(min) = self.min {
                if measured < min {
                    return Err(format!("'{field}' is below the minimum of {min}"));
                }
            }
            if let Some(max) = self.max {
                if measured > max {
                    return Err(format!("'{field}' is above the maximum of {max}"));
                }
            }
        }

        if let (Some(re), Some(s)) = (pattern, value.as_str()) {
            if !re.is_match(s) {
                return Err(format!("'{field}' does not match pattern {}", re.as_str()));
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(format!("'{field}' is not one of the allowed values"));
            }
        }

        Ok(())
    }
}

/// Descriptor of one operation an agent exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ToolDefinition {
    /// A definition with no parameters, no tags and the default version.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_id: String::new(),
            description: description.into(),
            parameters: BTreeMap::new(),
            version: default_version(),
            tags: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Validate `params` against a parameter schema.
///
/// `Null` is treated as an empty argument object. Fields not declared in the
/// schema are accepted as-is.
pub fn validate_arguments(
    schema: &BTreeMap<String, ParamSpec>,
    params: &Value,
) -> Result<(), String> {
    let empty = serde_json::Map::new();
    let args = match params {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err("arguments must be a JSON object".to_string()),
    };

    for (field, spec) in schema {
        let pattern = spec.compile(field)?;
        match args.get(field) {
            Some(value) => spec.check(field, value, pattern.as_ref())?,
            None if spec.required => {
                return Err(format!("missing required parameter '{field}'"));
            }
            None => {}
        }
    }

    Ok(())
}

type ToolKey = (String, String);

/// Catalog of tool definitions keyed by `(agent_id, name)`.
///
/// Cheap to clone; all clones share the same underlying map.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<Mutex<HashMap<ToolKey, ToolDefinition>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the definition for `(agent_id, name)`.
    ///
    /// The stored definition's `agent_id` and `name` are taken from the
    /// arguments, so the key and the value can never disagree.
    pub fn register_agent_tool(&self, agent_id: &str, name: &str, mut definition: ToolDefinition) {
        definition.agent_id = agent_id.to_string();
        definition.name = name.to_string();

        let mut tools = self.tools.lock().unwrap();
        let replaced = tools
            .insert((agent_id.to_string(), name.to_string()), definition)
            .is_some();
        tracing::debug!(agent_id, tool = name, replaced, "Registered tool");
    }

    /// Remove one tool. Returns `true` if it was registered.
    pub fn unregister_agent_tool(&self, agent_id: &str, name: &str) -> bool {
        let mut tools = self.tools.lock().unwrap();
        tools
            .remove(&(agent_id.to_string(), name.to_string()))
            .is_some()
    }

    /// Remove every tool owned by `agent_id`. Returns how many were removed.
    pub fn unregister_agent(&self, agent_id: &str) -> usize {
        let mut tools = self.tools.lock().unwrap();
        let before = tools.len();
        tools.retain(|(owner, _), _| owner != agent_id);
        before - tools.len()
    }

    pub fn get_tool(&self, agent_id: &str, name: &str) -> Option<ToolDefinition> {
        let tools = self.tools.lock().unwrap();
        tools.get(&(agent_id.to_string(), name.to_string())).cloned()
    }

    pub fn get_agent_tools(&self, agent_id: &str) -> Vec<ToolDefinition> {
        self.collect(|def| def.agent_id == agent_id)
    }

    pub fn get_all_tools(&self) -> Vec<ToolDefinition> {
        self.collect(|_| true)
    }

    /// All definitions with this name, across agents.
    pub fn find_tools_by_name(&self, name: &str) -> Vec<ToolDefinition> {
        self.collect(|def| def.name == name)
    }

    /// Definitions carrying at least one of `tags`.
    pub fn find_tools_by_tags(&self, tags: &[&str]) -> Vec<ToolDefinition> {
        self.collect(|def| def.tags.iter().any(|t| tags.contains(&t.as_str())))
    }

    /// Check a prospective call against the registered schema.
    ///
    /// Fails closed: an unknown tool or a malformed schema yields `false`.
    pub fn validate_tool_call(&self, agent_id: &str, name: &str, params: &Value) -> bool {
        let Some(definition) = self.get_tool(agent_id, name) else {
            tracing::debug!(agent_id, tool = name, "Validation against unknown tool");
            return false;
        };

        match validate_arguments(&definition.parameters, params) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(agent_id, tool = name, %reason, "Tool call rejected");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot matching definitions, sorted by `(agent_id, name)`.
    fn collect(&self, keep: impl Fn(&ToolDefinition) -> bool) -> Vec<ToolDefinition> {
        let tools = self.tools.lock().unwrap();
        let mut found: Vec<ToolDefinition> = tools.values().filter(|d| keep(d)).cloned().collect();
        found.sort_by(|a, b| (&a.agent_id, &a.name).cmp(&(&b.agent_id, &b.name)));
        found
    }
}
