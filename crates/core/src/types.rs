use crate::error::{HostError, HostResult};
use crate::schema::Schema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unique identifier for a registered server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Check the naming rules: non-empty, no `.` (the method namespace separator)
    pub fn validate(&self) -> HostResult<()> {
        if self.0.is_empty() {
            return Err(HostError::InvalidId("server id must not be empty".to_string()));
        }
        if self.0.contains('.') {
            return Err(HostError::InvalidId(format!(
                "server id {} must not contain '.'",
                self.0
            )));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registered client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn validate(&self) -> HostResult<()> {
        if self.0.is_empty() {
            return Err(HostError::InvalidId("client id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Registered,
    Active,
    Unreachable,
    Unregistered,
}

/// Client lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Registered,
    Active,
    Unregistered,
}

/// Kind of capability a server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Tool,
    Resource,
}

impl std::str::FromStr for CapabilityKind {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(Self::Tool),
            "resource" => Ok(Self::Resource),
            other => Err(HostError::InvalidCapability(format!(
                "unsupported capability kind: {}",
                other
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({})
}

/// Capability as declared on the wire during registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub subscribable: bool,
    #[serde(default = "default_true")]
    pub requires_consent: bool,
}

impl CapabilityDescriptor {
    pub fn tool(name: impl Into<String>, input_schema: serde_json::Value) -> Self {
        Self {
            kind: "tool".to_string(),
            name: name.into(),
            description: None,
            input_schema,
            output_schema: None,
            subscribable: false,
            requires_consent: true,
        }
    }

    pub fn resource(name: impl Into<String>, subscribable: bool) -> Self {
        Self {
            kind: "resource".to_string(),
            name: name.into(),
            description: None,
            input_schema: default_input_schema(),
            output_schema: None,
            subscribable,
            requires_consent: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn without_consent(mut self) -> Self {
        self.requires_consent = false;
        self
    }
}

/// A validated capability: a named tool or resource with parsed schemas
#[derive(Debug, Clone, PartialEq)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Schema,
    pub output_schema: Option<Schema>,
    pub subscribable: bool,
    pub requires_consent: bool,
    /// Descriptor as declared, kept for introspection
    pub descriptor: CapabilityDescriptor,
}

impl Capability {
    /// Schemas and kind must agree for two declarations of the same name to be compatible
    pub fn conflicts_with(&self, other: &Capability) -> bool {
        self.kind != other.kind
            || self.input_schema != other.input_schema
            || self.output_schema != other.output_schema
    }
}

impl TryFrom<CapabilityDescriptor> for Capability {
    type Error = HostError;

    fn try_from(descriptor: CapabilityDescriptor) -> Result<Self, Self::Error> {
        let kind: CapabilityKind = descriptor.kind.parse()?;

        if descriptor.name.is_empty() {
            return Err(HostError::InvalidCapability(
                "capability name must not be empty".to_string(),
            ));
        }
        if kind == CapabilityKind::Tool && descriptor.subscribable {
            return Err(HostError::InvalidCapability(format!(
                "tool {} cannot be subscribable",
                descriptor.name
            )));
        }

        let input_schema = Schema::from_json(&descriptor.input_schema).map_err(|e| {
            HostError::InvalidCapability(format!("{}: input schema: {}", descriptor.name, e))
        })?;
        let output_schema = descriptor
            .output_schema
            .as_ref()
            .map(Schema::from_json)
            .transpose()
            .map_err(|e| {
                HostError::InvalidCapability(format!("{}: output schema: {}", descriptor.name, e))
            })?;

        Ok(Self {
            kind,
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema,
            output_schema,
            subscribable: descriptor.subscribable,
            requires_consent: descriptor.requires_consent,
            descriptor,
        })
    }
}

/// Point-in-time view of a registered server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: ServerId,
    pub status: ServerStatus,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Point-in-time view of a registered client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub status: ClientStatus,
    pub session_id: String,
    pub registered_at: DateTime<Utc>,
}

/// Capabilities keyed by name
pub type CapabilitySet = BTreeMap<String, Capability>;

/// Validate a list of descriptors into a capability set.
///
/// A name declared twice with different schemas is rejected; exact repeats collapse.
pub fn build_capability_set(descriptors: Vec<CapabilityDescriptor>) -> HostResult<CapabilitySet> {
    let mut set = CapabilitySet::new();
    for descriptor in descriptors {
        let capability = Capability::try_from(descriptor)?;
        if let Some(existing) = set.get(&capability.name) {
            if existing.conflicts_with(&capability) {
                return Err(HostError::InvalidCapability(format!(
                    "capability {} declared twice with different schemas",
                    capability.name
                )));
            }
            continue;
        }
        set.insert(capability.name.clone(), capability);
    }
    Ok(set)
}

/// Immutable, restartable snapshot of a collection.
///
/// Later mutations of the source never affect an existing snapshot; each call to
/// [`Snapshot::iter`] starts over from the first element.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    items: Arc<[T]>,
}

impl<T> Snapshot<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.to_vec()
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_id_rules() {
        assert!(ServerId::new("echo-srv").validate().is_ok());
        assert!(matches!(
            ServerId::new("a.b").validate(),
            Err(HostError::InvalidId(_))
        ));
        assert!(ServerId::new("").validate().is_err());
    }

    #[test]
    fn test_descriptor_defaults_from_wire() {
        let descriptor: CapabilityDescriptor = serde_json::from_value(json!({
            "kind": "tool",
            "name": "say"
        }))
        .unwrap();

        assert!(descriptor.requires_consent);
        assert!(!descriptor.subscribable);
        assert_eq!(descriptor.input_schema, json!({}));
    }

    #[test]
    fn test_unsupported_kind_rejected() {
        let mut descriptor = CapabilityDescriptor::tool("say", json!({}));
        descriptor.kind = "prompt".to_string();

        let err = Capability::try_from(descriptor).unwrap_err();
        assert!(matches!(err, HostError::InvalidCapability(_)));
    }

    #[test]
    fn test_subscribable_tool_rejected() {
        let mut descriptor = CapabilityDescriptor::tool("say", json!({}));
        descriptor.subscribable = true;

        assert!(Capability::try_from(descriptor).is_err());
    }

    #[test]
    fn test_capability_set_conflict() {
        let a = CapabilityDescriptor::tool("say", json!({"type": "string"}));
        let b = CapabilityDescriptor::tool("say", json!({"type": "number"}));

        assert!(build_capability_set(vec![a.clone(), a.clone()]).is_ok());
        assert!(build_capability_set(vec![a, b]).is_err());
    }

    #[test]
    fn test_snapshot_is_restartable() {
        let snapshot = Snapshot::new(vec![1, 2, 3]);

        let first: Vec<_> = snapshot.iter().copied().collect();
        let second: Vec<_> = (&snapshot).into_iter().copied().collect();
        assert_eq!(first, second);
        assert_eq!(snapshot.len(), 3);
    }
}
