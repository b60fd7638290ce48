// JSON-RPC 2.0 envelopes and registration wire types

use mcphub_core::{CapabilityDescriptor, HostError, HostResult, ServerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Caller-chosen request id (string or integer)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Accept a raw `id` member; `null`, fractions, booleans and structures are rejected
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<RequestId> for Value {
    fn from(id: RequestId) -> Self {
        match id {
            RequestId::Number(n) => Value::from(n),
            RequestId::String(s) => Value::String(s),
        }
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Parse and validate a raw envelope
    pub fn parse(raw: &Value) -> HostResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| malformed("request must be a JSON object"))?;

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(_) => return Err(malformed("jsonrpc must be \"2.0\"")),
            None => return Err(malformed("missing jsonrpc version")),
        }

        let id = match obj.get("id") {
            Some(value) => RequestId::from_value(value)
                .ok_or_else(|| malformed("id must be a string or an integer"))?,
            None => return Err(malformed("missing id")),
        };

        let method = match obj.get("method") {
            Some(Value::String(m)) if !m.is_empty() => m.clone(),
            Some(_) => return Err(malformed("method must be a non-empty string")),
            None => return Err(malformed("missing method")),
        };

        let params = match obj.get("params") {
            None => None,
            Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p.clone()),
            Some(_) => return Err(malformed("params must be an object or an array")),
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params,
        })
    }

    /// Split `<serverId>.<capabilityName>` at the first `.`
    pub fn target(&self) -> HostResult<(ServerId, &str)> {
        match self.method.split_once('.') {
            Some((server, capability)) if !server.is_empty() && !capability.is_empty() => {
                Ok((ServerId::new(server), capability))
            }
            _ => Err(malformed(format!(
                "method {} is not of the form <serverId>.<capability>",
                self.method
            ))),
        }
    }
}

fn malformed(reason: impl Into<String>) -> HostError {
    HostError::MalformedRequest(reason.into())
}

/// Best-effort id extraction for error replies to envelopes that failed to parse
pub fn reply_id(raw: &Value) -> Value {
    raw.get("id")
        .and_then(RequestId::from_value)
        .map(Value::from)
        .unwrap_or(Value::Null)
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;

    /// Body was not JSON at all; answered with a null id
    pub fn parse_error(reason: impl std::fmt::Display) -> Self {
        Self {
            code: Self::PARSE_ERROR,
            message: format!("Parse error: {}", reason),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: Self::METHOD_NOT_FOUND,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }
}

impl From<&HostError> for JsonRpcError {
    fn from(err: &HostError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: err.data(),
        }
    }
}

// Registration protocol

/// Server registration request: `{id, capabilities[]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRegistration {
    pub id: ServerId,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Registered,
    Rejected,
}

/// Registration reply: `{status: "registered"|"rejected", reason?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RegistrationResponse {
    pub fn registered() -> Self {
        Self {
            status: RegistrationStatus::Registered,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: RegistrationStatus::Rejected,
            reason: Some(reason.into()),
        }
    }

    pub fn from_result<T>(result: &HostResult<T>) -> Self {
        match result {
            Ok(_) => Self::registered(),
            Err(e) => Self::rejected(e.to_string()),
        }
    }
}
