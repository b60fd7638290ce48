//! Error taxonomy shared by every host component.

use crate::types::{ClientId, ServerId};
use serde_json::Value;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors surfaced by the registry, consent store, router and host facade.
///
/// Every variant maps to a stable JSON-RPC error code (see [`HostError::code`]),
/// so a client always sees the same code for the same kind of failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    /// Envelope is not valid JSON-RPC 2.0.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// No server is registered under the addressed id.
    #[error("Unknown server: {0}")]
    UnknownServer(ServerId),

    /// The server exists but does not declare the capability.
    #[error("Unknown capability {capability} on server {server_id}")]
    UnknownCapability {
        server_id: ServerId,
        capability: String,
    },

    /// Params do not match the capability's input schema.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// No live consent grant covers the (client, server, capability) triple.
    #[error("Consent denied: client {client_id} may not invoke {server_id}.{capability}")]
    ConsentDenied {
        client_id: ClientId,
        server_id: ServerId,
        capability: String,
    },

    /// Re-registration conflicts with the existing entry.
    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    /// Lookup miss for a client, server or consent record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A declared capability is not supported.
    #[error("Invalid capability: {0}")]
    InvalidCapability(String),

    /// Identifier does not satisfy the naming rules.
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// The client already has an outstanding request with this id.
    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    /// The server did not answer within the dispatch timeout.
    #[error("Upstream timed out after {timeout_ms} ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// The server answered with an error, or transport retries were exhausted.
    #[error("Upstream error ({code}): {message}")]
    UpstreamError {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Network or connection failure talking to a server.
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl HostError {
    pub const MALFORMED_REQUEST: i64 = -32600;
    pub const SCHEMA_VIOLATION: i64 = -32602;
    pub const UNKNOWN_SERVER: i64 = -32001;
    pub const UNKNOWN_CAPABILITY: i64 = -32002;
    pub const CONSENT_DENIED: i64 = -32003;
    pub const DUPLICATE_ID: i64 = -32004;
    pub const NOT_FOUND: i64 = -32005;
    pub const INVALID_CAPABILITY: i64 = -32006;
    pub const UPSTREAM_TIMEOUT: i64 = -32007;
    pub const DUPLICATE_REQUEST_ID: i64 = -32008;
    pub const UPSTREAM_ERROR: i64 = -32010;
    pub const TRANSPORT_ERROR: i64 = -32011;

    /// Stable JSON-RPC error code for this kind of failure.
    pub fn code(&self) -> i64 {
        match self {
            Self::MalformedRequest(_) | Self::InvalidId(_) => Self::MALFORMED_REQUEST,
            Self::UnknownServer(_) => Self::UNKNOWN_SERVER,
            Self::UnknownCapability { .. } => Self::UNKNOWN_CAPABILITY,
            Self::SchemaViolation(_) => Self::SCHEMA_VIOLATION,
            Self::ConsentDenied { .. } => Self::CONSENT_DENIED,
            Self::DuplicateId(_) => Self::DUPLICATE_ID,
            Self::NotFound(_) => Self::NOT_FOUND,
            Self::InvalidCapability(_) => Self::INVALID_CAPABILITY,
            Self::DuplicateRequestId(_) => Self::DUPLICATE_REQUEST_ID,
            Self::UpstreamTimeout { .. } => Self::UPSTREAM_TIMEOUT,
            Self::UpstreamError { .. } => Self::UPSTREAM_ERROR,
            Self::TransportError(_) => Self::TRANSPORT_ERROR,
        }
    }

    /// Short machine-readable name, used in events and error data.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::UnknownServer(_) => "unknown_server",
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::SchemaViolation(_) => "schema_violation",
            Self::ConsentDenied { .. } => "consent_denied",
            Self::DuplicateId(_) => "duplicate_id",
            Self::NotFound(_) => "not_found",
            Self::InvalidCapability(_) => "invalid_capability",
            Self::InvalidId(_) => "invalid_id",
            Self::DuplicateRequestId(_) => "duplicate_request_id",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamError { .. } => "upstream_error",
            Self::TransportError(_) => "transport_error",
        }
    }

    /// Structured payload for the JSON-RPC `error.data` field.
    ///
    /// Always carries `kind`; upstream failures also carry the server's own code and data.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::UpstreamError { code, data, .. } => Some(serde_json::json!({
                "kind": self.kind(),
                "upstreamCode": code,
                "upstreamData": data,
            })),
            _ => Some(serde_json::json!({ "kind": self.kind() })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_per_kind() {
        let errors = vec![
            HostError::MalformedRequest("x".into()),
            HostError::UnknownServer(ServerId::new("s")),
            HostError::UnknownCapability {
                server_id: ServerId::new("s"),
                capability: "c".into(),
            },
            HostError::SchemaViolation("x".into()),
            HostError::ConsentDenied {
                client_id: ClientId::new("c"),
                server_id: ServerId::new("s"),
                capability: "c".into(),
            },
            HostError::DuplicateId("x".into()),
            HostError::NotFound("x".into()),
            HostError::InvalidCapability("x".into()),
            HostError::DuplicateRequestId("1".into()),
            HostError::UpstreamTimeout { timeout_ms: 10 },
            HostError::UpstreamError {
                code: 1,
                message: "x".into(),
                data: None,
            },
            HostError::TransportError("x".into()),
        ];

        let mut codes: Vec<i64> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_invalid_id_reports_as_malformed() {
        assert_eq!(
            HostError::InvalidId("a.b".into()).code(),
            HostError::MALFORMED_REQUEST
        );
    }
}
