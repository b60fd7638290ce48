// MCP host: routes JSON-RPC 2.0 calls from clients to registered servers,
// enforcing registration, capability schemas and consent on the way.

pub mod host;
pub mod protocol;
pub mod router;
pub mod upstream;

pub use host::{Host, HostSettings};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RegistrationResponse, RegistrationStatus,
    RequestId, ServerRegistration,
};
pub use router::{CancelOutcome, RequestState, RouteOutcome, Router, RouterConfig};
pub use upstream::{handler_fn, CapabilityHandler, HttpConnection, LocalServer};
