// Connections from the host to registered servers

pub mod http;
pub mod local;

pub use http::HttpConnection;
pub use local::{
    handler_fn, json_schema_array, json_schema_boolean, json_schema_number, json_schema_object,
    json_schema_string, CapabilityHandler, LocalServer,
};
