// Core types and components for the mcphub host: registry, consent, context, events

pub mod connection;
pub mod consent;
pub mod context;
pub mod error;
pub mod events;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod types;

pub use error::{HostError, HostResult};
pub use types::*;
