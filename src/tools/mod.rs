//! Request and response bodies shared by the HTTP endpoints and MCP tools.

pub mod ask;
pub mod connect;
pub mod query;
pub mod schema;

pub use ask::{AskRequest, HistoryResponse};
pub use connect::{ConnectRequest, ConnectResponse};
pub use query::{QueryRequest, QueryResponse};
pub use schema::{SchemaOverviewResponse, SchemaResponse};

/// A required string field: present and not blank after trimming.
pub(crate) fn required(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
