//! Tool catalog, argument validation and execution backends

mod adapter;
mod audit;
mod catalog;
mod client;
mod schema;

pub use adapter::{parse_adapter, type_schema, MAX_EXAMPLES, OPEN_TYPES};
pub use audit::{AuditSink, JsonlAuditSink, NullAuditSink};
pub use catalog::ToolCatalogBuilder;
pub use client::{CommandToolClient, ToolExecutionClient, UnconfiguredToolClient};
pub use schema::validate_args;

#[cfg(test)]
pub use audit::MockAuditSink;
#[cfg(test)]
pub use client::MockToolExecutionClient;
