//! Atelier Core Library
//!
//! This crate provides the agent session runtime for Atelier, including:
//! - Supervised agent CLI sessions speaking JSON lines over stdio
//! - The tool-call protocol with per-turn limits and schema validation
//! - Tool catalogs introspected from a Python adapter module
//! - Ordered start/stop of auxiliary engine and bridge workers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       atelier-core                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  runtime.rs    - AgentRuntime orchestrator                  │
//! │  runner/       - Agent sessions, tool-call protocol         │
//! │  provider/     - Provider trait, CLI provider, registry     │
//! │  tools/        - Catalog builder, validation, backends      │
//! │  process/      - Auxiliary worker fleet                     │
//! │  config.rs     - Runtime and per-project configuration      │
//! │  types/        - Shared type definitions                    │
//! │  error.rs      - Error types                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod provider;
pub mod runner;
pub mod runtime;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;

pub use config::{AgentLaunchConfig, RuntimeConfig, ToolCommandConfig};
pub use process::{ManagedProcess, ProcessManager, StopReport, SupervisedProcess};
pub use provider::{
    classify_line, CliProvider, CliProviderFactory, Provider, ProviderFactory, ProviderOptions,
    ProviderRegistry,
};
pub use runner::{AgentRunner, ToolCallProtocol};
pub use runtime::AgentRuntime;
pub use tools::{
    AuditSink, CommandToolClient, JsonlAuditSink, NullAuditSink, ToolCatalogBuilder,
    ToolExecutionClient,
};
