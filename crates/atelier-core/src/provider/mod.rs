//! Agent provider abstraction
//!
//! A provider wraps one external agent CLI. It owns the process's stdio,
//! turns output lines into [`ProviderEvent`](crate::types::ProviderEvent)s
//! and accepts outbound JSON lines.
//!
//! - `Provider` / `ProviderFactory` - the pluggable seam
//! - `CliProvider` - the reference implementation
//! - `ProviderRegistry` - name-keyed factory lookup

mod classify;
mod cli;
mod registry;
pub mod traits;
mod transport;

pub use classify::classify_line;
pub use cli::{CliProvider, CliProviderFactory, CONTEXT_PACK_ENV, SESSION_ID_ENV};
pub use registry::{ProviderRegistry, ResolvedProvider, CLI_PROVIDER};
pub use traits::{Provider, ProviderFactory, ProviderOptions};
pub use transport::Transport;
