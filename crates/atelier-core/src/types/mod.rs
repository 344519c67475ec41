//! Core type definitions for Atelier
//!
//! This module contains all shared types used across the runtime,
//! including session state, provider events, tool schemas and
//! auxiliary process descriptions.

mod event_types;
mod process_types;
mod session_types;
mod tool_types;

pub use event_types::*;
pub use process_types::*;
pub use session_types::*;
pub use tool_types::*;
