//! Auxiliary worker supervision
//!
//! This module handles:
//! - Launching engine/bridge workers in declared order
//! - Reverse-order graceful shutdown
//! - Bounded stderr capture for diagnostics

mod lines;
mod managed;
mod manager;
mod ring;
mod terminate;

pub use lines::next_line_lossy;
pub use managed::{ManagedProcess, SupervisedProcess, PROJECT_ID_ENV};
pub use manager::{ProcessManager, StopReport};
pub use ring::StderrRing;
pub use terminate::terminate_child;
