//! Agent session runner and the tool-call protocol it drives

mod agent_runner;
mod protocol;
mod waiters;

pub use agent_runner::AgentRunner;
pub use protocol::{CallContext, ToolCallProtocol, TurnTracker, ANONYMOUS_TURN, MAX_CALLS_EXCEEDED};
pub use waiters::WaiterTable;
