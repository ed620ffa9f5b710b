//! Agent core for the Vesper runtime.
//!
//! This crate wires the orchestration machinery together: the [`Agent`] main
//! loop, the generic [`subagent`] runtime, the [`ToolManager`] registry and
//! dispatcher, large-result [`truncate`] handling, and the typed
//! [`event`] stream consumed by front-end adapters.

pub mod agent;
pub mod error;
pub mod event;
pub mod manager;
pub mod prompt;
pub mod subagent;
pub mod tool;
pub mod tools;
pub mod truncate;

pub use agent::{Agent, AgentRequest};
pub use error::{AgentError, Result};
pub use event::{AgentEvent, EventSender, event_channel};
pub use manager::{DispatchedCall, ToolManager};
pub use subagent::{
    CompactReport, InlineReportPolicy, PersistedReportPolicy, ReportPolicy, SubAgentConfig,
    SubAgentDeps, SubAgentRuntime,
};
pub use tool::{Tool, ToolErrorKind, ToolOutput};
