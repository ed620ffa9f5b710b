//! Shared types for the Vesper agent runtime.
//!
//! This crate holds the data model that flows between the agent loop, the
//! LLM client, the memory manager and the stores: chat messages with their
//! tool-call payloads, and the per-session planner items.

pub mod message;
pub mod todo;

pub use message::{
    ContentPart, ImageRef, Message, MessageContent, Role, ToolCallFunction, ToolCallRequest,
};
pub use todo::{TodoAgentType, TodoCreate, TodoItem, TodoPatch, TodoPriority, TodoStatus};
