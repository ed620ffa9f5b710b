//! Per-session planner items.
//!
//! A TODO belongs to one session and one agent kind. The physical `order`
//! field is dense within a session and only used for explicit reordering;
//! presentation order is computed by the store's smart sort.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a planner item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not started yet.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Finished.
    Completed,
}

impl TodoStatus {
    /// Sort rank: in-progress first, completed last.
    pub fn rank(self) -> u8 {
        match self {
            Self::InProgress => 3,
            Self::Pending => 2,
            Self::Completed => 1,
        }
    }

    /// Whether the item still needs work.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Stable string form matching the wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Priority of a planner item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    /// Urgent.
    High,
    /// Default.
    Medium,
    /// Can wait.
    Low,
}

impl TodoPriority {
    /// Sort rank: high first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

impl Default for TodoPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Which agent kind owns a planner item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoAgentType {
    /// The top-level agent loop.
    Main,
    /// The deep-search sub-agent.
    Search,
    /// The browser-automation sub-agent.
    Browser,
    /// The desktop-control sub-agent.
    Windows,
    /// Anything else.
    Custom,
}

impl Default for TodoAgentType {
    fn default() -> Self {
        Self::Main
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Item & payloads
// ─────────────────────────────────────────────────────────────────────────────

/// A durable planner item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Unique id.
    pub id: String,
    /// Owning session, set by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Agent kind that owns this item.
    #[serde(default)]
    pub agent_type: TodoAgentType,
    /// Short title.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current status.
    pub status: TodoStatus,
    /// Priority.
    #[serde(default)]
    pub priority: TodoPriority,
    /// Dense physical position within the session.
    pub order: usize,
    /// Creation time, seconds since the epoch.
    pub created_at: f64,
    /// Last update time, seconds since the epoch.
    pub updated_at: f64,
    /// Status before the most recent status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<TodoStatus>,
}

/// Payload for creating a planner item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoCreate {
    /// Short title.
    pub title: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Initial status, pending when omitted.
    #[serde(default)]
    pub status: Option<TodoStatus>,
    /// Priority, medium when omitted.
    #[serde(default)]
    pub priority: Option<TodoPriority>,
    /// Owning agent kind, main when omitted.
    #[serde(default)]
    pub agent_type: Option<TodoAgentType>,
}

impl TodoCreate {
    /// Create a payload with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial update for a planner item. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New status.
    #[serde(default)]
    pub status: Option<TodoStatus>,
    /// New priority.
    #[serde(default)]
    pub priority: Option<TodoPriority>,
}

impl TodoPatch {
    /// A patch that only changes the status.
    pub fn status(status: TodoStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranks_order_in_progress_first() {
        assert!(TodoStatus::InProgress.rank() > TodoStatus::Pending.rank());
        assert!(TodoStatus::Pending.rank() > TodoStatus::Completed.rank());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TodoStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn item_tolerates_missing_optional_fields() {
        let json = r#"{
            "id": "t1",
            "title": "do it",
            "status": "pending",
            "order": 0,
            "created_at": 1.0,
            "updated_at": 1.0
        }"#;
        let item: TodoItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.priority, TodoPriority::Medium);
        assert_eq!(item.agent_type, TodoAgentType::Main);
        assert!(item.previous_status.is_none());
    }

    #[test]
    fn patch_status_helper() {
        let patch = TodoPatch::status(TodoStatus::Completed);
        assert_eq!(patch.status, Some(TodoStatus::Completed));
        assert!(patch.title.is_none());
    }
}
