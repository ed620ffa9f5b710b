//! Planner tools over the [`TodoStore`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::manager::ToolManager;
use crate::tool::{Tool, ToolErrorKind, ToolOutput};
use vesper_store::TodoStore;
use vesper_types::{TodoCreate, TodoPatch};

/// Register the five planner tools.
pub fn register(manager: &mut ToolManager, todos: Arc<TodoStore>) {
    manager.register(ListTodos {
        todos: Arc::clone(&todos),
    });
    manager.register(CreateTodo {
        todos: Arc::clone(&todos),
    });
    manager.register(UpdateTodo {
        todos: Arc::clone(&todos),
    });
    manager.register(DeleteTodo {
        todos: Arc::clone(&todos),
    });
    manager.register(ReorderTodos { todos });
}

fn session_of(args: &Value) -> String {
    args.get("session_id")
        .and_then(|v| v.as_str())
        .unwrap_or("default")
        .to_string()
}

struct ListTodos {
    todos: Arc<TodoStore>,
}

#[async_trait]
impl Tool for ListTodos {
    fn name(&self) -> &str {
        "list_todos"
    }

    fn description(&self) -> &str {
        "List the session's TODO items with id, title, description, status and priority, \
         in presentation order."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput {
        let session = args
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or(session_id);
        match self.todos.list(session) {
            Ok(items) => {
                let count = items.len();
                ToolOutput::ok(json!({ "todos": items, "count": count }))
            }
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct CreateTodo {
    todos: Arc<TodoStore>,
}

#[async_trait]
impl Tool for CreateTodo {
    fn name(&self) -> &str {
        "create_todo"
    }

    fn description(&self) -> &str {
        "Create a TODO item. Requires a title; description, status \
         (pending/in_progress/completed) and priority (high/medium/low) are optional."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Item title"},
                "description": {"type": "string", "description": "Optional detail"},
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"],
                    "description": "Initial status, pending by default"
                },
                "priority": {
                    "type": "string",
                    "enum": ["high", "medium", "low"],
                    "description": "Priority, medium by default"
                }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput {
        let session = session_of(&args);
        let session = if session == "default" {
            session_id
        } else {
            session.as_str()
        };

        let payload: TodoCreate = match serde_json::from_value(args.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ToolOutput::failure(
                    ToolErrorKind::ToolFailure,
                    format!("invalid create payload: {e}"),
                );
            }
        };
        if payload.title.trim().is_empty() {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "title must not be empty");
        }

        match self.todos.create(session, payload) {
            Ok(item) => ToolOutput::ok(json!({ "todo": item })),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct UpdateTodo {
    todos: Arc<TodoStore>,
}

#[async_trait]
impl Tool for UpdateTodo {
    fn name(&self) -> &str {
        "update_todo"
    }

    fn description(&self) -> &str {
        "Update a TODO item by id: title, description, status or priority."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todo_id": {"type": "string", "description": "Id of the item"},
                "title": {"type": "string", "description": "New title"},
                "description": {"type": "string", "description": "New description"},
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"],
                    "description": "New status"
                },
                "priority": {
                    "type": "string",
                    "enum": ["high", "medium", "low"],
                    "description": "New priority"
                }
            },
            "required": ["todo_id"]
        })
    }

    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput {
        let session = session_of(&args);
        let session = if session == "default" {
            session_id
        } else {
            session.as_str()
        };

        let Some(todo_id) = args.get("todo_id").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing todo_id");
        };
        let patch: TodoPatch = match serde_json::from_value(args.clone()) {
            Ok(p) => p,
            Err(e) => {
                return ToolOutput::failure(
                    ToolErrorKind::ToolFailure,
                    format!("invalid patch payload: {e}"),
                );
            }
        };

        match self.todos.update(session, todo_id, patch) {
            Ok(Some(item)) => ToolOutput::ok(json!({ "todo": item })),
            Ok(None) => ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("no TODO with id {todo_id}"),
            ),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct DeleteTodo {
    todos: Arc<TodoStore>,
}

#[async_trait]
impl Tool for DeleteTodo {
    fn name(&self) -> &str {
        "delete_todo"
    }

    fn description(&self) -> &str {
        "Delete a TODO item by id."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todo_id": {"type": "string", "description": "Id of the item to delete"}
            },
            "required": ["todo_id"]
        })
    }

    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput {
        let session = session_of(&args);
        let session = if session == "default" {
            session_id
        } else {
            session.as_str()
        };

        let Some(todo_id) = args.get("todo_id").and_then(|v| v.as_str()) else {
            return ToolOutput::failure(ToolErrorKind::ToolFailure, "missing todo_id");
        };
        match self.todos.delete(session, todo_id) {
            Ok(true) => ToolOutput::ok(json!({ "deleted": true, "todo_id": todo_id })),
            Ok(false) => ToolOutput::failure(
                ToolErrorKind::ToolFailure,
                format!("no TODO with id {todo_id}"),
            ),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

struct ReorderTodos {
    todos: Arc<TodoStore>,
}

#[async_trait]
impl Tool for ReorderTodos {
    fn name(&self) -> &str {
        "reorder_todos"
    }

    fn description(&self) -> &str {
        "Reorder the TODO list to follow the given id sequence. Unknown ids are ignored \
         and omitted items keep their relative order at the end."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Item ids in their new order"
                }
            },
            "required": ["order"]
        })
    }

    async fn execute(&self, args: Value, session_id: &str) -> ToolOutput {
        let session = session_of(&args);
        let session = if session == "default" {
            session_id
        } else {
            session.as_str()
        };

        let order: Vec<String> = args
            .get("order")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        match self.todos.reorder(session, &order) {
            Ok(items) => ToolOutput::ok(json!({ "todos": items })),
            Err(e) => ToolOutput::failure(ToolErrorKind::ToolFailure, e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, ToolManager) {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ToolManager::new();
        register(&mut manager, Arc::new(TodoStore::new(dir.path())));
        (dir, manager)
    }

    #[tokio::test]
    async fn create_then_list_roundtrip() {
        let (_dir, manager) = manager();

        let created = manager
            .execute_tool("create_todo", json!({"title": "write docs"}), "s1")
            .await;
        assert!(!created.error);
        let id = created.data.unwrap()["todo"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let listed = manager.execute_tool("list_todos", json!({}), "s1").await;
        let data = listed.data.unwrap();
        assert_eq!(data["count"], 1);
        assert_eq!(data["todos"][0]["id"], id.as_str());
    }

    #[tokio::test]
    async fn update_unknown_id_fails_as_result() {
        let (_dir, manager) = manager();
        let out = manager
            .execute_tool(
                "update_todo",
                json!({"todo_id": "ghost", "status": "completed"}),
                "s1",
            )
            .await;
        assert!(out.error);
        assert_eq!(out.kind, Some(ToolErrorKind::ToolFailure));
    }

    #[tokio::test]
    async fn delete_and_reorder_work_through_tools() {
        let (_dir, manager) = manager();
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let out = manager
                .execute_tool("create_todo", json!({"title": title}), "s1")
                .await;
            ids.push(out.data.unwrap()["todo"]["id"].as_str().unwrap().to_string());
        }

        let out = manager
            .execute_tool("delete_todo", json!({"todo_id": ids[0]}), "s1")
            .await;
        assert!(!out.error);

        let out = manager
            .execute_tool(
                "reorder_todos",
                json!({"order": [ids[2], ids[1]]}),
                "s1",
            )
            .await;
        let todos = out.data.unwrap()["todos"].clone();
        assert_eq!(todos[0]["id"], ids[2].as_str());
        assert_eq!(todos[1]["id"], ids[1].as_str());
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let (_dir, manager) = manager();
        let out = manager
            .execute_tool("create_todo", json!({"title": "  "}), "s1")
            .await;
        assert!(out.error);
    }
}
