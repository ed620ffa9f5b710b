//! Per-session TODO store.
//!
//! One JSON document per session at `<root>/<session_id>.json`, shaped
//! `{"todos": [...]}`. A bare array (the legacy shape written by older
//! front-ends) is read and normalised transparently. Writers serialise
//! through a per-session mutex; there is no cross-session contention.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::{now_ts, write_atomic};
use vesper_types::{TodoCreate, TodoItem, TodoPatch, TodoPriority, TodoStatus};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TodoDocument {
    todos: Vec<TodoItem>,
}

/// Accepts both the current `{"todos": [...]}` document and the legacy bare
/// array shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TodoDocumentCompat {
    Document(TodoDocument),
    Legacy(Vec<TodoItem>),
}

impl From<TodoDocumentCompat> for TodoDocument {
    fn from(compat: TodoDocumentCompat) -> Self {
        match compat {
            TodoDocumentCompat::Document(doc) => doc,
            TodoDocumentCompat::Legacy(todos) => TodoDocument { todos },
        }
    }
}

/// Durable per-session planner store with stable smart ordering.
#[derive(Debug)]
pub struct TodoStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TodoStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn session_file(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    fn load(&self, session_id: &str) -> Result<TodoDocument> {
        let path = self.session_file(session_id);
        if !path.exists() {
            return Ok(TodoDocument::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let compat: TodoDocumentCompat = serde_json::from_str(&raw)?;
        Ok(compat.into())
    }

    fn save(&self, session_id: &str, doc: &TodoDocument) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(doc)?;
        write_atomic(&self.session_file(session_id), &json)?;
        Ok(())
    }

    /// List a session's items in presentation order: in-progress before
    /// pending before completed, then priority, then most recently updated.
    /// An unknown session yields an empty list, never an error.
    pub fn list(&self, session_id: &str) -> Result<Vec<TodoItem>> {
        let _guard = self.session_lock(session_id);
        let _held = _guard.lock().unwrap();
        let mut todos = self.load(session_id)?.todos;
        smart_sort(&mut todos);
        Ok(todos)
    }

    /// Create a new item; its physical `order` is appended at the end.
    pub fn create(&self, session_id: &str, payload: TodoCreate) -> Result<TodoItem> {
        let guard = self.session_lock(session_id);
        let _held = guard.lock().unwrap();

        let mut doc = self.load(session_id)?;
        let now = now_ts();
        let item = TodoItem {
            id: Uuid::new_v4().to_string(),
            session_id: Some(session_id.to_string()),
            agent_type: payload.agent_type.unwrap_or_default(),
            title: payload.title,
            description: payload.description,
            status: payload.status.unwrap_or(TodoStatus::Pending),
            priority: payload.priority.unwrap_or(TodoPriority::Medium),
            order: doc.todos.len(),
            created_at: now,
            updated_at: now,
            previous_status: None,
        };
        doc.todos.push(item.clone());
        self.save(session_id, &doc)?;
        Ok(item)
    }

    /// Patch an item, stamping `updated_at` and recording `previous_status`
    /// whenever the status actually changes. Returns `None` for unknown ids.
    pub fn update(
        &self,
        session_id: &str,
        todo_id: &str,
        patch: TodoPatch,
    ) -> Result<Option<TodoItem>> {
        let guard = self.session_lock(session_id);
        let _held = guard.lock().unwrap();

        let mut doc = self.load(session_id)?;
        let Some(item) = doc.todos.iter_mut().find(|t| t.id == todo_id) else {
            return Ok(None);
        };

        if let Some(status) = patch.status
            && item.status != status
        {
            item.previous_status = Some(item.status);
            item.status = status;
        }
        if let Some(title) = patch.title {
            item.title = title;
        }
        if let Some(description) = patch.description {
            item.description = Some(description);
        }
        if let Some(priority) = patch.priority {
            item.priority = priority;
        }
        item.updated_at = now_ts();

        let updated = item.clone();
        self.save(session_id, &doc)?;
        Ok(Some(updated))
    }

    /// Delete an item and renumber the remaining orders densely from 0.
    pub fn delete(&self, session_id: &str, todo_id: &str) -> Result<bool> {
        let guard = self.session_lock(session_id);
        let _held = guard.lock().unwrap();

        let mut doc = self.load(session_id)?;
        let before = doc.todos.len();
        doc.todos.retain(|t| t.id != todo_id);
        if doc.todos.len() == before {
            return Ok(false);
        }
        for (idx, item) in doc.todos.iter_mut().enumerate() {
            item.order = idx;
        }
        self.save(session_id, &doc)?;
        Ok(true)
    }

    /// Reorder items to follow the given id sequence. Unknown ids are
    /// ignored; omitted items are appended preserving their relative order.
    pub fn reorder(&self, session_id: &str, order: &[String]) -> Result<Vec<TodoItem>> {
        let guard = self.session_lock(session_id);
        let _held = guard.lock().unwrap();

        let mut doc = self.load(session_id)?;
        let now = now_ts();

        let mut reordered: Vec<TodoItem> = Vec::with_capacity(doc.todos.len());
        for id in order {
            if let Some(pos) = doc.todos.iter().position(|t| &t.id == id) {
                reordered.push(doc.todos.remove(pos));
            }
        }
        reordered.append(&mut doc.todos);

        for (idx, item) in reordered.iter_mut().enumerate() {
            item.order = idx;
            item.updated_at = now;
        }

        doc.todos = reordered.clone();
        self.save(session_id, &doc)?;
        Ok(reordered)
    }
}

/// Presentation sort: status rank desc, then priority rank desc, then
/// `updated_at` desc.
fn smart_sort(todos: &mut [TodoItem]) {
    todos.sort_by(|a, b| {
        b.status
            .rank()
            .cmp(&a.status.rank())
            .then(b.priority.rank().cmp(&a.priority.rank()))
            .then(b.updated_at.total_cmp(&a.updated_at))
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
