//! Built-in tools over the runtime's stores, plus the sub-agent wrappers.

pub mod file;
pub mod report;
pub mod subagent;
pub mod todo;

use std::sync::Arc;

use crate::manager::ToolManager;
use crate::subagent::SubAgentDeps;
use vesper_store::{FileStore, ReportStore, TodoStore};

/// Register the store-backed tool sets (todo, report, cached-file) onto a
/// registry.
pub fn register_builtin(
    manager: &mut ToolManager,
    todos: Arc<TodoStore>,
    reports: Arc<ReportStore>,
    files: Arc<FileStore>,
) {
    todo::register(manager, todos);
    report::register(manager, reports);
    file::register(manager, files);
}

/// Register the three sub-agent wrapper tools. Each wrapper gets the tool
/// subset its kind needs; pass an empty registry when the heavy tools are
/// not configured.
pub fn register_subagents(
    manager: &mut ToolManager,
    deps: SubAgentDeps,
    search_tools: ToolManager,
    browser_tools: ToolManager,
    windows_tools: ToolManager,
) {
    manager.register(subagent::SubAgentTool::search(deps.clone(), search_tools));
    manager.register(subagent::SubAgentTool::browser(deps.clone(), browser_tools));
    manager.register(subagent::SubAgentTool::windows(deps, windows_tools));
}
