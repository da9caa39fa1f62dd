// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::workspace::Workspace;

pub struct ListDirectoryTool {
    workspace: Arc<Workspace>,
}

impl ListDirectoryTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory. Directories are suffixed \
         with '/'. Omit path to list the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative directory (default: root)"
                }
            }
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let rel = args["path"].as_str().unwrap_or("");
        let dir = match self.workspace.resolve_dir(rel) {
            Ok(d) => d,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) => {
                return ToolResult::err(
                    ToolErrorKind::ToolIoError,
                    format!("cannot list '{rel}': {e}"),
                )
            }
        };
        let mut entries: Vec<String> = Vec::new();
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".meta" {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        if entries.is_empty() {
            return ToolResult::ok("(empty directory)");
        }
        ToolResult::ok(entries.join("\n"))
    }
}

pub struct DeleteFileTool {
    workspace: Arc<Workspace>,
}

impl DeleteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace. Directories cannot be deleted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                }
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let rel = args["path"].as_str().unwrap_or_default();
        let path = match self.workspace.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };
        let normalized = match self.workspace.normalize(rel) {
            Ok(n) => n,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };
        debug!(path = %normalized, "delete_file tool");
        match tokio::fs::remove_file(&path).await {
            Ok(()) => ToolResult::ok(format!("deleted {normalized}"))
                .with_files(vec![normalized]),
            Err(e) => ToolResult::err(
                ToolErrorKind::ToolIoError,
                format!("cannot delete '{normalized}': {e}"),
            ),
        }
    }
}

pub struct MoveFileTool {
    workspace: Arc<Workspace>,
}

impl MoveFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move or rename a file inside the workspace. Parent directories of \
         the destination are created automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from": {
                    "type": "string",
                    "description": "Workspace-relative source path"
                },
                "to": {
                    "type": "string",
                    "description": "Workspace-relative destination path"
                }
            },
            "required": ["from", "to"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let from_rel = args["from"].as_str().unwrap_or_default();
        let to_rel = args["to"].as_str().unwrap_or_default();
        let (from, from_norm) = match (
            self.workspace.resolve(from_rel),
            self.workspace.normalize(from_rel),
        ) {
            (Ok(p), Ok(n)) => (p, n),
            (Err(e), _) | (_, Err(e)) => return ToolResult::err(e.kind, e.message),
        };
        let (to, to_norm) = match (
            self.workspace.resolve(to_rel),
            self.workspace.normalize(to_rel),
        ) {
            (Ok(p), Ok(n)) => (p, n),
            (Err(e), _) | (_, Err(e)) => return ToolResult::err(e.kind, e.message),
        };

        debug!(from = %from_norm, to = %to_norm, "move_file tool");
        if let Some(parent) = to.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => ToolResult::ok(format!("moved {from_norm} -> {to_norm}"))
                .with_files(vec![from_norm, to_norm]),
            Err(e) => ToolResult::err(
                ToolErrorKind::ToolIoError,
                format!("cannot move '{from_norm}': {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
