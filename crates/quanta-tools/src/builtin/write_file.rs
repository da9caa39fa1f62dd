// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::workspace::Workspace;

pub struct WriteFileTool {
    workspace: Arc<Workspace>,
}

impl WriteFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a file in the project workspace, overwriting any existing \
         content. Prefer patch_file for modifying existing files. Parent \
         directories are created automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let rel = args["path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default().to_string();
        let path = match self.workspace.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };
        let normalized = match self.workspace.normalize(rel) {
            Ok(n) => n,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };

        debug!(path = %normalized, bytes = content.len(), "write_file tool");
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }
        match tokio::fs::write(&path, &content).await {
            Ok(()) => ToolResult::ok(format!("wrote {} bytes to {normalized}", content.len()))
                .with_files(vec![normalized.clone()])
                .with_focus(normalized, content),
            Err(e) => ToolResult::err(
                ToolErrorKind::ToolIoError,
                format!("cannot write '{normalized}': {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fixture() -> (tempfile::TempDir, Arc<Workspace>, WriteFileTool) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::open(dir.path().join("p")).unwrap());
        (dir, Arc::clone(&ws), WriteFileTool::new(ws))
    }

    #[tokio::test]
    async fn writes_file_and_reports_change() {
        let (_dir, ws, tool) = fixture();
        let out = tool
            .invoke(&json!({"path": "main.py", "content": "print('hello')\n"}))
            .await;
        assert!(out.success, "{}", out.for_model());
        assert_eq!(out.files_changed, vec!["main.py"]);
        assert_eq!(
            std::fs::read_to_string(ws.root().join("main.py")).unwrap(),
            "print('hello')\n"
        );
        assert_eq!(out.focus.unwrap().0, "main.py");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let (_dir, ws, tool) = fixture();
        let out = tool
            .invoke(&json!({"path": "strategy/rsi.py", "content": "PERIOD = 14\n"}))
            .await;
        assert!(out.success);
        assert!(ws.root().join("strategy/rsi.py").exists());
    }

    #[tokio::test]
    async fn escape_attempt_is_path_escape() {
        let (_dir, _ws, tool) = fixture();
        let out = tool
            .invoke(&json!({"path": "../evil.sh", "content": "x"}))
            .await;
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::PathEscape);
    }
}
