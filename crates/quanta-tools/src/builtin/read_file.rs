// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::workspace::Workspace;

/// Lines shown when a large file is previewed instead of returned whole.
const PREVIEW_LINES: usize = 200;

pub struct ReadFileTool {
    workspace: Arc<Workspace>,
    /// Files longer than this return a preview plus a re-read instruction.
    large_file_lines: usize,
}

impl ReadFileTool {
    pub fn new(workspace: Arc<Workspace>, large_file_lines: usize) -> Self {
        Self {
            workspace,
            large_file_lines,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project workspace and return its full content. \
         The content is also placed into focused_files, so do not re-read a \
         file you already have unless it changed. For very large files a \
         preview is returned; re-read with start_line/end_line for the part \
         you need."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                },
                "start_line": {
                    "type": "integer",
                    "description": "1-based first line of an explicit range"
                },
                "end_line": {
                    "type": "integer",
                    "description": "1-based last line of an explicit range (inclusive)"
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

        debug!(path = %normalized, "read_file tool");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::err(
                    ToolErrorKind::ToolIoError,
                    format!("cannot read '{normalized}': {e}"),
                )
            }
        };

        let start = args["start_line"].as_u64().map(|n| n as usize);
        let end = args["end_line"].as_u64().map(|n| n as usize);
        if start.is_some() || end.is_some() {
            let lines: Vec<&str> = content.lines().collect();
            let from = start.unwrap_or(1).max(1) - 1;
            let to = end.unwrap_or(lines.len()).min(lines.len());
            if from >= to {
                return ToolResult::err(
                    ToolErrorKind::InvalidArguments,
                    format!("empty line range {from}..{to} for '{normalized}'"),
                );
            }
            let slice = lines[from..to].join("\n");
            return ToolResult::ok(format!(
                "{normalized} lines {}-{to} of {}:\n{slice}",
                from + 1,
                lines.len()
            ));
        }

        let line_count = content.lines().count();
        if line_count > self.large_file_lines {
            let preview: String = content
                .lines()
                .take(PREVIEW_LINES)
                .collect::<Vec<_>>()
                .join("\n");
            let output = format!(
                "{normalized} has {line_count} lines; showing the first {PREVIEW_LINES}. \
                 Re-read with start_line/end_line for the range you need.\n{preview}"
            );
            return ToolResult::ok(output.clone()).with_focus(normalized, output);
        }

        ToolResult::ok(content.clone()).with_focus(normalized, content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
