// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::workspace::Workspace;

pub struct PatchFileTool {
    workspace: Arc<Workspace>,
}

impl PatchFileTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &str {
        "patch_file"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of `search` with `replace` in a workspace \
         file. The search string must match exactly once; include more \
         surrounding lines when it is ambiguous. Applying the patch again \
         with search and replace swapped reverts it."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path to the file"
                },
                "search": {
                    "type": "string",
                    "description": "Exact text to find (must be unique in the file)"
                },
                "replace": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "search", "replace"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let rel = args["path"].as_str().unwrap_or_default();
        let search = args["search"].as_str().unwrap_or_default();
        let replace = args["replace"].as_str().unwrap_or_default();
        if search.is_empty() {
            return ToolResult::err(ToolErrorKind::InvalidArguments, "search must not be empty");
        }
        let path = match self.workspace.resolve(rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };
        let normalized = match self.workspace.normalize(rel) {
            Ok(n) => n,
            Err(e) => return ToolResult::err(e.kind, e.message),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::err(
                    ToolErrorKind::ToolIoError,
                    format!("cannot read '{normalized}': {e}"),
                )
            }
        };

        let occurrences = content.matches(search).count();
        debug!(path = %normalized, occurrences, "patch_file tool");
        match occurrences {
            0 => {
                let hint = closest_line(&content, search)
                    .map(|(n, line)| format!(" Closest line {n}: {line}"))
                    .unwrap_or_default();
                ToolResult::err(
                    ToolErrorKind::ToolIoError,
                    format!("search string not found in '{normalized}'.{hint}"),
                )
            }
            1 => {
                let patched = content.replacen(search, replace, 1);
                match tokio::fs::write(&path, &patched).await {
                    Ok(()) => ToolResult::ok(format!("patched {normalized}"))
                        .with_files(vec![normalized.clone()])
                        .with_focus(normalized, patched),
                    Err(e) => ToolResult::err(
                        ToolErrorKind::ToolIoError,
                        format!("cannot write '{normalized}': {e}"),
                    ),
                }
            }
            n => ToolResult::err(
                ToolErrorKind::PatchAmbiguous,
                format!(
                    "search string occurs {n} times in '{normalized}'; include more surrounding context"
                ),
            ),
        }
    }
}

/// Best-matching line for a failed search, as a hint for the model's retry.
fn closest_line(content: &str, search: &str) -> Option<(usize, String)> {
    let needle = search.lines().next()?.trim();
    if needle.is_empty() {
        return None;
    }
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (similarity(needle, line.trim()), i + 1, line))
        .filter(|(score, _, _)| *score > 0.5)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, n, line)| (n, line.trim().to_string()))
}

/// Character-level similarity ratio in [0,1] (2×matches / total).
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matching: usize = diff
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Equal)
        .map(|c| c.value().len())
        .sum();
    (matching * 2) as f64 / total as f64
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fixture(content: &str) -> (tempfile::TempDir, Arc<Workspace>, PatchFileTool) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::open(dir.path().join("p")).unwrap());
        std::fs::write(ws.root().join("rsi.py"), content).unwrap();
        (dir, Arc::clone(&ws), PatchFileTool::new(ws))
    }

    #[tokio::test]
    async fn unique_search_is_replaced() {
        let (_dir, ws, tool) = fixture("PERIOD = 14\nLIMIT = 3\n");
        let out = tool
            .invoke(&json!({"path": "rsi.py", "search": "PERIOD = 14", "replace": "PERIOD = 21"}))
            .await;
        assert!(out.success, "{}", out.for_model());
        assert_eq!(out.files_changed, vec!["rsi.py"]);
        assert_eq!(
            std::fs::read_to_string(ws.root().join("rsi.py")).unwrap(),
            "PERIOD = 21\nLIMIT = 3\n"
        );
    }

    #[tokio::test]
    async fn duplicate_search_is_patch_ambiguous() {
        let (_dir, _ws, tool) = fixture("x = 1\nx = 1\n");
        let out = tool
            .invoke(&json!({"path": "rsi.py", "search": "x = 1", "replace": "x = 2"}))
            .await;
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::PatchAmbiguous);
    }

    #[tokio::test]
    async fn missing_search_gives_closest_line_hint() {
        let (_dir, _ws, tool) = fixture("PERIOD = 14\n");
        let out = tool
            .invoke(&json!({"path": "rsi.py", "search": "PERIOD = 15", "replace": "x"}))
            .await;
        let err = out.error.unwrap();
        assert_eq!(err.kind, ToolErrorKind::ToolIoError);
        assert!(err.message.contains("PERIOD = 14"), "{}", err.message);
    }

    #[tokio::test]
    async fn reverse_patch_restores_file_byte_for_byte() {
        let original = "def rsi(series, period=14):\n    return compute(series, period)\n";
        let (_dir, ws, tool) = fixture(original);
        let forward = tool
            .invoke(&json!({"path": "rsi.py", "search": "period=14", "replace": "period=21"}))
            .await;
        assert!(forward.success);
        let reverse = tool
            .invoke(&json!({"path": "rsi.py", "search": "period=21", "replace": "period=14"}))
            .await;
        assert!(reverse.success);
        assert_eq!(
            std::fs::read_to_string(ws.root().join("rsi.py")).unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn empty_search_is_invalid() {
        let (_dir, _ws, tool) = fixture("x\n");
        let out = tool
            .invoke(&json!({"path": "rsi.py", "search": "", "replace": "y"}))
            .await;
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::InvalidArguments);
    }
}
