// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use walkdir::WalkDir;

use quanta_context::SharedSymbolIndex;

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::workspace::Workspace;

pub struct GetFileOutlineTool {
    index: SharedSymbolIndex,
}

impl GetFileOutlineTool {
    pub fn new(index: SharedSymbolIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for GetFileOutlineTool {
    fn name(&self) -> &str {
        "get_file_outline"
    }

    fn description(&self) -> &str {
        "Show the classes, functions, methods, and module variables of one \
         indexed file with their line ranges and docstrings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Workspace-relative path of an indexed file"
                }
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let path = args["path"].as_str().unwrap_or_default();
        let rendered = self.index.with(|idx| {
            idx.outline(path).map(|symbols| {
                let mut out = String::new();
                for sym in symbols {
                    out.push_str(&format!(
                        "{:?} {} [{}-{}]",
                        sym.kind, sym.signature, sym.line_start, sym.line_end
                    ));
                    if let Some(doc) = &sym.docstring {
                        out.push_str(&format!(" — {doc}"));
                    }
                    out.push('\n');
                }
                out
            })
        });
        match rendered {
            Some(out) if !out.is_empty() => ToolResult::ok(out),
            Some(_) => ToolResult::ok("(no symbols)"),
            None => ToolResult::err(
                ToolErrorKind::ToolIoError,
                format!("'{path}' is not in the symbol index"),
            ),
        }
    }
}

pub struct GetDefinitionTool {
    index: SharedSymbolIndex,
}

impl GetDefinitionTool {
    pub fn new(index: SharedSymbolIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Tool for GetDefinitionTool {
    fn name(&self) -> &str {
        "get_definition"
    }

    fn description(&self) -> &str {
        "Locate the definition(s) of a symbol by name across the indexed \
         project, with signatures and line ranges."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Symbol name to look up"
                }
            },
            "required": ["name"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let name = args["name"].as_str().unwrap_or_default();
        let hits = self.index.with(|idx| {
            idx.definitions(name)
                .into_iter()
                .map(|(file, sym)| {
                    format!(
                        "{file}:{}: {} [{}-{}]",
                        sym.line_start, sym.signature, sym.line_start, sym.line_end
                    )
                })
                .collect::<Vec<_>>()
        });
        if hits.is_empty() {
            return ToolResult::ok(format!("(no definition found for '{name}')"));
        }
        ToolResult::ok(hits.join("\n"))
    }
}

pub struct FindReferencesTool {
    workspace: Arc<Workspace>,
}

impl FindReferencesTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FindReferencesTool {
    fn name(&self) -> &str {
        "find_references"
    }

    fn description(&self) -> &str {
        "Find all word-boundary occurrences of a symbol name across the \
         workspace source files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Symbol name to search for"
                }
            },
            "required": ["name"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let name = args["name"].as_str().unwrap_or_default();
        let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
            return ToolResult::err(ToolErrorKind::InvalidArguments, "unusable symbol name");
        };
        let root = self.workspace.root().to_path_buf();
        let mut hits: Vec<String> = Vec::new();
        for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let fname = entry.file_name().to_string_lossy();
            if fname.starts_with('.') {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    hits.push(format!("{rel}:{}: {}", i + 1, line.trim_end()));
                }
            }
        }
        if hits.is_empty() {
            return ToolResult::ok(format!("(no references to '{name}')"));
        }
        ToolResult::ok(hits.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const SOURCE: &str = "PERIOD = 14\n\ndef rsi(series, period=PERIOD):\n    return series\n";

    fn indexed() -> SharedSymbolIndex {
        let shared = SharedSymbolIndex::default();
        shared.with_mut(|idx| idx.index_source("strategy/rsi.py", SOURCE));
        shared
    }

    #[tokio::test]
    async fn outline_lists_symbols_with_ranges() {
        let tool = GetFileOutlineTool::new(indexed());
        let out = tool.invoke(&json!({"path": "strategy/rsi.py"})).await;
        assert!(out.success);
        assert!(out.output.contains("def rsi"));
        assert!(out.output.contains("PERIOD"));
    }

    #[tokio::test]
    async fn outline_of_unindexed_file_fails() {
        let tool = GetFileOutlineTool::new(SharedSymbolIndex::default());
        let out = tool.invoke(&json!({"path": "ghost.py"})).await;
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::ToolIoError);
    }

    #[tokio::test]
    async fn definition_lookup_reports_location() {
        let tool = GetDefinitionTool::new(indexed());
        let out = tool.invoke(&json!({"name": "rsi"})).await;
        assert!(out.output.contains("strategy/rsi.py:3"));
    }

    #[tokio::test]
    async fn missing_definition_is_soft_miss() {
        let tool = GetDefinitionTool::new(indexed());
        let out = tool.invoke(&json!({"name": "macd"})).await;
        assert!(out.success);
        assert!(out.output.contains("no definition"));
    }

    #[tokio::test]
    async fn references_respect_word_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::open(dir.path().join("p")).unwrap());
        std::fs::write(ws.root().join("a.py"), "rsi(x)\nrsi_helper(y)\n").unwrap();
        let tool = FindReferencesTool::new(ws);
        let out = tool.invoke(&json!({"name": "rsi"})).await;
        assert!(out.output.contains("a.py:1"));
        assert!(!out.output.contains("a.py:2"), "{}", out.output);
    }
}
