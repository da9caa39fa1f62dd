// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::workspace::Workspace;

const MATCH_LIMIT: usize = 100;

pub struct GrepTool {
    workspace: Arc<Workspace>,
}

impl GrepTool {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search the workspace for a literal string (default) or a regular \
         expression. Optional include glob filters files (e.g. '*.py'). \
         Matches are reported as path:line: text, capped at 100."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Literal text or regex to search for"
                },
                "is_regex": {
                    "type": "boolean",
                    "description": "Treat pattern as a regular expression (default false)"
                },
                "include": {
                    "type": "string",
                    "description": "Glob filter on file names, e.g. '*.py'"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let pattern = args["pattern"].as_str().unwrap_or_default().to_string();
        let is_regex = args["is_regex"].as_bool().unwrap_or(false);
        let include = args["include"].as_str().map(str::to_string);

        let matcher: Box<dyn Fn(&str) -> bool + Send> = if is_regex {
            match Regex::new(&pattern) {
                Ok(re) => Box::new(move |line: &str| re.is_match(line)),
                Err(e) => {
                    return ToolResult::err(
                        ToolErrorKind::InvalidArguments,
                        format!("invalid regex: {e}"),
                    )
                }
            }
        } else {
            let needle = pattern.clone();
            Box::new(move |line: &str| line.contains(&needle))
        };

        let include_re = match include.as_deref().map(glob_to_regex) {
            Some(Some(re)) => Some(re),
            Some(None) => {
                return ToolResult::err(ToolErrorKind::InvalidArguments, "invalid include glob")
            }
            None => None,
        };

        debug!(pattern = %pattern, is_regex, "grep tool");
        let root = self.workspace.root().to_path_buf();
        let mut matches: Vec<String> = Vec::new();
        for entry in WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if name == ".meta" || name.starts_with('.') {
                continue;
            }
            if let Some(re) = &include_re {
                if !re.is_match(&name) {
                    continue;
                }
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
                if matcher(line) {
                    matches.push(format!("{rel}:{}: {}", i + 1, line.trim_end()));
                    if matches.len() >= MATCH_LIMIT {
                        matches.push(format!("...capped at {MATCH_LIMIT} matches"));
                        return ToolResult::ok(matches.join("\n"));
                    }
                }
            }
        }
        if matches.is_empty() {
            return ToolResult::ok("(no matches)");
        }
        ToolResult::ok(matches.join("\n"))
    }
}

/// Convert a simple shell glob to a [`Regex`].  Only `*` (match anything)
/// and `?` (match one char) are supported.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
