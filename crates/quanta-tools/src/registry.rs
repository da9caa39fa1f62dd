// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use quanta_model::{ToolCallRequest, ToolSchema};

use crate::tool::{Tool, ToolErrorKind, ToolResult};
use crate::validate::validate_args;

/// Central registry holding all tools available to one agent run.
///
/// Arguments are validated against the declared schema before invocation;
/// a violation comes back as a failed [`ToolResult`] with kind
/// `invalid_arguments` rather than reaching the tool.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas for all registered tools, name-sorted for determinism.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute(&self, call: &ToolCallRequest) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::err(
                ToolErrorKind::UnknownTool,
                format!("unknown tool: {}", call.name),
            );
        };
        if let Err(msg) = validate_args(&tool.parameters_schema(), &call.arguments) {
            return ToolResult::err(ToolErrorKind::InvalidArguments, msg);
        }
        tool.invoke(&call.arguments).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
