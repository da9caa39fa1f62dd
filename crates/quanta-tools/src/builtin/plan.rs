// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolErrorKind, ToolResult};

/// The mode switch.  The orchestrator honors `create_plan` only when it is
/// part of the *first* model reply of a turn — it intercepts the call before
/// registry dispatch.  Any later call falls through to this invoker and is
/// rejected as data.
pub struct CreatePlanTool;

#[async_trait]
impl Tool for CreatePlanTool {
    fn name(&self) -> &str {
        "create_plan"
    }

    fn description(&self) -> &str {
        "Declare a step-by-step plan for a multi-step task. Use this in your \
         FIRST reply when the task needs several distinct actions (e.g. write \
         a file, then run it). Each step gets its own tool budget. For simple \
         one-shot requests, answer directly instead."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Short restatement of the overall task"
                },
                "steps": {
                    "type": "array",
                    "description": "Ordered steps, each a distinct unit of work",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": {
                                "type": "string",
                                "description": "What this step does"
                            },
                            "expected_outcome": {
                                "type": "string",
                                "description": "Observable result when the step is done"
                            },
                            "tools_needed": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "Tools this step is allowed to call"
                            }
                        },
                        "required": ["description"]
                    }
                }
            },
            "required": ["task", "steps"]
        })
    }

    async fn invoke(&self, _args: &Value) -> ToolResult {
        ToolResult::err(
            ToolErrorKind::PlanValidation,
            "create_plan is only honored as the first action of a turn; continue with the current plan",
        )
    }
}

/// Terminates the current plan with a summary.  The orchestrator watches for
/// this call by name; the invoker just acknowledges.
pub struct TaskCompleteTool;

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Declare the whole task finished. Remaining plan steps are skipped. \
         Provide a short summary of what was accomplished."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "What was accomplished"
                }
            },
            "required": ["summary"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let summary = args["summary"].as_str().unwrap_or_default();
        ToolResult::ok(format!("task complete: {summary}"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn late_create_plan_is_rejected_as_data() {
        let tool = CreatePlanTool;
        let out = tool
            .invoke(&json!({"task": "t", "steps": [{"description": "d"}]}))
            .await;
        assert!(!out.success);
        assert_eq!(out.error.unwrap().kind, ToolErrorKind::PlanValidation);
    }

    #[tokio::test]
    async fn task_complete_echoes_summary() {
        let tool = TaskCompleteTool;
        let out = tool.invoke(&json!({"summary": "wrote and ran main.py"})).await;
        assert!(out.success);
        assert!(out.output.contains("wrote and ran main.py"));
    }

    #[test]
    fn create_plan_schema_requires_steps() {
        let schema = CreatePlanTool.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "steps"));
    }
}
