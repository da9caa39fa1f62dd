// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error taxonomy for tool failures.  Failures are data the model can act
/// on, not exceptions; only a fatal kind fails the owning plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments rejected by the schema check at the registry boundary.
    InvalidArguments,
    /// Call blocked by the step's tool allow-list.
    ToolNotAllowed,
    /// Filesystem / subprocess error inside the tool.
    ToolIoError,
    /// `patch_file` search string matched more than once.
    PatchAmbiguous,
    /// Path would leave the workspace root.
    PathEscape,
    /// Malformed `create_plan` payload.
    PlanValidation,
    /// Sandbox hard timeout fired.
    SandboxTimeout,
    /// Per-user sandbox concurrency cap.
    SandboxBusy,
    /// External cancellation reached the tool.
    Cancelled,
    /// No tool registered under the requested name.
    UnknownTool,
}

impl ToolErrorKind {
    /// Fatal kinds fail the current plan step instead of being retried.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::PathEscape | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArguments => "invalid_arguments",
            Self::ToolNotAllowed => "tool_not_allowed",
            Self::ToolIoError => "tool_io_error",
            Self::PatchAmbiguous => "patch_ambiguous",
            Self::PathEscape => "path_escape",
            Self::PlanValidation => "plan_validation",
            Self::SandboxTimeout => "sandbox_timeout",
            Self::SandboxBusy => "sandbox_busy",
            Self::Cancelled => "cancelled",
            Self::UnknownTool => "unknown_tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// The result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    /// Workspace-relative paths this call created, modified, or removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_changed: Vec<String>,
    /// Full content to place into the focused-file set: `(path, content)`.
    /// Set by `read_file`/`write_file` so the orchestrator can uphold the
    /// content-duplication policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<(String, String)>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            files_changed: Vec::new(),
            focus: None,
        }
    }

    pub fn err(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            output: String::new(),
            error: Some(ToolError {
                kind,
                message,
            }),
            files_changed: Vec::new(),
            focus: None,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_changed = files;
        self
    }

    pub fn with_focus(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.focus = Some((path.into(), content.into()));
        self
    }

    /// The string handed back to the model as the tool message content.
    pub fn for_model(&self) -> String {
        match &self.error {
            Some(e) => format!("error[{}]: {}", e.kind.as_str(), e.message),
            None => self.output.clone(),
        }
    }

    /// True when this failure should fail the owning step outright.
    pub fn is_fatal(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind.is_fatal())
    }
}

/// Trait every tool implements.  Argument validation happens once at the
/// registry boundary, so `invoke` can assume the declared shape.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    async fn invoke(&self, args: &Value) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
