// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quanta_context::{Plan, PlanProgress};

/// One tool call as shown to event consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBrief {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Direct,
    Plan,
}

/// Everything an agent run can tell the outside world, in emission order.
/// The HTTP edge lowers each event to a line-delimited JSON frame keyed by
/// the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First event of every user turn.
    ResponseStart { mode: RunMode },
    PlanCreated { plan: Plan },
    PlanAwaitingApproval { plan: Plan },
    PlanApproved,
    PlanRejected { reason: String },
    PlanModified { plan: Plan },
    PlanExecutionStarted { plan: Plan },
    PlanExecutionCompleted { summary: String },
    PlanExecutionFailed { error: String },
    PlanExecutionCancelled,
    StepStarted {
        step_id: u32,
        description: String,
        progress: PlanProgress,
    },
    /// Model text produced inside a plan step.
    StepOutput { step_id: u32, content: String },
    ToolCalls {
        step_id: Option<u32>,
        calls: Vec<ToolCallBrief>,
    },
    ToolResult {
        step_id: Option<u32>,
        tool_call_id: String,
        tool: String,
        success: bool,
        output_summary: String,
        error: Option<String>,
    },
    StepCompleted {
        step_id: u32,
        files_changed: Vec<String>,
        progress: PlanProgress,
    },
    StepFailed { step_id: u32, error: String },
    /// Streaming text chunk (direct mode).
    Token { content: String },
    /// Coarse invalidation: a workspace file changed.
    FileChange { path: String },
    FileRunStarted { command: String },
    FileRunStdout { chunk: String },
    FileRunStderr { chunk: String },
    FileRunExit { exit_code: i32, duration_ms: u64 },
    AnomalyDetected { message: String },
    ReplanWarning { message: String },
    Status { message: String },
    Error { kind: String, message: String },
    /// Last event of every user turn, exactly once.
    ResponseEnd,
}

impl AgentEvent {
    /// The wire tag, for consumers that dispatch without deserializing.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResponseStart { .. } => "response_start",
            Self::PlanCreated { .. } => "plan_created",
            Self::PlanAwaitingApproval { .. } => "plan_awaiting_approval",
            Self::PlanApproved => "plan_approved",
            Self::PlanRejected { .. } => "plan_rejected",
            Self::PlanModified { .. } => "plan_modified",
            Self::PlanExecutionStarted { .. } => "plan_execution_started",
            Self::PlanExecutionCompleted { .. } => "plan_execution_completed",
            Self::PlanExecutionFailed { .. } => "plan_execution_failed",
            Self::PlanExecutionCancelled => "plan_execution_cancelled",
            Self::StepStarted { .. } => "step_started",
            Self::StepOutput { .. } => "step_output",
            Self::ToolCalls { .. } => "tool_calls",
            Self::ToolResult { .. } => "tool_result",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::Token { .. } => "token",
            Self::FileChange { .. } => "file_change",
            Self::FileRunStarted { .. } => "file_run_started",
            Self::FileRunStdout { .. } => "file_run_stdout",
            Self::FileRunStderr { .. } => "file_run_stderr",
            Self::FileRunExit { .. } => "file_run_exit",
            Self::AnomalyDetected { .. } => "anomaly_detected",
            Self::ReplanWarning { .. } => "replan_warning",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::ResponseEnd => "response_end",
        }
    }
}

/// An event plus its bus bookkeeping.  `seq` is strictly increasing per bus;
/// the edge adds nothing else to the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
