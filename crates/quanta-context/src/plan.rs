// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PlanError {
    #[error("a plan needs at least one step")]
    EmptySteps,
    #[error("step {0} does not exist")]
    UnknownStep(u32),
    #[error("step {step}: cannot go {from:?} -> {to:?}")]
    InvalidStepTransition {
        step: u32,
        from: StepStatus,
        to: StepStatus,
    },
    #[error("plan cannot go {from:?} -> {to:?}")]
    InvalidPlanTransition { from: PlanStatus, to: PlanStatus },
    #[error("step {0} is done and immutable")]
    StepImmutable(u32),
    #[error("step {0} cannot start while step {1} is in progress")]
    StepAlreadyActive(u32, u32),
}

/// One tool call made while executing a step, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
}

/// Unvalidated step input, as delivered by the model's `create_plan` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepDraft {
    pub description: String,
    #[serde(default)]
    pub expected_outcome: Option<String>,
    #[serde(default)]
    pub tools_needed: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Dense 1..N id within the owning plan.
    pub id: u32,
    pub description: String,
    pub expected_outcome: String,
    /// Tool allow-list for this step; empty means unrestricted.
    pub tools_needed: Vec<String>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub files_changed: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl PlanStep {
    fn from_draft(id: u32, draft: PlanStepDraft) -> Self {
        Self {
            id,
            description: draft.description,
            expected_outcome: draft.expected_outcome.unwrap_or_default(),
            tools_needed: draft.tools_needed.unwrap_or_default(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            files_changed: Vec::new(),
            tool_calls: Vec::new(),
        }
    }
}

/// Step counts for `step_started`/`step_completed` progress payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub done: usize,
    pub total: usize,
    pub in_progress: usize,
}

/// The plan a turn executes.  Owns its steps by value; steps reference the
/// plan only by id.
///
/// Invariants maintained by the mutators:
/// - step ids are dense `1..N`,
/// - while `executing`, at most one step is `in_progress` and
///   `current_step_id` references it,
/// - a `done` step is immutable,
/// - a terminal plan only holds terminal steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub task: String,
    steps: Vec<PlanStep>,
    pub current_step_id: u32,
    pub status: PlanStatus,
    pub version: u32,
    pub replan_count: u32,
}

impl Plan {
    pub fn new(task: impl Into<String>, drafts: Vec<PlanStepDraft>) -> Result<Self, PlanError> {
        if drafts.is_empty() {
            return Err(PlanError::EmptySteps);
        }
        let steps = drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| PlanStep::from_draft(i as u32 + 1, d))
            .collect();
        Ok(Self {
            task: task.into(),
            steps,
            current_step_id: 1,
            status: PlanStatus::Planning,
            version: 1,
            replan_count: 0,
        })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn step(&self, id: u32) -> Result<&PlanStep, PlanError> {
        self.steps
            .iter()
            .find(|s| s.id == id)
            .ok_or(PlanError::UnknownStep(id))
    }

    fn step_mut(&mut self, id: u32) -> Result<&mut PlanStep, PlanError> {
        self.steps
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(PlanError::UnknownStep(id))
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == self.current_step_id)
    }

    /// Replace the plan's steps (plan-modified decision from the approval
    /// gate).  Only allowed before execution starts.
    pub fn replace_steps(&mut self, drafts: Vec<PlanStepDraft>) -> Result<(), PlanError> {
        if self.status != PlanStatus::Planning {
            return Err(PlanError::InvalidPlanTransition {
                from: self.status,
                to: PlanStatus::Planning,
            });
        }
        if drafts.is_empty() {
            return Err(PlanError::EmptySteps);
        }
        self.steps = drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| PlanStep::from_draft(i as u32 + 1, d))
            .collect();
        self.current_step_id = 1;
        Ok(())
    }

    pub fn start_execution(&mut self) -> Result<(), PlanError> {
        if self.status != PlanStatus::Planning {
            return Err(PlanError::InvalidPlanTransition {
                from: self.status,
                to: PlanStatus::Executing,
            });
        }
        self.status = PlanStatus::Executing;
        Ok(())
    }

    pub fn start_step(&mut self, id: u32) -> Result<(), PlanError> {
        if self.status != PlanStatus::Executing {
            return Err(PlanError::InvalidPlanTransition {
                from: self.status,
                to: PlanStatus::Executing,
            });
        }
        if let Some(active) = self.steps.iter().find(|s| s.status == StepStatus::InProgress) {
            return Err(PlanError::StepAlreadyActive(id, active.id));
        }
        let step = self.step_mut(id)?;
        if step.status != StepStatus::Pending {
            return Err(PlanError::InvalidStepTransition {
                step: id,
                from: step.status,
                to: StepStatus::InProgress,
            });
        }
        step.status = StepStatus::InProgress;
        step.started_at = Some(Utc::now());
        self.current_step_id = id;
        Ok(())
    }

    pub fn complete_step(
        &mut self,
        id: u32,
        result: impl Into<String>,
        files_changed: Vec<String>,
    ) -> Result<(), PlanError> {
        let step = self.step_mut(id)?;
        if step.status != StepStatus::InProgress {
            return Err(PlanError::InvalidStepTransition {
                step: id,
                from: step.status,
                to: StepStatus::Done,
            });
        }
        step.status = StepStatus::Done;
        step.completed_at = Some(Utc::now());
        step.result = Some(result.into());
        for f in files_changed {
            if !step.files_changed.contains(&f) {
                step.files_changed.push(f);
            }
        }
        Ok(())
    }

    pub fn fail_step(&mut self, id: u32, error: impl Into<String>) -> Result<(), PlanError> {
        let step = self.step_mut(id)?;
        match step.status {
            StepStatus::InProgress => {
                step.status = StepStatus::Failed;
                step.completed_at = Some(Utc::now());
                step.error = Some(error.into());
                Ok(())
            }
            StepStatus::Done => Err(PlanError::StepImmutable(id)),
            from => Err(PlanError::InvalidStepTransition {
                step: id,
                from,
                to: StepStatus::Failed,
            }),
        }
    }

    /// Append a tool-call record to an executing step.
    pub fn record_tool_call(&mut self, id: u32, record: ToolCallRecord) -> Result<(), PlanError> {
        let step = self.step_mut(id)?;
        if step.status == StepStatus::Done {
            return Err(PlanError::StepImmutable(id));
        }
        step.tool_calls.push(record);
        Ok(())
    }

    /// Mark every still-pending step skipped (early `task_complete`).
    pub fn skip_remaining(&mut self) {
        for step in &mut self.steps {
            if step.status == StepStatus::Pending {
                step.status = StepStatus::Skipped;
            }
        }
    }

    pub fn complete(&mut self) -> Result<(), PlanError> {
        if self.status != PlanStatus::Executing || !self.all_steps_terminal() {
            return Err(PlanError::InvalidPlanTransition {
                from: self.status,
                to: PlanStatus::Completed,
            });
        }
        self.status = PlanStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            // A failing plan leaves no step dangling in progress.
            for step in &mut self.steps {
                if step.status == StepStatus::InProgress {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(Utc::now());
                }
                if step.status == StepStatus::Pending {
                    step.status = StepStatus::Skipped;
                }
            }
            self.status = PlanStatus::Failed;
        }
    }

    /// External cancellation: terminal from any non-terminal state.  The
    /// in-progress step fails with a cancelled marker; pending steps skip.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        for step in &mut self.steps {
            match step.status {
                StepStatus::InProgress => {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(Utc::now());
                    step.error = Some("cancelled".into());
                }
                StepStatus::Pending => step.status = StepStatus::Skipped,
                _ => {}
            }
        }
        self.status = PlanStatus::Cancelled;
    }

    /// Replace the step list under a new plan version after a replan.  All
    /// new steps start pending; version and replan counters advance.
    pub fn replan(&mut self, drafts: Vec<PlanStepDraft>) -> Result<(), PlanError> {
        if self.status != PlanStatus::Executing {
            return Err(PlanError::InvalidPlanTransition {
                from: self.status,
                to: PlanStatus::Executing,
            });
        }
        if drafts.is_empty() {
            return Err(PlanError::EmptySteps);
        }
        self.steps = drafts
            .into_iter()
            .enumerate()
            .map(|(i, d)| PlanStep::from_draft(i as u32 + 1, d))
            .collect();
        self.current_step_id = 1;
        self.version += 1;
        self.replan_count += 1;
        Ok(())
    }

    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    pub fn all_steps_done(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Done | StepStatus::Skipped))
    }

    pub fn next_pending_step(&self) -> Option<u32> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Pending)
            .map(|s| s.id)
    }

    pub fn progress(&self) -> PlanProgress {
        PlanProgress {
            done: self
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Done)
                .count(),
            total: self.steps.len(),
            in_progress: self
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::InProgress)
                .count(),
        }
    }

    /// Render step statuses as icon lines for the step-scoped prompt, with
    /// the current step marked.
    pub fn summary_lines(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            let icon = match step.status {
                StepStatus::Done => "[x]",
                StepStatus::InProgress => "[>]",
                StepStatus::Pending => "[ ]",
                StepStatus::Failed => "[!]",
                StepStatus::Skipped => "[-]",
            };
            let marker = if step.id == self.current_step_id {
                " <- current"
            } else {
                ""
            };
            out.push_str(&format!("{icon} {}. {}{marker}\n", step.id, step.description));
        }
        out
    }

    /// One-line completion summary for `plan_execution_completed`.
    pub fn completion_summary(&self) -> String {
        let done: Vec<String> = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Done)
            .map(|s| s.description.clone())
            .collect();
        let files: Vec<&str> = self
            .steps
            .iter()
            .flat_map(|s| s.files_changed.iter().map(String::as_str))
            .collect();
        if files.is_empty() {
            format!("completed {} steps: {}", done.len(), done.join("; "))
        } else {
            format!(
                "completed {} steps: {} (files: {})",
                done.len(),
                done.join("; "),
                files.join(", ")
            )
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn drafts(n: usize) -> Vec<PlanStepDraft> {
        (0..n)
            .map(|i| PlanStepDraft {
                description: format!("step {}", i + 1),
                expected_outcome: Some(format!("outcome {}", i + 1)),
                tools_needed: None,
            })
            .collect()
    }

    fn executing_plan(n: usize) -> Plan {
        let mut p = Plan::new("task", drafts(n)).unwrap();
        p.start_execution().unwrap();
        p
    }

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn new_plan_has_dense_ids_from_one() {
        let p = Plan::new("t", drafts(3)).unwrap();
        let ids: Vec<u32> = p.steps().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(p.status, PlanStatus::Planning);
        assert_eq!(p.version, 1);
    }

    #[test]
    fn empty_steps_rejected() {
        assert_eq!(Plan::new("t", vec![]).unwrap_err(), PlanError::EmptySteps);
    }

    // ── Step lifecycle ───────────────────────────────────────────────────────

    #[test]
    fn exactly_one_step_in_progress_while_executing() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        assert_eq!(p.progress().in_progress, 1);
        assert_eq!(p.start_step(2).unwrap_err(), PlanError::StepAlreadyActive(2, 1));
    }

    #[test]
    fn current_step_id_tracks_active_step() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        assert_eq!(p.current_step_id, 1);
        p.complete_step(1, "ok", vec![]).unwrap();
        p.start_step(2).unwrap();
        assert_eq!(p.current_step_id, 2);
        assert!(p.current_step().is_some());
    }

    #[test]
    fn done_step_is_immutable() {
        let mut p = executing_plan(1);
        p.start_step(1).unwrap();
        p.complete_step(1, "ok", vec![]).unwrap();
        assert_eq!(p.fail_step(1, "late").unwrap_err(), PlanError::StepImmutable(1));
        assert_eq!(
            p.record_tool_call(
                1,
                ToolCallRecord {
                    id: "x".into(),
                    name: "t".into(),
                    arguments: serde_json::json!({}),
                    success: true
                }
            )
            .unwrap_err(),
            PlanError::StepImmutable(1)
        );
    }

    #[test]
    fn cannot_start_step_before_execution() {
        let mut p = Plan::new("t", drafts(1)).unwrap();
        assert!(p.start_step(1).is_err());
    }

    #[test]
    fn files_changed_deduplicated() {
        let mut p = executing_plan(1);
        p.start_step(1).unwrap();
        p.complete_step(1, "ok", vec!["a.py".into(), "a.py".into(), "b.py".into()])
            .unwrap();
        assert_eq!(p.step(1).unwrap().files_changed, vec!["a.py", "b.py"]);
    }

    // ── Terminal states ──────────────────────────────────────────────────────

    #[test]
    fn completed_plan_has_all_terminal_steps() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        p.complete_step(1, "ok", vec![]).unwrap();
        p.start_step(2).unwrap();
        p.complete_step(2, "ok", vec![]).unwrap();
        p.complete().unwrap();
        assert_eq!(p.status, PlanStatus::Completed);
        assert!(p.all_steps_terminal());
    }

    #[test]
    fn complete_rejected_with_open_steps() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        p.complete_step(1, "ok", vec![]).unwrap();
        assert!(p.complete().is_err());
    }

    #[test]
    fn cancel_fails_active_step_and_skips_pending() {
        let mut p = executing_plan(3);
        p.start_step(1).unwrap();
        p.cancel();
        assert_eq!(p.status, PlanStatus::Cancelled);
        assert_eq!(p.step(1).unwrap().status, StepStatus::Failed);
        assert_eq!(p.step(1).unwrap().error.as_deref(), Some("cancelled"));
        assert_eq!(p.step(2).unwrap().status, StepStatus::Skipped);
        assert!(p.all_steps_terminal());
    }

    #[test]
    fn cancel_is_idempotent_on_terminal_plans() {
        let mut p = executing_plan(1);
        p.start_step(1).unwrap();
        p.fail_step(1, "boom").unwrap();
        p.fail();
        let before = p.clone();
        p.cancel();
        assert_eq!(p, before);
    }

    #[test]
    fn fail_leaves_no_dangling_in_progress() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        p.fail();
        assert!(p.all_steps_terminal());
        assert_eq!(p.status, PlanStatus::Failed);
    }

    // ── Replan ───────────────────────────────────────────────────────────────

    #[test]
    fn replan_resets_ids_and_bumps_version() {
        let mut p = executing_plan(3);
        p.start_step(1).unwrap();
        p.fail_step(1, "stuck").unwrap();
        p.replan(drafts(2)).unwrap();
        let ids: Vec<u32> = p.steps().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(p.version, 2);
        assert_eq!(p.replan_count, 1);
        assert!(p.steps().iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(p.current_step_id, 1);
    }

    #[test]
    fn replan_rejected_outside_execution() {
        let mut p = Plan::new("t", drafts(1)).unwrap();
        assert!(p.replan(drafts(1)).is_err());
    }

    // ── Rendering ────────────────────────────────────────────────────────────

    #[test]
    fn summary_marks_current_step() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        let summary = p.summary_lines();
        assert!(summary.contains("[>] 1. step 1 <- current"));
        assert!(summary.contains("[ ] 2. step 2"));
    }

    #[test]
    fn progress_counts_match_statuses() {
        let mut p = executing_plan(3);
        p.start_step(1).unwrap();
        p.complete_step(1, "ok", vec![]).unwrap();
        p.start_step(2).unwrap();
        let prog = p.progress();
        assert_eq!(
            (prog.done, prog.total, prog.in_progress),
            (1, 3, 1)
        );
    }

    #[test]
    fn round_trips_through_serde() {
        let mut p = executing_plan(2);
        p.start_step(1).unwrap();
        p.complete_step(1, "wrote file", vec!["main.py".into()]).unwrap();
        let back: Plan = serde_json::from_str(&serde_json::to_string(&p).unwrap()).unwrap();
        assert_eq!(p, back);
    }
}
