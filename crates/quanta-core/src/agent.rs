// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use quanta_config::AgentConfig;
use quanta_context::{AgentContext, Plan, PlanStepDraft, ToolCallRecord};
use quanta_model::{
    chat_with_retry, ChatMessage, ChatReply, ChatRequest, ModelProvider, ToolCallRequest,
};
use quanta_tools::{ToolErrorKind, ToolRegistry, ToolResult};

use crate::{
    anomaly::{AnomalyDetector, AnomalyKind},
    approval::{ApprovalGate, AutoApprove, PlanDecision},
    bus::EventBus,
    events::{AgentEvent, RunMode, ToolCallBrief},
    prompts::{self, PromptTemplates},
};

/// Characters of tool output shown in `tool_result` event summaries.
const SUMMARY_CHARS: usize = 200;

/// The orchestration core: drives the model <-> tool loop for one session,
/// in Direct mode (tool calls until the model stops) or Plan mode (a
/// model-authored plan executed step by step), emitting events throughout.
///
/// One agent owns one [`AgentContext`]; all operations on a session are
/// sequential, so the context needs no internal locking.
pub struct PlanExecuteAgent {
    ctx: AgentContext,
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    config: Arc<AgentConfig>,
    bus: Arc<EventBus>,
    templates: Arc<PromptTemplates>,
    gate: Arc<dyn ApprovalGate>,
    /// Reason a malformed first-reply `create_plan` was rejected; consumed
    /// by the next dispatch of that call in the Direct fallback.
    pending_plan_rejection: Option<String>,
}

enum StepOutcome {
    /// The model stopped calling tools (or hit the per-step cap).
    Completed { result: String, files: Vec<String> },
    /// `task_complete` was called: finish the whole plan.
    TaskComplete { summary: String, files: Vec<String> },
    /// A fatal tool failure.
    Failed { error: String },
    /// Cumulative anomalies crossed the replan threshold.
    AnomalyOverflow,
    Cancelled,
    Transport { message: String },
}

enum ReplanOutcome {
    Replanned,
    Refused,
    Cancelled,
    Transport { message: String },
}

impl PlanExecuteAgent {
    pub fn new(
        ctx: AgentContext,
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: Arc<AgentConfig>,
        bus: Arc<EventBus>,
        templates: Arc<PromptTemplates>,
    ) -> Self {
        Self {
            ctx,
            model,
            tools,
            config,
            bus,
            templates,
            gate: Arc::new(AutoApprove),
            pending_plan_rejection: None,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.ctx
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// One user turn without external cancellation.
    pub async fn chat(&mut self, input: &str) -> anyhow::Result<()> {
        let (_keep, cancel) = oneshot::channel();
        self.chat_with_cancel(input, cancel).await
    }

    /// One user turn.  A send on (or drop of) the `cancel` sender abandons
    /// the current model call or tool invocation cooperatively; every path
    /// ends with `response_end`.
    pub async fn chat_with_cancel(
        &mut self,
        input: &str,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        self.ctx.task = input.to_string();
        self.ctx.conversation.push_user(input);

        let system = prompts::system_prompt(&self.templates, &self.ctx, &self.config, None);
        let first = match self.call_model(system, &mut cancel).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.bus.emit(AgentEvent::ResponseStart {
                    mode: RunMode::Direct,
                });
                self.emit_error("cancelled", "turn cancelled before the first model reply");
                self.bus.emit(AgentEvent::ResponseEnd);
                return Ok(());
            }
            Err(e) => {
                self.bus.emit(AgentEvent::ResponseStart {
                    mode: RunMode::Direct,
                });
                self.emit_error("llm_transport", &e.to_string());
                self.bus.emit(AgentEvent::ResponseEnd);
                return Ok(());
            }
        };

        // Mode selection: a create_plan call is honored only in this first
        // reply; anywhere later it comes back to the model as a failure.
        let outcome = if let Some(call) = first.find_call("create_plan").cloned() {
            match self.parse_plan(&call) {
                Ok(plan) => {
                    self.bus.emit(AgentEvent::ResponseStart {
                        mode: RunMode::Plan,
                    });
                    self.ctx
                        .conversation
                        .push_assistant_with_calls(first.text.clone(), vec![call.clone()]);
                    self.ctx.conversation.push_tool_result(
                        &call.id,
                        "create_plan",
                        format!("plan accepted with {} steps", plan.steps().len()),
                        None,
                    );
                    self.run_plan(plan, &mut cancel).await
                }
                Err(reason) => {
                    warn!(reason = %reason, "rejecting malformed create_plan; falling back to direct mode");
                    self.bus.emit(AgentEvent::ResponseStart {
                        mode: RunMode::Direct,
                    });
                    self.pending_plan_rejection = Some(reason);
                    self.run_direct(first, &mut cancel).await
                }
            }
        } else {
            self.bus.emit(AgentEvent::ResponseStart {
                mode: RunMode::Direct,
            });
            self.run_direct(first, &mut cancel).await
        };

        if let Err(e) = outcome {
            // Internal invariant failure: close the turn cleanly anyway.
            self.emit_error("internal", &e.to_string());
            self.bus.emit(AgentEvent::ResponseEnd);
        }
        Ok(())
    }

    // ── Direct mode ──────────────────────────────────────────────────────────

    async fn run_direct(
        &mut self,
        mut reply: ChatReply,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        for _round in 0..self.config.max_iterations {
            if !reply.has_tool_calls() {
                if !reply.text.is_empty() {
                    self.ctx.conversation.push_assistant(&reply.text);
                    self.bus.emit(AgentEvent::Token {
                        content: reply.text.clone(),
                    });
                }
                self.bus.emit(AgentEvent::ResponseEnd);
                return Ok(());
            }

            self.ctx
                .conversation
                .push_assistant_with_calls(&reply.text, reply.tool_calls.clone());
            if !reply.text.is_empty() {
                self.bus.emit(AgentEvent::Token {
                    content: reply.text.clone(),
                });
            }
            for call in reply.tool_calls.clone() {
                let _ = self.dispatch_call(&call, None, true).await;
            }

            let system = prompts::system_prompt(&self.templates, &self.ctx, &self.config, None);
            reply = match self.call_model(system, cancel).await {
                Ok(Some(r)) => r,
                Ok(None) => {
                    self.emit_error("cancelled", "turn cancelled");
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
                Err(e) => {
                    self.emit_error("llm_transport", &e.to_string());
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
            };
        }

        self.emit_error(
            "tool_loop_exhausted",
            &format!("no answer after {} tool rounds", self.config.max_iterations),
        );
        self.bus.emit(AgentEvent::ResponseEnd);
        Ok(())
    }

    // ── Plan mode ────────────────────────────────────────────────────────────

    async fn run_plan(
        &mut self,
        mut plan: Plan,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        self.bus.emit(AgentEvent::PlanCreated { plan: plan.clone() });

        if self.config.plan_approval {
            self.bus.emit(AgentEvent::PlanAwaitingApproval { plan: plan.clone() });
            let decision = tokio::select! {
                biased;
                _ = &mut *cancel => None,
                d = self.gate.review(&plan) => Some(d),
            };
            match decision {
                None => {
                    plan.cancel();
                    self.ctx.plan = Some(plan);
                    self.bus.emit(AgentEvent::PlanExecutionCancelled);
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
                Some(PlanDecision::Approved) => {
                    self.bus.emit(AgentEvent::PlanApproved);
                }
                Some(PlanDecision::Rejected { reason }) => {
                    plan.cancel();
                    self.ctx.plan = Some(plan);
                    self.bus.emit(AgentEvent::PlanRejected { reason });
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
                Some(PlanDecision::Modified { steps }) => match plan.replace_steps(steps) {
                    Ok(()) => {
                        self.bus.emit(AgentEvent::PlanModified { plan: plan.clone() });
                    }
                    Err(e) => {
                        plan.cancel();
                        self.ctx.plan = Some(plan);
                        self.bus.emit(AgentEvent::PlanRejected {
                            reason: format!("modification invalid: {e}"),
                        });
                        self.bus.emit(AgentEvent::ResponseEnd);
                        return Ok(());
                    }
                },
            }
        }

        plan.start_execution()?;
        self.ctx.plan = Some(plan.clone());
        self.bus.emit(AgentEvent::PlanExecutionStarted { plan: plan.clone() });

        let mut anomaly_count: u32 = 0;
        let mut did_replan = false;

        while let Some(step_id) = plan.next_pending_step() {
            plan.start_step(step_id)?;
            self.ctx.plan = Some(plan.clone());
            let description = plan.step(step_id)?.description.clone();
            self.bus.emit(AgentEvent::StepStarted {
                step_id,
                description,
                progress: plan.progress(),
            });

            let outcome = self
                .run_step(&mut plan, step_id, cancel, &mut anomaly_count)
                .await?;
            match outcome {
                StepOutcome::Completed { result, files } => {
                    plan.complete_step(step_id, result, files)?;
                    self.ctx.plan = Some(plan.clone());
                    self.bus.emit(AgentEvent::StepCompleted {
                        step_id,
                        files_changed: plan.step(step_id)?.files_changed.clone(),
                        progress: plan.progress(),
                    });
                    // The threshold can also be crossed by the step's terminal
                    // reply; the replan policy applies either way.
                    if anomaly_count >= self.config.anomaly_replan_threshold
                        && !did_replan
                        && plan.next_pending_step().is_some()
                    {
                        self.bus.emit(AgentEvent::Status {
                            message: "replanning after repeated anomalies".into(),
                        });
                        match self
                            .try_replan(&mut plan, "repeated anomalies during execution", cancel)
                            .await?
                        {
                            ReplanOutcome::Replanned => {
                                did_replan = true;
                                anomaly_count = 0;
                            }
                            ReplanOutcome::Refused => {}
                            ReplanOutcome::Cancelled => {
                                plan.cancel();
                                self.ctx.plan = Some(plan);
                                self.bus.emit(AgentEvent::PlanExecutionCancelled);
                                self.bus.emit(AgentEvent::ResponseEnd);
                                return Ok(());
                            }
                            ReplanOutcome::Transport { message } => {
                                plan.fail();
                                self.ctx.plan = Some(plan);
                                self.emit_error("llm_transport", &message);
                                self.bus
                                    .emit(AgentEvent::PlanExecutionFailed { error: message });
                                self.bus.emit(AgentEvent::ResponseEnd);
                                return Ok(());
                            }
                        }
                    }
                }
                StepOutcome::TaskComplete { summary, files } => {
                    plan.complete_step(step_id, summary.clone(), files)?;
                    plan.skip_remaining();
                    plan.complete()?;
                    self.ctx.plan = Some(plan.clone());
                    self.bus.emit(AgentEvent::StepCompleted {
                        step_id,
                        files_changed: plan.step(step_id)?.files_changed.clone(),
                        progress: plan.progress(),
                    });
                    self.bus
                        .emit(AgentEvent::PlanExecutionCompleted { summary });
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
                StepOutcome::Cancelled => {
                    plan.cancel();
                    self.ctx.plan = Some(plan);
                    self.bus.emit(AgentEvent::PlanExecutionCancelled);
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
                StepOutcome::Transport { message } => {
                    plan.fail();
                    self.ctx.plan = Some(plan);
                    self.emit_error("llm_transport", &message);
                    self.bus.emit(AgentEvent::PlanExecutionFailed { error: message });
                    self.bus.emit(AgentEvent::ResponseEnd);
                    return Ok(());
                }
                StepOutcome::Failed { error } => {
                    plan.fail_step(step_id, &error)?;
                    self.ctx.plan = Some(plan.clone());
                    self.bus.emit(AgentEvent::StepFailed {
                        step_id,
                        error: error.clone(),
                    });
                    if did_replan {
                        return self.finish_failed(plan, &error);
                    }
                    match self.try_replan(&mut plan, &error, cancel).await? {
                        ReplanOutcome::Replanned => {
                            did_replan = true;
                            anomaly_count = 0;
                            continue;
                        }
                        ReplanOutcome::Refused => return self.finish_failed(plan, &error),
                        ReplanOutcome::Cancelled => {
                            plan.cancel();
                            self.ctx.plan = Some(plan);
                            self.bus.emit(AgentEvent::PlanExecutionCancelled);
                            self.bus.emit(AgentEvent::ResponseEnd);
                            return Ok(());
                        }
                        ReplanOutcome::Transport { message } => {
                            plan.fail();
                            self.ctx.plan = Some(plan);
                            self.emit_error("llm_transport", &message);
                            self.bus
                                .emit(AgentEvent::PlanExecutionFailed { error: message });
                            self.bus.emit(AgentEvent::ResponseEnd);
                            return Ok(());
                        }
                    }
                }
                StepOutcome::AnomalyOverflow => {
                    self.bus.emit(AgentEvent::Status {
                        message: "replanning after repeated anomalies".into(),
                    });
                    if did_replan {
                        return self.finish_failed(plan, "repeated anomalies after replan");
                    }
                    match self
                        .try_replan(&mut plan, "repeated anomalies during execution", cancel)
                        .await?
                    {
                        ReplanOutcome::Replanned => {
                            did_replan = true;
                            anomaly_count = 0;
                            continue;
                        }
                        ReplanOutcome::Refused => {
                            return self.finish_failed(plan, "repeated anomalies")
                        }
                        ReplanOutcome::Cancelled => {
                            plan.cancel();
                            self.ctx.plan = Some(plan);
                            self.bus.emit(AgentEvent::PlanExecutionCancelled);
                            self.bus.emit(AgentEvent::ResponseEnd);
                            return Ok(());
                        }
                        ReplanOutcome::Transport { message } => {
                            plan.fail();
                            self.ctx.plan = Some(plan);
                            self.emit_error("llm_transport", &message);
                            self.bus
                                .emit(AgentEvent::PlanExecutionFailed { error: message });
                            self.bus.emit(AgentEvent::ResponseEnd);
                            return Ok(());
                        }
                    }
                }
            }
        }

        if plan.all_steps_done() {
            plan.complete()?;
            let summary = plan.completion_summary();
            self.ctx.plan = Some(plan);
            self.bus
                .emit(AgentEvent::PlanExecutionCompleted { summary });
        } else {
            let error = "plan ended with unfinished steps".to_string();
            plan.fail();
            self.ctx.plan = Some(plan);
            self.bus.emit(AgentEvent::PlanExecutionFailed { error });
        }
        self.bus.emit(AgentEvent::ResponseEnd);
        Ok(())
    }

    fn finish_failed(&mut self, mut plan: Plan, error: &str) -> anyhow::Result<()> {
        plan.fail();
        self.ctx.plan = Some(plan);
        self.bus.emit(AgentEvent::PlanExecutionFailed {
            error: error.to_string(),
        });
        self.bus.emit(AgentEvent::ResponseEnd);
        Ok(())
    }

    async fn run_step(
        &mut self,
        plan: &mut Plan,
        step_id: u32,
        cancel: &mut oneshot::Receiver<()>,
        anomaly_count: &mut u32,
    ) -> anyhow::Result<StepOutcome> {
        let step = plan.step(step_id)?.clone();
        let mut detector = AnomalyDetector::new();
        let mut files: Vec<String> = Vec::new();
        self.ctx
            .conversation
            .push_user(prompts::step_brief(plan, &step));

        for _round in 0..self.config.step_max_iterations {
            let system =
                prompts::system_prompt(&self.templates, &self.ctx, &self.config, Some(&step));
            let reply = match self.call_model(system, cancel).await {
                Ok(Some(r)) => r,
                Ok(None) => return Ok(StepOutcome::Cancelled),
                Err(e) => {
                    return Ok(StepOutcome::Transport {
                        message: e.to_string(),
                    })
                }
            };

            for anomaly in detector.inspect(&reply, plan, step_id, &self.ctx.code) {
                *anomaly_count += 1;
                match anomaly.kind {
                    AnomalyKind::Loop => self.bus.emit(AgentEvent::ReplanWarning {
                        message: anomaly.message,
                    }),
                    _ => self.bus.emit(AgentEvent::AnomalyDetected {
                        message: anomaly.message,
                    }),
                };
            }

            if !reply.text.is_empty() {
                self.bus.emit(AgentEvent::StepOutput {
                    step_id,
                    content: reply.text.clone(),
                });
            }

            if !reply.has_tool_calls() {
                self.ctx.conversation.push_assistant(&reply.text);
                let result = if reply.text.is_empty() {
                    format!("step {step_id} finished")
                } else {
                    reply.text.clone()
                };
                return Ok(StepOutcome::Completed { result, files });
            }

            self.ctx
                .conversation
                .push_assistant_with_calls(&reply.text, reply.tool_calls.clone());

            let mut task_complete: Option<String> = None;
            let mut fatal: Option<String> = None;
            for call in reply.tool_calls.clone() {
                let allowed = step.tools_needed.is_empty()
                    || step.tools_needed.iter().any(|t| t == &call.name)
                    || call.name == "task_complete";
                let result = self.dispatch_call(&call, Some(step_id), allowed).await;
                plan.record_tool_call(
                    step_id,
                    ToolCallRecord {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        success: result.success,
                    },
                )?;
                for f in &result.files_changed {
                    if !files.contains(f) {
                        files.push(f.clone());
                    }
                }
                if call.name == "task_complete" && result.success {
                    task_complete = Some(
                        call.arguments
                            .get("summary")
                            .and_then(|v| v.as_str())
                            .unwrap_or("task complete")
                            .to_string(),
                    );
                }
                if result.is_fatal() {
                    fatal = Some(
                        result
                            .error
                            .as_ref()
                            .map(|e| e.message.clone())
                            .unwrap_or_else(|| "fatal tool failure".into()),
                    );
                }
            }

            if let Some(error) = fatal {
                return Ok(StepOutcome::Failed { error });
            }
            if let Some(summary) = task_complete {
                return Ok(StepOutcome::TaskComplete { summary, files });
            }
            if *anomaly_count >= self.config.anomaly_replan_threshold {
                return Ok(StepOutcome::AnomalyOverflow);
            }
        }

        // Per-step iteration cap: the step terminates as done with what it has.
        Ok(StepOutcome::Completed {
            result: format!(
                "step stopped after {} tool rounds",
                self.config.step_max_iterations
            ),
            files,
        })
    }

    /// Ask the model for a fresh plan after anomalies or a failed step.
    async fn try_replan(
        &mut self,
        plan: &mut Plan,
        reason: &str,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<ReplanOutcome> {
        debug!(reason, "requesting replan");
        self.ctx
            .conversation
            .push_user(prompts::replan_prompt(plan, reason));
        let system = prompts::system_prompt(&self.templates, &self.ctx, &self.config, None);
        let reply = match self.call_model(system, cancel).await {
            Ok(Some(r)) => r,
            Ok(None) => return Ok(ReplanOutcome::Cancelled),
            Err(e) => {
                return Ok(ReplanOutcome::Transport {
                    message: e.to_string(),
                })
            }
        };

        let Some(call) = reply.find_call("create_plan").cloned() else {
            return Ok(ReplanOutcome::Refused);
        };
        let drafts = match self.parse_drafts(&call) {
            Ok(d) => d,
            Err(reason) => {
                warn!(reason = %reason, "replan rejected");
                return Ok(ReplanOutcome::Refused);
            }
        };
        if plan.replan(drafts).is_err() {
            return Ok(ReplanOutcome::Refused);
        }
        self.ctx
            .conversation
            .push_assistant_with_calls(reply.text.clone(), vec![call.clone()]);
        self.ctx.conversation.push_tool_result(
            &call.id,
            "create_plan",
            format!("plan updated (version {})", plan.version),
            None,
        );
        self.ctx.plan = Some(plan.clone());
        self.bus.emit(AgentEvent::PlanCreated { plan: plan.clone() });
        Ok(ReplanOutcome::Replanned)
    }

    // ── Shared plumbing ──────────────────────────────────────────────────────

    /// Validate a `create_plan` call into a [`Plan`].
    fn parse_plan(&self, call: &ToolCallRequest) -> Result<Plan, String> {
        let task = call
            .arguments
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.ctx.task)
            .to_string();
        let drafts = self.parse_drafts(call)?;
        Plan::new(task, drafts).map_err(|e| e.to_string())
    }

    fn parse_drafts(&self, call: &ToolCallRequest) -> Result<Vec<PlanStepDraft>, String> {
        let steps = call
            .arguments
            .get("steps")
            .cloned()
            .ok_or_else(|| "create_plan is missing 'steps'".to_string())?;
        let drafts: Vec<PlanStepDraft> =
            serde_json::from_value(steps).map_err(|e| format!("malformed steps: {e}"))?;
        if drafts.is_empty() {
            return Err("create_plan has no steps".to_string());
        }
        if drafts.iter().any(|d| d.description.trim().is_empty()) {
            return Err("every step needs a description".to_string());
        }
        Ok(drafts)
    }

    /// Execute one tool call: emit the call/result event pair adjacently,
    /// apply context effects, and append the tool message to history.
    async fn dispatch_call(
        &mut self,
        call: &ToolCallRequest,
        step_id: Option<u32>,
        allowed: bool,
    ) -> ToolResult {
        self.bus.emit(AgentEvent::ToolCalls {
            step_id,
            calls: vec![ToolCallBrief {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            }],
        });

        let result = if call.name == "create_plan" {
            let reason = self
                .pending_plan_rejection
                .take()
                .unwrap_or_else(|| "create_plan is only honored as the first action of a turn".into());
            ToolResult::err(ToolErrorKind::PlanValidation, reason)
        } else if !allowed {
            ToolResult::err(
                ToolErrorKind::ToolNotAllowed,
                format!("tool '{}' is not in this step's allow-list", call.name),
            )
        } else {
            self.tools.execute(call).await
        };

        self.bus.emit(AgentEvent::ToolResult {
            step_id,
            tool_call_id: call.id.clone(),
            tool: call.name.clone(),
            success: result.success,
            output_summary: summarize(&result.for_model()),
            error: result.error.as_ref().map(|e| e.message.clone()),
        });

        self.apply_effects(call, &result);
        self.ctx.conversation.push_tool_result(
            &call.id,
            &call.name,
            result.for_model(),
            result.focus.as_ref().map(|(p, _)| p.clone()),
        );
        result
    }

    /// Propagate a tool result into the session context: focused files,
    /// symbol index, and coarse `file_change` invalidation events.
    fn apply_effects(&mut self, call: &ToolCallRequest, result: &ToolResult) {
        if let Some((path, content)) = &result.focus {
            self.ctx.code.focus(path.clone(), content.clone());
            if matches!(call.name.as_str(), "write_file" | "patch_file") {
                self.ctx.code.mark_editing(path, true);
            }
            if path.ends_with(".py") {
                self.ctx
                    .symbols
                    .with_mut(|idx| idx.index_source(path, content));
            }
        }

        if result.success {
            match call.name.as_str() {
                "delete_file" => {
                    if let Some(path) = call.arguments.get("path").and_then(|v| v.as_str()) {
                        self.ctx.code.remove(path);
                        self.ctx.symbols.with_mut(|idx| idx.remove_file(path));
                    }
                }
                "move_file" => {
                    let from = call.arguments.get("from").and_then(|v| v.as_str());
                    let to = call.arguments.get("to").and_then(|v| v.as_str());
                    if let (Some(from), Some(to)) = (from, to) {
                        self.ctx.code.rename(from, to);
                        self.ctx.symbols.with_mut(|idx| idx.rename_file(from, to));
                    }
                }
                _ => {}
            }
        }

        for path in &result.files_changed {
            self.bus.emit(AgentEvent::FileChange { path: path.clone() });
        }
    }

    /// One model call with the transport retry policy, cancellable at the
    /// await point.  `Ok(None)` means the turn was cancelled.
    async fn call_model(
        &mut self,
        system: String,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<Option<ChatReply>> {
        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(self.ctx.conversation.project());
        let req = ChatRequest {
            messages,
            tools: self.tools.schemas(),
            temperature: None,
            max_tokens: None,
        };
        let reply = tokio::select! {
            biased;
            _ = &mut *cancel => return Ok(None),
            r = chat_with_retry(self.model.as_ref(), req) => r?,
        };
        Ok(Some(reply))
    }

    fn emit_error(&self, kind: &str, message: &str) {
        warn!(kind, message, "turn error");
        self.bus.emit(AgentEvent::Error {
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }
}

fn summarize(s: &str) -> String {
    if s.len() <= SUMMARY_CHARS {
        return s.to_string();
    }
    let mut cut = SUMMARY_CHARS;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
