// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use quanta_config::AgentConfig;
use quanta_context::{AgentContext, AgentKind, Plan, PlanStep};

/// Prompt templates are versioned data, not code: loaded once at startup and
/// handed to each agent at construction.  The defaults below ship with the
/// platform; deployments may override any of them.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub collector_role: String,
    pub executor_role: String,
    pub code_role: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            collector_role: "You are a trading-strategy assistant. Through dialogue, elicit a \
                complete structured strategy from the user: market (spot or contract), symbols, \
                timeframe, entry rules, take-profit, stop-loss, max position ratio, and total \
                capital. Ask for what is missing; when everything is known, call save_rule."
                .into(),
            executor_role: "You are a strategy execution engine. Evaluate the given trading rule \
                against current market data using your tools, then answer with EXACTLY one JSON \
                object: {\"action\": \"buy\"|\"sell\"|\"hold\", \"reason\": \"...\", \
                \"confidence\": 0.0-1.0}. No other text in the final reply."
                .into(),
            code_role: "You are a coding assistant working inside a project workspace. Use the \
                file and shell tools to inspect, edit, and run the project. For multi-step tasks \
                call create_plan in your FIRST reply; for simple requests act directly. Never \
                guess file contents - read them."
                .into(),
        }
    }
}

impl PromptTemplates {
    pub fn role_for(&self, kind: AgentKind) -> &str {
        match kind {
            AgentKind::Collector => &self.collector_role,
            AgentKind::Executor => &self.executor_role,
            AgentKind::CodeAgent => &self.code_role,
        }
    }
}

/// Assemble the system prompt: role framing, project identity, active files,
/// repo map, then recent memory.  For a plan step, files relevant to the
/// step are inlined in full; otherwise only paths are listed.
pub fn system_prompt(
    templates: &PromptTemplates,
    ctx: &AgentContext,
    cfg: &AgentConfig,
    step: Option<&PlanStep>,
) -> String {
    let mut out = String::new();
    out.push_str(
        cfg.system_prompt
            .as_deref()
            .unwrap_or_else(|| templates.role_for(ctx.agent_mode)),
    );
    out.push_str("\n\n");
    out.push_str(&format!("Project: {}\n", ctx.project_id));

    let paths = ctx.code.paths();
    if !paths.is_empty() {
        out.push_str("\nActive files:\n");
        match step {
            Some(step) => {
                let step_text =
                    format!("{} {}", step.description, step.expected_outcome).to_lowercase();
                for entry in ctx.code.iter() {
                    if step_text.contains(&entry.path.to_lowercase()) {
                        out.push_str(&format!(
                            "--- {} ({}) ---\n{}\n",
                            entry.path, entry.language, entry.content
                        ));
                    } else {
                        out.push_str(&format!("- {}\n", entry.path));
                    }
                }
            }
            None => {
                for path in paths {
                    out.push_str(&format!("- {path}\n"));
                }
            }
        }
    }

    let repo_map = ctx
        .symbols
        .with(|idx| idx.to_repo_map_string(cfg.repo_map_max_files));
    if !repo_map.is_empty() {
        out.push_str("\nRepo map:\n");
        out.push_str(&repo_map);
    }

    let decisions = ctx.memory.recent_decisions(cfg.memory_decisions_in_prompt);
    if !decisions.is_empty() {
        out.push_str("\nRecent decisions:\n");
        for d in decisions {
            out.push_str(&format!("- {} ({})\n", d.decision, d.reason));
        }
    }
    let conventions = ctx
        .memory
        .recent_conventions(cfg.memory_conventions_in_prompt);
    if !conventions.is_empty() {
        out.push_str("\nProject conventions:\n");
        for c in conventions {
            out.push_str(&format!("- {c}\n"));
        }
    }
    out
}

/// The user prompt for one plan step: plan summary with the current step
/// marked, then this step's brief.
pub fn step_brief(plan: &Plan, step: &PlanStep) -> String {
    let mut out = String::new();
    out.push_str("Plan progress:\n");
    out.push_str(&plan.summary_lines());
    out.push_str(&format!("\nExecute step {} now: {}\n", step.id, step.description));
    if !step.expected_outcome.is_empty() {
        out.push_str(&format!("Expected outcome: {}\n", step.expected_outcome));
    }
    if !step.tools_needed.is_empty() {
        out.push_str(&format!("Allowed tools: {}\n", step.tools_needed.join(", ")));
    }
    out.push_str(
        "Work only on this step. Reply without tool calls when the step is complete.",
    );
    out
}

/// The replan request sent after repeated anomalies or a failed step.
pub fn replan_prompt(plan: &Plan, last_error: &str) -> String {
    format!(
        "Execution has gone off track.\nPlan so far:\n{}\nLast error: {}\n\
         Produce a fresh plan for what remains by calling create_plan again. \
         Keep completed work; do not repeat it.",
        plan.summary_lines(),
        last_error
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
