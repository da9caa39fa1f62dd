// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quanta_config::AgentConfig;

use crate::{
    code::CodeContext, conversation::ConversationHistory, memory::MemoryContext, plan::Plan,
    symbols::SharedSymbolIndex,
};

/// Which host owns this context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Elicits a structured trading strategy through dialogue.
    Collector,
    /// Evaluates live strategies on a timer.
    Executor,
    /// Plans and edits a project, runs scripts in the sandbox.
    CodeAgent,
}

/// Last-run bookkeeping for the sandboxed execution surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub working_dir: String,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// The per-session data model.  Created with the session, mutated only by
/// its owning agent (single-threaded with respect to itself), discarded when
/// the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    pub session_id: String,
    pub project_id: String,
    pub agent_mode: AgentKind,
    /// Current task or step brief.
    pub task: String,
    pub plan: Option<Plan>,
    pub conversation: ConversationHistory,
    pub code: CodeContext,
    pub symbols: SharedSymbolIndex,
    pub memory: MemoryContext,
    pub execution: ExecutionContext,
}

impl AgentContext {
    pub fn new(
        session_id: impl Into<String>,
        project_id: impl Into<String>,
        agent_mode: AgentKind,
        cfg: &AgentConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: project_id.into(),
            agent_mode,
            task: String::new(),
            plan: None,
            conversation: ConversationHistory::new(
                cfg.max_messages,
                cfg.shell_history_truncate_chars,
            ),
            code: CodeContext::new(cfg.focused_files_max_chars),
            symbols: SharedSymbolIndex::default(),
            memory: MemoryContext::default(),
            execution: ExecutionContext::default(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, PlanStepDraft};

    fn ctx() -> AgentContext {
        AgentContext::new("sess-1", "proj-1", AgentKind::CodeAgent, &AgentConfig::default())
    }

    #[test]
    fn new_context_is_empty() {
        let c = ctx();
        assert!(c.plan.is_none());
        assert!(c.conversation.is_empty());
        assert_eq!(c.code.total_chars(), 0);
    }

    #[test]
    fn serialize_and_reload_yields_equivalent_context() {
        let mut c = ctx();
        c.task = "change RSI period".into();
        c.conversation.push_user("把 RSI 周期从 14 改成 21");
        c.code.focus("strategy/rsi.py", "PERIOD = 14\n");
        c.symbols
            .with_mut(|idx| idx.index_source("strategy/rsi.py", "PERIOD = 14\n"));
        c.memory.add_decision("patch in place", "smallest diff");
        c.plan = Some(
            Plan::new(
                "edit period",
                vec![PlanStepDraft {
                    description: "patch the constant".into(),
                    expected_outcome: None,
                    tools_needed: Some(vec!["patch_file".into()]),
                }],
            )
            .unwrap(),
        );

        let json = serde_json::to_string(&c).unwrap();
        let back: AgentContext = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
        assert_eq!(
            back.symbols.with(|i| i.to_repo_map_string(20)),
            c.symbols.with(|i| i.to_repo_map_string(20))
        );
    }

    #[test]
    fn agent_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AgentKind::CodeAgent).unwrap(),
            "\"code_agent\""
        );
    }
}
