// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use quanta_config::Config;
use quanta_context::{AgentContext, AgentKind};
use quanta_core::{AgentEvent, EventBus, PlanExecuteAgent, PromptTemplates};
use quanta_executor::{MarketData, OrderGateway, OrderSink, RuleExecutor};
use quanta_model::ModelProvider;
use quanta_sandbox::{SandboxEvent, SandboxRunner};
use quanta_tools::{
    CreatePlanTool, DeleteFileTool, FindReferencesTool, GetDefinitionTool, GetFileOutlineTool,
    GrepTool, ListDirectoryTool, MoveFileTool, PatchFileTool, ReadFileTool, ShellExecTool,
    TaskCompleteTool, ToolRegistry, Workspace, WriteFileTool,
};

use crate::rules::{RuleStore, SaveRuleTool};

/// A Code Agent wired to a project workspace: full file/search/symbol
/// toolset plus a sandboxed `shell_exec`, with sandbox output forwarded to
/// the session's event bus as `file_run_*` frames.
pub struct CodeAgentHost {
    pub session_id: String,
    pub agent: PlanExecuteAgent,
    pub bus: Arc<EventBus>,
    pub workspace: Arc<Workspace>,
    pub runner: Arc<SandboxRunner>,
    forwarder: JoinHandle<()>,
}

impl CodeAgentHost {
    pub fn build(
        user_id: &str,
        project_id: &str,
        config: &Config,
        model: Arc<dyn ModelProvider>,
        templates: Arc<PromptTemplates>,
    ) -> anyhow::Result<Self> {
        let root = std::path::Path::new(&config.workspace.expanded_root())
            .join(user_id)
            .join(project_id);
        let workspace = Arc::new(Workspace::open(root)?);
        let session_id = Uuid::new_v4().to_string();
        let bus = Arc::new(EventBus::new(config.agent.event_retention));
        let runner = Arc::new(SandboxRunner::new(&config.sandbox));

        // Sandbox output streams through this channel onto the bus in real
        // time, while the shell_exec tool is still blocked on the process.
        let (sandbox_tx, sandbox_rx) = mpsc::channel::<SandboxEvent>(256);
        let forwarder = spawn_sandbox_forwarder(sandbox_rx, Arc::clone(&bus));

        let agent_cfg = Arc::new(config.agent.clone());
        let ctx = AgentContext::new(&session_id, project_id, AgentKind::CodeAgent, &agent_cfg);

        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool::new(
            Arc::clone(&workspace),
            config.agent.large_file_preview_lines,
        ));
        registry.register(WriteFileTool::new(Arc::clone(&workspace)));
        registry.register(PatchFileTool::new(Arc::clone(&workspace)));
        registry.register(ListDirectoryTool::new(Arc::clone(&workspace)));
        registry.register(DeleteFileTool::new(Arc::clone(&workspace)));
        registry.register(MoveFileTool::new(Arc::clone(&workspace)));
        registry.register(GrepTool::new(Arc::clone(&workspace)));
        registry.register(GetFileOutlineTool::new(ctx.symbols.clone()));
        registry.register(GetDefinitionTool::new(ctx.symbols.clone()));
        registry.register(FindReferencesTool::new(Arc::clone(&workspace)));
        registry.register(CreatePlanTool);
        registry.register(TaskCompleteTool);
        registry.register(
            ShellExecTool::new(
                Arc::clone(&runner),
                sandbox_tx,
                user_id,
                workspace.root().to_path_buf(),
            )
            .with_default_timeout(
                quanta_sandbox::RunTimeout::parse(&config.sandbox.default_timeout)
                    .unwrap_or(quanta_sandbox::RunTimeout::FIVE_MINUTES),
            ),
        );

        let agent = PlanExecuteAgent::new(
            ctx,
            model,
            Arc::new(registry),
            agent_cfg,
            Arc::clone(&bus),
            templates,
        );
        Ok(Self {
            session_id,
            agent,
            bus,
            workspace,
            runner,
            forwarder,
        })
    }
}

impl Drop for CodeAgentHost {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

fn spawn_sandbox_forwarder(
    mut rx: mpsc::Receiver<SandboxEvent>,
    bus: Arc<EventBus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mapped = match event {
                SandboxEvent::Started { command } => AgentEvent::FileRunStarted { command },
                SandboxEvent::Stdout { chunk } => AgentEvent::FileRunStdout { chunk },
                SandboxEvent::Stderr { chunk } => AgentEvent::FileRunStderr { chunk },
                SandboxEvent::Exit {
                    exit_code,
                    duration_ms,
                    ..
                } => AgentEvent::FileRunExit {
                    exit_code,
                    duration_ms,
                },
            };
            bus.emit(mapped);
        }
    })
}

/// A Rule Collector session: dialogue-only toolset ending in `save_rule`.
pub struct CollectorHost {
    pub session_id: String,
    pub agent: PlanExecuteAgent,
    pub bus: Arc<EventBus>,
}

impl CollectorHost {
    pub fn build(
        user_id: &str,
        config: &Config,
        model: Arc<dyn ModelProvider>,
        templates: Arc<PromptTemplates>,
        store: Arc<dyn RuleStore>,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string();
        let bus = Arc::new(EventBus::new(config.agent.event_retention));
        let agent_cfg = Arc::new(config.agent.clone());
        let ctx = AgentContext::new(&session_id, "collector", AgentKind::Collector, &agent_cfg);

        let mut registry = ToolRegistry::new();
        registry.register(SaveRuleTool::new(store, user_id));

        let agent = PlanExecuteAgent::new(
            ctx,
            model,
            Arc::new(registry),
            agent_cfg,
            Arc::clone(&bus),
            templates,
        );
        Self {
            session_id,
            agent,
            bus,
        }
    }
}

/// Assemble the rule executor service from configuration and its external
/// collaborators.
pub fn build_rule_executor(
    config: &Config,
    model: Arc<dyn ModelProvider>,
    market: Arc<dyn MarketData>,
    gateway: Arc<dyn OrderGateway>,
    sink: Arc<dyn OrderSink>,
    templates: Arc<PromptTemplates>,
) -> RuleExecutor {
    RuleExecutor::new(
        model,
        market,
        gateway,
        sink,
        Arc::new(config.agent.clone()),
        Arc::new(config.executor.clone()),
        templates,
    )
}
