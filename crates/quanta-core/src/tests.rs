// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Orchestration tests driving the full agent loop against scripted model
//! replies — no network, real tools over a temp workspace.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;

use quanta_config::AgentConfig;
use quanta_context::{AgentContext, AgentKind, PlanStatus, StepStatus};
use quanta_model::{ChatReply, ChatRequest, ModelProvider, ScriptedProvider};
use quanta_tools::{
    CreatePlanTool, DeleteFileTool, GrepTool, ListDirectoryTool, MoveFileTool, PatchFileTool,
    ReadFileTool, TaskCompleteTool, ToolRegistry, Workspace, WriteFileTool,
};

use crate::{
    approval::{PlanDecision, ScriptedGate},
    bus::EventBus,
    events::{AgentEvent, RunMode},
    prompts::PromptTemplates,
    PlanExecuteAgent,
};

struct Fixture {
    agent: PlanExecuteAgent,
    provider: Arc<ScriptedProvider>,
    bus: Arc<EventBus>,
    ws: Arc<Workspace>,
    _dir: tempfile::TempDir,
}

fn fixture(scripts: Vec<ChatReply>) -> Fixture {
    fixture_with(scripts, AgentConfig::default())
}

fn fixture_with(scripts: Vec<ChatReply>, cfg: AgentConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let ws = Arc::new(Workspace::open(dir.path().join("proj")).unwrap());
    let ctx = AgentContext::new("sess-1", "proj", AgentKind::CodeAgent, &cfg);

    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool::new(Arc::clone(&ws), cfg.large_file_preview_lines));
    reg.register(WriteFileTool::new(Arc::clone(&ws)));
    reg.register(PatchFileTool::new(Arc::clone(&ws)));
    reg.register(GrepTool::new(Arc::clone(&ws)));
    reg.register(ListDirectoryTool::new(Arc::clone(&ws)));
    reg.register(DeleteFileTool::new(Arc::clone(&ws)));
    reg.register(MoveFileTool::new(Arc::clone(&ws)));
    reg.register(CreatePlanTool);
    reg.register(TaskCompleteTool);

    let provider = Arc::new(ScriptedProvider::new(scripts));
    let bus = Arc::new(EventBus::new(cfg.event_retention));
    let agent = PlanExecuteAgent::new(
        ctx,
        provider.clone(),
        Arc::new(reg),
        Arc::new(cfg),
        Arc::clone(&bus),
        Arc::new(PromptTemplates::default()),
    );
    Fixture {
        agent,
        provider,
        bus,
        ws,
        _dir: dir,
    }
}

fn kinds(bus: &EventBus) -> Vec<&'static str> {
    bus.retained().iter().map(|e| e.event.kind()).collect()
}

/// The §-level event invariant: response_start first, response_end last,
/// exactly one of each per turn.
fn assert_turn_brackets(kinds: &[&str]) {
    assert_eq!(kinds.first(), Some(&"response_start"), "{kinds:?}");
    assert_eq!(kinds.last(), Some(&"response_end"), "{kinds:?}");
    assert_eq!(kinds.iter().filter(|k| **k == "response_start").count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == "response_end").count(), 1);
}

fn plan_reply(steps: serde_json::Value) -> ChatReply {
    ChatReply::tool_call("cp-1", "create_plan", json!({"task": "demo", "steps": steps}))
}

// ── Direct mode ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_only_reply_is_direct_with_one_round() {
    let mut f = fixture(vec![ChatReply::text("just an answer")]);
    f.agent.chat("question").await.unwrap();

    assert_eq!(f.provider.calls(), 1, "exactly one LLM round");
    let ks = kinds(&f.bus);
    assert_turn_brackets(&ks);
    assert!(ks.contains(&"token"));
    let events = f.bus.retained();
    assert_eq!(
        events[0].event,
        AgentEvent::ResponseStart {
            mode: RunMode::Direct
        }
    );
}

#[tokio::test]
async fn direct_tool_loop_executes_and_answers() {
    let mut f = fixture(vec![
        ChatReply::tool_call("c1", "read_file", json!({"path": "a.py"})),
        ChatReply::text("PERIOD is 14"),
    ]);
    std::fs::write(f.ws.root().join("a.py"), "PERIOD = 14\n").unwrap();
    f.agent.chat("what is the period?").await.unwrap();

    assert_eq!(f.provider.calls(), 2);
    let ks = kinds(&f.bus);
    assert_turn_brackets(&ks);
    // Call/result pairs are adjacent in the stream.
    let call_pos = ks.iter().position(|k| *k == "tool_calls").unwrap();
    assert_eq!(ks[call_pos + 1], "tool_result");
    // The read landed in focused files.
    assert!(f.agent.context().code.contains("a.py"));
    assert!(f.agent.context().conversation.tool_pairs_are_complete());
}

#[tokio::test]
async fn file_content_never_appears_twice_in_prompts() {
    let mut f = fixture(vec![
        ChatReply::tool_call("c1", "read_file", json!({"path": "a.py"})),
        ChatReply::text("seen it"),
        ChatReply::text("second turn answer"),
    ]);
    std::fs::write(f.ws.root().join("a.py"), "VERY_UNIQUE_BYTES = 1\n").unwrap();
    f.agent.chat("read a.py").await.unwrap();
    f.agent.chat("anything else?").await.unwrap();

    let requests = f.provider.requests.lock().unwrap();
    // Round 2 (same turn as the read): full content goes to the model once.
    let round2_text: String = requests[1]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert!(round2_text.contains("VERY_UNIQUE_BYTES = 1"));
    // Round 3 (next turn): the tool message is abbreviated.
    let round3_text: String = requests[2]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert!(round3_text.contains("[read_file a.py; see focused_files]"));
    let dupes = round3_text.matches("VERY_UNIQUE_BYTES = 1").count();
    assert!(dupes <= 1, "full bytes appeared {dupes} times in one prompt");
}

#[tokio::test]
async fn exhausted_tool_loop_ends_with_error() {
    let cfg = AgentConfig {
        max_iterations: 2,
        ..Default::default()
    };
    let scripts = vec![
        ChatReply::tool_call("c1", "list_directory", json!({})),
        ChatReply::tool_call("c2", "list_directory", json!({})),
        ChatReply::tool_call("c3", "list_directory", json!({})),
    ];
    let mut f = fixture_with(scripts, cfg);
    f.agent.chat("loop forever").await.unwrap();

    let events = f.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::Error { kind, .. } if kind == "tool_loop_exhausted"
    )));
    assert_turn_brackets(&kinds(&f.bus));
}

#[tokio::test]
async fn late_create_plan_is_rejected_as_tool_failure() {
    let mut f = fixture(vec![
        ChatReply::tool_call("c1", "list_directory", json!({})),
        ChatReply::tool_call("c2", "create_plan", json!({"task": "t", "steps": [{"description": "d"}]})),
        ChatReply::text("fine, staying direct"),
    ]);
    f.agent.chat("go").await.unwrap();

    let events = f.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::ToolResult { tool, success: false, .. } if tool == "create_plan"
    )));
    // Still a direct turn from start to finish.
    assert_eq!(
        f.bus.retained()[0].event,
        AgentEvent::ResponseStart {
            mode: RunMode::Direct
        }
    );
    assert_turn_brackets(&kinds(&f.bus));
}

// ── Plan mode ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_step_plan_runs_to_completion() {
    let mut f = fixture(vec![
        plan_reply(json!([{"description": "answer the question"}])),
        ChatReply::text("step one done"),
    ]);
    f.agent.chat("plan something").await.unwrap();

    let ks = kinds(&f.bus);
    assert_turn_brackets(&ks);
    for expected in [
        "plan_created",
        "plan_execution_started",
        "step_started",
        "step_output",
        "step_completed",
        "plan_execution_completed",
    ] {
        assert!(ks.contains(&expected), "missing {expected} in {ks:?}");
    }
    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert!(plan.steps().iter().all(|s| s.status == StepStatus::Done));
}

#[tokio::test]
async fn empty_steps_fall_back_to_direct() {
    let mut f = fixture(vec![
        plan_reply(json!([])),
        ChatReply::text("doing it directly"),
    ]);
    f.agent.chat("try to plan").await.unwrap();

    assert_eq!(
        f.bus.retained()[0].event,
        AgentEvent::ResponseStart {
            mode: RunMode::Direct
        }
    );
    let events = f.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::ToolResult { tool, success: false, .. } if tool == "create_plan"
    )));
    assert!(f.agent.context().plan.is_none());
    assert_turn_brackets(&kinds(&f.bus));
}

#[tokio::test]
async fn plan_step_writes_file_and_reports_changes() {
    let mut f = fixture(vec![
        plan_reply(json!([
            {"description": "write the script", "tools_needed": ["write_file"]}
        ])),
        ChatReply::tool_call(
            "c1",
            "write_file",
            json!({"path": "main.py", "content": "print('hello')\n"}),
        ),
        ChatReply::text("written"),
    ]);
    f.agent.chat("write hello").await.unwrap();

    assert!(f.ws.root().join("main.py").exists());
    let events = f.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::FileChange { path } if path == "main.py"
    )));
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::StepCompleted { files_changed, .. } if files_changed.contains(&"main.py".to_string())
    )));
    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.step(1).unwrap().files_changed, vec!["main.py"]);
}

#[tokio::test]
async fn step_allow_list_blocks_other_tools() {
    let mut f = fixture(vec![
        plan_reply(json!([
            {"description": "only write", "tools_needed": ["write_file"]}
        ])),
        ChatReply::tool_call("c1", "grep", json!({"pattern": "x"})),
        ChatReply::text("ok, stopping"),
    ]);
    f.agent.chat("go").await.unwrap();

    let events = f.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::ToolResult { tool, success: false, error: Some(err), .. }
            if tool == "grep" && err.contains("allow-list")
    )));
    // The blocked call does not fail the step.
    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
}

#[tokio::test]
async fn task_complete_skips_remaining_steps() {
    let mut f = fixture(vec![
        plan_reply(json!([
            {"description": "first"},
            {"description": "second"},
            {"description": "third"}
        ])),
        ChatReply::tool_call("c1", "task_complete", json!({"summary": "all done early"})),
    ]);
    f.agent.chat("go").await.unwrap();

    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_eq!(plan.step(1).unwrap().status, StepStatus::Done);
    assert_eq!(plan.step(2).unwrap().status, StepStatus::Skipped);
    assert_eq!(plan.step(3).unwrap().status, StepStatus::Skipped);
    let events = f.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::PlanExecutionCompleted { summary } if summary == "all done early"
    )));
}

#[tokio::test]
async fn path_escape_fails_the_step() {
    let mut f = fixture(vec![
        plan_reply(json!([{"description": "write somewhere bad"}])),
        ChatReply::tool_call(
            "c1",
            "write_file",
            json!({"path": "../../outside.py", "content": "x"}),
        ),
        // Replan request refused: plain text, no create_plan.
        ChatReply::text("cannot recover"),
    ]);
    f.agent.chat("go").await.unwrap();

    let ks = kinds(&f.bus);
    assert!(ks.contains(&"step_failed"), "{ks:?}");
    assert!(ks.contains(&"plan_execution_failed"), "{ks:?}");
    assert_turn_brackets(&ks);
    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
}

// ── Anomalies and replan ─────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_identical_calls_trigger_replan_with_reset_ids() {
    let same_call = || ChatReply::tool_call("c", "list_directory", json!({}));
    let mut f = fixture(vec![
        plan_reply(json!([
            {"description": "gather inputs"},
            {"description": "produce report"}
        ])),
        // Step 1 completes normally.
        ChatReply::text("inputs gathered"),
        // Step 2 loops: identical call bags; the loop anomaly fires on the
        // 3rd, 4th and 5th reply, crossing the replan threshold.
        same_call(),
        same_call(),
        same_call(),
        same_call(),
        same_call(),
        // Replan request: the model produces a fresh plan.
        ChatReply::tool_call("cp-2", "create_plan", json!({
            "task": "demo",
            "steps": [{"description": "produce report differently"}]
        })),
        // New step 1 completes.
        ChatReply::text("report produced"),
    ]);
    f.agent.chat("go").await.unwrap();

    let ks = kinds(&f.bus);
    assert!(ks.contains(&"replan_warning"), "{ks:?}");
    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.replan_count, 1);
    assert_eq!(plan.version, 2);
    let ids: Vec<u32> = plan.steps().iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![1]);
    assert_eq!(plan.status, PlanStatus::Completed);
    assert_turn_brackets(&ks);
}

#[tokio::test]
async fn second_failure_after_replan_fails_the_plan() {
    let mut f = fixture(vec![
        plan_reply(json!([{"description": "doomed step"}])),
        ChatReply::tool_call("c1", "write_file", json!({"path": "/abs/path.py", "content": "x"})),
        // Replan accepted.
        ChatReply::tool_call("cp-2", "create_plan", json!({
            "task": "demo",
            "steps": [{"description": "doomed again"}]
        })),
        ChatReply::tool_call("c2", "write_file", json!({"path": "/abs/path.py", "content": "x"})),
    ]);
    f.agent.chat("go").await.unwrap();

    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.status, PlanStatus::Failed);
    assert_eq!(plan.replan_count, 1);
    assert_turn_brackets(&kinds(&f.bus));
}

// ── Approval gate ────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_plan_ends_the_turn() {
    let cfg = AgentConfig {
        plan_approval: true,
        ..Default::default()
    };
    let mut f = fixture_with(
        vec![plan_reply(json!([{"description": "dangerous"}]))],
        cfg,
    );
    f.agent = f.agent.with_gate(Arc::new(ScriptedGate::new(vec![
        PlanDecision::Rejected {
            reason: "not like this".into(),
        },
    ])));
    f.agent.chat("go").await.unwrap();

    let ks = kinds(&f.bus);
    assert!(ks.contains(&"plan_awaiting_approval"));
    assert!(ks.contains(&"plan_rejected"));
    assert!(!ks.contains(&"plan_execution_started"));
    assert_turn_brackets(&ks);
    assert_eq!(f.provider.calls(), 1, "no step execution after rejection");
}

#[tokio::test]
async fn modified_plan_executes_replacement_steps() {
    let cfg = AgentConfig {
        plan_approval: true,
        ..Default::default()
    };
    let mut f = fixture_with(
        vec![
            plan_reply(json!([{"description": "original step"}])),
            ChatReply::text("replacement done"),
        ],
        cfg,
    );
    f.agent = f.agent.with_gate(Arc::new(ScriptedGate::new(vec![
        PlanDecision::Modified {
            steps: vec![quanta_context::PlanStepDraft {
                description: "replacement step".into(),
                expected_outcome: None,
                tools_needed: None,
            }],
        },
    ])));
    f.agent.chat("go").await.unwrap();

    let ks = kinds(&f.bus);
    assert!(ks.contains(&"plan_modified"));
    let plan = f.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.steps()[0].description, "replacement step");
    assert_eq!(plan.status, PlanStatus::Completed);
}

// ── Cancellation and transport failures ──────────────────────────────────────

struct StallingProvider {
    inner: ScriptedProvider,
    stall_from_call: usize,
}

#[async_trait]
impl ModelProvider for StallingProvider {
    fn name(&self) -> &str {
        "stalling"
    }
    fn model_name(&self) -> &str {
        "stalling-model"
    }
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatReply> {
        if self.inner.calls() >= self.stall_from_call {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        }
        self.inner.chat(req).await
    }
}

#[tokio::test]
async fn cancellation_mid_plan_cancels_plan_and_ends_turn() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Arc::new(Workspace::open(dir.path().join("proj")).unwrap());
    let cfg = AgentConfig::default();
    let ctx = AgentContext::new("sess", "proj", AgentKind::CodeAgent, &cfg);
    let mut reg = ToolRegistry::new();
    reg.register(ListDirectoryTool::new(Arc::clone(&ws)));
    reg.register(CreatePlanTool);
    let provider = Arc::new(StallingProvider {
        inner: ScriptedProvider::new(vec![plan_reply(json!([{"description": "slow step"}]))]),
        stall_from_call: 1,
    });
    let bus = Arc::new(EventBus::new(1024));
    let mut agent = PlanExecuteAgent::new(
        ctx,
        provider,
        Arc::new(reg),
        Arc::new(cfg),
        Arc::clone(&bus),
        Arc::new(PromptTemplates::default()),
    );

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let turn = tokio::spawn(async move { agent.chat_with_cancel("go", cancel_rx).await });
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let _ = cancel_tx.send(());
    turn.await.unwrap().unwrap();

    let ks: Vec<&str> = bus.retained().iter().map(|e| e.event.kind()).collect();
    assert!(ks.contains(&"plan_execution_cancelled"), "{ks:?}");
    assert_eq!(ks.last(), Some(&"response_end"));
}

struct FailingProvider;

#[async_trait]
impl ModelProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }
    fn model_name(&self) -> &str {
        "failing-model"
    }
    async fn chat(&self, _req: ChatRequest) -> anyhow::Result<ChatReply> {
        anyhow::bail!("connection refused")
    }
}

#[tokio::test]
async fn transport_failure_surfaces_and_ends_turn() {
    let dir = tempfile::tempdir().unwrap();
    let ws = Arc::new(Workspace::open(dir.path().join("proj")).unwrap());
    let cfg = AgentConfig::default();
    let ctx = AgentContext::new("sess", "proj", AgentKind::CodeAgent, &cfg);
    let mut reg = ToolRegistry::new();
    reg.register(ListDirectoryTool::new(Arc::clone(&ws)));
    let bus = Arc::new(EventBus::new(1024));
    let mut agent = PlanExecuteAgent::new(
        ctx,
        Arc::new(FailingProvider),
        Arc::new(reg),
        Arc::new(cfg),
        Arc::clone(&bus),
        Arc::new(PromptTemplates::default()),
    );
    agent.chat("hello").await.unwrap();

    let events = bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::Error { kind, .. } if kind == "llm_transport"
    )));
    let ks: Vec<&str> = events.iter().map(|e| e.event.kind()).collect();
    assert_turn_brackets(&ks);
}
