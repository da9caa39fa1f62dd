// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios over the assembled hosts: collector, code agent
//! with sandbox, and the rule executor — all against scripted model replies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use quanta::{build_rule_executor, CodeAgentHost, CollectorHost, MemoryRuleStore, RuleStore};
use quanta_config::Config;
use quanta_core::{AgentEvent, PromptTemplates};
use quanta_executor::{
    klines_from_closes, Action, ActiveState, Market, MemoryOrderSink, OrderSink, PaperGateway,
    Requirements, RuleState, RuleTrader, Side, SyntheticMarketData, TradeOutcome,
};
use quanta_model::{ChatReply, ScriptedProvider};
use quanta_sandbox::{RunTimeout, SandboxEvent, SandboxRunner};

fn config_with_workspace(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.workspace.root = dir.to_string_lossy().into_owned();
    config
}

fn kinds(bus: &quanta_core::EventBus) -> Vec<&'static str> {
    bus.retained().iter().map(|e| e.event.kind()).collect()
}

// ── Scenario: collector happy path ───────────────────────────────────────────

#[tokio::test]
async fn collector_elicits_and_saves_an_rsi_rule() {
    let store = Arc::new(MemoryRuleStore::new());
    let provider = Arc::new(ScriptedProvider::new(vec![
        ChatReply::tool_call(
            "c1",
            "save_rule",
            json!({
                "name": "RSI 抄底",
                "market": "spot",
                "symbols": ["BTC/USDT"],
                "timeframe": "1d",
                "entry_rules": "RSI<20 买入",
                "take_profit": "RSI>60 卖出",
                "stop_loss": "-5%",
                "max_position_ratio": 0.5,
                "total_capital": 10000.0
            }),
        ),
        ChatReply::text("策略已保存：RSI<20 买入，RSI>60 卖出。"),
    ]));
    let mut host = CollectorHost::build(
        "user-1",
        &Config::default(),
        provider,
        Arc::new(PromptTemplates::default()),
        Arc::clone(&store) as Arc<dyn RuleStore>,
    );

    host.agent
        .chat("我想用RSI<20买入，RSI>60卖出，BTC/USDT 日线")
        .await
        .unwrap();

    let rules = store.rules();
    assert_eq!(rules.len(), 1);
    assert!(rules[0].requirements.entry_rules.contains("RSI<20"));
    assert!(rules[0].requirements.take_profit.contains("RSI>60"));
    assert_eq!(rules[0].requirements.market, Market::Spot);
    assert_eq!(rules[0].requirements.symbols, vec!["BTC/USDT"]);

    let ks = kinds(&host.bus);
    assert_eq!(ks.first(), Some(&"response_start"));
    assert_eq!(ks.last(), Some(&"response_end"));
}

// ── Scenario: code agent direct edit ─────────────────────────────────────────

#[tokio::test]
async fn direct_edit_patches_the_rsi_period() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        ChatReply::tool_call(
            "c1",
            "patch_file",
            json!({
                "path": "strategy/rsi.py",
                "search": "PERIOD = 14",
                "replace": "PERIOD = 21"
            }),
        ),
        ChatReply::text("周期已从 14 改成 21。"),
    ]));
    let mut host = CodeAgentHost::build(
        "user-1",
        "proj-1",
        &config_with_workspace(dir.path()),
        provider.clone(),
        Arc::new(PromptTemplates::default()),
    )
    .unwrap();
    std::fs::create_dir_all(host.workspace.root().join("strategy")).unwrap();
    std::fs::write(
        host.workspace.root().join("strategy/rsi.py"),
        "PERIOD = 14\n",
    )
    .unwrap();

    host.agent.chat("把 RSI 周期从 14 改成 21").await.unwrap();

    assert_eq!(
        std::fs::read_to_string(host.workspace.root().join("strategy/rsi.py")).unwrap(),
        "PERIOD = 21\n"
    );
    assert_eq!(provider.calls(), 2, "one patch, one closing reply");
    let events = host.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::FileChange { path } if path == "strategy/rsi.py"
    )));
    let patch_calls = events
        .iter()
        .filter(|e| matches!(
            &e.event,
            AgentEvent::ToolCalls { calls, .. } if calls.iter().any(|c| c.name == "patch_file")
        ))
        .count();
    assert_eq!(patch_calls, 1, "exactly one patch_file call");
    assert_eq!(kinds(&host.bus).last(), Some(&"response_end"));
}

// ── Scenario: plan mode writes then runs ─────────────────────────────────────

#[tokio::test]
async fn plan_mode_writes_and_runs_hello_world() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        ChatReply::tool_call(
            "cp",
            "create_plan",
            json!({
                "task": "write a hello world python script and run it",
                "steps": [
                    {"description": "write main.py", "tools_needed": ["write_file"]},
                    {"description": "run main.py", "tools_needed": ["shell_exec"]}
                ]
            }),
        ),
        ChatReply::tool_call(
            "c1",
            "write_file",
            json!({"path": "main.py", "content": "print('hello')\n"}),
        ),
        ChatReply::text("script written"),
        ChatReply::tool_call("c2", "shell_exec", json!({"command": "python3 main.py"})),
        ChatReply::text("script ran"),
    ]));
    let mut host = CodeAgentHost::build(
        "user-1",
        "proj-1",
        &config_with_workspace(dir.path()),
        provider,
        Arc::new(PromptTemplates::default()),
    )
    .unwrap();

    host.agent
        .chat("write a hello world python script and run it")
        .await
        .unwrap();
    // Let the sandbox forwarder drain onto the bus.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(host.workspace.root().join("main.py").exists());
    let events = host.bus.retained();
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::FileRunStdout { chunk } if chunk.contains("hello")
    )));
    assert!(events.iter().any(|e| matches!(
        &e.event,
        AgentEvent::FileRunExit { exit_code: 0, .. }
    )));
    assert!(kinds(&host.bus).contains(&"plan_execution_completed"));

    let plan = host.agent.context().plan.as_ref().unwrap();
    assert_eq!(plan.steps().len(), 2);
    assert!(plan.steps().iter().all(|s| s.status.is_terminal()));
}

// ── Scenario: sandbox timeout ────────────────────────────────────────────────

#[tokio::test]
async fn infinite_loop_is_killed_at_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("loop.py"), "while True: pass\n").unwrap();
    let runner = SandboxRunner::with_limits(Duration::from_secs(2), 100_000);
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let (_keep, cancel) = tokio::sync::oneshot::channel();

    let started = Instant::now();
    let report = runner
        .run(
            "user-1",
            dir.path(),
            "python3 loop.py",
            RunTimeout::secs(5),
            tx,
            cancel,
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.exit_code, -1);
    assert!(report.timed_out);
    assert!(elapsed >= Duration::from_secs(5), "ended early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(7), "grace overrun: {elapsed:?}");

    let mut events = Vec::new();
    while let Some(e) = rx.recv().await {
        events.push(e);
    }
    assert!(matches!(events.first(), Some(SandboxEvent::Started { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SandboxEvent::Exit { exit_code: 0, .. })));
    assert!(matches!(
        events.last(),
        Some(SandboxEvent::Exit {
            exit_code: -1,
            timed_out: true,
            ..
        })
    ));
}

// ── Scenario: executor buy then sell on spot ─────────────────────────────────

#[tokio::test]
async fn executor_trades_the_rsi_dip_and_recovery() {
    let oversold = vec![30.0, 26.0, 22.0, 18.0, 14.0, 12.0, 10.0];
    let recovered = vec![10.0, 13.0, 16.0, 19.0, 22.0, 25.0, 28.0];

    let sink = Arc::new(MemoryOrderSink::new());
    let market = Arc::new(SyntheticMarketData::new(vec![
        klines_from_closes(&oversold),
        klines_from_closes(&oversold),
        klines_from_closes(&recovered),
        klines_from_closes(&recovered),
    ]));
    let provider = Arc::new(ScriptedProvider::new(vec![
        // Cycle 1: inspect the market, compute RSI, decide to buy.
        ChatReply::tool_call(
            "k1",
            "get_klines",
            json!({"exchange": "paper", "symbol": "BTC/USDT", "timeframe": "1d", "limit": 10}),
        ),
        ChatReply::tool_call(
            "i1",
            "calculate_indicator",
            json!({"kind": "rsi", "series": oversold, "params": {"period": 5}}),
        ),
        ChatReply::text(r#"{"action": "buy", "reason": "RSI deeply oversold", "confidence": 0.9}"#),
        // Cycle 2: market recovered, sell.
        ChatReply::tool_call(
            "k2",
            "get_klines",
            json!({"exchange": "paper", "symbol": "BTC/USDT", "timeframe": "1d", "limit": 10}),
        ),
        ChatReply::tool_call(
            "i2",
            "calculate_indicator",
            json!({"kind": "rsi", "series": recovered, "params": {"period": 5}}),
        ),
        ChatReply::text(r#"{"action": "sell", "reason": "RSI recovered past 60", "confidence": 0.85}"#),
    ]));

    let executor = build_rule_executor(
        &Config::default(),
        provider,
        market,
        Arc::new(PaperGateway),
        Arc::clone(&sink) as Arc<dyn OrderSink>,
        Arc::new(PromptTemplates::default()),
    );
    let trader = Arc::new(RuleTrader::new(
        RuleState::new(
            "rule-rsi",
            Requirements {
                market: Market::Spot,
                symbols: vec!["BTC/USDT".into()],
                timeframe: "1d".into(),
                entry_rules: "buy when RSI < 20".into(),
                take_profit: "sell when RSI > 60".into(),
                stop_loss: "-5%".into(),
                max_position_ratio: 0.5,
                total_capital: 1000.0,
            },
        ),
        Arc::new(PaperGateway),
        Arc::clone(&sink) as Arc<dyn OrderSink>,
    ));

    assert!(!trader.state().runtime_status.is_holding);

    let first = executor.evaluate_once(&trader).await.unwrap();
    assert_eq!(first.decision.as_ref().unwrap().action, Action::Buy);
    assert!(matches!(first.outcome, Some(TradeOutcome::Placed(_))));
    let mid = trader.state().runtime_status.clone();
    assert!(mid.is_holding);
    assert!(mid.quantity > 0.0);

    let second = executor.evaluate_once(&trader).await.unwrap();
    assert_eq!(second.decision.as_ref().unwrap().action, Action::Sell);
    assert!(matches!(second.outcome, Some(TradeOutcome::Placed(_))));
    let end = trader.state().runtime_status.clone();
    assert!(!end.is_holding);
    assert_eq!(end.quantity, 0.0);

    let orders = sink.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].side, Side::Buy);
    assert_eq!(orders[1].side, Side::Sell);
    assert!(orders[1].pnl.unwrap() > 0.0, "bought the dip, sold higher");
    assert_eq!(trader.state().active, ActiveState::Stopped);
}
