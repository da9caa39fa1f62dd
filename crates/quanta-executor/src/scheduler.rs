// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quanta_config::{AgentConfig, ExecutorConfig};
use quanta_context::{AgentContext, AgentKind};
use quanta_core::{EventBus, PlanExecuteAgent, PromptTemplates};
use quanta_model::ModelProvider;
use quanta_tools::ToolRegistry;

use crate::decision::{parse_decision, Action, Decision};
use crate::market::{MarketData, OrderGateway, OrderSink};
use crate::rule::{ActiveState, RuleState};
use crate::tools::{CalculateIndicatorTool, GetKlinesTool, PlaceOrderTool};
use crate::trader::{RuleTrader, TradeOutcome};

/// Everything one evaluation cycle needs, cloneable into the rule loops.
#[derive(Clone)]
struct CycleDeps {
    model: Arc<dyn ModelProvider>,
    market: Arc<dyn MarketData>,
    agent_config: Arc<AgentConfig>,
    executor_config: Arc<ExecutorConfig>,
    templates: Arc<PromptTemplates>,
}

/// What one cycle concluded, for logs and tests.
#[derive(Debug)]
pub struct CycleReport {
    pub decision: Option<Decision>,
    pub outcome: Option<TradeOutcome>,
}

struct RuleJob {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    trader: Arc<RuleTrader>,
}

/// Schedules one evaluation loop per active rule.  Loops are independent:
/// state mutations for one rule are serialized through its trader, distinct
/// rules run in parallel, and stopping is cooperative.
pub struct RuleExecutor {
    deps: CycleDeps,
    gateway: Arc<dyn OrderGateway>,
    sink: Arc<dyn OrderSink>,
    jobs: Mutex<HashMap<String, RuleJob>>,
}

impl RuleExecutor {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        market: Arc<dyn MarketData>,
        gateway: Arc<dyn OrderGateway>,
        sink: Arc<dyn OrderSink>,
        agent_config: Arc<AgentConfig>,
        executor_config: Arc<ExecutorConfig>,
        templates: Arc<PromptTemplates>,
    ) -> Self {
        Self {
            deps: CycleDeps {
                model,
                market,
                agent_config,
                executor_config,
                templates,
            },
            gateway,
            sink,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn the evaluation loop for a rule.  Fails when the rule is already
    /// running.
    pub fn start_rule(&self, state: RuleState) -> anyhow::Result<Arc<RuleTrader>> {
        let rule_id = state.rule_id.clone();
        let mut jobs = self.jobs.lock().expect("job table poisoned");
        if jobs.contains_key(&rule_id) {
            anyhow::bail!("rule '{rule_id}' is already running");
        }

        let poll = self.poll_interval_for(&state);
        let trader = Arc::new(RuleTrader::new(
            state,
            Arc::clone(&self.gateway),
            Arc::clone(&self.sink),
        ));
        trader.set_active(ActiveState::Running);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let deps = self.deps.clone();
        let loop_trader = Arc::clone(&trader);
        let handle = tokio::spawn(async move {
            rule_loop(deps, loop_trader, shutdown_rx, poll).await;
        });
        info!(rule = %rule_id, poll = ?poll, "rule loop started");
        jobs.insert(
            rule_id,
            RuleJob {
                shutdown: shutdown_tx,
                handle,
                trader: Arc::clone(&trader),
            },
        );
        Ok(trader)
    }

    /// Cooperative stop: the loop observes the signal and exits after its
    /// current iteration.  Returns the final rule state.
    pub async fn stop_rule(&self, rule_id: &str) -> anyhow::Result<RuleState> {
        let job = self
            .jobs
            .lock()
            .expect("job table poisoned")
            .remove(rule_id)
            .ok_or_else(|| anyhow::anyhow!("rule '{rule_id}' is not running"))?;
        let _ = job.shutdown.send(true);
        let _ = job.handle.await;
        job.trader.set_active(ActiveState::Stopped);
        info!(rule = rule_id, "rule loop stopped");
        Ok(job.trader.state())
    }

    pub fn is_running(&self, rule_id: &str) -> bool {
        self.jobs
            .lock()
            .expect("job table poisoned")
            .contains_key(rule_id)
    }

    pub fn running_rules(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .lock()
            .expect("job table poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn trader(&self, rule_id: &str) -> Option<Arc<RuleTrader>> {
        self.jobs
            .lock()
            .expect("job table poisoned")
            .get(rule_id)
            .map(|j| Arc::clone(&j.trader))
    }

    /// Run one evaluation cycle immediately (used by tests and the edge's
    /// "evaluate now" action).
    pub async fn evaluate_once(&self, trader: &Arc<RuleTrader>) -> anyhow::Result<CycleReport> {
        run_cycle(&self.deps, trader).await
    }

    /// Per-rule cadence: the rule's timeframe, but never slower than the
    /// configured poll interval.
    fn poll_interval_for(&self, state: &RuleState) -> Duration {
        let configured = self.deps.executor_config.poll_interval();
        match humantime::parse_duration(&state.requirements.timeframe) {
            Ok(tf) => configured.min(tf),
            Err(_) => configured,
        }
    }
}

async fn rule_loop(
    deps: CycleDeps,
    trader: Arc<RuleTrader>,
    mut shutdown: watch::Receiver<bool>,
    poll: Duration,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll) => {
                if let Err(e) = run_cycle(&deps, &trader).await {
                    warn!(rule = %trader.state().rule_id, error = %e, "evaluation cycle failed");
                }
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(rule = %trader.state().rule_id, "rule loop exited");
}

/// One evaluation: a transient one-shot agent restricted to the domain
/// tools decides buy/sell/hold; the parsed terminal decision is applied to
/// the rule's position.
async fn run_cycle(deps: &CycleDeps, trader: &Arc<RuleTrader>) -> anyhow::Result<CycleReport> {
    let state = trader.state();
    let rule_id = state.rule_id.clone();

    let mut cfg = (*deps.agent_config).clone();
    cfg.max_iterations = deps.executor_config.max_tool_iterations;
    let cfg = Arc::new(cfg);

    let mut registry = ToolRegistry::new();
    registry.register(GetKlinesTool::new(Arc::clone(&deps.market)));
    registry.register(CalculateIndicatorTool);
    registry.register(PlaceOrderTool::new(Arc::clone(trader)));

    let ctx = AgentContext::new(
        format!("rule-{rule_id}"),
        "executor",
        AgentKind::Executor,
        &cfg,
    );
    // Executor cycles stream nowhere: events land in a small local buffer,
    // the durable outputs are order records and log rows.
    let bus = Arc::new(EventBus::new(64));
    let mut agent = PlanExecuteAgent::new(
        ctx,
        Arc::clone(&deps.model),
        Arc::new(registry),
        cfg,
        bus,
        Arc::clone(&deps.templates),
    );

    agent.chat(&evaluation_brief(&state)).await?;
    let reply = agent
        .context()
        .conversation
        .last_assistant_text()
        .unwrap_or_default()
        .to_string();

    let decision = parse_decision(&reply);
    let outcome = match &decision {
        None => {
            warn!(rule = %rule_id, reply = %reply, "unparseable decision; holding");
            None
        }
        Some(d) if d.action == Action::Hold => {
            info!(rule = %rule_id, reason = %d.reason, "decision: hold");
            None
        }
        Some(d) => {
            let price = latest_close(deps.market.as_ref(), &state).await?;
            info!(
                rule = %rule_id,
                action = ?d.action,
                confidence = d.confidence,
                reason = %d.reason,
                "applying decision"
            );
            Some(trader.execute(d.action, price).await?)
        }
    };
    Ok(CycleReport { decision, outcome })
}

fn evaluation_brief(state: &RuleState) -> String {
    let req = &state.requirements;
    let status = &state.runtime_status;
    format!(
        "Evaluate trading rule {id}.\n\
         Market: {market:?}; symbols: {symbols}; timeframe: {timeframe}.\n\
         Entry rules: {entry}\nTake profit: {tp}\nStop loss: {sl}\n\
         Capital: {capital} with max position ratio {ratio}.\n\
         Current position: holding={holding}, entry_price={entry_price:?}, \
         quantity={quantity}, side={side:?}.\n\
         Use get_klines and calculate_indicator to assess the market, then \
         decide buy, sell, or hold.",
        id = state.rule_id,
        market = req.market,
        symbols = req.symbols.join(","),
        timeframe = req.timeframe,
        entry = req.entry_rules,
        tp = req.take_profit,
        sl = req.stop_loss,
        capital = req.total_capital,
        ratio = req.max_position_ratio,
        holding = status.is_holding,
        entry_price = status.entry_price,
        quantity = status.quantity,
        side = status.position_side,
    )
}

async fn latest_close(market: &dyn MarketData, state: &RuleState) -> anyhow::Result<f64> {
    let symbol = state
        .requirements
        .symbols
        .first()
        .cloned()
        .unwrap_or_default();
    let klines = market
        .klines("paper", &symbol, &state.requirements.timeframe, 1)
        .await?;
    klines
        .last()
        .map(|k| k.close)
        .ok_or_else(|| anyhow::anyhow!("no market data for {symbol}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
