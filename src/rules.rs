// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use quanta_executor::{Market, Requirements};
use quanta_tools::{Tool, ToolErrorKind, ToolResult};

/// A strategy as handed to the external rule store (one row per saved
/// strategy; the store itself lives behind the edge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRule {
    pub user_id: String,
    pub name: String,
    pub requirements: Requirements,
}

/// External persistence boundary for collected strategies.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn save(&self, rule: SavedRule) -> anyhow::Result<()>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<SavedRule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> Vec<SavedRule> {
        self.rules.lock().expect("rule store poisoned").clone()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn save(&self, rule: SavedRule) -> anyhow::Result<()> {
        self.rules.lock().expect("rule store poisoned").push(rule);
        Ok(())
    }
}

/// The Collector's terminal tool: persist the elicited strategy once every
/// requirement is known.
pub struct SaveRuleTool {
    store: Arc<dyn RuleStore>,
    user_id: String,
}

impl SaveRuleTool {
    pub fn new(store: Arc<dyn RuleStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl Tool for SaveRuleTool {
    fn name(&self) -> &str {
        "save_rule"
    }

    fn description(&self) -> &str {
        "Persist the fully elicited trading strategy. Call this only when \
         market, symbols, timeframe, entry rules, take-profit, stop-loss, \
         position ratio, and total capital are all known."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Display name for the strategy" },
                "market": { "type": "string", "enum": ["spot", "contract"] },
                "symbols": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Trading pairs, e.g. [\"BTC/USDT\"]"
                },
                "timeframe": { "type": "string", "description": "Candle interval, e.g. 1d" },
                "entry_rules": { "type": "string", "description": "When to enter, in the user's terms" },
                "take_profit": { "type": "string", "description": "When to take profit" },
                "stop_loss": { "type": "string", "description": "When to cut losses" },
                "max_position_ratio": { "type": "number", "description": "Fraction of capital per position (0-1]" },
                "total_capital": { "type": "number", "description": "Capital allocated to this strategy" }
            },
            "required": [
                "name", "market", "symbols", "timeframe", "entry_rules",
                "take_profit", "stop_loss", "max_position_ratio", "total_capital"
            ]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let market = match args["market"].as_str() {
            Some("spot") => Market::Spot,
            Some("contract") => Market::Contract,
            _ => {
                return ToolResult::err(
                    ToolErrorKind::InvalidArguments,
                    "market must be spot or contract",
                )
            }
        };
        let symbols: Vec<String> = args["symbols"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if symbols.is_empty() {
            return ToolResult::err(ToolErrorKind::InvalidArguments, "at least one symbol is required");
        }
        let ratio = args["max_position_ratio"].as_f64().unwrap_or(0.0);
        if !(0.0..=1.0).contains(&ratio) || ratio == 0.0 {
            return ToolResult::err(
                ToolErrorKind::InvalidArguments,
                "max_position_ratio must be in (0, 1]",
            );
        }
        let capital = args["total_capital"].as_f64().unwrap_or(0.0);
        if capital <= 0.0 {
            return ToolResult::err(ToolErrorKind::InvalidArguments, "total_capital must be positive");
        }

        let name = args["name"].as_str().unwrap_or_default().to_string();
        let rule = SavedRule {
            user_id: self.user_id.clone(),
            name: name.clone(),
            requirements: Requirements {
                market,
                symbols,
                timeframe: args["timeframe"].as_str().unwrap_or_default().to_string(),
                entry_rules: args["entry_rules"].as_str().unwrap_or_default().to_string(),
                take_profit: args["take_profit"].as_str().unwrap_or_default().to_string(),
                stop_loss: args["stop_loss"].as_str().unwrap_or_default().to_string(),
                max_position_ratio: ratio,
                total_capital: capital,
            },
        };
        match self.store.save(rule).await {
            Ok(()) => {
                info!(user = %self.user_id, rule = %name, "strategy saved");
                ToolResult::ok(format!("rule '{name}' saved"))
            }
            Err(e) => ToolResult::err(ToolErrorKind::ToolIoError, format!("cannot save rule: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
