// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use quanta_tools::{Tool, ToolErrorKind, ToolResult};

use crate::decision::Action;
use crate::indicators;
use crate::market::{MarketData, Side};
use crate::trader::{RuleTrader, TradeOutcome};

/// Domain tool: fetch candles for a symbol.
pub struct GetKlinesTool {
    market: Arc<dyn MarketData>,
}

impl GetKlinesTool {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl Tool for GetKlinesTool {
    fn name(&self) -> &str {
        "get_klines"
    }

    fn description(&self) -> &str {
        "Fetch recent candles for a symbol. Returns one line per candle: \
         open_time, open, high, low, close, volume. The last line is the \
         most recent candle."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "exchange": { "type": "string", "description": "Exchange name" },
                "symbol": { "type": "string", "description": "Trading pair, e.g. BTC/USDT" },
                "timeframe": { "type": "string", "description": "Candle interval, e.g. 1m, 1h, 1d" },
                "limit": { "type": "integer", "description": "Number of candles (default 100)" }
            },
            "required": ["exchange", "symbol", "timeframe"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let exchange = args["exchange"].as_str().unwrap_or_default();
        let symbol = args["symbol"].as_str().unwrap_or_default();
        let timeframe = args["timeframe"].as_str().unwrap_or_default();
        let limit = args["limit"].as_u64().unwrap_or(100) as usize;

        debug!(exchange, symbol, timeframe, limit, "get_klines tool");
        match self.market.klines(exchange, symbol, timeframe, limit).await {
            Ok(klines) => {
                let lines: Vec<String> = klines
                    .iter()
                    .map(|k| {
                        format!(
                            "{},{},{},{},{},{}",
                            k.open_time, k.open, k.high, k.low, k.close, k.volume
                        )
                    })
                    .collect();
                ToolResult::ok(format!(
                    "open_time,open,high,low,close,volume\n{}",
                    lines.join("\n")
                ))
            }
            Err(e) => ToolResult::err(ToolErrorKind::ToolIoError, format!("market data: {e}")),
        }
    }
}

/// Domain tool: compute an indicator over an inline series.
pub struct CalculateIndicatorTool;

#[async_trait]
impl Tool for CalculateIndicatorTool {
    fn name(&self) -> &str {
        "calculate_indicator"
    }

    fn description(&self) -> &str {
        "Compute a technical indicator over a close-price series. Supported \
         kinds: rsi, sma, ema. Returns the computed values; the last one is \
         the current reading."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "enum": ["rsi", "sma", "ema"],
                    "description": "Indicator to compute"
                },
                "series": {
                    "type": "array",
                    "items": { "type": "number" },
                    "description": "Close prices, oldest first"
                },
                "params": {
                    "type": "object",
                    "description": "Indicator parameters, e.g. {\"period\": 14}"
                }
            },
            "required": ["kind", "series"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let kind = args["kind"].as_str().unwrap_or_default();
        let series: Vec<f64> = args["series"]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let period = args["params"]["period"].as_u64().unwrap_or(14) as usize;

        match indicators::calculate(kind, &series, period) {
            Some(values) if values.is_empty() => ToolResult::err(
                ToolErrorKind::InvalidArguments,
                format!("series too short for {kind} with period {period}"),
            ),
            Some(values) => {
                let rendered: Vec<String> =
                    values.iter().map(|v| format!("{v:.4}")).collect();
                ToolResult::ok(format!(
                    "{kind}({period}) = [{}], current = {:.4}",
                    rendered.join(", "),
                    values[values.len() - 1]
                ))
            }
            None => ToolResult::err(
                ToolErrorKind::InvalidArguments,
                format!("unknown indicator kind '{kind}'"),
            ),
        }
    }
}

/// Domain tool: place a simulated order for the rule this agent evaluates.
/// Routed through the rule's trader so position invariants hold.
pub struct PlaceOrderTool {
    trader: Arc<RuleTrader>,
}

impl PlaceOrderTool {
    pub fn new(trader: Arc<RuleTrader>) -> Self {
        Self { trader }
    }
}

#[async_trait]
impl Tool for PlaceOrderTool {
    fn name(&self) -> &str {
        "place_order"
    }

    fn description(&self) -> &str {
        "Place a simulated order for the rule under evaluation. The position \
         size is derived from the rule's capital settings; an order that \
         conflicts with the current position (e.g. buying while already \
         holding on spot) is skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "exchange": { "type": "string", "description": "Exchange name" },
                "symbol": { "type": "string", "description": "Trading pair" },
                "side": { "type": "string", "enum": ["buy", "sell"] },
                "order_type": { "type": "string", "enum": ["market", "limit"] },
                "quantity": { "type": "number", "description": "Requested size (advisory; sizing follows the rule)" },
                "price": { "type": "number", "description": "Current price for the fill" }
            },
            "required": ["exchange", "symbol", "side", "order_type", "price"]
        })
    }

    async fn invoke(&self, args: &Value) -> ToolResult {
        let side = match args["side"].as_str() {
            Some("buy") => Side::Buy,
            Some("sell") => Side::Sell,
            _ => return ToolResult::err(ToolErrorKind::InvalidArguments, "side must be buy or sell"),
        };
        let Some(price) = args["price"].as_f64() else {
            return ToolResult::err(ToolErrorKind::InvalidArguments, "price is required");
        };
        let action = match side {
            Side::Buy => Action::Buy,
            Side::Sell => Action::Sell,
        };

        match self.trader.execute(action, price).await {
            Ok(TradeOutcome::Placed(order)) => ToolResult::ok(format!(
                "order filled: {:?} {} {} @ {} (pnl: {})",
                order.side,
                order.amount,
                order.symbol,
                order.price,
                order
                    .pnl
                    .map(|p| format!("{p:.2}"))
                    .unwrap_or_else(|| "n/a".into())
            )),
            Ok(TradeOutcome::Skipped(reason)) => {
                ToolResult::ok(format!("order skipped: {reason}"))
            }
            Err(e) => ToolResult::err(ToolErrorKind::ToolIoError, format!("order failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
