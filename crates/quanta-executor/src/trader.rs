// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::info;

use crate::decision::Action;
use crate::market::{Order, OrderGateway, OrderRequest, OrderSink, OrderType};
use crate::rule::RuleState;

/// Outcome of applying one decision.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// The order was accepted and the runtime status updated.
    Placed(Order),
    /// The decision is a no-op for the current position.
    Skipped(String),
}

/// Serializes all order-placing mutations for one rule.  Both paths — the
/// scheduler applying a parsed terminal decision and the model calling the
/// `place_order` tool directly — converge here, so the position invariants
/// hold no matter which path fires first.
pub struct RuleTrader {
    state: Mutex<RuleState>,
    gateway: Arc<dyn OrderGateway>,
    sink: Arc<dyn OrderSink>,
}

impl RuleTrader {
    pub fn new(state: RuleState, gateway: Arc<dyn OrderGateway>, sink: Arc<dyn OrderSink>) -> Self {
        Self {
            state: Mutex::new(state),
            gateway,
            sink,
        }
    }

    /// Snapshot of the rule (requirements + runtime status).
    pub fn state(&self) -> RuleState {
        self.state.lock().expect("rule state poisoned").clone()
    }

    pub fn set_active(&self, active: crate::rule::ActiveState) {
        self.state.lock().expect("rule state poisoned").active = active;
    }

    /// Apply a decision at the given market price.
    pub async fn execute(&self, action: Action, price: f64) -> anyhow::Result<TradeOutcome> {
        // Phase 1: compute the intent under the lock.
        let (intent, request) = {
            let state = self.state.lock().expect("rule state poisoned");
            let Some(intent) = state.intent_for(action, price) else {
                return Ok(TradeOutcome::Skipped(format!(
                    "{action:?} is a no-op for the current position"
                )));
            };
            let request = OrderRequest {
                rule_id: state.rule_id.clone(),
                exchange: "paper".into(),
                symbol: state
                    .requirements
                    .symbols
                    .first()
                    .cloned()
                    .unwrap_or_default(),
                side: intent.side(),
                order_type: OrderType::Market,
                quantity: intent.quantity(),
                price: Some(price),
            };
            (intent, request)
        };

        // Phase 2: place the order without holding the lock.
        let fill = self.gateway.place(&request).await?;

        // Phase 3: apply the fill and record the order.
        let order = {
            let mut state = self.state.lock().expect("rule state poisoned");
            let pnl = state.apply_fill(&intent, &fill);
            Order {
                rule_id: state.rule_id.clone(),
                symbol: request.symbol.clone(),
                side: request.side,
                price: fill.price,
                amount: fill.quantity,
                status: "filled".into(),
                pnl,
                created_at: Utc::now(),
            }
        };
        info!(
            rule = %order.rule_id,
            side = ?order.side,
            price = order.price,
            amount = order.amount,
            pnl = ?order.pnl,
            "order placed"
        );
        self.sink.append(order.clone());
        Ok(TradeOutcome::Placed(order))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
