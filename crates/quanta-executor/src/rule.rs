// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Action;
use crate::market::{OrderFill, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    Contract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// The structured strategy the Collector elicits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    pub market: Market,
    pub symbols: Vec<String>,
    pub timeframe: String,
    pub entry_rules: String,
    pub take_profit: String,
    pub stop_loss: String,
    pub max_position_ratio: f64,
    pub total_capital: f64,
}

/// Live position bookkeeping.
///
/// Invariants: for spot, `position_side` is always `None` and `quantity >= 0`;
/// `is_holding` flips together with `entry_price`/`quantity` between the
/// `(false, None, 0)` and `(true, Some(_), > 0)` shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RuntimeStatus {
    pub is_holding: bool,
    pub entry_price: Option<f64>,
    pub quantity: f64,
    pub position_side: Option<PositionSide>,
    pub position_value: f64,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveState {
    Running,
    Stopped,
}

/// A persisted trading strategy plus its runtime status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    pub rule_id: String,
    pub requirements: Requirements,
    pub runtime_status: RuntimeStatus,
    pub active: ActiveState,
}

/// What a decision translates to, given the current position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeIntent {
    Open {
        side: Side,
        position: Option<PositionSide>,
        quantity: f64,
    },
    Close {
        side: Side,
        quantity: f64,
    },
}

impl TradeIntent {
    pub fn side(&self) -> Side {
        match self {
            Self::Open { side, .. } | Self::Close { side, .. } => *side,
        }
    }

    pub fn quantity(&self) -> f64 {
        match self {
            Self::Open { quantity, .. } | Self::Close { quantity, .. } => *quantity,
        }
    }
}

impl RuleState {
    pub fn new(rule_id: impl Into<String>, requirements: Requirements) -> Self {
        Self {
            rule_id: rule_id.into(),
            requirements,
            runtime_status: RuntimeStatus::default(),
            active: ActiveState::Stopped,
        }
    }

    /// Position size for a fresh entry at `price`.
    fn entry_quantity(&self, price: f64) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        (self.requirements.total_capital * self.requirements.max_position_ratio / price).floor()
    }

    /// Translate a model decision into an order intent under spot/contract
    /// semantics.  `None` means the decision is a no-op for the current
    /// position (e.g. spot buy while already holding).
    pub fn intent_for(&self, action: Action, price: f64) -> Option<TradeIntent> {
        let status = &self.runtime_status;
        match (self.requirements.market, action) {
            (_, Action::Hold) => None,
            (Market::Spot, Action::Buy) => {
                if status.is_holding {
                    return None;
                }
                let quantity = self.entry_quantity(price);
                (quantity > 0.0).then_some(TradeIntent::Open {
                    side: Side::Buy,
                    position: None,
                    quantity,
                })
            }
            (Market::Spot, Action::Sell) => status.is_holding.then_some(TradeIntent::Close {
                side: Side::Sell,
                quantity: status.quantity,
            }),
            (Market::Contract, Action::Buy) => {
                if !status.is_holding {
                    let quantity = self.entry_quantity(price);
                    return (quantity > 0.0).then_some(TradeIntent::Open {
                        side: Side::Buy,
                        position: Some(PositionSide::Long),
                        quantity,
                    });
                }
                (status.position_side == Some(PositionSide::Short)).then_some(TradeIntent::Close {
                    side: Side::Buy,
                    quantity: status.quantity,
                })
            }
            (Market::Contract, Action::Sell) => {
                if !status.is_holding {
                    let quantity = self.entry_quantity(price);
                    return (quantity > 0.0).then_some(TradeIntent::Open {
                        side: Side::Sell,
                        position: Some(PositionSide::Short),
                        quantity,
                    });
                }
                (status.position_side == Some(PositionSide::Long)).then_some(TradeIntent::Close {
                    side: Side::Sell,
                    quantity: status.quantity,
                })
            }
        }
    }

    /// Apply a fill for a previously computed intent.  Returns realized pnl
    /// for closes.
    pub fn apply_fill(&mut self, intent: &TradeIntent, fill: &OrderFill) -> Option<f64> {
        let status = &mut self.runtime_status;
        status.last_update = Some(Utc::now());
        match intent {
            TradeIntent::Open { position, .. } => {
                status.is_holding = true;
                status.entry_price = Some(fill.price);
                status.quantity = fill.quantity;
                status.position_side = *position;
                status.position_value = fill.price * fill.quantity;
                None
            }
            TradeIntent::Close { .. } => {
                let entry = status.entry_price.unwrap_or(fill.price);
                let pnl = match status.position_side {
                    Some(PositionSide::Short) => (entry - fill.price) * status.quantity,
                    _ => (fill.price - entry) * status.quantity,
                };
                status.is_holding = false;
                status.entry_price = None;
                status.quantity = 0.0;
                status.position_side = None;
                status.position_value = 0.0;
                Some(pnl)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spot_rule() -> RuleState {
        RuleState::new(
            "r1",
            Requirements {
                market: Market::Spot,
                symbols: vec!["BTC/USDT".into()],
                timeframe: "1d".into(),
                entry_rules: "RSI < 20".into(),
                take_profit: "RSI > 60".into(),
                stop_loss: "-5%".into(),
                max_position_ratio: 0.5,
                total_capital: 1000.0,
            },
        )
    }

    fn contract_rule() -> RuleState {
        let mut rule = spot_rule();
        rule.requirements.market = Market::Contract;
        rule
    }

    fn fill(price: f64, quantity: f64) -> OrderFill {
        OrderFill { price, quantity }
    }

    // ── Spot semantics ───────────────────────────────────────────────────────

    #[test]
    fn spot_buy_only_when_flat() {
        let mut rule = spot_rule();
        let intent = rule.intent_for(Action::Buy, 10.0).unwrap();
        assert_eq!(intent.side(), Side::Buy);
        // floor(1000 * 0.5 / 10) = 50
        assert_eq!(intent.quantity(), 50.0);
        rule.apply_fill(&intent, &fill(10.0, 50.0));
        assert!(rule.runtime_status.is_holding);
        assert!(rule.intent_for(Action::Buy, 10.0).is_none(), "second buy is a no-op");
    }

    #[test]
    fn spot_sell_only_when_holding() {
        let mut rule = spot_rule();
        assert!(rule.intent_for(Action::Sell, 10.0).is_none());
        let buy = rule.intent_for(Action::Buy, 10.0).unwrap();
        rule.apply_fill(&buy, &fill(10.0, 50.0));
        let sell = rule.intent_for(Action::Sell, 12.0).unwrap();
        assert_eq!(sell.quantity(), 50.0);
        let pnl = rule.apply_fill(&sell, &fill(12.0, 50.0));
        assert_eq!(pnl, Some(100.0));
        assert!(!rule.runtime_status.is_holding);
        assert_eq!(rule.runtime_status.quantity, 0.0);
    }

    #[test]
    fn spot_position_side_stays_none() {
        let mut rule = spot_rule();
        let buy = rule.intent_for(Action::Buy, 10.0).unwrap();
        rule.apply_fill(&buy, &fill(10.0, 50.0));
        assert_eq!(rule.runtime_status.position_side, None);
    }

    #[test]
    fn holding_pairs_with_entry_price_and_quantity() {
        let mut rule = spot_rule();
        assert_eq!(rule.runtime_status.entry_price, None);
        let buy = rule.intent_for(Action::Buy, 10.0).unwrap();
        rule.apply_fill(&buy, &fill(10.0, 50.0));
        assert!(rule.runtime_status.entry_price.is_some());
        assert!(rule.runtime_status.quantity > 0.0);
        let sell = rule.intent_for(Action::Sell, 11.0).unwrap();
        rule.apply_fill(&sell, &fill(11.0, 50.0));
        assert_eq!(rule.runtime_status.entry_price, None);
        assert_eq!(rule.runtime_status.quantity, 0.0);
    }

    #[test]
    fn hold_is_always_a_no_op() {
        let rule = spot_rule();
        assert!(rule.intent_for(Action::Hold, 10.0).is_none());
    }

    #[test]
    fn zero_quantity_entry_is_suppressed() {
        let rule = spot_rule();
        // Price far above capital: floor -> 0 units.
        assert!(rule.intent_for(Action::Buy, 1_000_000.0).is_none());
    }

    // ── Contract semantics ───────────────────────────────────────────────────

    #[test]
    fn contract_buy_opens_long_then_sell_closes_it() {
        let mut rule = contract_rule();
        let open = rule.intent_for(Action::Buy, 10.0).unwrap();
        assert!(matches!(
            open,
            TradeIntent::Open {
                position: Some(PositionSide::Long),
                ..
            }
        ));
        rule.apply_fill(&open, &fill(10.0, 50.0));
        assert_eq!(rule.runtime_status.position_side, Some(PositionSide::Long));

        // Another buy while long is a no-op.
        assert!(rule.intent_for(Action::Buy, 10.0).is_none());

        let close = rule.intent_for(Action::Sell, 13.0).unwrap();
        assert!(matches!(close, TradeIntent::Close { side: Side::Sell, .. }));
        let pnl = rule.apply_fill(&close, &fill(13.0, 50.0));
        assert_eq!(pnl, Some(150.0));
        assert_eq!(rule.runtime_status.position_side, None);
    }

    #[test]
    fn contract_sell_opens_short_then_buy_closes_it() {
        let mut rule = contract_rule();
        let open = rule.intent_for(Action::Sell, 10.0).unwrap();
        assert!(matches!(
            open,
            TradeIntent::Open {
                position: Some(PositionSide::Short),
                ..
            }
        ));
        rule.apply_fill(&open, &fill(10.0, 50.0));

        // Another sell while short is a no-op.
        assert!(rule.intent_for(Action::Sell, 10.0).is_none());

        let close = rule.intent_for(Action::Buy, 8.0).unwrap();
        let pnl = rule.apply_fill(&close, &fill(8.0, 50.0));
        // Short from 10 to 8: profit 2 * 50.
        assert_eq!(pnl, Some(100.0));
        assert!(!rule.runtime_status.is_holding);
    }

    #[test]
    fn contract_open_close_sequences_are_well_bracketed() {
        let mut rule = contract_rule();
        let mut events: Vec<&str> = Vec::new();
        let script = [Action::Buy, Action::Sell, Action::Sell, Action::Buy, Action::Buy];
        for action in script {
            if let Some(intent) = rule.intent_for(action, 10.0) {
                match intent {
                    TradeIntent::Open {
                        position: Some(PositionSide::Long),
                        ..
                    } => events.push("open-long"),
                    TradeIntent::Open {
                        position: Some(PositionSide::Short),
                        ..
                    } => events.push("open-short"),
                    TradeIntent::Close { side: Side::Sell, .. } => events.push("close-long"),
                    TradeIntent::Close { side: Side::Buy, .. } => events.push("close-short"),
                    _ => events.push("other"),
                }
                rule.apply_fill(&intent, &fill(10.0, 50.0));
            }
        }
        assert_eq!(
            events,
            vec!["open-long", "close-long", "open-short", "close-short", "open-long"]
        );
        // Every close follows a matching open.
        let mut open: Option<&str> = None;
        for e in events {
            match e {
                "open-long" | "open-short" => {
                    assert!(open.is_none());
                    open = Some(e);
                }
                "close-long" => {
                    assert_eq!(open, Some("open-long"));
                    open = None;
                }
                "close-short" => {
                    assert_eq!(open, Some("open-short"));
                    open = None;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn rule_state_round_trips_through_serde() {
        let rule = spot_rule();
        let back: RuleState = serde_json::from_str(&serde_json::to_string(&rule).unwrap()).unwrap();
        assert_eq!(rule, back);
    }
}
