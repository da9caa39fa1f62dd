// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The rule executor: per-rule evaluation loops that run a one-shot agent
//! against live market data and apply the resulting buy/sell/hold decision
//! under spot/contract position semantics.

pub mod decision;
pub mod indicators;
pub mod market;
pub mod rule;
pub mod scheduler;
pub mod tools;
pub mod trader;

pub use decision::{parse_decision, Action, Decision};
pub use market::{
    klines_from_closes, Kline, MarketData, MemoryOrderSink, Order, OrderFill, OrderGateway,
    OrderRequest, OrderSink, OrderType, PaperGateway, Side, SyntheticMarketData,
};
pub use rule::{ActiveState, Market, PositionSide, Requirements, RuleState, RuntimeStatus, TradeIntent};
pub use scheduler::{CycleReport, RuleExecutor};
pub use tools::{CalculateIndicatorTool, GetKlinesTool, PlaceOrderTool};
pub use trader::{RuleTrader, TradeOutcome};
