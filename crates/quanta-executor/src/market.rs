// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One candle as delivered by a market-data source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// Candle open time, unix milliseconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Pluggable market-data source (no real exchange connectivity in the core).
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn klines(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub rule_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderFill {
    pub price: f64,
    pub quantity: f64,
}

/// Pluggable order placement (simulated in this platform).
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place(&self, req: &OrderRequest) -> anyhow::Result<OrderFill>;
}

/// One simulated order as recorded for the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub rule_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
    pub status: String,
    pub pnl: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Where accepted orders land (the external orders table in production).
pub trait OrderSink: Send + Sync {
    fn append(&self, order: Order);
}

/// Paper-trading gateway: every order fills immediately at the requested
/// price.
pub struct PaperGateway;

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place(&self, req: &OrderRequest) -> anyhow::Result<OrderFill> {
        let price = req
            .price
            .ok_or_else(|| anyhow::anyhow!("paper gateway needs a price"))?;
        Ok(OrderFill {
            price,
            quantity: req.quantity,
        })
    }
}

/// In-memory order record for tests and diagnostics.
#[derive(Default)]
pub struct MemoryOrderSink {
    orders: Mutex<Vec<Order>>,
}

impl MemoryOrderSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().expect("order sink poisoned").clone()
    }
}

impl OrderSink for MemoryOrderSink {
    fn append(&self, order: Order) {
        self.orders.lock().expect("order sink poisoned").push(order);
    }
}

/// Replays fixed kline batches in order; the final batch repeats once the
/// queue drains.  Used to script executor scenarios.
pub struct SyntheticMarketData {
    batches: Mutex<VecDeque<Vec<Kline>>>,
    last: Mutex<Vec<Kline>>,
}

impl SyntheticMarketData {
    pub fn new(batches: Vec<Vec<Kline>>) -> Self {
        let last = batches.last().cloned().unwrap_or_default();
        Self {
            batches: Mutex::new(batches.into()),
            last: Mutex::new(last),
        }
    }
}

#[async_trait]
impl MarketData for SyntheticMarketData {
    async fn klines(
        &self,
        _exchange: &str,
        _symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        let batch = {
            let mut batches = self.batches.lock().expect("synthetic market poisoned");
            match batches.pop_front() {
                Some(b) => {
                    *self.last.lock().expect("synthetic market poisoned") = b.clone();
                    b
                }
                None => self.last.lock().expect("synthetic market poisoned").clone(),
            }
        };
        let start = batch.len().saturating_sub(limit);
        Ok(batch[start..].to_vec())
    }
}

/// Build a kline series from close prices (one candle per minute).
pub fn klines_from_closes(closes: &[f64]) -> Vec<Kline> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Kline {
            open_time: i as i64 * 60_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
