// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use quanta_context::{Plan, PlanStepDraft};

/// Verdict on a freshly created plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    Approved,
    Rejected { reason: String },
    Modified { steps: Vec<PlanStepDraft> },
}

/// Reviews a plan before execution.  The edge implements this to put a human
/// in the loop; the default approves everything.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, plan: &Plan) -> PlanDecision;
}

/// Default gate: every plan executes immediately.
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn review(&self, _plan: &Plan) -> PlanDecision {
        PlanDecision::Approved
    }
}

/// Gate backed by a request channel: each review sends the plan plus a
/// responder to the edge and waits for the verdict.  A dropped responder
/// counts as rejection.
pub struct ChannelGate {
    requests: mpsc::Sender<(Plan, oneshot::Sender<PlanDecision>)>,
}

impl ChannelGate {
    pub fn new(requests: mpsc::Sender<(Plan, oneshot::Sender<PlanDecision>)>) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl ApprovalGate for ChannelGate {
    async fn review(&self, plan: &Plan) -> PlanDecision {
        let (tx, rx) = oneshot::channel();
        if self.requests.send((plan.clone(), tx)).await.is_err() {
            return PlanDecision::Rejected {
                reason: "approval channel closed".into(),
            };
        }
        rx.await.unwrap_or(PlanDecision::Rejected {
            reason: "approval abandoned".into(),
        })
    }
}

/// Test gate that replays queued decisions in order, approving once the
/// queue is empty.
pub struct ScriptedGate {
    decisions: Mutex<Vec<PlanDecision>>,
}

impl ScriptedGate {
    pub fn new(decisions: Vec<PlanDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions),
        }
    }
}

#[async_trait]
impl ApprovalGate for ScriptedGate {
    async fn review(&self, _plan: &Plan) -> PlanDecision {
        let mut q = self.decisions.lock().expect("gate queue poisoned");
        if q.is_empty() {
            PlanDecision::Approved
        } else {
            q.remove(0)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
