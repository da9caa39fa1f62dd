// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The orchestration core: typed event stream, plan-and-execute agent loop,
//! anomaly detection, prompt assembly, and the plan approval gate.

pub mod agent;
pub mod anomaly;
pub mod approval;
pub mod bus;
pub mod events;
pub mod prompts;

pub use agent::PlanExecuteAgent;
pub use anomaly::{Anomaly, AnomalyDetector, AnomalyKind};
pub use approval::{ApprovalGate, AutoApprove, ChannelGate, PlanDecision, ScriptedGate};
pub use bus::{EventBus, Subscription};
pub use events::{AgentEvent, EventEnvelope, RunMode, ToolCallBrief};
pub use prompts::PromptTemplates;

#[cfg(test)]
mod tests;
