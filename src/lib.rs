// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! quanta — multi-agent platform core for quantitative trading.
//!
//! Three agents share one orchestration engine: a Rule **Collector** that
//! elicits structured strategies through dialogue, a Rule **Executor** that
//! evaluates live strategies on a timer and places simulated orders, and a
//! **Code Agent** that plans and edits a project and runs scripts in a
//! sandbox.  This crate wires the engine's pieces together for the HTTP/SSE
//! edge: session registry, agent hosts, and telemetry.

pub mod hosts;
pub mod rules;
pub mod session;
pub mod telemetry;

pub use hosts::{build_rule_executor, CodeAgentHost, CollectorHost};
pub use rules::{MemoryRuleStore, RuleStore, SaveRuleTool, SavedRule};
pub use session::SessionRegistry;

pub use quanta_config as config;
pub use quanta_context as context;
pub use quanta_core as core;
pub use quanta_executor as executor;
pub use quanta_model as model;
pub use quanta_sandbox as sandbox;
pub use quanta_tools as tools;
