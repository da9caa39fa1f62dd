// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session data model: conversation history with its to-LLM projection,
//! focused-file code context, symbol index, memory, and the plan/step state
//! machine.

pub mod code;
pub mod context;
pub mod conversation;
pub mod memory;
pub mod plan;
pub mod symbols;

pub use code::{CodeContext, FileEntry};
pub use context::{AgentContext, AgentKind, ExecutionContext};
pub use conversation::{ConversationHistory, HistoryMessage};
pub use memory::{Decision, MemoryContext};
pub use plan::{
    Plan, PlanError, PlanProgress, PlanStatus, PlanStep, PlanStepDraft, StepStatus, ToolCallRecord,
};
pub use symbols::{SharedSymbolIndex, SymbolIndex, SymbolInfo, SymbolKind};
