// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! LLM adapter layer: message types, the provider contract, an
//! OpenAI-compatible HTTP driver, and scripted mocks for tests.

pub mod mock;
pub mod openai_compat;
pub mod provider;
pub mod types;

pub use mock::{MockProvider, ScriptedProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{chat_with_retry, select_provider, ModelProvider};
pub use types::{ChatMessage, ChatReply, ChatRequest, Role, ToolCallRequest, ToolSchema};
