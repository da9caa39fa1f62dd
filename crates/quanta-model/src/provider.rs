// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use quanta_config::ProviderConfig;

use crate::{ChatReply, ChatRequest};

/// The black-box chat endpoint contract the orchestrator consumes.
///
/// Implementations must preserve tool-call ids round-trip: a tool-result
/// message referencing an id from a previous reply is forwarded unchanged.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send one chat request and return the complete reply.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatReply>;
}

/// Base delay for the transport-failure retry.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Call the provider with the transport-failure policy: one retry with
/// exponential backoff, then the error surfaces to the caller (which ends
/// the turn cleanly).
pub async fn chat_with_retry(
    provider: &dyn ModelProvider,
    req: ChatRequest,
) -> anyhow::Result<ChatReply> {
    match provider.chat(req.clone()).await {
        Ok(reply) => Ok(reply),
        Err(first) => {
            warn!(provider = provider.name(), error = %first, "chat transport failed; retrying");
            tokio::time::sleep(RETRY_BASE).await;
            provider.chat(req).await
        }
    }
}

/// Pick the first usable provider from the ordered startup list.
///
/// An entry is usable when it has a base URL and a model name; entries whose
/// API key cannot be resolved are still accepted (local endpoints commonly
/// run keyless) but logged.
pub fn select_provider(specs: &[ProviderConfig]) -> anyhow::Result<Arc<dyn ModelProvider>> {
    for spec in specs {
        if spec.base_url.trim().is_empty() || spec.model.trim().is_empty() {
            warn!(model = %spec.model, "skipping incomplete provider entry");
            continue;
        }
        if spec.resolve_api_key().is_none() {
            warn!(base_url = %spec.base_url, "provider has no API key; assuming keyless endpoint");
        }
        return Ok(Arc::new(crate::openai_compat::OpenAiCompatProvider::new(
            spec.clone(),
        )));
    }
    anyhow::bail!("no usable LLM provider configured")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
