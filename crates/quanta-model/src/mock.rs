// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{ChatReply, ChatRequest, ModelProvider, Role};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant reply.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatReply> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        Ok(ChatReply::text(format!("MOCK: {reply}")))
    }
}

/// A pre-scripted mock provider.  Each `chat` call pops the next reply from
/// the front of the queue, so tests can specify exact turn sequences —
/// including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<ChatReply>>,
    /// Every `ChatRequest` seen, in call order, so tests can inspect what
    /// was sent (prompt content, tool schemas, history projection).
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<ChatReply>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always answers with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![ChatReply::text(reply)])
    }

    /// Number of chat calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The last request seen, cloned.
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatReply> {
        self.requests.lock().unwrap().push(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed
            return Ok(ChatReply::text("[no more scripts]"));
        }
        Ok(scripts.remove(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ChatMessage;

    fn req(text: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let p = MockProvider;
        let reply = p.chat(req("hi")).await.unwrap();
        assert!(reply.text.contains("MOCK: hi"));
    }

    #[tokio::test]
    async fn scripted_pops_replies_in_order() {
        let p = ScriptedProvider::new(vec![
            ChatReply::tool_call("c1", "read_file", json!({"path": "a.py"})),
            ChatReply::text("done"),
        ]);
        let first = p.chat(req("go")).await.unwrap();
        assert!(first.has_tool_calls());
        let second = p.chat(req("go")).await.unwrap();
        assert_eq!(second.text, "done");
        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let reply = p.chat(req("x")).await.unwrap();
        assert!(reply.text.contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_records_requests_for_inspection() {
        let p = ScriptedProvider::always_text("ok");
        let _ = p.chat(req("inspect me")).await.unwrap();
        let last = p.last_request().unwrap();
        assert_eq!(last.messages[0].content, "inspect me");
    }
}
