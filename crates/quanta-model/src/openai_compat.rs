// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use quanta_config::ProviderConfig;

use crate::{ChatMessage, ChatReply, ChatRequest, ModelProvider, Role, ToolCallRequest};

/// Driver for any OpenAI-compatible `/chat/completions` endpoint.
///
/// The platform never streams from the provider: the orchestrator consumes
/// complete replies and does its own incremental event emission.
pub struct OpenAiCompatProvider {
    spec: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(spec: ProviderConfig) -> Self {
        Self {
            spec,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.spec.base_url.trim_end_matches('/')
        )
    }
}

// ─── Wire format ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireToolDef,
}

#[derive(Serialize)]
struct WireToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_wire(msg: &ChatMessage) -> WireMessage {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: "function".into(),
                    function: WireFunction {
                        name: c.name.clone(),
                        arguments: c.arguments.to_string(),
                    },
                })
                .collect(),
        )
    };
    WireMessage {
        role: role_str(msg.role).into(),
        content: Some(msg.content.clone()),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn from_wire(msg: WireMessage) -> ChatReply {
    let tool_calls = msg
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            // Providers deliver arguments as a JSON-encoded string.  An empty
            // or unparseable blob becomes `{}` so the registry's schema check
            // reports the problem as tool data rather than a transport error.
            let arguments = if c.function.arguments.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&c.function.arguments).unwrap_or_else(|e| {
                    warn!(tool = %c.function.name, error = %e, "invalid tool-call arguments from model; substituting {{}}");
                    serde_json::Value::Object(Default::default())
                })
            };
            ToolCallRequest {
                id: c.id,
                name: c.function.name,
                arguments,
            }
        })
        .collect();
    ChatReply {
        text: msg.content.unwrap_or_default(),
        tool_calls,
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.spec.model
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatReply> {
        let body = WireRequest {
            model: self.spec.model.clone(),
            messages: req.messages.iter().map(to_wire).collect(),
            tools: req
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function".into(),
                    function: WireToolDef {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
            temperature: req.temperature.or(self.spec.temperature),
            max_tokens: req.max_tokens.or(self.spec.max_tokens),
        };

        let mut http = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.spec.resolve_api_key() {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat endpoint returned {status}: {text}");
        }
        let parsed: WireResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("chat endpoint returned no choices"))?;
        Ok(from_wire(choice.message))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn to_wire_serializes_tool_call_arguments_as_string() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            vec![ToolCallRequest {
                id: "c1".into(),
                name: "grep".into(),
                arguments: json!({"pattern": "RSI"}),
            }],
        );
        let wire = to_wire(&msg);
        let calls = wire.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "grep");
        let parsed: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(parsed["pattern"], "RSI");
    }

    #[test]
    fn from_wire_parses_string_arguments_back_to_json() {
        let wire = WireMessage {
            role: "assistant".into(),
            content: None,
            tool_calls: Some(vec![WireToolCall {
                id: "c2".into(),
                kind: "function".into(),
                function: WireFunction {
                    name: "get_klines".into(),
                    arguments: r#"{"symbol":"BTC/USDT","limit":100}"#.into(),
                },
            }]),
            tool_call_id: None,
        };
        let reply = from_wire(wire);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].arguments["limit"], 100);
        assert!(reply.text.is_empty());
    }

    #[test]
    fn from_wire_substitutes_empty_object_for_garbage_arguments() {
        let wire = WireMessage {
            role: "assistant".into(),
            content: Some("thinking".into()),
            tool_calls: Some(vec![WireToolCall {
                id: "c3".into(),
                kind: "function".into(),
                function: WireFunction {
                    name: "t".into(),
                    arguments: "{not json".into(),
                },
            }]),
            tool_call_id: None,
        };
        let reply = from_wire(wire);
        assert!(reply.tool_calls[0].arguments.is_object());
        assert_eq!(reply.text, "thinking");
    }

    #[test]
    fn endpoint_joins_base_url_without_double_slash() {
        let p = OpenAiCompatProvider::new(ProviderConfig {
            model: "m".into(),
            base_url: "http://localhost:8000/v1/".into(),
            api_key: None,
            api_key_env: None,
            temperature: None,
            max_tokens: None,
        });
        assert_eq!(p.endpoint(), "http://localhost:8000/v1/chat/completions");
    }
}
