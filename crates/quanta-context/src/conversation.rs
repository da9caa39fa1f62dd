// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use quanta_model::{ChatMessage, Role, ToolCallRequest};

/// Tools whose results are placed into focused files and abbreviated in the
/// history projection after first issuance, so the same bytes never appear
/// twice in a prompt.
fn is_file_payload_tool(name: &str) -> bool {
    matches!(name, "read_file" | "write_file")
}

/// One stored message.  Unlike the wire [`ChatMessage`], a history message
/// remembers which tool produced it and whether its projection is
/// abbreviated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub is_abbreviated: bool,
    /// Where the full content lives once abbreviated (a focused-file path).
    #[serde(default)]
    pub full_content_ref: Option<String>,
}

impl HistoryMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_abbreviated: false,
            full_content_ref: None,
        }
    }
}

/// Ordered conversation history with a max-messages eviction policy.
///
/// Eviction drops the oldest *turn group* (a user message and everything up
/// to the next user message) as a unit, so a tool-call message is never
/// separated from its tool-result messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<HistoryMessage>,
    max_messages: usize,
    shell_truncate_chars: usize,
    /// Messages below this index were already projected to the model once;
    /// their file-payload tool results abbreviate on the next projection.
    projection_watermark: usize,
}

impl ConversationHistory {
    pub fn new(max_messages: usize, shell_truncate_chars: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
            shell_truncate_chars,
            projection_watermark: 0,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(HistoryMessage::text(Role::User, text));
        self.evict();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages
            .push(HistoryMessage::text(Role::Assistant, text));
        self.evict();
    }

    pub fn push_assistant_with_calls(
        &mut self,
        text: impl Into<String>,
        calls: Vec<ToolCallRequest>,
    ) {
        let mut msg = HistoryMessage::text(Role::Assistant, text);
        msg.tool_calls = calls;
        self.messages.push(msg);
        self.evict();
    }

    /// Append a tool-result message.  `file_ref` is the focused-file path for
    /// `read_file`/`write_file` results; `shell_exec` output is truncated in
    /// history beyond the configured threshold with a length marker.
    pub fn push_tool_result(
        &mut self,
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        file_ref: Option<String>,
    ) {
        let tool_name = tool_name.into();
        let mut content = content.into();
        if tool_name == "shell_exec" && content.len() > self.shell_truncate_chars {
            let total = content.len();
            content.truncate(floor_char_boundary(&content, self.shell_truncate_chars));
            content.push_str(&format!("\n...[truncated; {total} chars total]"));
        }
        self.messages.push(HistoryMessage {
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name),
            is_abbreviated: false,
            full_content_ref: file_ref,
        });
        self.evict();
    }

    pub fn messages(&self) -> &[HistoryMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The to-LLM projection.  File-payload tool results from earlier rounds
    /// collapse to `[<tool> <path>; see focused_files]`; everything appended
    /// since the previous projection goes out in full.
    pub fn project(&mut self) -> Vec<ChatMessage> {
        let watermark = self.projection_watermark.min(self.messages.len());
        for msg in &mut self.messages[..watermark] {
            if msg.role == Role::Tool
                && !msg.is_abbreviated
                && msg
                    .tool_name
                    .as_deref()
                    .is_some_and(is_file_payload_tool)
                && msg.full_content_ref.is_some()
            {
                msg.is_abbreviated = true;
            }
        }
        self.projection_watermark = self.messages.len();
        self.messages.iter().map(render).collect()
    }

    /// Drop the oldest turn groups until the message count fits the bound.
    fn evict(&mut self) {
        while self.messages.len() > self.max_messages {
            let cut = self.first_group_end();
            if cut == 0 || cut >= self.messages.len() {
                break;
            }
            self.messages.drain(..cut);
            self.projection_watermark = self.projection_watermark.saturating_sub(cut);
        }
    }

    /// Index one past the first turn group: the earliest user message after
    /// position zero, or the end when there is only one group.
    fn first_group_end(&self) -> usize {
        self.messages
            .iter()
            .skip(1)
            .position(|m| m.role == Role::User)
            .map(|p| p + 1)
            .unwrap_or(self.messages.len())
    }

    /// The most recent non-empty assistant text (the terminal reply of a
    /// finished turn).
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty())
            .map(|m| m.content.as_str())
    }

    /// Validation helper: every tool call carried by an assistant message has
    /// exactly one tool-result message with the same id later in history.
    pub fn tool_pairs_are_complete(&self) -> bool {
        for (i, msg) in self.messages.iter().enumerate() {
            for call in &msg.tool_calls {
                let answers = self.messages[i + 1..]
                    .iter()
                    .filter(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(&call.id))
                    .count();
                if answers != 1 {
                    return false;
                }
            }
        }
        true
    }
}

fn render(msg: &HistoryMessage) -> ChatMessage {
    match msg.role {
        Role::Tool => {
            let content = if msg.is_abbreviated {
                let tool = msg.tool_name.as_deref().unwrap_or("tool");
                let path = msg.full_content_ref.as_deref().unwrap_or("?");
                format!("[{tool} {path}; see focused_files]")
            } else {
                msg.content.clone()
            };
            ChatMessage::tool_result(msg.tool_call_id.clone().unwrap_or_default(), content)
        }
        Role::Assistant if !msg.tool_calls.is_empty() => {
            ChatMessage::assistant_with_calls(msg.content.clone(), msg.tool_calls.clone())
        }
        Role::Assistant => ChatMessage::assistant(msg.content.clone()),
        Role::User => ChatMessage::user(msg.content.clone()),
        Role::System => ChatMessage::system(msg.content.clone()),
    }
}

/// Largest byte index ≤ `at` that falls on a char boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut i = at;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
