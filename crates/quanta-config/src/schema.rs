// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ordered list of LLM providers.  The first fully-configured entry wins;
    /// incomplete entries are skipped with a warning.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// One LLM provider endpoint.
///
/// ```yaml
/// providers:
///   - model: gpt-4o
///     base_url: https://api.openai.com/v1
///     api_key_env: OPENAI_API_KEY
///   - model: qwen2.5-72b
///     base_url: http://localhost:8000/v1
///     api_key: none
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model name forwarded to the provider API.
    pub model: String,
    /// Base URL of an OpenAI-compatible chat endpoint.
    pub base_url: String,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    /// Resolve the API key: explicit value first, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

fn default_max_iterations() -> u32 {
    20
}
fn default_step_max_iterations() -> u32 {
    10
}
fn default_max_messages() -> usize {
    200
}
fn default_focused_files_max_chars() -> usize {
    200_000
}
fn default_shell_history_cap() -> usize {
    2_000
}
fn default_large_file_lines() -> usize {
    2_000
}
fn default_memory_in_prompt() -> usize {
    10
}
fn default_repo_map_max_files() -> usize {
    20
}
fn default_anomaly_replan_threshold() -> u32 {
    3
}
fn default_event_retention() -> usize {
    1_024
}

/// Knobs for the plan-and-execute orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool-call loop cap for a Direct-mode turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Tool-call loop cap for a single plan step.
    #[serde(default = "default_step_max_iterations")]
    pub step_max_iterations: u32,
    /// Conversation-history eviction bound (messages, oldest turn groups
    /// dropped as a unit).
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Total-character cap over all focused files; LRU non-editing entries
    /// are evicted past this.
    #[serde(default = "default_focused_files_max_chars")]
    pub focused_files_max_chars: usize,
    /// `shell_exec` output kept verbatim in history up to this many chars.
    #[serde(default = "default_shell_history_cap")]
    pub shell_history_truncate_chars: usize,
    /// Files longer than this return a preview plus a re-read instruction.
    #[serde(default = "default_large_file_lines")]
    pub large_file_preview_lines: usize,
    /// Most recent memory decisions rendered into the system prompt.
    #[serde(default = "default_memory_in_prompt")]
    pub memory_decisions_in_prompt: usize,
    /// Most recent project conventions rendered into the system prompt.
    #[serde(default = "default_memory_in_prompt")]
    pub memory_conventions_in_prompt: usize,
    /// Repo-map file cap in the system prompt.
    #[serde(default = "default_repo_map_max_files")]
    pub repo_map_max_files: usize,
    /// When true, a freshly created plan waits for approve/reject/modify
    /// before executing.
    #[serde(default)]
    pub plan_approval: bool,
    /// Cumulative anomalies within one plan that trigger a replan.
    #[serde(default = "default_anomaly_replan_threshold")]
    pub anomaly_replan_threshold: u32,
    /// Event-bus retention window (events kept for reconnecting consumers).
    #[serde(default = "default_event_retention")]
    pub event_retention: usize,
    /// Optional system-prompt override; replaces the built-in role framing.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            step_max_iterations: default_step_max_iterations(),
            max_messages: default_max_messages(),
            focused_files_max_chars: default_focused_files_max_chars(),
            shell_history_truncate_chars: default_shell_history_cap(),
            large_file_preview_lines: default_large_file_lines(),
            memory_decisions_in_prompt: default_memory_in_prompt(),
            memory_conventions_in_prompt: default_memory_in_prompt(),
            repo_map_max_files: default_repo_map_max_files(),
            plan_approval: false,
            anomaly_replan_threshold: default_anomaly_replan_threshold(),
            event_retention: default_event_retention(),
            system_prompt: None,
        }
    }
}

fn default_poll_interval() -> String {
    "60s".into()
}
fn default_executor_iterations() -> u32 {
    10
}

/// Per-rule evaluation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Sleep between evaluation cycles, humantime syntax ("60s", "5m").
    /// May be overridden per rule from its timeframe.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Tool-call budget for one evaluation cycle.
    #[serde(default = "default_executor_iterations")]
    pub max_tool_iterations: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_tool_iterations: default_executor_iterations(),
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval(&self) -> Duration {
        parse_duration_or(&self.poll_interval, Duration::from_secs(60))
    }
}

fn default_sandbox_timeout() -> String {
    "5m".into()
}
fn default_grace() -> String {
    "2s".into()
}
fn default_output_cap() -> usize {
    100_000
}

/// Sandboxed process-runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Default hard timeout when the request does not select one.
    #[serde(default = "default_sandbox_timeout")]
    pub default_timeout: String,
    /// Delay between polite termination and hard kill.
    #[serde(default = "default_grace")]
    pub grace_period: String,
    /// Cumulative stdout+stderr cap streamed per run.
    #[serde(default = "default_output_cap")]
    pub output_cap_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_sandbox_timeout(),
            grace_period: default_grace(),
            output_cap_bytes: default_output_cap(),
        }
    }
}

impl SandboxConfig {
    pub fn default_timeout(&self) -> Duration {
        parse_duration_or(&self.default_timeout, Duration::from_secs(300))
    }
    pub fn grace_period(&self) -> Duration {
        parse_duration_or(&self.grace_period, Duration::from_secs(2))
    }
}

fn default_workspace_root() -> String {
    "workspaces".into()
}

/// Per-user project workspace layout: `<root>/<user_id>/<project_id>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

impl WorkspaceConfig {
    /// Root with `~` and env vars expanded.
    pub fn expanded_root(&self) -> String {
        shellexpand::full(&self.root)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| self.root.clone())
    }
}

fn default_idle_timeout() -> String {
    "30m".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle past this are evicted from the registry.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        parse_duration_or(&self.idle_timeout, Duration::from_secs(1800))
    }
}

fn parse_duration_or(s: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(s).unwrap_or(fallback)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
