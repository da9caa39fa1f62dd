// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use quanta_context::{CodeContext, Plan};
use quanta_model::ChatReply;

/// Shortest description fragment considered a usable key phrase for the
/// skip-ahead heuristic.
const MIN_PHRASE_LEN: usize = 12;

/// Tools whose calls mutate workspace files.
fn is_write_tool(name: &str) -> bool {
    matches!(name, "write_file" | "patch_file" | "delete_file" | "move_file")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// The reply references content of a later step.
    SkipAhead,
    /// A write-class call targets a file outside the step's scope.
    ScopeDrift,
    /// The last three tool-call argument bags are identical.
    Loop,
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub message: String,
}

/// Per-step anomaly detector.  Created fresh for each step; the cumulative
/// count that triggers a replan is kept by the plan executor.
#[derive(Default)]
pub struct AnomalyDetector {
    recent_bags: VecDeque<String>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare one model reply against the expected step.
    pub fn inspect(
        &mut self,
        reply: &ChatReply,
        plan: &Plan,
        step_id: u32,
        focused: &CodeContext,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        if let Some(a) = self.detect_loop(reply) {
            anomalies.push(a);
        }
        anomalies.extend(detect_skip_ahead(reply, plan, step_id));
        anomalies.extend(detect_scope_drift(reply, plan, step_id, focused));
        anomalies
    }

    fn detect_loop(&mut self, reply: &ChatReply) -> Option<Anomaly> {
        if reply.tool_calls.is_empty() {
            self.recent_bags.clear();
            return None;
        }
        let mut parts: Vec<String> = reply
            .tool_calls
            .iter()
            .map(|c| format!("{}:{}", c.name, c.arguments))
            .collect();
        parts.sort();
        let bag = parts.join("|");
        self.recent_bags.push_back(bag);
        if self.recent_bags.len() > 3 {
            self.recent_bags.pop_front();
        }
        if self.recent_bags.len() == 3
            && self.recent_bags.iter().all(|b| b == &self.recent_bags[0])
        {
            let name = reply
                .tool_calls
                .first()
                .map(|c| c.name.clone())
                .unwrap_or_default();
            return Some(Anomaly {
                kind: AnomalyKind::Loop,
                message: format!("the last three tool calls repeat '{name}' with identical arguments"),
            });
        }
        None
    }
}

fn detect_skip_ahead(reply: &ChatReply, plan: &Plan, step_id: u32) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    let args_text: String = reply
        .tool_calls
        .iter()
        .map(|c| c.arguments.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let haystack = format!("{} {}", reply.text, args_text).to_lowercase();

    for later in plan.steps().iter().filter(|s| s.id > step_id) {
        for phrase in key_phrases(&later.description) {
            if haystack.contains(&phrase) {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::SkipAhead,
                    message: format!(
                        "reply mentions '{phrase}' which belongs to step {}",
                        later.id
                    ),
                });
                break;
            }
        }
    }
    anomalies
}

fn detect_scope_drift(
    reply: &ChatReply,
    plan: &Plan,
    step_id: u32,
    focused: &CodeContext,
) -> Vec<Anomaly> {
    let Ok(step) = plan.step(step_id) else {
        return Vec::new();
    };
    let step_text = format!("{} {}", step.description, step.expected_outcome).to_lowercase();
    let mut anomalies = Vec::new();
    for call in &reply.tool_calls {
        if !is_write_tool(&call.name) {
            continue;
        }
        let Some(path) = call
            .arguments
            .get("path")
            .or_else(|| call.arguments.get("to"))
            .and_then(|v| v.as_str())
        else {
            continue;
        };
        if focused.contains(path) || step_text.contains(&path.to_lowercase()) {
            continue;
        }
        anomalies.push(Anomaly {
            kind: AnomalyKind::ScopeDrift,
            message: format!(
                "{} targets '{path}' which is outside the scope of step {step_id}",
                call.name
            ),
        });
    }
    anomalies
}

/// Distinctive fragments of a step description, lowercased.
fn key_phrases(description: &str) -> Vec<String> {
    description
        .split(|c: char| matches!(c, ',' | '.' | ';' | ':'))
        .map(|s| s.trim().to_lowercase())
        .filter(|s| s.len() >= MIN_PHRASE_LEN)
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
