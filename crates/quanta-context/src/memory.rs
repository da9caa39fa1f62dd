// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded decision: what was decided and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Session memory: project conventions plus the decision log, both
/// length-capped (oldest entries drop first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    conventions: Vec<String>,
    decisions: Vec<Decision>,
    max_conventions: usize,
    max_decisions: usize,
}

impl MemoryContext {
    pub fn new(max_conventions: usize, max_decisions: usize) -> Self {
        Self {
            conventions: Vec::new(),
            decisions: Vec::new(),
            max_conventions,
            max_decisions,
        }
    }

    pub fn add_convention(&mut self, convention: impl Into<String>) {
        self.conventions.push(convention.into());
        let overflow = self.conventions.len().saturating_sub(self.max_conventions);
        if overflow > 0 {
            self.conventions.drain(..overflow);
        }
    }

    pub fn add_decision(&mut self, decision: impl Into<String>, reason: impl Into<String>) {
        self.decisions.push(Decision {
            decision: decision.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        let overflow = self.decisions.len().saturating_sub(self.max_decisions);
        if overflow > 0 {
            self.decisions.drain(..overflow);
        }
    }

    /// The most recent `n` decisions, newest last.
    pub fn recent_decisions(&self, n: usize) -> &[Decision] {
        let start = self.decisions.len().saturating_sub(n);
        &self.decisions[start..]
    }

    /// The most recent `n` conventions, newest last.
    pub fn recent_conventions(&self, n: usize) -> &[String] {
        let start = self.conventions.len().saturating_sub(n);
        &self.conventions[start..]
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn conventions(&self) -> &[String] {
        &self.conventions
    }
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new(50, 100)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
