// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// The structured verdict parsed from the executor agent's terminal reply.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Decision {
    pub action: Action,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Extract a decision from the terminal assistant reply.
///
/// The reply is expected to be a bare JSON object, but models wrap it in
/// prose or code fences often enough that the parser also tries the first
/// `{..}` substring.  `None` means unparseable; the caller treats that as
/// hold and logs it.
pub fn parse_decision(text: &str) -> Option<Decision> {
    let trimmed = text.trim();
    if let Ok(d) = serde_json::from_str::<Decision>(trimmed) {
        return Some(d);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Decision>(&trimmed[start..=end]).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
