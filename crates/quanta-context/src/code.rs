// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A file the agent has loaded fully into working memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Workspace-relative, normalized path.
    pub path: String,
    pub content: String,
    pub language: String,
    /// Entries being edited are pinned: never evicted by the LRU sweep.
    pub is_editing: bool,
    pub last_accessed: DateTime<Utc>,
    /// Monotonic access tick; breaks same-millisecond ties in LRU order.
    pub(crate) touched: u64,
}

/// Bounded set of focused files plus the total-character budget.
///
/// Past the cap, the least-recently-accessed non-editing entry is evicted.
/// When every entry is pinned the budget may be exceeded; pinned files are
/// never dropped behind the model's back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeContext {
    files: BTreeMap<String, FileEntry>,
    max_total_chars: usize,
    clock: u64,
}

impl CodeContext {
    pub fn new(max_total_chars: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            max_total_chars,
            clock: 0,
        }
    }

    /// Insert or refresh a focused file with its full content.
    pub fn focus(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        let content = content.into();
        self.clock += 1;
        let language = language_for_path(&path).to_string();
        let is_editing = self
            .files
            .get(&path)
            .map(|e| e.is_editing)
            .unwrap_or(false);
        self.files.insert(
            path.clone(),
            FileEntry {
                path,
                content,
                language,
                is_editing,
                last_accessed: Utc::now(),
                touched: self.clock,
            },
        );
        self.evict_over_cap();
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Refresh the access time without changing content.
    pub fn touch(&mut self, path: &str) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.files.get_mut(path) {
            entry.last_accessed = Utc::now();
            entry.touched = clock;
        }
    }

    pub fn mark_editing(&mut self, path: &str, editing: bool) {
        if let Some(entry) = self.files.get_mut(path) {
            entry.is_editing = editing;
        }
        if !editing {
            self.evict_over_cap();
        }
    }

    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.files.remove(path)
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(mut entry) = self.files.remove(from) {
            entry.path = to.to_string();
            entry.language = language_for_path(to).to_string();
            self.files.insert(to.to_string(), entry);
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    pub fn total_chars(&self) -> usize {
        self.files.values().map(|e| e.content.len()).sum()
    }

    pub fn max_total_chars(&self) -> usize {
        self.max_total_chars
    }

    fn evict_over_cap(&mut self) {
        while self.total_chars() > self.max_total_chars {
            let victim = self
                .files
                .values()
                .filter(|e| !e.is_editing)
                .min_by_key(|e| e.touched)
                .map(|e| e.path.clone());
            match victim {
                Some(path) => {
                    debug!(path = %path, "evicting focused file over char budget");
                    self.files.remove(&path);
                }
                None => break,
            }
        }
    }
}

fn language_for_path(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("") {
        "py" => "python",
        "rs" => "rust",
        "js" => "javascript",
        "ts" => "typescript",
        "md" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "sh" => "shell",
        _ => "text",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
