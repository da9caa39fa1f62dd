// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Function,
    Method,
    Variable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    pub signature: String,
    /// 1-based line range.
    pub line_start: usize,
    pub line_end: usize,
    pub docstring: Option<String>,
}

/// Per-file symbol summary plus the import graph, used as high-signal
/// project context (the "Repo Map").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolIndex {
    pub symbols_by_file: BTreeMap<String, Vec<SymbolInfo>>,
    /// file → imported files (module paths resolved to `a/b.py` form).
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl SymbolIndex {
    /// Parse one Python source file and (re)index it.
    pub fn index_source(&mut self, path: &str, content: &str) {
        let (symbols, deps) = parse_python(content);
        self.symbols_by_file.insert(path.to_string(), symbols);
        self.dependencies.insert(path.to_string(), deps);
    }

    pub fn remove_file(&mut self, path: &str) {
        self.symbols_by_file.remove(path);
        self.dependencies.remove(path);
    }

    pub fn rename_file(&mut self, from: &str, to: &str) {
        if let Some(symbols) = self.symbols_by_file.remove(from) {
            self.symbols_by_file.insert(to.to_string(), symbols);
        }
        if let Some(deps) = self.dependencies.remove(from) {
            self.dependencies.insert(to.to_string(), deps);
        }
    }

    pub fn outline(&self, path: &str) -> Option<&[SymbolInfo]> {
        self.symbols_by_file.get(path).map(Vec::as_slice)
    }

    /// All definitions of `name` across the index, in file order.
    pub fn definitions(&self, name: &str) -> Vec<(&str, &SymbolInfo)> {
        self.symbols_by_file
            .iter()
            .flat_map(|(file, symbols)| {
                symbols
                    .iter()
                    .filter(|s| s.name == name)
                    .map(move |s| (file.as_str(), s))
            })
            .collect()
    }

    pub fn file_count(&self) -> usize {
        self.symbols_by_file.len()
    }

    /// Render the repo map: a pure function of the current index, capped at
    /// `max_files` files (deterministic file order).
    pub fn to_repo_map_string(&self, max_files: usize) -> String {
        let mut out = String::new();
        for (file, symbols) in self.symbols_by_file.iter().take(max_files) {
            out.push_str(file);
            out.push('\n');
            for sym in symbols {
                out.push_str(&format!(
                    "  {} {} [{}-{}]\n",
                    kind_tag(sym.kind),
                    sym.signature,
                    sym.line_start,
                    sym.line_end
                ));
            }
        }
        let omitted = self.symbols_by_file.len().saturating_sub(max_files);
        if omitted > 0 {
            out.push_str(&format!("...and {omitted} more files\n"));
        }
        out
    }
}

fn kind_tag(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Class => "class",
        SymbolKind::Function => "fn",
        SymbolKind::Method => "method",
        SymbolKind::Variable => "var",
    }
}

/// Line-based Python parser: classes, functions, methods, module-level
/// variables, plus import targets resolved to workspace-relative file paths.
fn parse_python(content: &str) -> (Vec<SymbolInfo>, Vec<String>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut raw: Vec<(usize, SymbolInfo)> = Vec::new(); // (indent, symbol)
    let mut deps: Vec<String> = Vec::new();
    let mut class_indents: Vec<usize> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Pop classes whose body this line has left.
        class_indents.retain(|&ci| ci < indent);

        if let Some(module) = parse_import(trimmed) {
            let file = format!("{}.py", module.replace('.', "/"));
            if !deps.contains(&file) {
                deps.push(file);
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("class ") {
            let name = ident_prefix(rest);
            if !name.is_empty() {
                raw.push((
                    indent,
                    SymbolInfo {
                        name,
                        kind: SymbolKind::Class,
                        signature: trimmed.trim_end_matches(':').to_string(),
                        line_start: i + 1,
                        line_end: i + 1,
                        docstring: docstring_after(&lines, i),
                    },
                ));
                class_indents.push(indent);
            }
            continue;
        }

        let def_rest = trimmed
            .strip_prefix("def ")
            .or_else(|| trimmed.strip_prefix("async def "));
        if let Some(rest) = def_rest {
            let name = ident_prefix(rest);
            if !name.is_empty() {
                let kind = if class_indents.iter().any(|&ci| indent > ci) {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                raw.push((
                    indent,
                    SymbolInfo {
                        name,
                        kind,
                        signature: trimmed.trim_end_matches(':').to_string(),
                        line_start: i + 1,
                        line_end: i + 1,
                        docstring: docstring_after(&lines, i),
                    },
                ));
            }
            continue;
        }

        // Module-level assignment: NAME = ...
        if indent == 0 {
            if let Some(eq) = trimmed.find('=') {
                let lhs = trimmed[..eq].trim();
                if !lhs.is_empty()
                    && lhs.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    && !lhs.chars().next().unwrap_or('0').is_ascii_digit()
                    && !trimmed[eq..].starts_with("==")
                {
                    raw.push((
                        0,
                        SymbolInfo {
                            name: lhs.to_string(),
                            kind: SymbolKind::Variable,
                            signature: trimmed.to_string(),
                            line_start: i + 1,
                            line_end: i + 1,
                            docstring: None,
                        },
                    ));
                }
            }
        }
    }

    // Close line ranges: a symbol extends to the line before the next symbol
    // at the same or shallower indent, else to EOF.
    let total = lines.len();
    let mut symbols: Vec<SymbolInfo> = Vec::with_capacity(raw.len());
    for idx in 0..raw.len() {
        let (indent, mut sym) = (raw[idx].0, raw[idx].1.clone());
        let end = raw[idx + 1..]
            .iter()
            .find(|(later_indent, _)| *later_indent <= indent)
            .map(|(_, later)| later.line_start.saturating_sub(1))
            .unwrap_or(total);
        sym.line_end = end.max(sym.line_start);
        symbols.push(sym);
    }
    (symbols, deps)
}

fn parse_import(trimmed: &str) -> Option<String> {
    if let Some(rest) = trimmed.strip_prefix("from ") {
        let module = rest.split_whitespace().next()?;
        return Some(module.trim_start_matches('.').to_string()).filter(|m| !m.is_empty());
    }
    if let Some(rest) = trimmed.strip_prefix("import ") {
        let module = rest.split(|c: char| c == ',' || c.is_whitespace()).next()?;
        return Some(module.to_string()).filter(|m| !m.is_empty());
    }
    None
}

fn ident_prefix(s: &str) -> String {
    s.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn docstring_after(lines: &[&str], def_line: usize) -> Option<String> {
    let next = lines.get(def_line + 1)?.trim();
    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = next.strip_prefix(quote) {
            let first = rest.split(quote).next().unwrap_or(rest).trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
            // Docstring starts on the following line.
            return lines
                .get(def_line + 2)
                .map(|l| l.trim().trim_end_matches(quote).trim().to_string())
                .filter(|s| !s.is_empty());
        }
    }
    None
}

/// Shared handle to a session's symbol index.  Tools and the agent context
/// hold clones; serialization snapshots the current state.
#[derive(Debug, Clone, Default)]
pub struct SharedSymbolIndex(Arc<Mutex<SymbolIndex>>);

impl SharedSymbolIndex {
    pub fn new(index: SymbolIndex) -> Self {
        Self(Arc::new(Mutex::new(index)))
    }

    pub fn snapshot(&self) -> SymbolIndex {
        self.0.lock().expect("symbol index poisoned").clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&SymbolIndex) -> R) -> R {
        f(&self.0.lock().expect("symbol index poisoned"))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut SymbolIndex) -> R) -> R {
        f(&mut self.0.lock().expect("symbol index poisoned"))
    }
}

impl PartialEq for SharedSymbolIndex {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl Serialize for SharedSymbolIndex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SharedSymbolIndex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(SymbolIndex::deserialize(deserializer)?))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
