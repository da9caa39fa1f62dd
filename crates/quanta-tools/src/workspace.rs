// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::tool::{ToolError, ToolErrorKind};

/// The per-project workspace all file tools and the sandbox share:
/// `workspaces/<user_id>/<project_id>/`.  Every path handed to a tool is
/// normalized against the root and rejected when it would escape it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

#[derive(Serialize)]
struct ProjectMeta<'a> {
    project: &'a str,
    created_at: String,
}

impl Workspace {
    /// Open (creating if needed) the workspace at `root`, writing the
    /// `.meta` project descriptor on first touch.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let meta_path = root.join(".meta");
        if !meta_path.exists() {
            let project = root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("project");
            let meta = ProjectMeta {
                project,
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;
            debug!(root = %root.display(), "initialized workspace metadata");
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a model-supplied relative path.  Absolute paths and any
    /// `..` traversal that would leave the root are `path_escape` failures.
    pub fn normalize(&self, rel: &str) -> Result<String, ToolError> {
        let path = Path::new(rel);
        if path.is_absolute() {
            return Err(escape(rel, "absolute paths are not allowed"));
        }
        let mut parts: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(seg) => match seg.to_str() {
                    Some(s) => parts.push(s.to_string()),
                    None => return Err(escape(rel, "non-UTF8 path segment")),
                },
                Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(escape(rel, "path leaves the workspace root"));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(escape(rel, "absolute paths are not allowed"))
                }
            }
        }
        if parts.is_empty() {
            return Err(escape(rel, "empty path"));
        }
        Ok(parts.join("/"))
    }

    /// Normalize and resolve against the root for filesystem access.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, ToolError> {
        Ok(self.root.join(self.normalize(rel)?))
    }

    /// Like [`resolve`] but allows the workspace root itself ("" or ".").
    pub fn resolve_dir(&self, rel: &str) -> Result<PathBuf, ToolError> {
        if rel.is_empty() || rel == "." {
            return Ok(self.root.clone());
        }
        self.resolve(rel)
    }
}

fn escape(path: &str, why: &str) -> ToolError {
    ToolError {
        kind: ToolErrorKind::PathEscape,
        message: format!("'{path}': {why}"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
