// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool catalog: the [`Tool`] trait, the schema-validating [`ToolRegistry`],
//! workspace path containment, and the built-in tool set.

pub mod builtin;
pub mod registry;
pub mod tool;
pub mod validate;
pub mod workspace;

pub use registry::ToolRegistry;
pub use tool::{Tool, ToolError, ToolErrorKind, ToolResult};
pub use validate::validate_args;
pub use workspace::Workspace;

pub use builtin::fs_ops::{DeleteFileTool, ListDirectoryTool, MoveFileTool};
pub use builtin::grep::GrepTool;
pub use builtin::patch_file::PatchFileTool;
pub use builtin::plan::{CreatePlanTool, TaskCompleteTool};
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell_exec::ShellExecTool;
pub use builtin::symbols::{FindReferencesTool, GetDefinitionTool, GetFileOutlineTool};
pub use builtin::write_file::WriteFileTool;
