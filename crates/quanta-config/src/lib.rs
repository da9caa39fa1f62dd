// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Configuration schema and layered YAML loader for the quanta platform.

pub mod loader;
pub mod schema;

pub use loader::load;
pub use schema::{
    AgentConfig, Config, ExecutorConfig, ProviderConfig, SandboxConfig, SessionConfig,
    WorkspaceConfig,
};
