// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use quanta_core::PlanExecuteAgent;

/// A session's agent survives across HTTP requests behind this registry:
/// created on session open, fetched per request, dropped on close or after
/// the idle timeout.  Each agent sits behind its own async lock, so
/// operations within one session are sequential while distinct sessions run
/// concurrently.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
}

struct Entry {
    agent: Arc<tokio::sync::Mutex<PlanExecuteAgent>>,
    last_used: Instant,
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Register a freshly built agent under its session id.  Replaces any
    /// previous agent for the same id.
    pub fn insert(
        &self,
        session_id: impl Into<String>,
        agent: PlanExecuteAgent,
    ) -> Arc<tokio::sync::Mutex<PlanExecuteAgent>> {
        let session_id = session_id.into();
        let handle = Arc::new(tokio::sync::Mutex::new(agent));
        debug!(session = %session_id, "session registered");
        self.entries.lock().expect("session registry poisoned").insert(
            session_id,
            Entry {
                agent: Arc::clone(&handle),
                last_used: Instant::now(),
            },
        );
        handle
    }

    /// Fetch a live session, refreshing its idle clock.
    pub fn get(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<PlanExecuteAgent>>> {
        let mut entries = self.entries.lock().expect("session registry poisoned");
        entries.get_mut(session_id).map(|e| {
            e.last_used = Instant::now();
            Arc::clone(&e.agent)
        })
    }

    /// Drop a session explicitly (session close).
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .expect("session registry poisoned")
            .remove(session_id)
            .is_some();
        if removed {
            info!(session = session_id, "session closed");
        }
        removed
    }

    /// Evict sessions idle past the timeout; returns the evicted ids.
    /// The edge runs this on a periodic sweep.
    pub fn evict_idle(&self) -> Vec<String> {
        let mut entries = self.entries.lock().expect("session registry poisoned");
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.last_used.elapsed() > self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
            info!(session = %id, "session evicted after idle timeout");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("session registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quanta_config::AgentConfig;
    use quanta_context::{AgentContext, AgentKind};
    use quanta_core::{EventBus, PromptTemplates};
    use quanta_model::ScriptedProvider;
    use quanta_tools::ToolRegistry;

    use super::*;

    fn agent() -> PlanExecuteAgent {
        let cfg = AgentConfig::default();
        PlanExecuteAgent::new(
            AgentContext::new("s", "p", AgentKind::CodeAgent, &cfg),
            Arc::new(ScriptedProvider::always_text("ok")),
            Arc::new(ToolRegistry::new()),
            Arc::new(cfg),
            Arc::new(EventBus::new(64)),
            Arc::new(PromptTemplates::default()),
        )
    }

    #[test]
    fn insert_get_close_lifecycle() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        reg.insert("s1", agent());
        assert!(reg.get("s1").is_some());
        assert!(reg.get("missing").is_none());
        assert!(reg.close("s1"));
        assert!(!reg.close("s1"));
        assert!(reg.is_empty());
    }

    #[test]
    fn idle_sessions_are_evicted() {
        let reg = SessionRegistry::new(Duration::from_millis(0));
        reg.insert("s1", agent());
        std::thread::sleep(Duration::from_millis(5));
        let evicted = reg.evict_idle();
        assert_eq!(evicted, vec!["s1".to_string()]);
        assert!(reg.get("s1").is_none());
    }

    #[test]
    fn recently_used_sessions_survive_the_sweep() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        reg.insert("s1", agent());
        assert!(reg.evict_idle().is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn same_session_is_shared_across_fetches() {
        let reg = SessionRegistry::new(Duration::from_secs(60));
        reg.insert("s1", agent());
        let a = reg.get("s1").unwrap();
        let b = reg.get("s1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
