//! Agent instance and registry — per-agent configuration and state.
//!
//! Each configured agent owns its own session store, context builder, tool
//! registry, and fallback candidate list, so multiple agents can run side
//! by side without sharing workspace or conversation state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use switchbox_core::config::schema::{AgentConfig, AgentDefaults};
use switchbox_core::session::SessionManager;
use switchbox_core::types::FallbackCandidate;

use crate::context::ContextBuilder;
use crate::tools::registry::ToolRegistry;

/// A single configured agent: its own workspace, model candidates, tools,
/// and sessions.
pub struct AgentInstance {
    pub id: String,
    pub workspace: PathBuf,
    pub model: String,
    pub fallbacks: Vec<String>,
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub temperature: f64,
    pub restrict_to_workspace: bool,
    /// Agent ids this agent's `spawn` tool may target. Empty means unrestricted.
    pub sub_agent_allowlist: Vec<String>,
    pub sessions: SessionManager,
    pub context: ContextBuilder,
    pub tools: ToolRegistry,
}

impl AgentInstance {
    /// Build an instance from its config entry plus the shared defaults.
    /// `build_tools` constructs the per-agent tool registry (the same
    /// helper the single-agent constructor uses), since tool wiring needs
    /// provider/bus handles this module doesn't own.
    pub fn new(
        agent_cfg: &AgentConfig,
        tools: ToolRegistry,
    ) -> Self {
        let id = if agent_cfg.id.is_empty() {
            "default".to_string()
        } else {
            agent_cfg.id.clone()
        };
        let workspace = switchbox_core::utils::expand_home(&agent_cfg.workspace);
        let sessions_dir = workspace.join("sessions");
        let sessions = SessionManager::new(Some(sessions_dir))
            .unwrap_or_else(|e| panic!("failed to create session manager for agent {id}: {e}"));
        let context = ContextBuilder::new(&workspace, &id);

        Self {
            id,
            workspace,
            model: agent_cfg.model.clone(),
            fallbacks: agent_cfg.fallbacks.clone(),
            max_iterations: agent_cfg.max_tool_iterations as usize,
            max_tokens: agent_cfg.max_tokens,
            temperature: agent_cfg.temperature,
            restrict_to_workspace: agent_cfg.restrict_to_workspace,
            sub_agent_allowlist: agent_cfg.sub_agent_allowlist.clone(),
            sessions,
            context,
            tools,
        }
    }

    /// Ordered candidates for the fallback chain: primary model first, then
    /// each configured fallback.
    pub fn candidates(&self) -> Vec<FallbackCandidate> {
        let mut candidates = vec![FallbackCandidate {
            provider: "primary".to_string(),
            model: self.model.clone(),
        }];
        for fb in &self.fallbacks {
            candidates.push(FallbackCandidate {
                provider: "fallback".to_string(),
                model: fb.clone(),
            });
        }
        candidates
    }

    /// Whether this agent's `spawn` tool may target `target_agent_id`.
    pub fn can_spawn(&self, target_agent_id: &str) -> bool {
        self.sub_agent_allowlist.is_empty() || self.sub_agent_allowlist.iter().any(|a| a == target_agent_id)
    }
}

/// Built once at startup from `Config.agents`, and consulted by the route
/// resolver's output to find the `AgentInstance` that should handle a turn.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentInstance>>,
}

impl AgentRegistry {
    /// Build a registry from the configured agent list plus defaults.
    ///
    /// If no entry named `"default"` is present, one is synthesized from
    /// `agents.defaults` — matching the route resolver's default matched-by
    /// behavior, which always resolves to agent id `"default"`.
    pub fn new<F>(agent_configs: &[AgentConfig], defaults: &AgentDefaults, mut build_tools: F) -> Self
    where
        F: FnMut(&AgentConfig) -> ToolRegistry,
    {
        let mut agents = HashMap::new();
        let mut has_default = false;

        for cfg in agent_configs {
            let id = if cfg.id.is_empty() { "default".to_string() } else { cfg.id.clone() };
            if id == "default" {
                has_default = true;
            }
            let tools = build_tools(cfg);
            agents.insert(id, Arc::new(AgentInstance::new(cfg, tools)));
        }

        if !has_default {
            let default_cfg = AgentConfig {
                id: "default".to_string(),
                workspace: defaults.workspace.clone(),
                model: defaults.model.clone(),
                fallbacks: Vec::new(),
                max_tokens: defaults.max_tokens,
                temperature: defaults.temperature,
                max_tool_iterations: defaults.max_tool_iterations,
                restrict_to_workspace: true,
                sub_agent_allowlist: Vec::new(),
            };
            let tools = build_tools(&default_cfg);
            agents.insert("default".to_string(), Arc::new(AgentInstance::new(&default_cfg, tools)));
        }

        Self { agents }
    }

    /// Look up an agent by id, falling back to `"default"` when absent.
    pub fn get_or_default(&self, agent_id: &str) -> Arc<AgentInstance> {
        self.agents
            .get(agent_id)
            .or_else(|| self.agents.get("default"))
            .cloned()
            .expect("AgentRegistry must always contain a default agent")
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            workspace: "/tmp/switchbox-instance-tests".to_string(),
            model: "anthropic/claude-sonnet-4-20250514".to_string(),
            fallbacks: vec!["openai/gpt-4o".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_candidates_include_primary_then_fallbacks() {
        let instance = AgentInstance::new(&cfg("agent1"), ToolRegistry::new());
        let candidates = instance.candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].provider, "primary");
        assert_eq!(candidates[1].provider, "fallback");
    }

    #[test]
    fn test_can_spawn_unrestricted_when_allowlist_empty() {
        let instance = AgentInstance::new(&cfg("agent1"), ToolRegistry::new());
        assert!(instance.can_spawn("anything"));
    }

    #[test]
    fn test_can_spawn_restricted_to_allowlist() {
        let mut c = cfg("agent1");
        c.sub_agent_allowlist = vec!["researcher".to_string()];
        let instance = AgentInstance::new(&c, ToolRegistry::new());
        assert!(instance.can_spawn("researcher"));
        assert!(!instance.can_spawn("other"));
    }

    #[test]
    fn test_registry_synthesizes_default_when_absent() {
        let registry = AgentRegistry::new(&[cfg("support")], &AgentDefaults::default(), |c| {
            AgentInstance::new(c, ToolRegistry::new()).tools
        });
        assert_eq!(registry.len(), 2);
        let default_agent = registry.get_or_default("default");
        assert_eq!(default_agent.id, "default");
    }

    #[test]
    fn test_registry_unknown_agent_falls_back_to_default() {
        let registry = AgentRegistry::new(&[cfg("support")], &AgentDefaults::default(), |c| {
            AgentInstance::new(c, ToolRegistry::new()).tools
        });
        let resolved = registry.get_or_default("nonexistent");
        assert_eq!(resolved.id, "default");
    }
}
