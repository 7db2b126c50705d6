//! Agent directory port and the built-in static roster.

use crewflow_types::agent::{AgentProfile, TaskRequirements};

/// Lookup of the agents a workflow may assign tasks to.
///
/// Injected into the engine and the recovery framework; there is no global
/// registry.
pub trait AgentDirectory: Send + Sync {
    /// Profile of one agent.
    fn agent(&self, id: &str) -> Option<AgentProfile>;

    /// Agent ids in registration order. Ties in scoring resolve to the
    /// earlier id.
    fn agent_ids(&self) -> Vec<String>;

    /// Capabilities of one agent (empty for unknown agents).
    fn capabilities(&self, id: &str) -> Vec<String> {
        self.agent(id).map(|a| a.capabilities).unwrap_or_default()
    }

    /// The directory's own pick for `requirements`, consulted before scoring.
    fn optimal_agent(&self, _requirements: &TaskRequirements) -> Option<String> {
        None
    }
}

/// Fixed, in-process agent roster.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDirectory {
    agents: Vec<AgentProfile>,
}

impl StaticAgentDirectory {
    pub fn new(agents: Vec<AgentProfile>) -> Self {
        Self { agents }
    }

    /// Add or replace an agent, keeping the original position on replace.
    pub fn register(&mut self, profile: AgentProfile) {
        match self.agents.iter_mut().find(|a| a.id == profile.id) {
            Some(existing) => *existing = profile,
            None => self.agents.push(profile),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The default six-role agile roster.
    pub fn bmad_default() -> Self {
        fn profile(
            id: &str,
            name: &str,
            role: &str,
            capabilities: &[&str],
            phases: &[&str],
            handoffs: &[&str],
        ) -> AgentProfile {
            fn owned(items: &[&str]) -> Vec<String> {
                items.iter().map(|s| s.to_string()).collect()
            }
            AgentProfile {
                id: id.to_string(),
                name: name.to_string(),
                role: role.to_string(),
                capabilities: owned(capabilities),
                phases: owned(phases),
                compatible_handoffs: owned(handoffs),
            }
        }

        Self::new(vec![
            profile(
                "scrum-master",
                "Scrum Master",
                "coordination",
                &["coordination", "process", "facilitation", "agile"],
                &["planning", "coordination"],
                &["product-owner", "dev-agent", "qa-agent"],
            ),
            profile(
                "product-owner",
                "Product Owner",
                "product",
                &["requirements", "prioritization", "backlog", "validation"],
                &["requirements", "planning"],
                &["product-manager", "architect", "scrum-master"],
            ),
            profile(
                "product-manager",
                "Product Manager",
                "product",
                &["requirements", "planning", "strategy", "documentation"],
                &["requirements", "planning"],
                &["architect", "product-owner"],
            ),
            profile(
                "architect",
                "Architect",
                "architecture",
                &["design", "architecture", "planning", "technical"],
                &["design", "architecture"],
                &["dev-agent", "qa-agent", "product-manager"],
            ),
            profile(
                "dev-agent",
                "Developer",
                "development",
                &["implementation", "coding", "debugging", "testing"],
                &["implementation", "development"],
                &["qa-agent", "architect", "scrum-master"],
            ),
            profile(
                "qa-agent",
                "QA Engineer",
                "quality",
                &["testing", "quality", "validation", "review"],
                &["testing", "validation"],
                &["dev-agent", "architect", "product-owner"],
            ),
        ])
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn agent(&self, id: &str) -> Option<AgentProfile> {
        self.agents.iter().find(|a| a.id == id).cloned()
    }

    fn agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.id.clone()).collect()
    }
}
