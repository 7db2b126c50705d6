//! Dynamic agent assignment.
//!
//! Candidates are scored as a weighted sum of four components, each in
//! `0.0..=1.0`:
//!
//! | component   | weight | meaning                                              |
//! |-------------|--------|------------------------------------------------------|
//! | capability  | 0.4    | fraction of required capabilities the agent has      |
//! | performance | 0.3    | success ratio of handoffs originating at the agent   |
//! | load        | 0.2    | `1 - min(1, recent / threshold)` over recent handoffs |
//! | context     | 0.1    | match between the task phase and the agent's phases  |
//!
//! When no candidate reaches the viability threshold, a keyword table picks
//! the agent from the task description.

pub mod directory;

use std::sync::Arc;

use crewflow_types::agent::{AgentScore, DurationClass, TaskRequirements};
use crewflow_types::config::AssignmentConfig;
use crewflow_types::state::HandoffRecord;
use crewflow_types::task::{Complexity, TaskSpec};
use serde_json::{Map, Value};

pub use directory::{AgentDirectory, StaticAgentDirectory};

/// Agent used when nothing else matches.
pub const DEFAULT_AGENT: &str = "dev-agent";

// ---------------------------------------------------------------------------
// Requirement extraction
// ---------------------------------------------------------------------------

/// Description keywords and the capabilities they imply.
const CAPABILITY_KEYWORDS: &[(&[&str], &[&str])] = &[
    (&["implement", "develop", "code", "build"], &["implementation", "coding"]),
    (&["test", "verify"], &["testing", "validation"]),
    (&["design", "architect"], &["design", "architecture"]),
    (&["coordinate", "plan"], &["coordination"]),
    (&["requirement"], &["requirements"]),
];

/// Derive assignment requirements from a task and the execution context.
///
/// Complexity keywords in the description win over the task's own hint.
/// Estimated hours above 8 make a task long, 2 or fewer make it short.
pub fn extract_requirements(task: &TaskSpec, context: &Map<String, Value>) -> TaskRequirements {
    let description = task.description.to_lowercase();

    let mut capabilities: Vec<String> = Vec::new();
    for (keywords, implied) in CAPABILITY_KEYWORDS {
        if keywords.iter().any(|k| description.contains(k)) {
            for capability in *implied {
                if !capabilities.iter().any(|c| c == capability) {
                    capabilities.push(capability.to_string());
                }
            }
        }
    }

    let complexity = if description.contains("complex") || description.contains("distributed") {
        Complexity::High
    } else if description.contains("simple") {
        Complexity::Low
    } else {
        task.complexity.unwrap_or(Complexity::Medium)
    };

    let duration = match task.estimated_hours {
        Some(hours) if hours > 8.0 => DurationClass::Long,
        Some(hours) if hours <= 2.0 => DurationClass::Short,
        _ => DurationClass::Medium,
    };

    let phase = task.phase.clone().or_else(|| {
        context
            .get("phase")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    TaskRequirements {
        capabilities,
        complexity,
        priority: task.priority,
        duration,
        phase,
    }
}

/// Keyword table used when scoring finds no viable agent.
pub fn fallback_agent(description: &str) -> &'static str {
    let description = description.to_lowercase();
    if description.contains("implement") {
        "dev-agent"
    } else if description.contains("test") {
        "qa-agent"
    } else if description.contains("design") {
        "architect"
    } else if description.contains("coordinate") {
        "scrum-master"
    } else {
        DEFAULT_AGENT
    }
}

// ---------------------------------------------------------------------------
// AgentAssignment
// ---------------------------------------------------------------------------

/// Scores agents from a directory against task requirements.
pub struct AgentAssignment {
    directory: Arc<dyn AgentDirectory>,
    config: AssignmentConfig,
}

impl AgentAssignment {
    pub fn new(directory: Arc<dyn AgentDirectory>, config: AssignmentConfig) -> Self {
        Self { directory, config }
    }

    pub fn directory(&self) -> &Arc<dyn AgentDirectory> {
        &self.directory
    }

    /// Fraction of required capabilities the agent has (1.0 when none are
    /// required).
    pub fn capability_score(&self, agent_id: &str, requirements: &TaskRequirements) -> f64 {
        if requirements.capabilities.is_empty() {
            return 1.0;
        }
        let available = self.directory.capabilities(agent_id);
        let matched = requirements
            .capabilities
            .iter()
            .filter(|required| available.contains(*required))
            .count();
        matched as f64 / requirements.capabilities.len() as f64
    }

    /// Success ratio of handoffs originating at the agent, 0.5 without
    /// history.
    pub fn performance_score(&self, agent_id: &str, history: &[HandoffRecord]) -> f64 {
        let (total, successful) = history
            .iter()
            .filter(|h| h.from_agent == agent_id)
            .fold((0usize, 0usize), |(total, ok), h| {
                (total + 1, ok + usize::from(h.error.is_none()))
            });
        if total == 0 {
            0.5
        } else {
            successful as f64 / total as f64
        }
    }

    /// Availability over the most recent handoffs.
    pub fn load_score(&self, agent_id: &str, history: &[HandoffRecord]) -> f64 {
        let window = history.len().saturating_sub(self.config.recent_window);
        let recent = history[window..]
            .iter()
            .filter(|h| h.to_agent == agent_id)
            .count();
        let threshold = self.config.load_threshold.max(1) as f64;
        1.0 - (recent as f64 / threshold).min(1.0)
    }

    /// Phase compatibility: exact match or no phase scores 1.0, anything
    /// else 0.5.
    pub fn context_score(&self, agent_id: &str, requirements: &TaskRequirements) -> f64 {
        let Some(phase) = &requirements.phase else {
            return 1.0;
        };
        match self.directory.agent(agent_id) {
            Some(profile) if profile.phases.iter().any(|p| p == phase) => 1.0,
            _ => 0.5,
        }
    }

    pub fn score(
        &self,
        agent_id: &str,
        requirements: &TaskRequirements,
        history: &[HandoffRecord],
    ) -> AgentScore {
        let capability = self.capability_score(agent_id, requirements);
        let performance = self.performance_score(agent_id, history);
        let load = self.load_score(agent_id, history);
        let context = self.context_score(agent_id, requirements);
        let total = self.config.capability_weight * capability
            + self.config.performance_weight * performance
            + self.config.load_weight * load
            + self.config.context_weight * context;
        AgentScore {
            agent_id: agent_id.to_string(),
            total,
            capability,
            performance,
            load,
            context,
        }
    }

    /// Score every agent not in `exclude`, best first. Equal totals keep
    /// registration order.
    pub fn rank(
        &self,
        requirements: &TaskRequirements,
        history: &[HandoffRecord],
        exclude: &[&str],
    ) -> Vec<AgentScore> {
        let mut scores: Vec<AgentScore> = self
            .directory
            .agent_ids()
            .iter()
            .filter(|id| !exclude.contains(&id.as_str()))
            .map(|id| self.score(id, requirements, history))
            .collect();
        scores.sort_by(|a, b| b.total.total_cmp(&a.total));
        scores
    }

    /// Pick the agent for `task`.
    ///
    /// The directory's own hint wins when it names a known agent; otherwise
    /// the best-scoring viable agent, otherwise the keyword table.
    pub fn select_agent(
        &self,
        task: &TaskSpec,
        context: &Map<String, Value>,
        history: &[HandoffRecord],
    ) -> String {
        let requirements = extract_requirements(task, context);

        if let Some(hint) = self.directory.optimal_agent(&requirements) {
            if self.directory.agent(&hint).is_some() {
                tracing::debug!(agent = %hint, "directory supplied agent");
                return hint;
            }
        }

        match self.rank(&requirements, history, &[]).into_iter().next() {
            Some(best) if best.total >= self.config.viability_threshold => {
                tracing::debug!(agent = %best.agent_id, score = best.total, "agent assigned by score");
                best.agent_id
            }
            best => {
                let agent = fallback_agent(&task.description).to_string();
                tracing::debug!(
                    agent = %agent,
                    best_score = ?best.map(|b| b.total),
                    "no viable agent, using keyword fallback"
                );
                agent
            }
        }
    }

    /// Best-scoring agent other than those in `exclude` that `accept`
    /// approves.
    pub fn best_alternative(
        &self,
        requirements: &TaskRequirements,
        history: &[HandoffRecord],
        exclude: &[&str],
        accept: impl Fn(&str) -> bool,
    ) -> Option<String> {
        self.rank(requirements, history, exclude)
            .into_iter()
            .map(|score| score.agent_id)
            .find(|agent| accept(agent))
    }

    /// Agents expected to take over from `agent`, from its profile.
    pub fn compatible_handoffs(&self, agent: &str) -> Vec<String> {
        self.directory
            .agent(agent)
            .map(|p| p.compatible_handoffs)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crewflow_types::agent::AgentProfile;
    use crewflow_types::state::HandoffStatus;
    use crewflow_types::task::Priority;

    fn assignment() -> AgentAssignment {
        AgentAssignment::new(
            Arc::new(StaticAgentDirectory::bmad_default()),
            AssignmentConfig::default(),
        )
    }

    fn handoff(from: &str, to: &str, error: Option<&str>) -> HandoffRecord {
        HandoffRecord {
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            timestamp: Utc::now(),
            sequence_id: 0,
            data: Value::Null,
            status: HandoffStatus::Completed,
            error: error.map(str::to_string),
        }
    }

    fn requirements(capabilities: &[&str], phase: Option<&str>) -> TaskRequirements {
        TaskRequirements {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            phase: phase.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn capability_score_is_fraction_of_requirements() {
        let a = assignment();
        assert_eq!(a.capability_score("dev-agent", &requirements(&["implementation", "coding"], None)), 1.0);
        assert_eq!(
            a.capability_score("dev-agent", &requirements(&["implementation", "design", "testing"], None)),
            2.0 / 3.0
        );
        assert_eq!(a.capability_score("dev-agent", &requirements(&["design", "architecture"], None)), 0.0);
        assert_eq!(a.capability_score("dev-agent", &requirements(&[], None)), 1.0);
    }

    #[test]
    fn performance_and_load_scores() {
        let a = assignment();
        assert_eq!(a.performance_score("dev-agent", &[]), 0.5);
        let history = vec![
            handoff("dev-agent", "qa-agent", None),
            handoff("dev-agent", "architect", Some("Failed")),
        ];
        assert_eq!(a.performance_score("dev-agent", &history), 0.5);

        assert_eq!(a.load_score("dev-agent", &[]), 1.0);
        let mut busy: Vec<_> = (0..5).map(|_| handoff("architect", "dev-agent", None)).collect();
        busy.push(handoff("architect", "qa-agent", None));
        assert_eq!(a.load_score("dev-agent", &busy), 0.0);
        assert!((a.load_score("qa-agent", &busy) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn context_score_by_phase() {
        let a = assignment();
        assert_eq!(a.context_score("dev-agent", &requirements(&[], Some("implementation"))), 1.0);
        assert_eq!(a.context_score("dev-agent", &requirements(&[], None)), 1.0);
        assert_eq!(a.context_score("dev-agent", &requirements(&[], Some("unknown_phase"))), 0.5);
        assert_eq!(a.context_score("dev-agent", &requirements(&[], Some("design"))), 0.5);
    }

    #[test]
    fn weighted_total() {
        let a = assignment();
        let history = vec![handoff("dev-agent", "qa-agent", None)];
        let perfect = a.score(
            "dev-agent",
            &requirements(&["implementation", "coding"], Some("implementation")),
            &history,
        );
        assert!((perfect.total - 1.0).abs() < 1e-9);

        let failing = vec![
            handoff("dev-agent", "qa-agent", Some("Failed")),
            handoff("dev-agent", "architect", Some("Failed")),
        ];
        let poor = a.score(
            "dev-agent",
            &requirements(&["design", "architecture"], Some("unknown_phase")),
            &failing,
        );
        assert!(poor.total < 0.5);
    }

    #[test]
    fn extraction_from_description() {
        let ctx = Map::new();
        let implement = extract_requirements(
            &TaskSpec::new("Implement user authentication feature with proper error handling"),
            &ctx,
        );
        assert!(implement.capabilities.contains(&"implementation".to_string()));
        assert!(implement.capabilities.contains(&"coding".to_string()));
        assert_eq!(implement.complexity, Complexity::Medium);

        let complex = extract_requirements(
            &TaskSpec::new("Design and implement a complex distributed caching system"),
            &ctx,
        );
        assert!(complex.capabilities.contains(&"design".to_string()));
        assert_eq!(complex.complexity, Complexity::High);

        let simple = extract_requirements(&TaskSpec::new("Add a simple logging statement"), &ctx);
        assert_eq!(simple.complexity, Complexity::Low);

        let mut long = TaskSpec::new("Refactor entire codebase");
        long.estimated_hours = Some(16.0);
        long.priority = Some(Priority::High);
        let long = extract_requirements(&long, &ctx);
        assert_eq!(long.duration, DurationClass::Long);
        assert_eq!(long.priority, Some(Priority::High));
    }

    #[test]
    fn phase_falls_back_to_context() {
        let mut ctx = Map::new();
        ctx.insert("phase".into(), Value::String("testing".into()));
        let req = extract_requirements(&TaskSpec::new("anything"), &ctx);
        assert_eq!(req.phase.as_deref(), Some("testing"));
    }

    #[test]
    fn fallback_table() {
        assert_eq!(fallback_agent("Implement new feature for user dashboard"), "dev-agent");
        assert_eq!(fallback_agent("Write unit tests for the dashboard component"), "qa-agent");
        assert_eq!(fallback_agent("Design the architecture for the new microservice"), "architect");
        assert_eq!(fallback_agent("Coordinate the deployment of the new feature"), "scrum-master");
        assert_eq!(fallback_agent("Something else entirely"), DEFAULT_AGENT);
    }

    #[test]
    fn selection_prefers_capable_agents() {
        let a = assignment();
        let ctx = Map::new();
        assert_eq!(a.select_agent(&TaskSpec::new("Implement the login flow"), &ctx, &[]), "dev-agent");
        assert_eq!(a.select_agent(&TaskSpec::new("Design the storage layer"), &ctx, &[]), "architect");
    }

    #[test]
    fn ties_resolve_by_registration_order() {
        let a = assignment();
        let ranked = a.rank(&requirements(&[], None), &[], &[]);
        assert_eq!(ranked[0].agent_id, "scrum-master");
        let ranked = a.rank(&requirements(&[], None), &[], &["scrum-master"]);
        assert_eq!(ranked[0].agent_id, "product-owner");
    }

    #[test]
    fn empty_directory_uses_keyword_fallback() {
        let a = AgentAssignment::new(
            Arc::new(StaticAgentDirectory::default()),
            AssignmentConfig::default(),
        );
        let agent = a.select_agent(&TaskSpec::new("Write tests for parser"), &Map::new(), &[]);
        assert_eq!(agent, "qa-agent");
    }

    struct HintingDirectory(StaticAgentDirectory);

    impl AgentDirectory for HintingDirectory {
        fn agent(&self, id: &str) -> Option<AgentProfile> {
            self.0.agent(id)
        }

        fn agent_ids(&self) -> Vec<String> {
            self.0.agent_ids()
        }

        fn optimal_agent(&self, _requirements: &TaskRequirements) -> Option<String> {
            Some("product-owner".to_string())
        }
    }

    #[test]
    fn directory_hint_wins() {
        let a = AgentAssignment::new(
            Arc::new(HintingDirectory(StaticAgentDirectory::bmad_default())),
            AssignmentConfig::default(),
        );
        let agent = a.select_agent(&TaskSpec::new("Implement things"), &Map::new(), &[]);
        assert_eq!(agent, "product-owner");
    }

    #[test]
    fn alternatives_respect_filter() {
        let a = assignment();
        let req = requirements(&["testing"], None);
        let alt = a.best_alternative(&req, &[], &["dev-agent"], |agent| agent != "qa-agent");
        assert!(alt.is_some());
        assert_ne!(alt.as_deref(), Some("qa-agent"));
        assert_ne!(alt.as_deref(), Some("dev-agent"));
    }
}
