//! Agent identity and task requirement types used for dynamic assignment.

use serde::{Deserialize, Serialize};

use crate::task::{Complexity, Priority};

/// An executor identity known to the agent directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    /// Workflow phases this agent is primarily suited for.
    #[serde(default)]
    pub phases: Vec<String>,
    /// Agents this one is expected to hand off to.
    #[serde(default)]
    pub compatible_handoffs: Vec<String>,
}

impl AgentProfile {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Expected duration bucket of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationClass {
    Short,
    #[default]
    Medium,
    Long,
}

/// Requirements extracted from a task specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirements {
    /// Required capabilities, deduplicated in discovery order.
    pub capabilities: Vec<String>,
    pub complexity: Complexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub duration: DurationClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Default for TaskRequirements {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            complexity: Complexity::Medium,
            priority: None,
            duration: DurationClass::Medium,
            phase: None,
        }
    }
}

/// Score breakdown for one candidate agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub agent_id: String,
    pub total: f64,
    pub capability: f64,
    pub performance: f64,
    pub load: f64,
    pub context: f64,
}
