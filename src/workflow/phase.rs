//! Workflow phases and the tasks each one spawns.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::task::TaskType;

/// Phases of a design workflow, in their usual order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    DocumentDiscovery,
    RuleAnalysis,
    RequirementsAnalysis,
    TechnologyAnalysis,
    OptimizationAnalysis,
    ArchitectureDesign,
    ApiModuleDesign,
    Finalization,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::DocumentDiscovery,
        Phase::RuleAnalysis,
        Phase::RequirementsAnalysis,
        Phase::TechnologyAnalysis,
        Phase::OptimizationAnalysis,
        Phase::ArchitectureDesign,
        Phase::ApiModuleDesign,
        Phase::Finalization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::DocumentDiscovery => "document_discovery",
            Phase::RuleAnalysis => "rule_analysis",
            Phase::RequirementsAnalysis => "requirements_analysis",
            Phase::TechnologyAnalysis => "technology_analysis",
            Phase::OptimizationAnalysis => "optimization_analysis",
            Phase::ArchitectureDesign => "architecture_design",
            Phase::ApiModuleDesign => "api_module_design",
            Phase::Finalization => "finalization",
        }
    }

    /// The phase after this one, if any.
    pub fn next(&self) -> Option<Phase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Tasks spawned on entering this phase.
    pub fn handlers(&self) -> Vec<PhaseTask> {
        match self {
            Phase::DocumentDiscovery => vec![PhaseTask::new(
                "DDA",
                "Discover and process input documents",
                TaskType::ProcessDocuments,
            )],
            Phase::RuleAnalysis => vec![PhaseTask::new(
                "KAA",
                "Analyze rules from project documents",
                TaskType::AnalyzeRules,
            )],
            Phase::RequirementsAnalysis => vec![PhaseTask::new(
                "RAA",
                "Analyze requirements from project documents",
                TaskType::AnalyzeRequirements,
            )],
            Phase::TechnologyAnalysis => vec![PhaseTask::new(
                "TAA",
                "Analyze technology choices and constraints",
                TaskType::AnalyzeTechnology,
            )],
            Phase::OptimizationAnalysis => vec![PhaseTask::new(
                "OAA",
                "Identify performance, scalability and cost optimizations",
                TaskType::AnalyzeOptimization,
            )],
            Phase::ArchitectureDesign => vec![PhaseTask::new(
                "SAA",
                "Create initial architecture design documents",
                TaskType::CreateArchitectureDocument,
            )
            .with_input("document_type", "SMAP")],
            Phase::ApiModuleDesign => vec![
                PhaseTask::new("AEA", "Design API contracts", TaskType::DesignApiContracts),
                PhaseTask::new("MTA", "Design module specifications", TaskType::DesignModules),
            ],
            Phase::Finalization => vec![PhaseTask::new(
                "SAA",
                "Create complete Architecture Design Document",
                TaskType::CreateCompleteAdd,
            )],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown phase: {0}")]
pub struct UnknownPhase(pub String);

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownPhase(s.to_string()))
    }
}

/// One task a phase hands to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTask {
    pub agent_id: AgentId,
    pub description: &'static str,
    pub task_type: TaskType,
    /// Extra input fields merged into the task payload
    pub extra_input: Vec<(&'static str, &'static str)>,
}

impl PhaseTask {
    fn new(agent: &str, description: &'static str, task_type: TaskType) -> Self {
        Self {
            agent_id: AgentId::new(agent),
            description,
            task_type,
            extra_input: Vec::new(),
        }
    }

    fn with_input(mut self, key: &'static str, value: &'static str) -> Self {
        self.extra_input.push((key, value));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_every_phase() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("deployment".parse::<Phase>(), Err(UnknownPhase("deployment".into())));
    }

    #[test]
    fn test_handler_table() {
        let design = Phase::ArchitectureDesign.handlers();
        assert_eq!(design.len(), 1);
        assert_eq!(design[0].agent_id, AgentId::new("SAA"));
        assert_eq!(design[0].extra_input, vec![("document_type", "SMAP")]);

        let api: Vec<_> = Phase::ApiModuleDesign
            .handlers()
            .into_iter()
            .map(|t| t.agent_id.to_string())
            .collect();
        assert_eq!(api, ["AEA", "MTA"]);
        assert_eq!(Phase::Finalization.handlers()[0].task_type, TaskType::CreateCompleteAdd);
    }

    #[test]
    fn test_next_phase() {
        assert_eq!(Phase::DocumentDiscovery.next(), Some(Phase::RuleAnalysis));
        assert_eq!(Phase::Finalization.next(), None);
    }
}
