//! Goal decomposition table.

use serde::Serialize;
use serde_json::Value;

use crate::agents::AgentId;
use crate::task::TaskType;

/// A caller-level request handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeGoal {
    pub agent_id: AgentId,
    pub description: String,
    pub task_type: TaskType,
    pub requirements: Value,
    pub constraints: Value,
}

/// One ordered step of a composite goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subtask {
    pub index: usize,
    pub description: String,
    pub task_type: TaskType,
    pub requirements: Value,
    pub constraints: Value,
    /// Top-level keys the result is asked to contain; empty for identity subtasks.
    pub output_keys: Vec<String>,
}

/// Artifact keys merged by synthesis for an architecture design.
pub const ARCHITECTURE_KEYS: [&str; 4] = ["components", "interfaces", "data_flows", "patterns"];

const ARCHITECTURE_STEPS: [(TaskType, &str, &[&str]); 4] = [
    (
        TaskType::PatternSelection,
        "Select appropriate architecture patterns",
        &["patterns"],
    ),
    (
        TaskType::ComponentIdentification,
        "Identify key system components",
        &["components"],
    ),
    (
        TaskType::InterfaceDesign,
        "Design component interfaces",
        &["interfaces"],
    ),
    (
        TaskType::DataFlowMapping,
        "Map data flows between components",
        &["data_flows"],
    ),
];

/// Expand a goal into its ordered subtasks.
///
/// # Postconditions
/// - `architecture_design` yields the four design steps in table order
/// - any other type yields exactly one subtask mirroring the goal
pub fn decompose(goal: &CompositeGoal) -> Vec<Subtask> {
    match goal.task_type {
        TaskType::ArchitectureDesign => ARCHITECTURE_STEPS
            .iter()
            .enumerate()
            .map(|(index, (task_type, description, keys))| Subtask {
                index,
                description: description.to_string(),
                task_type: task_type.clone(),
                requirements: goal.requirements.clone(),
                constraints: goal.constraints.clone(),
                output_keys: keys.iter().map(|k| k.to_string()).collect(),
            })
            .collect(),
        _ => vec![Subtask {
            index: 0,
            description: goal.description.clone(),
            task_type: goal.task_type.clone(),
            requirements: goal.requirements.clone(),
            constraints: goal.constraints.clone(),
            output_keys: Vec::new(),
        }],
    }
}

/// Keys seeded into the synthesized artifact for `task_type`.
pub fn artifact_keys(task_type: &TaskType) -> &'static [&'static str] {
    match task_type {
        TaskType::ArchitectureDesign => &ARCHITECTURE_KEYS,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn goal(task_type: TaskType) -> CompositeGoal {
        CompositeGoal {
            agent_id: AgentId::new("SAA"),
            description: "Design the platform".into(),
            task_type,
            requirements: json!({"latency": "low"}),
            constraints: json!({"budget": "small"}),
        }
    }

    #[test]
    fn test_architecture_design_table() {
        let subtasks = decompose(&goal(TaskType::ArchitectureDesign));
        let types: Vec<_> = subtasks.iter().map(|s| s.task_type.as_str().to_string()).collect();
        assert_eq!(
            types,
            ["pattern_selection", "component_identification", "interface_design", "data_flow_mapping"]
        );
        assert!(subtasks.iter().all(|s| s.requirements == json!({"latency": "low"})));
        assert_eq!(subtasks[3].index, 3);
    }

    #[test]
    fn test_unknown_type_is_identity() {
        let g = goal(TaskType::parse("write_runbook"));
        let subtasks = decompose(&g);
        assert_eq!(subtasks.len(), 1);
        let only = &subtasks[0];
        assert_eq!(only.description, g.description);
        assert_eq!(only.task_type, g.task_type);
        assert_eq!(only.requirements, g.requirements);
        assert_eq!(only.constraints, g.constraints);
        assert!(only.output_keys.is_empty());
    }
}
