//! Closed set of task-type tags.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What a task asks for.
///
/// Serialized as its snake_case tag. Unrecognized tags become [`TaskType::Custom`]
/// so decomposition can pass them through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskType {
    ProcessDocuments,
    AnalyzeRules,
    AnalyzeRequirements,
    AnalyzeTechnology,
    AnalyzeOptimization,
    ArchitectureDesign,
    CreateArchitectureDocument,
    CreateCompleteAdd,
    DesignApiContracts,
    DesignModules,
    PatternSelection,
    ComponentIdentification,
    InterfaceDesign,
    DataFlowMapping,
    Custom(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::ProcessDocuments => "process_documents",
            TaskType::AnalyzeRules => "analyze_rules",
            TaskType::AnalyzeRequirements => "analyze_requirements",
            TaskType::AnalyzeTechnology => "analyze_technology",
            TaskType::AnalyzeOptimization => "analyze_optimization",
            TaskType::ArchitectureDesign => "architecture_design",
            TaskType::CreateArchitectureDocument => "create_architecture_document",
            TaskType::CreateCompleteAdd => "create_complete_add",
            TaskType::DesignApiContracts => "design_api_contracts",
            TaskType::DesignModules => "design_modules",
            TaskType::PatternSelection => "pattern_selection",
            TaskType::ComponentIdentification => "component_identification",
            TaskType::InterfaceDesign => "interface_design",
            TaskType::DataFlowMapping => "data_flow_mapping",
            TaskType::Custom(tag) => tag,
        }
    }

    /// Parse a tag; never fails.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "process_documents" => TaskType::ProcessDocuments,
            "analyze_rules" => TaskType::AnalyzeRules,
            "analyze_requirements" => TaskType::AnalyzeRequirements,
            "analyze_technology" => TaskType::AnalyzeTechnology,
            "analyze_optimization" => TaskType::AnalyzeOptimization,
            "architecture_design" => TaskType::ArchitectureDesign,
            "create_architecture_document" => TaskType::CreateArchitectureDocument,
            "create_complete_add" => TaskType::CreateCompleteAdd,
            "design_api_contracts" => TaskType::DesignApiContracts,
            "design_modules" => TaskType::DesignModules,
            "pattern_selection" => TaskType::PatternSelection,
            "component_identification" => TaskType::ComponentIdentification,
            "interface_design" => TaskType::InterfaceDesign,
            "data_flow_mapping" => TaskType::DataFlowMapping,
            other => TaskType::Custom(other.to_string()),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, TaskType::Custom(_))
    }
}

impl From<&str> for TaskType {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for TaskType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}
