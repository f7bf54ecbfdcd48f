//! Agent registry: factories, live instances and capability routing.

use std::collections::HashMap;
use std::sync::Arc;

use super::analyst::AnalysisAgent;
use super::architect::CompositeDesignAgent;
use super::types::{AgentId, AgentNotRegisteredError, AgentRecord, AgentStatus, Capability};
use super::Agent;
use crate::task::TaskId;

/// Builds a fresh agent instance.
pub type AgentFactory = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

struct Registration {
    agent_id: AgentId,
    capabilities: Vec<Capability>,
    factory: AgentFactory,
}

/// Tracks which agents exist, which are live, and what each is doing.
///
/// # Invariants
/// - Registration order is preserved and drives capability lookup
/// - Every live instance has an [`AgentRecord`]; records outlive shutdown
#[derive(Default)]
pub struct AgentRegistry {
    registrations: Vec<Registration>,
    active: HashMap<AgentId, Arc<dyn Agent>>,
    records: HashMap<AgentId, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in role roster.
    pub fn with_default_roster() -> Self {
        let mut registry = Self::new();
        for (code, description, capabilities) in ROSTER {
            let caps: Vec<Capability> = capabilities.iter().map(|c| Capability::new(*c)).collect();
            let factory_caps = caps.clone();
            let factory: AgentFactory = if code == CompositeDesignAgent::CODE {
                Arc::new(move || {
                    Arc::new(CompositeDesignAgent::with_capabilities(factory_caps.clone())) as Arc<dyn Agent>
                })
            } else {
                Arc::new(move || {
                    Arc::new(AnalysisAgent::new(AgentId::new(code), description, factory_caps.clone()))
                        as Arc<dyn Agent>
                })
            };
            registry.register(AgentId::new(code), caps, factory);
        }
        registry
    }

    /// Register an agent class. Re-registering replaces the factory and capabilities.
    pub fn register(&mut self, agent_id: AgentId, capabilities: Vec<Capability>, factory: AgentFactory) {
        let names: Vec<&str> = capabilities.iter().map(|c| c.as_str()).collect();
        tracing::info!(agent_id = %agent_id, capabilities = %names.join(", "), "Registered agent class");
        match self.registrations.iter_mut().find(|r| r.agent_id == agent_id) {
            Some(existing) => {
                tracing::warn!(agent_id = %agent_id, "Agent class already registered, overwriting");
                existing.capabilities = capabilities;
                existing.factory = factory;
            }
            None => self.registrations.push(Registration {
                agent_id,
                capabilities,
                factory,
            }),
        }
    }

    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.registrations.iter().any(|r| &r.agent_id == agent_id)
    }

    /// Registered agent ids in registration order.
    pub fn registered(&self) -> Vec<AgentId> {
        self.registrations.iter().map(|r| r.agent_id.clone()).collect()
    }

    /// Return the live instance, creating it if needed.
    ///
    /// # Errors
    /// Returns `AgentNotRegisteredError` if no class is registered under `agent_id`.
    pub fn create_agent(&mut self, agent_id: &AgentId) -> Result<Arc<dyn Agent>, AgentNotRegisteredError> {
        if let Some(agent) = self.active.get(agent_id) {
            tracing::debug!(agent_id = %agent_id, "Agent already active, returning existing instance");
            return Ok(Arc::clone(agent));
        }
        let registration = self
            .registrations
            .iter()
            .find(|r| &r.agent_id == agent_id)
            .ok_or_else(|| AgentNotRegisteredError {
                agent_id: agent_id.clone(),
            })?;

        let agent = (registration.factory)();
        let record = AgentRecord::new(agent_id.clone(), registration.capabilities.iter().cloned());
        self.active.insert(agent_id.clone(), Arc::clone(&agent));
        self.records.insert(agent_id.clone(), record);
        tracing::info!(agent_id = %agent_id, "Created agent instance");
        Ok(agent)
    }

    /// Live instance, if any.
    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<dyn Agent>> {
        self.active.get(agent_id).cloned()
    }

    /// First live agent with `capability`, else a new instance of the first registered match.
    pub fn find_by_capability(&mut self, capability: &Capability) -> Option<Arc<dyn Agent>> {
        let matching: Vec<AgentId> = self
            .registrations
            .iter()
            .filter(|r| r.capabilities.contains(capability))
            .map(|r| r.agent_id.clone())
            .collect();
        if matching.is_empty() {
            tracing::warn!(capability = %capability, "No agent found with capability");
            return None;
        }
        if let Some(live) = matching.iter().find_map(|id| self.active.get(id)) {
            return Some(Arc::clone(live));
        }
        self.create_agent(&matching[0]).ok()
    }

    /// Add `task_id` to the agent's outstanding work.
    pub fn assign(&mut self, agent_id: &AgentId, task_id: TaskId) -> Result<(), AgentNotRegisteredError> {
        self.create_agent(agent_id)?;
        if let Some(record) = self.records.get_mut(agent_id) {
            record.assign(task_id);
        }
        Ok(())
    }

    /// Settle `task_id`. The agent returns to idle once it has no
    /// outstanding tasks, unless it was shut down.
    pub fn release(&mut self, agent_id: &AgentId, task_id: &TaskId) {
        if let Some(record) = self.records.get_mut(agent_id) {
            record.release(task_id);
        }
    }

    /// Drop the live instance and mark its record inactive.
    ///
    /// Returns `false` if the agent was not active.
    pub fn shutdown_agent(&mut self, agent_id: &AgentId) -> bool {
        if self.active.remove(agent_id).is_none() {
            tracing::warn!(agent_id = %agent_id, "Agent not active, cannot shut down");
            return false;
        }
        if let Some(record) = self.records.get_mut(agent_id) {
            record.deactivate();
        }
        tracing::info!(agent_id = %agent_id, "Shut down agent");
        true
    }

    pub fn shutdown_all(&mut self) {
        let ids: Vec<AgentId> = self.active.keys().cloned().collect();
        for id in ids {
            self.shutdown_agent(&id);
        }
        tracing::info!("Shut down all active agents");
    }

    pub fn record(&self, agent_id: &AgentId) -> Option<&AgentRecord> {
        self.records.get(agent_id)
    }

    /// Records of every agent ever created, in registration order.
    pub fn records(&self) -> Vec<AgentRecord> {
        self.registrations
            .iter()
            .filter_map(|r| self.records.get(&r.agent_id).cloned())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == AgentStatus::Assigned)
            .count()
    }
}

/// Built-in roles: (code, description, capabilities).
const ROSTER: [(&str, &str, &[&str]); 9] = [
    (
        "OA",
        "Orchestrator Agent",
        &["orchestration", "task_delegation", "workflow_management"],
    ),
    (
        "DDA",
        "Document Discovery Agent",
        &["document_discovery", "document_processing", "content_extraction"],
    ),
    (
        "KAA",
        "Knowledge Analysis Agent",
        &["rule_analysis", "knowledge_extraction", "constraint_identification"],
    ),
    (
        "RAA",
        "Requirements Analysis Agent",
        &["requirements_analysis", "requirements_extraction", "domain_modeling"],
    ),
    (
        "TAA",
        "Technology Analysis Agent",
        &["technology_analysis", "technology_evaluation", "tool_selection"],
    ),
    (
        "OAA",
        "Optimization Analysis Agent",
        &["performance_optimization", "scalability_planning", "cost_optimization"],
    ),
    (
        "SAA",
        "System Architect Agent",
        &["architecture_design", "dependency_analysis", "system_design"],
    ),
    (
        "AEA",
        "API Engineering Agent",
        &["api_design", "contract_specification", "integration_design"],
    ),
    (
        "MTA",
        "Module Design Agent",
        &["module_design", "interface_specification", "module_decomposition"],
    ),
];
