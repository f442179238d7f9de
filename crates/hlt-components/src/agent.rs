//! Module agents.
//!
//! An agent is the registration hook of a component library that does not
//! (or not only) rely on load-time registration. Agents live in a
//! process-wide [`AgentList`]; the handler walks the list and hands itself to
//! every agent, which then registers its components directly.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::Result;
use crate::handler::ComponentHandler;

/// Registration hook of a component library.
pub trait ModuleAgent: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Register this module's components with `handler`.
    ///
    /// Called once before and once after every library load, so
    /// implementations see their own components already registered on the
    /// second call. Returning `Ok` with nothing registered is normal.
    fn activate_component_handler(&self, handler: &mut ComponentHandler) -> Result<()>;
}

/// Shared reference to an agent. Identity is the address of the agent.
pub type AgentRef = Arc<dyn ModuleAgent>;

/// Whether two references point to the same agent.
pub fn same_agent(a: &AgentRef, b: &AgentRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

static GLOBAL_AGENTS: Lazy<Arc<AgentList>> = Lazy::new(|| Arc::new(AgentList::new()));

/// Ordered list of module agents.
#[derive(Default)]
pub struct AgentList {
    agents: RwLock<Vec<AgentRef>>,
}

impl AgentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide agent list.
    pub fn global() -> Arc<AgentList> {
        GLOBAL_AGENTS.clone()
    }

    /// Append an agent. Registering the same agent twice is a no-op.
    pub fn register(&self, agent: AgentRef) -> bool {
        let mut agents = self.agents.write();
        if agents.iter().any(|a| same_agent(a, &agent)) {
            return false;
        }
        tracing::debug!("module agent {} registered", agent.name());
        agents.push(agent);
        true
    }

    /// Remove an agent from the list.
    pub fn unregister(&self, agent: &AgentRef) -> bool {
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|a| !same_agent(a, agent));
        let removed = agents.len() < before;
        if removed {
            tracing::debug!("module agent {} unregistered", agent.name());
        }
        removed
    }

    pub fn first(&self) -> Option<AgentRef> {
        self.agents.read().first().cloned()
    }

    /// The agent following `agent`, or `None` at the end of the list or if
    /// `agent` is not in the list.
    pub fn next_after(&self, agent: &AgentRef) -> Option<AgentRef> {
        let agents = self.agents.read();
        let pos = agents.iter().position(|a| same_agent(a, agent))?;
        agents.get(pos + 1).cloned()
    }

    /// Copy of the list, first to last.
    pub fn snapshot(&self) -> Vec<AgentRef> {
        self.agents.read().clone()
    }

    pub fn contains(&self, agent: &AgentRef) -> bool {
        self.agents.read().iter().any(|a| same_agent(a, agent))
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl fmt::Debug for AgentList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .agents
            .read()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        f.debug_struct("AgentList").field("agents", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedAgent(&'static str);

    impl ModuleAgent for NamedAgent {
        fn name(&self) -> &str {
            self.0
        }

        fn activate_component_handler(&self, _handler: &mut ComponentHandler) -> Result<()> {
            Ok(())
        }
    }

    fn agent(name: &'static str) -> AgentRef {
        Arc::new(NamedAgent(name))
    }

    #[test]
    fn test_first_next_iteration() {
        let list = AgentList::new();
        let its = agent("ITS");
        let tpc = agent("TPC");
        let trd = agent("TRD");
        list.register(its.clone());
        list.register(tpc.clone());
        list.register(trd.clone());

        let mut names = Vec::new();
        let mut current = list.first();
        while let Some(a) = current {
            names.push(a.name().to_string());
            current = list.next_after(&a);
        }
        assert_eq!(names, vec!["ITS", "TPC", "TRD"]);
    }

    #[test]
    fn test_identity_not_name() {
        let list = AgentList::new();
        let a = agent("PHOS");
        let b = agent("PHOS");

        assert!(list.register(a.clone()));
        assert!(!list.register(a.clone()));
        assert!(list.register(b.clone()));
        assert_eq!(list.len(), 2);

        assert!(list.unregister(&a));
        assert!(!list.contains(&a));
        assert!(list.contains(&b));
        assert!(list.next_after(&a).is_none());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let list = AgentList::new();
        list.register(agent("MUON"));
        let snapshot = list.snapshot();
        list.register(agent("EMCAL"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.len(), 2);
    }
}
