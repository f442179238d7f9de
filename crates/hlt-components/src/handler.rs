//! Component handler.
//!
//! Central authority for component plugins: loads libraries, collects the
//! prototypes they register, creates running instances and unloads the
//! libraries again.
//!
//! A library load runs in these steps:
//!
//! 1. optional agent pre-activation,
//! 2. a [`RegistrationContext`] is entered and the backend opens the library,
//!    whose registration entry point submits prototypes into the queue,
//! 3. the context is released and build info is read,
//! 4. the queue is flushed into the registry,
//! 5. optional agent post-activation.

use std::sync::Arc;

use serde_json::Value;

use crate::agent::{same_agent, AgentList, AgentRef};
use crate::component::{Component, ComponentEnvironment, InitError, Prototype};
use crate::config::HandlerConfig;
use crate::error::{Error, Result};
use crate::loader::{LibraryInfo, LibraryLoader, LibraryTable, LoadOutcome, NativeLoader, RawSymbol, UnloadPolicy};
use crate::registration::{RegistrationContext, ScheduleQueue};
use crate::registry::{ComponentListing, ComponentRegistry};

/// Component handler.
pub struct ComponentHandler {
    environment: ComponentEnvironment,
    registry: ComponentRegistry,
    queue: ScheduleQueue,
    table: LibraryTable,
    agents: Arc<AgentList>,
    activate_on_load: bool,
    configured_libraries: Vec<String>,
}

impl ComponentHandler {
    /// Create a handler using the native loader and the global agent list.
    pub fn new(environment: ComponentEnvironment) -> Self {
        Self::with_loader(environment, Box::new(NativeLoader::new()))
    }

    pub fn with_loader(environment: ComponentEnvironment, loader: Box<dyn LibraryLoader>) -> Self {
        let table = LibraryTable::new(loader);
        tracing::debug!(
            "component handler created (backend {}, unload policy {})",
            table.backend(),
            table.policy()
        );
        Self {
            environment,
            registry: ComponentRegistry::new(),
            queue: ScheduleQueue::new(),
            table,
            agents: AgentList::global(),
            activate_on_load: true,
            configured_libraries: Vec::new(),
        }
    }

    /// Create a handler from a configuration and load its libraries.
    pub fn from_config(config: &HandlerConfig, environment: ComponentEnvironment) -> Result<Self> {
        let mut handler = Self::with_loader(environment, config.backend.create_loader());
        if let Some(policy) = config.unload_policy {
            handler.table.set_policy(policy);
        }
        handler.activate_on_load = config.activate_agents;
        handler.configured_libraries = config.library_paths();
        handler.load_configured_libraries()?;
        Ok(handler)
    }

    /// Use another agent list instead of the global one.
    pub fn with_agent_list(mut self, agents: Arc<AgentList>) -> Self {
        self.agents = agents;
        self
    }

    /// Override the backend's default unload policy.
    pub fn with_unload_policy(mut self, policy: UnloadPolicy) -> Self {
        self.table.set_policy(policy);
        self
    }

    /// Replace the environment passed to every created component.
    pub fn set_environment(&mut self, environment: ComponentEnvironment) {
        self.environment = environment;
    }

    pub fn environment(&self) -> &ComponentEnvironment {
        &self.environment
    }

    pub fn agents(&self) -> &Arc<AgentList> {
        &self.agents
    }

    pub fn unload_policy(&self) -> UnloadPolicy {
        self.table.policy()
    }

    pub fn backend(&self) -> &'static str {
        self.table.backend()
    }

    /// Log the crate name and version. Returns the announced line.
    pub fn announce_version(&self) -> String {
        let line = format!("{} {} ({} loader)", crate::NAME, crate::VERSION, self.backend());
        tracing::info!("{}", line);
        line
    }

    /// Register a prototype and take ownership of it.
    ///
    /// A prototype rejected as duplicate is dropped right away.
    pub fn add_component(&mut self, component: Box<dyn Component>) -> Result<()> {
        self.registry.register(Prototype::Owned(component))
    }

    /// Register a prototype the handler will never destroy.
    pub fn register_component(&mut self, component: &'static dyn Component) -> Result<()> {
        self.registry.register(Prototype::Static(component))
    }

    /// Does not remove anything, see [`ComponentRegistry::deregister`].
    pub fn deregister_component(&mut self, id: &str) -> Result<()> {
        self.registry.deregister(id)
    }

    /// Queue a prototype for the next [`register_scheduled_components`].
    ///
    /// [`register_scheduled_components`]: Self::register_scheduled_components
    pub fn schedule_register(&mut self, prototype: impl Into<Prototype>) {
        let prototype = prototype.into();
        tracing::debug!("component {} scheduled for registration", prototype.id());
        self.queue.push(prototype);
    }

    pub fn scheduled_count(&self) -> usize {
        self.queue.len()
    }

    /// Move all queued prototypes into the registry in submission order.
    ///
    /// Every prototype is tried; the first error is returned and the queue
    /// is empty afterwards.
    pub fn register_scheduled_components(&mut self) -> Result<()> {
        let mut result = Ok(());
        while let Some(prototype) = self.queue.pop() {
            if let Err(e) = self.registry.register(prototype) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Spawn and initialize an instance of a registered component.
    pub fn create_component(&self, id: &str, env_param: &Value, args: &[String]) -> Result<Box<dyn Component>> {
        if id.is_empty() {
            return Err(Error::invalid_argument("component id must not be empty"));
        }

        let prototype = self.registry.find(id).ok_or_else(|| {
            tracing::warn!("can not find component \"{}\"", id);
            Error::not_found(format!("component {}", id))
        })?;

        let mut component = prototype.spawn().ok_or_else(|| {
            tracing::error!("can not spawn component \"{}\"", id);
            Error::SpawnFailure(id.to_string())
        })?;
        tracing::debug!("component \"{}\" created", id);

        if let Err(InitError(code)) = component.init(&self.environment, env_param, args) {
            tracing::error!("initialization of component \"{}\" failed with error {}", id, code);
            return Err(Error::InitFailure {
                id: id.to_string(),
                code,
            });
        }
        Ok(component)
    }

    pub fn find_component(&self, id: &str) -> Option<&dyn Component> {
        self.registry.find(id)
    }

    pub fn find_component_index(&self, id: &str) -> Result<usize> {
        self.registry.find_index(id)
    }

    /// Log and return all registered components.
    pub fn list_components(&self) -> Vec<ComponentListing> {
        let listing = self.registry.list();
        for entry in &listing {
            tracing::info!("{}. {}", entry.index, entry.id);
        }
        listing
    }

    pub fn has_output_data(&self, id: &str) -> Result<bool> {
        self.registry.has_output_data(id)
    }

    pub fn component_count(&self) -> usize {
        self.registry.len()
    }

    pub fn owned_component_count(&self) -> usize {
        self.registry.owned_count()
    }

    /// Load a component library and register its components.
    ///
    /// With `activate_agents` the agent loop runs before and after the load.
    /// A failed load discards whatever the library submitted and skips the
    /// flush and the post-activation.
    pub fn load_library(&mut self, path: &str, activate_agents: bool) -> Result<()> {
        if path.is_empty() {
            return Err(Error::invalid_argument("library path must not be empty"));
        }

        if activate_agents {
            if let Err(e) = self.activate_agents(&[]) {
                tracing::warn!("agent activation before loading {} failed: {}", path, e);
            }
        }

        let pending = self.queue.len();
        let loaded = {
            let mut ctx = RegistrationContext::enter(&mut self.queue, &self.agents, path)?;
            self.table.load(path, &mut ctx)
        };

        match loaded {
            Ok(LoadOutcome::Loaded) => {}
            Ok(LoadOutcome::AlreadyLoaded { ref_count }) => {
                tracing::debug!("library {} already loaded, {} reference(s)", path, ref_count);
            }
            Err(e) => {
                let discarded = self.queue.len().saturating_sub(pending);
                if discarded > 0 {
                    tracing::warn!(
                        "{} component(s) submitted by failed load of {} discarded",
                        discarded,
                        path
                    );
                }
                self.queue.truncate(pending);
                return Err(e);
            }
        }

        let result = self.register_scheduled_components();
        if activate_agents && result.is_ok() {
            self.activate_agents(&[])?;
        }
        result
    }

    /// Release one reference to a library.
    ///
    /// Registered components are kept. Agents the library published leave
    /// the agent list once its last reference is gone.
    pub fn unload_library(&mut self, path: &str) -> Result<()> {
        self.table.unload(path, &self.agents)
    }

    /// Release all libraries. Registered components are kept.
    pub fn unload_libraries(&mut self) -> Result<()> {
        self.table.unload_all(&self.agents)
    }

    pub fn find_symbol(&self, path: &str, name: &str) -> Option<RawSymbol> {
        self.table.find_symbol(path, name)
    }

    pub fn loaded_libraries(&self) -> Vec<LibraryInfo> {
        self.table.list()
    }

    pub fn library_info(&self, path: &str) -> Option<LibraryInfo> {
        self.table.get(path)
    }

    /// Load the libraries named by the configuration, in order.
    ///
    /// Stops at the first library that fails to load. Components a library
    /// registers twice are reported but do not stop the sequence.
    pub fn load_configured_libraries(&mut self) -> Result<()> {
        let libraries = self.configured_libraries.clone();
        for path in &libraries {
            match self.load_library(path, self.activate_on_load) {
                Ok(()) => {}
                Err(Error::AlreadyExists(id)) => {
                    tracing::debug!("{}: component {} already registered", path, id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Run the agent activation loop.
    ///
    /// Agents in `exclude` are skipped. A callback reporting an already
    /// registered component does not stop the loop; any other error does.
    pub fn activate_agents(&mut self, exclude: &[AgentRef]) -> Result<()> {
        for agent in self.agents.snapshot() {
            if exclude.iter().any(|excluded| same_agent(excluded, &agent)) {
                tracing::debug!("agent {} excluded from activation", agent.name());
                continue;
            }

            match agent.activate_component_handler(self) {
                Ok(()) => {}
                Err(Error::AlreadyExists(id)) => {
                    tracing::debug!("agent {}: component {} already registered", agent.name(), id);
                }
                Err(e) => {
                    tracing::warn!("activation of agent {} failed: {}", agent.name(), e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl Drop for ComponentHandler {
    fn drop(&mut self) {
        // Owned prototypes may live in library code; destroy them first.
        let destroyed = self.registry.release_owned();
        self.queue.clear();
        self.registry.clear();
        if let Err(e) = self.table.unload_all(&self.agents) {
            tracing::error!("unloading libraries at teardown failed: {}", e);
        }
        tracing::debug!(
            "component handler released, {} owned component(s) destroyed",
            destroyed
        );
    }
}
