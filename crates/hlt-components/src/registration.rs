//! Load-time registration of components.
//!
//! Library code can not hold a reference to the handler that loads it.
//! Instead, for the duration of one load call, the handler opens a
//! [`RegistrationContext`] and the loader backend passes it to the library's
//! registration entry point. Everything the library submits is parked in the
//! handler's [`ScheduleQueue`] and only moved into the registry after the
//! load call returned and the context was released.
//!
//! The context occupies a process-wide slot: a second load can not start
//! while another one is between entering and releasing its context.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::{AgentList, AgentRef, ModuleAgent};
use crate::component::{Component, Prototype};
use crate::error::{Error, Result};

/// Name of the optional registration entry point of a component library.
pub const REGISTRATION_SYMBOL: &str = "hlt_component_registration";

/// Signature of the registration entry point.
pub type RegistrationFn = fn(&mut RegistrationContext<'_>);

static REGISTRATION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Whether a registration context is currently open anywhere in the process.
pub fn registration_active() -> bool {
    REGISTRATION_ACTIVE.load(Ordering::Acquire)
}

/// Deferred registration queue.
///
/// Holds prototypes in submission order until they are flushed into the
/// registry.
#[derive(Debug, Default)]
pub struct ScheduleQueue {
    pending: VecDeque<Prototype>,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, prototype: Prototype) {
        self.pending.push_back(prototype);
    }

    /// Next prototype in submission order.
    pub fn pop(&mut self) -> Option<Prototype> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything still pending.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Drop everything submitted after the first `len` prototypes.
    pub fn truncate(&mut self, len: usize) {
        self.pending.truncate(len);
    }

    /// Ids of the pending prototypes, in submission order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.iter().map(|p| p.id().to_string()).collect()
    }
}

/// Scoped registration target handed to library code during a load.
pub struct RegistrationContext<'a> {
    queue: &'a mut ScheduleQueue,
    agents: &'a AgentList,
    library: &'a str,
    submitted: usize,
    published: Vec<AgentRef>,
}

impl<'a> RegistrationContext<'a> {
    /// Claim the process-wide registration slot.
    ///
    /// Fails with [`Error::InvalidState`] if another context is open. The
    /// slot is released when the context is dropped.
    pub fn enter(
        queue: &'a mut ScheduleQueue,
        agents: &'a AgentList,
        library: &'a str,
    ) -> Result<Self> {
        if REGISTRATION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!(
                "can not load {}: another library load is in progress",
                library
            );
            return Err(Error::InvalidState(format!(
                "registration context already active while loading {}",
                library
            )));
        }
        tracing::debug!("registration context entered for {}", library);
        Ok(Self {
            queue,
            agents,
            library,
            submitted: 0,
            published: Vec::new(),
        })
    }

    /// Library being loaded.
    pub fn library(&self) -> &str {
        self.library
    }

    /// Submit a library-resident prototype. The handler will never destroy it.
    pub fn schedule_register(&mut self, component: &'static dyn Component) {
        self.schedule(Prototype::Static(component));
    }

    /// Submit a prototype whose ownership passes to the handler.
    pub fn schedule_owned(&mut self, component: Box<dyn Component>) {
        self.schedule(Prototype::Owned(component));
    }

    pub fn schedule(&mut self, prototype: Prototype) {
        tracing::debug!(
            "component {} scheduled for registration by {}",
            prototype.id(),
            self.library
        );
        self.queue.push(prototype);
        self.submitted += 1;
    }

    /// Publish a module agent shipped with the library.
    ///
    /// The agent joins the agent list and takes part in the activation that
    /// follows the load.
    pub fn register_agent(&mut self, agent: Arc<dyn ModuleAgent>) {
        tracing::debug!("agent {} published by {}", agent.name(), self.library);
        if self.agents.register(agent.clone()) {
            self.published.push(agent);
        }
    }

    /// Number of prototypes waiting for the flush.
    pub fn scheduled(&self) -> usize {
        self.queue.len()
    }

    /// Whether code of the library was handed out through this context.
    ///
    /// Submitted prototypes and published agents point into the library, so
    /// it must stay mapped while they may be referenced.
    pub fn has_submissions(&self) -> bool {
        self.submitted > 0 || !self.published.is_empty()
    }

    /// Agents published through this context.
    pub fn take_published_agents(&mut self) -> Vec<AgentRef> {
        std::mem::take(&mut self.published)
    }

    /// Remove the agents published through this context from the agent list.
    pub fn retract_agents(&mut self) {
        for agent in self.take_published_agents() {
            self.agents.unregister(&agent);
        }
    }
}

impl Drop for RegistrationContext<'_> {
    fn drop(&mut self) {
        REGISTRATION_ACTIVE.store(false, Ordering::Release);
        tracing::debug!("registration context released for {}", self.library);
    }
}
