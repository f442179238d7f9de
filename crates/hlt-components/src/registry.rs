//! Component registry.
//!
//! Ordered mapping from component id to prototype. Iteration order is the
//! registration order; it defines the indices reported by
//! [`ComponentRegistry::find_index`] and [`ComponentRegistry::list`].

use serde::Serialize;

use crate::component::{Component, ComponentType, Prototype};
use crate::error::{Error, Result};

/// One line of a registry listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentListing {
    pub index: usize,
    pub id: String,
    pub component_type: ComponentType,
    pub owned: bool,
}

/// Registry of component prototypes.
#[derive(Default)]
pub struct ComponentRegistry {
    prototypes: Vec<Prototype>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prototype.
    ///
    /// Fails with [`Error::AlreadyExists`] if the id is taken; the rejected
    /// prototype is dropped in that case, which destroys it only if it was
    /// handed over as [`Prototype::Owned`].
    pub fn register(&mut self, prototype: Prototype) -> Result<()> {
        let id = prototype.id();
        if id.is_empty() {
            return Err(Error::invalid_argument("component id must not be empty"));
        }

        if self.find(id).is_some() {
            tracing::debug!("component {} already registered, skipped", id);
            return Err(Error::AlreadyExists(id.to_string()));
        }

        tracing::info!("component {} registered", id);
        self.prototypes.push(prototype);
        Ok(())
    }

    /// Deregister a component.
    ///
    /// Not implemented: the entry stays registered. Only the argument is
    /// checked and a warning is emitted.
    pub fn deregister(&mut self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_argument("component id must not be empty"));
        }
        tracing::warn!(
            "deregistration of component {} not yet implemented, entry is kept",
            id
        );
        Ok(())
    }

    /// Find a prototype by id (exact, case-sensitive match).
    pub fn find(&self, id: &str) -> Option<&dyn Component> {
        self.prototypes
            .iter()
            .find(|p| p.id() == id)
            .map(|p| p.component())
    }

    /// Position of a prototype in registration order.
    pub fn find_index(&self, id: &str) -> Result<usize> {
        if id.is_empty() {
            return Err(Error::invalid_argument("component id must not be empty"));
        }
        self.prototypes
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| Error::not_found(format!("component {}", id)))
    }

    /// Prototype at a given position.
    pub fn get(&self, index: usize) -> Option<&dyn Component> {
        self.prototypes.get(index).map(|p| p.component())
    }

    /// Snapshot of the registry in registration order.
    pub fn list(&self) -> Vec<ComponentListing> {
        self.prototypes
            .iter()
            .enumerate()
            .map(|(index, p)| ComponentListing {
                index,
                id: p.id().to_string(),
                component_type: p.component().component_type(),
                owned: p.is_owned(),
            })
            .collect()
    }

    /// Whether the component produces output data (source or processor).
    pub fn has_output_data(&self, id: &str) -> Result<bool> {
        self.find(id)
            .map(|c| c.component_type().has_output_data())
            .ok_or_else(|| Error::not_found(format!("component {}", id)))
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Number of prototypes the registry is responsible for destroying.
    pub fn owned_count(&self) -> usize {
        self.prototypes.iter().filter(|p| p.is_owned()).count()
    }

    /// Destroy all owned prototypes and drop them from the registry.
    ///
    /// Static prototypes are kept. Returns the number of destroyed prototypes.
    pub fn release_owned(&mut self) -> usize {
        let before = self.prototypes.len();
        self.prototypes.retain(|p| !p.is_owned());
        before - self.prototypes.len()
    }

    /// Forget all remaining entries without destroying static prototypes.
    pub(crate) fn clear(&mut self) {
        self.release_owned();
        self.prototypes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentEnvironment, InitError};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct TestComponent {
        id: &'static str,
        kind: ComponentType,
        drops: Option<Arc<AtomicUsize>>,
    }

    impl TestComponent {
        const fn new(id: &'static str, kind: ComponentType) -> Self {
            Self {
                id,
                kind,
                drops: None,
            }
        }
    }

    impl Drop for TestComponent {
        fn drop(&mut self) {
            if let Some(drops) = &self.drops {
                drops.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl Component for TestComponent {
        fn component_id(&self) -> &str {
            self.id
        }

        fn component_type(&self) -> ComponentType {
            self.kind
        }

        fn spawn(&self) -> Option<Box<dyn Component>> {
            Some(Box::new(TestComponent::new(self.id, self.kind)))
        }

        fn init(&mut self, _: &ComponentEnvironment, _: &Value, _: &[String]) -> std::result::Result<(), InitError> {
            Ok(())
        }
    }

    static SOURCE: TestComponent = TestComponent::new("Publisher", ComponentType::Source);
    static SINK: TestComponent = TestComponent::new("FileWriter", ComponentType::Sink);
    static SINK_DUP: TestComponent = TestComponent::new("FileWriter", ComponentType::Processor);

    fn stat(c: &'static TestComponent) -> Prototype {
        Prototype::Static(c)
    }

    #[test]
    fn test_register_and_find() {
        let mut registry = ComponentRegistry::new();
        registry.register(stat(&SOURCE)).unwrap();

        let found = registry.find("Publisher").unwrap();
        assert!(std::ptr::addr_eq(found, &SOURCE as &dyn Component));
        assert!(registry.find("publisher").is_none());
        assert!(registry.find("Unknown").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ComponentRegistry::new();
        registry.register(stat(&SINK)).unwrap();

        let result = registry.register(stat(&SINK_DUP));
        assert_eq!(result, Err(Error::AlreadyExists("FileWriter".into())));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find("FileWriter").unwrap().component_type(),
            ComponentType::Sink
        );
    }

    #[test]
    fn test_empty_id_rejected() {
        static EMPTY: TestComponent = TestComponent::new("", ComponentType::Unknown);
        let mut registry = ComponentRegistry::new();
        assert!(matches!(
            registry.register(stat(&EMPTY)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.find_index(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_index_and_listing_follow_registration_order() {
        let mut registry = ComponentRegistry::new();
        registry.register(stat(&SINK)).unwrap();
        registry.register(stat(&SOURCE)).unwrap();

        assert_eq!(registry.find_index("FileWriter"), Ok(0));
        assert_eq!(registry.find_index("Publisher"), Ok(1));
        assert!(matches!(
            registry.find_index("Missing"),
            Err(Error::NotFound(_))
        ));

        let listing = registry.list();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].id, "FileWriter");
        assert_eq!(listing[1].index, 1);
        assert_eq!(listing[1].component_type, ComponentType::Source);
        assert!(!listing[1].owned);

        // Snapshot is restartable.
        assert_eq!(registry.list(), listing);
        assert_eq!(registry.get(1).unwrap().component_id(), "Publisher");
    }

    #[test]
    fn test_has_output_data() {
        let mut registry = ComponentRegistry::new();
        registry.register(stat(&SOURCE)).unwrap();
        registry.register(stat(&SINK)).unwrap();

        assert_eq!(registry.has_output_data("Publisher"), Ok(true));
        assert_eq!(registry.has_output_data("FileWriter"), Ok(false));
        assert!(matches!(
            registry.has_output_data("Missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_deregister_is_a_documented_no_op() {
        let mut registry = ComponentRegistry::new();
        registry.register(stat(&SOURCE)).unwrap();

        assert!(registry.deregister("Publisher").is_ok());
        assert!(registry.contains("Publisher"));
        assert!(matches!(
            registry.deregister(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_release_owned_keeps_static() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut registry = ComponentRegistry::new();
        registry.register(stat(&SOURCE)).unwrap();
        registry
            .register(Prototype::Owned(Box::new(TestComponent {
                id: "Owned",
                kind: ComponentType::Processor,
                drops: Some(drops.clone()),
            })))
            .unwrap();

        assert_eq!(registry.owned_count(), 1);
        assert_eq!(registry.release_owned(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(registry.contains("Publisher"));
        assert!(!registry.contains("Owned"));
        assert_eq!(registry.release_owned(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
