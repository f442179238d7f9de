//! The processing component contract.
//!
//! A component registered with the handler is a *prototype*: it is never run
//! directly. The handler asks it to [`spawn`](Component::spawn) a fresh
//! instance and then [`init`](Component::init)ializes that instance with the
//! runtime environment, a process-specific parameter and the command
//! arguments.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability classifier of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    /// Produces data without consuming any.
    Source,
    /// Consumes and produces data.
    Processor,
    /// Consumes data only.
    Sink,
    #[default]
    Unknown,
}

impl ComponentType {
    /// Whether components of this type produce output data blocks.
    pub fn has_output_data(&self) -> bool {
        matches!(self, ComponentType::Source | ComponentType::Processor)
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentType::Source => "source",
            ComponentType::Processor => "processor",
            ComponentType::Sink => "sink",
            ComponentType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error code reported by a component that rejected its init parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("component init failed with code {0}")]
pub struct InitError(pub i32);

/// Runtime environment handed to every spawned component.
///
/// The handler copies the descriptor by value and never interprets it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ComponentEnvironment {
    /// Free-form settings of the hosting process.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Host-specific context object, shared with every instance.
    #[serde(skip)]
    pub context: Option<Arc<dyn Any + Send + Sync>>,
}

impl ComponentEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_context(mut self, context: Arc<dyn Any + Send + Sync>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Downcast the host context to a concrete type.
    pub fn context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|c| c.downcast_ref::<T>())
    }
}

impl fmt::Debug for ComponentEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentEnvironment")
            .field("properties", &self.properties)
            .field("context", &self.context.is_some())
            .finish()
    }
}

/// A processing component.
///
/// Implementations are registered as prototypes and used as factories.
/// Prototypes must be shareable because a statically registered prototype
/// lives for the whole lifetime of the library that defines it.
pub trait Component: Send + Sync {
    /// Unique identifier the component is registered under.
    fn component_id(&self) -> &str;

    /// Capability classifier.
    fn component_type(&self) -> ComponentType;

    /// Produce a fresh running instance. `None` if the prototype can not
    /// create one.
    fn spawn(&self) -> Option<Box<dyn Component>>;

    /// Bind the runtime environment, the process-specific parameter and the
    /// command arguments to a spawned instance.
    fn init(
        &mut self,
        env: &ComponentEnvironment,
        env_param: &Value,
        args: &[String],
    ) -> Result<(), InitError>;
}

/// A spawned, running component instance.
pub type DynComponent = Box<dyn Component>;

/// A registered prototype together with its ownership.
///
/// The handler destroys [`Prototype::Owned`] prototypes on teardown and
/// never destroys [`Prototype::Static`] ones.
pub enum Prototype {
    /// Library-resident or externally managed prototype.
    Static(&'static dyn Component),
    /// Prototype handed over to the handler.
    Owned(Box<dyn Component>),
}

impl Prototype {
    pub fn component(&self) -> &dyn Component {
        match self {
            Prototype::Static(component) => *component,
            Prototype::Owned(component) => component.as_ref(),
        }
    }

    pub fn id(&self) -> &str {
        self.component().component_id()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Prototype::Owned(_))
    }
}

impl From<&'static dyn Component> for Prototype {
    fn from(component: &'static dyn Component) -> Self {
        Prototype::Static(component)
    }
}

impl From<Box<dyn Component>> for Prototype {
    fn from(component: Box<dyn Component>) -> Self {
        Prototype::Owned(component)
    }
}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototype")
            .field("id", &self.id())
            .field("type", &self.component().component_type())
            .field("owned", &self.is_owned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl Component for Dummy {
        fn component_id(&self) -> &str {
            "Dummy"
        }

        fn component_type(&self) -> ComponentType {
            ComponentType::Sink
        }

        fn spawn(&self) -> Option<Box<dyn Component>> {
            Some(Box::new(Dummy))
        }

        fn init(&mut self, _: &ComponentEnvironment, _: &Value, _: &[String]) -> Result<(), InitError> {
            Ok(())
        }
    }

    static DUMMY: Dummy = Dummy;

    #[test]
    fn test_output_data_classification() {
        assert!(ComponentType::Source.has_output_data());
        assert!(ComponentType::Processor.has_output_data());
        assert!(!ComponentType::Sink.has_output_data());
        assert!(!ComponentType::Unknown.has_output_data());
    }

    #[test]
    fn test_prototype_ownership() {
        let stat: Prototype = (&DUMMY as &'static dyn Component).into();
        assert!(!stat.is_owned());
        assert_eq!(stat.id(), "Dummy");

        let owned: Prototype = (Box::new(Dummy) as Box<dyn Component>).into();
        assert!(owned.is_owned());
        assert_eq!(owned.component().component_type(), ComponentType::Sink);
    }

    #[test]
    fn test_environment_context() {
        let env = ComponentEnvironment::new()
            .with_property("run", 1234)
            .with_context(Arc::new(String::from("online")));

        assert_eq!(env.property("run"), Some(&Value::from(1234)));
        assert_eq!(env.context::<String>().map(String::as_str), Some("online"));
        assert!(env.context::<u32>().is_none());

        let copy = env.clone();
        assert_eq!(copy.properties, env.properties);
    }
}
