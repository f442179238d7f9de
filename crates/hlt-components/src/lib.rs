//! Component registry and plugin loading runtime for the HLT processing
//! pipeline.
//!
//! Processing components are built as independent libraries. The
//! [`ComponentHandler`] loads those libraries, collects the component
//! prototypes they register, creates running instances on request and
//! unloads the libraries again.

pub mod agent;
pub mod component;
pub mod config;
pub mod error;
pub mod handler;
pub mod loader;
pub mod logging;
pub mod macros;
pub mod registration;
pub mod registry;

pub use agent::{AgentList, AgentRef, ModuleAgent};
pub use component::{Component, ComponentEnvironment, ComponentType, DynComponent, InitError, Prototype};
pub use config::HandlerConfig;
pub use error::{Error, Result};
pub use handler::ComponentHandler;
pub use loader::{LibraryInfo, UnloadPolicy};
pub use registration::RegistrationContext;
pub use registry::ComponentListing;

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::agent::{AgentList, AgentRef, ModuleAgent};
    pub use crate::component::{Component, ComponentEnvironment, ComponentType, InitError, Prototype};
    pub use crate::config::{env_vars, HandlerConfig, LoaderBackend};
    pub use crate::error::{Error, Result};
    pub use crate::handler::ComponentHandler;
    pub use crate::loader::{BuiltinCatalog, BuiltinLibrary, BuiltinLoader, NativeLoader, UnloadPolicy};
    pub use crate::registration::RegistrationContext;
}
