//! In-process loader for component libraries linked into the executable.
//!
//! Libraries are published in a [`BuiltinCatalog`] under the path they are
//! requested with. "Loading" one runs its registration function; its symbols
//! come from an explicit table. This backend stands in for a managed loader
//! that can not unload code safely, hence its default policy is
//! [`UnloadPolicy::Never`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::{CompileInfoFn, LibraryLoader, LoadedLibrary, RawSymbol, UnloadPolicy, COMPILE_INFO_SYMBOL};
use crate::error::{Error, Result};
use crate::registration::{RegistrationContext, RegistrationFn, REGISTRATION_SYMBOL};

const BACKEND: &str = "builtin";

/// A component library linked into the process.
pub struct BuiltinLibrary {
    name: String,
    registration: Option<RegistrationFn>,
    symbols: HashMap<String, RawSymbol>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl BuiltinLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registration: None,
            symbols: HashMap::new(),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// Registration function run on every backend load.
    pub fn with_registration(mut self, registration: RegistrationFn) -> Self {
        self.registration = Some(registration);
        self.with_symbol(REGISTRATION_SYMBOL, registration as *const ())
    }

    /// Export a `CompileInfo` entry point.
    pub fn with_compile_info(self, info: CompileInfoFn) -> Self {
        self.with_symbol(COMPILE_INFO_SYMBOL, info as *const ())
    }

    /// Export an arbitrary symbol. Null addresses are ignored.
    pub fn with_symbol(mut self, name: impl Into<String>, address: *const ()) -> Self {
        if let Some(symbol) = RawSymbol::from_fn_ptr(address) {
            self.symbols.insert(name.into(), symbol);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How often the backend opened this library.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// How often an opened handle was released.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for BuiltinLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinLibrary")
            .field("name", &self.name)
            .field("registration", &self.registration.is_some())
            .field("symbols", &self.symbols.keys().collect::<Vec<_>>())
            .finish()
    }
}

static GLOBAL_CATALOG: Lazy<Arc<BuiltinCatalog>> = Lazy::new(|| Arc::new(BuiltinCatalog::new()));

/// Set of in-process libraries available to a [`BuiltinLoader`].
#[derive(Debug, Default)]
pub struct BuiltinCatalog {
    libraries: RwLock<HashMap<String, Arc<BuiltinLibrary>>>,
}

impl BuiltinCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide catalog.
    pub fn global() -> Arc<BuiltinCatalog> {
        GLOBAL_CATALOG.clone()
    }

    /// Publish a library; replaces an earlier one with the same name.
    pub fn publish(&self, library: BuiltinLibrary) -> Arc<BuiltinLibrary> {
        let library = Arc::new(library);
        tracing::debug!("builtin library {} published", library.name());
        self.libraries
            .write()
            .insert(library.name().to_string(), library.clone());
        library
    }

    pub fn get(&self, name: &str) -> Option<Arc<BuiltinLibrary>> {
        self.libraries.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.libraries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Loader serving libraries from a [`BuiltinCatalog`].
#[derive(Debug, Clone)]
pub struct BuiltinLoader {
    catalog: Arc<BuiltinCatalog>,
}

impl BuiltinLoader {
    /// Loader with its own, empty catalog.
    pub fn new() -> Self {
        Self::with_catalog(Arc::new(BuiltinCatalog::new()))
    }

    /// Loader backed by the process-wide catalog.
    pub fn global() -> Self {
        Self::with_catalog(BuiltinCatalog::global())
    }

    pub fn with_catalog(catalog: Arc<BuiltinCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<BuiltinCatalog> {
        &self.catalog
    }
}

impl Default for BuiltinLoader {
    fn default() -> Self {
        Self::new()
    }
}

struct BuiltinHandle {
    library: Arc<BuiltinLibrary>,
}

impl LoadedLibrary for BuiltinHandle {
    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        self.library.symbols.get(name).copied()
    }
}

impl Drop for BuiltinHandle {
    fn drop(&mut self) {
        self.library.closed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("builtin library {} released", self.library.name());
    }
}

impl LibraryLoader for BuiltinLoader {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn open(&mut self, path: &str, ctx: &mut RegistrationContext<'_>) -> Result<Box<dyn LoadedLibrary>> {
        let library = self.catalog.get(path).ok_or_else(|| Error::LoadFailure {
            path: path.to_string(),
            backend: BACKEND,
            reason: "library not linked into this process".to_string(),
        })?;

        library.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(register) = library.registration {
            register(ctx);
        }

        Ok(Box::new(BuiltinHandle { library }))
    }

    fn default_unload_policy(&self) -> UnloadPolicy {
        UnloadPolicy::Never
    }
}
