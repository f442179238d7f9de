//! Native loader for .so/.dylib/.dll component libraries.

use std::ffi::c_void;

use libloading::{Library, Symbol};

use super::{LibraryLoader, LoadedLibrary, RawSymbol, UnloadPolicy};
use crate::error::{Error, Result};
use crate::registration::{RegistrationContext, RegistrationFn, REGISTRATION_SYMBOL};

const BACKEND: &str = "dlopen";

/// Loader using the platform dynamic linker.
#[derive(Debug, Default)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

/// A library opened with the dynamic linker.
///
/// Dropping it closes the library.
pub struct NativeLibrary {
    library: Library,
}

impl LoadedLibrary for NativeLibrary {
    fn symbol(&self, name: &str) -> Option<RawSymbol> {
        let mut symbol_name = Vec::with_capacity(name.len() + 1);
        symbol_name.extend_from_slice(name.as_bytes());
        symbol_name.push(0);

        // SAFETY: the address is only read here, never dereferenced.
        let symbol: Symbol<*mut c_void> = unsafe { self.library.get(&symbol_name) }.ok()?;
        RawSymbol::new(*symbol as *const c_void)
    }
}

#[cfg(unix)]
fn open_library(path: &str) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // Resolve all symbols up front so a broken library fails at load time.
    // SAFETY: loading a library runs its initializers; the caller trusts it.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_library(path: &str) -> std::result::Result<Library, libloading::Error> {
    // SAFETY: loading a library runs its initializers; the caller trusts it.
    unsafe { Library::new(path) }
}

impl LibraryLoader for NativeLoader {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn open(&mut self, path: &str, ctx: &mut RegistrationContext<'_>) -> Result<Box<dyn LoadedLibrary>> {
        let library = open_library(path).map_err(|e| {
            tracing::error!("dlopen error: {}", e);
            Error::LoadFailure {
                path: path.to_string(),
                backend: BACKEND,
                reason: e.to_string(),
            }
        })?;

        let registration = {
            let mut symbol_name = REGISTRATION_SYMBOL.as_bytes().to_vec();
            symbol_name.push(0);
            // SAFETY: the registration entry point is declared with
            // `export_components!`, which fixes its signature.
            unsafe { library.get::<RegistrationFn>(&symbol_name) }
                .ok()
                .map(|symbol| *symbol)
        };

        match registration {
            Some(register) => {
                let registered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| register(ctx)));
                if let Err(payload) = registered {
                    // Whatever the library submitted before failing still
                    // points into it; keep it mapped.
                    std::mem::forget(library);
                    std::panic::resume_unwind(payload);
                }
            }
            None => tracing::debug!(
                "{} exports no {}, relying on module agents",
                path,
                REGISTRATION_SYMBOL
            ),
        }

        Ok(Box::new(NativeLibrary { library }))
    }

    fn default_unload_policy(&self) -> UnloadPolicy {
        UnloadPolicy::RefCounted
    }
}
