//! Component library loaders.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 LibraryTable                 │
//! │  - one entry per library path                │
//! │  - reference counting, unload policy         │
//! └──────────────────────────────────────────────┘
//!                       │ LibraryLoader
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │ NativeLoader│          │ BuiltinLoader│
//!   │  (dlopen)   │          │  (in-process)│
//!   └─────────────┘          └──────────────┘
//! ```
//!
//! Backends only open libraries and resolve symbols. Reference counting and
//! the decision whether a library is really unloaded belong to the
//! [`LibraryTable`].

pub mod builtin;
pub mod native;
pub mod table;

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::ptr::{self, NonNull};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registration::RegistrationContext;

pub use builtin::{BuiltinCatalog, BuiltinLibrary, BuiltinLoader};
pub use native::NativeLoader;
pub use table::{LibraryInfo, LibraryTable, LoadOutcome};

/// Name of the optional build information entry point.
pub const COMPILE_INFO_SYMBOL: &str = "CompileInfo";

/// Signature of the build information entry point.
pub type CompileInfoFn = unsafe extern "C" fn(date: *mut *const c_char, time: *mut *const c_char);

/// What happens to a library once nothing references it any more.
///
/// Libraries that registered components or agents stay mapped under every
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnloadPolicy {
    /// Unload when the reference count drops to zero.
    RefCounted,
    /// Track the count but keep the code resident forever.
    ///
    /// Used for backends whose unload path is known to crash in some teardown
    /// orders. The library memory is leaked on purpose.
    Never,
    /// Unload on the first unload request, regardless of the count.
    Always,
}

impl fmt::Display for UnloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnloadPolicy::RefCounted => "ref-counted",
            UnloadPolicy::Never => "never",
            UnloadPolicy::Always => "always",
        };
        f.write_str(name)
    }
}

impl FromStr for UnloadPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ref-counted" | "refcounted" | "ref_counted" => Ok(UnloadPolicy::RefCounted),
            "never" => Ok(UnloadPolicy::Never),
            "always" => Ok(UnloadPolicy::Always),
            other => Err(Error::config(format!("unknown unload policy: {}", other))),
        }
    }
}

/// Address of a symbol inside a loaded library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSymbol(NonNull<c_void>);

// SAFETY: a symbol address is plain data; using it is unsafe on its own.
unsafe impl Send for RawSymbol {}
unsafe impl Sync for RawSymbol {}

impl RawSymbol {
    pub fn new(ptr: *const c_void) -> Option<Self> {
        NonNull::new(ptr as *mut c_void).map(Self)
    }

    /// Address of a function pointer.
    pub fn from_fn_ptr(ptr: *const ()) -> Option<Self> {
        Self::new(ptr as *const c_void)
    }

    pub fn as_ptr(&self) -> *const c_void {
        self.0.as_ptr()
    }

    /// Reinterpret the address as a function pointer or data pointer type.
    ///
    /// # Safety
    ///
    /// `T` must be pointer-sized and match the real type of the symbol.
    pub unsafe fn cast<T: Copy>(self) -> T {
        debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<*const c_void>());
        let ptr = self.as_ptr();
        // SAFETY: the caller guarantees that T is the pointer type of the symbol.
        unsafe { std::mem::transmute_copy::<*const c_void, T>(&ptr) }
    }
}

/// Build date and time reported by a library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub date: String,
    pub time: String,
}

impl BuildInfo {
    /// Call a `CompileInfo` entry point. Null strings are reported as
    /// `"unknown"`.
    ///
    /// # Safety
    ///
    /// `symbol` must be a function with the [`CompileInfoFn`] signature that
    /// stores null or NUL-terminated strings.
    pub unsafe fn from_symbol(symbol: RawSymbol) -> Self {
        // SAFETY: guaranteed by the caller.
        let info: CompileInfoFn = unsafe { symbol.cast() };
        let mut date: *const c_char = ptr::null();
        let mut time: *const c_char = ptr::null();
        unsafe { info(&mut date, &mut time) };
        Self {
            date: unsafe { c_string_or_unknown(date) },
            time: unsafe { c_string_or_unknown(time) },
        }
    }
}

unsafe fn c_string_or_unknown(s: *const c_char) -> String {
    if s.is_null() {
        return "unknown".to_string();
    }
    // SAFETY: non-null strings handed out by CompileInfo are NUL-terminated.
    let value = unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned();
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value
    }
}

/// A library opened by a backend.
///
/// Dropping the handle releases it at the backend. The table decides when
/// that happens.
pub trait LoadedLibrary: Send {
    /// Resolve a symbol; `None` if the library does not export it.
    fn symbol(&self, name: &str) -> Option<RawSymbol>;
}

/// A dynamic loading backend.
pub trait LibraryLoader: Send {
    /// Short backend name used in diagnostics, e.g. `"dlopen"`.
    fn backend(&self) -> &'static str;

    /// Open a library and run its registration entry point, if any, with
    /// `ctx`.
    fn open(&mut self, path: &str, ctx: &mut RegistrationContext<'_>) -> Result<Box<dyn LoadedLibrary>>;

    /// Unload policy matching the guarantees of this backend.
    fn default_unload_policy(&self) -> UnloadPolicy;
}

/// Library file extension of the current platform.
pub fn native_library_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

/// Check if a file is a native component library.
pub fn is_native_library(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| ext == native_library_extension())
        .unwrap_or(false)
}

/// Component libraries found directly in `dir`, sorted by path.
pub fn discover(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut libraries = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && is_native_library(&path) {
                libraries.push(path);
            }
        }
    }

    libraries.sort();
    libraries
}
