//! Library handle table.
//!
//! Keeps one entry per library path and counts how often each path was
//! loaded. Only the first load reaches the backend; only the release of the
//! last reference may unload, and then only if the [`UnloadPolicy`] allows it.
//!
//! A library that submitted prototypes or published agents while loading is
//! never unmapped: the registry keeps its prototypes after the unload. Its
//! agents leave the agent list when its entry is released.
//!
//! Panics raised by the backend or by library code while opening or closing
//! a library are caught here and reported as [`Error::Io`].

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{BuildInfo, LibraryLoader, LoadedLibrary, RawSymbol, UnloadPolicy, COMPILE_INFO_SYMBOL};
use crate::agent::{AgentList, AgentRef};
use crate::error::{panic_message, Error, Result};
use crate::registration::RegistrationContext;

/// Result of a successful [`LibraryTable::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The backend opened the library.
    Loaded,
    /// The library was already open; its count was incremented.
    AlreadyLoaded { ref_count: usize },
}

/// Read-only view of a table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryInfo {
    pub path: String,
    pub ref_count: usize,
    pub build_info: Option<BuildInfo>,
    pub loaded_at: DateTime<Utc>,
    /// Registered code lives in the library; it is kept mapped on release.
    pub resident: bool,
    pub agents: usize,
}

struct LibraryEntry {
    path: String,
    library: Box<dyn LoadedLibrary>,
    ref_count: usize,
    build_info: Option<BuildInfo>,
    loaded_at: DateTime<Utc>,
    resident: bool,
    agents: Vec<AgentRef>,
}

impl LibraryEntry {
    fn info(&self) -> LibraryInfo {
        LibraryInfo {
            path: self.path.clone(),
            ref_count: self.ref_count,
            build_info: self.build_info.clone(),
            loaded_at: self.loaded_at,
            resident: self.resident,
            agents: self.agents.len(),
        }
    }
}

/// Table of loaded libraries.
pub struct LibraryTable {
    loader: Box<dyn LibraryLoader>,
    policy: UnloadPolicy,
    entries: Vec<LibraryEntry>,
}

impl LibraryTable {
    /// Create a table using the backend's default unload policy.
    pub fn new(loader: Box<dyn LibraryLoader>) -> Self {
        let policy = loader.default_unload_policy();
        Self {
            loader,
            policy,
            entries: Vec::new(),
        }
    }

    pub fn set_policy(&mut self, policy: UnloadPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> UnloadPolicy {
        self.policy
    }

    pub fn backend(&self) -> &'static str {
        self.loader.backend()
    }

    /// Load a library, or take another reference to it if already loaded.
    pub fn load(&mut self, path: &str, ctx: &mut RegistrationContext<'_>) -> Result<LoadOutcome> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.path == path) {
            entry.ref_count += 1;
            tracing::debug!("instance {} of library {} loaded", entry.ref_count, path);
            return Ok(LoadOutcome::AlreadyLoaded {
                ref_count: entry.ref_count,
            });
        }

        let backend = self.loader.backend();
        let loader = &mut self.loader;
        let opened = panic::catch_unwind(AssertUnwindSafe(|| loader.open(path, ctx)));
        let library = match opened {
            Ok(Ok(library)) => library,
            Ok(Err(e)) => {
                tracing::error!("can not load library {} ({}): {}", path, backend, e);
                ctx.retract_agents();
                return Err(e);
            }
            Err(payload) => {
                ctx.retract_agents();
                let msg = panic_message(payload.as_ref());
                tracing::error!("exception caught while loading library {} ({}): {}", path, backend, msg);
                return Err(Error::io(format!("{} exception while loading {}: {}", backend, path, msg)));
            }
        };
        tracing::info!("library {} loaded ({})", path, backend);

        let build_info = library.symbol(COMPILE_INFO_SYMBOL).map(|symbol| {
            // SAFETY: CompileInfo is part of the component library contract.
            unsafe { BuildInfo::from_symbol(symbol) }
        });
        match &build_info {
            Some(info) => tracing::info!("{} build on {} ({})", path, info.date, info.time),
            None => tracing::info!("no build info available for {}", path),
        }

        let resident = ctx.has_submissions();
        self.entries.push(LibraryEntry {
            path: path.to_string(),
            library,
            ref_count: 1,
            build_info,
            loaded_at: Utc::now(),
            resident,
            agents: ctx.take_published_agents(),
        });
        Ok(LoadOutcome::Loaded)
    }

    /// Drop one reference to a library.
    ///
    /// The entry disappears when its count reaches zero (or immediately under
    /// [`UnloadPolicy::Always`]); whether the backend really unloads is up to
    /// the policy. A skipped unload is not an error. Agents the library
    /// published are removed from `agents` when the entry goes.
    pub fn unload(&mut self, path: &str, agents: &AgentList) -> Result<()> {
        let index = self
            .entries
            .iter()
            .position(|e| e.path == path)
            .ok_or_else(|| Error::not_found(format!("library {}", path)))?;

        if self.policy != UnloadPolicy::Always {
            let entry = &mut self.entries[index];
            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                tracing::debug!(
                    "library {} still referenced {} time(s), kept loaded",
                    path,
                    entry.ref_count
                );
                return Ok(());
            }
        }

        let entry = self.entries.remove(index);
        self.release(entry, agents)
    }

    /// Release every library regardless of its count, last loaded first.
    ///
    /// All entries are removed even if some release fails; the first failure
    /// is returned.
    pub fn unload_all(&mut self, agents: &AgentList) -> Result<()> {
        let mut result = Ok(());
        while let Some(entry) = self.entries.pop() {
            if let Err(e) = self.release(entry, agents) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn release(&self, entry: LibraryEntry, agents: &AgentList) -> Result<()> {
        let LibraryEntry {
            path,
            library,
            resident,
            agents: published,
            ..
        } = entry;

        for agent in &published {
            agents.unregister(agent);
        }
        // Last references to the agents go while the code is still mapped.
        drop(published);

        if self.policy == UnloadPolicy::Never {
            // The backend can crash while unloading in some teardown orders,
            // so the library stays resident and its handle is leaked.
            std::mem::forget(library);
            tracing::debug!("unload library {} (kept resident, unload policy: never)", path);
            return Ok(());
        }

        if resident {
            std::mem::forget(library);
            tracing::debug!(
                "unload library {} (kept resident, registered components still refer to it)",
                path
            );
            return Ok(());
        }

        match panic::catch_unwind(AssertUnwindSafe(move || drop(library))) {
            Ok(()) => {
                tracing::debug!("unload library {}", path);
                Ok(())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!("exception caught while unloading library {}: {}", path, msg);
                Err(Error::io(format!("exception while unloading {}: {}", path, msg)))
            }
        }
    }

    /// Resolve a symbol in an already loaded library.
    pub fn find_symbol(&self, path: &str, name: &str) -> Option<RawSymbol> {
        self.entries
            .iter()
            .find(|e| e.path == path)
            .and_then(|e| e.library.symbol(name))
    }

    pub fn get(&self, path: &str) -> Option<LibraryInfo> {
        self.entries.iter().find(|e| e.path == path).map(LibraryEntry::info)
    }

    /// Loaded libraries in load order.
    pub fn list(&self) -> Vec<LibraryInfo> {
        self.entries.iter().map(LibraryEntry::info).collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
