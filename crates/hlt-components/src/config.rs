//! Handler configuration.
//!
//! Defaults live in [`defaults`], variable names in [`env_vars`]. A
//! configuration is read from TOML and then overridden from the environment:
//!
//! ```toml
//! backend = "native"
//! unload_policy = "ref-counted"
//! activate_agents = true
//! libraries = ["libAliHLTUtil.so", "libAliHLTTPC.so"]
//! library_dir = "/opt/hlt/lib"
//!
//! [logging]
//! level = "debug"
//! json = false
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loader::{BuiltinLoader, LibraryLoader, NativeLoader, UnloadPolicy};

/// Default values.
pub mod defaults {
    pub const LOG_LEVEL: &str = "info";
    pub const ACTIVATE_AGENTS: bool = true;
    /// Separator of the library list in [`super::env_vars::LIBRARIES`].
    pub const LIBRARY_SEPARATOR: char = ',';
}

/// Environment variable names.
pub mod env_vars {
    pub const LOADER_BACKEND: &str = "HLT_LOADER_BACKEND";
    pub const UNLOAD_POLICY: &str = "HLT_UNLOAD_POLICY";
    pub const ACTIVATE_AGENTS: &str = "HLT_ACTIVATE_AGENTS";
    pub const LIBRARIES: &str = "HLT_LIBRARIES";
    pub const LIBRARY_DIR: &str = "HLT_LIBRARY_DIR";
    pub const LOG_LEVEL: &str = "HLT_LOG_LEVEL";
    pub const LOG_JSON: &str = "HLT_LOG_JSON";
}

/// Dynamic loading backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderBackend {
    /// Platform dynamic linker.
    #[default]
    Native,
    /// Libraries linked into the process, served from the global catalog.
    Builtin,
}

impl LoaderBackend {
    pub fn create_loader(&self) -> Box<dyn LibraryLoader> {
        match self {
            LoaderBackend::Native => Box::new(NativeLoader::new()),
            LoaderBackend::Builtin => Box::new(BuiltinLoader::global()),
        }
    }
}

impl fmt::Display for LoaderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderBackend::Native => f.write_str("native"),
            LoaderBackend::Builtin => f.write_str("builtin"),
        }
    }
}

impl FromStr for LoaderBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "dlopen" => Ok(LoaderBackend::Native),
            "builtin" => Ok(LoaderBackend::Builtin),
            other => Err(Error::config(format!("unknown loader backend: {}", other))),
        }
    }
}

/// Diagnostics output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

/// Component handler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub backend: LoaderBackend,
    /// Overrides the backend's default unload policy.
    pub unload_policy: Option<UnloadPolicy>,
    /// Run the agent activation loop around every configured load.
    pub activate_agents: bool,
    /// Libraries loaded at startup, in order.
    pub libraries: Vec<String>,
    /// Directory scanned for further native libraries after `libraries`.
    pub library_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            backend: LoaderBackend::default(),
            unload_policy: None,
            activate_agents: defaults::ACTIVATE_AGENTS,
            libraries: Vec::new(),
            library_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl HandlerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("can not read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Apply `HLT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(env_vars::LOADER_BACKEND) {
            self.backend = value.parse()?;
        }
        if let Some(value) = lookup(env_vars::UNLOAD_POLICY) {
            self.unload_policy = Some(value.parse()?);
        }
        if let Some(value) = lookup(env_vars::ACTIVATE_AGENTS) {
            self.activate_agents = parse_bool(env_vars::ACTIVATE_AGENTS, &value)?;
        }
        if let Some(value) = lookup(env_vars::LIBRARIES) {
            self.libraries = value
                .split(defaults::LIBRARY_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = lookup(env_vars::LIBRARY_DIR) {
            self.library_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(env_vars::LOG_LEVEL) {
            self.logging.level = value;
        }
        if let Some(value) = lookup(env_vars::LOG_JSON) {
            self.logging.json = parse_bool(env_vars::LOG_JSON, &value)?;
        }
        Ok(())
    }

    /// Unload policy in effect for this configuration.
    pub fn effective_unload_policy(&self) -> UnloadPolicy {
        self.unload_policy
            .unwrap_or_else(|| self.backend.create_loader().default_unload_policy())
    }

    /// Configured libraries followed by those discovered in `library_dir`.
    pub fn library_paths(&self) -> Vec<String> {
        let mut paths = self.libraries.clone();
        if let Some(dir) = &self.library_dir {
            for path in crate::loader::discover(dir) {
                let path = path.to_string_lossy().into_owned();
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(format!("{}: not a boolean: {}", name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HandlerConfig::default();
        assert_eq!(config.backend, LoaderBackend::Native);
        assert!(config.activate_agents);
        assert!(config.libraries.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.effective_unload_policy(), UnloadPolicy::RefCounted);
    }

    #[test]
    fn test_parse_toml() {
        let config = HandlerConfig::from_toml_str(
            r#"
            backend = "builtin"
            unload_policy = "always"
            activate_agents = false
            libraries = ["libAliHLTUtil.so", "libAliHLTTPC.so"]

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, LoaderBackend::Builtin);
        assert_eq!(config.unload_policy, Some(UnloadPolicy::Always));
        assert!(!config.activate_agents);
        assert_eq!(config.libraries, vec!["libAliHLTUtil.so", "libAliHLTTPC.so"]);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_builtin_defaults_to_never() {
        let config = HandlerConfig::from_toml_str("backend = \"builtin\"").unwrap();
        assert_eq!(config.effective_unload_policy(), UnloadPolicy::Never);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = HandlerConfig::from_toml_str("backend = \"jvm\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hlt.toml");
        std::fs::write(&path, "libraries = [\"libAliHLTSample.so\"]\n").unwrap();

        let config = HandlerConfig::from_file(&path).unwrap();
        assert_eq!(config.libraries, vec!["libAliHLTSample.so"]);

        let missing = HandlerConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = HandlerConfig::default();
        config
            .apply_overrides(lookup(&[
                (env_vars::LOADER_BACKEND, "builtin"),
                (env_vars::UNLOAD_POLICY, "never"),
                (env_vars::ACTIVATE_AGENTS, "off"),
                (env_vars::LIBRARIES, "libA.so, libB.so,,"),
                (env_vars::LOG_LEVEL, "hlt_components=debug"),
                (env_vars::LOG_JSON, "1"),
            ]))
            .unwrap();

        assert_eq!(config.backend, LoaderBackend::Builtin);
        assert_eq!(config.unload_policy, Some(UnloadPolicy::Never));
        assert!(!config.activate_agents);
        assert_eq!(config.libraries, vec!["libA.so", "libB.so"]);
        assert_eq!(config.logging.level, "hlt_components=debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = HandlerConfig::default();
        let result = config.apply_overrides(lookup(&[(env_vars::ACTIVATE_AGENTS, "maybe")]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = config.apply_overrides(lookup(&[(env_vars::UNLOAD_POLICY, "sometimes")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_library_paths_include_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let ext = crate::loader::native_library_extension();
        let found = dir.path().join(format!("libAliHLTMUON.{}", ext));
        std::fs::write(&found, b"").unwrap();

        let config = HandlerConfig {
            libraries: vec!["libAliHLTUtil.so".to_string()],
            library_dir: Some(dir.path().to_path_buf()),
            ..HandlerConfig::default()
        };
        assert_eq!(
            config.library_paths(),
            vec!["libAliHLTUtil.so".to_string(), found.to_string_lossy().into_owned()]
        );
    }
}
