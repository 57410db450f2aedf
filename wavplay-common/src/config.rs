//! Configuration file discovery and loading
//!
//! The bootstrap TOML file is located by priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config_dir>/wavplay/config.toml`), if present
//! 4. Built-in defaults (no file)
//!
//! An explicitly named file (CLI or environment) that does not exist is an
//! error. A missing per-user file is not: defaults apply.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "WAVPLAY_CONFIG";

/// Application directory name under the platform config dir
const APP_DIR: &str = "wavplay";

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named on the command line or in the environment; must exist
    Explicit(PathBuf),
    /// Found at the per-user default location
    Discovered(PathBuf),
    /// No file; compiled-in defaults
    Defaults,
}

impl ConfigSource {
    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Discovered(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolve the config file location following the priority order above.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource::Explicit(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return ConfigSource::Explicit(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    if let Some(path) = default_config_path() {
        if path.exists() {
            return ConfigSource::Discovered(path);
        }
    }

    // Priority 4: Built-in defaults
    ConfigSource::Defaults
}

/// Platform default config file path (`~/.config/wavplay/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Load a TOML document into `T`, or `T::default()` when no file applies.
pub fn load_toml<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = source.path() else {
        debug!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value = toml::from_str(&content)?;

    info!("Loaded configuration from {}", path.display());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        chunk: usize,
        name: String,
    }

    #[test]
    #[serial]
    fn test_cli_arg_wins_over_env() {
        std::env::set_var("WAVPLAY_TEST_CONFIG_A", "/tmp/from-env.toml");
        let source = resolve_config_path(
            Some(Path::new("/tmp/from-cli.toml")),
            "WAVPLAY_TEST_CONFIG_A",
        );
        assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/tmp/from-cli.toml")));
        std::env::remove_var("WAVPLAY_TEST_CONFIG_A");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_arg() {
        std::env::set_var("WAVPLAY_TEST_CONFIG_B", "/tmp/from-env.toml");
        let source = resolve_config_path(None, "WAVPLAY_TEST_CONFIG_B");
        assert_eq!(source, ConfigSource::Explicit(PathBuf::from("/tmp/from-env.toml")));
        std::env::remove_var("WAVPLAY_TEST_CONFIG_B");
    }

    #[test]
    fn test_defaults_when_no_file() {
        let value: Sample = load_toml(&ConfigSource::Defaults).unwrap();
        assert_eq!(value, Sample::default());
    }

    #[test]
    fn test_load_partial_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk = 2048").unwrap();

        let source = ConfigSource::Explicit(file.path().to_path_buf());
        let value: Sample = load_toml(&source).unwrap();
        assert_eq!(value.chunk, 2048);
        assert_eq!(value.name, "");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let source = ConfigSource::Explicit(PathBuf::from("/nonexistent/wavplay/config.toml"));
        let result: Result<Sample> = load_toml(&source);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_file_is_toml_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chunk = [not valid").unwrap();

        let source = ConfigSource::Explicit(file.path().to_path_buf());
        let result: Result<Sample> = load_toml(&source);
        assert!(matches!(result, Err(Error::Toml(_))));
    }
}
