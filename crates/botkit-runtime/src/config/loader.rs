//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables TOML configuration files (`botkit.toml`, `config.toml`)
//! - `yaml-config`: enables YAML configuration files (`botkit.yaml`, `botkit.yml`, etc.)
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic overrides passed to [`ConfigLoader::merge`]
//! 3. Profile-specific config file (`botkit.{profile}.toml`)
//! 4. Main config file (`botkit.toml`)
//! 5. The conventional `BOT_TOKEN` and `STORE_URL` variables
//! 6. Environment variables (`BOTKIT_*`)
//!
//! # Environment Variable Mapping
//!
//! Environment variables are mapped using the `BOTKIT_` prefix with `__` as separator:
//!
//! - `BOTKIT_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `BOTKIT_LIFECYCLE__DRAIN_TIMEOUT_MS=1000` → `lifecycle.drain_timeout_ms = 1000`
//! - `BOTKIT_BOT__STORE_URL=file:///var/lib/bot` → `bot.store_url = "file:///var/lib/bot"`
//!
//! `BOT_TOKEN` and `STORE_URL` are honoured as well, below their prefixed forms.
//!
//! # Example
//!
//! ```rust,ignore
//! use botkit_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::BotkitConfig;

/// Environment variable prefix for nested settings.
pub const ENV_PREFIX: &str = "BOTKIT_";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the short forms `dev` and `prod`.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `BOTKIT_PROFILE`, defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var("BOTKIT_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    /// Programmatic overrides.
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a programmatic configuration over the built-in defaults.
    ///
    /// Files and environment variables still take precedence.
    pub fn merge(mut self, config: BotkitConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<BotkitConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: BotkitConfig = figment.extract()?;

        debug!(
            profile = %profile,
            store_url = %config.bot.store_url,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(BotkitConfig::default()));

        let overrides = std::mem::take(&mut self.figment);
        figment = figment.merge(overrides);

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment
                .merge(
                    Env::raw()
                        .only(&["BOT_TOKEN", "STORE_URL"])
                        .map(|key| {
                            if key.as_str().eq_ignore_ascii_case("bot_token") {
                                "bot.token".into()
                            } else {
                                "bot.store_url".into()
                            }
                        }),
                )
                .merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: ext.to_string(),
            }),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }

        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("botkit"));
        }
        paths
    }

    /// Searches `search_paths × base_names`, merging the profile variant
    /// before its base file. Stops at the first base file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["botkit.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["botkit.yaml", "botkit.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations and the environment.
pub fn load_config() -> ConfigResult<BotkitConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path` plus the environment.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<BotkitConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::config::{ErrorPolicy, LogLevel};

    #[test]
    fn test_default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Info);
            assert_eq!(config.bot.store_url, "memory://");
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "botkit.toml",
                r#"
                [bot]
                name = "echo"
                store_url = "file://./data"

                [lifecycle]
                drain_timeout_ms = 250
                on_handler_error = "stop"
                "#,
            )?;
            jail.set_env("BOTKIT_LIFECYCLE__DRAIN_TIMEOUT_MS", "100");
            jail.set_env("BOTKIT_LOGGING__LEVEL", "debug");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bot.name.as_deref(), Some("echo"));
            assert_eq!(config.bot.store_url, "file://./data");
            assert_eq!(config.lifecycle.drain_timeout_ms, 100);
            assert_eq!(config.lifecycle.on_handler_error, ErrorPolicy::Stop);
            assert_eq!(config.logging.level, LogLevel::Debug);
            Ok(())
        });
    }

    #[test]
    fn test_conventional_env_vars() {
        Jail::expect_with(|jail| {
            jail.set_env("BOT_TOKEN", "4242:XYZ");
            jail.set_env("STORE_URL", "file:///tmp/bots");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bot.token.as_deref(), Some("4242:XYZ"));
            assert_eq!(config.bot.store_url, "file:///tmp/bots");
            assert_eq!(
                config.bot.identity().map_err(|e| e.to_string())?.as_str(),
                "4242"
            );

            jail.set_env("BOTKIT_BOT__STORE_URL", "memory://");
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.bot.store_url, "memory://");
            Ok(())
        });
    }

    #[test]
    fn test_profile_file_is_overridden_by_base_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "botkit.production.toml",
                "[bot]\nname = \"prod\"\nwebhook_url = \"https://bots.example.com/hook\"\n",
            )?;
            jail.create_file("botkit.toml", "[bot]\nname = \"base\"\n")?;

            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.bot.name.as_deref(), Some("base"));
            assert_eq!(
                config.bot.webhook_url.as_deref(),
                Some("https://bots.example.com/hook")
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = ConfigLoader::new()
            .file("/definitely/not/here/botkit.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }
}
