//! Configuration validation utilities.

use botkit_core::open_store;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, BotkitConfig, LifecycleConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &BotkitConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_lifecycle_config(&config.lifecycle)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    bot.identity()?;

    if bot.store_url.is_empty() {
        return Err(ConfigError::missing("bot.store_url"));
    }
    // Opening a store only parses the URL; nothing is connected or created.
    open_store(&bot.store_url)
        .map_err(|e| ConfigError::invalid_url("bot.store_url", &bot.store_url, e.to_string()))?;

    if let Some(url) = &bot.webhook_url {
        validate_url("bot.webhook_url", url, &["https://", "http://"])?;
    }

    Ok(())
}

fn validate_lifecycle_config(lifecycle: &LifecycleConfig) -> ConfigResult<()> {
    let bounds = [
        ("lifecycle.startup_timeout_ms", lifecycle.startup_timeout_ms),
        ("lifecycle.drain_timeout_ms", lifecycle.drain_timeout_ms),
        ("lifecycle.save_timeout_ms", lifecycle.save_timeout_ms),
    ];
    for (field, value) in bounds {
        if value == 0 {
            return Err(ConfigError::invalid(field, "must be greater than 0"));
        }
    }

    if lifecycle.checkpoint_interval_ms == Some(0) {
        return Err(ConfigError::invalid(
            "lifecycle.checkpoint_interval_ms",
            "must be greater than 0 when set",
        ));
    }

    if lifecycle.failure_reply.trim().is_empty() {
        return Err(ConfigError::invalid(
            "lifecycle.failure_reply",
            "must not be empty",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing("logging.file_path"));
    }
    Ok(())
}

fn validate_url(field: &'static str, url: &str, valid_schemes: &[&str]) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing(field));
    }

    let rest = valid_schemes.iter().find_map(|s| url.strip_prefix(s));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        Some(_) => Err(ConfigError::invalid_url(field, url, "URL has no host")),
        None => Err(ConfigError::invalid_url(
            field,
            url,
            format!("URL must start with one of: {valid_schemes:?}"),
        )),
    }
}
