use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no bot token configured (set DISCORD_TOKEN or [bot].token)")]
    MissingToken,
    #[error("[bot].prefix must not be empty")]
    EmptyPrefix,
    #[error("[player].sweep_interval_secs must be greater than zero")]
    ZeroSweepInterval,
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

impl Config {
    /// Reads `config.toml` (or `config.default.toml`), falling back to the
    /// built-in defaults when neither exists, then applies environment
    /// overrides. Variables in a `.env` file fill in for ones the process
    /// environment does not set.
    pub fn load() -> AnyResult<Self> {
        let config_path = ["config.toml", "config.default.toml"]
            .into_iter()
            .find(|p| std::path::Path::new(p).exists());

        let mut config = match config_path {
            Some(path) => {
                crate::log_println!("Loading configuration from: {}", path);
                Self::from_toml(&std::fs::read_to_string(path)?)?
            }
            None => {
                crate::log_println!("No config.toml found, using defaults");
                Self::default()
            }
        };

        let dotenv = read_env_file(Path::new(".env"))?;
        if !dotenv.is_empty() {
            crate::log_println!("Loaded {} variables from .env", dotenv.len());
        }
        config.apply_env(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()))?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> AnyResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Overrides taken from the process environment: `DISCORD_TOKEN`,
    /// `YOUTUBE_COOKIES`, `PORT`, `BOT_PREFIX`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(token) = lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.bot.token = token.trim().to_string();
        }
        if let Some(cookies) = lookup("YOUTUBE_COOKIES").filter(|c| !c.is_empty()) {
            self.resolver.cookies = Some(cookies);
        }
        if let Some(prefix) = lookup("BOT_PREFIX") {
            self.bot.prefix = prefix;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PORT",
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.player.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}

/// Parses a dotenv file without touching the process environment. A missing
/// file yields no variables.
pub fn read_env_file(path: &Path) -> AnyResult<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let mut vars = HashMap::new();
    for entry in dotenv::from_path_iter(path)? {
        let (key, value) = entry?;
        vars.insert(key, value);
    }
    Ok(vars)
}
