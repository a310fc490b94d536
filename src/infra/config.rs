use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};
use crate::core::exec::RetryPolicy;
use crate::core::exec::pool::DEFAULT_MAX_IDLE;

/// Commands served by a pooled tagged connection unless configured otherwise.
pub const DEFAULT_API_COMMANDS: &[&str] = &[
    "fstat", "key", "keys", "login", "print", "describe", "changes", "dirs", "where", "files", "index",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Client executable and connection pooling
    pub server: ServerConfig,

    /// Dropped-connection retry policy
    pub retry: RetryConfig,

    /// Sharded grep settings
    pub grep: GrepConfig,

    /// Path batching for file commands
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig
{
    /// Client executable; `~` and `$VAR` are expanded
    pub exe: String,
    pub charset: String,
    pub max_idle: usize,
    pub api_commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig
{
    /// Attempts before giving up; 0 retries forever
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrepConfig
{
    /// Files a single grep call may cover
    pub file_ceiling: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig
{
    pub paths_per_call: usize,
}

impl Default for ServerConfig
{
    fn default() -> Self
    {
        Self {
            exe: "p4".to_string(),
            charset: "utf8".to_string(),
            max_idle: DEFAULT_MAX_IDLE,
            api_commands: DEFAULT_API_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl Default for RetryConfig
{
    fn default() -> Self
    {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl Default for GrepConfig
{
    fn default() -> Self
    {
        Self { file_ceiling: 10_000 }
    }
}

impl Default for BatchConfig
{
    fn default() -> Self
    {
        Self { paths_per_call: 100 }
    }
}

impl ServerConfig
{
    /// Executable path with `~` and environment variables expanded. An
    /// unresolvable variable leaves the configured text as is.
    pub fn exe_path(&self) -> PathBuf
    {
        match shellexpand::full(&self.exe)
        {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(&self.exe),
        }
    }
}

impl RetryConfig
{
    pub fn policy(&self) -> RetryPolicy
    {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

pub fn load_config() -> Result<Config>
{
    let mut builder = config::Config::builder();

    // Load from config files in priority order
    let config_paths = ["p4kit.toml", "p4kit.yaml", "p4kit.json", ".p4kit.toml"];

    for path in &config_paths
    {
        if Path::new(path).exists()
        {
            builder = builder.add_source(config::File::with_name(path));
            break;
        }
    }

    // P4KIT_SERVER__EXE=/opt/p4, P4KIT_SERVER__API_COMMANDS="fstat key"
    builder = builder.add_source(
        config::Environment::with_prefix("P4KIT")
            .prefix_separator("_")
            .separator("__")
            .list_separator(" ")
            .with_list_parse_key("server.api_commands")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("p4kit.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn defaults_match_documented_values()
    {
        let cfg = Config::default();
        assert_eq!(cfg.server.charset, "utf8");
        assert_eq!(cfg.server.max_idle, 16);
        assert!(cfg.server.api_commands.iter().any(|c| c == "fstat"));
        assert_eq!(cfg.retry.policy(), RetryPolicy::default());
        assert_eq!(cfg.grep.file_ceiling, 10_000);
        assert_eq!(cfg.batch.paths_per_call, 100);
    }

    #[test]
    fn partial_toml_keeps_other_defaults()
    {
        let cfg: Config = toml::from_str("[retry]\nmax_attempts = 0\n").unwrap();
        assert_eq!(cfg.retry.max_attempts, 0);
        assert_eq!(cfg.retry.initial_backoff_ms, 50);
        assert_eq!(cfg.server.exe, "p4");
    }

    #[test]
    fn exe_path_keeps_unresolvable_text()
    {
        let server = ServerConfig {
            exe: "$P4KIT_DEFINITELY_UNSET_VAR/p4".into(),
            ..ServerConfig::default()
        };
        assert_eq!(server.exe_path(), PathBuf::from("$P4KIT_DEFINITELY_UNSET_VAR/p4"));
        assert_eq!(ServerConfig::default().exe_path(), PathBuf::from("p4"));
    }
}
