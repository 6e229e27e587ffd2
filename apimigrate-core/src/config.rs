use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MigrateConfig {
    pub target: TargetConfig,
    pub backup: BackupConfig,
}

/// Connection parameters for the New API Postgres database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: None,
            user: None,
            password: None,
        }
    }
}

/// Target parameters with every required field present.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl TargetConfig {
    /// Check that the required connection fields are set. Runs before any
    /// connection attempt.
    pub fn resolve(&self) -> anyhow::Result<ResolvedTarget> {
        let database = required(&self.database, "database name", "--db-name")?;
        let user = required(&self.user, "username", "--db-user")?;
        let password = required(&self.password, "password", "--db-password")?;
        Ok(ResolvedTarget {
            host: self.host.clone(),
            port: self.port,
            database,
            user,
            password,
        })
    }
}

fn required(value: &Option<String>, what: &str, flag: &str) -> anyhow::Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(anyhow!("missing target {what} (pass {flag})")),
    }
}

impl ResolvedTarget {
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .password(&self.password)
            .application_name("apimigrate");
        cfg
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Take a backup of the target before writing.
    pub enabled: bool,
    /// Output file. A timestamped name in the working directory when unset.
    pub path: Option<PathBuf>,
    /// Dump utility to invoke.
    pub pg_dump_bin: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            pg_dump_bin: "pg_dump".to_string(),
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<MigrateConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(MigrateConfig::default().with_env_overrides());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let parsed: MigrateConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    Ok(parsed.with_env_overrides())
}

impl MigrateConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(host) = env_value("NEWAPI_DB_HOST") {
            self.target.host = host;
        }

        if let Some(port) = env_value("NEWAPI_DB_PORT") {
            match port.parse() {
                Ok(port) => self.target.port = port,
                Err(_) => tracing::warn!(port = %port, "ignoring invalid NEWAPI_DB_PORT"),
            }
        }

        if let Some(name) = env_value("NEWAPI_DB_NAME") {
            self.target.database = Some(name);
        }

        if let Some(user) = env_value("NEWAPI_DB_USER") {
            self.target.user = Some(user);
        }

        if let Some(password) = env_value("NEWAPI_DB_PASSWORD") {
            self.target.password = Some(password);
        }

        self
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
