#![forbid(unsafe_code)]

//! Runtime configuration shared by the streamgate binaries.
//!
//! Values are resolved with a fixed precedence: explicit CLI overrides, then
//! process environment variables, then the `.env` file, then defaults. The
//! signing secret has no default and must be identical across every instance
//! of a deployment, otherwise tokens minted by one instance fail verification
//! on another.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_CATALOG_DB: &str = "catalog.db";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub catalog_db: PathBuf,
    pub signing_secret: String,
    pub cdn_base_url: Option<String>,
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub catalog_db: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let signing_secret = lookup_value("STREAMGATE_SECRET", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("STREAMGATE_SECRET not set"))?;

    let cdn_base_url = lookup_value("STREAMGATE_CDN_BASE", file_vars, &env_lookup)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty());

    let catalog_db = overrides
        .catalog_db
        .or_else(|| lookup_value("STREAMGATE_DB", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_DB));

    let port = overrides
        .port
        .or_else(|| {
            lookup_value("STREAMGATE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("STREAMGATE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    Ok(RuntimeConfig {
        catalog_db,
        signing_secret,
        cdn_base_url,
        port,
        host,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Parses a `.env`-style file into a key/value map. Missing files are treated
/// as empty; `export` prefixes, quoting and comment lines are tolerated.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
