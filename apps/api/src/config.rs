use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Only malformed values are fatal; everything has a default or is optional.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres catalog. Unset means the in-memory catalog.
    pub database_url: Option<String>,
    /// Enables resume parsing. Unset means `parse-resume` answers 503.
    pub anthropic_api_key: Option<String>,
    pub llm_model: String,
    /// Root of statically served files; templates live under `templates/`.
    pub public_dir: PathBuf,
    /// Root for temporary uploads and generated archives.
    pub uploads_dir: PathBuf,
    pub max_template_upload_bytes: usize,
    pub download_ttl: Duration,
    pub download_sweep_interval: Duration,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            llm_model: optional_env("LLM_MODEL")
                .unwrap_or_else(|| crate::llm_client::DEFAULT_MODEL.to_string()),
            public_dir: optional_env("PUBLIC_DIR")
                .unwrap_or_else(|| "public".to_string())
                .into(),
            uploads_dir: optional_env("UPLOADS_DIR")
                .unwrap_or_else(|| "uploads".to_string())
                .into(),
            max_template_upload_bytes: parse_env("MAX_TEMPLATE_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            download_ttl: Duration::from_secs(parse_env("DOWNLOAD_TTL_SECS", 86_400)?),
            download_sweep_interval: Duration::from_secs(parse_env(
                "DOWNLOAD_SWEEP_INTERVAL_SECS",
                3_600,
            )?),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Installed templates, served at `/templates`.
    pub fn templates_dir(&self) -> PathBuf {
        self.public_dir.join("templates")
    }

    /// Uploaded template archives awaiting installation.
    pub fn template_uploads_dir(&self) -> PathBuf {
        self.uploads_dir.join("templates")
    }

    /// Generated portfolio archives awaiting download.
    pub fn downloads_dir(&self) -> PathBuf {
        self.uploads_dir.join("portfolios")
    }

    /// Self-contained config rooted at a scratch directory.
    #[cfg(test)]
    pub fn for_root(root: &std::path::Path) -> Self {
        Config {
            database_url: None,
            anthropic_api_key: None,
            llm_model: crate::llm_client::DEFAULT_MODEL.to_string(),
            public_dir: root.join("public"),
            uploads_dir: root.join("uploads"),
            max_template_upload_bytes: 1024 * 1024,
            download_ttl: Duration::from_secs(60),
            download_sweep_interval: Duration::from_secs(60),
            port: 0,
            rust_log: "debug".to_string(),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}
