//! Run configuration: a JSON file with environment fallbacks, resolved once
//! at startup.

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use interpel_adapters::DEFAULT_API_BASE_URL;
use interpel_core::KeyStrategy;
use interpel_notify::{DEFAULT_ICON, DEFAULT_USERNAME};
use interpel_storage::{executable_dir, resolve_data_dir};
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::diff::DiffConfig;

pub const DEFAULT_TERM: &str = "10";
pub const DEFAULT_USER_AGENT: &str = "interpel/0.1 (+https://api.sejm.gov.pl)";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const CONFIG_FILE_NAME: &str = "config.json";

/// On-disk shape of `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sejm_term: Option<String>,
    #[serde(default)]
    pub mps: Vec<RepresentativeEntry>,
    #[serde(default)]
    pub mattermost_webhook_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub bot_username: Option<String>,
    #[serde(default)]
    pub bot_icon: Option<String>,
    #[serde(default)]
    pub dedup_key: Option<KeyStrategy>,
    #[serde(default)]
    pub track_closure: Option<bool>,
}

/// One tracked representative and the chat handles to mention for them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RepresentativeEntry {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub mattermost_users: Option<String>,
}

impl RepresentativeEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            mattermost_users: None,
        }
    }

    pub fn with_mentions(mut self, handles: impl Into<String>) -> Self {
        self.mattermost_users = Some(handles.into());
        self
    }

    /// Identifier if present and non-blank.
    pub fn rep_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub term: String,
    pub representatives: Vec<RepresentativeEntry>,
    pub webhook_url: Option<String>,
    pub data_dir: PathBuf,
    pub api_base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub bot_username: String,
    pub bot_icon: String,
    pub diff: DiffConfig,
}

impl AppConfig {
    /// Load `.env`, read the config file (if any) and apply environment
    /// fallbacks. A missing file is not an error; an unreadable one is.
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            info!(path = %path.display(), "loaded .env");
        }

        let explicit = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("INTERPEL_CONFIG").map(PathBuf::from));
        if let Some(path) = explicit.as_deref() {
            ensure!(path.exists(), "config file {} does not exist", path.display());
        }
        let path = explicit.unwrap_or_else(|| executable_dir().join(CONFIG_FILE_NAME));

        let file = read_config_file(&path)?;
        Ok(Self::resolve(file, |key| std::env::var(key).ok(), data_dir))
    }

    /// Merge the config file with environment lookups. `env` is injected so
    /// resolution stays deterministic in tests.
    pub fn resolve(
        file: Option<ConfigFile>,
        env: impl Fn(&str) -> Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let file = file.unwrap_or_default();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let representatives = if file.mps.is_empty() {
            match env("MP_ID") {
                Some(id) => vec![RepresentativeEntry::new(id.trim())],
                None => Vec::new(),
            }
        } else {
            file.mps
        };

        let data_dir = data_dir
            .or(file.data_dir)
            .or_else(|| env("INTERPEL_DATA_DIR").map(PathBuf::from));

        Self {
            term: file
                .sejm_term
                .or_else(|| env("SEJM_TERM"))
                .unwrap_or_else(|| DEFAULT_TERM.to_string()),
            representatives,
            webhook_url: file
                .mattermost_webhook_url
                .filter(|url| !url.trim().is_empty())
                .or_else(|| env("MATTERMOST_WEBHOOK_URL")),
            data_dir: resolve_data_dir(data_dir.as_deref()),
            api_base_url: file
                .api_base_url
                .or_else(|| env("SEJM_API_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            user_agent: file
                .user_agent
                .or_else(|| env("INTERPEL_USER_AGENT"))
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: file
                .http_timeout_secs
                .or_else(|| env("INTERPEL_HTTP_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()))
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            bot_username: file.bot_username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            bot_icon: file.bot_icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            diff: DiffConfig {
                key_strategy: file.dedup_key.unwrap_or_default(),
                track_closure: file.track_closure.unwrap_or(false),
            },
        }
    }

    /// Fails when no tracked representative has a usable id.
    pub fn validate(&self) -> Result<()> {
        if self.representatives.iter().all(|entry| entry.rep_id().is_none()) {
            bail!("no representatives configured: add `mps` to the config file or set MP_ID");
        }
        Ok(())
    }
}

pub fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found; using environment only");
            return Ok(None);
        }
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", path.display()));
        }
    };
    let file = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), "loaded config file");
    Ok(Some(file))
}

/// Ids and terms show up both as `"10"` and `10`.
fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Raw::Int(n)) => Some(n.to_string()),
        None => None,
    })
}
