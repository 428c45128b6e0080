use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.1";
pub const DEFAULT_AGENT: &str = "nextjs";
pub const DEFAULT_OWNER_ID: &str = "local";

/// Retrieval indexes the reference backend serves.
pub const KNOWN_AGENTS: [&str; 3] = ["crust_data", "nextjs", "flutter"];

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct HostedProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: HostedProviderConfig,
    #[serde(default)]
    pub gemini: HostedProviderConfig,
}

/// Durable chat storage. Without a URL the client keeps history in memory.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the local inference backend
    pub backend_url: Option<String>,
    /// Model label recorded for conversations answered by the local backend
    pub local_model: Option<String>,
    /// Provider id used when `--provider` is not given ("local", "openai", "gemini")
    pub default_provider: Option<String>,
    /// Retrieval index queried by default (e.g. "nextjs")
    pub default_agent: Option<String>,
    /// Opaque id that scopes stored conversations
    pub owner_id: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

/// Show only enough of a secret to tell keys apart.
pub fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
