use crate::core::config::data::{
    Config, HostedProviderConfig, DEFAULT_AGENT, DEFAULT_BACKEND_URL, DEFAULT_LOCAL_MODEL,
    DEFAULT_OWNER_ID,
};
use crate::core::config::io::ConfigError;
use crate::core::providers::hosted::{
    HostedSettings, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, DEFAULT_OPENAI_BASE_URL,
    DEFAULT_OPENAI_MODEL,
};

/// Keys accepted by `askdocs set`.
pub const SETTABLE_KEYS: [&str; 13] = [
    "backend-url",
    "local-model",
    "default-provider",
    "default-agent",
    "owner-id",
    "openai-api-key",
    "openai-base-url",
    "openai-model",
    "gemini-api-key",
    "gemini-base-url",
    "gemini-model",
    "storage-url",
    "storage-api-key",
];

/// Environment variables that override file values, and the key each one
/// overrides.
pub const ENV_OVERRIDES: [(&str, &str); 6] = [
    ("ASKDOCS_BACKEND_URL", "backend-url"),
    ("OPENAI_API_KEY", "openai-api-key"),
    ("GEMINI_API_KEY", "gemini-api-key"),
    ("ASKDOCS_STORAGE_URL", "storage-url"),
    ("ASKDOCS_STORAGE_KEY", "storage-api-key"),
    ("ASKDOCS_OWNER_ID", "owner-id"),
];

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn hosted_settings(
    config: &HostedProviderConfig,
    default_base_url: &str,
    default_model: &str,
) -> Option<HostedSettings> {
    let api_key = non_empty(&config.api_key)?;
    Some(HostedSettings {
        api_key: api_key.to_string(),
        base_url: non_empty(&config.base_url)
            .unwrap_or(default_base_url)
            .to_string(),
        model: non_empty(&config.model).unwrap_or(default_model).to_string(),
    })
}

impl Config {
    pub fn backend_url(&self) -> String {
        non_empty(&self.backend_url)
            .unwrap_or(DEFAULT_BACKEND_URL)
            .to_string()
    }

    pub fn local_model(&self) -> String {
        non_empty(&self.local_model)
            .unwrap_or(DEFAULT_LOCAL_MODEL)
            .to_string()
    }

    pub fn default_agent(&self) -> String {
        non_empty(&self.default_agent)
            .unwrap_or(DEFAULT_AGENT)
            .to_string()
    }

    pub fn owner_id(&self) -> String {
        non_empty(&self.owner_id)
            .unwrap_or(DEFAULT_OWNER_ID)
            .to_string()
    }

    /// `None` until an API key is configured.
    pub fn openai_settings(&self) -> Option<HostedSettings> {
        hosted_settings(
            &self.providers.openai,
            DEFAULT_OPENAI_BASE_URL,
            DEFAULT_OPENAI_MODEL,
        )
    }

    pub fn gemini_settings(&self) -> Option<HostedSettings> {
        hosted_settings(
            &self.providers.gemini,
            DEFAULT_GEMINI_BASE_URL,
            DEFAULT_GEMINI_MODEL,
        )
    }

    /// Storage URL and key, when durable storage is configured.
    pub fn storage_endpoint(&self) -> Option<(String, String)> {
        let url = non_empty(&self.storage.url)?;
        let key = non_empty(&self.storage.api_key).unwrap_or_default();
        Some((url.to_string(), key.to_string()))
    }

    fn slot_mut(&mut self, key: &str) -> Result<&mut Option<String>, ConfigError> {
        let slot = match key {
            "backend-url" => &mut self.backend_url,
            "local-model" => &mut self.local_model,
            "default-provider" => &mut self.default_provider,
            "default-agent" => &mut self.default_agent,
            "owner-id" => &mut self.owner_id,
            "openai-api-key" => &mut self.providers.openai.api_key,
            "openai-base-url" => &mut self.providers.openai.base_url,
            "openai-model" => &mut self.providers.openai.model,
            "gemini-api-key" => &mut self.providers.gemini.api_key,
            "gemini-base-url" => &mut self.providers.gemini.base_url,
            "gemini-model" => &mut self.providers.gemini.model,
            "storage-url" => &mut self.storage.url,
            "storage-api-key" => &mut self.storage.api_key,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        };
        Ok(slot)
    }

    /// Set `key` to `value`; an empty value unsets it.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let slot = self.slot_mut(key)?;
        *slot = if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        };
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (variable, key) in ENV_OVERRIDES {
            let Some(value) = lookup(variable).filter(|value| !value.trim().is_empty()) else {
                continue;
            };
            if let Ok(slot) = self.slot_mut(key) {
                *slot = Some(value.trim().to_string());
            }
        }
    }
}
