use crate::core::config::data::{mask_secret, Config};

fn show(label: &str, value: Option<&String>, fallback: &str) {
    match value {
        Some(value) => println!("  {label}: {value}"),
        None => println!("  {label}: {fallback}"),
    }
}

fn show_secret(label: &str, value: Option<&String>) {
    match value {
        Some(secret) => println!("  {label}: {}", mask_secret(secret)),
        None => println!("  {label}: (unset)"),
    }
}

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        show(
            "backend-url",
            self.backend_url.as_ref(),
            &format!("(default: {})", self.backend_url()),
        );
        show(
            "local-model",
            self.local_model.as_ref(),
            &format!("(default: {})", self.local_model()),
        );
        show("default-provider", self.default_provider.as_ref(), "(default: local)");
        show(
            "default-agent",
            self.default_agent.as_ref(),
            &format!("(default: {})", self.default_agent()),
        );
        show("owner-id", self.owner_id.as_ref(), "(default: local)");
        show_secret("openai-api-key", self.providers.openai.api_key.as_ref());
        show("openai-base-url", self.providers.openai.base_url.as_ref(), "(unset)");
        show("openai-model", self.providers.openai.model.as_ref(), "(unset)");
        show_secret("gemini-api-key", self.providers.gemini.api_key.as_ref());
        show("gemini-base-url", self.providers.gemini.base_url.as_ref(), "(unset)");
        show("gemini-model", self.providers.gemini.model.as_ref(), "(unset)");
        show("storage-url", self.storage.url.as_ref(), "(in-memory)");
        show_secret("storage-api-key", self.storage.api_key.as_ref());
    }
}
