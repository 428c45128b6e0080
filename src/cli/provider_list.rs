use crate::cli::CliContext;
use crate::core::config::data::KNOWN_AGENTS;
use crate::core::providers::ProviderId;

pub fn list_providers(context: &CliContext) {
    println!("Providers:\n");
    println!("  {:<8} {:<26} {:<16} Configured", "Id", "Name", "Model");

    let settings = context.registry.settings();
    for id in ProviderId::ALL {
        let model = match id {
            ProviderId::Local => Some(settings.local_model.as_str()),
            ProviderId::OpenAi => settings.openai.as_ref().map(|s| s.model.as_str()),
            ProviderId::Gemini => settings.gemini.as_ref().map(|s| s.model.as_str()),
        };
        let marker = if id == context.provider_id { "*" } else { " " };
        let configured = if context.registry.is_configured(id) {
            "✅"
        } else {
            "❌"
        };
        println!(
            "{marker} {:<8} {:<26} {:<16} {configured}",
            id.as_str(),
            id.display_name(),
            model.unwrap_or("-")
        );
    }

    println!("\n* = selected provider");
    println!("Local backend: {}", settings.backend_url);
    println!("Known agents: {}", KNOWN_AGENTS.join(", "));
}
