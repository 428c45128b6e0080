//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod history;
pub mod provider_list;
pub mod say;

use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::chat::run_chat;
use crate::cli::history::{run_delete, run_history};
use crate::cli::provider_list::list_providers;
use crate::cli::say::run_say;
use crate::core::client::ChatClient;
use crate::core::config::data::{path_display, Config};
use crate::core::config::defaults::SETTABLE_KEYS;
use crate::core::config::io::ConfigError;
use crate::core::persistence::{
    ChatStorage, MemoryStorage, PersistenceSynchronizer, RestChatStorage,
};
use crate::core::providers::{ProviderId, ProviderRegistry, ProviderSettings};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "askdocs", version, long_version = LONG_VERSION)]
#[command(about = "Ask documentation-grounded questions from the terminal")]
#[command(
    long_about = "askdocs sends questions to a retrieval-augmented generation backend and \
streams the answer, with its cited sources, into the terminal. Conversations are \
stored through a PostgREST-compatible API when one is configured.\n\n\
Environment Variables:\n\
  ASKDOCS_BACKEND_URL   Base URL of the local inference backend\n\
  OPENAI_API_KEY        API key for the openai provider\n\
  GEMINI_API_KEY        API key for the gemini provider\n\
  ASKDOCS_STORAGE_URL   Base URL of the chat storage API\n\
  ASKDOCS_STORAGE_KEY   API key for the chat storage API\n\
  ASKDOCS_OWNER_ID      Owner id that scopes stored conversations\n\
  ASKDOCS_LOG           Diagnostic log filter (default: warn)\n\n\
Controls:\n\
  Enter             Send the message\n\
  Ctrl+C            Stop the answer being streamed, or quit when idle"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Provider to answer with: local, openai or gemini
    #[arg(short = 'p', long, global = true, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Retrieval index to query (e.g. nextjs, flutter, crust_data)
    #[arg(short = 'a', long, global = true, value_name = "AGENT")]
    pub agent: Option<String>,

    /// Append a plain-text transcript to the specified file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,

    /// Keep conversations in memory instead of the configured storage
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Ask one question and print the answer
    Say {
        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
        /// The question to ask
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List stored conversations, or print one
    History {
        /// Conversation id to print
        id: Option<String>,
    },
    /// Delete a stored conversation and its messages
    Delete {
        /// Conversation id to delete
        id: String,
    },
    /// List providers and whether they are configured
    Providers,
    /// Set a configuration value (an empty value unsets it)
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
}

/// Everything a command needs, resolved from config and flags.
pub struct CliContext {
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub provider_id: ProviderId,
    pub agent: String,
    pub sync: PersistenceSynchronizer,
    pub durable: bool,
}

impl CliContext {
    pub fn build(args: &Args, config: Config) -> Result<Self, Box<dyn Error>> {
        let provider_id: ProviderId = args
            .provider
            .as_deref()
            .or(config.default_provider.as_deref())
            .unwrap_or("local")
            .parse()?;
        let agent = args
            .agent
            .clone()
            .unwrap_or_else(|| config.default_agent());

        let client = reqwest::Client::new();
        let registry = Arc::new(ProviderRegistry::new(
            client.clone(),
            ProviderSettings::from_config(&config),
        ));

        let endpoint = if args.offline {
            None
        } else {
            config.storage_endpoint()
        };
        let durable = endpoint.is_some();
        let storage: Arc<dyn ChatStorage> = match endpoint {
            Some((url, key)) => {
                debug!(%url, "using remote chat storage");
                Arc::new(RestChatStorage::new(client, url, key))
            }
            None => Arc::new(MemoryStorage::new()),
        };
        let sync = PersistenceSynchronizer::new(storage, config.owner_id());

        Ok(Self {
            config,
            registry,
            provider_id,
            agent,
            sync,
            durable,
        })
    }

    pub fn client(&self) -> Result<ChatClient, Box<dyn Error>> {
        Ok(ChatClient::new(
            Arc::clone(&self.registry),
            self.provider_id,
            self.agent.clone(),
            self.sync.clone(),
        )?)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ASKDOCS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let mut args = Args::parse();
    let command = args.command.take().unwrap_or(Commands::Chat);

    if let Commands::Set { key, value } = &command {
        return run_set(key.as_deref(), &value.join(" "));
    }

    let context = CliContext::build(&args, Config::load()?)?;
    match command {
        Commands::Chat => run_chat(&context, args.log).await,
        Commands::Say { no_stream, prompt } => {
            run_say(&context, prompt, no_stream, args.log).await
        }
        Commands::History { id } => run_history(&context, id.as_deref()).await,
        Commands::Delete { id } => run_delete(&context, &id).await,
        Commands::Providers => {
            list_providers(&context);
            Ok(())
        }
        Commands::Set { .. } => Ok(()),
    }
}

fn run_set(key: Option<&str>, value: &str) -> Result<(), Box<dyn Error>> {
    let config_path = Config::get_config_path()?;
    let mut config = Config::load_from_path(&config_path)?;

    let Some(key) = key else {
        config.print_all();
        return Ok(());
    };

    match config.set_value(key, value) {
        Ok(()) => {}
        Err(err @ ConfigError::UnknownKey(_)) => {
            eprintln!("{err}");
            eprintln!("Available keys: {}", SETTABLE_KEYS.join(", "));
            std::process::exit(2);
        }
        Err(err) => return Err(err.into()),
    }
    config.save_to_path(&config_path)?;

    if value.trim().is_empty() {
        println!("✅ Unset {key} in {}", path_display(&config_path));
    } else {
        println!("✅ Set {key} in {}", path_display(&config_path));
    }
    Ok(())
}
