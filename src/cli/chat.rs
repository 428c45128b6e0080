//! Interactive line-based chat.
//!
//! Plain lines are sent as streaming queries. Lines starting with `/` are
//! commands. Ctrl+C stops an answer mid-stream, and quits when idle.

use std::error::Error;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::say::{print_message, stream_to_stdout};
use crate::cli::CliContext;
use crate::core::client::{ChatClient, ChatError, SendOutcome};
use crate::core::config::data::KNOWN_AGENTS;
use crate::core::message::Sender;
use crate::core::providers::ProviderId;
use crate::utils::logging::LoggingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Empty,
    Query(&'a str),
    Command { name: &'a str, args: &'a str },
}

pub fn parse_input(line: &str) -> ReplInput<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }
    if !line.starts_with('/') {
        return ReplInput::Query(line);
    }
    let (name, args) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    ReplInput::Command {
        name,
        args: args.trim(),
    }
}

enum CommandResult {
    Continue,
    Exit,
}

struct ChatRepl<'a> {
    context: &'a CliContext,
    client: ChatClient,
    logging: LoggingState,
    /// Finalized messages already written to the transcript.
    logged: usize,
}

pub async fn run_chat(context: &CliContext, log: Option<String>) -> Result<(), Box<dyn Error>> {
    let mut repl = ChatRepl {
        context,
        client: context.client()?,
        logging: LoggingState::new(log)?,
        logged: 0,
    };
    repl.run().await
}

impl ChatRepl<'_> {
    async fn run(&mut self) -> Result<(), Box<dyn Error>> {
        let quit = CancellationToken::new();
        let watcher = spawn_interrupt_watcher(&self.client, quit.clone());

        self.print_welcome();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                _ = quit.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };

            match parse_input(&line) {
                ReplInput::Empty => continue,
                ReplInput::Query(query) => self.stream_turn(query).await?,
                ReplInput::Command { name, args } => {
                    if let CommandResult::Exit = self.handle_command(name, args).await? {
                        break;
                    }
                }
            }

            if quit.is_cancelled() {
                break;
            }
        }

        watcher.abort();
        println!("Bye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!(
            "askdocs: asking {} with {} (type /help for commands)",
            self.client.agent(),
            self.client.provider_id().display_name()
        );
        if !self.context.durable {
            println!("Conversations are kept in memory for this session only.");
        }
        if self.logging.is_active() {
            println!("Transcript: {}", self.logging.get_status_string());
        }
    }

    async fn stream_turn(&mut self, query: &str) -> Result<(), Box<dyn Error>> {
        match self.client.send(query).await {
            Ok(SendOutcome::Streaming { .. }) => {
                stream_to_stdout(&mut self.client).await?;
            }
            Ok(SendOutcome::Failed) => {
                if let Some(message) = self.client.store().messages().last() {
                    print_message(message);
                }
            }
            Err(err) => report(&err),
        }
        self.flush_transcript();
        Ok(())
    }

    async fn single_shot_turn(&mut self, query: &str) {
        match self.client.ask(query).await {
            Ok(local_id) => {
                if let Some(message) = self.client.store().get(local_id) {
                    print_message(message);
                }
            }
            Err(err) => report(&err),
        }
        self.flush_transcript();
    }

    /// Append newly finalized messages to the transcript file.
    fn flush_transcript(&mut self) {
        let messages = self.client.store().messages();
        for message in messages.iter().skip(self.logged) {
            if let Err(err) = self.logging.log_message(message) {
                warn!(error = %err, "transcript write failed");
            }
        }
        self.logged = messages.len();
    }

    async fn handle_command(
        &mut self,
        name: &str,
        args: &str,
    ) -> Result<CommandResult, Box<dyn Error>> {
        match name {
            "/quit" | "/exit" | "/q" => return Ok(CommandResult::Exit),
            "/help" | "/h" | "/?" => print_help(),
            "/new" => match self.client.new_conversation() {
                Ok(()) => {
                    self.logged = 0;
                    println!("Started a new conversation.");
                }
                Err(err) => report(&err),
            },
            "/list" => match self.client.synchronizer().list_conversations().await {
                Ok(conversations) if conversations.is_empty() => {
                    println!("No stored conversations.")
                }
                Ok(conversations) => {
                    for conversation in conversations {
                        println!(
                            "{}  {}  [{}]",
                            conversation.remote_id.as_deref().unwrap_or("-"),
                            conversation.name,
                            conversation.agent
                        );
                    }
                }
                Err(err) => eprintln!("❌ {err}"),
            },
            "/load" => {
                if args.is_empty() {
                    println!("Usage: /load <conversation-id>");
                } else {
                    match self.client.load_conversation(args).await {
                        Ok(()) => {
                            self.logged = self.client.store().messages().len();
                            self.print_history();
                        }
                        Err(err) => report(&err),
                    }
                }
            }
            "/delete" => {
                let result = if args.is_empty() {
                    self.client.delete_current().await
                } else {
                    self.client.delete_conversation(args).await
                };
                match result {
                    Ok(()) => {
                        self.logged = self.logged.min(self.client.store().messages().len());
                        println!("Deleted.");
                    }
                    Err(err) => report(&err),
                }
            }
            "/ask" => {
                if args.is_empty() {
                    println!("Usage: /ask <question>");
                } else {
                    self.single_shot_turn(args).await;
                }
            }
            "/provider" => {
                if args.is_empty() {
                    println!("Current provider: {}", self.client.provider_id());
                } else {
                    match args.parse::<ProviderId>() {
                        Ok(id) => match self.client.set_provider(id) {
                            Ok(()) => println!("Now answering with {}.", id.display_name()),
                            Err(err) => report(&err),
                        },
                        Err(err) => eprintln!("❌ {err}"),
                    }
                }
            }
            "/agent" => {
                if args.is_empty() {
                    println!(
                        "Current agent: {} (known: {})",
                        self.client.agent(),
                        KNOWN_AGENTS.join(", ")
                    );
                } else {
                    match self.client.set_agent(args) {
                        Ok(()) => println!("Now asking {args}."),
                        Err(err) => report(&err),
                    }
                }
            }
            "/log" => {
                if args.is_empty() {
                    println!("Transcript: {}", self.logging.get_status_string());
                } else {
                    match self.logging.set_log_file(args.to_string()) {
                        Ok(status) => println!("{status}"),
                        Err(err) => eprintln!("❌ {err}"),
                    }
                }
            }
            _ => {
                println!("Unknown command: {name}");
                println!("Type /help for available commands");
            }
        }
        Ok(CommandResult::Continue)
    }

    fn print_history(&self) {
        let conversation = self.client.conversation();
        println!("── {} [{}]", conversation.name, conversation.agent);
        for message in self.client.store().messages() {
            match message.sender {
                Sender::User => println!("> {}", message.text),
                Sender::Bot => print_message(message),
            }
        }
    }
}

/// Ctrl+C stops the stream in flight, or asks the loop to exit when idle.
fn spawn_interrupt_watcher(
    client: &ChatClient,
    quit: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let handle = client.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !handle.interrupt() {
                quit.cancel();
                break;
            }
        }
    })
}

fn report(err: &ChatError) {
    match err {
        ChatError::Busy => eprintln!("⏳ {err}"),
        _ => eprintln!("❌ {err}"),
    }
}

fn print_help() {
    println!();
    println!("Commands:");
    println!("  /help, /h, /?        - Show this help");
    println!("  /ask <question>      - Ask without streaming");
    println!("  /new                 - Start a new conversation");
    println!("  /list                - List stored conversations");
    println!("  /load <id>           - Open a stored conversation");
    println!("  /delete [id]         - Delete a conversation (default: current)");
    println!("  /provider [name]     - Show or switch provider (local, openai, gemini)");
    println!("  /agent [name]        - Show or switch the retrieval index");
    println!("  /log [file]          - Show or set the transcript file");
    println!("  /quit, /exit, /q     - Exit");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_input(""), ReplInput::Empty);
        assert_eq!(parse_input("   \t"), ReplInput::Empty);
    }

    #[test]
    fn plain_lines_are_queries() {
        assert_eq!(
            parse_input("  how do I use middleware?  "),
            ReplInput::Query("how do I use middleware?")
        );
    }

    #[test]
    fn slash_lines_split_into_command_and_args() {
        assert_eq!(
            parse_input("/load chat-12"),
            ReplInput::Command {
                name: "/load",
                args: "chat-12"
            }
        );
        assert_eq!(
            parse_input("/ask   what is   routing "),
            ReplInput::Command {
                name: "/ask",
                args: "what is   routing"
            }
        );
        assert_eq!(
            parse_input("/quit"),
            ReplInput::Command {
                name: "/quit",
                args: ""
            }
        );
    }
}
