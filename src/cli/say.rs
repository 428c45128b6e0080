//! One-shot "say" command: ask a single question and print the answer.

use std::error::Error;
use std::io::{self, Write};

use crate::cli::CliContext;
use crate::core::client::{ChatClient, ClientEvent, CommitOutcome, SendOutcome};
use crate::core::message::{LocalMessageId, Message, MessageStatus};
use crate::core::session::STREAM_FAILURE_NOTICE;
use crate::utils::logging::LoggingState;

pub async fn run_say(
    context: &CliContext,
    prompt: Vec<String>,
    no_stream: bool,
    log: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: askdocs say <prompt>");
        std::process::exit(1);
    }

    let logging = LoggingState::new(log)?;
    let mut client = context.client()?;

    let failed = if no_stream {
        let local_id = client.ask(&prompt).await?;
        if let Some(message) = client.store().get(local_id) {
            print_message(message);
        }
        client
            .store()
            .get(local_id)
            .is_some_and(|message| message.status == MessageStatus::Error)
    } else {
        let outcome = client.send(&prompt).await?;
        match outcome {
            SendOutcome::Streaming { .. } => {
                let event = stream_to_stdout(&mut client).await?;
                matches!(event, Some(ClientEvent::Errored))
            }
            SendOutcome::Failed => {
                if let Some(message) = client.store().messages().last() {
                    print_message(message);
                }
                true
            }
        }
    };

    for message in client.store().transcript() {
        logging.log_message(message)?;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the streaming answer as it grows, then its sources. Returns the
/// terminal event.
pub async fn stream_to_stdout(client: &mut ChatClient) -> Result<Option<ClientEvent>, io::Error> {
    let mut stdout = io::stdout();
    let mut printed = 0usize;
    let mut local_id: Option<LocalMessageId> = None;

    while let Some(event) = client.next_event().await {
        if let Some(message) = client.store().in_progress() {
            local_id = Some(message.local_id);
            if let Some(delta) = message.text.get(printed..).filter(|d| !d.is_empty()) {
                write!(stdout, "{delta}")?;
                stdout.flush()?;
                printed = message.text.len();
            }
        }

        if !event.is_terminal() {
            continue;
        }

        let settled = match &event {
            ClientEvent::Completed { local_id, .. } => client.store().get(*local_id),
            _ => local_id.and_then(|id| client.store().get(id)),
        };
        match settled {
            Some(message) if message.status == MessageStatus::Error => {
                if printed > 0 {
                    writeln!(stdout)?;
                }
                eprintln!("❌ {STREAM_FAILURE_NOTICE}");
            }
            Some(message) => {
                if let Some(rest) = message.text.get(printed..) {
                    write!(stdout, "{rest}")?;
                }
                writeln!(stdout)?;
                print_sources(message);
            }
            None => writeln!(stdout)?,
        }

        match &event {
            ClientEvent::Completed {
                commit: CommitOutcome::Failed(err),
                ..
            } => eprintln!("⚠️  Answer was not saved: {err}"),
            ClientEvent::Cancelled => eprintln!("⏹  Stopped"),
            _ => {}
        }
        return Ok(Some(event));
    }
    Ok(None)
}

pub fn print_message(message: &Message) {
    if message.status == MessageStatus::Error {
        eprintln!("❌ {}", message.text);
        return;
    }
    println!("{}", message.text);
    print_sources(message);
}

pub fn print_sources(message: &Message) {
    if message.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (index, source) in message.sources.iter().enumerate() {
        println!("  [{}] {} <{}>", index + 1, source.title, source.url);
    }
}
