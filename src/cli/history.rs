use std::error::Error;

use crate::cli::say::print_message;
use crate::cli::CliContext;
use crate::core::message::Sender;

pub async fn run_history(context: &CliContext, id: Option<&str>) -> Result<(), Box<dyn Error>> {
    if !context.durable {
        println!("No chat storage is configured; nothing has been saved.");
        println!("Set storage-url and storage-api-key with `askdocs set`.");
        return Ok(());
    }

    let conversations = context.sync.list_conversations().await?;
    let Some(id) = id else {
        if conversations.is_empty() {
            println!("No stored conversations.");
            return Ok(());
        }
        println!("Conversations for {}:\n", context.sync.owner_id());
        for conversation in conversations {
            println!(
                "  {}  {}  [{}, {}]  {}",
                conversation.remote_id.as_deref().unwrap_or("-"),
                conversation.created_at.format("%Y-%m-%d %H:%M"),
                conversation.agent,
                conversation.model,
                conversation.name
            );
        }
        return Ok(());
    };

    let Some(conversation) = conversations
        .iter()
        .find(|c| c.remote_id.as_deref() == Some(id))
    else {
        eprintln!("❌ No conversation with id {id}");
        std::process::exit(1);
    };

    println!("── {} [{}]\n", conversation.name, conversation.agent);
    for message in context.sync.load_history(id).await? {
        match message.sender {
            Sender::User => println!("> {}\n", message.text),
            Sender::Bot => {
                print_message(&message);
                println!();
            }
        }
    }
    Ok(())
}

pub async fn run_delete(context: &CliContext, id: &str) -> Result<(), Box<dyn Error>> {
    if !context.durable {
        eprintln!("❌ No chat storage is configured.");
        std::process::exit(1);
    }
    context.sync.delete_conversation(id).await?;
    println!("✅ Deleted conversation {id}");
    Ok(())
}
