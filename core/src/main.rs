/// ChatSync replay tool - feeds a recorded event script through the synchronizer
use chatsync_core::types::{ChatListSnapshot, Folder, TimelineItem, TimelineSnapshot, UnreadState};
use chatsync_core::{spawn_chat_list, spawn_conversation, Dispatcher, Fixture, MemorySource, SyncConfig};
use colored::*;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let cli = SyncConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let fixture = Fixture::load(&cli.fixture)
        .map_err(|e| anyhow::anyhow!("Cannot read fixture {}: {}", cli.fixture.display(), e))?;

    let folder = cli.folder.map(Folder::new).unwrap_or_else(Folder::main);
    let source = Arc::new(MemorySource::from_fixture(&fixture).await);
    let dispatcher = Dispatcher::new(cli.config.event_buffer);

    info!("Replaying {} events into folder {}", fixture.events.len(), folder);

    let chat_list = spawn_chat_list(folder, &dispatcher, source.clone(), cli.config.clone());
    chat_list.load_initial().await?;
    chat_list.flush().await?;

    let chat_id = cli.chat.or_else(|| chat_list.snapshot().chats.first().map(|c| c.id));
    let conversation = chat_id.map(|id| {
        spawn_conversation(
            id,
            fixture.private_chats.contains(&id),
            &dispatcher,
            source.clone(),
            source.clone(),
            cli.config.clone(),
        )
    });
    if let Some(conversation) = &conversation {
        conversation.load_initial().await?;
        conversation.flush().await?;
    }

    for event in fixture.events {
        dispatcher.publish(event).await;
    }
    chat_list.flush().await?;
    if let Some(conversation) = &conversation {
        conversation.flush().await?;
    }

    print_chat_list(&chat_list.snapshot());
    if let Some(conversation) = conversation {
        print_timeline(&conversation.snapshot());
        conversation.close().await?;
    }
    chat_list.shutdown().await?;

    Ok(())
}

fn print_chat_list(snapshot: &ChatListSnapshot) {
    println!(
        "{} {} (revision {}, {:?})",
        "Chats in".bright_cyan().bold(),
        snapshot.folder.to_string().bright_white().bold(),
        snapshot.revision,
        snapshot.load_state
    );
    for chat in &snapshot.chats {
        let badge = match chat.unread_state {
            UnreadState::None => String::new(),
            UnreadState::Count(n) => format!(" ({})", n).green().to_string(),
            UnreadState::Mention => " @".yellow().bold().to_string(),
            UnreadState::Reaction => " ♥".red().to_string(),
        };
        let pin = if chat.is_pinned { "📌 " } else { "" };
        println!("  {}{}{}", pin, chat.title.bold(), badge);
        if let Some(subtitle) = chat.subtitle() {
            println!("    {}", subtitle.dimmed());
        }
    }
}

fn print_timeline(snapshot: &TimelineSnapshot) {
    println!(
        "{} {} (revision {}, {:?})",
        "Conversation".bright_cyan().bold(),
        snapshot.chat_id,
        snapshot.revision,
        snapshot.load_state
    );
    for item in &snapshot.items {
        match item {
            TimelineItem::DateSeparator { date } => {
                println!("  {}", format!("── {} ──", date).dimmed());
            }
            TimelineItem::Message(message) => {
                let sender = if message.sender.hidden {
                    String::new()
                } else {
                    format!("{}: ", message.sender.name)
                };
                let state = match &message.delivery_state {
                    Some(state) => format!(" [{:?}]", state).cyan().to_string(),
                    None => String::new(),
                };
                println!(
                    "  {} {}{}{}",
                    message.id.to_string().bright_black(),
                    sender.bold(),
                    message.content.preview_text(),
                    state
                );
            }
        }
    }
}
