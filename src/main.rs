use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use rust_chat_sync::chat::{SessionController, TypingState};
use rust_chat_sync::common::{Conversation, DeliveryState, Message, SessionCommand, SessionUpdate, User};
use rust_chat_sync::config::{self, AppConfig};
use rust_chat_sync::error::SyncError;
use rust_chat_sync::network::{HttpChatApi, SocketChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "rust_chat_sync",
    version,
    about = "Terminal client for a real-time chat server"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Server base URL, e.g. http://localhost:5000
    #[arg(long, value_name = "URL")]
    server: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    user_name: Option<String>,
    /// Bearer token for the REST routes
    #[arg(long)]
    token: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(user_id) = &self.user_id {
            config.user_id = user_id.clone();
        }
        if let Some(user_name) = &self.user_name {
            config.user_name = user_name.clone();
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let mut app_config = config::load_config(&cli.config);
    app_config.apply_env();
    cli.apply(&mut app_config);

    if app_config.user_id.is_empty() {
        return Err("no user id configured (use --user-id or CHAT_USER_ID)".into());
    }
    let name = if app_config.user_name.is_empty() {
        app_config.user_id.clone()
    } else {
        app_config.user_name.clone()
    };
    let me = User::new(app_config.user_id.clone(), name);

    let channel = SocketChannel::connect(app_config.socket_options())
        .await
        .map_err(SyncError::from)?;
    let api = Arc::new(HttpChatApi::new(
        app_config.server_url.clone(),
        app_config.token.clone(),
    ));
    log::info!("Connected to {} as {}", app_config.server_url, me.id);

    // 1. Tạo các kênh giao tiếp (Channels)
    // Terminal -> Session
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Tầng mạng + kết quả bất đồng bộ -> Session
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    // Session -> Terminal
    let (update_tx, mut update_rx) = mpsc::unbounded_channel();

    let controller = SessionController::new(channel, api, me.clone(), app_config.sync_settings(), event_tx)
        .with_updates(update_tx);
    // 2. Khởi chạy Session (chạy ngầm)
    let session = tokio::spawn(controller.run(cmd_rx, event_rx));

    tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            print_update(&me, &update);
        }
    });

    // 3. Đọc lệnh từ stdin
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };
        let quit = matches!(command, SessionCommand::Shutdown);
        if cmd_tx.send(command).await.is_err() || quit {
            break;
        }
    }

    drop(cmd_tx);
    session.await?;
    Ok(())
}

fn parse_command(line: &str) -> Option<SessionCommand> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let (head, arg) = match line.split_once(' ') {
        Some((head, arg)) => (head, arg.trim()),
        None => (line, ""),
    };
    let command = match head {
        "/open" if !arg.is_empty() => SessionCommand::Select(Conversation::from_id(arg)),
        "/close" => SessionCommand::Clear,
        "/retry" if !arg.is_empty() => SessionCommand::Retry(arg.to_string()),
        "/delete" if !arg.is_empty() => SessionCommand::Delete(arg.to_string()),
        "/typing" => SessionCommand::Keystroke,
        "/quit" => SessionCommand::Shutdown,
        "/open" | "/retry" | "/delete" => {
            eprintln!("usage: {head} <id>");
            return None;
        }
        _ => SessionCommand::Send(line.to_string()),
    };
    Some(command)
}

fn print_update(me: &User, update: &SessionUpdate) {
    match update {
        SessionUpdate::Phase(phase) => println!("-- {phase:?}"),
        SessionUpdate::Timeline {
            conversation_id,
            messages,
        } => {
            println!("== chat {conversation_id} ({} messages)", messages.len());
            for message in messages {
                println!("{}", format_message(me, message));
            }
        }
        SessionUpdate::Notifications(entries) => {
            if let Some(latest) = entries.last() {
                println!(
                    "** {} unread; latest in {} from {}: {}",
                    entries.len(),
                    latest.conversation_id,
                    latest.message.sender_name(),
                    latest.message.content
                );
            }
        }
        SessionUpdate::Typing(TypingState::PeerTyping) => println!("-- typing..."),
        SessionUpdate::Typing(TypingState::Idle) => {}
        SessionUpdate::Error(err) => eprintln!("error: {err}"),
    }
}

fn format_message(me: &User, message: &Message) -> String {
    let who = if message.sender_id() == me.id {
        "you"
    } else {
        message.sender_name()
    };
    let status = match message.delivery_state {
        DeliveryState::Pending => "sending".to_string(),
        DeliveryState::Failed => format!(
            "failed, /retry {}",
            message.client_ref.as_deref().unwrap_or("?")
        ),
        DeliveryState::Sent if message.seen => "seen".to_string(),
        DeliveryState::Sent => "sent".to_string(),
    };
    let id = message.id.as_deref().unwrap_or("-");
    format!(
        "[{}] {who}: {} ({status}; {id})",
        message.created_at.format("%H:%M"),
        message.content
    )
}
