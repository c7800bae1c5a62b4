//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments and drives the data layer: it
//! is the thin presentation shim in front of the session, transport, and
//! auth components.

use std::error::Error;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::api::client::ApiClient;
use crate::api::{AppleAuthData, ChatChunk, GoogleAuthData, NewConfiguration};
use crate::auth::store::KeyringStore;
use crate::auth::SessionEvent;
use crate::core::attachments::AttachmentList;
use crate::core::chat_stream::{ChatStreamService, StreamEvent, StreamParams};
use crate::core::config::Config;
use crate::core::conversation::{ChatSession, TurnEffect};
use crate::core::jobs::{spawn_job_poll, JobEvent};
use crate::core::message::{ChatDetails, Message, Role};

#[derive(Parser)]
#[command(name = "sidekik")]
#[command(about = "Terminal client for the Sidekik chat backend")]
#[command(
    long_about = "Sidekik is a terminal client for the Sidekik chat backend. It streams \
replies token by token, uploads attachments, and keeps your session alive by \
refreshing the access token transparently.\n\n\
Environment Variables:\n\
  SIDEKIK_BASE_URL  Backend base URL (overrides the config file)\n\
  RUST_LOG          Diagnostic log filter (e.g. sidekik=debug)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Backend base URL (overrides SIDEKIK_BASE_URL and the config file)
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with an identity provider
    Login {
        #[command(subcommand)]
        provider: LoginProvider,
    },
    /// Invalidate the session and clear stored tokens
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List conversations
    Chats,
    /// Print one conversation's history
    Show {
        /// Conversation id, as printed by `sidekik chats`
        chat_id: String,
    },
    /// Send a message and stream the reply
    Send {
        /// Message text
        message: String,
        /// Continue an existing conversation instead of starting a new one
        #[arg(long, value_name = "CHAT_ID")]
        chat: Option<String>,
        /// Attach a local file (repeatable)
        #[arg(long, value_name = "PATH")]
        attach: Vec<PathBuf>,
        /// Route the message to the slower reasoning model
        #[arg(long)]
        think: bool,
        /// Attach the saved persona configuration when starting a new conversation
        #[arg(long)]
        with_persona: bool,
    },
    /// Create a persona configuration for new conversations
    Configure {
        /// How the assistant should address you
        #[arg(long)]
        user_name: String,
        /// The assistant's name
        #[arg(long)]
        ai_name: String,
        /// Free-text description of the assistant
        #[arg(long)]
        description: String,
        /// The assistant's role
        #[arg(long)]
        role: String,
    },
}

#[derive(Subcommand)]
pub enum LoginProvider {
    /// Google sign-in, with credentials obtained from the Google SDK
    Google {
        #[arg(long)]
        id_token: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        google_id: String,
        #[arg(long)]
        profile_picture: Option<String>,
    },
    /// Apple sign-in, with credentials obtained from the Apple SDK
    Apple {
        #[arg(long)]
        identity_token: String,
        #[arg(long)]
        authorization_code: String,
        #[arg(long)]
        apple_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load().unwrap_or_else(|err| {
        eprintln!("Warning: {err}");
        Config::default()
    });
    let base_url = config.resolve_base_url(args.base_url.as_deref());

    let (session_tx, mut session_rx) = mpsc::unbounded_channel();
    let api = ApiClient::new(base_url, Arc::new(KeyringStore::new()))
        .with_session_events(session_tx);

    let result = match args.command {
        Commands::Login { provider } => run_login(&api, provider).await,
        Commands::Logout => run_logout(&api).await,
        Commands::Whoami => run_whoami(&api).await,
        Commands::Chats => run_chats(&api).await,
        Commands::Show { chat_id } => run_show(&api, &chat_id).await,
        Commands::Send {
            message,
            chat,
            attach,
            think,
            with_persona,
        } => run_send(&api, &config, message, chat, attach, think, with_persona).await,
        Commands::Configure {
            user_name,
            ai_name,
            description,
            role,
        } => {
            run_configure(
                &api,
                NewConfiguration {
                    user_name,
                    ai_name,
                    description,
                    role,
                },
            )
            .await
        }
    };

    if session_rx.try_recv() == Ok(SessionEvent::Expired) {
        eprintln!("Session expired. Run `sidekik login` to sign in again.");
    }
    result
}

async fn run_login(api: &ApiClient, provider: LoginProvider) -> Result<(), Box<dyn Error>> {
    let response = match provider {
        LoginProvider::Google {
            id_token,
            name,
            email,
            google_id,
            profile_picture,
        } => {
            api.authenticate_with_google(&GoogleAuthData {
                id_token,
                name,
                email,
                google_id,
                profile_picture,
            })
            .await
        }
        LoginProvider::Apple {
            identity_token,
            authorization_code,
            apple_id,
            name,
            email,
        } => {
            api.authenticate_with_apple(&AppleAuthData {
                identity_token,
                authorization_code,
                name,
                email,
                apple_id,
            })
            .await
        }
    };

    let Some(response) = response else {
        return Err("authentication was rejected by the backend".into());
    };
    api.token_manager()
        .store_tokens(&response.access_token, Some(&response.refresh_token))
        .await?;

    let who = response
        .user
        .name
        .or(response.user.email)
        .unwrap_or(response.user.uid);
    println!("Signed in as {who}");
    Ok(())
}

async fn run_logout(api: &ApiClient) -> Result<(), Box<dyn Error>> {
    let tokens = api.token_manager().tokens().await;
    if let Some(access) = &tokens.access {
        if !api.logout(access, tokens.refresh.as_deref()).await {
            eprintln!("Warning: the backend did not acknowledge the logout");
        }
    }
    api.token_manager().clear_tokens().await;
    println!("Signed out");
    Ok(())
}

async fn run_whoami(api: &ApiClient) -> Result<(), Box<dyn Error>> {
    let Some(user) = api.get_current_user().await else {
        return Err("not signed in; run `sidekik login`".into());
    };
    println!(
        "{} ({})",
        user.name.as_deref().unwrap_or(&user.uid),
        user.email.as_deref().unwrap_or("no email")
    );
    Ok(())
}

async fn run_chats(api: &ApiClient) -> Result<(), Box<dyn Error>> {
    let info = api.get_user_info().await;
    if info.chats.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    for chat in info.chats {
        let created = chrono::DateTime::from_timestamp(chat.created_at, 0)
            .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{}  {}  {}", chat.id, created, chat.title);
    }
    Ok(())
}

async fn run_show(api: &ApiClient, chat_id: &str) -> Result<(), Box<dyn Error>> {
    let Some(details) = api.get_chat_details(chat_id).await else {
        return Err(format!("conversation {chat_id} could not be loaded").into());
    };
    println!("# {}", details.title);
    for message in details.messages.iter().filter(|m| m.is_renderable()) {
        print_message(message, &details);
    }
    Ok(())
}

fn print_message(message: &Message, details: &ChatDetails) {
    let speaker = match message.role {
        Role::User => details
            .configuration
            .as_ref()
            .map(|c| c.user_name.as_str())
            .unwrap_or("You"),
        _ => details
            .configuration
            .as_ref()
            .map(|c| c.ai_name.as_str())
            .unwrap_or("Sidekik"),
    };
    println!();
    println!("{speaker}:");
    if !message.content.is_empty() {
        println!("{}", message.content);
    }
    if let Some(url) = &message.image_url {
        println!("[image] {url}");
    }
    if !message.attachment_ids.is_empty() {
        println!("[{} attachment(s)]", message.attachment_ids.len());
    }
}

async fn run_configure(
    api: &ApiClient,
    configuration: NewConfiguration,
) -> Result<(), Box<dyn Error>> {
    let Some(created) = api.create_configuration(&configuration).await else {
        return Err("the backend rejected the configuration".into());
    };
    println!(
        "Saved configuration {} ({} / {})",
        created.id, created.user_name, created.ai_name
    );
    println!("Pass --with-persona to `sidekik send` to use it in new conversations.");
    Ok(())
}

async fn run_send(
    api: &ApiClient,
    config: &Config,
    message: String,
    chat: Option<String>,
    attach: Vec<PathBuf>,
    think: bool,
    with_persona: bool,
) -> Result<(), Box<dyn Error>> {
    let mut session = ChatSession::new();
    let info = api.get_user_info().await;
    session.set_chats(info.chats);
    session.set_configuration(info.configuration);
    session.enable_configuration(with_persona || config.use_configuration.unwrap_or(false));

    if let Some(chat_id) = chat {
        let Some(details) = api.get_chat_details(&chat_id).await else {
            return Err(format!("conversation {chat_id} could not be loaded").into());
        };
        session.open_chat(details);
    }

    let mut attachments = AttachmentList::new();
    if !attach.is_empty() {
        upload_attachments(api, &mut attachments, attach).await;
        for attachment in attachments.items() {
            if let Some(err) = &attachment.error {
                eprintln!("Attachment {} failed and is left out: {err}", attachment.name);
            }
        }
    }

    let think = think || config.think_model.unwrap_or(false);
    let (request, mut turn) = session.begin_turn(message, attachments.ready_file_ids(), think);

    let (stream, mut stream_rx) = ChatStreamService::new();
    let stream_id = 1;
    stream.spawn_stream(StreamParams {
        client: api.http_client().clone(),
        base_url: api.base_url().to_string(),
        tokens: api.token_manager().clone(),
        request,
        stream_id,
    });

    let (job_tx, mut job_rx) = mpsc::unbounded_channel();
    let mut open_jobs = 0_u32;
    let mut streaming = true;
    let mut stdout = std::io::stdout();

    while streaming || open_jobs > 0 {
        tokio::select! {
            event = stream_rx.recv(), if streaming => {
                let Some((event, id)) = event else {
                    streaming = false;
                    continue;
                };
                if id != stream_id {
                    continue;
                }
                match event {
                    StreamEvent::Chunk(chunk) => {
                        match &chunk {
                            ChatChunk::Content(delta) => {
                                print!("{delta}");
                                stdout.flush()?;
                            }
                            ChatChunk::BackgroundProcessing(status)
                            | ChatChunk::Generation { message: status, .. } => {
                                eprintln!("[{status}]");
                            }
                            _ => {}
                        }
                        if let Some(TurnEffect::StartGenerationPoll(generation_id)) =
                            session.apply_chunk(&mut turn, chunk)
                        {
                            open_jobs += 1;
                            spawn_job_poll(api.clone(), generation_id, job_tx.clone());
                        }
                    }
                    StreamEvent::Done => {
                        streaming = false;
                    }
                    StreamEvent::Error(message) => {
                        eprintln!("Stream error: {message}");
                        streaming = false;
                    }
                }
            }
            Some(event) = job_rx.recv(), if open_jobs > 0 => {
                open_jobs -= 1;
                match event {
                    JobEvent::Resolved { url, .. } => {
                        session.resolve_generation(url.clone());
                        println!("[image] {url}");
                    }
                    JobEvent::GaveUp { generation_id } => {
                        session.clear_background_status();
                        eprintln!("Generation {generation_id} did not finish in time");
                    }
                }
            }
        }
    }
    println!();

    if let Some(err) = session.error() {
        eprintln!("Error: {err}");
    }
    Ok(())
}

async fn upload_attachments(api: &ApiClient, attachments: &mut AttachmentList, paths: Vec<PathBuf>) {
    let (upload_tx, mut upload_rx) = mpsc::unbounded_channel();
    for path in paths {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mime_type = guess_mime_type(&path);
        let size = tokio::fs::metadata(&path).await.ok().map(|meta| meta.len());
        let id = attachments.add(path, name, mime_type, size);
        attachments.begin_upload(&id, api, upload_tx.clone());
    }
    drop(upload_tx);
    while !attachments.all_settled() {
        let Some(event) = upload_rx.recv().await else {
            break;
        };
        attachments.apply(event);
    }
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types_cover_the_common_mobile_formats() {
        assert_eq!(guess_mime_type(Path::new("a/photo.JPG")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("scan.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("blob")), "application/octet-stream");
    }
}
