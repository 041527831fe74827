use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use reelio::admin::{AccountStatus, AdminClient, OwnerAccount, PlatformUpdate, PostStatus};
use reelio::api::{ApiClient, CommentTarget, FeedApi};
use reelio::assets::AssetResolver;
use reelio::events::{ClientEvent, ServerEvent};
use reelio::feed::FeedState;
use reelio::metrics::{format_count, MetricKind, MetricsPolicy};
use reelio::models::Message;
use reelio::optimistic::{OptimisticToggle, ToggleTarget};
use reelio::pagination::ReelFeed;
use reelio::session::SessionHolder;
use reelio::socket::{self, EventSink};
use reelio::storage::FileStore;
use reelio::sync::{Confirm, ConversationFilter, ConversationManager, OutgoingMessage};
use reelio::upload::{HttpMediaHost, Passthrough, UploadClient};
use reelio::{ClientConfig, ClientError, Result};

#[derive(Parser)]
#[command(name = "reelio", version, about = "Terminal client for Reelio")]
struct Cli {
    /// Backend origin, e.g. https://api.reelio.app
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Where the session token and watched reels are kept
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Show raw server counts only
    #[arg(long, global = true)]
    real_counts: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Login {
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    Conversations {
        #[arg(long, value_enum, default_value_t = Folder::Primary)]
        folder: Folder,
    },
    /// Opens a conversation. Lines are sent as messages; see /help.
    Chat {
        conversation_id: String,
    },
    Reels {
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Mark every listed reel as watched
        #[arg(long)]
        watch: bool,
    },
    Search {
        query: String,
    },
    /// Lists posts from the home feed and active stories.
    Feed {
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    Stories {
        /// Open this story and report the view
        #[arg(long)]
        view: Option<String>,
    },
    Upload {
        path: PathBuf,
        #[arg(long, default_value = "posts")]
        folder: String,
        /// Send images as they are
        #[arg(long)]
        no_compress: bool,
    },
    Like {
        id: String,
        /// The id is a reel rather than a post
        #[arg(long)]
        reel: bool,
        #[arg(long)]
        undo: bool,
    },
    Save {
        post_id: String,
        #[arg(long)]
        undo: bool,
    },
    Comment {
        id: String,
        text: String,
        #[arg(long)]
        reel: bool,
    },
    Follow {
        user_id: String,
        #[arg(long)]
        undo: bool,
    },
    Admin {
        #[command(subcommand)]
        action: AdminCommand,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    SeedOwner {
        username: String,
        email: String,
        #[arg(long)]
        password: String,
    },
    UserStatus {
        user_id: String,
        #[arg(value_enum)]
        status: AccountArg,
    },
    PostStatus {
        post_id: String,
        #[arg(value_enum)]
        status: PostArg,
    },
    Announce {
        title: String,
        body: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Folder {
    Primary,
    General,
    Requests,
}

#[derive(Clone, Copy, ValueEnum)]
enum AccountArg {
    Active,
    Suspended,
    Banned,
}

#[derive(Clone, Copy, ValueEnum)]
enum PostArg {
    Visible,
    Hidden,
    Removed,
}

/// Used for listing without a live connection.
struct Offline;

impl EventSink for Offline {
    fn emit(&self, event: ClientEvent) -> Result<()> {
        Err(ClientError::Socket(format!("offline, {} not sent", event.name())))
    }
}

struct Answered(bool);

impl Confirm for Answered {
    fn confirm(&self, prompt: &str) -> bool {
        debug!("{prompt} -> {}", self.0);
        self.0
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = &cli.api_url {
        config = config.with_api_url(api_url)?;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.real_counts {
        config.demo_metrics = false;
    }

    let store = Arc::new(FileStore::open(&config.data_dir).await?);
    let api = Arc::new(ApiClient::new(config.clone())?);
    let session = SessionHolder::new(api.clone(), store.clone());

    if let Command::Login { email, password } = &cli.command {
        let user = session.login(email, password).await?;
        println!("Logged in as {}", user.username);
        return Ok(());
    }
    if let Command::Admin {
        action: AdminCommand::SeedOwner { username, email, password },
    } = &cli.command
    {
        let account = OwnerAccount {
            username: username.clone(),
            email: email.clone(),
            password: password.clone(),
        };
        let owner = AdminClient::new(api).seed_owner(&account).await?;
        println!("Owner account {} ready", owner.username);
        return Ok(());
    }

    let user = session.restore().await?.ok_or(ClientError::Unauthenticated)?;
    let metrics = MetricsPolicy::new(config.demo_metrics);

    match cli.command {
        Command::Login { .. } => {}
        Command::Logout => {
            session.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => {
            let user = session.ensure_valid(true).await?;
            println!(
                "{} ({}) {} followers",
                user.username,
                user.id,
                format_count(metrics.display_count(&user.id, MetricKind::Followers, user.followers.len() as u64))
            );
        }
        Command::Conversations { folder } => {
            let manager = ConversationManager::new(user.id.clone(), api, Arc::new(Offline));
            manager.refresh_conversations().await?;
            let filter = match folder {
                Folder::Primary => ConversationFilter::Primary,
                Folder::General => ConversationFilter::General,
                Folder::Requests => ConversationFilter::Requests,
            };
            for conversation in manager.conversations(filter).await {
                let preview = conversation.last_message.as_deref().map_or("", Message::preview);
                let unread = match conversation.unread_count {
                    0 => String::new(),
                    n => format!(" [{n}]"),
                };
                println!("{}  {}{}  {}", conversation.id, conversation.title(&user.id), unread, preview);
            }
        }
        Command::Chat { conversation_id } => {
            let token = session.token().await;
            let (handle, mut events) = socket::connect(&config.socket_url, token.as_deref()).await?;
            let sink: Arc<dyn EventSink> = Arc::new(handle);
            let manager = ConversationManager::new(user.id.clone(), api.clone(), sink);
            let uploader = UploadClient::new(api.clone(), Arc::new(HttpMediaHost::for_api(&api)), config.max_upload_bytes);

            manager.join()?;
            if let Err(e) = manager.refresh_conversations().await {
                warn!("conversation list unavailable: {e}");
            }
            chat(&manager, &uploader, &mut events, &conversation_id).await?;
        }
        Command::Reels { pages, watch } => {
            let feed = ReelFeed::open(api.clone(), store).await?;
            for _ in 0..pages {
                if feed.load_next().await? == 0 {
                    break;
                }
            }
            let assets = AssetResolver::new(&config.api_url, config.cdn_hosts.clone());
            for reel in feed.reels().await {
                let likes = metrics.display_count(&reel.id, MetricKind::Likes, reel.likes.len() as u64);
                let views = metrics.display_count(&reel.id, MetricKind::Views, reel.views);
                println!(
                    "{}  {} likes  {} views  {}",
                    reel.id,
                    format_count(likes),
                    format_count(views),
                    assets.resolve(&reel.video_url, "")
                );
                if watch {
                    feed.mark_viewed(&reel.id).await?;
                }
            }
        }
        Command::Search { query } => {
            let results = api.search(&query).await?;
            for found in &results.users {
                println!("@{}", found.username);
            }
            for post in &results.posts {
                println!("post {}  {}", post.id, post.caption);
            }
            for reel in &results.reels {
                println!("reel {}  {}", reel.id, reel.caption);
            }
        }
        Command::Feed { pages } => {
            let mut feed = FeedState::new(user.id.clone(), metrics, Arc::new(Offline));
            feed.refresh(api.as_ref()).await?;
            for page in 2..=pages {
                if feed.load_posts(page, api.as_ref()).await? == 0 {
                    break;
                }
            }
            let assets = AssetResolver::new(&config.api_url, config.cdn_hosts.clone());
            for post in feed.posts() {
                println!(
                    "{}  {} likes  {} comments  {}  {}",
                    post.id,
                    format_count(feed.post_likes(&post.id).unwrap_or_default()),
                    format_count(feed.post_comments(&post.id).unwrap_or_default()),
                    post.caption,
                    assets.resolve_opt(post.media_url.as_deref(), "")
                );
            }
            println!("{} active stories", feed.active_stories(chrono::Utc::now()).count());
        }
        Command::Stories { view } => stories(&config, &session, api, &user.id, metrics, view).await?,
        Command::Upload { path, folder, no_compress } => {
            let mut uploader =
                UploadClient::new(api.clone(), Arc::new(HttpMediaHost::for_api(&api)), config.max_upload_bytes);
            if no_compress {
                uploader = uploader.with_compressor(Box::new(Passthrough));
            }
            let asset = uploader.upload(&path, &folder).await?;
            println!("{}", asset.url);
        }
        Command::Like { id, reel, undo } => {
            let mut feed = FeedState::new(user.id.clone(), metrics, Arc::new(Offline));
            let target = if reel {
                feed.set_reels(api.reels_page(1, &[]).await?);
                ToggleTarget::ReelLike(id)
            } else {
                feed.refresh(api.as_ref()).await?;
                ToggleTarget::PostLike(id)
            };
            feed_toggle(&mut feed, api.as_ref(), target, undo).await?;
        }
        Command::Save { post_id, undo } => {
            let mut feed = FeedState::new(user.id.clone(), metrics, Arc::new(Offline));
            feed.refresh(api.as_ref()).await?;
            feed_toggle(&mut feed, api.as_ref(), ToggleTarget::SavePost(post_id), undo).await?;
        }
        Command::Comment { id, text, reel } => {
            let mut feed = FeedState::new(user.id.clone(), metrics, Arc::new(Offline));
            let target = if reel {
                feed.set_reels(api.reels_page(1, &[]).await?);
                CommentTarget::Reel(id)
            } else {
                feed.refresh(api.as_ref()).await?;
                CommentTarget::Post(id)
            };
            let comment = feed.add_comment(&target, &text, api.as_ref()).await?;
            println!("commented {}", comment.id);
        }
        Command::Follow { user_id, undo } => {
            toggle(api.as_ref(), ToggleTarget::Follow(user_id), undo).await?;
        }
        Command::Admin { action } => admin(AdminClient::new(api), action).await?,
    }
    Ok(())
}

/// Sets a like or save on something in the loaded feed, leaving it alone
/// when it already has the wanted state. Items beyond the loaded page are
/// toggled directly.
async fn feed_toggle(feed: &mut FeedState, api: &ApiClient, target: ToggleTarget, undo: bool) -> Result<()> {
    match feed.toggle_state(&target).await {
        Some(state) if state.active != undo => {
            println!("{target:?}: already {}", if undo { "off" } else { "on" });
        }
        Some(_) => {
            let state = feed.toggle(target.clone(), api).await?;
            println!(
                "{target:?}: {} ({})",
                if state.active { "on" } else { "off" },
                format_count(state.count)
            );
        }
        None => toggle(api, target, undo).await?,
    }
    Ok(())
}

async fn stories(
    config: &ClientConfig,
    session: &SessionHolder,
    api: Arc<ApiClient>,
    me: &str,
    metrics: MetricsPolicy,
    view: Option<String>,
) -> Result<()> {
    let Some(story_id) = view else {
        let mut feed = FeedState::new(me, metrics, Arc::new(Offline));
        feed.refresh(api.as_ref()).await?;
        for story in feed.active_stories(chrono::Utc::now()) {
            let seen = if story.is_viewed_by(me) { "" } else { " (new)" };
            println!("{}  {}{seen}", story.id, story.user.username().unwrap_or_else(|| story.user.id()));
        }
        return Ok(());
    };

    let token = session.token().await;
    let (handle, _events) = socket::connect(&config.socket_url, token.as_deref()).await?;
    let handle = Arc::new(handle);
    let mut feed = FeedState::new(me, metrics, handle.clone());
    feed.refresh(api.as_ref()).await?;
    let reported = feed.view_story(&story_id)?;
    println!("{story_id}: {}", if reported { "viewed" } else { "already viewed" });

    drop(feed);
    if let Ok(handle) = Arc::try_unwrap(handle) {
        handle.close().await;
    }
    Ok(())
}

async fn toggle(api: &ApiClient, target: ToggleTarget, undo: bool) -> Result<()> {
    let toggle = OptimisticToggle::new(target, undo, 0);
    let state = toggle.toggle(api).await?;
    println!("{:?}: {}", toggle.target(), if state.active { "on" } else { "off" });
    Ok(())
}

async fn admin(client: AdminClient, action: AdminCommand) -> Result<()> {
    let ack = match action {
        AdminCommand::SeedOwner { .. } => return Ok(()),
        AdminCommand::UserStatus { user_id, status } => {
            let status = match status {
                AccountArg::Active => AccountStatus::Active,
                AccountArg::Suspended => AccountStatus::Suspended,
                AccountArg::Banned => AccountStatus::Banned,
            };
            client.set_user_status(&user_id, status).await?
        }
        AdminCommand::PostStatus { post_id, status } => {
            let status = match status {
                PostArg::Visible => PostStatus::Visible,
                PostArg::Hidden => PostStatus::Hidden,
                PostArg::Removed => PostStatus::Removed,
            };
            client.set_post_status(&post_id, status).await?
        }
        AdminCommand::Announce { title, body } => client.publish_update(&PlatformUpdate { title, body }).await?,
    };
    if !ack.message.is_empty() {
        println!("{}", ack.message);
    }
    Ok(())
}

const HELP: &str = "/resend <id>  /react <id> <emoji>  /edit <id> <text>  /delete <id>  /attach <path>  /quit";

async fn chat(
    manager: &ConversationManager,
    uploader: &UploadClient,
    events: &mut UnboundedReceiver<ServerEvent>,
    conversation_id: &str,
) -> Result<()> {
    manager.select_conversation(conversation_id).await?;
    for message in manager.messages().await {
        print_message(&message, manager.me());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_delete: Option<String> = None;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if let Some(message_id) = pending_delete.take() {
                    let confirmed = matches!(line.trim(), "y" | "yes");
                    match manager.delete_message(&message_id, &Answered(confirmed)).await {
                        Ok(true) => println!("deleted {message_id}"),
                        Ok(false) => println!("kept {message_id}"),
                        Err(e) => eprintln!("error: {e}"),
                    }
                    continue;
                }
                if line.trim() == "/quit" {
                    break;
                }
                if let Err(e) = handle_line(manager, uploader, &line, &mut pending_delete).await {
                    eprintln!("error: {e}");
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("socket closed");
                    break;
                };
                if let ServerEvent::NewMessage { conversation_id: target, message } = &event {
                    if target == conversation_id && message.sender.id() != manager.me() {
                        print_message(message, manager.me());
                    }
                }
                manager.apply(event).await;
            }
        }
    }

    manager.leave_conversation().await;
    Ok(())
}

async fn handle_line(
    manager: &ConversationManager,
    uploader: &UploadClient,
    line: &str,
    pending_delete: &mut Option<String>,
) -> Result<()> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/help" => println!("{HELP}"),
        "/resend" => manager.resend(rest).await?,
        "/react" => {
            let (id, emoji) = rest
                .split_once(' ')
                .ok_or_else(|| ClientError::validation("usage: /react <id> <emoji>"))?;
            manager.react(id, emoji.trim()).await?;
        }
        "/edit" => {
            let (id, text) = rest
                .split_once(' ')
                .ok_or_else(|| ClientError::validation("usage: /edit <id> <text>"))?;
            let edited = manager.edit_message(id, text).await?;
            println!("edited {}", edited.id);
        }
        "/delete" => {
            if rest.is_empty() {
                return Err(ClientError::validation("usage: /delete <id>"));
            }
            println!("Delete this message? [y/N]");
            *pending_delete = Some(rest.to_string());
        }
        "/attach" => {
            let asset = uploader.upload(Path::new(rest), "messages").await?;
            let sent = manager
                .send_message(OutgoingMessage {
                    text: String::new(),
                    media: Some(asset.into_media()),
                })
                .await?;
            print_sent(manager, sent).await;
        }
        _ if command.starts_with('/') => {
            return Err(ClientError::validation(format!("unknown command {command}; {HELP}")));
        }
        _ => {
            manager.set_draft(line).await;
            let sent = manager.send_message(OutgoingMessage::text(line)).await?;
            print_sent(manager, sent).await;
        }
    }
    Ok(())
}

/// Echoes our own optimistic copy so a send that never gets acknowledged
/// still shows its `/resend` id.
async fn print_sent(manager: &ConversationManager, temp_id: Option<String>) {
    let Some(temp_id) = temp_id else { return };
    match manager.messages().await.iter().find(|m| m.id == temp_id) {
        Some(message) => print_message(message, manager.me()),
        None => debug!("{temp_id} already confirmed"),
    }
}

fn print_message(message: &Message, me: &str) {
    let who = if message.sender.id() == me {
        "you"
    } else {
        message.sender.username().unwrap_or_else(|| message.sender.id())
    };
    let mut line = format!("[{}] {who}: {}", message.created_at.format("%H:%M"), message.preview());
    if message.edited {
        line.push_str(" (edited)");
    }
    if message.is_pending() {
        line.push_str(&format!(" (sending, /resend {})", message.id));
    }
    println!("{line}");
}
