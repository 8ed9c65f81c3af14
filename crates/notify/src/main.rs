//! campuslink-notify: headless host for the notifications client.
//!
//! Each data directory holds one persisted session, so one directory
//! behaves like one browser tab.
//!
//! ## Subcommands
//!
//! - `login` / `logout` / `whoami`: manage the persisted session
//! - `list`, `unread`: read notifications
//! - `mark-read`, `mark-all-read`: change read state on the backend
//! - `watch`: keep the live channel open and print pushes as they land

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use campuslink_notify::claims::TokenClaims;
use campuslink_notify::config::{DEFAULT_REALTIME_URL, DEFAULT_REST_URL};
use campuslink_notify::logging::init_logging;
use campuslink_notify::{
    badge_label, paths, FileStorage, NotificationStore, NotifyApp, NotifyConfig, SessionStore,
    TransportClient, VERSION,
};
use campuslink_protocol::{Notification, NotificationPayload, User};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "campuslink-notify")]
#[command(about = "CampusLink marketplace notifications")]
#[command(version)]
struct Cli {
    /// Data directory (session and logs)
    #[arg(long, global = true, env = "CAMPUSLINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// REST API root
    #[arg(long, global = true, env = "CAMPUSLINK_REST_URL", default_value = DEFAULT_REST_URL)]
    rest_url: String,

    /// WebSocket endpoint for live notifications
    #[arg(long, global = true, env = "CAMPUSLINK_REALTIME_URL", default_value = DEFAULT_REALTIME_URL)]
    realtime_url: String,

    /// Wait between a dropped live connection and the next attempt
    #[arg(long, global = true, env = "CAMPUSLINK_RECONNECT_MS", default_value_t = 5000)]
    reconnect_ms: u64,

    /// Reconciliation period while watching; 0 disables polling
    #[arg(long, global = true, env = "CAMPUSLINK_POLL_SECS", default_value_t = 30)]
    poll_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a session from an issued bearer token
    Login {
        #[arg(long)]
        token: String,

        /// Full user profile JSON; otherwise a minimal user is read from the token
        #[arg(long)]
        user_json: Option<String>,
    },

    /// Clear the stored session
    Logout,

    /// Show the stored session
    Whoami,

    /// Print one page of notifications, newest first
    List {
        /// One-based page number
        #[arg(long, default_value_t = 1)]
        page: usize,
    },

    /// Print unread notifications straight from the backend
    Unread,

    /// Mark one notification read
    MarkRead {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Mark every notification read
    MarkAllRead,

    /// Stay connected and print notifications as they arrive
    Watch,
}

impl Cli {
    fn config(&self) -> NotifyConfig {
        NotifyConfig {
            rest_base_url: self.rest_url.clone(),
            realtime_url: self.realtime_url.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_ms),
            poll_interval: (self.poll_secs > 0).then(|| Duration::from_secs(self.poll_secs)),
            ..NotifyConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let logging = init_logging(&data_dir)?;
    info!(
        component = "cli",
        event = "cli.started",
        run_id = %logging.run_id,
        version = VERSION,
        data_dir = %data_dir.display(),
    );

    let storage = Arc::new(FileStorage::new(paths::session_path(&data_dir)));
    let session = SessionStore::hydrate(storage);
    let app = NotifyApp::new(cli.config(), session);

    match cli.command {
        Commands::Login { token, user_json } => cmd_login(&app, token, user_json),
        Commands::Logout => {
            app.logout().await?;
            println!("  Logged out.");
            Ok(())
        }
        Commands::Whoami => cmd_whoami(&app),
        Commands::List { page } => cmd_list(&app, page).await,
        Commands::Unread => cmd_unread(&app).await,
        Commands::MarkRead { id } => {
            let mut surface = open_surface(&app).await?;
            surface.mark_read(id).await?;
            println!("  Marked {id} read. Unread: {}", surface.unread_count());
            app.teardown().await;
            Ok(())
        }
        Commands::MarkAllRead => {
            let mut surface = open_surface(&app).await?;
            if surface.can_mark_all() {
                surface.mark_all_read().await?;
                println!("  All notifications marked read.");
            } else {
                println!("  Nothing unread.");
            }
            app.teardown().await;
            Ok(())
        }
        Commands::Watch => cmd_watch(&app).await,
    }
}

fn cmd_login(app: &NotifyApp, token: String, user_json: Option<String>) -> anyhow::Result<()> {
    let user: User = match user_json {
        Some(raw) => serde_json::from_str(&raw).context("parsing --user-json")?,
        None => TokenClaims::decode(&token)
            .context("token is not a readable JWT; pass --user-json")?
            .minimal_user(""),
    };
    if user.id == 0 {
        anyhow::bail!("could not determine the user id; pass --user-json");
    }
    let (id, email) = (user.id, user.email.clone());
    app.session().login(user, token)?;
    println!("  Logged in as {email} (id {id}).");
    Ok(())
}

fn cmd_whoami(app: &NotifyApp) -> anyhow::Result<()> {
    if !app.session().is_authenticated() {
        println!("  Not logged in.");
        return Ok(());
    }
    let session = app.session().current();
    let Some(user) = session.user.as_ref() else {
        println!("  Not logged in.");
        return Ok(());
    };

    println!();
    println!("  {} <{}>", display_name(user), user.email);
    println!("  Id: {}  Role: {:?}", user.id, user.role);
    if let Some(department) = &user.department {
        println!("  Department: {department}");
    }
    if let Some(claims) = session
        .token
        .as_deref()
        .and_then(|t| TokenClaims::decode(t).ok())
    {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        match claims.exp {
            Some(exp) if claims.is_expired(now) => println!("  Token: expired at {exp}"),
            Some(exp) => println!("  Token: valid until {exp}"),
            None => println!("  Token: no expiry"),
        }
    }
    println!();
    Ok(())
}

async fn cmd_list(app: &NotifyApp, page: usize) -> anyhow::Result<()> {
    let mut surface = open_surface(app).await?;
    surface.set_page(page.saturating_sub(1));
    let page = surface.current_page().await;

    println!();
    println!(
        "  Notifications  page {}/{}  {}",
        page.index + 1,
        page.total_pages,
        badge_label(surface.unread_count())
            .map(|b| format!("[{b} unread]"))
            .unwrap_or_default()
    );
    if page.items.is_empty() {
        println!("  No notifications yet.");
    }
    for n in &page.items {
        print_notification(n);
    }
    println!();

    app.teardown().await;
    Ok(())
}

async fn cmd_unread(app: &NotifyApp) -> anyhow::Result<()> {
    let user_id = app.session().user_id().context("not logged in")?;
    let unread = app.transport().fetch_unread(user_id).await?;
    println!("  {} unread", unread.len());
    for n in unread.into_iter().map(NotificationPayload::normalize) {
        print_notification(&n);
    }
    Ok(())
}

async fn cmd_watch(app: &NotifyApp) -> anyhow::Result<()> {
    let store = start_view(app).await?;
    let mut unread = store.subscribe_unread();
    let mut seen = newest_id(&store).await;
    println!("  Watching. Unread: {}", store.unread_count());

    loop {
        tokio::select! {
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *unread.borrow_and_update();
                let newest = store.entries().await.into_iter().next();
                if let Some(n) = newest.filter(|n| Some(n.id) != seen) {
                    seen = Some(n.id);
                    print_notification(&n);
                }
                println!(
                    "  Unread: {}",
                    badge_label(count).unwrap_or_else(|| "0".into())
                );
            }
            redirect = app.wait_login_required() => {
                println!("  Session expired. Log in again ({redirect}).");
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    app.teardown().await;
    Ok(())
}

async fn start_view(app: &NotifyApp) -> anyhow::Result<NotificationStore<TransportClient>> {
    match app.start().await {
        Ok(store) => Ok(store),
        Err(e) => {
            app.teardown().await;
            Err(e.into())
        }
    }
}

async fn open_surface(
    app: &NotifyApp,
) -> anyhow::Result<campuslink_notify::NotificationSurface<TransportClient>> {
    start_view(app).await?;
    app.surface().await.context("notifications view closed")
}

async fn newest_id(store: &NotificationStore<TransportClient>) -> Option<i64> {
    store.entries().await.first().map(|n| n.id)
}

fn print_notification(n: &Notification) {
    let marker = if n.unread { "●" } else { " " };
    let title = n.title.as_deref().unwrap_or("");
    println!(
        "  {marker} #{:<6} [{}] {}{}{}",
        n.id,
        n.kind.icon(),
        title,
        if title.is_empty() { "" } else { ": " },
        n.message
    );
}

fn display_name(user: &User) -> &str {
    if user.name.is_empty() {
        &user.username
    } else {
        &user.name
    }
}
