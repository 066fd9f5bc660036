use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::redirect::Policy;
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use feedrelay::admin::Admin;
use feedrelay::config::Config;
use feedrelay::deliver::{Sink, StdoutSink, WebhookSink, DEFAULT_TEMPLATE};
use feedrelay::events::FetchEvents;
use feedrelay::feed::Fetcher;
use feedrelay::poller::{supervise, Poller};
use feedrelay::storage::{Database, DatabaseError, Subscription};

/// Get the config directory path (~/.config/feedrelay/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedrelay"))
}

/// Creates `dir` if needed, user-only on Unix.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(dir, perms) {
                    tracing::warn!(path = %dir.display(), error = %e, "Failed to set directory permissions to 0700");
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to read directory metadata");
            }
        }
    }
    Ok(())
}

fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }
        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(to = %url, hop = attempt.previous().len() + 1, "Following redirect");
        attempt.follow()
    })
}

fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedrelay/", env!("CARGO_PKG_VERSION")))
        .redirect(create_redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")
}

#[derive(Parser, Debug)]
#[command(name = "feedrelay", about = "Relay RSS/Atom feed updates into chat channels")]
struct Args {
    /// Config file (default: ~/.config/feedrelay/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print messages to stdout instead of posting them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all feeds until interrupted
    Run,
    /// List feeds advertised by a web page
    Discover { url: String },
    /// Track a feed in a channel
    Add {
        channel: String,
        name: String,
        url: String,
    },
    /// Stop tracking a feed
    Remove { channel: String, name: String },
    /// List the feeds of a channel
    List { channel: String },
    /// Show one feed's settings
    Show { channel: String, name: String },
    /// Only post entries whose FIELD contains TERM
    SetMatch {
        channel: String,
        name: String,
        field: String,
        term: String,
    },
    /// Post every entry again
    ClearMatch { channel: String, name: String },
    /// Set the roles mentioned with each post (none clears)
    Roles {
        channel: String,
        name: String,
        roles: Vec<u64>,
    },
    /// Choose embeds for this feed
    Embed {
        channel: String,
        name: String,
        mode: EmbedMode,
    },
    /// Set the message template (omit to reset to the default)
    Template {
        channel: String,
        name: String,
        template: Option<String>,
    },
    /// Post the latest matching entry now
    Force { channel: String, name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EmbedMode {
    On,
    Off,
    Inherit,
}

impl From<EmbedMode> for Option<bool> {
    fn from(mode: EmbedMode) -> Self {
        match mode {
            EmbedMode::On => Some(true),
            EmbedMode::Off => Some(false),
            EmbedMode::Inherit => None,
        }
    }
}

fn print_subscription(sub: &Subscription) {
    println!("{} ({})", sub.feed_name, sub.url);
    println!("  last seen: {}", sub.cursor);
    match &sub.match_rule {
        Some(rule) => println!("  match: {} contains {:?}", rule.field(), rule.term()),
        None => println!("  match: everything"),
    }
    if !sub.role_mentions.is_empty() {
        let roles: Vec<_> = sub.role_mentions.iter().map(u64::to_string).collect();
        println!("  mentions: {}", roles.join(", "));
    }
    println!("  embed: {:?}", sub.embed_override);
    println!(
        "  template: {:?}",
        sub.template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    );
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    tracing::debug!(?config, "Configuration");

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_private_dir(parent)?;
    }
    let db = open_database(&db_path).await?;

    let client = build_http_client()?;
    let fetcher = Fetcher::new(client.clone(), config.fetch_timeout(), FetchEvents::default());
    let admin = Admin::new(db.clone(), fetcher.clone(), config.backfill_on_add);

    let sink = if args.dry_run {
        Sink::Stdout(StdoutSink)
    } else {
        let webhooks = config
            .webhooks()
            .map(|(channel, url)| (channel.to_owned(), SecretString::from(url.to_owned())));
        Sink::Webhook(WebhookSink::new(client, webhooks))
    };
    let poller = Poller::new(db.clone(), fetcher, sink, config.poll_settings());

    let result = run_command(args.command, &admin, poller).await;
    db.close().await;
    result
}

async fn run_command(command: Command, admin: &Admin, poller: Poller<Sink>) -> Result<()> {
    match command {
        Command::Run => {
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    }
                    cancel.cancel();
                }
            });
            supervise(poller.spawn(cancel)).await;
        }
        Command::Discover { url } => {
            let feeds = admin.discover(&url).await?;
            if feeds.is_empty() {
                println!("No feeds found.");
            }
            for feed in feeds {
                println!("{feed}");
            }
        }
        Command::Add { channel, name, url } => {
            let sub = admin.add_feed(&channel, &name, &url).await?;
            println!("Now tracking {} in {}.", sub.feed_name, channel);
        }
        Command::Remove { channel, name } => {
            admin.remove_feed(&channel, &name).await?;
            println!("Stopped tracking {name} in {channel}.");
        }
        Command::List { channel } => {
            let subs = admin.list_feeds(&channel).await?;
            if subs.is_empty() {
                println!("No feeds in {channel}.");
            }
            for sub in subs {
                println!("{}: {}", sub.feed_name, sub.url);
            }
        }
        Command::Show { channel, name } => {
            print_subscription(&admin.show_feed(&channel, &name).await?);
        }
        Command::SetMatch {
            channel,
            name,
            field,
            term,
        } => {
            admin.set_match_req(&channel, &name, &field, &term).await?;
            println!("Only entries whose {field} contains {term:?} will be posted.");
        }
        Command::ClearMatch { channel, name } => {
            admin.clear_match_req(&channel, &name).await?;
            println!("All new entries of {name} will be posted.");
        }
        Command::Roles {
            channel,
            name,
            roles,
        } => {
            let sub = admin.set_role_mentions(&channel, &name, &roles).await?;
            if sub.role_mentions.is_empty() {
                println!("Roles won't be mentioned.");
            } else {
                println!("Those roles will be mentioned.");
            }
        }
        Command::Embed {
            channel,
            name,
            mode,
        } => {
            let sub = admin.set_embed_override(&channel, &name, mode.into()).await?;
            println!("Embed setting for {name}: {:?}", sub.embed_override);
        }
        Command::Template {
            channel,
            name,
            template: Some(template),
        } => {
            admin.set_template(&channel, &name, &template).await?;
            println!("Template updated.");
        }
        Command::Template {
            channel,
            name,
            template: None,
        } => {
            admin.reset_template(&channel, &name).await?;
            println!("Template reset to the default.");
        }
        Command::Force { channel, name } => {
            if poller.force(&channel, &name).await? {
                println!("Posted the latest entry of {name}.");
            } else {
                println!("{name} has no entry that passes its match rule.");
            }
        }
    }
    Ok(())
}
