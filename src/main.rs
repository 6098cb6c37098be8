use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reelforge::app::AppContext;
use reelforge::config::Config;
use reelforge::content::{ScriptRequest, SocialCopyRequest};
use reelforge::jobs::VideoJobRequest;

mod commands;

#[derive(Parser)]
#[command(
    name = "reelforge",
    version,
    about = "Resilient short-video pipeline: scripts, rendering, scheduled posts and health probes",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML config file; REELFORGE_* environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the schedulers, probes and health server
    Serve {
        /// Override server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate a narrated video script
    Script {
        /// Theme of the video
        theme: String,

        #[arg(short, long)]
        audience: Option<String>,

        /// Target length in seconds
        #[arg(short, long, default_value = "60")]
        duration: u32,

        #[arg(short, long)]
        tone: Option<String>,

        #[arg(short, long, default_value = "en")]
        language: String,

        /// Comma-separated keywords
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a caption for one platform
    Social {
        topic: String,

        #[arg(short, long, default_value = "instagram")]
        platform: String,

        #[arg(short, long)]
        summary: Option<String>,

        #[arg(short, long)]
        tone: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Suggest video topics around a theme
    Topics {
        theme: String,

        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        #[arg(long)]
        json: bool,
    },

    /// Render one video and wait for it
    Render {
        title: String,

        /// Narration text
        #[arg(short, long)]
        script: Option<String>,

        /// Image to include (repeatable)
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,

        /// Pre-recorded narration
        #[arg(short, long)]
        audio: Option<PathBuf>,

        /// WIDTHxHEIGHT
        #[arg(short, long)]
        resolution: Option<String>,

        /// Target length in seconds
        #[arg(short, long, default_value = "30")]
        duration: u32,

        #[arg(long)]
        voice: Option<String>,

        /// Stock-media search terms
        #[arg(long)]
        query: Option<String>,
    },

    /// Probe dependencies now and report health
    Health {
        /// Probe a single service
        #[arg(short, long)]
        service: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Manage scheduled social posts
    Posts {
        #[command(subcommand)]
        action: PostCommands,
    },

    /// Repeat operations until they pass N times in a row
    Soak {
        /// Modules to soak (script, social, topics, cache); all when omitted
        #[arg(short, long, value_delimiter = ',')]
        modules: Vec<String>,

        /// Theme used for content modules
        #[arg(long, default_value = "productivity tips")]
        theme: String,

        /// Consecutive successes required
        #[arg(short, long, default_value = "1000")]
        target: u32,

        /// Consecutive failures tolerated
        #[arg(long, default_value = "100")]
        max_failures: u32,

        /// Pause between iterations in milliseconds
        #[arg(long, default_value = "0")]
        pause_ms: u64,
    },

    /// Show persisted resilience (or soak) statistics
    Stats {
        #[arg(long)]
        soak: bool,
    },

    /// Back up or restore snapshot files
    Backup {
        #[command(subcommand)]
        action: BackupCommands,
    },
}

#[derive(Subcommand)]
enum PostCommands {
    /// Schedule a post for one or more accounts
    Schedule {
        text: String,

        /// platform:account_id (repeatable)
        #[arg(short, long = "account", required = true)]
        accounts: Vec<String>,

        /// Media URL or file path
        #[arg(short, long)]
        media: String,

        #[arg(long = "tag")]
        hashtags: Vec<String>,

        /// RFC 3339 publication time; immediate when omitted
        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// List posts, optionally by status
    List {
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Cancel a scheduled post
    Cancel { id: String },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Copy the snapshot files into a new backup
    Create {
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List backups
    List,

    /// Restore a backup over the current snapshot files
    Restore { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(config.logging.format.as_str());
    setup_tracing(format, &config.logging.level, cli.verbose)?;
    reelforge::i18n::init_from_env();

    config.validate()?;

    tracing::debug!(data_dir = %config.storage.data_dir.display(), "Configuration loaded");

    match cli.command {
        // Backups only touch files; no context needed
        Commands::Backup { action } => match action {
            BackupCommands::Create { name } => commands::backup_create(&config, name)?,
            BackupCommands::List => commands::backup_list(&config)?,
            BackupCommands::Restore { name } => commands::backup_restore(&config, name)?,
        },

        Commands::Serve { bind } => {
            tracing::info!(bind = ?bind, "Starting serve command");
            commands::serve(AppContext::new(config)?, bind).await?;
        }

        Commands::Script {
            theme,
            audience,
            duration,
            tone,
            language,
            keywords,
            json,
        } => {
            let app = AppContext::new(config)?;
            let request = ScriptRequest {
                theme,
                target_audience: audience,
                duration_secs: duration,
                tone,
                language,
                keywords,
            };
            commands::script(&app, request, json).await?;
        }

        Commands::Social {
            topic,
            platform,
            summary,
            tone,
            json,
        } => {
            let app = AppContext::new(config)?;
            let request = SocialCopyRequest {
                platform,
                topic,
                summary,
                tone,
            };
            commands::social(&app, request, json).await?;
        }

        Commands::Topics { theme, count, json } => {
            let app = AppContext::new(config)?;
            commands::topics(&app, theme, count, json).await?;
        }

        Commands::Render {
            title,
            script,
            images,
            audio,
            resolution,
            duration,
            voice,
            query,
        } => {
            tracing::info!(title = %title, images = images.len(), "Starting render command");
            let app = AppContext::new(config)?;
            let request = VideoJobRequest {
                script,
                images,
                audio,
                resolution,
                target_duration_secs: duration,
                voice,
                media_query: query,
                ..VideoJobRequest::new(title)
            };
            commands::render(&app, request).await?;
        }

        Commands::Health { service, json } => {
            let app = AppContext::new(config)?;
            commands::health(&app, service, json).await?;
        }

        Commands::Posts { action } => {
            let app = AppContext::new(config)?;
            match action {
                PostCommands::Schedule {
                    text,
                    accounts,
                    media,
                    hashtags,
                    at,
                    max_retries,
                } => {
                    commands::schedule_post(&app, text, accounts, media, hashtags, at, max_retries)
                        .await?
                }
                PostCommands::List { status } => commands::list_posts(&app, status).await?,
                PostCommands::Cancel { id } => commands::cancel_post(&app, id).await?,
            }
        }

        Commands::Soak {
            modules,
            theme,
            target,
            max_failures,
            pause_ms,
        } => {
            let app = AppContext::new(config)?;
            commands::soak(
                &app,
                modules,
                theme,
                target,
                max_failures,
                Duration::from_millis(pause_ms),
            )
            .await?;
        }

        Commands::Stats { soak } => {
            let app = AppContext::new(config)?;
            commands::stats(&app, soak)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("reelforge=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("reelforge={level},warn"))?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        "text" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        other => anyhow::bail!("unknown log format '{other}' (expected text or json)"),
    }

    Ok(())
}
