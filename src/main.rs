//! bell - soundboard server and remote players
//!
//! **Server** (`bell serve`): hosts the sound catalogue, text-to-speech and
//! the HTTP API, and routes play/say commands to registered players.
//!
//! **Player** (`bell register`): connects to a server over WebSocket and
//! plays whatever it is sent on the local speakers.
//!
//! The remaining subcommands are thin HTTP clients for a running server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bell::{
    api::{self, AppState, RouterConfig},
    client::{pause_for_rate, sound_table, tags_of, Client},
    config::{self, BellConfig},
    playback::CommandPlayer,
    player::RemotePlayer,
    registry::Registry,
    shutdown::{self, ShutdownCoordinator},
    sound::SoundCatalogue,
    tts::FliteSynthesizer,
};

/// bell - soundboard server and remote players
#[derive(Parser, Debug)]
#[command(name = "bell", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server base URL used by client subcommands
    #[arg(long, global = true, env = "BELL_ADDRESS", default_value = "http://localhost:10101")]
    server: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bell server
    Serve {
        /// Path to the TOML config file
        #[arg(long, env = "BELL_CONFIG")]
        config: Option<PathBuf>,

        /// Address to bind (overrides config)
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Data directory (overrides config)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Accept WebSocket upgrades from any origin
        #[arg(long)]
        disable_websocket_checkorigin: bool,
    },

    /// Register as a remote player and play what the server sends
    Register {
        /// Name to register under (defaults to the hostname)
        #[arg(long, env = "BELL_REGISTER_NAME")]
        name: Option<String>,

        /// Program used to play audio files
        #[arg(long, default_value = "mpv")]
        player: String,

        /// Where downloaded audio is kept
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },

    /// List registered players
    Clients,

    /// Play a sound on the server or on a registered player
    Play {
        /// Sound name (or tag with -t)
        sound: String,

        /// Treat the argument as a tag and play a random matching sound
        #[arg(short = 't', long)]
        tag: bool,

        /// Registered player to play on
        #[arg(short = 'd', long)]
        destination: Option<String>,
    },

    /// Speak text on the server or on a registered player
    Say {
        /// Text to speak
        #[arg(required = true)]
        text: Vec<String>,

        /// Registered player to speak on
        #[arg(short = 'd', long)]
        destination: Option<String>,
    },

    /// List the sound catalogue
    #[command(visible_alias = "ls")]
    List {
        /// List tags instead of sounds
        #[arg(short = 't', long)]
        tag: bool,
    },

    /// Upload a sound to the catalogue
    #[command(visible_alias = "upload")]
    Add {
        /// Name the sound is played by
        #[arg(short = 'n', long)]
        name: String,

        /// Audio file to upload
        #[arg(short = 'f', long)]
        file: PathBuf,

        /// Tags for the sound (comma separated or repeated)
        #[arg(short = 't', long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Remove a sound from the catalogue
    #[command(visible_aliases = ["rm", "del"])]
    Delete {
        sound: String,
    },

    /// Download a sound
    Get {
        sound: String,

        /// Where to write the audio; `-` is stdout
        #[arg(short = 'o', long, default_value = "-")]
        output: PathBuf,
    },

    /// Save the whole catalogue (sound list and audio) into a directory
    Backup {
        /// Directory to create (default: bell-backup-<unix time>)
        output: Option<PathBuf>,

        /// Requests per minute, 0 for no limit
        #[arg(short = 'r', long, default_value_t = 0)]
        rate: u32,
    },

    /// Upload every sound of a backup directory
    Restore {
        backup: PathBuf,

        /// Requests per minute, 0 for no limit
        #[arg(short = 'r', long, default_value_t = 0)]
        rate: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            data_dir,
            disable_websocket_checkorigin,
        } => run_server(config, listen, data_dir, disable_websocket_checkorigin).await,
        Commands::Register {
            name,
            player,
            cache_dir,
        } => run_register(&cli.server, name, player, cache_dir).await,
        Commands::Clients => run_clients(&Client::new(&cli.server)).await,
        Commands::Play {
            sound,
            tag,
            destination,
        } => {
            Client::new(&cli.server)
                .play(&sound, tag, destination.as_deref())
                .await
        }
        Commands::Say { text, destination } => {
            Client::new(&cli.server)
                .say(&text.join(" "), destination.as_deref())
                .await
        }
        Commands::List { tag } => run_list(&Client::new(&cli.server), tag).await,
        Commands::Add { name, file, tags } => {
            run_add(&Client::new(&cli.server), &name, &file, &tags).await
        }
        Commands::Delete { sound } => {
            Client::new(&cli.server).delete_sound(&sound).await?;
            tracing::info!(sound = %sound, "sound deleted");
            Ok(())
        }
        Commands::Get { sound, output } => run_get(&Client::new(&cli.server), &sound, &output).await,
        Commands::Backup { output, rate } => {
            run_backup(&Client::new(&cli.server), output, rate).await
        }
        Commands::Restore { backup, rate } => {
            let restored = Client::new(&cli.server)
                .restore(&backup, pause_for_rate(rate))
                .await?;
            tracing::info!(restored, from = %backup.display(), "backup restored");
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "bell=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// ── Server mode ────────────────────────────────────────────────────

async fn run_server(
    config_path: Option<PathBuf>,
    listen: Option<SocketAddr>,
    data_dir: Option<PathBuf>,
    disable_origin_check: bool,
) -> Result<()> {
    let mut config = match config_path.or_else(config::default_config_path) {
        Some(path) => {
            let loaded = BellConfig::load_or_default(&path)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            loaded
        }
        None => BellConfig::default(),
    };
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    config.disable_origin_check |= disable_origin_check;

    tracing::info!(data_dir = %config.data_dir.display(), "bell server starting");

    let sounds = SoundCatalogue::open(config.store_path(), config.sound_dir())
        .context("failed to load sound catalogue")?;
    let registry = Registry::with_settings(config.keepalive(), config.queue_capacity);
    let state = AppState {
        registry: registry.clone(),
        sounds,
        player: Arc::new(CommandPlayer::new(
            config.player_command.clone(),
            config.player_args.clone(),
        )),
        tts: Arc::new(FliteSynthesizer::new(
            config.tts_command.clone(),
            config.tts_voice.clone(),
            config.tts_dir(),
        )),
        mattermost_token: config.mattermost_token.clone(),
    };
    if state.mattermost_token.is_none() {
        tracing::warn!("no mattermost token configured, chat commands are accepted from anyone");
    }

    let app = api::router(
        state,
        RouterConfig {
            allowed_origins: config.allowed_origins.clone(),
            check_origin: !config.disable_origin_check,
        },
    );

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "HTTP/WS server listening");

    let coordinator = ShutdownCoordinator::with_grace(registry, config.shutdown_grace());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            coordinator.run_until(shutdown::interrupt()).await;
        })
        .await
        .context("server error")?;

    tracing::info!("bell server stopped");
    Ok(())
}

// ── Player mode ────────────────────────────────────────────────────

async fn run_register(
    server: &str,
    name: Option<String>,
    program: String,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let name = config::resolve_hostname(name.as_deref());
    let cache_dir = cache_dir
        .or_else(|| dirs::cache_dir().map(|d| d.join("bell")))
        .unwrap_or_else(|| std::env::temp_dir().join("bell"));

    let audio = if program == "mpv" {
        CommandPlayer::mpv()
    } else {
        CommandPlayer::new(program, vec![])
    };
    let remote = RemotePlayer::new(server, name, Arc::new(audio), cache_dir);
    remote.run(shutdown::interrupt()).await
}

// ── Client subcommands ─────────────────────────────────────────────

async fn run_clients(client: &Client) -> Result<()> {
    for name in client.clients().await? {
        println!("{}", name);
    }
    Ok(())
}

async fn run_list(client: &Client, tags: bool) -> Result<()> {
    let sounds = client.list_sounds().await?;
    if tags {
        println!("List of tags");
        for tag in tags_of(&sounds) {
            println!("  - {}", tag);
        }
    } else {
        print!("{}", sound_table(&sounds));
    }
    Ok(())
}

async fn run_add(client: &Client, name: &str, file: &Path, tags: &[String]) -> Result<()> {
    let audio = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let sound = client.add_sound(name, tags, audio).await?;
    tracing::info!(sound = %sound.name, tags = ?sound.tags, "sound uploaded");
    Ok(())
}

async fn run_get(client: &Client, sound: &str, output: &Path) -> Result<()> {
    let audio = client.get_sound(sound).await?;
    if output == Path::new("-") {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&audio).await?;
        stdout.flush().await?;
    } else {
        tokio::fs::write(output, &audio)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        tracing::debug!(bytes = audio.len(), path = %output.display(), "sound saved");
    }
    Ok(())
}

async fn run_backup(client: &Client, output: Option<PathBuf>, rate: u32) -> Result<()> {
    let dir = match output {
        Some(dir) => dir,
        None => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            PathBuf::from(format!("bell-backup-{}", now))
        }
    };
    let saved = client.backup(&dir, pause_for_rate(rate)).await?;
    tracing::info!(sounds = saved, dir = %dir.display(), "backup written");
    Ok(())
}
