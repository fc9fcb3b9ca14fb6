use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mnemocast_agent::ads::{AdFetcher, AdStorage};
use mnemocast_agent::client::ServerClient;
use mnemocast_agent::config::ConfigStore;
use mnemocast_agent::heartbeat::HeartbeatLoop;
use mnemocast_agent::identity::IdentityStore;
use mnemocast_agent::player::{renderers, Player};
use mnemocast_agent::vault::CredentialStore;
use mnemocast_agent::{Credentials, StorageRoot};

#[derive(Parser, Debug)]
#[command(author, version, about = "MnemoCast edge display agent", long_about = None)]
struct Args {
    /// Storage root (defaults to ~/.mnemocast)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the display agent (default)
    Run,
    /// Manage the encrypted credential vault
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
    /// Report which viewer executables are available on PATH
    CheckRenderers,
}

#[derive(Subcommand, Debug)]
enum CredentialsAction {
    /// Store server-assigned credentials
    Set { screen_id: String, passkey: String },
    /// Show whether credentials are configured (passkey masked)
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let root = match args.root {
        Some(path) => StorageRoot::new(path),
        None => StorageRoot::from_home()?,
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_agent(root).await,
        Command::Credentials { action } => manage_credentials(root, action),
        Command::CheckRenderers => {
            check_renderers();
            Ok(())
        }
    }
}

async fn run_agent(root: StorageRoot) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %root.path().display(),
        "starting mnemocast agent"
    );

    let identity_store = Arc::new(IdentityStore::new(&root));
    match identity_store.load() {
        Ok(identity) => {
            info!(id = %identity.id, name = %identity.name, "screen identity loaded");
            if let Some(location) = identity.location_summary() {
                info!(%location, "screen location");
            }
        }
        Err(e) => warn!(error = %e, "no usable identity yet; it arrives with the first connect"),
    }

    let config = ConfigStore::new(&root).load()?;
    info!(
        server = %config.ad_server_url,
        heartbeat_secs = config.heartbeat_interval,
        fetch_secs = config.ad_fetch_interval,
        retries = config.retry_attempts,
        "configuration loaded"
    );

    // A missing or corrupt vault is not fatal: the agent still runs and can
    // play previously cached ads, it just skips authenticated operations.
    let credentials = match CredentialStore::new(&root).load() {
        Ok(credentials) => {
            info!(
                screen_id = %credentials.screen_id,
                passkey = %credentials.masked_passkey(),
                "credentials configured"
            );
            Some(credentials)
        }
        Err(e) => {
            warn!(error = %e, "credentials unavailable; authenticated loops disabled");
            warn!("configure with: mnemocast-agent credentials set <screen-id> <passkey>");
            None
        }
    };

    let storage = Arc::new(AdStorage::new(&root));
    let player = Arc::new(Player::new(Arc::clone(&storage), &config)?);

    let mut heartbeat: Option<HeartbeatLoop> = None;
    let mut fetcher: Option<AdFetcher> = None;

    if let Some(credentials) = credentials {
        let client = Arc::new(ServerClient::new(
            &config.ad_server_url,
            credentials,
            config.retry_policy(),
        )?);

        // One authentication pass up front; failure is a warning, the
        // periodic loops keep trying on their own schedule.
        match client.connect().await {
            Ok(screen) => {
                info!(id = %screen.id, name = %screen.name, online = screen.is_online, "connected to ad server");
                if let Err(e) = identity_store.update_from_server(&screen) {
                    warn!(error = %e, "failed to persist identity from server");
                }
            }
            Err(e) => warn!(error = %e, "initial connect failed; continuing unconnected"),
        }

        let mut hb = HeartbeatLoop::new(
            Arc::clone(&client),
            Arc::clone(&identity_store),
            config.heartbeat_period(),
            config.retry_policy(),
        );
        hb.start();
        heartbeat = Some(hb);

        let mut fetch = AdFetcher::new(
            Arc::clone(&client),
            Arc::clone(&storage),
            config.ad_fetch_period(),
            config.retry_policy(),
        );
        let player_for_fetch = Arc::clone(&player);
        fetch.set_on_manifest(move |manifest| player_for_fetch.update_ads(manifest));
        fetch.start();
        fetcher = Some(fetch);
    }

    // The player runs regardless of credentials so locally injected or
    // previously cached ads keep playing offline.
    player.start()?;

    let mut status_tick = tokio::time::interval(Duration::from_secs(30));
    status_tick.tick().await; // completes immediately

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        #[cfg(unix)]
        let terminate = sigterm.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = terminate => {
                info!("termination signal received, shutting down");
                break;
            }
            _ = status_tick.tick() => {
                print_status(heartbeat.as_ref(), &player);
            }
        }
    }

    // Player first so the renderer child dies, then the loops.
    player.stop().await;
    if let Some(mut fetch) = fetcher {
        fetch.stop().await;
    }
    if let Some(mut hb) = heartbeat {
        hb.stop().await;
    }
    info!("shutdown complete");
    Ok(())
}

fn print_status(heartbeat: Option<&HeartbeatLoop>, player: &Player) {
    if let Some(heartbeat) = heartbeat {
        let snapshot = heartbeat.snapshot();
        match snapshot.since_last_sent() {
            Some(elapsed) => info!(
                status = %snapshot.status,
                last_sent_secs_ago = elapsed.as_secs(),
                "heartbeat status"
            ),
            None => info!(status = %snapshot.status, "heartbeat status"),
        }
    }

    let stats = player.stats();
    match player.current_ad() {
        Some(ad) => info!(
            ad = %ad.id,
            kind = %ad.kind,
            total_played = stats.total_ads_played,
            "player status"
        ),
        None => info!(
            total_played = stats.total_ads_played,
            "player status: waiting for ads"
        ),
    }
}

fn manage_credentials(root: StorageRoot, action: CredentialsAction) -> anyhow::Result<()> {
    let store = CredentialStore::new(&root);
    match action {
        CredentialsAction::Set { screen_id, passkey } => {
            let credentials = Credentials::new(screen_id, passkey);
            anyhow::ensure!(
                credentials.is_valid(),
                "both screen id and passkey are required"
            );
            store.save(&credentials)?;
            println!("[OK] Credentials saved for screen {}", credentials.screen_id);
        }
        CredentialsAction::Show => match store.load() {
            Ok(credentials) => {
                println!("[OK] Credentials: Configured");
                println!("   Screen ID: {}", credentials.screen_id);
                println!("   Passkey: {}", credentials.masked_passkey());
            }
            Err(e) => {
                println!("[WARN] Credentials: Not configured ({e})");
            }
        },
    }
    Ok(())
}

fn check_renderers() {
    let categories: &[(&str, &[&str])] = &[
        ("image", &["feh", "imv", "sxiv", "xdg-open"]),
        ("video", &["mpv", "vlc", "ffplay", "xdg-open"]),
        ("html", &["firefox", "chromium", "chrome", "xdg-open"]),
    ];

    for (category, candidates) in categories {
        match renderers::find_viewer(candidates) {
            Some(viewer) => println!("[OK] {category}: {viewer}"),
            None => println!("[WARN] {category}: no viewer found (tried {candidates:?})"),
        }
    }
    println!("[OK] text: built-in terminal output");
}
