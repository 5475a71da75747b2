mod config;
mod logging;
mod matching;
mod ports;
mod services;
mod spotify_rs;
#[cfg(test)]
mod test_utils;
mod ytmusic_rs;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context};
use dialoguer::{Confirm, console::Term, theme::ColorfulTheme};

use crate::{
    config::{Config, SyncConfig},
    ports::destination::{LibraryPlaylist, Visibility},
    services::{
        cancel::{Cancellation, cancellation, spawn_cancel_listeners},
        lookup_cache::LookupCache,
        operation_log::OperationLog,
        orchestrator::{
            CatalogSyncOrchestrator, CreateOptions, OrchestratorSettings, SyncReport,
        },
        sync_engine::{
            ComparisonWindow, EngineSettings, SkipReason, SyncEngine, SyncOptions, SyncOutcome,
        },
        track_matcher::TrackMatcher,
    },
    spotify_rs::client::SpotifyApiClient,
    ytmusic_rs::client::YtMusicClient,
};

type Orchestrator = CatalogSyncOrchestrator<SpotifyApiClient, YtMusicClient>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `playlist_sync=debug`
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// Export spans to this OTLP gRPC endpoint
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct SyncArgs {
    /// Reuse cached search results from earlier runs
    #[arg(long)]
    use_cached: bool,

    /// Make created playlists public
    #[arg(long)]
    public: bool,

    /// Like every transferred track
    #[arg(long)]
    like: bool,

    /// Add tracks to existing playlists instead of replacing them
    #[arg(long)]
    append: bool,

    /// Fraction of in-order matches needed to leave a playlist alone
    #[arg(long)]
    tolerance: Option<f64>,

    /// Compare every track instead of the first few
    #[arg(long)]
    full_compare: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct BatchArgs {
    /// Playlists processed between pauses
    #[arg(long)]
    batch_size: Option<usize>,

    /// Pause between batches, e.g. `2s`
    #[arg(long, value_parser = humantime::parse_duration)]
    batch_delay: Option<Duration>,
}

#[derive(clap::Args, Debug, Clone)]
struct CreateArgs {
    /// Name for the new playlist (default: the source name)
    #[arg(short, long)]
    name: Option<String>,

    /// Append the current date to the name
    #[arg(short, long)]
    date: bool,

    /// Description for the new playlist (default: the source description)
    #[arg(short, long)]
    info: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a playlist from a Spotify playlist or album link
    Create {
        /// Playlist or album link, URI or id
        playlist: String,
        #[command(flatten)]
        create: CreateArgs,
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Create a playlist from your liked songs
    Liked {
        #[command(flatten)]
        create: CreateArgs,
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Transfer all public playlists of a Spotify user
    All {
        /// Spotify user id
        user: String,
        #[command(flatten)]
        sync: SyncArgs,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Transfer your saved playlists and albums that are missing on YouTube Music
    AllSaved {
        #[command(flatten)]
        sync: SyncArgs,
        #[command(flatten)]
        batch: BatchArgs,
        /// Also include the public playlists of this user
        #[arg(long)]
        target_user: Option<String>,
    },
    /// Update one YouTube Music playlist from a Spotify playlist
    Update {
        /// Playlist or album link, URI or id
        playlist: String,
        /// Name of the YouTube Music playlist to update
        name: String,
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Update every tracked playlist that changed on Spotify
    UpdateAll {
        #[command(flatten)]
        sync: SyncArgs,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Start tracking existing YouTube Music playlists that mirror Spotify ones
    InitialSetup {
        /// Also pair with the public playlists of this user
        #[arg(long)]
        target_user: Option<String>,
    },
    /// Run all-saved and update-all in a loop until interrupted
    Sync {
        #[command(flatten)]
        sync: SyncArgs,
        #[command(flatten)]
        batch: BatchArgs,
        /// Also include the public playlists of this user
        #[arg(long)]
        target_user: Option<String>,
        /// Wait between cycles, e.g. `10m`
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
    /// Delete YouTube Music playlists whose title matches a regex
    Remove {
        /// Regex matched from the start of the title
        pattern: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Look up a single Spotify track on YouTube Music
    Search {
        /// Track link, URI or id
        link: String,
        /// Reuse cached search results
        #[arg(long)]
        use_cached: bool,
    },
    #[command(subcommand)]
    Cache(CacheCommands),
    #[command(subcommand)]
    Log(LogCommands),
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Delete the search lookup cache
    Clear,
}

#[derive(Subcommand, Debug)]
enum LogCommands {
    /// Print operation counts and tracked playlists
    Stats,
    /// Print the operations recorded for one playlist
    History {
        /// YouTube Music playlist name
        name: String,
    },
    /// Drop operations older than the given number of days
    Prune {
        #[arg(long, default_value = "30")]
        days: u32,
    },
    /// Print the path to the operation log
    Location,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

fn playlist_url(playlist_id: &str) -> String {
    format!("https://music.youtube.com/playlist?list={playlist_id}")
}

fn sync_options(args: &SyncArgs, config: &SyncConfig) -> SyncOptions {
    SyncOptions {
        use_cache: args.use_cached,
        append: args.append,
        tolerance: args.tolerance.unwrap_or(config.tolerance),
        window: if args.full_compare {
            ComparisonWindow::Full
        } else {
            ComparisonWindow::from_limit(config.comparison_window)
        },
        visibility: Visibility::from_public(args.public),
        like: args.like,
    }
}

fn create_options(args: CreateArgs) -> CreateOptions {
    CreateOptions {
        name: args.name,
        description: args.info,
        date_suffix: args.date,
    }
}

fn build_orchestrator(config: &Config, batch: Option<&BatchArgs>) -> Result<Orchestrator> {
    let source = SpotifyApiClient::new(config.spotify_credentials());
    let destination = YtMusicClient::new(config.ytmusic_settings())?;

    let cache = LookupCache::open_or_empty(&config.lookup_cache_path()?);
    let matcher = TrackMatcher::new(cache, Some(config.not_found_path()?))?;
    let log = OperationLog::open_or_disabled(&config.operation_log_path()?);

    let sync = config.sync();
    let engine = SyncEngine::new(
        destination,
        matcher,
        log,
        EngineSettings {
            settle_delay: sync.settle_delay()?,
        },
    );
    let settings = OrchestratorSettings {
        batch_size: batch.and_then(|b| b.batch_size).unwrap_or(sync.batch_size),
        batch_delay: match batch.and_then(|b| b.batch_delay) {
            Some(delay) => delay,
            None => sync.batch_delay()?,
        },
        max_playlist_tracks: sync.max_playlist_tracks,
    };
    Ok(CatalogSyncOrchestrator::new(source, engine, settings))
}

fn print_outcome(name: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Created {
            playlist_id,
            title,
            tracks_found,
        } => {
            println!("Created '{title}' with {tracks_found} tracks");
            println!("{}", playlist_url(playlist_id));
        }
        SyncOutcome::Updated {
            playlist_id,
            tracks_added,
        }
        | SyncOutcome::Appended {
            playlist_id,
            tracks_added,
        } => {
            println!("Updated '{name}' with {tracks_added} tracks");
            println!("{}", playlist_url(playlist_id));
        }
        SyncOutcome::Skipped(SkipReason::AlreadyExists { existing_name }) => {
            println!("'{name}' already exists as '{existing_name}'")
        }
        SyncOutcome::Skipped(_) => println!("'{name}' is already up to date"),
        SyncOutcome::NotFound => println!("'{name}' was not found on YouTube Music"),
    }
}

fn print_report(report: &SyncReport) {
    println!("Transferred: {}", report.transferred);
    println!("Skipped:     {}", report.skipped);
    println!("Not found:   {}", report.not_found);
    println!("Failed:      {}", report.failed);
    if report.cancelled {
        println!("Stopped early on request");
    }
}

fn confirm_removal(playlists: &[LibraryPlaylist]) -> Result<bool> {
    println!("The following playlists will be deleted:");
    for playlist in playlists {
        println!("  {}", playlist.title);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Delete {} playlists?", playlists.len()))
        .default(false)
        .interact_on(&Term::stderr())
        .wrap_err("Failed to read confirmation")
}

fn listen_for_cancel() -> Cancellation {
    let (handle, cancel) = cancellation();
    spawn_cancel_listeners(handle);
    eprintln!("Press Enter or Ctrl-C to stop after the current playlist");
    cancel
}

fn print_log_stats(log: &OperationLog) {
    let stats = log.stats();
    println!("Log file:          {}", log.path().display());
    println!("Operations:        {}", stats.total_operations);
    println!("  successful:      {}", stats.successful);
    println!("  failed:          {}", stats.failed);
    println!("Tracked playlists: {}", stats.tracked_playlists);
    if let Some(last) = stats.last_operation {
        println!("Last operation:    {}", last.format("%Y-%m-%d %H:%M:%S"));
    }
    for (kind, count) in &stats.by_kind {
        println!("  {:<15} {count}", kind.as_str());
    }
    for tracked in log.tracked_playlists() {
        println!(
            "  '{}' <- '{}' ({}/{} tracks, {})",
            tracked.destination_name,
            tracked.source_name,
            tracked.state.tracks_found,
            tracked.state.tracks_total,
            tracked.state.last_updated.format("%Y-%m-%d"),
        );
    }
}

async fn run(args: Args) -> Result<()> {
    if let Commands::Config(command) = &args.command {
        let path = match &args.config {
            Some(path) => Some(path.clone()),
            None => Config::config_path(),
        };
        match (command, path) {
            (ConfigCommands::CreateDefault, Some(path)) => {
                if Config::create_default(&path)? {
                    println!("Created {}", path.display());
                } else {
                    println!("{} already exists", path.display());
                }
            }
            (ConfigCommands::Path, Some(path)) => println!("{}", path.display()),
            (_, None) => println!("No default config path found"),
        }
        return Ok(());
    }

    tracing::debug!("Loading configuration");
    let config =
        Config::load(args.config.as_deref()).wrap_err("Failed to load playlist-sync config")?;

    match args.command {
        Commands::Create {
            playlist,
            create,
            sync,
        } => {
            let options = sync_options(&sync, config.sync());
            let mut orchestrator = build_orchestrator(&config, None)?;
            let create = create_options(create);
            let outcome = orchestrator.create_one(&playlist, &create, &options).await?;
            print_outcome(create.name.as_deref().unwrap_or(&playlist), &outcome);
        }
        Commands::Liked { create, sync } => {
            let options = sync_options(&sync, config.sync());
            let mut orchestrator = build_orchestrator(&config, None)?;
            let create = create_options(create);
            let outcome = orchestrator.liked(&create, &options).await?;
            print_outcome(create.name.as_deref().unwrap_or("Liked Songs"), &outcome);
        }
        Commands::All { user, sync, batch } => {
            let options = sync_options(&sync, config.sync());
            let mut orchestrator = build_orchestrator(&config, Some(&batch))?;
            let mut cancel = listen_for_cancel();
            let report = orchestrator.transfer_user(&user, &options, &mut cancel).await?;
            print_report(&report);
        }
        Commands::AllSaved {
            sync,
            batch,
            target_user,
        } => {
            let options = sync_options(&sync, config.sync());
            let mut orchestrator = build_orchestrator(&config, Some(&batch))?;
            let mut cancel = listen_for_cancel();
            let report = orchestrator
                .transfer_saved(&options, target_user.as_deref(), &mut cancel)
                .await?;
            print_report(&report);
        }
        Commands::Update {
            playlist,
            name,
            sync,
        } => {
            let options = sync_options(&sync, config.sync());
            let mut orchestrator = build_orchestrator(&config, None)?;
            let outcome = orchestrator.update_one(&playlist, &name, &options).await?;
            print_outcome(&name, &outcome);
        }
        Commands::UpdateAll { sync, batch } => {
            let options = sync_options(&sync, config.sync());
            let mut orchestrator = build_orchestrator(&config, Some(&batch))?;
            let mut cancel = listen_for_cancel();
            let report = orchestrator.update_tracked(&options, &mut cancel).await?;
            print_report(&report);
        }
        Commands::InitialSetup { target_user } => {
            let mut orchestrator = build_orchestrator(&config, None)?;
            let report = orchestrator.initial_setup(target_user.as_deref()).await?;
            println!("Now tracking:    {}", report.tracked);
            println!("Already tracked: {}", report.already_tracked);
            println!("No Spotify match: {}", report.unmatched);
            println!("Failed:          {}", report.failed);
        }
        Commands::Sync {
            sync,
            batch,
            target_user,
            interval,
        } => {
            let options = sync_options(&sync, config.sync());
            let interval = match interval {
                Some(interval) => interval,
                None => config.sync().interval()?,
            };
            let mut orchestrator = build_orchestrator(&config, Some(&batch))?;
            let mut cancel = listen_for_cancel();
            let cycles = orchestrator
                .sync_forever(&options, target_user.as_deref(), interval, &mut cancel)
                .await?;
            println!("Stopped after {cycles} sync cycles");
        }
        Commands::Remove { pattern, yes } => {
            let orchestrator = build_orchestrator(&config, None)?;
            let deleted = orchestrator
                .remove_playlists(&pattern, |playlists| {
                    if yes {
                        Ok(true)
                    } else {
                        confirm_removal(playlists)
                    }
                })
                .await?;
            println!("Deleted {deleted} playlists");
        }
        Commands::Search { link, use_cached } => {
            let mut orchestrator = build_orchestrator(&config, None)?;
            let (track, id) = orchestrator.search_one(&link, use_cached).await?;
            match id {
                Some(id) => println!(
                    "{} - {}: https://music.youtube.com/watch?v={id}",
                    track.artist, track.name
                ),
                None => println!("{} - {}: not found", track.artist, track.name),
            }
        }
        Commands::Cache(CacheCommands::Clear) => {
            let path = config.lookup_cache_path()?;
            if LookupCache::clear(&path)
                .wrap_err_with(|| format!("Failed to delete {}", path.display()))?
            {
                println!("Deleted {}", path.display());
            } else {
                println!("No cache at {}", path.display());
            }
        }
        Commands::Log(command) => {
            let path = config.operation_log_path()?;
            if let LogCommands::Location = command {
                println!("{}", path.display());
                return Ok(());
            }
            let mut log = OperationLog::open(&path)
                .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
            match command {
                LogCommands::Stats => print_log_stats(&log),
                LogCommands::History { name } => {
                    for record in log.history(&name) {
                        println!(
                            "{}  {:<13} {:<5} {}/{}  '{}'",
                            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            record.kind.as_str(),
                            if record.success { "ok" } else { "FAIL" },
                            record.tracks_found,
                            record.tracks_total,
                            record.source_playlist_name,
                        );
                    }
                }
                LogCommands::Prune { days } => {
                    let removed = log.prune_older_than(days)?;
                    println!("Removed {removed} operations older than {days} days");
                }
                LogCommands::Location => {}
            }
        }
        Commands::Config(_) => {}
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = logging::init_tracing(&args.log_level, args.otlp_endpoint.as_deref())?;
    tracing::debug!("{} starting", logging::SERVICE_NAME);

    let result = run(args).await;

    if let Some(provider) = tracer_provider {
        if let Err(error) = provider.shutdown() {
            eprintln!("Failed to flush traces: {error}");
        }
    }
    result
}
