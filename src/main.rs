use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use soundweave::audio::{AudioDecoder, AudioLoader, TrackFetcher};
use soundweave::cli::Args;
use soundweave::config::Config;
use soundweave::error::Result;
use soundweave::generation::{GenerationJobClient, HttpJobApi};
use soundweave::library::{DirectoryCatalog, JsonPlaylistStore, TrackCache};
use soundweave::playback::{list_audio_devices, OutputSink, PlaybackEngine, QueueManager, RodioSink};
use soundweave::tasks::{
    log_events, read_commands, Channels, EngineCommand, SessionRequest, SessionTask, SinkFactory,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose);

    if args.list_devices {
        for device in list_audio_devices() {
            println!("{}: {}", device.index, device.name);
        }
        return Ok(());
    }

    info!("soundweave v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;

    if let Err(e) = run(config).await {
        error!("Application error: {}", e);
        return Err(e);
    }

    info!("soundweave shutdown complete");
    // The stdin reader's blocking read cannot be cancelled and would hold
    // the runtime open
    std::process::exit(0);
}

/// Initialize tracing subscriber
fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn run(config: Config) -> Result<()> {
    info!(
        music_dir = %config.library.music_dir.display(),
        cache_dir = %config.cache.dir.display(),
        scope = %config.library.scope,
        "Starting engine"
    );

    let decoder = AudioDecoder::new(&config.library.ffmpeg);
    decoder.probe().await?;
    let loader = Arc::new(AudioLoader::new(
        TrackFetcher::new(config.library.fetch_timeout),
        decoder,
    ));

    let catalog = Arc::new(DirectoryCatalog::new(&config.library.music_dir));
    let store = Arc::new(JsonPlaylistStore::new(&config.library.playlist_dir));
    let queue = QueueManager::new(store, config.library.scope.clone());

    let api = Arc::new(HttpJobApi::new(&config.generation));
    let client = Arc::new(GenerationJobClient::new(api, config.generation.clone()));
    let sweeper = Arc::clone(&client).spawn_sweeper(config.cache.sweep_interval);
    let track_cache = Arc::new(TrackCache::new(&config.cache.dir, client));

    let (engine, handles) = PlaybackEngine::new(config.engine.clone(), catalog, loader, queue);
    let engine = engine.with_track_cache(track_cache);

    let (cmd_tx, cmd_rx) = Channels::new().split();

    tokio::spawn(log_events(handles.events));
    tokio::spawn(read_commands(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        cmd_tx.clone(),
    ));

    // Ctrl-C ends the session the same way `quit` does
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Received Ctrl-C, shutting down...");
        let _ = cmd_tx
            .send(SessionRequest::detached(EngineCommand::Quit))
            .await;
    });

    let device = config.device;
    let sink_factory: SinkFactory =
        Box::new(move || Ok(Box::new(RodioSink::open(device)?) as Box<dyn OutputSink>));

    info!("Ready - type `join` to bind the output, `quit` to exit");
    SessionTask::new(engine, handles.signals, cmd_rx, sink_factory)
        .run()
        .await;

    sweeper.abort();
    Ok(())
}
