mod cli;

use tapedeck::backend::BackendKind;
use tapedeck::config::{self, SessionConfig};
use tapedeck::download::{HttpFetcher, RangeFetcher};
use tapedeck::events::EventBus;
use tapedeck::playback::{InstantSource, PlaybackLoop, Simulation, SimulationConfig};
use tapedeck::session::{MediaSession, SessionOptions};
use tapedeck::MediaDescriptor;
use tapedeck_common::Direction;
use tapedeck_media::SegmentIndex;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tapedeck=trace,tapedeck_media=trace,tapedeck_common=debug".to_string()
        } else {
            "tapedeck=info,tapedeck_media=info,reqwest=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect {
            source,
            frame,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(inspect(&source, cli.config.as_deref(), frame, json))
        }
        Commands::Simulate {
            fps,
            frames,
            display_hz,
            seconds,
            drop_every,
            rate,
            backward,
            json,
        } => {
            let sim = SimulateArgs {
                fps,
                frames,
                display_hz,
                seconds,
                drop_every,
                rate,
                backward,
            };
            simulate(sim, cli.config.as_deref(), json)
        }
        Commands::Play {
            descriptor,
            backend,
            rendition,
            seek,
            seconds,
            rate,
        } => {
            let backend: BackendKind = backend.parse().map_err(anyhow::Error::msg)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(play(
                &descriptor,
                cli.config.as_deref(),
                backend,
                rendition,
                seek,
                seconds,
                rate,
            ))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tapedeck {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Read a local file or fetch a URL in full.
async fn read_source(source: &str, fetcher: &dyn RangeFetcher) -> Result<bytes::Bytes> {
    if is_url(source) {
        Ok(fetcher
            .fetch_all(source)
            .await
            .with_context(|| format!("Failed to fetch {}", source))?)
    } else {
        let data = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source))?;
        Ok(data.into())
    }
}

async fn inspect(
    source: &str,
    config_path: Option<&Path>,
    frame: Option<u64>,
    json: bool,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let fetcher = HttpFetcher::new(&config.download);
    let data = read_source(source, &fetcher).await?;
    let index = SegmentIndex::from_slice(&data)?;

    let lookup = frame.map(|f| {
        let found = index.find_segment_for_frame(f, Direction::Stopped);
        let span = found.map(|m| index.seek_range(&m));
        (f, found, span)
    });

    if json {
        let mut summary = serde_json::json!({
            "version": index.format_version(),
            "segments": index.len(),
            "fragments": index.fragment_count(),
            "frames": index.frame_count(),
            "total_bytes": index.total_bytes(),
            "timescale": index.timescale(),
            "start_bias": index.start_bias(),
            "random_seek": index.supports_random_seek(),
            "init_range": index.init_range(),
        });
        if let Some((f, found, span)) = lookup {
            summary["lookup"] = serde_json::json!({
                "frame": f,
                "match_index": found.map(|m| m.match_index),
                "last_sync_index": found.map(|m| m.last_sync_index),
                "near_boundary": found.map(|m| m.near_boundary),
                "seek_range": span,
            });
        }
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Index: {}", source);
    println!("Version: {}", index.format_version());
    println!("Segments: {} ({} fragments)", index.len(), index.fragment_count());
    println!("Frames: {}", index.frame_count());
    println!("Size: {} bytes", index.total_bytes());
    println!("Timescale: {}", index.timescale());
    println!("Start bias: {:.6}s", index.start_bias());
    println!(
        "Random seek: {}",
        if index.supports_random_seek() { "yes" } else { "no" }
    );
    if let Some(init) = index.init_range() {
        println!("Init segment: {}", init.range_header());
    }

    if let Some((f, found, span)) = lookup {
        match (found, span) {
            (Some(m), Some(span)) => {
                println!("\nFrame {}:", f);
                println!("  Fragment: segment {}", m.match_index);
                println!("  GOP starts: segment {}", m.last_sync_index);
                println!("  Near boundary: {}", m.near_boundary);
                println!("  Seek range: {} ({} bytes)", span.range_header(), span.len());
            }
            _ => println!("\nFrame {} is not covered by the index", f),
        }
    }

    Ok(())
}

struct SimulateArgs {
    fps: f64,
    frames: u64,
    display_hz: f64,
    seconds: f64,
    drop_every: Option<u64>,
    rate: f64,
    backward: bool,
}

fn simulate(args: SimulateArgs, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    if args.frames == 0 {
        anyhow::bail!("--frames must be at least 1");
    }
    if args.display_hz.is_nan() || args.display_hz <= 0.0 {
        anyhow::bail!("--display-hz must be positive");
    }

    let session = SessionConfig::new(args.fps, args.frames).with_playback(config.playback);
    let mut playback = PlaybackLoop::new(
        session,
        InstantSource::new(args.frames),
        Arc::new(EventBus::default()),
    );
    playback.set_rate(args.rate)?;
    let direction = if args.backward {
        playback.goto_frame(args.frames - 1)?;
        Direction::Backward
    } else {
        Direction::Forward
    };

    let mut sim = Simulation::new(
        playback,
        SimulationConfig {
            display_hz: args.display_hz,
            seconds: args.seconds,
            drop_every: args.drop_every,
            calibrate: true,
        },
    );
    let stats = sim.run(direction)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "Simulated {:.1}s of {} fps video on a {} Hz display",
        args.seconds, args.fps, args.display_hz
    );
    println!("  Monitor rate: {:.1} Hz", stats.monitor_fps);
    println!(
        "  Display ticks: {} ({} dropped)",
        stats.display_ticks, stats.dropped_ticks
    );
    println!("  Frame changes: {}", stats.frame_changes);
    println!("  Final frame: {}", stats.final_frame);
    println!("  Loader backoffs: {}", stats.loader_backoffs);
    println!("  Player restarts: {}", stats.player_deaths);
    println!("  Rate misses: {}", stats.rate_misses);
    println!("  Safe mode: {}", stats.safe_mode_entered);
    println!("  Reached end: {}", stats.finished);
    Ok(())
}

async fn play(
    source: &str,
    config_path: Option<&Path>,
    backend: BackendKind,
    rendition: Option<usize>,
    seek: Option<u64>,
    seconds: u64,
    rate: Option<f64>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let fetcher: Arc<dyn RangeFetcher> = Arc::new(HttpFetcher::new(&config.download));
    let data = read_source(source, fetcher.as_ref()).await?;
    let descriptor = MediaDescriptor::from_json(&data)?;

    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let log_events = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if !event.is_frame_change() {
                tracing::info!(?event, "event");
            }
        }
    });

    let options = SessionOptions {
        backend,
        rendition,
        decoder_factory: Arc::new(tapedeck::codec::HeadlessFactory::new(config.codec.hold_back)),
    };
    let mut session = MediaSession::load(descriptor, fetcher, config, events, options).await?;
    session.start_prefetch()?;

    if let Some(frame) = seek {
        let status = session.seek(frame)?;
        tracing::info!("Seek to frame {}: {:?}", frame, status);
    }
    if let Some(factor) = rate {
        session.set_rate(factor)?;
    }
    session.play(Direction::Forward)?;

    tokio::select! {
        r = session.run_for(Duration::from_secs(seconds)) => r?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    session.pause();
    println!("{}", serde_json::to_string_pretty(&session.stats())?);
    session.shutdown().await;
    log_events.abort();
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&config::Config::default());
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    println!(
        "  Buffers: {} x {} bytes",
        config.buffer.slot_count, config.buffer.slot_capacity_bytes
    );
    println!(
        "  Requests: {}s timeout, {} retries",
        config.download.request_timeout_secs, config.download.max_retries
    );
    println!("  Monitor default: {} Hz", config.playback.default_monitor_fps);
    println!("  Frame queue: {}", config.playback.frame_queue_depth);
    println!("  Decoder in-flight cap: {}", config.codec.max_in_flight);
}
