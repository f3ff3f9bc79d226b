//! # platter-play
//!
//! Feed a raw 16-bit PCM file through the playback sink. Debug/bring-up
//! tool: exercises the full sink lifecycle (start, packet deposits, drain)
//! against a real card, reporting playback progress as chunks become
//! audible.

use anyhow::{Context, Result};
use clap::Parser;
use platter::{AlsaSink, SinkConfig, TracingLogger};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How many bytes each packet carries; a couple of periods of CD audio.
const PACKET_BYTES: usize = 32768;

#[derive(Parser, Debug)]
#[command(name = "platter-play")]
#[command(about = "Play a raw 16-bit PCM file through the platter sink")]
#[command(version)]
struct Args {
    /// Raw PCM file (interleaved signed 16-bit)
    file: PathBuf,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Card name (overrides config file)
    #[arg(long)]
    card: Option<String>,

    /// Sample rate in Hz
    #[arg(short, long, default_value_t = 44100)]
    rate: u32,

    /// Channel count
    #[arg(long, default_value_t = 2)]
    channels: u32,

    /// Samples are big-endian
    #[arg(long)]
    big_endian: bool,

    /// Keep retrying when the card cannot be opened
    #[arg(long)]
    start_without_device: bool,

    /// Write worker timing records to the performance log
    #[arg(long)]
    log_performance: bool,
}

/// Packet identity for one file chunk.
#[derive(Debug)]
struct Chunk {
    index: usize,
    offset: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SinkConfig::load(path)?,
        None => SinkConfig::default(),
    };
    if let Some(card) = args.card.clone() {
        config.card = card;
    }
    config.start_without_device |= args.start_without_device;
    config.log_performance |= args.log_performance;

    info!(
        "playing {} ({} Hz, {} ch, {}) on {}",
        args.file.display(),
        args.rate,
        args.channels,
        if args.big_endian { "big-endian" } else { "little-endian" },
        config.device_name()
    );

    let sink: AlsaSink<Chunk> = AlsaSink::new(&config, Arc::new(TracingLogger))?;

    // Worker messages surface on their own thread.
    let drain = sink.log_drain();
    let log_thread = thread::spawn(move || drain.run());

    sink.start(args.channels, 2, args.rate, args.big_endian)?;

    let mut file = File::open(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;

    let mut buf = vec![0u8; PACKET_BYTES];
    let mut index = 0;
    let mut offset = 0u64;
    let mut audible: Option<Arc<Chunk>> = None;

    'feed: loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let packet = Arc::new(Chunk { index, offset });
        index += 1;
        offset += n as u64;

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            let status = sink.add_packet(&packet, pending);
            if let Some(err) = status.device_error {
                info!("device error: {}", err);
            }
            let closed = status.stored == 0
                && status.playing.is_none()
                && status.device_error.is_none();
            report_progress(&mut audible, status.playing);
            if closed {
                // Sink closed under us.
                break 'feed;
            }
            pending = &pending[status.stored..];
        }
    }

    info!("end of file, draining");
    while let Some(status) = sink.drain() {
        if let Some(err) = status.device_error {
            info!("device error: {}", err);
        }
        report_progress(&mut audible, status.playing);
    }

    info!("playback finished");
    drop(sink);
    let _ = log_thread.join();
    Ok(())
}

fn report_progress(audible: &mut Option<Arc<Chunk>>, playing: Option<Arc<Chunk>>) {
    if let Some(chunk) = playing {
        let changed = audible
            .as_ref()
            .map(|prev| !Arc::ptr_eq(prev, &chunk))
            .unwrap_or(true);
        if changed {
            debug!("playing chunk {} (offset {})", chunk.index, chunk.offset);
            *audible = Some(chunk);
        }
    }
}
