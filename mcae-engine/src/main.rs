//! MCAE command-line front end (mcae)
//!
//! Small driver around the engine library: lists devices, plays a test
//! tone through a stream, or plays a sound effect. Runs the engine's
//! maintenance pass on a tokio interval and shuts down cleanly on Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mcae_common::EngineSettings;
use mcae_engine::engine::StreamId;
use mcae_engine::hal::{AudioHal, CpalHal, NullHal};
use mcae_engine::{AudioFormat, ChannelLayout, Engine, SampleFormat, StreamOptions};
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Maintenance pass period
const GC_INTERVAL: Duration = Duration::from_millis(50);

/// Null backend clock tick
const NULL_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Cpal,
    Null,
}

/// Command-line arguments for mcae
#[derive(Parser, Debug)]
#[command(name = "mcae")]
#[command(about = "Media-center audio engine")]
#[command(version)]
struct Args {
    /// Config file (overrides MCAE_CONFIG and the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device name
    #[arg(short, long, env = "MCAE_DEVICE")]
    device: Option<String>,

    /// Master volume 0.0-1.0
    #[arg(long)]
    volume: Option<f32>,

    /// Audio backend
    #[arg(long, value_enum, default_value = "cpal", env = "MCAE_BACKEND")]
    backend: Backend,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List output devices
    Devices,
    /// Play a sine tone through a stream
    Tone {
        #[arg(long, default_value = "440")]
        frequency: f32,
        #[arg(long, default_value = "3")]
        seconds: f32,
        #[arg(long, default_value = "44100")]
        rate: u32,
        #[arg(long, default_value = "2")]
        channels: usize,
    },
    /// Play a sound effect file
    Sound { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; the config file may change the level afterwards
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "mcae=info,mcae_engine=info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut settings = EngineSettings::load_or_default(args.config.as_deref())
        .context("Failed to load engine settings")?;
    if let Some(device) = &args.device {
        settings.device = device.clone();
    }
    if let Some(volume) = args.volume {
        settings.master_volume = volume;
    }
    let settings = settings.validated();

    if std::env::var("RUST_LOG").is_err() {
        let level = &settings.logging.level;
        let directive = format!("mcae={},mcae_engine={}", level, level);
        match EnvFilter::try_new(&directive) {
            Ok(f) => {
                if let Err(e) = filter_handle.reload(f) {
                    warn!("Failed to apply log level '{}': {}", level, e);
                }
            }
            Err(e) => warn!("Invalid log level '{}': {}", level, e),
        }
    }

    info!(
        "Starting mcae {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let null = NullHal::new();
    let hal: Box<dyn AudioHal> = match args.backend {
        Backend::Cpal => Box::new(CpalHal::new()),
        Backend::Null => Box::new(null.clone()),
    };
    let engine = Engine::new(hal, settings);

    let gc_engine = Arc::clone(&engine);
    let gc_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(GC_INTERVAL);
        loop {
            interval.tick().await;
            gc_engine.collect_garbage();
        }
    });

    let clock_task = (args.backend == Backend::Null).then(|| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(NULL_TICK);
            loop {
                interval.tick().await;
                if let Some(format) = engine.output_format() {
                    let frames = format.sample_rate as u128 * NULL_TICK.as_millis() / 1000;
                    null.pull(frames as usize);
                }
            }
        })
    });

    let result = tokio::select! {
        r = run(Arc::clone(&engine), args.command) => r,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    engine.shutdown();
    gc_task.abort();
    if let Some(task) = clock_task {
        task.abort();
    }
    info!("Shutdown complete");
    result
}

async fn run(engine: Arc<Engine>, command: Command) -> Result<()> {
    match command {
        Command::Devices => list_devices(&engine),
        Command::Tone {
            frequency,
            seconds,
            rate,
            channels,
        } => play_tone(engine, frequency, seconds, rate, channels).await,
        Command::Sound { path } => play_sound(engine, path).await,
    }
}

fn list_devices(engine: &Engine) -> Result<()> {
    let devices = engine
        .enumerate_output_devices()
        .context("Failed to enumerate output devices")?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        let layout = device
            .preferred_layout
            .map_or_else(|| "-".to_string(), |l| l.to_string());
        println!(
            "{} {} ({} channels, preferred {})",
            if device.is_default { "*" } else { " " },
            device.name,
            device.channels,
            layout
        );
    }
    Ok(())
}

async fn play_tone(
    engine: Arc<Engine>,
    frequency: f32,
    seconds: f32,
    rate: u32,
    channels: usize,
) -> Result<()> {
    let layout = ChannelLayout::from_count(channels)
        .with_context(|| format!("Unsupported channel count {}", channels))?;
    let format = AudioFormat::new(rate, layout, SampleFormat::S16);

    let drained = Arc::new(Notify::new());
    let notify = Arc::clone(&drained);
    let options = StreamOptions::default().on_drain(Arc::new(move |_id: StreamId| {
        notify.notify_one();
    }));
    let stream = engine
        .create_stream(format.clone(), options)
        .context("Failed to create tone stream")?;
    info!("Playing {}Hz for {}s as {}", frequency, seconds, format);

    let producer_stream = Arc::clone(&stream);
    let producer = tokio::task::spawn_blocking(move || {
        let total = (seconds.max(0.0) * rate as f32) as usize;
        let chunk_frames = 1024;
        let mut block = Vec::with_capacity(chunk_frames * channels);
        let mut written = 0;

        while written < total {
            let n = chunk_frames.min(total - written);
            block.clear();
            for i in 0..n {
                let t = (written + i) as f32 / rate as f32;
                let v = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5;
                let s = (v * i16::MAX as f32) as i16;
                block.extend(std::iter::repeat(s).take(channels));
            }
            let bytes: &[u8] = bytemuck::cast_slice(&block);
            while producer_stream.add_data(bytes) == 0 {
                if !producer_stream.is_valid() || producer_stream.is_deleted() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            written += n;
        }
        producer_stream.drain();
    });

    producer.await.context("Tone producer failed")?;
    if stream.is_draining() && stream.is_valid() {
        drained.notified().await;
        info!("{} drained", stream.id());
    }
    engine.free_stream(&stream);
    Ok(())
}

async fn play_sound(engine: Arc<Engine>, path: PathBuf) -> Result<()> {
    let sound = engine
        .load_sound(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    info!("Playing '{}' ({:.2}s)", sound.name(), sound.duration());

    if !engine.play_sound(&sound).context("Failed to play sound")? {
        bail!("Sound could not be played right now");
    }
    while sound.is_playing() {
        tokio::time::sleep(GC_INTERVAL).await;
    }
    engine.free_sound(&sound);
    Ok(())
}
