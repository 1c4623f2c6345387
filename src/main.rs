//! # Stream Denoise - Command Line Driver
//!
//! Runs a WAV file through a [`DenoiseStage`] the way a live pipeline would:
//! 20ms frames, paced in real time, output collected in order.
//!
//! ## What it does:
//! 1. **Loads configuration** from `denoise.toml`, `DENOISE_*` and `NCOMPASS_API_KEY`
//! 2. **Sets up logging** with `tracing-subscriber`
//! 3. **Streams the input** through the stage, frame by frame
//! 4. **Drains** in-flight batches and writes the output WAV
//! 5. **Prints** the stage statistics as JSON
//!
//! Ctrl-C stops feeding early; whatever was processed is still written out.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stream_denoise::audio::frame::INPUT_SAMPLE_RATE;
use stream_denoise::{AppConfig, AudioFrame, DenoiseStage, FrameProcessor};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Frame size fed to the stage.
const FRAME_MS: u64 = 20;

#[derive(Parser)]
#[command(name = "stream-denoise")]
#[command(about = "Stream a WAV file through the real-time denoise stage", long_about = None)]
struct Cli {
    /// 16kHz mono 16-bit WAV to denoise
    input: Option<PathBuf>,

    /// Where to write the result
    #[arg(short, long, default_value = "denoised.wav")]
    output: PathBuf,

    /// Configuration file (defaults to ./denoise.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Feed frames as fast as possible instead of in real time
    #[arg(long)]
    no_pace: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load_from(cli.config.as_deref()).context("failed to load configuration")?;

    init_tracing(&config.logging.filter)?;

    if cli.print_config {
        println!("{}", config.to_toml_redacted()?);
        return Ok(());
    }

    let Some(input) = cli.input.as_deref() else {
        bail!("no input file given (see --help)");
    };

    config.validate().context("invalid configuration")?;
    info!("Starting stream-denoise v{}", env!("CARGO_PKG_VERSION"));

    let samples = read_input(input)?;
    let out_rate = config.service.out_frame_rate;

    let mut stage = DenoiseStage::websocket(config.service)?;
    stage.start();

    let mut output = run(&mut stage, &samples, !cli.no_pace).await;
    output.extend(stage.drain_in_flight().await);

    let stats = stage.stats();
    output.extend(stage.shutdown().await);

    write_output(&cli.output, &output, out_rate)?;
    info!(path = %cli.output.display(), frames = output.len(), "Output written");

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Feed `samples` to the stage in 20ms frames until done or Ctrl-C.
async fn run(stage: &mut DenoiseStage, samples: &[i16], pace: bool) -> Vec<AudioFrame> {
    let frame_len = (INPUT_SAMPLE_RATE as u64 * FRAME_MS / 1000) as usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut output = Vec::new();
    for (sequence, chunk) in samples.chunks(frame_len).enumerate() {
        if pace {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut ctrl_c => {
                    warn!(frames_fed = sequence, "Interrupted, stopping input");
                    break;
                }
            }
        } else {
            // Let the connection task run between frames
            tokio::task::yield_now().await;
        }

        let frame = AudioFrame::from_samples(chunk, INPUT_SAMPLE_RATE, sequence as u64);
        output.extend(stage.process(frame));
    }

    output.extend(stage.drain_ready());
    output
}

fn read_input(path: &Path) -> Result<Vec<i16>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let (header, data) =
        wav::read(&mut reader).with_context(|| format!("failed to read WAV {}", path.display()))?;

    if header.channel_count != 1 || header.sampling_rate != INPUT_SAMPLE_RATE {
        bail!(
            "input must be 16kHz mono, got {}Hz with {} channels",
            header.sampling_rate,
            header.channel_count
        );
    }

    match data.try_into_sixteen() {
        Ok(samples) => Ok(samples),
        Err(_) => bail!("input must be 16-bit PCM"),
    }
}

/// Write frames at `rate` as one mono 16-bit WAV.
///
/// Passthrough frames are at the input rate; they are written as-is, so
/// mixed-rate output only plays back correctly when `out_frame_rate` is 16kHz.
fn write_output(path: &Path, frames: &[AudioFrame], rate: u32) -> Result<()> {
    let mismatched = frames.iter().filter(|f| f.sample_rate() != rate).count();
    if mismatched > 0 {
        warn!(mismatched, rate, "Output mixes sample rates");
    }

    let samples: Vec<i16> = frames.iter().flat_map(|f| f.samples()).collect();
    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, rate, 16);
    let mut file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file)?;
    Ok(())
}

/// Install the `tracing` subscriber. `RUST_LOG` overrides the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to initialize logging")?;

    Ok(())
}
