//! dmic-streamer - triggered audio capture over a serial stream
//!
//! Subcommands:
//! - `dmic-streamer stream` - Run the pipeline; each stdin line is a button press
//! - `dmic-streamer receive` - Split a captured stream into WAV files
//! - `dmic-streamer config` - Print the default configuration
//! - `dmic-streamer devices` - List audio inputs (`microphone` feature)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dmic_streamer::capture::{CaptureDevice, Pattern, SyntheticCapture};
use dmic_streamer::receiver::{receive_sessions, write_wav, ReceiveOptions};
use dmic_streamer::recorder::{LogIndicator, SessionEvent, TriggerOutcome};
use dmic_streamer::transport::IoTransport;
use dmic_streamer::{StreamConfig, Streamer};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

#[derive(Parser)]
#[command(name = "dmic-streamer")]
#[command(about = "Capture audio in triggered sessions and stream it as framed PCM")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture pipeline
    Stream {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where the framed stream goes ("-" for stdout)
        #[arg(short, long, default_value = "-")]
        output: String,

        /// Generate a sine tone at this frequency instead of a ramp
        #[arg(long)]
        tone: Option<f32>,

        /// Capture from an input device
        #[arg(long)]
        microphone: bool,

        /// Input device name (default device if omitted)
        #[arg(long, requires = "microphone")]
        device: Option<String>,

        /// Pace synthetic capture at the configured sample rate
        #[arg(long)]
        realtime: bool,
    },

    /// Decode a captured stream into one WAV file per session
    Receive {
        /// JSON configuration file matching the sender
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Captured stream: a file, a serial port, or "-" for stdin
        #[arg(short, long)]
        input: String,

        /// Output WAV path; later sessions get a numeric suffix
        #[arg(short, long)]
        output: PathBuf,

        /// Baud rate when the input is a serial port
        #[arg(long, default_value_t = 921_600)]
        baud: u32,

        /// Seconds to wait for the first session to start (0 waits forever)
        #[arg(long, default_value_t = 10)]
        sync_timeout: u64,

        /// Exit after this many sessions
        #[arg(long)]
        sessions: Option<usize>,
    },

    /// Print the default configuration as JSON
    Config,

    /// List audio input devices
    #[cfg(feature = "microphone")]
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    dmic_streamer::init_tracing("dmic_streamer=info");

    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            config,
            output,
            tone,
            microphone,
            device,
            realtime,
        } => {
            let config = load_config(config.as_deref())?;
            let device = build_device(tone, microphone, device, realtime)?;
            run_stream(config, device, &output).await
        }
        Commands::Receive {
            config,
            input,
            output,
            baud,
            sync_timeout,
            sessions,
        } => {
            let config = load_config(config.as_deref())?;
            let reader = open_input(&input, baud)?;
            let options = ReceiveOptions {
                sync_timeout: (sync_timeout > 0).then(|| Duration::from_secs(sync_timeout)),
                max_sessions: sessions,
                ..ReceiveOptions::new(config.chunk_bytes())
            };
            run_receive(&config, reader, options, &output)
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&StreamConfig::default())?);
            Ok(())
        }
        #[cfg(feature = "microphone")]
        Commands::Devices => {
            for device in dmic_streamer::capture::list_input_devices() {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{}{}", device.name, marker);
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StreamConfig> {
    match path {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(StreamConfig::default()),
    }
}

#[cfg(feature = "microphone")]
fn microphone_device(device: Option<String>) -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(dmic_streamer::capture::MicrophoneCapture::new(device)))
}

#[cfg(not(feature = "microphone"))]
fn microphone_device(_device: Option<String>) -> Result<Box<dyn CaptureDevice>> {
    bail!("built without the `microphone` feature")
}

fn build_device(
    tone: Option<f32>,
    microphone: bool,
    device: Option<String>,
    realtime: bool,
) -> Result<Box<dyn CaptureDevice>> {
    if microphone {
        if tone.is_some() {
            bail!("--tone and --microphone are mutually exclusive");
        }
        return microphone_device(device);
    }

    let pattern = match tone {
        Some(frequency_hz) => Pattern::Tone { frequency_hz },
        None => Pattern::Ramp,
    };
    Ok(Box::new(SyntheticCapture::new(pattern).with_realtime(realtime)))
}

fn open_output(output: &str) -> Result<Box<dyn Write + Send>> {
    if output == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(output).with_context(|| format!("Failed to create {}", output))?;
    Ok(Box::new(file))
}

async fn run_stream(config: StreamConfig, device: Box<dyn CaptureDevice>, output: &str) -> Result<()> {
    let transport = Arc::new(IoTransport::new(open_output(output)?));
    let streamer = Streamer::spawn(config, device, transport, Arc::new(LogIndicator::new()))?;

    let mut events = streamer.subscribe();
    let reporter = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::Started { id } => tracing::info!("Session {} started", id),
                SessionEvent::Finished(report) => match serde_json::to_string(&report) {
                    Ok(json) => tracing::info!("Session finished: {}", json),
                    Err(e) => tracing::warn!("Failed to serialize session report: {}", e),
                },
                SessionEvent::Failed { id, error } => {
                    tracing::error!("Session {} failed: [{}] {}", id, error.code, error.message)
                }
                SessionEvent::Drained { id, chunks_written } => {
                    tracing::info!("Session {} drained ({} chunks)", id, chunks_written)
                }
            }
        }
    });

    tracing::info!("Press Enter to start a session, Ctrl-D to quit");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while lines.next_line().await?.is_some() {
        match streamer.fire() {
            TriggerOutcome::Accepted => tracing::debug!("Trigger accepted"),
            TriggerOutcome::Coalesced => tracing::debug!("Trigger coalesced with a pending one"),
            TriggerOutcome::Rejected => tracing::info!("Session already running, trigger ignored"),
        }
    }

    let stats = streamer.shutdown().await?;
    reporter.abort();
    if stats.send_failures > 0 {
        tracing::warn!("{} chunk sends failed", stats.send_failures);
    }
    Ok(())
}

/// Stdin, a regular file, or anything else (a tty) as a serial port
fn open_input(input: &str, baud: u32) -> Result<Box<dyn Read>> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }

    let is_file = std::fs::metadata(input)
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if is_file {
        let file = File::open(input).with_context(|| format!("Failed to open {}", input))?;
        return Ok(Box::new(io::BufReader::new(file)));
    }

    let port = serialport::new(input, baud)
        .timeout(Duration::from_secs(1))
        .open()
        .with_context(|| format!("Failed to open serial port {} at {} baud", input, baud))?;
    tracing::info!("Listening on {} at {} baud", input, baud);
    Ok(Box::new(port))
}

fn run_receive(
    config: &StreamConfig,
    reader: Box<dyn Read>,
    options: ReceiveOptions,
    output: &Path,
) -> Result<()> {
    config.validate()?;

    let count = receive_sessions(reader, options, |index, session| {
        let path = session_path(output, index);
        let samples = write_wav(&path, &session.pcm, config.sample_rate_hz, config.bit_width)?;
        tracing::info!(
            "Session {}: {} chunks, {} samples{} -> {}",
            index,
            session.chunks,
            samples,
            if session.terminated { "" } else { " (truncated)" },
            path.display()
        );
        Ok(())
    })?;

    if count == 0 {
        tracing::warn!("No sessions found");
    }
    Ok(())
}

/// `out.wav`, `out-1.wav`, `out-2.wav`, ...
fn session_path(output: &Path, index: usize) -> PathBuf {
    if index == 0 {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let name = match output.extension() {
        Some(ext) => format!("{}-{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}-{}", stem, index),
    };
    output.with_file_name(name)
}
