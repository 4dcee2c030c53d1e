//! `gstream`: stream a G-code program to a machine controller.
//!
//! ```text
//! gstream part.gcode                 # stream a file
//! cat part.gcode | gstream           # stream a pipe
//! gstream --port /dev/null           # type commands, loopback device
//! ```
//!
//! Device responses are printed to stdout; logs go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use futures::StreamExt;
use gstream_core::constants::FILE_CHUNK_SIZE;
use gstream_core::{Config, ConfigPatch};
use gstream_engine::{Engine, InputSink, ResponseStream};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gstream", version, about)]
struct Cli {
    /// G-code file to stream. Reads stdin when omitted.
    file: Option<PathBuf>,

    /// JSON configuration file (`portIdentifier`, `baudRate`, `ackTimeoutMs`).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serial port; `/dev/null` selects the loopback device.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Warn when a command waits longer than this for its acknowledgment.
    #[arg(long, value_name = "MS")]
    ack_timeout_ms: Option<u64>,

    /// More logging (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.list_ports {
        return list_ports();
    }

    let config = load_config(&cli)?;
    let (engine, _handle, sink, responses) = Engine::builder(config)
        .on_open(|| info!("Device open, streaming"))
        .build();

    let engine_task = engine.spawn();
    let printer = tokio::spawn(print_responses(responses));

    let input = match &cli.file {
        Some(path) => stream_file(path, sink).await,
        None => {
            info!("Reading commands from stdin");
            stream_input(tokio::io::stdin(), sink).await
        }
    };

    let stats = engine_task.await.context("engine task panicked")??;
    input?;
    printer.await.context("output task panicked")??;

    info!(
        lines = stats.lines_sent,
        acks = stats.acks,
        spurious_acks = stats.spurious_acks,
        stalls = stats.stalls,
        "Done"
    );
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Defaults, then the configuration file, then command-line flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?,
        None => Config::default(),
    };

    config.apply(ConfigPatch {
        port: cli.port.clone(),
        baud_rate: cli.baud,
        ack_timeout_ms: cli.ack_timeout_ms,
    });
    debug!(?config, "Effective configuration");
    Ok(config)
}

async fn stream_file(path: &Path, sink: InputSink) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    info!(file = %path.display(), "Streaming file");
    stream_input(file, sink).await
}

/// Feed `reader` to the engine. After a chunk that completed at least one
/// line, wait for the batch to drain before reading the next one.
async fn stream_input<R>(reader: R, mut sink: InputSink) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunks = FramedRead::with_capacity(reader, BytesCodec::new(), FILE_CHUNK_SIZE);

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.context("cannot read input")?;
        if chunk.is_empty() {
            continue;
        }
        if sink.write(chunk.freeze()).await? > 0 {
            sink.drained().await?;
        }
    }

    sink.end().await?;
    Ok(())
}

async fn print_responses(mut responses: ResponseStream) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = responses.recv().await {
        stdout
            .write_all(line.trim_end_matches(['\r', '\n']).as_bytes())
            .await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(feature = "hardware-serial")]
fn list_ports() -> Result<()> {
    let ports = gstream_hardware::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.description);
    }
    Ok(())
}

#[cfg(not(feature = "hardware-serial"))]
fn list_ports() -> Result<()> {
    anyhow::bail!("serial support not compiled in")
}
