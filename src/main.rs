#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]
#![allow(clippy::unreadable_literal)]

use anyhow::Context;
use clap::Parser;
use core::net::{Ipv4Addr, SocketAddrV4};
use core::time::Duration;
use httpcap::capture::CaptureReader;
use httpcap::config::{DetailLevel, FilterConfig, ParseConfig, StatusSet, TableConfig, Wildcard};
use httpcap::printer::{Printer, SharedOutput};
use httpcap::sink::{Sink, SinkFactory};
use httpcap::stream::ConnectionTable;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Print the HTTP conversations contained in a packet capture.
#[derive(Parser, Debug)]
#[command(name = "httpcap")]
#[command(version, about, long_about = None)]
struct Args {
    /// pcap or pcapng file to read, `-` for stdin
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Capture live from this network device instead of reading a file
    #[arg(short = 'd', long = "device", value_name = "DEVICE", conflicts_with = "file")]
    device: Option<String>,

    /// Only connections with this address on either side
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    /// Only connections with this port on either side
    #[arg(long)]
    port: Option<u16>,

    /// Only requests whose Host matches this wildcard (case-insensitive)
    #[arg(long = "host", value_name = "PATTERN")]
    host: Option<String>,

    /// Only requests whose URI matches this wildcard
    #[arg(long = "uri", value_name = "PATTERN")]
    uri: Option<String>,

    /// Only responses with these status codes, e.g. `200:300-399`
    #[arg(long)]
    status: Option<StatusSet>,

    /// Output detail: url, header, text or all
    #[arg(short = 'l', long = "level", default_value = "header")]
    level: DetailLevel,

    /// Re-indent JSON bodies
    #[arg(long)]
    pretty: bool,

    /// Charset for bodies that do not declare one
    #[arg(long, value_name = "CHARSET")]
    encoding: Option<String>,

    /// Emit one JSON object per message
    #[arg(long)]
    json: bool,

    /// Parse each connection on its own thread
    #[arg(long)]
    threaded: bool,

    /// Seconds without traffic before a connection is dropped
    #[arg(long = "idle", value_name = "SECS", default_value_t = 240)]
    idle: u64,

    /// Write output to this file instead of stdout
    #[arg(short = 'o', long = "output", value_name = "OUTPUT_FILE")]
    output: Option<PathBuf>,
}

impl Args {
    fn filter(&self) -> anyhow::Result<FilterConfig> {
        let domain_pattern = self
            .host
            .as_deref()
            .map(|p| Wildcard::new(p, true))
            .transpose()
            .context("Invalid --host pattern")?;
        let uri_pattern = self
            .uri
            .as_deref()
            .map(|p| Wildcard::new(p, false))
            .transpose()
            .context("Invalid --uri pattern")?;
        Ok(FilterConfig {
            ip: self.ip,
            port: self.port,
            domain_pattern,
            uri_pattern,
            status: self.status.clone(),
        })
    }

    fn output(&self) -> anyhow::Result<SharedOutput> {
        let writer: Box<dyn Write + Send> = match &self.output {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create output file {}", path.display()))?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };
        Ok(Arc::new(Mutex::new(writer)))
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let filter = args.filter()?;
    let parse_config = Arc::new(ParseConfig {
        detail_level: args.level,
        pretty: args.pretty,
        encoding: args.encoding.clone(),
    });
    let output = args.output()?;
    let json = args.json;
    let factory = move |client: SocketAddrV4, server: SocketAddrV4| -> Box<dyn Sink + Send> {
        Box::new(Printer::new(
            Arc::clone(&parse_config),
            json,
            client,
            server,
            Arc::clone(&output),
        ))
    };

    let table_config = TableConfig {
        idle_timeout: Duration::from_secs(args.idle),
        threaded: args.threaded,
        ..TableConfig::default()
    };
    let mut table = ConnectionTable::new(table_config, filter.clone(), factory);

    match (&args.device, &args.file) {
        (Some(device), _) => run_live(&mut table, device, &filter)?,
        (None, Some(path)) if path.as_os_str() == "-" => {
            let reader = CaptureReader::open(BufReader::new(io::stdin().lock()))
                .context("Failed to read capture from stdin")?;
            table.consume(reader);
        }
        (None, Some(path)) => {
            let reader = CaptureReader::from_path(path)
                .with_context(|| format!("Failed to open capture file {}", path.display()))?;
            table.consume(reader);
        }
        (None, None) => anyhow::bail!("Nothing to read: give a capture FILE or a --device"),
    }
    table.finish_all();

    let stats = table.stats();
    info!(
        connections = stats.connections_created,
        closed = stats.connections_closed,
        evicted = stats.connections_evicted,
        segments = stats.segments_processed,
        dropped_segments = stats.segments_dropped,
        dropped_frames = stats.frames_dropped,
        "Capture finished"
    );
    Ok(())
}

#[cfg(all(feature = "live", target_os = "linux"))]
fn run_live<F: SinkFactory>(
    table: &mut ConnectionTable<F>,
    device: &str,
    filter: &FilterConfig,
) -> anyhow::Result<()> {
    use httpcap::capture::{LiveCapture, LiveEvent};

    let capture = LiveCapture::open(Some(device), filter)
        .with_context(|| format!("Failed to start live capture on {device}"))?;
    for event in capture {
        match event {
            LiveEvent::Record(record) => table.process_record(&record),
            LiveEvent::Timeout { now_ms } => table.tick(now_ms),
        }
    }
    Ok(())
}

#[cfg(not(all(feature = "live", target_os = "linux")))]
fn run_live<F: SinkFactory>(
    _table: &mut ConnectionTable<F>,
    device: &str,
    _filter: &FilterConfig,
) -> anyhow::Result<()> {
    anyhow::bail!("Cannot capture on {device}: built without the `live` feature")
}
