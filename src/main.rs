//! secure-fetch: fetch one resource over TLS 1.3 and stream it to stdout.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use secure_fetch::config::DEFAULT_CA_FILE;
use secure_fetch::exchange::{self, ExchangePolicy, VerifyPolicy, DEFAULT_READ_BUFFER};
use secure_fetch::{
    DiagnosticSink, Endpoint, ExtensionRegistry, Port, SessionConfig, SessionContext, SessionMode,
    TransportConfig,
};

#[derive(Parser, Debug)]
#[command(name = "secure-fetch", version)]
#[command(about = "Fetch one resource over TLS 1.3 and stream the response to stdout")]
struct Cli {
    /// Host to fetch from. Without it, print this help and exit.
    #[arg(env = "SECURE_FETCH_HOST")]
    host: Option<String>,

    /// Port number or service name [default: https, or http with --plain]
    #[arg(long, env = "SECURE_FETCH_PORT")]
    port: Option<Port>,

    /// Request path
    #[arg(long, env = "SECURE_FETCH_PATH", default_value = "/")]
    path: String,

    /// Skip TLS and talk plaintext
    #[arg(long, env = "SECURE_FETCH_PLAIN")]
    plain: bool,

    /// PEM bundle of trusted CA certificates
    #[arg(long, env = "SECURE_FETCH_CA_FILE", default_value = DEFAULT_CA_FILE)]
    ca_file: PathBuf,

    /// What to do when the server certificate does not verify: abort or warn
    #[arg(long, env = "SECURE_FETCH_VERIFY_FAILURE", default_value = "warn")]
    verify_failure: VerifyPolicy,

    /// Request extension TYPE and print what the server sends for it (repeatable)
    #[arg(
        long = "extension",
        value_name = "TYPE",
        env = "SECURE_FETCH_EXTENSIONS",
        value_delimiter = ','
    )]
    extensions: Vec<u16>,

    /// ALPN protocol to offer (repeatable)
    #[arg(long = "alpn", value_name = "PROTO", env = "SECURE_FETCH_ALPN", value_delimiter = ',')]
    alpn: Vec<String>,

    /// Discard extension diagnostics
    #[arg(long, short, env = "SECURE_FETCH_QUIET")]
    quiet: bool,

    /// Connect timeout in seconds
    #[arg(long, env = "SECURE_FETCH_CONNECT_TIMEOUT", value_name = "SECS", value_parser = parse_secs)]
    connect_timeout: Option<Duration>,

    /// Read/write timeout in seconds
    #[arg(long, env = "SECURE_FETCH_IO_TIMEOUT", value_name = "SECS", value_parser = parse_secs)]
    io_timeout: Option<Duration>,

    /// Read buffer size in bytes
    #[arg(
        long,
        env = "SECURE_FETCH_BUFFER_SIZE",
        default_value_t = DEFAULT_READ_BUFFER,
        value_parser = parse_buffer_size
    )]
    buffer_size: usize,
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(format!("{s} is not a positive number of seconds")),
    }
}

fn parse_buffer_size(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{s} is not a positive buffer size")),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let Some(host) = cli.host.as_deref() else {
        // Usage goes to stdout and is not an error.
        if let Err(e) = Cli::command().print_help() {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    };

    match fetch(&cli, host) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn fetch(cli: &Cli, host: &str) -> Result<()> {
    let mode = if cli.plain {
        SessionMode::Plaintext
    } else {
        SessionMode::Tls
    };
    let port = cli.port.clone().unwrap_or_else(|| {
        Port::Service(if cli.plain { "http" } else { "https" }.to_string())
    });
    let endpoint = Endpoint::new(host, port);

    let diagnostics = if cli.quiet {
        DiagnosticSink::null()
    } else {
        DiagnosticSink::global()
    };
    let mut registry = ExtensionRegistry::new();
    for &ext_type in &cli.extensions {
        registry
            .register_serverinfo(ext_type, diagnostics.clone())
            .with_context(|| format!("cannot hook extension {ext_type}"))?;
    }

    let config = SessionConfig {
        mode,
        ca_file: cli.ca_file.clone(),
        alpn: cli.alpn.iter().map(|p| p.as_bytes().to_vec()).collect(),
        server_name: None,
        transport: TransportConfig {
            connect_timeout: cli.connect_timeout,
            read_timeout: cli.io_timeout,
            write_timeout: cli.io_timeout,
            ..TransportConfig::default()
        },
    };
    let ctx = SessionContext::new(config, registry).context("cannot set up session context")?;

    let policy = ExchangePolicy {
        on_verify_failure: cli.verify_failure,
        read_buffer: cli.buffer_size,
    };
    let request = exchange::http_get(host, &cli.path);
    let stdout = io::stdout();
    let mut sink = stdout.lock();
    let report = exchange::run(&ctx, &endpoint, &request, &mut sink, &policy)
        .with_context(|| format!("fetch from {endpoint} failed"))?;

    if let Some(e) = &report.read_error {
        warn!(error = %e, bytes = report.bytes_received, "response ended early");
    }
    Ok(())
}
