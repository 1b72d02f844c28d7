//! mipsdap - debug adapter for a remote MIPS debugger.
//!
//! Speaks the Debug Adapter Protocol over stdio (default) or, with `--listen`,
//! over TCP where every accepted client is one debug session.

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use mipsdap::config::AdapterConfig;
use mipsdap::dap::tracer::FileTracer;
use mipsdap::dap::transport;
use mipsdap::session;
use std::fs::OpenOptions;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen for editor connections on this address instead of using stdio
    /// (for example 127.0.0.1:4711).
    #[clap(long)]
    listen: Option<String>,

    /// Exit after the first debug session ends (server mode only).
    #[clap(long)]
    oneshot: bool,

    /// Optional log file for adapter diagnostics (logs go to stderr otherwise).
    #[clap(long, env = "MIPSDAP_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Trace DAP traffic (requests/responses/events) into the log file.
    /// Requires --log-file.
    #[clap(long)]
    trace_dap: bool,

    /// Adapter config file (default: ~/.config/mipsdap/config.toml).
    #[clap(long, env = "MIPSDAP_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logger(log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        // stdout may carry DAP traffic
        None => {
            builder.target(env_logger::Target::Stderr);
        }
    }
    builder.init();
    Ok(())
}

fn listen(
    addr: &str,
    args: &Args,
    tracer: Option<FileTracer>,
    config: AdapterConfig,
) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse().context("Invalid listen address")?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "mipsdap listening on {addr}");

    // One client == one debug session, clients are served sequentially.
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "DAP client connected: {peer}");
        if let Some(t) = &tracer {
            t.line(&format!("client connected: {peer}"));
        }

        let control = stream.try_clone();
        let (reader, writer) = match transport::tcp(stream, tracer.clone()) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "failed to init DAP I/O: {err:#}");
                continue;
            }
        };

        let res = session::serve(reader, writer, config.clone());
        if let Err(err) = &res {
            warn!(target: "dap", "session ended with error: {err:#}");
        }
        if let Some(t) = &tracer {
            match &res {
                Ok(()) => t.line("session finished OK"),
                Err(err) => t.line(&format!("session error: {err:#}")),
            }
        }
        // unblock the editor reader thread if the client is still connected
        if let Ok(control) = control {
            let _ = control.shutdown(Shutdown::Both);
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger(args.log_file.as_deref())?;

    let config = AdapterConfig::from_file(args.config.as_deref());

    let tracer = match (&args.log_file, args.trace_dap) {
        (Some(path), true) => Some(FileTracer::new(path)?),
        (None, true) => {
            warn!(target: "dap", "--trace-dap requires --log-file; tracing disabled");
            None
        }
        _ => None,
    };

    match &args.listen {
        Some(addr) => listen(addr, &args, tracer, config),
        None => {
            let (reader, writer) = transport::stdio(tracer);
            session::serve(reader, writer, config)
        }
    }
}
