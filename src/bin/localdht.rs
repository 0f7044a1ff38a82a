//! Run a network of DHT nodes on this machine.
//!
//! ```text
//! localdht -n 50 --bootstrap-file bootstrap.txt &
//! tracedht --bootstrap "$(cat bootstrap.txt)"
//! ```

use std::{net::IpAddr, num::NonZeroUsize, path::PathBuf, process::ExitCode};

use clap::Parser;

use dht_tracer::{
    config::TransportMode,
    eventlog::{init_logging, EventLog},
    harness::{self, HarnessOptions, DEFAULT_NODE_COUNT},
    NodeConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of dht nodes to run
    #[arg(short = 'n', default_value_t = DEFAULT_NODE_COUNT)]
    nodes: usize,
    /// Enable debug logs
    #[arg(long)]
    debug: bool,
    /// Use the quic transport (helps with fd limits)
    #[arg(long)]
    quic: bool,
    /// Write bootstrap addresses to this file instead of stdout
    #[arg(long)]
    bootstrap_file: Option<PathBuf>,
    /// IP address every node listens on
    #[arg(long, default_value = "127.0.0.1")]
    listen_ip: IpAddr,
    /// Number of peers each dht query contacts in parallel
    #[arg(long)]
    alpha: Option<NonZeroUsize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = init_logging(cli.debug, &EventLog::new()) {
        eprintln!("error: {error}");
        return ExitCode::FAILURE;
    }

    let mut node_config = NodeConfig {
        listen_ip: cli.listen_ip,
        ..NodeConfig::local()
    };
    if cli.quic {
        node_config.transport = TransportMode::Quic;
    }
    if let Some(alpha) = cli.alpha {
        node_config.alpha = alpha;
    }

    let options = HarnessOptions {
        node_count: cli.nodes,
        node_config,
        bootstrap_file: cli.bootstrap_file,
        ..Default::default()
    };

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match harness::run(options, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
