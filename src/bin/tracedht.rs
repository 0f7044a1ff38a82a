//! Trace DHT queries issued through an HTTP command interface.
//!
//! ```text
//! tracedht --serve localhost:7000 &
//! curl "http://localhost:7000/cmd?q=put-value+/v/foo+bar"
//! curl "http://localhost:7000/cmd?q=find-peer+<peer-id>"
//! curl "http://localhost:7000/events"
//! ```

use std::{net::IpAddr, num::NonZeroUsize, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;

use dht_tracer::{
    bootstrap::latency_table,
    config::{TransportMode, DEFAULT_ALPHA},
    eventlog::{init_logging, EventLog},
    gateway::Gateway,
    AddrInfo, NodeConfig, Result, Tracer,
};

/// Time given to the node to fill its routing table before serving.
const SETTLE_TIME: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the http command server
    #[arg(long, default_value = "localhost:7000")]
    serve: String,
    /// Number of peers each dht query contacts in parallel
    #[arg(long, default_value_t = NonZeroUsize::new(DEFAULT_ALPHA).unwrap_or(NonZeroUsize::MIN))]
    alpha: NonZeroUsize,
    /// Bootstrap multiaddrs replacing the public defaults, newline delimited
    #[arg(long)]
    bootstrap: Option<String>,
    /// Enable debug logs
    #[arg(long)]
    debug: bool,
    /// Use the quic transport (helps with fd limits)
    #[arg(long)]
    quic: bool,
    /// IP address to listen on
    #[arg(long)]
    listen_ip: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log = EventLog::new();
    if let Err(error) = init_logging(cli.debug, &log) {
        eprintln!("error: {error}");
        return ExitCode::FAILURE;
    }

    match run(cli, log).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, log: EventLog) -> Result<()> {
    let mut config = NodeConfig {
        alpha: cli.alpha,
        ..NodeConfig::default()
    };
    if let Some(bootstrap) = &cli.bootstrap {
        config.bootstrap = AddrInfo::parse_list(bootstrap.lines())?;
    }
    if cli.quic {
        config.transport = TransportMode::Quic;
    }
    if let Some(listen_ip) = cli.listen_ip {
        config.listen_ip = listen_ip;
    }
    eprintln!("set dht alpha to {}", config.alpha);

    let tracer = Arc::new(Tracer::new(config));

    println!("dht node starting...");
    tracer.start().await?;

    tokio::time::sleep(SETTLE_TIME).await;

    if let Some(node) = tracer.node().await {
        println!("dht node routing table:");
        println!("{}", latency_table(&node).await?);
    }

    let listener = TcpListener::bind(&cli.serve).await?;
    println!("server listening at {}", listener.local_addr()?);

    Gateway::new(tracer, log).serve(listener).await
}
