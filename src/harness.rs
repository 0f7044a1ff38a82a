//! Run a local network of nodes until told to stop.

use std::fs::File;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::{config::NodeConfig, network::NodeNetwork, Error, Result};

/// Default number of nodes in a local network.
pub const DEFAULT_NODE_COUNT: usize = 100;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Defaults to [DEFAULT_NODE_COUNT]
    pub node_count: usize,
    /// Seeds are ignored, the network always seeds itself.
    pub node_config: NodeConfig,
    /// Where to write the network's bootstrap addresses, stdout if `None`.
    pub bootstrap_file: Option<PathBuf>,
    /// Defaults to [DEFAULT_STATS_INTERVAL]
    pub stats_interval: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            node_count: DEFAULT_NODE_COUNT,
            node_config: NodeConfig::local(),
            bootstrap_file: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

/// Build and bootstrap the network, then print its stats every
/// `stats_interval` until `shutdown` resolves.
pub async fn run(options: HarnessOptions, shutdown: impl Future<Output = ()>) -> Result<()> {
    let mut config = options.node_config;
    config.bootstrap.clear();

    let network = NodeNetwork::build(options.node_count, &config).await;

    if network.is_empty() {
        return Err(Error::Construction(format!(
            "none of the {} nodes could be created",
            options.node_count
        )));
    }

    match &options.bootstrap_file {
        Some(path) => {
            network.write_bootstrap(File::create(path)?)?;
            println!("wrote bootstrap addresses to: {}", path.display());
        }
        None => network.write_bootstrap(io::stdout().lock())?,
    }

    network.bootstrap().await;
    info!(nodes = network.len(), "dht network bootstrapped");

    tokio::pin!(shutdown);

    loop {
        let stats = network.stats().await;
        {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{stats}")?;
        }

        tokio::select! {
            _ = tokio::time::sleep(options.stats_interval) => {}
            _ = &mut shutdown => {
                println!("exiting...");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn empty_network_is_an_error() {
        let options = HarnessOptions {
            node_count: 0,
            ..Default::default()
        };

        let result = run(options, async {}).await;
        assert!(matches!(result, Err(Error::Construction(_))));
    }

    #[tokio::test]
    async fn writes_bootstrap_file_and_stops() {
        let path = std::env::temp_dir().join(format!(
            "dht-tracer-bootstrap-{}",
            libp2p::PeerId::random()
        ));

        let options = HarnessOptions {
            node_count: 3,
            bootstrap_file: Some(path.clone()),
            ..Default::default()
        };

        run(options, async {}).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let seeds = crate::node::AddrInfo::parse_list(written.lines()).unwrap();
        assert_eq!(seeds.len(), 3);

        let _ = std::fs::remove_file(path);
    }
}
