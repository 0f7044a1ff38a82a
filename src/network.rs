//! A pool of nodes living in one process, seeding each other.

use std::fmt::{self, Display, Formatter};
use std::io::Write;
use std::sync::Arc;

use flume::Receiver;
use libp2p::PeerId;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::{bootstrap, config::NodeConfig, node::AddrInfo, PeerNode, Result};

/// When the config has no seeds, this many nodes of the pool become the seeds.
pub const MAX_SELF_SEEDS: usize = 10;

const PROGRESS_EVERY: usize = 10;

#[derive(Debug, Clone)]
pub struct NodeNetwork {
    nodes: Vec<PeerNode>,
    bootstrap: Vec<AddrInfo>,
}

impl NodeNetwork {
    /// Create `count` nodes concurrently.
    ///
    /// Nodes that fail to construct are logged and left out, so the network
    /// may be smaller than requested. Nodes are kept in completion order.
    ///
    /// Seeds are the config's bootstrap peers, or the first
    /// [MAX_SELF_SEEDS] nodes of the pool if there are none.
    pub async fn build(count: usize, config: &NodeConfig) -> Self {
        let (sender, receiver) = flume::bounded::<Result<PeerNode>>(count);

        for _ in 0..count {
            let sender = sender.clone();
            let config = config.clone();

            tokio::spawn(async move {
                let _ = sender.send_async(PeerNode::new(&config).await).await;
            });
        }
        // Collection ends once every task is done with its sender.
        drop(sender);

        let nodes = collect_nodes(receiver, count).await;

        let bootstrap = if config.bootstrap.is_empty() {
            let mut seeds = Vec::new();
            for node in nodes.iter().take(MAX_SELF_SEEDS) {
                match node.addr_info().await {
                    Ok(info) => seeds.push(info),
                    Err(error) => warn!(peer_id = %node.peer_id(), %error, "node has no addresses"),
                }
            }
            seeds
        } else {
            config.bootstrap.clone()
        };

        info!(nodes = nodes.len(), seeds = bootstrap.len(), "dht network created");

        Self { nodes, bootstrap }
    }

    // === Getters ===

    pub fn nodes(&self) -> &[PeerNode] {
        &self.nodes
    }

    /// Seeds every node bootstraps against.
    pub fn bootstrap_peers(&self) -> &[AddrInfo] {
        &self.bootstrap
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // === Public Methods ===

    /// Bootstrap every node concurrently, returning when all are done.
    ///
    /// Failures are logged per node and never returned.
    pub async fn bootstrap(&self) {
        let seeds: Arc<[AddrInfo]> = self.bootstrap.clone().into();
        let mut tasks = JoinSet::new();

        for node in &self.nodes {
            let node = node.clone();
            let seeds = seeds.clone();

            tasks.spawn(async move {
                if let Err(error) = bootstrap::bootstrap(&node, &seeds).await {
                    warn!(peer_id = %node.peer_id(), %error, "bootstrap failed");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                error!(%error, "bootstrap task panicked");
            }
        }
    }

    /// Write the seeds as p2p multiaddrs, one per line, in the format
    /// accepted by [AddrInfo::parse_list].
    pub fn write_bootstrap(&self, mut writer: impl Write) -> std::io::Result<()> {
        for info in &self.bootstrap {
            for addr in info.p2p_addrs() {
                writeln!(writer, "{addr}")?;
            }
        }

        writer.flush()
    }

    /// Peer and connection counts of every node.
    pub async fn stats(&self) -> NetworkStats {
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            match node.info().await {
                Ok(info) => nodes.push(NodeStats {
                    peer_id: info.peer_id(),
                    peers: info.peers().len(),
                    connections: info.connections(),
                }),
                Err(error) => warn!(peer_id = %node.peer_id(), %error, "can't read node stats"),
            }
        }

        NetworkStats { nodes }
    }
}

/// Drain the construction funnel until every sender is gone.
///
/// A task that panicked drops its sender without reporting, those are
/// counted as missing.
async fn collect_nodes(receiver: Receiver<Result<PeerNode>>, count: usize) -> Vec<PeerNode> {
    let mut nodes = Vec::with_capacity(count);
    let mut done = 0;

    while let Ok(result) = receiver.recv_async().await {
        done += 1;

        match result {
            Ok(node) => nodes.push(node),
            Err(error) => error!(%error, "failed to create dht node"),
        }

        if done % PROGRESS_EVERY == 0 {
            info!(done, total = count, "creating dht nodes");
        }
    }

    if done < count {
        error!(missing = count - done, "dht node tasks ended without a result");
    }

    nodes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    pub peer_id: PeerId,
    pub peers: usize,
    pub connections: usize,
}

#[derive(Debug, Clone, Default)]
/// Renders as one `<i> <peer> <n> peers <m> conns` line per node and a
/// `<nodes> nodes, <conns> conns` summary.
pub struct NetworkStats {
    pub nodes: Vec<NodeStats>,
}

impl NetworkStats {
    pub fn total_connections(&self) -> usize {
        self.nodes.iter().map(|node| node.connections).sum()
    }
}

impl Display for NetworkStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            writeln!(
                f,
                "{i} {} {} peers {} conns",
                node.peer_id, node.peers, node.connections
            )?;
        }

        write!(
            f,
            "{} nodes, {} conns",
            self.nodes.len(),
            self.total_connections()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_display() {
        let a = PeerId::random();
        let b = PeerId::random();

        let stats = NetworkStats {
            nodes: vec![
                NodeStats {
                    peer_id: a,
                    peers: 1,
                    connections: 2,
                },
                NodeStats {
                    peer_id: b,
                    peers: 1,
                    connections: 1,
                },
            ],
        };

        assert_eq!(
            stats.to_string(),
            format!("0 {a} 1 peers 2 conns\n1 {b} 1 peers 1 conns\n2 nodes, 3 conns")
        );
    }

    #[tokio::test]
    async fn collection_survives_silent_tasks() {
        let (sender, receiver) = flume::bounded::<Result<PeerNode>>(3);

        sender
            .send(Err(crate::Error::Construction("no port".into())))
            .unwrap();
        // Two tasks that never report, as if they had panicked.
        let silent = sender.clone();
        drop(silent);
        drop(sender);

        assert!(collect_nodes(receiver, 3).await.is_empty());
    }

    #[tokio::test]
    async fn panicking_construction_does_not_hang_the_pool() {
        let (sender, receiver) = flume::bounded::<Result<PeerNode>>(1);

        let task = tokio::spawn(async move {
            let _sender = sender;
            panic!("construction blew up");
        });
        assert!(task.await.is_err());

        assert!(collect_nodes(receiver, 1).await.is_empty());
    }

    #[test]
    fn empty_stats() {
        assert_eq!(NetworkStats::default().to_string(), "0 nodes, 0 conns");
    }
}
