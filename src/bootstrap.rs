//! Joining a node to the network and probing its peers.

use std::fmt::Write;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::{node::AddrInfo, Error, PeerNode, Result};

/// How many seeds a node tries to connect to.
pub const BOOTSTRAP_FANOUT: usize = 5;

/// Ping rounds launched against every peer after a successful bootstrap.
pub const BOOTSTRAP_PING_ROUNDS: usize = 5;

/// Pick up to `count` distinct seeds uniformly at random.
pub fn select_seeds(seeds: &[AddrInfo], count: usize) -> Vec<AddrInfo> {
    seeds
        .choose_multiple(&mut rand::thread_rng(), count)
        .cloned()
        .collect()
}

/// Connect `node` to up to [BOOTSTRAP_FANOUT] random `seeds`, one after the
/// other, then start the DHT's own bootstrap and probe the new peers in the
/// background.
///
/// Individual connection failures are only logged; it is an error only if
/// the node ends up with no peers at all.
pub async fn bootstrap(node: &PeerNode, seeds: &[AddrInfo]) -> Result<()> {
    let selected = select_seeds(seeds, BOOTSTRAP_FANOUT);

    for seed in &selected {
        if let Err(error) = node.connect(seed).await {
            warn!(peer_id = %node.peer_id(), seed = %seed.peer_id, %error, "failed to connect to bootstrap peer");
        }
    }

    if node.peers().await?.is_empty() {
        return Err(Error::NoBootstrapPeers(node.peer_id()));
    }

    node.bootstrap().await?;

    ping_peers(node, BOOTSTRAP_PING_ROUNDS);

    Ok(())
}

/// Ping every currently connected peer `rounds` times, in detached tasks.
///
/// Only there to warm up the latency estimates; results are dropped.
pub fn ping_peers(node: &PeerNode, rounds: usize) {
    let node = node.clone();

    tokio::spawn(async move {
        let peers = match node.peers().await {
            Ok(peers) => peers,
            Err(error) => {
                debug!(peer_id = %node.peer_id(), %error, "can't list peers to ping");
                return;
            }
        };

        for peer in peers {
            let node = node.clone();

            tokio::spawn(async move {
                for _ in 0..rounds {
                    if let Err(error) = node.ping(&peer).await {
                        debug!(peer_id = %node.peer_id(), %peer, %error, "ping failed");
                        return;
                    }
                }
            });
        }
    });
}

/// `<self> connected to <n> peers` followed by one
/// `<index> <peer> <latency>` line per connected peer.
pub async fn latency_table(node: &PeerNode) -> Result<String> {
    let peers = node.peers().await?;

    let mut table = String::new();
    let _ = writeln!(table, "{} connected to {} peers", node.peer_id(), peers.len());

    for (i, peer) in peers.iter().enumerate() {
        let latency = node.latency_ewma(peer).await?.unwrap_or(Duration::ZERO);
        let _ = writeln!(table, "{i} {peer} {latency:?}");
    }

    Ok(table)
}

#[cfg(test)]
mod test {
    use libp2p::PeerId;

    use super::*;

    fn seeds(count: usize) -> Vec<AddrInfo> {
        (0..count)
            .map(|_| AddrInfo::new(PeerId::random(), vec![]))
            .collect()
    }

    #[test]
    fn select_caps_and_stays_distinct() {
        let seeds = seeds(20);

        let selected = select_seeds(&seeds, BOOTSTRAP_FANOUT);
        assert_eq!(selected.len(), BOOTSTRAP_FANOUT);

        for (i, a) in selected.iter().enumerate() {
            assert!(seeds.contains(a));
            assert!(selected[i + 1..].iter().all(|b| b != a));
        }
    }

    #[test]
    fn select_from_few_seeds() {
        assert_eq!(select_seeds(&seeds(3), BOOTSTRAP_FANOUT).len(), 3);
        assert!(select_seeds(&[], BOOTSTRAP_FANOUT).is_empty());
    }
}
