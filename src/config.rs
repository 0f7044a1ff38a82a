use std::{
    net::{IpAddr, Ipv4Addr},
    num::NonZeroUsize,
    time::Duration,
};

use libp2p::{multiaddr::Protocol, Multiaddr};

use crate::{node::AddrInfo, Error, Result};

/// Public IPFS bootstrap peers, used when no other seeds are configured.
pub const DEFAULT_BOOTSTRAP_NODES: [&str; 5] = [
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ", // mars.i.ipfs.io
    "/ip4/104.236.179.241/tcp/4001/p2p/QmSoLPppuBtQSGwKDZT2M73ULpjvfd3aZ6ha4oFGL1KrGM", // pluto.i.ipfs.io
    "/ip4/128.199.219.111/tcp/4001/p2p/QmSoLSafTMBsPKadTEgaXctDQVcqN88CNLHXMkTNwMKPnu", // saturn.i.ipfs.io
    "/ip4/104.236.76.40/tcp/4001/p2p/QmSoLV4Bbm51jM9C4gDYZQ9Cy3U6aXMJDAbzgu2fzaDs64", // venus.i.ipfs.io
    "/ip4/178.62.158.247/tcp/4001/p2p/QmSoLer265NRgSp2LA3dPaeykiS1J6DifTC88f5uVQKNAd", // earth.i.ipfs.io
];

pub const DEFAULT_ALPHA: usize = 10;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Transport a node listens and dials on.
pub enum TransportMode {
    /// Reliable stream transport (TCP + noise + yamux).
    #[default]
    Tcp,
    /// Lightweight datagram transport (QUIC over UDP). Uses far fewer file
    /// descriptors when running many nodes in one process.
    Quic,
}

#[derive(Debug, Clone)]
/// Node configuration.
///
/// Consumed when constructing a [crate::PeerNode]; never mutated afterwards.
pub struct NodeConfig {
    /// Seed peers to bootstrap to.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_NODES]
    pub bootstrap: Vec<AddrInfo>,
    /// Defaults to [TransportMode::Tcp]
    pub transport: TransportMode,
    /// IP address to listen on, the port is always picked by the OS.
    ///
    /// Defaults to `0.0.0.0`
    pub listen_ip: IpAddr,
    /// Kademlia alpha, the number of peers queried in parallel by each query.
    ///
    /// Defaults to [DEFAULT_ALPHA]
    pub alpha: NonZeroUsize,
    /// How long a single DHT query may run before the engine gives up.
    ///
    /// Defaults to [DEFAULT_QUERY_TIMEOUT]
    pub query_timeout: Duration,
    /// Upper bound for a single connect or ping, and for waiting on the
    /// node to start listening.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Interval between liveness probes on every connection, which also feed
    /// the latency estimates.
    ///
    /// A ping request waits for the next probe, so this must be shorter than
    /// `request_timeout`.
    ///
    /// Defaults to [DEFAULT_PING_INTERVAL]
    pub ping_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bootstrap: AddrInfo::parse_list(DEFAULT_BOOTSTRAP_NODES).unwrap_or_default(),
            transport: TransportMode::default(),
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            alpha: NonZeroUsize::new(DEFAULT_ALPHA).unwrap_or(NonZeroUsize::MIN),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

impl NodeConfig {
    /// A config for nodes that only talk to each other on the loopback
    /// interface and start without seeds.
    pub fn local() -> Self {
        Self {
            bootstrap: Vec::new(),
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }

    /// Reject settings under which a node could not work.
    pub fn validate(&self) -> Result<()> {
        if self.ping_interval >= self.request_timeout {
            return Err(Error::Construction(format!(
                "ping interval {:?} must be shorter than request timeout {:?}",
                self.ping_interval, self.request_timeout
            )));
        }

        Ok(())
    }

    /// Address to pass to the swarm's `listen_on`.
    pub fn listen_addr(&self) -> Multiaddr {
        let ip = match self.listen_ip {
            IpAddr::V4(ip) => Protocol::Ip4(ip),
            IpAddr::V6(ip) => Protocol::Ip6(ip),
        };

        let addr = Multiaddr::empty().with(ip);

        match self.transport {
            TransportMode::Tcp => addr.with(Protocol::Tcp(0)),
            TransportMode::Quic => addr.with(Protocol::Udp(0)).with(Protocol::QuicV1),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_seeds_parse() {
        let config = NodeConfig::default();

        assert_eq!(config.bootstrap.len(), DEFAULT_BOOTSTRAP_NODES.len());
        assert_eq!(config.alpha.get(), DEFAULT_ALPHA);
    }

    #[test]
    fn ping_interval_shorter_than_request_timeout() {
        assert!(NodeConfig::default().validate().is_ok());

        let config = NodeConfig {
            ping_interval: DEFAULT_REQUEST_TIMEOUT,
            ..NodeConfig::local()
        };
        assert!(matches!(config.validate(), Err(Error::Construction(_))));
    }

    #[test]
    fn listen_addr_per_transport() {
        let mut config = NodeConfig::local();
        assert_eq!(config.listen_addr().to_string(), "/ip4/127.0.0.1/tcp/0");

        config.transport = TransportMode::Quic;
        assert_eq!(
            config.listen_addr().to_string(),
            "/ip4/127.0.0.1/udp/0/quic-v1"
        );
    }
}
