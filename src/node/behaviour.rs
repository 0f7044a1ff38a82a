//! The libp2p behaviour stack of a node and the swarm built around it.

use std::time::Duration;

use libp2p::{
    identify, identity::Keypair, kad, noise, ping, swarm::NetworkBehaviour, tcp, yamux, Swarm,
    SwarmBuilder,
};

use crate::{config::NodeConfig, Error, Result};

/// Protocol version announced through identify.
pub const IDENTIFY_PROTOCOL: &str = "/dht-tracer/1.0.0";

/// Connections stay open for as long as the process runs unless the remote
/// closes them.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(NetworkBehaviour)]
pub(crate) struct Behaviour {
    pub kad: kad::Behaviour<kad::store::MemoryStore>,
    pub ping: ping::Behaviour,
    pub identify: identify::Behaviour,
}

impl Behaviour {
    fn new(keypair: &Keypair, config: &NodeConfig) -> Self {
        let peer_id = keypair.public().to_peer_id();

        let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
        kad_config
            .set_parallelism(config.alpha)
            .set_query_timeout(config.query_timeout)
            // Records and provider records go through our validator first.
            .set_record_filtering(kad::StoreInserts::FilterBoth);

        let mut kad = kad::Behaviour::with_config(
            peer_id,
            kad::store::MemoryStore::new(peer_id),
            kad_config,
        );
        kad.set_mode(Some(kad::Mode::Server));

        let ping = ping::Behaviour::new(
            ping::Config::new()
                .with_interval(config.ping_interval)
                .with_timeout(config.request_timeout),
        );

        let identify = identify::Behaviour::new(identify::Config::new(
            IDENTIFY_PROTOCOL.to_string(),
            keypair.public(),
        ));

        Self {
            kad,
            ping,
            identify,
        }
    }
}

/// Join the transport stack with a fresh swarm. Does not listen yet.
pub(crate) fn build_swarm(keypair: Keypair, config: &NodeConfig) -> Result<Swarm<Behaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|error| Error::Construction(error.to_string()))?
        .with_quic()
        .with_behaviour(|keypair| Behaviour::new(keypair, config))
        .map_err(|error| Error::Construction(error.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();

    Ok(swarm)
}
