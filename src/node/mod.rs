//! A single DHT participant and the handle used to drive it.

mod actor;
mod addr_info;
pub(crate) mod behaviour;
pub mod validator;

use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, Sender};
use futures::StreamExt;
use libp2p::{identity::Keypair, kad, swarm::SwarmEvent, Multiaddr, PeerId, Swarm};
use tracing::info;

use crate::{config::NodeConfig, Error, Result};

use actor::{Actor, ActorMessage};
use behaviour::Behaviour;

pub use actor::MAX_PROVIDERS;
pub use addr_info::AddrInfo;

#[derive(Debug, Clone)]
/// Handle to a running DHT node.
///
/// Cheap to clone. The node keeps running until the last clone is dropped,
/// at which point its connections are closed and its listeners released.
pub struct PeerNode {
    peer_id: PeerId,
    sender: Sender<ActorMessage>,
    request_timeout: Duration,
}

impl PeerNode {
    /// Create a node with a fresh ed25519 identity, listening on an
    /// OS-assigned port of the configured transport.
    ///
    /// Does not connect to anything; see [crate::bootstrap::bootstrap].
    pub async fn new(config: &NodeConfig) -> Result<Self> {
        config.validate()?;

        let keypair = Keypair::generate_ed25519();
        let peer_id = keypair.public().to_peer_id();

        let mut swarm = behaviour::build_swarm(keypair, config)?;

        swarm
            .listen_on(config.listen_addr())
            .map_err(|error| Error::Construction(error.to_string()))?;

        let address = tokio::time::timeout(config.request_timeout, first_listen_addr(&mut swarm))
            .await
            .map_err(|_| Error::Construction("timed out waiting for a listen address".into()))??;

        info!(%peer_id, %address, "dht node listening");

        let (sender, receiver) = flume::unbounded();
        tokio::spawn(Actor::new(swarm, receiver).run());

        Ok(Self {
            peer_id,
            sender,
            request_timeout: config.request_timeout,
        })
    }

    // === Getters ===

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    // === Public Methods ===

    /// Snapshot of this node's listeners, connections and in-flight queries.
    pub async fn info(&self) -> Result<NodeInfo> {
        self.request(ActorMessage::Info).await
    }

    /// This node's identity and listen addresses.
    pub async fn addr_info(&self) -> Result<AddrInfo> {
        self.request(ActorMessage::AddrInfo).await
    }

    /// Currently connected peers.
    pub async fn peers(&self) -> Result<Vec<PeerId>> {
        self.request(ActorMessage::Peers).await
    }

    /// Moving average of ping round trips to `peer`, if any were observed.
    pub async fn latency_ewma(&self, peer: &PeerId) -> Result<Option<Duration>> {
        self.request(|sender| ActorMessage::Latency(*peer, sender))
            .await
    }

    /// Dial `target` on any of its addresses. Resolves once a connection is
    /// established, or immediately if one already exists.
    pub async fn connect(&self, target: &AddrInfo) -> Result<()> {
        let target = target.clone();
        self.timed(self.request(|sender| ActorMessage::Connect(target, sender)))
            .await??
    }

    /// Round trip time of the next ping exchanged with `peer`.
    pub async fn ping(&self, peer: &PeerId) -> Result<Duration> {
        self.timed(self.request(|sender| ActorMessage::Ping(*peer, sender)))
            .await??
    }

    /// Start a routing table refresh. Returns as soon as the refresh is
    /// started; it fails only when there is nobody to ask.
    pub async fn bootstrap(&self) -> Result<()> {
        self.request(ActorMessage::Bootstrap).await?
    }

    /// Store `value` under `key` on the closest peers to `key`.
    ///
    /// The key must pass the node's [validator::NamespacedValidator].
    pub async fn put_value(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let record = kad::Record::new(kad::RecordKey::new(&key), value.to_vec());
        self.request(|sender| ActorMessage::PutValue(record, sender))
            .await?
    }

    pub async fn get_value(&self, key: &[u8]) -> Result<Bytes> {
        let key = kad::RecordKey::new(&key);
        self.request(|sender| ActorMessage::GetValue(key, sender))
            .await?
            .map(Bytes::from)
    }

    /// Announce this node as a provider of `key`.
    pub async fn provide(&self, key: &[u8]) -> Result<()> {
        let key = kad::RecordKey::new(&key);
        self.request(|sender| ActorMessage::Provide(key, sender))
            .await?
    }

    /// Start a provider search for `key`, yielding at most [MAX_PROVIDERS]
    /// distinct providers.
    ///
    /// Dropping the returned [Providers] stops the search.
    pub async fn find_providers(&self, key: &[u8]) -> Result<Providers> {
        let key = kad::RecordKey::new(&key);
        let (provider_sender, receiver) = flume::unbounded();

        let query = self
            .request(|sender| ActorMessage::FindProviders(key, provider_sender, sender))
            .await?;

        Ok(Providers {
            query,
            receiver,
            actor: self.sender.clone(),
        })
    }

    /// Look up the addresses of `peer` through the DHT.
    pub async fn find_peer(&self, peer: &PeerId) -> Result<AddrInfo> {
        self.request(|sender| ActorMessage::FindPeer(*peer, sender))
            .await?
    }

    // === Private Methods ===

    async fn request<T>(&self, message: impl FnOnce(Sender<T>) -> ActorMessage) -> Result<T> {
        let (sender, receiver) = flume::bounded::<T>(1);

        self.sender
            .send(message(sender))
            .map_err(|_| Error::NodeShutdown)?;

        receiver.recv_async().await.map_err(|_| Error::NodeShutdown)
    }

    async fn timed<T>(&self, future: impl std::future::Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.request_timeout, future)
            .await
            .map_err(|_| Error::Timeout)
    }
}

async fn first_listen_addr(swarm: &mut Swarm<Behaviour>) -> Result<Multiaddr> {
    loop {
        match swarm.next().await {
            Some(SwarmEvent::NewListenAddr { address, .. }) => return Ok(address),
            Some(SwarmEvent::ListenerError { error, .. }) => {
                return Err(Error::Construction(error.to_string()))
            }
            Some(SwarmEvent::ListenerClosed { reason, .. }) => {
                let reason = match reason {
                    Ok(()) => "listener closed".to_string(),
                    Err(error) => error.to_string(),
                };
                return Err(Error::Construction(reason));
            }
            Some(_) => {}
            None => return Err(Error::Construction("swarm terminated".into())),
        }
    }
}

#[derive(Debug, Clone)]
/// Snapshot of a node's state.
pub struct NodeInfo {
    pub(crate) peer_id: PeerId,
    pub(crate) listen_addrs: Vec<Multiaddr>,
    pub(crate) peers: Vec<PeerId>,
    pub(crate) connections: usize,
    pub(crate) pending_queries: usize,
}

impl NodeInfo {
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn listen_addrs(&self) -> &[Multiaddr] {
        &self.listen_addrs
    }

    /// Distinct connected peers.
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// Established connections, a peer may have more than one.
    pub fn connections(&self) -> usize {
        self.connections
    }

    /// Queries started through a handle and not yet answered.
    pub fn pending_queries(&self) -> usize {
        self.pending_queries
    }
}

#[derive(Debug)]
/// Providers found by [PeerNode::find_providers], yielded as they arrive.
pub struct Providers {
    query: kad::QueryId,
    receiver: Receiver<PeerId>,
    actor: Sender<ActorMessage>,
}

impl Providers {
    /// The next provider, or `None` once the search is over.
    pub async fn next(&mut self) -> Option<PeerId> {
        self.receiver.recv_async().await.ok()
    }

    /// Turn into a [futures::Stream] of providers.
    pub fn into_stream(self) -> impl futures::Stream<Item = PeerId> + Send + Unpin {
        futures::stream::unfold(self, |mut providers| async move {
            providers.next().await.map(|peer| (peer, providers))
        })
        .boxed()
    }
}

impl Drop for Providers {
    fn drop(&mut self) {
        let _ = self.actor.send(ActorMessage::FinishQuery(self.query));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn new_node_listens() {
        let node = PeerNode::new(&NodeConfig::local()).await.unwrap();

        let info = node.info().await.unwrap();
        assert_eq!(info.peer_id(), node.peer_id());
        assert!(!info.listen_addrs().is_empty());
        assert!(info.peers().is_empty());
        assert_eq!(info.pending_queries(), 0);
    }

    #[tokio::test]
    async fn connect_and_ping() {
        let a = PeerNode::new(&NodeConfig::local()).await.unwrap();
        let b = PeerNode::new(&NodeConfig::local()).await.unwrap();

        a.connect(&b.addr_info().await.unwrap()).await.unwrap();
        assert!(a.peers().await.unwrap().contains(&b.peer_id()));

        let rtt = a.ping(&b.peer_id()).await.unwrap();
        assert!(rtt < Duration::from_secs(5));
        assert!(a.latency_ewma(&b.peer_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ping_interval_must_fit_in_request_timeout() {
        let config = NodeConfig {
            ping_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            ..NodeConfig::local()
        };

        assert!(matches!(
            PeerNode::new(&config).await,
            Err(Error::Construction(_))
        ));
    }

    #[tokio::test]
    async fn cannot_connect_to_self() {
        let node = PeerNode::new(&NodeConfig::local()).await.unwrap();
        let own = node.addr_info().await.unwrap();

        assert!(matches!(
            node.connect(&own).await,
            Err(Error::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn put_value_rejects_unknown_namespace() {
        let node = PeerNode::new(&NodeConfig::local()).await.unwrap();

        let result = node.put_value(b"/ipns/foo", b"bar").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
