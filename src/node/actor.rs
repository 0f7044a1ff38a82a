//! The task that owns a node's swarm and serves requests from [super::PeerNode] handles.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::StreamExt;
use libp2p::{
    identify, kad,
    kad::store::RecordStore,
    ping,
    swarm::{dial_opts::DialOpts, DialError, SwarmEvent},
    PeerId, Swarm,
};
use tracing::{debug, info, trace, warn};

use super::behaviour::{Behaviour, BehaviourEvent};
use super::validator::NamespacedValidator;
use super::{AddrInfo, NodeInfo};
use crate::{Error, Result};

/// Provider searches stop after this many distinct providers.
pub const MAX_PROVIDERS: usize = 10;

/// Weight of a new round trip sample in the latency moving average.
const LATENCY_SMOOTHING: f64 = 0.1;

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<NodeInfo>),
    AddrInfo(Sender<AddrInfo>),
    Peers(Sender<Vec<PeerId>>),
    Latency(PeerId, Sender<Option<Duration>>),
    Connect(AddrInfo, Sender<Result<()>>),
    Ping(PeerId, Sender<Result<Duration>>),
    Bootstrap(Sender<Result<()>>),
    PutValue(kad::Record, Sender<Result<()>>),
    GetValue(kad::RecordKey, Sender<Result<Vec<u8>>>),
    Provide(kad::RecordKey, Sender<Result<()>>),
    FindProviders(kad::RecordKey, Sender<PeerId>, Sender<kad::QueryId>),
    FindPeer(PeerId, Sender<Result<AddrInfo>>),
    FinishQuery(kad::QueryId),
}

/// A query started on behalf of a handle, waiting for the engine's answer.
#[derive(Debug)]
enum PendingQuery {
    PutValue(Sender<Result<()>>),
    GetValue(Sender<Result<Vec<u8>>>),
    Provide(Sender<Result<()>>),
    Providers {
        sender: Sender<PeerId>,
        seen: HashSet<PeerId>,
    },
    FindPeer {
        target: PeerId,
        sender: Sender<Result<AddrInfo>>,
    },
}

pub(crate) struct Actor {
    swarm: Swarm<Behaviour>,
    receiver: Receiver<ActorMessage>,
    validator: NamespacedValidator,

    /// Moving average of ping round trips per peer.
    latencies: HashMap<PeerId, Duration>,

    pending_dials: HashMap<PeerId, Vec<Sender<Result<()>>>>,
    pending_pings: HashMap<PeerId, Vec<Sender<Result<Duration>>>>,
    queries: HashMap<kad::QueryId, PendingQuery>,
}

impl Actor {
    pub fn new(swarm: Swarm<Behaviour>, receiver: Receiver<ActorMessage>) -> Self {
        Self {
            swarm,
            receiver,
            validator: NamespacedValidator::default(),
            latencies: HashMap::new(),
            pending_dials: HashMap::new(),
            pending_pings: HashMap::new(),
            queries: HashMap::new(),
        }
    }

    /// Runs until every handle to this node is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.receiver.recv_async() => match message {
                    Ok(message) => self.handle_message(message),
                    Err(_) => {
                        debug!(peer_id = %self.swarm.local_peer_id(), "dht node dropped, stopping its actor");
                        break;
                    }
                },
                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
    }

    fn info(&self) -> NodeInfo {
        NodeInfo {
            peer_id: *self.swarm.local_peer_id(),
            listen_addrs: self.swarm.listeners().cloned().collect(),
            peers: self.swarm.connected_peers().copied().collect(),
            connections: self
                .swarm
                .network_info()
                .connection_counters()
                .num_established() as usize,
            pending_queries: self.queries.len(),
        }
    }

    // === Requests ===

    fn handle_message(&mut self, message: ActorMessage) {
        match message {
            ActorMessage::Info(sender) => {
                let _ = sender.send(self.info());
            }
            ActorMessage::AddrInfo(sender) => {
                let _ = sender.send(AddrInfo::new(
                    *self.swarm.local_peer_id(),
                    self.swarm.listeners().cloned().collect(),
                ));
            }
            ActorMessage::Peers(sender) => {
                let _ = sender.send(self.swarm.connected_peers().copied().collect());
            }
            ActorMessage::Latency(peer, sender) => {
                let _ = sender.send(self.latencies.get(&peer).copied());
            }
            ActorMessage::Connect(target, sender) => self.connect(target, sender),
            ActorMessage::Ping(peer, sender) => self.ping(peer, sender),
            ActorMessage::Bootstrap(sender) => {
                let result = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .bootstrap()
                    .map(|_| ())
                    .map_err(|error| Error::Engine(error.to_string()));

                let _ = sender.send(result);
            }
            ActorMessage::PutValue(record, sender) => {
                if let Err(error) = self.validator.validate(&record.key.to_vec(), &record.value) {
                    let _ = sender.send(Err(error));
                    return;
                }

                match self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .put_record(record, kad::Quorum::One)
                {
                    Ok(id) => {
                        self.queries.insert(id, PendingQuery::PutValue(sender));
                    }
                    Err(error) => {
                        let _ = sender.send(Err(Error::Engine(error.to_string())));
                    }
                }
            }
            ActorMessage::GetValue(key, sender) => {
                let id = self.swarm.behaviour_mut().kad.get_record(key);
                self.queries.insert(id, PendingQuery::GetValue(sender));
            }
            ActorMessage::Provide(key, sender) => {
                match self.swarm.behaviour_mut().kad.start_providing(key) {
                    Ok(id) => {
                        self.queries.insert(id, PendingQuery::Provide(sender));
                    }
                    Err(error) => {
                        let _ = sender.send(Err(Error::Engine(error.to_string())));
                    }
                }
            }
            ActorMessage::FindProviders(key, sender, id_sender) => {
                let id = self.swarm.behaviour_mut().kad.get_providers(key);
                self.queries.insert(
                    id,
                    PendingQuery::Providers {
                        sender,
                        seen: HashSet::new(),
                    },
                );
                let _ = id_sender.send(id);
            }
            ActorMessage::FindPeer(target, sender) => {
                let id = self.swarm.behaviour_mut().kad.get_closest_peers(target);
                self.queries
                    .insert(id, PendingQuery::FindPeer { target, sender });
            }
            ActorMessage::FinishQuery(id) => self.finish_query(id),
        }
    }

    fn connect(&mut self, target: AddrInfo, sender: Sender<Result<()>>) {
        let peer_id = target.peer_id;

        if peer_id == *self.swarm.local_peer_id() {
            let _ = sender.send(Err(Error::Connectivity("cannot dial self".into())));
            return;
        }

        if self.swarm.is_connected(&peer_id) {
            let _ = sender.send(Ok(()));
            return;
        }

        let opts = DialOpts::peer_id(peer_id).addresses(target.addrs).build();

        match self.swarm.dial(opts) {
            Ok(()) | Err(DialError::DialPeerConditionFalse(_)) => {
                self.pending_dials.entry(peer_id).or_default().push(sender);
            }
            Err(error) => {
                let _ = sender.send(Err(Error::Connectivity(format!(
                    "failed to dial {peer_id}: {error}"
                ))));
            }
        }
    }

    /// Pings run on every connection at the configured interval, so a ping
    /// request waits for the next round trip with that peer, dialing it
    /// first if needed.
    fn ping(&mut self, peer: PeerId, sender: Sender<Result<Duration>>) {
        if peer == *self.swarm.local_peer_id() {
            let _ = sender.send(Err(Error::Connectivity("cannot ping self".into())));
            return;
        }

        if !self.swarm.is_connected(&peer) {
            match self.swarm.dial(peer) {
                Ok(()) | Err(DialError::DialPeerConditionFalse(_)) => {}
                Err(error) => {
                    let _ = sender.send(Err(Error::Connectivity(format!(
                        "failed to dial {peer}: {error}"
                    ))));
                    return;
                }
            }
        }

        self.pending_pings.entry(peer).or_default().push(sender);
    }

    fn finish_query(&mut self, id: kad::QueryId) {
        if self.queries.remove(&id).is_some() {
            if let Some(mut query) = self.swarm.behaviour_mut().kad.query_mut(&id) {
                query.finish();
            }
            trace!(?id, "query finished early");
        }
    }

    // === Events ===

    fn handle_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                debug!(peer_id = %self.swarm.local_peer_id(), %address, "new listen address");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                trace!(%peer_id, "connection established");

                let Some(senders) = self.pending_dials.remove(&peer_id) else {
                    return;
                };

                // Peers we were asked to connect to are routable right away,
                // without waiting for identify.
                if endpoint.is_dialer() {
                    self.swarm
                        .behaviour_mut()
                        .kad
                        .add_address(&peer_id, endpoint.get_remote_address().clone());
                }

                for sender in senders {
                    let _ = sender.send(Ok(()));
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                if self.swarm.is_connected(&peer_id) {
                    return;
                }

                let message = format!("failed to dial {peer_id}: {error}");
                trace!(%message);

                for sender in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = sender.send(Err(Error::Connectivity(message.clone())));
                }
                for sender in self.pending_pings.remove(&peer_id).unwrap_or_default() {
                    let _ = sender.send(Err(Error::Connectivity(message.clone())));
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established: 0,
                ..
            } => {
                for sender in self.pending_pings.remove(&peer_id).unwrap_or_default() {
                    let _ = sender.send(Err(Error::Connectivity(format!(
                        "connection to {peer_id} closed"
                    ))));
                }
            }
            SwarmEvent::Behaviour(BehaviourEvent::Kad(event)) => self.handle_kad_event(event),
            SwarmEvent::Behaviour(BehaviourEvent::Ping(event)) => self.handle_ping_event(event),
            SwarmEvent::Behaviour(BehaviourEvent::Identify(event)) => {
                self.handle_identify_event(event)
            }
            _ => {}
        }
    }

    fn handle_ping_event(&mut self, event: ping::Event) {
        let ping::Event { peer, result, .. } = event;

        match result {
            Ok(rtt) => {
                let average = self.latencies.entry(peer).or_insert(rtt);
                *average =
                    average.mul_f64(1.0 - LATENCY_SMOOTHING) + rtt.mul_f64(LATENCY_SMOOTHING);

                for sender in self.pending_pings.remove(&peer).unwrap_or_default() {
                    let _ = sender.send(Ok(rtt));
                }
            }
            Err(failure) => {
                debug!(%peer, %failure, "ping failed");

                for sender in self.pending_pings.remove(&peer).unwrap_or_default() {
                    let _ = sender.send(Err(Error::Engine(format!("ping {peer}: {failure}"))));
                }
            }
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            if !info.protocols.contains(&kad::PROTOCOL_NAME) {
                return;
            }

            for address in info.listen_addrs {
                self.swarm
                    .behaviour_mut()
                    .kad
                    .add_address(&peer_id, address);
            }
        }
    }

    fn handle_kad_event(&mut self, event: kad::Event) {
        match event {
            kad::Event::InboundRequest { request } => self.handle_inbound_request(request),
            kad::Event::OutboundQueryProgressed {
                id, result, step, ..
            } => {
                self.handle_query_progress(id, result);

                if step.last {
                    // Dropping whatever is left closes streams and wakes waiters.
                    self.queries.remove(&id);
                }
            }
            kad::Event::RoutingUpdated { peer, .. } => {
                trace!(%peer, "routing table updated");
            }
            _ => {}
        }
    }

    fn handle_inbound_request(&mut self, request: kad::InboundRequest) {
        match request {
            kad::InboundRequest::PutRecord {
                source,
                record: Some(record),
                ..
            } => match self.validator.validate(&record.key.to_vec(), &record.value) {
                Ok(()) => {
                    if let Err(error) = self.swarm.behaviour_mut().kad.store_mut().put(record) {
                        warn!(%source, %error, "failed to store record");
                    }
                }
                Err(error) => {
                    debug!(%source, %error, "rejected invalid record");
                }
            },
            kad::InboundRequest::AddProvider {
                record: Some(record),
            } => {
                if let Err(error) = self
                    .swarm
                    .behaviour_mut()
                    .kad
                    .store_mut()
                    .add_provider(record)
                {
                    warn!(%error, "failed to store provider record");
                }
            }
            _ => {}
        }
    }

    fn handle_query_progress(&mut self, id: kad::QueryId, result: kad::QueryResult) {
        match result {
            kad::QueryResult::Bootstrap(Ok(kad::BootstrapOk { num_remaining, .. })) => {
                if num_remaining == 0 {
                    info!(peer_id = %self.swarm.local_peer_id(), "dht bootstrap done");
                }
            }
            kad::QueryResult::Bootstrap(Err(error)) => {
                debug!(peer_id = %self.swarm.local_peer_id(), %error, "dht bootstrap failed");
            }
            kad::QueryResult::PutRecord(result) => {
                if let Some(PendingQuery::PutValue(sender)) = self.queries.remove(&id) {
                    let _ = sender.send(
                        result
                            .map(|_| ())
                            .map_err(|error| Error::Engine(error.to_string())),
                    );
                }
            }
            kad::QueryResult::StartProviding(result) => {
                if let Some(PendingQuery::Provide(sender)) = self.queries.remove(&id) {
                    let _ = sender.send(
                        result
                            .map(|_| ())
                            .map_err(|error| Error::Engine(error.to_string())),
                    );
                }
            }
            kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FoundRecord(found))) => {
                let record = found.record;

                if let Err(error) = self.validator.validate(&record.key.to_vec(), &record.value)
                {
                    debug!(?found.peer, %error, "ignoring invalid record");
                    return;
                }

                if let Some(PendingQuery::GetValue(sender)) = self.queries.remove(&id) {
                    let _ = sender.send(Ok(record.value));

                    if let Some(mut query) = self.swarm.behaviour_mut().kad.query_mut(&id) {
                        query.finish();
                    }
                }
            }
            kad::QueryResult::GetRecord(Ok(kad::GetRecordOk::FinishedWithNoAdditionalRecord {
                ..
            })) => {
                if let Some(PendingQuery::GetValue(sender)) = self.queries.remove(&id) {
                    let _ = sender.send(Err(Error::Engine("routing: not found".into())));
                }
            }
            kad::QueryResult::GetRecord(Err(error)) => {
                if let Some(PendingQuery::GetValue(sender)) = self.queries.remove(&id) {
                    let _ = sender.send(Err(Error::Engine(error.to_string())));
                }
            }
            kad::QueryResult::GetProviders(Ok(kad::GetProvidersOk::FoundProviders {
                providers,
                ..
            })) => self.forward_providers(id, providers),
            kad::QueryResult::GetClosestPeers(result) => {
                if let Some(PendingQuery::FindPeer { target, sender }) = self.queries.remove(&id) {
                    let peers = match result {
                        Ok(kad::GetClosestPeersOk { peers, .. }) => peers,
                        Err(kad::GetClosestPeersError::Timeout { peers, .. }) => peers,
                    };

                    let found = peers
                        .into_iter()
                        .find(|peer| peer.peer_id == target)
                        .map(|peer| AddrInfo::new(peer.peer_id, peer.addrs))
                        .ok_or_else(|| Error::Engine("routing: not found".into()));

                    let _ = sender.send(found);
                }
            }
            _ => {}
        }
    }

    fn forward_providers(&mut self, id: kad::QueryId, providers: HashSet<PeerId>) {
        let Some(PendingQuery::Providers { sender, seen }) = self.queries.get_mut(&id) else {
            return;
        };

        let mut done = false;

        for provider in providers {
            if !seen.insert(provider) {
                continue;
            }

            if sender.send(provider).is_err() {
                // Consumer went away.
                done = true;
                break;
            }

            if seen.len() >= MAX_PROVIDERS {
                done = true;
                break;
            }
        }

        if done {
            self.finish_query(id);
        }
    }
}
