//! A single long-lived node whose DHT operations are driven by commands.

use std::fmt::{self, Debug, Formatter};
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use bytes::Bytes;
use cid::Cid;
use futures::{stream::BoxStream, Stream, StreamExt};
use libp2p::PeerId;
use tokio::sync::RwLock;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::{bootstrap, command::Query, config::NodeConfig, Error, PeerNode, Result};

/// What a command produced.
#[derive(Debug)]
pub enum Reply {
    Text(String),
    Bytes(Bytes),
    Providers(ProviderStream),
}

/// Providers of a key as they are found.
///
/// Dropping it cancels the search.
pub struct ProviderStream {
    inner: BoxStream<'static, PeerId>,
    _guard: DropGuard,
}

impl Debug for ProviderStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStream").finish_non_exhaustive()
    }
}

impl Stream for ProviderStream {
    type Item = PeerId;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PeerId>> {
        self.inner.poll_next_unpin(cx)
    }
}

#[derive(Debug, Default)]
struct Session {
    node: Option<PeerNode>,
    /// Parent of every query's scope, replaced on each (re)start.
    scope: CancellationToken,
}

#[derive(Debug)]
/// Owns the session: the current node and the scope of its queries.
///
/// Queries share the session; starting or resetting it waits for running
/// queries to finish and blocks new ones until it is done.
pub struct Tracer {
    config: NodeConfig,
    session: RwLock<Session>,
}

impl Tracer {
    /// An uninitialized tracer; call [Tracer::start] before running queries.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            session: RwLock::new(Session::default()),
        }
    }

    // === Getters ===

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The current node, if the session was started.
    pub async fn node(&self) -> Option<PeerNode> {
        self.session.read().await.node.clone()
    }

    // === Public Methods ===

    /// Create a fresh node and bootstrap it against the configured seeds.
    ///
    /// The node is kept even if bootstrapping fails.
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.write().await;

        session.scope.cancel();
        session.scope = CancellationToken::new();
        session.node = None;

        let node = PeerNode::new(&self.config).await?;
        session.node = Some(node.clone());

        info!(peer_id = %node.peer_id(), "tracer node started");

        bootstrap::bootstrap(&node, &self.config.bootstrap).await
    }

    /// Replace the node with a fresh one, same as [Tracer::start].
    pub async fn reset(&self) -> Result<Reply> {
        self.start().await?;

        Ok(Reply::Text("restarted".to_string()))
    }

    /// Stopping a session is not supported, reset it instead.
    pub fn stop(&self) -> Result<()> {
        Err(Error::Unsupported("stop"))
    }

    /// Run a DHT operation on the current node.
    ///
    /// `key` is the first argument of the command, `values` the rest.
    pub async fn run_query(&self, query: Query, key: &str, values: &[String]) -> Result<Reply> {
        let session = self.session.read().await;

        if key.is_empty() {
            return Err(Error::validation("please enter a Key"));
        }

        let node = session.node.as_ref().ok_or(Error::NotStarted)?;

        // Released on return. Work that outlives the call, like provider
        // forwarding, hangs off the session scope instead.
        let _scope = session.scope.child_token().drop_guard();

        debug!(%query, key, ?values, "running query");

        dispatch(node, &session.scope, query, key, values).await
    }
}

async fn dispatch(
    node: &PeerNode,
    session_scope: &CancellationToken,
    query: Query,
    key: &str,
    values: &[String],
) -> Result<Reply> {
    match query {
        Query::PutValue => {
            let value = values
                .first()
                .ok_or_else(|| Error::validation("PutValue takes in 1 argument"))?;

            node.put_value(key.as_bytes(), value.as_bytes()).await?;

            Ok(Reply::Text(format!("put {key} {value}")))
        }
        Query::GetValue => Ok(Reply::Bytes(node.get_value(key.as_bytes()).await?)),
        Query::AddProvider => {
            node.provide(&provider_key(key)?).await?;

            Ok(Reply::Text(format!("added self as provider for {key}")))
        }
        Query::GetProviders => {
            let mut providers = node.find_providers(&provider_key(key)?).await?;

            // Outlives this call, bounded by the session and the stream.
            let scope = session_scope.child_token();
            let task_scope = scope.clone();
            let (sender, receiver) = flume::unbounded();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = task_scope.cancelled() => break,
                        next = providers.next() => match next {
                            Some(provider) => {
                                if sender.send_async(provider).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            Ok(Reply::Providers(ProviderStream {
                inner: receiver.into_stream().boxed(),
                _guard: scope.drop_guard(),
            }))
        }
        Query::FindPeer => {
            let info = node.find_peer(&parse_peer_id(key)?).await?;

            Ok(Reply::Text(info.to_string()))
        }
        Query::Ping => {
            let rtt = node.ping(&parse_peer_id(key)?).await?;

            Ok(Reply::Text(format!("ping time: {rtt:?}")))
        }
    }
}

/// Providers are announced under the multihash of a content id.
fn provider_key(key: &str) -> Result<Vec<u8>> {
    let cid = Cid::from_str(key)
        .map_err(|error| Error::validation(format!("invalid cid {key}: {error}")))?;

    Ok(cid.hash().to_bytes())
}

fn parse_peer_id(key: &str) -> Result<PeerId> {
    PeerId::from_str(key)
        .map_err(|error| Error::validation(format!("invalid peer id {key}: {error}")))
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn empty_key_before_anything_else() {
        let tracer = Tracer::new(NodeConfig::local());

        let result = tracer.run_query(Query::Ping, "", &[]).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn query_needs_a_started_session() {
        let tracer = Tracer::new(NodeConfig::local());

        let result = tracer
            .run_query(Query::Ping, &PeerId::random().to_string(), &[])
            .await;
        assert!(matches!(result, Err(Error::NotStarted)));
    }

    #[test]
    fn stop_is_unsupported() {
        let tracer = Tracer::new(NodeConfig::local());

        assert!(matches!(tracer.stop(), Err(Error::Unsupported("stop"))));
    }

    #[tokio::test]
    async fn queries_wait_for_a_restart() {
        let tracer = Tracer::new(NodeConfig::local());

        let restarting = tracer.session.write().await;

        let query = tracer.run_query(Query::GetValue, "/v/foo", &[]);
        assert!(tokio::time::timeout(WAIT, query).await.is_err());

        drop(restarting);
    }

    #[tokio::test]
    async fn reset_waits_for_running_queries() {
        let tracer = Tracer::new(NodeConfig::local());

        let querying = tracer.session.read().await;
        assert!(tokio::time::timeout(WAIT, tracer.reset()).await.is_err());
        drop(querying);

        // No seeds, so the node is created but can't join anything.
        let result = tracer.reset().await;
        assert!(matches!(result, Err(Error::NoBootstrapPeers(_))));
        assert!(tracer.node().await.is_some());
    }

    #[tokio::test]
    async fn queries_leave_the_session_scope_alive() {
        let tracer = Tracer::new(NodeConfig::local());

        // No seeds: bootstrap fails, but the node is kept.
        assert!(tracer.start().await.is_err());

        let result = tracer.run_query(Query::GetValue, "/v/missing", &[]).await;
        assert!(result.is_err());

        assert!(!tracer.session.read().await.scope.is_cancelled());
    }

    #[test]
    fn provider_keys_are_multihashes() {
        let cid = "bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy";
        let parsed = Cid::from_str(cid).unwrap();

        assert_eq!(provider_key(cid).unwrap(), parsed.hash().to_bytes());
        assert!(matches!(provider_key("nope"), Err(Error::Validation(_))));
    }
}
