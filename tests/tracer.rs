use std::time::Duration;

use futures::StreamExt;

use dht_tracer::{
    command::Query,
    tracer::{Reply, Tracer},
    NodeConfig, PeerNode,
};

const CONTENT: &str = "bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy";

/// Retry `check` every 50ms for up to 10s.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn started_tracer(seed: &PeerNode) -> Tracer {
    let tracer = Tracer::new(NodeConfig {
        bootstrap: vec![seed.addr_info().await.unwrap()],
        ..NodeConfig::local()
    });
    tracer.start().await.unwrap();

    tracer
}

#[tokio::test]
async fn dropping_provider_reply_releases_the_query() {
    let seed = PeerNode::new(&NodeConfig::local()).await.unwrap();
    let tracer = started_tracer(&seed).await;
    let node = tracer.node().await.unwrap();

    let reply = tracer
        .run_query(Query::GetProviders, CONTENT, &[])
        .await
        .unwrap();
    let Reply::Providers(providers) = reply else {
        panic!("expected a provider stream, got {reply:?}");
    };

    drop(providers);

    let node = &node;
    assert!(eventually(|| async move { node.info().await.unwrap().pending_queries() == 0 }).await);
}

#[tokio::test]
async fn provider_reply_yields_announced_providers() {
    let seed = PeerNode::new(&NodeConfig::local()).await.unwrap();
    let tracer = started_tracer(&seed).await;

    let reply = tracer
        .run_query(Query::AddProvider, CONTENT, &[])
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Text(text) if text == format!("added self as provider for {CONTENT}")));

    let reply = tracer
        .run_query(Query::GetProviders, CONTENT, &[])
        .await
        .unwrap();
    let Reply::Providers(mut providers) = reply else {
        panic!("expected a provider stream, got {reply:?}");
    };

    let own = tracer.node().await.unwrap().peer_id();
    assert_eq!(providers.next().await, Some(own));
}
