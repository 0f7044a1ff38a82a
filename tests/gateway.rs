use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use dht_tracer::{
    eventlog::EventLog, gateway::Gateway, NodeConfig, PeerId, PeerNode, Tracer,
};

fn unstarted() -> Gateway {
    Gateway::new(Arc::new(Tracer::new(NodeConfig::local())), EventLog::new())
}

async fn get(router: Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn parse_errors_are_bad_requests() {
    let gateway = unstarted();

    assert_eq!(
        get(gateway.router(), "/cmd").await,
        (
            StatusCode::BAD_REQUEST,
            "no command provided. use ?q=<cmd>".to_string()
        )
    );
    assert_eq!(
        get(gateway.router(), "/cmd?q=ping").await,
        (
            StatusCode::BAD_REQUEST,
            "command format: <command> <arg>...".to_string()
        )
    );
    assert_eq!(
        get(gateway.router(), "/cmd?q=foo+bar").await,
        (
            StatusCode::BAD_REQUEST,
            "unrecognized command: foo".to_string()
        )
    );
}

#[tokio::test]
async fn query_before_start_is_a_server_error() {
    let gateway = unstarted();

    let uri = format!("/cmd?q=ping+{}", PeerId::random());
    let (status, body) = get(gateway.router(), &uri).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "error: dht node is not started");
}

#[tokio::test]
async fn empty_key_is_a_bad_request() {
    let gateway = unstarted();

    let (status, body) = get(gateway.router(), "/cmd?q=get-value+").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "error: please enter a Key");
}

#[tokio::test]
async fn exit_stops_the_gateway() {
    let gateway = unstarted();

    let (status, body) = get(gateway.router(), "/cmd?q=exit").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "exiting...");
    assert!(gateway.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn version() {
    let (status, body) = get(unstarted().router(), "/version").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        format!("tracedht version {}\n", env!("CARGO_PKG_VERSION"))
    );
}

#[tokio::test]
async fn events_allow_any_origin() {
    let gateway = unstarted();

    let response = gateway
        .router()
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}

#[tokio::test]
async fn ping_through_http() {
    let seed = PeerNode::new(&NodeConfig::local()).await.unwrap();

    let config = NodeConfig {
        bootstrap: vec![seed.addr_info().await.unwrap()],
        ..NodeConfig::local()
    };
    let tracer = Arc::new(Tracer::new(config));
    tracer.start().await.unwrap();

    let gateway = Gateway::new(tracer, EventLog::new());
    let shutdown = gateway.shutdown_token();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(gateway.serve(listener));

    let response = reqwest::get(format!(
        "http://{address}/cmd?q=ping+{}",
        seed.peer_id()
    ))
    .await
    .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("ping time: "), "{body}");

    let table = reqwest::get(format!("http://{address}/info/switch"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(table.contains(&seed.peer_id().to_string()));

    shutdown.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn events_subscription_ends_with_the_connection() {
    let log = EventLog::new();
    let gateway = Gateway::new(Arc::new(Tracer::new(NodeConfig::local())), log.clone());
    let shutdown = gateway.shutdown_token();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(gateway.serve(listener));

    let response = reqwest::get(format!("http://{address}/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(log.subscribers(), 1);

    drop(response);

    let mut released = false;
    for _ in 0..100 {
        // Writes are what reveal a closed socket to the server.
        log.publish("tick");
        if log.subscribers() == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(released);

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
