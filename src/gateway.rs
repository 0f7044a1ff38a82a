//! HTTP interface to a [Tracer].
//!
//! | Route | |
//! |---|---|
//! | `GET /cmd?q=<command> <arg>...` | run a command, reply with its result |
//! | `GET /events` | server sent events, one per log line |
//! | `GET /version` | crate version |
//! | `GET /info/switch` | probe the node's peers and print their latencies |

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query as UrlQuery, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    bootstrap,
    command::{parse_cmd, Control, Verb},
    eventlog::EventLog,
    tracer::{Reply, Tracer},
    Error, Result,
};

/// Ping rounds `/info/switch` launches before printing the table.
pub const SWITCH_PING_ROUNDS: usize = 2;

#[derive(Debug, Clone)]
struct AppState {
    tracer: Arc<Tracer>,
    log: EventLog,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub fn new(tracer: Arc<Tracer>, log: EventLog) -> Self {
        Self {
            state: AppState {
                tracer,
                log,
                shutdown: CancellationToken::new(),
            },
        }
    }

    /// Cancelled by the `exit` command; cancel it to stop serving.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/cmd", get(handle_cmd))
            .route("/events", get(handle_events))
            .route("/version", get(handle_version))
            .route("/info/switch", get(handle_switch_info))
            .with_state(self.state.clone())
    }

    /// Serve until `exit` is received or the shutdown token is cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let shutdown = self.shutdown_token();

        info!(address = ?listener.local_addr()?, "serving command gateway");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("command gateway stopped");

        Ok(())
    }
}

async fn handle_cmd(
    State(state): State<AppState>,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
) -> Response {
    let line = params.get("q").map(String::as_str).unwrap_or_default();

    let command = match parse_cmd(line) {
        Ok(command) => command,
        Err(error) => return (StatusCode::BAD_REQUEST, error.to_string()).into_response(),
    };

    info!(verb = %command.verb, args = ?command.args, "/cmd");

    let result = match command.verb {
        Verb::Control(Control::Exit) => {
            state.shutdown.cancel();
            Ok(Reply::Text("exiting...".to_string()))
        }
        Verb::Control(Control::Reset) => state.tracer.reset().await,
        Verb::Query(query) => {
            let (key, values) = match command.args.split_first() {
                Some((key, values)) => (key.as_str(), values),
                None => ("", &[][..]),
            };

            state.tracer.run_query(query, key, values).await
        }
    };

    match result {
        Ok(reply) => reply_response(reply),
        Err(error) => error_response(error),
    }
}

async fn handle_events(State(state): State<AppState>) -> impl IntoResponse {
    info!("/events");

    let shutdown = state.shutdown.clone();
    let events = state
        .log
        .subscribe()
        .map(|line| Ok::<_, Infallible>(Event::default().data(line)))
        .take_until(async move { shutdown.cancelled().await });

    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Sse::new(events))
}

async fn handle_version() -> String {
    format!("tracedht version {}\n", env!("CARGO_PKG_VERSION"))
}

async fn handle_switch_info(State(state): State<AppState>) -> Response {
    let Some(node) = state.tracer.node().await else {
        return error_response(Error::NotStarted);
    };

    bootstrap::ping_peers(&node, SWITCH_PING_ROUNDS);

    match bootstrap::latency_table(&node).await {
        Ok(table) => table.into_response(),
        Err(error) => error_response(error),
    }
}

fn reply_response(reply: Reply) -> Response {
    match reply {
        Reply::Text(text) => text.into_response(),
        Reply::Bytes(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Reply::Providers(providers) => {
            let lines = providers.map(|peer| Ok::<_, Infallible>(format!("{peer}\n")));

            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Body::from_stream(lines),
            )
                .into_response()
        }
    }
}

fn error_response(error: Error) -> Response {
    let status = if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, format!("error: {error}")).into_response()
}
