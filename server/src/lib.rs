use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Path, State as AxumState},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use backgammon_execution::dice;
use backgammon_types::{RejectReason, Request, Response, Seed};
use commonware_codec::{DecodeExt, Encode};
use commonware_utils::from_hex;
use futures::{SinkExt, StreamExt};
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};

pub mod archive;
pub mod clock;
pub mod config;
pub mod hub;
pub mod metrics;

pub use archive::{Archive, LogArchive};
pub use clock::{Clock, SystemClock};
pub use config::{Config, ConfigError, ValidatedConfig};
pub use hub::Hub;
pub use metrics::Metrics;

/// Apply one client request to the hub.
pub fn dispatch<C: Clock, A: Archive>(hub: &Hub<C, A>, request: Request) -> Response {
    let result = match request {
        Request::Create {
            variant,
            white,
            black,
        } => hub
            .create_match(variant, white, black)
            .map(|(match_id, commitment)| Response::Created {
                match_id,
                commitment,
            }),
        Request::Roll { match_id, player } => hub.roll(match_id, player).map(Response::Rolled),
        Request::Move {
            match_id,
            player,
            mv,
        } => hub
            .submit_move(match_id, player, mv)
            .map(Response::Snapshot),
        Request::EndTurn { match_id, player } => {
            hub.end_turn(match_id, player).map(Response::Snapshot)
        }
        Request::Resync { match_id } => hub.resync(match_id).map(Response::Snapshot),
    };
    result.unwrap_or_else(Response::Rejected)
}

/// Periodically enforce deadlines and disconnect grace.
pub fn spawn_sweeper<C: Clock, A: Archive>(hub: Arc<Hub<C, A>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = hub.sweep();
            if removed > 0 {
                tracing::debug!(removed, "sweep tore down matches");
            }
        }
    })
}

/// Per-client request limit.
#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

struct Shared<C: Clock, A: Archive> {
    hub: Arc<Hub<C, A>>,
    registry: Arc<Registry>,
}

pub struct Api<C: Clock, A: Archive> {
    shared: Arc<Shared<C, A>>,
    rate_limit: Option<RateLimit>,
}

impl<C: Clock, A: Archive> Api<C, A> {
    pub fn new(hub: Arc<Hub<C, A>>, registry: Arc<Registry>) -> Self {
        Self {
            shared: Arc::new(Shared { hub, registry }),
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        let mut router = Router::new()
            .route("/submit", post(submit::<C, A>))
            .route("/snapshot/:match_id", get(snapshot::<C, A>))
            .route("/updates/:match_id/:player", get(updates_ws::<C, A>))
            .route(
                "/verify/:seed/:roll_index/:die1/:die2",
                get(verify),
            )
            .route("/metrics", get(metrics::<C, A>))
            .layer(cors);

        // Configure rate limiting
        if let Some(limit) = self.rate_limit {
            let governor_conf = GovernorConfigBuilder::default()
                .per_nanosecond((1_000_000_000 / limit.per_second.max(1)).max(1))
                .burst_size(limit.burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish();
            match governor_conf {
                Some(config) => {
                    router = router.layer(GovernorLayer {
                        config: Arc::new(config),
                    });
                }
                None => tracing::warn!(?limit, "invalid rate limit, serving without one"),
            }
        }

        router.with_state(self.shared.clone())
    }
}

fn reject_status(reason: RejectReason) -> StatusCode {
    match reason {
        RejectReason::UnknownMatch => StatusCode::NOT_FOUND,
        RejectReason::NotParticipant => StatusCode::FORBIDDEN,
        RejectReason::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::CONFLICT,
    }
}

async fn submit<C: Clock, A: Archive>(
    AxumState(shared): AxumState<Arc<Shared<C, A>>>,
    body: Bytes,
) -> impl IntoResponse {
    let request = match Request::decode(&mut body.as_ref()) {
        Ok(request) => request,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let response = dispatch(&shared.hub, request);
    (StatusCode::OK, response.encode().to_vec()).into_response()
}

async fn snapshot<C: Clock, A: Archive>(
    AxumState(shared): AxumState<Arc<Shared<C, A>>>,
    Path(match_id): Path<u64>,
) -> impl IntoResponse {
    match shared.hub.resync(match_id) {
        Ok(snapshot) => (StatusCode::OK, snapshot.encode().to_vec()).into_response(),
        Err(reason) => reject_status(reason).into_response(),
    }
}

async fn verify(
    Path((seed, roll_index, die1, die2)): Path<(String, u64, u8, u8)>,
) -> impl IntoResponse {
    let Some(raw) = from_hex(&seed) else {
        return StatusCode::BAD_REQUEST;
    };
    let Ok(seed) = Seed::try_from(raw.as_slice()) else {
        return StatusCode::BAD_REQUEST;
    };
    if dice::verify(&seed, roll_index, die1, die2) {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    }
}

async fn metrics<C: Clock, A: Archive>(
    AxumState(shared): AxumState<Arc<Shared<C, A>>>,
) -> impl IntoResponse {
    let mut body = String::new();
    if let Err(e) = prometheus_client::encoding::text::encode(&mut body, &shared.registry) {
        tracing::error!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

async fn updates_ws<C: Clock, A: Archive>(
    AxumState(shared): AxumState<Arc<Shared<C, A>>>,
    Path((match_id, player)): Path<(u64, u64)>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let updates = match shared.hub.connect(match_id, player) {
        Ok(updates) => updates,
        Err(reason) => return reject_status(reason).into_response(),
    };
    let hub = shared.hub.clone();
    ws.on_failed_upgrade(move |e| {
        tracing::warn!(match_id, player, "WebSocket upgrade failed: {}", e);
        hub.disconnect(match_id, player);
    })
    .on_upgrade(move |socket| handle_updates_ws(socket, shared, match_id, player, updates))
}

async fn handle_updates_ws<C: Clock, A: Archive>(
    socket: axum::extract::ws::WebSocket,
    shared: Arc<Shared<C, A>>,
    match_id: u64,
    player: u64,
    mut updates: broadcast::Receiver<backgammon_types::Event>,
) {
    tracing::info!(match_id, player, "Updates WebSocket connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Handle incoming WebSocket messages (ping/pong/close)
            msg = receiver.next() => {
                match msg {
                    Some(Ok(axum::extract::ws::Message::Close(_))) => {
                        tracing::info!(match_id, player, "Client closed WebSocket connection");
                        break;
                    }
                    Some(Ok(axum::extract::ws::Message::Ping(data))) => {
                        if sender.send(axum::extract::ws::Message::Pong(data)).await.is_err() {
                            tracing::warn!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {:?}", e);
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            // Handle match updates
            update = updates.recv() => {
                match update {
                    Ok(event) => {
                        tracing::debug!(match_id, name = event.name(), version = event.snapshot().version, "Sending update");
                        if sender
                            .send(axum::extract::ws::Message::Binary(event.encode().to_vec()))
                            .await
                            .is_err()
                        {
                            tracing::warn!("Failed to send update, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // The client notices the version gap and resyncs.
                        tracing::warn!(match_id, player, skipped, "WebSocket client lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!(match_id, "Match closed");
                        break;
                    }
                }
            }
        }
    }
    shared.hub.disconnect(match_id, player);
    tracing::info!(match_id, player, "Updates WebSocket handler exiting");
    let _ = sender.close().await;
}
