mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use qaaq_api::otp::OtpSender;
use qaaq_api::qbot::QbotClient;
use qaaq_api::state::{AppState, AppStateInner};
use qaaq_gateway::ais_client;
use qaaq_gateway::ais_relay::AisRelay;
use qaaq_gateway::connection;
use qaaq_gateway::dispatcher::Dispatcher;
use qaaq_types::geo::BoundingBox;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    relay: AisRelay,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "qaaq_server=debug,qaaq_api=debug,qaaq_gateway=debug,qaaq_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = qaaq_db::Database::open(&config.db_path)?;

    // Live vessel feed
    let relay = AisRelay::new(config.ais.clone());
    relay.spawn();

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        otp: OtpSender::new(config.whatsapp_url.clone(), config.whatsapp_token.clone()),
        qbot: QbotClient::new(config.llm_url.clone(), config.llm_api_key.clone(), config.llm_model.clone()),
        google_maps_api_key: config.google_maps_api_key.clone(),
        ais_enabled: relay.is_enabled(),
    });

    if !app_state.otp.is_configured() {
        warn!("QAAQ_WHATSAPP_URL not set, one-time codes will only be logged");
    }
    if !app_state.qbot.is_configured() {
        info!("QAAQ_LLM_API_KEY not set, QBOT answers from built-in replies");
    }

    let state = ServerState { dispatcher, relay, jwt_secret: config.jwt_secret.clone() };

    let live_routes = Router::new()
        .route("/api/gateway", get(gateway_upgrade))
        .route("/api/ais-stream", get(ais_upgrade))
        .route("/api/health", get(health))
        .with_state(state);

    let app = Router::new()
        .merge(qaaq_api::router(app_state))
        .merge(live_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("QaaqConnect server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Chat gateway. A `token` query parameter authenticates at upgrade time;
/// without one the client must send Identify first.
async fn gateway_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match query.token {
        Some(token) => {
            let Some(claims) = connection::verify_token(&token, &state.jwt_secret) else {
                return StatusCode::UNAUTHORIZED.into_response();
            };
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, state.dispatcher, claims.sub, claims.name)
            })
        }
        None => ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.jwt_secret)),
    }
}

#[derive(Debug, Deserialize)]
struct BoundsQuery {
    north: Option<f64>,
    south: Option<f64>,
    east: Option<f64>,
    west: Option<f64>,
}

impl BoundsQuery {
    /// All four edges or none; anything in between is a client error.
    fn into_bounds(self) -> Result<Option<BoundingBox>, &'static str> {
        match (self.north, self.south, self.east, self.west) {
            (None, None, None, None) => Ok(None),
            (Some(north), Some(south), Some(east), Some(west)) => {
                let bounds = BoundingBox { north, south, east, west };
                if bounds.is_valid() { Ok(Some(bounds)) } else { Err("Invalid bounding box") }
            }
            _ => Err("north, south, east and west must be given together"),
        }
    }
}

/// Live vessel positions for the map.
async fn ais_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<BoundsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let bounds = match query.into_bounds() {
        Ok(bounds) => bounds,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    ws.on_upgrade(move |socket| ais_client::handle_ais_client(socket, state.relay, bounds))
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "online_users": state.dispatcher.online_users().await.len(),
        "ais": {
            "enabled": state.relay.is_enabled(),
            "connected": state.relay.is_upstream_connected(),
            "vessels": state.relay.vessel_count().await,
        },
    }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(north: Option<f64>, south: Option<f64>, east: Option<f64>, west: Option<f64>) -> BoundsQuery {
        BoundsQuery { north, south, east, west }
    }

    #[test]
    fn bounds_all_or_nothing() {
        assert!(query(None, None, None, None).into_bounds().unwrap().is_none());
        assert!(query(Some(30.0), Some(20.0), None, None).into_bounds().is_err());
        let pacific = query(Some(10.0), Some(-10.0), Some(-170.0), Some(170.0)).into_bounds().unwrap().unwrap();
        assert!(pacific.contains(0.0, 179.5));
    }

    #[test]
    fn inverted_latitudes_are_rejected() {
        assert!(query(Some(-10.0), Some(10.0), Some(20.0), Some(0.0)).into_bounds().is_err());
    }
}
