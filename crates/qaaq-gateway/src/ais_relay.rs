use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{debug, info, warn};

use qaaq_types::ais::{AisFrame, Ship};
use qaaq_types::geo::BoundingBox;

use crate::ais_feed::{VesselRegistry, parse_stream_message, subscription_message};

pub const DEFAULT_AIS_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// Fixed wait between upstream connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AisConfig {
    /// No key means the relay never dials out.
    pub api_key: Option<String>,
    pub url: String,
    pub reconnect_delay: Duration,
    /// Vessels silent for longer than this are forgotten.
    pub max_age: Duration,
    /// Areas requested from upstream; empty means the whole world.
    pub bounding_boxes: Vec<BoundingBox>,
}

impl Default for AisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: DEFAULT_AIS_URL.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            max_age: Duration::from_secs(30 * 60),
            bounding_boxes: Vec::new(),
        }
    }
}

/// Fans one upstream vessel feed out to any number of map clients.
#[derive(Clone)]
pub struct AisRelay {
    inner: Arc<AisRelayInner>,
}

struct AisRelayInner {
    config: AisConfig,
    frames_tx: broadcast::Sender<AisFrame>,
    registry: RwLock<VesselRegistry>,
    upstream_connected: AtomicBool,
}

impl AisRelay {
    pub fn new(config: AisConfig) -> Self {
        let (frames_tx, _) = broadcast::channel(4096);
        Self {
            inner: Arc::new(AisRelayInner {
                config,
                frames_tx,
                registry: RwLock::new(VesselRegistry::new()),
                upstream_connected: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.api_key.is_some()
    }

    pub fn is_upstream_connected(&self) -> bool {
        self.inner.upstream_connected.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AisFrame> {
        self.inner.frames_tx.subscribe()
    }

    pub async fn snapshot(&self, bounds: Option<&BoundingBox>) -> Vec<Ship> {
        self.inner.registry.read().await.ships_in(bounds)
    }

    pub async fn vessel_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Current feed state as a frame for a newly connected client.
    pub fn status_frame(&self) -> AisFrame {
        let (connected, message) = if !self.is_enabled() {
            (false, "AIS feed unavailable: no API key configured")
        } else if self.is_upstream_connected() {
            (true, "AIS feed connected")
        } else {
            (false, "AIS feed reconnecting")
        };
        AisFrame::Status { connected, message: message.to_string() }
    }

    /// Decode one upstream frame, fold it into the registry and relay the result.
    pub async fn ingest(&self, text: &str) {
        let update = match parse_stream_message(text) {
            Ok(Some(update)) => update,
            Ok(None) => return,
            Err(e) => {
                debug!("Skipping undecodable AIS frame: {}", e);
                return;
            }
        };

        let ship = self.inner.registry.write().await.apply(update, chrono::Utc::now());
        if let Some(ship) = ship {
            let _ = self.inner.frames_tx.send(AisFrame::ShipUpdate { ship });
        }
    }

    /// Start the upstream and pruning tasks. Without an API key only the
    /// pruning task runs.
    pub fn spawn(&self) {
        tokio::spawn(self.clone().run_prune_loop());

        match self.inner.config.api_key.clone() {
            Some(key) => {
                tokio::spawn(self.clone().run_upstream(key));
            }
            None => warn!("AISSTREAM_API_KEY not set, AIS relay will not connect upstream"),
        }
    }

    async fn run_upstream(self, api_key: String) {
        loop {
            match self.connect_once(&api_key).await {
                Ok(()) => warn!("AIS upstream closed the stream"),
                Err(e) => warn!("AIS upstream error: {}", e),
            }
            self.set_connected(false);

            info!("Reconnecting to AIS upstream in {:?}", self.inner.config.reconnect_delay);
            tokio::time::sleep(self.inner.config.reconnect_delay).await;
        }
    }

    async fn connect_once(&self, api_key: &str) -> anyhow::Result<()> {
        let (stream, _) = tokio_tungstenite::connect_async(self.inner.config.url.as_str()).await?;
        let (mut write, mut read) = stream.split();

        let subscription = subscription_message(api_key, &self.inner.config.bounding_boxes);
        write.send(UpstreamMessage::Text(subscription.to_string().into())).await?;

        info!("Connected to AIS upstream at {}", self.inner.config.url);
        self.set_connected(true);

        while let Some(msg) = read.next().await {
            match msg? {
                UpstreamMessage::Text(text) => self.ingest(&text).await,
                // aisstream.io delivers its JSON in binary frames
                UpstreamMessage::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => self.ingest(text).await,
                    Err(_) => debug!("Skipping non-UTF-8 AIS frame ({} bytes)", data.len()),
                },
                UpstreamMessage::Close(frame) => {
                    info!("AIS upstream sent close: {:?}", frame);
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn set_connected(&self, connected: bool) {
        let was = self.inner.upstream_connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            let _ = self.inner.frames_tx.send(self.status_frame());
        }
    }

    async fn run_prune_loop(self) {
        let max_age = self.inner.config.max_age;
        let mut interval = tokio::time::interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let Ok(max_age) = chrono::Duration::from_std(max_age) else {
                warn!("AIS max age out of range, pruning disabled");
                return;
            };
            let cutoff = chrono::Utc::now() - max_age;
            let pruned = self.inner.registry.write().await.prune(cutoff);
            if pruned > 0 {
                debug!("Pruned {} stale vessels", pruned);
            }
        }
    }
}
