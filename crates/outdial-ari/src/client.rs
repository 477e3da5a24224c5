//! ARI REST client and event-stream pump.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::error::{AriError, Result};
use crate::events::{AriEvent, Bridge, Channel, LiveRecording};

/// Parameters for a channel originate command
#[derive(Debug, Clone)]
pub struct OriginateRequest {
    /// Endpoint specification, e.g. `PJSIP/5551234@trunk` or `Local/777@default2`
    pub endpoint: String,
    /// Stasis application receiving the channel
    pub app: String,
    /// Application arguments, joined comma-separated on the wire
    pub app_args: Vec<String>,
    pub caller_id: Option<String>,
    /// Call-setup timeout delegated to Asterisk, in seconds
    pub timeout_seconds: u64,
}

/// Parameters for starting a bridge recording
#[derive(Debug, Clone)]
pub struct RecordBridgeRequest {
    pub bridge_id: String,
    pub name: String,
    pub format: String,
}

/// Command surface the engine drives Asterisk through.
///
/// The engine only ever talks to this trait; [`AriClient`] is the REST
/// implementation and tests substitute an in-memory one.
#[async_trait]
pub trait AriCommands: Send + Sync {
    async fn originate(&self, request: OriginateRequest) -> Result<Channel>;
    async fn answer(&self, channel_id: &str) -> Result<()>;
    async fn hangup(&self, channel_id: &str) -> Result<()>;
    async fn create_bridge(&self, name: &str) -> Result<Bridge>;
    async fn add_channel(&self, bridge_id: &str, channel_id: &str) -> Result<()>;
    async fn destroy_bridge(&self, bridge_id: &str) -> Result<()>;
    async fn record_bridge(&self, request: RecordBridgeRequest) -> Result<LiveRecording>;
    /// Stop the recording media on a bridge (`media=recording`).
    async fn stop_bridge_media(&self, bridge_id: &str) -> Result<()>;
    /// Stop a live recording through the recordings API.
    async fn stop_recording(&self, name: &str) -> Result<()>;
}

/// REST/WebSocket client for a single Asterisk ARI endpoint
pub struct AriClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    app: String,
}

impl AriClient {
    /// Connect to ARI: build the REST client and establish the event
    /// WebSocket for `app`.
    ///
    /// The initial WebSocket connect is performed eagerly so a dead or
    /// misconfigured ARI endpoint fails fast; afterwards the pump task
    /// reconnects on its own with capped backoff, re-emitting events into
    /// the returned channel.
    pub async fn connect(
        base_url: &str,
        username: &str,
        password: &str,
        app: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<AriEvent>)> {
        let client = Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            app: app.to_string(),
        };

        let ws_url = client.events_url();
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| AriError::connect(format!("WebSocket connect to {ws_url}: {e}")))?;
        info!(app = %app, "📡 Connected to ARI event stream");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_events(stream, ws_url, tx));

        Ok((client, rx))
    }

    fn events_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!(
            "{ws_base}/events?app={}&api_key={}:{}",
            self.app, self.username, self.password
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AriError::Api { status: status.as_u16(), body })
    }

    async fn post_empty(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let response = self
            .http
            .delete(self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AriCommands for AriClient {
    async fn originate(&self, request: OriginateRequest) -> Result<Channel> {
        let mut query = vec![
            ("endpoint", request.endpoint.clone()),
            ("app", self.app.clone()),
            ("appArgs", request.app_args.join(",")),
            ("timeout", request.timeout_seconds.to_string()),
        ];
        if let Some(caller_id) = &request.caller_id {
            query.push(("callerId", caller_id.clone()));
        }
        let response = self
            .http
            .post(self.url("/channels"))
            .basic_auth(&self.username, Some(&self.password))
            .query(&query)
            .send()
            .await?;
        let channel = Self::check(response).await?.json::<Channel>().await?;
        debug!(endpoint = %request.endpoint, channel_id = %channel.id, "Originated channel");
        Ok(channel)
    }

    async fn answer(&self, channel_id: &str) -> Result<()> {
        self.post_empty(&format!("/channels/{channel_id}/answer"), &[]).await
    }

    async fn hangup(&self, channel_id: &str) -> Result<()> {
        self.delete(&format!("/channels/{channel_id}"), &[]).await
    }

    async fn create_bridge(&self, name: &str) -> Result<Bridge> {
        let response = self
            .http
            .post(self.url("/bridges"))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("type", "mixing".to_string()), ("name", name.to_string())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<Bridge>().await?)
    }

    async fn add_channel(&self, bridge_id: &str, channel_id: &str) -> Result<()> {
        self.post_empty(
            &format!("/bridges/{bridge_id}/addChannel"),
            &[("channel", channel_id.to_string())],
        )
        .await
    }

    async fn destroy_bridge(&self, bridge_id: &str) -> Result<()> {
        self.delete(&format!("/bridges/{bridge_id}"), &[]).await
    }

    async fn record_bridge(&self, request: RecordBridgeRequest) -> Result<LiveRecording> {
        let response = self
            .http
            .post(self.url(&format!("/bridges/{}/record", request.bridge_id)))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("name", request.name.clone()),
                ("format", request.format.clone()),
                ("ifExists", "overwrite".to_string()),
                ("maxDurationSeconds", "0".to_string()),
                ("terminateOn", "none".to_string()),
            ])
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<LiveRecording>().await?)
    }

    async fn stop_bridge_media(&self, bridge_id: &str) -> Result<()> {
        self.delete(
            &format!("/bridges/{bridge_id}/record"),
            &[("media", "recording".to_string())],
        )
        .await
    }

    async fn stop_recording(&self, name: &str) -> Result<()> {
        self.delete(&format!("/recordings/live/{name}"), &[]).await
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Drain the event WebSocket, decoding frames into [`AriEvent`]s.
///
/// Reconnects with capped exponential backoff when the stream drops. The
/// pump only exits when the receiving side of the channel is gone.
async fn pump_events(
    initial: WsStream,
    ws_url: String,
    tx: mpsc::UnboundedSender<AriEvent>,
) {
    let mut stream = Some(initial);
    let mut backoff = Duration::from_secs(1);

    loop {
        let mut ws = match stream.take() {
            Some(ws) => ws,
            None => match connect_async(ws_url.as_str()).await {
                Ok((ws, _)) => {
                    info!("📡 Reconnected to ARI event stream");
                    backoff = Duration::from_secs(1);
                    ws
                }
                Err(e) => {
                    warn!(error = %e, "ARI event stream reconnect failed, retrying in {backoff:?}");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                    continue;
                }
            },
        };

        while let Some(frame) = ws.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match AriEvent::parse(&text) {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            debug!("Event receiver dropped, stopping ARI pump");
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to decode ARI event"),
                },
                Ok(WsMessage::Ping(payload)) => {
                    if let Err(e) = ws.send(WsMessage::Pong(payload)).await {
                        warn!(error = %e, "Failed to answer WebSocket ping");
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => {
                    warn!("ARI event stream closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "ARI event stream error");
                    break;
                }
            }
        }

        if tx.is_closed() {
            return;
        }
        sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(30));
    }
}
