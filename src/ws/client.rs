//! WebSocket client for the exchange user feed with auto-reconnection

use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth_env::{sign_channel, ApiCredentials};
use crate::core::traits::OrderFeed;
use crate::errors::CoreError;
use crate::ws::events::{parse_message, EventError, OrderEventBatch, SubscribeRequest, WsMessage};

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Subscription signing error: {0}")]
    Signing(String),
    #[error("Channel send error")]
    ChannelSend,
}

impl From<WsError> for CoreError {
    fn from(e: WsError) -> Self {
        CoreError::Transport(e.to_string())
    }
}

/// Commands that can be sent to the WebSocket client
#[derive(Debug)]
enum WsCommand {
    /// Subscribe to a named channel
    Subscribe(String),
    /// Unsubscribe from a named channel
    Unsubscribe(String),
    /// Disconnect
    Disconnect,
}

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Feed URL
    pub url: String,
    /// Heartbeat interval in seconds
    pub heartbeat_interval: u64,
    /// Maximum reconnection attempts within one session (0 = infinite)
    pub max_reconnection_attempts: u32,
    /// Initial reconnection delay in milliseconds
    pub initial_reconnection_delay: u64,
    /// Maximum reconnection delay in milliseconds
    pub max_reconnection_delay: u64,
    /// Event buffer size for the broadcast channel
    pub event_buffer_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: "wss://advanced-trade-ws.coinbase.com".to_string(),
            heartbeat_interval: 10,
            max_reconnection_attempts: 5,
            initial_reconnection_delay: 1000,
            max_reconnection_delay: 30000,
            event_buffer_size: 1000,
        }
    }
}

/// WebSocket client for the user order feed.
///
/// `open` spawns a connection task that owns the socket; subscriptions are
/// forwarded through a command channel and re-signed on every reconnect.
/// Parsed order-event batches are published on a broadcast channel.
pub struct WsClient {
    config: WsConfig,
    credentials: ApiCredentials,
    command_tx: Option<mpsc::UnboundedSender<WsCommand>>,
    event_tx: broadcast::Sender<OrderEventBatch>,
    task: Option<JoinHandle<()>>,
}

impl WsClient {
    pub fn new(config: WsConfig, credentials: ApiCredentials) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer_size);
        Self {
            config,
            credentials,
            command_tx: None,
            event_tx,
            task: None,
        }
    }

    fn send_command(&self, cmd: WsCommand) -> Result<(), WsError> {
        self.command_tx
            .as_ref()
            .ok_or(WsError::ChannelSend)?
            .send(cmd)
            .map_err(|_| WsError::ChannelSend)
    }

    /// Main connection task with auto-reconnection
    async fn connection_task(
        url: String,
        config: WsConfig,
        credentials: ApiCredentials,
        mut command_rx: mpsc::UnboundedReceiver<WsCommand>,
        event_tx: broadcast::Sender<OrderEventBatch>,
    ) {
        let mut reconnection_attempts = 0;
        let mut active_channels: Vec<String> = Vec::new();
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(config.initial_reconnection_delay),
            max_interval: Duration::from_millis(config.max_reconnection_delay),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            match Self::connect_and_run(
                &url,
                &config,
                &credentials,
                &mut command_rx,
                &event_tx,
                &mut active_channels,
            )
            .await
            {
                Ok(()) => {
                    info!("WebSocket connection closed normally");
                    break;
                }
                Err(e) => {
                    error!("WebSocket connection error: {}", e);

                    if config.max_reconnection_attempts > 0
                        && reconnection_attempts >= config.max_reconnection_attempts
                    {
                        error!("Maximum reconnection attempts reached");
                        break;
                    }
                    reconnection_attempts += 1;

                    if let Some(delay) = backoff.next_backoff() {
                        warn!(
                            "Reconnecting in {:?} (attempt {})",
                            delay, reconnection_attempts
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Connect and run one WebSocket session
    async fn connect_and_run(
        url: &str,
        config: &WsConfig,
        credentials: &ApiCredentials,
        command_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
        event_tx: &broadcast::Sender<OrderEventBatch>,
        active_channels: &mut Vec<String>,
    ) -> Result<(), WsError> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, response) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        info!("WebSocket connected. Status: {:?}", response.status());

        // Re-subscribe to channels that were active before a reconnect
        for channel in active_channels.iter() {
            let msg = Self::subscription_payload(credentials, channel, true)?;
            write.send(Message::Text(msg.into())).await?;
            info!(channel = %channel, "Re-subscribed after reconnect");
        }

        let mut heartbeat = interval(Duration::from_secs(config.heartbeat_interval));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_pong = Instant::now();
        let pong_timeout = Duration::from_secs(config.heartbeat_interval * 2);

        loop {
            tokio::select! {
                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_text_frame(&text, event_tx);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                            last_pong = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("WebSocket closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            error!("WebSocket error: {}", e);
                            return Err(WsError::Connection(e));
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Err(WsError::Connection(
                                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            ));
                        }
                        _ => {
                            // Ignore other message types
                        }
                    }
                }

                // Handle commands
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(WsCommand::Subscribe(channel)) => {
                            let msg = Self::subscription_payload(credentials, &channel, true)?;
                            info!(channel = %channel, "Sending subscription");
                            write.send(Message::Text(msg.into())).await?;
                            if !active_channels.contains(&channel) {
                                active_channels.push(channel);
                            }
                        }
                        Some(WsCommand::Unsubscribe(channel)) => {
                            let msg = Self::subscription_payload(credentials, &channel, false)?;
                            info!(channel = %channel, "Sending unsubscribe");
                            write.send(Message::Text(msg.into())).await?;
                            active_channels.retain(|c| c != &channel);
                        }
                        Some(WsCommand::Disconnect) => {
                            info!("Disconnect requested");
                            write.send(Message::Close(None)).await?;
                            break;
                        }
                        None => {
                            warn!("Command channel closed");
                            break;
                        }
                    }
                }

                // Heartbeat
                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > pong_timeout {
                        warn!("Heartbeat timeout - no pong received");
                        return Err(WsError::Connection(
                            tokio_tungstenite::tungstenite::Error::ConnectionClosed
                        ));
                    }

                    debug!("Sending heartbeat ping");
                    if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                        error!("Failed to send heartbeat: {}", e);
                        return Err(WsError::Connection(e));
                    }
                }
            }
        }

        Ok(())
    }

    fn subscription_payload(
        credentials: &ApiCredentials,
        channel: &str,
        subscribe: bool,
    ) -> Result<String, WsError> {
        let (timestamp, signature) =
            sign_channel(credentials, channel).map_err(|e| WsError::Signing(e.to_string()))?;
        let request = if subscribe {
            SubscribeRequest::subscribe(channel, credentials.api_key.clone(), timestamp, signature)
        } else {
            SubscribeRequest::unsubscribe(channel, credentials.api_key.clone(), timestamp, signature)
        };
        Ok(serde_json::to_string(&request)?)
    }

    /// Parse one text frame and publish the resulting batch.
    ///
    /// A garbled envelope is forwarded as an empty batch with a malformed
    /// count of one so that downstream data-quality accounting sees it.
    fn handle_text_frame(text: &str, event_tx: &broadcast::Sender<OrderEventBatch>) {
        let envelope: WsMessage = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Failed to parse WebSocket envelope");
                let _ = event_tx.send(OrderEventBatch {
                    orders: Vec::new(),
                    malformed: 1,
                });
                return;
            }
        };

        match parse_message(&envelope) {
            Ok(batch) => {
                if !batch.orders.is_empty() || batch.malformed > 0 {
                    if let Err(e) = event_tx.send(batch) {
                        warn!("Failed to send event batch to channel: {}", e);
                    }
                }
            }
            Err(EventError::UnknownChannel(channel)) => {
                debug!(channel = %channel, "Ignoring message on unknown channel");
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse user channel message");
                let _ = event_tx.send(OrderEventBatch {
                    orders: Vec::new(),
                    malformed: 1,
                });
            }
        }
    }
}

#[async_trait]
impl OrderFeed for WsClient {
    async fn open(&mut self) -> Result<(), CoreError> {
        if self.command_tx.is_some() {
            return Ok(());
        }

        // Validate the endpoint before spawning the connection task
        Url::parse(&self.config.url).map_err(WsError::UrlParse)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let url = self.config.url.clone();
        let config = self.config.clone();
        let credentials = self.credentials.clone();
        let event_tx = self.event_tx.clone();

        self.task = Some(tokio::spawn(async move {
            Self::connection_task(url, config, credentials, command_rx, event_tx).await;
        }));
        self.command_tx = Some(command_tx);
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), CoreError> {
        self.send_command(WsCommand::Subscribe(channel.to_string()))
            .map_err(CoreError::from)
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), CoreError> {
        self.send_command(WsCommand::Unsubscribe(channel.to_string()))
            .map_err(CoreError::from)
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        if let Some(tx) = self.command_tx.take() {
            // The task may already have exited; a failed send is fine
            let _ = tx.send(WsCommand::Disconnect);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<OrderEventBatch> {
        self.event_tx.subscribe()
    }
}
