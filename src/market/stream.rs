use super::backoff::ReconnectBackoff;
use super::message::{parse_message, subscribe_request, StreamMessage, PING};
use super::observers::ObserverSet;
use crate::config::{ExchangeConfig, StreamConfig};
use crate::error::StreamError;
use crate::models::MarketEvent;
use crate::shutdown::{self, ShutdownReceiver};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle of the ingester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
    Stalled,
}

/// Why a streaming session ended.
enum SessionEnd {
    Shutdown,
    Lost(StreamError),
}

/// Keeps one candle subscription alive and fans candles out to observers.
///
/// Reconnects forever with exponential backoff until shutdown is signalled.
pub struct StreamIngester {
    url: String,
    channel: String,
    inst_id: String,
    inst_type: String,
    ping_interval: Duration,
    subscribe_timeout: Duration,
    close_timeout: Duration,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    observers: ObserverSet,
    state: watch::Sender<StreamState>,
    stalls: AtomicU64,
}

impl StreamIngester {
    pub fn new(exchange: &ExchangeConfig, stream: &StreamConfig, observers: ObserverSet) -> Self {
        let (state, _) = watch::channel(StreamState::Disconnected);
        Self {
            url: exchange.ws_url.clone(),
            channel: stream.channel.clone(),
            inst_id: exchange.symbol.clone(),
            inst_type: exchange.product_type.clone(),
            ping_interval: Duration::from_secs(stream.ping_interval_secs.max(1)),
            subscribe_timeout: Duration::from_secs(stream.subscribe_timeout_secs.max(1)),
            close_timeout: Duration::from_secs(stream.close_timeout_secs),
            reconnect_initial: Duration::from_secs(stream.reconnect_initial_secs),
            reconnect_max: Duration::from_secs(stream.reconnect_max_secs),
            observers,
            state,
            stalls: AtomicU64::new(0),
        }
    }

    /// Override the keepalive interval. A session with no inbound frame for a
    /// whole interval after a ping is treated as stalled.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Override the reconnect backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Sessions dropped because the server went silent.
    pub fn stall_count(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: StreamState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Stream state changed");
        }
    }

    /// Run until `shutdown` fires. Clears the observer set on exit.
    pub async fn run(&self, mut shutdown: ShutdownReceiver) {
        let mut backoff = ReconnectBackoff::new(self.reconnect_initial, self.reconnect_max);
        tracing::info!(url = %self.url, channel = %self.channel, symbol = %self.inst_id, "Starting market stream");

        while !shutdown::is_requested(&shutdown) {
            self.set_state(StreamState::Connecting);

            let connected = tokio::select! {
                res = self.connect() => res,
                _ = shutdown::requested(&mut shutdown) => break,
            };

            match connected {
                Ok(ws) => {
                    backoff.reset();
                    self.set_state(StreamState::Subscribed);
                    tracing::info!(symbol = %self.inst_id, "WebSocket connected and subscribed");

                    match self.stream(ws, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            tracing::warn!("WebSocket connection lost: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("WebSocket connection error: {}", e);
                }
            }

            self.set_state(StreamState::Disconnected);

            let delay = backoff.next_delay();
            tracing::info!(delay_secs = delay.as_secs_f64(), "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        self.observers.clear();
        self.set_state(StreamState::Disconnected);
        tracing::info!("Market stream stopped");
    }

    /// Open the transport, subscribe, and wait for the confirmation.
    async fn connect(&self) -> Result<WsStream, StreamError> {
        let (mut ws, _) = timeout(self.subscribe_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| StreamError::Timeout("connection"))??;

        let request = subscribe_request(&self.channel, &self.inst_id, &self.inst_type);
        ws.send(Message::Text(request)).await?;

        let reply = timeout(self.subscribe_timeout, ws.next())
            .await
            .map_err(|_| StreamError::Timeout("subscription confirmation"))?;

        match reply {
            Some(Ok(Message::Text(text))) => match parse_message(&text) {
                Ok(StreamMessage::Subscribed) => Ok(ws),
                Ok(StreamMessage::ErrorEvent { code, msg }) => {
                    Err(StreamError::Subscribe(format!("{}: {}", code, msg)))
                }
                Ok(other) => Err(StreamError::Subscribe(format!(
                    "unexpected reply {:?}",
                    other
                ))),
                Err(e) => Err(StreamError::Subscribe(e.to_string())),
            },
            Some(Ok(other)) => Err(StreamError::Subscribe(format!(
                "unexpected frame {:?}",
                other
            ))),
            Some(Err(e)) => Err(e.into()),
            None => Err(StreamError::Closed),
        }
    }

    async fn stream(&self, ws: WsStream, shutdown: &mut ShutdownReceiver) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        self.set_state(StreamState::Streaming);

        let mut last_ping = Instant::now();
        let mut last_inbound: Option<Instant> = None;
        let mut ping_due = true;

        loop {
            if shutdown::is_requested(shutdown) {
                break;
            }

            if ping_due {
                if let Err(e) = write.send(Message::Text(PING.to_string())).await {
                    return SessionEnd::Lost(e.into());
                }
                last_ping = Instant::now();
                ping_due = false;
            }

            let inbound = tokio::select! {
                res = timeout_at(last_ping + self.ping_interval, read.next()) => res,
                _ = shutdown::requested(shutdown) => break,
            };

            match inbound {
                // Nothing at all since the last ping, not even a pong
                Err(_) if last_inbound.map_or(true, |at| at < last_ping) => {
                    let stalls = self.stalls.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        stalls,
                        silent_ms = self.ping_interval.as_millis() as u64,
                        "No inbound frame since the last ping, dropping stalled session"
                    );
                    self.set_state(StreamState::Stalled);
                    return SessionEnd::Lost(StreamError::Timeout("inbound message"));
                }
                Err(_) => ping_due = true,
                Ok(None) => return SessionEnd::Lost(StreamError::Closed),
                Ok(Some(Err(e))) => return SessionEnd::Lost(e.into()),
                Ok(Some(Ok(message))) => {
                    last_inbound = Some(Instant::now());
                    match message {
                        Message::Text(text) => self.handle_text(&text).await,
                        Message::Close(frame) => {
                            tracing::warn!(?frame, "Server closed the stream");
                            return SessionEnd::Lost(StreamError::Closed);
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                    }
                }
            }
        }

        match timeout(self.close_timeout, write.close()).await {
            Ok(Ok(())) => tracing::debug!("WebSocket closed"),
            Ok(Err(e)) => tracing::debug!("WebSocket close error: {}", e),
            Err(_) => tracing::warn!("WebSocket close timed out"),
        }
        SessionEnd::Shutdown
    }

    async fn handle_text(&self, text: &str) {
        match parse_message(text) {
            Ok(StreamMessage::Candles(candles)) => {
                for candle in candles {
                    tracing::trace!(timestamp = candle.timestamp, close = candle.close, "Candle");
                    self.observers.notify(&MarketEvent::Candle(candle)).await;
                }
            }
            Ok(StreamMessage::Pong) | Ok(StreamMessage::Subscribed) | Ok(StreamMessage::Ignored) => {}
            Ok(StreamMessage::ErrorEvent { code, msg }) => {
                tracing::warn!(code = %code, "Stream error event: {}", msg);
            }
            Err(e) => {
                tracing::warn!("Dropping malformed stream message: {}", e);
            }
        }
    }
}
