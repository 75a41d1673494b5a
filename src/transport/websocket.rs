use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::{net::TcpStream, time::sleep};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

use crate::TracksideError;

use super::{Frame, FrameSource};

pub const DEFAULT_MIN_RECONNECT_DELAY_MS: u64 = 250;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 10_000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exponential reconnect delay, doubling from `min` up to `max`.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_MIN_RECONNECT_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
        )
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, next: min }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).clamp(self.min, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.min;
    }
}

/// Live race-control feed. Reconnects forever; the server sends a fresh snapshot on every new
/// connection.
pub struct WebSocketSource {
    url: String,
    backoff: Backoff,
    socket: Option<Socket>,
}

impl WebSocketSource {
    pub fn new(url: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            url: url.into(),
            backoff,
            socket: None,
        }
    }

    async fn connect(&mut self) -> Socket {
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((socket, _response)) => {
                    info!("Connected to race control at {}", self.url);
                    self.backoff.reset();
                    return socket;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "Could not connect to race control at {}: {}. Retrying in {:?}",
                        self.url, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Accepts websocket URLs as well as the http(s) address of the server's race control endpoint.
pub fn normalise_url(url: &str) -> Result<String, TracksideError> {
    let url = url.trim();
    let normalised = if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else {
        url.to_string()
    };

    let host = normalised
        .strip_prefix("ws://")
        .or_else(|| normalised.strip_prefix("wss://"));
    match host {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(normalised),
        _ => Err(TracksideError::InvalidServerUrl {
            url: url.to_string(),
        }),
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn start(&mut self) -> Result<(), TracksideError> {
        self.url = normalise_url(&self.url)?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.socket.is_none() {
                let socket = self.connect().await;
                self.socket = Some(socket);
            }
            let Some(socket) = self.socket.as_mut() else {
                continue;
            };

            let next = socket.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return Some(Frame::received_now(text)),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Race control connection closed, reconnecting");
                    self.socket = None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Race control stream read error: {}", e);
                    self.socket = None;
                }
            }
            debug!("Dropped race control socket for {}", self.url);
        }
    }
}
