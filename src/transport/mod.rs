//! Sources of raw race-control frames.

pub mod replay;
pub mod websocket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TracksideError;

pub use replay::ReplaySource;
pub use websocket::{Backoff, WebSocketSource};

/// One text frame as it came off the wire, stamped with the time it was received. This is also
/// the record format of frame recordings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub received_at: DateTime<Utc>,
    pub payload: String,
}

impl Frame {
    pub fn new(payload: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            payload: payload.into(),
        }
    }

    pub fn received_now(payload: impl Into<String>) -> Self {
        Self::new(payload, Utc::now())
    }
}

/// A stream of race-control frames.
///
/// Implementations deliver frames strictly in the order they were produced. Live sources hide
/// disconnects from the caller and only stop producing frames when they are dropped.
#[async_trait]
pub trait FrameSource: Send {
    /// Prepares the source. Fails when the source can never produce frames, such as an
    /// unusable server URL.
    async fn start(&mut self) -> Result<(), TracksideError>;

    /// Waits for the next frame. `None` means the source is exhausted.
    async fn next_frame(&mut self) -> Option<Frame>;
}
