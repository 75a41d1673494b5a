use std::{collections::VecDeque, io, path::Path};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use tokio::time::sleep;

use crate::{
    TracksideError,
    events::{Decoded, decode},
};

use super::{Frame, FrameSource};

/// Plays back a frame recording. When paced, frames are released with the same gaps they were
/// recorded with; otherwise as fast as they are consumed.
#[derive(Debug, Default)]
pub struct ReplaySource {
    frames: VecDeque<Frame>,
    paced: bool,
    last_received_at: Option<DateTime<Utc>>,
}

impl ReplaySource {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TracksideError> {
        Ok(Self::from_frames(load_frames(path)?))
    }

    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

/// Loads a recording written by [`crate::writer::write_frames`].
pub fn load_frames(path: &Path) -> Result<Vec<Frame>, TracksideError> {
    if !path.exists() {
        return Err(TracksideError::InvalidRecordingFile {
            path: format!("{:?}", path),
        });
    }

    let frames = serde_jsonlines::json_lines(path)
        .map_err(|e| TracksideError::RecordingLoaderError { source: e })?
        .collect::<Result<Vec<Frame>, io::Error>>()
        .map_err(|e| TracksideError::RecordingLoaderError { source: e })?;
    info!("Loaded {} frames from {:?}", frames.len(), path);
    Ok(frames)
}

/// Splits a recording into the runs a client goes through between protocol version changes.
/// Every run but the last ends with the frame announcing the new version.
pub fn split_at_version_changes(frames: Vec<Frame>) -> VecDeque<Vec<Frame>> {
    let mut runs = VecDeque::new();
    let mut run = Vec::new();
    for frame in frames {
        let version_change = matches!(decode(&frame.payload), Some(Decoded::VersionChanged(_)));
        run.push(frame);
        if version_change {
            runs.push_back(std::mem::take(&mut run));
        }
    }
    if !run.is_empty() {
        runs.push_back(run);
    }
    runs
}

#[async_trait]
impl FrameSource for ReplaySource {
    async fn start(&mut self) -> Result<(), TracksideError> {
        self.last_received_at = None;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        if let (true, Some(last)) = (self.paced, self.last_received_at) {
            if let Ok(gap) = (frame.received_at - last).to_std() {
                sleep(gap).await;
            }
        }
        self.last_received_at = Some(frame.received_at);
        Some(frame)
    }
}
