use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};

use crate::{
    TracksideError,
    config::AppConfig,
    events::{Decoded, decode},
    reconciler::{Notification, RaceControl},
    scheduler::{Tick, run_tick},
    transport::{Frame, FrameSource},
};

/// Shared handle to the engine. Readers take short read locks; the client task is the only
/// writer for events, the scheduler ticks take short write locks.
#[derive(Clone, Debug, Default)]
pub struct RaceControlHandle {
    state: Arc<RwLock<RaceControl>>,
}

impl RaceControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the current state. A poisoned lock is recovered: the state is plain data
    /// and every merge leaves it consistent.
    pub fn read<T>(&self, f: impl FnOnce(&RaceControl) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut RaceControl) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Where the periodic ticks read the time from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TickClock {
    /// Wall clock time, for live feeds.
    #[default]
    Wall,
    /// The receive time of the last applied frame, so recordings tick on their own timeline.
    Recorded,
}

impl TickClock {
    pub fn now(self, race_control: &RaceControl) -> DateTime<Utc> {
        match self {
            TickClock::Wall => Utc::now(),
            TickClock::Recorded => race_control.last_applied_at().unwrap_or_else(Utc::now),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    VersionChanged(u16),
    Exhausted,
}

type SourceFactory = Box<dyn FnMut() -> Box<dyn FrameSource> + Send>;

/// Drives a frame source through the decoder into the engine, runs the periodic ticks and
/// publishes notifications.
pub struct Client {
    make_source: SourceFactory,
    handle: RaceControlHandle,
    notifications: UnboundedSender<Notification>,
    recorder: Option<UnboundedSender<Frame>>,
    tick_intervals: Vec<(Tick, Duration)>,
    clock: TickClock,
}

impl Client {
    /// Creates a client and the receiving end of its notifications. `make_source` is called again
    /// every time the server's protocol version changes and the client starts over.
    pub fn new(
        make_source: impl FnMut() -> Box<dyn FrameSource> + Send + 'static,
        config: &AppConfig,
    ) -> (Self, UnboundedReceiver<Notification>) {
        let (notifications, notification_rx) = mpsc::unbounded_channel();
        let client = Self {
            make_source: Box::new(make_source),
            handle: RaceControlHandle::new(),
            notifications,
            recorder: None,
            tick_intervals: Tick::ALL
                .iter()
                .map(|tick| (*tick, config.tick_interval(*tick)))
                .collect(),
            clock: TickClock::default(),
        };
        (client, notification_rx)
    }

    /// Every received frame is also sent to `recorder`.
    pub fn with_recorder(mut self, recorder: UnboundedSender<Frame>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_tick_clock(mut self, clock: TickClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn handle(&self) -> RaceControlHandle {
        self.handle.clone()
    }

    /// Runs until the frame source is exhausted. Live sources never are.
    pub async fn run(mut self) -> Result<(), TracksideError> {
        loop {
            let mut source = (self.make_source)();
            source.start().await?;

            match self.run_source(source).await {
                SessionEnd::VersionChanged(version) => {
                    info!(
                        "Race control protocol version changed to {}, starting over",
                        version
                    );
                    self.handle.write(RaceControl::reset);
                }
                SessionEnd::Exhausted => {
                    info!("Frame source exhausted");
                    return Ok(());
                }
            }
        }
    }

    async fn run_source(&mut self, mut source: Box<dyn FrameSource>) -> SessionEnd {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();
        let transport = tokio::spawn(async move {
            while let Some(frame) = source.next_frame().await {
                if frame_tx.send(frame).is_err() {
                    break;
                }
            }
        });
        let tickers: Vec<JoinHandle<()>> = self
            .tick_intervals
            .iter()
            .map(|(tick, period)| self.spawn_ticker(*tick, *period))
            .collect();

        let mut end = SessionEnd::Exhausted;
        while let Some(frame) = frame_rx.recv().await {
            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.send(frame.clone()) {
                    warn!("Frame recorder stopped: {}", e);
                    self.recorder = None;
                }
            }

            match decode(&frame.payload) {
                Some(Decoded::VersionChanged(version)) => {
                    end = SessionEnd::VersionChanged(version);
                    break;
                }
                Some(Decoded::Event(event)) => {
                    let outcome = self.handle.write(|rc| rc.apply(event, frame.received_at));
                    self.publish(outcome.notifications);
                }
                None => {}
            }
        }

        transport.abort();
        for ticker in tickers {
            ticker.abort();
        }
        end
    }

    fn spawn_ticker(&self, tick: Tick, period: Duration) -> JoinHandle<()> {
        let handle = self.handle.clone();
        let notifications = self.notifications.clone();
        let clock = self.clock;
        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                let published = handle.write(|rc| {
                    let now = clock.now(rc);
                    run_tick(rc, tick, now)
                });
                for notification in published {
                    if notifications.send(notification).is_err() {
                        debug!("Notification receiver dropped, stopping {:?} ticks", tick);
                        return;
                    }
                }
            }
        })
    }

    fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            // nobody listening is fine; the state is still readable through the handle
            let _ = self.notifications.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReplaySource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frames(payloads: &[&str]) -> Vec<Frame> {
        payloads.iter().map(|p| Frame::received_now(*p)).collect()
    }

    const SNAPSHOT: &str = r#"{"EventType": 200, "Message": {"SessionInfo": {"Track": "spa", "Type": 3}, "ConnectedDrivers": {"Drivers": {"g1": {"CarInfo": {"CarID": 1, "DriverGUID": "g1", "CarModel": "m3"}}}, "GUIDsInPositionalOrder": ["g1"]}, "CarIDToGUID": {"1": "g1"}}}"#;

    #[tokio::test]
    async fn test_replay_reaches_engine() {
        let replay = frames(&[
            SNAPSHOT,
            "garbage",
            r#"{"EventType": 57, "Message": {"CarID": 1, "Message": "hi", "DriverGUID": "g1"}}"#,
        ]);
        let (client, mut notifications) = Client::new(
            move || Box::new(ReplaySource::from_frames(replay.clone())),
            &AppConfig::default(),
        );
        let handle = client.handle();
        client.run().await.unwrap();

        assert_eq!(handle.read(|rc| rc.store().connected().len()), 1);
        assert_eq!(handle.read(|rc| rc.chat().len()), 1);

        let mut received = Vec::new();
        while let Ok(n) = notifications.try_recv() {
            received.push(n);
        }
        assert!(received.contains(&Notification::SnapshotApplied));
        assert!(received.contains(&Notification::ChatReceived));
    }

    #[tokio::test]
    async fn test_version_change_restarts_from_scratch() {
        let starts = Arc::new(AtomicUsize::new(0));
        let counter = starts.clone();
        let (client, _notifications) = Client::new(
            move || {
                let frames = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    frames(&[SNAPSHOT, r#"{"EventType": 56, "Message": 5}"#, SNAPSHOT])
                } else {
                    frames(&[r#"{"EventType": 57, "Message": {"Message": "after restart"}}"#])
                };
                Box::new(ReplaySource::from_frames(frames))
            },
            &AppConfig::default(),
        );
        let handle = client.handle();
        client.run().await.unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 2);
        // the snapshot before the version change was discarded with the rest of the state
        assert!(!handle.read(|rc| rc.store().is_initialised()));
        assert_eq!(handle.read(|rc| rc.chat().len()), 1);
    }

    #[test]
    fn test_recorded_clock_follows_frames() {
        let mut rc = RaceControl::new();
        let recorded_at = Utc::now() - chrono::TimeDelta::hours(3);
        let before = TickClock::Recorded.now(&rc);
        assert!(before > recorded_at);

        rc.apply(crate::Event::Chat(Default::default()), recorded_at);
        assert_eq!(TickClock::Recorded.now(&rc), recorded_at);
        assert!(TickClock::Wall.now(&rc) > recorded_at);

        rc.reset();
        assert_eq!(rc.last_applied_at(), None);
    }

    #[tokio::test]
    async fn test_frames_are_recorded() {
        let replay = frames(&[SNAPSHOT, "garbage"]);
        let expected = replay.clone();
        let (recorder, mut recorded) = mpsc::unbounded_channel();
        let (client, _notifications) = Client::new(
            move || Box::new(ReplaySource::from_frames(replay.clone())),
            &AppConfig::default(),
        );
        client.with_recorder(recorder).run().await.unwrap();

        let mut frames = Vec::new();
        while let Ok(frame) = recorded.try_recv() {
            frames.push(frame);
        }
        assert_eq!(frames, expected);
    }
}
