use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use log::trace;

use crate::{
    reconciler::{Notification, RaceControl},
    standings::refresh_standings,
    state::SessionStore,
};

/// Default period of every periodic tick.
pub const TICK_INTERVAL_MS: u64 = 1000;

/// What the session clock shows.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionProgress {
    /// The session has not started yet.
    Countdown(TimeDelta),
    /// Time-based session. `remaining` is below one day; whole days are split out.
    TimeRemaining { days: i64, remaining: TimeDelta },
    /// Lap-based session, counted against the leader.
    LapsRemaining(i64),
    Indeterminate,
}

fn format_hms(duration: TimeDelta) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl fmt::Display for SessionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionProgress::Countdown(remaining) => {
                write!(f, "Countdown: {}", format_hms(*remaining))
            }
            SessionProgress::TimeRemaining { days, remaining } => match days {
                0 => f.write_str(&format_hms(*remaining)),
                1 => write!(f, "1 day + {}", format_hms(*remaining)),
                days => write!(f, "{} days + {}", days, format_hms(*remaining)),
            },
            SessionProgress::LapsRemaining(laps) => write!(f, "{} laps remaining", laps),
            SessionProgress::Indeterminate => Ok(()),
        }
    }
}

/// Works out the session clock from the last snapshot. Before the first snapshot there is
/// nothing to show.
pub fn session_progress(store: &SessionStore, now: DateTime<Utc>) -> SessionProgress {
    if !store.is_initialised() {
        return SessionProgress::Indeterminate;
    }

    let info = store.session_info();
    let elapsed = store.session_start_time().elapsed_at(now);
    let wait = TimeDelta::seconds(info.wait_time as i64);

    if elapsed < wait {
        return SessionProgress::Countdown(wait - elapsed);
    }

    if info.time > 0 {
        let remaining =
            (TimeDelta::minutes(info.time as i64) + wait - elapsed).max(TimeDelta::zero());
        let days = remaining.num_days();
        return SessionProgress::TimeRemaining {
            days,
            remaining: remaining - TimeDelta::days(days),
        };
    }

    if info.laps > 0 {
        let leader_laps = store.leader().map_or(0, |driver| driver.total_num_laps);
        return SessionProgress::LapsRemaining(info.laps as i64 - leader_laps as i64);
    }

    SessionProgress::Indeterminate
}

/// The periodic jobs that run next to event delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Recomputes the session clock.
    Progress,
    /// Re-sorts the standings and announces changes.
    Standings,
    /// Expires collision notifications and refreshes telemetry readouts.
    Feeds,
}

impl Tick {
    pub const ALL: [Tick; 3] = [Tick::Progress, Tick::Standings, Tick::Feeds];
}

/// Runs one tick against the engine. Every tick is a no-op until the first snapshot arrives.
pub fn run_tick(
    race_control: &mut RaceControl,
    tick: Tick,
    now: DateTime<Utc>,
) -> Vec<Notification> {
    if !race_control.store.is_initialised() {
        return Vec::new();
    }

    match tick {
        Tick::Progress => vec![Notification::ProgressUpdated(session_progress(
            &race_control.store,
            now,
        ))],
        Tick::Standings => refresh_standings(&mut race_control.store),
        Tick::Feeds => {
            let expired = race_control.collisions.sweep(now);
            if expired > 0 {
                trace!("Expired {} collision notifications", expired);
            }
            vec![Notification::TelemetryRefreshed]
        }
    }
}
