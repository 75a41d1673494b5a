use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};

use crate::state::{Collision, DriverGuid, Timestamp};

/// A collision stays on screen for this long after it happened.
pub const VISIBLE_WINDOW_S: i64 = 10;
/// A collision notification is dropped this long after it happened, shown or not.
pub const DISCARD_AFTER_S: i64 = 12;
/// At most this many collision notifications are visible at once.
pub const MAX_VISIBLE: usize = 6;

#[derive(Clone, Debug, PartialEq)]
pub struct CollisionNotification {
    pub guid: DriverGuid,
    pub driver_name: String,
    pub collision: Collision,
}

type EntryKey = (Timestamp, DriverGuid, u32);

#[derive(Clone, Debug, PartialEq)]
struct Entry {
    notification: CollisionNotification,
    force_expired: bool,
}

/// Collision notifications ordered by the time they happened, which is also their expiry order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollisionFeed {
    entries: BTreeMap<EntryKey, Entry>,
    seen: HashSet<(DriverGuid, u32)>,
}

fn age(time: Timestamp, now: DateTime<Utc>) -> TimeDelta {
    time.elapsed_at(now)
}

impl CollisionFeed {
    /// Adds a notification unless it was already offered or is already past its visibility
    /// window. Returns whether it was added.
    pub fn offer(&mut self, notification: CollisionNotification, now: DateTime<Utc>) -> bool {
        let id = (notification.guid.clone(), notification.collision.id);
        if self.seen.contains(&id) {
            return false;
        }
        if age(notification.collision.time, now) >= TimeDelta::seconds(VISIBLE_WINDOW_S) {
            return false;
        }

        self.seen.insert(id);
        self.entries.insert(
            (
                notification.collision.time,
                notification.guid.clone(),
                notification.collision.id,
            ),
            Entry {
                notification,
                force_expired: false,
            },
        );
        self.enforce_visible_cap(now);
        true
    }

    /// Notifications that should currently be displayed, oldest first.
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<&CollisionNotification> {
        self.entries
            .values()
            .filter(|e| Self::is_visible(e, now))
            .map(|e| &e.notification)
            .collect()
    }

    /// Drops every notification older than the discard age and re-applies the visible cap.
    /// Returns the number of notifications removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some(entry) = self.entries.first_entry() {
            if age(entry.key().0, now) < TimeDelta::seconds(DISCARD_AFTER_S) {
                break;
            }
            let (_, guid, id) = entry.key().clone();
            entry.remove();
            self.seen.remove(&(guid, id));
            removed += 1;
        }
        self.enforce_visible_cap(now);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_visible(entry: &Entry, now: DateTime<Utc>) -> bool {
        !entry.force_expired
            && age(entry.notification.collision.time, now) < TimeDelta::seconds(VISIBLE_WINDOW_S)
    }

    fn enforce_visible_cap(&mut self, now: DateTime<Utc>) {
        let visible = self
            .entries
            .values()
            .filter(|e| Self::is_visible(e, now))
            .count();
        let mut excess = visible.saturating_sub(MAX_VISIBLE);
        for entry in self.entries.values_mut() {
            if excess == 0 {
                break;
            }
            if Self::is_visible(entry, now) {
                entry.force_expired = true;
                excess -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn notification(guid: &str, id: u32, time: DateTime<Utc>) -> CollisionNotification {
        CollisionNotification {
            guid: guid.into(),
            driver_name: guid.to_uppercase(),
            collision: Collision {
                id,
                time: time.into(),
                speed: 42.,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_visibility_window_and_discard() {
        let t0 = Utc::now();
        let mut feed = CollisionFeed::default();
        assert!(feed.offer(notification("a", 1, t0), t0));

        assert_eq!(feed.visible(t0 + TimeDelta::seconds(9)).len(), 1);
        assert!(feed.visible(t0 + TimeDelta::seconds(11)).is_empty());

        assert_eq!(feed.sweep(t0 + TimeDelta::seconds(11)), 0);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.sweep(t0 + TimeDelta::seconds(12)), 1);
        assert!(feed.is_empty());
    }

    #[test]
    fn test_duplicate_offer_is_rejected() {
        let t0 = Utc::now();
        let mut feed = CollisionFeed::default();
        assert!(feed.offer(notification("a", 1, t0), t0));
        assert!(!feed.offer(notification("a", 1, t0), t0 + TimeDelta::seconds(1)));
        assert!(feed.offer(notification("b", 1, t0), t0));
        assert_eq!(feed.len(), 2);
    }

    #[test]
    fn test_stale_offer_is_rejected() {
        let t0 = Utc::now();
        let mut feed = CollisionFeed::default();
        assert!(!feed.offer(notification("a", 1, t0), t0 + TimeDelta::seconds(10)));
        assert!(feed.is_empty());
    }

    #[test]
    fn test_visible_cap_expires_oldest_first() {
        let t0 = Utc::now();
        let mut feed = CollisionFeed::default();
        for id in 0..8 {
            feed.offer(
                notification("a", id, t0 + TimeDelta::milliseconds(id as i64 * 100)),
                t0 + TimeDelta::seconds(1),
            );
        }

        let visible = feed.visible(t0 + TimeDelta::seconds(1));
        assert_eq!(visible.len(), MAX_VISIBLE);
        let ids: Vec<u32> = visible.iter().map(|n| n.collision.id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6, 7]);
        // force-expired entries are still held until the discard age
        assert_eq!(feed.len(), 8);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_never_more_than_max_visible(
            offsets_ms in proptest::collection::vec(0i64..20_000, 0..40),
            sweep_ms in 0i64..25_000,
        ) {
            let t0 = Utc::now();
            let mut feed = CollisionFeed::default();
            for (id, offset) in offsets_ms.iter().enumerate() {
                let at = t0 + TimeDelta::milliseconds(*offset);
                feed.offer(notification("a", id as u32, at), at);
            }
            let now = t0 + TimeDelta::milliseconds(sweep_ms);
            feed.sweep(now);

            // Property: the visible set is capped and only holds collisions younger than the window
            let visible = feed.visible(now);
            prop_assert!(visible.len() <= MAX_VISIBLE);
            for n in visible {
                let age = n.collision.time.elapsed_at(now);
                prop_assert!(age < TimeDelta::seconds(VISIBLE_WINDOW_S));
            }
        }
    }
}
