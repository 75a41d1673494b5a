use std::cmp::Ordering;

use itertools::Itertools;
use log::trace;

use crate::{
    reconciler::Notification,
    state::{CarSlot, Driver, DriverGuid, DriverMap, SessionStore, SessionType},
};

/// Server positions that mean "not ranked yet".
fn rank_key(driver: &Driver) -> i32 {
    if driver.is_ranked() {
        driver.position
    } else {
        i32::MAX
    }
}

/// Race comparator: more laps first, then further around the lap, then the server's last
/// position. The GUID breaks any remaining tie so the result never depends on input order.
pub fn race_order(a: &Driver, b: &Driver) -> Ordering {
    b.total_num_laps
        .cmp(&a.total_num_laps)
        .then_with(|| b.normalised_spline_pos.total_cmp(&a.normalised_spline_pos))
        .then_with(|| rank_key(a).cmp(&rank_key(b)))
        .then_with(|| a.guid().cmp(b.guid()))
}

/// Computes the connected standings. Outside of races the server's sequence is kept as is.
pub fn reorder(drivers: &DriverMap<DriverGuid>, session_type: SessionType) -> Vec<DriverGuid> {
    if session_type != SessionType::Race {
        return drivers.order().to_vec();
    }

    drivers
        .drivers()
        .iter()
        .sorted_by(|(_, a), (_, b)| race_order(a, b))
        .map(|(guid, _)| guid.clone())
        .collect()
}

fn laps_in_car(driver: &Driver) -> u32 {
    driver.current_car().map_or(0, |car| car.num_laps)
}

fn best_lap(driver: &Driver) -> Option<i64> {
    driver
        .current_car()
        .filter(|car| car.has_best_lap())
        .map(|car| car.best_lap)
}

/// Computes the disconnected standings. Races rank by laps driven in the car, other sessions by
/// best lap with drivers who never set one at the bottom.
pub fn reorder_disconnected(
    drivers: &DriverMap<CarSlot>,
    session_type: SessionType,
) -> Vec<CarSlot> {
    let by_session = |a: &Driver, b: &Driver| -> Ordering {
        if session_type == SessionType::Race {
            laps_in_car(b).cmp(&laps_in_car(a))
        } else {
            match (best_lap(a), best_lap(b)) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }
    };

    drivers
        .drivers()
        .iter()
        .sorted_by(|(ka, a), (kb, b)| by_session(a, b).then_with(|| ka.cmp(kb)))
        .map(|(slot, _)| slot.clone())
        .collect()
}

/// Re-evaluates both standings against the store and applies them. Only sequences that actually
/// changed are announced.
pub fn refresh_standings(store: &mut SessionStore) -> Vec<Notification> {
    if !store.is_initialised() {
        return Vec::new();
    }

    let session_type = store.session_info.session_type;
    let mut notifications = Vec::new();

    let connected = reorder(&store.connected, session_type);
    if store.connected.set_order(connected) {
        trace!("Connected standings changed");
        notifications.push(Notification::StandingsChanged);
    }

    let disconnected = reorder_disconnected(&store.disconnected, session_type);
    if store.disconnected.set_order(disconnected) {
        trace!("Disconnected standings changed");
        notifications.push(Notification::DisconnectedStandingsChanged);
    }

    notifications
}
