use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};

use crate::{
    events::{CarUpdate, CollisionEvent, Event, LapCompleted, SplitCompleted},
    feeds::{ChatFeed, ChatMessage, CollisionFeed, CollisionNotification},
    scheduler::SessionProgress,
    state::{
        CarLapInfo, Collision, Driver, DriverGuid, LiveMarker, SessionCarInfo, SessionStore,
        Snapshot, Split,
    },
};

/// Collisions kept per driver. Older entries are dropped first.
pub const MAX_COLLISION_HISTORY: usize = 20;

/// State changes announced to the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    SnapshotApplied,
    TrackChanged { track: String, layout: String },
    WeatherChanged { weather: String },
    DriverConnected(DriverGuid),
    DriverDisconnected(DriverGuid),
    /// The driver left before loading or completing a lap and left no history behind.
    DriverPurged(DriverGuid),
    DriverLoaded(DriverGuid),
    LapCompleted(DriverGuid),
    SplitCompleted(DriverGuid),
    TyresChanged { guid: DriverGuid, tyres: String },
    CollisionRecorded(DriverGuid),
    ChatReceived,
    SessionStarted,
    SessionInfoUpdated,
    SessionEnded { results_file: String },
    ServerError(String),
    StandingsChanged,
    DisconnectedStandingsChanged,
    ProgressUpdated(SessionProgress),
    TelemetryRefreshed,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyOutcome {
    pub mutated: bool,
    pub notifications: Vec<Notification>,
}

impl ApplyOutcome {
    fn unchanged() -> Self {
        Self::default()
    }

    fn mutated(notifications: Vec<Notification>) -> Self {
        Self {
            mutated: true,
            notifications,
        }
    }

    fn notify(notification: Notification) -> Self {
        Self {
            mutated: false,
            notifications: vec![notification],
        }
    }
}

/// The race-control engine: the session store plus the feeds that hang off it.
///
/// [`RaceControl::apply`] is the single entry point for state changes. It must be called from
/// one task only; readers take snapshots through the query surface in [`crate::view`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RaceControl {
    pub(crate) store: SessionStore,
    pub(crate) chat: ChatFeed,
    pub(crate) collisions: CollisionFeed,
    last_applied_at: Option<DateTime<Utc>>,
}

impl RaceControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn chat(&self) -> &ChatFeed {
        &self.chat
    }

    pub fn collisions(&self) -> &CollisionFeed {
        &self.collisions
    }

    /// The `now` of the most recently applied event.
    pub fn last_applied_at(&self) -> Option<DateTime<Utc>> {
        self.last_applied_at
    }

    /// Discards everything, as if the process had just started.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Merges one event into the aggregate state.
    pub fn apply(&mut self, event: Event, now: DateTime<Utc>) -> ApplyOutcome {
        trace!("Applying {:?} event", event.tag());
        self.last_applied_at = Some(now);
        match event {
            Event::Snapshot(snapshot) => self.apply_snapshot(*snapshot, now),
            Event::NewConnection(car_info) => self.connect(car_info, now),
            Event::ConnectionClosed(car_info) => self.disconnect(&car_info),
            Event::ClientLoaded(car_id) => self.client_loaded(car_id, now),
            Event::CarUpdate(update) => self.car_update(&update, now),
            Event::Collision(collision) => self.collision(&collision, now),
            Event::LapCompleted(lap) => self.lap_completed(&lap, now),
            Event::SplitCompleted(split) => self.split_completed(&split),
            Event::TyresChanged(car_info) => self.tyres_changed(car_info),
            Event::Chat(message) => self.chat_message(message),
            Event::NewSession(session) => {
                info!("New session starting: {} ({})", session.name, session.session_type);
                ApplyOutcome::notify(Notification::SessionStarted)
            }
            Event::SessionInfo(_) => ApplyOutcome::notify(Notification::SessionInfoUpdated),
            Event::EndSession(results_file) => {
                info!("Session ended, results written to {}", results_file);
                ApplyOutcome::notify(Notification::SessionEnded { results_file })
            }
            Event::ServerError(error) => {
                warn!("Race control server reported an error: {}", error);
                ApplyOutcome::notify(Notification::ServerError(error))
            }
            Event::Ignored(_) => ApplyOutcome::unchanged(),
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot, now: DateTime<Utc>) -> ApplyOutcome {
        let mut store = SessionStore::from_snapshot(snapshot);
        self.carry_over_markers(&mut store);

        let mut notifications = Vec::new();
        let previous = &self.store.session_info;
        let current = &store.session_info;
        let first_snapshot = !self.store.is_initialised();

        if first_snapshot
            || previous.track != current.track
            || previous.track_config != current.track_config
        {
            info!("Track changed to {} {}", current.track, current.track_config);
            notifications.push(Notification::TrackChanged {
                track: current.track.clone(),
                layout: current.track_config.clone(),
            });
        }
        if first_snapshot || previous.weather_graphics != current.weather_graphics {
            debug!("Weather changed to {}", current.weather_graphics);
            notifications.push(Notification::WeatherChanged {
                weather: current.weather_graphics.clone(),
            });
        }

        let mut offered = false;
        for (guid, driver) in store.connected.iter() {
            for collision in &driver.collisions {
                offered |= self.collisions.offer(
                    CollisionNotification {
                        guid: guid.clone(),
                        driver_name: driver.car_info.driver_name.clone(),
                        collision: collision.clone(),
                    },
                    now,
                );
            }
        }

        let mutated = offered || store != self.store;
        self.store = store;
        notifications.push(Notification::SnapshotApplied);
        ApplyOutcome {
            mutated,
            notifications,
        }
    }

    /// Markers hold telemetry that snapshots do not carry. Keep it for drivers that are still
    /// connected, along with the markers of drivers that have not loaded yet.
    fn carry_over_markers(&self, store: &mut SessionStore) {
        for (guid, previous) in &self.store.markers {
            if !store.connected.contains(guid) {
                continue;
            }
            match store.markers.get_mut(guid) {
                Some(marker) => {
                    marker.speed = previous.speed;
                    marker.gear = previous.gear;
                    marker.engine_rpm = previous.engine_rpm;
                    marker.max_rpm = previous.max_rpm;
                }
                None => {
                    store.markers.insert(guid.clone(), previous.clone());
                }
            }
        }
    }

    fn connect(&mut self, car_info: SessionCarInfo, now: DateTime<Utc>) -> ApplyOutcome {
        let guid = car_info.driver_guid.clone();
        info!(
            "{} connected in {} (car {})",
            car_info.driver_name, car_info.car_model, car_info.car_id
        );

        match self.store.connected.get_mut(&guid) {
            Some(driver) => {
                driver
                    .cars
                    .entry(car_info.car_model.clone())
                    .or_insert_with(|| CarLapInfo::for_car(&car_info));
                driver.car_info = car_info.clone();
                driver.last_seen = now.into();
            }
            None => {
                let driver = self.returning_driver(&car_info, now);
                self.store.connected.insert(guid.clone(), driver);
            }
        }

        self.store.car_ids.insert(car_info.car_id, guid.clone());
        self.store.sync_variants(&guid);
        self.store
            .markers
            .insert(guid.clone(), LiveMarker::new(&car_info));

        ApplyOutcome::mutated(vec![Notification::DriverConnected(guid)])
    }

    /// A driver rejoining the session picks up their history from the disconnected records,
    /// preferring the record of the car they are rejoining in.
    fn returning_driver(&self, car_info: &SessionCarInfo, now: DateTime<Utc>) -> Driver {
        let guid = &car_info.driver_guid;
        let history = self
            .store
            .disconnected
            .iter()
            .filter(|(slot, _)| &slot.guid == guid)
            .map(|(slot, driver)| (slot.car_model == car_info.car_model, driver))
            .max_by_key(|(same_car, _)| *same_car)
            .map(|(_, driver)| driver.clone());

        let Some(mut driver) = history else {
            return Driver::new(car_info.clone(), now);
        };

        driver
            .cars
            .entry(car_info.car_model.clone())
            .or_insert_with(|| CarLapInfo::for_car(car_info));
        driver.car_info = car_info.clone();
        driver.connected_time = now.into();
        driver.loaded_time = Default::default();
        driver.last_seen = now.into();
        driver
    }

    fn disconnect(&mut self, car_info: &SessionCarInfo) -> ApplyOutcome {
        let guid = &car_info.driver_guid;
        let Some(driver) = self.store.connected.get(guid) else {
            debug!("Ignoring disconnect for unknown driver {}", guid);
            return ApplyOutcome::unchanged();
        };

        if !driver.has_loaded() || driver.total_num_laps == 0 {
            info!(
                "{} left before setting a lap, removing them from the session",
                driver.car_info.driver_name
            );
            self.store.purge(guid);
            return ApplyOutcome::mutated(vec![Notification::DriverPurged(guid.clone())]);
        }

        let Some(driver) = self.store.connected.remove(guid) else {
            return ApplyOutcome::unchanged();
        };
        info!(
            "{} disconnected after {} laps",
            driver.car_info.driver_name, driver.total_num_laps
        );
        self.store.car_ids.remove_guid(guid);
        self.store.markers.remove(guid);
        self.store.insert_disconnected(driver);

        ApplyOutcome::mutated(vec![Notification::DriverDisconnected(guid.clone())])
    }

    fn client_loaded(&mut self, car_id: u32, now: DateTime<Utc>) -> ApplyOutcome {
        let Some(driver) = self.store.connected_by_car_mut(car_id) else {
            debug!("Ignoring client loaded for unknown car {}", car_id);
            return ApplyOutcome::unchanged();
        };

        if !driver.has_loaded() {
            driver.loaded_time = now.into();
        }
        let guid = driver.guid().clone();
        let marker = LiveMarker::new(&driver.car_info);
        self.store
            .markers
            .entry(guid.clone())
            .or_insert(marker)
            .active = true;

        ApplyOutcome::mutated(vec![Notification::DriverLoaded(guid)])
    }

    fn car_update(&mut self, update: &CarUpdate, now: DateTime<Utc>) -> ApplyOutcome {
        let Some(driver) = self.store.connected_by_car_mut(update.car_id) else {
            trace!("Ignoring telemetry for unknown car {}", update.car_id);
            return ApplyOutcome::unchanged();
        };

        let speed = update.speed_kmh();
        driver.normalised_spline_pos = update.normalised_spline_pos;
        driver.last_pos = update.pos;
        driver.steer_angle = update.steer_angle;
        driver.last_seen = now.into();
        if let Some(blue_flag) = update.blue_flag {
            driver.blue_flag = blue_flag;
        }
        let car = driver.current_car_mut();
        car.top_speed_this_lap = car.top_speed_this_lap.max(speed);

        let guid = driver.guid().clone();
        let marker = LiveMarker::new(&driver.car_info);
        let marker = self.store.markers.entry(guid).or_insert(marker);
        marker.pos = update.pos;
        marker.speed = speed;
        marker.gear = update.gear as i32 - 1;
        marker.engine_rpm = update.engine_rpm;
        marker.max_rpm = marker.max_rpm.max(update.engine_rpm);
        marker.steer_angle = update.steer_angle;

        ApplyOutcome::mutated(Vec::new())
    }

    fn collision(&mut self, event: &CollisionEvent, now: DateTime<Utc>) -> ApplyOutcome {
        let other = event
            .other_car_id
            .and_then(|car_id| self.store.connected_by_car(car_id))
            .map(|other| (other.guid().clone(), other.car_info.driver_name.clone()));

        let Some(driver) = self.store.connected_by_car_mut(event.car_id) else {
            debug!("Ignoring collision for unknown car {}", event.car_id);
            return ApplyOutcome::unchanged();
        };

        let id = driver
            .collisions
            .iter()
            .map(|c| c.id)
            .max()
            .map_or(0, |id| id + 1);
        let collision = Collision {
            id,
            collision_type: event.collision_type,
            time: now.into(),
            other_driver_guid: other.as_ref().map(|(guid, _)| guid.clone()),
            other_driver_name: other.map(|(_, name)| name),
            speed: event.impact_speed as f64,
            damage_zones: event.damage_zones,
        };
        debug!(
            "{} crashed {} at {:.1} km/h",
            driver.car_info.driver_name, collision.collision_type, collision.speed
        );

        driver.collisions.push(collision.clone());
        if driver.collisions.len() > MAX_COLLISION_HISTORY {
            let excess = driver.collisions.len() - MAX_COLLISION_HISTORY;
            driver.collisions.drain(..excess);
        }

        let guid = driver.guid().clone();
        let notification = CollisionNotification {
            guid: guid.clone(),
            driver_name: driver.car_info.driver_name.clone(),
            collision,
        };
        self.collisions.offer(notification, now);

        ApplyOutcome::mutated(vec![Notification::CollisionRecorded(guid)])
    }

    fn lap_completed(&mut self, lap: &LapCompleted, now: DateTime<Utc>) -> ApplyOutcome {
        let Some(driver) = self.store.connected_by_car_mut(lap.car_id) else {
            debug!("Ignoring lap for unknown car {}", lap.car_id);
            return ApplyOutcome::unchanged();
        };

        let lap_time = lap.lap_time as i64 * 1_000_000;
        driver.total_num_laps += 1;
        if !lap.tyres.is_empty() {
            driver.car_info.tyres = lap.tyres.clone();
        }
        let tyres = driver.car_info.tyres.clone();
        let guid = driver.guid().clone();

        let car = driver.current_car_mut();
        car.num_laps += 1;
        car.last_lap = lap_time;
        car.total_lap_time += lap_time;
        car.last_lap_completed_time = now.into();
        if lap.cuts == 0 && lap_time > 0 && (!car.has_best_lap() || lap_time < car.best_lap) {
            car.best_lap = lap_time;
            car.tyres_best_lap = tyres;
            car.top_speed_best_lap = car.top_speed_this_lap;
            car.best_splits = std::mem::take(&mut car.current_lap_splits);
        }
        car.top_speed_this_lap = 0.;
        car.current_lap_splits.clear();

        for entry in &lap.cars {
            if let Some(other) = self.store.connected_by_car_mut(entry.car_id) {
                other.total_num_laps = other.total_num_laps.max(entry.laps as u32);
            }
        }

        ApplyOutcome::mutated(vec![Notification::LapCompleted(guid)])
    }

    fn split_completed(&mut self, split: &SplitCompleted) -> ApplyOutcome {
        let split_time = split.time as i64 * 1_000_000;
        let overall_best = self
            .store
            .connected
            .drivers()
            .values()
            .flat_map(|driver| driver.cars.values())
            .filter_map(|car| car.best_splits.get(&split.index))
            .filter(|best| !best.is_cut() && best.split_time > 0)
            .map(|best| best.split_time)
            .min();

        let Some(driver) = self.store.connected_by_car_mut(split.car_id) else {
            debug!("Ignoring split for unknown car {}", split.car_id);
            return ApplyOutcome::unchanged();
        };
        let guid = driver.guid().clone();
        let car = driver.current_car_mut();

        let valid = split.cuts == 0 && split_time > 0;
        let drivers_best = car
            .best_splits
            .get(&split.index)
            .filter(|best| !best.is_cut())
            .map(|best| best.split_time);
        let completed = Split {
            split_index: split.index,
            split_time,
            cuts: split.cuts,
            is_drivers_best: valid && drivers_best.is_none_or(|best| split_time < best),
            is_best: valid && overall_best.is_none_or(|best| split_time < best),
        };

        car.current_lap_splits.insert(split.index, completed);

        ApplyOutcome::mutated(vec![Notification::SplitCompleted(guid)])
    }

    fn tyres_changed(&mut self, car_info: SessionCarInfo) -> ApplyOutcome {
        let Some(driver) = self.store.connected_by_car_mut(car_info.car_id) else {
            debug!("Ignoring tyre change for unknown car {}", car_info.car_id);
            return ApplyOutcome::unchanged();
        };

        driver.car_info.tyres = car_info.tyres.clone();
        ApplyOutcome::mutated(vec![Notification::TyresChanged {
            guid: driver.guid().clone(),
            tyres: car_info.tyres,
        }])
    }

    fn chat_message(&mut self, message: ChatMessage) -> ApplyOutcome {
        debug!("{}: {}", message.driver_name, message.text);
        self.chat.push(message);
        ApplyOutcome::mutated(vec![Notification::ChatReceived])
    }
}
