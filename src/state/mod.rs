pub mod car_index;
pub mod driver_map;
pub mod model;

use std::collections::HashMap;

use itertools::Itertools;

pub use car_index::CarIdIndex;
pub use driver_map::{CarSlot, DriverMap};
pub use model::{
    CarId, CarLapInfo, Collision, CollisionType, DamageZones, Driver, DriverGroup, DriverGuid,
    SessionCarInfo, SessionInfo, SessionType, Snapshot, Split, Timestamp, TrackInfo, TrackMapData,
    Vec3,
};

/// Live map marker for a connected driver.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveMarker {
    pub guid: DriverGuid,
    pub initials: String,
    /// Set once the client has finished loading; inactive markers are not drawn.
    pub active: bool,
    pub pos: Vec3,
    /// km/h
    pub speed: f64,
    /// Display gear: 0 is reverse, 1 is neutral on the wire so it is shifted down by one.
    pub gear: i32,
    pub engine_rpm: u16,
    pub max_rpm: u16,
    pub steer_angle: u8,
}

impl LiveMarker {
    pub fn new(car_info: &SessionCarInfo) -> Self {
        Self {
            guid: car_info.driver_guid.clone(),
            initials: car_info.driver_initials.clone(),
            ..Default::default()
        }
    }

    /// Fraction of the highest RPM seen for this driver, 0 when nothing has been seen yet.
    pub fn rpm_fraction(&self) -> f32 {
        if self.max_rpm == 0 {
            0.
        } else {
            self.engine_rpm as f32 / self.max_rpm as f32
        }
    }
}

/// The in-memory aggregate for one race-control connection.
///
/// Only the reconciler writes to the store. Until the first snapshot arrives the store is
/// uninitialised and every periodic consumer treats it as empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStore {
    initialised: bool,
    pub(crate) session_info: SessionInfo,
    pub(crate) session_start_time: Timestamp,
    pub(crate) realtime_pos_interval_ms: u32,
    pub(crate) track_info: TrackInfo,
    pub(crate) track_map: TrackMapData,
    pub(crate) connected: DriverMap<DriverGuid>,
    pub(crate) disconnected: DriverMap<CarSlot>,
    pub(crate) car_ids: CarIdIndex,
    pub(crate) markers: HashMap<DriverGuid, LiveMarker>,
}

impl SessionStore {
    /// Builds the aggregate from a full snapshot. The result only depends on the snapshot value,
    /// so replaying the same snapshot always yields the same store.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut store = Self {
            initialised: true,
            session_info: snapshot.session_info,
            session_start_time: snapshot.session_start_time,
            realtime_pos_interval_ms: snapshot.current_realtime_pos_interval,
            track_info: snapshot.track_info,
            track_map: snapshot.track_map_data,
            car_ids: CarIdIndex::from_map(snapshot.car_id_to_guid),
            ..Default::default()
        };

        for driver in ordered_drivers(snapshot.connected_drivers) {
            store.connected.insert(driver.guid().clone(), driver);
        }

        for driver in ordered_drivers(snapshot.disconnected_drivers) {
            store.insert_disconnected(driver);
        }

        let connected_guids: Vec<DriverGuid> = store.connected.order().to_vec();
        for guid in &connected_guids {
            store.sync_variants(guid);
        }

        for (guid, driver) in store.connected.iter() {
            if driver.has_loaded() {
                let mut marker = LiveMarker::new(&driver.car_info);
                marker.active = true;
                marker.pos = driver.last_pos;
                marker.steer_angle = driver.steer_angle;
                store.markers.insert(guid.clone(), marker);
            }
        }

        store
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn session_info(&self) -> &SessionInfo {
        &self.session_info
    }

    pub fn session_start_time(&self) -> Timestamp {
        self.session_start_time
    }

    pub fn realtime_pos_interval_ms(&self) -> u32 {
        self.realtime_pos_interval_ms
    }

    pub fn track_info(&self) -> &TrackInfo {
        &self.track_info
    }

    pub fn track_map(&self) -> &TrackMapData {
        &self.track_map
    }

    pub fn connected(&self) -> &DriverMap<DriverGuid> {
        &self.connected
    }

    pub fn disconnected(&self) -> &DriverMap<CarSlot> {
        &self.disconnected
    }

    pub fn car_ids(&self) -> &CarIdIndex {
        &self.car_ids
    }

    pub fn marker(&self, guid: &DriverGuid) -> Option<&LiveMarker> {
        self.markers.get(guid)
    }

    /// Resolves a car id to the connected driver occupying it.
    pub fn connected_by_car(&self, car_id: CarId) -> Option<&Driver> {
        let guid = self.car_ids.guid(car_id)?;
        self.connected.get(guid)
    }

    pub(crate) fn connected_by_car_mut(&mut self, car_id: CarId) -> Option<&mut Driver> {
        let guid = self.car_ids.guid(car_id)?;
        self.connected.get_mut(guid)
    }

    /// The driver leading the connected standings, if any.
    pub fn leader(&self) -> Option<&Driver> {
        self.connected.iter().next().map(|(_, driver)| driver)
    }

    /// Files every car of `driver` as a separate disconnected record.
    pub(crate) fn insert_disconnected(&mut self, driver: Driver) {
        let models: Vec<String> = driver.cars.keys().cloned().collect();
        if !driver.cars.contains_key(driver.car_model()) {
            self.disconnected.insert(CarSlot::of(&driver), driver.clone());
        }
        for model in models {
            if let Some(variant) = driver.as_variant(&model) {
                self.disconnected.insert(CarSlot::of(&variant), variant);
            }
        }
    }

    /// Keeps the disconnected records of a connected driver in line with its connected record:
    /// the active car lives only in the connected map, every other car only in the disconnected
    /// map.
    pub(crate) fn sync_variants(&mut self, guid: &DriverGuid) {
        let Some(driver) = self.connected.get(guid) else {
            return;
        };

        let active = CarSlot::of(driver);
        let variants: Vec<Driver> = driver
            .cars
            .keys()
            .filter(|model| model.as_str() != active.car_model)
            .filter_map(|model| driver.as_variant(model))
            .collect();

        self.disconnected.remove(&active);
        for variant in variants {
            self.disconnected.insert(CarSlot::of(&variant), variant);
        }
    }

    /// Drops a driver that left without a usable stint: connected record, car id and marker.
    /// Cars the driver already lapped in stay on file as disconnected records, along with the
    /// records left over from earlier stints.
    pub(crate) fn purge(&mut self, guid: &DriverGuid) {
        if let Some(driver) = self.connected.remove(guid) {
            let lapped: Vec<Driver> = driver
                .cars
                .iter()
                .filter(|(_, car)| car.num_laps > 0)
                .filter_map(|(model, _)| driver.as_variant(model))
                .collect();
            for variant in lapped {
                self.disconnected.insert(CarSlot::of(&variant), variant);
            }
        }
        self.car_ids.remove_guid(guid);
        self.markers.remove(guid);
    }
}

/// Drivers of a snapshot group in the server's positional order. Drivers the order does not
/// mention follow, sorted by GUID so the result is deterministic.
fn ordered_drivers(group: Option<DriverGroup>) -> Vec<Driver> {
    let Some(mut group) = group else {
        return Vec::new();
    };

    let mut drivers = Vec::with_capacity(group.drivers.len());
    for guid in group.guids_in_positional_order.iter().unique() {
        if let Some(mut driver) = group.drivers.remove(guid) {
            // the map key is authoritative for the GUID
            driver.car_info.driver_guid = guid.clone();
            drivers.push(driver);
        }
    }

    drivers.extend(
        group
            .drivers
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(guid, mut driver)| {
                driver.car_info.driver_guid = guid;
                driver
            }),
    );
    drivers
}
