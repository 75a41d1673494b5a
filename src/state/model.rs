use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Seconds between 0001-01-01T00:00:00Z and the unix epoch.
const ZERO_TIME_UNIX_S: i64 = -62_135_596_800;

/// Transient numeric slot id the server assigns to an active car.
pub type CarId = u32;

/// Stable per-driver identifier, persists across reconnects within a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverGuid(pub String);

impl DriverGuid {
    pub fn new(guid: impl Into<String>) -> Self {
        Self(guid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DriverGuid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A wall-clock instant as sent by the server. The server encodes "never happened" as
/// `0001-01-01T00:00:00Z`, which is also the default value here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn zero() -> Self {
        Self(DateTime::from_timestamp(ZERO_TIME_UNIX_S, 0).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }

    pub fn is_zero(&self) -> bool {
        self.0.timestamp() <= ZERO_TIME_UNIX_S
    }

    /// Time elapsed from `self` until `now`. Negative when `self` is in the future.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

/// Go encodes nil slices and maps as `null`; treat those the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Track metadata is hand-edited JSON; numbers and strings are used interchangeably.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum SessionType {
    #[default]
    Booking,
    Practice,
    Qualifying,
    Race,
    Unknown(u8),
}

impl From<u8> for SessionType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Booking,
            1 => Self::Practice,
            2 => Self::Qualifying,
            3 => Self::Race,
            other => Self::Unknown(other),
        }
    }
}

impl From<SessionType> for u8 {
    fn from(value: SessionType) -> Self {
        match value {
            SessionType::Booking => 0,
            SessionType::Practice => 1,
            SessionType::Qualifying => 2,
            SessionType::Race => 3,
            SessionType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionType::Booking => "Booking",
            SessionType::Practice => "Practice",
            SessionType::Qualifying => "Qualifying",
            SessionType::Race => "Race",
            SessionType::Unknown(_) => "Unknown session",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionInfo {
    pub version: u8,
    pub session_index: u8,
    pub current_session_index: u8,
    pub session_count: u8,
    pub server_name: String,
    pub track: String,
    pub track_config: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub session_type: SessionType,
    /// Scheduled session length in minutes, 0 when the session is lap based.
    pub time: u16,
    /// Scheduled number of laps, 0 when the session is time based.
    pub laps: u16,
    /// Countdown before the session starts, in seconds.
    pub wait_time: u16,
    pub ambient_temp: u8,
    pub road_temp: u8,
    pub weather_graphics: String,
    pub elapsed_milliseconds: i32,
    pub is_solo: bool,
}

/// Identity of a car slot as sent on connect, disconnect and tyre change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionCarInfo {
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    pub driver_name: String,
    #[serde(rename = "DriverGUID")]
    pub driver_guid: DriverGuid,
    pub car_model: String,
    pub car_skin: String,
    pub tyres: String,
    pub driver_initials: String,
    pub car_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Split {
    pub split_index: u8,
    /// Split time in nanoseconds.
    pub split_time: i64,
    pub cuts: u8,
    pub is_drivers_best: bool,
    pub is_best: bool,
}

impl Split {
    pub fn is_cut(&self) -> bool {
        self.cuts != 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CarLapInfo {
    /// km/h
    pub top_speed_this_lap: f64,
    /// km/h
    pub top_speed_best_lap: f64,
    #[serde(rename = "TyreBestLap")]
    pub tyres_best_lap: String,
    /// Nanoseconds, 0 when no valid lap has been set.
    pub best_lap: i64,
    pub num_laps: u32,
    /// Nanoseconds.
    pub last_lap: i64,
    pub last_lap_completed_time: Timestamp,
    /// Nanoseconds.
    pub total_lap_time: i64,
    pub car_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub current_lap_splits: BTreeMap<u8, Split>,
    #[serde(rename = "BestLapSplits", deserialize_with = "null_as_default")]
    pub best_splits: BTreeMap<u8, Split>,
}

/// Turns a content folder name such as `ks_mazda_mx5_cup` into `Ks Mazda Mx5 Cup`.
pub fn prettify_name(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl CarLapInfo {
    /// Lap info for a newly seen car, falling back to a readable model name.
    pub fn for_car(car_info: &SessionCarInfo) -> Self {
        if car_info.car_name.is_empty() {
            Self::new(prettify_name(&car_info.car_model))
        } else {
            Self::new(car_info.car_name.clone())
        }
    }

    pub fn new(car_name: impl Into<String>) -> Self {
        Self {
            car_name: car_name.into(),
            ..Default::default()
        }
    }

    pub fn has_best_lap(&self) -> bool {
        self.best_lap > 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollisionType {
    #[default]
    #[serde(rename = "with other car")]
    WithCar,
    #[serde(rename = "with environment")]
    WithEnvironment,
}

impl fmt::Display for CollisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionType::WithCar => f.write_str("with other car"),
            CollisionType::WithEnvironment => f.write_str("with environment"),
        }
    }
}

/// Damage severities per body zone. The server sends a fixed-size array; only the first four
/// entries map to a zone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f32>", into = "Vec<f32>")]
pub struct DamageZones {
    pub front_bumper: f32,
    pub rear_bumper: f32,
    pub left_skirt: f32,
    pub right_skirt: f32,
}

impl From<Vec<f32>> for DamageZones {
    fn from(value: Vec<f32>) -> Self {
        let zone = |i: usize| value.get(i).copied().unwrap_or(0.);
        Self {
            front_bumper: zone(0),
            rear_bumper: zone(1),
            left_skirt: zone(2),
            right_skirt: zone(3),
        }
    }
}

impl From<DamageZones> for Vec<f32> {
    fn from(value: DamageZones) -> Self {
        vec![
            value.front_bumper,
            value.rear_bumper,
            value.left_skirt,
            value.right_skirt,
        ]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Collision {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "Type")]
    pub collision_type: CollisionType,
    pub time: Timestamp,
    #[serde(rename = "OtherDriverGUID")]
    pub other_driver_guid: Option<DriverGuid>,
    pub other_driver_name: Option<String>,
    /// Impact speed in km/h.
    pub speed: f64,
    pub damage_zones: DamageZones,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Driver {
    pub car_info: SessionCarInfo,
    pub total_num_laps: u32,
    pub connected_time: Timestamp,
    pub loaded_time: Timestamp,
    /// 1-based rank assigned by the server. 0 and 255 mean unranked.
    pub position: i32,
    pub split: String,
    pub last_seen: Timestamp,
    pub last_pos: Vec3,
    pub is_in_pits: bool,
    pub normalised_spline_pos: f32,
    pub steer_angle: u8,
    pub status_bytes: u32,
    pub blue_flag: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub collisions: Vec<Collision>,
    /// Lap information keyed by car model.
    #[serde(deserialize_with = "null_as_default")]
    pub cars: BTreeMap<String, CarLapInfo>,
}

impl Driver {
    pub fn new(car_info: SessionCarInfo, now: DateTime<Utc>) -> Self {
        let mut cars = BTreeMap::new();
        cars.insert(car_info.car_model.clone(), CarLapInfo::for_car(&car_info));
        Self {
            car_info,
            connected_time: now.into(),
            last_seen: now.into(),
            cars,
            ..Default::default()
        }
    }

    pub fn guid(&self) -> &DriverGuid {
        &self.car_info.driver_guid
    }

    pub fn car_model(&self) -> &str {
        &self.car_info.car_model
    }

    pub fn has_loaded(&self) -> bool {
        !self.loaded_time.is_zero()
    }

    pub fn is_ranked(&self) -> bool {
        self.position > 0 && self.position != 255
    }

    pub fn current_car(&self) -> Option<&CarLapInfo> {
        self.cars.get(&self.car_info.car_model)
    }

    /// Lap info of the active car, created on demand so merges never fail on a missing entry.
    pub fn current_car_mut(&mut self) -> &mut CarLapInfo {
        let car_info = &self.car_info;
        self.cars
            .entry(car_info.car_model.clone())
            .or_insert_with(|| CarLapInfo::for_car(car_info))
    }

    /// A copy of this driver with `car_model` made the active car. Returns `None` when the
    /// driver never drove that model.
    pub fn as_variant(&self, car_model: &str) -> Option<Driver> {
        let car = self.cars.get(car_model)?;
        let mut variant = self.clone();
        variant.car_info.car_model = car_model.to_string();
        variant.car_info.car_name = car.car_name.clone();
        Some(variant)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub city: String,
    #[serde(deserialize_with = "lenient_string")]
    pub country: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub length: String,
    #[serde(deserialize_with = "lenient_string")]
    pub pitboxes: String,
    #[serde(deserialize_with = "lenient_string")]
    pub width: String,
    #[serde(deserialize_with = "lenient_string")]
    pub run: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackMapData {
    pub width: f32,
    pub height: f32,
    pub margin: f32,
    pub scale_factor: f32,
    pub offset_x: f32,
    #[serde(alias = "offset_z")]
    pub offset_y: f32,
}

impl Default for TrackMapData {
    fn default() -> Self {
        Self {
            width: 0.,
            height: 0.,
            margin: 0.,
            scale_factor: 1.,
            offset_x: 0.,
            offset_y: 0.,
        }
    }
}

impl TrackMapData {
    /// Translates a world position into track map coordinates (x, z).
    pub fn to_map_coordinates(&self, pos: &Vec3) -> (f32, f32) {
        let scale = if self.scale_factor == 0. {
            1.
        } else {
            self.scale_factor
        };
        (
            (pos.x + self.offset_x + self.margin) / scale,
            (pos.z + self.offset_y + self.margin) / scale,
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverGroup {
    #[serde(rename = "Drivers", deserialize_with = "null_as_default")]
    pub drivers: HashMap<DriverGuid, Driver>,
    #[serde(rename = "GUIDsInPositionalOrder", deserialize_with = "null_as_default")]
    pub guids_in_positional_order: Vec<DriverGuid>,
}

/// Full replacement payload for session and driver state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Snapshot {
    pub session_info: SessionInfo,
    pub session_start_time: Timestamp,
    /// Interval between realtime position updates, in milliseconds.
    pub current_realtime_pos_interval: u32,
    pub track_info: TrackInfo,
    pub track_map_data: TrackMapData,
    pub connected_drivers: Option<DriverGroup>,
    pub disconnected_drivers: Option<DriverGroup>,
    #[serde(rename = "CarIDToGUID", deserialize_with = "null_as_default")]
    pub car_id_to_guid: HashMap<CarId, DriverGuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_time_round_trips_as_sentinel() {
        let ts: Timestamp = serde_json::from_str("\"0001-01-01T00:00:00Z\"").unwrap();
        assert!(ts.is_zero());
        assert_eq!(ts, Timestamp::default());

        let ts: Timestamp = serde_json::from_str("\"2024-03-01T12:00:00Z\"").unwrap();
        assert!(!ts.is_zero());
    }

    #[test]
    fn test_driver_with_null_collections() {
        let driver: Driver = serde_json::from_str(
            r#"{
                "CarInfo": {"CarID": 4, "DriverGUID": "7656", "DriverName": "Ann", "CarModel": "ks_mazda_mx5_cup"},
                "TotalNumLaps": 3,
                "Collisions": null,
                "Cars": null,
                "LoadedTime": "0001-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(driver.car_info.car_id, 4);
        assert_eq!(driver.guid().as_str(), "7656");
        assert!(driver.collisions.is_empty());
        assert!(driver.cars.is_empty());
        assert!(!driver.has_loaded());
    }

    #[test]
    fn test_session_type_from_wire() {
        let info: SessionInfo = serde_json::from_str(r#"{"Type": 3, "Track": "spa"}"#).unwrap();
        assert_eq!(info.session_type, SessionType::Race);
        let info: SessionInfo = serde_json::from_str(r#"{"Type": 9}"#).unwrap();
        assert_eq!(info.session_type, SessionType::Unknown(9));
        assert_eq!(info.session_type.to_string(), "Unknown session");
    }

    #[test]
    fn test_damage_zones_ignore_fifth_entry() {
        let zones: DamageZones = serde_json::from_str("[10.0, 20.0, 30.0, 40.0, 50.0]").unwrap();
        assert_eq!(zones.front_bumper, 10.);
        assert_eq!(zones.right_skirt, 40.);

        let zones: DamageZones = serde_json::from_str("[5.0]").unwrap();
        assert_eq!(zones.rear_bumper, 0.);
    }

    #[test]
    fn test_track_info_accepts_numbers() {
        let info: TrackInfo =
            serde_json::from_str(r#"{"name": "Spa", "pitboxes": 40, "length": "7004m"}"#).unwrap();
        assert_eq!(info.pitboxes, "40");
        assert_eq!(info.length, "7004m");
        assert_eq!(info.city, "");
    }

    #[test]
    fn test_prettify_name() {
        assert_eq!(prettify_name("ks_mazda_mx5_cup"), "Ks Mazda Mx5 Cup");
        assert_eq!(prettify_name("rss-formula__hybrid"), "Rss Formula Hybrid");
        assert_eq!(prettify_name(""), "");
    }

    #[test]
    fn test_variant_switches_active_car() {
        let now = Utc::now();
        let mut driver = Driver::new(
            SessionCarInfo {
                driver_guid: "1".into(),
                car_model: "bmw_m3".to_string(),
                car_name: "BMW M3".to_string(),
                ..Default::default()
            },
            now,
        );
        driver
            .cars
            .insert("ferrari_458".to_string(), CarLapInfo::new("Ferrari 458"));

        let variant = driver.as_variant("ferrari_458").unwrap();
        assert_eq!(variant.car_model(), "ferrari_458");
        assert_eq!(variant.car_info.car_name, "Ferrari 458");
        assert!(driver.as_variant("unknown").is_none());
    }
}
