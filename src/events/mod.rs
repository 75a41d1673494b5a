pub mod decoder;

use serde::{Deserialize, Serialize};

pub use decoder::{Decoded, decode};

use crate::{
    feeds::ChatMessage,
    state::{
        CarId, CollisionType, DamageZones, SessionCarInfo, SessionInfo, Snapshot, Vec3,
        model::null_as_default,
    },
};

/// Numeric event tags of the race-control envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventTag {
    CollisionWithCar = 10,
    CollisionWithEnvironment = 11,
    NewSession = 50,
    NewConnection = 51,
    ConnectionClosed = 52,
    CarUpdate = 53,
    CarInfo = 54,
    EndSession = 55,
    Version = 56,
    Chat = 57,
    ClientLoaded = 58,
    SessionInfo = 59,
    Error = 60,
    LapCompleted = 73,
    SplitCompleted = 100,
    TyresChanged = 101,
    ClientEvent = 130,
    RaceControl = 200,
}

impl EventTag {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            10 => Self::CollisionWithCar,
            11 => Self::CollisionWithEnvironment,
            50 => Self::NewSession,
            51 => Self::NewConnection,
            52 => Self::ConnectionClosed,
            53 => Self::CarUpdate,
            54 => Self::CarInfo,
            55 => Self::EndSession,
            56 => Self::Version,
            57 => Self::Chat,
            58 => Self::ClientLoaded,
            59 => Self::SessionInfo,
            60 => Self::Error,
            73 => Self::LapCompleted,
            100 => Self::SplitCompleted,
            101 => Self::TyresChanged,
            130 => Self::ClientEvent,
            200 => Self::RaceControl,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Per-tick car telemetry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CarUpdate {
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    pub pos: Vec3,
    /// m/s
    pub velocity: Vec3,
    pub gear: u8,
    #[serde(rename = "EngineRPM")]
    pub engine_rpm: u16,
    pub normalised_spline_pos: f32,
    pub steer_angle: u8,
    pub blue_flag: Option<bool>,
}

impl CarUpdate {
    /// Ground speed in km/h, ignoring the vertical component.
    pub fn speed_kmh(&self) -> f64 {
        let vx = self.velocity.x as f64;
        let vz = self.velocity.z as f64;
        ((vx * vx + vz * vz).sqrt() * 3.6).floor()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CollisionEvent {
    #[serde(skip)]
    pub collision_type: CollisionType,
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    #[serde(rename = "OtherCarID")]
    pub other_car_id: Option<CarId>,
    /// km/h
    pub impact_speed: f32,
    pub world_pos: Vec3,
    pub rel_pos: Vec3,
    pub damage_zones: DamageZones,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LapCompletedCar {
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    /// Milliseconds.
    pub lap_time: u32,
    pub laps: u16,
    pub completed: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LapCompleted {
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    /// Milliseconds.
    pub lap_time: u32,
    pub cuts: u8,
    pub cars_count: u8,
    pub tyres: String,
    #[serde(deserialize_with = "null_as_default")]
    pub cars: Vec<LapCompletedCar>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SplitCompleted {
    #[serde(rename = "CarID")]
    pub car_id: CarId,
    pub index: u8,
    /// Milliseconds.
    pub time: u32,
    pub cuts: u8,
}

/// A decoded race-control event.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Snapshot(Box<Snapshot>),
    NewSession(SessionInfo),
    SessionInfo(SessionInfo),
    EndSession(String),
    NewConnection(SessionCarInfo),
    ConnectionClosed(SessionCarInfo),
    ClientLoaded(CarId),
    CarUpdate(CarUpdate),
    Collision(CollisionEvent),
    LapCompleted(LapCompleted),
    SplitCompleted(SplitCompleted),
    TyresChanged(SessionCarInfo),
    Chat(ChatMessage),
    ServerError(String),
    /// Known tags the engine does not act on.
    Ignored(EventTag),
}

impl Event {
    pub fn tag(&self) -> EventTag {
        match self {
            Event::Snapshot(_) => EventTag::RaceControl,
            Event::NewSession(_) => EventTag::NewSession,
            Event::SessionInfo(_) => EventTag::SessionInfo,
            Event::EndSession(_) => EventTag::EndSession,
            Event::NewConnection(_) => EventTag::NewConnection,
            Event::ConnectionClosed(_) => EventTag::ConnectionClosed,
            Event::ClientLoaded(_) => EventTag::ClientLoaded,
            Event::CarUpdate(_) => EventTag::CarUpdate,
            Event::Collision(c) => match c.collision_type {
                CollisionType::WithCar => EventTag::CollisionWithCar,
                CollisionType::WithEnvironment => EventTag::CollisionWithEnvironment,
            },
            Event::LapCompleted(_) => EventTag::LapCompleted,
            Event::SplitCompleted(_) => EventTag::SplitCompleted,
            Event::TyresChanged(_) => EventTag::TyresChanged,
            Event::Chat(_) => EventTag::Chat,
            Event::ServerError(_) => EventTag::Error,
            Event::Ignored(tag) => *tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_codes_round_trip() {
        for code in [10, 11, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 73, 100, 101, 130, 200] {
            let tag = EventTag::from_code(code).unwrap();
            assert_eq!(tag.code(), code);
        }
        assert!(EventTag::from_code(12).is_none());
    }

    #[test]
    fn test_speed_ignores_vertical_velocity() {
        let update = CarUpdate {
            velocity: Vec3 {
                x: 30.,
                y: 100.,
                z: 40.,
            },
            ..Default::default()
        };
        assert_eq!(update.speed_kmh(), 180.);
    }
}
