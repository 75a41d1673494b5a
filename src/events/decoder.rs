use log::{debug, trace};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::state::{CollisionType, Snapshot};

use super::{CollisionEvent, Event, EventTag};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "EventType")]
    event_type: u16,
    #[serde(rename = "Message", default)]
    message: Value,
}

/// Result of decoding a single frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    /// The server's protocol version changed. The consumer must discard all state and restart.
    VersionChanged(u16),
    Event(Event),
}

/// Decodes a raw race-control frame. Malformed frames and unknown event tags yield `None`; the
/// stream keeps flowing either way.
pub fn decode(frame: &str) -> Option<Decoded> {
    let envelope: Envelope = match serde_json::from_str(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Dropping malformed race control frame: {}", e);
            return None;
        }
    };

    let Some(tag) = EventTag::from_code(envelope.event_type) else {
        debug!("Dropping frame with unknown event type {}", envelope.event_type);
        return None;
    };
    trace!("Decoding {:?} frame", tag);

    decode_message(tag, envelope.message)
}

fn payload<T: DeserializeOwned>(tag: EventTag, message: Value) -> Option<T> {
    serde_json::from_value(message)
        .map_err(|e| debug!("Dropping {:?} frame with invalid payload: {}", tag, e))
        .ok()
}

fn decode_message(tag: EventTag, message: Value) -> Option<Decoded> {
    let event = match tag {
        EventTag::Version => return payload::<u16>(tag, message).map(Decoded::VersionChanged),
        EventTag::RaceControl => Event::Snapshot(Box::new(payload::<Snapshot>(tag, message)?)),
        EventTag::NewSession => Event::NewSession(payload(tag, message)?),
        EventTag::SessionInfo => Event::SessionInfo(payload(tag, message)?),
        EventTag::EndSession => Event::EndSession(match message {
            Value::String(results_file) => results_file,
            Value::Null => String::new(),
            other => other.to_string(),
        }),
        EventTag::NewConnection => Event::NewConnection(payload(tag, message)?),
        EventTag::ConnectionClosed => Event::ConnectionClosed(payload(tag, message)?),
        EventTag::ClientLoaded => Event::ClientLoaded(payload(tag, message)?),
        EventTag::CarUpdate => Event::CarUpdate(payload(tag, message)?),
        EventTag::CollisionWithCar | EventTag::CollisionWithEnvironment => {
            let mut collision: CollisionEvent = payload(tag, message)?;
            collision.collision_type = if tag == EventTag::CollisionWithCar {
                CollisionType::WithCar
            } else {
                collision.other_car_id = None;
                CollisionType::WithEnvironment
            };
            Event::Collision(collision)
        }
        EventTag::LapCompleted => Event::LapCompleted(payload(tag, message)?),
        EventTag::SplitCompleted => Event::SplitCompleted(payload(tag, message)?),
        EventTag::TyresChanged => Event::TyresChanged(payload(tag, message)?),
        EventTag::Chat => Event::Chat(payload(tag, message)?),
        EventTag::Error => Event::ServerError(match message {
            Value::String(error) => error,
            other => other.to_string(),
        }),
        EventTag::CarInfo | EventTag::ClientEvent => Event::Ignored(tag),
    };
    Some(Decoded::Event(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionType;

    fn event(frame: &str) -> Event {
        match decode(frame) {
            Some(Decoded::Event(event)) => event,
            other => panic!("Expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_version_bypasses_events() {
        assert_eq!(
            decode(r#"{"EventType": 56, "Message": 4}"#),
            Some(Decoded::VersionChanged(4))
        );
    }

    #[test]
    fn test_unknown_and_malformed_frames_are_dropped() {
        assert_eq!(decode(r#"{"EventType": 199, "Message": {}}"#), None);
        assert_eq!(decode("not json"), None);
        assert_eq!(decode(r#"{"Message": {}}"#), None);
        assert_eq!(decode(r#"{"EventType": 58, "Message": "car"}"#), None);
    }

    #[test]
    fn test_collision_tags_set_type() {
        let frame = r#"{"EventType": 10, "Message": {"CarID": 1, "OtherCarID": 2, "ImpactSpeed": 33.5, "DamageZones": [1, 2, 3, 4, 5]}}"#;
        match event(frame) {
            Event::Collision(c) => {
                assert_eq!(c.collision_type, CollisionType::WithCar);
                assert_eq!(c.other_car_id, Some(2));
                assert_eq!(c.damage_zones.left_skirt, 3.);
            }
            other => panic!("Expected collision, got {:?}", other),
        }

        let frame = r#"{"EventType": 11, "Message": {"CarID": 1, "ImpactSpeed": 12}}"#;
        match event(frame) {
            Event::Collision(c) => {
                assert_eq!(c.collision_type, CollisionType::WithEnvironment);
                assert_eq!(c.other_car_id, None);
            }
            other => panic!("Expected collision, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_fields_take_zero_values() {
        match event(r#"{"EventType": 101, "Message": {"CarID": 3}}"#) {
            Event::TyresChanged(info) => {
                assert_eq!(info.car_id, 3);
                assert_eq!(info.tyres, "");
            }
            other => panic!("Expected tyre change, got {:?}", other),
        }

        match event(r#"{"EventType": 100, "Message": {"CarID": 3, "Time": 31000}}"#) {
            Event::SplitCompleted(split) => assert_eq!(split.index, 0),
            other => panic!("Expected split, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_frame() {
        let frame = r#"{"EventType": 200, "Message": {
            "SessionInfo": {"Track": "spa", "TrackConfig": "", "Type": 3, "WeatherGraphics": "3_clear"},
            "ConnectedDrivers": {"Drivers": {"g1": {"CarInfo": {"DriverGUID": "g1", "CarModel": "m3"}}}, "GUIDsInPositionalOrder": ["g1"]},
            "DisconnectedDrivers": null,
            "CarIDToGUID": {"4": "g1"}
        }}"#;
        match event(frame) {
            Event::Snapshot(snapshot) => {
                assert_eq!(snapshot.session_info.session_type, SessionType::Race);
                assert_eq!(snapshot.car_id_to_guid.get(&4).map(|g| g.as_str()), Some("g1"));
                assert!(snapshot.disconnected_drivers.is_none());
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_ignored_and_passthrough_tags() {
        assert_eq!(
            event(r#"{"EventType": 130, "Message": {}}"#),
            Event::Ignored(EventTag::ClientEvent)
        );
        assert_eq!(
            event(r#"{"EventType": 55, "Message": "results/2024_race.json"}"#),
            Event::EndSession("results/2024_race.json".to_string())
        );
        assert_eq!(event(r#"{"EventType": 58, "Message": 7}"#), Event::ClientLoaded(7));
    }

    #[test]
    fn test_events_report_their_frame_tag() {
        for frame in [
            r#"{"EventType": 10, "Message": {"CarID": 1, "OtherCarID": 2}}"#,
            r#"{"EventType": 11, "Message": {"CarID": 1}}"#,
            r#"{"EventType": 55, "Message": "results.json"}"#,
            r#"{"EventType": 58, "Message": 7}"#,
            r#"{"EventType": 73, "Message": {"CarID": 1, "LapTime": 95000}}"#,
            r#"{"EventType": 130, "Message": {}}"#,
        ] {
            let code: serde_json::Value = serde_json::from_str(frame).unwrap();
            assert_eq!(event(frame).tag().code() as u64, code["EventType"].as_u64().unwrap());
        }
    }
}
