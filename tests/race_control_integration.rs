// End to end tests for the race control engine
//
// Raw frames go through the decoder into the engine, the periodic ticks run against it and the
// results are checked through the public read model.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use trackside::{
    AppConfig, Client, Decoded, DriverGuid, Event, Notification, RaceControl, RaceControlView,
    SpeedUnit, decode,
    feeds::chat::CHAT_CAPACITY,
    scheduler::{Tick, run_tick},
    transport::{Frame, ReplaySource},
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn event(frame: &str) -> Event {
    match decode(frame) {
        Some(Decoded::Event(event)) => event,
        other => panic!("Expected an event from {}, got {:?}", frame, other),
    }
}

fn apply(rc: &mut RaceControl, frame: &str, now: DateTime<Utc>) -> Vec<Notification> {
    rc.apply(event(frame), now).notifications
}

fn guids(rc: &RaceControl) -> Vec<String> {
    rc.store()
        .connected()
        .order()
        .iter()
        .map(|g| g.as_str().to_string())
        .collect()
}

/// Race snapshot with A and B level on laps and track position. B is ranked ahead by the server.
const RACE_SNAPSHOT: &str = r#"{"EventType": 200, "Message": {
    "SessionInfo": {"Track": "spa", "TrackConfig": "", "Name": "Race", "Type": 3, "Laps": 10, "WeatherGraphics": "3_clear"},
    "SessionStartTime": "2024-03-01T11:50:00Z",
    "ConnectedDrivers": {
        "Drivers": {
            "A": {"CarInfo": {"CarID": 1, "DriverGUID": "A", "DriverName": "Alice", "CarModel": "bmw_m3"},
                  "TotalNumLaps": 3, "NormalisedSplinePos": 0.9, "Position": 2,
                  "LoadedTime": "2024-03-01T11:50:00Z"},
            "B": {"CarInfo": {"CarID": 2, "DriverGUID": "B", "DriverName": "Bob", "CarModel": "bmw_m3"},
                  "TotalNumLaps": 3, "NormalisedSplinePos": 0.9, "Position": 1,
                  "LoadedTime": "2024-03-01T11:50:00Z"}
        },
        "GUIDsInPositionalOrder": ["A", "B"]
    },
    "CarIDToGUID": {"1": "A", "2": "B"}
}}"#;

#[test]
fn test_standings_follow_track_position() {
    let mut rc = RaceControl::new();
    let now = t0();

    let notifications = apply(&mut rc, RACE_SNAPSHOT, now);
    assert!(notifications.contains(&Notification::SnapshotApplied));
    assert_eq!(guids(&rc), vec!["A", "B"]);

    // level on laps and spline, the server rank decides
    let notifications = run_tick(&mut rc, Tick::Standings, now);
    assert!(notifications.contains(&Notification::StandingsChanged));
    assert_eq!(guids(&rc), vec!["B", "A"]);

    // nothing moved, nothing to announce
    assert!(run_tick(&mut rc, Tick::Standings, now).is_empty());

    apply(
        &mut rc,
        r#"{"EventType": 53, "Message": {"CarID": 1, "NormalisedSplinePos": 0.95, "Velocity": {"X": 50, "Y": 0, "Z": 0}}}"#,
        now,
    );
    let notifications = run_tick(&mut rc, Tick::Standings, now);
    assert!(notifications.contains(&Notification::StandingsChanged));
    assert_eq!(guids(&rc), vec!["A", "B"]);

    let view = RaceControlView::new(&rc, SpeedUnit::KilometersPerHour, now);
    let rows = view.standings();
    assert_eq!(rows[0].driver_name, "Alice");
    assert_eq!(rows[0].rank, 1);
    assert_eq!(rows[1].driver_name, "Bob");
    assert_eq!(view.progress().to_string(), "7 laps remaining");
}

#[test]
fn test_snapshot_replay_changes_nothing() {
    let mut rc = RaceControl::new();
    let now = t0();

    assert!(rc.apply(event(RACE_SNAPSHOT), now).mutated);
    let before = rc.store().clone();

    let outcome = rc.apply(event(RACE_SNAPSHOT), now + TimeDelta::seconds(1));
    assert!(!outcome.mutated);
    assert!(!outcome
        .notifications
        .iter()
        .any(|n| matches!(n, Notification::TrackChanged { .. })));
    assert_eq!(rc.store(), &before);
}

#[test]
fn test_drivers_live_in_exactly_one_map() {
    let mut rc = RaceControl::new();
    let now = t0();
    apply(&mut rc, RACE_SNAPSHOT, now);

    let alice = DriverGuid::new("A");
    let in_connected = |rc: &RaceControl| rc.store().connected().contains(&alice);
    let in_disconnected = |rc: &RaceControl| {
        rc.store()
            .disconnected()
            .iter()
            .any(|(slot, _)| slot.guid == alice)
    };

    let lap = r#"{"EventType": 73, "Message": {"CarID": 1, "LapTime": 95000, "Cuts": 0, "Tyres": "M"}}"#;
    apply(&mut rc, lap, now);

    let leave = r#"{"EventType": 52, "Message": {"CarID": 1, "DriverGUID": "A", "DriverName": "Alice", "CarModel": "bmw_m3"}}"#;
    let notifications = apply(&mut rc, leave, now + TimeDelta::seconds(5));
    assert!(notifications.contains(&Notification::DriverDisconnected(alice.clone())));
    assert!(!in_connected(&rc));
    assert!(in_disconnected(&rc));
    assert!(rc.store().connected_by_car(1).is_none());

    let join = r#"{"EventType": 51, "Message": {"CarID": 7, "DriverGUID": "A", "DriverName": "Alice", "CarModel": "bmw_m3"}}"#;
    apply(&mut rc, join, now + TimeDelta::seconds(10));
    assert!(in_connected(&rc));
    assert!(!in_disconnected(&rc));

    // history survives the reconnect
    let driver = rc.store().connected_by_car(7).unwrap();
    assert_eq!(driver.total_num_laps, 4);
    assert_eq!(driver.current_car().unwrap().best_lap, 95_000_000_000);
    assert!(!driver.has_loaded());
}

#[test]
fn test_chat_scrollback_is_bounded() {
    let mut rc = RaceControl::new();
    let now = t0();
    apply(&mut rc, RACE_SNAPSHOT, now);

    for i in 0..CHAT_CAPACITY + 5 {
        let frame = format!(
            r#"{{"EventType": 57, "Message": {{"CarID": 1, "DriverGUID": "A", "DriverName": "Alice", "Message": "msg {}"}}}}"#,
            i
        );
        apply(&mut rc, &frame, now);
    }

    assert_eq!(rc.chat().len(), CHAT_CAPACITY);
    assert_eq!(rc.chat().iter().next().unwrap().text, "msg 5");
    assert_eq!(
        rc.chat().iter().last().unwrap().text,
        format!("msg {}", CHAT_CAPACITY + 4)
    );
}

#[test]
fn test_collision_notifications_expire() {
    let mut rc = RaceControl::new();
    let now = t0();
    apply(&mut rc, RACE_SNAPSHOT, now);

    let crash = r#"{"EventType": 10, "Message": {"CarID": 1, "OtherCarID": 2, "ImpactSpeed": 42.0}}"#;
    let notifications = apply(&mut rc, crash, now);
    assert!(notifications.contains(&Notification::CollisionRecorded(DriverGuid::new("A"))));

    let view = RaceControlView::new(&rc, SpeedUnit::KilometersPerHour, now);
    let cards = view.collisions();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].title, "Crash with Bob");
    assert_eq!(cards[0].speed, "42 km/h");

    // out of the visibility window but not yet discarded
    let later = now + TimeDelta::seconds(11);
    run_tick(&mut rc, Tick::Feeds, later);
    assert_eq!(rc.collisions().len(), 1);
    assert!(RaceControlView::new(&rc, SpeedUnit::KilometersPerHour, later)
        .collisions()
        .is_empty());

    run_tick(&mut rc, Tick::Feeds, now + TimeDelta::seconds(13));
    assert!(rc.collisions().is_empty());

    // the driver's own history keeps the collision
    let driver = rc.store().connected_by_car(1).unwrap();
    assert_eq!(driver.collisions.len(), 1);
}

#[test]
fn test_malformed_frames_are_skipped() {
    let mut rc = RaceControl::new();
    let now = t0();

    assert_eq!(decode("{not json"), None);
    assert_eq!(decode(r#"{"EventType": 999, "Message": {}}"#), None);
    apply(&mut rc, RACE_SNAPSHOT, now);

    // telemetry for a car the index does not know
    let outcome = rc.apply(
        event(r#"{"EventType": 53, "Message": {"CarID": 42, "NormalisedSplinePos": 0.5}}"#),
        now,
    );
    assert!(!outcome.mutated);
    assert_eq!(rc.store().connected().len(), 2);
}

#[tokio::test]
async fn test_recording_replays_through_client() {
    let recording: Vec<Frame> = [
        RACE_SNAPSHOT.to_string(),
        r#"{"EventType": 57, "Message": {"CarID": 2, "DriverGUID": "B", "DriverName": "Bob", "Message": "gg"}}"#.to_string(),
        r#"{"EventType": 73, "Message": {"CarID": 2, "LapTime": 93500}}"#.to_string(),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, payload)| Frame::new(payload, t0() + TimeDelta::seconds(i as i64)))
    .collect();

    let (client, mut notifications) = Client::new(
        move || Box::new(ReplaySource::from_frames(recording.clone())),
        &AppConfig::default(),
    );
    let handle = client.handle();
    client.run().await.unwrap();

    let (laps, chat) = handle.read(|rc| {
        (
            rc.store().connected_by_car(2).unwrap().total_num_laps,
            rc.chat().snapshot(),
        )
    });
    assert_eq!(laps, 4);
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].text, "gg");

    let mut received = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        received.push(notification);
    }
    assert!(received.contains(&Notification::LapCompleted(DriverGuid::new("B"))));
}
