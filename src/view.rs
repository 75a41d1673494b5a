//! Presentation-ready reads of the engine state. Speeds leave this module in the configured unit.

use chrono::{DateTime, Utc};

use crate::{
    feeds::{ChatMessage, CollisionNotification},
    reconciler::RaceControl,
    scheduler::{SessionProgress, session_progress},
    state::{
        CollisionType, DamageZones, Driver, DriverGuid, SessionInfo, Split, model::prettify_name,
    },
    units::SpeedUnit,
};

/// `m:ss.mmm`, empty when no time was set.
pub fn format_lap_time(nanos: i64) -> String {
    if nanos <= 0 {
        return String::new();
    }
    let millis = nanos / 1_000_000;
    format!(
        "{}:{:02}.{:03}",
        millis / 60_000,
        (millis / 1000) % 60,
        millis % 1000
    )
}

/// Strips the time of day parameters some weather plugins append to the weather name, e.g.
/// `sol_05_Broken%20Clouds_type=18_time=0` becomes `sol_05_Broken%20Clouds`.
pub fn normalise_weather(weather_graphics: &str) -> String {
    weather_graphics
        .split('_')
        .take_while(|part| !part.contains("type="))
        .collect::<Vec<&str>>()
        .join("_")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitStatus {
    Cut,
    OverallBest,
    DriversBest,
    Normal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SplitBadge {
    /// 1-based split number.
    pub number: u16,
    pub time: String,
    pub status: SplitStatus,
}

impl From<&Split> for SplitBadge {
    fn from(split: &Split) -> Self {
        let status = if split.is_cut() {
            SplitStatus::Cut
        } else if split.is_best {
            SplitStatus::OverallBest
        } else if split.is_drivers_best {
            SplitStatus::DriversBest
        } else {
            SplitStatus::Normal
        };
        Self {
            number: split.split_index as u16 + 1,
            time: format_lap_time(split.split_time),
            status,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StandingRow {
    /// 1-based place in the displayed order.
    pub rank: usize,
    /// Position assigned by the server, `None` while unranked.
    pub server_position: Option<i32>,
    pub guid: DriverGuid,
    pub driver_name: String,
    pub car_name: String,
    pub tyres: String,
    pub current_lap: String,
    pub splits: Vec<SplitBadge>,
    pub last_lap: String,
    /// Best lap with the compound it was set on.
    pub best_lap: String,
    pub gap: String,
    pub laps: u32,
    pub total_laps: u32,
    pub top_speed: String,
    pub in_pits: bool,
    pub blue_flag: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollisionCard {
    /// Stable per notification, usable as a widget id.
    pub id: String,
    pub title: String,
    pub driver_name: String,
    pub speed: String,
    pub damage_zones: DamageZones,
}

impl CollisionCard {
    fn new(notification: &CollisionNotification, speed_unit: SpeedUnit) -> Self {
        let collision = &notification.collision;
        let title = match collision.collision_type {
            CollisionType::WithCar => format!(
                "Crash with {}",
                collision.other_driver_name.as_deref().unwrap_or("another car")
            ),
            CollisionType::WithEnvironment => format!("Crash {}", collision.collision_type),
        };
        Self {
            id: format!("{}-collision-{}", notification.guid, collision.id),
            title,
            driver_name: notification.driver_name.clone(),
            speed: speed_unit.format(collision.speed),
            damage_zones: collision.damage_zones,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarkerView {
    pub guid: DriverGuid,
    pub initials: String,
    pub active: bool,
    /// Position on the track map image.
    pub map_position: (f32, f32),
    pub speed: String,
    pub gear: i32,
    pub rpm_fraction: f32,
}

/// Read-only view over the engine at a given instant.
pub struct RaceControlView<'a> {
    race_control: &'a RaceControl,
    speed_unit: SpeedUnit,
    now: DateTime<Utc>,
}

impl<'a> RaceControlView<'a> {
    pub fn new(race_control: &'a RaceControl, speed_unit: SpeedUnit, now: DateTime<Utc>) -> Self {
        Self {
            race_control,
            speed_unit,
            now,
        }
    }

    pub fn session_info(&self) -> &SessionInfo {
        self.race_control.store().session_info()
    }

    /// e.g. `Solo Practice at Spa`.
    pub fn title(&self) -> String {
        let info = self.session_info();
        format!(
            "{}{} at {}",
            if info.is_solo { "Solo " } else { "" },
            info.session_type,
            self.race_control.store().track_info().name
        )
    }

    pub fn location(&self) -> String {
        let track = self.race_control.store().track_info();
        format!("{}, {}", track.city, track.country)
    }

    pub fn weather(&self) -> String {
        prettify_name(&normalise_weather(&self.session_info().weather_graphics).replace("%20", " "))
    }

    /// Ambient and road temperature in °C.
    pub fn temperatures(&self) -> (u8, u8) {
        let info = self.session_info();
        (info.ambient_temp, info.road_temp)
    }

    pub fn progress(&self) -> SessionProgress {
        session_progress(self.race_control.store(), self.now)
    }

    pub fn standings(&self) -> Vec<StandingRow> {
        self.race_control
            .store()
            .connected()
            .iter()
            .enumerate()
            .map(|(i, (_, driver))| self.connected_row(i + 1, driver))
            .collect()
    }

    /// Stored times of drivers who left. Cars that were never lapped are left out.
    pub fn disconnected(&self) -> Vec<StandingRow> {
        self.race_control
            .store()
            .disconnected()
            .iter()
            .filter(|(_, driver)| driver.current_car().is_some_and(|car| car.num_laps > 0))
            .enumerate()
            .map(|(i, (_, driver))| self.row(i + 1, driver))
            .collect()
    }

    pub fn chat(&self) -> Vec<ChatMessage> {
        self.race_control.chat().snapshot()
    }

    pub fn collisions(&self) -> Vec<CollisionCard> {
        self.race_control
            .collisions()
            .visible(self.now)
            .into_iter()
            .map(|n| CollisionCard::new(n, self.speed_unit))
            .collect()
    }

    pub fn marker(&self, guid: &DriverGuid) -> Option<MarkerView> {
        let store = self.race_control.store();
        let marker = store.marker(guid)?;
        Some(MarkerView {
            guid: marker.guid.clone(),
            initials: marker.initials.clone(),
            active: marker.active,
            map_position: store.track_map().to_map_coordinates(&marker.pos),
            speed: self.speed_unit.format(marker.speed),
            gear: marker.gear,
            rpm_fraction: marker.rpm_fraction(),
        })
    }

    fn row(&self, rank: usize, driver: &Driver) -> StandingRow {
        let car = driver.current_car().cloned().unwrap_or_default();
        let car_name = if car.car_name.is_empty() {
            prettify_name(driver.car_model())
        } else {
            car.car_name.clone()
        };
        let best_lap = match (format_lap_time(car.best_lap), car.tyres_best_lap.as_str()) {
            (best, "") => best,
            (best, _) if best.is_empty() => best,
            (best, tyres) => format!("{} ({})", best, tyres),
        };

        StandingRow {
            rank,
            server_position: driver.is_ranked().then_some(driver.position),
            guid: driver.guid().clone(),
            driver_name: driver.car_info.driver_name.clone(),
            car_name,
            tyres: String::new(),
            current_lap: String::new(),
            splits: Vec::new(),
            last_lap: String::new(),
            best_lap,
            gap: String::new(),
            laps: car.num_laps,
            total_laps: driver.total_num_laps,
            top_speed: if car.top_speed_best_lap > 0. {
                self.speed_unit.format(car.top_speed_best_lap)
            } else {
                String::new()
            },
            in_pits: false,
            blue_flag: false,
        }
    }

    fn connected_row(&self, rank: usize, driver: &Driver) -> StandingRow {
        let mut row = self.row(rank, driver);
        let Some(car) = driver.current_car() else {
            return row;
        };

        let session_start = self.race_control.store().session_start_time();
        if driver.has_loaded() && car.last_lap_completed_time >= session_start {
            let on_lap = car.last_lap_completed_time.elapsed_at(self.now);
            row.current_lap = on_lap
                .num_nanoseconds()
                .map(format_lap_time)
                .unwrap_or_default();
        }
        row.tyres = driver.car_info.tyres.clone();
        row.splits = car.current_lap_splits.values().map(SplitBadge::from).collect();
        row.last_lap = format_lap_time(car.last_lap);
        row.gap = driver.split.clone();
        row.in_pits = driver.is_in_pits;
        row.blue_flag = driver.blue_flag;
        row
    }
}
