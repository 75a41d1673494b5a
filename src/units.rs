use std::fmt;

use uom::si::{
    f64::Velocity,
    velocity::{kilometer_per_hour, mile_per_hour},
};

/// Unit speeds are presented in. Everything inside the engine is km/h.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpeedUnit {
    #[default]
    KilometersPerHour,
    MilesPerHour,
}

impl SpeedUnit {
    pub fn from_use_mph(use_mph: bool) -> Self {
        if use_mph {
            Self::MilesPerHour
        } else {
            Self::KilometersPerHour
        }
    }

    /// Converts a km/h value into this unit.
    pub fn convert(self, kmh: f64) -> f64 {
        let speed = Velocity::new::<kilometer_per_hour>(kmh);
        match self {
            Self::KilometersPerHour => kmh,
            Self::MilesPerHour => speed.get::<mile_per_hour>(),
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Self::KilometersPerHour => "km/h",
            Self::MilesPerHour => "mph",
        }
    }

    /// Rounds and labels a km/h value, e.g. `"161 mph"`.
    pub fn format(self, kmh: f64) -> String {
        format!("{:.0} {}", self.convert(kmh), self)
    }
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
