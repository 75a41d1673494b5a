// Library interface for trackside
// This allows integration tests and benches to access internal modules

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod feeds;
pub mod reconciler;
pub mod scheduler;
pub mod standings;
pub mod state;
pub mod transport;
pub mod units;
pub mod view;
pub mod writer;

// Re-export commonly used types
pub use client::{Client, RaceControlHandle};
pub use config::AppConfig;
pub use errors::TracksideError;
pub use events::{Decoded, Event, decode};
pub use reconciler::{ApplyOutcome, Notification, RaceControl};
pub use scheduler::SessionProgress;
pub use state::{Driver, DriverGuid, SessionStore, Snapshot};
pub use units::SpeedUnit;
pub use view::RaceControlView;
