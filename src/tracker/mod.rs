pub mod commands;
pub mod controller;
pub mod state;
mod ticker;

pub use controller::{SaveOutcome, TrackerController, TrackerOptions, TrackerSnapshot};
pub use state::{format_hms, TrackerStatus, TrackingSession};
