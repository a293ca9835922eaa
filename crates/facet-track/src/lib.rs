//! facet-track: stream-based multi-face tracking with best-shot selection.
//!
//! A [`Stream`] runs a [`Tracker`] on its own thread. The tracker asks a
//! [`Detector`] for faces every few frames, follows them in between, and
//! reports visual, track-start, best-shot and track-end callbacks.

pub mod detection;
pub mod frame;
pub mod stream;
pub mod tracker;

pub use detection::{BoundingBox, Detection, DetectionRecord, Detector, DetectorError, ReplayDetector};
pub use frame::{Frame, FrameError};
pub use stream::Stream;
pub use tracker::{BestShot, Callback, TrackSnapshot, Tracker, TrackerConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),
    #[error("settings: {0}")]
    Settings(#[from] facet_core::SettingsError),
    #[error("failed to spawn stream worker: {0}")]
    Spawn(#[from] std::io::Error),
}
