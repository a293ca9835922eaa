//! Synchronous multi-face tracker.
//!
//! Every processed frame advances each track by its constant-velocity
//! prediction. On detector frames (every `detector_step` frames) the
//! detections are matched greedily to tracks by IoU, unmatched detections
//! open new tracks, and tracks that stay unmatched for more than
//! `skip_frames` detector runs end.
//!
//! Callbacks for one frame are emitted in this order: best shots of matched
//! tracks, track ends, track starts (each followed by its best shot when it
//! qualifies), then the visual summary.

use crate::detection::{iou, nms, BoundingBox, Detection, Detector};
use crate::frame::Frame;
use crate::TrackError;
use facet_core::settings::{Settings, SettingsError};
use image::GrayImage;
use std::cmp::Ordering;

const SETTINGS_SECTION: &str = "tracker";
/// Overlap above which two detections in one frame are the same face.
const NMS_IOU_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Run the detector on every n-th frame; predict in between.
    pub detector_step: usize,
    /// Detector runs a track may miss before it ends.
    pub skip_frames: usize,
    /// Detections a track needs before its best shots are reported.
    pub minimal_track_length: usize,
    /// Minimum IoU between a prediction and a detection to associate them.
    pub iou_threshold: f32,
    pub min_detection_score: f32,
    /// Frames a stream buffers before `push_frame` starts refusing.
    pub frame_queue_size: usize,
    /// Margin added around best-shot crops, relative to the box size.
    pub best_shot_padding: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detector_step: 7,
            skip_frames: 36,
            minimal_track_length: 1,
            iou_threshold: 0.3,
            min_detection_score: 0.5,
            frame_queue_size: 16,
            best_shot_padding: 0.25,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by the `[tracker]` section.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let mut config = Self::default();
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "detector_step")? {
            config.detector_step = v;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "skip_frames")? {
            config.skip_frames = v;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "minimal_track_length")? {
            config.minimal_track_length = v;
        }
        if let Some(v) = settings.get_float(SETTINGS_SECTION, "iou_threshold")? {
            config.iou_threshold = v as f32;
        }
        if let Some(v) = settings.get_float(SETTINGS_SECTION, "min_detection_score")? {
            config.min_detection_score = v as f32;
        }
        if let Some(v) = settings.get_usize(SETTINGS_SECTION, "frame_queue_size")? {
            config.frame_queue_size = v;
        }
        if let Some(v) = settings.get_float(SETTINGS_SECTION, "best_shot_padding")? {
            config.best_shot_padding = v as f32;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if self.detector_step == 0 {
            return Err(TrackError::InvalidConfig("detector_step must be at least 1".into()));
        }
        if self.frame_queue_size == 0 {
            return Err(TrackError::InvalidConfig("frame_queue_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(TrackError::InvalidConfig(format!(
                "iou_threshold {} is outside [0, 1]",
                self.iou_threshold
            )));
        }
        if self.best_shot_padding.is_nan() || self.best_shot_padding < 0.0 {
            return Err(TrackError::InvalidConfig("best_shot_padding must be non-negative".into()));
        }
        Ok(())
    }
}

/// Best detection of a track so far, with the face region cut from its frame.
#[derive(Debug, Clone)]
pub struct BestShot {
    pub frame_id: u64,
    pub track_id: u64,
    pub detection: Detection,
    pub crop: Option<GrayImage>,
}

/// Where one active track is on a processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSnapshot {
    pub track_id: u64,
    pub rect: BoundingBox,
    /// `false` when the box is a prediction.
    pub detected: bool,
}

#[derive(Debug, Clone)]
pub enum Callback {
    Visual {
        frame_id: u64,
        tracks: Vec<TrackSnapshot>,
    },
    TrackStart {
        frame_id: u64,
        track_id: u64,
        detection: Detection,
    },
    BestShot(BestShot),
    TrackEnd {
        frame_id: u64,
        track_id: u64,
        /// Number of detections the track collected.
        length: usize,
        reached_minimal_length: bool,
    },
}

impl Callback {
    pub fn frame_id(&self) -> u64 {
        match self {
            Callback::Visual { frame_id, .. }
            | Callback::TrackStart { frame_id, .. }
            | Callback::TrackEnd { frame_id, .. } => *frame_id,
            Callback::BestShot(shot) => shot.frame_id,
        }
    }
}

#[derive(Debug)]
struct Track {
    id: u64,
    rect: BoundingBox,
    /// Last detected box; velocity is measured from it.
    anchor: BoundingBox,
    anchor_tick: u64,
    velocity: (f32, f32),
    detections: usize,
    misses: usize,
    best: Option<BestShot>,
    best_reported: bool,
}

impl Track {
    fn start(id: u64, tick: u64, detection: &Detection) -> Self {
        Self {
            id,
            rect: detection.rect,
            anchor: detection.rect,
            anchor_tick: tick,
            velocity: (0.0, 0.0),
            detections: 0,
            misses: 0,
            best: None,
            best_reported: false,
        }
    }

    fn predict(&mut self) {
        self.rect = self.rect.translated(self.velocity.0, self.velocity.1);
    }

    /// Record a matched detection; returns a best shot that is due.
    fn observe(
        &mut self,
        tick: u64,
        frame: &Frame,
        detection: &Detection,
        config: &TrackerConfig,
    ) -> Option<BestShot> {
        if self.detections > 0 {
            let dt = tick.saturating_sub(self.anchor_tick).max(1) as f32;
            let (nx, ny) = detection.rect.center();
            let (ox, oy) = self.anchor.center();
            self.velocity = ((nx - ox) / dt, (ny - oy) / dt);
        }
        self.rect = detection.rect;
        self.anchor = detection.rect;
        self.anchor_tick = tick;
        self.detections += 1;
        self.misses = 0;

        let improved = self
            .best
            .as_ref()
            .map_or(true, |best| detection.score > best.detection.score);
        if improved {
            self.best = Some(BestShot {
                frame_id: frame.id,
                track_id: self.id,
                detection: *detection,
                crop: frame.crop(&detection.rect, config.best_shot_padding),
            });
            self.best_reported = false;
        }

        if self.reached_minimal_length(config) && !self.best_reported {
            self.best_reported = true;
            return self.best.clone();
        }
        None
    }

    fn reached_minimal_length(&self, config: &TrackerConfig) -> bool {
        self.detections >= config.minimal_track_length
    }

    fn end(&self, frame_id: u64, config: &TrackerConfig) -> Callback {
        Callback::TrackEnd {
            frame_id,
            track_id: self.id,
            length: self.detections,
            reached_minimal_length: self.reached_minimal_length(config),
        }
    }
}

/// Frame-by-frame tracker driving a [`Detector`].
pub struct Tracker<D> {
    config: TrackerConfig,
    detector: D,
    tracks: Vec<Track>,
    next_track_id: u64,
    ticks: u64,
    last_frame_id: Option<u64>,
}

impl<D: Detector> Tracker<D> {
    pub fn new(config: TrackerConfig, detector: D) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            config,
            detector,
            tracks: Vec::new(),
            next_track_id: 1,
            ticks: 0,
            last_frame_id: None,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.ticks
    }

    pub fn process(&mut self, frame: &Frame) -> Vec<Callback> {
        let tick = self.ticks;
        self.ticks += 1;
        self.last_frame_id = Some(frame.id);

        for track in &mut self.tracks {
            track.predict();
        }

        let mut callbacks = Vec::new();
        let mut detected = vec![false; self.tracks.len()];
        if tick % self.config.detector_step as u64 == 0 {
            match self.detector.detect(frame) {
                Ok(found) => {
                    detected = self.associate(tick, frame, found, &mut callbacks);
                }
                Err(err) => {
                    tracing::warn!(
                        frame = frame.id,
                        error = %err,
                        "detector failed; tracks advance on prediction"
                    );
                }
            }
        }

        let tracks = self
            .tracks
            .iter()
            .enumerate()
            .map(|(i, track)| TrackSnapshot {
                track_id: track.id,
                rect: track.rect,
                detected: detected.get(i).copied().unwrap_or(false),
            })
            .collect();
        callbacks.push(Callback::Visual {
            frame_id: frame.id,
            tracks,
        });
        callbacks
    }

    /// End every remaining track at the last processed frame.
    pub fn finish(&mut self) -> Vec<Callback> {
        let frame_id = self.last_frame_id.unwrap_or(0);
        let callbacks: Vec<Callback> = self
            .tracks
            .drain(..)
            .map(|track| track.end(frame_id, &self.config))
            .collect();
        if !callbacks.is_empty() {
            tracing::debug!(frame = frame_id, ended = callbacks.len(), "closed remaining tracks");
        }
        callbacks
    }

    /// Match detections to tracks; returns which surviving tracks were detected.
    fn associate(
        &mut self,
        tick: u64,
        frame: &Frame,
        found: Vec<Detection>,
        callbacks: &mut Vec<Callback>,
    ) -> Vec<bool> {
        let candidates = nms(
            found
                .into_iter()
                .filter(|d| d.score >= self.config.min_detection_score && d.rect.area() > 0.0)
                .collect(),
            NMS_IOU_THRESHOLD,
        );

        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, detection) in candidates.iter().enumerate() {
                let overlap = iou(&track.rect, &detection.rect);
                if overlap > self.config.iou_threshold {
                    pairs.push((overlap, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut track_match: Vec<Option<usize>> = vec![None; self.tracks.len()];
        let mut detection_taken = vec![false; candidates.len()];
        for (_, ti, di) in pairs {
            if track_match[ti].is_none() && !detection_taken[di] {
                track_match[ti] = Some(di);
                detection_taken[di] = true;
            }
        }

        let mut survivors = Vec::with_capacity(self.tracks.len());
        let mut detected = Vec::with_capacity(self.tracks.len());
        let mut ended = Vec::new();
        for (mut track, matched) in self.tracks.drain(..).zip(track_match) {
            match matched {
                Some(di) => {
                    if let Some(shot) = track.observe(tick, frame, &candidates[di], &self.config) {
                        callbacks.push(Callback::BestShot(shot));
                    }
                    survivors.push(track);
                    detected.push(true);
                }
                None => {
                    track.misses += 1;
                    if track.misses > self.config.skip_frames {
                        ended.push(track);
                    } else {
                        survivors.push(track);
                        detected.push(false);
                    }
                }
            }
        }
        for track in &ended {
            tracing::debug!(track = track.id, frame = frame.id, length = track.detections, "track ended");
            callbacks.push(track.end(frame.id, &self.config));
        }

        for (di, detection) in candidates.iter().enumerate() {
            if detection_taken[di] {
                continue;
            }
            let id = self.next_track_id;
            self.next_track_id += 1;
            tracing::debug!(track = id, frame = frame.id, score = detection.score, "track started");
            callbacks.push(Callback::TrackStart {
                frame_id: frame.id,
                track_id: id,
                detection: *detection,
            });
            let mut track = Track::start(id, tick, detection);
            if let Some(shot) = track.observe(tick, frame, detection, &self.config) {
                callbacks.push(Callback::BestShot(shot));
            }
            survivors.push(track);
            detected.push(true);
        }

        self.tracks = survivors;
        detected
    }
}
