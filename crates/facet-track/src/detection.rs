//! Detection primitives and the detector seam.
//!
//! The tracker never looks inside a detector: anything that turns a
//! [`Frame`] into scored boxes implements [`Detector`]. [`ReplayDetector`]
//! serves detections recorded ahead of time, keyed by frame id.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// Grow by `ratio` times the width/height on every side.
    pub fn padded(&self, ratio: f32) -> Self {
        let px = self.width * ratio;
        let py = self.height * ratio;
        Self {
            x: self.x - px,
            y: self.y - py,
            width: self.width + 2.0 * px,
            height: self.height + 2.0 * py,
        }
    }
}

/// A scored face box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(flatten)]
    pub rect: BoundingBox,
    pub score: f32,
}

impl Detection {
    pub fn new(rect: BoundingBox, score: f32) -> Self {
        Self { rect, score }
    }
}

/// Intersection-over-Union between two boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

/// Non-Maximum Suppression: keep the best-scoring box of every overlapping group.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| iou(&kept.rect, &candidate.rect) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection failed: {0}")]
    Failed(String),
    #[error("frame {0} is not available to the detector")]
    FrameUnavailable(u64),
}

/// Turns frames into face boxes. Runs on the stream's worker thread.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        (**self).detect(frame)
    }
}

/// Detections recorded for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub frame: u64,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Serves recorded detections. Frames with no record have no faces.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = DetectionRecord>) -> Self {
        let mut replay = Self::new();
        for record in records {
            replay.insert(record.frame, record.detections);
        }
        replay
    }

    /// Add detections for `frame_id`, keeping any already recorded.
    pub fn insert(&mut self, frame_id: u64, detections: Vec<Detection>) {
        self.frames.entry(frame_id).or_default().extend(detections);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.frames.get(&frame.id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection::new(BoundingBox::new(x, y, w, h), score)
    }

    #[test]
    fn test_iou_identical() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_degenerate_box() {
        let a = BoundingBox::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(iou(&a, &a), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            det(5.0, 5.0, 100.0, 100.0, 0.8),
            det(0.0, 0.0, 100.0, 100.0, 0.9),
            det(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].score - 0.9).abs() < 1e-6);
        assert!((result[1].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_padded_keeps_center() {
        let rect = BoundingBox::new(10.0, 20.0, 40.0, 20.0);
        let padded = rect.padded(0.25);
        assert_eq!(padded.center(), rect.center());
        assert_eq!(padded.width, 60.0);
        assert_eq!(padded.height, 30.0);
    }

    #[test]
    fn test_replay_detector_serves_by_frame_id() {
        let mut replay = ReplayDetector::from_records(vec![DetectionRecord {
            frame: 2,
            detections: vec![det(1.0, 1.0, 5.0, 5.0, 0.9)],
        }]);
        let frame = |id| Frame::new(id, GrayImage::new(8, 8));
        assert!(replay.detect(&frame(1)).unwrap().is_empty());
        assert_eq!(replay.detect(&frame(2)).unwrap().len(), 1);
        assert_eq!(replay.len(), 1);
    }

    #[test]
    fn test_detection_record_json_shape() {
        let record: DetectionRecord = serde_json::from_str(
            r#"{"frame": 4, "detections": [{"x": 1, "y": 2, "width": 3, "height": 4, "score": 0.5}]}"#,
        )
        .unwrap();
        assert_eq!(record.detections[0], det(1.0, 2.0, 3.0, 4.0, 0.5));
    }
}
