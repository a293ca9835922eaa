//! Frame queue and worker thread that drive a [`Tracker`] off the caller's thread.

use crate::detection::Detector;
use crate::frame::Frame;
use crate::tracker::{Callback, Tracker, TrackerConfig};
use crate::TrackError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// State shared between the caller and the worker thread.
struct Shared {
    callbacks: Mutex<VecDeque<Callback>>,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl Shared {
    fn publish(&self, callbacks: Vec<Callback>) {
        if !callbacks.is_empty() {
            self.callbacks.lock().extend(callbacks);
        }
    }

    fn frame_done(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// Tracking stream: frames go in through a bounded queue, callbacks come
/// out through a queue the caller polls.
///
/// The tracker runs on a dedicated OS thread. [`push_frame`](Self::push_frame)
/// never blocks; it returns `false` when the queue is full and the caller
/// should poll callbacks and retry.
pub struct Stream {
    tx: Option<mpsc::Sender<Frame>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn spawn<D: Detector + 'static>(config: TrackerConfig, detector: D) -> Result<Self, TrackError> {
        let queue_size = config.frame_queue_size;
        let mut tracker = Tracker::new(config, detector)?;

        let shared = Arc::new(Shared {
            callbacks: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
        });
        let (tx, mut rx) = mpsc::channel::<Frame>(queue_size);

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("facet-stream".into())
            .spawn(move || {
                tracing::info!("stream worker started");
                while let Some(frame) = rx.blocking_recv() {
                    let callbacks = tracker.process(&frame);
                    worker_shared.publish(callbacks);
                    worker_shared.frame_done();
                }
                worker_shared.publish(tracker.finish());
                tracing::info!(
                    frames = tracker.frames_processed(),
                    "stream worker exiting"
                );
            })?;

        tracing::info!(queue_size, "tracking stream opened");
        Ok(Self {
            tx: Some(tx),
            shared,
            worker: Some(worker),
        })
    }

    /// Queue a frame. Returns `false` if the queue is full or the stream is closed.
    pub fn push_frame(&self, frame: Frame) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        *self.shared.in_flight.lock() += 1;
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(err) => {
                if let mpsc::error::TrySendError::Closed(frame) = &err {
                    tracing::warn!(frame = frame.id, "stream worker is gone; frame dropped");
                }
                self.shared.frame_done();
                false
            }
        }
    }

    /// Take every callback produced so far.
    pub fn get_callbacks(&self) -> Vec<Callback> {
        self.shared.callbacks.lock().drain(..).collect()
    }

    /// Block until every accepted frame has been processed.
    pub fn wait_stream(&self) {
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            if self.worker.as_ref().map_or(true, |w| w.is_finished()) {
                break;
            }
            self.shared
                .idle
                .wait_for(&mut in_flight, std::time::Duration::from_millis(50));
        }
    }

    /// Close the stream, end the remaining tracks and return every
    /// callback not yet collected.
    pub fn finish(mut self) -> Vec<Callback> {
        self.close();
        self.get_callbacks()
    }

    fn close(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("stream worker panicked");
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Detection, DetectorError, ReplayDetector};
    use image::GrayImage;

    fn frame(id: u64) -> Frame {
        Frame::new(id, GrayImage::new(160, 120))
    }

    fn config(queue: usize) -> TrackerConfig {
        TrackerConfig {
            detector_step: 1,
            frame_queue_size: queue,
            ..TrackerConfig::default()
        }
    }

    /// Blocks every detection until the gate opens.
    struct GatedDetector {
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl Detector for GatedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            let (open, cvar) = &*self.gate;
            let mut open = open.lock();
            while !*open {
                cvar.wait(&mut open);
            }
            Ok(Vec::new())
        }
    }

    fn visuals(callbacks: &[Callback]) -> usize {
        callbacks
            .iter()
            .filter(|c| matches!(c, Callback::Visual { .. }))
            .count()
    }

    #[test]
    fn test_push_frame_reports_backpressure() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let stream = Stream::spawn(
            config(1),
            GatedDetector {
                gate: Arc::clone(&gate),
            },
        )
        .unwrap();

        let accepted = (0..3).filter(|&id| stream.push_frame(frame(id))).count();
        assert!((1..=2).contains(&accepted), "accepted={accepted}");

        *gate.0.lock() = true;
        gate.1.notify_all();
        stream.wait_stream();
        assert_eq!(visuals(&stream.get_callbacks()), accepted);
    }

    #[test]
    fn test_wait_stream_drains_accepted_frames() {
        let mut replay = ReplayDetector::new();
        for id in 0..20 {
            replay.insert(
                id,
                vec![Detection::new(BoundingBox::new(20.0 + id as f32, 20.0, 40.0, 40.0), 0.9)],
            );
        }
        let stream = Stream::spawn(config(32), replay).unwrap();
        for id in 0..20 {
            assert!(stream.push_frame(frame(id)));
        }
        stream.wait_stream();
        let callbacks = stream.get_callbacks();
        assert_eq!(visuals(&callbacks), 20);
        assert!(matches!(callbacks[0], Callback::TrackStart { track_id: 1, .. }));
        assert!(stream.get_callbacks().is_empty());

        let tail = stream.finish();
        assert_eq!(tail.len(), 1);
        assert!(matches!(tail[0], Callback::TrackEnd { frame_id: 19, length: 20, .. }));
    }

    #[test]
    fn test_finish_processes_queued_frames() {
        let stream = Stream::spawn(config(8), ReplayDetector::new()).unwrap();
        for id in 0..5 {
            assert!(stream.push_frame(frame(id)));
        }
        assert_eq!(visuals(&stream.finish()), 5);
    }

    #[test]
    fn test_invalid_config_fails_to_spawn() {
        assert!(Stream::spawn(config(0), ReplayDetector::new()).is_err());
    }
}
