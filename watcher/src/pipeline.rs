use donation_watch_common::config::{DetectorConfig, OutputConfig};
use donation_watch_common::frame::Frame;
use donation_watch_detector::{Debouncer, RegionLocator, TemporalDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::artifacts::{ArtifactError, ArtifactWriter};
use crate::keys;
use crate::notify::Notification;

/// Requests for a [`DonationPipeline`] from outside the detection thread.
/// Each request is applied when the next frame arrives.
#[derive(Debug, Default)]
pub struct PipelineControl {
    reset: AtomicBool,
    snapshot: AtomicBool,
}

impl PipelineControl {
    /// Forget the frame window and the last trigger before the next frame.
    pub fn request_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    /// Save the next frame as a screenshot.
    pub fn request_snapshot(&self) {
        self.snapshot.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::SeqCst)
    }

    fn take_snapshot(&self) -> bool {
        self.snapshot.swap(false, Ordering::SeqCst)
    }
}

/// Detection, debouncing and output for every dispatched frame.
///
/// Owned by a dispatcher subscription and run on the blocking pool, one
/// frame at a time. Saved images are handed to the notifier task over a
/// bounded channel; a full channel drops the notification with a warning.
pub struct DonationPipeline {
    detector: TemporalDetector,
    debouncer: Debouncer,
    artifacts: ArtifactWriter,
    notifications: mpsc::Sender<Notification>,
    control: Arc<PipelineControl>,
}

impl DonationPipeline {
    pub fn new(
        detector: DetectorConfig,
        output: &OutputConfig,
        notifications: mpsc::Sender<Notification>,
    ) -> Self {
        let debouncer = Debouncer::new(detector.cooldown_frames);
        Self {
            detector: TemporalDetector::new(RegionLocator::new(detector)),
            debouncer,
            artifacts: ArtifactWriter::new(output),
            notifications,
            control: Arc::new(PipelineControl::default()),
        }
    }

    pub fn control(&self) -> Arc<PipelineControl> {
        Arc::clone(&self.control)
    }

    fn reset(&mut self) {
        self.detector.reset();
        self.debouncer.reset();
    }

    /// Process one frame. Returns the id of an accepted donation.
    ///
    /// Only a failed write of an accepted donation fails the frame. Screenshot
    /// and evidence write failures are logged.
    pub fn on_frame(&mut self, frame: Frame) -> Result<Option<String>, ArtifactError> {
        if self.control.take_reset() {
            info!(seq = frame.seq, "detection state reset");
            self.reset();
        }
        if self.control.take_snapshot() {
            match self.artifacts.write_screenshot(&frame, frame.captured_at_ms) {
                Ok(image_path) => self.send(Notification::Screenshot { image_path }),
                Err(e) => warn!(seq = frame.seq, error = %e, "failed to save screenshot"),
            }
        }

        let seq = frame.seq;
        let wall_ms = frame.captured_at_ms;
        let Some(detection) = self.detector.on_frame(frame) else {
            return Ok(None);
        };

        let id = keys::donation_id(wall_ms, seq);
        // evidence is kept for every raw detection, including debounced repeats
        if let Err(e) = self.artifacts.write_triplet(&id, &detection.triplet) {
            warn!(id, error = %e, "failed to save evidence triplet");
        }

        if !self.debouncer.admit(seq, &id) {
            return Ok(None);
        }

        let image_path = self
            .artifacts
            .write_donation(&id, &detection.image, &detection.region)?;
        info!(id, seq, region = ?detection.region, "donation accepted");
        self.send(Notification::Donation {
            id: id.clone(),
            seq,
            image_path,
            region: detection.region,
        });
        Ok(Some(id))
    }

    fn send(&self, notification: Notification) {
        if let Err(e) = self.notifications.try_send(notification) {
            warn!(error = %e, "notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::path::Path;

    const WIDTH: u32 = 1280;
    const HEIGHT: u32 = 200;

    fn paint_glyphs(data: &mut [u8], bgr: [u8; 3], count: u32, y: u32) {
        for i in 0..count {
            let left = 800 + i * 30;
            for yy in y..y + 10 {
                for xx in left..left + 10 {
                    let idx = ((yy * WIDTH + xx) * 3) as usize;
                    data[idx..idx + 3].copy_from_slice(&bgr);
                }
            }
        }
    }

    fn frame(seq: u64, alert: bool) -> Frame {
        let mut data = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
        if alert {
            paint_glyphs(&mut data, [230, 140, 20], 8, 60);
            paint_glyphs(&mut data, [82, 192, 214], 9, 90);
        }
        Frame::new(Bytes::from(data), WIDTH, HEIGHT, seq, 1_700_000_000_000 + seq as i64)
            .unwrap()
    }

    fn pipeline(root: &Path) -> (DonationPipeline, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(16);
        let output = OutputConfig {
            donations_dir: root.join("donates"),
            triplets_dir: Some(root.join("donates_triplets")),
            screenshots_dir: root.join("screenshots"),
        };
        (DonationPipeline::new(DetectorConfig::default(), &output, tx), rx)
    }

    /// Feed `black, alert, alert` starting at `seq`; returns the accepted id, if any.
    fn feed_alert(p: &mut DonationPipeline, seq: u64) -> Option<String> {
        assert_eq!(p.on_frame(frame(seq, false)).unwrap(), None);
        assert_eq!(p.on_frame(frame(seq + 1, true)).unwrap(), None);
        p.on_frame(frame(seq + 2, true)).unwrap()
    }

    #[test]
    fn accepted_donation_is_saved_and_notified() {
        let dir = tempfile::tempdir().unwrap();
        let (mut p, mut rx) = pipeline(dir.path());

        let id = feed_alert(&mut p, 0).expect("donation accepted");
        assert_eq!(id, "1700000000002_2");
        assert!(dir.path().join("donates/1700000000002_2.png").is_file());
        assert!(dir
            .path()
            .join("donates_triplets/1700000000002_2/1700000000002_2_1.png")
            .is_file());

        match rx.try_recv().unwrap() {
            Notification::Donation { id, seq, region, .. } => {
                assert_eq!(id, "1700000000002_2");
                assert_eq!(seq, 2);
                assert!(region.width() >= 600);
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[test]
    fn repeats_inside_cooldown_keep_evidence_only() {
        let dir = tempfile::tempdir().unwrap();
        let (mut p, mut rx) = pipeline(dir.path());

        assert!(feed_alert(&mut p, 0).is_some());
        // detection at seq 5, only 3 frames after the first
        assert!(feed_alert(&mut p, 3).is_none());
        assert!(dir.path().join("donates_triplets/1700000000005_5").is_dir());
        assert!(!dir.path().join("donates/1700000000005_5.png").exists());

        // detection at seq 22 is past the 13 frame cooldown
        assert_eq!(feed_alert(&mut p, 20).as_deref(), Some("1700000000022_22"));

        let mut donations = 0;
        while let Ok(n) = rx.try_recv() {
            assert!(matches!(n, Notification::Donation { .. }));
            donations += 1;
        }
        assert_eq!(donations, 2);
    }

    #[test]
    fn reset_clears_window_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (mut p, _rx) = pipeline(dir.path());

        assert!(feed_alert(&mut p, 0).is_some());
        p.on_frame(frame(3, false)).unwrap();
        p.control().request_reset();
        // a new stream restarting at a low index is accepted straight away
        assert!(feed_alert(&mut p, 4).is_some());
    }

    #[test]
    fn snapshot_saves_next_frame_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut p, mut rx) = pipeline(dir.path());

        p.control().request_snapshot();
        p.on_frame(frame(7, false)).unwrap();
        p.on_frame(frame(8, false)).unwrap();

        let shot = dir.path().join("screenshots/1700000000007.png");
        assert!(shot.is_file());
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Screenshot { image_path: shot }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unwritable_evidence_does_not_lose_donation() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let output = OutputConfig {
            donations_dir: dir.path().join("donates"),
            triplets_dir: Some(blocker),
            screenshots_dir: dir.path().join("screenshots"),
        };
        let mut p = DonationPipeline::new(DetectorConfig::default(), &output, tx);

        assert_eq!(feed_alert(&mut p, 0).as_deref(), Some("1700000000002_2"));
        assert!(dir.path().join("donates/1700000000002_2.png").is_file());
        assert!(matches!(rx.try_recv(), Ok(Notification::Donation { .. })));
    }

    #[test]
    fn disabled_triplets_still_accept() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let output = OutputConfig {
            donations_dir: dir.path().join("donates"),
            triplets_dir: None,
            screenshots_dir: dir.path().join("screenshots"),
        };
        let mut p = DonationPipeline::new(DetectorConfig::default(), &output, tx);
        assert!(feed_alert(&mut p, 0).is_some());
        assert!(!dir.path().join("donates_triplets").exists());
    }
}
