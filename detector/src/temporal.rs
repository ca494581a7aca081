use bytes::Bytes;
use donation_watch_common::frame::Frame;
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, warn};

use crate::locator::{DonationRegion, RegionLocator};
use crate::mask::Mask;

const WINDOW_LEN: usize = 3;

/// A located overlay together with the frames it was found in.
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: DonationRegion,
    /// The region cut out of the unmasked middle frame.
    pub image: Frame,
    /// Previous, current and next frame, oldest first.
    pub triplet: [Frame; 3],
}

impl Detection {
    pub fn seq(&self) -> u64 {
        self.triplet[1].seq
    }
}

/// Three-frame sliding window that isolates freshly appeared, still visible
/// pixels and runs the [`RegionLocator`] over them.
pub struct TemporalDetector {
    window: VecDeque<Frame>,
    locator: RegionLocator,
}

impl TemporalDetector {
    pub fn new(locator: RegionLocator) -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_LEN),
            locator,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Append a frame; once three are held, analyse the middle one.
    pub fn on_frame(&mut self, frame: Frame) -> Option<Detection> {
        if let Some(last) = self.window.back() {
            if (last.width, last.height) != (frame.width, frame.height) {
                warn!(
                    seq = frame.seq,
                    width = frame.width,
                    height = frame.height,
                    "frame geometry changed, restarting detection window"
                );
                self.window.clear();
            }
        }

        self.window.push_back(frame);
        if self.window.len() < WINDOW_LEN {
            return None;
        }

        let detection = self.analyse_window();
        self.window.pop_front();
        detection
    }

    fn analyse_window(&self) -> Option<Detection> {
        let (prev, cur, next) = (&self.window[0], &self.window[1], &self.window[2]);
        let threshold = self.locator.config().diff_threshold;
        let debug_dir = self.locator.config().debug_dir.as_deref();

        let appeared = changed_mask(prev, cur, threshold);
        let gone = changed_mask(cur, next, threshold);
        let keep = appeared.and_not(&gone);
        if let Some(dir) = debug_dir {
            dump_inputs(dir, prev, cur, next, &appeared, &gone);
        }

        if keep.is_empty() {
            return None;
        }

        let candidate = apply_mask(cur, &keep);
        if let Some(dir) = debug_dir {
            dump_frame(&candidate, &dir.join("22_candidate.png"));
        }

        let region = self.locator.locate(&candidate)?;
        debug!(seq = cur.seq, ?region, "donation overlay located");

        Some(Detection {
            region,
            image: region.extract(cur),
            triplet: [prev.clone(), cur.clone(), next.clone()],
        })
    }
}

/// Pixels where any channel differs by more than `threshold`.
pub fn changed_mask(a: &Frame, b: &Frame, threshold: u8) -> Mask {
    Mask::from_fn(a.width, a.height, |x, y| {
        let pa = a.pixel(x, y);
        let pb = b.pixel(x, y);
        pa.iter().zip(pb.iter()).any(|(ca, cb)| ca.abs_diff(*cb) > threshold)
    })
}

/// Pixels of `prev → cur → next` that newly appeared in `cur` and have not
/// changed again by `next`.
pub fn candidate_mask(prev: &Frame, cur: &Frame, next: &Frame, threshold: u8) -> Mask {
    changed_mask(prev, cur, threshold).and_not(&changed_mask(cur, next, threshold))
}

/// Copy of `frame` with every pixel outside `mask` zeroed.
pub fn apply_mask(frame: &Frame, mask: &Mask) -> Frame {
    let mut data = frame.data.to_vec();
    for (i, keep) in mask.bits().iter().enumerate() {
        if !keep {
            data[i * 3..i * 3 + 3].fill(0);
        }
    }
    Frame {
        data: Bytes::from(data),
        ..frame.clone()
    }
}

fn dump_inputs(dir: &Path, prev: &Frame, cur: &Frame, next: &Frame, appeared: &Mask, gone: &Mask) {
    dump_frame(prev, &dir.join("00_prev.png"));
    dump_frame(cur, &dir.join("01_cur.png"));
    dump_frame(next, &dir.join("02_next.png"));
    appeared.dump(&dir.join("11_appeared_mask.png"));
    gone.dump(&dir.join("12_gone_mask.png"));
}

fn dump_frame(frame: &Frame, path: &Path) {
    if let Err(e) = frame.to_rgb_image().save(path) {
        warn!(path = %path.display(), error = %e, "failed to write debug frame");
    }
}
