use tracing::{debug, warn};

/// Suppresses repeated triggers of the same alert.
///
/// An overlay stays on screen for several frames, so every raw detection
/// within `cooldown_frames` of the last accepted one is dropped. The window is
/// counted in frame indices rather than wall time so it tracks the stream, not
/// processing speed.
pub struct Debouncer {
    cooldown_frames: u64,
    last_trigger: Option<u64>,
}

impl Debouncer {
    pub fn new(cooldown_frames: u64) -> Self {
        Self {
            cooldown_frames,
            last_trigger: None,
        }
    }

    /// Returns `true` if a trigger at `seq` should be forwarded.
    pub fn admit(&mut self, seq: u64, id: &str) -> bool {
        if let Some(last) = self.last_trigger {
            let gap = seq.saturating_sub(last);
            if gap < self.cooldown_frames {
                warn!(
                    id,
                    seq,
                    last,
                    cooldown = self.cooldown_frames,
                    "donation skipped because of cooldown"
                );
                return false;
            }
        }
        debug!(id, seq, "donation trigger accepted");
        self.last_trigger = Some(seq);
        true
    }

    pub fn last_trigger(&self) -> Option<u64> {
        self.last_trigger
    }

    pub fn reset(&mut self) {
        self.last_trigger = None;
    }
}
