use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

/// Identifier of one accepted or raw detection: `{wall_ms}_{frame_index}`.
pub fn donation_id(wall_ms: i64, seq: u64) -> String {
    format!("{wall_ms}_{seq}")
}

/// e.g. "donates/1739871000000_412.png"
pub fn donation_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.png"))
}

/// Directory holding one evidence triplet, e.g. "donates_triplets/1739871000000_412".
pub fn triplet_dir(dir: &Path, id: &str) -> PathBuf {
    dir.join(id)
}

/// e.g. "donates_triplets/1739871000000_412/1739871000000_412_0.png"
pub fn triplet_frame_path(dir: &Path, id: &str, index: usize) -> PathBuf {
    triplet_dir(dir, id).join(format!("{id}_{index}.png"))
}

/// e.g. "screenshots/1739871000000.png"
pub fn screenshot_path(dir: &Path, wall_ms: i64) -> PathBuf {
    dir.join(format!("{wall_ms}.png"))
}

/// Human-readable UTC time for captions and sidecars.
pub fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        // 2025-02-18T09:30:00.000Z
        let ms = 1739871000000i64;
        let id = donation_id(ms, 412);
        assert_eq!(id, "1739871000000_412");

        let dir = Path::new("donates");
        assert_eq!(donation_path(dir, &id), PathBuf::from("donates/1739871000000_412.png"));

        let t = triplet_frame_path(Path::new("donates_triplets"), &id, 2);
        assert_eq!(
            t,
            PathBuf::from("donates_triplets/1739871000000_412/1739871000000_412_2.png")
        );
        assert_eq!(t.parent().unwrap(), triplet_dir(Path::new("donates_triplets"), &id));

        assert_eq!(
            screenshot_path(Path::new("screenshots"), ms),
            PathBuf::from("screenshots/1739871000000.png")
        );
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(fmt_ts(1739871000000), "2025-02-18T09:30:00.000Z");
    }
}
