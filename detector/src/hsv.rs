use donation_watch_common::config::ColorWindow;
use donation_watch_common::frame::Frame;

use crate::mask::Mask;

/// Hue in degrees `[0, 360)`, saturation and value on the 0..=255 scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsv {
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
}

pub fn bgr_to_hsv([b, g, r]: [u8; 3]) -> Hsv {
    let (b, g, r) = (b as f32, g as f32, r as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta * 255.0 / max } else { 0.0 };

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let hue = if hue < 0.0 { hue + 360.0 } else { hue };

    Hsv {
        hue,
        saturation,
        value: max,
    }
}

/// Bounds pre-converted to the scales `bgr_to_hsv` produces.
#[derive(Debug, Clone, Copy)]
pub struct HsvRange {
    hue: [f32; 2],
    saturation: [f32; 2],
    value: [f32; 2],
}

impl HsvRange {
    pub fn contains(&self, hsv: Hsv) -> bool {
        hsv.hue >= self.hue[0]
            && hsv.hue <= self.hue[1]
            && hsv.saturation >= self.saturation[0]
            && hsv.saturation <= self.saturation[1]
            && hsv.value >= self.value[0]
            && hsv.value <= self.value[1]
    }
}

impl From<&ColorWindow> for HsvRange {
    fn from(window: &ColorWindow) -> Self {
        Self {
            hue: window.hue,
            saturation: window.saturation_255(),
            value: window.value_255(),
        }
    }
}

/// Pixels simultaneously inside the hue, saturation and value ranges.
pub fn color_mask(frame: &Frame, range: &HsvRange) -> Mask {
    Mask::from_fn(frame.width, frame.height, |x, y| {
        let px = frame.pixel(x, y);
        // black is never inside a calibrated window and dominates masked frames
        px != [0, 0, 0] && range.contains(bgr_to_hsv(px))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_BGR: [u8; 3] = [230, 140, 20];
    const DONATION_BGR: [u8; 3] = [82, 192, 214];

    fn header_window() -> ColorWindow {
        ColorWindow {
            hue: [196.0, 213.0],
            saturation: [70.0, 100.0],
            value: [70.0, 100.0],
        }
    }

    fn donation_window() -> ColorWindow {
        ColorWindow {
            hue: [40.0, 58.0],
            saturation: [50.0, 100.0],
            value: [70.0, 100.0],
        }
    }

    #[test]
    fn primary_hues() {
        assert_eq!(bgr_to_hsv([0, 0, 255]).hue, 0.0);
        assert_eq!(bgr_to_hsv([0, 255, 0]).hue, 120.0);
        assert_eq!(bgr_to_hsv([255, 0, 0]).hue, 240.0);
        assert_eq!(bgr_to_hsv([255, 0, 255]).hue, 300.0);
    }

    #[test]
    fn gray_has_no_saturation() {
        let hsv = bgr_to_hsv([128, 128, 128]);
        assert_eq!(hsv.saturation, 0.0);
        assert_eq!(hsv.value, 128.0);
    }

    #[test]
    fn calibrated_colors_fall_in_their_windows() {
        let header = HsvRange::from(&header_window());
        let donation = HsvRange::from(&donation_window());
        assert!(header.contains(bgr_to_hsv(HEADER_BGR)));
        assert!(!header.contains(bgr_to_hsv(DONATION_BGR)));
        assert!(donation.contains(bgr_to_hsv(DONATION_BGR)));
        assert!(!donation.contains(bgr_to_hsv(HEADER_BGR)));
    }

    #[test]
    fn mask_marks_only_matching_pixels() {
        let mut frame = Frame::filled(4, 2, [0, 0, 0]);
        let mut data = frame.data.to_vec();
        data[..3].copy_from_slice(&DONATION_BGR);
        frame.data = data.into();
        let mask = color_mask(&frame, &HsvRange::from(&donation_window()));
        assert!(mask.get(0, 0));
        assert_eq!(mask.count(), 1);
    }
}
