use donation_watch_common::config::DetectorConfig;
use donation_watch_common::frame::Frame;
use std::f32::consts::PI;
use tracing::debug;

use crate::blobs::{extract_blobs, BlobCandidate};
use crate::hsv::{color_mask, HsvRange};

/// Rectangle in the coordinate space of the original frame, half-open on the
/// `to_*` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DonationRegion {
    pub from_x: u32,
    pub to_x: u32,
    pub from_y: u32,
    pub to_y: u32,
}

impl DonationRegion {
    pub fn width(&self) -> u32 {
        self.to_x - self.from_x
    }

    pub fn height(&self) -> u32 {
        self.to_y - self.from_y
    }

    pub fn extract(&self, frame: &Frame) -> Frame {
        frame.crop(self.from_x, self.to_x, self.from_y, self.to_y)
    }
}

/// Why a frame did not yield a region. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The densest header row holds fewer letters than required.
    HeaderTooSparse { letters: u32 },
    /// The donation text holds fewer letters than required.
    DonationTooSparse { letters: u32 },
    /// Header and donation text are not stacked as one alert graphic.
    NotAdjacent { header_row: u32, donation_from: i64 },
    /// No blobs remained inside the vertical band.
    EmptyBand,
}

/// Color-threshold + blob based finder for the donation alert overlay.
///
/// Looks for a row of header-colored glyphs directly above a band of
/// donation-colored glyphs and returns their joint bounding box. Every
/// threshold comes from [`DetectorConfig`] and is calibrated for one stream
/// layout.
pub struct RegionLocator {
    config: DetectorConfig,
    header: HsvRange,
    donation: HsvRange,
}

impl RegionLocator {
    pub fn new(config: DetectorConfig) -> Self {
        let header = HsvRange::from(&config.header_color);
        let donation = HsvRange::from(&config.donation_color);
        Self {
            config,
            header,
            donation,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn locate(&self, frame: &Frame) -> Option<DonationRegion> {
        match self.analyse(frame) {
            Ok(region) => Some(region),
            Err(rejection) => {
                debug!(seq = frame.seq, ?rejection, "no donation overlay");
                None
            }
        }
    }

    /// Run the full band analysis, reporting the reason for a miss.
    pub fn analyse(&self, frame: &Frame) -> Result<DonationRegion, Rejection> {
        let band_from = self.config.search_from_y.min(frame.height);
        let band_to = self
            .config
            .search_to_y
            .unwrap_or(frame.height)
            .min(frame.height)
            .max(band_from);
        let img = if band_from == 0 && band_to == frame.height {
            frame.clone()
        } else {
            frame.crop(0, frame.width, band_from, band_to)
        };

        let width = img.width as usize;
        let height = img.height as usize;
        let radius = self.config.glyph_radius as i64;
        let max_area = PI * (radius * radius) as f32;

        let header_mask = color_mask(&img, &self.header);
        let donation_mask = color_mask(&img, &self.donation);
        if let Some(dir) = &self.config.debug_dir {
            header_mask.dump(&dir.join("30_header_mask.png"));
            donation_mask.dump(&dir.join("31_donation_mask.png"));
        }

        let header_blobs = extract_blobs(&header_mask, self.config.min_blob_area, max_area);
        let header_rows = row_density(&header_blobs, height, None);
        let (header_row, header_letters) = argmax(&header_rows);
        if header_letters < self.config.min_header_letters {
            return Err(Rejection::HeaderTooSparse {
                letters: header_letters,
            });
        }

        let donation_blobs = extract_blobs(&donation_mask, self.config.min_blob_area, max_area);
        let donation_rows = row_density(&donation_blobs, height, None);
        let (_, donation_letters) = argmax(&donation_rows);
        if donation_letters < self.config.min_donation_letters {
            return Err(Rejection::DonationTooSparse {
                letters: donation_letters,
            });
        }

        let half = donation_letters as f32 / 2.0;
        let mut qualifying = donation_rows
            .iter()
            .enumerate()
            .filter(|(_, d)| **d as f32 > half)
            .map(|(row, _)| row as i64);
        // the maximum row always qualifies, so the iterator is non-empty
        let first = qualifying.next().unwrap_or(0);
        let last = qualifying.last().unwrap_or(first);
        let donation_from = first - radius;
        let to_y = last + 3 * radius;

        let header_row_i = header_row as i64;
        if header_row_i < donation_from - 3 * radius || header_row_i > donation_from + radius {
            return Err(Rejection::NotAdjacent {
                header_row: header_row as u32,
                donation_from,
            });
        }

        let from_y = (header_row_i - radius).max(0);
        let to_y = to_y.min(height as i64);

        let in_band: Vec<BlobCandidate> = header_blobs
            .iter()
            .chain(donation_blobs.iter())
            .filter(|b| b.y >= from_y as f32 && b.y <= to_y as f32)
            .copied()
            .collect();
        if in_band.is_empty() {
            return Err(Rejection::EmptyBand);
        }

        let (from_x, to_x) = if self.config.crop_horizontally {
            let forced = (self.config.typical_letter_width * 4) as f32;
            let columns = column_density(&in_band, width, Some(forced));
            let columns = max_filter(&columns, 3 * radius as usize);
            let Some((from_x, to_x)) = nonzero_span(&columns) else {
                return Err(Rejection::EmptyBand);
            };
            widen(from_x, to_x, self.config.min_border_width as usize, width)
        } else {
            (0, width)
        };

        Ok(DonationRegion {
            from_x: from_x as u32,
            to_x: to_x as u32,
            from_y: band_from + from_y as u32,
            to_y: band_from + to_y as u32,
        })
    }
}

/// Per-row letter density: each blob covers the rows within ±(its radius, or
/// `forced` when given) of its center.
pub fn row_density(blobs: &[BlobCandidate], height: usize, forced: Option<f32>) -> Vec<u32> {
    let mut rows = vec![0u32; height];
    for blob in blobs {
        let extent = forced.unwrap_or(blob.radius);
        cover(&mut rows, blob.y, extent);
    }
    rows
}

/// Per-column letter density, the horizontal counterpart of [`row_density`].
pub fn column_density(blobs: &[BlobCandidate], width: usize, forced: Option<f32>) -> Vec<u32> {
    let mut columns = vec![0u32; width];
    for blob in blobs {
        let extent = forced.unwrap_or(blob.radius);
        cover(&mut columns, blob.x, extent);
    }
    columns
}

fn cover(hist: &mut [u32], center: f32, extent: f32) {
    let from = (center - extent).max(0.0) as usize;
    let to = ((center + extent).max(0.0) as usize).min(hist.len());
    for v in hist.iter_mut().take(to).skip(from) {
        *v += 1;
    }
}

/// Sliding maximum over a centered window of `size` samples.
pub fn max_filter(values: &[u32], size: usize) -> Vec<u32> {
    if size <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let left = size / 2;
    let right = size - 1 - left;
    (0..values.len())
        .map(|i| {
            let from = i.saturating_sub(left);
            let to = (i + right).min(values.len() - 1);
            values[from..=to].iter().copied().max().unwrap_or(0)
        })
        .collect()
}

/// First index holding the maximum, and the maximum itself.
fn argmax(values: &[u32]) -> (usize, u32) {
    values
        .iter()
        .enumerate()
        .fold((0, 0), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
}

fn nonzero_span(values: &[u32]) -> Option<(usize, usize)> {
    let from = values.iter().position(|v| *v > 0)?;
    let to = values.iter().rposition(|v| *v > 0)?;
    Some((from, to))
}

/// Re-center a too-narrow span and pad it to `min_width`, clamped to the image.
fn widen(from: usize, to: usize, min_width: usize, width: usize) -> (usize, usize) {
    if to - from >= min_width {
        return (from, to);
    }
    let center = (from + to) / 2;
    let from = center.saturating_sub(min_width / 2);
    let to = (center + min_width / 2).min(width);
    (from, to)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;

    pub const HEADER_BGR: [u8; 3] = [230, 140, 20];
    pub const DONATION_BGR: [u8; 3] = [82, 192, 214];

    /// Paint `count` square glyphs of `size` px in one row starting at `x0`.
    pub fn paint_row(
        data: &mut [u8],
        width: u32,
        bgr: [u8; 3],
        count: u32,
        x0: u32,
        y: u32,
        size: u32,
        gap: u32,
    ) {
        for i in 0..count {
            let left = x0 + i * (size + gap);
            for yy in y..y + size {
                for xx in left..left + size {
                    let idx = ((yy * width + xx) * 3) as usize;
                    data[idx..idx + 3].copy_from_slice(&bgr);
                }
            }
        }
    }

    /// An alert-like frame: header glyphs at `header_y`, donation glyphs at `donation_y`.
    pub fn alert_frame(
        width: u32,
        height: u32,
        header_count: u32,
        header_y: u32,
        donation_count: u32,
        donation_y: u32,
    ) -> Frame {
        let mut data = vec![0u8; (width * height * 3) as usize];
        paint_row(&mut data, width, HEADER_BGR, header_count, 800, header_y, 10, 20);
        paint_row(&mut data, width, DONATION_BGR, donation_count, 800, donation_y, 10, 20);
        Frame::new(Bytes::from(data), width, height, 0, 0).unwrap()
    }

    #[test]
    fn finds_adjacent_header_and_donation() {
        let frame = alert_frame(1920, 400, 8, 100, 9, 130);
        let locator = RegionLocator::new(DetectorConfig::default());
        let region = locator.analyse(&frame).expect("overlay should be found");

        assert!(region.width() >= 600);
        assert!(region.to_x <= 1920);
        // every glyph center ± radius lies inside the vertical span
        let r = (100.0f32 / PI).sqrt();
        assert!(region.from_y as f32 <= 104.5 - r);
        assert!(region.to_y as f32 >= 134.5 + r);
        // glyphs span x 800..1040, all inside the crop
        assert!(region.from_x <= 800 && region.to_x >= 1040);
    }

    #[test]
    fn sparse_header_is_rejected_regardless_of_donation() {
        let frame = alert_frame(1920, 400, 6, 100, 30, 130);
        let locator = RegionLocator::new(DetectorConfig::default());
        assert_eq!(
            locator.analyse(&frame),
            Err(Rejection::HeaderTooSparse { letters: 6 })
        );
    }

    #[test]
    fn header_split_across_rows_is_rejected() {
        let width = 1920;
        let mut data = vec![0u8; (width * 400 * 3) as usize];
        paint_row(&mut data, width, HEADER_BGR, 4, 200, 40, 10, 20);
        paint_row(&mut data, width, HEADER_BGR, 4, 200, 200, 10, 20);
        paint_row(&mut data, width, DONATION_BGR, 10, 200, 230, 10, 20);
        let frame = Frame::new(Bytes::from(data), width, 400, 0, 0).unwrap();
        let locator = RegionLocator::new(DetectorConfig::default());
        assert!(matches!(
            locator.analyse(&frame),
            Err(Rejection::HeaderTooSparse { letters: 4 })
        ));
    }

    #[test]
    fn sparse_donation_is_rejected() {
        let frame = alert_frame(1920, 400, 8, 100, 7, 130);
        let locator = RegionLocator::new(DetectorConfig::default());
        assert_eq!(
            locator.analyse(&frame),
            Err(Rejection::DonationTooSparse { letters: 7 })
        );
    }

    #[test]
    fn distant_header_is_not_adjacent() {
        let frame = alert_frame(1920, 400, 8, 10, 9, 300);
        let locator = RegionLocator::new(DetectorConfig::default());
        assert!(matches!(
            locator.analyse(&frame),
            Err(Rejection::NotAdjacent { .. })
        ));
    }

    #[test]
    fn full_width_when_horizontal_cropping_is_off() {
        let frame = alert_frame(1920, 400, 8, 100, 9, 130);
        let config = DetectorConfig {
            crop_horizontally: false,
            ..DetectorConfig::default()
        };
        let region = RegionLocator::new(config).analyse(&frame).unwrap();
        assert_eq!((region.from_x, region.to_x), (0, 1920));
    }

    #[test]
    fn search_band_offsets_result_into_frame_coordinates() {
        let frame = alert_frame(1920, 400, 8, 300, 9, 330);
        let full = RegionLocator::new(DetectorConfig::default())
            .analyse(&frame)
            .unwrap();

        let config = DetectorConfig {
            search_from_y: 200,
            ..DetectorConfig::default()
        };
        let banded = RegionLocator::new(config).analyse(&frame).unwrap();
        assert_eq!(banded, full);

        let top_only = DetectorConfig {
            search_to_y: Some(200),
            ..DetectorConfig::default()
        };
        assert!(RegionLocator::new(top_only).locate(&frame).is_none());
    }

    #[test]
    fn max_filter_spreads_peaks() {
        let v = [0, 0, 3, 0, 0, 0, 1];
        assert_eq!(max_filter(&v, 3), vec![0, 3, 3, 3, 0, 1, 1]);
        assert_eq!(max_filter(&v, 1), v.to_vec());
    }

    #[test]
    fn widen_centers_and_clamps() {
        assert_eq!(widen(100, 200, 600, 1920), (0, 450));
        assert_eq!(widen(900, 1000, 600, 1920), (650, 1250));
        assert_eq!(widen(1800, 1900, 600, 1920), (1550, 1920));
        assert_eq!(widen(0, 1000, 600, 1920), (0, 1000));
    }

    #[test]
    fn row_density_honours_forced_extent() {
        let blob = BlobCandidate {
            x: 5.0,
            y: 5.0,
            radius: 1.0,
            area: 3,
        };
        let natural = row_density(&[blob], 10, None);
        assert_eq!(natural.iter().filter(|v| **v > 0).count(), 2);
        let forced = row_density(&[blob], 10, Some(3.0));
        assert_eq!(&forced[2..8], &[1, 1, 1, 1, 1, 1]);
    }
}
