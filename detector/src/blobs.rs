use crate::mask::Mask;

/// A connected region of set mask pixels, approximated by a circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobCandidate {
    pub x: f32,
    pub y: f32,
    /// Radius of the disc with the same pixel area.
    pub radius: f32,
    pub area: u32,
}

/// Extract 8-connected blobs whose pixel area lies within `[min_area, max_area]`.
///
/// Blobs are returned in raster order of their first pixel.
pub fn extract_blobs(mask: &Mask, min_area: u32, max_area: f32) -> Vec<BlobCandidate> {
    let w = mask.width as usize;
    let h = mask.height as usize;
    let bits = mask.bits();
    let mut visited = vec![false; bits.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut blobs = Vec::new();

    for start in 0..bits.len() {
        if !bits[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let mut area: u64 = 0;
        let mut sum_x: u64 = 0;
        let mut sum_y: u64 = 0;

        while let Some(i) = stack.pop() {
            let (x, y) = (i % w, i / w);
            area += 1;
            sum_x += x as u64;
            sum_y += y as u64;

            let x0 = x.saturating_sub(1);
            let x1 = (x + 1).min(w - 1);
            let y0 = y.saturating_sub(1);
            let y1 = (y + 1).min(h - 1);
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    let j = ny * w + nx;
                    if bits[j] && !visited[j] {
                        visited[j] = true;
                        stack.push(j);
                    }
                }
            }
        }

        if area < min_area as u64 || area as f32 > max_area {
            continue;
        }

        blobs.push(BlobCandidate {
            x: sum_x as f32 / area as f32,
            y: sum_y as f32 / area as f32,
            radius: (area as f32 / std::f32::consts::PI).sqrt(),
            area: area as u32,
        });
    }

    blobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(width: u32, height: u32, squares: &[(u32, u32, u32)]) -> Mask {
        Mask::from_fn(width, height, |x, y| {
            squares
                .iter()
                .any(|&(sx, sy, s)| x >= sx && x < sx + s && y >= sy && y < sy + s)
        })
    }

    #[test]
    fn finds_separate_squares_with_centroids() {
        let mask = square_mask(40, 20, &[(2, 2, 4), (20, 10, 6)]);
        let blobs = extract_blobs(&mask, 1, 1000.0);
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].area, 16);
        assert_eq!((blobs[0].x, blobs[0].y), (3.5, 3.5));
        assert_eq!(blobs[1].area, 36);
        assert_eq!((blobs[1].x, blobs[1].y), (22.5, 12.5));
        assert!((blobs[1].radius - (36.0 / std::f32::consts::PI).sqrt()).abs() < 1e-4);
    }

    #[test]
    fn diagonal_neighbours_join() {
        let mask = Mask::from_fn(3, 3, |x, y| x == y);
        let blobs = extract_blobs(&mask, 1, 100.0);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 3);
    }

    #[test]
    fn area_bounds_filter_noise_and_large_regions() {
        let mask = square_mask(100, 100, &[(0, 0, 2), (10, 10, 5), (40, 40, 50)]);
        let blobs = extract_blobs(&mask, 10, 400.0);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].area, 25);
    }

    #[test]
    fn empty_mask_has_no_blobs() {
        assert!(extract_blobs(&Mask::empty(8, 8), 1, 10.0).is_empty());
    }
}
