use bytes::{Bytes, BytesMut};
use image::RgbImage;

/// One decoded video frame as delivered by the transcoder.
///
/// Pixel layout is packed BGR24, row-major, no padding:
///   [(y * width + x) * 3 + 0]  blue
///   [(y * width + x) * 3 + 1]  green
///   [(y * width + x) * 3 + 2]  red
///
/// `data` is reference counted, so cloning a frame into the detection window
/// or an artifact writer does not copy pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Position of the frame in the stream; continuous across restarts.
    pub seq: u64,
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        seq: u64,
        captured_at_ms: i64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            data,
            width,
            height,
            seq,
            captured_at_ms,
        })
    }

    /// A frame filled with a single BGR color.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&bgr);
        }
        Self {
            data: Bytes::from(data),
            width,
            height,
            seq: 0,
            captured_at_ms: 0,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// BGR triple at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Copy out the half-open rectangle `[from_x, to_x) x [from_y, to_y)`.
    /// Bounds are clamped to the frame.
    pub fn crop(&self, from_x: u32, to_x: u32, from_y: u32, to_y: u32) -> Frame {
        let to_x = to_x.min(self.width);
        let to_y = to_y.min(self.height);
        let from_x = from_x.min(to_x);
        let from_y = from_y.min(to_y);
        let w = (to_x - from_x) as usize;
        let h = (to_y - from_y) as usize;

        let mut out = Vec::with_capacity(w * h * 3);
        let stride = self.width as usize * 3;
        for y in from_y as usize..to_y as usize {
            let start = y * stride + from_x as usize * 3;
            out.extend_from_slice(&self.data[start..start + w * 3]);
        }

        Frame {
            data: Bytes::from(out),
            width: w as u32,
            height: h as u32,
            seq: self.seq,
            captured_at_ms: self.captured_at_ms,
        }
    }

    /// Convert to an RGB image for encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let [b, g, r] = self.pixel(x, y);
            image::Rgb([r, g, b])
        })
    }

    /// Build a BGR frame from a decoded RGB image.
    pub fn from_rgb_image(img: &RgbImage, seq: u64, captured_at_ms: i64) -> Self {
        let mut data = Vec::with_capacity(img.width() as usize * img.height() as usize * 3);
        for px in img.pixels() {
            let [r, g, b] = px.0;
            data.extend_from_slice(&[b, g, r]);
        }
        Self {
            data: Bytes::from(data),
            width: img.width(),
            height: img.height(),
            seq,
            captured_at_ms,
        }
    }
}

/// Reassembles fixed-size raw frames from an arbitrarily chunked byte stream.
///
/// The pipe carries no framing markers, so boundaries are purely byte-count
/// derived: every `frame_size` accumulated bytes form one frame. Chunks may be
/// empty, smaller than a frame, or span several frames.
pub struct FrameAssembler {
    frame_size: usize,
    /// Bytes of the frame currently being collected.
    current: BytesMut,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            frame_size,
            current: BytesMut::with_capacity(frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Bytes still needed to complete the in-progress frame.
    pub fn remaining(&self) -> usize {
        self.frame_size - self.current.len()
    }

    pub fn buffered(&self) -> usize {
        self.current.len()
    }

    /// Feed a chunk. Returns every frame completed by it, in stream order.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Bytes> {
        let mut completed = Vec::new();
        while !chunk.is_empty() {
            let take = self.remaining().min(chunk.len());
            self.current.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];

            if self.current.len() == self.frame_size {
                completed.push(self.current.split().freeze());
                self.current.reserve(self.frame_size);
            }
        }
        completed
    }

    /// Drop any partially collected frame.
    pub fn reset(&mut self) {
        self.current.clear();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer size mismatch: got {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn feed(assembler: &mut FrameAssembler, data: &[u8], sizes: &[usize]) -> Vec<Bytes> {
        let mut out = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < data.len() {
            let size = sizes[i % sizes.len()].min(data.len() - offset);
            out.extend(assembler.push(&data[offset..offset + size]));
            offset += size;
            i += 1;
        }
        out
    }

    #[test]
    fn single_chunk_yields_whole_frames_only() {
        let data = stream(12 * 5 + 7);
        let mut assembler = FrameAssembler::new(12);
        let frames = assembler.push(&data);
        assert_eq!(frames.len(), 5);
        assert_eq!(assembler.buffered(), 7);
        assert_eq!(assembler.remaining(), 5);
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(&f[..], &data[i * 12..(i + 1) * 12]);
        }
    }

    #[test]
    fn any_chunking_matches_single_chunk_feed() {
        let frame_size = 24;
        let data = stream(frame_size * 7 + 11);
        let reference = FrameAssembler::new(frame_size).push(&data);

        let chunkings: &[&[usize]] = &[
            &[1],
            &[0, 3, 0, 5],
            &[23],
            &[25, 0],
            &[frame_size * 3 + 1],
            &[7, 0, 0, 13, 48],
            &[1000],
        ];
        for sizes in chunkings {
            let mut assembler = FrameAssembler::new(frame_size);
            let frames = feed(&mut assembler, &data, sizes);
            assert_eq!(frames.len(), data.len() / frame_size, "chunking {sizes:?}");
            assert_eq!(frames, reference, "chunking {sizes:?}");
        }
    }

    #[test]
    fn empty_chunks_never_emit() {
        let mut assembler = FrameAssembler::new(4);
        for _ in 0..10 {
            assert!(assembler.push(&[]).is_empty());
        }
        assert_eq!(assembler.remaining(), 4);
    }

    #[test]
    fn resumes_across_many_partial_reads() {
        let mut assembler = FrameAssembler::new(6);
        assert!(assembler.push(&[1, 2]).is_empty());
        assert!(assembler.push(&[3]).is_empty());
        assert_eq!(assembler.remaining(), 3);
        let frames = assembler.push(&[4, 5, 6, 7]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut assembler = FrameAssembler::new(4);
        assembler.push(&[9, 9, 9]);
        assembler.reset();
        let frames = assembler.push(&[1, 2, 3, 4]);
        assert_eq!(&frames[0][..], &[1, 2, 3, 4]);
    }

    #[test]
    fn frame_rejects_wrong_size() {
        let result = Frame::new(Bytes::from(vec![0u8; 10]), 2, 2, 0, 0);
        assert!(matches!(
            result,
            Err(FrameError::SizeMismatch { got: 10, expected: 12 })
        ));
    }

    #[test]
    fn crop_copies_rectangle_and_clamps() {
        let data: Vec<u8> = (0..4 * 3 * 3).map(|i| i as u8).collect();
        let frame = Frame::new(Bytes::from(data), 4, 3, 9, 0).unwrap();
        let crop = frame.crop(1, 3, 1, 10);
        assert_eq!((crop.width, crop.height, crop.seq), (2, 2, 9));
        assert_eq!(crop.pixel(0, 0), frame.pixel(1, 1));
        assert_eq!(crop.pixel(1, 1), frame.pixel(2, 2));
    }

    #[test]
    fn rgb_conversion_swaps_channels() {
        let frame = Frame::filled(2, 1, [10, 20, 30]);
        let rgb = frame.to_rgb_image();
        assert_eq!(rgb.get_pixel(1, 0).0, [30, 20, 10]);
        let back = Frame::from_rgb_image(&rgb, 0, 0);
        assert_eq!(back.data, frame.data);
    }
}
