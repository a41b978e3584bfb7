//! Frame types: a single captured image and a multi-frame recording.

use chrono::{DateTime, Utc};

/// A single captured frame from the camera.
///
/// Pixels are 16-bit monochrome samples in row-major order, copied out of
/// the vendor's buffer so the frame outlives the next snap.
#[derive(Clone)]
pub struct Frame {
    /// Raw Y16 samples.
    pixels: Vec<u16>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Time the frame was copied out of the vendor buffer.
    timestamp: DateTime<Utc>,
    /// Monotonic sequence number within the session.
    sequence: u64,
    /// Exposure time the frame was taken with.
    exposure_us: u32,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(pixels: Vec<u16>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            timestamp: Utc::now(),
            sequence,
            exposure_us: 0,
        }
    }

    /// Records the exposure time the frame was taken with.
    pub fn with_exposure_us(mut self, exposure_us: u32) -> Self {
        self.exposure_us = exposure_us;
        self
    }

    /// Records when the frame was acquired.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns a reference to the raw samples.
    #[inline]
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Consumes the frame, returning its samples.
    pub fn into_pixels(self) -> Vec<u16> {
        self.pixels
    }

    /// Returns the frame width.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the frame height.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the capture timestamp.
    #[inline]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the exposure time in microseconds.
    #[inline]
    pub fn exposure_us(&self) -> u32 {
        self.exposure_us
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.pixel_count()
    }

    /// Returns one row of samples.
    pub fn row(&self, y: u32) -> Option<&[u16]> {
        let w = self.width as usize;
        let start = (y as usize).checked_mul(w)?;
        self.pixels.get(start..start + w)
    }

    /// Smallest and largest sample.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        min_max(&self.pixels)
    }

    /// Whether any sample is zero.
    ///
    /// The camera never reports true black, so a zero sample marks a frame
    /// that was not (fully) transferred.
    pub fn is_blank(&self) -> bool {
        is_blank(&self.pixels)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("exposure_us", &self.exposure_us)
            .field("samples", &self.pixels.len())
            .finish()
    }
}

fn min_max(samples: &[u16]) -> Option<(u16, u16)> {
    samples.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn is_blank(samples: &[u16]) -> bool {
    samples.contains(&0)
}

/// `N` frames of identical size stored contiguously (`N × H × W`).
///
/// A recording can be allocated once and refilled by
/// [`Camera::record_into`](super::Camera::record_into) to avoid
/// reallocating large buffers between acquisitions.
#[derive(Clone)]
pub struct Recording {
    samples: Vec<u16>,
    frames: usize,
    width: u32,
    height: u32,
    timestamps: Vec<Option<DateTime<Utc>>>,
}

impl Recording {
    /// Allocates a zeroed recording.
    pub fn new(frames: usize, width: u32, height: u32) -> Self {
        let len = frames * (width as usize) * (height as usize);
        Self {
            samples: vec![0; len],
            frames,
            width,
            height,
            timestamps: vec![None; frames],
        }
    }

    /// `(frames, height, width)`.
    pub fn shape(&self) -> (usize, u32, u32) {
        (self.frames, self.height, self.width)
    }

    /// Number of frames.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Frame width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Samples per frame.
    #[inline]
    pub fn frame_len(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// All samples, frame after frame.
    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    /// Samples of frame `index`.
    pub fn frame(&self, index: usize) -> Option<&[u16]> {
        let len = self.frame_len();
        self.samples.get(index * len..(index + 1) * len)
    }

    pub(crate) fn frame_mut(&mut self, index: usize) -> Option<&mut [u16]> {
        let len = self.frame_len();
        self.samples.get_mut(index * len..(index + 1) * len)
    }

    pub(crate) fn set_timestamp(&mut self, index: usize, timestamp: DateTime<Utc>) {
        if let Some(slot) = self.timestamps.get_mut(index) {
            *slot = Some(timestamp);
        }
    }

    /// When frame `index` was acquired, if it has been.
    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.timestamps.get(index).copied().flatten()
    }

    /// Iterates over the frames' samples.
    pub fn frames(&self) -> impl Iterator<Item = &[u16]> + '_ {
        self.samples.chunks_exact(self.frame_len().max(1))
    }

    /// Copies frame `index` out as a standalone [`Frame`].
    pub fn to_frame(&self, index: usize) -> Option<Frame> {
        let pixels = self.frame(index)?.to_vec();
        let frame = Frame::new(pixels, self.width, self.height, index as u64 + 1);
        Some(match self.timestamp(index) {
            Some(ts) => frame.with_timestamp(ts),
            None => frame,
        })
    }

    /// Per-frame `(min, max)` samples.
    pub fn min_max(&self) -> Vec<(u16, u16)> {
        self.frames().filter_map(min_max).collect()
    }

    /// Number of frames containing a zero sample.
    pub fn blank_frames(&self) -> usize {
        self.frames().filter(|f| is_blank(f)).count()
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("shape", &self.shape())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let pixels = vec![16u16; 640 * 480];
        let frame = Frame::new(pixels, 640, 480, 1).with_exposure_us(100);

        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 480);
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.exposure_us(), 100);
        assert!(frame.is_valid());
        assert!(!frame.is_blank());
    }

    #[test]
    fn test_frame_invalid_size() {
        let pixels = vec![0u16; 100]; // Wrong size
        let frame = Frame::new(pixels, 640, 480, 1);

        assert!(!frame.is_valid());
    }

    #[test]
    fn test_frame_rows_and_range() {
        let pixels: Vec<u16> = (1..=12).collect();
        let frame = Frame::new(pixels, 4, 3, 1);

        assert_eq!(frame.row(1), Some(&[5u16, 6, 7, 8][..]));
        assert_eq!(frame.row(3), None);
        assert_eq!(frame.min_max(), Some((1, 12)));
    }

    #[test]
    fn test_recording_layout() {
        let mut rec = Recording::new(3, 4, 2);
        assert_eq!(rec.shape(), (3, 2, 4));
        assert_eq!(rec.samples().len(), 24);

        rec.frame_mut(1).unwrap().fill(7);
        assert_eq!(rec.frame(0).unwrap(), &[0u16; 8]);
        assert_eq!(rec.frame(1).unwrap(), &[7u16; 8]);
        assert!(rec.frame(3).is_none());

        // Frames 0 and 2 are still zeroed.
        assert_eq!(rec.blank_frames(), 2);
    }

    #[test]
    fn test_recording_to_frame() {
        let mut rec = Recording::new(2, 2, 2);
        rec.frame_mut(1).unwrap().copy_from_slice(&[1, 2, 3, 4]);
        let frame = rec.to_frame(1).unwrap();
        assert_eq!(frame.pixels(), &[1, 2, 3, 4]);
        assert_eq!(frame.sequence(), 2);
    }
}
