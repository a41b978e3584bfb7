//! Saving frames to disk.
//!
//! Frames are written losslessly as 16-bit grayscale, TIFF or PNG chosen by
//! file extension. A whole recording can also go into one multi-page TIFF
//! that ImageJ opens as a stack.

use crate::capture::{Frame, Recording};
use image::{ImageBuffer, ImageFormat, Luma};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// 16-bit grayscale image.
pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Errors that can occur while exporting frames.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The path does not end in `.tif`, `.tiff` or `.png`.
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),
    /// Sample count does not match the stated frame size.
    #[error("frame buffer does not match {width}x{height}")]
    #[allow(missing_docs)]
    Shape { width: u32, height: u32 },
    /// Single-image encoding failed.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    /// Stack encoding failed.
    #[error("TIFF stack encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),
    /// Creating the directory or file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_for(path: &Path) -> Result<ImageFormat, ExportError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "tif" | "tiff" => Ok(ImageFormat::Tiff),
        "png" => Ok(ImageFormat::Png),
        _ => Err(ExportError::UnsupportedExtension(ext)),
    }
}

/// Wraps raw samples as an image without copying.
pub fn to_image(samples: Vec<u16>, width: u32, height: u32) -> Result<Gray16Image, ExportError> {
    ImageBuffer::from_raw(width, height, samples).ok_or(ExportError::Shape { width, height })
}

/// Saves one frame.
pub fn save_frame(frame: &Frame, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let path = path.as_ref();
    let format = format_for(path)?;
    let image = to_image(frame.pixels().to_vec(), frame.width(), frame.height())?;
    image.save_with_format(path, format)?;
    tracing::debug!(path = %path.display(), sequence = frame.sequence(), "Frame saved");
    Ok(())
}

/// Saves every frame of a recording as `{prefix}_{index:04}.{extension}`
/// in `dir`, creating it if needed. Returns the written paths.
pub fn save_recording(
    recording: &Recording,
    dir: impl AsRef<Path>,
    prefix: &str,
    extension: &str,
) -> Result<Vec<PathBuf>, ExportError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(recording.frame_count());
    for (index, samples) in recording.frames().enumerate() {
        let path = dir.join(format!("{prefix}_{index:04}.{extension}"));
        let format = format_for(&path)?;
        to_image(samples.to_vec(), recording.width(), recording.height())?
            .save_with_format(&path, format)?;
        paths.push(path);
    }
    tracing::info!(frames = paths.len(), dir = %dir.display(), "Recording saved");
    Ok(paths)
}

/// Saves a recording as one multi-page 16-bit TIFF. The first page carries
/// an ImageJ description so the pages open as a stack of `N` slices.
pub fn save_stack(recording: &Recording, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let path = path.as_ref();
    if format_for(path)? != ImageFormat::Tiff {
        return Err(ExportError::UnsupportedExtension(format!(
            "{} (stacks are TIFF only)",
            path.display()
        )));
    }
    let (width, height) = (recording.width(), recording.height());
    let pages = recording.frame_count();
    let description = format!("ImageJ=1.11a\nimages={pages}\nslices={pages}\n");

    let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
    for (index, samples) in recording.frames().enumerate() {
        let mut image = encoder.new_image::<colortype::Gray16>(width, height)?;
        if index == 0 {
            image.encoder().write_tag(Tag::ImageDescription, description.as_str())?;
        }
        image.write_data(samples)?;
    }
    tracing::info!(pages, path = %path.display(), "Recording saved as stack");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_frame_round_trips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.tif");
        let pixels: Vec<u16> = (0..12u16).map(|v| (v + 1) << 4).collect();
        let frame = Frame::new(pixels.clone(), 4, 3, 1);

        save_frame(&frame, &path).unwrap();

        let loaded = image::open(&path).unwrap().into_luma16();
        assert_eq!(loaded.dimensions(), (4, 3));
        assert_eq!(loaded.into_raw(), pixels);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let frame = Frame::new(vec![1; 4], 2, 2, 1);
        assert!(matches!(
            save_frame(&frame, "frame.jpg"),
            Err(ExportError::UnsupportedExtension(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(matches!(
            to_image(vec![1; 3], 2, 2),
            Err(ExportError::Shape { width: 2, height: 2 })
        ));
    }

    #[test]
    fn test_save_recording_writes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let recording = Recording::new(3, 2, 2);
        let paths = save_recording(&recording, dir.path().join("run"), "dmk", "png").unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(paths[2].ends_with("dmk_0002.png"));
    }

    #[test]
    fn test_save_stack_writes_one_page_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let mut recording = Recording::new(3, 4, 2);
        for index in 0..3 {
            recording.frame_mut(index).unwrap().fill((index as u16 + 1) * 100);
        }

        save_stack(&recording, &path).unwrap();

        let file = std::io::BufReader::new(File::open(&path).unwrap());
        let mut decoder = tiff::decoder::Decoder::new(file).unwrap();
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
        assert!(description.starts_with("ImageJ="));
        assert!(description.contains("images=3"));

        let mut pages = Vec::new();
        loop {
            assert_eq!(decoder.dimensions().unwrap(), (4, 2));
            match decoder.read_image().unwrap() {
                tiff::decoder::DecodingResult::U16(samples) => pages.push(samples),
                other => panic!("expected 16-bit samples, got {other:?}"),
            }
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().unwrap();
        }
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2], vec![300; 8]);
    }

    #[test]
    fn test_save_stack_needs_tiff_extension() {
        let dir = tempfile::tempdir().unwrap();
        let recording = Recording::new(2, 2, 2);
        assert!(matches!(
            save_stack(&recording, dir.path().join("stack.png")),
            Err(ExportError::UnsupportedExtension(_))
        ));
    }
}
