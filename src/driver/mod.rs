//! Vendor library boundary.
//!
//! The Imaging Source ships camera control as a closed `tisgrabber` DLL pair.
//! [`GrabberDriver`] mirrors the subset of its C interface used by the
//! [`Camera`](crate::capture::Camera) facade, one method per vendor call.
//! Implementations translate the vendor's integer return codes into
//! [`DriverError`] and nothing more: no retries, no validation.

mod simulated;

#[cfg(feature = "native")]
mod native;

pub use simulated::{SimGrabber, SimulatedDevice, SimulatedDriver, SimulatedTrigger};

#[cfg(feature = "native")]
pub use native::{NativeGrabber, TisGrabber, DEFAULT_LIBRARY};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Return code of a successful vendor call.
pub const IC_SUCCESS: i32 = 1;
/// Generic failure. `IC_SnapImage` returns this when no frame arrived in time.
pub const IC_ERROR: i32 = 0;
/// The grabber has no device attached.
pub const IC_NO_DEVICE: i32 = -2;
/// Requested feature is not available on the device.
pub const IC_NOT_AVAILABLE: i32 = -3;
/// Index outside the vendor's list.
pub const IC_INDEX_OUT_OF_RANGE: i32 = -7;
/// No device with the requested name.
pub const IC_DEVICE_NOT_FOUND: i32 = -11;

/// Errors reported across the vendor boundary.
#[derive(Debug, Clone, PartialEq, Error)]
#[allow(missing_docs)]
pub enum DriverError {
    /// The library or one of its exports could not be loaded.
    #[error("failed to load vendor library: {0}")]
    Load(String),
    /// A vendor call returned a failure code.
    #[error("{call} failed with vendor code {code}")]
    Call { call: &'static str, code: i32 },
    /// A vendor call returned a null pointer.
    #[error("{call} returned no data")]
    NullResult { call: &'static str },
    /// A setting read back differently from what was written.
    #[error("{setting} read back as {actual} after writing {requested}")]
    Mismatch {
        setting: &'static str,
        requested: String,
        actual: String,
    },
}

impl DriverError {
    /// Returns the vendor return code, if the error came from a call.
    pub fn code(&self) -> Option<i32> {
        match self {
            DriverError::Call { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result of a vendor call.
pub type DriverResult<T> = Result<T, DriverError>;

/// Converts a vendor return code into a result.
pub fn check(call: &'static str, code: i32) -> DriverResult<()> {
    if code == IC_SUCCESS {
        Ok(())
    } else {
        Err(DriverError::Call { call, code })
    }
}

/// Converts the return code of a yes/no query such as
/// `IC_IsTriggerAvailable`. Only "no" answers map to `false`.
pub fn availability(call: &'static str, code: i32) -> DriverResult<bool> {
    match code {
        IC_SUCCESS => Ok(true),
        IC_ERROR | IC_NOT_AVAILABLE => Ok(false),
        code => Err(DriverError::Call { call, code }),
    }
}

/// Camera (device-level) property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraProperty {
    /// Exposure time.
    Exposure,
}

impl CameraProperty {
    /// Vendor property index.
    pub fn id(self) -> i32 {
        match self {
            CameraProperty::Exposure => 4,
        }
    }
}

/// Video (image-processing) property identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoProperty {
    /// Analog gain.
    Gain,
}

impl VideoProperty {
    /// Vendor property index.
    pub fn id(self) -> u32 {
        match self {
            VideoProperty::Gain => 9,
        }
    }
}

/// Sink color formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ColorFormat {
    Y800,
    Rgb24,
    Rgb32,
    Uyvy,
    Y16,
}

impl ColorFormat {
    /// Vendor color format index.
    pub fn id(self) -> i32 {
        match self {
            ColorFormat::Y800 => 0,
            ColorFormat::Rgb24 => 1,
            ColorFormat::Rgb32 => 2,
            ColorFormat::Uyvy => 3,
            ColorFormat::Y16 => 4,
        }
    }

    /// Maps a vendor color format index back to a format.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(ColorFormat::Y800),
            1 => Some(ColorFormat::Rgb24),
            2 => Some(ColorFormat::Rgb32),
            3 => Some(ColorFormat::Uyvy),
            4 => Some(ColorFormat::Y16),
            _ => None,
        }
    }
}

/// How long `snap_image` may wait for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapTimeout {
    /// Block until a frame arrives.
    Infinite,
    /// Give up after this long.
    After(Duration),
}

impl SnapTimeout {
    /// Vendor encoding: milliseconds, or `-1` to block indefinitely.
    pub fn as_millis(self) -> i32 {
        match self {
            SnapTimeout::Infinite => -1,
            SnapTimeout::After(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
        }
    }
}

/// Properties of the current video format and sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescription {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bits per pixel of the sink format.
    pub bits_per_pixel: u32,
    /// Raw sink color format index.
    pub color_format: i32,
}

impl ImageDescription {
    /// Bytes in one vendor image buffer.
    pub fn buffer_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.bits_per_pixel as usize).div_ceil(8)
    }
}

/// Checks that the current vendor image is Y16 and holds at least
/// `samples` samples before it is copied out.
pub fn check_copy(description: &ImageDescription, samples: usize) -> DriverResult<()> {
    if description.color_format != ColorFormat::Y16.id() {
        return Err(DriverError::Mismatch {
            setting: "sink color format",
            requested: ColorFormat::Y16.id().to_string(),
            actual: description.color_format.to_string(),
        });
    }
    let needed = samples.saturating_mul(2);
    if description.buffer_len() < needed {
        return Err(DriverError::Mismatch {
            setting: "image buffer (bytes)",
            requested: needed.to_string(),
            actual: description.buffer_len().to_string(),
        });
    }
    Ok(())
}

/// The vendor library's function-call interface.
///
/// Every method maps to one `IC_*` call. Methods take `&mut self` because
/// the vendor library is not documented as thread-safe; callers serialize
/// access by owning the driver.
pub trait GrabberDriver {
    /// Opaque per-device handle (`HGRABBER`).
    type Grabber: Copy + fmt::Debug;

    /// `IC_InitLibrary`.
    fn init(&mut self) -> DriverResult<()>;
    /// `IC_GetDeviceCount`.
    fn device_count(&mut self) -> DriverResult<usize>;
    /// `IC_GetUniqueNamefromList`.
    fn unique_name(&mut self, index: usize) -> DriverResult<String>;

    /// `IC_CreateGrabber`.
    fn create_grabber(&mut self) -> DriverResult<Self::Grabber>;
    /// `IC_ReleaseGrabber`. The handle is invalid afterwards.
    fn release_grabber(&mut self, grabber: Self::Grabber);
    /// `IC_OpenDevByUniqueName`.
    fn open_by_unique_name(&mut self, grabber: Self::Grabber, name: &str) -> DriverResult<()>;
    /// `IC_IsDevValid`.
    fn validate_device(&mut self, grabber: Self::Grabber) -> DriverResult<()>;

    /// `IC_StartLive`, without a display window.
    fn start_live(&mut self, grabber: Self::Grabber) -> DriverResult<()>;
    /// `IC_StopLive`.
    fn stop_live(&mut self, grabber: Self::Grabber);
    /// `IC_RemoveOverlay`.
    fn remove_overlay(&mut self, grabber: Self::Grabber, remove: bool) -> DriverResult<()>;

    /// `IC_GetFormat`: raw sink color format index.
    fn color_format(&mut self, grabber: Self::Grabber) -> DriverResult<i32>;
    /// `IC_SetFormat`.
    fn set_color_format(&mut self, grabber: Self::Grabber, format: ColorFormat) -> DriverResult<()>;

    /// `IC_GetAutoCameraProperty`.
    fn auto_camera_property(&mut self, grabber: Self::Grabber, property: CameraProperty) -> DriverResult<bool>;
    /// `IC_EnableAutoCameraProperty`.
    fn set_auto_camera_property(
        &mut self,
        grabber: Self::Grabber,
        property: CameraProperty,
        enable: bool,
    ) -> DriverResult<()>;

    /// `IC_GetExpAbsValRange`, in seconds.
    fn exposure_range(&mut self, grabber: Self::Grabber) -> DriverResult<(f32, f32)>;
    /// `IC_GetExpAbsVal`, in seconds.
    fn exposure(&mut self, grabber: Self::Grabber) -> DriverResult<f32>;
    /// `IC_SetExpAbsVal`, in seconds.
    fn set_exposure(&mut self, grabber: Self::Grabber, seconds: f32) -> DriverResult<()>;

    /// `IC_GetAutoVideoProperty`.
    fn auto_video_property(&mut self, grabber: Self::Grabber, property: VideoProperty) -> DriverResult<bool>;
    /// `IC_EnableAutoVideoProperty`.
    fn set_auto_video_property(
        &mut self,
        grabber: Self::Grabber,
        property: VideoProperty,
        enable: bool,
    ) -> DriverResult<()>;
    /// `IC_VideoPropertyGetRange`.
    fn video_property_range(&mut self, grabber: Self::Grabber, property: VideoProperty) -> DriverResult<(i32, i32)>;
    /// `IC_GetVideoProperty`.
    fn video_property(&mut self, grabber: Self::Grabber, property: VideoProperty) -> DriverResult<i32>;
    /// `IC_SetVideoProperty`.
    fn set_video_property(
        &mut self,
        grabber: Self::Grabber,
        property: VideoProperty,
        value: i32,
    ) -> DriverResult<()>;

    /// `IC_GetVideoFormatCount`.
    fn video_format_count(&mut self, grabber: Self::Grabber) -> DriverResult<usize>;
    /// `IC_GetVideoFormat`.
    fn video_format(&mut self, grabber: Self::Grabber, index: usize) -> DriverResult<String>;
    /// `IC_SetVideoFormat`.
    fn set_video_format(&mut self, grabber: Self::Grabber, format: &str) -> DriverResult<()>;
    /// `IC_GetImageDescription`.
    fn image_description(&mut self, grabber: Self::Grabber) -> DriverResult<ImageDescription>;

    /// `IC_IsTriggerAvailable`.
    fn trigger_available(&mut self, grabber: Self::Grabber) -> DriverResult<bool>;
    /// `IC_EnableTrigger`.
    fn enable_trigger(&mut self, grabber: Self::Grabber, enable: bool) -> DriverResult<()>;
    /// `IC_SoftwareTrigger`.
    fn software_trigger(&mut self, grabber: Self::Grabber) -> DriverResult<()>;

    /// `IC_SnapImage`: waits for the next frame and latches it into the
    /// vendor-owned image buffer.
    fn snap_image(&mut self, grabber: Self::Grabber, timeout: SnapTimeout) -> DriverResult<()>;
    /// `IC_GetImagePtr`: copies the latched Y16 buffer into `dst`.
    ///
    /// `dst` must hold exactly `width * height` samples of the current
    /// image description.
    fn copy_image(&mut self, grabber: Self::Grabber, dst: &mut [u16]) -> DriverResult<()>;
}
