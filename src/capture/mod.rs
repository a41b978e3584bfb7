//! Camera sessions and frame handling.
//!
//! This module wraps the vendor driver in a session object that enforces
//! the open → configure → start → fetch → stop → close lifecycle and the
//! DMK 33UJ003's supported settings. Frames are copied out of the vendor
//! buffer, so they stay valid after the next snap.

mod camera;
mod claim;
mod config;
mod frame;

pub use camera::{
    list_devices, model_of, AcquisitionStats, Camera, CameraError, Limits, SessionState, Settings,
    DEFAULT_MODEL, MAX_RELIABLE_EXPOSURE_US,
};
pub use config::{
    AcquisitionConfig, ConfigError, DeviceConfig, DeviceSelector, DriverConfig, DriverKind,
    FileConfig, FrameTimeout, OutputConfig, PixelFormat, Resolution, TriggerMode, VideoFormat,
    SUPPORTED_RESOLUTIONS,
};
pub use frame::{Frame, Recording};
