//! TIS Camera Library
//!
//! Acquisition from The Imaging Source USB3 monochrome cameras (DMK 33UJ003)
//! through the vendor's `tisgrabber` library. Frames come back as 16-bit
//! grayscale in the sensor's native resolution.
//!
//! # Architecture
//!
//! ```text
//! driver (vendor calls) → capture::Camera (session) → Frame / Recording
//!                                  ↓                        ↓
//!                               metrics                   export
//! ```
//!
//! # Design Principles
//!
//! - **One session per device**: a camera can be open only once per process
//! - **Read back every setting**: values the vendor library silently ignores
//!   surface as errors
//! - **Supported settings only**: Y16 at resolutions known to stream,
//!   exposure capped at 1.6 s
//! - **Hardware optional**: the simulated driver behaves like the camera
//!
//! # Example
//!
//! ```no_run
//! use tis_camera::{
//!     capture::{AcquisitionConfig, Camera, DeviceSelector, FrameTimeout},
//!     driver::SimulatedDriver,
//! };
//!
//! let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
//! camera
//!     .configure(&AcquisitionConfig::new().with_exposure_us(10_000).with_resolution(1280, 960))
//!     .unwrap();
//!
//! camera.start().unwrap();
//! let frame = camera.get_frame(FrameTimeout::default()).unwrap();
//! assert_eq!(frame.pixels().len(), 1280 * 960);
//! camera.stop().unwrap();
//!
//! let recording = camera.record(10).unwrap();
//! assert_eq!(recording.shape(), (10, 960, 1280));
//! camera.close().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod driver;
pub mod export;
pub mod metrics;

// Re-export commonly used types at crate root
pub use capture::{
    AcquisitionConfig, Camera, CameraError, DeviceSelector, Frame, FrameTimeout, Recording,
    SessionState, TriggerMode,
};
pub use driver::{GrabberDriver, SimulatedDriver};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
