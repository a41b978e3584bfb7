//! Prometheus metrics exporter for acquisition monitoring.
//!
//! Exposes a session's counters and applied settings in Prometheus format,
//! optionally over HTTP (feature `metrics`).
//!
//! # Metrics Exposed
//!
//! ## Session
//! - `tis_camera_live` - Acquisition running (1=live, 0=stopped)
//! - `tis_camera_exposure_us` - Applied exposure time
//! - `tis_camera_gain` - Applied gain
//! - `tis_camera_frame_width` / `tis_camera_frame_height` - Frame size
//!
//! ## Acquisition
//! - `tis_camera_frames_total` - Frames delivered
//! - `tis_camera_timeouts_total` - Snaps that timed out
//! - `tis_camera_driver_errors_total` - Failed vendor calls
//! - `tis_camera_blank_frames_total` - Frames containing a zero sample
//! - `tis_camera_last_latency_seconds` - Fetch time of the last frame beyond its exposure
//!
//! # Example
//!
//! ```no_run
//! use tis_camera::capture::{Camera, DeviceSelector};
//! use tis_camera::driver::SimulatedDriver;
//! use tis_camera::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0))
//!     .expect("Failed to open camera");
//!
//! registry.update(&MetricsSnapshot::from_camera(&camera));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
