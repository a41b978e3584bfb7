//! Camera session facade.
//!
//! [`Camera`] is the open device handle: it owns the vendor driver and
//! grabber, tracks whether acquisition is live, and turns the driver's
//! integer return codes into [`CameraError`]. Every setting written to the
//! device is read back and compared, because the vendor library accepts
//! some values it then silently ignores.

use super::claim::DeviceClaim;
use super::config::{
    AcquisitionConfig, DeviceConfig, DeviceSelector, FrameTimeout, PixelFormat, Resolution,
    TriggerMode, VideoFormat,
};
use super::frame::{Frame, Recording};
use crate::driver::{
    CameraProperty, ColorFormat, DriverError, DriverResult, GrabberDriver, ImageDescription,
    SnapTimeout, VideoProperty, IC_ERROR,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Camera model this adaptor is written for.
pub const DEFAULT_MODEL: &str = "DMK 33UJ003";

/// Longest exposure the DMK 33UJ003 handles reliably.
pub const MAX_RELIABLE_EXPOSURE_US: u32 = 1_600_000;

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No attached device matches the selector or expected model.
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    /// The vendor library rejected a call or ignored a setting.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    /// The requested value is outside what the camera supports.
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),
    /// The call is not allowed in the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// No frame arrived within the timeout.
    #[error("timed out waiting for a frame (vendor timeout {} ms)", .0.as_millis())]
    Timeout(SnapTimeout),
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, not acquiring.
    Idle,
    /// Acquisition running; frames can be fetched.
    Live,
    /// Released; every further call fails.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Live => "live",
            SessionState::Closed => "closed",
        })
    }
}

/// Setting ranges reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    /// Shortest exposure time.
    pub min_exposure_us: u32,
    /// Longest exposure time, capped at [`MAX_RELIABLE_EXPOSURE_US`].
    pub max_exposure_us: u32,
    /// Lowest gain in vendor units.
    pub min_gain: i32,
    /// Highest gain in vendor units.
    pub max_gain: i32,
    /// Whether the device has a trigger input.
    pub trigger_available: bool,
}

/// Settings currently applied to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Exposure time in microseconds.
    pub exposure_us: u32,
    /// Gain in vendor units.
    pub gain: i32,
    /// Video format the device streams.
    pub format: VideoFormat,
    /// Trigger mode.
    pub trigger: TriggerMode,
    /// Frame timeout used by recordings.
    pub timeout: FrameTimeout,
}

impl Settings {
    /// Frame size of the current format.
    pub fn resolution(&self) -> Resolution {
        self.format.resolution
    }

    /// Exposure time as a duration.
    pub fn exposure(&self) -> Duration {
        Duration::from_micros(u64::from(self.exposure_us))
    }
}

/// Running acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Frames delivered.
    pub frames: u64,
    /// Snaps that saw no frame in time.
    pub timeouts: u64,
    /// Vendor calls that failed for other reasons.
    pub driver_errors: u64,
    /// Delivered frames containing a zero sample.
    pub blank_frames: u64,
    /// Time to fetch the last frame, minus its exposure.
    pub last_latency: Option<Duration>,
}

/// An open session on one camera.
///
/// Dropping an open session stops acquisition and releases the device,
/// but [`Camera::close`] reports errors and makes a second close an error.
pub struct Camera<D: GrabberDriver> {
    driver: D,
    grabber: D::Grabber,
    device_name: String,
    state: SessionState,
    limits: Limits,
    formats: Vec<VideoFormat>,
    settings: Settings,
    description: Option<ImageDescription>,
    // Set when a format change failed after the device accepted the new
    // format; acquisition is refused until a format is applied again.
    format_pending: bool,
    stats: AcquisitionStats,
    sequence: u64,
    claim: Option<DeviceClaim>,
}

/// Lists the unique names of all attached devices.
pub fn list_devices<D: GrabberDriver>(driver: &mut D) -> Result<Vec<String>, CameraError> {
    driver.init()?;
    let count = driver.device_count()?;
    let names = (0..count)
        .map(|i| driver.unique_name(i))
        .collect::<DriverResult<Vec<_>>>()?;
    tracing::debug!(count, "Enumerated devices");
    Ok(names)
}

/// Model part of a unique name: its first two words.
pub fn model_of(unique_name: &str) -> String {
    unique_name
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

fn seconds_to_us(seconds: f32) -> u32 {
    (f64::from(seconds) * 1e6).round().max(0.0) as u32
}

fn us_to_seconds(us: u32) -> f32 {
    (f64::from(us) * 1e-6) as f32
}

impl<D: GrabberDriver> Camera<D> {
    /// Opens the selected device with the default model check.
    pub fn open(driver: D, selector: DeviceSelector) -> Result<Self, CameraError> {
        Self::open_with(driver, &DeviceConfig::with_selector(selector))
    }

    /// Opens a device and applies the default settings: minimum exposure,
    /// maximum gain, the largest supported format, software trigger (when
    /// available) and a one second timeout.
    pub fn open_with(mut driver: D, device: &DeviceConfig) -> Result<Self, CameraError> {
        let names = list_devices(&mut driver)?;
        if names.is_empty() {
            return Err(CameraError::DeviceNotFound("no devices attached".into()));
        }

        let name = match &device.selector {
            DeviceSelector::Index(i) => names.get(*i).cloned().ok_or_else(|| {
                CameraError::DeviceNotFound(format!(
                    "device #{i} requested, {} attached",
                    names.len()
                ))
            })?,
            DeviceSelector::UniqueName(wanted) => names
                .iter()
                .find(|n| *n == wanted)
                .cloned()
                .ok_or_else(|| CameraError::DeviceNotFound(format!("no device named '{wanted}'")))?,
        };

        let model = model_of(&name);
        tracing::info!(device = %name, model = %model, "Found camera");
        if let Some(expected) = &device.expected_model {
            if &model != expected {
                return Err(CameraError::DeviceNotFound(format!(
                    "'{name}' is a {model}, expected {expected}"
                )));
            }
        }

        let claim = DeviceClaim::acquire(&name)
            .ok_or_else(|| CameraError::InvalidState(format!("'{name}' is already open")))?;
        let grabber = driver.create_grabber()?;

        let mut camera = Self {
            driver,
            grabber,
            device_name: name,
            state: SessionState::Idle,
            limits: Limits::default(),
            formats: Vec::new(),
            settings: Settings {
                exposure_us: 0,
                gain: 0,
                format: VideoFormat::y16(0, 0),
                trigger: TriggerMode::Free,
                timeout: FrameTimeout::default(),
            },
            description: None,
            format_pending: false,
            stats: AcquisitionStats::default(),
            sequence: 0,
            claim: Some(claim),
        };
        // On error the session drops here, releasing grabber and claim.
        camera.attach()?;

        tracing::info!(
            device = %camera.device_name,
            format = %camera.settings.format,
            exposure_us = camera.settings.exposure_us,
            gain = camera.settings.gain,
            "Camera opened"
        );
        Ok(camera)
    }

    fn attach(&mut self) -> Result<(), CameraError> {
        let g = self.grabber;
        self.driver.open_by_unique_name(g, &self.device_name)?;
        self.driver.validate_device(g)?;

        self.formats = self.enumerate_formats()?;
        let largest = self
            .formats
            .last()
            .copied()
            .ok_or_else(|| CameraError::UnsupportedOption("device reports no supported Y16 format".into()))?;

        self.driver.set_auto_camera_property(g, CameraProperty::Exposure, false)?;
        verify(
            "auto exposure",
            false,
            self.driver.auto_camera_property(g, CameraProperty::Exposure)?,
        )?;
        let (min_s, max_s) = self.driver.exposure_range(g)?;

        self.driver.set_auto_video_property(g, VideoProperty::Gain, false)?;
        verify(
            "auto gain",
            false,
            self.driver.auto_video_property(g, VideoProperty::Gain)?,
        )?;
        let (min_gain, max_gain) = self.driver.video_property_range(g, VideoProperty::Gain)?;

        self.limits = Limits {
            min_exposure_us: seconds_to_us(min_s),
            max_exposure_us: seconds_to_us(max_s).min(MAX_RELIABLE_EXPOSURE_US),
            min_gain,
            max_gain,
            trigger_available: self.driver.trigger_available(g)?,
        };
        self.settings.exposure_us = seconds_to_us(self.driver.exposure(g)?);
        self.settings.gain = self.driver.video_property(g, VideoProperty::Gain)?;
        tracing::debug!(limits = ?self.limits, formats = self.formats.len(), "Device limits");

        let trigger = if self.limits.trigger_available {
            TriggerMode::Software
        } else {
            TriggerMode::Free
        };
        let defaults = AcquisitionConfig::new()
            .with_exposure_us(self.limits.min_exposure_us)
            .with_gain(self.limits.max_gain)
            .with_video_format(largest)
            .with_trigger(trigger)
            .with_timeout(FrameTimeout::default());
        self.configure(&defaults)
    }

    fn enumerate_formats(&mut self) -> Result<Vec<VideoFormat>, CameraError> {
        let count = self.driver.video_format_count(self.grabber)?;
        let mut formats = Vec::new();
        for index in 0..count {
            let name = self.driver.video_format(self.grabber, index)?;
            match name.parse::<VideoFormat>() {
                Ok(format) if format.is_supported() && !formats.contains(&format) => {
                    formats.push(format)
                }
                _ => tracing::trace!(format = %name, "Skipping video format"),
            }
        }
        formats.sort_by_key(|f| (f.resolution.pixel_count(), f.resolution));
        Ok(formats)
    }

    fn ensure_open(&self, operation: &str) -> Result<(), CameraError> {
        if self.state == SessionState::Closed {
            return Err(CameraError::InvalidState(format!(
                "cannot {operation}: session is closed"
            )));
        }
        Ok(())
    }

    fn track<T>(&mut self, result: DriverResult<T>) -> Result<T, CameraError> {
        result.map_err(|e| {
            self.stats.driver_errors += 1;
            CameraError::Driver(e)
        })
    }

    /// Checks every option before any is written, so a rejected
    /// configuration leaves the device untouched.
    fn validate(&self, options: &AcquisitionConfig) -> Result<Option<VideoFormat>, CameraError> {
        let limits = &self.limits;
        if let Some(us) = options.exposure_us {
            if !(limits.min_exposure_us..=limits.max_exposure_us).contains(&us) {
                return Err(CameraError::UnsupportedOption(format!(
                    "exposure {us} us outside {}..={} us",
                    limits.min_exposure_us, limits.max_exposure_us
                )));
            }
        }
        if let Some(gain) = options.gain {
            if !(limits.min_gain..=limits.max_gain).contains(&gain) {
                return Err(CameraError::UnsupportedOption(format!(
                    "gain {gain} outside {}..={}",
                    limits.min_gain, limits.max_gain
                )));
            }
        }
        if let Some(trigger) = options.trigger {
            if trigger.trigger_enabled() && !limits.trigger_available {
                return Err(CameraError::UnsupportedOption(format!(
                    "{trigger} trigger: device has no trigger input"
                )));
            }
        }
        if let Some(FrameTimeout::Millis(0)) = options.timeout {
            return Err(CameraError::UnsupportedOption("timeout of 0 ms".into()));
        }

        if !options.changes_format() {
            return Ok(None);
        }
        let format = VideoFormat {
            pixel_format: options.pixel_format.unwrap_or(PixelFormat::Y16),
            resolution: options.resolution.unwrap_or(self.settings.format.resolution),
        };
        if format.pixel_format != PixelFormat::Y16 {
            return Err(CameraError::UnsupportedOption(format!(
                "pixel format {}: only Y16 is supported",
                format.pixel_format
            )));
        }
        if !self.formats.contains(&format) {
            return Err(CameraError::UnsupportedOption(format!(
                "video format {format} not supported by {}",
                self.device_name
            )));
        }
        if self.state == SessionState::Live {
            return Err(CameraError::InvalidState(format!(
                "cannot change video format to {format} while live"
            )));
        }
        Ok(Some(format))
    }

    /// Applies a configuration. Unset options are left unchanged.
    pub fn configure(&mut self, options: &AcquisitionConfig) -> Result<(), CameraError> {
        self.ensure_open("configure")?;
        let format = self.validate(options)?;

        if let Some(us) = options.exposure_us {
            self.apply_exposure(us)?;
        }
        if let Some(gain) = options.gain {
            self.apply_gain(gain)?;
        }
        if let Some(format) = format {
            self.apply_format(format)?;
        }
        if let Some(trigger) = options.trigger {
            self.apply_trigger(trigger)?;
        }
        if let Some(timeout) = options.timeout {
            tracing::debug!(?timeout, "Setting frame timeout");
            self.settings.timeout = timeout;
        }
        Ok(())
    }

    fn apply_exposure(&mut self, us: u32) -> Result<(), CameraError> {
        tracing::debug!(exposure_us = us, "Setting exposure");
        let g = self.grabber;
        let result = self.driver.set_exposure(g, us_to_seconds(us));
        self.track(result)?;
        let result = self.driver.exposure(g);
        let actual = seconds_to_us(self.track(result)?);
        verify("exposure (us)", us, actual)?;
        self.settings.exposure_us = us;
        Ok(())
    }

    fn apply_gain(&mut self, gain: i32) -> Result<(), CameraError> {
        tracing::debug!(gain, "Setting gain");
        let g = self.grabber;
        let result = self.driver.set_video_property(g, VideoProperty::Gain, gain);
        self.track(result)?;
        let result = self.driver.video_property(g, VideoProperty::Gain);
        verify("gain", gain, self.track(result)?)?;
        self.settings.gain = gain;
        Ok(())
    }

    fn apply_format(&mut self, format: VideoFormat) -> Result<(), CameraError> {
        tracing::debug!(%format, "Setting video format");
        let result = self.driver.set_video_format(self.grabber, &format.to_string());
        self.track(result)?;

        match self.finish_format(format) {
            Ok(description) => {
                tracing::trace!(?description, "Image description");
                self.description = Some(description);
                self.settings.format = format;
                self.format_pending = false;
                Ok(())
            }
            Err(e) => {
                self.resync_format();
                Err(e)
            }
        }
    }

    /// Sink setup after the device accepted `format`.
    fn finish_format(&mut self, format: VideoFormat) -> Result<ImageDescription, CameraError> {
        let g = self.grabber;
        // Y16 needs the overlay bitmap removed.
        let result = self.driver.remove_overlay(g, true);
        self.track(result)?;
        let result = self.driver.set_color_format(g, ColorFormat::Y16);
        self.track(result)?;
        // The sink only registers a new color format after a live cycle.
        let result = self.driver.start_live(g);
        self.track(result)?;
        self.driver.stop_live(g);
        let result = self.driver.color_format(g);
        verify("sink color format", ColorFormat::Y16.id(), self.track(result)?)?;

        let result = self.driver.image_description(g);
        let description = self.track(result)?;
        verify(
            "image size",
            format.resolution,
            Resolution::new(description.width, description.height),
        )?;
        Ok(description)
    }

    /// Takes the format the device now reports after a failed change.
    fn resync_format(&mut self) {
        self.format_pending = true;
        match self.driver.image_description(self.grabber) {
            Ok(description) => {
                if let Some(pixel_format) = pixel_format_of(description.color_format) {
                    self.settings.format.pixel_format = pixel_format;
                }
                self.settings.format.resolution = Resolution::new(description.width, description.height);
                self.description = Some(description);
            }
            Err(e) => {
                self.stats.driver_errors += 1;
                tracing::debug!(error = %e, "Image description unavailable");
                self.description = None;
            }
        }
        tracing::warn!(
            device_reports = %self.settings.format,
            "Video format change failed; apply a format before starting acquisition"
        );
    }

    fn apply_trigger(&mut self, trigger: TriggerMode) -> Result<(), CameraError> {
        tracing::debug!(%trigger, "Setting trigger mode");
        if self.limits.trigger_available {
            let result = self.driver.enable_trigger(self.grabber, trigger.trigger_enabled());
            self.track(result)?;
        }
        self.settings.trigger = trigger;
        Ok(())
    }

    /// Starts acquisition.
    pub fn start(&mut self) -> Result<(), CameraError> {
        match self.state {
            SessionState::Idle => {}
            state => {
                return Err(CameraError::InvalidState(format!(
                    "cannot start acquisition: session is {state}"
                )))
            }
        }
        if self.format_pending {
            return Err(CameraError::InvalidState(format!(
                "cannot start acquisition: last video format change failed, device reports {}",
                self.settings.format
            )));
        }
        let result = self.driver.start_live(self.grabber);
        self.track(result)?;
        self.state = SessionState::Live;
        tracing::info!(device = %self.device_name, "Acquisition started");
        Ok(())
    }

    /// Stops acquisition.
    pub fn stop(&mut self) -> Result<(), CameraError> {
        match self.state {
            SessionState::Live => {}
            state => {
                return Err(CameraError::InvalidState(format!(
                    "cannot stop acquisition: session is {state}"
                )))
            }
        }
        self.driver.stop_live(self.grabber);
        self.state = SessionState::Idle;
        tracing::info!(device = %self.device_name, "Acquisition stopped");
        Ok(())
    }

    /// Vendor snap timeout: the frame timeout plus the exposure time.
    fn snap_timeout(&self, timeout: FrameTimeout) -> SnapTimeout {
        match timeout.as_duration() {
            None => SnapTimeout::Infinite,
            Some(wait) => SnapTimeout::After(wait + self.settings.exposure()),
        }
    }

    /// Snaps one frame straight into `dst`.
    fn acquire_into(&mut self, timeout: FrameTimeout, dst: &mut [u16]) -> Result<DateTime<Utc>, CameraError> {
        if self.state != SessionState::Live {
            return Err(CameraError::InvalidState(format!(
                "cannot fetch a frame: session is {}",
                self.state
            )));
        }
        let expected = self.description.map(|d| (d.width as usize) * (d.height as usize));
        if self.format_pending || expected != Some(dst.len()) {
            return Err(CameraError::InvalidState(format!(
                "cannot fetch a frame: buffer of {} samples does not match the device format {}",
                dst.len(),
                self.settings.format
            )));
        }
        let g = self.grabber;
        let started = Instant::now();

        if self.settings.trigger == TriggerMode::Software {
            let result = self.driver.software_trigger(g);
            self.track(result)?;
        }

        let snap_timeout = self.snap_timeout(timeout);
        match self.driver.snap_image(g, snap_timeout) {
            Ok(()) => {}
            Err(DriverError::Call { code: IC_ERROR, .. }) => {
                self.stats.timeouts += 1;
                tracing::warn!(
                    timeout_ms = snap_timeout.as_millis(),
                    trigger = %self.settings.trigger,
                    "No frame before timeout"
                );
                return Err(CameraError::Timeout(snap_timeout));
            }
            Err(e) => return self.track(Err(e)),
        }

        let result = self.driver.copy_image(g, dst);
        self.track(result)?;

        let latency = started.elapsed().saturating_sub(self.settings.exposure());
        self.stats.frames += 1;
        self.stats.last_latency = Some(latency);
        if dst.contains(&0) {
            self.stats.blank_frames += 1;
            tracing::debug!(frame = self.stats.frames, "Blank frame received");
        }
        Ok(Utc::now())
    }

    /// Fetches the next frame, blocking until it arrives or `timeout`
    /// (plus the exposure time) elapses.
    pub fn get_frame(&mut self, timeout: impl Into<FrameTimeout>) -> Result<Frame, CameraError> {
        let resolution = self.settings.resolution();
        let mut pixels = vec![0u16; resolution.pixel_count()];
        let timestamp = self.acquire_into(timeout.into(), &mut pixels)?;
        self.sequence += 1;
        let frame = Frame::new(pixels, resolution.width, resolution.height, self.sequence)
            .with_exposure_us(self.settings.exposure_us)
            .with_timestamp(timestamp);
        tracing::trace!(
            sequence = frame.sequence(),
            latency_us = self.stats.last_latency.map(|d| d.as_micros() as u64),
            "Frame acquired"
        );
        Ok(frame)
    }

    /// Records `count` frames with the configured timeout.
    pub fn record(&mut self, count: usize) -> Result<Recording, CameraError> {
        if count == 0 {
            return Err(CameraError::UnsupportedOption("recording of 0 frames".into()));
        }
        let resolution = self.settings.resolution();
        let mut recording = Recording::new(count, resolution.width, resolution.height);
        self.record_into(&mut recording)?;
        Ok(recording)
    }

    /// Fills a preallocated recording, whose shape must match the current
    /// format.
    ///
    /// Acquisition is started if needed and the session is returned to the
    /// state it was in, also when a frame fails.
    pub fn record_into(&mut self, recording: &mut Recording) -> Result<(), CameraError> {
        self.ensure_open("record")?;
        let resolution = self.settings.resolution();
        let expected = (recording.frame_count(), resolution.height, resolution.width);
        if recording.frame_count() == 0 || recording.shape() != expected {
            return Err(CameraError::UnsupportedOption(format!(
                "recording shape {:?} does not match (n, {}, {})",
                recording.shape(),
                resolution.height,
                resolution.width
            )));
        }

        tracing::info!(frames = recording.frame_count(), format = %self.settings.format, "Recording");
        let was_live = self.state == SessionState::Live;
        if !was_live {
            self.start()?;
        }

        let timeout = self.settings.timeout;
        let mut result = Ok(());
        for index in 0..recording.frame_count() {
            let Some(dst) = recording.frame_mut(index) else {
                break;
            };
            match self.acquire_into(timeout, dst) {
                Ok(timestamp) => {
                    self.sequence += 1;
                    recording.set_timestamp(index, timestamp);
                }
                Err(e) => {
                    tracing::warn!(frame = index, error = %e, "Recording aborted");
                    result = Err(e);
                    break;
                }
            }
        }

        if !was_live {
            self.stop()?;
        }
        result
    }

    /// Releases the device. A second close is an error.
    pub fn close(&mut self) -> Result<(), CameraError> {
        match self.state {
            SessionState::Closed => {
                return Err(CameraError::InvalidState(
                    "cannot close: session is already closed".into(),
                ))
            }
            SessionState::Live => self.driver.stop_live(self.grabber),
            SessionState::Idle => {}
        }
        self.driver.release_grabber(self.grabber);
        self.state = SessionState::Closed;
        drop(self.claim.take());
        tracing::info!(device = %self.device_name, frames = self.stats.frames, "Camera closed");
        Ok(())
    }

    /// Vendor unique name of the device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Model of the device.
    pub fn model(&self) -> String {
        model_of(&self.device_name)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether acquisition is running.
    pub fn is_live(&self) -> bool {
        self.state == SessionState::Live
    }

    /// Setting ranges reported by the device.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Settings currently applied.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Supported formats the device reports, smallest first.
    pub fn supported_formats(&self) -> &[VideoFormat] {
        &self.formats
    }

    /// Vendor description of the current image, once a format is set.
    pub fn description(&self) -> Option<&ImageDescription> {
        self.description.as_ref()
    }

    /// Acquisition counters since open.
    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    /// The underlying driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The underlying driver, for vendor calls the facade does not wrap.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: GrabberDriver> Drop for Camera<D> {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::Live {
            self.driver.stop_live(self.grabber);
        }
        self.driver.release_grabber(self.grabber);
        tracing::debug!(device = %self.device_name, "Camera released on drop");
    }
}

impl<D: GrabberDriver> fmt::Debug for Camera<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("device", &self.device_name)
            .field("state", &self.state)
            .field("settings", &self.settings)
            .finish()
    }
}

fn pixel_format_of(color_format: i32) -> Option<PixelFormat> {
    Some(match ColorFormat::from_id(color_format)? {
        ColorFormat::Y800 => PixelFormat::Y800,
        ColorFormat::Rgb24 => PixelFormat::Rgb24,
        ColorFormat::Rgb32 => PixelFormat::Rgb32,
        ColorFormat::Uyvy => PixelFormat::Uyvy,
        ColorFormat::Y16 => PixelFormat::Y16,
    })
}

fn verify<T: PartialEq + fmt::Display>(setting: &'static str, requested: T, actual: T) -> Result<(), CameraError> {
    if requested == actual {
        Ok(())
    } else {
        Err(CameraError::Driver(DriverError::Mismatch {
            setting,
            requested: requested.to_string(),
            actual: actual.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{
        SimulatedDevice, SimulatedDriver, SimulatedTrigger, IC_NOT_AVAILABLE, IC_NO_DEVICE,
    };
    use proptest::prelude::*;

    fn small() -> AcquisitionConfig {
        AcquisitionConfig::new().with_resolution(640, 480)
    }

    fn open_small() -> Camera<SimulatedDriver> {
        let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
        camera.configure(&small()).unwrap();
        camera
    }

    #[test]
    fn test_open_applies_defaults() {
        let camera = Camera::open(SimulatedDriver::single(), DeviceSelector::default()).unwrap();
        let settings = camera.settings();

        assert_eq!(camera.state(), SessionState::Idle);
        assert_eq!(camera.model(), DEFAULT_MODEL);
        assert_eq!(settings.exposure_us, camera.limits().min_exposure_us);
        assert_eq!(settings.gain, camera.limits().max_gain);
        assert_eq!(settings.format, VideoFormat::y16(3856, 2764));
        assert_eq!(settings.trigger, TriggerMode::Software);
        assert_eq!(settings.timeout, FrameTimeout::Millis(1000));
        assert_eq!(camera.limits().max_exposure_us, MAX_RELIABLE_EXPOSURE_US);
        assert_eq!(camera.supported_formats().len(), 8);
    }

    #[test]
    fn test_open_without_devices_is_not_found() {
        let result = Camera::open(SimulatedDriver::empty(), DeviceSelector::Index(0));
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_unknown_selector_is_not_found() {
        let result = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(3));
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));

        let result = Camera::open(
            SimulatedDriver::single(),
            DeviceSelector::UniqueName("DMK 33UJ003 00000000".into()),
        );
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_wrong_model_is_not_found() {
        let driver = SimulatedDriver::new(vec![SimulatedDevice::with_name("DFK 33UX264 555")]);
        let result = Camera::open(driver, DeviceSelector::Index(0));
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
    }

    #[test]
    fn test_open_driver_failure_releases_grabber() {
        let device = SimulatedDevice::dmk_33uj003();
        let name = device.unique_name.clone();
        let mut driver = SimulatedDriver::new(vec![device]);
        driver.fail_call("IC_IsDevValid", IC_NO_DEVICE);

        let result = Camera::open(driver, DeviceSelector::Index(0));
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Call { code: IC_NO_DEVICE, .. }))
        ));
        assert!(!DeviceClaim::is_claimed(&name));
    }

    #[test]
    fn test_device_open_once_per_process() {
        let device = SimulatedDevice::dmk_33uj003();
        let selector = DeviceSelector::UniqueName(device.unique_name.clone());

        let mut first = Camera::open(SimulatedDriver::new(vec![device.clone()]), selector.clone()).unwrap();
        let second = Camera::open(SimulatedDriver::new(vec![device.clone()]), selector.clone());
        assert!(matches!(second, Err(CameraError::InvalidState(_))));

        first.close().unwrap();
        assert!(Camera::open(SimulatedDriver::new(vec![device]), selector).is_ok());
    }

    #[test]
    fn test_get_frame_before_start_is_invalid_state() {
        let mut camera = open_small();
        assert!(matches!(
            camera.get_frame(FrameTimeout::default()),
            Err(CameraError::InvalidState(_))
        ));
    }

    #[test]
    fn test_close_twice_is_invalid_state() {
        let mut camera = open_small();
        camera.close().unwrap();
        assert_eq!(camera.driver().grabber_count(), 0);
        assert!(matches!(camera.close(), Err(CameraError::InvalidState(_))));
    }

    #[test]
    fn test_calls_after_close_are_invalid_state() {
        let mut camera = open_small();
        camera.close().unwrap();
        assert!(matches!(camera.start(), Err(CameraError::InvalidState(_))));
        assert!(matches!(camera.configure(&small()), Err(CameraError::InvalidState(_))));
        assert!(matches!(camera.record(1), Err(CameraError::InvalidState(_))));
    }

    #[test]
    fn test_start_stop_order() {
        let mut camera = open_small();
        assert!(matches!(camera.stop(), Err(CameraError::InvalidState(_))));

        camera.start().unwrap();
        assert!(camera.is_live());
        assert!(matches!(camera.start(), Err(CameraError::InvalidState(_))));

        camera.stop().unwrap();
        assert_eq!(camera.state(), SessionState::Idle);
    }

    #[test]
    fn test_frame_matches_configured_size() {
        let mut camera = open_small();
        camera.start().unwrap();

        let frame = camera.get_frame(FrameTimeout::default()).unwrap();
        assert_eq!(frame.pixels().len(), 640 * 480);
        assert!(frame.is_valid());
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.exposure_us(), camera.settings().exposure_us);
        assert_eq!(camera.stats().frames, 1);
    }

    #[test]
    fn test_out_of_range_settings_are_unsupported() {
        let mut camera = open_small();
        let max = camera.limits().max_exposure_us;
        let too_long = AcquisitionConfig::new().with_exposure_us(max + 1);
        assert!(matches!(
            camera.configure(&too_long),
            Err(CameraError::UnsupportedOption(_))
        ));

        let low_gain = AcquisitionConfig::new().with_gain(camera.limits().min_gain - 1);
        assert!(matches!(
            camera.configure(&low_gain),
            Err(CameraError::UnsupportedOption(_))
        ));
    }

    #[test]
    fn test_rejected_configuration_changes_nothing() {
        let mut camera = open_small();
        let before = *camera.settings();
        let options = AcquisitionConfig::new()
            .with_exposure_us(5000)
            .with_resolution(320, 240);
        assert!(matches!(
            camera.configure(&options),
            Err(CameraError::UnsupportedOption(_))
        ));
        assert_eq!(*camera.settings(), before);
    }

    #[test]
    fn test_only_y16_is_supported() {
        let mut camera = open_small();
        let options = AcquisitionConfig::new().with_pixel_format(PixelFormat::Y800);
        assert!(matches!(
            camera.configure(&options),
            Err(CameraError::UnsupportedOption(_))
        ));
    }

    #[test]
    fn test_format_change_while_live_is_invalid_state() {
        let mut camera = open_small();
        camera.start().unwrap();
        let options = AcquisitionConfig::new().with_resolution(1024, 768);
        assert!(matches!(
            camera.configure(&options),
            Err(CameraError::InvalidState(_))
        ));

        // Exposure can change while live.
        camera
            .configure(&AcquisitionConfig::new().with_exposure_us(2000))
            .unwrap();
        assert_eq!(camera.settings().exposure_us, 2000);
    }

    #[test]
    fn test_external_trigger_without_pulses_times_out() {
        let mut camera = open_small();
        camera
            .configure(&AcquisitionConfig::new().with_trigger(TriggerMode::External))
            .unwrap();
        camera.start().unwrap();

        let result = camera.get_frame(Duration::from_millis(10));
        assert!(matches!(result, Err(CameraError::Timeout(_))));
        assert_eq!(camera.stats().timeouts, 1);
    }

    #[test]
    fn test_external_trigger_with_pulses() {
        let mut device = SimulatedDevice::dmk_33uj003();
        device.external_trigger = SimulatedTrigger::FreeRunning;
        let mut camera = Camera::open(SimulatedDriver::new(vec![device]), DeviceSelector::Index(0)).unwrap();
        camera
            .configure(&small().with_trigger(TriggerMode::External))
            .unwrap();
        camera.start().unwrap();
        assert!(camera.get_frame(FrameTimeout::Infinite).is_ok());
    }

    #[test]
    fn test_snap_timeout_includes_exposure() {
        let mut camera = open_small();
        camera
            .configure(&AcquisitionConfig::new().with_exposure_us(250_000))
            .unwrap();
        assert_eq!(
            camera.snap_timeout(FrameTimeout::Millis(1000)),
            SnapTimeout::After(Duration::from_millis(1250))
        );
        assert_eq!(camera.snap_timeout(FrameTimeout::Infinite), SnapTimeout::Infinite);
    }

    #[test]
    fn test_record_restores_state() {
        let mut camera = open_small();
        let recording = camera.record(3).unwrap();
        assert_eq!(recording.shape(), (3, 480, 640));
        assert_eq!(recording.blank_frames(), 0);
        assert!(recording.timestamp(2).is_some());
        assert_eq!(camera.state(), SessionState::Idle);

        camera.start().unwrap();
        camera.record(1).unwrap();
        assert!(camera.is_live());
    }

    #[test]
    fn test_record_into_checks_shape() {
        let mut camera = open_small();
        let mut wrong = Recording::new(2, 1024, 768);
        assert!(matches!(
            camera.record_into(&mut wrong),
            Err(CameraError::UnsupportedOption(_))
        ));
        assert!(matches!(camera.record(0), Err(CameraError::UnsupportedOption(_))));

        let mut buffer = Recording::new(2, 640, 480);
        camera.record_into(&mut buffer).unwrap();
        camera.record_into(&mut buffer).unwrap();
        assert_eq!(camera.stats().frames, 4);
    }

    #[test]
    fn test_drop_releases_device() {
        let device = SimulatedDevice::dmk_33uj003();
        let name = device.unique_name.clone();
        {
            let mut camera = Camera::open(SimulatedDriver::new(vec![device]), DeviceSelector::Index(0)).unwrap();
            camera.configure(&small()).unwrap();
            camera.start().unwrap();
            assert!(DeviceClaim::is_claimed(&name));
        }
        assert!(!DeviceClaim::is_claimed(&name));
    }

    #[test]
    fn test_failed_format_change_resyncs_and_blocks_acquisition() {
        let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
        camera.driver_mut().fail_call("IC_SetFormat", IC_ERROR);

        let result = camera.configure(&small());
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Call { call: "IC_SetFormat", .. }))
        ));
        // The device accepted 640x480 before the sink setup failed.
        assert_eq!(camera.settings().resolution(), Resolution::new(640, 480));
        let description = camera.description().unwrap();
        assert_eq!((description.width, description.height), (640, 480));
        assert!(matches!(camera.start(), Err(CameraError::InvalidState(_))));
        assert!(matches!(camera.record(1), Err(CameraError::InvalidState(_))));
        assert_eq!(camera.state(), SessionState::Idle);

        camera.configure(&small()).unwrap();
        camera.start().unwrap();
        let frame = camera.get_frame(FrameTimeout::default()).unwrap();
        assert_eq!(frame.pixels().len(), 640 * 480);
        assert_eq!((frame.width(), frame.height()), (640, 480));
    }

    #[test]
    fn test_rejected_gain_write_is_driver_error() {
        let mut camera = open_small();
        let before = *camera.settings();
        camera.driver_mut().fail_call("IC_SetVideoProperty", IC_ERROR);

        let result = camera.configure(&AcquisitionConfig::new().with_gain(200));
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Call { call: "IC_SetVideoProperty", code: IC_ERROR }))
        ));
        assert_eq!(camera.settings().gain, before.gain);
        assert_eq!(camera.stats().driver_errors, 1);
    }

    #[test]
    fn test_rejected_exposure_write_is_driver_error() {
        let mut camera = open_small();
        let before = *camera.settings();
        camera.driver_mut().fail_call("IC_SetExpAbsVal", IC_ERROR);

        let result = camera.configure(&AcquisitionConfig::new().with_exposure_us(5000));
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Call { call: "IC_SetExpAbsVal", .. }))
        ));
        assert_eq!(camera.settings().exposure_us, before.exposure_us);
        assert_eq!(camera.stats().driver_errors, 1);
    }

    #[test]
    fn test_rejected_video_format_keeps_previous_format() {
        let mut camera = open_small();
        camera.driver_mut().fail_call("IC_SetVideoFormat", IC_ERROR);

        let result = camera.configure(&AcquisitionConfig::new().with_resolution(1024, 768));
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Call { call: "IC_SetVideoFormat", .. }))
        ));
        assert_eq!(camera.settings().format, VideoFormat::y16(640, 480));
        assert_eq!(camera.stats().driver_errors, 1);

        // Nothing changed on the device, so acquisition still works.
        camera.start().unwrap();
        assert_eq!(camera.get_frame(FrameTimeout::default()).unwrap().pixels().len(), 640 * 480);
    }

    #[test]
    fn test_ignored_setting_is_mismatch() {
        let mut camera = open_small();
        let before = *camera.settings();

        camera.driver_mut().ignore_call("IC_SetVideoProperty");
        let result = camera.configure(&AcquisitionConfig::new().with_gain(200));
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Mismatch { setting: "gain", .. }))
        ));
        assert_eq!(camera.settings().gain, before.gain);

        camera.driver_mut().ignore_call("IC_SetExpAbsVal");
        let result = camera.configure(&AcquisitionConfig::new().with_exposure_us(5000));
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Mismatch { setting: "exposure (us)", .. }))
        ));
        assert_eq!(camera.settings().exposure_us, before.exposure_us);

        // Only the next write is dropped.
        camera.configure(&AcquisitionConfig::new().with_gain(200)).unwrap();
        assert_eq!(camera.settings().gain, 200);
    }

    #[test]
    fn test_snap_failure_is_driver_error_not_timeout() {
        let mut camera = open_small();
        camera.start().unwrap();
        camera.driver_mut().fail_call("IC_SnapImage", IC_NOT_AVAILABLE);

        let result = camera.get_frame(FrameTimeout::default());
        assert!(matches!(
            result,
            Err(CameraError::Driver(DriverError::Call { call: "IC_SnapImage", code: IC_NOT_AVAILABLE }))
        ));
        assert_eq!(camera.stats().driver_errors, 1);
        assert_eq!(camera.stats().timeouts, 0);
        assert_eq!(camera.stats().frames, 0);

        assert!(camera.get_frame(FrameTimeout::default()).is_ok());
    }

    #[test]
    fn test_frame_carries_acquisition_timestamp() {
        let mut camera = open_small();
        camera.start().unwrap();
        let before = Utc::now();
        let frame = camera.get_frame(FrameTimeout::default()).unwrap();
        let after = Utc::now();
        assert!(frame.timestamp() >= before && frame.timestamp() <= after);
    }

    #[test]
    fn test_model_of() {
        assert_eq!(model_of("DMK 33UJ003 41910000"), "DMK 33UJ003");
        assert_eq!(model_of("DMK"), "DMK");
    }

    #[test]
    fn test_list_devices() {
        let mut driver = SimulatedDriver::new(vec![
            SimulatedDevice::dmk_33uj003(),
            SimulatedDevice::dmk_33uj003(),
        ]);
        let names = list_devices(&mut driver).unwrap();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_frame_has_width_times_height_samples(index in 0usize..5) {
            let resolution = crate::capture::config::SUPPORTED_RESOLUTIONS[index];
            let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
            camera
                .configure(&AcquisitionConfig::new().with_resolution(resolution.width, resolution.height))
                .unwrap();
            camera.start().unwrap();
            let frame = camera.get_frame(FrameTimeout::default()).unwrap();
            prop_assert_eq!(frame.pixels().len(), resolution.pixel_count());
            prop_assert_eq!((frame.width(), frame.height()), (resolution.width, resolution.height));
        }

        #[test]
        fn prop_exposure_in_range_reads_back(exposure_us in 100u32..=MAX_RELIABLE_EXPOSURE_US) {
            let mut camera = open_small();
            camera.configure(&AcquisitionConfig::new().with_exposure_us(exposure_us)).unwrap();
            prop_assert_eq!(camera.settings().exposure_us, exposure_us);
        }
    }
}
