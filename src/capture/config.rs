//! Acquisition settings and configuration file.
//!
//! Ranges are not hard-coded here: exposure and gain limits come from the
//! device when a session opens. Only the video format table is fixed,
//! because the DMK 33UJ003 advertises formats that do not actually stream.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Y16 resolutions known to stream on the DMK 33UJ003.
pub const SUPPORTED_RESOLUTIONS: [Resolution; 8] = [
    Resolution::new(640, 480),
    Resolution::new(1024, 768),
    Resolution::new(1280, 960),
    Resolution::new(1280, 1024),
    Resolution::new(1600, 1200),
    Resolution::new(1920, 1080),
    Resolution::new(2048, 1536),
    Resolution::new(3856, 2764),
];

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resolution {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Creates a resolution.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one frame.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue(format!("resolution '{s}' (expected WxH)"));
        let (w, h) = s.trim().split_once('x').ok_or_else(invalid)?;
        Ok(Self {
            width: w.trim().parse().map_err(|_| invalid())?,
            height: h.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Vendor pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Y800,
    /// 16-bit monochrome.
    Y16,
    /// 24-bit RGB.
    Rgb24,
    /// 32-bit RGBA.
    Rgb32,
    /// Packed YUV 4:2:2.
    Uyvy,
}

impl PixelFormat {
    /// Vendor name of the format.
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Y800 => "Y800",
            PixelFormat::Y16 => "Y16",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Rgb32 => "RGB32",
            PixelFormat::Uyvy => "UYVY",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "Y800" => Ok(PixelFormat::Y800),
            "Y16" => Ok(PixelFormat::Y16),
            "RGB24" => Ok(PixelFormat::Rgb24),
            "RGB32" => Ok(PixelFormat::Rgb32),
            "UYVY" => Ok(PixelFormat::Uyvy),
            other => Err(ConfigError::InvalidValue(format!("pixel format '{other}'"))),
        }
    }
}

/// A vendor video format such as `Y16 (640x480)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoFormat {
    /// Sample layout.
    pub pixel_format: PixelFormat,
    /// Frame size.
    pub resolution: Resolution,
}

impl VideoFormat {
    /// A Y16 format at the given resolution.
    pub const fn y16(width: u32, height: u32) -> Self {
        Self {
            pixel_format: PixelFormat::Y16,
            resolution: Resolution::new(width, height),
        }
    }

    /// Whether this format is in the table of formats known to work.
    pub fn is_supported(&self) -> bool {
        self.pixel_format == PixelFormat::Y16 && SUPPORTED_RESOLUTIONS.contains(&self.resolution)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pixel_format, self.resolution)
    }
}

impl FromStr for VideoFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue(format!("video format '{s}'"));
        let (pixel, rest) = s.trim().split_once('(').ok_or_else(invalid)?;
        let dims = rest.strip_suffix(')').ok_or_else(invalid)?;
        Ok(Self {
            pixel_format: pixel.parse()?,
            resolution: dims.parse()?,
        })
    }
}

/// How frames are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Trigger disabled; the camera streams continuously.
    Free,
    /// Trigger enabled; a software trigger is sent before each frame.
    #[default]
    Software,
    /// Trigger enabled; frames wait for a pulse on the trigger input.
    External,
}

impl TriggerMode {
    /// Whether the camera's trigger input is enabled in this mode.
    pub fn trigger_enabled(self) -> bool {
        !matches!(self, TriggerMode::Free)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerMode::Free => "free",
            TriggerMode::Software => "software",
            TriggerMode::External => "external",
        })
    }
}

impl FromStr for TriggerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(TriggerMode::Free),
            "software" => Ok(TriggerMode::Software),
            "external" => Ok(TriggerMode::External),
            other => Err(ConfigError::InvalidValue(format!("trigger mode '{other}'"))),
        }
    }
}

/// How long to wait for a frame before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameTimeout {
    /// Block until a frame arrives.
    Infinite,
    /// Give up after this many milliseconds (plus the exposure time).
    #[serde(rename = "ms")]
    Millis(u64),
}

impl FrameTimeout {
    /// The wait as a duration, `None` when infinite.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            FrameTimeout::Infinite => None,
            FrameTimeout::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for FrameTimeout {
    fn default() -> Self {
        FrameTimeout::Millis(1000)
    }
}

/// Rounds up to whole milliseconds, so a non-zero duration never becomes
/// a zero timeout.
impl From<Duration> for FrameTimeout {
    fn from(d: Duration) -> Self {
        let millis = d.as_nanos().div_ceil(1_000_000);
        FrameTimeout::Millis(millis.min(u64::MAX as u128) as u64)
    }
}

/// Acquisition options. Unset fields leave the current setting unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Exposure time in microseconds.
    pub exposure_us: Option<u32>,
    /// Gain in vendor units.
    pub gain: Option<i32>,
    /// Frame size.
    pub resolution: Option<Resolution>,
    /// Pixel format. Only Y16 is accepted.
    pub pixel_format: Option<PixelFormat>,
    /// Trigger mode.
    pub trigger: Option<TriggerMode>,
    /// Frame timeout used by recordings.
    pub timeout: Option<FrameTimeout>,
}

impl AcquisitionConfig {
    /// An empty configuration that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the exposure time in microseconds.
    pub fn with_exposure_us(mut self, exposure_us: u32) -> Self {
        self.exposure_us = Some(exposure_us);
        self
    }

    /// Sets the gain in vendor units.
    pub fn with_gain(mut self, gain: i32) -> Self {
        self.gain = Some(gain);
        self
    }

    /// Sets the frame size.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Some(Resolution::new(width, height));
        self
    }

    /// Sets the pixel format.
    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = Some(pixel_format);
        self
    }

    /// Sets resolution and pixel format from a full video format.
    pub fn with_video_format(mut self, format: VideoFormat) -> Self {
        self.pixel_format = Some(format.pixel_format);
        self.resolution = Some(format.resolution);
        self
    }

    /// Sets the trigger mode.
    pub fn with_trigger(mut self, trigger: TriggerMode) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Sets the frame timeout.
    pub fn with_timeout(mut self, timeout: FrameTimeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overlays the options set in `other` on top of these.
    pub fn merge(mut self, other: &AcquisitionConfig) -> Self {
        self.exposure_us = other.exposure_us.or(self.exposure_us);
        self.gain = other.gain.or(self.gain);
        self.resolution = other.resolution.or(self.resolution);
        self.pixel_format = other.pixel_format.or(self.pixel_format);
        self.trigger = other.trigger.or(self.trigger);
        self.timeout = other.timeout.or(self.timeout);
        self
    }

    /// Whether the options change the video format.
    pub fn changes_format(&self) -> bool {
        self.resolution.is_some() || self.pixel_format.is_some()
    }
}

/// Which camera to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelector {
    /// Position in the vendor's device list.
    Index(usize),
    /// Vendor unique name, e.g. `DMK 33UJ003 41910000`.
    UniqueName(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Index(0)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Index(i) => write!(f, "device #{i}"),
            DeviceSelector::UniqueName(name) => write!(f, "'{name}'"),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidValue("empty device selector".into()));
        }
        Ok(s.parse()
            .map(DeviceSelector::Index)
            .unwrap_or_else(|_| DeviceSelector::UniqueName(s.to_string())))
    }
}

/// Device selection options used when a session opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Which device to open.
    pub selector: DeviceSelector,
    /// Required model (first two words of the unique name), if any.
    pub expected_model: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            selector: DeviceSelector::default(),
            expected_model: Some(super::camera::DEFAULT_MODEL.to_string()),
        }
    }
}

impl DeviceConfig {
    /// Selects a device, keeping the default model check.
    pub fn with_selector(selector: DeviceSelector) -> Self {
        Self {
            selector,
            ..Default::default()
        }
    }
}

/// Which implementation of the vendor library to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-process emulation.
    #[default]
    Simulated,
    /// The vendor DLL (requires the `native` feature).
    Native,
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(DriverKind::Simulated),
            "native" => Ok(DriverKind::Native),
            other => Err(ConfigError::InvalidValue(format!("driver '{other}'"))),
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Driver implementation.
    pub kind: DriverKind,
    /// Path to the vendor library (native driver only).
    pub library: Option<PathBuf>,
    /// Number of cameras on the simulated bus.
    pub simulated_devices: usize,
    /// Simulated snaps take as long as the exposure.
    pub realtime: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: DriverKind::Simulated,
            library: None,
            simulated_devices: 1,
            realtime: true,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for exported frames (none to skip export).
    pub directory: Option<PathBuf>,
    /// Frames per recording.
    pub count: usize,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            count: 3,
            metrics_port: 0,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A value could not be parsed or is out of range.
    #[error("invalid {0}")]
    InvalidValue(String),
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this layout.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Which camera to open.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Vendor library or simulation.
    #[serde(default)]
    pub driver: DriverConfig,
    /// Settings applied after open.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Recording and metrics output.
    #[serde(default)]
    pub output: OutputConfig,
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if let Some(res) = config.acquisition.resolution {
            if res.width == 0 || res.height == 0 {
                return Err(ConfigError::InvalidValue(format!("resolution {res}")));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_format_parse_and_display() {
        let format: VideoFormat = "Y16 (3856x2764)".parse().unwrap();
        assert_eq!(format, VideoFormat::y16(3856, 2764));
        assert_eq!(format.to_string(), "Y16 (3856x2764)");
        assert!(format.is_supported());
    }

    #[test]
    fn test_unsupported_formats() {
        assert!(!VideoFormat::y16(320, 240).is_supported());
        let y800: VideoFormat = "Y800 (640x480)".parse().unwrap();
        assert!(!y800.is_supported());
        assert!("Y16 640x480".parse::<VideoFormat>().is_err());
    }

    #[test]
    fn test_device_selector_parse() {
        assert_eq!("2".parse::<DeviceSelector>().unwrap(), DeviceSelector::Index(2));
        assert_eq!(
            "DMK 33UJ003 41910000".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::UniqueName("DMK 33UJ003 41910000".into())
        );
        assert!("  ".parse::<DeviceSelector>().is_err());
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = AcquisitionConfig::new().with_exposure_us(100).with_gain(200);
        let merged = base.merge(&AcquisitionConfig::new().with_gain(300));
        assert_eq!(merged.exposure_us, Some(100));
        assert_eq!(merged.gain, Some(300));
    }

    #[test]
    fn test_file_config_defaults() {
        let config = FileConfig::from_toml("").unwrap();
        assert_eq!(config.device.selector, DeviceSelector::Index(0));
        assert_eq!(config.device.expected_model.as_deref(), Some("DMK 33UJ003"));
        assert_eq!(config.driver.kind, DriverKind::Simulated);
        assert_eq!(config.acquisition, AcquisitionConfig::default());
    }

    #[test]
    fn test_file_config_parse() {
        let config = FileConfig::from_toml(
            r#"
            [device]
            selector = "DMK 33UJ003 41910007"

            [driver]
            kind = "native"
            library = "C:/tis/tisgrabber_x64.dll"

            [acquisition]
            exposure_us = 2500
            gain = 250
            resolution = { width = 1280, height = 960 }
            pixel_format = "Y16"
            trigger = "external"
            timeout = "infinite"

            [output]
            count = 10
            "#,
        )
        .unwrap();

        assert_eq!(
            config.device.selector,
            DeviceSelector::UniqueName("DMK 33UJ003 41910007".into())
        );
        assert_eq!(config.driver.kind, DriverKind::Native);
        assert_eq!(config.acquisition.exposure_us, Some(2500));
        assert_eq!(config.acquisition.resolution, Some(Resolution::new(1280, 960)));
        assert_eq!(config.acquisition.trigger, Some(TriggerMode::External));
        assert_eq!(config.acquisition.timeout, Some(FrameTimeout::Infinite));
        assert_eq!(config.output.count, 10);
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let result = FileConfig::from_toml(
            "[acquisition]\nresolution = { width = 0, height = 480 }\n",
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_timeout_round_trip() {
        let config = AcquisitionConfig::new().with_timeout(FrameTimeout::Millis(250));
        let text = toml::to_string(&config).unwrap();
        let back: AcquisitionConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.timeout, Some(FrameTimeout::Millis(250)));
    }

    #[test]
    fn test_timeout_from_duration_rounds_up() {
        assert_eq!(FrameTimeout::from(Duration::from_micros(300)), FrameTimeout::Millis(1));
        assert_eq!(FrameTimeout::from(Duration::from_micros(1500)), FrameTimeout::Millis(2));
        assert_eq!(FrameTimeout::from(Duration::from_millis(250)), FrameTimeout::Millis(250));
        assert_eq!(FrameTimeout::from(Duration::ZERO), FrameTimeout::Millis(0));
    }
}
