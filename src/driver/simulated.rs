//! In-process emulation of the vendor library.
//!
//! Mirrors the behaviour observed on a DMK 33UJ003 through `tisgrabber`,
//! including its quirks: the sink color format only registers after a
//! live-mode cycle, triggered snaps need a pulse, and a snap that sees no
//! frame fails with the generic error code. Frames are a deterministic
//! gradient plus seeded sensor noise, quantized like a 12-bit sensor
//! delivering Y16.

use super::{
    check_copy, CameraProperty, ColorFormat, DriverError, DriverResult, GrabberDriver, ImageDescription,
    SnapTimeout, VideoProperty, IC_DEVICE_NOT_FOUND, IC_ERROR, IC_INDEX_OUT_OF_RANGE,
    IC_NOT_AVAILABLE, IC_NO_DEVICE,
};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Format list reported by a DMK 33UJ003, in vendor order.
const DMK_33UJ003_FORMATS: &[&str] = &[
    "Y800 (3856x2764)",
    "Y800 (1920x1080)",
    "Y800 (640x480)",
    "RGB24 (3856x2764)",
    "RGB32 (3856x2764)",
    "Y16 (640x480)",
    "Y16 (320x240)",
    "UYVY (3856x2764)",
    "Y800 (1024x768)",
    "Y800 (1280x960)",
    "Y16 (2592x1944)",
    "Y16 (1024x768)",
    "Y16 (1280x960)",
    "Y16 (1280x1024)",
    "Y16 (1600x1200)",
    "Y16 (1920x1080)",
    "Y16 (2048x1536)",
    "Y16 (3856x2764)",
];

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(41_910_000);

/// How a simulated camera receives external trigger pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulatedTrigger {
    /// Nothing is wired to the trigger input.
    #[default]
    Disconnected,
    /// A pulse generator fires faster than any exposure.
    FreeRunning,
}

/// A camera attached to the simulated bus.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    /// Vendor unique name: model followed by serial number.
    pub unique_name: String,
    /// Video formats reported by the device, in vendor order.
    pub video_formats: Vec<String>,
    /// Absolute exposure range in seconds.
    pub exposure_range: (f32, f32),
    /// Gain range in vendor units.
    pub gain_range: (i32, i32),
    /// Whether the device exposes a trigger input.
    pub trigger_available: bool,
    /// What is wired to the external trigger.
    pub external_trigger: SimulatedTrigger,
}

impl SimulatedDevice {
    /// A DMK 33UJ003 with a fresh serial number.
    pub fn dmk_33uj003() -> Self {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        Self::with_name(format!("DMK 33UJ003 {serial}"))
    }

    /// A DMK 33UJ003-like device with an explicit unique name.
    pub fn with_name(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
            video_formats: DMK_33UJ003_FORMATS.iter().map(|s| s.to_string()).collect(),
            exposure_range: (0.0001, 30.0),
            gain_range: (100, 383),
            trigger_available: true,
            external_trigger: SimulatedTrigger::Disconnected,
        }
    }
}

/// Opaque grabber handle issued by [`SimulatedDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimGrabber(u32);

#[derive(Debug)]
struct GrabberState {
    device: Option<usize>,
    live: bool,
    overlay: bool,
    sink_format: i32,
    pending_sink_format: Option<i32>,
    auto_exposure: bool,
    exposure: f32,
    auto_gain: bool,
    gain: i32,
    video_format: Option<String>,
    trigger_enabled: bool,
    trigger_armed: bool,
    image: Option<Vec<u16>>,
    frames: u64,
}

impl Default for GrabberState {
    fn default() -> Self {
        Self {
            device: None,
            live: false,
            overlay: true,
            sink_format: ColorFormat::Y800.id(),
            pending_sink_format: None,
            auto_exposure: true,
            exposure: 0.01,
            auto_gain: true,
            gain: 100,
            video_format: None,
            trigger_enabled: false,
            trigger_armed: false,
            image: None,
            frames: 0,
        }
    }
}

/// Emulated `tisgrabber` library.
///
/// Each driver owns its own simulated bus. Failures can be injected per
/// vendor call with [`SimulatedDriver::fail_call`].
#[derive(Debug)]
pub struct SimulatedDriver {
    devices: Vec<SimulatedDevice>,
    grabbers: HashMap<u32, GrabberState>,
    next_grabber: u32,
    initialized: bool,
    realtime: bool,
    rng: ChaCha8Rng,
    injected: HashMap<&'static str, i32>,
    ignored: HashSet<&'static str>,
}

impl SimulatedDriver {
    /// A bus with the given devices attached.
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            devices,
            grabbers: HashMap::new(),
            next_grabber: 1,
            initialized: false,
            realtime: false,
            rng: ChaCha8Rng::seed_from_u64(0x33_0003),
            injected: HashMap::new(),
            ignored: HashSet::new(),
        }
    }

    /// A bus with a single DMK 33UJ003 attached.
    pub fn single() -> Self {
        Self::new(vec![SimulatedDevice::dmk_33uj003()])
    }

    /// A bus with nothing attached.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Sleeps for the exposure time on every snap, so timing measurements
    /// behave like real hardware.
    pub fn realtime(mut self, enable: bool) -> Self {
        self.realtime = enable;
        self
    }

    /// Reseeds the sensor noise generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Makes the next invocation of `call` (e.g. `"IC_SetVideoFormat"`)
    /// fail with `code`.
    pub fn fail_call(&mut self, call: &'static str, code: i32) {
        self.injected.insert(call, code);
    }

    /// Makes the next invocation of a setter `call` report success without
    /// applying the value, the way the vendor library drops some writes.
    pub fn ignore_call(&mut self, call: &'static str) {
        self.ignored.insert(call);
    }

    /// Number of grabbers created and not yet released.
    pub fn grabber_count(&self) -> usize {
        self.grabbers.len()
    }

    /// Devices attached to the bus.
    pub fn devices(&self) -> &[SimulatedDevice] {
        &self.devices
    }

    fn enter(&mut self, call: &'static str) -> DriverResult<()> {
        if let Some(code) = self.injected.remove(call) {
            tracing::trace!(call, code, "Injected vendor failure");
            return Err(DriverError::Call { call, code });
        }
        if !self.initialized && call != "IC_InitLibrary" {
            return Err(DriverError::Call { call, code: IC_ERROR });
        }
        Ok(())
    }

    /// Whether a setter should succeed without effect.
    fn drops_write(&mut self, call: &'static str) -> DriverResult<bool> {
        self.enter(call)?;
        if self.ignored.remove(call) {
            tracing::trace!(call, "Simulated write dropped");
            return Ok(true);
        }
        Ok(false)
    }

    fn state(&mut self, call: &'static str, grabber: SimGrabber) -> DriverResult<&mut GrabberState> {
        self.enter(call)?;
        self.grabbers
            .get_mut(&grabber.0)
            .ok_or(DriverError::Call { call, code: IC_ERROR })
    }

    fn opened(&mut self, call: &'static str, grabber: SimGrabber) -> DriverResult<(&mut GrabberState, &SimulatedDevice)> {
        self.enter(call)?;
        let state = self
            .grabbers
            .get_mut(&grabber.0)
            .ok_or(DriverError::Call { call, code: IC_ERROR })?;
        let device = state
            .device
            .and_then(|i| self.devices.get(i))
            .ok_or(DriverError::Call { call, code: IC_NO_DEVICE })?;
        Ok((state, device))
    }

    fn render(rng: &mut ChaCha8Rng, state: &GrabberState, width: u32, height: u32) -> Vec<u16> {
        // Signal scales with exposure (ms) and gain relative to unity at 100.
        let scale = (state.exposure * 1000.0).min(1.0) * (state.gain as f32 / 100.0);
        let phase = state.frames as u32;
        let mut noise = 0u64;
        let mut samples = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                if samples.len() % 4 == 0 {
                    noise = rng.next_u64();
                }
                let pattern = (x.wrapping_mul(7) + y.wrapping_mul(3) + phase) % 4096;
                let signal = (pattern as f32 * scale) as u32;
                let value = (signal + (noise & 0xF) as u32 + 1).min(4095);
                noise >>= 16;
                samples.push((value as u16) << 4);
            }
        }
        samples
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::single()
    }
}

fn format_dimensions(format: &str) -> Option<(u32, u32)> {
    let dims = format.split_once('(')?.1.strip_suffix(')')?;
    let (w, h) = dims.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn bits_per_pixel(sink_format: i32) -> u32 {
    match ColorFormat::from_id(sink_format) {
        Some(ColorFormat::Y800) => 8,
        Some(ColorFormat::Rgb24) => 24,
        Some(ColorFormat::Rgb32) => 32,
        Some(ColorFormat::Uyvy) | Some(ColorFormat::Y16) | None => 16,
    }
}

impl GrabberDriver for SimulatedDriver {
    type Grabber = SimGrabber;

    fn init(&mut self) -> DriverResult<()> {
        self.enter("IC_InitLibrary")?;
        self.initialized = true;
        tracing::trace!(devices = self.devices.len(), "Simulated library initialized");
        Ok(())
    }

    fn device_count(&mut self) -> DriverResult<usize> {
        self.enter("IC_GetDeviceCount")?;
        Ok(self.devices.len())
    }

    fn unique_name(&mut self, index: usize) -> DriverResult<String> {
        self.enter("IC_GetUniqueNamefromList")?;
        self.devices
            .get(index)
            .map(|d| d.unique_name.clone())
            .ok_or(DriverError::NullResult {
                call: "IC_GetUniqueNamefromList",
            })
    }

    fn create_grabber(&mut self) -> DriverResult<SimGrabber> {
        self.enter("IC_CreateGrabber")?;
        let id = self.next_grabber;
        self.next_grabber += 1;
        self.grabbers.insert(id, GrabberState::default());
        Ok(SimGrabber(id))
    }

    fn release_grabber(&mut self, grabber: SimGrabber) {
        if self.grabbers.remove(&grabber.0).is_some() {
            tracing::trace!(?grabber, "Simulated grabber released");
        }
    }

    fn open_by_unique_name(&mut self, grabber: SimGrabber, name: &str) -> DriverResult<()> {
        const CALL: &str = "IC_OpenDevByUniqueName";
        self.enter(CALL)?;
        let index = self
            .devices
            .iter()
            .position(|d| d.unique_name == name)
            .ok_or(DriverError::Call { call: CALL, code: IC_DEVICE_NOT_FOUND })?;
        let in_use = self
            .grabbers
            .iter()
            .any(|(id, s)| *id != grabber.0 && s.device == Some(index));
        if in_use {
            return Err(DriverError::Call { call: CALL, code: IC_ERROR });
        }
        let state = self
            .grabbers
            .get_mut(&grabber.0)
            .ok_or(DriverError::Call { call: CALL, code: IC_ERROR })?;
        *state = GrabberState {
            device: Some(index),
            video_format: self.devices[index].video_formats.first().cloned(),
            ..GrabberState::default()
        };
        Ok(())
    }

    fn validate_device(&mut self, grabber: SimGrabber) -> DriverResult<()> {
        self.opened("IC_IsDevValid", grabber).map(|_| ())
    }

    fn start_live(&mut self, grabber: SimGrabber) -> DriverResult<()> {
        let (state, _) = self.opened("IC_StartLive", grabber)?;
        if let Some(format) = state.pending_sink_format.take() {
            state.sink_format = format;
        }
        state.live = true;
        state.trigger_armed = false;
        Ok(())
    }

    fn stop_live(&mut self, grabber: SimGrabber) {
        if let Some(state) = self.grabbers.get_mut(&grabber.0) {
            state.live = false;
        }
    }

    fn remove_overlay(&mut self, grabber: SimGrabber, remove: bool) -> DriverResult<()> {
        let state = self.state("IC_RemoveOverlay", grabber)?;
        state.overlay = !remove;
        Ok(())
    }

    fn color_format(&mut self, grabber: SimGrabber) -> DriverResult<i32> {
        Ok(self.state("IC_GetFormat", grabber)?.sink_format)
    }

    fn set_color_format(&mut self, grabber: SimGrabber, format: ColorFormat) -> DriverResult<()> {
        if self.drops_write("IC_SetFormat")? {
            return Ok(());
        }
        let state = self.state("IC_SetFormat", grabber)?;
        // Registers with the sink on the next live start.
        state.pending_sink_format = Some(format.id());
        Ok(())
    }

    fn auto_camera_property(&mut self, grabber: SimGrabber, property: CameraProperty) -> DriverResult<bool> {
        let (state, _) = self.opened("IC_GetAutoCameraProperty", grabber)?;
        match property {
            CameraProperty::Exposure => Ok(state.auto_exposure),
        }
    }

    fn set_auto_camera_property(
        &mut self,
        grabber: SimGrabber,
        property: CameraProperty,
        enable: bool,
    ) -> DriverResult<()> {
        let (state, _) = self.opened("IC_EnableAutoCameraProperty", grabber)?;
        match property {
            CameraProperty::Exposure => state.auto_exposure = enable,
        }
        Ok(())
    }

    fn exposure_range(&mut self, grabber: SimGrabber) -> DriverResult<(f32, f32)> {
        let (_, device) = self.opened("IC_GetExpAbsValRange", grabber)?;
        Ok(device.exposure_range)
    }

    fn exposure(&mut self, grabber: SimGrabber) -> DriverResult<f32> {
        let (state, _) = self.opened("IC_GetExpAbsVal", grabber)?;
        Ok(state.exposure)
    }

    fn set_exposure(&mut self, grabber: SimGrabber, seconds: f32) -> DriverResult<()> {
        const CALL: &str = "IC_SetExpAbsVal";
        if self.drops_write(CALL)? {
            return Ok(());
        }
        let (state, device) = self.opened(CALL, grabber)?;
        let (min, max) = device.exposure_range;
        // Tolerate one microsecond of rounding at the range ends.
        if state.auto_exposure || !(min - 1e-6..=max + 1e-6).contains(&seconds) {
            return Err(DriverError::Call { call: CALL, code: IC_ERROR });
        }
        state.exposure = seconds.clamp(min, max);
        Ok(())
    }

    fn auto_video_property(&mut self, grabber: SimGrabber, property: VideoProperty) -> DriverResult<bool> {
        let (state, _) = self.opened("IC_GetAutoVideoProperty", grabber)?;
        match property {
            VideoProperty::Gain => Ok(state.auto_gain),
        }
    }

    fn set_auto_video_property(
        &mut self,
        grabber: SimGrabber,
        property: VideoProperty,
        enable: bool,
    ) -> DriverResult<()> {
        let (state, _) = self.opened("IC_EnableAutoVideoProperty", grabber)?;
        match property {
            VideoProperty::Gain => state.auto_gain = enable,
        }
        Ok(())
    }

    fn video_property_range(&mut self, grabber: SimGrabber, property: VideoProperty) -> DriverResult<(i32, i32)> {
        let (_, device) = self.opened("IC_VideoPropertyGetRange", grabber)?;
        Ok(match property {
            VideoProperty::Gain => device.gain_range,
        })
    }

    fn video_property(&mut self, grabber: SimGrabber, property: VideoProperty) -> DriverResult<i32> {
        let (state, _) = self.opened("IC_GetVideoProperty", grabber)?;
        Ok(match property {
            VideoProperty::Gain => state.gain,
        })
    }

    fn set_video_property(
        &mut self,
        grabber: SimGrabber,
        property: VideoProperty,
        value: i32,
    ) -> DriverResult<()> {
        const CALL: &str = "IC_SetVideoProperty";
        if self.drops_write(CALL)? {
            return Ok(());
        }
        let (state, device) = self.opened(CALL, grabber)?;
        let (min, max) = match property {
            VideoProperty::Gain => device.gain_range,
        };
        if state.auto_gain || !(min..=max).contains(&value) {
            return Err(DriverError::Call { call: CALL, code: IC_ERROR });
        }
        state.gain = value;
        Ok(())
    }

    fn video_format_count(&mut self, grabber: SimGrabber) -> DriverResult<usize> {
        let (_, device) = self.opened("IC_GetVideoFormatCount", grabber)?;
        Ok(device.video_formats.len())
    }

    fn video_format(&mut self, grabber: SimGrabber, index: usize) -> DriverResult<String> {
        const CALL: &str = "IC_GetVideoFormat";
        let (_, device) = self.opened(CALL, grabber)?;
        device
            .video_formats
            .get(index)
            .cloned()
            .ok_or(DriverError::Call { call: CALL, code: IC_INDEX_OUT_OF_RANGE })
    }

    fn set_video_format(&mut self, grabber: SimGrabber, format: &str) -> DriverResult<()> {
        const CALL: &str = "IC_SetVideoFormat";
        let (state, device) = self.opened(CALL, grabber)?;
        if state.live || !device.video_formats.iter().any(|f| f == format) {
            return Err(DriverError::Call { call: CALL, code: IC_ERROR });
        }
        state.video_format = Some(format.to_string());
        Ok(())
    }

    fn image_description(&mut self, grabber: SimGrabber) -> DriverResult<ImageDescription> {
        const CALL: &str = "IC_GetImageDescription";
        let (state, _) = self.opened(CALL, grabber)?;
        let (width, height) = state
            .video_format
            .as_deref()
            .and_then(format_dimensions)
            .ok_or(DriverError::Call { call: CALL, code: IC_ERROR })?;
        Ok(ImageDescription {
            width,
            height,
            bits_per_pixel: bits_per_pixel(state.sink_format),
            color_format: state.sink_format,
        })
    }

    fn trigger_available(&mut self, grabber: SimGrabber) -> DriverResult<bool> {
        let (_, device) = self.opened("IC_IsTriggerAvailable", grabber)?;
        Ok(device.trigger_available)
    }

    fn enable_trigger(&mut self, grabber: SimGrabber, enable: bool) -> DriverResult<()> {
        const CALL: &str = "IC_EnableTrigger";
        let (state, device) = self.opened(CALL, grabber)?;
        if !device.trigger_available {
            return Err(DriverError::Call { call: CALL, code: IC_NOT_AVAILABLE });
        }
        state.trigger_enabled = enable;
        state.trigger_armed = false;
        Ok(())
    }

    fn software_trigger(&mut self, grabber: SimGrabber) -> DriverResult<()> {
        const CALL: &str = "IC_SoftwareTrigger";
        let (state, _) = self.opened(CALL, grabber)?;
        if !state.live {
            return Err(DriverError::Call { call: CALL, code: IC_NOT_AVAILABLE });
        }
        state.trigger_armed = true;
        Ok(())
    }

    fn snap_image(&mut self, grabber: SimGrabber, timeout: SnapTimeout) -> DriverResult<()> {
        const CALL: &str = "IC_SnapImage";
        let realtime = self.realtime;
        self.enter(CALL)?;
        let state = self
            .grabbers
            .get_mut(&grabber.0)
            .ok_or(DriverError::Call { call: CALL, code: IC_ERROR })?;
        let device = state
            .device
            .and_then(|i| self.devices.get(i))
            .ok_or(DriverError::Call { call: CALL, code: IC_NO_DEVICE })?;
        if !state.live {
            return Err(DriverError::Call { call: CALL, code: IC_NOT_AVAILABLE });
        }
        let pulsed = !state.trigger_enabled
            || state.trigger_armed
            || device.external_trigger == SimulatedTrigger::FreeRunning;
        if !pulsed {
            // A real library would wait out the timeout; never block here.
            tracing::trace!(timeout_ms = timeout.as_millis(), "Simulated snap starved of trigger");
            return Err(DriverError::Call { call: CALL, code: IC_ERROR });
        }
        state.trigger_armed = false;
        let (width, height) = state
            .video_format
            .as_deref()
            .and_then(format_dimensions)
            .ok_or(DriverError::Call { call: CALL, code: IC_ERROR })?;
        if realtime {
            std::thread::sleep(Duration::from_secs_f32(state.exposure));
        }
        state.frames += 1;
        let image = Self::render(&mut self.rng, state, width, height);
        state.image = Some(image);
        Ok(())
    }

    fn copy_image(&mut self, grabber: SimGrabber, dst: &mut [u16]) -> DriverResult<()> {
        const CALL: &str = "IC_GetImagePtr";
        let description = self.image_description(grabber)?;
        check_copy(&description, dst.len())?;
        let (state, _) = self.opened(CALL, grabber)?;
        let image = state.image.as_ref().ok_or(DriverError::NullResult { call: CALL })?;
        let src = image.get(..dst.len()).ok_or(DriverError::Call { call: CALL, code: IC_ERROR })?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened_driver() -> (SimulatedDriver, SimGrabber) {
        let mut driver = SimulatedDriver::single();
        driver.init().unwrap();
        let name = driver.unique_name(0).unwrap();
        let grabber = driver.create_grabber().unwrap();
        driver.open_by_unique_name(grabber, &name).unwrap();
        (driver, grabber)
    }

    #[test]
    fn test_calls_fail_before_init() {
        let mut driver = SimulatedDriver::single();
        assert!(matches!(
            driver.device_count(),
            Err(DriverError::Call { code: IC_ERROR, .. })
        ));
    }

    #[test]
    fn test_serials_are_unique() {
        let a = SimulatedDevice::dmk_33uj003();
        let b = SimulatedDevice::dmk_33uj003();
        assert_ne!(a.unique_name, b.unique_name);
        assert!(a.unique_name.starts_with("DMK 33UJ003 "));
    }

    #[test]
    fn test_color_format_registers_after_live_cycle() {
        let (mut driver, grabber) = opened_driver();
        driver.set_color_format(grabber, ColorFormat::Y16).unwrap();
        assert_eq!(driver.color_format(grabber).unwrap(), ColorFormat::Y800.id());

        driver.start_live(grabber).unwrap();
        driver.stop_live(grabber);
        assert_eq!(driver.color_format(grabber).unwrap(), ColorFormat::Y16.id());
    }

    #[test]
    fn test_triggered_snap_needs_pulse() {
        let (mut driver, grabber) = opened_driver();
        driver.set_video_format(grabber, "Y16 (640x480)").unwrap();
        driver.set_color_format(grabber, ColorFormat::Y16).unwrap();
        driver.enable_trigger(grabber, true).unwrap();
        driver.start_live(grabber).unwrap();

        let timeout = SnapTimeout::After(Duration::from_millis(10));
        assert!(driver.snap_image(grabber, timeout).is_err());

        driver.software_trigger(grabber).unwrap();
        assert!(driver.snap_image(grabber, timeout).is_ok());

        let mut dst = vec![0u16; 640 * 480];
        driver.copy_image(grabber, &mut dst).unwrap();
        assert!(dst.iter().all(|&v| v > 0 && v & 0xF == 0));
    }

    #[test]
    fn test_device_cannot_be_opened_twice() {
        let (mut driver, _) = opened_driver();
        let name = driver.unique_name(0).unwrap();
        let second = driver.create_grabber().unwrap();
        assert!(driver.open_by_unique_name(second, &name).is_err());
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let (mut driver, grabber) = opened_driver();
        driver.fail_call("IC_IsDevValid", IC_NO_DEVICE);
        assert_eq!(
            driver.validate_device(grabber),
            Err(DriverError::Call {
                call: "IC_IsDevValid",
                code: IC_NO_DEVICE
            })
        );
        assert!(driver.validate_device(grabber).is_ok());
    }

    #[test]
    fn test_copy_bounded_by_current_format() {
        let (mut driver, grabber) = opened_driver();
        driver.set_video_format(grabber, "Y16 (640x480)").unwrap();
        driver.set_color_format(grabber, ColorFormat::Y16).unwrap();
        driver.start_live(grabber).unwrap();
        driver.snap_image(grabber, SnapTimeout::Infinite).unwrap();

        let mut larger = vec![0u16; 1024 * 768];
        assert!(matches!(
            driver.copy_image(grabber, &mut larger),
            Err(DriverError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_dropped_write_reports_success() {
        let (mut driver, grabber) = opened_driver();
        driver.set_auto_video_property(grabber, VideoProperty::Gain, false).unwrap();
        driver.ignore_call("IC_SetVideoProperty");
        driver.set_video_property(grabber, VideoProperty::Gain, 250).unwrap();
        assert_eq!(driver.video_property(grabber, VideoProperty::Gain).unwrap(), 100);

        driver.set_video_property(grabber, VideoProperty::Gain, 250).unwrap();
        assert_eq!(driver.video_property(grabber, VideoProperty::Gain).unwrap(), 250);
    }

    #[test]
    fn test_format_dimensions() {
        assert_eq!(format_dimensions("Y16 (3856x2764)"), Some((3856, 2764)));
        assert_eq!(format_dimensions("Y16"), None);
    }
}
