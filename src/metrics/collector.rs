//! Metrics collection and registry.

use crate::capture::{Camera, SessionState};
use crate::driver::GrabberDriver;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Metric creation, registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of session state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether acquisition is running.
    pub is_live: bool,
    /// Frames delivered.
    pub frames: u64,
    /// Snaps that timed out.
    pub timeouts: u64,
    /// Failed vendor calls.
    pub driver_errors: u64,
    /// Frames containing a zero sample.
    pub blank_frames: u64,
    /// Applied exposure time.
    pub exposure_us: u32,
    /// Applied gain.
    pub gain: i32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Latency of the last frame beyond its exposure.
    pub last_latency_seconds: Option<f64>,
}

/// Prometheus metrics registry for camera acquisition.
pub struct MetricsRegistry {
    registry: Registry,

    // Session metrics
    live: IntGauge,
    exposure_us: IntGauge,
    gain: IntGauge,
    width: IntGauge,
    height: IntGauge,

    // Acquisition counters
    frames_total: IntCounter,
    timeouts_total: IntCounter,
    driver_errors_total: IntCounter,
    blank_frames_total: IntCounter,

    last_latency: Gauge,
}

impl MetricsRegistry {
    /// Creates a new registry with all acquisition metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let live = IntGauge::new("tis_camera_live", "Acquisition running (1=live, 0=stopped)")?;
        let exposure_us = IntGauge::new("tis_camera_exposure_us", "Applied exposure time in microseconds")?;
        let gain = IntGauge::new("tis_camera_gain", "Applied gain in vendor units")?;
        let width = IntGauge::new("tis_camera_frame_width", "Frame width in pixels")?;
        let height = IntGauge::new("tis_camera_frame_height", "Frame height in pixels")?;

        let frames_total = IntCounter::new("tis_camera_frames_total", "Total frames delivered")?;
        let timeouts_total = IntCounter::new(
            "tis_camera_timeouts_total",
            "Total snaps that saw no frame before the timeout",
        )?;
        let driver_errors_total = IntCounter::new(
            "tis_camera_driver_errors_total",
            "Total vendor calls that failed",
        )?;
        let blank_frames_total = IntCounter::new(
            "tis_camera_blank_frames_total",
            "Total delivered frames containing a zero sample",
        )?;

        let last_latency = Gauge::new(
            "tis_camera_last_latency_seconds",
            "Time to fetch the last frame beyond its exposure",
        )?;

        registry.register(Box::new(live.clone()))?;
        registry.register(Box::new(exposure_us.clone()))?;
        registry.register(Box::new(gain.clone()))?;
        registry.register(Box::new(width.clone()))?;
        registry.register(Box::new(height.clone()))?;
        registry.register(Box::new(frames_total.clone()))?;
        registry.register(Box::new(timeouts_total.clone()))?;
        registry.register(Box::new(driver_errors_total.clone()))?;
        registry.register(Box::new(blank_frames_total.clone()))?;
        registry.register(Box::new(last_latency.clone()))?;

        Ok(Self {
            registry,
            live,
            exposure_us,
            gain,
            width,
            height,
            frames_total,
            timeouts_total,
            driver_errors_total,
            blank_frames_total,
            last_latency,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.live.set(i64::from(snapshot.is_live));
        self.exposure_us.set(i64::from(snapshot.exposure_us));
        self.gain.set(i64::from(snapshot.gain));
        self.width.set(i64::from(snapshot.width));
        self.height.set(i64::from(snapshot.height));

        // Counters only move forward by the difference
        advance(&self.frames_total, snapshot.frames);
        advance(&self.timeouts_total, snapshot.timeouts);
        advance(&self.driver_errors_total, snapshot.driver_errors);
        advance(&self.blank_frames_total, snapshot.blank_frames);

        if let Some(latency) = snapshot.last_latency_seconds {
            self.last_latency.set(latency);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsSnapshot {
    /// Captures the current state of a session.
    pub fn from_camera<D: GrabberDriver>(camera: &Camera<D>) -> Self {
        let stats = camera.stats();
        let settings = camera.settings();
        Self {
            is_live: camera.state() == SessionState::Live,
            frames: stats.frames,
            timeouts: stats.timeouts,
            driver_errors: stats.driver_errors,
            blank_frames: stats.blank_frames,
            exposure_us: settings.exposure_us,
            gain: settings.gain,
            width: settings.format.resolution.width,
            height: settings.format.resolution.height,
            last_latency_seconds: stats.last_latency.map(|d| d.as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AcquisitionConfig, DeviceSelector};
    use crate::driver::SimulatedDriver;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            is_live: true,
            frames: 12,
            timeouts: 1,
            driver_errors: 0,
            blank_frames: 2,
            exposure_us: 500,
            gain: 383,
            width: 640,
            height: 480,
            last_latency_seconds: Some(0.004),
        };

        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("tis_camera_live 1"));
        assert!(output.contains("tis_camera_frames_total 12"));
        assert!(output.contains("tis_camera_blank_frames_total 2"));
        assert!(output.contains("tis_camera_gain 383"));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot {
            frames: 10,
            ..Default::default()
        });
        registry.update(&MetricsSnapshot {
            frames: 4,
            ..Default::default()
        });
        assert!(registry.encode().unwrap().contains("tis_camera_frames_total 10"));
    }

    #[test]
    fn test_snapshot_from_camera() {
        let mut camera = Camera::open(SimulatedDriver::single(), DeviceSelector::Index(0)).unwrap();
        camera
            .configure(&AcquisitionConfig::new().with_resolution(640, 480))
            .unwrap();
        camera.record(2).unwrap();

        let snapshot = MetricsSnapshot::from_camera(&camera);
        assert!(!snapshot.is_live);
        assert_eq!(snapshot.frames, 2);
        assert_eq!((snapshot.width, snapshot.height), (640, 480));
        assert!(snapshot.last_latency_seconds.is_some());
    }
}
