//! TIS Camera CLI
//!
//! Command-line interface for listing cameras, recording frames and
//! streaming with live metrics.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tis_camera::{
    capture::{
        list_devices, model_of, AcquisitionConfig, Camera, CameraError, DeviceSelector,
        DriverKind, FileConfig, FrameTimeout, Recording, Resolution, TriggerMode,
    },
    driver::{GrabberDriver, SimulatedDevice, SimulatedDriver},
    export,
    metrics::{MetricsRegistry, MetricsSnapshot},
};
use tracing::{debug, error, info, warn};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "tis-camera", version, about = "Acquisition from The Imaging Source DMK cameras")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Driver: simulated or native
    #[arg(long, global = true)]
    driver: Option<DriverKind>,

    /// Path to the vendor library (native driver)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Device index or unique name
    #[arg(long, global = true)]
    device: Option<DeviceSelector>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached cameras
    List,
    /// Show supported formats and setting ranges of a camera
    Formats,
    /// Record frames and report throughput
    Record {
        #[command(flatten)]
        acquisition: AcquisitionArgs,
        /// Frames per recording
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Number of recordings into the same buffer
        #[arg(long, default_value_t = 1)]
        iterations: usize,
        /// Directory to save frames into
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Image file type: tif or png
        #[arg(long, default_value = "tif")]
        image_type: String,
        /// Save each recording as one multi-page TIFF instead of one file per frame
        #[arg(long, action = ArgAction::SetTrue)]
        stack: bool,
    },
    /// Stream frames until interrupted
    Stream {
        #[command(flatten)]
        acquisition: AcquisitionArgs,
        /// Serve Prometheus metrics on this port (requires the `metrics` feature)
        #[arg(long)]
        metrics_port: Option<u16>,
    },
}

#[derive(Args, Debug, Clone)]
struct AcquisitionArgs {
    /// Exposure time in microseconds
    #[arg(short, long)]
    exposure_us: Option<u32>,
    /// Gain in vendor units
    #[arg(short, long)]
    gain: Option<i32>,
    /// Frame size as WxH
    #[arg(short, long)]
    resolution: Option<Resolution>,
    /// Trigger mode: free, software or external
    #[arg(short, long)]
    trigger: Option<TriggerMode>,
    /// Frame timeout in milliseconds
    #[arg(long, conflicts_with = "wait_forever")]
    timeout_ms: Option<u64>,
    /// Wait for frames without a timeout
    #[arg(long, action = ArgAction::SetTrue)]
    wait_forever: bool,
}

impl AcquisitionArgs {
    fn to_config(&self) -> AcquisitionConfig {
        let mut config = AcquisitionConfig {
            exposure_us: self.exposure_us,
            gain: self.gain,
            resolution: self.resolution,
            trigger: self.trigger,
            timeout: self.timeout_ms.map(FrameTimeout::Millis),
            ..Default::default()
        };
        if self.wait_forever {
            config.timeout = Some(FrameTimeout::Infinite);
        }
        config
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("TIS Camera v{}", tis_camera::VERSION);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult {
    let mut config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(kind) = cli.driver {
        config.driver.kind = kind;
    }
    if let Some(library) = cli.library.clone() {
        config.driver.library = Some(library);
    }
    if let Some(selector) = cli.device.clone() {
        config.device.selector = selector;
    }

    match config.driver.kind {
        DriverKind::Simulated => {
            let devices = (0..config.driver.simulated_devices)
                .map(|_| SimulatedDevice::dmk_33uj003())
                .collect();
            info!(devices = config.driver.simulated_devices, "Using simulated driver");
            let driver = SimulatedDriver::new(devices).realtime(config.driver.realtime);
            execute(driver, &cli.command, &config)
        }
        DriverKind::Native => run_native(&cli.command, &config),
    }
}

#[cfg(feature = "native")]
fn run_native(command: &Commands, config: &FileConfig) -> CliResult {
    use tis_camera::driver::TisGrabber;

    let driver = match &config.driver.library {
        Some(path) => TisGrabber::load(path)?,
        None => TisGrabber::load_default()?,
    };
    execute(driver, command, config)
}

#[cfg(not(feature = "native"))]
fn run_native(_command: &Commands, _config: &FileConfig) -> CliResult {
    Err("native driver requested, but this build lacks the `native` feature".into())
}

fn execute<D: GrabberDriver>(mut driver: D, command: &Commands, config: &FileConfig) -> CliResult {
    match command {
        Commands::List => {
            let names = list_devices(&mut driver)?;
            if names.is_empty() {
                warn!("No cameras attached");
            }
            for (index, name) in names.iter().enumerate() {
                println!("{index}: {name} ({})", model_of(name));
            }
            Ok(())
        }
        Commands::Formats => {
            let mut camera = Camera::open_with(driver, &config.device)?;
            let limits = *camera.limits();
            println!("{} ({})", camera.device_name(), camera.model());
            println!(
                "exposure: {}..={} us, gain: {}..={}, trigger input: {}",
                limits.min_exposure_us,
                limits.max_exposure_us,
                limits.min_gain,
                limits.max_gain,
                if limits.trigger_available { "yes" } else { "no" }
            );
            for format in camera.supported_formats() {
                println!("  {format}");
            }
            camera.close()?;
            Ok(())
        }
        Commands::Record {
            acquisition,
            count,
            iterations,
            output_dir,
            image_type,
            stack,
        } => {
            let options = config.acquisition.clone().merge(&acquisition.to_config());
            let output = output_dir.clone().or_else(|| config.output.directory.clone()).map(|dir| Output {
                dir,
                image_type: image_type.clone(),
                stack: *stack,
            });
            let count = count.unwrap_or(config.output.count);
            record(driver, config, &options, count, *iterations, output)
        }
        Commands::Stream {
            acquisition,
            metrics_port,
        } => {
            let options = config.acquisition.clone().merge(&acquisition.to_config());
            let port = metrics_port.unwrap_or(config.output.metrics_port);
            stream(driver, config, &options, port)
        }
    }
}

/// Where and how recordings are saved.
struct Output {
    dir: PathBuf,
    image_type: String,
    stack: bool,
}

fn record<D: GrabberDriver>(
    driver: D,
    config: &FileConfig,
    options: &AcquisitionConfig,
    count: usize,
    iterations: usize,
    output: Option<Output>,
) -> CliResult {
    let mut camera = Camera::open_with(driver, &config.device)?;
    camera.configure(options)?;

    let settings = *camera.settings();
    let resolution = settings.resolution();
    info!(
        format = %settings.format,
        exposure_us = settings.exposure_us,
        gain = settings.gain,
        trigger = %settings.trigger,
        "Recording {} x {} frames",
        iterations,
        count
    );

    let mut recording = Recording::new(count, resolution.width, resolution.height);
    for iteration in 0..iterations {
        let started = Instant::now();
        camera.record_into(&mut recording)?;
        let elapsed = started.elapsed();

        let fps = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        let blank = recording.blank_frames();
        println!(
            "iteration {}: {} frames in {:.3} s ({:.2} fps), latency {:?}",
            iteration + 1,
            count,
            elapsed.as_secs_f64(),
            fps,
            camera.stats().last_latency.unwrap_or_default()
        );
        if blank > 0 {
            warn!(blank, "Frames with zero samples in recording");
        }
        if let Some((lo, hi)) = recording.min_max().into_iter().reduce(|a, b| (a.0.min(b.0), a.1.max(b.1))) {
            debug!(min = lo, max = hi, "Sample range");
        }

        if let Some(output) = &output {
            let prefix = format!("rec{:03}", iteration + 1);
            if output.stack {
                std::fs::create_dir_all(&output.dir)?;
                export::save_stack(&recording, output.dir.join(format!("{prefix}.tif")))?;
            } else {
                export::save_recording(&recording, &output.dir, &prefix, &output.image_type)?;
            }
        }
    }

    let stats = *camera.stats();
    info!(
        frames = stats.frames,
        timeouts = stats.timeouts,
        blank_frames = stats.blank_frames,
        "Recording finished"
    );
    camera.close()?;
    Ok(())
}

fn stream<D: GrabberDriver>(
    driver: D,
    config: &FileConfig,
    options: &AcquisitionConfig,
    metrics_port: u16,
) -> CliResult {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let mut camera = Camera::open_with(driver, &config.device)?;
    camera.configure(options)?;
    let publish = start_metrics(metrics_port)?;

    camera.start()?;
    info!(format = %camera.settings().format, "Streaming, press Ctrl-C to stop");

    let timeout = camera.settings().timeout;
    let mut window = Instant::now();
    let mut window_frames = 0u64;
    while running.load(Ordering::SeqCst) {
        match camera.get_frame(timeout) {
            Ok(frame) => {
                window_frames += 1;
                if frame.is_blank() {
                    warn!(sequence = frame.sequence(), "Blank frame");
                }
            }
            Err(CameraError::Timeout(t)) => {
                warn!(timeout_ms = t.as_millis(), "No frame, still waiting");
            }
            Err(e) => {
                camera.stop()?;
                return Err(e.into());
            }
        }

        if window.elapsed() >= Duration::from_secs(1) {
            let fps = window_frames as f64 / window.elapsed().as_secs_f64();
            info!(fps, frames = camera.stats().frames, "Streaming");
            publish(&MetricsSnapshot::from_camera(&camera));
            window = Instant::now();
            window_frames = 0;
        }
    }

    camera.stop()?;
    publish(&MetricsSnapshot::from_camera(&camera));
    info!(frames = camera.stats().frames, timeouts = camera.stats().timeouts, "Stream stopped");
    camera.close()?;
    Ok(())
}

type Publisher = Box<dyn Fn(&MetricsSnapshot)>;

#[cfg(feature = "metrics")]
fn start_metrics(port: u16) -> CliResult<Publisher> {
    use tis_camera::metrics::{MetricsServer, MetricsServerConfig};

    let registry = MetricsRegistry::new()?;
    if port == 0 {
        return Ok(Box::new(move |s: &MetricsSnapshot| registry.update(s)));
    }
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();
    // Bound here, so a taken port fails before streaming starts. Serves
    // until the process exits.
    let _handle = server.spawn()?;
    Ok(Box::new(move |s: &MetricsSnapshot| state.blocking_write().update(s)))
}

#[cfg(not(feature = "metrics"))]
fn start_metrics(port: u16) -> CliResult<Publisher> {
    if port != 0 {
        warn!(port, "Metrics server requested, but this build lacks the `metrics` feature");
    }
    let registry = MetricsRegistry::new()?;
    Ok(Box::new(move |s: &MetricsSnapshot| {
        registry.update(s);
        if let Ok(text) = registry.encode() {
            tracing::trace!(metrics = %text, "Metrics");
        }
    }))
}
