mod console;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use streamblur::capture::{CameraProvider, WebcamProvider};
use streamblur::effect::EffectKind;
use streamblur::mask::BackendPreference;
use streamblur::output::{FrameRate, LoopbackProvider, Resolution};
use streamblur::pipeline::{PipelineEvent, PipelineParts, PipelineState};
use streamblur::segmentation::create_default_backends;
use streamblur::{Pipeline, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Run until Ctrl+C
    Headless,
    /// Read control commands from stdin
    Interactive,
}

/// Command line options; anything given here overrides the settings file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long)]
    device: Option<u32>,

    /// Capture resolution width
    #[arg(long)]
    width: Option<u32>,

    /// Capture resolution height
    #[arg(long)]
    height: Option<u32>,

    /// Frames per second for capture and output (15, 24, 30 or 60)
    #[arg(long)]
    fps: Option<u32>,

    /// Output v4l2loopback device path
    #[arg(short, long)]
    sink_device: Option<PathBuf>,

    /// Output resolution (480p, 720p, 1080p, 4k)
    #[arg(long)]
    sink_resolution: Option<Resolution>,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<PathBuf>,

    /// Inference backend: auto probes the GPU first, cpu skips it
    #[arg(long)]
    backend: Option<BackendPreference>,

    /// Background effect (gaussian-blur, bokeh-blur, background-replace, chroma-key)
    #[arg(short, long)]
    effect: Option<EffectKind>,

    /// Effect intensity, 1 to 50
    #[arg(short, long)]
    intensity: Option<u8>,

    /// Replacement background image
    #[arg(long)]
    background: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Headless)]
    mode: Mode,

    /// Show matte visualization (grayscale silhouette) instead of the effect
    #[arg(long)]
    show_matte: bool,

    /// List cameras and exit
    #[arg(long)]
    list_devices: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    save_config: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(device) = self.device {
            settings.camera.device = device;
        }
        if let Some(width) = self.width {
            settings.camera.width = width;
        }
        if let Some(height) = self.height {
            settings.camera.height = height;
        }
        if let Some(fps) = self.fps {
            settings.output.fps = FrameRate::new(fps).context("Invalid --fps")?;
            settings.camera.fps = fps;
        }
        if let Some(path) = &self.sink_device {
            settings.output.device = path.clone();
        }
        if let Some(resolution) = self.sink_resolution {
            settings.output.resolution = resolution;
        }
        if let Some(model) = &self.model {
            settings.segmentation.model = Some(model.clone());
        }
        if let Some(backend) = self.backend {
            settings.segmentation.backend = backend;
        }
        if let Some(kind) = self.effect {
            settings.effect.kind = kind;
        }
        if let Some(intensity) = self.intensity {
            settings.effect.intensity = intensity;
        }
        if let Some(background) = &self.background {
            settings.effect.background = Some(background.clone());
        }
        Ok(())
    }

    fn settings_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Settings::default_path().context("No config directory on this system"),
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let mut settings =
        Settings::load_or_default(args.config.as_deref()).context("Failed to load settings")?;
    args.apply(&mut settings)?;

    if args.save_config {
        let path = args.settings_path()?;
        settings.save(&path).context("Failed to save settings")?;
        println!("Settings written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let cameras: Arc<dyn CameraProvider> = Arc::new(WebcamProvider);

    if args.list_devices {
        let devices = cameras.devices().context("Failed to enumerate cameras")?;
        if devices.is_empty() {
            println!("No cameras found");
        }
        for device in devices {
            println!("{}: {}", device.id, device.name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if settings.segmentation.model.is_none() {
        tracing::info!("Running in passthrough mode (no segmentation)");
        settings.segmentation.backend = BackendPreference::Cpu;
    }

    let effect = settings
        .effect_config()
        .context("Failed to load background image")?;
    let mut options = settings.pipeline_options();
    options.show_matte = args.show_matte;

    tracing::info!("streamblur starting");
    tracing::info!(
        "Capture: camera {} at {}x{}",
        settings.camera.device,
        settings.camera.width,
        settings.camera.height
    );
    tracing::info!("Output: {} on {}", options.sink, settings.output.device.display());
    tracing::info!("Effect: {} at intensity {}", effect.kind(), effect.intensity());

    let parts = PipelineParts {
        cameras,
        sinks: Arc::new(LoopbackProvider::new(settings.output.device.clone())),
        backends: create_default_backends(
            settings.segmentation.model.as_deref(),
            settings.model_input_size(),
        ),
    };
    let pipeline = Arc::new(Pipeline::new(parts, options, effect));

    let handler_pipeline = pipeline.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, stopping");
        handler_pipeline.stop();
    })
    .context("Failed to install Ctrl+C handler")?;

    let events = (args.mode == Mode::Interactive).then(|| pipeline.subscribe());
    if !pipeline.start() {
        bail!("Pipeline could not be started");
    }

    if let Some(events) = events {
        thread::Builder::new()
            .name("events".into())
            .spawn(move || {
                for event in events {
                    print_event(&event);
                }
            })
            .context("Failed to spawn event printer")?;

        let console_pipeline = pipeline.clone();
        thread::Builder::new()
            .name("console".into())
            .spawn(move || console::run(&console_pipeline))
            .context("Failed to spawn console")?;
    } else {
        tracing::info!("Press Ctrl+C to stop");
    }

    let state = pipeline.join();
    tracing::info!("Final stats: {}", pipeline.stats());

    match state {
        PipelineState::Failed => {
            if let Some(failure) = pipeline.failure() {
                eprintln!("{}", failure);
                eprintln!("Hint: {}", failure.remediation());
            }
            Ok(ExitCode::from(1))
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

/// Console feedback; the pipeline already logs every event
fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::StateChanged { to, .. } => println!("[{}]", to),
        PipelineEvent::Degraded { reason } => println!("Running degraded: {}", reason),
        PipelineEvent::Failed(failure) => println!("{}", failure),
        PipelineEvent::DeviceSwitched { device } => println!("Now using camera {}", device),
        PipelineEvent::DeviceSwitchRejected { device, reason } => {
            println!("Camera {} not usable: {}", device, reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_settings() {
        let args = Args::parse_from([
            "streamblur",
            "--device",
            "2",
            "--fps",
            "60",
            "--sink-resolution",
            "1080p",
            "--effect",
            "bokeh-blur",
            "--backend",
            "cpu",
        ]);
        let mut settings = Settings::default();
        args.apply(&mut settings).unwrap();
        assert_eq!(settings.camera.device, 2);
        assert_eq!(settings.camera.fps, 60);
        assert_eq!(settings.output.fps.fps(), 60);
        assert_eq!(settings.output.resolution, Resolution::R1080p);
        assert_eq!(settings.effect.kind, EffectKind::BokehBlur);
        assert_eq!(settings.segmentation.backend, BackendPreference::Cpu);
        assert_eq!(args.mode, Mode::Headless);
    }

    #[test]
    fn test_saved_config_keeps_overrides() {
        let path = std::env::temp_dir().join(format!("streamblur-cli-{}.json", std::process::id()));
        let config = path.to_str().unwrap();
        let args = Args::parse_from([
            "streamblur",
            "--config",
            config,
            "--save-config",
            "--effect",
            "chroma-key",
            "--intensity",
            "12",
        ]);
        let mut settings = Settings::default();
        args.apply(&mut settings).unwrap();
        assert_eq!(args.settings_path().unwrap(), path);
        settings.save(&args.settings_path().unwrap()).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.effect.kind, EffectKind::ChromaKey);
        assert_eq!(loaded.effect.intensity, 12);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unsupported_fps_rejected() {
        let args = Args::parse_from(["streamblur", "--fps", "25"]);
        assert!(args.apply(&mut Settings::default()).is_err());
    }
}
