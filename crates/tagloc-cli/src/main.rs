//! `tagloc` – multi-camera tag localizer.
//!
//! 1. Loads `tagloc.toml` (path from the first argument or `TAGLOC_CONFIG`)
//!    and the field tag layout.  Any problem here exits with status 1 before
//!    a single worker starts.
//! 2. Starts one worker per camera, the fusion worker, the pose publisher and
//!    optionally the trajectory logger.
//! 3. Supervises until Ctrl-C, until every source is exhausted, or until a
//!    worker fails fatally (status 1).

mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tagloc_middleware::{EventBus, JsonLinesSink};
use tagloc_perception::{Strategy, TagLayout, TransformPipeline};
use tagloc_runtime::{
    CameraTask, LocalizationWorker, PosePublisher, Shutdown, Supervisor, TrajectoryLogger,
    TrajectoryWriter, Worker, telemetry,
};
use tagloc_types::LocalizationError;
use tagloc_types::pose::rotation_from_rpy_degrees;
use tracing::{error, info, warn};

use config::{Config, PoseSinkKind};

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("tagloc");
    print_banner();

    let path = config::config_path(std::env::args().nth(1));
    let cfg = match config::load_from(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %path.display(), error = %e, "configuration rejected");
            eprintln!("  {} {e}", "Startup failed:".red().bold());
            return ExitCode::FAILURE;
        }
    };
    info!(path = %path.display(), cameras = cfg.cameras.len(), "configuration loaded");

    match run(&cfg) {
        Ok(reason) => {
            info!(?reason, "localizer stopped");
            println!("  {} Exiting tagloc.", "✓".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "localizer failed");
            eprintln!("  {} {e}", "Fatal:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: &Config) -> Result<Shutdown, LocalizationError> {
    let layout = Arc::new(TagLayout::load(&cfg.fmap_file)?);
    info!(path = %cfg.fmap_file.display(), tags = layout.len(), "tag layout loaded");

    let backoff = Duration::from_millis(cfg.restart_backoff_ms);
    let adjustment = rotation_from_rpy_degrees(cfg.axis_adjustment_rpy);
    let bus = EventBus::default();
    let mut supervisor = Supervisor::new().with_bus(bus.clone());

    let fusion = LocalizationWorker::with_capacity(Strategy::from(&cfg.strategy), cfg.tag_capacity)
        .with_bus(bus.clone());
    let handle = fusion.handle();
    supervisor.add(
        Worker::new("localization", cfg.stay_alive, cfg.fusion_hz, Box::new(fusion))
            .with_restart_backoff(backoff),
    );

    for camera in &cfg.cameras {
        let pipeline = TransformPipeline::new(camera.extrinsics(), Arc::clone(&layout))
            .with_adjustment(adjustment)
            .with_capacity(cfg.tag_capacity);
        let task = CameraTask::new(camera.build_source(), pipeline, handle.clone());
        supervisor.add(
            Worker::new(
                format!("camera-{}", camera.name),
                cfg.stay_alive,
                camera.frequency_hz,
                Box::new(task),
            )
            .with_restart_backoff(backoff),
        );
    }

    let mut publisher = PosePublisher::new(handle.clone(), bus.clone());
    if cfg.pose_sink == PoseSinkKind::Stdout {
        publisher = publisher.with_sink(Box::new(JsonLinesSink::new(
            std::io::stdout(),
            cfg.team_number,
        )));
    }
    supervisor.add(Worker::new("publisher", cfg.stay_alive, cfg.publish_hz, Box::new(publisher)));

    if cfg.pose_logging {
        let writer = TrajectoryWriter::create(&cfg.trajectory_file)?;
        let logger = TrajectoryLogger::new(handle, writer);
        supervisor.add(Worker::new("trajectory", cfg.stay_alive, cfg.fusion_hz, Box::new(logger)));
    }

    let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = shutdown_tx.try_send(());
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop with SIGKILL");
    }

    supervisor.start_all()?;
    supervisor.run_until(&shutdown_rx)
}

fn print_banner() {
    println!();
    println!("{}", r#"  _             _            "#.bold().cyan());
    println!("{}", r#" | |_ __ _ __ _| |___  __    "#.bold().cyan());
    println!("{}", r#" |  _/ _` / _` | / _ \/ _|   "#.bold().cyan());
    println!("{}", r#"  \__\__,_\__, |_\___/\__|   "#.bold().cyan());
    println!("{}", r#"          |___/              "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "tagloc".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Multi-camera tag localizer");
    println!();
}
