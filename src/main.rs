use anyhow::Result;
use camera_discovery::config::{self, Config};
use camera_discovery::db;
use camera_discovery::device_manager::default_frame_grabber;
use camera_discovery::services::{
    ConfigLoader, ContinuousDetectionScheduler, DiscoveryOrchestrator, Reconciler,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();
}

async fn run_app() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;

    init_logging(&config);
    info!("Starting camera discovery service");
    match &config_path {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file given, using defaults"),
    }

    let grabber = default_frame_grabber()?;
    let store = db::open_store(&config.database).await?;

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(&config, store.clone(), grabber)?);
    let reconciler = Arc::new(Reconciler::new(store.clone(), config.reconciler.clone()));
    let scheduler = ContinuousDetectionScheduler::new(
        orchestrator.clone(),
        reconciler,
        config.scheduler.clone(),
    );
    let loader = ConfigLoader::new(store);

    if config.scheduler.autostart {
        scheduler
            .start(Duration::from_secs(config.scheduler.interval_secs))
            .await;
    } else {
        match scheduler.run_once().await {
            Ok(summary) => info!(
                "Single detection round: {} working, {} created, {} updated",
                summary.working, summary.created, summary.updated
            ),
            Err(e) => error!("Detection round failed: {:#}", e),
        }
    }

    match loader.load_active().await {
        Ok(cameras) => {
            for camera in &cameras {
                info!(
                    "Camera {} ({}): {} {} @ {} fps, {} tripwire(s)",
                    camera.camera_id,
                    camera.camera_name,
                    camera.camera_type,
                    camera.resolution,
                    camera.fps,
                    camera.tripwires.len()
                );
            }
        }
        Err(e) => warn!("Failed to load camera configurations: {}", e),
    }

    // Wait for termination signals
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    if scheduler.is_running().await {
        scheduler.stop().await;
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_app()) {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
