pub mod config;
pub mod db;
pub mod device_manager;
pub mod error;
pub mod services;

pub use error::{Error, Result};

// Re-export main components for easier use
pub use device_manager::{CameraKind, CameraStatus, DetectedCamera, DiscoveryOrigin};
pub use services::{
    ConfigLoader, ContinuousDetectionScheduler, DiscoveryOrchestrator, PipelineCameraConfig,
    Reconciler, TripwireConfig,
};
