pub mod config_loader;
pub mod detection;
pub mod reconciler;
pub mod scheduler;
#[cfg(test)]
mod tests;

pub use config_loader::{ConfigLoader, PipelineCameraConfig, TripwireConfig};
pub use detection::{DetectionRound, DetectionSnapshot, DiscoveryOrchestrator};
pub use reconciler::{ReconcileReport, Reconciler};
pub use scheduler::{ContinuousDetectionScheduler, RoundSummary, SchedulerState, SchedulerStatus};
