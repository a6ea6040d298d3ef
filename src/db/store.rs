use async_trait::async_trait;

use crate::db::models::{CameraConfig, CameraUpdate, NewCameraConfig, NewTripwireZone, TripwireZone};
use crate::error::Result;

/// Durable camera and tripwire configuration.
///
/// Discovery only ever reads and upserts through this seam; it makes no
/// assumption about the engine behind it. Implementations must enforce
/// uniqueness of both `camera_id` and `source`, reporting a clash as
/// `Error::AlreadyExists`.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Camera whose reconciliation key equals `source`
    async fn get_by_source(&self, source: &str) -> Result<Option<CameraConfig>>;

    async fn get_by_id(&self, camera_id: i32) -> Result<Option<CameraConfig>>;

    /// All cameras ordered by `camera_id`
    async fn list_all(&self) -> Result<Vec<CameraConfig>>;

    /// Cameras with `is_active = true`, ordered by `camera_id`
    async fn list_active(&self) -> Result<Vec<CameraConfig>>;

    async fn create(&self, camera: NewCameraConfig) -> Result<CameraConfig>;

    /// Apply a partial update. `Error::NotFound` when the camera is missing.
    async fn update(&self, camera_id: i32, fields: CameraUpdate) -> Result<CameraConfig>;

    /// `Error::NotFound` when the parent camera is missing.
    async fn create_zone(&self, camera_id: i32, zone: NewTripwireZone) -> Result<TripwireZone>;

    /// Zones of one camera ordered by id, active or not
    async fn list_zones(&self, camera_id: i32) -> Result<Vec<TripwireZone>>;
}
