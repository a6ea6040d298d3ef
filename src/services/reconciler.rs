use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::config::ReconcilerConfig;
use crate::db::models::{CameraConfig, CameraUpdate, NewCameraConfig, NewTripwireZone};
use crate::db::ConfigurationStore;
use crate::device_manager::models::UNKNOWN;
use crate::device_manager::{CameraKind, CameraStatus, DetectedCamera, DiscoveryOrigin};
use crate::error::{Error, Result};

const DEFAULT_CAMERA_TYPE: &str = "entry";
const DEFAULT_GPU: i32 = 0;

/// What one reconciliation pass wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<i32>,
    pub updated: Vec<i32>,
    /// (source, reason) of candidates that could not be written
    pub failed: Vec<(String, String)>,
}

enum Written {
    Created(i32),
    Updated(i32),
}

/// Upserts validated cameras into the configuration store
pub struct Reconciler {
    store: Arc<dyn ConfigurationStore>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ConfigurationStore>, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    /// Write every working camera. A failure is recorded against its source
    /// and the pass continues with the next camera.
    pub async fn reconcile(&self, cameras: &[DetectedCamera]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for camera in cameras {
            if !camera.is_working {
                warn!("Refusing to store unvalidated camera {}", camera.source);
                report
                    .failed
                    .push((camera.source.clone(), "camera was not validated".to_string()));
                continue;
            }

            match self.reconcile_one(camera).await {
                Ok(Written::Created(id)) => report.created.push(id),
                Ok(Written::Updated(id)) => report.updated.push(id),
                Err(e) => {
                    error!("Failed to reconcile camera {}: {}", camera.source, e);
                    report.failed.push((camera.source.clone(), e.to_string()));
                }
            }
        }

        info!(
            "Reconciled {} camera(s): {} created, {} updated, {} failed",
            cameras.len(),
            report.created.len(),
            report.updated.len(),
            report.failed.len()
        );
        report
    }

    /// Set the status of configured cameras that stopped delivering frames.
    /// The active flag stays as the operator left it.
    pub async fn mark_offline<'a>(&self, cameras: impl IntoIterator<Item = &'a DetectedCamera>) -> usize {
        let mut marked = 0;
        for camera in cameras {
            let Ok(Some(existing)) = self.store.get_by_source(&camera.source).await else {
                continue;
            };
            if existing.status == CameraStatus::Inactive.to_string() {
                continue;
            }
            let update = CameraUpdate {
                status: Some(CameraStatus::Inactive.to_string()),
                ..Default::default()
            };
            match self.store.update(existing.camera_id, update).await {
                Ok(_) => {
                    warn!("Camera {} ({}) is not delivering frames", existing.camera_id, camera.source);
                    marked += 1;
                }
                Err(e) => error!("Failed to mark camera {} offline: {}", existing.camera_id, e),
            }
        }
        marked
    }

    async fn reconcile_one(&self, camera: &DetectedCamera) -> Result<Written> {
        if let Some(existing) = self.store.get_by_source(&camera.source).await? {
            let update = self.update_for(&existing, camera);
            if update.is_empty() {
                debug!("Camera {} unchanged", existing.camera_id);
            } else {
                self.store.update(existing.camera_id, update).await?;
                debug!("Updated camera {} from {}", existing.camera_id, camera.source);
            }
            return Ok(Written::Updated(existing.camera_id));
        }

        if camera.origin == DiscoveryOrigin::Persisted {
            return Err(Error::NotFound(format!(
                "camera for {} was removed during the round",
                camera.source
            )));
        }

        let camera_id = self.free_id(camera).await?;
        let created = self.store.create(new_config(camera, camera_id)).await?;
        info!(
            "Configured new {} camera {} ({}) from {}",
            camera.kind,
            created.camera_id,
            created.display_name(),
            camera.source
        );

        if let Err(e) = self
            .store
            .create_zone(created.camera_id, NewTripwireZone::entry_default())
            .await
        {
            error!(
                "Failed to create default tripwire for camera {}: {}",
                created.camera_id, e
            );
        }

        Ok(Written::Created(created.camera_id))
    }

    /// The candidate's id when still free, else the lowest free id in its range
    async fn free_id(&self, camera: &DetectedCamera) -> Result<i32> {
        if camera.origin.owns_id(camera.id) && self.store.get_by_id(camera.id).await?.is_none() {
            return Ok(camera.id);
        }

        let taken: std::collections::HashSet<i32> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|c| c.camera_id)
            .collect();
        let (start, end) = camera.origin.id_range().unwrap_or((0, i32::MAX));
        (start..end)
            .find(|id| !taken.contains(id))
            .ok_or_else(|| Error::AlreadyExists(format!("no free camera id for {} cameras", camera.kind)))
    }

    fn update_for(&self, existing: &CameraConfig, camera: &DetectedCamera) -> CameraUpdate {
        let blank_name = existing.name.as_deref().map(str::trim).unwrap_or("").is_empty();
        let status = CameraStatus::Active.to_string();

        let mut update = CameraUpdate {
            name: blank_name.then(|| camera.display_name.clone()),
            is_active: (self.config.reactivate_on_detection && !existing.is_active).then_some(true),
            status: (existing.status != status).then_some(status),
            resolution_width: changed(existing.resolution_width, camera.resolution.width),
            resolution_height: changed(existing.resolution_height, camera.resolution.height),
            fps: changed(existing.fps, camera.frame_rate),
            ..Default::default()
        };

        if camera.kind == CameraKind::Network {
            update.stream_url = differs(&existing.stream_url, &camera.stream_url);
            update.ip_address = differs(&existing.ip_address, &camera.ip_address);
            if let Some(credentials) = &camera.credentials {
                update.username = differs(&existing.username, &Some(credentials.username.clone()));
                update.password = differs(&existing.password, &Some(credentials.password.clone()));
            }
            update.manufacturer = differs(&existing.manufacturer, &known(&camera.manufacturer));
            update.model = differs(&existing.model, &known(&camera.model));
            update.firmware_version = differs(&existing.firmware_version, &known(&camera.firmware_version));
            if camera.onvif_supported && !existing.onvif_supported {
                update.onvif_supported = Some(true);
            }
        }

        update
    }
}

fn changed(stored: i32, observed: u32) -> Option<i32> {
    let observed = i32::try_from(observed).ok().filter(|v| *v > 0)?;
    (observed != stored).then_some(observed)
}

/// New value when discovery produced one that differs from the stored one
fn differs(stored: &Option<String>, discovered: &Option<String>) -> Option<String> {
    match discovered {
        Some(value) if !value.is_empty() && stored.as_ref() != Some(value) => Some(value.clone()),
        _ => None,
    }
}

fn known(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty() && v != UNKNOWN)
}

fn new_config(camera: &DetectedCamera, camera_id: i32) -> NewCameraConfig {
    NewCameraConfig {
        camera_id,
        source: camera.source.clone(),
        name: Some(camera.display_name.clone()),
        camera_type: DEFAULT_CAMERA_TYPE.to_string(),
        resolution_width: i32::try_from(camera.resolution.width).unwrap_or(0),
        resolution_height: i32::try_from(camera.resolution.height).unwrap_or(0),
        fps: i32::try_from(camera.frame_rate).unwrap_or(0),
        gpu_id: DEFAULT_GPU,
        is_active: true,
        status: CameraStatus::Active.to_string(),
        location_description: Some(format!("Auto-detected {} camera", camera.kind)),
        ip_address: camera.ip_address.clone(),
        stream_url: camera.stream_url.clone(),
        username: camera.credentials.as_ref().map(|c| c.username.clone()),
        password: camera.credentials.as_ref().map(|c| c.password.clone()),
        manufacturer: known(&camera.manufacturer),
        model: known(&camera.model),
        firmware_version: known(&camera.firmware_version),
        onvif_supported: camera.onvif_supported,
    }
}
