use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::models::{CameraConfig, CameraUpdate, NewCameraConfig, NewTripwireZone, TripwireZone};
use crate::db::store::ConfigurationStore;
use crate::error::{Error, Result};

#[derive(Default)]
struct Tables {
    cameras: BTreeMap<i32, CameraConfig>,
    zones: Vec<TripwireZone>,
    next_zone_id: i32,
}

/// In-process configuration store with the same uniqueness rules as the
/// PostgreSQL schema. Used when no database URL is configured.
#[derive(Default)]
pub struct MemoryConfigurationStore {
    tables: RwLock<Tables>,
}

impl MemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed row, bypassing defaults. Operator edits made
    /// outside discovery land here.
    pub async fn put(&self, camera: CameraConfig) {
        self.tables.write().await.cameras.insert(camera.camera_id, camera);
    }

    /// Replace a zone row in place, keyed by its id
    pub async fn put_zone(&self, zone: TripwireZone) {
        let mut tables = self.tables.write().await;
        match tables.zones.iter_mut().find(|z| z.id == zone.id) {
            Some(existing) => *existing = zone,
            None => {
                tables.next_zone_id = tables.next_zone_id.max(zone.id);
                tables.zones.push(zone);
            }
        }
    }
}

#[async_trait]
impl ConfigurationStore for MemoryConfigurationStore {
    async fn get_by_source(&self, source: &str) -> Result<Option<CameraConfig>> {
        let tables = self.tables.read().await;
        Ok(tables
            .cameras
            .values()
            .find(|c| c.source_key() == source)
            .cloned())
    }

    async fn get_by_id(&self, camera_id: i32) -> Result<Option<CameraConfig>> {
        Ok(self.tables.read().await.cameras.get(&camera_id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<CameraConfig>> {
        Ok(self.tables.read().await.cameras.values().cloned().collect())
    }

    async fn list_active(&self) -> Result<Vec<CameraConfig>> {
        Ok(self
            .tables
            .read()
            .await
            .cameras
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect())
    }

    async fn create(&self, camera: NewCameraConfig) -> Result<CameraConfig> {
        let mut tables = self.tables.write().await;

        if tables.cameras.contains_key(&camera.camera_id) {
            return Err(Error::AlreadyExists(format!(
                "camera_id {} is already in use",
                camera.camera_id
            )));
        }
        if tables
            .cameras
            .values()
            .any(|c| c.source_key() == camera.source)
        {
            return Err(Error::AlreadyExists(format!(
                "source {} is already configured",
                camera.source
            )));
        }

        let row = camera.into_camera(Utc::now());
        debug!("Stored camera {} ({})", row.camera_id, row.source_key());
        tables.cameras.insert(row.camera_id, row.clone());
        Ok(row)
    }

    async fn update(&self, camera_id: i32, fields: CameraUpdate) -> Result<CameraConfig> {
        let mut tables = self.tables.write().await;

        if let Some(stream_url) = &fields.stream_url {
            let clash = tables.cameras.values().any(|c| {
                c.camera_id != camera_id && c.stream_url.as_deref() == Some(stream_url.as_str())
            });
            if clash {
                return Err(Error::AlreadyExists(format!(
                    "stream url {} belongs to another camera",
                    stream_url
                )));
            }
        }

        let camera = tables
            .cameras
            .get_mut(&camera_id)
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))?;
        fields.apply(camera, Utc::now());
        Ok(camera.clone())
    }

    async fn create_zone(&self, camera_id: i32, zone: NewTripwireZone) -> Result<TripwireZone> {
        let mut tables = self.tables.write().await;
        if !tables.cameras.contains_key(&camera_id) {
            return Err(Error::NotFound(format!("camera {}", camera_id)));
        }

        tables.next_zone_id += 1;
        let now = Utc::now();
        let row = TripwireZone {
            id: tables.next_zone_id,
            camera_id,
            name: zone.name,
            position: zone.position,
            spacing: zone.spacing,
            direction: zone.direction,
            detection_type: zone.detection_type,
            is_active: zone.is_active,
            created_at: now,
            updated_at: now,
        };
        tables.zones.push(row.clone());
        Ok(row)
    }

    async fn list_zones(&self, camera_id: i32) -> Result<Vec<TripwireZone>> {
        let tables = self.tables.read().await;
        let mut zones: Vec<_> = tables
            .zones
            .iter()
            .filter(|z| z.camera_id == camera_id)
            .cloned()
            .collect();
        zones.sort_by_key(|z| z.id);
        Ok(zones)
    }
}
