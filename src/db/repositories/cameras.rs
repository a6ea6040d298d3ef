use crate::{
    db::models::{CameraConfig, CameraUpdate, NewCameraConfig, NewTripwireZone, TripwireZone},
    db::store::ConfigurationStore,
    error::{Error, Result},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

const CAMERA_COLUMNS: &str = r#"
    camera_id, source, name, camera_type, resolution_width, resolution_height, fps,
    gpu_id, is_active, status, location, location_description, ip_address, stream_url,
    username, password, manufacturer, model, firmware_version, onvif_supported,
    created_at, updated_at
"#;

const ZONE_COLUMNS: &str = r#"
    id, camera_id, name, position, spacing, direction, detection_type, is_active,
    created_at, updated_at
"#;

/// Camera configuration repository backed by PostgreSQL
#[derive(Clone)]
pub struct PgConfigurationStore {
    pool: Arc<PgPool>,
}

impl PgConfigurationStore {
    /// Create a new camera configuration repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn db_error(action: &str, err: sqlx::Error) -> Error {
    match Error::from(err) {
        Error::Database(msg) => Error::Database(format!("Failed to {}: {}", action, msg)),
        other => other,
    }
}

#[async_trait]
impl ConfigurationStore for PgConfigurationStore {
    async fn get_by_source(&self, source: &str) -> Result<Option<CameraConfig>> {
        // Legacy rows without a source column fall back to stream_url / camera_id.
        sqlx::query_as::<_, CameraConfig>(&format!(
            r#"
            SELECT {CAMERA_COLUMNS}
            FROM camera_configs
            WHERE COALESCE(NULLIF(source, ''), NULLIF(stream_url, ''), camera_id::text) = $1
            LIMIT 1
            "#
        ))
        .bind(source)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("get camera by source", e))
    }

    async fn get_by_id(&self, camera_id: i32) -> Result<Option<CameraConfig>> {
        sqlx::query_as::<_, CameraConfig>(&format!(
            "SELECT {CAMERA_COLUMNS} FROM camera_configs WHERE camera_id = $1"
        ))
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("get camera by ID", e))
    }

    async fn list_all(&self) -> Result<Vec<CameraConfig>> {
        sqlx::query_as::<_, CameraConfig>(&format!(
            "SELECT {CAMERA_COLUMNS} FROM camera_configs ORDER BY camera_id"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("get all cameras", e))
    }

    async fn list_active(&self) -> Result<Vec<CameraConfig>> {
        sqlx::query_as::<_, CameraConfig>(&format!(
            "SELECT {CAMERA_COLUMNS} FROM camera_configs WHERE is_active = TRUE ORDER BY camera_id"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("get active cameras", e))
    }

    async fn create(&self, camera: NewCameraConfig) -> Result<CameraConfig> {
        info!("Creating camera {} for source {}", camera.camera_id, camera.source);

        let now = Utc::now();
        sqlx::query_as::<_, CameraConfig>(&format!(
            r#"
            INSERT INTO camera_configs (
                camera_id, source, name, camera_type, resolution_width, resolution_height,
                fps, gpu_id, is_active, status, location_description, ip_address,
                stream_url, username, password, manufacturer, model, firmware_version,
                onvif_supported, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21)
            RETURNING {CAMERA_COLUMNS}
            "#
        ))
        .bind(camera.camera_id)
        .bind(&camera.source)
        .bind(&camera.name)
        .bind(&camera.camera_type)
        .bind(camera.resolution_width)
        .bind(camera.resolution_height)
        .bind(camera.fps)
        .bind(camera.gpu_id)
        .bind(camera.is_active)
        .bind(&camera.status)
        .bind(&camera.location_description)
        .bind(&camera.ip_address)
        .bind(&camera.stream_url)
        .bind(&camera.username)
        .bind(&camera.password)
        .bind(&camera.manufacturer)
        .bind(&camera.model)
        .bind(&camera.firmware_version)
        .bind(camera.onvif_supported)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| db_error("create camera", e))
    }

    async fn update(&self, camera_id: i32, fields: CameraUpdate) -> Result<CameraConfig> {
        // COALESCE keeps the stored value for every column the update leaves unset.
        sqlx::query_as::<_, CameraConfig>(&format!(
            r#"
            UPDATE camera_configs
            SET name = COALESCE($1, name),
                is_active = COALESCE($2, is_active),
                status = COALESCE($3, status),
                stream_url = COALESCE($4, stream_url),
                ip_address = COALESCE($5, ip_address),
                username = COALESCE($6, username),
                password = COALESCE($7, password),
                resolution_width = COALESCE($8, resolution_width),
                resolution_height = COALESCE($9, resolution_height),
                fps = COALESCE($10, fps),
                manufacturer = COALESCE($11, manufacturer),
                model = COALESCE($12, model),
                firmware_version = COALESCE($13, firmware_version),
                onvif_supported = COALESCE($14, onvif_supported),
                updated_at = $15
            WHERE camera_id = $16
            RETURNING {CAMERA_COLUMNS}
            "#
        ))
        .bind(&fields.name)
        .bind(fields.is_active)
        .bind(&fields.status)
        .bind(&fields.stream_url)
        .bind(&fields.ip_address)
        .bind(&fields.username)
        .bind(&fields.password)
        .bind(fields.resolution_width)
        .bind(fields.resolution_height)
        .bind(fields.fps)
        .bind(&fields.manufacturer)
        .bind(&fields.model)
        .bind(&fields.firmware_version)
        .bind(fields.onvif_supported)
        .bind(Utc::now())
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| db_error("update camera", e))?
        .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }

    async fn create_zone(&self, camera_id: i32, zone: NewTripwireZone) -> Result<TripwireZone> {
        if self.get_by_id(camera_id).await?.is_none() {
            return Err(Error::NotFound(format!("camera {}", camera_id)));
        }

        let now = Utc::now();
        sqlx::query_as::<_, TripwireZone>(&format!(
            r#"
            INSERT INTO tripwires (
                camera_id, name, position, spacing, direction, detection_type, is_active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ZONE_COLUMNS}
            "#
        ))
        .bind(camera_id)
        .bind(&zone.name)
        .bind(zone.position)
        .bind(zone.spacing)
        .bind(&zone.direction)
        .bind(&zone.detection_type)
        .bind(zone.is_active)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| db_error("create tripwire", e))
    }

    async fn list_zones(&self, camera_id: i32) -> Result<Vec<TripwireZone>> {
        sqlx::query_as::<_, TripwireZone>(&format!(
            "SELECT {ZONE_COLUMNS} FROM tripwires WHERE camera_id = $1 ORDER BY id"
        ))
        .bind(camera_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| db_error("get camera tripwires", e))
    }
}
