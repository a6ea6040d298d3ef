//! Builds the typed camera configuration the tracking pipeline consumes.
//!
//! Stored rows are validated on every load. A camera with an invalid field
//! is left out of the result; an invalid or inactive tripwire is left out of
//! its camera. Neither is reported to the caller as an error.

use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::db::models::{CameraConfig, TripwireZone};
use crate::db::ConfigurationStore;
use crate::device_manager::Resolution;
use crate::error::{Error, Result};

const SPACING_RANGE: (f64, f64) = (0.001, 0.1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    Entry,
    Exit,
    General,
}

impl FromStr for CameraType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entry" => Ok(Self::Entry),
            "exit" => Ok(Self::Exit),
            "general" => Ok(Self::General),
            other => Err(Error::Validation(format!("invalid camera_type: {}", other))),
        }
    }
}

impl fmt::Display for CameraType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
            Self::General => write!(f, "general"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripwireDirection {
    Horizontal,
    Vertical,
}

impl FromStr for TripwireDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "horizontal" => Ok(Self::Horizontal),
            "vertical" => Ok(Self::Vertical),
            other => Err(Error::Validation(format!("invalid direction: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Entry,
    Exit,
    Counting,
}

impl FromStr for DetectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "entry" => Ok(Self::Entry),
            "exit" => Ok(Self::Exit),
            "counting" => Ok(Self::Counting),
            other => Err(Error::Validation(format!("invalid detection_type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripwireConfig {
    pub name: String,
    pub position: f64,
    pub spacing: f64,
    pub direction: TripwireDirection,
    pub detection_type: DetectionType,
}

/// Read-only camera configuration handed to the tracking pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineCameraConfig {
    pub camera_id: i32,
    pub camera_name: String,
    pub gpu_id: u32,
    pub camera_type: CameraType,
    pub resolution: Resolution,
    pub fps: u32,
    /// Active, valid zones only
    pub tripwires: Vec<TripwireConfig>,
}

/// Camera-level fields that passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidCamera {
    pub camera_type: CameraType,
    pub resolution: Resolution,
    pub fps: u32,
    pub gpu_id: u32,
}

pub fn validate_camera(row: &CameraConfig) -> Result<ValidCamera> {
    let camera_type = row.camera_type.parse::<CameraType>()?;

    let (width, height) = (row.resolution_width, row.resolution_height);
    if width <= 0 || height <= 0 {
        return Err(Error::Validation(format!("invalid resolution: {}x{}", width, height)));
    }
    if row.fps <= 0 {
        return Err(Error::Validation(format!("invalid fps: {}", row.fps)));
    }
    let gpu_id = u32::try_from(row.gpu_id)
        .map_err(|_| Error::Validation(format!("invalid gpu_id: {}", row.gpu_id)))?;

    Ok(ValidCamera {
        camera_type,
        resolution: Resolution::new(width as u32, height as u32),
        fps: row.fps as u32,
        gpu_id,
    })
}

pub fn validate_tripwire(zone: &TripwireZone) -> Result<TripwireConfig> {
    if !(0.0..=1.0).contains(&zone.position) {
        return Err(Error::Validation(format!("invalid position: {}", zone.position)));
    }
    let (min, max) = SPACING_RANGE;
    if !(min..=max).contains(&zone.spacing) {
        return Err(Error::Validation(format!("invalid spacing: {}", zone.spacing)));
    }

    Ok(TripwireConfig {
        name: zone.name.clone(),
        position: zone.position,
        spacing: zone.spacing,
        direction: zone.direction.parse()?,
        detection_type: zone.detection_type.parse()?,
    })
}

pub struct ConfigLoader {
    store: Arc<dyn ConfigurationStore>,
}

impl ConfigLoader {
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        Self { store }
    }

    pub async fn load_active(&self) -> Result<Vec<PipelineCameraConfig>> {
        let rows = self.store.list_active().await?;
        let configs = self.convert_all(rows).await;
        info!("Loaded {} active camera configuration(s)", configs.len());
        Ok(configs)
    }

    pub async fn load_all(&self) -> Result<Vec<PipelineCameraConfig>> {
        let rows = self.store.list_all().await?;
        let configs = self.convert_all(rows).await;
        info!("Loaded {} camera configuration(s)", configs.len());
        Ok(configs)
    }

    /// `None` when the camera does not exist, fails validation or its
    /// tripwires cannot be read
    pub async fn load_by_id(&self, camera_id: i32) -> Result<Option<PipelineCameraConfig>> {
        match self.store.get_by_id(camera_id).await? {
            Some(row) => Ok(self.convert(row).await),
            None => Ok(None),
        }
    }

    /// Reload after a "reload configurations" signal
    pub async fn refresh(&self) -> Result<Vec<PipelineCameraConfig>> {
        info!("Refreshing camera configurations");
        self.load_active().await
    }

    async fn convert_all(&self, rows: Vec<CameraConfig>) -> Vec<PipelineCameraConfig> {
        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(config) = self.convert(row).await {
                configs.push(config);
            }
        }
        configs
    }

    /// Failures concern this camera only and are logged, never returned
    async fn convert(&self, row: CameraConfig) -> Option<PipelineCameraConfig> {
        let camera = match validate_camera(&row) {
            Ok(camera) => camera,
            Err(e) => {
                warn!("Excluding camera {}: {}", row.camera_id, e);
                return None;
            }
        };

        let zones = match self.store.list_zones(row.camera_id).await {
            Ok(zones) => zones,
            Err(e) => {
                error!("Excluding camera {}, tripwires unreadable: {}", row.camera_id, e);
                return None;
            }
        };

        let tripwires = zones
            .iter()
            .filter(|zone| zone.is_active)
            .filter_map(|zone| match validate_tripwire(zone) {
                Ok(tripwire) => Some(tripwire),
                Err(e) => {
                    warn!(
                        "Excluding tripwire {} ({}) of camera {}: {}",
                        zone.id, zone.name, row.camera_id, e
                    );
                    None
                }
            })
            .collect();

        Some(PipelineCameraConfig {
            camera_id: row.camera_id,
            camera_name: row.display_name(),
            gpu_id: camera.gpu_id,
            camera_type: camera.camera_type,
            resolution: camera.resolution,
            fps: camera.fps,
            tripwires,
        })
    }
}
