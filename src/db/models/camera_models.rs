use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted camera configuration.
///
/// Enumerated columns (`camera_type`, `status`) are kept as the strings the
/// store holds; they are parsed and validated when the pipeline-facing
/// configuration is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraConfig {
    pub camera_id: i32,
    /// Reconciliation key: device index or stream URL
    pub source: Option<String>,
    pub name: Option<String>,
    pub camera_type: String,
    pub resolution_width: i32,
    pub resolution_height: i32,
    pub fps: i32,
    pub gpu_id: i32,
    pub is_active: bool,
    pub status: String,
    pub location: Option<String>,
    pub location_description: Option<String>,
    pub ip_address: Option<String>,
    pub stream_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub onvif_supported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CameraConfig {
    /// The natural key used to match discovery results against this row.
    ///
    /// Rows written before `source` existed fall back to the stream URL,
    /// then to the camera id (the device index of a local camera).
    pub fn source_key(&self) -> String {
        self.source
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.stream_url.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| self.camera_id.to_string())
    }

    /// Name with a fallback for rows the operator never named
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("Camera {}", self.camera_id),
        }
    }
}

/// Data for a camera row about to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCameraConfig {
    pub camera_id: i32,
    pub source: String,
    pub name: Option<String>,
    pub camera_type: String,
    pub resolution_width: i32,
    pub resolution_height: i32,
    pub fps: i32,
    pub gpu_id: i32,
    pub is_active: bool,
    pub status: String,
    pub location_description: Option<String>,
    pub ip_address: Option<String>,
    pub stream_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub onvif_supported: bool,
}

impl NewCameraConfig {
    pub(crate) fn into_camera(self, now: DateTime<Utc>) -> CameraConfig {
        CameraConfig {
            camera_id: self.camera_id,
            source: Some(self.source),
            name: self.name,
            camera_type: self.camera_type,
            resolution_width: self.resolution_width,
            resolution_height: self.resolution_height,
            fps: self.fps,
            gpu_id: self.gpu_id,
            is_active: self.is_active,
            status: self.status,
            location: None,
            location_description: self.location_description,
            ip_address: self.ip_address,
            stream_url: self.stream_url,
            username: self.username,
            password: self.password,
            manufacturer: self.manufacturer,
            model: self.model,
            firmware_version: self.firmware_version,
            onvif_supported: self.onvif_supported,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a camera row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub status: Option<String>,
    pub stream_url: Option<String>,
    pub ip_address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub resolution_width: Option<i32>,
    pub resolution_height: Option<i32>,
    pub fps: Option<i32>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub onvif_supported: Option<bool>,
}

impl CameraUpdate {
    pub fn is_empty(&self) -> bool {
        *self == CameraUpdate::default()
    }

    /// Apply the update to an in-memory row
    pub fn apply(&self, camera: &mut CameraConfig, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            camera.name = Some(name.clone());
        }
        if let Some(is_active) = self.is_active {
            camera.is_active = is_active;
        }
        if let Some(status) = &self.status {
            camera.status = status.clone();
        }
        if let Some(stream_url) = &self.stream_url {
            camera.stream_url = Some(stream_url.clone());
        }
        if let Some(ip_address) = &self.ip_address {
            camera.ip_address = Some(ip_address.clone());
        }
        if let Some(username) = &self.username {
            camera.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            camera.password = Some(password.clone());
        }
        if let Some(width) = self.resolution_width {
            camera.resolution_width = width;
        }
        if let Some(height) = self.resolution_height {
            camera.resolution_height = height;
        }
        if let Some(fps) = self.fps {
            camera.fps = fps;
        }
        if let Some(manufacturer) = &self.manufacturer {
            camera.manufacturer = Some(manufacturer.clone());
        }
        if let Some(model) = &self.model {
            camera.model = Some(model.clone());
        }
        if let Some(firmware_version) = &self.firmware_version {
            camera.firmware_version = Some(firmware_version.clone());
        }
        if let Some(onvif_supported) = self.onvif_supported {
            camera.onvif_supported = onvif_supported;
        }
        camera.updated_at = now;
    }
}

/// Persisted tripwire zone, child of a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TripwireZone {
    pub id: i32,
    pub camera_id: i32,
    pub name: String,
    pub position: f64,
    pub spacing: f64,
    pub direction: String,
    pub detection_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for a tripwire zone about to be created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTripwireZone {
    pub name: String,
    pub position: f64,
    pub spacing: f64,
    pub direction: String,
    pub detection_type: String,
    pub is_active: bool,
}

impl NewTripwireZone {
    /// Zone attached to every camera the first time it is stored
    pub fn entry_default() -> Self {
        Self {
            name: "EntryDetection".to_string(),
            position: 0.5,
            spacing: 0.01,
            direction: "horizontal".to_string(),
            detection_type: "entry".to_string(),
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(camera_id: i32) -> CameraConfig {
        NewCameraConfig {
            camera_id,
            source: String::new(),
            name: None,
            camera_type: "entry".to_string(),
            resolution_width: 640,
            resolution_height: 480,
            fps: 30,
            gpu_id: 0,
            is_active: true,
            status: "active".to_string(),
            location_description: None,
            ip_address: None,
            stream_url: None,
            username: None,
            password: None,
            manufacturer: None,
            model: None,
            firmware_version: None,
            onvif_supported: false,
        }
        .into_camera(Utc::now())
    }

    #[test]
    fn source_key_falls_back_to_stream_url_then_id() {
        let mut cam = camera(3);
        assert_eq!(cam.source_key(), "3");

        cam.stream_url = Some("rtsp://10.0.0.5:554/stream1".to_string());
        assert_eq!(cam.source_key(), "rtsp://10.0.0.5:554/stream1");

        cam.source = Some("rtsp://10.0.0.5:554/live".to_string());
        assert_eq!(cam.source_key(), "rtsp://10.0.0.5:554/live");
    }

    #[test]
    fn update_only_touches_given_columns() {
        let mut cam = camera(1);
        cam.name = Some("Lobby".to_string());

        let update = CameraUpdate {
            fps: Some(15),
            status: Some("inactive".to_string()),
            ..Default::default()
        };
        update.apply(&mut cam, Utc::now());

        assert_eq!(cam.fps, 15);
        assert_eq!(cam.status, "inactive");
        assert_eq!(cam.name.as_deref(), Some("Lobby"));
        assert_eq!(cam.resolution_width, 640);
    }
}
