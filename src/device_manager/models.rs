use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// First id handed to each discovery origin. Ranges never overlap.
pub const LOCAL_ID_BASE: i32 = 0;
pub const MULTICAST_ID_BASE: i32 = 1000;
pub const SUBNET_SCAN_ID_BASE: i32 = 2000;

/// Physical attachment of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    Local,
    Network,
}

impl fmt::Display for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Which discovery method produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOrigin {
    Local,
    Multicast,
    SubnetScan,
    /// Already configured, not rediscovered this round
    Persisted,
}

impl DiscoveryOrigin {
    /// Half-open id range reserved for this origin, `None` for persisted
    /// cameras which keep whatever id they were stored with.
    pub fn id_range(&self) -> Option<(i32, i32)> {
        match self {
            Self::Local => Some((LOCAL_ID_BASE, MULTICAST_ID_BASE)),
            Self::Multicast => Some((MULTICAST_ID_BASE, SUBNET_SCAN_ID_BASE)),
            Self::SubnetScan => Some((SUBNET_SCAN_ID_BASE, i32::MAX)),
            Self::Persisted => None,
        }
    }

    pub fn owns_id(&self, id: i32) -> bool {
        match self.id_range() {
            Some((start, end)) => id >= start && id < end,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Active,
    Inactive,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A camera found during one discovery round. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedCamera {
    pub id: i32,
    pub display_name: String,
    pub kind: CameraKind,
    pub origin: DiscoveryOrigin,
    /// Device index as a string, or a stream URI
    pub source: String,
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub status: CameraStatus,
    pub is_working: bool,
    pub last_seen: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub stream_url: Option<String>,
    pub credentials: Option<Credentials>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub onvif_supported: bool,
}

impl DetectedCamera {
    /// Camera attached to this host at a capture device index
    pub fn local(index: u32, resolution: Resolution, frame_rate: u32) -> Self {
        let label = if index == 0 { "Built-in" } else { "USB" };
        Self {
            id: LOCAL_ID_BASE + index as i32,
            display_name: format!("{} Camera {}", label, index),
            kind: CameraKind::Local,
            origin: DiscoveryOrigin::Local,
            source: index.to_string(),
            resolution,
            frame_rate,
            status: CameraStatus::Active,
            is_working: false,
            last_seen: Utc::now(),
            ip_address: None,
            stream_url: None,
            credentials: None,
            manufacturer: None,
            model: None,
            firmware_version: None,
            onvif_supported: false,
        }
    }

    /// Network camera reachable at `stream_url`. The id is provisional until
    /// the orchestrator assigns identities.
    pub fn network(origin: DiscoveryOrigin, ip: &str, stream_url: &str) -> Self {
        Self {
            id: origin.id_range().map(|(start, _)| start).unwrap_or_default(),
            display_name: format!("IP Camera {}", ip),
            kind: CameraKind::Network,
            origin,
            source: stream_url.to_string(),
            resolution: Resolution::new(1280, 720),
            frame_rate: 25,
            status: CameraStatus::Active,
            is_working: false,
            last_seen: Utc::now(),
            ip_address: Some(ip.to_string()),
            stream_url: Some(stream_url.to_string()),
            credentials: None,
            manufacturer: None,
            model: None,
            firmware_version: None,
            onvif_supported: false,
        }
    }

    /// Device index for local cameras
    pub fn device_index(&self) -> Option<u32> {
        match self.kind {
            CameraKind::Local => self.source.parse().ok(),
            CameraKind::Network => None,
        }
    }
}

/// Device-service endpoint answered to a WS-Discovery probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub ip_address: String,
    pub service_urls: Vec<String>,
    pub name: Option<String>,
}

/// Open port that answered like a camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHit {
    pub ip_address: String,
    pub port: u16,
    pub protocol: ServiceProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceProtocol {
    Http,
    Rtsp,
}

/// Result of probing one (host, port) pair. Distinguishes a plain negative
/// from a probe that failed for another reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome<T> {
    Found(T),
    NotFound,
    Failed(String),
}

impl<T> ProbeOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Manufacturer data and stream URIs gathered for a network device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDetails {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
    pub stream_urls: Vec<String>,
    pub onvif_supported: bool,
    pub credentials: Option<Credentials>,
}

pub const UNKNOWN: &str = "Unknown";

impl Default for DeviceDetails {
    fn default() -> Self {
        Self {
            manufacturer: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
            firmware_version: UNKNOWN.to_string(),
            stream_urls: Vec::new(),
            onvif_supported: false,
            credentials: None,
        }
    }
}
