//! One discovery round: probe, enrich, number, validate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::models::CameraConfig;
use crate::db::ConfigurationStore;
use crate::device_manager::models::UNKNOWN;
use crate::device_manager::{
    CameraKind, CameraStatus, CameraValidator, Credentials, DetectedCamera, DeviceDetailFetcher,
    DiscoveredEndpoint, DiscoveryOrigin, FrameGrabber, LocalDeviceEnumerator,
    MulticastServiceProbe, Resolution, ScanHit, ServiceProtocol, SubnetPortScanner,
};

/// Network devices enriched at once
const DETAIL_CONCURRENCY: usize = 8;

const DEFAULT_HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    Multicast,
    SubnetScan,
}

impl fmt::Display for DiscoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multicast => write!(f, "multicast"),
            Self::SubnetScan => write!(f, "subnet scan"),
        }
    }
}

/// A sub-probe that failed outright; the round carried on without it
#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub phase: DiscoveryPhase,
    pub message: String,
}

/// Everything one call to [`DiscoveryOrchestrator::detect_all`] produced
#[derive(Debug, Clone)]
pub struct DetectionRound {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Validated cameras, the only input the reconciler accepts
    pub working: Vec<DetectedCamera>,
    pub rejected: Vec<(DetectedCamera, String)>,
    pub phase_errors: Vec<PhaseError>,
}

impl DetectionRound {
    pub fn count(&self, kind: CameraKind) -> usize {
        self.working.iter().filter(|c| c.kind == kind).count()
    }

    /// Already configured cameras that failed revalidation
    pub fn offline_persisted(&self) -> impl Iterator<Item = &DetectedCamera> {
        self.rejected
            .iter()
            .map(|(camera, _)| camera)
            .filter(|camera| camera.origin == DiscoveryOrigin::Persisted)
    }
}

/// Last completed round, replaced as a whole
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionSnapshot {
    pub round: u64,
    pub completed_at: Option<DateTime<Utc>>,
    pub cameras: Vec<DetectedCamera>,
}

/// A network host believed to be a camera, before stream selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDevice {
    pub ip_address: String,
    pub origin: DiscoveryOrigin,
    pub service_urls: Vec<String>,
    pub name: Option<String>,
    pub http_port: u16,
    pub rtsp_port: Option<u16>,
}

/// Combine multicast endpoints and scan hits into one device per IP.
///
/// Multicast results win; scan hits only add hosts multicast did not see.
pub fn merge_network_devices(endpoints: Vec<DiscoveredEndpoint>, hits: Vec<ScanHit>) -> Vec<NetworkDevice> {
    let mut devices: Vec<NetworkDevice> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for endpoint in endpoints {
        if index.contains_key(&endpoint.ip_address) {
            continue;
        }
        index.insert(endpoint.ip_address.clone(), devices.len());
        devices.push(NetworkDevice {
            ip_address: endpoint.ip_address,
            origin: DiscoveryOrigin::Multicast,
            service_urls: endpoint.service_urls,
            name: endpoint.name,
            http_port: DEFAULT_HTTP_PORT,
            rtsp_port: None,
        });
    }

    let mut scanned: BTreeMap<String, Vec<ScanHit>> = BTreeMap::new();
    for hit in hits {
        scanned.entry(hit.ip_address.clone()).or_default().push(hit);
    }
    for (ip, hits) in scanned {
        if index.contains_key(&ip) {
            continue;
        }
        let http_port = hits
            .iter()
            .find(|h| h.protocol == ServiceProtocol::Http)
            .map(|h| h.port)
            .unwrap_or(DEFAULT_HTTP_PORT);
        let rtsp_port = hits
            .iter()
            .find(|h| h.protocol == ServiceProtocol::Rtsp)
            .map(|h| h.port);
        index.insert(ip.clone(), devices.len());
        devices.push(NetworkDevice {
            ip_address: ip,
            origin: DiscoveryOrigin::SubnetScan,
            service_urls: Vec::new(),
            name: None,
            http_port,
            rtsp_port,
        });
    }

    devices
}

/// Give every candidate an id.
///
/// A candidate whose source is already persisted always keeps the stored
/// id, whichever phase found it this round. New sources get an id inside
/// their origin's range: local cameras prefer their device index, all
/// others take the lowest id in range not held by a persisted row or by an
/// earlier candidate of this round.
pub fn assign_identities(candidates: &mut [DetectedCamera], persisted: &[CameraConfig]) {
    let known: HashMap<String, i32> = persisted
        .iter()
        .map(|c| (c.source_key(), c.camera_id))
        .collect();
    let mut used: HashSet<i32> = persisted.iter().map(|c| c.camera_id).collect();

    for candidate in candidates.iter_mut() {
        if let Some(&stored) = known.get(&candidate.source) {
            candidate.id = stored;
            continue;
        }

        let Some((start, end)) = candidate.origin.id_range() else {
            used.insert(candidate.id);
            continue;
        };

        let preferred = candidate
            .device_index()
            .and_then(|index| i32::try_from(index).ok())
            .map(|index| start.saturating_add(index))
            .filter(|id| *id < end && !used.contains(id));

        let id = preferred.or_else(|| (start..end).find(|id| !used.contains(id)));
        match id {
            Some(id) => {
                candidate.id = id;
                used.insert(id);
            }
            None => warn!(
                "No free id left for {} candidate {}",
                candidate.kind, candidate.source
            ),
        }
    }
}

/// Candidate rebuilt from a stored row so it can be revalidated
fn persisted_candidate(row: &CameraConfig) -> DetectedCamera {
    let source = row.source_key();
    let kind = if source.parse::<u32>().is_ok() {
        CameraKind::Local
    } else {
        CameraKind::Network
    };
    let credentials = match (&row.username, &row.password) {
        (Some(username), Some(password)) if !username.is_empty() => Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };

    DetectedCamera {
        id: row.camera_id,
        display_name: row.display_name(),
        kind,
        origin: DiscoveryOrigin::Persisted,
        source,
        resolution: Resolution::new(
            u32::try_from(row.resolution_width).unwrap_or(0),
            u32::try_from(row.resolution_height).unwrap_or(0),
        ),
        frame_rate: u32::try_from(row.fps).unwrap_or(0),
        status: CameraStatus::Active,
        is_working: false,
        last_seen: row.updated_at,
        ip_address: row.ip_address.clone(),
        stream_url: row.stream_url.clone(),
        credentials,
        manufacturer: row.manufacturer.clone(),
        model: row.model.clone(),
        firmware_version: row.firmware_version.clone(),
        onvif_supported: row.onvif_supported,
    }
}

fn known_value(value: String) -> Option<String> {
    (!value.is_empty() && value != UNKNOWN).then_some(value)
}

pub struct DiscoveryOrchestrator {
    store: Arc<dyn ConfigurationStore>,
    local: Option<LocalDeviceEnumerator>,
    multicast: Option<MulticastServiceProbe>,
    scanner: Option<SubnetPortScanner>,
    details: Option<DeviceDetailFetcher>,
    validator: CameraValidator,
    latest: RwLock<Arc<DetectionSnapshot>>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn ConfigurationStore>,
        grabber: Arc<dyn FrameGrabber>,
    ) -> Result<Self> {
        let local = config
            .local
            .enabled
            .then(|| LocalDeviceEnumerator::new(config.local.clone(), grabber.clone()));
        let multicast = config
            .multicast
            .enabled
            .then(|| MulticastServiceProbe::new(config.multicast.clone()));
        let scanner = if config.scanner.enabled {
            Some(SubnetPortScanner::new(config.scanner.clone())?)
        } else {
            None
        };
        let details = if config.details.enabled {
            Some(DeviceDetailFetcher::new(config.details.clone())?)
        } else {
            None
        };

        Ok(Self {
            store,
            local,
            multicast,
            scanner,
            details,
            validator: CameraValidator::new(&config.validation, grabber),
            latest: RwLock::new(Arc::new(DetectionSnapshot::default())),
        })
    }

    /// Snapshot of the last completed round
    pub async fn latest(&self) -> Arc<DetectionSnapshot> {
        self.latest.read().await.clone()
    }

    /// Run one full discovery round.
    ///
    /// A failing sub-probe is recorded in `phase_errors` and the round goes
    /// on with the other probes. Only failing to read the stored
    /// configuration aborts the round.
    pub async fn detect_all(&self) -> Result<DetectionRound> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Starting camera discovery round");

        let persisted = self
            .store
            .list_all()
            .await
            .context("load persisted cameras")?;

        let (local, endpoints, hits) = tokio::join!(
            self.run_local(),
            self.run_multicast(),
            self.run_scanner()
        );

        let mut phase_errors = Vec::new();
        let endpoints = endpoints.unwrap_or_else(|e| {
            warn!("Multicast discovery failed: {:#}", e);
            phase_errors.push(PhaseError {
                phase: DiscoveryPhase::Multicast,
                message: format!("{:#}", e),
            });
            Vec::new()
        });
        let hits = hits.unwrap_or_else(|e| {
            warn!("Subnet scan failed: {:#}", e);
            phase_errors.push(PhaseError {
                phase: DiscoveryPhase::SubnetScan,
                message: format!("{:#}", e),
            });
            Vec::new()
        });

        let devices = merge_network_devices(endpoints, hits);
        let network = self.network_candidates(devices, &persisted).await;

        let mut candidates = local;
        candidates.extend(network);

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.source.clone()));
        assign_identities(&mut candidates, &persisted);

        let revalidate: Vec<DetectedCamera> = persisted
            .iter()
            .filter(|row| row.is_active && !seen.contains(&row.source_key()))
            .map(persisted_candidate)
            .collect();
        if !revalidate.is_empty() {
            debug!("Revalidating {} configured camera(s) not rediscovered", revalidate.len());
        }
        candidates.extend(revalidate);

        let report = self.validator.validate(candidates).await;

        let round = DetectionRound {
            started_at,
            duration: clock.elapsed(),
            working: report.working,
            rejected: report.rejected,
            phase_errors,
        };

        {
            let mut latest = self.latest.write().await;
            let next = DetectionSnapshot {
                round: latest.round + 1,
                completed_at: Some(Utc::now()),
                cameras: round.working.clone(),
            };
            *latest = Arc::new(next);
        }

        info!(
            "Discovery round finished in {:?}: {} local, {} network working, {} rejected",
            round.duration,
            round.count(CameraKind::Local),
            round.count(CameraKind::Network),
            round.rejected.len()
        );
        Ok(round)
    }

    async fn run_local(&self) -> Vec<DetectedCamera> {
        match &self.local {
            Some(local) => local.enumerate().await,
            None => Vec::new(),
        }
    }

    async fn run_multicast(&self) -> Result<Vec<DiscoveredEndpoint>> {
        match &self.multicast {
            Some(probe) => probe.discover().await,
            None => Ok(Vec::new()),
        }
    }

    async fn run_scanner(&self) -> Result<Vec<ScanHit>> {
        match &self.scanner {
            Some(scanner) => scanner.scan().await,
            None => Ok(Vec::new()),
        }
    }

    /// Turn devices into stream candidates. Devices already configured with
    /// a stream URL are not probed again.
    async fn network_candidates(
        &self,
        devices: Vec<NetworkDevice>,
        persisted: &[CameraConfig],
    ) -> Vec<DetectedCamera> {
        let configured: HashMap<&str, &CameraConfig> = persisted
            .iter()
            .filter(|row| row.stream_url.as_deref().is_some_and(|url| !url.is_empty()))
            .filter_map(|row| row.ip_address.as_deref().map(|ip| (ip, row)))
            .collect();

        let candidates: Vec<Option<DetectedCamera>> = stream::iter(devices)
            .map(|device| {
                let known = configured.get(device.ip_address.as_str()).copied();
                async move {
                    match known {
                        Some(row) => Some(self.reuse_configured(&device, row)),
                        None => self.probe_device(&device).await,
                    }
                }
            })
            .buffered(DETAIL_CONCURRENCY)
            .collect()
            .await;

        candidates.into_iter().flatten().collect()
    }

    fn reuse_configured(&self, device: &NetworkDevice, row: &CameraConfig) -> DetectedCamera {
        let mut candidate = persisted_candidate(row);
        candidate.origin = device.origin;
        candidate.kind = CameraKind::Network;
        candidate.ip_address = Some(device.ip_address.clone());
        candidate
    }

    async fn probe_device(&self, device: &NetworkDevice) -> Option<DetectedCamera> {
        let details = match &self.details {
            Some(fetcher) => {
                fetcher
                    .fetch(&device.ip_address, device.http_port, &device.service_urls)
                    .await
            }
            None => Default::default(),
        };

        let fallback = device
            .rtsp_port
            .map(|port| format!("rtsp://{}:{}/", device.ip_address, port));
        let Some(stream_url) = details.stream_urls.first().cloned().or(fallback) else {
            debug!("No stream URL for {}, dropping candidate", device.ip_address);
            return None;
        };

        let mut camera = DetectedCamera::network(device.origin, &device.ip_address, &stream_url);
        if let Some(name) = &device.name {
            camera.display_name = name.clone();
        }
        camera.credentials = details.credentials;
        camera.manufacturer = known_value(details.manufacturer);
        camera.model = known_value(details.model);
        camera.firmware_version = known_value(details.firmware_version);
        camera.onvif_supported = details.onvif_supported || !device.service_urls.is_empty();
        Some(camera)
    }
}
