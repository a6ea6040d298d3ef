//! Brute-force TCP scan of a subnet for camera-like services.

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::models::{ProbeOutcome, ScanHit, ServiceProtocol};
use super::rtsp;
use crate::config::{ScanCoverage, ScannerConfig};

/// Ports answered by RTSP servers rather than HTTP
pub const RTSP_PORTS: [u16; 2] = [554, 8554];

/// Smallest prefix accepted for a scan range
const MIN_PREFIX: u8 = 16;

const CAMERA_KEYWORDS: [&str; 13] = [
    "camera",
    "video",
    "stream",
    "onvif",
    "rtsp",
    "surveillance",
    "security",
    "axis",
    "hikvision",
    "dahua",
    "bosch",
    "sony",
    "panasonic",
];

/// Keyword heuristic deciding whether an HTTP response came from a camera
pub fn classify_as_camera(body: &str) -> bool {
    let body = body.to_lowercase();
    CAMERA_KEYWORDS.iter().any(|k| body.contains(k))
}

/// Expand `range` into host addresses.
///
/// A bare address yields itself. Network and broadcast addresses are
/// skipped for prefixes up to /30; /31 and /32 yield every address.
pub fn parse_cidr(range: &str) -> Result<Vec<Ipv4Addr>> {
    let (addr, prefix) = match range.trim().split_once('/') {
        Some((addr, prefix)) => (
            addr,
            prefix
                .parse::<u8>()
                .with_context(|| format!("invalid prefix in {}", range))?,
        ),
        None => (range.trim(), 32),
    };
    let addr: Ipv4Addr = addr
        .parse()
        .with_context(|| format!("invalid address in {}", range))?;
    if prefix > 32 {
        bail!("invalid prefix /{} in {}", prefix, range);
    }
    if prefix < MIN_PREFIX {
        bail!("range {} is too large to scan, use /{} or longer", range, MIN_PREFIX);
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    let hosts = if prefix >= 31 {
        (network..=broadcast).map(Ipv4Addr::from).collect()
    } else {
        (network + 1..broadcast).map(Ipv4Addr::from).collect()
    };
    Ok(hosts)
}

fn apply_coverage(hosts: Vec<Ipv4Addr>, coverage: ScanCoverage) -> Vec<Ipv4Addr> {
    match coverage {
        ScanCoverage::FullRange => hosts,
        ScanCoverage::HostRange { first, last } => hosts
            .into_iter()
            .filter(|ip| {
                let octet = ip.octets()[3];
                octet >= first && octet <= last
            })
            .collect(),
    }
}

/// IPv4 address of the interface that carries the default route
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    // Connecting a UDP socket sends nothing; it only selects a route.
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect("8.8.8.8:80").await.ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

/// The local /24, used when no range is configured
pub async fn default_network_range() -> Option<String> {
    let [a, b, c, _] = local_ipv4().await?.octets();
    Some(format!("{}.{}.{}.0/24", a, b, c))
}

pub struct SubnetPortScanner {
    config: ScannerConfig,
    http: reqwest::Client,
}

impl SubnetPortScanner {
    pub fn new(config: ScannerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .no_proxy()
            .build()
            .context("build scanner HTTP client")?;
        Ok(Self { config, http })
    }

    /// Probe every (host, port) pair of the configured range.
    ///
    /// The scan stops at the time budget and returns the hits gathered so far.
    pub async fn scan(&self) -> Result<Vec<ScanHit>> {
        let range = match &self.config.network_range {
            Some(range) => range.clone(),
            None => default_network_range()
                .await
                .context("no local IPv4 address to derive a scan range from")?,
        };
        let hosts = apply_coverage(parse_cidr(&range)?, self.config.coverage);
        let pairs: Vec<(Ipv4Addr, u16)> = hosts
            .iter()
            .flat_map(|ip| self.config.ports.iter().map(move |port| (*ip, *port)))
            .collect();

        info!(
            "Scanning {} ({} hosts, {} probes, concurrency {})",
            range,
            hosts.len(),
            pairs.len(),
            self.config.concurrency
        );

        let deadline = Instant::now() + Duration::from_secs(self.config.budget_secs);
        let mut probes = stream::iter(pairs)
            .map(|(ip, port)| async move { (ip, port, self.probe(ip, port).await) })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut hits = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, probes.next()).await {
                Ok(Some((ip, port, outcome))) => match outcome {
                    ProbeOutcome::Found(protocol) => {
                        debug!("Camera-like service at {}:{} ({:?})", ip, port, protocol);
                        hits.push((ip, port, protocol));
                    }
                    ProbeOutcome::NotFound => {}
                    ProbeOutcome::Failed(e) => debug!("Probe {}:{} failed: {}", ip, port, e),
                },
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Subnet scan hit its {}s budget, keeping {} partial hit(s)",
                        self.config.budget_secs,
                        hits.len()
                    );
                    break;
                }
            }
        }

        hits.sort_by_key(|(ip, port, _)| (*ip, *port));
        info!("Subnet scan found {} camera-like service(s)", hits.len());
        Ok(hits
            .into_iter()
            .map(|(ip, port, protocol)| ScanHit {
                ip_address: ip.to_string(),
                port,
                protocol,
            })
            .collect())
    }

    async fn probe(&self, ip: Ipv4Addr, port: u16) -> ProbeOutcome<ServiceProtocol> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match timeout(connect_timeout, TcpStream::connect((ip, port))).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return ProbeOutcome::NotFound,
        }

        if RTSP_PORTS.contains(&port) {
            let url = format!("rtsp://{}:{}", ip, port);
            return match rtsp::request_status(&ip.to_string(), port, "OPTIONS", &url, connect_timeout).await {
                ProbeOutcome::Found(_) => ProbeOutcome::Found(ServiceProtocol::Rtsp),
                ProbeOutcome::NotFound => ProbeOutcome::NotFound,
                ProbeOutcome::Failed(e) => ProbeOutcome::Failed(e),
            };
        }

        let mut answered = false;
        let mut last_error = None;
        for path in &self.config.probe_paths {
            let url = format!("http://{}:{}{}", ip, port, path);
            let response = match self.http.get(&url).send().await {
                Ok(response) => {
                    answered = true;
                    response
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let mut evidence = String::new();
            for header in [reqwest::header::SERVER, reqwest::header::WWW_AUTHENTICATE] {
                if let Some(value) = response.headers().get(header).and_then(|v| v.to_str().ok()) {
                    evidence.push_str(value);
                    evidence.push(' ');
                }
            }
            if let Ok(body) = response.text().await {
                evidence.push_str(&body);
            }

            if classify_as_camera(&evidence) {
                return ProbeOutcome::Found(ServiceProtocol::Http);
            }
        }

        match last_error {
            Some(e) if !answered => ProbeOutcome::Failed(e),
            _ => ProbeOutcome::NotFound,
        }
    }
}
