//! Enrichment of network devices already believed to be cameras.
//!
//! Order of attempts: ONVIF (anonymous, then each configured credential),
//! vendor HTTP info endpoints, then the RTSP/HTTP stream path menu. Every
//! step is best effort; fields nobody could fill stay "Unknown".

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::models::{Credentials, DeviceDetails, ProbeOutcome, UNKNOWN};
use super::onvif_client::{DeviceIdentity, OnvifCameraBuilder, StreamUri};
use super::rtsp;
use crate::config::DetailsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vendor {
    Dahua,
    Hikvision,
    Axis,
}

impl Vendor {
    const ALL: [Vendor; 3] = [Vendor::Dahua, Vendor::Hikvision, Vendor::Axis];

    fn name(self) -> &'static str {
        match self {
            Vendor::Dahua => "Dahua",
            Vendor::Hikvision => "Hikvision",
            Vendor::Axis => "Axis",
        }
    }

    fn info_path(self) -> &'static str {
        match self {
            Vendor::Dahua => "/cgi-bin/param.cgi?action=list&group=System",
            Vendor::Hikvision => "/ISAPI/System/deviceInfo",
            Vendor::Axis => "/axis-cgi/param.cgi?action=list&group=root.Brand",
        }
    }

    /// (model, firmware) from the info endpoint body
    fn parse_info(self, body: &str) -> (Option<String>, Option<String>) {
        match self {
            Vendor::Hikvision => (xml_value(body, "model"), xml_value(body, "firmwareVersion")),
            Vendor::Dahua => (
                param_value(body, "DeviceType"),
                param_value(body, "SoftwareVersion"),
            ),
            Vendor::Axis => (
                param_value(body, "ProdNbr").or_else(|| param_value(body, "ProdShortName")),
                param_value(body, "Version"),
            ),
        }
    }
}

fn xml_value(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string()).filter(|v| !v.is_empty())
}

/// Value of the first `a.b.Key=value` line whose key ends with `.{key}`
fn param_value(body: &str, key: &str) -> Option<String> {
    let suffix = format!(".{}", key);
    body.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        let k = k.trim();
        (k.ends_with(&suffix) || k == key)
            .then(|| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

fn is_stream_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    ["image/", "video/", "multipart/"]
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

pub struct DeviceDetailFetcher {
    config: DetailsConfig,
    http: reqwest::Client,
}

impl DeviceDetailFetcher {
    pub fn new(config: DetailsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .no_proxy()
            .build()
            .context("build detail fetcher HTTP client")?;
        Ok(Self { config, http })
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    /// Anonymous first, then the configured pairs in order
    fn credential_attempts(&self) -> Vec<Option<Credentials>> {
        std::iter::once(None)
            .chain(self.config.credentials.iter().map(|c| {
                Some(Credentials {
                    username: c.username.clone(),
                    password: c.password.clone(),
                })
            }))
            .collect()
    }

    /// Gather identity and stream URLs for the device at `ip`.
    ///
    /// `service_urls` are ONVIF device-service addresses, empty for devices
    /// found by the subnet scan. `http_port` is where the web UI answered.
    pub async fn fetch(&self, ip: &str, http_port: u16, service_urls: &[String]) -> DeviceDetails {
        let mut details = DeviceDetails::default();

        if !service_urls.is_empty() {
            match self.fetch_onvif(service_urls).await {
                ProbeOutcome::Found((identity, streams, credentials)) => {
                    details.manufacturer = identity.manufacturer;
                    details.model = identity.model;
                    details.firmware_version = identity.firmware_version;
                    details.onvif_supported = true;
                    details.credentials = credentials;
                    details.stream_urls = streams.into_iter().map(|s| s.uri).collect();
                }
                ProbeOutcome::NotFound => debug!("{} did not answer ONVIF requests", ip),
                ProbeOutcome::Failed(e) => debug!("ONVIF lookup for {} failed: {}", ip, e),
            }
        }

        if details.manufacturer == UNKNOWN {
            if let Some((vendor, model, firmware)) = self.identify_vendor(ip, http_port).await {
                details.manufacturer = vendor.name().to_string();
                details.model = model.unwrap_or_else(|| UNKNOWN.to_string());
                details.firmware_version = firmware.unwrap_or_else(|| UNKNOWN.to_string());
            }
        }

        if details.stream_urls.is_empty() {
            let (urls, needs_auth) = self.probe_stream_paths(ip, http_port).await;
            details.stream_urls = urls;
            if needs_auth && details.credentials.is_none() {
                details.credentials = self.credential_attempts().into_iter().flatten().next();
            }
        }

        let mut seen = std::collections::HashSet::new();
        details.stream_urls.retain(|url| seen.insert(url.clone()));

        info!(
            "Details for {}: {} {} (firmware {}), {} stream URL(s), ONVIF {}",
            ip,
            details.manufacturer,
            details.model,
            details.firmware_version,
            details.stream_urls.len(),
            details.onvif_supported
        );
        details
    }

    async fn fetch_onvif(
        &self,
        service_urls: &[String],
    ) -> ProbeOutcome<(DeviceIdentity, Vec<StreamUri>, Option<Credentials>)> {
        // Building the client, reading the identity and listing profiles
        let attempt_limit = self.request_timeout() * 3;
        let mut last_error = None;

        for url in service_urls {
            for credentials in self.credential_attempts() {
                let attempt = timeout(attempt_limit, onvif_attempt(url, credentials.as_ref())).await;
                match attempt {
                    Ok(Ok((identity, streams))) => {
                        return ProbeOutcome::Found((identity, streams, credentials));
                    }
                    Ok(Err(e)) => last_error = Some(format!("{}: {:#}", url, e)),
                    Err(_) => last_error = Some(format!("{}: timed out", url)),
                }
            }
        }

        match last_error {
            Some(e) => ProbeOutcome::Failed(e),
            None => ProbeOutcome::NotFound,
        }
    }

    async fn identify_vendor(
        &self,
        ip: &str,
        http_port: u16,
    ) -> Option<(Vendor, Option<String>, Option<String>)> {
        for vendor in Vendor::ALL {
            let url = format!("http://{}:{}{}", ip, http_port, vendor.info_path());
            for credentials in self.credential_attempts() {
                let mut request = self.http.get(&url);
                if let Some(c) = &credentials {
                    request = request.basic_auth(&c.username, Some(&c.password));
                }
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("{} unreachable: {}", url, e);
                        break;
                    }
                };
                if response.status().is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let (model, firmware) = vendor.parse_info(&body);
                    return Some((vendor, model, firmware));
                }
                if response.status() != reqwest::StatusCode::UNAUTHORIZED {
                    break;
                }
            }
        }
        None
    }

    /// Probe the RTSP and HTTP path menus. Returns responding URLs in menu
    /// order and whether any RTSP path demanded authentication.
    async fn probe_stream_paths(&self, ip: &str, http_port: u16) -> (Vec<String>, bool) {
        let limit = self.request_timeout();
        let mut urls = Vec::new();
        let mut needs_auth = false;

        let port = self.config.rtsp_port;
        let rtsp_open = matches!(timeout(limit, TcpStream::connect((ip, port))).await, Ok(Ok(_)));
        if rtsp_open {
            for path in &self.config.rtsp_paths {
                let url = format!("rtsp://{}:{}{}", ip, port, path);
                match rtsp::request_status(ip, port, "DESCRIBE", &url, limit).await {
                    ProbeOutcome::Found(200) => urls.push(url),
                    ProbeOutcome::Found(401) => {
                        needs_auth = true;
                        urls.push(url);
                    }
                    ProbeOutcome::Found(code) => debug!("{} answered {}", url, code),
                    ProbeOutcome::NotFound => {}
                    ProbeOutcome::Failed(e) => debug!("DESCRIBE {} failed: {}", url, e),
                }
            }
        }

        for path in &self.config.http_paths {
            let url = format!("http://{}:{}{}", ip, http_port, path);
            // Only headers are inspected; MJPEG bodies never end.
            let Ok(response) = self.http.get(&url).send().await else {
                continue;
            };
            let streams = response.status().is_success()
                && response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(is_stream_content_type)
                    .unwrap_or(false);
            if streams {
                urls.push(url);
            }
        }

        (urls, needs_auth)
    }
}

async fn onvif_attempt(
    url: &str,
    credentials: Option<&Credentials>,
) -> Result<(DeviceIdentity, Vec<StreamUri>)> {
    let mut builder = OnvifCameraBuilder::new().uri(url).map_err(|e| anyhow!(e))?;
    if let Some(c) = credentials {
        builder = builder.credentials(&c.username, &c.password).fix_time(true);
    }
    let camera = builder.build().await.map_err(|e| anyhow!(e))?;
    let identity = camera.get_device_information().await.map_err(|e| anyhow!(e))?;
    let streams = match camera.get_stream_uris().await {
        Ok(streams) => streams,
        Err(e) => {
            debug!("No stream URIs from {}: {}", url, e);
            Vec::new()
        }
    };
    Ok((identity, streams))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn hikvision_device_info_is_parsed() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<DeviceInfo version="2.0" xmlns="http://www.hikvision.com/ver20/XMLSchema">
<deviceName>IP CAMERA</deviceName>
<model>DS-2CD2143G0-I</model>
<firmwareVersion>V5.5.82</firmwareVersion>
</DeviceInfo>"#;
        assert_eq!(
            Vendor::Hikvision.parse_info(body),
            (Some("DS-2CD2143G0-I".to_string()), Some("V5.5.82".to_string()))
        );
    }

    #[test]
    fn axis_and_dahua_params_are_parsed() {
        let axis = "root.Brand.Brand=AXIS\nroot.Brand.ProdNbr=M3045-V\nroot.Brand.ProdShortName=AXIS M3045-V\n";
        assert_eq!(Vendor::Axis.parse_info(axis).0.as_deref(), Some("M3045-V"));

        let dahua = "table.System.DeviceType=IPC-HDW1230S\ntable.System.SoftwareVersion=2.622.0000000.31.R\n";
        assert_eq!(
            Vendor::Dahua.parse_info(dahua),
            (
                Some("IPC-HDW1230S".to_string()),
                Some("2.622.0000000.31.R".to_string())
            )
        );
    }

    #[test]
    fn stream_content_types() {
        assert!(is_stream_content_type("multipart/x-mixed-replace; boundary=frame"));
        assert!(is_stream_content_type("image/jpeg"));
        assert!(is_stream_content_type("Video/MP2T"));
        assert!(!is_stream_content_type("text/html"));
    }

    fn details_config(rtsp_port: u16) -> DetailsConfig {
        DetailsConfig {
            enabled: true,
            credentials: vec![CredentialConfig {
                username: "admin".to_string(),
                password: "admin".to_string(),
            }],
            rtsp_port,
            rtsp_paths: vec!["/stream1".to_string(), "/live".to_string()],
            http_paths: vec![],
            request_timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn unreachable_device_keeps_unknown_fields() {
        let fetcher = DeviceDetailFetcher::new(details_config(1)).unwrap();
        let details = fetcher.fetch("127.0.0.1", 1, &[]).await;
        assert_eq!(details, DeviceDetails::default());
    }

    #[tokio::test]
    async fn rtsp_path_demanding_auth_counts_as_responding() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let Ok(n) = socket.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let reply: &[u8] = if request.contains("/stream1") {
                        b"RTSP/1.0 401 Unauthorized\r\nCSeq: 1\r\n\r\n"
                    } else {
                        b"RTSP/1.0 404 Not Found\r\nCSeq: 1\r\n\r\n"
                    };
                    let _ = socket.write_all(reply).await;
                });
            }
        });

        let fetcher = DeviceDetailFetcher::new(details_config(port)).unwrap();
        let details = fetcher.fetch("127.0.0.1", 1, &[]).await;
        assert_eq!(
            details.stream_urls,
            vec![format!("rtsp://127.0.0.1:{}/stream1", port)]
        );
        assert_eq!(details.credentials.map(|c| c.username), Some("admin".to_string()));
        assert_eq!(details.manufacturer, UNKNOWN);
    }
}
