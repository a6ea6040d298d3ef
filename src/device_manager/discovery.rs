//! WS-Discovery for ONVIF network video transmitters.
//!
//! Every device that answers inside the listen window becomes a
//! [`DiscoveredEndpoint`]. Only failing to run discovery at all is reported
//! as an error.

use anyhow::{Context, Result};
use futures_util::stream::StreamExt;
use onvif::discovery;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};
use url::{Host, Url};

use super::models::DiscoveredEndpoint;
use crate::config::MulticastConfig;

/// Address a device answered with, IPv4 first
fn device_host(urls: &[Url]) -> Option<String> {
    urls.iter()
        .find_map(|url| match url.host() {
            Some(Host::Ipv4(ip)) => Some(ip.to_string()),
            _ => None,
        })
        .or_else(|| urls.iter().find_map(|url| url.host_str().map(str::to_string)))
}

/// Build an endpoint from the device-service URLs and name of one reply.
///
/// Returns `None` when no URL carries a host.
pub fn endpoint_from_reply(urls: &[Url], name: Option<String>) -> Option<DiscoveredEndpoint> {
    let ip_address = device_host(urls)?;
    Some(DiscoveredEndpoint {
        ip_address,
        service_urls: urls.iter().map(|url| url.to_string()).collect(),
        name: name.filter(|n| !n.trim().is_empty()),
    })
}

/// Merge endpoints answering from the same IP, keeping first-seen order of URLs
fn dedupe_by_ip(endpoints: Vec<DiscoveredEndpoint>) -> Vec<DiscoveredEndpoint> {
    let mut merged: BTreeMap<String, DiscoveredEndpoint> = BTreeMap::new();
    for endpoint in endpoints {
        match merged.get_mut(&endpoint.ip_address) {
            Some(existing) => {
                for url in endpoint.service_urls {
                    if !existing.service_urls.contains(&url) {
                        existing.service_urls.push(url);
                    }
                }
                if existing.name.is_none() {
                    existing.name = endpoint.name;
                }
            }
            None => {
                merged.insert(endpoint.ip_address.clone(), endpoint);
            }
        }
    }
    merged.into_values().collect()
}

pub struct MulticastServiceProbe {
    config: MulticastConfig,
}

impl MulticastServiceProbe {
    pub fn new(config: MulticastConfig) -> Self {
        Self { config }
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredEndpoint>> {
        let listen: IpAddr = self
            .config
            .listen_address
            .parse()
            .with_context(|| format!("invalid listen address {}", self.config.listen_address))?;

        let mut builder = discovery::DiscoveryBuilder::default();
        builder
            .listen_address(listen)
            .duration(Duration::from_secs(self.config.timeout_secs));

        let devices: Vec<discovery::Device> = builder
            .run()
            .await
            .context("run WS-Discovery")?
            .collect()
            .await;
        debug!("WS-Discovery received {} reply(ies)", devices.len());

        let endpoints = devices
            .into_iter()
            .filter_map(|device| {
                let endpoint = endpoint_from_reply(&device.urls, device.name.clone());
                if endpoint.is_none() {
                    debug!("Ignoring discovery reply without a usable address: {:?}", device.urls);
                }
                endpoint
            })
            .collect();

        let endpoints = dedupe_by_ip(endpoints);
        info!("WS-Discovery found {} device(s)", endpoints.len());
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<Url> {
        raw.iter().map(|u| Url::parse(u).unwrap()).collect()
    }

    #[test]
    fn reply_keeps_all_urls_and_prefers_ipv4_host() {
        let endpoint = endpoint_from_reply(
            &urls(&[
                "http://[fe80::1]/onvif/device_service",
                "http://192.168.1.64/onvif/device_service",
            ]),
            Some("Front Door".to_string()),
        )
        .unwrap();

        assert_eq!(endpoint.ip_address, "192.168.1.64");
        assert_eq!(endpoint.service_urls.len(), 2);
        assert_eq!(endpoint.name.as_deref(), Some("Front Door"));
    }

    #[test]
    fn reply_without_urls_is_ignored() {
        assert!(endpoint_from_reply(&[], Some("Lobby".to_string())).is_none());
    }

    #[test]
    fn blank_name_is_dropped() {
        let endpoint =
            endpoint_from_reply(&urls(&["http://10.0.0.7/onvif/device_service"]), Some("  ".to_string()))
                .unwrap();
        assert_eq!(endpoint.ip_address, "10.0.0.7");
        assert!(endpoint.name.is_none());
    }

    #[test]
    fn endpoints_are_merged_by_ip() {
        let a = DiscoveredEndpoint {
            ip_address: "10.0.0.5".to_string(),
            service_urls: vec!["http://10.0.0.5/onvif/device_service".to_string()],
            name: None,
        };
        let b = DiscoveredEndpoint {
            ip_address: "10.0.0.5".to_string(),
            service_urls: vec![
                "http://10.0.0.5/onvif/device_service".to_string(),
                "http://10.0.0.5:8080/onvif/device_service".to_string(),
            ],
            name: Some("Lobby".to_string()),
        };
        let merged = dedupe_by_ip(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].service_urls.len(), 2);
        assert_eq!(merged[0].name.as_deref(), Some("Lobby"));
    }

    #[tokio::test]
    async fn bad_listen_address_is_an_error() {
        let multicast = MulticastServiceProbe::new(MulticastConfig {
            listen_address: "not-an-ip".to_string(),
            ..MulticastConfig::default()
        });
        assert!(multicast.discover().await.is_err());
    }
}
