use chrono::{NaiveDate, Utc};
use onvif::soap::{self, client::AuthType};
use std::convert::TryInto;
use std::fmt;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct OnvifError(pub String);

impl fmt::Display for OnvifError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ONVIF error: {}", self.0)
    }
}

impl std::error::Error for OnvifError {}

impl From<String> for OnvifError {
    fn from(err: String) -> Self {
        OnvifError(err)
    }
}

/// Device management and media clients for one ONVIF device
pub struct OnvifCamera {
    devicemgmt: soap::client::Client,
    media: Option<soap::client::Client>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamUri {
    pub token: String,
    pub name: String,
    pub uri: String,
    pub video_resolution: Option<(u32, u32)>,
    pub framerate: Option<u32>,
}

/// Identity reported by GetDeviceInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
}

pub struct OnvifCameraBuilder {
    uri: Option<Url>,
    service_path: String,
    username: Option<String>,
    password: Option<String>,
    fix_time: bool,
}

impl Default for OnvifCameraBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OnvifCameraBuilder {
    pub fn new() -> Self {
        Self {
            uri: None,
            service_path: "onvif/device_service".to_string(),
            username: None,
            password: None,
            fix_time: false,
        }
    }

    /// Device-service URL as advertised in XAddrs, or a bare base URL
    /// (e.g. "http://192.168.1.100") combined with the default service path.
    pub fn uri(mut self, uri: &str) -> Result<Self, OnvifError> {
        let parsed = Url::parse(uri).map_err(|e| OnvifError(format!("{}: {}", uri, e)))?;
        if parsed.path().trim_matches('/').is_empty() {
            self.uri = Some(parsed);
        } else {
            self.service_path = parsed.path().trim_start_matches('/').to_string();
            let mut base = parsed;
            base.set_path("/");
            self.uri = Some(base);
        }
        Ok(self)
    }

    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Compensate for clock skew between host and camera, needed for
    /// UsernameToken auth on devices with a wrong clock.
    pub fn fix_time(mut self, fix: bool) -> Self {
        self.fix_time = fix;
        self
    }

    pub fn device_service_url(&self) -> Option<Url> {
        self.uri.as_ref().and_then(|base| base.join(&self.service_path).ok())
    }

    pub async fn build(self) -> Result<OnvifCamera, OnvifError> {
        let creds = match (self.username.as_ref(), self.password.as_ref()) {
            (Some(username), Some(password)) => Some(soap::client::Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        let devicemgmt_uri = self
            .device_service_url()
            .ok_or_else(|| OnvifError("URI must be specified.".to_string()))?;

        let mut devicemgmt = soap::client::ClientBuilder::new(&devicemgmt_uri)
            .credentials(creds.clone())
            .auth_type(AuthType::Any)
            .build();

        let time_gap = if self.fix_time {
            let device_time =
                schema::devicemgmt::get_system_date_and_time(&devicemgmt, &Default::default())
                    .await
                    .map_err(|e| OnvifError(e.to_string()))?
                    .system_date_and_time;

            match &device_time.utc_date_time {
                Some(utc_time) => {
                    let date = &utc_time.date;
                    let t = &utc_time.time;
                    let device_time =
                        NaiveDate::from_ymd_opt(date.year, date.month as _, date.day as _)
                            .and_then(|d| d.and_hms_opt(t.hour as _, t.minute as _, t.second as _))
                            .map(|dt| dt.and_utc());

                    match device_time {
                        Some(device_time) => {
                            let diff = device_time - Utc::now();
                            if diff.num_seconds().abs() > 60 {
                                devicemgmt.set_fix_time_gap(Some(diff));
                            }
                            Some(diff)
                        }
                        None => {
                            warn!("Device reported an invalid UTC date/time");
                            None
                        }
                    }
                }
                None => {
                    warn!("GetSystemDateAndTimeResponse doesn't have utc_date_time value!");
                    None
                }
            }
        } else {
            None
        };

        let services = schema::devicemgmt::get_services(&devicemgmt, &Default::default())
            .await
            .map_err(|e| OnvifError(e.to_string()))?;

        let mut media = None;
        for service in &services.service {
            if service.namespace != "http://www.onvif.org/ver10/media/wsdl" {
                continue;
            }
            match Url::parse(&service.x_addr) {
                Ok(service_url) => {
                    media = Some(
                        soap::client::ClientBuilder::new(&service_url)
                            .credentials(creds.clone())
                            .auth_type(AuthType::Any)
                            .fix_time_gap(time_gap)
                            .build(),
                    );
                }
                Err(e) => debug!("Ignoring media service with bad address {}: {}", service.x_addr, e),
            }
        }

        Ok(OnvifCamera { devicemgmt, media })
    }
}

impl OnvifCamera {
    pub async fn get_device_information(&self) -> Result<DeviceIdentity, OnvifError> {
        let info = schema::devicemgmt::get_device_information(&self.devicemgmt, &Default::default())
            .await
            .map_err(|e| OnvifError(e.to_string()))?;
        Ok(DeviceIdentity {
            manufacturer: info.manufacturer,
            model: info.model,
            firmware_version: info.firmware_version,
        })
    }

    /// RTSP unicast stream URI of every media profile
    pub async fn get_stream_uris(&self) -> Result<Vec<StreamUri>, OnvifError> {
        let media_client = self
            .media
            .as_ref()
            .ok_or_else(|| OnvifError("Client media is not available".into()))?;

        let profiles = schema::media::get_profiles(media_client, &Default::default())
            .await
            .map_err(|e| OnvifError(e.to_string()))?;

        debug!("get_profiles returned {} profile(s)", profiles.profiles.len());

        let requests: Vec<_> = profiles
            .profiles
            .iter()
            .map(|p: &schema::onvif::Profile| schema::media::GetStreamUri {
                profile_token: schema::onvif::ReferenceToken(p.token.0.clone()),
                stream_setup: schema::onvif::StreamSetup {
                    stream: schema::onvif::StreamType::RtpUnicast,
                    transport: schema::onvif::Transport {
                        protocol: schema::onvif::TransportProtocol::Rtsp,
                        tunnel: vec![],
                    },
                },
            })
            .collect();

        let responses = futures_util::future::try_join_all(
            requests
                .iter()
                .map(|r| schema::media::get_stream_uri(media_client, r)),
        )
        .await
        .map_err(|e| OnvifError(e.to_string()))?;

        Ok(profiles
            .profiles
            .iter()
            .zip(responses.iter())
            .map(|(p, resp)| {
                let video = p.video_encoder_configuration.as_ref();
                StreamUri {
                    token: p.token.0.clone(),
                    name: p.name.0.clone(),
                    uri: resp.media_uri.uri.clone(),
                    video_resolution: video.map(|v| {
                        (
                            v.resolution.width.try_into().unwrap_or(0),
                            v.resolution.height.try_into().unwrap_or(0),
                        )
                    }),
                    framerate: video
                        .and_then(|v| v.rate_control.as_ref())
                        .and_then(|r| r.frame_rate_limit.try_into().ok()),
                }
            })
            .collect())
    }
}
