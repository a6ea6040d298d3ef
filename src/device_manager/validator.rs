use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::capture::{CaptureSource, FrameGrabber};
use super::models::{CameraStatus, DetectedCamera};
use crate::config::ValidationConfig;

/// Outcome of validating one round's candidates, in input order
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub working: Vec<DetectedCamera>,
    /// Candidates that produced no frame, with the reason
    pub rejected: Vec<(DetectedCamera, String)>,
}

/// Time granted to a grabber beyond the frame timeout before it is abandoned
const GRAB_SLACK: Duration = Duration::from_secs(1);

/// Gate that admits only candidates which decode a real frame in time
pub struct CameraValidator {
    grabber: Arc<dyn FrameGrabber>,
    frame_timeout: Duration,
    concurrency: usize,
}

impl CameraValidator {
    pub fn new(config: &ValidationConfig, grabber: Arc<dyn FrameGrabber>) -> Self {
        Self {
            grabber,
            frame_timeout: Duration::from_millis(config.frame_timeout_ms),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Open the camera's source and decode one frame.
    ///
    /// On success the observed resolution (and frame rate, when known)
    /// replaces the advertised one.
    pub async fn check(&self, mut camera: DetectedCamera) -> Result<DetectedCamera, (DetectedCamera, String)> {
        let Some(source) = CaptureSource::from_camera(&camera) else {
            camera.is_working = false;
            camera.status = CameraStatus::Inactive;
            return Err((camera, "no capture source".to_string()));
        };

        let limit = self.frame_timeout + GRAB_SLACK;
        let grabbed = match tokio::time::timeout(limit, self.grabber.grab(&source, self.frame_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("no frame within {:?}", self.frame_timeout)),
        };

        match grabbed {
            Ok(frame) => {
                if frame.resolution.width > 0 && frame.resolution.height > 0 {
                    camera.resolution = frame.resolution;
                }
                if let Some(fps) = frame.frame_rate.filter(|fps| *fps > 0) {
                    camera.frame_rate = fps;
                }
                camera.is_working = true;
                camera.status = CameraStatus::Active;
                camera.last_seen = Utc::now();
                Ok(camera)
            }
            Err(e) => {
                camera.is_working = false;
                camera.status = CameraStatus::Inactive;
                Err((camera, format!("{:#}", e)))
            }
        }
    }

    pub async fn validate(&self, candidates: Vec<DetectedCamera>) -> ValidationReport {
        let total = candidates.len();
        let results: Vec<_> = stream::iter(candidates)
            .map(|camera| self.check(camera))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = ValidationReport::default();
        for result in results {
            match result {
                Ok(camera) => {
                    debug!(
                        "Camera {} ({}) delivered a {} frame",
                        camera.id, camera.display_name, camera.resolution
                    );
                    report.working.push(camera);
                }
                Err((camera, reason)) => {
                    debug!("Camera {} ({}) rejected: {}", camera.id, camera.display_name, reason);
                    report.rejected.push((camera, reason));
                }
            }
        }

        info!(
            "Validated {} candidate(s): {} working, {} rejected",
            total,
            report.working.len(),
            report.rejected.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_manager::capture::FrameInfo;
    use crate::device_manager::models::{DiscoveryOrigin, Resolution};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    /// Only device 0 and URLs containing "good" produce frames
    struct Selective;

    #[async_trait]
    impl FrameGrabber for Selective {
        async fn grab(&self, source: &CaptureSource, timeout: Duration) -> Result<FrameInfo> {
            match source {
                CaptureSource::Device(0) => Ok(FrameInfo {
                    resolution: Resolution::new(640, 480),
                    frame_rate: Some(30),
                }),
                CaptureSource::Url(url) if url.contains("good") => Ok(FrameInfo {
                    resolution: Resolution::new(1920, 1080),
                    frame_rate: None,
                }),
                CaptureSource::Url(url) if url.contains("slow") => {
                    tokio::time::sleep(timeout * 2).await;
                    Err(anyhow!("no frame within {:?}", timeout))
                }
                _ => Err(anyhow!("cannot open {:?}", source)),
            }
        }
    }

    fn validator() -> CameraValidator {
        CameraValidator::new(
            &ValidationConfig {
                frame_timeout_ms: 50,
                concurrency: 2,
            },
            Arc::new(Selective),
        )
    }

    #[tokio::test]
    async fn only_frame_producing_sources_pass() {
        let candidates = vec![
            DetectedCamera::local(1, Resolution::new(640, 480), 30),
            DetectedCamera::network(DiscoveryOrigin::SubnetScan, "10.0.0.7", "rtsp://10.0.0.7/good"),
            DetectedCamera::local(0, Resolution::new(320, 240), 15),
            DetectedCamera::network(DiscoveryOrigin::Multicast, "10.0.0.8", "rtsp://10.0.0.8/slow"),
        ];
        let report = validator().validate(candidates).await;

        let working: Vec<_> = report.working.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(working, vec!["rtsp://10.0.0.7/good", "0"]);
        assert!(report.working.iter().all(|c| c.is_working));

        assert_eq!(report.working[0].resolution, Resolution::new(1920, 1080));
        assert_eq!(report.working[0].frame_rate, 25);
        assert_eq!(report.working[1].resolution, Resolution::new(640, 480));
        assert_eq!(report.working[1].frame_rate, 30);

        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected.iter().all(|(c, _)| !c.is_working));
        assert!(report
            .rejected
            .iter()
            .all(|(c, _)| c.status == CameraStatus::Inactive));
    }

    #[tokio::test]
    async fn unreachable_url_is_never_working() {
        let camera = DetectedCamera::network(
            DiscoveryOrigin::SubnetScan,
            "192.0.2.1",
            "rtsp://192.0.2.1:554/stream1",
        );
        let (rejected, reason) = validator().check(camera).await.unwrap_err();
        assert!(!rejected.is_working);
        assert!(reason.contains("cannot open"));
    }
}
