use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::capture::{CaptureSource, FrameGrabber};
use super::models::{DetectedCamera, Resolution};
use crate::config::LocalDeviceConfig;

const FALLBACK_RESOLUTION: Resolution = Resolution::new(640, 480);
const FALLBACK_FRAME_RATE: u32 = 30;

/// Probes local capture device indices and reports the ones that deliver a frame
pub struct LocalDeviceEnumerator {
    config: LocalDeviceConfig,
    grabber: Arc<dyn FrameGrabber>,
}

impl LocalDeviceEnumerator {
    pub fn new(config: LocalDeviceConfig, grabber: Arc<dyn FrameGrabber>) -> Self {
        Self { config, grabber }
    }

    /// Indices are probed one at a time; most are simply absent and fail fast.
    pub async fn enumerate(&self) -> Vec<DetectedCamera> {
        let timeout = Duration::from_millis(self.config.frame_timeout_ms);
        let mut cameras = Vec::new();

        for index in 0..self.config.max_device_index {
            match self.grabber.grab(&CaptureSource::Device(index), timeout).await {
                Ok(frame) => {
                    let resolution = if frame.resolution.width > 0 && frame.resolution.height > 0 {
                        frame.resolution
                    } else {
                        FALLBACK_RESOLUTION
                    };
                    let fps = frame
                        .frame_rate
                        .filter(|fps| *fps > 0)
                        .unwrap_or(FALLBACK_FRAME_RATE);

                    let camera = DetectedCamera::local(index, resolution, fps);
                    info!(
                        "Found local camera {} at index {} ({} @ {} fps)",
                        camera.display_name, index, resolution, fps
                    );
                    cameras.push(camera);
                }
                Err(e) => debug!("No usable capture device at index {}: {:#}", index, e),
            }
        }

        cameras
    }
}
