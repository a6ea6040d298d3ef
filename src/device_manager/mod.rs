pub mod capture;
pub mod details;
pub mod discovery;
pub mod local;
pub mod models;
pub mod onvif_client;
pub mod rtsp;
pub mod scanner;
pub mod validator;

pub use capture::{default_frame_grabber, CaptureSource, FrameGrabber, FrameInfo};
pub use details::DeviceDetailFetcher;
pub use discovery::MulticastServiceProbe;
pub use local::LocalDeviceEnumerator;
pub use models::{
    CameraKind, CameraStatus, Credentials, DetectedCamera, DeviceDetails, DiscoveredEndpoint,
    DiscoveryOrigin, ProbeOutcome, Resolution, ScanHit, ServiceProtocol,
};
pub use scanner::SubnetPortScanner;
pub use validator::{CameraValidator, ValidationReport};
