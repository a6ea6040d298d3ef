pub mod camera_models;

pub use camera_models::{CameraConfig, CameraUpdate, NewCameraConfig, NewTripwireZone, TripwireZone};
