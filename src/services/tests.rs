#[cfg(test)]
mod tests {
    use super::super::config_loader::{ConfigLoader, DetectionType, TripwireDirection};
    use super::super::detection::{DiscoveryOrchestrator, DiscoveryPhase};
    use super::super::reconciler::Reconciler;
    use super::super::scheduler::{ContinuousDetectionScheduler, SchedulerState, SchedulerStatus};
    use crate::config::Config;
    use crate::db::models::{CameraConfig, CameraUpdate, NewCameraConfig, NewTripwireZone, TripwireZone};
    use crate::db::{ConfigurationStore, MemoryConfigurationStore};
    use crate::error::{Error, Result as StoreResult};
    use crate::device_manager::{
        CameraKind, CaptureSource, DiscoveryOrigin, FrameGrabber, FrameInfo, Resolution,
    };
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// A single webcam at index 0 that can be unplugged
    struct Webcam {
        plugged: AtomicBool,
    }

    impl Webcam {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                plugged: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl FrameGrabber for Webcam {
        async fn grab(&self, source: &CaptureSource, _timeout: Duration) -> Result<FrameInfo> {
            match source {
                CaptureSource::Device(0) if self.plugged.load(Ordering::SeqCst) => Ok(FrameInfo {
                    resolution: Resolution::new(640, 480),
                    frame_rate: Some(30),
                }),
                _ => Err(anyhow!("no frame")),
            }
        }
    }

    fn local_only_config() -> Config {
        let mut config = Config::default();
        config.local.max_device_index = 3;
        config.local.frame_timeout_ms = 200;
        config.multicast.enabled = false;
        config.scanner.enabled = false;
        config.details.enabled = false;
        config.validation.frame_timeout_ms = 200;
        config.scheduler.stop_timeout_ms = 2000;
        config
    }

    struct Harness {
        store: Arc<MemoryConfigurationStore>,
        webcam: Arc<Webcam>,
        scheduler: ContinuousDetectionScheduler,
        orchestrator: Arc<DiscoveryOrchestrator>,
    }

    fn harness() -> Result<Harness> {
        let config = local_only_config();
        let store = Arc::new(MemoryConfigurationStore::new());
        let webcam = Webcam::new();
        let orchestrator = Arc::new(DiscoveryOrchestrator::new(
            &config,
            store.clone(),
            webcam.clone(),
        )?);
        let reconciler = Arc::new(Reconciler::new(store.clone(), config.reconciler.clone()));
        let scheduler =
            ContinuousDetectionScheduler::new(orchestrator.clone(), reconciler, config.scheduler.clone());
        Ok(Harness {
            store,
            webcam,
            scheduler,
            orchestrator,
        })
    }

    /// Webcam at index 0 whose every grab takes a while, recording overlap
    struct SlowWebcam {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl FrameGrabber for SlowWebcam {
        async fn grab(&self, source: &CaptureSource, _timeout: Duration) -> Result<FrameInfo> {
            if !matches!(source, CaptureSource::Device(0)) {
                return Err(anyhow!("no frame"));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(FrameInfo {
                resolution: Resolution::new(640, 480),
                frame_rate: Some(30),
            })
        }
    }

    /// Webcam whose first grab panics
    struct FaultyWebcam {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FrameGrabber for FaultyWebcam {
        async fn grab(&self, source: &CaptureSource, _timeout: Duration) -> Result<FrameInfo> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("capture driver crashed");
            }
            match source {
                CaptureSource::Device(0) => Ok(FrameInfo {
                    resolution: Resolution::new(640, 480),
                    frame_rate: Some(30),
                }),
                _ => Err(anyhow!("no frame")),
            }
        }
    }

    /// Store whose first `list_all` calls fail
    struct FlakyStore {
        inner: MemoryConfigurationStore,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl ConfigurationStore for FlakyStore {
        async fn get_by_source(&self, source: &str) -> StoreResult<Option<CameraConfig>> {
            self.inner.get_by_source(source).await
        }

        async fn get_by_id(&self, camera_id: i32) -> StoreResult<Option<CameraConfig>> {
            self.inner.get_by_id(camera_id).await
        }

        async fn list_all(&self) -> StoreResult<Vec<CameraConfig>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Database("connection reset".to_string()));
            }
            self.inner.list_all().await
        }

        async fn list_active(&self) -> StoreResult<Vec<CameraConfig>> {
            self.inner.list_active().await
        }

        async fn create(&self, camera: NewCameraConfig) -> StoreResult<CameraConfig> {
            self.inner.create(camera).await
        }

        async fn update(&self, camera_id: i32, fields: CameraUpdate) -> StoreResult<CameraConfig> {
            self.inner.update(camera_id, fields).await
        }

        async fn create_zone(&self, camera_id: i32, zone: NewTripwireZone) -> StoreResult<TripwireZone> {
            self.inner.create_zone(camera_id, zone).await
        }

        async fn list_zones(&self, camera_id: i32) -> StoreResult<Vec<TripwireZone>> {
            self.inner.list_zones(camera_id).await
        }
    }

    fn scheduler_with(
        config: &Config,
        store: Arc<dyn ConfigurationStore>,
        grabber: Arc<dyn FrameGrabber>,
    ) -> Result<ContinuousDetectionScheduler> {
        let orchestrator = Arc::new(DiscoveryOrchestrator::new(config, store.clone(), grabber)?);
        let reconciler = Arc::new(Reconciler::new(store, config.reconciler.clone()));
        Ok(ContinuousDetectionScheduler::new(
            orchestrator,
            reconciler,
            config.scheduler.clone(),
        ))
    }

    async fn wait_for<F>(scheduler: &ContinuousDetectionScheduler, what: &str, done: F)
    where
        F: Fn(&SchedulerStatus) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if done(&scheduler.status().await) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_local_camera_is_detected_and_stored() -> Result<()> {
        let h = harness()?;

        let round = h.orchestrator.detect_all().await?;
        assert_eq!(round.working.len(), 1);
        assert_eq!(round.count(CameraKind::Network), 0);
        let camera = &round.working[0];
        assert_eq!(camera.id, 0);
        assert_eq!(camera.kind, CameraKind::Local);
        assert_eq!(camera.resolution, Resolution::new(640, 480));
        assert_eq!(camera.frame_rate, 30);
        assert!(camera.is_working);

        let summary = h.scheduler.run_once().await?;
        assert_eq!(summary.created, 1);

        let rows = h.store.list_all().await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].camera_id, 0);
        assert_eq!(rows[0].camera_type, "entry");
        assert_eq!(rows[0].status, "active");
        assert!(rows[0].is_active);

        let zones = h.store.list_zones(0).await?;
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].position, 0.5);
        assert_eq!(zones[0].direction, "horizontal");
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_rounds_keep_one_row_per_source() -> Result<()> {
        let h = harness()?;

        let first = h.scheduler.run_once().await?;
        let second = h.scheduler.run_once().await?;
        assert_eq!(first.created, 1);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 1);

        let rows = h.store.list_all().await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].camera_id, 0);
        assert_eq!(h.store.list_zones(0).await?.len(), 1);
        assert_eq!(h.orchestrator.latest().await.round, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unplugged_camera_is_marked_inactive() -> Result<()> {
        let h = harness()?;
        h.scheduler.run_once().await?;

        h.webcam.plugged.store(false, Ordering::SeqCst);
        let round = h.orchestrator.detect_all().await?;
        assert!(round.working.is_empty());
        let offline: Vec<_> = round.offline_persisted().collect();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].origin, DiscoveryOrigin::Persisted);

        let summary = h.scheduler.run_once().await?;
        assert_eq!(summary.offline, 1);

        let row = h.store.get_by_id(0).await?.ok_or_else(|| anyhow!("camera 0 missing"))?;
        assert_eq!(row.status, "inactive");
        assert!(row.is_active);
        Ok(())
    }

    #[tokio::test]
    async fn test_loader_drops_invalid_tripwires() -> Result<()> {
        let h = harness()?;
        h.scheduler.run_once().await?;

        let mut broken = h
            .store
            .list_zones(0)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("default zone missing"))?;
        broken.id = 99;
        broken.name = "OffFrame".to_string();
        broken.position = 1.5;
        h.store.put_zone(broken.clone()).await;

        let mut exit = broken.clone();
        exit.id = 100;
        exit.name = "Exit".to_string();
        exit.position = 0.25;
        exit.direction = "vertical".to_string();
        exit.detection_type = "exit".to_string();
        h.store.put_zone(exit).await;

        let mut disabled = broken;
        disabled.id = 101;
        disabled.position = 0.75;
        disabled.is_active = false;
        h.store.put_zone(disabled).await;

        let loader = ConfigLoader::new(h.store.clone());
        let configs = loader.load_active().await?;
        assert_eq!(configs.len(), 1);

        let camera = &configs[0];
        assert_eq!(camera.camera_id, 0);
        assert_eq!(camera.resolution, Resolution::new(640, 480));
        assert_eq!(camera.fps, 30);
        let names: Vec<_> = camera.tripwires.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["EntryDetection", "Exit"]);
        assert_eq!(camera.tripwires[1].direction, TripwireDirection::Vertical);
        assert_eq!(camera.tripwires[1].detection_type, DetectionType::Exit);
        Ok(())
    }

    #[tokio::test]
    async fn test_loader_excludes_invalid_cameras() -> Result<()> {
        let h = harness()?;
        h.scheduler.run_once().await?;

        let mut lobby = h
            .store
            .get_by_id(0)
            .await?
            .ok_or_else(|| anyhow!("camera 0 missing"))?;
        lobby.camera_id = 5;
        lobby.source = Some("5".to_string());
        lobby.camera_type = "lobby".to_string();
        h.store.put(lobby).await;

        let loader = ConfigLoader::new(h.store.clone());
        assert_eq!(loader.load_all().await?.len(), 1);
        assert!(loader.load_by_id(5).await?.is_none());
        assert!(loader.load_by_id(0).await?.is_some());
        assert!(loader.load_by_id(42).await?.is_none());
        assert_eq!(loader.refresh().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle() -> Result<()> {
        let h = harness()?;
        let interval = Duration::from_secs(3600);

        assert!(h.scheduler.start(interval).await);
        assert!(!h.scheduler.start(interval).await);
        assert!(h.scheduler.is_running().await);

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.scheduler.status().await.rounds_completed == 0 {
            assert!(Instant::now() < deadline, "first round never completed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let status = h.scheduler.status().await;
        assert_eq!(status.state, SchedulerState::Running);
        assert_eq!(status.interval_secs, Some(3600));
        assert!(status.last_error.is_none());

        let stopping = Instant::now();
        assert!(h.scheduler.stop().await);
        assert!(stopping.elapsed() < Duration::from_secs(3));
        assert!(!h.scheduler.is_running().await);
        assert_eq!(h.scheduler.status().await.state, SchedulerState::Stopped);
        assert!(!h.scheduler.stop().await);

        assert_eq!(h.store.list_all().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_scan_does_not_abort_round() -> Result<()> {
        let mut config = local_only_config();
        config.scanner.enabled = true;
        config.scanner.network_range = Some("not-a-range".to_string());
        let store = Arc::new(MemoryConfigurationStore::new());
        let orchestrator = DiscoveryOrchestrator::new(&config, store, Webcam::new())?;

        let round = orchestrator.detect_all().await?;
        assert_eq!(round.working.len(), 1);
        assert_eq!(round.working[0].kind, CameraKind::Local);
        assert_eq!(round.phase_errors.len(), 1);
        assert_eq!(round.phase_errors[0].phase, DiscoveryPhase::SubnetScan);
        assert!(round.phase_errors[0].message.contains("not-a-range"));
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_backs_off_after_failed_round() -> Result<()> {
        let mut config = local_only_config();
        config.scheduler.backoff_secs = 1;
        let store = Arc::new(FlakyStore {
            inner: MemoryConfigurationStore::new(),
            failures_left: AtomicUsize::new(1),
        });
        let scheduler = scheduler_with(&config, store.clone(), Webcam::new())?;

        assert!(scheduler.start(Duration::from_secs(3600)).await);
        wait_for(&scheduler, "failed round", |s| s.consecutive_failures == 1).await;
        let status = scheduler.status().await;
        assert_eq!(status.rounds_completed, 0);
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("connection reset")));

        wait_for(&scheduler, "retried round", |s| s.rounds_completed >= 1).await;
        let status = scheduler.status().await;
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_error.is_none());
        assert_eq!(store.inner.list_all().await?.len(), 1);

        assert!(scheduler.stop().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_scheduler_survives_panicking_round() -> Result<()> {
        let mut config = local_only_config();
        config.scheduler.backoff_secs = 1;
        let store = Arc::new(MemoryConfigurationStore::new());
        let grabber = Arc::new(FaultyWebcam {
            calls: AtomicUsize::new(0),
        });
        let scheduler = scheduler_with(&config, store.clone(), grabber)?;

        assert!(scheduler.start(Duration::from_secs(3600)).await);
        wait_for(&scheduler, "panicked round", |s| s.consecutive_failures == 1).await;
        assert!(scheduler
            .status()
            .await
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("capture driver crashed")));
        assert!(scheduler.is_running().await);

        wait_for(&scheduler, "recovered round", |s| s.rounds_completed >= 1).await;
        assert_eq!(store.list_all().await?.len(), 1);

        assert!(scheduler.stop().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_waits_for_round_in_flight() -> Result<()> {
        let mut config = local_only_config();
        config.local.max_device_index = 1;
        config.local.frame_timeout_ms = 2000;
        config.validation.frame_timeout_ms = 2000;
        config.scheduler.stop_timeout_ms = 50;
        let webcam = Arc::new(SlowWebcam {
            delay: Duration::from_millis(800),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let scheduler = scheduler_with(
            &config,
            Arc::new(MemoryConfigurationStore::new()),
            webcam.clone(),
        )?;
        let interval = Duration::from_secs(3600);

        assert!(scheduler.start(interval).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.stop().await);
        assert!(scheduler.is_draining().await);
        assert!(!scheduler.is_running().await);
        assert!(!scheduler.start(interval).await);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !scheduler.start(interval).await {
            assert!(Instant::now() < deadline, "detached round never finished");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!scheduler.is_draining().await);

        wait_for(&scheduler, "round after restart", |s| s.rounds_completed >= 2).await;
        assert_eq!(webcam.peak.load(Ordering::SeqCst), 1);
        assert!(scheduler.stop().await);
        Ok(())
    }
}
