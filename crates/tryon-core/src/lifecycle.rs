//! Owner of the process's single landmark estimator.
//!
//! `initialize` is memoized: concurrent callers share one in-flight load,
//! and every caller after success gets a handle to the same instance. A
//! failed or timed-out load is not cached, so a later call retries.

use crate::detector::DetectorError;
use crate::estimator::{EstimatorLoader, LandmarkEstimator};
use crate::types::LandmarkSet;
use image::RgbImage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Cloneable handle to the loaded estimator. Inference runs on the blocking pool.
pub struct DetectorHandle<E> {
    inner: Arc<Mutex<E>>,
}

impl<E> Clone for DetectorHandle<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: LandmarkEstimator> DetectorHandle<E> {
    fn new(estimator: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(estimator)),
        }
    }

    /// Estimate landmarks for one frame. No face yields an empty vector.
    pub async fn estimate(&self, frame: Arc<RgbImage>) -> Result<Vec<LandmarkSet>, DetectorError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut estimator = inner
                .lock()
                .map_err(|_| DetectorError::InferenceFailed("estimator lock poisoned".into()))?;
            estimator.estimate(&frame)
        })
        .await
        .map_err(|e| DetectorError::InferenceFailed(format!("estimate task: {e}")))?
    }

    /// Estimate each frame in order under one lock acquisition.
    ///
    /// The first failing frame aborts the batch.
    pub async fn estimate_batch(
        &self,
        frames: Vec<Arc<RgbImage>>,
    ) -> Result<Vec<Vec<LandmarkSet>>, DetectorError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut estimator = inner
                .lock()
                .map_err(|_| DetectorError::InferenceFailed("estimator lock poisoned".into()))?;
            frames.iter().map(|frame| estimator.estimate(frame)).collect()
        })
        .await
        .map_err(|e| DetectorError::InferenceFailed(format!("estimate task: {e}")))?
    }

    /// Whether two handles refer to the same loaded estimator.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

pub struct DetectorLifecycle<L: EstimatorLoader> {
    loader: Arc<L>,
    load_timeout: Duration,
    cell: OnceCell<DetectorHandle<L::Estimator>>,
}

impl<L: EstimatorLoader> DetectorLifecycle<L> {
    pub fn new(loader: L, load_timeout: Duration) -> Self {
        Self {
            loader: Arc::new(loader),
            load_timeout,
            cell: OnceCell::new(),
        }
    }

    /// Load the estimator once and return a handle to it.
    pub async fn initialize(&self) -> Result<DetectorHandle<L::Estimator>, DetectorError> {
        let handle = self
            .cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                let started = std::time::Instant::now();
                tracing::info!(timeout_secs = self.load_timeout.as_secs_f32(), "loading landmark estimator");

                let load = tokio::task::spawn_blocking(move || loader.load());
                match tokio::time::timeout(self.load_timeout, load).await {
                    Ok(Ok(Ok(estimator))) => {
                        tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "landmark estimator loaded");
                        Ok(DetectorHandle::new(estimator))
                    }
                    Ok(Ok(Err(e))) => {
                        tracing::warn!(error = %e, "landmark estimator load failed");
                        Err(e)
                    }
                    Ok(Err(e)) => Err(DetectorError::InferenceFailed(format!("load task: {e}"))),
                    Err(_) => {
                        // The blocking load keeps running; its result is dropped.
                        tracing::warn!(timeout_secs = self.load_timeout.as_secs_f32(), "landmark estimator load timed out");
                        Err(DetectorError::LoadTimedOut(self.load_timeout))
                    }
                }
            })
            .await?;
        Ok(handle.clone())
    }

    /// The handle, if initialization has completed.
    pub fn handle(&self) -> Option<DetectorHandle<L::Estimator>> {
        self.cell.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Estimate through the lifecycle; fails with `NotInitialized` until
    /// [`initialize`](Self::initialize) has resolved.
    pub async fn estimate(&self, frame: Arc<RgbImage>) -> Result<Vec<LandmarkSet>, DetectorError> {
        let handle = self.handle().ok_or(DetectorError::NotInitialized)?;
        handle.estimate(frame).await
    }

    pub async fn estimate_batch(
        &self,
        frames: Vec<Arc<RgbImage>>,
    ) -> Result<Vec<Vec<LandmarkSet>>, DetectorError> {
        let handle = self.handle().ok_or(DetectorError::NotInitialized)?;
        handle.estimate_batch(frames).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, LandmarkPoint};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns one single-point face per call, or nothing for a black frame.
    struct FakeEstimator {
        pub calls: Arc<AtomicUsize>,
    }

    impl LandmarkEstimator for FakeEstimator {
        fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<LandmarkSet>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if frame.width() == 0 {
                return Err(DetectorError::MalformedFrame("empty".into()));
            }
            if frame.pixels().all(|p| p.0 == [0, 0, 0]) {
                return Ok(vec![]);
            }
            let set = LandmarkSet::new(
                vec![LandmarkPoint::new(0, 1.0, 1.0)],
                0.9,
                BoundingBox::new(0.0, 0.0, 2.0, 2.0),
            )
            .map_err(|e| DetectorError::InferenceFailed(e.to_string()))?;
            Ok(vec![set])
        }
    }

    struct FakeLoader {
        pub loads: Arc<AtomicUsize>,
        pub calls: Arc<AtomicUsize>,
        pub delay: Duration,
        /// Number of initial loads that fail.
        pub failures: usize,
    }

    impl FakeLoader {
        pub fn new(delay: Duration) -> Self {
            Self {
                loads: Arc::new(AtomicUsize::new(0)),
                calls: Arc::new(AtomicUsize::new(0)),
                delay,
                failures: 0,
            }
        }
    }

    impl EstimatorLoader for FakeLoader {
        type Estimator = FakeEstimator;

        fn load(&self) -> Result<FakeEstimator, DetectorError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if n < self.failures {
                return Err(DetectorError::ModelNotFound("fake.onnx".into()));
            }
            Ok(FakeEstimator {
                calls: Arc::clone(&self.calls),
            })
        }
    }

    #[tokio::test]
    async fn test_initialize_is_memoized_across_concurrent_callers() {
        let loader = FakeLoader::new(Duration::from_millis(50));
        let loads = Arc::clone(&loader.loads);
        let lifecycle = Arc::new(DetectorLifecycle::new(loader, Duration::from_secs(5)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lc = Arc::clone(&lifecycle);
                tokio::spawn(async move { lc.initialize().await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|w| w[0].same_instance(&w[1])));

        let again = lifecycle.initialize().await.unwrap();
        assert!(again.same_instance(&handles[0]));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_estimate_before_initialize_fails() {
        let loader = FakeLoader::new(Duration::ZERO);
        let calls = Arc::clone(&loader.calls);
        let lifecycle = DetectorLifecycle::new(loader, Duration::from_secs(5));

        let frame = Arc::new(RgbImage::from_pixel(4, 4, image::Rgb([200, 180, 160])));
        let err = lifecycle.estimate(Arc::clone(&frame)).await.unwrap_err();
        assert!(matches!(err, DetectorError::NotInitialized));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        lifecycle.initialize().await.unwrap();
        assert_eq!(lifecycle.estimate(frame).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_face_is_empty_not_error() {
        let lifecycle = DetectorLifecycle::new(FakeLoader::new(Duration::ZERO), Duration::from_secs(5));
        let handle = lifecycle.initialize().await.unwrap();
        let faces = handle.estimate(Arc::new(RgbImage::new(8, 8))).await.unwrap();
        assert!(faces.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_distinct_error() {
        let lifecycle = DetectorLifecycle::new(FakeLoader::new(Duration::ZERO), Duration::from_secs(5));
        let handle = lifecycle.initialize().await.unwrap();
        let err = handle.estimate(Arc::new(RgbImage::new(0, 0))).await.unwrap_err();
        assert!(matches!(err, DetectorError::MalformedFrame(_)));
    }

    #[tokio::test]
    async fn test_estimate_batch_preserves_order() {
        let lifecycle = DetectorLifecycle::new(FakeLoader::new(Duration::ZERO), Duration::from_secs(5));
        lifecycle.initialize().await.unwrap();
        let lit = Arc::new(RgbImage::from_pixel(4, 4, image::Rgb([90, 90, 90])));
        let dark = Arc::new(RgbImage::new(4, 4));
        let results = lifecycle
            .estimate_batch(vec![Arc::clone(&lit), dark, lit])
            .await
            .unwrap();
        assert_eq!(results.iter().map(Vec::len).collect::<Vec<_>>(), vec![1, 0, 1]);
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let lifecycle = DetectorLifecycle::new(
            FakeLoader::new(Duration::from_millis(300)),
            Duration::from_millis(20),
        );
        assert!(matches!(
            lifecycle.initialize().await,
            Err(DetectorError::LoadTimedOut(_))
        ));
        assert!(!lifecycle.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let mut loader = FakeLoader::new(Duration::ZERO);
        loader.failures = 1;
        let loads = Arc::clone(&loader.loads);
        let lifecycle = DetectorLifecycle::new(loader, Duration::from_secs(5));

        assert!(matches!(
            lifecycle.initialize().await,
            Err(DetectorError::ModelNotFound(_))
        ));
        assert!(lifecycle.initialize().await.is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }
}
