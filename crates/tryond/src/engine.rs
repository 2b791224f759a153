//! Try-on session: camera capture, detection scheduling and overlay rendering.
//!
//! Three workers cooperate per session:
//! - a capture thread that owns the frame source and publishes the newest frame
//! - the frame loop task that admits frames to the scheduler and renders
//! - one detection task at a time, running on the blocking pool
//!
//! The camera is opened before anything else. When it cannot be opened the
//! session stays in `CameraState::Unavailable` and the landmark models are
//! never loaded.

use crate::config::Config;
use crate::overlay::{load_accessory_asset, OverlayError, OverlayState, OverlayStore};
use chrono::{DateTime, Local};
use image::{RgbImage, RgbaImage};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tryon_core::capture::{compose_capture, encode_png, CaptureError, CaptureOptions};
use tryon_core::catalog::{self, CatalogItem, ItemKind};
use tryon_core::geometry::{assess_framing, FaceGeometry};
use tryon_core::render::Renderer;
use tryon_core::scheduler::{Admission, Completion, Scheduler, SchedulerStats, Ticket};
use tryon_core::{
    DetectorError, DetectorHandle, DetectorLifecycle, EstimatorLoader, LandmarkEstimator, LandmarkSet,
    MakeupLayer, PlacementConstants, Presentation,
};
use tryon_hw::{CameraError, Frame, FrameSource};

/// Consecutive capture failures after which the camera is given up.
const MAX_CAPTURE_ERRORS: u32 = 10;
const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("no frame captured yet")]
    NoFrame,
    #[error("no face in view")]
    NoFace,
    #[error("catalog item {0:?} is not a shade")]
    NotAShade(String),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CameraState {
    Streaming,
    Unavailable(String),
    Stopped,
}

/// Whether overlays can be drawn. Streaming continues in every mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum OverlayMode {
    Loading,
    Ready,
    Unavailable(String),
}

/// The newest published detection.
#[derive(Debug, Clone)]
pub struct FaceSnapshot {
    /// Camera sequence number of the frame the faces came from.
    pub sequence: u32,
    pub faces: Vec<LandmarkSet>,
    pub geometry: FaceGeometry,
}

impl FaceSnapshot {
    fn new(sequence: u32, faces: Vec<LandmarkSet>, (width, height): (u32, u32)) -> Self {
        let geometry = match faces.first() {
            Some(face) => assess_framing(face, width, height),
            None => FaceGeometry::no_face(),
        };
        Self {
            sequence,
            faces,
            geometry,
        }
    }

    /// The face overlays are drawn on. Only the first detected face is used.
    pub fn primary(&self) -> Option<&LandmarkSet> {
        self.faces.first()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub camera: CameraState,
    pub overlay: OverlayMode,
    pub presentation: Presentation,
    pub detection: SchedulerStats,
    pub faces: usize,
    pub geometry: Option<FaceGeometry>,
    pub selection: serde_json::Value,
}

/// Per-session settings, split from [`Config`] so tests can build them.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub presentation: Presentation,
    pub placement: PlacementConstants,
    pub model_load_timeout: Duration,
    pub capture_dir: PathBuf,
    pub watermark: Option<String>,
    pub asset_dir: PathBuf,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            presentation: config.presentation(),
            placement: PlacementConstants::default(),
            model_load_timeout: config.model_load_timeout,
            capture_dir: config.capture_dir.clone(),
            watermark: config.watermark.clone(),
            asset_dir: config.asset_dir.clone(),
        }
    }
}

/// The last rendered frame, kept for still capture.
#[derive(Clone)]
struct Rendered {
    frame: Arc<RgbImage>,
    surface: Arc<RgbaImage>,
}

struct Shared {
    live: AtomicBool,
    shutdown: Notify,
    camera: Mutex<CameraState>,
    overlay_mode: Mutex<OverlayMode>,
    stats: Mutex<SchedulerStats>,
    latest: Mutex<Option<Rendered>>,
}

impl Shared {
    fn new(live: bool, camera: CameraState, overlay_mode: OverlayMode) -> Self {
        Self {
            live: AtomicBool::new(live),
            shutdown: Notify::new(),
            camera: Mutex::new(camera),
            overlay_mode: Mutex::new(overlay_mode),
            stats: Mutex::new(SchedulerStats::default()),
            latest: Mutex::new(None),
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type DetectionResult = (Ticket, Result<Vec<LandmarkSet>, DetectorError>);

/// A running try-on session.
pub struct Session {
    settings: SessionSettings,
    shared: Arc<Shared>,
    overlays: Arc<OverlayStore>,
    faces: watch::Receiver<Option<Arc<FaceSnapshot>>>,
    capture_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    frame_loop: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    /// Open the frame source, then start model loading and the frame loop.
    ///
    /// A camera failure is not an error: the session comes up in
    /// `CameraState::Unavailable` so status queries can report why.
    pub async fn start<L, S, F>(settings: SessionSettings, loader: L, open_source: F) -> Self
    where
        L: EstimatorLoader,
        S: FrameSource,
        F: FnOnce() -> Result<S, CameraError> + Send + 'static,
    {
        let overlays = Arc::new(OverlayStore::new());
        let (faces_tx, faces_rx) = watch::channel(None);

        let opened = match tokio::task::spawn_blocking(open_source).await {
            Ok(result) => result,
            Err(e) => Err(CameraError::CaptureFailed(format!("camera open task failed: {e}"))),
        };
        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "cannot access camera, overlays disabled");
                return Self::unavailable(settings, overlays, faces_rx, e.to_string());
            }
        };

        let dimensions = source.dimensions();
        let shared = Arc::new(Shared::new(true, CameraState::Streaming, OverlayMode::Loading));
        let (frame_tx, frame_rx) = watch::channel(None);

        let capture_thread = match spawn_capture_thread(source, frame_tx, Arc::clone(&shared)) {
            Ok(thread) => thread,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn capture thread");
                return Self::unavailable(settings, overlays, faces_rx, e.to_string());
            }
        };

        let lifecycle = DetectorLifecycle::new(loader, settings.model_load_timeout);
        let (init_tx, init_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = init_tx.send(lifecycle.initialize().await);
        });

        let mut renderer = Renderer::new(settings.presentation);
        renderer.placement = settings.placement;

        let frame_loop = tokio::spawn(run_frame_loop(FrameLoop {
            shared: Arc::clone(&shared),
            frames: frame_rx,
            init: init_rx,
            overlays: overlays.subscribe(),
            faces: faces_tx,
            renderer,
            dimensions,
        }));

        tracing::info!(width = dimensions.0, height = dimensions.1, "session started");

        Self {
            settings,
            shared,
            overlays,
            faces: faces_rx,
            capture_thread: Mutex::new(Some(capture_thread)),
            frame_loop: Mutex::new(Some(frame_loop)),
        }
    }

    fn unavailable(
        settings: SessionSettings,
        overlays: Arc<OverlayStore>,
        faces: watch::Receiver<Option<Arc<FaceSnapshot>>>,
        reason: String,
    ) -> Self {
        Self {
            settings,
            shared: Arc::new(Shared::new(
                false,
                CameraState::Unavailable(reason),
                OverlayMode::Unavailable("camera unavailable".into()),
            )),
            overlays,
            faces,
            capture_thread: Mutex::new(None),
            frame_loop: Mutex::new(None),
        }
    }

    /// Stop the session and release the camera.
    ///
    /// Detections still running are left to finish; their results are
    /// discarded. Calling `stop` twice is a no-op.
    pub async fn stop(&self) {
        if !self.shared.live.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.notify_one();

        let frame_loop = lock(&self.frame_loop).take();
        if let Some(task) = frame_loop {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "frame loop ended abnormally");
            }
        }

        let capture_thread = lock(&self.capture_thread).take();
        if let Some(thread) = capture_thread {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                _ => tracing::warn!("capture thread panicked"),
            }
        }

        let mut camera = lock(&self.shared.camera);
        if *camera == CameraState::Streaming {
            *camera = CameraState::Stopped;
        }
        tracing::info!("session stopped");
    }

    pub fn camera_state(&self) -> CameraState {
        lock(&self.shared.camera).clone()
    }

    pub fn overlay_mode(&self) -> OverlayMode {
        lock(&self.shared.overlay_mode).clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        *lock(&self.shared.stats)
    }

    pub fn presentation(&self) -> Presentation {
        self.settings.presentation
    }

    /// The newest published detection, if any.
    pub fn face_snapshot(&self) -> Option<Arc<FaceSnapshot>> {
        self.faces.borrow().clone()
    }

    pub fn subscribe_faces(&self) -> watch::Receiver<Option<Arc<FaceSnapshot>>> {
        self.faces.clone()
    }

    pub fn overlays(&self) -> &OverlayStore {
        &self.overlays
    }

    fn ensure_camera(&self) -> Result<(), SessionError> {
        match self.camera_state() {
            CameraState::Unavailable(reason) => Err(SessionError::CameraUnavailable(reason)),
            _ => Ok(()),
        }
    }

    /// Select a catalog accessory by id, loading its image from the asset directory.
    pub async fn select_accessory(&self, id: &str) -> Result<(), SessionError> {
        let item = catalog::lookup(id).ok_or_else(|| OverlayError::UnknownItem(id.to_string()))?;
        let asset_dir = self.settings.asset_dir.clone();
        let asset = tokio::task::spawn_blocking(move || load_accessory_asset(&asset_dir, item)).await??;
        self.overlays.select_accessory(&item.id, asset);
        tracing::info!(id = %item.id, "accessory selected");
        Ok(())
    }

    /// Apply a catalog shade to its region at the given opacity.
    pub fn apply_shade(&self, id: &str, opacity: f32) -> Result<MakeupLayer, SessionError> {
        let item = catalog::lookup(id).ok_or_else(|| OverlayError::UnknownItem(id.to_string()))?;
        let (ItemKind::Shade, Some(region), Some(color)) = (item.kind, item.region, item.color) else {
            return Err(SessionError::NotAShade(id.to_string()));
        };
        let mut layer = MakeupLayer::new(region, color);
        layer.opacity = opacity.clamp(0.0, 1.0);
        self.overlays.set_makeup(layer);
        Ok(layer)
    }

    /// Write the current frame with its overlay to the capture directory as PNG.
    pub async fn capture(&self) -> Result<PathBuf, SessionError> {
        self.ensure_camera()?;
        let latest = lock(&self.shared.latest).clone().ok_or(SessionError::NoFrame)?;
        let options = CaptureOptions {
            presentation: self.settings.presentation,
            watermark: self.settings.watermark.clone(),
        };

        let png = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CaptureError> {
            let composed = compose_capture(&latest.frame, &latest.surface, &options)?;
            encode_png(&composed)
        })
        .await??;

        tokio::fs::create_dir_all(&self.settings.capture_dir).await?;
        let path = self.settings.capture_dir.join(capture_file_name(Local::now()));
        tokio::fs::write(&path, &png).await?;
        tracing::info!(path = %path.display(), bytes = png.len(), "capture saved");
        Ok(path)
    }

    pub fn status(&self) -> SessionStatus {
        let snapshot = self.face_snapshot();
        SessionStatus {
            camera: self.camera_state(),
            overlay: self.overlay_mode(),
            presentation: self.settings.presentation,
            detection: self.stats(),
            faces: snapshot.as_ref().map_or(0, |s| s.faces.len()),
            geometry: snapshot.map(|s| s.geometry.clone()),
            selection: self.overlays.snapshot().summary(),
        }
    }

    /// Catalog items suited to the current face shape.
    pub fn recommend(&self) -> Result<Vec<&'static CatalogItem>, SessionError> {
        let shape = self
            .face_snapshot()
            .and_then(|s| s.geometry.shape)
            .ok_or(SessionError::NoFace)?;
        Ok(catalog::recommended(shape))
    }
}

impl Drop for Session {
    /// Dropping without `stop` still releases the camera: the capture thread
    /// sees the cleared flag on its next frame and drops the source.
    fn drop(&mut self) {
        self.shared.live.store(false, Ordering::SeqCst);
        self.shared.shutdown.notify_one();
        if let Some(task) = lock(&self.frame_loop).take() {
            task.abort();
        }
    }
}

pub fn capture_file_name(at: DateTime<Local>) -> String {
    format!("tryon-{}.png", at.format("%Y%m%d-%H%M%S"))
}

/// Pull frames from `source` until the session stops or nobody listens.
/// The source is dropped, releasing the device, when the thread exits.
fn spawn_capture_thread<S: FrameSource>(
    mut source: S,
    frames: watch::Sender<Option<Frame>>,
    shared: Arc<Shared>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new().name("tryon-capture".into()).spawn(move || {
        tracing::info!("capture thread started");
        let mut errors = 0u32;

        while shared.is_live() {
            match source.next_frame() {
                Ok(frame) => {
                    errors = 0;
                    if frames.send(Some(frame)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    errors += 1;
                    tracing::warn!(error = %e, consecutive = errors, "frame capture failed");
                    if e.is_access_error() || errors >= MAX_CAPTURE_ERRORS {
                        *lock(&shared.camera) = CameraState::Unavailable(e.to_string());
                        break;
                    }
                    std::thread::sleep(CAPTURE_ERROR_BACKOFF);
                }
            }
        }

        drop(source);
        tracing::info!("capture thread exiting, camera released");
    })
}

struct FrameLoop<E> {
    shared: Arc<Shared>,
    frames: watch::Receiver<Option<Frame>>,
    init: oneshot::Receiver<Result<DetectorHandle<E>, DetectorError>>,
    overlays: watch::Receiver<Arc<OverlayState>>,
    faces: watch::Sender<Option<Arc<FaceSnapshot>>>,
    renderer: Renderer,
    dimensions: (u32, u32),
}

async fn run_frame_loop<E: LandmarkEstimator>(mut ctx: FrameLoop<E>) {
    let mut scheduler = Scheduler::new();
    let mut detector: Option<DetectorHandle<E>> = None;
    let mut init_pending = true;
    let (result_tx, mut results) = mpsc::channel::<DetectionResult>(1);

    loop {
        tokio::select! {
            _ = ctx.shared.shutdown.notified() => break,

            outcome = &mut ctx.init, if init_pending => {
                init_pending = false;
                let mode = match outcome {
                    Ok(Ok(handle)) => {
                        detector = Some(handle);
                        scheduler.mark_ready();
                        tracing::info!("landmark models ready");
                        OverlayMode::Ready
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "landmark models unavailable, streaming without overlays");
                        OverlayMode::Unavailable(e.to_string())
                    }
                    Err(_) => OverlayMode::Unavailable("model loader exited".into()),
                };
                *lock(&ctx.shared.overlay_mode) = mode;
            }

            Some((ticket, result)) = results.recv() => {
                if let Err(e) = &result {
                    tracing::debug!(sequence = ticket.sequence, error = %e, "detection failed");
                }
                if let Completion::Publish(publication) = scheduler.complete(ticket, result) {
                    let snapshot = FaceSnapshot::new(publication.ticket.sequence, publication.faces, ctx.dimensions);
                    ctx.faces.send_replace(Some(Arc::new(snapshot)));
                    scheduler.published(publication.ticket);
                }
                *lock(&ctx.shared.stats) = scheduler.stats();
            }

            changed = ctx.frames.changed() => {
                if changed.is_err() {
                    tracing::debug!("frame source closed");
                    break;
                }
                let Some(frame) = ctx.frames.borrow_and_update().clone() else {
                    continue;
                };

                // Frames are only offered once a detector exists.
                if let Some(handle) = &detector {
                    match scheduler.offer(frame.sequence, !frame.is_dark) {
                        Admission::Submit(ticket) => {
                            let handle = handle.clone();
                            let image = Arc::clone(&frame.image);
                            let tx = result_tx.clone();
                            tokio::spawn(async move {
                                let result = handle.estimate(image).await;
                                // The loop may be gone; late results are dropped.
                                let _ = tx.send((ticket, result)).await;
                            });
                        }
                        Admission::Drop(reason) => {
                            tracing::trace!(sequence = frame.sequence, ?reason, "frame not submitted");
                        }
                    }
                    *lock(&ctx.shared.stats) = scheduler.stats();
                }

                if let Err(e) = render_frame(&ctx, frame).await {
                    tracing::warn!(error = %e, "render task failed");
                }
            }
        }
    }

    scheduler.stop();
    *lock(&ctx.shared.stats) = scheduler.stats();
    settle_overlay_mode(&ctx.shared);
    tracing::debug!("frame loop exited");
}

/// A loop that exits before the models resolve leaves no one to finish loading.
fn settle_overlay_mode(shared: &Shared) {
    let mut mode = lock(&shared.overlay_mode);
    if *mode != OverlayMode::Loading {
        return;
    }
    *mode = match *lock(&shared.camera) {
        CameraState::Unavailable(_) => OverlayMode::Unavailable("camera unavailable".into()),
        _ => OverlayMode::Unavailable("session stopped".into()),
    };
    tracing::debug!(mode = ?*mode, "overlay mode settled at loop exit");
}

/// Draw the newest faces and the current selection over `frame`.
async fn render_frame<E>(ctx: &FrameLoop<E>, frame: Frame) -> Result<(), tokio::task::JoinError> {
    let faces = ctx.faces.borrow().clone();
    let selection = ctx.overlays.borrow().clone();
    let renderer = ctx.renderer;
    let image = Arc::clone(&frame.image);

    let surface = tokio::task::spawn_blocking(move || {
        let face = faces.as_deref().and_then(FaceSnapshot::primary);
        renderer.render(&image, face, &selection.layers(), selection.accessory())
    })
    .await?;

    *lock(&ctx.shared.latest) = Some(Rendered {
        frame: frame.image,
        surface: Arc::new(surface),
    });
    Ok(())
}
