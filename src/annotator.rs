use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use crate::detection::{largest_detection, Detection, Detector};
use crate::error::{AnnotatorError, Result};
use crate::frame::{Frame, FrameSlot};
use crate::geometry::Dimensions;
use crate::models::ModelSlot;
use crate::overlay::{ApplyOutcome, Overlay, Shape};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Most detection cycles allowed to overlap. Ticks beyond it are skipped.
pub const MAX_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceMode {
    /// Annotate only the largest face of each poll.
    Single,
    /// Annotate every face found.
    Multi,
}

#[derive(Clone, Debug)]
pub struct AnnotatorConfig {
    pub interval: Duration,
    pub displayed: Dimensions,
    pub face_mode: FaceMode,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            displayed: Dimensions::new(640, 360),
            face_mode: FaceMode::Single,
        }
    }
}

/// Polls the detector with the current frame and keeps the overlay in sync.
///
/// Polling runs only between [`OverlayAnnotator::start`] and
/// [`OverlayAnnotator::stop`]; every session gets a fresh overlay.
pub struct OverlayAnnotator<D> {
    models: Arc<ModelSlot<D>>,
    frames: FrameSlot,
    config: AnnotatorConfig,
    session: Option<PollingHandle>,
}

impl<D: Detector + 'static> OverlayAnnotator<D> {
    pub fn new(models: Arc<ModelSlot<D>>, frames: FrameSlot, config: AnnotatorConfig) -> Self {
        Self {
            models,
            frames,
            config,
            session: None,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.session.is_some()
    }

    /// Starts polling unless a session is already running.
    pub fn start(&mut self) {
        if self.session.is_none() {
            self.session = Some(PollingHandle::spawn(
                self.models.clone(),
                self.frames.clone(),
                self.config.clone(),
            ));
        }
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    /// Starts or stops polling to follow the source/playback state.
    pub fn sync(&mut self, active: bool) {
        match (active, self.is_polling()) {
            (true, false) => self.start(),
            (false, true) => self.stop(),
            _ => {}
        }
    }

    /// Ends the current session and starts a new one if `active`.
    ///
    /// Called when the frame source changes, so results computed on the old
    /// source land on the old, detached overlay.
    pub fn restart(&mut self, active: bool) {
        self.stop();
        self.sync(active);
    }

    /// Shapes to draw right now. Empty while not polling.
    pub fn shapes(&self) -> Result<Vec<Shape>> {
        match &self.session {
            Some(session) => session.shapes(),
            None => Ok(Vec::new()),
        }
    }
}

/// A running polling session. Dropping it stops the session.
pub struct PollingHandle {
    overlay: Arc<Mutex<Overlay>>,
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    pub fn spawn<D: Detector + 'static>(
        models: Arc<ModelSlot<D>>,
        frames: FrameSlot,
        config: AnnotatorConfig,
    ) -> Self {
        let overlay = Arc::new(Mutex::new(Overlay::new()));

        // loading outlives any single session
        let loading = models.clone();
        tokio::spawn(async move {
            loading.ensure_loaded().await;
        });

        info!(
            "Starting face detection every {:?} at {}",
            config.interval, config.displayed
        );
        let task = tokio::spawn(poll(models, frames, config, overlay.clone()));
        Self {
            overlay,
            task: Some(task),
        }
    }

    pub fn shapes(&self) -> Result<Vec<Shape>> {
        let overlay = self
            .overlay
            .lock()
            .map_err(|_| AnnotatorError::Poisoned("overlay"))?;
        Ok(overlay.shapes().to_vec())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            info!("Stopping face detection");
            task.abort();
        }
        match self.overlay.lock() {
            Ok(mut overlay) => overlay.detach(),
            Err(poisoned) => poisoned.into_inner().detach(),
        }
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll<D: Detector + 'static>(
    models: Arc<ModelSlot<D>>,
    frames: FrameSlot,
    config: AnnotatorConfig,
    overlay: Arc<Mutex<Overlay>>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // aborting this task drops the set, which aborts every cycle still in flight
    let mut in_flight = JoinSet::new();
    let mut issued: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if in_flight.len() >= MAX_IN_FLIGHT {
                    debug!("{} polls still running, skipping poll", in_flight.len());
                    continue;
                }
                let Some(detector) = models.detector() else {
                    debug!("Detection models not ready, skipping poll");
                    continue;
                };
                let frame = match frames.current() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!("No frame yet, skipping poll");
                        continue;
                    }
                    Err(e) => {
                        error!("Error sampling frame: {}", e);
                        continue;
                    }
                };
                issued += 1;
                in_flight.spawn(cycle(
                    issued,
                    detector,
                    frame,
                    overlay.clone(),
                    config.displayed,
                    config.face_mode,
                ));
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Detection cycle panicked: {}", e);
                    }
                }
            }
        }
    }
}

async fn cycle<D: Detector + 'static>(
    token: u64,
    detector: Arc<D>,
    frame: Frame,
    overlay: Arc<Mutex<Overlay>>,
    displayed: Dimensions,
    face_mode: FaceMode,
) {
    debug!("Detecting faces (poll {})", token);
    let intrinsic = frame.intrinsic;
    let detected = tokio::task::spawn_blocking(move || detector.detect(&frame)).await;
    let detections = match detected {
        Ok(Ok(detections)) => detections,
        Ok(Err(e)) => {
            error!("Error detecting faces: {}", e);
            return;
        }
        Err(e) => {
            error!("Detection task failed: {}", e);
            return;
        }
    };
    let detections: Vec<Detection> = match face_mode {
        FaceMode::Single => largest_detection(detections).into_iter().collect(),
        FaceMode::Multi => detections,
    };

    let Ok(mut overlay) = overlay.lock() else {
        error!("Overlay lock poisoned, dropping poll {}", token);
        return;
    };
    match overlay.apply(token, &detections, intrinsic, displayed) {
        ApplyOutcome::Applied(count) => debug!("Poll {} drew {} faces", token, count),
        ApplyOutcome::Stale => debug!("Discarding late result of poll {}", token),
        ApplyOutcome::Detached => debug!("Overlay gone, dropping poll {}", token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Gender;
    use crate::geometry::{DisplayRect, Region};
    use opencv::core::Mat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HD: Dimensions = Dimensions::new(1280, 720);

    type Script = dyn Fn(usize) -> Result<Vec<Detection>> + Send + Sync;

    struct ScriptedDetector {
        calls: Arc<AtomicUsize>,
        script: Box<Script>,
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(call)
        }
    }

    fn scripted<F>(script: F) -> (Arc<ModelSlot<ScriptedDetector>>, Arc<AtomicUsize>)
    where
        F: Fn(usize) -> Result<Vec<Detection>> + Send + Sync + 'static,
    {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = ScriptedDetector {
            calls: calls.clone(),
            script: Box::new(script),
        };
        (Arc::new(ModelSlot::ready(detector)), calls)
    }

    fn face(x: f32, size: f32) -> Detection {
        Detection::new(Region::new(x, 360.0, size, size * 0.5625), 30.0, Gender::Male)
    }

    fn frames_with_hd_frame() -> FrameSlot {
        let frames = FrameSlot::new();
        frames.publish(Frame::new(Mat::default(), HD)).unwrap();
        frames
    }

    fn fast_config(face_mode: FaceMode) -> AnnotatorConfig {
        AnnotatorConfig {
            interval: Duration::from_millis(20),
            displayed: Dimensions::new(640, 360),
            face_mode,
        }
    }

    fn rect_count(annotator: &OverlayAnnotator<ScriptedDetector>) -> usize {
        annotator
            .shapes()
            .unwrap()
            .iter()
            .filter(|shape| matches!(shape, Shape::Rect(_)))
            .count()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_draws_scaled_detection() {
        let (models, _calls) = scripted(|_| Ok(vec![face(640.0, 128.0)]));
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();

        wait_until(|| rect_count(&annotator) == 1).await;
        let shapes = annotator.shapes().unwrap();
        assert_eq!(
            shapes[0],
            Shape::Rect(DisplayRect {
                left: 320.0,
                top: 180.0,
                width: 64.0,
                height: 36.0,
            })
        );
        assert!(matches!(
            &shapes[1],
            Shape::Label { text, .. } if text == "Age: 30 years, Gender: male"
        ));
    }

    #[tokio::test]
    async fn test_face_modes() {
        let script = |_: usize| -> Result<Vec<Detection>> {
            Ok(vec![face(0.0, 64.0), face(400.0, 256.0), face(900.0, 128.0)])
        };

        let (models, _) = scripted(script);
        let mut single =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        single.start();
        wait_until(|| rect_count(&single) == 1).await;
        assert!(matches!(&single.shapes().unwrap()[0], Shape::Rect(r) if r.left == 200.0));

        let (models, _) = scripted(script);
        let mut multi =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Multi));
        multi.start();
        wait_until(|| rect_count(&multi) == 3).await;
    }

    #[tokio::test]
    async fn test_detector_error_keeps_polling_and_shapes() {
        let (models, calls) = scripted(|call| match call {
            0 => Ok(vec![face(640.0, 128.0)]),
            _ => Err(AnnotatorError::Detection("backend hiccup".to_string())),
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();

        wait_until(|| calls.load(Ordering::SeqCst) >= 4).await;
        assert_eq!(rect_count(&annotator), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_error() {
        let (models, calls) = scripted(|call| match call {
            0 => Err(AnnotatorError::Detection("backend hiccup".to_string())),
            _ => Ok(vec![face(640.0, 128.0)]),
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();

        wait_until(|| rect_count(&annotator) == 1).await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_empty_result_clears_overlay() {
        let (models, _) = scripted(|call| match call {
            0 => Ok(vec![face(640.0, 128.0)]),
            _ => Ok(Vec::new()),
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();

        wait_until(|| rect_count(&annotator) == 1).await;
        wait_until(|| annotator.shapes().unwrap().is_empty()).await;
    }

    #[tokio::test]
    async fn test_late_result_does_not_overwrite_newer() {
        let (models, _) = scripted(|call| match call {
            0 => {
                std::thread::sleep(Duration::from_millis(200));
                Ok(vec![face(0.0, 64.0), face(400.0, 64.0)])
            }
            1 => Ok(vec![face(640.0, 128.0)]),
            _ => Err(AnnotatorError::Detection("no more faces".to_string())),
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Multi));
        annotator.start();

        wait_until(|| rect_count(&annotator) == 1).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rect_count(&annotator), 1);
    }

    #[tokio::test]
    async fn test_model_load_failure_never_detects() {
        let models: Arc<ModelSlot<ScriptedDetector>> = Arc::new(ModelSlot::new(|| {
            Err(AnnotatorError::ModelLoad("weights missing".to_string()))
        }));
        let mut annotator = OverlayAnnotator::new(
            models.clone(),
            frames_with_hd_frame(),
            fast_config(FaceMode::Single),
        );
        annotator.start();

        wait_until(|| models.has_failed()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(models.detector().is_none());
        assert!(annotator.is_polling());
        assert!(annotator.shapes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_frame_skips_detection() {
        let (models, calls) = scripted(|_| Ok(vec![face(640.0, 128.0)]));
        let frames = FrameSlot::new();
        let mut annotator =
            OverlayAnnotator::new(models, frames.clone(), fast_config(FaceMode::Single));
        annotator.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        frames.publish(Frame::new(Mat::default(), HD)).unwrap();
        wait_until(|| rect_count(&annotator) == 1).await;
    }

    #[tokio::test]
    async fn test_stop_halts_polling() {
        let (models, calls) = scripted(|_| Ok(vec![face(640.0, 128.0)]));
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();
        wait_until(|| rect_count(&annotator) == 1).await;

        annotator.sync(false);
        assert!(!annotator.is_polling());
        assert!(annotator.shapes().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_stop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);

        annotator.sync(true);
        assert!(annotator.is_polling());
        wait_until(|| rect_count(&annotator) == 1).await;
    }

    #[tokio::test]
    async fn test_result_after_teardown_is_dropped() {
        let (models, _) = scripted(|_| Ok(vec![face(640.0, 128.0)]));
        let handle =
            PollingHandle::spawn(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        let overlay = handle.overlay.clone();
        drop(handle);

        let outcome = overlay
            .lock()
            .unwrap()
            .apply(100, &[face(0.0, 64.0)], HD, Dimensions::new(640, 360));
        assert_eq!(outcome, ApplyOutcome::Detached);
        assert!(overlay.lock().unwrap().shapes().is_empty());
    }

    fn session_overlay(annotator: &OverlayAnnotator<ScriptedDetector>) -> Arc<Mutex<Overlay>> {
        annotator.session.as_ref().unwrap().overlay.clone()
    }

    #[tokio::test]
    async fn test_slow_detector_bounds_overlap() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (now, most) = (running, peak.clone());
        let (models, calls) = scripted(move |_| {
            let current = now.fetch_add(1, Ordering::SeqCst) + 1;
            most.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            now.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![face(640.0, 128.0)])
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();

        tokio::time::sleep(Duration::from_millis(500)).await;
        annotator.stop();

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(peak.load(Ordering::SeqCst) <= MAX_IN_FLIGHT);
    }

    #[tokio::test]
    async fn test_stop_drops_result_still_in_flight() {
        let (models, calls) = scripted(|call| match call {
            0 => {
                std::thread::sleep(Duration::from_millis(150));
                Ok(vec![face(640.0, 128.0)])
            }
            _ => Err(AnnotatorError::Detection("no more faces".to_string())),
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();
        wait_until(|| calls.load(Ordering::SeqCst) >= 1).await;
        let overlay = session_overlay(&annotator);

        annotator.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(overlay.lock().unwrap().shapes().is_empty());
        assert!(annotator.shapes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_keeps_old_source_results_out() {
        let (models, calls) = scripted(|call| match call {
            0 => {
                std::thread::sleep(Duration::from_millis(150));
                Ok(vec![face(640.0, 128.0)])
            }
            _ => Err(AnnotatorError::Detection("no more faces".to_string())),
        });
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();
        wait_until(|| calls.load(Ordering::SeqCst) >= 1).await;
        let old_overlay = session_overlay(&annotator);

        annotator.restart(true);
        assert!(annotator.is_polling());
        let new_overlay = session_overlay(&annotator);
        assert!(!Arc::ptr_eq(&old_overlay, &new_overlay));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(new_overlay.lock().unwrap().shapes().is_empty());
        assert!(old_overlay.lock().unwrap().shapes().is_empty());
        assert!(annotator.shapes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_while_inactive_stays_stopped() {
        let (models, _) = scripted(|_| Ok(vec![face(640.0, 128.0)]));
        let mut annotator =
            OverlayAnnotator::new(models, frames_with_hd_frame(), fast_config(FaceMode::Single));
        annotator.start();
        annotator.restart(false);
        assert!(!annotator.is_polling());
    }
}
