//! Tracking sessions: the worker loop that ties camera, detector, tracker
//! and observer together.
//!
//! A [`PresenceDetector`] owns the loaded models and the camera to open.
//! Each call to [`PresenceDetector::start`] opens the camera on a fresh
//! worker thread and returns a [`Session`] handle; at most one session per
//! detector runs at a time.
//!
//! Ticks are serialized. A tick whose detection outlasts the interval is
//! followed immediately by the next one, and the missed ticks are dropped
//! rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use presence_vision::{FrameSource, ModelLoader, Pipeline, Renderer, StreamSource};

use crate::error::{PresenceError, Result};
use crate::observer::PresenceObserver;
use crate::tracker::{PresenceTracker, DEFAULT_ABSENCE_THRESHOLD};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub tick_interval: Duration,
    pub absence_threshold: Duration,
    pub use_canvas: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            absence_threshold: DEFAULT_ABSENCE_THRESHOLD,
            use_canvas: false,
        }
    }
}

impl StartOptions {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(PresenceError::InvalidConfig(
                "tick interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct PresenceDetector {
    camera: Arc<dyn StreamSource>,
    renderer: Option<Box<dyn Renderer>>,
    pipeline: Option<Arc<Mutex<Pipeline>>>,
    active: Arc<AtomicBool>,
}

impl PresenceDetector {
    pub fn new(camera: impl StreamSource + 'static) -> Self {
        Self {
            camera: Arc::new(camera),
            renderer: None,
            pipeline: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overlay used by sessions started with `use_canvas`.
    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        let renderer: Box<dyn Renderer> = Box::new(renderer);
        match &self.pipeline {
            Some(pipeline) => lock(pipeline).set_renderer(renderer),
            None => self.renderer = Some(renderer),
        }
        self
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Load the face detector. Must succeed before [`start`](Self::start).
    pub fn load_models(&mut self, loader: &dyn ModelLoader) -> Result<()> {
        if self.is_active() {
            return Err(PresenceError::InvalidState(
                "cannot reload models while tracking",
            ));
        }
        let detector = loader.load().map_err(|e| {
            log::error!("error loading models: {:#}", e);
            PresenceError::ModelLoad(e)
        })?;

        if let Some(pipeline) = &self.pipeline {
            lock(pipeline).set_detector(detector);
            return Ok(());
        }
        let mut pipeline = Pipeline::new(detector);
        if let Some(renderer) = self.renderer.take() {
            pipeline = pipeline.with_renderer(renderer);
        }
        self.pipeline = Some(Arc::new(Mutex::new(pipeline)));
        Ok(())
    }

    /// Open the camera and begin ticking on a worker thread.
    ///
    /// Fails fast with [`PresenceError::NotReady`] before models are loaded
    /// and [`PresenceError::InvalidState`] while another session is running.
    /// Camera failures arrive later, through [`PresenceObserver::on_error`]
    /// and [`Session::finish`].
    pub fn start(
        &self,
        options: StartOptions,
        observer: impl PresenceObserver + 'static,
    ) -> Result<Session> {
        options.validate()?;
        let pipeline = self.pipeline.clone().ok_or_else(|| {
            log::warn!("attempted to start detection before models were loaded");
            PresenceError::NotReady
        })?;
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PresenceError::InvalidState("tracking is already active"));
        }
        if options.use_canvas && !lock(&pipeline).has_renderer() {
            log::warn!("use_canvas is set but no renderer is configured");
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            camera: self.camera.clone(),
            pipeline,
            observer: Box::new(observer),
            options,
            stopped: stopped.clone(),
            stop_rx,
        };

        let active = self.active.clone();
        let spawned = thread::Builder::new()
            .name("presence-worker".to_string())
            .spawn(move || {
                let _active = ActiveGuard(active);
                worker.run()
            });
        match spawned {
            Ok(handle) => Ok(Session {
                stop_tx,
                stopped,
                handle: Some(handle),
                outcome: None,
            }),
            Err(e) => {
                self.active.store(false, Ordering::Release);
                Err(PresenceError::MediaAcquisition(
                    anyhow::Error::new(e).context("spawning worker thread"),
                ))
            }
        }
    }
}

/// Clears the detector's active flag when the worker exits, even by panic.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock(pipeline: &Mutex<Pipeline>) -> std::sync::MutexGuard<'_, Pipeline> {
    pipeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a running tracking session. Dropping it stops the session.
pub struct Session {
    stop_tx: Sender<()>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
    outcome: Option<Result<()>>,
}

impl Session {
    /// Whether the worker is still ticking.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop ticking and release the camera.
    ///
    /// Once this returns the observer is never called again, even for a
    /// detection that was in flight. Calling it again does nothing.
    ///
    /// From inside the observer this only flags the worker, which exits
    /// after the current tick.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stopped.store(true, Ordering::Release);
        let _ = self.stop_tx.try_send(());

        if handle.thread().id() == thread::current().id() {
            return;
        }
        self.outcome = Some(match handle.join() {
            Ok(result) => result,
            Err(_) => {
                log::error!("presence worker panicked");
                Err(PresenceError::InvalidState("presence worker panicked"))
            }
        });
        log::info!("face detection stopped and camera turned off");
    }

    /// Stop the session and report how the worker ended.
    pub fn finish(mut self) -> Result<()> {
        self.stop();
        self.outcome.take().unwrap_or(Ok(()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    camera: Arc<dyn StreamSource>,
    pipeline: Arc<Mutex<Pipeline>>,
    observer: Box<dyn PresenceObserver>,
    options: StartOptions,
    stopped: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
}

impl Worker {
    fn run(mut self) -> Result<()> {
        let mut source = match self.camera.acquire_stream() {
            Ok(source) => source,
            Err(e) => {
                log::error!("error starting detection: {:#}", e);
                let err = PresenceError::MediaAcquisition(e);
                if !self.is_stopped() {
                    self.observer.on_error(&err);
                }
                return Err(err);
            }
        };

        log::info!(
            "face detection started (interval {:?}, absence threshold {:?})",
            self.options.tick_interval,
            self.options.absence_threshold
        );
        self.track(source.as_mut());

        if self.options.use_canvas {
            lock(&self.pipeline).clear_overlay();
        }
        Ok(())
    }

    fn track(&mut self, source: &mut dyn FrameSource) {
        let interval = self.options.tick_interval;
        let mut tracker = PresenceTracker::new(self.options.absence_threshold);
        let mut next_tick = Instant::now();

        while !self.is_stopped() {
            match self.tick(source) {
                Ok(count) => {
                    if let Some(present) = tracker.on_tick(count, Instant::now()) {
                        self.deliver(present);
                    }
                }
                Err(e) => log::warn!("skipping tick: {:#}", e),
            }

            let now = Instant::now();
            next_tick = (next_tick + interval).max(now);
            match self.stop_rx.recv_timeout(next_tick - now) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn tick(&self, source: &mut dyn FrameSource) -> anyhow::Result<usize> {
        let frame = source.frame().context("capturing frame")?;
        let detections = lock(&self.pipeline).process(&frame, self.options.use_canvas)?;
        log::trace!("tick: {} face(s)", detections.len());
        Ok(detections.len())
    }

    fn deliver(&mut self, present: bool) {
        if self.is_stopped() {
            log::debug!("discarding presence event after stop");
            return;
        }
        self.observer.on_presence_change(present);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
