//! Timed live-capture scheduling.
//!
//! A capture session runs three tasks against one camera:
//!
//! - an advisory poll that sends the current frame to the verifier's face
//!   locator so the operator can be guided, never used for the decision;
//! - a once-per-second countdown;
//! - a deadline that forces exactly one capture-and-submit of the current
//!   frame, face or no face.
//!
//! All three watch a single cancellation flag. Stopping the session sets it
//! and releases the camera, after which no frame is submitted.
//!
//! Frames are taken on tokio's blocking pool, so a slow camera never stalls
//! the countdown or a stop request.

use crate::camera::CameraError;
use serde::Deserialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Source of submittable (encoded) frames, normally a [`crate::Camera`].
pub trait FrameSource: Send + 'static {
    /// Grab the most recent frame, encoded for submission.
    fn snapshot(&mut self) -> Result<Vec<u8>, CameraError>;

    /// Give the device back. Called at most once per session.
    fn release(self)
    where
        Self: Sized;
}

/// Face box reported by the verifier for on-screen guidance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Remote verifier used by a capture session.
pub trait VerificationClient: Send + Sync + 'static {
    type Outcome: Send + 'static;
    type Error: std::fmt::Display + Send + 'static;

    /// Advisory face lookup for guidance.
    fn locate(
        &self,
        frame: Vec<u8>,
    ) -> impl Future<Output = Result<Option<FaceBox>, Self::Error>> + Send;

    /// Submit the captured frame for verification.
    fn submit(
        &self,
        frame: Vec<u8>,
    ) -> impl Future<Output = Result<Self::Outcome, Self::Error>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Time from start until the forced capture.
    pub deadline: Duration,
    /// Pause between advisory polls.
    pub poll_interval: Duration,
    /// Countdown granularity.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            tick: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Streaming,
    CountingDown,
    Captured,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSession {
    pub state: CaptureState,
    pub deadline: Option<Instant>,
    pub remaining_secs: u64,
    pub detected_face: Option<FaceBox>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self {
            state: CaptureState::Idle,
            deadline: None,
            remaining_secs: 0,
            detected_face: None,
        }
    }
}

#[derive(Debug)]
pub enum CaptureEvent<O, E> {
    /// Countdown tick with whole seconds left.
    Countdown { remaining_secs: u64 },
    /// Latest advisory lookup; `None` means no face in view.
    Guidance(Option<FaceBox>),
    /// The deadline fired and a frame was taken.
    Captured,
    /// The forced frame could not be taken; nothing was submitted.
    CaptureFailed(String),
    /// Verifier response for the captured frame.
    Submitted(Result<O, E>),
}

type Events<C> = mpsc::UnboundedSender<
    CaptureEvent<<C as VerificationClient>::Outcome, <C as VerificationClient>::Error>,
>;

struct Shared<S> {
    session: Mutex<CaptureSession>,
    source: Mutex<Option<S>>,
    cancel: watch::Sender<bool>,
}

impl<S: FrameSource> Shared<S> {
    fn session(&self) -> MutexGuard<'_, CaptureSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_source(&self) -> MutexGuard<'_, Option<S>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a frame on the blocking pool.
    ///
    /// Returns `None` once the source has been released. If the session was
    /// cancelled while the frame was being taken, the source is released
    /// here instead of by `stop()`.
    async fn snapshot(self: &Arc<Self>) -> Option<Result<Vec<u8>, CameraError>> {
        let shared = Arc::clone(self);
        let joined = tokio::task::spawn_blocking(move || {
            let snapshot = shared.lock_source().as_mut().map(FrameSource::snapshot);
            if shared.is_cancelled() {
                shared.release_source();
            }
            snapshot
        })
        .await;
        joined.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "snapshot task failed");
            None
        })
    }

    fn release_source(&self) {
        let taken = match self.source.try_lock() {
            Ok(mut source) => source.take(),
            Err(TryLockError::Poisoned(e)) => e.into_inner().take(),
            Err(TryLockError::WouldBlock) => {
                // The in-flight snapshot releases once it sees the cancel flag.
                tracing::debug!("camera busy, release deferred to snapshot");
                return;
            }
        };
        if let Some(source) = taken {
            source.release();
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Cancel every task and release the camera. Safe to call repeatedly.
    ///
    /// The flag is raised before the release attempt, so a snapshot holding
    /// the camera at that moment releases it on return.
    fn stop(&self) {
        {
            let mut session = self.session();
            if session.state != CaptureState::Captured && session.state != CaptureState::Stopped {
                tracing::info!(state = ?session.state, "capture session stopped");
                session.state = CaptureState::Stopped;
            }
            session.detected_face = None;
        }
        self.cancel.send_replace(true);
        self.release_source();
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the session.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Handle to a running capture session.
///
/// Dropping the handle stops the session.
pub struct CaptureHandle<S: FrameSource> {
    shared: Arc<Shared<S>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: FrameSource> CaptureHandle<S> {
    /// Start a session on `source`. Must be called inside a tokio runtime.
    pub fn start<C: VerificationClient>(
        source: S,
        client: C,
        config: SchedulerConfig,
        events: Events<C>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            session: Mutex::new(CaptureSession {
                state: CaptureState::Streaming,
                ..CaptureSession::default()
            }),
            source: Mutex::new(Some(source)),
            cancel,
        });
        let client = Arc::new(client);

        let started = Instant::now();
        let deadline = started + config.deadline;
        let total_ticks = config
            .deadline
            .as_nanos()
            .div_ceil(config.tick.as_nanos().max(1)) as u64;
        {
            let mut session = shared.session();
            session.state = CaptureState::CountingDown;
            session.deadline = Some(deadline);
            session.remaining_secs = config.deadline.as_secs();
        }
        tracing::info!(deadline_secs = config.deadline.as_secs_f32(), "capture session started");

        let poll = poll_loop(
            shared.clone(),
            client.clone(),
            events.clone(),
            config.poll_interval,
        );
        let ticks = countdown(
            shared.clone(),
            events.clone(),
            started,
            config.tick,
            total_ticks,
        );
        let tasks = vec![
            tokio::spawn(poll),
            tokio::spawn(ticks),
            tokio::spawn(forced_capture(shared.clone(), client, events, deadline)),
        ];

        Self { shared, tasks }
    }

    /// Snapshot of the current session state.
    pub fn session(&self) -> CaptureSession {
        self.shared.session().clone()
    }

    /// Stop the session early: cancel polling, countdown and the pending
    /// capture, and release the camera. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Wait for all session tasks to finish and return the final state.
    pub async fn finished(mut self) -> CaptureSession {
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "capture task failed");
            }
        }
        self.session()
    }
}

impl<S: FrameSource> Drop for CaptureHandle<S> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

async fn poll_loop<S: FrameSource, C: VerificationClient>(
    shared: Arc<Shared<S>>,
    client: Arc<C>,
    events: Events<C>,
    interval: Duration,
) {
    let mut cancel = shared.cancel.subscribe();
    loop {
        if shared.is_cancelled() || shared.session().state != CaptureState::CountingDown {
            break;
        }
        match shared.snapshot().await {
            None => break,
            Some(Err(e)) => tracing::warn!(error = %e, "guidance snapshot failed"),
            Some(Ok(frame)) => {
                let located = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => break,
                    located = client.locate(frame) => located,
                };
                match located {
                    Ok(face) => {
                        {
                            let mut session = shared.session();
                            if session.state != CaptureState::CountingDown {
                                break;
                            }
                            session.detected_face = face;
                        }
                        let _ = events.send(CaptureEvent::Guidance(face));
                    }
                    Err(e) => tracing::debug!(error = %e, "guidance lookup failed"),
                }
            }
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            _ = time::sleep(interval) => {}
        }
    }
    tracing::debug!("guidance polling ended");
}

async fn countdown<S: FrameSource, O, E>(
    shared: Arc<Shared<S>>,
    events: mpsc::UnboundedSender<CaptureEvent<O, E>>,
    started: Instant,
    tick: Duration,
    total_ticks: u64,
) {
    let mut cancel = shared.cancel.subscribe();
    let mut ticker = time::interval_at(started + tick, tick);
    for remaining in (0..total_ticks).rev() {
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return,
            _ = ticker.tick() => {}
        }
        let remaining_secs = remaining * tick.as_secs().max(1);
        shared.session().remaining_secs = remaining_secs;
        let _ = events.send(CaptureEvent::Countdown { remaining_secs });
    }
}

async fn forced_capture<S: FrameSource, C: VerificationClient>(
    shared: Arc<Shared<S>>,
    client: Arc<C>,
    events: Events<C>,
    deadline: Instant,
) {
    let mut cancel = shared.cancel.subscribe();
    tokio::select! {
        biased;
        _ = cancelled(&mut cancel) => return,
        _ = time::sleep_until(deadline) => {}
    }

    // Claim the capture under the session lock. A concurrent stop either
    // wins outright or finds the session already `Captured`.
    {
        let mut session = shared.session();
        if session.state != CaptureState::CountingDown {
            return;
        }
        session.state = CaptureState::Captured;
        session.remaining_secs = 0;
    }

    let snapshot = shared.snapshot().await;
    shared.cancel.send_replace(true);
    shared.release_source();

    match snapshot {
        Some(Ok(frame)) => {
            tracing::info!(bytes = frame.len(), "deadline reached, submitting capture");
            let _ = events.send(CaptureEvent::Captured);
            let result = client.submit(frame).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "verification submit failed");
            }
            let _ = events.send(CaptureEvent::Submitted(result));
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "forced capture failed");
            shared.session().state = CaptureState::Stopped;
            let _ = events.send(CaptureEvent::CaptureFailed(e.user_message()));
        }
        None => {
            tracing::warn!("camera gone before the forced capture");
            shared.session().state = CaptureState::Stopped;
        }
    }
}
