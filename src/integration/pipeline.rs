//! Bounded multi-stage pipeline around the fusion engine.
//!
//! ```text
//! submit ─▶ [frames] ─▶ perception ─▶ [observations] ─▶ fusion ─┬─▶ persistence
//!                                                               └─▶ [snapshot] ─▶ viewer
//! ```
//!
//! Frame and observation queues are bounded and drop their oldest entry when
//! full, so capture never blocks on a slow stage. The snapshot queue holds a
//! single entry. Persistence events are never dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FusionError, Result};
use crate::fusion::{FrameSnapshot, FusionEngine, Observation, PersistenceEvent};

use super::detector::{Detector, Frame, QrDecoder};
use super::perception::Perception;
use super::persistence::{PersistenceSink, PersistenceWriter, RetryPolicy};

/// Shared flag for cooperative shutdown.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Consumer of per-frame snapshots, e.g. a floor-plan view.
pub trait SnapshotSink {
    fn render(&mut self, snapshot: &FrameSnapshot);
}

impl<F: FnMut(&FrameSnapshot)> SnapshotSink for F {
    fn render(&mut self, snapshot: &FrameSnapshot) {
        self(snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames waiting for perception
    pub frame_queue: usize,
    /// Observations waiting for fusion
    pub observation_queue: usize,
    /// Run the QR decoder every n-th frame
    pub decode_interval: u64,
    /// How often idle stages check for cancellation
    pub poll_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue: 4,
            observation_queue: 4,
            decode_interval: 1,
            poll_interval_ms: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_queue == 0 || self.observation_queue == 0 {
            return Err(FusionError::config("pipeline queues need a capacity of at least 1"));
        }
        if self.decode_interval == 0 {
            return Err(FusionError::config("decode_interval must be at least 1"));
        }
        self.retry.validate()
    }
}

/// Counters collected by a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub frames_submitted: u64,
    pub frames_dropped: u64,
    pub observations_dropped: u64,
    pub frames_fused: u64,
    pub events_written: u64,
    /// Events still buffered because the sink never recovered
    pub events_pending: usize,
    pub snapshots_rendered: u64,
}

/// Sending half of a bounded queue that evicts its oldest entry when full.
struct DropOldest<T> {
    tx: Sender<T>,
    // Used only to evict from the front of the queue.
    evict: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> DropOldest<T> {
    fn bounded(capacity: usize) -> (Self, Receiver<T>) {
        let (tx, rx) = channel::bounded(capacity.max(1));
        let queue = Self {
            tx,
            evict: rx.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (queue, rx)
    }

    fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    fn push(&self, mut item: T) {
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

struct Stages {
    perception: JoinHandle<()>,
    fusion: JoinHandle<u64>,
    viewer: JoinHandle<u64>,
}

/// Running pipeline. Feed it with [`submit`](Self::submit) and finish with
/// [`shutdown`](Self::shutdown).
pub struct FusionPipeline<S> {
    frames: DropOldest<Frame>,
    token: CancellationToken,
    submitted: AtomicU64,
    observations_dropped: Arc<AtomicU64>,
    stages: Stages,
    persistence: JoinHandle<PersistenceWriter<S>>,
}

impl<S> FusionPipeline<S>
where
    S: PersistenceSink + Send + 'static,
{
    pub fn spawn<D, Q, V>(
        engine: FusionEngine,
        detector: D,
        decoder: Q,
        sink: S,
        viewer: V,
        config: PipelineConfig,
    ) -> Result<Self>
    where
        D: Detector + Send + 'static,
        Q: QrDecoder + Send + 'static,
        V: SnapshotSink + Send + 'static,
    {
        config.validate()?;
        let token = CancellationToken::new();
        let poll = Duration::from_millis(config.poll_interval_ms.max(1));

        let (frames, frame_rx) = DropOldest::bounded(config.frame_queue);
        let (observations, observation_rx) = DropOldest::bounded(config.observation_queue);
        let observations_dropped = observations.dropped_counter();
        let (event_tx, event_rx) = channel::unbounded::<Vec<PersistenceEvent>>();
        let (snapshots, snapshot_rx) = DropOldest::bounded(1);

        let perception = {
            let token = token.clone();
            let perception = Perception::new(detector, decoder, config.decode_interval);
            spawn_stage("perception", move || {
                run_perception(perception, frame_rx, observations, token, poll)
            })?
        };
        let fusion = spawn_stage("fusion", move || {
            run_fusion(engine, observation_rx, event_tx, snapshots)
        })?;
        let retry = config.retry.clone();
        let persistence = spawn_stage("persistence", move || {
            run_persistence(PersistenceWriter::new(sink, retry), event_rx)
        })?;
        let viewer = spawn_stage("viewer", move || run_viewer(viewer, snapshot_rx))?;

        info!(
            frame_queue = config.frame_queue,
            observation_queue = config.observation_queue,
            "fusion pipeline started"
        );
        Ok(Self {
            frames,
            token,
            submitted: AtomicU64::new(0),
            observations_dropped,
            stages: Stages {
                perception,
                fusion,
                viewer,
            },
            persistence,
        })
    }

    /// Queue a captured frame. Never blocks; returns false after cancellation.
    pub fn submit(&self, frame: Frame) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.frames.push(frame);
        true
    }

    /// Token that stops the pipeline when cancelled from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drain queued frames, close open dwell records, flush persistence and
    /// join every stage.
    ///
    /// Returns the run's counters and the sink.
    pub fn shutdown(self) -> Result<(PipelineReport, S)> {
        let Self {
            frames,
            token,
            submitted,
            observations_dropped,
            stages,
            persistence,
        } = self;
        token.cancel();
        let frames_dropped = frames.dropped.load(Ordering::Relaxed);
        drop(frames);

        join_stage("perception", stages.perception)?;
        let frames_fused = join_stage("fusion", stages.fusion)?;
        let writer = join_stage("persistence", persistence)?;
        let snapshots_rendered = join_stage("viewer", stages.viewer)?;

        let report = PipelineReport {
            frames_submitted: submitted.load(Ordering::Relaxed),
            frames_dropped,
            observations_dropped: observations_dropped.load(Ordering::Relaxed),
            frames_fused,
            events_written: writer.written(),
            events_pending: writer.pending(),
            snapshots_rendered,
        };
        if report.events_pending > 0 {
            warn!(
                pending = report.events_pending,
                "pipeline stopped with undelivered persistence events"
            );
        }
        info!(?report, "fusion pipeline stopped");
        Ok((report, writer.into_sink()))
    }
}

fn spawn_stage<T, F>(name: &str, body: F) -> Result<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Ok(thread::Builder::new()
        .name(format!("fusion-{name}"))
        .spawn(body)?)
}

fn join_stage<T>(name: &str, handle: JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| FusionError::Pipeline(format!("{name} stage panicked")))
}

fn run_perception<D: Detector, Q: QrDecoder>(
    mut perception: Perception<D, Q>,
    frames: Receiver<Frame>,
    observations: DropOldest<Observation>,
    token: CancellationToken,
    poll: Duration,
) {
    loop {
        match frames.recv_timeout(poll) {
            Ok(frame) => observations.push(perception.perceive(&frame)),
            // Queued frames are drained before a cancelled stage stops.
            Err(RecvTimeoutError::Timeout) if token.is_cancelled() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("perception stage finished");
}

fn run_fusion(
    mut engine: FusionEngine,
    observations: Receiver<Observation>,
    events: Sender<Vec<PersistenceEvent>>,
    snapshots: DropOldest<FrameSnapshot>,
) -> u64 {
    let mut fused = 0;
    for observation in observations.iter() {
        match engine.process(observation) {
            Ok(output) => {
                fused += 1;
                snapshots.push(output.snapshot);
                if !output.events.is_empty() && events.send(output.events).is_err() {
                    warn!("persistence stage is gone");
                }
            }
            Err(err) => {
                warn!(error = %err, "fusion stopped");
                break;
            }
        }
    }
    let closing = engine.shutdown(Utc::now());
    if !closing.is_empty() && events.send(closing).is_err() {
        warn!("persistence stage is gone, shutdown events not delivered");
    }
    fused
}

fn run_persistence<S: PersistenceSink>(
    mut writer: PersistenceWriter<S>,
    events: Receiver<Vec<PersistenceEvent>>,
) -> PersistenceWriter<S> {
    for batch in events.iter() {
        writer.write_all(batch);
    }
    writer.flush();
    writer
}

fn run_viewer<V: SnapshotSink>(mut viewer: V, snapshots: Receiver<FrameSnapshot>) -> u64 {
    let mut rendered = 0;
    for snapshot in snapshots.iter() {
        viewer.render(&snapshot);
        rendered += 1;
    }
    rendered
}
