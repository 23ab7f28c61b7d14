//! Persistence fan-out: sinks, retry policy and the degraded-mode backlog.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::io::Write;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FusionError, Result};
use crate::fusion::PersistenceEvent;

/// Append-only store for fusion events.
pub trait PersistenceSink {
    type Error: fmt::Display;

    fn append(&mut self, event: &PersistenceEvent) -> std::result::Result<(), Self::Error>;

    fn flush(&mut self) -> std::result::Result<(), Self::Error> {
        Ok(())
    }
}

impl PersistenceSink for Vec<PersistenceEvent> {
    type Error = Infallible;

    fn append(&mut self, event: &PersistenceEvent) -> std::result::Result<(), Self::Error> {
        self.push(event.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PersistenceSink for JsonLinesSink<W> {
    type Error = FusionError;

    /// The line is encoded up front and handed to the writer in one call, so
    /// a failed serialization never leaves a partial record behind.
    fn append(&mut self, event: &PersistenceEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// Bounded exponential backoff for sink writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per event before it is parked in the backlog
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FusionError::config("retry max_attempts must be at least 1"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(FusionError::config(
                "retry initial_backoff_ms must not exceed max_backoff_ms",
            ));
        }
        Ok(())
    }
}

/// Delivers events to a sink in order, never dropping one.
///
/// Events that still fail after the retry budget stay in an in-memory backlog
/// and the writer reports itself degraded. The backlog is always delivered
/// before newer events.
pub struct PersistenceWriter<S> {
    sink: S,
    policy: RetryPolicy,
    backlog: VecDeque<PersistenceEvent>,
    degraded: bool,
    written: u64,
}

impl<S: PersistenceSink> PersistenceWriter<S> {
    pub fn new(sink: S, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            backlog: VecDeque::new(),
            degraded: false,
            written: 0,
        }
    }

    pub fn write(&mut self, event: PersistenceEvent) {
        self.backlog.push_back(event);
        self.drain();
    }

    pub fn write_all(&mut self, events: impl IntoIterator<Item = PersistenceEvent>) {
        self.backlog.extend(events);
        self.drain();
    }

    /// Try to deliver the backlog, flush the sink, and return how many events remain.
    pub fn flush(&mut self) -> usize {
        self.drain();
        if let Err(err) = self.sink.flush() {
            warn!(error = %err, "persistence flush failed");
        }
        self.backlog.len()
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn drain(&mut self) {
        while let Some(event) = self.backlog.front() {
            if !deliver(&mut self.sink, &self.policy, self.degraded, event) {
                if !self.degraded {
                    warn!(
                        pending = self.backlog.len(),
                        "persistence degraded, buffering events in memory"
                    );
                }
                self.degraded = true;
                return;
            }
            self.backlog.pop_front();
            self.written += 1;
        }
        if self.degraded {
            info!("persistence recovered, backlog delivered");
            self.degraded = false;
        }
    }
}

fn deliver<S: PersistenceSink>(
    sink: &mut S,
    policy: &RetryPolicy,
    degraded: bool,
    event: &PersistenceEvent,
) -> bool {
    // A degraded sink gets one attempt per drain so new events are not held up by sleeps.
    let attempts = if degraded { 1 } else { policy.max_attempts.max(1) };
    for attempt in 1..=attempts {
        match sink.append(event) {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "persistence write failed");
                if attempt < attempts {
                    thread::sleep(policy.backoff(attempt));
                }
            }
        }
    }
    false
}
