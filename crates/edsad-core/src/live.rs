//! Live runner.
//!
//! ```text
//! producer thread ──(unbounded queue)──▶ engine thread ──(record channel)──▶ consumer tick
//! ```
//!
//! The producer pulls from the source (optionally paced) and never drops a
//! point: the queue is unbounded and the engine works through it strictly in
//! arrival order, even when refits make it fall behind. The consumer drains
//! whatever records are ready on each tick, so a slow consumer never stalls
//! scoring.

use crate::engine::{CancellationToken, DetectionEngine, RunSummary};
use crate::error::{EngineError, StreamError};
use crate::record::AnomalyRecord;
use crate::scorer::Scorer;
use crate::stream::{Observation, StreamSource};
use crossbeam_channel::{Receiver, Sender, TryRecvError, tick, unbounded};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default consumer tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LiveError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

type Pulled = Result<Observation, StreamError>;

/// Engine-side view of the producer queue. A disconnected, drained queue is
/// end of stream.
struct QueueSource {
    queue: Receiver<Pulled>,
}

impl StreamSource for QueueSource {
    fn next_observation(&mut self) -> Result<Option<Observation>, StreamError> {
        match self.queue.recv() {
            Ok(pulled) => pulled.map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// A running producer/engine pair.
pub struct LiveSession {
    records: Receiver<AnomalyRecord>,
    cancel: CancellationToken,
    producer: JoinHandle<u64>,
    engine: JoinHandle<Result<RunSummary, EngineError>>,
}

impl LiveSession {
    /// Spawn the producer and engine threads. `pacing` sleeps between
    /// generated points.
    pub fn start<S, Src>(engine: DetectionEngine<S>, source: Src, pacing: Option<Duration>) -> Self
    where
        S: Scorer + 'static,
        Src: StreamSource + Send + 'static,
    {
        Self::start_with_cancel(engine, source, pacing, CancellationToken::new())
    }

    /// Like [`LiveSession::start`], stopping when `cancel` fires. Lets a
    /// caller hook the token to an interrupt before any point is produced.
    pub fn start_with_cancel<S, Src>(
        mut engine: DetectionEngine<S>,
        mut source: Src,
        pacing: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self
    where
        S: Scorer + 'static,
        Src: StreamSource + Send + 'static,
    {
        let (queue_tx, queue_rx) = unbounded::<Pulled>();
        let (record_tx, record_rx) = unbounded::<AnomalyRecord>();

        let producer_cancel = cancel.clone();
        let producer = thread::spawn(move || produce(&mut source, &queue_tx, pacing, &producer_cancel));

        let engine_cancel = cancel.clone();
        let engine = thread::spawn(move || {
            let mut queue = QueueSource { queue: queue_rx };
            engine.run(&mut queue, &engine_cancel, |record| {
                // Consumer gone: keep scoring, the summary still counts it.
                let _ = record_tx.send(record);
            })
        });

        info!(pacing = ?pacing, "Live session started");
        Self {
            records: record_rx,
            cancel,
            producer,
            engine,
        }
    }

    /// Request a stop at the next point boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Records ready right now, in emission order.
    pub fn drain(&self) -> Vec<AnomalyRecord> {
        self.records.try_iter().collect()
    }

    /// Call `on_tick` every `interval` with the records emitted since the
    /// previous tick, until the engine has finished and every record has been
    /// delivered.
    pub fn for_each_tick<F>(self, interval: Duration, mut on_tick: F) -> Result<RunSummary, LiveError>
    where
        F: FnMut(&[AnomalyRecord]),
    {
        let ticker = tick(interval);
        let mut batch = Vec::new();
        loop {
            if ticker.recv().is_err() {
                break;
            }
            let finished = loop {
                match self.records.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(TryRecvError::Empty) => break false,
                    Err(TryRecvError::Disconnected) => break true,
                }
            };
            if !batch.is_empty() {
                on_tick(&batch);
                batch.clear();
            }
            if finished {
                break;
            }
        }
        self.join()
    }

    /// Wait for both threads. Undelivered records are discarded.
    pub fn join(self) -> Result<RunSummary, LiveError> {
        let summary = self
            .engine
            .join()
            .map_err(|_| LiveError::ThreadPanicked("engine"))?;
        // The engine has dropped the queue, so a blocked producer wakes up.
        let produced = self
            .producer
            .join()
            .map_err(|_| LiveError::ThreadPanicked("producer"))?;
        debug!(produced, "Producer joined");
        Ok(summary?)
    }
}

fn produce<Src: StreamSource>(
    source: &mut Src,
    queue: &Sender<Pulled>,
    pacing: Option<Duration>,
    cancel: &CancellationToken,
) -> u64 {
    let mut produced = 0u64;
    while !cancel.is_cancelled() {
        let pulled = match source.next_observation() {
            Ok(Some(observation)) => Ok(observation),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        if queue.send(pulled).is_err() {
            // Engine stopped.
            break;
        }
        produced += 1;
        if let Some(delay) = pacing {
            thread::sleep(delay);
        }
    }
    produced
}
