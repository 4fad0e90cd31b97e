//! Asynchronous write pipeline.
//!
//! Decouples the caller's commit from the flush to storage/replication.
//! Units are routed to one of `parallel_level` lanes by key hash, so units
//! sharing a key stay FIFO while distinct keys proceed in parallel. A lane
//! whose queue is at capacity blocks the enqueuing thread; memory stays
//! bounded and upstream callers get natural flow control.
//!
//! A failure processing one unit never stops its lane: the error reaches
//! the registered callback and the unit's completion, and processing
//! continues with the next unit.

mod config;
mod errors;
mod lane;

pub use config::PipelineConfig;
pub use errors::{PipelineError, PipelineErrorKind, PipelineResult};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use lane::Lane;

use crate::observability::Event;

/// Completion callback for one unit; invoked exactly once, after the unit
/// succeeded or its error was reported.
pub type CompletionFn = Box<dyn FnOnce(Result<(), PipelineError>) + Send>;

/// Pipeline-wide error callback. Never invoked on the enqueuing thread.
pub type ErrorCallback = Arc<dyn Fn(&PipelineError) + Send + Sync>;

/// The consumer of pipeline units: applies each unit and honors batch
/// commit boundaries.
pub trait WriteSink: Send + Sync {
    /// Apply one unit. A failure is isolated to this unit.
    fn apply(&self, unit: &WriteUnit) -> PipelineResult<()>;

    /// Force a commit boundary after `commit_every` applied units.
    fn commit(&self) -> PipelineResult<()> {
        Ok(())
    }
}

/// One pending write unit, owned by the pipeline from enqueue until its
/// completion callback has been invoked.
pub struct WriteUnit {
    /// Routing key; units with equal keys share a lane and stay ordered.
    pub key: Vec<u8>,
    /// Opaque committed-transaction payload
    pub payload: Vec<u8>,
    /// Invoked once with the unit's outcome
    pub completion: Option<CompletionFn>,
    /// When the unit entered the pipeline
    pub enqueued_at: Instant,
}

impl WriteUnit {
    /// Create a unit with no completion callback.
    pub fn new(key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            completion: None,
            enqueued_at: Instant::now(),
        }
    }

    /// Attach a completion callback.
    pub fn with_completion(mut self, completion: CompletionFn) -> Self {
        self.completion = Some(completion);
        self
    }
}

#[derive(Default)]
struct Counters {
    enqueued: u64,
    processed: u64,
    errored: u64,
}

struct PipelineStats {
    counters: Mutex<Counters>,
    all_done: Condvar,
}

impl PipelineStats {
    fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            all_done: Condvar::new(),
        }
    }

    fn unit_enqueued(&self) {
        self.counters.lock().unwrap().enqueued += 1;
    }

    fn enqueue_aborted(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.enqueued -= 1;
        self.all_done.notify_all();
    }

    fn unit_processed(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.processed += 1;
        self.all_done.notify_all();
    }

    fn unit_errored(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.errored += 1;
        self.all_done.notify_all();
    }

    fn wait_completion(&self) {
        let mut counters = self.counters.lock().unwrap();
        while counters.processed + counters.errored < counters.enqueued {
            counters = self.all_done.wait(counters).unwrap();
        }
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        let counters = self.counters.lock().unwrap();
        (counters.enqueued, counters.processed, counters.errored)
    }
}

/// Multi-lane asynchronous write pipeline.
pub struct AsyncWritePipeline {
    lanes: Vec<Arc<Lane>>,
    workers: Vec<thread::JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl AsyncWritePipeline {
    /// Start the pipeline with one worker thread per lane.
    pub fn start(
        config: PipelineConfig,
        sink: Arc<dyn WriteSink>,
        on_error: Option<ErrorCallback>,
    ) -> PipelineResult<Self> {
        config.validate()?;

        let stats = Arc::new(PipelineStats::new());
        let lanes: Vec<Arc<Lane>> = (0..config.parallel_level)
            .map(|_| Arc::new(Lane::new(config.queue_capacity)))
            .collect();

        let mut workers = Vec::with_capacity(config.parallel_level);
        for (index, lane) in lanes.iter().enumerate() {
            let lane = Arc::clone(lane);
            let sink = Arc::clone(&sink);
            let on_error = on_error.clone();
            let stats = Arc::clone(&stats);
            let commit_every = config.commit_every;

            let handle = thread::Builder::new()
                .name(format!("write-lane-{}", index))
                .spawn(move || {
                    Self::worker_loop(lane, sink, on_error, stats, commit_every);
                })
                .map_err(|e| {
                    PipelineError::configuration(format!("failed to spawn lane worker: {}", e))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            lanes,
            workers,
            stats,
        })
    }

    fn worker_loop(
        lane: Arc<Lane>,
        sink: Arc<dyn WriteSink>,
        on_error: Option<ErrorCallback>,
        stats: Arc<PipelineStats>,
        commit_every: usize,
    ) {
        let mut since_commit = 0usize;

        while let Some(mut unit) = lane.dequeue() {
            let result = sink.apply(&unit);
            let completion = unit.completion.take();

            match result {
                Ok(()) => {
                    since_commit += 1;
                    if commit_every > 0 && since_commit >= commit_every {
                        if let Err(e) = sink.commit() {
                            Self::report(&on_error, &e);
                        }
                        since_commit = 0;
                    }
                    if let Some(done) = completion {
                        done(Ok(()));
                    }
                    stats.unit_processed();
                }
                Err(e) => {
                    Self::report(&on_error, &e);
                    if let Some(done) = completion {
                        done(Err(e));
                    }
                    stats.unit_errored();
                }
            }
        }

        // Lane drained and closed; settle the open batch.
        if since_commit > 0 {
            if let Err(e) = sink.commit() {
                Self::report(&on_error, &e);
            }
        }
    }

    fn report(on_error: &Option<ErrorCallback>, error: &PipelineError) {
        Event::PipelineUnitFailed.emit(&[("message", &error.message)]);
        if let Some(callback) = on_error {
            callback(error);
        }
    }

    /// Enqueue a unit, blocking only when the routed lane is at capacity.
    pub fn enqueue(&self, unit: WriteUnit) -> PipelineResult<()> {
        let lane_index = Self::route(&unit.key, self.lanes.len());
        // Counted before the (possibly blocking) push so wait_completion
        // can never observe processed > enqueued.
        self.stats.unit_enqueued();
        match self.lanes[lane_index].enqueue(unit) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stats.enqueue_aborted();
                Err(e)
            }
        }
    }

    fn route(key: &[u8], lanes: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % lanes as u64) as usize
    }

    /// Block until every enqueued unit has been processed or reported via
    /// the error callback.
    pub fn wait_completion(&self) {
        self.stats.wait_completion();
    }

    /// Counters: (enqueued, processed, errored).
    pub fn counters(&self) -> (u64, u64, u64) {
        self.stats.snapshot()
    }

    /// Number of configured lanes.
    pub fn parallel_level(&self) -> usize {
        self.lanes.len()
    }

    /// Drain all lanes and stop the workers.
    pub fn shutdown(mut self) {
        self.wait_completion();
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        for lane in &self.lanes {
            lane.close();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncWritePipeline {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink {
        applied: AtomicU64,
    }

    impl WriteSink for CountingSink {
        fn apply(&self, _unit: &WriteUnit) -> PipelineResult<()> {
            self.applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_all_units_processed() {
        let sink = Arc::new(CountingSink {
            applied: AtomicU64::new(0),
        });
        let pipeline =
            AsyncWritePipeline::start(PipelineConfig::default(), sink.clone(), None).unwrap();

        for i in 0..100u32 {
            pipeline
                .enqueue(WriteUnit::new(i.to_be_bytes(), b"payload".to_vec()))
                .unwrap();
        }
        pipeline.wait_completion();

        assert_eq!(sink.applied.load(Ordering::SeqCst), 100);
        assert_eq!(pipeline.counters(), (100, 100, 0));
    }

    struct FailingSink;

    impl WriteSink for FailingSink {
        fn apply(&self, unit: &WriteUnit) -> PipelineResult<()> {
            if unit.payload == b"bad" {
                Err(PipelineError::unit_failed("synthetic failure"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_unit_failure_does_not_stop_lane() {
        let errors = Arc::new(AtomicU64::new(0));
        let errors_seen = Arc::clone(&errors);
        let on_error: ErrorCallback = Arc::new(move |_e| {
            errors_seen.fetch_add(1, Ordering::SeqCst);
        });

        let config = PipelineConfig {
            parallel_level: 1,
            ..PipelineConfig::default()
        };
        let pipeline =
            AsyncWritePipeline::start(config, Arc::new(FailingSink), Some(on_error)).unwrap();

        pipeline.enqueue(WriteUnit::new(b"k".to_vec(), b"ok")).unwrap();
        pipeline.enqueue(WriteUnit::new(b"k".to_vec(), b"bad")).unwrap();
        pipeline.enqueue(WriteUnit::new(b"k".to_vec(), b"ok")).unwrap();
        pipeline.wait_completion();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.counters(), (3, 2, 1));
    }

    #[test]
    fn test_completion_callback_receives_outcome() {
        let (tx, rx) = std::sync::mpsc::channel();
        let pipeline = AsyncWritePipeline::start(
            PipelineConfig::default(),
            Arc::new(FailingSink),
            None,
        )
        .unwrap();

        let tx_ok = tx.clone();
        pipeline
            .enqueue(
                WriteUnit::new(b"a".to_vec(), b"ok").with_completion(Box::new(move |r| {
                    tx_ok.send(r.is_ok()).unwrap();
                })),
            )
            .unwrap();
        pipeline
            .enqueue(
                WriteUnit::new(b"a".to_vec(), b"bad").with_completion(Box::new(move |r| {
                    tx.send(r.is_ok()).unwrap();
                })),
            )
            .unwrap();
        pipeline.wait_completion();

        let mut outcomes: Vec<bool> = vec![rx.recv().unwrap(), rx.recv().unwrap()];
        outcomes.sort();
        assert_eq!(outcomes, vec![false, true]);
    }

    #[test]
    fn test_route_is_stable() {
        let a = AsyncWritePipeline::route(b"user-1", 8);
        let b = AsyncWritePipeline::route(b"user-1", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }
}
