//! Asynchronous write pipeline properties.
//!
//! - Backpressure: enqueueing more units than the lanes can hold blocks
//!   the producer instead of growing memory without bound.
//! - Accounting: after wait_completion, processed + errored equals
//!   enqueued.
//! - Isolation: a failing unit is reported and its lane keeps going.
//! - Ordering: units sharing a key are applied in enqueue order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use stratadb_repl::pipeline::{
    AsyncWritePipeline, ErrorCallback, PipelineConfig, PipelineError, PipelineResult, WriteSink,
    WriteUnit,
};

struct GateSink {
    open: AtomicBool,
    applied: AtomicU64,
}

impl GateSink {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            applied: AtomicU64::new(0),
        }
    }
}

impl WriteSink for GateSink {
    fn apply(&self, _unit: &WriteUnit) -> PipelineResult<()> {
        while !self.open.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn producer_blocks_when_lanes_are_full() {
    let sink = Arc::new(GateSink::new());
    let config = PipelineConfig {
        parallel_level: 1,
        queue_capacity: 4,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(AsyncWritePipeline::start(config, sink.clone(), None).unwrap());

    // One unit occupies the worker, four fill the queue; the sixth must
    // block until the gate opens.
    let producer_pipeline = Arc::clone(&pipeline);
    let producer = thread::spawn(move || {
        for i in 0..6u32 {
            producer_pipeline
                .enqueue(WriteUnit::new(b"same-key".to_vec(), i.to_be_bytes()))
                .unwrap();
        }
    });

    thread::sleep(Duration::from_millis(100));
    assert!(
        !producer.is_finished(),
        "producer should be blocked on the full lane"
    );
    assert_eq!(sink.applied.load(Ordering::SeqCst), 0);

    sink.open.store(true, Ordering::SeqCst);
    producer.join().unwrap();
    pipeline.wait_completion();

    assert_eq!(sink.applied.load(Ordering::SeqCst), 6);
    assert_eq!(pipeline.counters(), (6, 6, 0));
}

struct EveryThirdFails;

impl WriteSink for EveryThirdFails {
    fn apply(&self, unit: &WriteUnit) -> PipelineResult<()> {
        let value = u32::from_be_bytes(unit.payload[..4].try_into().unwrap());
        if value % 3 == 0 {
            Err(PipelineError::unit_failed(format!("unit {} rejected", value)))
        } else {
            Ok(())
        }
    }
}

#[test]
fn accounting_balances_after_wait_completion() {
    let errors = Arc::new(AtomicU64::new(0));
    let errors_seen = Arc::clone(&errors);
    let on_error: ErrorCallback = Arc::new(move |_e| {
        errors_seen.fetch_add(1, Ordering::SeqCst);
    });

    let config = PipelineConfig {
        parallel_level: 4,
        queue_capacity: 16,
        ..PipelineConfig::default()
    };
    let pipeline =
        AsyncWritePipeline::start(config, Arc::new(EveryThirdFails), Some(on_error)).unwrap();

    let total = 90u32;
    for i in 0..total {
        pipeline
            .enqueue(WriteUnit::new(i.to_be_bytes(), i.to_be_bytes()))
            .unwrap();
    }
    pipeline.wait_completion();

    let (enqueued, processed, errored) = pipeline.counters();
    assert_eq!(enqueued, u64::from(total));
    assert_eq!(processed + errored, enqueued);
    assert_eq!(errored, u64::from(total / 3));
    assert_eq!(errors.load(Ordering::SeqCst), u64::from(total / 3));
}

struct RecordingSink {
    seen: Mutex<Vec<(Vec<u8>, u32)>>,
}

impl WriteSink for RecordingSink {
    fn apply(&self, unit: &WriteUnit) -> PipelineResult<()> {
        let value = u32::from_be_bytes(unit.payload[..4].try_into().unwrap());
        self.seen.lock().unwrap().push((unit.key.clone(), value));
        Ok(())
    }
}

#[test]
fn per_key_order_is_preserved_across_lanes() {
    let sink = Arc::new(RecordingSink {
        seen: Mutex::new(Vec::new()),
    });
    let config = PipelineConfig {
        parallel_level: 4,
        queue_capacity: 32,
        ..PipelineConfig::default()
    };
    let pipeline = AsyncWritePipeline::start(config, sink.clone(), None).unwrap();

    let keys: Vec<Vec<u8>> = (0..8u8).map(|k| vec![k]).collect();
    for sequence in 0..50u32 {
        for key in &keys {
            pipeline
                .enqueue(WriteUnit::new(key.clone(), sequence.to_be_bytes()))
                .unwrap();
        }
    }
    pipeline.wait_completion();

    let seen = sink.seen.lock().unwrap();
    for key in &keys {
        let per_key: Vec<u32> = seen
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .collect();
        let expected: Vec<u32> = (0..50).collect();
        assert_eq!(per_key, expected, "order broken for key {:?}", key);
    }
}

#[test]
fn completion_callbacks_fire_for_every_unit() {
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let pipeline = AsyncWritePipeline::start(
        PipelineConfig::default(),
        Arc::new(EveryThirdFails),
        None,
    )
    .unwrap();

    for i in 0..30u32 {
        let outcomes = Arc::clone(&outcomes);
        pipeline
            .enqueue(
                WriteUnit::new(i.to_be_bytes(), i.to_be_bytes()).with_completion(Box::new(
                    move |result| {
                        outcomes.lock().unwrap().push(result.is_ok());
                    },
                )),
            )
            .unwrap();
    }
    pipeline.wait_completion();

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 30);
    assert_eq!(outcomes.iter().filter(|ok| !**ok).count(), 10);
}
