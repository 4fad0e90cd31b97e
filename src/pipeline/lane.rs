//! One ordered queue/worker pair within the pipeline.
//!
//! The queue is bounded; a full lane blocks the producer rather than
//! growing without limit. FIFO order within a lane is the per-key ordering
//! guarantee, because routing always maps a key to the same lane.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use super::errors::{PipelineError, PipelineResult};
use super::WriteUnit;

pub(crate) struct Lane {
    state: Mutex<LaneState>,
    not_full: Condvar,
    not_empty: Condvar,
}

struct LaneState {
    queue: VecDeque<WriteUnit>,
    capacity: usize,
    closed: bool,
}

impl Lane {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LaneState {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Push a unit, blocking while the lane is at capacity.
    pub(crate) fn enqueue(&self, unit: WriteUnit) -> PipelineResult<()> {
        let mut state = self.state.lock().unwrap();
        while state.queue.len() >= state.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }
        if state.closed {
            return Err(PipelineError::shutdown());
        }
        state.queue.push_back(unit);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the next unit, blocking while the lane is empty. Returns `None`
    /// once the lane is closed and drained.
    pub(crate) fn dequeue(&self) -> Option<WriteUnit> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(unit) = state.queue.pop_front() {
                self.not_full.notify_one();
                return Some(unit);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Close the lane: pending units still drain, new enqueues fail.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let lane = Lane::new(16);
        for i in 0..5u8 {
            lane.enqueue(WriteUnit::new(vec![i], vec![i])).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(lane.dequeue().unwrap().payload, vec![i]);
        }
    }

    #[test]
    fn test_full_lane_blocks_until_consumed() {
        let lane = Arc::new(Lane::new(1));
        lane.enqueue(WriteUnit::new(b"k".to_vec(), b"first".to_vec()))
            .unwrap();

        let producer_lane = Arc::clone(&lane);
        let producer = thread::spawn(move || {
            // Blocks until the consumer below makes room.
            producer_lane
                .enqueue(WriteUnit::new(b"k".to_vec(), b"second".to_vec()))
                .unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(lane.len(), 1);

        assert_eq!(lane.dequeue().unwrap().payload, b"first".to_vec());
        producer.join().unwrap();
        assert_eq!(lane.dequeue().unwrap().payload, b"second".to_vec());
    }

    #[test]
    fn test_closed_lane_rejects_enqueue_and_drains() {
        let lane = Lane::new(4);
        lane.enqueue(WriteUnit::new(b"k".to_vec(), b"a".to_vec()))
            .unwrap();
        lane.close();

        assert!(lane
            .enqueue(WriteUnit::new(b"k".to_vec(), b"b".to_vec()))
            .is_err());
        assert!(lane.dequeue().is_some());
        assert!(lane.dequeue().is_none());
    }
}
