//! Bounded record queue with a pre-liftoff retention mode.
//!
//! Producers push from the control-rate tasks; the recorder task is the only
//! consumer. In retention mode the queue behaves as a ring that keeps the
//! newest `PRE_THRUSTING_LIMIT` entries, so the moment liftoff is detected
//! the last seconds before it are still in memory. In flight mode a full
//! queue rejects the push instead, which the caller reports as `LOG_FULL`.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::AtomicWaker;
use heapless::Deque;

use super::entry::RecordEntry;

pub const REC_QUEUE_SIZE: usize = 256;
/// Retention watermark: capacity minus headroom so the switch to flash
/// writing never overflows mid-transition.
pub const PRE_THRUSTING_LIMIT: usize = REC_QUEUE_SIZE - 32;

pub struct RecordQueue {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Deque<RecordEntry, REC_QUEUE_SIZE>>>,
    waker: AtomicWaker,
}

impl RecordQueue {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Deque::new())),
            waker: AtomicWaker::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|q| q.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retention push: evicts the oldest entries to keep occupancy at the
    /// pre-liftoff watermark. Never fails.
    pub fn push_retain(&self, entry: RecordEntry) {
        self.inner.lock(|q| {
            let mut q = q.borrow_mut();
            while q.len() >= PRE_THRUSTING_LIMIT {
                q.pop_front();
            }
            // Cannot fail: the watermark is below capacity.
            let _ = q.push_back(entry);
        });
        self.waker.wake();
    }

    /// Flight push: rejects the entry when the queue is full.
    pub fn push(&self, entry: RecordEntry) -> Result<(), RecordEntry> {
        let res = self.inner.lock(|q| q.borrow_mut().push_back(entry));
        if res.is_ok() {
            self.waker.wake();
        }
        res
    }

    pub fn pop(&self) -> Option<RecordEntry> {
        self.inner.lock(|q| q.borrow_mut().pop_front())
    }

    /// Waits for the next entry. Single consumer.
    pub async fn receive(&self) -> RecordEntry {
        poll_fn(|cx| match self.pop() {
            Some(e) => Poll::Ready(e),
            None => {
                self.waker.register(cx.waker());
                // Check again: a producer may have pushed between the pop
                // and the waker registration.
                match self.pop() {
                    Some(e) => Poll::Ready(e),
                    None => Poll::Pending,
                }
            }
        })
        .await
    }

    pub fn clear(&self) {
        self.inner.lock(|q| q.borrow_mut().clear());
    }
}

impl Default for RecordQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::entry::RecordEntry;

    fn entry(ts: u32) -> RecordEntry {
        RecordEntry::ErrorInfo { ts, error: 0 }
    }

    fn ts_of(e: RecordEntry) -> u32 {
        match e {
            RecordEntry::ErrorInfo { ts, .. } => ts,
            _ => panic!("unexpected entry"),
        }
    }

    #[test]
    fn retention_mode_evicts_oldest() {
        let q = RecordQueue::new();
        for i in 0..(PRE_THRUSTING_LIMIT as u32 + 10) {
            q.push_retain(entry(i));
            assert!(q.len() <= PRE_THRUSTING_LIMIT);
        }
        assert_eq!(q.len(), PRE_THRUSTING_LIMIT);
        // The oldest surviving entry is the 11th pushed.
        assert_eq!(ts_of(q.pop().unwrap()), 10);
    }

    #[test]
    fn flight_mode_rejects_when_full() {
        let q = RecordQueue::new();
        for i in 0..REC_QUEUE_SIZE as u32 {
            q.push(entry(i)).unwrap();
        }
        assert!(q.push(entry(9999)).is_err());
        // FIFO order is preserved and the rejected entry is gone.
        assert_eq!(ts_of(q.pop().unwrap()), 0);
        let mut last = 0;
        while let Some(e) = q.pop() {
            last = ts_of(e);
        }
        assert_eq!(last, REC_QUEUE_SIZE as u32 - 1);
    }

    #[test]
    fn clear_empties_the_queue() {
        let q = RecordQueue::new();
        for i in 0..10 {
            q.push_retain(entry(i));
        }
        q.clear();
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }
}
