//! Flight recorder pipeline: tagged records, bounded queue, page writer.
//!
//! The recorder has its own little state machine, independent of the flight
//! FSM: OFF discards, FILL_QUEUE retains the newest pre-liftoff entries,
//! WRITE_TO_FLASH streams to the current flight file.

pub mod entry;
pub mod queue;
pub mod writer;

pub use entry::{RecordEntry, RecordTag, MAX_RECORD_SIZE, REC_MASK_ALL};
pub use queue::{RecordQueue, PRE_THRUSTING_LIMIT, REC_QUEUE_SIZE};
pub use writer::{PageWriter, REC_BUFFER_LEN};

use crate::bus::{RecorderState, SystemBus};
use crate::error::ErrorFlags;

/// Hold-off after touchdown before the recorder stops, so the landing
/// settles into the log.
pub const TOUCHDOWN_GRACE_MS: u32 = 2_000;

/// Offers a record to the pipeline. Filtered by the configured tag mask and
/// the recorder state; in flight an overflow drops the record and raises
/// `LOG_FULL`. Never blocks the producer.
pub fn record(bus: &SystemBus, queue: &RecordQueue, rec_mask: u32, entry: RecordEntry) {
    if entry.tag() as u32 & rec_mask == 0 {
        return;
    }
    match bus.recorder_state() {
        RecorderState::Off => {}
        RecorderState::FillQueue => queue.push_retain(entry),
        RecorderState::WriteToFlash => {
            if queue.push(entry).is_err() {
                bus.add_error(ErrorFlags::LOG_FULL);
            }
        }
    }
}
