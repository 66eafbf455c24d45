//! Recorder task: the single consumer of the record queue and the sole
//! owner of the file store handle. Streams records into the current flight
//! file while the recorder is in WRITE_TO_FLASH, finalises the file after
//! touchdown and writes the post-flight summary.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::{RecorderState, SystemBus};
use crate::error::ErrorFlags;
use crate::fs::{next_flight, write_stats, FlightFs};
use crate::recorder::{PageWriter, RecordQueue, TOUCHDOWN_GRACE_MS};
use crate::state::FlightPhase;

/// Poll period for state changes while no flight is being written.
const IDLE_POLL_MS: u64 = 10;

pub async fn recorder_task<F: FlightFs>(
    bus: &SystemBus,
    queue: &RecordQueue,
    fs: &mut F,
) -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(IDLE_POLL_MS));
    loop {
        // OFF drains and discards; FILL_QUEUE leaves the queue to its
        // retention policy on the producer side.
        while bus.recorder_state() != RecorderState::WriteToFlash {
            if bus.recorder_state() == RecorderState::Off && !queue.is_empty() {
                queue.clear();
            }
            ticker.next().await;
        }

        let (flight, path) = match next_flight(fs) {
            Ok(v) => v,
            Err(_) => {
                bus.add_error(ErrorFlags::FS_WRITE_FAIL);
                ticker.next().await;
                continue;
            }
        };
        let mut file = match fs.create(path.as_str()) {
            Ok(f) => f,
            Err(_) => {
                bus.add_error(ErrorFlags::FS_WRITE_FAIL);
                ticker.next().await;
                continue;
            }
        };
        info!("recording flight {}", flight);

        let mut writer = PageWriter::new();
        let mut touchdown_ms: Option<u32> = None;
        loop {
            match select(queue.receive(), ticker.next()).await {
                Either::First(entry) => {
                    if writer.push(&entry, &mut file).is_err() {
                        bus.add_error(ErrorFlags::FS_WRITE_FAIL);
                    }
                }
                Either::Second(()) => {}
            }

            if bus.recorder_state() != RecorderState::WriteToFlash {
                break;
            }
            if bus.current_phase() == FlightPhase::Touchdown {
                let now = now_ms();
                match touchdown_ms {
                    None => touchdown_ms = Some(now),
                    Some(t0) if now.wrapping_sub(t0) >= TOUCHDOWN_GRACE_MS => break,
                    Some(_) => {}
                }
            }
        }

        // Flush the tail of the stream before closing out the flight.
        while let Some(entry) = queue.pop() {
            if writer.push(&entry, &mut file).is_err() {
                bus.add_error(ErrorFlags::FS_WRITE_FAIL);
            }
        }
        if writer.finalize(&mut file).is_err() {
            bus.add_error(ErrorFlags::FS_WRITE_FAIL);
        }
        bus.set_recorder_state(RecorderState::Off);

        let stats = bus.stats.try_get().unwrap_or_default();
        if write_stats(fs, flight, &stats).is_err() {
            bus.add_error(ErrorFlags::FS_WRITE_FAIL);
        }
        info!("flight {} closed", flight);
    }
}
