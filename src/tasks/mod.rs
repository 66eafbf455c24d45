//! Periodic task bodies.
//!
//! Each task is a plain `async fn` over the bus, the queues and the
//! interface traits; the board crate wraps them in executor tasks with
//! concrete types and spawns them at boot. All periodic loops run on
//! `Ticker`, i.e. absolute deadlines, so the cadence does not drift with
//! execution time.
//!
//! Phase alignment within a tick (SensorRead → Preprocess → StateEst →
//! FlightFSM) comes from the spawn order and the shared tick start; no task
//! takes a lock on the hot path.

pub mod flight_fsm;
pub mod health;
pub mod peripherals;
pub mod preprocess;
pub mod recorder;
pub mod state_est;
pub mod telemetry;

use embassy_time::Instant;

/// Milliseconds since boot, the timestamp domain of every record.
pub(crate) fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}
