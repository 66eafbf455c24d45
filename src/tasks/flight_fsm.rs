//! Flight FSM task: phase detection at the control rate, phase and
//! statistics publication, event emission.

use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::SystemBus;
use crate::config::Config;
use crate::control::phases::{FlightFsm, FsmInputs};
use crate::events::{post_event, EventQueue};
use crate::recorder::{record, RecordEntry, RecordQueue};
use crate::CONTROL_FREQ_HZ;

pub async fn flight_fsm_task(
    bus: &SystemBus,
    events: &EventQueue,
    queue: &RecordQueue,
    cfg: &Config,
) -> ! {
    let mut fsm = FlightFsm::new(cfg.fsm_settings(), CONTROL_FREQ_HZ);
    bus.phase.sender().send(fsm.phase());

    let mut ticker = Ticker::every(Duration::from_hz(CONTROL_FREQ_HZ as u64));
    loop {
        ticker.next().await;
        let ts = now_ms();

        let imu = bus.good_imu();
        let fused = bus.fused.try_get().unwrap_or_default();
        let filtered = bus.filtered.try_get().unwrap_or_default();

        let transition = fsm.step(&FsmInputs {
            raw_imu: &imu,
            fused: &fused,
            filtered: &filtered,
        });

        if let Some(t) = transition {
            info!("flight phase {} -> {}", t.from as u8, t.to as u8);
            bus.phase.sender().send(t.to);
            record(bus, queue, cfg.rec_mask, RecordEntry::FlightState { ts, phase: t.to });
            if let Some(ev) = t.event {
                post_event(bus, events, ev);
            }
        }
        if fsm.phase().in_flight() {
            bus.stats.sender().send(fsm.stats());
        }
    }
}
