//! Preprocess task: sensor elimination and pre-filtering at the control
//! rate. Reads the raw sensor slots, publishes the elimination mask and the
//! filtered channel averages, and logs the raw samples.

use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::SystemBus;
use crate::config::Config;
use crate::control::elimination::{EliminationSettings, SensorEliminator};
use crate::control::median::PreFilter;
use crate::recorder::{record, RecordEntry, RecordQueue};
use crate::CONTROL_FREQ_HZ;

pub async fn preprocess_task(bus: &SystemBus, queue: &RecordQueue, cfg: &Config) -> ! {
    let mut eliminator = SensorEliminator::new(EliminationSettings {
        acc_threshold: cfg.control.elim_acc_threshold,
        ..Default::default()
    });
    let mut prefilter = PreFilter::new();

    let mut ticker = Ticker::every(Duration::from_hz(CONTROL_FREQ_HZ as u64));
    loop {
        ticker.next().await;
        let ts = now_ms();
        let phase = bus.current_phase();

        // Snapshot of this tick's sensor slots.
        let imu = [
            bus.imu[0].try_get().unwrap_or_default(),
            bus.imu[1].try_get().unwrap_or_default(),
            bus.imu[2].try_get().unwrap_or_default(),
        ];
        let baro = [
            bus.baro[0].try_get().unwrap_or_default(),
            bus.baro[1].try_get().unwrap_or_default(),
            bus.baro[2].try_get().unwrap_or_default(),
        ];

        let acc = PreFilter::accel_channels(&imu);
        let pressure = PreFilter::pressure_channels(&baro);
        let mask = eliminator.step(&acc, &pressure);
        bus.elim.sender().send(mask);
        bus.add_error(eliminator.errors());

        let filtered = prefilter.step(ts, &imu, &baro, &mask, phase);
        bus.filtered.sender().send(filtered);

        // Raw sensor stream into the flight log.
        for (i, s) in imu.iter().enumerate() {
            record(bus, queue, cfg.rec_mask, RecordEntry::Imu { id: i as u8, data: *s });
        }
        for (i, s) in baro.iter().enumerate() {
            record(bus, queue, cfg.rec_mask, RecordEntry::Baro { id: i as u8, data: *s });
        }
        if let Some(mag) = bus.mag.try_get() {
            record(bus, queue, cfg.rec_mask, RecordEntry::Magneto(mag));
        }
    }
}
