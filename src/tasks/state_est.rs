//! State estimation task: Kalman filter and orientation integration at the
//! control rate, plus the estimation records.

use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::SystemBus;
use crate::config::Config;
use crate::control::kalman::KalmanFilter;
use crate::control::orientation::OrientationFilter;
use crate::recorder::{record, RecordEntry, RecordQueue};
use crate::state::FlightPhase;
use crate::CONTROL_FREQ_HZ;

pub async fn state_est_task(bus: &SystemBus, queue: &RecordQueue, cfg: &Config) -> ! {
    let mut kalman = KalmanFilter::new(CONTROL_FREQ_HZ);
    let mut orientation = OrientationFilter::new(CONTROL_FREQ_HZ);
    let mut old_phase = FlightPhase::Calibrating;

    let mut ticker = Ticker::every(Duration::from_hz(CONTROL_FREQ_HZ as u64));
    loop {
        ticker.next().await;
        let ts = now_ms();
        let phase = bus.current_phase();
        let filtered = bus.filtered.try_get().unwrap_or_default();
        let elim = bus.elim.try_get().unwrap_or_default();

        if phase == FlightPhase::Invalid {
            error!("invalid flight phase");
        }

        // Filter mode follows the phase transitions.
        if phase != old_phase {
            match phase {
                // Settled on the pad: restart from the fresh ground
                // reference.
                FlightPhase::Ready => kalman.reset(),
                FlightPhase::Thrusting => kalman.soft_reset(),
                FlightPhase::Apogee => kalman.set_descent(),
                _ => {}
            }
            old_phase = phase;
        }

        let mut err = kalman.predict(filtered.filtered_acc);
        err |= kalman.update(filtered.filtered_agl, elim.num_faulty_baros);
        bus.add_error(err);

        let fused = kalman.fused(ts, filtered.filtered_acc, phase);
        bus.fused.sender().send(fused);

        let imu = bus.good_imu();
        let orient = orientation.step(ts, &imu);
        bus.orientation.sender().send(orient);

        // Estimation records.
        record(bus, queue, cfg.rec_mask, RecordEntry::FilteredDataInfo(filtered));
        record(
            bus,
            queue,
            cfg.rec_mask,
            RecordEntry::SensorInfo {
                ts,
                faulty_imu: elim.faulty_imu.map(u8::from),
                faulty_baro: elim.faulty_baro.map(u8::from),
            },
        );
        record(
            bus,
            queue,
            cfg.rec_mask,
            RecordEntry::CovarianceInfo {
                ts,
                height_cov: fused.height_cov,
                velocity_cov: fused.velocity_cov,
            },
        );
        record(bus, queue, cfg.rec_mask, RecordEntry::flight_info(ts, &fused));
        record(bus, queue, cfg.rec_mask, RecordEntry::OrientationInfo { ts, q: orient.packed() });
    }
}
