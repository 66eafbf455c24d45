//! Redundant-sensor elimination.
//!
//! Each tick the three readings of a modality vote: a channel is faulty for
//! the tick when it leaves the majority envelope around the median of three,
//! or when its value is physically impossible. A fault counter with
//! hysteresis turns repeated offenders sticky so a flapping sensor cannot
//! rejoin the average every other tick.

use micromath::F32Ext;

use crate::error::ErrorFlags;
use crate::state::ElimMask;

/// Consecutive faulty ticks before a channel is marked sticky.
pub const FAULT_STICKY_TICKS: u16 = 10;
/// Consecutive good ticks before a sticky channel is cleared.
pub const FAULT_CLEAR_TICKS: u16 = 50;

/// Vertical acceleration outside ±200 m/s² cannot come from the ±16 g parts.
const ACC_BOUND: f32 = 200.0;
/// Pressure window covering ground level up to ~16 km.
const PRESSURE_MIN: f32 = 10_000.0;
const PRESSURE_MAX: f32 = 120_000.0;

#[derive(Clone, Copy, Debug)]
pub struct EliminationSettings {
    /// Allowed deviation from the accel median, m/s² (default ~3 g).
    pub acc_threshold: f32,
    /// Allowed deviation from the pressure median, Pa.
    pub pressure_threshold: f32,
}

impl Default for EliminationSettings {
    fn default() -> Self {
        Self { acc_threshold: 3.0 * 9.81, pressure_threshold: 5_000.0 }
    }
}

#[derive(Default)]
struct ChannelVote {
    fault_ticks: u16,
    good_ticks: u16,
    sticky: bool,
}

impl ChannelVote {
    fn step(&mut self, faulty_now: bool) {
        if faulty_now {
            self.fault_ticks = self.fault_ticks.saturating_add(1);
            self.good_ticks = 0;
            if self.fault_ticks >= FAULT_STICKY_TICKS {
                self.sticky = true;
            }
        } else {
            self.good_ticks = self.good_ticks.saturating_add(1);
            self.fault_ticks = 0;
            if self.sticky && self.good_ticks >= FAULT_CLEAR_TICKS {
                self.sticky = false;
            }
        }
    }
}

pub struct SensorEliminator {
    settings: EliminationSettings,
    imu: [ChannelVote; 3],
    baro: [ChannelVote; 3],
}

impl SensorEliminator {
    pub fn new(settings: EliminationSettings) -> Self {
        Self {
            settings,
            imu: Default::default(),
            baro: Default::default(),
        }
    }

    /// Vote on this tick's readings. `acc` is the vertical acceleration per
    /// IMU in m/s², `pressure` the raw pressure per baro in Pa.
    pub fn step(&mut self, acc: &[f32; 3], pressure: &[f32; 3]) -> ElimMask {
        let acc_med = median3(acc);
        let p_med = median3(pressure);

        let mut mask = ElimMask::default();
        for i in 0..3 {
            let acc_bad = (acc[i] - acc_med).abs() > self.settings.acc_threshold
                || acc[i].abs() > ACC_BOUND
                || !acc[i].is_finite();
            self.imu[i].step(acc_bad);

            let p_bad = (pressure[i] - p_med).abs() > self.settings.pressure_threshold
                || pressure[i] < PRESSURE_MIN
                || pressure[i] > PRESSURE_MAX
                || !pressure[i].is_finite();
            self.baro[i].step(p_bad);

            // Downstream consumers exclude a channel as soon as it misbehaves;
            // the sticky flag only governs how it earns its way back in.
            mask.faulty_imu[i] = acc_bad || self.imu[i].sticky;
            mask.faulty_baro[i] = p_bad || self.baro[i].sticky;
        }
        mask.num_faulty_imus = mask.faulty_imu.iter().filter(|f| **f).count() as u8;
        mask.num_faulty_baros = mask.faulty_baro.iter().filter(|f| **f).count() as u8;
        mask
    }

    /// Sticky faults expressed as error flags.
    pub fn errors(&self) -> ErrorFlags {
        let mut e = ErrorFlags::NONE;
        if self.imu.iter().any(|c| c.sticky) {
            e |= ErrorFlags::IMU_FAULT;
        }
        if self.baro.iter().any(|c| c.sticky) {
            e |= ErrorFlags::BARO_FAULT;
        }
        if self.imu.iter().all(|c| c.sticky) || self.baro.iter().all(|c| c.sticky) {
            e |= ErrorFlags::SENSOR_ALL_FAULTY;
        }
        e
    }
}

fn median3(v: &[f32; 3]) -> f32 {
    let (a, b, c) = (v[0], v[1], v[2]);
    a.max(b).min(a.min(b).max(c))
}
