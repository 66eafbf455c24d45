//! Pre-filter: per-channel median windows and the barometric AGL derivation.
//!
//! Every tick each accel channel and each derived AGL channel runs through a
//! fixed W=9 median window, then the non-faulty channels are averaged. The
//! raw (pre-median) averages are kept alongside for telemetry and logging.

use micromath::F32Ext;

use crate::state::{BaroSample, ElimMask, FilteredData, FlightPhase, ImuSample, ACC_LSB_PER_G, GRAVITY};

pub const MEDIAN_WINDOW: usize = 9;

/// Standard atmosphere at sea level, Pa. Used until the rolling ground
/// average has seen its first samples.
pub const P_INITIAL: f32 = 101_250.0;

/// Ticks of rolling averaging for the ground pressure.
const GROUND_WINDOW: usize = 10;

/// Altitude above ground from pressure, international standard atmosphere.
pub fn agl_from_pressure(p0: f32, pressure: f32, temperature_c: f32) -> f32 {
    ((p0 / pressure).powf(1.0 / 5.257) - 1.0) * (temperature_c + 273.15) / 0.0065
}

/// Vertical-axis specific force in m/s² with gravity removed.
pub fn vertical_accel(s: &ImuSample) -> f32 {
    s.acc[2] as f32 / ACC_LSB_PER_G * GRAVITY - GRAVITY
}

// ── Median window ─────────────────────────────────────────────────────────────

struct MedianWindow {
    buf: [f32; MEDIAN_WINDOW],
    idx: usize,
    primed: bool,
}

impl MedianWindow {
    const fn new() -> Self {
        Self { buf: [0.0; MEDIAN_WINDOW], idx: 0, primed: false }
    }

    /// Pushes a sample and returns the median of the window. The first
    /// sample seeds the whole window so there is no startup transient.
    fn push(&mut self, v: f32) -> f32 {
        if !self.primed {
            self.buf = [v; MEDIAN_WINDOW];
            self.primed = true;
        } else {
            self.buf[self.idx] = v;
            self.idx = (self.idx + 1) % MEDIAN_WINDOW;
        }
        median(&self.buf)
    }
}

fn median(buf: &[f32; MEDIAN_WINDOW]) -> f32 {
    let mut sorted = *buf;
    // Insertion sort: W=9 makes anything smarter a waste.
    for i in 1..sorted.len() {
        let mut j = i;
        while j > 0 && sorted[j - 1] > sorted[j] {
            sorted.swap(j - 1, j);
            j -= 1;
        }
    }
    sorted[MEDIAN_WINDOW / 2]
}

// ── Ground pressure tracking ──────────────────────────────────────────────────

struct GroundPressure {
    window: [f32; GROUND_WINDOW],
    idx: usize,
    primed: bool,
    value: f32,
}

impl GroundPressure {
    const fn new() -> Self {
        Self { window: [P_INITIAL; GROUND_WINDOW], idx: 0, primed: false, value: P_INITIAL }
    }

    fn update(&mut self, pressure: f32) {
        if !self.primed {
            self.window = [pressure; GROUND_WINDOW];
            self.primed = true;
        } else {
            self.window[self.idx] = pressure;
            self.idx = (self.idx + 1) % GROUND_WINDOW;
        }
        self.value = self.window.iter().sum::<f32>() / GROUND_WINDOW as f32;
    }
}

// ── Pre-filter ────────────────────────────────────────────────────────────────

pub struct PreFilter {
    acc_windows: [MedianWindow; 3],
    agl_windows: [MedianWindow; 3],
    ground: GroundPressure,
    last_good_acc: f32,
    last_good_agl: f32,
}

impl PreFilter {
    pub fn new() -> Self {
        Self {
            acc_windows: [MedianWindow::new(), MedianWindow::new(), MedianWindow::new()],
            agl_windows: [MedianWindow::new(), MedianWindow::new(), MedianWindow::new()],
            ground: GroundPressure::new(),
            last_good_acc: 0.0,
            last_good_agl: 0.0,
        }
    }

    /// Calibrated ground pressure in Pa.
    pub fn ground_pressure(&self) -> f32 {
        self.ground.value
    }

    /// Per-channel vertical accelerations used for the elimination vote.
    pub fn accel_channels(imu: &[ImuSample; 3]) -> [f32; 3] {
        [vertical_accel(&imu[0]), vertical_accel(&imu[1]), vertical_accel(&imu[2])]
    }

    /// Per-channel pressures used for the elimination vote.
    pub fn pressure_channels(baro: &[BaroSample; 3]) -> [f32; 3] {
        [baro[0].pressure as f32, baro[1].pressure as f32, baro[2].pressure as f32]
    }

    pub fn step(
        &mut self,
        ts: u32,
        imu: &[ImuSample; 3],
        baro: &[BaroSample; 3],
        mask: &ElimMask,
        phase: FlightPhase,
    ) -> FilteredData {
        let accs = Self::accel_channels(imu);
        let mut agls = [0.0f32; 3];
        for i in 0..3 {
            agls[i] = agl_from_pressure(
                self.ground.value,
                baro[i].pressure as f32,
                baro[i].temperature as f32 / 100.0,
            );
        }

        // The ground reference keeps following the rolling average until the
        // vehicle is READY; after that it is frozen for the whole flight.
        if phase <= FlightPhase::Moving {
            if let Some(p) = average(&Self::pressure_channels(baro), &mask.faulty_baro) {
                self.ground.update(p);
            }
        }

        // Faulty channels keep feeding their windows so a recovered sensor
        // comes back with a warm median.
        let mut med_acc = [0.0f32; 3];
        let mut med_agl = [0.0f32; 3];
        for i in 0..3 {
            med_acc[i] = self.acc_windows[i].push(accs[i]);
            med_agl[i] = self.agl_windows[i].push(agls[i]);
        }

        let raw_acc = average(&accs, &mask.faulty_imu).unwrap_or(self.last_good_acc);
        let raw_agl = average(&agls, &mask.faulty_baro).unwrap_or(self.last_good_agl);
        let filtered_acc = average(&med_acc, &mask.faulty_imu).unwrap_or(self.last_good_acc);
        let filtered_agl = average(&med_agl, &mask.faulty_baro).unwrap_or(self.last_good_agl);

        if !mask.all_imus_faulty() {
            self.last_good_acc = filtered_acc;
        }
        if !mask.all_baros_faulty() {
            self.last_good_agl = filtered_agl;
        }

        FilteredData {
            ts,
            raw_acc,
            raw_agl,
            filtered_acc,
            filtered_agl,
            ground_pressure: self.ground.value,
        }
    }
}

impl Default for PreFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Average over the channels whose faulty bit is clear; `None` when all
/// three are out.
fn average(values: &[f32; 3], faulty: &[bool; 3]) -> Option<f32> {
    let mut sum = 0.0;
    let mut n = 0;
    for i in 0..3 {
        if !faulty[i] {
            sum += values[i];
            n += 1;
        }
    }
    (n > 0).then(|| sum / n as f32)
}
