//! Synthetic flight profiles.
//!
//! Generates IMU and baro samples for a whole flight from piecewise-linear
//! altitude and specific-force breakpoints, with bounded deterministic
//! noise. Drives the hardware-in-the-loop mode and the end-to-end tests;
//! the pressure track is derived from the altitude track through the same
//! standard-atmosphere model the pre-filter inverts.

use micromath::F32Ext;

use crate::state::{BaroSample, ImuSample, ACC_LSB_PER_G};

/// (time ms, value) breakpoints, linearly interpolated, clamped at the ends.
type Track<const N: usize> = [(u32, f32); N];

fn sample<const N: usize>(track: &Track<N>, t_ms: u32) -> f32 {
    if t_ms <= track[0].0 {
        return track[0].1;
    }
    for w in track.windows(2) {
        let (t0, v0) = w[0];
        let (t1, v1) = w[1];
        if t_ms < t1 {
            let f = (t_ms - t0) as f32 / (t1 - t0) as f32;
            return v0 + (v1 - v0) * f;
        }
    }
    track[N - 1].1
}

/// Ground temperature used for the pressure track, °C.
const SIM_TEMP_C: f32 = 15.0;

pub struct FlightProfile {
    /// Specific force along the vertical axis, in g.
    accel_g: Track<8>,
    /// Altitude above ground, m.
    altitude_m: Track<8>,
    /// Body-rate magnitude, deg/s; nonzero while the rocket is handled.
    gyro_dps: Track<4>,
    ground_pressure: f32,
    rng: XorShift,
}

impl FlightProfile {
    /// The standard test flight: handling noise until ~15 s, still on the
    /// pad, liftoff at 21 s with 10 g for 2 s, coast to apogee ≈ 1.7 km,
    /// drogue at ~30 m/s, main at 150 m, touchdown ≈ 125 s.
    pub fn rocket() -> Self {
        Self {
            accel_g: [
                (0, 1.0),
                (21_000, 1.0),
                (21_050, 10.0),
                (23_000, 10.0),
                (23_050, 0.0),
                (41_000, 0.0),
                (43_000, 1.0),
                (600_000, 1.0),
            ],
            altitude_m: [
                (0, 0.0),
                (21_000, 0.0),
                (23_000, 180.0),
                (32_000, 1_370.0),
                (41_000, 1_755.0),
                (94_500, 150.0),
                (124_500, 0.0),
                (600_000, 0.0),
            ],
            gyro_dps: [(0, 60.0), (15_000, 60.0), (15_200, 0.0), (600_000, 0.0)],
            ground_pressure: 98_000.0,
            rng: XorShift::new(0x4B53_544C),
        }
    }

    /// A small hop: 4 g for half a second, apogee around a dozen metres.
    pub fn hop() -> Self {
        Self {
            accel_g: [
                (0, 1.0),
                (15_000, 1.0),
                (15_050, 4.0),
                (15_500, 4.0),
                (15_550, 0.0),
                (19_000, 0.0),
                (20_000, 1.0),
                (600_000, 1.0),
            ],
            altitude_m: [
                (0, 0.0),
                (15_000, 0.0),
                (15_500, 3.0),
                (17_000, 13.0),
                (19_500, 0.0),
                (26_000, 0.0),
                (27_000, 0.0),
                (600_000, 0.0),
            ],
            gyro_dps: [(0, 60.0), (10_000, 60.0), (10_200, 0.0), (600_000, 0.0)],
            ground_pressure: 98_000.0,
            rng: XorShift::new(0x4B53_544C),
        }
    }

    pub fn ground_pressure(&self) -> f32 {
        self.ground_pressure
    }

    /// The three IMU samples for this tick, with per-channel LSB noise.
    pub fn imu_at(&mut self, t_ms: u32) -> [ImuSample; 3] {
        let g = sample(&self.accel_g, t_ms);
        let dps = sample(&self.gyro_dps, t_ms);
        let mut out = [ImuSample::default(); 3];
        for s in out.iter_mut() {
            let acc_z = (g * ACC_LSB_PER_G) as i16;
            let gyro = (dps * crate::state::GYRO_LSB_PER_DPS) as i16;
            *s = ImuSample {
                ts: t_ms,
                acc: [self.rng.jitter(10), self.rng.jitter(10), acc_z + self.rng.jitter(10)],
                gyro: [gyro + self.rng.jitter(8), self.rng.jitter(8), self.rng.jitter(8)],
            };
        }
        out
    }

    /// The three baro samples for this tick, pressure derived from the
    /// altitude track.
    pub fn baro_at(&mut self, t_ms: u32) -> [BaroSample; 3] {
        let h = sample(&self.altitude_m, t_ms);
        let p = pressure_at(self.ground_pressure, h);
        let mut out = [BaroSample::default(); 3];
        for s in out.iter_mut() {
            *s = BaroSample {
                ts: t_ms,
                pressure: p as i32 + self.rng.jitter(20) as i32,
                temperature: (SIM_TEMP_C * 100.0) as i32,
            };
        }
        out
    }
}

/// Inverse of the AGL derivation: pressure at `h` metres above a ground at
/// `p0` Pascal.
pub fn pressure_at(p0: f32, h: f32) -> f32 {
    p0 / (1.0 + h * 0.0065 / (SIM_TEMP_C + 273.15)).powf(5.257)
}

/// Small deterministic PRNG so test runs are reproducible.
struct XorShift {
    state: u32,
}

impl XorShift {
    fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    fn next(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform in [-amplitude, amplitude].
    fn jitter(&mut self, amplitude: i16) -> i16 {
        let span = amplitude as i32 * 2 + 1;
        (self.next() % span as u32) as i32 as i16 - amplitude
    }
}
