//! Vertical-state Kalman filter.
//!
//! State x = [height, velocity, accel bias], constant-acceleration model
//! driven by the filtered vertical acceleration and corrected by the
//! filtered barometric AGL. The measurement matrix H = [1, 0, 0] reduces the
//! update to a scalar, so no matrix inversion is needed.

use crate::error::ErrorFlags;
use crate::state::{FlightPhase, FusedState};

/// Initial covariance diagonal.
const P_INITIAL: [f32; 3] = [10.0, 10.0, 1.0];

// Q: process noise (trust in the constant-acceleration model).
// Height and velocity stay tight; the bias walks slowly on ascent.
const Q_ASCENT: [f32; 3] = [0.0025, 0.01, 0.05];
// After apogee the input is zeroed and the bias noise opens up so the filter
// can re-zero for the drogue descent.
const Q_DESCENT: [f32; 3] = [0.0025, 0.01, 10.0];

// R: baro noise (trust in the AGL measurement), m².
const R_BARO: f32 = 4.0;

// Physical-bounds gates for the inputs.
const ACC_BOUND: f32 = 200.0;
const AGL_BOUND: f32 = 12_000.0;

pub struct KalmanFilter {
    x: [f32; 3],
    p: [[f32; 3]; 3],
    q: [f32; 3],
    t_sampl: f32,
    descent: bool,
}

impl KalmanFilter {
    pub fn new(control_freq: u32) -> Self {
        Self {
            x: [0.0; 3],
            p: diag(P_INITIAL),
            q: Q_ASCENT,
            t_sampl: 1.0 / control_freq as f32,
            descent: false,
        }
    }

    /// Full re-initialisation; used when the vehicle settles into READY and
    /// the ground pressure reference is current.
    pub fn reset(&mut self) {
        self.x = [0.0; 3];
        self.p = diag(P_INITIAL);
        self.q = Q_ASCENT;
        self.descent = false;
    }

    /// Zeroes the covariance off-diagonals, keeping state and bias. Used on
    /// the READY → THRUSTING transition.
    pub fn soft_reset(&mut self) {
        let d = [self.p[0][0], self.p[1][1], self.p[2][2]];
        self.p = diag(d);
    }

    /// Switches to the descent model: input forced to zero and the bias
    /// process noise opened up.
    pub fn set_descent(&mut self) {
        self.descent = true;
        self.q = Q_DESCENT;
    }

    pub fn is_descent(&self) -> bool {
        self.descent
    }

    /// Propagates the state with the filtered acceleration `u` (m/s²).
    pub fn predict(&mut self, u: f32) -> ErrorFlags {
        let mut err = ErrorFlags::NONE;
        let mut u = if self.descent { 0.0 } else { u };
        if !(u.is_finite() && u > -ACC_BOUND && u < ACC_BOUND) {
            err |= ErrorFlags::FILTER_ACC;
            u = 0.0;
        }

        let dt = self.t_sampl;
        let dt2 = 0.5 * dt * dt;

        // x = F x + G u with F = [[1, dt, -dt²/2], [0, 1, -dt], [0, 0, 1]],
        // G = [dt²/2, dt, 0]ᵀ: the bias subtracts from the measured input.
        let b = self.x[2];
        self.x[0] += self.x[1] * dt + (u - b) * dt2;
        self.x[1] += (u - b) * dt;

        // P = F P Fᵀ + Q
        let f = [[1.0, dt, -dt2], [0.0, 1.0, -dt], [0.0, 0.0, 1.0]];
        let fp = mat3_mul(&f, &self.p);
        self.p = mat3_mul_transposed(&fp, &f);
        for i in 0..3 {
            self.p[i][i] += self.q[i];
        }
        err
    }

    /// Corrects with the AGL measurement `z` (m). R degrades gracefully with
    /// the number of eliminated baros.
    pub fn update(&mut self, z: f32, num_faulty_baros: u8) -> ErrorFlags {
        if !(z.is_finite() && z > -AGL_BOUND && z < AGL_BOUND) {
            return ErrorFlags::FILTER_HEIGHT;
        }

        let r = R_BARO * (1.0 + num_faulty_baros as f32);
        let s = self.p[0][0] + r;
        if s <= f32::EPSILON {
            return ErrorFlags::NONE;
        }

        let k = [self.p[0][0] / s, self.p[1][0] / s, self.p[2][0] / s];
        let y = z - self.x[0];
        for i in 0..3 {
            self.x[i] += k[i] * y;
        }

        // P = (I - K H) P with H = [1, 0, 0]: subtract K ⊗ row₀.
        let row0 = self.p[0];
        for i in 0..3 {
            for j in 0..3 {
                self.p[i][j] -= k[i] * row0[j];
            }
        }
        ErrorFlags::NONE
    }

    pub fn height(&self) -> f32 {
        self.x[0]
    }

    pub fn velocity(&self) -> f32 {
        self.x[1]
    }

    pub fn bias(&self) -> f32 {
        self.x[2]
    }

    /// Fused output for the bus. Past DROGUE only the bias is reported as
    /// acceleration; before that the bias-corrected input is.
    pub fn fused(&self, ts: u32, filtered_acc: f32, phase: FlightPhase) -> FusedState {
        let acceleration = if phase >= FlightPhase::Drogue {
            self.x[2]
        } else {
            filtered_acc + self.x[2]
        };
        FusedState {
            ts,
            height: self.x[0],
            velocity: self.x[1],
            acceleration,
            height_cov: self.p[0][0],
            velocity_cov: self.p[1][1],
        }
    }
}

fn diag(d: [f32; 3]) -> [[f32; 3]; 3] {
    [[d[0], 0.0, 0.0], [0.0, d[1], 0.0], [0.0, 0.0, d[2]]]
}

fn mat3_mul(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for (k, bk) in b.iter().enumerate() {
                out[i][j] += a[i][k] * bk[j];
            }
        }
    }
    out
}

/// a · bᵀ
fn mat3_mul_transposed(a: &[[f32; 3]; 3], b: &[[f32; 3]; 3]) -> [[f32; 3]; 3] {
    let mut out = [[0.0f32; 3]; 3];
    for i in 0..3 {
        for (j, bj) in b.iter().enumerate() {
            for k in 0..3 {
                out[i][j] += a[i][k] * bj[k];
            }
        }
    }
    out
}
