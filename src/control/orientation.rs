//! Passive orientation tracking.
//!
//! Pure quaternion integration of the body rates, normalised after every
//! step. There is no measurement update: the attitude is a pass-through for
//! the flight log, not a control input.

use micromath::F32Ext;

use crate::state::{ImuSample, OrientationState, GYRO_LSB_PER_DPS};

pub struct OrientationFilter {
    q: [f32; 4],
    t_sampl: f32,
}

impl OrientationFilter {
    pub fn new(control_freq: u32) -> Self {
        Self { q: [1.0, 0.0, 0.0, 0.0], t_sampl: 1.0 / control_freq as f32 }
    }

    pub fn reset(&mut self) {
        self.q = [1.0, 0.0, 0.0, 0.0];
    }

    /// Integrates one tick of body rates.
    pub fn step(&mut self, ts: u32, imu: &ImuSample) -> OrientationState {
        let gx = (imu.gyro[0] as f32 / GYRO_LSB_PER_DPS).to_radians();
        let gy = (imu.gyro[1] as f32 / GYRO_LSB_PER_DPS).to_radians();
        let gz = (imu.gyro[2] as f32 / GYRO_LSB_PER_DPS).to_radians();

        let [q0, q1, q2, q3] = self.q;

        // q̇ = ½ q ⊗ (0, ω)
        let half_dt = 0.5 * self.t_sampl;
        let gx = gx * half_dt;
        let gy = gy * half_dt;
        let gz = gz * half_dt;

        let mut q = [
            q0 - q1 * gx - q2 * gy - q3 * gz,
            q1 + q0 * gx + q2 * gz - q3 * gy,
            q2 + q0 * gy - q1 * gz + q3 * gx,
            q3 + q0 * gz + q1 * gy - q2 * gx,
        ];

        let recip_norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt().recip();
        for c in q.iter_mut() {
            *c *= recip_norm;
        }
        self.q = q;

        OrientationState { ts, q }
    }
}
