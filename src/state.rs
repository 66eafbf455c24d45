/// Shared value types published on the system bus.
///
/// All types are `Copy` so a slot publication is a single struct store and
/// readers always observe a whole value, never a half-written one.
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Accelerometer scale: 1024 LSB = 1 g.
pub const ACC_LSB_PER_G: f32 = 1024.0;
/// Gyro scale: 16.4 LSB = 1 deg/s (±2000 dps range).
pub const GYRO_LSB_PER_DPS: f32 = 16.4;
/// Standard gravity, m/s².
pub const GRAVITY: f32 = 9.81;

// ── Raw sensor samples ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuSample {
    pub ts: u32,
    pub acc: [i16; 3],
    pub gyro: [i16; 3],
}

impl ImuSample {
    /// Magnitude of the specific force in m/s².
    pub fn acc_norm(&self) -> f32 {
        use micromath::F32Ext;
        let x = self.acc[0] as f32 / ACC_LSB_PER_G;
        let y = self.acc[1] as f32 / ACC_LSB_PER_G;
        let z = self.acc[2] as f32 / ACC_LSB_PER_G;
        (x * x + y * y + z * z).sqrt() * GRAVITY
    }

    /// Magnitude of the body rate in deg/s.
    pub fn gyro_norm(&self) -> f32 {
        use micromath::F32Ext;
        let x = self.gyro[0] as f32 / GYRO_LSB_PER_DPS;
        let y = self.gyro[1] as f32 / GYRO_LSB_PER_DPS;
        let z = self.gyro[2] as f32 / GYRO_LSB_PER_DPS;
        (x * x + y * y + z * z).sqrt()
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaroSample {
    pub ts: u32,
    /// Pascal.
    pub pressure: i32,
    /// Centi-degrees Celsius.
    pub temperature: i32,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MagSample {
    pub ts: u32,
    pub mag: [i16; 3],
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatterySample {
    pub ts: u32,
    pub voltage_mv: u16,
}

impl BatterySample {
    /// Battery voltage quantised to deci-volts for the downlink.
    pub fn decivolts(&self) -> u8 {
        (self.voltage_mv / 100).min(255) as u8
    }
}

// ── GNSS pass-through ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GnssData {
    pub lat: f32,
    pub lon: f32,
    pub sats: u8,
    pub time: GnssTime,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GnssTime {
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

// ── Estimation pipeline outputs ───────────────────────────────────────────────

/// Pre-filter output: raw (pre-median) and filtered (post-median) channel
/// averages, plus the calibrated ground pressure used for the AGL derivation.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilteredData {
    pub ts: u32,
    /// m/s², vertical axis, gravity removed, averaged over good IMUs.
    pub raw_acc: f32,
    /// m above ground, averaged over good baros.
    pub raw_agl: f32,
    pub filtered_acc: f32,
    pub filtered_agl: f32,
    /// Pascal; frozen once the vehicle is READY.
    pub ground_pressure: f32,
}

/// Fused vertical state published by the Kalman filter every tick.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FusedState {
    pub ts: u32,
    pub height: f32,
    pub velocity: f32,
    pub acceleration: f32,
    pub height_cov: f32,
    pub velocity_cov: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OrientationState {
    pub ts: u32,
    /// Unit quaternion, w first.
    pub q: [f32; 4],
}

impl Default for OrientationState {
    fn default() -> Self {
        Self { ts: 0, q: [1.0, 0.0, 0.0, 0.0] }
    }
}

impl OrientationState {
    /// Quaternion packed as int16 × 10 000 for the flight log.
    pub fn packed(&self) -> [i16; 4] {
        let mut out = [0i16; 4];
        for (o, q) in out.iter_mut().zip(self.q.iter()) {
            *o = (q * 10_000.0) as i16;
        }
        out
    }
}

// ── Sensor elimination ────────────────────────────────────────────────────────

/// Per-channel fault mask produced by the sensor eliminator.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ElimMask {
    pub faulty_imu: [bool; 3],
    pub faulty_baro: [bool; 3],
    pub num_faulty_imus: u8,
    pub num_faulty_baros: u8,
}

impl ElimMask {
    pub fn all_imus_faulty(&self) -> bool {
        self.num_faulty_imus >= 3
    }

    pub fn all_baros_faulty(&self) -> bool {
        self.num_faulty_baros >= 3
    }
}

// ── Flight phase ──────────────────────────────────────────────────────────────

/// Mission phases. Transitions are monotone past `Thrusting`; only
/// `Moving` ↔ `Ready` may cycle before the first liftoff detection.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FlightPhase {
    #[default]
    Calibrating = 0,
    Moving = 1,
    Ready = 2,
    Thrusting = 3,
    Coasting = 4,
    Apogee = 5,
    Drogue = 6,
    Main = 7,
    Touchdown = 8,
    Invalid = 9,
}

impl FlightPhase {
    /// True for phases between liftoff and touchdown.
    pub fn in_flight(self) -> bool {
        self >= FlightPhase::Thrusting && self < FlightPhase::Touchdown
    }

    /// 3-bit downlink encoding (0–7 subset).
    pub fn downlink_code(self) -> u8 {
        match self {
            FlightPhase::Calibrating => 0,
            FlightPhase::Moving => 1,
            FlightPhase::Ready => 2,
            FlightPhase::Thrusting => 3,
            FlightPhase::Coasting => 4,
            FlightPhase::Apogee | FlightPhase::Drogue => 5,
            FlightPhase::Main => 6,
            FlightPhase::Touchdown => 7,
            FlightPhase::Invalid => 0,
        }
    }
}

// ── Flight statistics ─────────────────────────────────────────────────────────

/// Running extremes tracked between liftoff and apogee, written to the
/// post-flight summary.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlightStats {
    pub max_height: f32,
    pub max_velocity: f32,
    pub max_acceleration: f32,
}
