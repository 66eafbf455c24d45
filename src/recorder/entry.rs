//! Flight-log record entries.
//!
//! Each record is a `u32` tag followed by a payload whose length is a pure
//! function of the tag. This module is the single authoritative source of
//! the on-flash byte layout in both directions: everything is written
//! little-endian, field by field, with no padding.

use num_enum::TryFromPrimitive;

use crate::events::Event;
use crate::state::{BaroSample, FilteredData, FlightPhase, FusedState, ImuSample, MagSample};

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum RecordTag {
    Imu0 = 0x01,
    Imu1 = 0x02,
    Imu2 = 0x04,
    Baro0 = 0x08,
    Baro1 = 0x10,
    Baro2 = 0x20,
    Magneto = 0x40,
    FlightInfo = 0x80,
    FilteredDataInfo = 0x100,
    FlightState = 0x200,
    CovarianceInfo = 0x400,
    SensorInfo = 0x800,
    EventInfo = 0x1000,
    ErrorInfo = 0x2000,
    OrientationInfo = 0x4000,
    GnssInfo = 0x8000,
    VoltageInfo = 0x1_0000,
}

/// Mask with every tag enabled.
pub const REC_MASK_ALL: u32 = 0x1_FFFF;

/// Largest serialized record: tag + FILTERED_DATA_INFO payload.
pub const MAX_RECORD_SIZE: usize = 4 + 20;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordEntry {
    /// `id` selects IMU0..2.
    Imu { id: u8, data: ImuSample },
    /// `id` selects BARO0..2.
    Baro { id: u8, data: BaroSample },
    Magneto(MagSample),
    FlightInfo { ts: u32, height: f32, velocity: f32, acceleration: f32 },
    FilteredDataInfo(FilteredData),
    FlightState { ts: u32, phase: FlightPhase },
    CovarianceInfo { ts: u32, height_cov: f32, velocity_cov: f32 },
    SensorInfo { ts: u32, faulty_imu: [u8; 3], faulty_baro: [u8; 3] },
    EventInfo { ts: u32, event: Event, action_idx: u8 },
    ErrorInfo { ts: u32, error: u32 },
    OrientationInfo { ts: u32, q: [i16; 4] },
    GnssInfo { ts: u32, lat: f32, lon: f32, sats: u8 },
    VoltageInfo { ts: u32, voltage_mv: u16 },
}

impl RecordEntry {
    pub fn flight_info(ts: u32, fused: &FusedState) -> Self {
        Self::FlightInfo {
            ts,
            height: fused.height,
            velocity: fused.velocity,
            acceleration: fused.acceleration,
        }
    }

    pub fn tag(&self) -> RecordTag {
        match self {
            Self::Imu { id: 1, .. } => RecordTag::Imu1,
            Self::Imu { id: 2, .. } => RecordTag::Imu2,
            Self::Imu { .. } => RecordTag::Imu0,
            Self::Baro { id: 1, .. } => RecordTag::Baro1,
            Self::Baro { id: 2, .. } => RecordTag::Baro2,
            Self::Baro { .. } => RecordTag::Baro0,
            Self::Magneto(_) => RecordTag::Magneto,
            Self::FlightInfo { .. } => RecordTag::FlightInfo,
            Self::FilteredDataInfo(_) => RecordTag::FilteredDataInfo,
            Self::FlightState { .. } => RecordTag::FlightState,
            Self::CovarianceInfo { .. } => RecordTag::CovarianceInfo,
            Self::SensorInfo { .. } => RecordTag::SensorInfo,
            Self::EventInfo { .. } => RecordTag::EventInfo,
            Self::ErrorInfo { .. } => RecordTag::ErrorInfo,
            Self::OrientationInfo { .. } => RecordTag::OrientationInfo,
            Self::GnssInfo { .. } => RecordTag::GnssInfo,
            Self::VoltageInfo { .. } => RecordTag::VoltageInfo,
        }
    }

    /// Payload length in bytes for a tag; the serialized record adds the
    /// 4-byte tag in front.
    pub fn payload_size(tag: RecordTag) -> usize {
        match tag {
            RecordTag::Imu0 | RecordTag::Imu1 | RecordTag::Imu2 => 16,
            RecordTag::Baro0 | RecordTag::Baro1 | RecordTag::Baro2 => 12,
            RecordTag::Magneto => 10,
            RecordTag::FlightInfo => 16,
            RecordTag::FilteredDataInfo => 20,
            RecordTag::FlightState => 5,
            RecordTag::CovarianceInfo => 12,
            RecordTag::SensorInfo => 10,
            RecordTag::EventInfo => 6,
            RecordTag::ErrorInfo => 8,
            RecordTag::OrientationInfo => 12,
            RecordTag::GnssInfo => 13,
            RecordTag::VoltageInfo => 6,
        }
    }

    pub fn serialized_size(&self) -> usize {
        4 + Self::payload_size(self.tag())
    }

    /// Writes tag and payload into `out`, returning the number of bytes.
    /// `out` must hold at least [`MAX_RECORD_SIZE`] bytes.
    pub fn serialize(&self, out: &mut [u8]) -> usize {
        let mut w = FieldWriter::new(out);
        w.u32(self.tag() as u32);
        match *self {
            Self::Imu { data, .. } => {
                w.u32(data.ts);
                for a in data.acc {
                    w.i16(a);
                }
                for g in data.gyro {
                    w.i16(g);
                }
            }
            Self::Baro { data, .. } => {
                w.u32(data.ts);
                w.i32(data.pressure);
                w.i32(data.temperature);
            }
            Self::Magneto(data) => {
                w.u32(data.ts);
                for m in data.mag {
                    w.i16(m);
                }
            }
            Self::FlightInfo { ts, height, velocity, acceleration } => {
                w.u32(ts);
                w.f32(height);
                w.f32(velocity);
                w.f32(acceleration);
            }
            Self::FilteredDataInfo(d) => {
                w.u32(d.ts);
                w.f32(d.raw_agl);
                w.f32(d.raw_acc);
                w.f32(d.filtered_agl);
                w.f32(d.filtered_acc);
            }
            Self::FlightState { ts, phase } => {
                w.u32(ts);
                w.u8(phase as u8);
            }
            Self::CovarianceInfo { ts, height_cov, velocity_cov } => {
                w.u32(ts);
                w.f32(height_cov);
                w.f32(velocity_cov);
            }
            Self::SensorInfo { ts, faulty_imu, faulty_baro } => {
                w.u32(ts);
                for f in faulty_imu {
                    w.u8(f);
                }
                for f in faulty_baro {
                    w.u8(f);
                }
            }
            Self::EventInfo { ts, event, action_idx } => {
                w.u32(ts);
                w.u8(event as u8);
                w.u8(action_idx);
            }
            Self::ErrorInfo { ts, error } => {
                w.u32(ts);
                w.u32(error);
            }
            Self::OrientationInfo { ts, q } => {
                w.u32(ts);
                for c in q {
                    w.i16(c);
                }
            }
            Self::GnssInfo { ts, lat, lon, sats } => {
                w.u32(ts);
                w.f32(lat);
                w.f32(lon);
                w.u8(sats);
            }
            Self::VoltageInfo { ts, voltage_mv } => {
                w.u32(ts);
                w.u16(voltage_mv);
            }
        }
        w.len()
    }

    /// Reads one record back from `bytes`: the inverse of [`serialize`],
    /// used by the flight-dump tooling and the tests.
    pub fn deserialize(bytes: &[u8]) -> Option<(RecordEntry, usize)> {
        if bytes.len() < 4 {
            return None;
        }
        let tag = RecordTag::try_from(u32::from_le_bytes(bytes[..4].try_into().ok()?)).ok()?;
        let size = Self::payload_size(tag);
        if bytes.len() < 4 + size {
            return None;
        }
        let mut r = FieldReader::new(&bytes[4..4 + size]);
        let entry = match tag {
            RecordTag::Imu0 | RecordTag::Imu1 | RecordTag::Imu2 => {
                let id = match tag {
                    RecordTag::Imu1 => 1,
                    RecordTag::Imu2 => 2,
                    _ => 0,
                };
                let ts = r.u32();
                let acc = [r.i16(), r.i16(), r.i16()];
                let gyro = [r.i16(), r.i16(), r.i16()];
                Self::Imu { id, data: ImuSample { ts, acc, gyro } }
            }
            RecordTag::Baro0 | RecordTag::Baro1 | RecordTag::Baro2 => {
                let id = match tag {
                    RecordTag::Baro1 => 1,
                    RecordTag::Baro2 => 2,
                    _ => 0,
                };
                Self::Baro {
                    id,
                    data: BaroSample { ts: r.u32(), pressure: r.i32(), temperature: r.i32() },
                }
            }
            RecordTag::Magneto => {
                Self::Magneto(MagSample { ts: r.u32(), mag: [r.i16(), r.i16(), r.i16()] })
            }
            RecordTag::FlightInfo => Self::FlightInfo {
                ts: r.u32(),
                height: r.f32(),
                velocity: r.f32(),
                acceleration: r.f32(),
            },
            RecordTag::FilteredDataInfo => {
                let ts = r.u32();
                let raw_agl = r.f32();
                let raw_acc = r.f32();
                let filtered_agl = r.f32();
                let filtered_acc = r.f32();
                Self::FilteredDataInfo(FilteredData {
                    ts,
                    raw_acc,
                    raw_agl,
                    filtered_acc,
                    filtered_agl,
                    ground_pressure: 0.0,
                })
            }
            RecordTag::FlightState => Self::FlightState {
                ts: r.u32(),
                phase: FlightPhase::try_from(r.u8()).unwrap_or(FlightPhase::Invalid),
            },
            RecordTag::CovarianceInfo => Self::CovarianceInfo {
                ts: r.u32(),
                height_cov: r.f32(),
                velocity_cov: r.f32(),
            },
            RecordTag::SensorInfo => Self::SensorInfo {
                ts: r.u32(),
                faulty_imu: [r.u8(), r.u8(), r.u8()],
                faulty_baro: [r.u8(), r.u8(), r.u8()],
            },
            RecordTag::EventInfo => Self::EventInfo {
                ts: r.u32(),
                event: Event::try_from(r.u8()).ok()?,
                action_idx: r.u8(),
            },
            RecordTag::ErrorInfo => Self::ErrorInfo { ts: r.u32(), error: r.u32() },
            RecordTag::OrientationInfo => Self::OrientationInfo {
                ts: r.u32(),
                q: [r.i16(), r.i16(), r.i16(), r.i16()],
            },
            RecordTag::GnssInfo => Self::GnssInfo {
                ts: r.u32(),
                lat: r.f32(),
                lon: r.f32(),
                sats: r.u8(),
            },
            RecordTag::VoltageInfo => Self::VoltageInfo { ts: r.u32(), voltage_mv: r.u16() },
        };
        Some((entry, 4 + size))
    }
}

// ── Little-endian field I/O ───────────────────────────────────────────────────

struct FieldWriter<'a> {
    out: &'a mut [u8],
    idx: usize,
}

impl<'a> FieldWriter<'a> {
    fn new(out: &'a mut [u8]) -> Self {
        Self { out, idx: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.out[self.idx..self.idx + bytes.len()].copy_from_slice(bytes);
        self.idx += bytes.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes());
    }

    fn len(&self) -> usize {
        self.idx
    }
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    idx: usize,
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, idx: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.idx..self.idx + N]);
        self.idx += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_size_matches_the_tag_table() {
        let entries = [
            RecordEntry::Imu { id: 0, data: ImuSample::default() },
            RecordEntry::Baro { id: 2, data: BaroSample::default() },
            RecordEntry::Magneto(MagSample::default()),
            RecordEntry::FlightInfo { ts: 0, height: 0.0, velocity: 0.0, acceleration: 0.0 },
            RecordEntry::FilteredDataInfo(FilteredData::default()),
            RecordEntry::FlightState { ts: 0, phase: FlightPhase::Ready },
            RecordEntry::CovarianceInfo { ts: 0, height_cov: 0.0, velocity_cov: 0.0 },
            RecordEntry::SensorInfo { ts: 0, faulty_imu: [0; 3], faulty_baro: [0; 3] },
            RecordEntry::EventInfo { ts: 0, event: Event::Apogee, action_idx: 0 },
            RecordEntry::ErrorInfo { ts: 0, error: 0 },
            RecordEntry::OrientationInfo { ts: 0, q: [0; 4] },
            RecordEntry::GnssInfo { ts: 0, lat: 0.0, lon: 0.0, sats: 0 },
            RecordEntry::VoltageInfo { ts: 0, voltage_mv: 0 },
        ];
        for e in entries {
            let mut buf = [0u8; MAX_RECORD_SIZE];
            let n = e.serialize(&mut buf);
            assert_eq!(n, e.serialized_size(), "{:?}", e);
            assert!(n <= MAX_RECORD_SIZE);
        }
    }

    #[test]
    fn imu_record_layout_is_stable() {
        let e = RecordEntry::Imu {
            id: 1,
            data: ImuSample { ts: 0x0102_0304, acc: [1, -1, 256], gyro: [2, -2, 512] },
        };
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let n = e.serialize(&mut buf);
        assert_eq!(n, 20);
        // Tag IMU1 little-endian, then ts, then the six int16s.
        assert_eq!(&buf[..4], &[0x02, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[8..10], &1i16.to_le_bytes());
        assert_eq!(&buf[10..12], &(-1i16).to_le_bytes());
    }

    #[test]
    fn round_trips_through_deserialize() {
        let entries = [
            RecordEntry::Imu {
                id: 2,
                data: ImuSample { ts: 7, acc: [100, -200, 300], gyro: [-1, 2, -3] },
            },
            RecordEntry::Baro {
                id: 0,
                data: BaroSample { ts: 8, pressure: 98_123, temperature: 2_150 },
            },
            RecordEntry::FlightState { ts: 9, phase: FlightPhase::Coasting },
            RecordEntry::EventInfo { ts: 10, event: Event::MainDeploy, action_idx: 3 },
            RecordEntry::GnssInfo { ts: 11, lat: 47.3769, lon: 8.5417, sats: 12 },
            RecordEntry::VoltageInfo { ts: 12, voltage_mv: 8_215 },
        ];
        for e in entries {
            let mut buf = [0u8; MAX_RECORD_SIZE];
            let n = e.serialize(&mut buf);
            let (back, consumed) = RecordEntry::deserialize(&buf).unwrap();
            assert_eq!(consumed, n);
            match (e, back) {
                (RecordEntry::FilteredDataInfo(_), _) => {}
                (a, b) => assert_eq!(a, b),
            }
        }
    }

    #[test]
    fn truncated_or_unknown_input_is_rejected() {
        assert!(RecordEntry::deserialize(&[0x01, 0x00]).is_none());
        // Unknown tag.
        assert!(RecordEntry::deserialize(&[0xAA, 0xBB, 0xCC, 0xDD, 0, 0, 0, 0]).is_none());
        // Known tag, short payload.
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let e = RecordEntry::VoltageInfo { ts: 1, voltage_mv: 2 };
        let n = e.serialize(&mut buf);
        assert!(RecordEntry::deserialize(&buf[..n - 1]).is_none());
    }
}
