//! Typed variable registry over the config.
//!
//! Every tunable field has a table entry with a name, an access mode and
//! bounds. The CLI collaborator resolves `get`/`set`/`dump` through this
//! table; values travel as text, parsing and range checks live here.

use core::fmt::Write;

use heapless::String;

use super::{Config, PHRASE_LEN};
use crate::events::NUM_TIMERS;
use crate::recorder::RecordTag;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarId {
    LiftoffAccThreshold,
    ElimAccThreshold,
    MainAltitude,
    MachTimerDuration,
    PowerLevel,
    AdaptivePower,
    TestingMode,
    LinkPhrase,
    TestPhrase,
    RecMaskBit(u32),
    TimerStartEvents,
    TimerTriggerEvents,
    TimerDurations,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarMode {
    /// Plain number with min/max bounds.
    Direct,
    /// Index into a value-name table.
    Lookup(&'static [&'static str]),
    /// One bit of a shared mask, toggled with the ON/OFF table.
    Bitset,
    /// Fixed-length list of numbers, comma separated.
    Array(usize),
    /// Bounded text.
    Str,
}

pub struct VarDef {
    pub name: &'static str,
    pub id: VarId,
    pub mode: VarMode,
    pub min: i32,
    pub max: i32,
}

const ON_OFF: &[&str] = &["OFF", "ON"];

macro_rules! rec_bit {
    ($name:literal, $tag:expr) => {
        VarDef { name: $name, id: VarId::RecMaskBit($tag as u32), mode: VarMode::Bitset, min: 0, max: 1 }
    };
}

pub const VAR_TABLE: &[VarDef] = &[
    VarDef { name: "lift_acc_threshold", id: VarId::LiftoffAccThreshold, mode: VarMode::Direct, min: 10, max: 150 },
    VarDef { name: "elim_acc_threshold", id: VarId::ElimAccThreshold, mode: VarMode::Direct, min: 5, max: 100 },
    VarDef { name: "main_altitude", id: VarId::MainAltitude, mode: VarMode::Direct, min: 0, max: 10_000 },
    VarDef { name: "mach_timer_duration", id: VarId::MachTimerDuration, mode: VarMode::Direct, min: 0, max: 60_000 },
    VarDef { name: "tele_power_level", id: VarId::PowerLevel, mode: VarMode::Direct, min: 0, max: 30 },
    VarDef { name: "tele_adaptive_power", id: VarId::AdaptivePower, mode: VarMode::Lookup(ON_OFF), min: 0, max: 1 },
    VarDef { name: "tele_testing_mode", id: VarId::TestingMode, mode: VarMode::Lookup(ON_OFF), min: 0, max: 1 },
    VarDef { name: "tele_link_phrase", id: VarId::LinkPhrase, mode: VarMode::Str, min: 0, max: PHRASE_LEN as i32 },
    VarDef { name: "tele_test_phrase", id: VarId::TestPhrase, mode: VarMode::Str, min: 0, max: PHRASE_LEN as i32 },
    VarDef { name: "timer_start_event", id: VarId::TimerStartEvents, mode: VarMode::Array(NUM_TIMERS), min: 0, max: 17 },
    VarDef { name: "timer_trigger_event", id: VarId::TimerTriggerEvents, mode: VarMode::Array(NUM_TIMERS), min: 0, max: 17 },
    VarDef { name: "timer_duration", id: VarId::TimerDurations, mode: VarMode::Array(NUM_TIMERS), min: 0, max: 600_000 },
    rec_bit!("rec_imu0", RecordTag::Imu0),
    rec_bit!("rec_imu1", RecordTag::Imu1),
    rec_bit!("rec_imu2", RecordTag::Imu2),
    rec_bit!("rec_baro0", RecordTag::Baro0),
    rec_bit!("rec_baro1", RecordTag::Baro1),
    rec_bit!("rec_baro2", RecordTag::Baro2),
    rec_bit!("rec_magneto", RecordTag::Magneto),
    rec_bit!("rec_flight_info", RecordTag::FlightInfo),
    rec_bit!("rec_filtered_data", RecordTag::FilteredDataInfo),
    rec_bit!("rec_flight_state", RecordTag::FlightState),
    rec_bit!("rec_covariance", RecordTag::CovarianceInfo),
    rec_bit!("rec_sensor_info", RecordTag::SensorInfo),
    rec_bit!("rec_event_info", RecordTag::EventInfo),
    rec_bit!("rec_error_info", RecordTag::ErrorInfo),
    rec_bit!("rec_orientation", RecordTag::OrientationInfo),
    rec_bit!("rec_gnss", RecordTag::GnssInfo),
    rec_bit!("rec_voltage", RecordTag::VoltageInfo),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetError {
    UnknownName,
    BadValue,
    OutOfRange,
}

/// All table entries whose name contains `pattern`.
pub fn find(pattern: &str) -> impl Iterator<Item = &'static VarDef> + '_ {
    VAR_TABLE.iter().filter(move |v| v.name.contains(pattern))
}

fn lookup_exact(name: &str) -> Option<&'static VarDef> {
    VAR_TABLE.iter().find(|v| v.name == name)
}

/// Sets a variable by exact name from its text representation.
pub fn set(cfg: &mut Config, name: &str, value: &str) -> Result<(), SetError> {
    let def = lookup_exact(name).ok_or(SetError::UnknownName)?;
    match def.mode {
        VarMode::Direct => {
            let v: f32 = value.trim().parse().map_err(|_| SetError::BadValue)?;
            if v < def.min as f32 || v > def.max as f32 {
                return Err(SetError::OutOfRange);
            }
            set_direct(cfg, def.id, v);
            Ok(())
        }
        VarMode::Lookup(table) => {
            let idx = table
                .iter()
                .position(|t| t.eq_ignore_ascii_case(value.trim()))
                .ok_or(SetError::BadValue)?;
            set_indexed(cfg, def.id, idx as u32);
            Ok(())
        }
        VarMode::Bitset => {
            let idx = ON_OFF
                .iter()
                .position(|t| t.eq_ignore_ascii_case(value.trim()))
                .ok_or(SetError::BadValue)?;
            set_indexed(cfg, def.id, idx as u32);
            Ok(())
        }
        VarMode::Array(len) => {
            let mut parsed = [0u32; NUM_TIMERS];
            let mut count = 0;
            for part in value.split(',') {
                if count >= len {
                    return Err(SetError::BadValue);
                }
                let v: u32 = part.trim().parse().map_err(|_| SetError::BadValue)?;
                if (v as i64) < def.min as i64 || (v as i64) > def.max as i64 {
                    return Err(SetError::OutOfRange);
                }
                parsed[count] = v;
                count += 1;
            }
            if count != len {
                return Err(SetError::BadValue);
            }
            set_array(cfg, def.id, &parsed)
        }
        VarMode::Str => {
            let trimmed = value.trim();
            if trimmed.len() > def.max as usize {
                return Err(SetError::OutOfRange);
            }
            set_string(cfg, def.id, trimmed)
        }
    }
}

fn set_direct(cfg: &mut Config, id: VarId, v: f32) {
    match id {
        VarId::LiftoffAccThreshold => cfg.control.liftoff_acc_threshold = v,
        VarId::ElimAccThreshold => cfg.control.elim_acc_threshold = v,
        VarId::MainAltitude => cfg.control.main_altitude = v,
        VarId::MachTimerDuration => cfg.control.mach_timer_ms = v as u32,
        VarId::PowerLevel => cfg.telemetry.power_level = v as u8,
        _ => {}
    }
}

fn set_indexed(cfg: &mut Config, id: VarId, idx: u32) {
    match id {
        VarId::AdaptivePower => cfg.telemetry.adaptive_power = idx != 0,
        VarId::TestingMode => cfg.telemetry.enable_testing = idx != 0,
        VarId::RecMaskBit(bit) => {
            if idx != 0 {
                cfg.rec_mask |= bit;
            } else {
                cfg.rec_mask &= !bit;
            }
        }
        _ => {}
    }
}

fn set_array(cfg: &mut Config, id: VarId, values: &[u32; NUM_TIMERS]) -> Result<(), SetError> {
    use crate::events::Event;
    match id {
        VarId::TimerDurations => {
            for (t, v) in cfg.timers.iter_mut().zip(values) {
                t.duration_ms = *v;
            }
        }
        VarId::TimerStartEvents => {
            for (t, v) in cfg.timers.iter_mut().zip(values) {
                t.start_event = Event::try_from(*v as u8).map_err(|_| SetError::OutOfRange)?;
            }
        }
        VarId::TimerTriggerEvents => {
            for (t, v) in cfg.timers.iter_mut().zip(values) {
                t.trigger_event = Event::try_from(*v as u8).map_err(|_| SetError::OutOfRange)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn set_string(cfg: &mut Config, id: VarId, v: &str) -> Result<(), SetError> {
    let target = match id {
        VarId::LinkPhrase => &mut cfg.telemetry.link_phrase,
        VarId::TestPhrase => &mut cfg.telemetry.test_phrase,
        _ => return Err(SetError::BadValue),
    };
    target.clear();
    target.push_str(v).map_err(|_| SetError::OutOfRange)
}

/// Formats `name = value` for one entry.
pub fn print_var(cfg: &Config, def: &VarDef, out: &mut impl Write) -> core::fmt::Result {
    write!(out, "{} = ", def.name)?;
    match (def.mode, def.id) {
        (VarMode::Direct, VarId::LiftoffAccThreshold) => write!(out, "{}", cfg.control.liftoff_acc_threshold),
        (VarMode::Direct, VarId::ElimAccThreshold) => write!(out, "{}", cfg.control.elim_acc_threshold),
        (VarMode::Direct, VarId::MainAltitude) => write!(out, "{}", cfg.control.main_altitude),
        (VarMode::Direct, VarId::MachTimerDuration) => write!(out, "{}", cfg.control.mach_timer_ms),
        (VarMode::Direct, VarId::PowerLevel) => write!(out, "{}", cfg.telemetry.power_level),
        (VarMode::Lookup(table), VarId::AdaptivePower) => {
            write!(out, "{}", table[cfg.telemetry.adaptive_power as usize])
        }
        (VarMode::Lookup(table), VarId::TestingMode) => {
            write!(out, "{}", table[cfg.telemetry.enable_testing as usize])
        }
        (VarMode::Bitset, VarId::RecMaskBit(bit)) => {
            write!(out, "{}", ON_OFF[(cfg.rec_mask & bit != 0) as usize])
        }
        (VarMode::Str, VarId::LinkPhrase) => write!(out, "{}", cfg.telemetry.link_phrase),
        (VarMode::Str, VarId::TestPhrase) => write!(out, "{}", cfg.telemetry.test_phrase),
        (VarMode::Array(_), id) => {
            for (i, t) in cfg.timers.iter().enumerate() {
                let v = match id {
                    VarId::TimerStartEvents => u8::from(t.start_event) as u32,
                    VarId::TimerTriggerEvents => u8::from(t.trigger_event) as u32,
                    _ => t.duration_ms,
                };
                if i > 0 {
                    write!(out, ",")?;
                }
                write!(out, "{}", v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Dumps every entry, one `name = value` line per variable.
pub fn dump(cfg: &Config, out: &mut impl Write) -> core::fmt::Result {
    for def in VAR_TABLE {
        print_var(cfg, def, out)?;
        writeln!(out)?;
    }
    Ok(())
}
