//! Shared state bus: latest-value slots for the cross-task traffic.
//!
//! One writer per slot, any number of readers. A reader always sees a
//! self-consistent value and never blocks; there is no history. The bus is
//! constructed once at boot and handed to every task by reference.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::watch::Watch;

use crate::error::ErrorFlags;
use crate::state::{
    BaroSample, BatterySample, ElimMask, FilteredData, FlightPhase, FlightStats, FusedState,
    GnssData, ImuSample, MagSample, OrientationState,
};

/// Latest-value slot. Readers use [`Slot::try_get`]; the single writer
/// publishes with [`Slot::send`].
pub type Slot<T> = Watch<CriticalSectionRawMutex, T, 1>;

/// Recorder pipeline state, separate from the flight FSM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum RecorderState {
    #[default]
    Off = 0,
    FillQueue = 1,
    WriteToFlash = 2,
}

pub struct SystemBus {
    // Sensor slots, written by the sensor-read collaborators.
    pub imu: [Slot<ImuSample>; 3],
    pub baro: [Slot<BaroSample>; 3],
    pub mag: Slot<MagSample>,
    pub battery: Slot<BatterySample>,

    // Estimation pipeline slots.
    pub filtered: Slot<FilteredData>,
    pub fused: Slot<FusedState>,
    pub orientation: Slot<OrientationState>,
    pub elim: Slot<ElimMask>,

    // Flight FSM slots.
    pub phase: Slot<FlightPhase>,
    pub stats: Slot<FlightStats>,

    // Telemetry slots.
    pub gnss: Slot<GnssData>,

    errors: AtomicU32,
    recorder_state: AtomicU8,
    pyro_continuity: AtomicU8,
    testing_armed: AtomicBool,
}

impl SystemBus {
    pub const fn new() -> Self {
        Self {
            imu: [Slot::new(), Slot::new(), Slot::new()],
            baro: [Slot::new(), Slot::new(), Slot::new()],
            mag: Slot::new(),
            battery: Slot::new(),
            filtered: Slot::new(),
            fused: Slot::new(),
            orientation: Slot::new(),
            elim: Slot::new(),
            phase: Slot::new(),
            stats: Slot::new(),
            gnss: Slot::new(),
            errors: AtomicU32::new(0),
            recorder_state: AtomicU8::new(RecorderState::Off as u8),
            pyro_continuity: AtomicU8::new(0),
            testing_armed: AtomicBool::new(false),
        }
    }

    // ── Error word ────────────────────────────────────────────────────────────

    pub fn add_error(&self, e: ErrorFlags) {
        if !e.is_empty() {
            self.errors.fetch_or(e.bits(), Ordering::Relaxed);
        }
    }

    pub fn errors(&self) -> ErrorFlags {
        ErrorFlags::from_bits(self.errors.load(Ordering::Relaxed))
    }

    // ── Recorder state ────────────────────────────────────────────────────────

    pub fn set_recorder_state(&self, s: RecorderState) {
        self.recorder_state.store(s as u8, Ordering::Relaxed);
    }

    pub fn recorder_state(&self) -> RecorderState {
        match self.recorder_state.load(Ordering::Relaxed) {
            1 => RecorderState::FillQueue,
            2 => RecorderState::WriteToFlash,
            _ => RecorderState::Off,
        }
    }

    // ── Pyro continuity (bit0 = pyro 1, bit1 = pyro 2) ────────────────────────

    pub fn set_pyro_continuity(&self, mask: u8) {
        self.pyro_continuity.store(mask & 0b11, Ordering::Relaxed);
    }

    pub fn pyro_continuity(&self) -> u8 {
        self.pyro_continuity.load(Ordering::Relaxed)
    }

    // ── Ground-test arming ────────────────────────────────────────────────────

    pub fn set_testing_armed(&self, armed: bool) {
        self.testing_armed.store(armed, Ordering::Relaxed);
    }

    pub fn testing_armed(&self) -> bool {
        self.testing_armed.load(Ordering::Relaxed)
    }

    // ── Convenience readers ───────────────────────────────────────────────────

    pub fn current_phase(&self) -> FlightPhase {
        self.phase.try_get().unwrap_or_default()
    }

    /// The first IMU sample whose channel is not marked faulty; falls back to
    /// IMU 0 when everything is faulty so consumers keep seeing data.
    pub fn good_imu(&self) -> ImuSample {
        let mask = self.elim.try_get().unwrap_or_default();
        for i in 0..3 {
            if !mask.faulty_imu[i] {
                if let Some(s) = self.imu[i].try_get() {
                    return s;
                }
            }
        }
        self.imu[0].try_get().unwrap_or_default()
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}
