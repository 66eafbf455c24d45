//! Persistent configuration.
//!
//! The whole config is one fixed-layout little-endian blob with a trailing
//! CRC32, stored as `/cats_config` in the file store. A CRC or version
//! mismatch falls back to defaults and raises `NON_USER_CFG`. After boot the
//! config is immutable; the CLI collaborator mutates a copy through the
//! registry and persists it with [`save`].

pub mod registry;

use heapless::String;

use crate::control::phases::FsmSettings;
use crate::error::ErrorFlags;
use crate::events::{Action, ActionKind, Event, EventActionMap, TimerConfig, MAX_ACTIONS_PER_EVENT, NUM_EVENTS, NUM_TIMERS};
use crate::fs::{FlightFs, FsError, FsFile};
use crate::recorder::REC_MASK_ALL;

pub const CONFIG_FILE_PATH: &str = "/cats_config";

const CONFIG_VERSION: u8 = 1;
/// Phrase fields are stored as a length byte plus this many bytes.
pub const PHRASE_LEN: usize = 16;

/// version + control + telemetry + rec_mask + timers + action map + crc
pub const CONFIG_BLOB_SIZE: usize = 1
    + 16
    + (3 + 2 * (1 + PHRASE_LEN))
    + 4
    + NUM_TIMERS * 6
    + NUM_EVENTS * (1 + MAX_ACTIONS_PER_EVENT * 3)
    + 4;

#[derive(Clone, Debug, PartialEq)]
pub struct ControlSettings {
    /// Liftoff detection threshold at the FSM boundary, m/s².
    pub liftoff_acc_threshold: f32,
    /// Main deployment altitude, m AGL. Required field: 0 means unset and
    /// disables the altitude gate.
    pub main_altitude: f32,
    pub mach_timer_ms: u32,
    /// Allowed deviation from the accel median before a channel is voted
    /// out, m/s².
    pub elim_acc_threshold: f32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            liftoff_acc_threshold: 35.0,
            main_altitude: 0.0,
            mach_timer_ms: 0,
            elim_acc_threshold: 3.0 * 9.81,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySettings {
    pub power_level: u8,
    pub adaptive_power: bool,
    pub enable_testing: bool,
    pub link_phrase: String<PHRASE_LEN>,
    pub test_phrase: String<PHRASE_LEN>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub control: ControlSettings,
    pub telemetry: TelemetrySettings,
    /// Bitmask of record tags the recorder accepts.
    pub rec_mask: u32,
    pub timers: [TimerConfig; NUM_TIMERS],
    pub actions: EventActionMap,
}

impl Default for Config {
    fn default() -> Self {
        let mut actions = EventActionMap::new();
        // Factory recovery chain: arm the recorder when READY, drogue pyro
        // at apogee, main pyro at the main gate, beep after landing.
        let _ = actions.add(Event::Ready, Action::new(ActionKind::StartRecorder, 0));
        let _ = actions.add(Event::Apogee, Action::new(ActionKind::FirePyro, 0));
        let _ = actions.add(Event::MainDeploy, Action::new(ActionKind::FirePyro, 1));
        let _ = actions.add(Event::Touchdown, Action::new(ActionKind::PlayTone, 440));

        Self {
            control: ControlSettings::default(),
            telemetry: TelemetrySettings {
                power_level: 10,
                ..Default::default()
            },
            rec_mask: REC_MASK_ALL,
            timers: [TimerConfig::default(); NUM_TIMERS],
            actions,
        }
    }
}

impl Config {
    pub fn fsm_settings(&self) -> FsmSettings {
        FsmSettings {
            liftoff_acc_threshold: self.control.liftoff_acc_threshold,
            main_altitude: self.control.main_altitude,
            mach_timer_ms: self.control.mach_timer_ms,
        }
    }

    // ── Blob layout ───────────────────────────────────────────────────────────

    /// Serialises the config into `out` (at least [`CONFIG_BLOB_SIZE`]
    /// bytes), appending the CRC32 of everything before it.
    pub fn save_blob(&self, out: &mut [u8]) -> usize {
        let mut idx = 0usize;
        let mut put = |buf: &mut [u8], idx: &mut usize, bytes: &[u8]| {
            buf[*idx..*idx + bytes.len()].copy_from_slice(bytes);
            *idx += bytes.len();
        };

        put(out, &mut idx, &[CONFIG_VERSION]);
        put(out, &mut idx, &self.control.liftoff_acc_threshold.to_le_bytes());
        put(out, &mut idx, &self.control.main_altitude.to_le_bytes());
        put(out, &mut idx, &self.control.mach_timer_ms.to_le_bytes());
        put(out, &mut idx, &self.control.elim_acc_threshold.to_le_bytes());

        put(out, &mut idx, &[
            self.telemetry.power_level,
            self.telemetry.adaptive_power as u8,
            self.telemetry.enable_testing as u8,
        ]);
        for phrase in [&self.telemetry.link_phrase, &self.telemetry.test_phrase] {
            put(out, &mut idx, &[phrase.len() as u8]);
            let mut bytes = [0u8; PHRASE_LEN];
            bytes[..phrase.len()].copy_from_slice(phrase.as_bytes());
            put(out, &mut idx, &bytes);
        }

        put(out, &mut idx, &self.rec_mask.to_le_bytes());

        for t in &self.timers {
            put(out, &mut idx, &[u8::from(t.start_event), u8::from(t.trigger_event)]);
            put(out, &mut idx, &t.duration_ms.to_le_bytes());
        }

        for ev in 0..NUM_EVENTS as u8 {
            let list = self.actions.actions(Event::try_from(ev).unwrap());
            put(out, &mut idx, &[list.len() as u8]);
            for slot in 0..MAX_ACTIONS_PER_EVENT {
                let a = list.get(slot).copied().unwrap_or_default();
                put(out, &mut idx, &[u8::from(a.kind)]);
                put(out, &mut idx, &a.arg.to_le_bytes());
            }
        }

        let crc = crc32fast::hash(&out[..idx]);
        put(out, &mut idx, &crc.to_le_bytes());
        idx
    }

    /// Parses a config blob, verifying length, version and CRC.
    pub fn load_blob(blob: &[u8]) -> Option<Self> {
        if blob.len() < CONFIG_BLOB_SIZE {
            return None;
        }
        let blob = &blob[..CONFIG_BLOB_SIZE];
        let (body, crc_bytes) = blob.split_at(CONFIG_BLOB_SIZE - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().ok()?);
        if crc32fast::hash(body) != stored {
            return None;
        }

        let mut r = Cursor { buf: body, idx: 0 };

        if r.u8() != CONFIG_VERSION {
            return None;
        }

        let control = ControlSettings {
            liftoff_acc_threshold: r.f32(),
            main_altitude: r.f32(),
            mach_timer_ms: r.u32(),
            elim_acc_threshold: r.f32(),
        };

        let (power_level, adaptive_power, enable_testing) = (r.u8(), r.u8() != 0, r.u8() != 0);

        let mut phrases: [String<PHRASE_LEN>; 2] = [String::new(), String::new()];
        for p in phrases.iter_mut() {
            let len = r.u8() as usize;
            let bytes = r.take(PHRASE_LEN);
            if len > PHRASE_LEN {
                return None;
            }
            let text = core::str::from_utf8(&bytes[..len]).ok()?;
            p.push_str(text).ok()?;
        }
        let [link_phrase, test_phrase] = phrases;

        let rec_mask = r.u32();

        let mut timers = [TimerConfig::default(); NUM_TIMERS];
        for t in timers.iter_mut() {
            let start_event = Event::try_from(r.u8()).ok()?;
            let trigger_event = Event::try_from(r.u8()).ok()?;
            let duration_ms = r.u32();
            *t = TimerConfig { start_event, trigger_event, duration_ms };
        }

        let mut actions = EventActionMap::new();
        for ev in 0..NUM_EVENTS as u8 {
            let event = Event::try_from(ev).unwrap();
            let len = r.u8() as usize;
            if len > MAX_ACTIONS_PER_EVENT {
                return None;
            }
            for slot in 0..MAX_ACTIONS_PER_EVENT {
                let kind = r.u8();
                let arg = i16::from_le_bytes([r.u8(), r.u8()]);
                if slot < len {
                    let kind = ActionKind::try_from(kind).ok()?;
                    actions.add(event, Action::new(kind, arg)).ok()?;
                }
            }
        }

        Some(Self {
            control,
            telemetry: TelemetrySettings {
                power_level,
                adaptive_power,
                enable_testing,
                link_phrase,
                test_phrase,
            },
            rec_mask,
            timers,
            actions,
        })
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    pub fn save<F: FlightFs>(&self, fs: &mut F) -> Result<(), FsError> {
        let mut blob = [0u8; CONFIG_BLOB_SIZE];
        let n = self.save_blob(&mut blob);
        let mut f = fs.create(CONFIG_FILE_PATH)?;
        f.write(&blob[..n])?;
        f.sync()
    }

    /// Loads the persisted config; a missing, short, tampered or
    /// incompatible blob yields defaults plus `NON_USER_CFG`.
    pub fn load<F: FlightFs>(fs: &mut F) -> (Self, ErrorFlags) {
        let mut blob = [0u8; CONFIG_BLOB_SIZE];
        let ok = match fs.open(CONFIG_FILE_PATH) {
            Ok(mut f) => matches!(f.read(&mut blob), Ok(n) if n == CONFIG_BLOB_SIZE),
            Err(_) => false,
        };
        if let Some(cfg) = ok.then(|| Self::load_blob(&blob)).flatten() {
            (cfg, ErrorFlags::NONE)
        } else {
            warn!("config blob invalid, using defaults");
            (Self::default(), ErrorFlags::NON_USER_CFG)
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    idx: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> &'a [u8] {
        let s = &self.buf[self.idx..self.idx + n];
        self.idx += n;
        s
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take(4).try_into().unwrap())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take(4).try_into().unwrap())
    }
}
