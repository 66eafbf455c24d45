//! Health monitor: samples the error word for rising edges, checks battery
//! and pyro continuity, and drives the external indicators.

use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::SystemBus;
use crate::config::Config;
use crate::error::ErrorFlags;
use crate::events::{ActionKind, Event, Outputs, NUM_EVENTS};
use crate::recorder::{record, RecordEntry, RecordQueue};
use crate::state::FlightPhase;

const HEALTH_FREQ_HZ: u64 = 10;
/// 2S pack cutoff.
const BATTERY_LOW_MV: u16 = 7_000;

/// Indicator codes towards the board outputs.
const TONE_ERROR: i16 = 880;
const LED_ERROR: i16 = 1;

pub async fn health_task<O: Outputs>(
    bus: &SystemBus,
    queue: &RecordQueue,
    cfg: &Config,
    out: &mut O,
) -> ! {
    let pyro_mask = pyro_channels_needed(cfg);
    let mut prev = ErrorFlags::NONE;
    let mut tick = 0u32;

    let mut ticker = Ticker::every(Duration::from_hz(HEALTH_FREQ_HZ));
    loop {
        ticker.next().await;
        tick = tick.wrapping_add(1);
        let ts = now_ms();

        // Battery sampling at 1 Hz.
        if tick % 10 == 0 {
            if let Some(batt) = bus.battery.try_get() {
                record(bus, queue, cfg.rec_mask, RecordEntry::VoltageInfo { ts, voltage_mv: batt.voltage_mv });
                if batt.voltage_mv > 0 && batt.voltage_mv < BATTERY_LOW_MV {
                    bus.add_error(ErrorFlags::BATTERY_LOW);
                }
            }
        }

        // Continuity must be present on every channel an armed pyro action
        // will fire.
        if bus.current_phase() == FlightPhase::Ready
            && pyro_mask & bus.pyro_continuity() != pyro_mask
        {
            bus.add_error(ErrorFlags::NO_PYRO);
        }

        let errors = bus.errors();
        let rising = errors.rising_since(prev);
        if !rising.is_empty() {
            warn!("error flags raised: {}", rising.bits());
            record(bus, queue, cfg.rec_mask, RecordEntry::ErrorInfo { ts, error: rising.bits() });
            out.play_tone(TONE_ERROR);
            out.set_led(LED_ERROR);
        }
        prev = errors;
    }
}

/// Continuity bits required by the configured pyro actions (bit per
/// channel, channels 0 and 1).
pub fn pyro_channels_needed(cfg: &Config) -> u8 {
    let mut mask = 0u8;
    for ev in 0..NUM_EVENTS as u8 {
        let event = match Event::try_from(ev) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for action in cfg.actions.actions(event) {
            if action.kind == ActionKind::FirePyro && action.arg < 2 {
                mask |= 1 << action.arg;
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Action, EventActionMap};

    #[test]
    fn default_config_needs_both_pyro_channels() {
        // Defaults fire channel 0 at apogee and channel 1 at main.
        assert_eq!(pyro_channels_needed(&Config::default()), 0b11);
    }

    #[test]
    fn channels_follow_the_action_map() {
        let mut cfg = Config::default();
        cfg.actions = EventActionMap::new();
        assert_eq!(pyro_channels_needed(&cfg), 0);

        let _ = cfg.actions.add(Event::Apogee, Action::new(ActionKind::FirePyro, 1));
        assert_eq!(pyro_channels_needed(&cfg), 0b10);
    }
}
