//! Dispatcher task: consumes the event queue, runs the configured action
//! lists, services the one-shot timers, and drives the recorder state.

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Ticker};

use super::now_ms;
use crate::bus::{RecorderState, SystemBus};
use crate::config::Config;
use crate::error::ErrorFlags;
use crate::events::{post_event, Action, ActionKind, Event, EventQueue, Outputs, TimerBank};
use crate::recorder::{record, RecordEntry, RecordQueue};
use crate::CONTROL_FREQ_HZ;

pub async fn peripherals_task<O: Outputs>(
    bus: &SystemBus,
    events: &EventQueue,
    queue: &RecordQueue,
    cfg: &Config,
    out: &mut O,
) -> ! {
    let mut timers = TimerBank::new(&cfg.timers, cfg.control.mach_timer_ms, CONTROL_FREQ_HZ);

    let mut ticker = Ticker::every(Duration::from_hz(CONTROL_FREQ_HZ as u64));
    loop {
        match select(events.receive(), ticker.next()).await {
            Either::First(ev) => {
                handle_event(bus, queue, cfg, &mut timers, ev, out);
                // Drain whatever queued up behind it so dispatch latency
                // stays below one tick.
                while let Ok(ev) = events.try_receive() {
                    handle_event(bus, queue, cfg, &mut timers, ev, out);
                }
            }
            Either::Second(()) => {
                for ev in timers.tick() {
                    post_event(bus, events, ev);
                }
            }
        }
    }
}

/// Runs one event through the timers, the recorder built-ins and the
/// configured action list.
pub fn handle_event<O: Outputs>(
    bus: &SystemBus,
    queue: &RecordQueue,
    cfg: &Config,
    timers: &mut TimerBank,
    ev: Event,
    out: &mut O,
) {
    debug!("event {}", ev as u8);
    timers.on_event(ev);

    // Liftoff switches the retention queue into the flash stream; this is
    // not configurable, a flight must always be recorded.
    if ev == Event::Liftoff && bus.recorder_state() == RecorderState::FillQueue {
        bus.set_recorder_state(RecorderState::WriteToFlash);
    }

    let ts = now_ms();
    for (idx, action) in cfg.actions.actions(ev).iter().enumerate() {
        execute_action(bus, action, out);
        record(
            bus,
            queue,
            cfg.rec_mask,
            RecordEntry::EventInfo { ts, event: ev, action_idx: idx as u8 },
        );
    }
}

/// Invokes one action's effect. Failures raise the per-action error flag
/// and do not unwind anything already done.
pub fn execute_action<O: Outputs>(bus: &SystemBus, action: &Action, out: &mut O) {
    match action.kind {
        ActionKind::NoOp => {}
        ActionKind::FirePyro => {
            if out.fire_pyro(action.arg as u8).is_err() {
                bus.add_error(ErrorFlags::PYRO_FIRE_FAIL);
            }
        }
        ActionKind::SetServo => {
            let (channel, position) = action.servo_args();
            if out.set_servo(channel, position).is_err() {
                bus.add_error(ErrorFlags::SERVO_NOT_READY);
            }
        }
        ActionKind::StartRecorder => {
            if bus.recorder_state() == RecorderState::Off {
                bus.set_recorder_state(RecorderState::FillQueue);
            }
        }
        ActionKind::StopRecorder => bus.set_recorder_state(RecorderState::Off),
        ActionKind::PlayTone => out.play_tone(action.arg),
        ActionKind::SetLed => out.set_led(action.arg),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording `Outputs` double for the dispatcher tests.

    use crate::events::{ActuatorError, Outputs};
    use std::vec::Vec;

    #[derive(Default)]
    pub struct MockOutputs {
        pub pyros_fired: Vec<u8>,
        pub servo_moves: Vec<(u8, u8)>,
        pub tones: Vec<i16>,
        pub leds: Vec<i16>,
        pub fail_pyro: bool,
    }

    impl Outputs for MockOutputs {
        fn fire_pyro(&mut self, channel: u8) -> Result<(), ActuatorError> {
            if self.fail_pyro {
                return Err(ActuatorError::PyroFailed);
            }
            self.pyros_fired.push(channel);
            Ok(())
        }

        fn set_servo(&mut self, channel: u8, position: u8) -> Result<(), ActuatorError> {
            self.servo_moves.push((channel, position));
            Ok(())
        }

        fn play_tone(&mut self, code: i16) {
            self.tones.push(code);
        }

        fn set_led(&mut self, code: i16) {
            self.leds.push(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockOutputs;
    use super::*;
    use crate::events::{EventActionMap, TimerConfig};
    use crate::recorder::RecordTag;

    fn setup() -> (SystemBus, RecordQueue, Config, TimerBank, MockOutputs) {
        let cfg = Config::default();
        let timers = TimerBank::new(&cfg.timers, cfg.control.mach_timer_ms, CONTROL_FREQ_HZ);
        (SystemBus::new(), RecordQueue::new(), cfg, timers, MockOutputs::default())
    }

    #[test]
    fn default_flight_chain_drives_recorder_and_pyros() {
        let (bus, queue, cfg, mut timers, mut out) = setup();

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Ready, &mut out);
        assert_eq!(bus.recorder_state(), RecorderState::FillQueue);

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Liftoff, &mut out);
        assert_eq!(bus.recorder_state(), RecorderState::WriteToFlash);

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Apogee, &mut out);
        handle_event(&bus, &queue, &cfg, &mut timers, Event::MainDeploy, &mut out);
        assert_eq!(out.pyros_fired, [0, 1]);
    }

    #[test]
    fn actions_run_in_list_order_and_keep_going_after_failure() {
        let (bus, queue, mut cfg, mut timers, mut out) = setup();
        out.fail_pyro = true;

        let mut map = EventActionMap::new();
        let _ = map.add(Event::Custom1, Action::new(ActionKind::PlayTone, 1));
        let _ = map.add(Event::Custom1, Action::new(ActionKind::FirePyro, 0));
        let _ = map.add(Event::Custom1, Action::new(ActionKind::PlayTone, 2));
        let _ = map.add(Event::Custom1, Action::set_servo(1, 45));
        cfg.actions = map;

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Custom1, &mut out);

        // The failing pyro raised its flag but the rest of the list ran.
        assert_eq!(out.tones, [1, 2]);
        assert_eq!(out.servo_moves, [(1, 45)]);
        assert!(bus.errors().contains(ErrorFlags::PYRO_FIRE_FAIL));
    }

    #[test]
    fn executed_actions_are_logged_with_their_index() {
        let (bus, queue, cfg, mut timers, mut out) = setup();
        bus.set_recorder_state(RecorderState::FillQueue);

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Apogee, &mut out);

        let entry = queue.pop().unwrap();
        assert_eq!(entry.tag(), RecordTag::EventInfo);
        match entry {
            RecordEntry::EventInfo { event, action_idx, .. } => {
                assert_eq!(event, Event::Apogee);
                assert_eq!(action_idx, 0);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn timer_trigger_re_enters_the_dispatcher() {
        let (bus, _queue, mut cfg, _, _) = setup();
        cfg.timers[0] = TimerConfig {
            start_event: Event::Apogee,
            trigger_event: Event::Timer1,
            duration_ms: 20,
        };
        let mut timers = TimerBank::new(&cfg.timers, 0, CONTROL_FREQ_HZ);
        let queue = RecordQueue::new();
        let events = EventQueue::new();
        let mut out = MockOutputs::default();

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Apogee, &mut out);
        // Two control ticks later the trigger event lands in the queue.
        assert!(timers.tick().is_empty());
        let fired = timers.tick();
        assert_eq!(fired.as_slice(), &[Event::Timer1]);
        for ev in fired {
            post_event(&bus, &events, ev);
        }
        assert_eq!(events.try_receive().unwrap(), Event::Timer1);
    }

    #[test]
    fn stop_recorder_action_turns_the_pipeline_off() {
        let (bus, queue, mut cfg, mut timers, mut out) = setup();
        bus.set_recorder_state(RecorderState::WriteToFlash);
        cfg.actions.clear(Event::Custom2);
        let _ = cfg.actions.add(Event::Custom2, Action::new(ActionKind::StopRecorder, 0));

        handle_event(&bus, &queue, &cfg, &mut timers, Event::Custom2, &mut out);
        assert_eq!(bus.recorder_state(), RecorderState::Off);
    }
}
