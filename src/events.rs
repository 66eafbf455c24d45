//! Mission events, the event → action map, and the one-shot event timers.
//!
//! Events are value-typed and flow through a bounded queue into the
//! dispatcher task, which looks up the configured action list and invokes
//! each effect in order. Timers arm on their start event and emit their
//! trigger event back into the same queue exactly once.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::bus::SystemBus;
use crate::error::ErrorFlags;

pub const NUM_EVENTS: usize = 18;
pub const NUM_TIMERS: usize = 8;
pub const MAX_ACTIONS_PER_EVENT: usize = 16;
pub const EVENT_QUEUE_SIZE: usize = 16;

/// Bounded MPSC event queue; overflow drops the newest event.
pub type EventQueue = Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_SIZE>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Event {
    Calibrate = 0,
    Ready = 1,
    Liftoff = 2,
    MaxV = 3,
    Apogee = 4,
    MainDeploy = 5,
    Touchdown = 6,
    Custom1 = 7,
    Custom2 = 8,
    MachTimer = 9,
    Timer1 = 10,
    Timer2 = 11,
    Timer3 = 12,
    Timer4 = 13,
    Timer5 = 14,
    Timer6 = 15,
    Timer7 = 16,
    Timer8 = 17,
}

/// Posts an event; on overflow the event is dropped and the error flag
/// raised. Emission never blocks the producer.
pub fn post_event(bus: &SystemBus, queue: &EventQueue, ev: Event) {
    if queue.try_send(ev).is_err() {
        warn!("event queue full, dropping event");
        bus.add_error(ErrorFlags::EVENT_QUEUE_FULL);
    }
}

// ── Actions ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ActionKind {
    #[default]
    NoOp = 0,
    FirePyro = 1,
    /// arg encodes channel in the high byte, position in the low byte.
    SetServo = 2,
    StartRecorder = 3,
    StopRecorder = 4,
    PlayTone = 5,
    SetLed = 6,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Action {
    pub kind: ActionKind,
    pub arg: i16,
}

impl Action {
    pub const fn new(kind: ActionKind, arg: i16) -> Self {
        Self { kind, arg }
    }

    pub const fn set_servo(channel: u8, position: u8) -> Self {
        Self { kind: ActionKind::SetServo, arg: ((channel as i16) << 8) | position as i16 }
    }

    pub fn servo_args(&self) -> (u8, u8) {
        ((self.arg >> 8) as u8, (self.arg & 0xFF) as u8)
    }
}

/// Per-event ordered action lists, populated from persisted config at boot
/// and read-only afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct EventActionMap {
    lists: [Vec<Action, MAX_ACTIONS_PER_EVENT>; NUM_EVENTS],
}

impl Default for EventActionMap {
    fn default() -> Self {
        Self { lists: core::array::from_fn(|_| Vec::new()) }
    }
}

impl EventActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self, ev: Event) -> &[Action] {
        &self.lists[u8::from(ev) as usize]
    }

    pub fn add(&mut self, ev: Event, action: Action) -> Result<(), Action> {
        self.lists[u8::from(ev) as usize].push(action)
    }

    pub fn clear(&mut self, ev: Event) {
        self.lists[u8::from(ev) as usize].clear();
    }
}

// ── Effect sink ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorError {
    PyroFailed,
    ServoNotReady,
}

/// Side-effect seam of the dispatcher; implemented by the board crate over
/// the real pyro channels, servos, buzzer and LEDs.
pub trait Outputs {
    fn fire_pyro(&mut self, channel: u8) -> Result<(), ActuatorError>;
    fn set_servo(&mut self, channel: u8, position: u8) -> Result<(), ActuatorError>;
    fn play_tone(&mut self, code: i16);
    fn set_led(&mut self, code: i16);
}

// ── One-shot timers ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerState {
    #[default]
    Idle,
    Armed,
    Fired,
}

/// Persisted timer configuration. `duration_ms == 0` disables the timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConfig {
    pub start_event: Event,
    pub trigger_event: Event,
    pub duration_ms: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { start_event: Event::Liftoff, trigger_event: Event::Timer1, duration_ms: 0 }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EventTimer {
    config: TimerConfig,
    state: TimerState,
    remaining_ticks: u32,
    control_freq: u32,
}

impl EventTimer {
    pub fn new(config: TimerConfig, control_freq: u32) -> Self {
        Self { config, state: TimerState::Idle, remaining_ticks: 0, control_freq }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Arms the timer when its start event fires. Re-emission of the start
    /// event does not re-arm: once fired a timer stays quiet until reset.
    pub fn on_event(&mut self, ev: Event) {
        if self.state == TimerState::Idle
            && ev == self.config.start_event
            && self.config.duration_ms > 0
        {
            self.state = TimerState::Armed;
            self.remaining_ticks =
                (self.config.duration_ms as u64 * self.control_freq as u64 / 1000) as u32;
        }
    }

    /// Advances one control tick; returns the trigger event on expiry.
    pub fn tick(&mut self) -> Option<Event> {
        if self.state != TimerState::Armed {
            return None;
        }
        self.remaining_ticks = self.remaining_ticks.saturating_sub(1);
        if self.remaining_ticks == 0 {
            self.state = TimerState::Fired;
            return Some(self.config.trigger_event);
        }
        None
    }
}

/// The eight configurable timers plus the dedicated mach timer.
pub struct TimerBank {
    timers: [EventTimer; NUM_TIMERS],
    mach: EventTimer,
}

impl TimerBank {
    pub fn new(configs: &[TimerConfig; NUM_TIMERS], mach_duration_ms: u32, control_freq: u32) -> Self {
        let mach_config = TimerConfig {
            start_event: Event::Liftoff,
            trigger_event: Event::MachTimer,
            duration_ms: mach_duration_ms,
        };
        let mut timers = [EventTimer::new(TimerConfig::default(), control_freq); NUM_TIMERS];
        for (t, c) in timers.iter_mut().zip(configs.iter()) {
            *t = EventTimer::new(*c, control_freq);
        }
        Self { timers, mach: EventTimer::new(mach_config, control_freq) }
    }

    pub fn on_event(&mut self, ev: Event) {
        for t in self.timers.iter_mut() {
            t.on_event(ev);
        }
        self.mach.on_event(ev);
    }

    /// Advances all timers one tick and collects the fired trigger events.
    pub fn tick(&mut self) -> Vec<Event, { NUM_TIMERS + 1 }> {
        let mut fired = Vec::new();
        for t in self.timers.iter_mut() {
            if let Some(ev) = t.tick() {
                let _ = fired.push(ev);
            }
        }
        if let Some(ev) = self.mach.tick() {
            let _ = fired.push(ev);
        }
        fired
    }

    pub fn timer_state(&self, idx: usize) -> TimerState {
        self.timers[idx].state()
    }

    pub fn mach_state(&self) -> TimerState {
        self.mach.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: u32 = 100;

    fn timer(duration_ms: u32) -> EventTimer {
        EventTimer::new(
            TimerConfig {
                start_event: Event::Liftoff,
                trigger_event: Event::Timer1,
                duration_ms,
            },
            FREQ,
        )
    }

    #[test]
    fn timer_fires_exactly_once() {
        let mut t = timer(100);
        t.on_event(Event::Liftoff);
        assert_eq!(t.state(), TimerState::Armed);

        let mut fired = 0;
        for _ in 0..1000 {
            if t.tick().is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(t.state(), TimerState::Fired);

        // A second start event must not re-arm a fired timer.
        t.on_event(Event::Liftoff);
        assert_eq!(t.state(), TimerState::Fired);
    }

    #[test]
    fn timer_duration_is_respected() {
        let mut t = timer(100); // 100 ms = 10 ticks at 100 Hz
        t.on_event(Event::Liftoff);
        for _ in 0..9 {
            assert_eq!(t.tick(), None);
        }
        assert_eq!(t.tick(), Some(Event::Timer1));
    }

    #[test]
    fn arming_is_idempotent() {
        let mut t = timer(1000);
        t.on_event(Event::Liftoff);
        for _ in 0..50 {
            t.tick();
        }
        // Re-arming mid-countdown must not restart the countdown.
        t.on_event(Event::Liftoff);
        let mut ticks = 0;
        while t.tick().is_none() {
            ticks += 1;
            assert!(ticks < 100);
        }
        assert_eq!(ticks, 49);
    }

    #[test]
    fn disabled_timer_never_arms() {
        let mut t = timer(0);
        t.on_event(Event::Liftoff);
        assert_eq!(t.state(), TimerState::Idle);
    }

    #[test]
    fn other_events_do_not_arm() {
        let mut t = timer(100);
        t.on_event(Event::Apogee);
        assert_eq!(t.state(), TimerState::Idle);
    }

    #[test]
    fn bank_includes_the_mach_timer() {
        let configs = [TimerConfig::default(); NUM_TIMERS];
        let mut bank = TimerBank::new(&configs, 500, FREQ);
        bank.on_event(Event::Liftoff);
        assert_eq!(bank.mach_state(), TimerState::Armed);

        let mut fired = heapless::Vec::<Event, 16>::new();
        for _ in 0..100 {
            fired.extend(bank.tick());
        }
        assert_eq!(fired.as_slice(), &[Event::MachTimer]);
    }

    #[test]
    fn action_map_is_ordered_and_bounded() {
        let mut map = EventActionMap::new();
        for i in 0..MAX_ACTIONS_PER_EVENT as i16 {
            map.add(Event::Apogee, Action::new(ActionKind::PlayTone, i)).unwrap();
        }
        assert!(map.add(Event::Apogee, Action::default()).is_err());
        let args: heapless::Vec<i16, 16> = map.actions(Event::Apogee).iter().map(|a| a.arg).collect();
        assert_eq!(&args[..4], &[0, 1, 2, 3]);
        assert!(map.actions(Event::Liftoff).is_empty());
    }

    #[test]
    fn servo_arg_round_trips() {
        let a = Action::set_servo(2, 90);
        assert_eq!(a.servo_args(), (2, 90));
    }

    #[test]
    fn queue_overflow_drops_newest_and_flags() {
        let bus = SystemBus::new();
        let queue = EventQueue::new();
        for _ in 0..EVENT_QUEUE_SIZE {
            post_event(&bus, &queue, Event::Custom1);
        }
        assert!(!bus.errors().contains(ErrorFlags::EVENT_QUEUE_FULL));
        post_event(&bus, &queue, Event::Custom2);
        assert!(bus.errors().contains(ErrorFlags::EVENT_QUEUE_FULL));
        // The dropped event is the newest one.
        for _ in 0..EVENT_QUEUE_SIZE {
            assert_eq!(queue.try_receive().unwrap(), Event::Custom1);
        }
        assert!(queue.try_receive().is_err());
    }
}
