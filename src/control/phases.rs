//! Flight-phase state machine.
//!
//! All conditions are evaluated once per control tick in the order of the
//! transition table; at most one transition fires per tick. Once past
//! THRUSTING the phase only moves forward, even if a condition briefly
//! reverses. Every transition emits at most one mission event.

use micromath::F32Ext;

use crate::events::Event;
use crate::state::{FilteredData, FlightPhase, FlightStats, FusedState, ImuSample, GRAVITY};

// ── Detection constants (ticks at the control frequency) ──────────────────────

/// Minimum time in CALIBRATING before any transition.
const CALIB_MIN_TICKS: u32 = 100;
/// Gyro magnitude below this counts as still, deg/s.
const STILLNESS_GYRO_DPS: f32 = 10.0;
/// Allowed deviation of |accel| from 1 g while still, m/s².
const STILLNESS_ACC_TOL: f32 = 1.5;
/// AGL magnitude below this counts as a stable ground pressure, m.
const GROUND_AGL_TOL: f32 = 2.0;
/// Stillness window for MOVING → READY and the CALIBRATING → READY pressure
/// stability requirement.
const READY_WINDOW_TICKS: u32 = 200;
/// Consecutive motion ticks for READY → MOVING.
const MOTION_TICKS: u32 = 10;
/// Consecutive over-threshold ticks for liftoff detection.
const LIFTOFF_TICKS: u32 = 10;
/// Burnout: filtered acceleration below this for BURNOUT_TICKS.
const BURNOUT_ACC: f32 = -2.0;
const BURNOUT_TICKS: u32 = 10;
/// Apogee: non-positive velocity or falling height for this many ticks.
const APOGEE_TICKS: u32 = 10;
/// Drogue settling delay after apogee detection.
const MAIN_DEPLOY_DELAY_TICKS: u32 = 50;
/// Touchdown: |velocity| below threshold for this many ticks.
const TOUCHDOWN_VELOCITY: f32 = 2.0;
const TOUCHDOWN_TICKS: u32 = 300;

#[derive(Clone, Copy, Debug)]
pub struct FsmSettings {
    /// Raw acceleration magnitude that counts as liftoff, m/s².
    pub liftoff_acc_threshold: f32,
    /// Main deployment altitude, m AGL; 0 disables the altitude gate.
    pub main_altitude: f32,
    /// Apogee detection is suppressed for this long after liftoff; 0
    /// disables the mach gate.
    pub mach_timer_ms: u32,
}

impl Default for FsmSettings {
    fn default() -> Self {
        Self { liftoff_acc_threshold: 35.0, main_altitude: 0.0, mach_timer_ms: 0 }
    }
}

/// Per-tick FSM inputs, read from the bus slots.
pub struct FsmInputs<'a> {
    pub raw_imu: &'a ImuSample,
    pub fused: &'a FusedState,
    pub filtered: &'a FilteredData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: FlightPhase,
    pub to: FlightPhase,
    pub event: Option<Event>,
}

pub struct FlightFsm {
    phase: FlightPhase,
    settings: FsmSettings,
    control_freq: u32,
    ticks_in_phase: u32,

    still_ticks: u32,
    pressure_stable_ticks: u32,
    motion_ticks: u32,
    liftoff_ticks: u32,
    burnout_ticks: u32,
    apogee_v_ticks: u32,
    apogee_h_ticks: u32,
    touchdown_ticks: u32,

    last_height: f32,
    mach_ticks: u32,
    stats: FlightStats,
}

impl FlightFsm {
    pub fn new(settings: FsmSettings, control_freq: u32) -> Self {
        Self {
            phase: FlightPhase::Calibrating,
            settings,
            control_freq,
            ticks_in_phase: 0,
            still_ticks: 0,
            pressure_stable_ticks: 0,
            motion_ticks: 0,
            liftoff_ticks: 0,
            burnout_ticks: 0,
            apogee_v_ticks: 0,
            apogee_h_ticks: 0,
            touchdown_ticks: 0,
            last_height: 0.0,
            mach_ticks: 0,
            stats: FlightStats::default(),
        }
    }

    pub fn phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn stats(&self) -> FlightStats {
        self.stats
    }

    /// Evaluates one control tick. Returns the transition taken, if any.
    pub fn step(&mut self, inp: &FsmInputs) -> Option<Transition> {
        self.ticks_in_phase = self.ticks_in_phase.saturating_add(1);

        let acc_norm = inp.raw_imu.acc_norm();
        let gyro_norm = inp.raw_imu.gyro_norm();
        let still = gyro_norm < STILLNESS_GYRO_DPS && (acc_norm - GRAVITY).abs() < STILLNESS_ACC_TOL;

        if still {
            self.still_ticks = self.still_ticks.saturating_add(1);
            self.motion_ticks = 0;
        } else {
            self.still_ticks = 0;
            self.motion_ticks = self.motion_ticks.saturating_add(1);
        }
        if inp.filtered.raw_agl.abs() < GROUND_AGL_TOL {
            self.pressure_stable_ticks = self.pressure_stable_ticks.saturating_add(1);
        } else {
            self.pressure_stable_ticks = 0;
        }

        if self.mach_ticks > 0 {
            self.mach_ticks -= 1;
        }

        // Flight statistics between liftoff and apogee.
        if self.phase >= FlightPhase::Thrusting && self.phase <= FlightPhase::Apogee {
            self.stats.max_height = self.stats.max_height.max(inp.fused.height);
            self.stats.max_velocity = self.stats.max_velocity.max(inp.fused.velocity);
            self.stats.max_acceleration = self.stats.max_acceleration.max(inp.fused.acceleration);
        }

        let next = match self.phase {
            FlightPhase::Calibrating => self.check_calibrating(still),
            FlightPhase::Moving => self.check_moving(),
            FlightPhase::Ready => self.check_ready(acc_norm),
            FlightPhase::Thrusting => self.check_thrusting(inp),
            FlightPhase::Coasting => self.check_coasting(inp),
            FlightPhase::Apogee => self.check_apogee(inp),
            FlightPhase::Drogue => self.check_drogue(inp),
            FlightPhase::Main => self.check_main(inp),
            FlightPhase::Touchdown | FlightPhase::Invalid => None,
        };

        next.map(|(to, event)| {
            let from = self.phase;
            self.enter(to);
            Transition { from, to, event }
        })
    }

    fn enter(&mut self, to: FlightPhase) {
        self.phase = to;
        self.ticks_in_phase = 0;
        self.liftoff_ticks = 0;
        self.burnout_ticks = 0;
        self.apogee_v_ticks = 0;
        self.apogee_h_ticks = 0;
        self.touchdown_ticks = 0;
        if to == FlightPhase::Thrusting {
            self.mach_ticks =
                (self.settings.mach_timer_ms as u64 * self.control_freq as u64 / 1000) as u32;
        }
    }

    fn check_calibrating(&mut self, still: bool) -> Option<(FlightPhase, Option<Event>)> {
        if self.ticks_in_phase < CALIB_MIN_TICKS {
            return None;
        }
        if !still {
            return Some((FlightPhase::Moving, Some(Event::Calibrate)));
        }
        if self.pressure_stable_ticks >= READY_WINDOW_TICKS && self.still_ticks >= READY_WINDOW_TICKS {
            return Some((FlightPhase::Ready, Some(Event::Ready)));
        }
        None
    }

    fn check_moving(&mut self) -> Option<(FlightPhase, Option<Event>)> {
        (self.still_ticks >= READY_WINDOW_TICKS).then_some((FlightPhase::Ready, Some(Event::Ready)))
    }

    fn check_ready(&mut self, acc_norm: f32) -> Option<(FlightPhase, Option<Event>)> {
        if acc_norm > self.settings.liftoff_acc_threshold {
            self.liftoff_ticks += 1;
            if self.liftoff_ticks >= LIFTOFF_TICKS {
                return Some((FlightPhase::Thrusting, Some(Event::Liftoff)));
            }
        } else {
            self.liftoff_ticks = 0;
        }
        // Sustained low-level motion un-arms; anything over the liftoff
        // threshold is a liftoff candidate, not handling.
        if self.motion_ticks >= MOTION_TICKS && acc_norm < self.settings.liftoff_acc_threshold {
            return Some((FlightPhase::Moving, Some(Event::Calibrate)));
        }
        None
    }

    fn check_thrusting(&mut self, inp: &FsmInputs) -> Option<(FlightPhase, Option<Event>)> {
        if inp.filtered.filtered_acc < BURNOUT_ACC {
            self.burnout_ticks += 1;
            if self.burnout_ticks >= BURNOUT_TICKS {
                return Some((FlightPhase::Coasting, Some(Event::MaxV)));
            }
        } else {
            self.burnout_ticks = 0;
        }
        None
    }

    fn check_coasting(&mut self, inp: &FsmInputs) -> Option<(FlightPhase, Option<Event>)> {
        // The mach gate suppresses the pressure-driven apogee signals while
        // transonic shock can corrupt the baros.
        if self.mach_ticks > 0 {
            self.last_height = inp.fused.height;
            return None;
        }
        if inp.fused.velocity <= 0.0 {
            self.apogee_v_ticks += 1;
        } else {
            self.apogee_v_ticks = 0;
        }
        if inp.fused.height < self.last_height {
            self.apogee_h_ticks += 1;
        } else {
            self.apogee_h_ticks = 0;
        }
        self.last_height = inp.fused.height;

        (self.apogee_v_ticks >= APOGEE_TICKS || self.apogee_h_ticks >= APOGEE_TICKS)
            .then_some((FlightPhase::Apogee, Some(Event::Apogee)))
    }

    fn check_apogee(&mut self, _inp: &FsmInputs) -> Option<(FlightPhase, Option<Event>)> {
        // The drogue settles for MAIN_DEPLOY_DELAY before the main-altitude
        // gate becomes meaningful; the altitude condition itself lives in
        // the DROGUE → MAIN check.
        (self.ticks_in_phase >= MAIN_DEPLOY_DELAY_TICKS).then_some((FlightPhase::Drogue, None))
    }

    fn check_drogue(&mut self, inp: &FsmInputs) -> Option<(FlightPhase, Option<Event>)> {
        (self.settings.main_altitude <= 0.0 || inp.fused.height < self.settings.main_altitude)
            .then_some((FlightPhase::Main, Some(Event::MainDeploy)))
    }

    fn check_main(&mut self, inp: &FsmInputs) -> Option<(FlightPhase, Option<Event>)> {
        if inp.fused.velocity.abs() < TOUCHDOWN_VELOCITY {
            self.touchdown_ticks += 1;
        } else {
            self.touchdown_ticks = 0;
        }
        (self.touchdown_ticks >= TOUCHDOWN_TICKS)
            .then_some((FlightPhase::Touchdown, Some(Event::Touchdown)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: u32 = 100;

    fn still_imu() -> ImuSample {
        ImuSample { ts: 0, acc: [0, 0, 1024], gyro: [0, 0, 0] }
    }

    fn moving_imu() -> ImuSample {
        ImuSample { ts: 0, acc: [0, 0, 1024], gyro: [900, 900, 900] }
    }

    fn boosting_imu() -> ImuSample {
        ImuSample { ts: 0, acc: [0, 0, 10 * 1024], gyro: [0, 0, 0] }
    }

    fn inputs<'a>(
        imu: &'a ImuSample,
        fused: &'a FusedState,
        filtered: &'a FilteredData,
    ) -> FsmInputs<'a> {
        FsmInputs { raw_imu: imu, fused, filtered }
    }

    fn run(fsm: &mut FlightFsm, imu: ImuSample, fused: FusedState, filtered: FilteredData, n: u32) -> Option<Transition> {
        let mut last = None;
        for _ in 0..n {
            if let Some(t) = fsm.step(&inputs(&imu, &fused, &filtered)) {
                last = Some(t);
            }
        }
        last
    }

    fn fsm() -> FlightFsm {
        FlightFsm::new(FsmSettings { main_altitude: 150.0, ..Default::default() }, FREQ)
    }

    /// Drives a fresh FSM to READY.
    fn ready_fsm() -> FlightFsm {
        let mut f = fsm();
        run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), CALIB_MIN_TICKS + READY_WINDOW_TICKS + 1);
        assert_eq!(f.phase(), FlightPhase::Ready);
        f
    }

    #[test]
    fn calibrating_goes_moving_on_motion() {
        let mut f = fsm();
        // Under the minimum calibration time nothing happens.
        assert!(run(&mut f, moving_imu(), FusedState::default(), FilteredData::default(), CALIB_MIN_TICKS - 1).is_none());
        let t = run(&mut f, moving_imu(), FusedState::default(), FilteredData::default(), 2).unwrap();
        assert_eq!(t.to, FlightPhase::Moving);
        assert_eq!(t.event, Some(Event::Calibrate));
    }

    #[test]
    fn calibrating_goes_ready_when_still_and_stable() {
        let mut f = fsm();
        let t = run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), CALIB_MIN_TICKS + READY_WINDOW_TICKS + 1).unwrap();
        assert_eq!(t.to, FlightPhase::Ready);
        assert_eq!(t.event, Some(Event::Ready));
    }

    #[test]
    fn ready_regresses_to_moving_on_motion() {
        let mut f = ready_fsm();
        let t = run(&mut f, moving_imu(), FusedState::default(), FilteredData::default(), MOTION_TICKS + 1).unwrap();
        assert_eq!(t.to, FlightPhase::Moving);
        // And back to READY once still again.
        let t = run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), READY_WINDOW_TICKS + 1).unwrap();
        assert_eq!(t.to, FlightPhase::Ready);
    }

    #[test]
    fn liftoff_needs_consecutive_ticks() {
        let mut f = ready_fsm();
        assert!(run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS - 1).is_none());
        // One still tick resets the detector.
        run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), 1);
        assert!(run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS - 1).is_none());
        let t = run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), 1).unwrap();
        assert_eq!(t.to, FlightPhase::Thrusting);
        assert_eq!(t.event, Some(Event::Liftoff));
    }

    #[test]
    fn full_flight_sequence() {
        let mut f = ready_fsm();
        run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS);
        assert_eq!(f.phase(), FlightPhase::Thrusting);

        // Burnout: negative filtered acceleration.
        let coasting = FilteredData { filtered_acc: -9.8, ..Default::default() };
        let up = FusedState { velocity: 100.0, height: 500.0, ..Default::default() };
        let t = run(&mut f, still_imu(), up, coasting, BURNOUT_TICKS).unwrap();
        assert_eq!(t.to, FlightPhase::Coasting);
        assert_eq!(t.event, Some(Event::MaxV));

        // Apogee: velocity crosses zero.
        let at_apogee = FusedState { velocity: -0.5, height: 1500.0, ..Default::default() };
        let t = run(&mut f, still_imu(), at_apogee, coasting, APOGEE_TICKS).unwrap();
        assert_eq!(t.to, FlightPhase::Apogee);
        assert_eq!(t.event, Some(Event::Apogee));

        // Drogue after the deployment delay.
        let t = run(&mut f, still_imu(), at_apogee, coasting, MAIN_DEPLOY_DELAY_TICKS).unwrap();
        assert_eq!(t.to, FlightPhase::Drogue);
        assert_eq!(t.event, None);

        // Still above the main altitude: no transition.
        let descending = FusedState { velocity: -25.0, height: 800.0, ..Default::default() };
        assert!(run(&mut f, still_imu(), descending, coasting, 100).is_none());

        // Below the main altitude.
        let low = FusedState { velocity: -20.0, height: 120.0, ..Default::default() };
        let t = run(&mut f, still_imu(), low, coasting, 1).unwrap();
        assert_eq!(t.to, FlightPhase::Main);
        assert_eq!(t.event, Some(Event::MainDeploy));

        // Touchdown.
        let landed = FusedState { velocity: 0.1, height: 2.0, ..Default::default() };
        let t = run(&mut f, still_imu(), landed, coasting, TOUCHDOWN_TICKS).unwrap();
        assert_eq!(t.to, FlightPhase::Touchdown);
        assert_eq!(t.event, Some(Event::Touchdown));

        // Terminal: nothing moves the FSM anymore.
        assert!(run(&mut f, boosting_imu(), landed, coasting, 1000).is_none());
    }

    #[test]
    fn no_regression_past_thrusting() {
        let mut f = ready_fsm();
        run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS);
        assert_eq!(f.phase(), FlightPhase::Thrusting);
        // Stillness that would have sent READY back to MOVING does nothing now.
        assert!(run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), 1000).is_none());
        assert_eq!(f.phase(), FlightPhase::Thrusting);
    }

    #[test]
    fn mach_gate_delays_apogee_detection() {
        let mut f = FlightFsm::new(
            FsmSettings { mach_timer_ms: 1000, main_altitude: 150.0, ..Default::default() },
            FREQ,
        );
        run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), CALIB_MIN_TICKS + READY_WINDOW_TICKS + 1);
        run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS);
        let coasting = FilteredData { filtered_acc: -9.8, ..Default::default() };
        run(&mut f, still_imu(), FusedState::default(), coasting, BURNOUT_TICKS);
        assert_eq!(f.phase(), FlightPhase::Coasting);

        // Falling velocity right away, but the gate holds for ~1 s minus the
        // ticks already spent thrusting.
        let falling = FusedState { velocity: -1.0, height: 900.0, ..Default::default() };
        assert!(run(&mut f, still_imu(), falling, coasting, 50).is_none());
        let t = run(&mut f, still_imu(), falling, coasting, 50 + APOGEE_TICKS).unwrap();
        assert_eq!(t.to, FlightPhase::Apogee);
    }

    #[test]
    fn unset_main_altitude_passes_drogue_through() {
        let mut f = FlightFsm::new(FsmSettings::default(), FREQ);
        run(&mut f, still_imu(), FusedState::default(), FilteredData::default(), CALIB_MIN_TICKS + READY_WINDOW_TICKS + 1);
        run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS);
        let coasting = FilteredData { filtered_acc: -9.8, ..Default::default() };
        run(&mut f, still_imu(), FusedState::default(), coasting, BURNOUT_TICKS);
        let falling = FusedState { velocity: -1.0, height: 2000.0, ..Default::default() };
        run(&mut f, still_imu(), falling, coasting, APOGEE_TICKS + MAIN_DEPLOY_DELAY_TICKS);
        assert_eq!(f.phase(), FlightPhase::Drogue);
        let t = run(&mut f, still_imu(), falling, coasting, 1).unwrap();
        assert_eq!(t.to, FlightPhase::Main);
    }

    #[test]
    fn stats_track_flight_extremes() {
        let mut f = ready_fsm();
        run(&mut f, boosting_imu(), FusedState::default(), FilteredData::default(), LIFTOFF_TICKS);
        assert_eq!(f.phase(), FlightPhase::Thrusting);

        // Powered ascent: acceleration and velocity build up.
        run(&mut f, boosting_imu(), FusedState { velocity: 180.0, height: 400.0, acceleration: 88.0, ..Default::default() }, FilteredData::default(), 20);
        let coasting = FilteredData { filtered_acc: -9.8, ..Default::default() };
        run(&mut f, still_imu(), FusedState { velocity: 170.0, height: 900.0, acceleration: -9.0, ..Default::default() }, coasting, BURNOUT_TICKS);
        run(&mut f, still_imu(), FusedState { velocity: -0.5, height: 1700.0, ..Default::default() }, coasting, APOGEE_TICKS);

        let s = f.stats();
        assert_eq!(s.max_velocity, 180.0);
        assert_eq!(s.max_height, 1700.0);
        assert_eq!(s.max_acceleration, 88.0);
    }
}
