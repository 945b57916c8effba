//! Phase parameter sets and queued parameter-set switches.

use stepper_common::consts::MICROSTEPS_PER_HALFSTEP;
use stepper_common::types::Direction;

use crate::profile::{PHASE_COUNT, Phase, PhaseParam, PhasePlan};
use crate::units::Fx;

/// Parameter sets kept per motor: the active one, a queued successor and a
/// restart set for direction reversals.
pub const SET_COUNT: usize = 3;

/// What ends a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionGoal {
    /// Stop when the nominal position reaches this micro-step position.
    Position { target_micro: i64 },
    /// Run until the set's last phase completes.
    #[default]
    Speed,
}

/// Set started when the current one runs out, in a new direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub set: u8,
    pub direction: Direction,
}

/// Precalculated phase data of one movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseParameterSet {
    pub phases: [PhaseParam; PHASE_COUNT],
    /// Internal micro-steps per step interrupt.
    pub step_width: u32,
    pub direction: Direction,
    /// Lowest speed the step generator may command.
    pub v_floor: Fx,
    pub goal: MotionGoal,
    pub chain: Option<Chain>,
    /// Cruise phase has been cut; the set only decelerates to its end.
    pub stopping: bool,
    /// Position after the last phase, relative to the set start.
    pub end_s: Fx,
}

impl PhaseParameterSet {
    pub fn from_plan(
        plan: &PhasePlan,
        microsteps: u8,
        direction: Direction,
        v_floor: Fx,
        goal: MotionGoal,
    ) -> Self {
        Self {
            phases: plan.phases,
            step_width: MICROSTEPS_PER_HALFSTEP / (microsteps.max(1) as u32),
            direction,
            v_floor,
            goal,
            chain: None,
            stopping: false,
            end_s: plan.end.s,
        }
    }

    #[inline]
    pub fn phase(&self, phase: Phase) -> &PhaseParam {
        &self.phases[phase.index()]
    }

    /// First non-skipped phase at or after `from`.
    pub fn first_active(&self, from: Phase) -> Option<Phase> {
        Phase::ALL[from.index()..]
            .iter()
            .copied()
            .find(|p| !self.phase(*p).is_skipped())
    }

    /// First non-skipped phase after `after`.
    pub fn next_active(&self, after: Phase) -> Option<Phase> {
        after.next().and_then(|p| self.first_active(p))
    }

    #[inline]
    pub fn cruise_speed(&self) -> Fx {
        self.phase(Phase::VelConst).v
    }

    /// Copy that leaves the cruise phase at once and decelerates to its end.
    pub fn to_stop(&self, goal: MotionGoal) -> Self {
        let mut stop = *self;
        stop.phases[Phase::VelConst.index()].dt = Fx::ZERO;
        stop.goal = goal;
        stop.chain = None;
        stop.stopping = true;
        stop
    }

    /// Distance from the start of the deceleration block to the end of the set.
    pub fn stop_distance(&self) -> Fx {
        self.end_s.saturating_sub(self.phase(Phase::DecJerkUp).s)
    }
}

/// Queued handover from the active parameter set to another one.
///
/// Executed by the step generator at the first half-step boundary where the
/// active phase and position match. `new_phase == None` keeps the current
/// phase and its elapsed time, unless the new set skips that phase: the
/// next active phase of the new set is then entered from its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSetSwitch {
    pub old_phase: Option<Phase>,
    pub at_micro: Option<i64>,
    pub new_set: u8,
    pub new_phase: Option<Phase>,
}

impl ParamSetSwitch {
    /// Switch at the next half-step boundary, keeping the phase where the
    /// new set still runs it.
    pub const fn next_halfstep(new_set: u8) -> Self {
        Self { old_phase: None, at_micro: None, new_set, new_phase: None }
    }

    #[inline]
    pub fn is_due(&self, phase: Phase, micro_pos: i64) -> bool {
        self.old_phase.is_none_or(|p| p == phase) && self.at_micro.is_none_or(|m| m == micro_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Cruise, ProfileShape, calc_phase_data};
    use stepper_common::config::MotionProfileConfig;

    fn speed_set() -> PhaseParameterSet {
        let shape = ProfileShape::from_config(&MotionProfileConfig::default()).unwrap();
        let plan = calc_phase_data(Cruise::Infinite, &shape).unwrap();
        PhaseParameterSet::from_plan(&plan, 32, Direction::Cw, shape.v_start, MotionGoal::Speed)
    }

    #[test]
    fn active_phase_walk_skips_empty_phases() {
        let set = speed_set();
        assert_eq!(set.step_width, 2);
        assert_eq!(set.first_active(Phase::Start), Some(Phase::Start));
        assert_eq!(set.next_active(Phase::AccJerkDown), Some(Phase::VelConst));

        let stop = set.to_stop(MotionGoal::Speed);
        assert!(stop.stopping);
        assert_eq!(stop.next_active(Phase::AccJerkDown), Some(Phase::DecJerkUp));
        assert_eq!(stop.next_active(Phase::End), None);
    }

    #[test]
    fn stop_distance_covers_deceleration_and_run_down() {
        let set = speed_set();
        let d = set.stop_distance().to_num::<f64>();
        // One ramp 2000 -> 100 (~4042) plus the run-down half-step.
        assert!(d > 4000.0 && d < 4100.0, "d = {d}");
    }

    #[test]
    fn switch_trigger() {
        let sw = ParamSetSwitch::next_halfstep(1);
        assert!(sw.is_due(Phase::AccConst, 123));

        let sw = ParamSetSwitch {
            old_phase: Some(Phase::VelConst),
            at_micro: Some(640),
            new_set: 2,
            new_phase: None,
        };
        assert!(!sw.is_due(Phase::AccConst, 640));
        assert!(!sw.is_due(Phase::VelConst, 704));
        assert!(sw.is_due(Phase::VelConst, 640));
    }
}
