//! S-curve motion profiles: phase calculator and precalculated table.

pub mod calc;
pub mod phase;
pub mod table;

pub use calc::{Cruise, JerkTimes, PhasePlan, ProfileError, ProfileShape, calc_phase_data};
pub use phase::{PHASE_COUNT, Phase, PhaseParam};
pub use table::{
    DistanceEntry, DistanceTable, ProfileEntry, ProfileTable, SpeedScale, TimerTiming,
    check_profiles_timing, evaluate_profile,
};
