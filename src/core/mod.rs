//! Core scaling logic: stage planning, confirmation facts, event
//! reconciliation and the controller state machine.

pub mod controller;
pub mod facts;
pub mod planner;
pub mod reconciler;
pub mod redundancy;
pub mod signal;

pub use controller::{ControllerState, ScalingController};
pub use facts::ConfirmationFacts;
pub use planner::{build_stage_schedule, StageSchedule};
pub use reconciler::{CycleSide, EventReconciler};
pub use redundancy::RedundancyGuard;
pub use signal::{evaluate_recovery, CandleRecovery, FixedSide, SignalSource};
