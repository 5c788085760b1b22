//! Decision engine and timer state machine.

pub mod decision;
pub mod runtime;
pub mod timer;

pub use decision::{decide, Decision, ManualReason, Policy};
pub use runtime::{Engine, EngineEvent, EngineHandle, EngineInput};
pub use timer::{
    Clock, ManualClock, PausedInterval, SystemClock, TimerAction, TimerError, TimerSession,
    TimerSnapshot, TimerState, TimerStateMachine,
};
