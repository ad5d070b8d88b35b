pub mod book;
pub mod state_machine;

pub use book::{AppliedTransition, PositionBook};
pub use state_machine::{admit, transition, PositionEvent, SideEffect, Transition, TransitionLimits};
