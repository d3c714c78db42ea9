//! Confirmation coordinator and its state machine.

pub mod engine;
pub mod state;

pub use engine::{CancelOutcome, ConfirmationCoordinator, CoordinatorStores};
pub use state::{TransitionEvent, TransitionState};
