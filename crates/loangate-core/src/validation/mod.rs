//! Transition validation.
//!
//! - `sync`: pure predicate evaluation against a `RecordSnapshot`
//! - `async_check`: checks needing a fresh read, with timeout and fail-open

pub mod async_check;
pub mod sync;

pub use async_check::{AsyncValidator, CheckOutcome};
pub use sync::evaluate;
