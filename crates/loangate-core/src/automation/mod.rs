//! Automation matching and dispatch.

pub mod dispatcher;
pub mod matcher;

pub use dispatcher::AutomationDispatcher;
pub use matcher::{match_automations, AutomationMatcher};
