//! Rule registry and its catalogue.

pub mod catalog;
pub mod registry;

pub use catalog::RuleCatalog;
pub use registry::RuleRegistry;
