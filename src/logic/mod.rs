pub mod allele_registry;
pub mod call_check;
pub mod engine;
pub mod ordering;
pub mod path_resolver;
pub mod reconcile;

pub use allele_registry::*;
pub use engine::*;
pub use ordering::*;
pub use path_resolver::*;
pub use reconcile::{flatten, plan_lift, reconcile, LiftPlan, Span};
