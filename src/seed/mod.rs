pub mod demo;
pub mod snapshot;

pub use demo::demo_snapshot;
pub use snapshot::*;
