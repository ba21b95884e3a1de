pub mod allele;
pub mod call;
pub mod common;
pub mod graph;
pub mod variant;

pub use allele::*;
pub use call::*;
pub use common::*;
pub use graph::*;
pub use variant::*;
