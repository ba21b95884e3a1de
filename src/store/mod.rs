pub mod memory;
pub mod sequence_graph;
pub mod traits;

pub use memory::*;
pub use sequence_graph::*;
pub use traits::*;
