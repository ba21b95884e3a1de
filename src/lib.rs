//! Consistency engine for genomic variation stored in two models at once: flat VCF-like
//! variants and calls, and alleles defined as paths through a shared sequence graph.

pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

pub use config::{AppConfig, EngineConfig, ServerModes};
pub use error::{EngineError, RecordKind, Result};

pub use logic::{
    AlleleRegistry, CallIdentity, CallSetPage, ConsistencyEngine, GraphElement, OrderingManager,
    OrderingPin, PathResolver, Registration, TraversalOptions,
};

// Export all model types
pub use model::*;

pub use seed::{replay, AuditReport, Snapshot};

// Export store types
pub use store::{MemoryCatalog, MemoryStore, ReferenceCatalog, SequenceGraph, Store};
