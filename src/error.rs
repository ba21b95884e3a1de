use std::fmt;

use thiserror::Error;

use crate::model::Id;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Sequence,
    Segment,
    Join,
    Allele,
    Variant,
    VariantSet,
    CallSet,
    Call,
    AlleleCall,
    ReferenceSet,
    Dataset,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Sequence => "sequence",
            RecordKind::Segment => "segment",
            RecordKind::Join => "join",
            RecordKind::Allele => "allele",
            RecordKind::Variant => "variant",
            RecordKind::VariantSet => "variant set",
            RecordKind::CallSet => "call set",
            RecordKind::Call => "call",
            RecordKind::AlleleCall => "allele call",
            RecordKind::ReferenceSet => "reference set",
            RecordKind::Dataset => "dataset",
        };
        f.write_str(name)
    }
}

/// Errors raised by the consistency engine.
///
/// Every variant is recoverable at the request boundary. A failed write leaves the store
/// untouched.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("invalid range [{start}, {end}) on sequence '{sequence_id}' of length {length}")]
    Range {
        sequence_id: Id,
        start: u64,
        end: u64,
        length: u64,
    },

    #[error("invalid bases in sequence '{sequence_id}': {reason}")]
    InvalidSequence { sequence_id: Id, reason: String },

    #[error("path is disconnected between step {index} (segment '{from}') and step {} (segment '{to}')", .index + 1)]
    DisconnectedPath { index: usize, from: Id, to: Id },

    #[error("path revisits segment '{segment_id}' at step {index}: {reason}")]
    CyclicPath {
        segment_id: Id,
        index: usize,
        reason: String,
    },

    #[error("invalid path for allele '{allele_id}': {source}")]
    InvalidPath {
        allele_id: Id,
        #[source]
        source: Box<EngineError>,
    },

    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: RecordKind, id: String },

    #[error("variant '{variant_id}' representations disagree on {field}{}: {reason}", .index.map(|i| format!("[{}]", i)).unwrap_or_default())]
    RepresentationConflict {
        variant_id: Id,
        field: &'static str,
        index: Option<usize>,
        reason: String,
    },

    #[error("call set '{call_set_id}' genotype implies {expected} copies of allele '{allele_id}' on variant '{variant_id}', allele call reports {actual}")]
    GenotypeAlleleMismatch {
        call_set_id: Id,
        variant_id: Id,
        allele_id: Id,
        expected: u32,
        actual: u32,
    },

    #[error("call set '{call_set_id}' has genotype value {value} at position {index} on variant '{variant_id}' with {alternates} alternate alleles")]
    InvalidGenotype {
        call_set_id: Id,
        variant_id: Id,
        index: usize,
        value: i32,
        alternates: usize,
    },

    #[error("invalid phaseset for call set '{call_set_id}': {reason}")]
    InvalidPhaseset { call_set_id: Id, reason: String },

    #[error("call set '{call_set_id}' assigns allele '{allele_id}' to phaseset '{token}' inconsistently: {reason}")]
    PhasesetConflict {
        call_set_id: Id,
        allele_id: Id,
        token: String,
        reason: String,
    },

    #[error("call set '{call_set_id}' has allele calls on variant '{variant_id}' but no call")]
    MissingCall { call_set_id: Id, variant_id: Id },

    #[error("call set '{call_set_id}' has a call on variant '{variant_id}' but no allele call for '{allele_id}'")]
    MissingAlleleCall {
        call_set_id: Id,
        variant_id: Id,
        allele_id: Id,
    },

    #[error("call ordering violated for variant set '{variant_set_id}': {reason}")]
    OrderingViolation { variant_set_id: Id, reason: String },

    #[error("{record} uses the {mode} representation, which this deployment does not declare")]
    UnsupportedMode { record: String, mode: &'static str },

    #[error("invalid {kind} record: {reason}")]
    InvalidRecord { kind: RecordKind, reason: String },

    #[error("allele '{allele_id}' is still referenced by {}", .referenced_by.join(", "))]
    AlleleInUse {
        allele_id: Id,
        referenced_by: Vec<String>,
    },

    #[error("record store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: RecordKind, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn duplicate(kind: RecordKind, id: impl Into<String>) -> Self {
        EngineError::DuplicateId {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(
        variant_id: &str,
        field: &'static str,
        index: Option<usize>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::RepresentationConflict {
            variant_id: variant_id.to_string(),
            field,
            index,
            reason: reason.into(),
        }
    }

    pub fn ordering(variant_set_id: &str, reason: impl Into<String>) -> Self {
        EngineError::OrderingViolation {
            variant_set_id: variant_set_id.to_string(),
            reason: reason.into(),
        }
    }
}
