use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Call, Id, Info};

/// Container equivalent to one VCF file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSet {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dataset_id: Id,
    pub reference_set_id: Id,
    #[serde(default)]
    pub metadata: Vec<VariantSetMetadata>,
}

impl VariantSet {
    pub fn new(id: impl Into<Id>, dataset_id: impl Into<Id>, reference_set_id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            name: None,
            dataset_id: dataset_id.into(),
            reference_set_id: reference_set_id.into(),
            metadata: Vec::new(),
        }
    }

    /// Adds metadata entries, skipping any whose (id, key) is already present.
    ///
    /// Returns the number of entries added.
    pub fn merge_metadata(&mut self, entries: Vec<VariantSetMetadata>) -> usize {
        let mut added = 0;
        for entry in entries {
            if !self.metadata.iter().any(|m| m.same_entry(&entry)) {
                self.metadata.push(entry);
                added += 1;
            }
        }
        added
    }
}

/// One header line of descriptive metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSetMetadata {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub info: Info,
}

impl VariantSetMetadata {
    pub fn new(id: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Two entries with identical (id, key) describe the same header line.
    pub fn same_entry(&self, other: &VariantSetMetadata) -> bool {
        self.id == other.id && self.key == other.key
    }
}

/// Per-sample call collection, analogous to a VCF column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSet {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub sample_id: Id,
    #[serde(default)]
    pub variant_set_ids: Vec<Id>,
    #[serde(default)]
    pub info: Info,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl CallSet {
    pub fn new(id: impl Into<Id>, sample_id: impl Into<Id>, variant_set_ids: Vec<Id>) -> Self {
        Self {
            id: id.into(),
            name: None,
            sample_id: sample_id.into(),
            variant_set_ids,
            info: Info::new(),
            created: None,
            updated: None,
        }
    }

    pub fn belongs_to(&self, variant_set_id: &str) -> bool {
        self.variant_set_ids.iter().any(|id| id == variant_set_id)
    }
}

/// A classic-model change against a reference, optionally also described by alleles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: Id,
    pub variant_set_id: Id,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_name: Option<String>,
    /// 0-based, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// 0-based, exclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_bases: Option<String>,
    #[serde(default)]
    pub alternate_bases: Vec<String>,
    /// Reference allele first, then one id per alternate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allele_ids: Option<Vec<Id>>,
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub calls: Vec<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// The flat (VCF-like) description of a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatDescription {
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
}

/// How much of the flat description a variant carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatState {
    Absent,
    Complete(FlatDescription),
    /// Some flat fields are set but the named one is missing.
    Partial(&'static str),
}

impl Variant {
    /// Flat-only variant.
    pub fn flat(
        id: impl Into<Id>,
        variant_set_id: impl Into<Id>,
        reference_name: impl Into<String>,
        start: u64,
        reference_bases: &str,
        alternate_bases: Vec<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            variant_set_id: variant_set_id.into(),
            reference_name: Some(reference_name.into()),
            start: Some(start),
            end: Some(start + reference_bases.len() as u64),
            reference_bases: Some(reference_bases.to_string()),
            alternate_bases: alternate_bases.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    /// Graph-only variant.
    pub fn graph(id: impl Into<Id>, variant_set_id: impl Into<Id>, allele_ids: Vec<&str>) -> Self {
        Self {
            id: id.into(),
            variant_set_id: variant_set_id.into(),
            allele_ids: Some(allele_ids.into_iter().map(str::to_string).collect()),
            ..Self::default()
        }
    }

    pub fn with_allele_ids(mut self, allele_ids: Vec<&str>) -> Self {
        self.allele_ids = Some(allele_ids.into_iter().map(str::to_string).collect());
        self
    }

    pub fn has_alleles(&self) -> bool {
        self.allele_ids.is_some()
    }

    pub fn is_flat_absent(&self) -> bool {
        matches!(self.flat_state(), FlatState::Absent)
    }

    pub fn flat_state(&self) -> FlatState {
        let any_set = self.reference_name.is_some()
            || self.start.is_some()
            || self.end.is_some()
            || self.reference_bases.is_some()
            || !self.alternate_bases.is_empty();
        if !any_set {
            return FlatState::Absent;
        }
        let (reference_name, start, end, reference_bases) = match (
            &self.reference_name,
            self.start,
            self.end,
            &self.reference_bases,
        ) {
            (None, ..) => return FlatState::Partial("referenceName"),
            (_, None, ..) => return FlatState::Partial("start"),
            (_, _, None, _) => return FlatState::Partial("end"),
            (_, _, _, None) => return FlatState::Partial("referenceBases"),
            (Some(name), Some(start), Some(end), Some(bases)) => (name, start, end, bases),
        };
        FlatState::Complete(FlatDescription {
            reference_name: reference_name.clone(),
            start,
            end,
            reference_bases: reference_bases.clone(),
            alternate_bases: self.alternate_bases.clone(),
        })
    }

    pub fn apply_flat(&mut self, flat: FlatDescription) {
        self.reference_name = Some(flat.reference_name);
        self.start = Some(flat.start);
        self.end = Some(flat.end);
        self.reference_bases = Some(flat.reference_bases);
        self.alternate_bases = flat.alternate_bases;
    }

    /// Number of alternate alleles, from whichever description is present.
    pub fn alternate_count(&self) -> usize {
        match &self.allele_ids {
            Some(ids) => ids.len().saturating_sub(1),
            None => self.alternate_bases.len(),
        }
    }

    /// The variant record without its embedded calls.
    pub fn without_calls(&self) -> Self {
        Self {
            calls: Vec::new(),
            ..self.clone()
        }
    }
}
