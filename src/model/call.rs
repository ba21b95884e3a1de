use serde::{Deserialize, Serialize};

use crate::model::{Id, Info};

/// Phasing of a call: absent, a single phaseset shared by the whole genotype, or one
/// phaseset per genotype entry (graph-capable deployments only).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Phaseset {
    #[default]
    Absent,
    Scalar(String),
    Sequence(Vec<String>),
}

impl Phaseset {
    pub fn is_absent(&self) -> bool {
        matches!(self, Phaseset::Absent)
    }

    /// Phaseset token for genotype position `index`, if one exists.
    pub fn token_at(&self, index: usize) -> Option<&str> {
        match self {
            Phaseset::Absent => None,
            Phaseset::Scalar(token) => Some(token),
            Phaseset::Sequence(tokens) => tokens.get(index).map(String::as_str),
        }
    }
}

/// Classic genotype determination for one (call set, variant) pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_set_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_set_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Id>,
    /// 0 for the reference allele, `i` for the `i`-th alternate.
    #[serde(default)]
    pub genotype: Vec<i32>,
    #[serde(default)]
    pub phaseset: Phaseset,
    #[serde(default)]
    pub genotype_likelihood: Vec<f64>,
    #[serde(default)]
    pub info: Info,
}

impl Call {
    pub fn new(call_set_id: impl Into<Id>, variant_id: impl Into<Id>, genotype: Vec<i32>) -> Self {
        Self {
            call_set_id: Some(call_set_id.into()),
            variant_id: Some(variant_id.into()),
            genotype,
            ..Self::default()
        }
    }

    pub fn with_phaseset(mut self, phaseset: Phaseset) -> Self {
        self.phaseset = phaseset;
        self
    }

    /// Copy of the call with its call set identifiers removed.
    pub fn anonymized(&self) -> Self {
        Self {
            call_set_id: None,
            call_set_name: None,
            ..self.clone()
        }
    }
}

/// Graph-model copy-number determination for one (call set, allele[, variant]) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlleleCall {
    pub call_set_id: Id,
    pub allele_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Id>,
    pub total_copies: u32,
    /// One token per phased copy; never longer than `total_copies`.
    #[serde(default)]
    pub phaseset: Vec<String>,
    #[serde(default)]
    pub info: Info,
}

impl AlleleCall {
    pub fn new(
        call_set_id: impl Into<Id>,
        allele_id: impl Into<Id>,
        variant_id: Option<&str>,
        total_copies: u32,
    ) -> Self {
        Self {
            call_set_id: call_set_id.into(),
            allele_id: allele_id.into(),
            variant_id: variant_id.map(str::to_string),
            total_copies,
            phaseset: Vec::new(),
            info: Info::new(),
        }
    }

    pub fn with_phaseset(mut self, phaseset: Vec<&str>) -> Self {
        self.phaseset = phaseset.into_iter().map(str::to_string).collect();
        self
    }

    pub fn key(&self) -> AlleleCallKey {
        AlleleCallKey {
            call_set_id: self.call_set_id.clone(),
            allele_id: self.allele_id.clone(),
            variant_id: self.variant_id.clone(),
        }
    }
}

/// Identity of an allele call; at most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlleleCallKey {
    pub call_set_id: Id,
    pub allele_id: Id,
    pub variant_id: Option<Id>,
}

impl std::fmt::Display for AlleleCallKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.call_set_id,
            self.allele_id,
            self.variant_id.as_deref().unwrap_or("-")
        )
    }
}
