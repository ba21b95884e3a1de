use serde::{Deserialize, Serialize};

use crate::model::{Id, Path};

/// A contiguous unit of variation, expressed as a walk through the sequence graph.
///
/// The path is owned by value; paths are not addressable on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allele {
    pub id: Id,
    pub variant_set_id: Id,
    pub path: Path,
}

impl Allele {
    pub fn new(id: impl Into<Id>, variant_set_id: impl Into<Id>, path: Path) -> Self {
        Self {
            id: id.into(),
            variant_set_id: variant_set_id.into(),
            path,
        }
    }
}
