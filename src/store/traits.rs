use crate::model::{
    Allele, AlleleCall, AlleleCallKey, Call, CallSet, Id, Join, Segment, Sequence, Variant,
    VariantSet,
};
use anyhow::Result;

/// Sequence graph records. Append-only: there are no deletes.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    async fn scan_sequences(&self) -> Result<Vec<Sequence>>;
    async fn scan_segments(&self) -> Result<Vec<Segment>>;
    async fn scan_joins(&self) -> Result<Vec<Join>>;
}

#[async_trait::async_trait]
pub trait AlleleStore: Send + Sync {
    async fn get_allele(&self, id: &Id) -> Result<Option<Allele>>;
    /// Alleles of a variant set, in insertion order
    async fn list_alleles(&self, variant_set_id: &Id) -> Result<Vec<Allele>>;
}

#[async_trait::async_trait]
pub trait VariantSetStore: Send + Sync {
    async fn get_variant_set(&self, id: &Id) -> Result<Option<VariantSet>>;
    async fn list_variant_sets(&self) -> Result<Vec<VariantSet>>;
}

#[async_trait::async_trait]
pub trait VariantStore: Send + Sync {
    /// Variant record; the embedded `calls` are always empty, calls live in [`CallStore`]
    async fn get_variant(&self, id: &Id) -> Result<Option<Variant>>;
    /// Variants of a variant set, in insertion order
    async fn list_variants(&self, variant_set_id: &Id) -> Result<Vec<Variant>>;
    /// Variants of a variant set whose `alleleIds` contain the allele
    async fn variants_referencing_allele(&self, allele_id: &Id) -> Result<Vec<Variant>>;
}

#[async_trait::async_trait]
pub trait CallSetStore: Send + Sync {
    async fn get_call_set(&self, id: &Id) -> Result<Option<CallSet>>;
    /// Call sets belonging to a variant set, in insertion order
    async fn list_call_sets(&self, variant_set_id: &Id) -> Result<Vec<CallSet>>;
}

#[async_trait::async_trait]
pub trait CallStore: Send + Sync {
    async fn get_call(&self, variant_id: &Id, call_set_id: &Id) -> Result<Option<Call>>;
    /// All calls on a variant, in insertion order
    async fn list_calls(&self, variant_id: &Id) -> Result<Vec<Call>>;
}

#[async_trait::async_trait]
pub trait AlleleCallStore: Send + Sync {
    async fn get_allele_call(&self, key: &AlleleCallKey) -> Result<Option<AlleleCall>>;
    /// Allele calls bound to a variant
    async fn list_allele_calls_for_variant(&self, variant_id: &Id) -> Result<Vec<AlleleCall>>;
    /// Allele calls of one call set for one allele, bound or not
    async fn list_allele_calls_for_allele(
        &self,
        call_set_id: &Id,
        allele_id: &Id,
    ) -> Result<Vec<AlleleCall>>;
    /// Every allele call referencing the allele, across call sets
    async fn allele_calls_referencing(&self, allele_id: &Id) -> Result<Vec<AlleleCall>>;
}

/// A single mutation of the record store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutSequence(Sequence),
    PutSegment(Segment),
    PutJoin(Join),
    PutAllele(Allele),
    DeleteAllele(Id),
    PutVariantSet(VariantSet),
    DeleteVariantSet(Id),
    PutVariant(Variant),
    DeleteVariant(Id),
    PutCallSet(CallSet),
    DeleteCallSet(Id),
    PutCall(Call),
    DeleteCalls { variant_id: Id },
    PutAlleleCall(AlleleCall),
    DeleteAlleleCall(AlleleCallKey),
}

/// Mutations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<WriteOp> for WriteBatch {
    fn from(op: WriteOp) -> Self {
        Self { ops: vec![op] }
    }
}

#[async_trait::async_trait]
pub trait BatchStore: Send + Sync {
    /// Apply every operation or none of them
    async fn apply(&self, batch: WriteBatch) -> Result<()>;
}

pub trait Store:
    GraphStore
    + AlleleStore
    + VariantSetStore
    + VariantStore
    + CallSetStore
    + CallStore
    + AlleleCallStore
    + BatchStore
    + Send
    + Sync
{
}

/// Existence checks against the reference set and dataset catalogs.
#[async_trait::async_trait]
pub trait ReferenceCatalog: Send + Sync {
    async fn reference_set_exists(&self, id: &Id) -> Result<bool>;
    async fn dataset_exists(&self, id: &Id) -> Result<bool>;
}
