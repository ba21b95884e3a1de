use anyhow::Result;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::model::{
    Allele, AlleleCall, AlleleCallKey, Call, CallSet, Id, Join, Segment, Sequence, Variant,
    VariantSet,
};
use crate::store::traits::{
    AlleleCallStore, AlleleStore, BatchStore, CallSetStore, CallStore, GraphStore,
    ReferenceCatalog, Store, VariantSetStore, VariantStore, WriteBatch, WriteOp,
};

/// Rows remember their first insertion so listings are stable across overwrites.
#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    value: T,
}

#[derive(Debug)]
struct Table<K, T> {
    rows: HashMap<K, Row<T>>,
}

impl<K: std::hash::Hash + Eq, T: Clone> Table<K, T> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<T> {
        self.rows.get(key).map(|row| row.value.clone())
    }

    fn put(&mut self, key: K, value: T, seq: u64) {
        match self.rows.get_mut(&key) {
            Some(row) => row.value = value,
            None => {
                self.rows.insert(key, Row { seq, value });
            }
        }
    }

    fn remove(&mut self, key: &K) {
        self.rows.remove(key);
    }

    fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.rows.retain(|_, row| keep(&row.value));
    }

    /// Values matching the predicate, in insertion order
    fn select(&self, mut wanted: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut rows: Vec<&Row<T>> = self.rows.values().filter(|row| wanted(&row.value)).collect();
        rows.sort_by_key(|row| row.seq);
        rows.into_iter().map(|row| row.value.clone()).collect()
    }
}

#[derive(Debug)]
struct Tables {
    next_seq: u64,
    sequences: Table<Id, Sequence>,
    segments: Table<Id, Segment>,
    joins: Table<Join, Join>,
    alleles: Table<Id, Allele>,
    variant_sets: Table<Id, VariantSet>,
    variants: Table<Id, Variant>,
    call_sets: Table<Id, CallSet>,
    calls: Table<(Id, Id), Call>,
    allele_calls: Table<AlleleCallKey, AlleleCall>,
}

impl Tables {
    fn new() -> Self {
        Self {
            next_seq: 0,
            sequences: Table::new(),
            segments: Table::new(),
            joins: Table::new(),
            alleles: Table::new(),
            variant_sets: Table::new(),
            variants: Table::new(),
            call_sets: Table::new(),
            calls: Table::new(),
            allele_calls: Table::new(),
        }
    }

    fn apply(&mut self, op: WriteOp) -> Result<()> {
        self.next_seq += 1;
        let seq = self.next_seq;
        match op {
            WriteOp::PutSequence(sequence) => self.sequences.put(sequence.id.clone(), sequence, seq),
            WriteOp::PutSegment(segment) => self.segments.put(segment.id.clone(), segment, seq),
            WriteOp::PutJoin(join) => self.joins.put(join.clone(), join, seq),
            WriteOp::PutAllele(allele) => self.alleles.put(allele.id.clone(), allele, seq),
            WriteOp::DeleteAllele(id) => self.alleles.remove(&id),
            WriteOp::PutVariantSet(set) => self.variant_sets.put(set.id.clone(), set, seq),
            WriteOp::DeleteVariantSet(id) => self.variant_sets.remove(&id),
            WriteOp::PutVariant(variant) => {
                let variant = variant.without_calls();
                self.variants.put(variant.id.clone(), variant, seq)
            }
            WriteOp::DeleteVariant(id) => self.variants.remove(&id),
            WriteOp::PutCallSet(call_set) => self.call_sets.put(call_set.id.clone(), call_set, seq),
            WriteOp::DeleteCallSet(id) => self.call_sets.remove(&id),
            WriteOp::PutCall(call) => {
                let (Some(variant_id), Some(call_set_id)) =
                    (call.variant_id.clone(), call.call_set_id.clone())
                else {
                    anyhow::bail!("calls are stored by (variantId, callSetId)");
                };
                self.calls.put((variant_id, call_set_id), call, seq)
            }
            WriteOp::DeleteCalls { variant_id } => self
                .calls
                .retain(|call| call.variant_id.as_deref() != Some(variant_id.as_str())),
            WriteOp::PutAlleleCall(allele_call) => {
                self.allele_calls.put(allele_call.key(), allele_call, seq)
            }
            WriteOp::DeleteAlleleCall(key) => self.allele_calls.remove(&key),
        }
        Ok(())
    }
}

/// In-memory record store.
///
/// Batches are checked for storability before any of them is applied, so a failed batch
/// leaves every table untouched.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GraphStore for MemoryStore {
    async fn scan_sequences(&self) -> Result<Vec<Sequence>> {
        Ok(self.tables.read().sequences.select(|_| true))
    }

    async fn scan_segments(&self) -> Result<Vec<Segment>> {
        Ok(self.tables.read().segments.select(|_| true))
    }

    async fn scan_joins(&self) -> Result<Vec<Join>> {
        Ok(self.tables.read().joins.select(|_| true))
    }
}

#[async_trait::async_trait]
impl AlleleStore for MemoryStore {
    async fn get_allele(&self, id: &Id) -> Result<Option<Allele>> {
        Ok(self.tables.read().alleles.get(id))
    }

    async fn list_alleles(&self, variant_set_id: &Id) -> Result<Vec<Allele>> {
        Ok(self
            .tables
            .read()
            .alleles
            .select(|allele| &allele.variant_set_id == variant_set_id))
    }
}

#[async_trait::async_trait]
impl VariantSetStore for MemoryStore {
    async fn get_variant_set(&self, id: &Id) -> Result<Option<VariantSet>> {
        Ok(self.tables.read().variant_sets.get(id))
    }

    async fn list_variant_sets(&self) -> Result<Vec<VariantSet>> {
        Ok(self.tables.read().variant_sets.select(|_| true))
    }
}

#[async_trait::async_trait]
impl VariantStore for MemoryStore {
    async fn get_variant(&self, id: &Id) -> Result<Option<Variant>> {
        Ok(self.tables.read().variants.get(id))
    }

    async fn list_variants(&self, variant_set_id: &Id) -> Result<Vec<Variant>> {
        Ok(self
            .tables
            .read()
            .variants
            .select(|variant| &variant.variant_set_id == variant_set_id))
    }

    async fn variants_referencing_allele(&self, allele_id: &Id) -> Result<Vec<Variant>> {
        Ok(self.tables.read().variants.select(|variant| {
            variant
                .allele_ids
                .as_ref()
                .is_some_and(|ids| ids.contains(allele_id))
        }))
    }
}

#[async_trait::async_trait]
impl CallSetStore for MemoryStore {
    async fn get_call_set(&self, id: &Id) -> Result<Option<CallSet>> {
        Ok(self.tables.read().call_sets.get(id))
    }

    async fn list_call_sets(&self, variant_set_id: &Id) -> Result<Vec<CallSet>> {
        Ok(self
            .tables
            .read()
            .call_sets
            .select(|call_set| call_set.belongs_to(variant_set_id)))
    }
}

#[async_trait::async_trait]
impl CallStore for MemoryStore {
    async fn get_call(&self, variant_id: &Id, call_set_id: &Id) -> Result<Option<Call>> {
        Ok(self
            .tables
            .read()
            .calls
            .get(&(variant_id.clone(), call_set_id.clone())))
    }

    async fn list_calls(&self, variant_id: &Id) -> Result<Vec<Call>> {
        Ok(self
            .tables
            .read()
            .calls
            .select(|call| call.variant_id.as_ref() == Some(variant_id)))
    }
}

#[async_trait::async_trait]
impl AlleleCallStore for MemoryStore {
    async fn get_allele_call(&self, key: &AlleleCallKey) -> Result<Option<AlleleCall>> {
        Ok(self.tables.read().allele_calls.get(key))
    }

    async fn list_allele_calls_for_variant(&self, variant_id: &Id) -> Result<Vec<AlleleCall>> {
        Ok(self
            .tables
            .read()
            .allele_calls
            .select(|call| call.variant_id.as_ref() == Some(variant_id)))
    }

    async fn list_allele_calls_for_allele(
        &self,
        call_set_id: &Id,
        allele_id: &Id,
    ) -> Result<Vec<AlleleCall>> {
        Ok(self
            .tables
            .read()
            .allele_calls
            .select(|call| &call.call_set_id == call_set_id && &call.allele_id == allele_id))
    }

    async fn allele_calls_referencing(&self, allele_id: &Id) -> Result<Vec<AlleleCall>> {
        Ok(self
            .tables
            .read()
            .allele_calls
            .select(|call| &call.allele_id == allele_id))
    }
}

#[async_trait::async_trait]
impl BatchStore for MemoryStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        for op in &batch.ops {
            if let WriteOp::PutCall(call) = op {
                if call.variant_id.is_none() || call.call_set_id.is_none() {
                    anyhow::bail!("calls are stored by (variantId, callSetId)");
                }
            }
        }
        let mut tables = self.tables.write();
        for op in batch.ops {
            tables.apply(op)?;
        }
        Ok(())
    }
}

impl Store for MemoryStore {}

/// Catalog backed by fixed id lists.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    reference_sets: HashSet<Id>,
    datasets: HashSet<Id>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference_set(mut self, id: impl Into<Id>) -> Self {
        self.reference_sets.insert(id.into());
        self
    }

    pub fn with_dataset(mut self, id: impl Into<Id>) -> Self {
        self.datasets.insert(id.into());
        self
    }
}

#[async_trait::async_trait]
impl ReferenceCatalog for MemoryCatalog {
    async fn reference_set_exists(&self, id: &Id) -> Result<bool> {
        Ok(self.reference_sets.contains(id))
    }

    async fn dataset_exists(&self, id: &Id) -> Result<bool> {
        Ok(self.datasets.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_keeps_insertion_order_across_overwrites() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutCallSet(CallSet::new("cs2", "s2", vec!["vs1".to_string()])))
            .push(WriteOp::PutCallSet(CallSet::new("cs1", "s1", vec!["vs1".to_string()])))
            .push(WriteOp::PutCallSet(CallSet::new("cs3", "s3", vec!["vs2".to_string()])));
        store.apply(batch).await.unwrap();

        let mut renamed = CallSet::new("cs2", "s2", vec!["vs1".to_string()]);
        renamed.name = Some("renamed".to_string());
        store.apply(WriteOp::PutCallSet(renamed).into()).await.unwrap();

        let ids: Vec<Id> = store
            .list_call_sets(&"vs1".to_string())
            .await
            .unwrap()
            .into_iter()
            .map(|cs| cs.id)
            .collect();
        assert_eq!(ids, vec!["cs2", "cs1"]);
    }

    #[tokio::test]
    async fn test_rejected_batch_applies_nothing() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutSequence(Sequence::novel("n1", "ACGT")))
            .push(WriteOp::PutCall(Call::default()));
        assert!(store.apply(batch).await.is_err());
        assert!(store.scan_sequences().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_calls_are_keyed_by_variant_and_call_set() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutCall(Call::new("cs1", "v1", vec![0, 1])))
            .push(WriteOp::PutCall(Call::new("cs1", "v1", vec![1, 1])))
            .push(WriteOp::PutCall(Call::new("cs1", "v2", vec![0, 0])));
        store.apply(batch).await.unwrap();

        let calls = store.list_calls(&"v1".to_string()).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].genotype, vec![1, 1]);

        store
            .apply(WriteOp::DeleteCalls { variant_id: "v1".to_string() }.into())
            .await
            .unwrap();
        assert!(store.list_calls(&"v1".to_string()).await.unwrap().is_empty());
        assert_eq!(store.list_calls(&"v2".to_string()).await.unwrap().len(), 1);
    }
}
