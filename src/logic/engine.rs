use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as WriterLock, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, RecordKind, Result};
use crate::logic::allele_registry::{AlleleRegistry, Registration};
use crate::logic::call_check;
use crate::logic::ordering::{OrderingManager, OrderingPin};
use crate::logic::path_resolver::PathResolver;
use crate::logic::reconcile;
use crate::model::{
    generate_id, Allele, AlleleCall, Call, CallSet, FlatDescription, Id, Join, Segment, Sequence,
    Variant, VariantSet, VariantSetMetadata,
};
use crate::store::{Added, ReferenceCatalog, SequenceGraph, Store, WriteBatch, WriteOp};

/// One element of the sequence graph, as submitted for registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GraphElement {
    Sequence(Sequence),
    Segment(Segment),
    Join(Join),
}

/// Whether returned calls carry their call set identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallIdentity {
    Included,
    /// Calls are positional against the given ordering pin.
    Omitted(Uuid),
}

/// Result of a call set search, with the order it pinned.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSetPage {
    pub pin: OrderingPin,
    pub call_sets: Vec<CallSet>,
}

/// Entry point for every write and query over graph and variation records.
///
/// Writes to one variant set are serialized and fully checked before a single store
/// batch commits them. Reads never take the writer locks.
pub struct ConsistencyEngine<S: Store, C: ReferenceCatalog> {
    store: Arc<S>,
    catalog: Arc<C>,
    graph: Arc<RwLock<SequenceGraph>>,
    writers: Mutex<HashMap<Id, Arc<WriterLock<()>>>>,
    ordering: OrderingManager,
    config: EngineConfig,
}

fn log_rejection(operation: &'static str) -> impl Fn(&EngineError) {
    move |err| warn!("Rejected {}: {}", operation, err)
}

/// Equal apart from timestamps and embedded calls.
fn same_variant(a: &Variant, b: &Variant) -> bool {
    let strip = |v: &Variant| Variant {
        created: None,
        updated: None,
        ..v.without_calls()
    };
    strip(a) == strip(b)
}

impl<S: Store, C: ReferenceCatalog> ConsistencyEngine<S, C> {
    /// Rebuilds the sequence graph arena from the store.
    pub async fn open(store: Arc<S>, catalog: Arc<C>, config: EngineConfig) -> Result<Self> {
        let graph = SequenceGraph::from_records(
            store.scan_sequences().await?,
            store.scan_segments().await?,
            store.scan_joins().await?,
        )?;
        info!(
            "Opened sequence graph with {} sequences, {} segments and {} joins",
            graph.sequence_count(),
            graph.segment_count(),
            graph.join_count()
        );
        Ok(Self {
            store,
            catalog,
            graph: Arc::new(RwLock::new(graph)),
            writers: Mutex::new(HashMap::new()),
            ordering: OrderingManager::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn writer(&self, variant_set_id: &Id) -> OwnedMutexGuard<()> {
        let lock = self
            .writers
            .lock()
            .entry(variant_set_id.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drops the writer lock of a deleted variant set. Must be called with its guard held;
    /// an entry some other task still waits on stays.
    fn retire_writer(&self, variant_set_id: &Id) {
        let mut writers = self.writers.lock();
        // One reference in the map, one in the caller's guard.
        if writers
            .get(variant_set_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            writers.remove(variant_set_id);
        }
    }

    /// Writer locks for several variant sets, always taken in id order.
    async fn writers(&self, variant_set_ids: &[Id]) -> Vec<OwnedMutexGuard<()>> {
        let ordered: BTreeSet<&Id> = variant_set_ids.iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for id in ordered {
            guards.push(self.writer(id).await);
        }
        guards
    }

    async fn require_variant_set(&self, id: &Id) -> Result<VariantSet> {
        self.store
            .get_variant_set(id)
            .await?
            .ok_or_else(|| EngineError::not_found(RecordKind::VariantSet, id))
    }

    async fn require_variant(&self, id: &Id) -> Result<Variant> {
        self.store
            .get_variant(id)
            .await?
            .ok_or_else(|| EngineError::not_found(RecordKind::Variant, id))
    }

    /// Call set that must belong to the variant set.
    async fn require_member(&self, call_set_id: &Id, variant_set_id: &Id) -> Result<CallSet> {
        let call_set = self
            .store
            .get_call_set(call_set_id)
            .await?
            .ok_or_else(|| EngineError::not_found(RecordKind::CallSet, call_set_id))?;
        if !call_set.belongs_to(variant_set_id) {
            return Err(EngineError::InvalidRecord {
                kind: RecordKind::CallSet,
                reason: format!(
                    "call set '{}' does not belong to variant set '{}'",
                    call_set_id, variant_set_id
                ),
            });
        }
        Ok(call_set)
    }

    /// Locks the variant's set, then reads the variant again under the lock.
    async fn lock_variant(&self, variant_id: &Id) -> Result<(OwnedMutexGuard<()>, Variant)> {
        let variant_set_id = self.require_variant(variant_id).await?.variant_set_id;
        let writer = self.writer(&variant_set_id).await;
        let variant = self.require_variant(variant_id).await?;
        Ok((writer, variant))
    }

    //-------------------------------------------------------------------------
    // Sequence graph and alleles

    /// Adds a sequence, segment or join. Identical re-registration is a no-op.
    pub async fn register_sequence_graph_element(&self, element: GraphElement) -> Result<Added> {
        let mut graph = self.graph.write().await;
        let result: Result<Added> = async {
            match element {
                GraphElement::Sequence(mut sequence) => {
                    sequence.bases.make_ascii_uppercase();
                    let added = graph.check_sequence(&sequence)?;
                    if added == Added::Unchanged {
                        return Ok(added);
                    }
                    if let Some(reference_set_id) = &sequence.reference_set_id {
                        if !self.catalog.reference_set_exists(reference_set_id).await? {
                            return Err(EngineError::not_found(
                                RecordKind::ReferenceSet,
                                reference_set_id,
                            ));
                        }
                    }
                    info!(
                        "Adding {} sequence '{}' ({} bp)",
                        if sequence.is_reference { "reference" } else { "novel" },
                        sequence.id,
                        sequence.length
                    );
                    self.store
                        .apply(WriteOp::PutSequence(sequence.clone()).into())
                        .await?;
                    graph.add_sequence(sequence)
                }
                GraphElement::Segment(segment) => {
                    let added = graph.check_segment(&segment)?;
                    if added == Added::New {
                        debug!(
                            "Adding segment '{}' over {}[{}, {})",
                            segment.id, segment.sequence_id, segment.start, segment.end
                        );
                        self.store
                            .apply(WriteOp::PutSegment(segment.clone()).into())
                            .await?;
                        graph.add_segment(segment)?;
                    }
                    Ok(added)
                }
                GraphElement::Join(join) => {
                    let added = graph.check_join(&join)?;
                    if added == Added::New {
                        debug!(
                            "Adding join {}:{:?} - {}:{:?}",
                            join.from.segment_id, join.from.side, join.to.segment_id, join.to.side
                        );
                        self.store.apply(WriteOp::PutJoin(join.clone()).into()).await?;
                        graph.add_join(join)?;
                    }
                    Ok(added)
                }
            }
        }
        .await;
        result.inspect_err(log_rejection("graph element"))
    }

    pub async fn register_allele(&self, allele: Allele) -> Result<Registration> {
        let result: Result<Registration> = async move {
            let _writer = self.writer(&allele.variant_set_id).await;
            self.require_variant_set(&allele.variant_set_id).await?;
            let graph = self.graph.read().await;
            let resolver = PathResolver::new(&graph, self.config.traversal());
            AlleleRegistry::register(&*self.store, &resolver, allele).await
        }
        .await;
        result.inspect_err(log_rejection("allele"))
    }

    pub async fn resolve_allele(&self, allele_id: &Id) -> Result<Allele> {
        AlleleRegistry::resolve(&*self.store, allele_id).await
    }

    /// Bases spelled by a registered allele's path.
    pub async fn materialize_allele(&self, allele_id: &Id) -> Result<String> {
        let allele = self.resolve_allele(allele_id).await?;
        let graph = self.graph.read().await;
        PathResolver::new(&graph, self.config.traversal()).materialize(&allele.path)
    }

    pub async fn allele_references(&self, allele_id: &Id) -> Result<Vec<String>> {
        AlleleRegistry::references(&*self.store, allele_id).await
    }

    /// Deletes an allele nothing references any more.
    pub async fn delete_allele(&self, allele_id: &Id) -> Result<()> {
        let result: Result<()> = async move {
            let allele = self.resolve_allele(allele_id).await?;
            let _writer = self.writer(&allele.variant_set_id).await;
            let referenced_by = self.allele_references(allele_id).await?;
            if !referenced_by.is_empty() {
                return Err(EngineError::AlleleInUse {
                    allele_id: allele_id.clone(),
                    referenced_by,
                });
            }
            self.store
                .apply(WriteOp::DeleteAllele(allele_id.clone()).into())
                .await?;
            info!("Deleted allele '{}'", allele_id);
            Ok(())
        }
        .await;
        result.inspect_err(log_rejection("allele deletion"))
    }

    //-------------------------------------------------------------------------
    // Variant sets and call sets

    /// Stores a new variant set. An empty id is replaced by a generated one.
    pub async fn create_variant_set(&self, mut variant_set: VariantSet) -> Result<VariantSet> {
        if variant_set.id.is_empty() {
            variant_set.id = generate_id();
        }
        let result: Result<VariantSet> = async move {
            let _writer = self.writer(&variant_set.id).await;
            if !self.catalog.dataset_exists(&variant_set.dataset_id).await? {
                return Err(EngineError::not_found(RecordKind::Dataset, &variant_set.dataset_id));
            }
            if !self
                .catalog
                .reference_set_exists(&variant_set.reference_set_id)
                .await?
            {
                return Err(EngineError::not_found(
                    RecordKind::ReferenceSet,
                    &variant_set.reference_set_id,
                ));
            }
            match self.store.get_variant_set(&variant_set.id).await? {
                Some(existing) if existing == variant_set => return Ok(existing),
                Some(_) => return Err(EngineError::duplicate(RecordKind::VariantSet, &variant_set.id)),
                None => {}
            }
            self.store
                .apply(WriteOp::PutVariantSet(variant_set.clone()).into())
                .await?;
            info!(
                "Created variant set '{}' in dataset '{}' over reference set '{}'",
                variant_set.id, variant_set.dataset_id, variant_set.reference_set_id
            );
            Ok(variant_set)
        }
        .await;
        result.inspect_err(log_rejection("variant set"))
    }

    pub async fn get_variant_set(&self, id: &Id) -> Result<VariantSet> {
        self.require_variant_set(id).await
    }

    /// Adds header metadata, skipping entries whose (id, key) is already present.
    pub async fn add_metadata(
        &self,
        variant_set_id: &Id,
        entries: Vec<VariantSetMetadata>,
    ) -> Result<usize> {
        let _writer = self.writer(variant_set_id).await;
        let mut variant_set = self.require_variant_set(variant_set_id).await?;
        let added = variant_set.merge_metadata(entries);
        if added > 0 {
            self.store
                .apply(WriteOp::PutVariantSet(variant_set).into())
                .await?;
        }
        debug!("Added {} metadata entries to variant set '{}'", added, variant_set_id);
        Ok(added)
    }

    /// Removes a variant set with its variants, calls, allele calls and alleles.
    ///
    /// Call sets are detached and deleted once they belong to no variant set. Graph
    /// elements are shared and stay.
    pub async fn delete_variant_set(&self, variant_set_id: &Id) -> Result<()> {
        let _writer = self.writer(variant_set_id).await;
        self.require_variant_set(variant_set_id).await?;

        let mut batch = WriteBatch::new();
        let mut allele_call_keys = BTreeSet::new();
        let variants = self.store.list_variants(variant_set_id).await?;
        for variant in &variants {
            batch.push(WriteOp::DeleteCalls {
                variant_id: variant.id.clone(),
            });
            for allele_call in self.store.list_allele_calls_for_variant(&variant.id).await? {
                allele_call_keys.insert(allele_call.key());
            }
            batch.push(WriteOp::DeleteVariant(variant.id.clone()));
        }

        let alleles = self.store.list_alleles(variant_set_id).await?;
        for allele in &alleles {
            for allele_call in self.store.allele_calls_referencing(&allele.id).await? {
                allele_call_keys.insert(allele_call.key());
            }
        }
        let allele_calls = allele_call_keys.len();
        for key in allele_call_keys {
            batch.push(WriteOp::DeleteAlleleCall(key));
        }
        for allele in &alleles {
            batch.push(WriteOp::DeleteAllele(allele.id.clone()));
        }

        let now = Utc::now();
        for mut call_set in self.store.list_call_sets(variant_set_id).await? {
            call_set.variant_set_ids.retain(|id| id != variant_set_id);
            if call_set.variant_set_ids.is_empty() {
                batch.push(WriteOp::DeleteCallSet(call_set.id));
            } else {
                call_set.updated = Some(now);
                batch.push(WriteOp::PutCallSet(call_set));
            }
        }
        batch.push(WriteOp::DeleteVariantSet(variant_set_id.clone()));

        self.store.apply(batch).await?;
        self.ordering.forget(variant_set_id);
        self.retire_writer(variant_set_id);
        info!(
            "Deleted variant set '{}' with {} variants, {} alleles and {} allele calls",
            variant_set_id,
            variants.len(),
            alleles.len(),
            allele_calls
        );
        Ok(())
    }

    pub async fn write_call_set(&self, mut call_set: CallSet) -> Result<CallSet> {
        if call_set.id.is_empty() {
            call_set.id = generate_id();
        }
        let result: Result<CallSet> = async move {
            if call_set.variant_set_ids.is_empty() {
                return Err(EngineError::InvalidRecord {
                    kind: RecordKind::CallSet,
                    reason: format!("call set '{}' belongs to no variant set", call_set.id),
                });
            }
            let _writers = self.writers(&call_set.variant_set_ids).await;
            for variant_set_id in &call_set.variant_set_ids {
                self.require_variant_set(variant_set_id).await?;
            }
            let now = Utc::now();
            match self.store.get_call_set(&call_set.id).await? {
                Some(existing) => {
                    call_set.created = existing.created;
                    call_set.updated = Some(now);
                }
                None => {
                    call_set.created = Some(now);
                    call_set.updated = None;
                }
            }
            self.store
                .apply(WriteOp::PutCallSet(call_set.clone()).into())
                .await?;
            debug!(
                "Stored call set '{}' for sample '{}' in {} variant sets",
                call_set.id,
                call_set.sample_id,
                call_set.variant_set_ids.len()
            );
            Ok(call_set)
        }
        .await;
        result.inspect_err(log_rejection("call set"))
    }

    //-------------------------------------------------------------------------
    // Variants

    /// Mode obligations and cross-checks of a variant's two descriptions.
    fn check_representations(
        &self,
        resolver: &PathResolver<'_>,
        variant: &Variant,
        alleles: &[Allele],
    ) -> Result<()> {
        let modes = self.config.modes;
        let flat = reconcile::check_flat(variant)?;
        let record = || format!("variant '{}'", variant.id);

        if flat.is_some() && !modes.classic {
            return Err(EngineError::UnsupportedMode {
                record: record(),
                mode: "classic",
            });
        }
        if variant.has_alleles() && !modes.graph {
            return Err(EngineError::UnsupportedMode {
                record: record(),
                mode: "graph",
            });
        }
        match (&flat, variant.has_alleles()) {
            (None, false) => {
                return Err(EngineError::InvalidRecord {
                    kind: RecordKind::Variant,
                    reason: format!("{} has neither flat fields nor alleleIds", record()),
                })
            }
            (None, true) if modes.is_dual() => {
                return Err(EngineError::conflict(
                    &variant.id,
                    "referenceName",
                    None,
                    "deployments declaring both modes store the flat description too",
                ))
            }
            (Some(_), false) if modes.is_dual() => {
                return Err(EngineError::conflict(
                    &variant.id,
                    "alleleIds",
                    None,
                    "deployments declaring both modes store the allele description too",
                ))
            }
            _ => {}
        }

        if variant.has_alleles() {
            if alleles.is_empty() {
                return Err(EngineError::conflict(
                    &variant.id,
                    "alleleIds",
                    None,
                    "no reference allele",
                ));
            }
            if let Some((index, allele)) = alleles
                .iter()
                .enumerate()
                .find(|(_, a)| a.variant_set_id != variant.variant_set_id)
            {
                return Err(EngineError::conflict(
                    &variant.id,
                    "alleleIds",
                    Some(index),
                    format!(
                        "allele '{}' belongs to variant set '{}'",
                        allele.id, allele.variant_set_id
                    ),
                ));
            }
        }
        if let Some(flat) = &flat {
            if variant.has_alleles() {
                reconcile::reconcile(resolver, variant, flat, alleles)?;
            }
        }
        Ok(())
    }

    /// Stages a checked variant and its embedded calls.
    async fn stage_variant(&self, mut variant: Variant, batch: &mut WriteBatch) -> Result<Variant> {
        let calls = std::mem::take(&mut variant.calls);
        if self.config.modes.graph {
            if let Some(allele_ids) = &variant.allele_ids {
                // Allele calls cannot travel with a variant, so these could never be satisfied.
                if let Some(call) = calls.iter().find(|call| {
                    call_check::implied_copies(allele_ids.len(), &call.genotype)
                        .iter()
                        .any(|copies| *copies > 0)
                }) {
                    return Err(EngineError::InvalidRecord {
                        kind: RecordKind::Call,
                        reason: format!(
                            "call of call set '{}' on variant '{}' implies allele copies; write it \
                             with its allele calls as a call batch",
                            call.call_set_id.as_deref().unwrap_or("?"),
                            variant.id
                        ),
                    });
                }
            }
        }
        match self.store.get_variant(&variant.id).await? {
            Some(existing) if !same_variant(&existing, &variant) => {
                return Err(EngineError::duplicate(RecordKind::Variant, &variant.id));
            }
            Some(existing) => {
                variant.created = existing.created;
                variant.updated = existing.updated;
            }
            None => {
                variant.created = Some(Utc::now());
                variant.updated = None;
                batch.push(WriteOp::PutVariant(variant.clone()));
            }
        }
        variant.calls = self.stage_calls(&variant, calls, Vec::new(), batch).await?.0;
        Ok(variant)
    }

    /// Writes a variant after reconciling its descriptions. Embedded calls are checked and
    /// stored with it.
    pub async fn write_variant(&self, variant: Variant) -> Result<Variant> {
        let result: Result<Variant> = async move {
            let _writer = self.writer(&variant.variant_set_id).await;
            self.require_variant_set(&variant.variant_set_id).await?;
            // Without graph mode the allele ids are rejected before any lookup.
            let alleles = match &variant.allele_ids {
                Some(ids) if self.config.modes.graph => {
                    AlleleRegistry::resolve_all(&*self.store, ids).await?
                }
                _ => Vec::new(),
            };
            {
                let graph = self.graph.read().await;
                let resolver = PathResolver::new(&graph, self.config.traversal());
                self.check_representations(&resolver, &variant, &alleles)?;
            }

            let mut batch = WriteBatch::new();
            let stored = self.stage_variant(variant, &mut batch).await?;
            let ops = batch.len();
            self.store.apply(batch).await?;
            info!(
                "Stored variant '{}' in variant set '{}' ({} operations)",
                stored.id, stored.variant_set_id, ops
            );
            Ok(stored)
        }
        .await;
        result.inspect_err(log_rejection("variant"))
    }

    pub async fn get_variant(&self, id: &Id) -> Result<Variant> {
        self.require_variant(id).await
    }

    /// Derives the flat description of a variant from its alleles.
    pub async fn flatten_variant(&self, variant_id: &Id) -> Result<FlatDescription> {
        let variant = self.require_variant(variant_id).await?;
        let allele_ids = variant.allele_ids.clone().ok_or_else(|| EngineError::InvalidRecord {
            kind: RecordKind::Variant,
            reason: format!("variant '{}' has no alleleIds", variant_id),
        })?;
        let alleles = AlleleRegistry::resolve_all(&*self.store, &allele_ids).await?;
        let graph = self.graph.read().await;
        let resolver = PathResolver::new(&graph, self.config.traversal());
        reconcile::flatten(&resolver, &variant, &alleles)
    }

    /// Expresses a flat variant in the graph and stores it with both descriptions.
    ///
    /// New graph elements, alleles and the variant commit together.
    pub async fn lift_variant(&self, mut variant: Variant) -> Result<Variant> {
        let result: Result<Variant> = async move {
            if !self.config.modes.graph {
                return Err(EngineError::UnsupportedMode {
                    record: format!("variant '{}'", variant.id),
                    mode: "graph",
                });
            }
            if variant.has_alleles() {
                return Err(EngineError::InvalidRecord {
                    kind: RecordKind::Variant,
                    reason: format!("variant '{}' already has alleleIds", variant.id),
                });
            }
            let _writer = self.writer(&variant.variant_set_id).await;
            self.require_variant_set(&variant.variant_set_id).await?;

            let mut graph = self.graph.write().await;
            let plan = reconcile::plan_lift(&graph, &variant)?;
            let mut staged = (*graph).clone();
            let mut batch = WriteBatch::new();
            for sequence in plan.sequences.iter().cloned() {
                if staged.add_sequence(sequence.clone())? == Added::New {
                    batch.push(WriteOp::PutSequence(sequence));
                }
            }
            for segment in plan.segments.iter().cloned() {
                if staged.add_segment(segment.clone())? == Added::New {
                    batch.push(WriteOp::PutSegment(segment));
                }
            }
            for join in plan.joins.iter().cloned() {
                if staged.add_join(join.clone())? == Added::New {
                    batch.push(WriteOp::PutJoin(join));
                }
            }

            variant.allele_ids = Some(plan.allele_ids());
            let stored = {
                let resolver = PathResolver::new(&staged, self.config.traversal());
                for allele in &plan.alleles {
                    let existing = self.store.get_allele(&allele.id).await?;
                    let registration = AlleleRegistry::check(&resolver, existing.as_ref(), allele)?;
                    if registration == Registration::New {
                        batch.push(WriteOp::PutAllele(allele.clone()));
                    }
                }
                let modes = self.config.modes;
                if modes.classic {
                    self.check_representations(&resolver, &variant, &plan.alleles)?;
                } else {
                    // Graph-only deployments keep just the allele description.
                    variant.reference_name = None;
                    variant.start = None;
                    variant.end = None;
                    variant.reference_bases = None;
                    variant.alternate_bases = Vec::new();
                    self.check_representations(&resolver, &variant, &plan.alleles)?;
                }
                self.stage_variant(variant, &mut batch).await?
            };

            self.store.apply(batch).await?;
            *graph = staged;
            info!(
                "Lifted variant '{}' onto {} alleles",
                stored.id,
                plan.alleles.len()
            );
            Ok(stored)
        }
        .await;
        result.inspect_err(log_rejection("variant lift"))
    }

    //-------------------------------------------------------------------------
    // Calls

    /// Checks new calls and allele calls of one variant against everything already
    /// stored for it and stages the ones not already present.
    async fn stage_calls(
        &self,
        variant: &Variant,
        calls: Vec<Call>,
        allele_calls: Vec<AlleleCall>,
        batch: &mut WriteBatch,
    ) -> Result<(Vec<Call>, Vec<AlleleCall>)> {
        // Repeats inside one submission are duplicates even when identical.
        {
            let mut incoming = HashSet::new();
            for call_set_id in calls.iter().filter_map(|c| c.call_set_id.as_ref()) {
                if !incoming.insert(call_set_id) {
                    return Err(EngineError::duplicate(
                        RecordKind::Call,
                        format!("{}/{}", variant.id, call_set_id),
                    ));
                }
            }
        }
        {
            let mut incoming = HashSet::new();
            for key in allele_calls.iter().map(AlleleCall::key) {
                if incoming.contains(&key) {
                    return Err(EngineError::duplicate(RecordKind::AlleleCall, key.to_string()));
                }
                incoming.insert(key);
            }
        }

        let mut all_calls = self.store.list_calls(&variant.id).await?;
        let mut all_allele_calls = self.store.list_allele_calls_for_variant(&variant.id).await?;
        let mut staged_calls = Vec::with_capacity(calls.len());
        let mut staged_allele_calls = Vec::with_capacity(allele_calls.len());

        for mut call in calls {
            if call.variant_id.is_none() {
                call.variant_id = Some(variant.id.clone());
            }
            let call_set_id = call.call_set_id.clone().ok_or_else(|| EngineError::InvalidRecord {
                kind: RecordKind::Call,
                reason: format!("call on variant '{}' has no callSetId", variant.id),
            })?;
            self.require_member(&call_set_id, &variant.variant_set_id).await?;
            match all_calls
                .iter()
                .find(|c| c.call_set_id.as_ref() == Some(&call_set_id))
            {
                Some(existing) if existing == &call => {}
                Some(_) => {
                    return Err(EngineError::duplicate(
                        RecordKind::Call,
                        format!("{}/{}", variant.id, call_set_id),
                    ))
                }
                None => {
                    batch.push(WriteOp::PutCall(call.clone()));
                    all_calls.push(call.clone());
                }
            }
            staged_calls.push(call);
        }

        for allele_call in allele_calls {
            if allele_call.variant_id.as_deref() != Some(variant.id.as_str()) {
                return Err(EngineError::InvalidRecord {
                    kind: RecordKind::AlleleCall,
                    reason: format!(
                        "allele call '{}' is not bound to variant '{}'",
                        allele_call.key(),
                        variant.id
                    ),
                });
            }
            self.require_member(&allele_call.call_set_id, &variant.variant_set_id)
                .await?;
            match all_allele_calls.iter().find(|ac| ac.key() == allele_call.key()) {
                Some(existing) if existing == &allele_call => {}
                Some(_) => {
                    return Err(EngineError::duplicate(
                        RecordKind::AlleleCall,
                        allele_call.key().to_string(),
                    ))
                }
                None => {
                    batch.push(WriteOp::PutAlleleCall(allele_call.clone()));
                    all_allele_calls.push(allele_call.clone());
                }
            }
            staged_allele_calls.push(allele_call);
        }

        call_check::check_variant_calls(variant, &all_calls, &all_allele_calls, self.config.modes)?;
        self.check_allele_phasing(&staged_allele_calls).await?;
        Ok((staged_calls, staged_allele_calls))
    }

    /// New allele calls against the other allele calls of the same call set and allele.
    async fn check_allele_phasing(&self, allele_calls: &[AlleleCall]) -> Result<()> {
        let mut groups: BTreeMap<(&Id, &Id), Vec<&AlleleCall>> = BTreeMap::new();
        for allele_call in allele_calls.iter().filter(|ac| !ac.phaseset.is_empty()) {
            groups
                .entry((&allele_call.call_set_id, &allele_call.allele_id))
                .or_default()
                .push(allele_call);
        }
        for ((call_set_id, allele_id), group) in groups {
            let mut combined = self
                .store
                .list_allele_calls_for_allele(call_set_id, allele_id)
                .await?;
            for allele_call in group {
                let key = allele_call.key();
                if !combined.iter().any(|ac| ac.key() == key) {
                    combined.push(allele_call.clone());
                }
            }
            call_check::check_allele_phasesets(&combined)?;
        }
        Ok(())
    }

    pub async fn write_call(&self, call: Call) -> Result<Call> {
        let result: Result<Call> = async move {
            let variant_id = call.variant_id.clone().ok_or_else(|| EngineError::InvalidRecord {
                kind: RecordKind::Call,
                reason: "call has no variantId".to_string(),
            })?;
            let (_writer, variant) = self.lock_variant(&variant_id).await?;
            let mut batch = WriteBatch::new();
            let (mut calls, _) = self.stage_calls(&variant, vec![call], Vec::new(), &mut batch).await?;
            self.store.apply(batch).await?;
            debug!("Stored call on variant '{}'", variant_id);
            calls.pop().ok_or_else(|| EngineError::InvalidRecord {
                kind: RecordKind::Call,
                reason: "call was not staged".to_string(),
            })
        }
        .await;
        result.inspect_err(log_rejection("call"))
    }

    /// Writes an allele call. Calls not bound to a variant are checked for phaseset
    /// coherence against the call set's other calls of the allele.
    pub async fn write_allele_call(&self, allele_call: AlleleCall) -> Result<AlleleCall> {
        let result: Result<AlleleCall> = async move {
            let mut batch = WriteBatch::new();
            match allele_call.variant_id.clone() {
                Some(variant_id) => {
                    let (_writer, variant) = self.lock_variant(&variant_id).await?;
                    self.stage_calls(&variant, Vec::new(), vec![allele_call.clone()], &mut batch)
                        .await?;
                    self.store.apply(batch).await?;
                }
                None => {
                    let allele = self.resolve_allele(&allele_call.allele_id).await?;
                    let _writer = self.writer(&allele.variant_set_id).await;
                    call_check::check_allele_call_shape(&allele_call)?;
                    self.require_member(&allele_call.call_set_id, &allele.variant_set_id)
                        .await?;
                    match self.store.get_allele_call(&allele_call.key()).await? {
                        Some(existing) if existing == allele_call => return Ok(allele_call),
                        Some(_) => {
                            return Err(EngineError::duplicate(
                                RecordKind::AlleleCall,
                                allele_call.key().to_string(),
                            ))
                        }
                        None => {}
                    }
                    self.check_allele_phasing(std::slice::from_ref(&allele_call))
                        .await?;
                    batch.push(WriteOp::PutAlleleCall(allele_call.clone()));
                    self.store.apply(batch).await?;
                }
            }
            debug!("Stored allele call '{}'", allele_call.key());
            Ok(allele_call)
        }
        .await;
        result.inspect_err(log_rejection("allele call"))
    }

    /// Writes calls and allele calls of one variant in a single checked batch.
    pub async fn write_call_batch(
        &self,
        variant_id: &Id,
        calls: Vec<Call>,
        allele_calls: Vec<AlleleCall>,
    ) -> Result<()> {
        let result: Result<()> = async move {
            let (_writer, variant) = self.lock_variant(variant_id).await?;
            let mut batch = WriteBatch::new();
            self.stage_calls(&variant, calls, allele_calls, &mut batch).await?;
            let ops = batch.len();
            self.store.apply(batch).await?;
            info!("Stored {} call records on variant '{}'", ops, variant_id);
            Ok(())
        }
        .await;
        result.inspect_err(log_rejection("call batch"))
    }

    //-------------------------------------------------------------------------
    // Searches

    async fn ordered_call_sets(&self, variant_set_id: &Id) -> Result<Vec<CallSet>> {
        Ok(OrderingManager::canonical_order(
            self.store.list_call_sets(variant_set_id).await?,
        ))
    }

    /// Lists the call sets of a variant set and pins their order.
    pub async fn search_call_sets(&self, variant_set_id: &Id) -> Result<CallSetPage> {
        self.require_variant_set(variant_set_id).await?;
        let call_sets = self.ordered_call_sets(variant_set_id).await?;
        let pin = self.ordering.pin(variant_set_id, &call_sets);
        Ok(CallSetPage { pin, call_sets })
    }

    async fn calls_for(
        &self,
        variant: &Variant,
        pin: Option<&OrderingPin>,
    ) -> Result<Vec<Call>> {
        let mut calls = self.store.list_calls(&variant.id).await?;
        match pin {
            Some(pin) => OrderingManager::arrange(pin, &variant.id, calls),
            None => {
                calls.sort_by(|a, b| a.call_set_id.cmp(&b.call_set_id));
                Ok(calls)
            }
        }
    }

    async fn live_pin(&self, variant_set_id: &Id, identity: CallIdentity) -> Result<Option<OrderingPin>> {
        match identity {
            CallIdentity::Included => Ok(None),
            CallIdentity::Omitted(pin_id) => {
                let current = self.ordered_call_sets(variant_set_id).await?;
                self.ordering
                    .check_pin(variant_set_id, pin_id, &current)
                    .map(Some)
            }
        }
    }

    /// Calls on one variant. Without ids they follow the pinned call set order exactly.
    pub async fn search_calls(
        &self,
        variant_set_id: &Id,
        variant_id: &Id,
        identity: CallIdentity,
    ) -> Result<Vec<Call>> {
        let variant = self.require_variant(variant_id).await?;
        if &variant.variant_set_id != variant_set_id {
            return Err(EngineError::not_found(RecordKind::Variant, variant_id));
        }
        let pin = self.live_pin(variant_set_id, identity).await?;
        self.calls_for(&variant, pin.as_ref())
            .await
            .inspect_err(log_rejection("call search"))
    }

    /// Variants of a variant set with their calls embedded.
    pub async fn search_variants(
        &self,
        variant_set_id: &Id,
        identity: CallIdentity,
    ) -> Result<Vec<Variant>> {
        self.require_variant_set(variant_set_id).await?;
        let pin = self.live_pin(variant_set_id, identity).await?;
        let mut variants = self.store.list_variants(variant_set_id).await?;
        for variant in &mut variants {
            variant.calls = self
                .calls_for(variant, pin.as_ref())
                .await
                .inspect_err(log_rejection("variant search"))?;
        }
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Path, PathStep};
    use crate::store::traits::GraphStore;
    use crate::store::{MemoryCatalog, MemoryStore};

    async fn engine(config: EngineConfig) -> ConsistencyEngine<MemoryStore, MemoryCatalog> {
        let catalog = MemoryCatalog::new()
            .with_reference_set("rs1")
            .with_dataset("ds1");
        let engine = ConsistencyEngine::open(Arc::new(MemoryStore::new()), Arc::new(catalog), config)
            .await
            .unwrap();
        engine
            .create_variant_set(VariantSet::new("vs1", "ds1", "rs1"))
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_reference_sequence_needs_known_reference_set() {
        let engine = engine(EngineConfig::default()).await;
        let err = engine
            .register_sequence_graph_element(GraphElement::Sequence(Sequence::reference(
                "seq-x", "chrX", "rs-missing", "ACGT",
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: RecordKind::ReferenceSet, .. }));
    }

    #[tokio::test]
    async fn test_bases_are_uppercased_and_registration_is_idempotent() {
        let engine = engine(EngineConfig::default()).await;
        let lower = GraphElement::Sequence(Sequence::novel("n1", "acgt"));
        assert_eq!(
            engine.register_sequence_graph_element(lower.clone()).await.unwrap(),
            Added::New
        );
        assert_eq!(
            engine.register_sequence_graph_element(lower).await.unwrap(),
            Added::Unchanged
        );
        let stored = engine.store().scan_sequences().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].bases, "ACGT");
    }

    #[tokio::test]
    async fn test_modes_gate_representations() {
        let classic = engine(EngineConfig::default().with_modes(true, false)).await;
        let err = classic
            .write_variant(Variant::graph("v1", "vs1", vec!["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedMode { mode: "graph", .. }));
        classic
            .write_variant(Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A"]))
            .await
            .unwrap();

        let dual = engine(EngineConfig::default()).await;
        let err = dual
            .write_variant(Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::RepresentationConflict { field: "alleleIds", .. }
        ));
    }

    #[tokio::test]
    async fn test_allele_needs_existing_variant_set() {
        let engine = engine(EngineConfig::default()).await;
        engine
            .register_sequence_graph_element(GraphElement::Sequence(Sequence::novel("n1", "ACGT")))
            .await
            .unwrap();
        engine
            .register_sequence_graph_element(GraphElement::Segment(Segment::forward("n1", 0, 2)))
            .await
            .unwrap();
        let allele = Allele::new("a1", "vs-missing", Path::new(vec![PathStep::forward("n1:0-2")]));
        assert!(matches!(
            engine.register_allele(allele).await,
            Err(EngineError::NotFound { kind: RecordKind::VariantSet, .. })
        ));
    }

    #[tokio::test]
    async fn test_call_set_must_belong_to_variant_set() {
        let engine = engine(EngineConfig::default().with_modes(true, false)).await;
        engine
            .create_variant_set(VariantSet::new("vs2", "ds1", "rs1"))
            .await
            .unwrap();
        engine
            .write_call_set(CallSet::new("cs1", "s1", vec!["vs2".to_string()]))
            .await
            .unwrap();
        engine
            .write_variant(Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A"]))
            .await
            .unwrap();
        let err = engine
            .write_call(Call::new("cs1", "v1", vec![0, 1]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecord { kind: RecordKind::CallSet, .. }));
    }

    #[tokio::test]
    async fn test_empty_ids_are_generated() {
        let engine = engine(EngineConfig::default()).await;
        let created = engine
            .create_variant_set(VariantSet::new("", "ds1", "rs1"))
            .await
            .unwrap();
        assert_eq!(created.id.len(), 36);
        let call_set = engine
            .write_call_set(CallSet::new("", "s1", vec![created.id.clone()]))
            .await
            .unwrap();
        assert!(!call_set.id.is_empty());
        assert!(call_set.created.is_some());
    }

    #[tokio::test]
    async fn test_metadata_is_deduplicated() {
        let engine = engine(EngineConfig::default()).await;
        let vs = "vs1".to_string();
        let added = engine
            .add_metadata(&vs, vec![VariantSetMetadata::new("DP", "INFO", "depth")])
            .await
            .unwrap();
        assert_eq!(added, 1);
        let again = engine
            .add_metadata(&vs, vec![VariantSetMetadata::new("DP", "INFO", "other")])
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(engine.get_variant_set(&vs).await.unwrap().metadata.len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_variant_set_releases_its_writer_lock() {
        let engine = engine(EngineConfig::default().with_modes(true, false)).await;
        let vs = "vs1".to_string();
        engine
            .write_variant(Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A"]))
            .await
            .unwrap();
        assert!(engine.writers.lock().contains_key(&vs));

        engine.delete_variant_set(&vs).await.unwrap();
        assert!(!engine.writers.lock().contains_key(&vs));

        // A recreated variant set gets a fresh lock.
        engine
            .create_variant_set(VariantSet::new("vs1", "ds1", "rs1"))
            .await
            .unwrap();
        engine
            .write_variant(Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A"]))
            .await
            .unwrap();
        assert!(engine.writers.lock().contains_key(&vs));
    }
}
