use log::{debug, info};

use crate::error::{EngineError, RecordKind, Result};
use crate::model::{Allele, Id};
use crate::logic::path_resolver::PathResolver;
use crate::store::traits::{AlleleCallStore, AlleleStore, Store, VariantStore, WriteOp};

/// Outcome of registering an allele.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New,
    /// An identical allele was already registered.
    Unchanged,
}

pub struct AlleleRegistry;

impl AlleleRegistry {
    /// Checks an allele against the graph and the currently stored allele with its id.
    pub fn check(
        resolver: &PathResolver<'_>,
        existing: Option<&Allele>,
        allele: &Allele,
    ) -> Result<Registration> {
        if let Some(existing) = existing {
            if existing != allele {
                return Err(EngineError::duplicate(RecordKind::Allele, &allele.id));
            }
        }

        let wrap = |source: EngineError| EngineError::InvalidPath {
            allele_id: allele.id.clone(),
            source: Box::new(source),
        };
        let resolved = resolver.validate(&allele.path).map_err(wrap)?;

        // A single step over a whole sequence is that sequence's allele.
        if let [step] = resolved.steps.as_slice() {
            let graph = resolver.graph();
            let segment = graph.segment_at(step.segment);
            let sequence = graph.sequence_of(step.segment);
            if segment.covers_whole(sequence) && allele.id != sequence.id {
                return Err(wrap(EngineError::InvalidRecord {
                    kind: RecordKind::Allele,
                    reason: format!(
                        "path covers all of sequence '{}', so the allele id must be '{}'",
                        sequence.id, sequence.id
                    ),
                }));
            }
        }

        Ok(match existing {
            Some(_) => Registration::Unchanged,
            None => Registration::New,
        })
    }

    /// Validates and stores an allele.
    pub async fn register<S: Store + ?Sized>(
        store: &S,
        resolver: &PathResolver<'_>,
        allele: Allele,
    ) -> Result<Registration> {
        let existing = store.get_allele(&allele.id).await?;
        let registration = Self::check(resolver, existing.as_ref(), &allele)?;
        match registration {
            Registration::New => {
                info!(
                    "Registering allele '{}' in variant set '{}' ({} steps)",
                    allele.id,
                    allele.variant_set_id,
                    allele.path.len()
                );
                store.apply(WriteOp::PutAllele(allele).into()).await?;
            }
            Registration::Unchanged => debug!("Allele '{}' already registered", allele.id),
        }
        Ok(registration)
    }

    pub async fn resolve<S: AlleleStore + ?Sized>(store: &S, id: &Id) -> Result<Allele> {
        store
            .get_allele(id)
            .await?
            .ok_or_else(|| EngineError::not_found(RecordKind::Allele, id))
    }

    pub async fn resolve_all<S: AlleleStore + ?Sized>(store: &S, ids: &[Id]) -> Result<Vec<Allele>> {
        let mut alleles = Vec::with_capacity(ids.len());
        for id in ids {
            alleles.push(Self::resolve(store, id).await?);
        }
        Ok(alleles)
    }

    /// Records that still reference the allele, as `variant:<id>` and `alleleCall:<key>`.
    pub async fn references<S: VariantStore + AlleleCallStore + ?Sized>(
        store: &S,
        id: &Id,
    ) -> Result<Vec<String>> {
        let mut references: Vec<String> = store
            .variants_referencing_allele(id)
            .await?
            .into_iter()
            .map(|variant| format!("variant:{}", variant.id))
            .collect();
        references.extend(
            store
                .allele_calls_referencing(id)
                .await?
                .into_iter()
                .map(|call| format!("alleleCall:{}", call.key())),
        );
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::path_resolver::TraversalOptions;
    use crate::model::{Join, Path, PathStep, Segment, Sequence};
    use crate::store::{MemoryStore, SequenceGraph};

    fn graph() -> SequenceGraph {
        let mut graph = SequenceGraph::new();
        graph.add_sequence(Sequence::novel("S", "ACGTACGTAA")).unwrap();
        graph.add_segment(Segment::forward("S", 0, 10)).unwrap();
        graph.add_segment(Segment::forward("S", 0, 5)).unwrap();
        graph.add_segment(Segment::forward("S", 5, 10)).unwrap();
        graph.add_join(Join::end_to_start("S:0-5", "S:5-10")).unwrap();
        graph
    }

    #[tokio::test]
    async fn test_register_is_idempotent_for_identical_content() {
        let graph = graph();
        let resolver = PathResolver::new(&graph, TraversalOptions::acyclic());
        let store = MemoryStore::new();

        let allele = Allele::new("S", "vs1", Path::single("S:0-10"));
        let first = AlleleRegistry::register(&store, &resolver, allele.clone()).await.unwrap();
        assert_eq!(first, Registration::New);
        let again = AlleleRegistry::register(&store, &resolver, allele).await.unwrap();
        assert_eq!(again, Registration::Unchanged);

        let different = Allele::new(
            "S",
            "vs1",
            Path::new(vec![PathStep::forward("S:0-5"), PathStep::forward("S:5-10")]),
        );
        let err = AlleleRegistry::register(&store, &resolver, different).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId { kind: RecordKind::Allele, .. }));
    }

    #[tokio::test]
    async fn test_invalid_path_wraps_resolver_error() {
        let graph = graph();
        let resolver = PathResolver::new(&graph, TraversalOptions::acyclic());
        let store = MemoryStore::new();

        let backwards = Allele::new(
            "a1",
            "vs1",
            Path::new(vec![PathStep::forward("S:5-10"), PathStep::forward("S:0-5")]),
        );
        match AlleleRegistry::register(&store, &resolver, backwards).await {
            Err(EngineError::InvalidPath { allele_id, source }) => {
                assert_eq!(allele_id, "a1");
                assert!(matches!(*source, EngineError::DisconnectedPath { index: 0, .. }));
            }
            other => panic!("expected InvalidPath, got {:?}", other),
        }
        assert!(store.get_allele(&"a1".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_whole_sequence_allele_takes_sequence_id() {
        let graph = graph();
        let resolver = PathResolver::new(&graph, TraversalOptions::acyclic());
        let store = MemoryStore::new();

        let misnamed = Allele::new("A1", "vs1", Path::single("S:0-10"));
        let err = AlleleRegistry::register(&store, &resolver, misnamed).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath { .. }));

        let partial = Allele::new("A2", "vs1", Path::single("S:0-5"));
        AlleleRegistry::register(&store, &resolver, partial).await.unwrap();
        let resolved = AlleleRegistry::resolve(&store, &"A2".to_string()).await.unwrap();
        assert_eq!(resolved.path, Path::single("S:0-5"));
    }
}
