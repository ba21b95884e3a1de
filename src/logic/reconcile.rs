//! Agreement between the flat and the allele-graph descriptions of a variant.

use std::collections::BTreeMap;

use crate::error::{EngineError, RecordKind, Result};
use crate::logic::path_resolver::{side_coordinate, PathResolver, ResolvedPath};
use crate::model::{Allele, FlatDescription, FlatState, Id, Join, Path, Segment, Sequence, Variant};
use crate::store::SequenceGraph;

/// Reference interval overlaid by an allele's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub sequence_id: Id,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
}

impl Span {
    fn contains(&self, other: &Span) -> bool {
        self.sequence_id == other.sequence_id && self.start <= other.start && other.end <= self.end
    }
}

/// Checks the flat fields on their own: complete when present, and `end - start` equal to
/// the length of `referenceBases`.
pub fn check_flat(variant: &Variant) -> Result<Option<FlatDescription>> {
    match variant.flat_state() {
        FlatState::Absent => Ok(None),
        FlatState::Partial(field) => Err(EngineError::conflict(
            &variant.id,
            field,
            None,
            "flat description is incomplete",
        )),
        FlatState::Complete(flat) => {
            if flat.end < flat.start {
                return Err(EngineError::conflict(
                    &variant.id,
                    "end",
                    None,
                    format!("end {} precedes start {}", flat.end, flat.start),
                ));
            }
            if flat.end - flat.start != flat.reference_bases.len() as u64 {
                return Err(EngineError::conflict(
                    &variant.id,
                    "end",
                    None,
                    format!(
                        "[{}, {}) does not match {} reference bases",
                        flat.start,
                        flat.end,
                        flat.reference_bases.len()
                    ),
                ));
            }
            Ok(Some(flat))
        }
    }
}

/// Reference span of a path: the forward ranges of its reference-backed steps, widened by the
/// coordinates of reference sides joined to a novel first or last step.
///
/// A novel sequence can be anchored at several loci of the shared graph. With a `locus`, only
/// anchors on its sequence within `[start, end]` count; a boundary with no such anchor falls
/// back to all of its anchors, so a path anchored elsewhere still lands outside the locus.
///
/// Returns `None` for a path that neither touches nor is anchored to a reference sequence.
pub fn path_span(
    graph: &SequenceGraph,
    path: &ResolvedPath,
    variant_id: &str,
    locus: Option<&Span>,
) -> Result<Option<Span>> {
    // sequence id -> (min, max)
    let mut extents: BTreeMap<Id, (u64, u64)> = BTreeMap::new();
    let mut widen = |sequence: &Sequence, lo: u64, hi: u64| {
        let entry = extents.entry(sequence.id.clone()).or_insert((lo, hi));
        entry.0 = entry.0.min(lo);
        entry.1 = entry.1.max(hi);
    };

    for step in &path.steps {
        let sequence = graph.sequence_of(step.segment);
        if sequence.is_reference {
            let segment = graph.segment_at(step.segment);
            widen(sequence, segment.start, segment.end);
        }
    }

    let boundaries = [path.steps.first().map(|s| s.entry()), path.steps.last().map(|s| s.exit())];
    for side in boundaries.into_iter().flatten() {
        if graph.sequence_of(side.0).is_reference {
            continue;
        }
        let anchors: Vec<(&Sequence, u64)> = graph
            .adjacent(side)
            .iter()
            .filter_map(|(segment, anchor)| {
                let sequence = graph.sequence_of(*segment);
                sequence
                    .is_reference
                    .then(|| (sequence, side_coordinate(graph.segment_at(*segment), *anchor)))
            })
            .collect();
        let touching: Vec<(&Sequence, u64)> = match locus {
            Some(locus) => anchors
                .iter()
                .copied()
                .filter(|(sequence, coordinate)| {
                    sequence.id == locus.sequence_id
                        && locus.start <= *coordinate
                        && *coordinate <= locus.end
                })
                .collect(),
            None => Vec::new(),
        };
        let chosen = if touching.is_empty() { anchors } else { touching };
        for (sequence, coordinate) in chosen {
            widen(sequence, coordinate, coordinate);
        }
    }

    let mut extents = extents.into_iter();
    let Some((sequence_id, (start, end))) = extents.next() else {
        return Ok(None);
    };
    if let Some((other, _)) = extents.next() {
        return Err(EngineError::conflict(
            variant_id,
            "alleleIds",
            None,
            format!("path overlays both '{}' and '{}'", sequence_id, other),
        ));
    }
    let reference_name = graph
        .sequence(&sequence_id)
        .map(|s| s.reference_name().to_string())
        .unwrap_or_else(|| sequence_id.clone());
    Ok(Some(Span {
        sequence_id,
        reference_name,
        start,
        end,
    }))
}

/// Materialized bases and reference span of every allele, in `alleleIds` order.
fn describe_alleles(
    resolver: &PathResolver<'_>,
    variant: &Variant,
    alleles: &[Allele],
) -> Result<Vec<(String, Option<Span>)>> {
    let mut described: Vec<(String, Option<Span>)> = Vec::with_capacity(alleles.len());
    for (index, allele) in alleles.iter().enumerate() {
        if allele.variant_set_id != variant.variant_set_id {
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
        let resolved = resolver.resolve(&allele.path)?;
        let bases = resolver.materialize_resolved(&resolved);
        // Alternates are measured against the reference allele's locus.
        let locus = described.first().and_then(|(_, span)| span.as_ref());
        let span = path_span(resolver.graph(), &resolved, &variant.id, locus)?;
        described.push((bases, span));
    }
    Ok(described)
}

/// Verifies that the flat fields and the alleles describe the same change.
///
/// `alleles` must be the resolved `alleleIds`, in order. Conflicts report the `alleleIds`
/// position at fault, so alternate `i` is reported at index `i` as in genotypes.
pub fn reconcile(
    resolver: &PathResolver<'_>,
    variant: &Variant,
    flat: &FlatDescription,
    alleles: &[Allele],
) -> Result<()> {
    if alleles.is_empty() {
        return Err(EngineError::conflict(
            &variant.id,
            "alleleIds",
            None,
            "no reference allele",
        ));
    }
    if alleles.len() != flat.alternate_bases.len() + 1 {
        return Err(EngineError::conflict(
            &variant.id,
            "alleleIds",
            None,
            format!(
                "{} alleles for {} alternate bases",
                alleles.len(),
                flat.alternate_bases.len()
            ),
        ));
    }
    let described = describe_alleles(resolver, variant, alleles)?;

    for (index, (bases, _)) in described.iter().enumerate() {
        let (field, expected) = match index {
            0 => ("referenceBases", &flat.reference_bases),
            i => ("alternateBases", &flat.alternate_bases[i - 1]),
        };
        if bases != expected {
            return Err(EngineError::conflict(
                &variant.id,
                field,
                Some(index),
                format!(
                    "allele '{}' spells '{}', flat description has '{}'",
                    alleles[index].id, bases, expected
                ),
            ));
        }
    }

    let variant_span = match &described[0].1 {
        Some(span) => span.clone(),
        None => {
            return Err(EngineError::conflict(
                &variant.id,
                "referenceName",
                Some(0),
                "reference allele does not overlay a reference sequence",
            ))
        }
    };
    if variant_span.reference_name != flat.reference_name {
        return Err(EngineError::conflict(
            &variant.id,
            "referenceName",
            Some(0),
            format!(
                "reference allele lies on '{}', flat description names '{}'",
                variant_span.reference_name, flat.reference_name
            ),
        ));
    }
    if variant_span.start != flat.start || variant_span.end != flat.end {
        return Err(EngineError::conflict(
            &variant.id,
            "start",
            Some(0),
            format!(
                "reference allele spans [{}, {}), flat description has [{}, {})",
                variant_span.start, variant_span.end, flat.start, flat.end
            ),
        ));
    }

    for (index, (_, span)) in described.iter().enumerate().skip(1) {
        match span {
            None => {
                return Err(EngineError::conflict(
                    &variant.id,
                    "alleleIds",
                    Some(index),
                    format!("allele '{}' is not anchored to the reference", alleles[index].id),
                ))
            }
            Some(span) if !variant_span.contains(span) => {
                return Err(EngineError::conflict(
                    &variant.id,
                    "start",
                    Some(index),
                    format!(
                        "allele '{}' spans [{}, {}) on '{}', outside [{}, {})",
                        alleles[index].id,
                        span.start,
                        span.end,
                        span.reference_name,
                        flat.start,
                        flat.end
                    ),
                ))
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Derives the flat description from the alleles.
pub fn flatten(
    resolver: &PathResolver<'_>,
    variant: &Variant,
    alleles: &[Allele],
) -> Result<FlatDescription> {
    let described = describe_alleles(resolver, variant, alleles)?;
    let mut described = described.into_iter();
    let Some((reference_bases, Some(span))) = described.next() else {
        return Err(EngineError::conflict(
            &variant.id,
            "alleleIds",
            Some(0),
            "reference allele does not overlay a reference sequence",
        ));
    };
    Ok(FlatDescription {
        reference_name: span.reference_name,
        start: span.start,
        end: span.end,
        reference_bases,
        alternate_bases: described.map(|(bases, _)| bases).collect(),
    })
}

/// Graph elements and alleles that express a flat variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiftPlan {
    pub sequences: Vec<Sequence>,
    pub segments: Vec<Segment>,
    pub joins: Vec<Join>,
    /// Reference allele first.
    pub alleles: Vec<Allele>,
}

impl LiftPlan {
    pub fn allele_ids(&self) -> Vec<Id> {
        self.alleles.iter().map(|a| a.id.clone()).collect()
    }
}

/// Plans the graph form of a flat variant.
///
/// The reference allele walks a segment over `[start, end)`. Each alternate becomes a novel
/// sequence joined to one-base flanks on either side, and its allele takes the novel
/// sequence's id.
pub fn plan_lift(graph: &SequenceGraph, variant: &Variant) -> Result<LiftPlan> {
    let flat = check_flat(variant)?.ok_or_else(|| {
        EngineError::conflict(&variant.id, "referenceName", None, "variant has no flat description")
    })?;
    let reference = graph
        .reference_by_name(&flat.reference_name)
        .ok_or_else(|| EngineError::not_found(RecordKind::Sequence, &flat.reference_name))?;
    if flat.start >= flat.end || flat.end > reference.length {
        return Err(EngineError::Range {
            sequence_id: reference.id.clone(),
            start: flat.start,
            end: flat.end,
            length: reference.length,
        });
    }
    let actual = &reference.bases[flat.start as usize..flat.end as usize];
    if actual != flat.reference_bases {
        return Err(EngineError::conflict(
            &variant.id,
            "referenceBases",
            Some(0),
            format!("reference '{}' has '{}' at [{}, {})", flat.reference_name, actual, flat.start, flat.end),
        ));
    }

    let mut plan = LiftPlan::default();
    let core = Segment::forward(&reference.id, flat.start, flat.end);
    let left = (flat.start > 0).then(|| Segment::forward(&reference.id, flat.start - 1, flat.start));
    let right = (flat.end < reference.length)
        .then(|| Segment::forward(&reference.id, flat.end, flat.end + 1));
    if left.is_none() && right.is_none() {
        return Err(EngineError::conflict(
            &variant.id,
            "alternateBases",
            None,
            "variant covers the whole reference sequence, alternates cannot be anchored",
        ));
    }

    // At least one flank exists, so the core never covers the whole sequence.
    plan.alleles.push(Allele::new(
        format!("{}.ref", variant.id),
        &variant.variant_set_id,
        Path::single(&core.id),
    ));
    if let Some(left) = &left {
        plan.joins.push(Join::end_to_start(&left.id, &core.id));
    }
    if let Some(right) = &right {
        plan.joins.push(Join::end_to_start(&core.id, &right.id));
    }

    for (i, bases) in flat.alternate_bases.iter().enumerate() {
        let index = i + 1;
        if bases.is_empty() {
            return Err(EngineError::conflict(
                &variant.id,
                "alternateBases",
                Some(index),
                "empty alternate has no novel sequence to anchor",
            ));
        }
        let novel = Sequence::novel(format!("{}.alt{}", variant.id, index), bases.to_ascii_uppercase());
        let segment = Segment::forward(&novel.id, 0, novel.length);
        if let Some(left) = &left {
            plan.joins.push(Join::end_to_start(&left.id, &segment.id));
        }
        if let Some(right) = &right {
            plan.joins.push(Join::end_to_start(&segment.id, &right.id));
        }
        plan.alleles.push(Allele::new(
            novel.id.clone(),
            &variant.variant_set_id,
            Path::single(&segment.id),
        ));
        plan.segments.push(segment);
        plan.sequences.push(novel);
    }

    plan.segments.push(core);
    plan.segments.extend(left);
    plan.segments.extend(right);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::path_resolver::TraversalOptions;
    use crate::model::PathStep;
    use pretty_assertions::assert_eq;

    /// chr1 = ACGTTGCAAC, a SNP T>A/C at 4, and a GG insertion after position 6.
    fn graph() -> SequenceGraph {
        let mut graph = SequenceGraph::new();
        graph
            .add_sequence(Sequence::reference("seq-chr1", "chr1", "rs1", "ACGTTGCAAC"))
            .unwrap();
        graph.add_sequence(Sequence::novel("alt-a", "A")).unwrap();
        graph.add_sequence(Sequence::novel("alt-c", "C")).unwrap();
        graph.add_sequence(Sequence::novel("ins", "GG")).unwrap();
        for (start, end) in [(0, 4), (4, 5), (5, 10), (5, 7), (6, 7), (7, 10)] {
            graph.add_segment(Segment::forward("seq-chr1", start, end)).unwrap();
        }
        graph.add_segment(Segment::forward("alt-a", 0, 1)).unwrap();
        graph.add_segment(Segment::forward("alt-c", 0, 1)).unwrap();
        graph.add_segment(Segment::forward("ins", 0, 2)).unwrap();
        for (from, to) in [
            ("seq-chr1:0-4", "seq-chr1:4-5"),
            ("seq-chr1:4-5", "seq-chr1:5-10"),
            ("seq-chr1:0-4", "alt-a:0-1"),
            ("alt-a:0-1", "seq-chr1:5-10"),
            ("seq-chr1:0-4", "alt-c:0-1"),
            ("alt-c:0-1", "seq-chr1:5-10"),
            ("seq-chr1:6-7", "ins:0-2"),
            ("ins:0-2", "seq-chr1:7-10"),
        ] {
            graph.add_join(Join::end_to_start(from, to)).unwrap();
        }
        graph
    }

    fn snp_alleles() -> Vec<Allele> {
        vec![
            Allele::new("ref", "vs1", Path::single("seq-chr1:4-5")),
            Allele::new("alt-a", "vs1", Path::single("alt-a:0-1")),
            Allele::new("alt-c", "vs1", Path::single("alt-c:0-1")),
        ]
    }

    fn snp() -> Variant {
        Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A", "C"])
            .with_allele_ids(vec!["ref", "alt-a", "alt-c"])
    }

    fn reconcile_variant(graph: &SequenceGraph, variant: &Variant, alleles: &[Allele]) -> Result<()> {
        let resolver = PathResolver::new(graph, TraversalOptions::acyclic());
        let flat = check_flat(variant)?.unwrap();
        reconcile(&resolver, variant, &flat, alleles)
    }

    #[test]
    fn test_snp_reconciles() {
        let graph = graph();
        reconcile_variant(&graph, &snp(), &snp_alleles()).unwrap();
    }

    #[test]
    fn test_consistent_permutation_still_reconciles() {
        let graph = graph();
        let mut variant = snp();
        variant.alternate_bases = vec!["C".to_string(), "A".to_string()];
        variant.allele_ids = Some(vec!["ref".into(), "alt-c".into(), "alt-a".into()]);
        let mut alleles = snp_alleles();
        alleles.swap(1, 2);
        reconcile_variant(&graph, &variant, &alleles).unwrap();
    }

    #[test]
    fn test_one_sided_permutation_conflicts() {
        let graph = graph();
        let mut variant = snp();
        variant.alternate_bases = vec!["C".to_string(), "A".to_string()];
        let err = reconcile_variant(&graph, &variant, &snp_alleles()).unwrap_err();
        match err {
            EngineError::RepresentationConflict { field, index, .. } => {
                assert_eq!(field, "alternateBases");
                assert_eq!(index, Some(1));
            }
            other => panic!("expected RepresentationConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_span_must_match_coordinates() {
        let graph = graph();
        let mut variant = snp();
        variant.start = Some(5);
        variant.end = Some(6);
        let err = reconcile_variant(&graph, &variant, &snp_alleles()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RepresentationConflict { field: "start", index: Some(0), .. }
        ));

        let mut renamed = snp();
        renamed.reference_name = Some("chr2".to_string());
        let err = reconcile_variant(&graph, &renamed, &snp_alleles()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RepresentationConflict { field: "referenceName", .. }
        ));
    }

    #[test]
    fn test_anchored_insertion_reconciles() {
        let graph = graph();
        let variant = Variant::flat("v2", "vs1", "chr1", 6, "C", vec!["CGG"])
            .with_allele_ids(vec!["ins-ref", "ins-alt"]);
        let alleles = vec![
            Allele::new("ins-ref", "vs1", Path::single("seq-chr1:6-7")),
            Allele::new(
                "ins-alt",
                "vs1",
                Path::new(vec![PathStep::forward("seq-chr1:6-7"), PathStep::forward("ins:0-2")]),
            ),
        ];
        reconcile_variant(&graph, &variant, &alleles).unwrap();
    }

    /// chr1 = ACGTTGCTAC with one novel `A` reused for T>A at 4 and at 7, and a `C` anchored
    /// only at 7.
    fn shared_novel_graph() -> SequenceGraph {
        let mut graph = SequenceGraph::new();
        graph
            .add_sequence(Sequence::reference("seq-chr1", "chr1", "rs1", "ACGTTGCTAC"))
            .unwrap();
        graph.add_sequence(Sequence::novel("alt-a", "A")).unwrap();
        graph.add_sequence(Sequence::novel("alt-c", "C")).unwrap();
        for (start, end) in [(0, 4), (4, 5), (5, 10), (0, 7), (7, 8), (8, 10)] {
            graph.add_segment(Segment::forward("seq-chr1", start, end)).unwrap();
        }
        graph.add_segment(Segment::forward("alt-a", 0, 1)).unwrap();
        graph.add_segment(Segment::forward("alt-c", 0, 1)).unwrap();
        for (from, to) in [
            ("seq-chr1:0-4", "alt-a:0-1"),
            ("alt-a:0-1", "seq-chr1:5-10"),
            ("seq-chr1:0-7", "alt-a:0-1"),
            ("alt-a:0-1", "seq-chr1:8-10"),
            ("seq-chr1:0-7", "alt-c:0-1"),
            ("alt-c:0-1", "seq-chr1:8-10"),
        ] {
            graph.add_join(Join::end_to_start(from, to)).unwrap();
        }
        graph
    }

    #[test]
    fn test_novel_allele_anchored_at_two_loci_reconciles_at_each() {
        let graph = shared_novel_graph();
        let at_four = Variant::flat("v4", "vs1", "chr1", 4, "T", vec!["A"])
            .with_allele_ids(vec!["r4", "alt-a"]);
        let alleles = vec![
            Allele::new("r4", "vs1", Path::single("seq-chr1:4-5")),
            Allele::new("alt-a", "vs1", Path::single("alt-a:0-1")),
        ];
        reconcile_variant(&graph, &at_four, &alleles).unwrap();

        let at_seven = Variant::flat("v7", "vs1", "chr1", 7, "T", vec!["A"])
            .with_allele_ids(vec!["r7", "alt-a"]);
        let alleles = vec![
            Allele::new("r7", "vs1", Path::single("seq-chr1:7-8")),
            Allele::new("alt-a", "vs1", Path::single("alt-a:0-1")),
        ];
        reconcile_variant(&graph, &at_seven, &alleles).unwrap();
    }

    #[test]
    fn test_allele_anchored_only_elsewhere_still_conflicts() {
        let graph = shared_novel_graph();
        let variant = Variant::flat("v4", "vs1", "chr1", 4, "T", vec!["C"])
            .with_allele_ids(vec!["r4", "alt-c"]);
        let alleles = vec![
            Allele::new("r4", "vs1", Path::single("seq-chr1:4-5")),
            Allele::new("alt-c", "vs1", Path::single("alt-c:0-1")),
        ];
        let err = reconcile_variant(&graph, &variant, &alleles).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RepresentationConflict { field: "start", index: Some(1), .. }
        ));
    }

    #[test]
    fn test_allele_count_must_match_alternates() {
        let graph = graph();
        let mut alleles = snp_alleles();
        alleles.pop();
        let err = reconcile_variant(&graph, &snp(), &alleles).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RepresentationConflict { field: "alleleIds", index: None, .. }
        ));
    }

    #[test]
    fn test_partial_and_inconsistent_flat_fields() {
        let mut variant = snp();
        variant.end = None;
        assert!(matches!(
            check_flat(&variant),
            Err(EngineError::RepresentationConflict { field: "end", .. })
        ));
        variant.end = Some(7);
        assert!(matches!(
            check_flat(&variant),
            Err(EngineError::RepresentationConflict { field: "end", .. })
        ));
    }

    #[test]
    fn test_flatten_recovers_flat_fields() {
        let graph = graph();
        let resolver = PathResolver::new(&graph, TraversalOptions::acyclic());
        let variant = Variant::graph("v1", "vs1", vec!["ref", "alt-a", "alt-c"]);
        let flat = flatten(&resolver, &variant, &snp_alleles()).unwrap();
        assert_eq!(
            flat,
            FlatDescription {
                reference_name: "chr1".to_string(),
                start: 4,
                end: 5,
                reference_bases: "T".to_string(),
                alternate_bases: vec!["A".to_string(), "C".to_string()],
            }
        );
    }

    #[test]
    fn test_lift_plan_round_trips_through_reconcile() {
        let mut graph = graph();
        let variant = Variant::flat("v9", "vs1", "chr1", 1, "CG", vec!["T", "CGA"]);
        let plan = plan_lift(&graph, &variant).unwrap();
        assert_eq!(plan.allele_ids(), vec!["v9.ref", "v9.alt1", "v9.alt2"]);

        for sequence in plan.sequences.clone() {
            graph.add_sequence(sequence).unwrap();
        }
        for segment in plan.segments.clone() {
            graph.add_segment(segment).unwrap();
        }
        for join in plan.joins.clone() {
            graph.add_join(join).unwrap();
        }
        let lifted = variant.clone().with_allele_ids(vec!["v9.ref", "v9.alt1", "v9.alt2"]);
        reconcile_variant(&graph, &lifted, &plan.alleles).unwrap();
    }

    #[test]
    fn test_lift_rejects_wrong_reference_bases() {
        let graph = graph();
        let variant = Variant::flat("v9", "vs1", "chr1", 1, "AA", vec!["T"]);
        assert!(matches!(
            plan_lift(&graph, &variant),
            Err(EngineError::RepresentationConflict { field: "referenceBases", .. })
        ));
    }
}
