use crate::logic::GraphElement;
use crate::model::{
    Allele, AlleleCall, Call, CallSet, Join, Path, Segment, Sequence, Variant, VariantSet,
};
use crate::seed::snapshot::{CallBatch, Snapshot};

/// A small dual-mode data set: a triallelic SNP written with both descriptions, a flat
/// SNP lifted into the graph, and two samples called on both.
pub fn demo_snapshot() -> Snapshot {
    let mut graph = vec![
        GraphElement::Sequence(Sequence::reference("chr1", "chr1", "rs1", "ACGTTGCAAC")),
        GraphElement::Sequence(Sequence::novel("alt-a", "A")),
        GraphElement::Sequence(Sequence::novel("alt-c", "C")),
    ];
    for (sequence_id, start, end) in [
        ("chr1", 0, 4),
        ("chr1", 4, 5),
        ("chr1", 5, 10),
        ("alt-a", 0, 1),
        ("alt-c", 0, 1),
    ] {
        graph.push(GraphElement::Segment(Segment::forward(sequence_id, start, end)));
    }
    for (from, to) in [
        ("chr1:0-4", "chr1:4-5"),
        ("chr1:4-5", "chr1:5-10"),
        ("chr1:0-4", "alt-a:0-1"),
        ("alt-a:0-1", "chr1:5-10"),
        ("chr1:0-4", "alt-c:0-1"),
        ("alt-c:0-1", "chr1:5-10"),
    ] {
        graph.push(GraphElement::Join(Join::end_to_start(from, to)));
    }

    let v1 = Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A", "C"])
        .with_allele_ids(vec!["v1.ref", "alt-a", "alt-c"]);

    Snapshot {
        reference_sets: vec!["rs1".to_string()],
        datasets: vec!["ds1".to_string()],
        variant_sets: vec![VariantSet::new("vs1", "ds1", "rs1")],
        graph,
        alleles: vec![
            Allele::new("v1.ref", "vs1", Path::single("chr1:4-5")),
            Allele::new("alt-a", "vs1", Path::single("alt-a:0-1")),
            Allele::new("alt-c", "vs1", Path::single("alt-c:0-1")),
        ],
        call_sets: vec![
            CallSet::new("cs1", "sample-1", vec!["vs1".to_string()]),
            CallSet::new("cs2", "sample-2", vec!["vs1".to_string()]),
        ],
        variants: vec![v1],
        lift: vec![Variant::flat("v2", "vs1", "chr1", 7, "A", vec!["G"])],
        call_batches: vec![
            CallBatch {
                variant_id: "v1".to_string(),
                calls: vec![
                    Call::new("cs1", "v1", vec![2, 1]),
                    Call::new("cs2", "v1", vec![0, 1]),
                ],
                allele_calls: vec![
                    AlleleCall::new("cs1", "alt-c", Some("v1"), 1),
                    AlleleCall::new("cs1", "alt-a", Some("v1"), 1),
                    AlleleCall::new("cs2", "v1.ref", Some("v1"), 1),
                    AlleleCall::new("cs2", "alt-a", Some("v1"), 1),
                ],
            },
            CallBatch {
                variant_id: "v2".to_string(),
                calls: vec![
                    Call::new("cs1", "v2", vec![0, 0]),
                    Call::new("cs2", "v2", vec![0, 1]),
                ],
                allele_calls: vec![
                    AlleleCall::new("cs1", "v2.ref", Some("v2"), 2),
                    AlleleCall::new("cs2", "v2.ref", Some("v2"), 1),
                    AlleleCall::new("cs2", "v2.alt1", Some("v2"), 1),
                ],
            },
        ],
    }
}
