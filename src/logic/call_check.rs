//! Cross-validation of classic calls against graph allele calls.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::ServerModes;
use crate::error::{EngineError, RecordKind, Result};
use crate::model::{AlleleCall, Call, Id, Phaseset, Variant};

/// Calls and allele calls of one call set on one variant.
#[derive(Debug, Default)]
struct CallSetView<'a> {
    call: Option<&'a Call>,
    allele_calls: Vec<&'a AlleleCall>,
}

/// Checks a call on its own: identifiers, genotype range and phaseset shape.
pub fn check_call_shape(variant: &Variant, call: &Call, modes: ServerModes) -> Result<()> {
    let call_set_id = call.call_set_id.as_deref().ok_or_else(|| EngineError::InvalidRecord {
        kind: RecordKind::Call,
        reason: format!("call on variant '{}' has no callSetId", variant.id),
    })?;
    if call.variant_id.as_deref() != Some(variant.id.as_str()) {
        return Err(EngineError::InvalidRecord {
            kind: RecordKind::Call,
            reason: format!(
                "call for call set '{}' is not bound to variant '{}'",
                call_set_id, variant.id
            ),
        });
    }

    let alternates = variant.alternate_count();
    for (index, &value) in call.genotype.iter().enumerate() {
        if value < 0 || value as usize > alternates {
            return Err(EngineError::InvalidGenotype {
                call_set_id: call_set_id.to_string(),
                variant_id: variant.id.clone(),
                index,
                value,
                alternates,
            });
        }
    }

    if let Phaseset::Sequence(tokens) = &call.phaseset {
        if !modes.graph {
            return Err(EngineError::InvalidPhaseset {
                call_set_id: call_set_id.to_string(),
                reason: "per-allele phasesets require a graph-capable deployment".to_string(),
            });
        }
        if tokens.len() != call.genotype.len() {
            return Err(EngineError::InvalidPhaseset {
                call_set_id: call_set_id.to_string(),
                reason: format!(
                    "{} phaseset entries for a genotype of length {}",
                    tokens.len(),
                    call.genotype.len()
                ),
            });
        }
    }
    Ok(())
}

pub fn check_allele_call_shape(allele_call: &AlleleCall) -> Result<()> {
    if allele_call.phaseset.len() > allele_call.total_copies as usize {
        return Err(EngineError::InvalidPhaseset {
            call_set_id: allele_call.call_set_id.clone(),
            reason: format!(
                "allele '{}' has {} phaseset entries but {} copies",
                allele_call.allele_id,
                allele_call.phaseset.len(),
                allele_call.total_copies
            ),
        });
    }
    Ok(())
}

/// Copies of each allele index implied by a genotype.
pub fn implied_copies(alleles: usize, genotype: &[i32]) -> Vec<u32> {
    let mut copies = vec![0; alleles];
    for &value in genotype {
        if let Some(count) = usize::try_from(value).ok().and_then(|i| copies.get_mut(i)) {
            *count += 1;
        }
    }
    copies
}

fn allele_index(variant: &Variant, allele_call: &AlleleCall) -> Result<usize> {
    let allele_ids = variant.allele_ids.as_ref().ok_or_else(|| EngineError::InvalidRecord {
        kind: RecordKind::AlleleCall,
        reason: format!(
            "allele call '{}' is bound to variant '{}', which has no alleleIds",
            allele_call.key(),
            variant.id
        ),
    })?;
    allele_ids
        .iter()
        .position(|id| id == &allele_call.allele_id)
        .ok_or_else(|| EngineError::InvalidRecord {
            kind: RecordKind::AlleleCall,
            reason: format!(
                "allele '{}' is not one of the alleles of variant '{}'",
                allele_call.allele_id, variant.id
            ),
        })
}

/// Checks every call and allele call bound to one variant, including the mode obligations.
pub fn check_variant_calls(
    variant: &Variant,
    calls: &[Call],
    allele_calls: &[AlleleCall],
    modes: ServerModes,
) -> Result<()> {
    let mut by_call_set: BTreeMap<&str, CallSetView<'_>> = BTreeMap::new();

    for call in calls {
        check_call_shape(variant, call, modes)?;
        let call_set_id = call.call_set_id.as_deref().unwrap_or_default();
        let view = by_call_set.entry(call_set_id).or_default();
        if view.call.is_some() {
            return Err(EngineError::duplicate(
                RecordKind::Call,
                format!("{}/{}", variant.id, call_set_id),
            ));
        }
        view.call = Some(call);
    }

    let mut keys = HashSet::new();
    for allele_call in allele_calls {
        check_allele_call_shape(allele_call)?;
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
        let key = allele_call.key();
        if !keys.insert(key.clone()) {
            return Err(EngineError::duplicate(RecordKind::AlleleCall, key.to_string()));
        }
        by_call_set
            .entry(allele_call.call_set_id.as_str())
            .or_default()
            .allele_calls
            .push(allele_call);
    }

    for (call_set_id, view) in &by_call_set {
        check_call_set(variant, call_set_id, view, modes)?;
    }
    Ok(())
}

fn check_call_set(
    variant: &Variant,
    call_set_id: &str,
    view: &CallSetView<'_>,
    modes: ServerModes,
) -> Result<()> {
    let indexed = view
        .allele_calls
        .iter()
        .map(|ac| Ok((allele_index(variant, ac)?, *ac)))
        .collect::<Result<Vec<(usize, &AlleleCall)>>>()?;

    let Some(call) = view.call else {
        if modes.classic && !indexed.is_empty() {
            return Err(EngineError::MissingCall {
                call_set_id: call_set_id.to_string(),
                variant_id: variant.id.clone(),
            });
        }
        return Ok(());
    };

    // Classic-only variants have nothing to compare against.
    let Some(allele_ids) = variant.allele_ids.as_ref() else {
        return Ok(());
    };
    let implied = implied_copies(allele_ids.len(), &call.genotype);

    for (index, allele_call) in &indexed {
        if implied[*index] != allele_call.total_copies {
            return Err(EngineError::GenotypeAlleleMismatch {
                call_set_id: call_set_id.to_string(),
                variant_id: variant.id.clone(),
                allele_id: allele_call.allele_id.clone(),
                expected: implied[*index],
                actual: allele_call.total_copies,
            });
        }
    }

    if modes.graph {
        for (index, copies) in implied.iter().enumerate() {
            if *copies > 0 && !indexed.iter().any(|(i, _)| *i == index) {
                return Err(EngineError::MissingAlleleCall {
                    call_set_id: call_set_id.to_string(),
                    variant_id: variant.id.clone(),
                    allele_id: allele_ids[index].clone(),
                });
            }
        }
    }

    check_phasing(call_set_id, call, &indexed)
}

/// Allele calls may only place copies on a molecule where the call's phasing puts them.
fn check_phasing(call_set_id: &str, call: &Call, indexed: &[(usize, &AlleleCall)]) -> Result<()> {
    if call.phaseset.is_absent() {
        return Ok(());
    }
    // token -> allele index -> copies on that molecule
    let mut molecules: HashMap<&str, HashMap<usize, u32>> = HashMap::new();
    for (position, &value) in call.genotype.iter().enumerate() {
        if let Some(token) = call.phaseset.token_at(position) {
            *molecules
                .entry(token)
                .or_default()
                .entry(value as usize)
                .or_default() += 1;
        }
    }

    for (index, allele_call) in indexed {
        for (token, claimed) in token_counts(&allele_call.phaseset) {
            let placed = molecules
                .get(token)
                .and_then(|alleles| alleles.get(index))
                .copied()
                .unwrap_or(0);
            if claimed > placed {
                return Err(EngineError::PhasesetConflict {
                    call_set_id: call_set_id.to_string(),
                    allele_id: allele_call.allele_id.clone(),
                    token: token.to_string(),
                    reason: format!(
                        "allele call places {} copies there, the genotype places {}",
                        claimed, placed
                    ),
                });
            }
        }
    }
    Ok(())
}

fn token_counts(tokens: &[String]) -> BTreeMap<&str, u32> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Allele calls of one call set for one allele must agree on how many copies each shared
/// phaseset token carries.
pub fn check_allele_phasesets(allele_calls: &[AlleleCall]) -> Result<()> {
    let mut claims: HashMap<(&Id, &Id, &str), u32> = HashMap::new();
    for allele_call in allele_calls {
        for (token, copies) in token_counts(&allele_call.phaseset) {
            let key = (&allele_call.call_set_id, &allele_call.allele_id, token);
            match claims.get(&key) {
                Some(previous) if *previous != copies => {
                    return Err(EngineError::PhasesetConflict {
                        call_set_id: allele_call.call_set_id.clone(),
                        allele_id: allele_call.allele_id.clone(),
                        token: token.to_string(),
                        reason: format!(
                            "{} copies claimed here, {} claimed by another allele call",
                            copies, previous
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    claims.insert(key, copies);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BOTH: ServerModes = ServerModes {
        classic: true,
        graph: true,
    };
    const GRAPH: ServerModes = ServerModes {
        classic: false,
        graph: true,
    };
    const CLASSIC: ServerModes = ServerModes {
        classic: true,
        graph: false,
    };

    fn variant() -> Variant {
        Variant::flat("v1", "vs1", "chr1", 4, "T", vec!["A", "C"])
            .with_allele_ids(vec!["ref", "a1", "a2"])
    }

    #[test]
    fn test_implied_copies() {
        assert_eq!(implied_copies(3, &[2, 1]), vec![0, 1, 1]);
        assert_eq!(implied_copies(3, &[0, 0]), vec![2, 0, 0]);
        assert_eq!(implied_copies(2, &[1, 1, 0]), vec![1, 2]);
    }

    #[rstest]
    #[case(vec![0, 2], true)]
    #[case(vec![1, 1], true)]
    #[case(vec![3], false)]
    #[case(vec![0, -1], false)]
    fn test_genotype_range(#[case] genotype: Vec<i32>, #[case] valid: bool) {
        let call = Call::new("cs1", "v1", genotype);
        let result = check_call_shape(&variant(), &call, BOTH);
        assert_eq!(result.is_ok(), valid);
        if !valid {
            assert!(matches!(result, Err(EngineError::InvalidGenotype { alternates: 2, .. })));
        }
    }

    #[test]
    fn test_sequence_phaseset_needs_graph_and_matching_length() {
        let call = Call::new("cs1", "v1", vec![0, 1])
            .with_phaseset(Phaseset::Sequence(vec!["p1".into(), "p2".into()]));
        assert!(check_call_shape(&variant(), &call, BOTH).is_ok());
        assert!(matches!(
            check_call_shape(&variant(), &call, CLASSIC),
            Err(EngineError::InvalidPhaseset { .. })
        ));

        let short = Call::new("cs1", "v1", vec![0, 1])
            .with_phaseset(Phaseset::Sequence(vec!["p1".into()]));
        assert!(matches!(
            check_call_shape(&variant(), &short, BOTH),
            Err(EngineError::InvalidPhaseset { .. })
        ));
    }

    #[test]
    fn test_graph_mode_requires_allele_calls_for_implied_alleles() {
        let calls = vec![Call::new("cs1", "v1", vec![2, 1])];
        let only_a2 = vec![AlleleCall::new("cs1", "a2", Some("v1"), 1)];
        match check_variant_calls(&variant(), &calls, &only_a2, GRAPH) {
            Err(EngineError::MissingAlleleCall { allele_id, .. }) => assert_eq!(allele_id, "a1"),
            other => panic!("expected MissingAlleleCall, got {:?}", other),
        }

        let both = vec![
            AlleleCall::new("cs1", "a2", Some("v1"), 1),
            AlleleCall::new("cs1", "a1", Some("v1"), 1),
        ];
        check_variant_calls(&variant(), &calls, &both, GRAPH).unwrap();
        // Classic-only deployments do not need allele calls at all.
        check_variant_calls(&variant(), &calls, &[], CLASSIC).unwrap();
    }

    #[test]
    fn test_classic_mode_requires_calls_for_allele_calls() {
        let allele_calls = vec![AlleleCall::new("cs1", "a1", Some("v1"), 1)];
        assert!(matches!(
            check_variant_calls(&variant(), &[], &allele_calls, CLASSIC),
            Err(EngineError::MissingCall { .. })
        ));
        check_variant_calls(&variant(), &[], &allele_calls, GRAPH).unwrap();
    }

    #[test]
    fn test_copy_number_mismatch() {
        let calls = vec![Call::new("cs1", "v1", vec![1, 1])];
        let allele_calls = vec![AlleleCall::new("cs1", "a1", Some("v1"), 1)];
        match check_variant_calls(&variant(), &calls, &allele_calls, BOTH) {
            Err(EngineError::GenotypeAlleleMismatch { expected, actual, .. }) => {
                assert_eq!((expected, actual), (2, 1));
            }
            other => panic!("expected GenotypeAlleleMismatch, got {:?}", other),
        }

        // Zero copies of an allele the genotype does not mention agree.
        let calls = vec![Call::new("cs1", "v1", vec![1, 1])];
        let allele_calls = vec![
            AlleleCall::new("cs1", "a1", Some("v1"), 2),
            AlleleCall::new("cs1", "a2", Some("v1"), 0),
        ];
        check_variant_calls(&variant(), &calls, &allele_calls, BOTH).unwrap();
    }

    #[test]
    fn test_duplicate_allele_call_triple() {
        let calls = vec![Call::new("cs1", "v1", vec![0, 1])];
        let allele_calls = vec![
            AlleleCall::new("cs1", "a1", Some("v1"), 1),
            AlleleCall::new("cs1", "a1", Some("v1"), 1),
        ];
        assert!(matches!(
            check_variant_calls(&variant(), &calls, &allele_calls, CLASSIC),
            Err(EngineError::DuplicateId { kind: RecordKind::AlleleCall, .. })
        ));
    }

    #[test]
    fn test_allele_call_phaseset_bounded_by_copies() {
        let allele_call = AlleleCall::new("cs1", "a1", Some("v1"), 1).with_phaseset(vec!["p1", "p2"]);
        assert!(matches!(
            check_allele_call_shape(&allele_call),
            Err(EngineError::InvalidPhaseset { .. })
        ));
    }

    #[test]
    fn test_phasing_must_follow_call() {
        let call = Call::new("cs1", "v1", vec![2, 1])
            .with_phaseset(Phaseset::Sequence(vec!["p1".into(), "p2".into()]));
        let coherent = vec![
            AlleleCall::new("cs1", "a2", Some("v1"), 1).with_phaseset(vec!["p1"]),
            AlleleCall::new("cs1", "a1", Some("v1"), 1).with_phaseset(vec!["p2"]),
        ];
        check_variant_calls(&variant(), &[call.clone()], &coherent, BOTH).unwrap();

        let swapped = vec![
            AlleleCall::new("cs1", "a2", Some("v1"), 1).with_phaseset(vec!["p2"]),
            AlleleCall::new("cs1", "a1", Some("v1"), 1).with_phaseset(vec!["p1"]),
        ];
        assert!(matches!(
            check_variant_calls(&variant(), &[call], &swapped, BOTH),
            Err(EngineError::PhasesetConflict { .. })
        ));
    }

    #[test]
    fn test_unphased_call_does_not_constrain_allele_phasing() {
        let call = Call::new("cs1", "v1", vec![2, 1]);
        let allele_calls = vec![
            AlleleCall::new("cs1", "a2", Some("v1"), 1).with_phaseset(vec!["p9"]),
            AlleleCall::new("cs1", "a1", Some("v1"), 1),
        ];
        check_variant_calls(&variant(), &[call], &allele_calls, BOTH).unwrap();
    }

    #[test]
    fn test_allele_phasesets_agree_across_variants() {
        let bound = AlleleCall::new("cs1", "a1", Some("v1"), 2).with_phaseset(vec!["p1"]);
        let unbound = AlleleCall::new("cs1", "a1", None, 2).with_phaseset(vec!["p1"]);
        check_allele_phasesets(&[bound.clone(), unbound]).unwrap();

        let doubled = AlleleCall::new("cs1", "a1", None, 2).with_phaseset(vec!["p1", "p1"]);
        assert!(matches!(
            check_allele_phasesets(&[bound, doubled]),
            Err(EngineError::PhasesetConflict { .. })
        ));
    }
}
