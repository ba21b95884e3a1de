use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{Call, CallSet, Id};

/// The call set enumeration order recorded by a call set search.
///
/// Calls returned without `callSetId` are positional: call `i` belongs to
/// `call_set_ids[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderingPin {
    pub id: Uuid,
    pub variant_set_id: Id,
    pub call_set_ids: Vec<Id>,
    pub digest: String,
    pub pinned_at: DateTime<Utc>,
}

impl OrderingPin {
    pub fn new(variant_set_id: &Id, call_set_ids: Vec<Id>) -> Self {
        Self {
            id: Uuid::new_v4(),
            variant_set_id: variant_set_id.clone(),
            digest: Self::digest_of(variant_set_id, &call_set_ids),
            call_set_ids,
            pinned_at: Utc::now(),
        }
    }

    /// Byte-exact fingerprint of an enumeration order.
    pub fn digest_of(variant_set_id: &Id, call_set_ids: &[Id]) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(format!("variantSet:{}\n", variant_set_id));
        for id in call_set_ids {
            // Length prefix keeps ids containing the separator unambiguous.
            hasher.update(format!("callSet:{}:{}\n", id.len(), id));
        }
        hex::encode(hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.call_set_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.call_set_ids.is_empty()
    }
}

/// Records the call set order of the latest call set search per variant set and
/// enforces it for calls emitted without ids.
#[derive(Debug, Default)]
pub struct OrderingManager {
    pins: Mutex<HashMap<Id, OrderingPin>>,
}

impl OrderingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable sort on call set id. The input must be in insertion order so ties keep it.
    pub fn canonical_order(mut call_sets: Vec<CallSet>) -> Vec<CallSet> {
        call_sets.sort_by(|a, b| a.id.cmp(&b.id));
        call_sets
    }

    /// Pins the order of a call set search. Reproducing the current pin keeps its id.
    pub fn pin(&self, variant_set_id: &Id, call_sets: &[CallSet]) -> OrderingPin {
        let ids: Vec<Id> = call_sets.iter().map(|cs| cs.id.clone()).collect();
        let digest = OrderingPin::digest_of(variant_set_id, &ids);

        let mut pins = self.pins.lock();
        if let Some(existing) = pins.get(variant_set_id) {
            if existing.digest == digest {
                return existing.clone();
            }
            warn!(
                "Call set order of variant set '{}' changed ({} -> {} call sets); pin {} superseded",
                variant_set_id,
                existing.len(),
                ids.len(),
                existing.id
            );
        }
        let pin = OrderingPin::new(variant_set_id, ids);
        debug!(
            "Pinned call set order {} for variant set '{}' ({} call sets)",
            pin.id,
            variant_set_id,
            pin.len()
        );
        pins.insert(variant_set_id.clone(), pin.clone());
        pin
    }

    pub fn current(&self, variant_set_id: &Id) -> Option<OrderingPin> {
        self.pins.lock().get(variant_set_id).cloned()
    }

    pub fn forget(&self, variant_set_id: &Id) {
        self.pins.lock().remove(variant_set_id);
    }

    /// Confirms that `pin_id` is the live pin of the variant set and that the call sets
    /// enumerate exactly as they did when it was taken.
    pub fn check_pin(
        &self,
        variant_set_id: &Id,
        pin_id: Uuid,
        current_order: &[CallSet],
    ) -> Result<OrderingPin> {
        let pin = self.current(variant_set_id).ok_or_else(|| {
            EngineError::ordering(variant_set_id, "no call set search has pinned an order")
        })?;
        if pin.id != pin_id {
            return Err(EngineError::ordering(
                variant_set_id,
                format!("pin {} was superseded by pin {}", pin_id, pin.id),
            ));
        }
        let ids: Vec<Id> = current_order.iter().map(|cs| cs.id.clone()).collect();
        if OrderingPin::digest_of(variant_set_id, &ids) != pin.digest {
            return Err(EngineError::ordering(
                variant_set_id,
                format!(
                    "call set enumeration no longer reproduces pin {} ({} pinned, {} now)",
                    pin.id,
                    pin.len(),
                    ids.len()
                ),
            ));
        }
        Ok(pin)
    }

    /// Puts a variant's calls in pin order and strips their call set identifiers.
    pub fn arrange(pin: &OrderingPin, variant_id: &Id, calls: Vec<Call>) -> Result<Vec<Call>> {
        let mut by_call_set: HashMap<Id, Call> = HashMap::new();
        for call in calls {
            if let Some(call_set_id) = call.call_set_id.clone() {
                by_call_set.insert(call_set_id, call);
            }
        }

        let mut ordered = Vec::with_capacity(pin.len());
        for call_set_id in &pin.call_set_ids {
            let call = by_call_set.remove(call_set_id).ok_or_else(|| {
                EngineError::ordering(
                    &pin.variant_set_id,
                    format!(
                        "variant '{}' has no call for call set '{}', so positions cannot pair",
                        variant_id, call_set_id
                    ),
                )
            })?;
            ordered.push(call);
        }
        if let Some(extra) = by_call_set.keys().next() {
            return Err(EngineError::ordering(
                &pin.variant_set_id,
                format!(
                    "variant '{}' has a call for call set '{}', which the pin does not list",
                    variant_id, extra
                ),
            ));
        }

        Self::verify_call_order(pin, &ordered)?;
        Ok(ordered.iter().map(Call::anonymized).collect())
    }

    /// Call `i` must belong to the pin's call set `i`, and the lengths must agree.
    pub fn verify_call_order(pin: &OrderingPin, calls: &[Call]) -> Result<()> {
        if calls.len() != pin.len() {
            return Err(EngineError::ordering(
                &pin.variant_set_id,
                format!("{} calls for {} pinned call sets", calls.len(), pin.len()),
            ));
        }
        for (index, (call, expected)) in calls.iter().zip(&pin.call_set_ids).enumerate() {
            if call.call_set_id.as_ref() != Some(expected) {
                return Err(EngineError::ordering(
                    &pin.variant_set_id,
                    format!(
                        "position {} holds a call for '{}', the pin expects '{}'",
                        index,
                        call.call_set_id.as_deref().unwrap_or("?"),
                        expected
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_sets(ids: &[&str]) -> Vec<CallSet> {
        ids.iter()
            .map(|id| CallSet::new(*id, format!("sample-{}", id), vec!["vs1".to_string()]))
            .collect()
    }

    #[test]
    fn test_canonical_order_is_stable_on_id() {
        let ordered = OrderingManager::canonical_order(call_sets(&["cs2", "cs1", "cs3"]));
        let ids: Vec<&str> = ordered.iter().map(|cs| cs.id.as_str()).collect();
        assert_eq!(ids, vec!["cs1", "cs2", "cs3"]);
    }

    #[test]
    fn test_reproducing_an_order_keeps_the_pin() {
        let manager = OrderingManager::new();
        let vs = "vs1".to_string();
        let first = manager.pin(&vs, &call_sets(&["cs1", "cs2"]));
        let again = manager.pin(&vs, &call_sets(&["cs1", "cs2"]));
        assert_eq!(first.id, again.id);

        let changed = manager.pin(&vs, &call_sets(&["cs0", "cs1", "cs2"]));
        assert_ne!(first.id, changed.id);
        assert!(matches!(
            manager.check_pin(&vs, first.id, &call_sets(&["cs0", "cs1", "cs2"])),
            Err(EngineError::OrderingViolation { .. })
        ));
        manager
            .check_pin(&vs, changed.id, &call_sets(&["cs0", "cs1", "cs2"]))
            .unwrap();
    }

    #[test]
    fn test_digest_separates_ids() {
        let vs = "vs1".to_string();
        let joined = OrderingPin::digest_of(&vs, &["a\ncallSet:1:b".to_string()]);
        let split = OrderingPin::digest_of(&vs, &["a".to_string(), "b".to_string()]);
        assert_ne!(joined, split);
        assert_eq!(split.len(), 64);
    }

    #[test]
    fn test_arrange_pairs_positions_and_anonymizes() {
        let vs = "vs1".to_string();
        let pin = OrderingPin::new(&vs, vec!["cs1".to_string(), "cs2".to_string()]);
        let calls = vec![
            Call::new("cs2", "v1", vec![1, 1]),
            Call::new("cs1", "v1", vec![0, 1]),
        ];
        let arranged = OrderingManager::arrange(&pin, &"v1".to_string(), calls).unwrap();
        assert_eq!(arranged.len(), 2);
        assert_eq!(arranged[0].genotype, vec![0, 1]);
        assert_eq!(arranged[1].genotype, vec![1, 1]);
        assert!(arranged.iter().all(|c| c.call_set_id.is_none()));

        let missing = vec![Call::new("cs1", "v1", vec![0, 1])];
        assert!(matches!(
            OrderingManager::arrange(&pin, &"v1".to_string(), missing),
            Err(EngineError::OrderingViolation { .. })
        ));
    }

    #[test]
    fn test_reordered_calls_violate_the_pin() {
        let vs = "vs1".to_string();
        let pin = OrderingPin::new(&vs, vec!["cs1".to_string(), "cs2".to_string()]);
        let reordered = vec![
            Call::new("cs2", "v1", vec![1, 1]),
            Call::new("cs1", "v1", vec![0, 1]),
        ];
        assert!(matches!(
            OrderingManager::verify_call_order(&pin, &reordered),
            Err(EngineError::OrderingViolation { .. })
        ));
    }
}
