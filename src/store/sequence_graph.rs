use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, RecordKind, Result};
use crate::model::{Id, Join, Segment, SegmentSide, Sequence, Side};

/// Stable index of a sequence in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceHandle(u32);

/// Stable index of a segment in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentHandle(u32);

/// A segment side addressed by handle.
pub type SideHandle = (SegmentHandle, Side);

/// Outcome of adding a graph element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    New,
    /// A byte-identical element was already present.
    Unchanged,
}

/// Characters accepted in sequence bases (IUPAC nucleotide codes).
const IUPAC: &[u8] = b"ACGTUNRYSWKMBDHV";

/// Append-only arena of sequences, segments and joins.
///
/// Elements are never mutated or removed once added, so a path validated against the
/// graph stays valid as the graph grows.
#[derive(Debug, Clone, Default)]
pub struct SequenceGraph {
    sequences: Vec<Sequence>,
    segments: Vec<Segment>,
    segment_sequence: Vec<SequenceHandle>,
    joins: Vec<Join>,
    sequence_index: HashMap<Id, SequenceHandle>,
    segment_index: HashMap<Id, SegmentHandle>,
    join_index: HashSet<Join>,
    adjacency: HashMap<SideHandle, Vec<SideHandle>>,
}

impl SequenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the arena from stored records, validating them in order.
    pub fn from_records(
        sequences: Vec<Sequence>,
        segments: Vec<Segment>,
        joins: Vec<Join>,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for sequence in sequences {
            graph.add_sequence(sequence)?;
        }
        for segment in segments {
            graph.add_segment(segment)?;
        }
        for join in joins {
            graph.add_join(join)?;
        }
        Ok(graph)
    }

    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    //-------------------------------------------------------------------------

    pub fn check_sequence(&self, sequence: &Sequence) -> Result<Added> {
        if sequence.length == 0 || sequence.bases.is_empty() {
            return Err(EngineError::InvalidSequence {
                sequence_id: sequence.id.clone(),
                reason: "sequence is empty".to_string(),
            });
        }
        if sequence.bases.len() as u64 != sequence.length {
            return Err(EngineError::InvalidSequence {
                sequence_id: sequence.id.clone(),
                reason: format!(
                    "declared length {} but {} bases given",
                    sequence.length,
                    sequence.bases.len()
                ),
            });
        }
        if let Some(position) = sequence.bases.bytes().position(|b| !IUPAC.contains(&b)) {
            return Err(EngineError::InvalidSequence {
                sequence_id: sequence.id.clone(),
                reason: format!("unexpected character at offset {}", position),
            });
        }
        if sequence.is_reference && sequence.reference_set_id.is_none() {
            return Err(EngineError::InvalidRecord {
                kind: RecordKind::Sequence,
                reason: format!("reference sequence '{}' has no referenceSetId", sequence.id),
            });
        }
        match self.sequence(&sequence.id) {
            Some(existing) if existing == sequence => Ok(Added::Unchanged),
            Some(_) => Err(EngineError::duplicate(RecordKind::Sequence, &sequence.id)),
            None => Ok(Added::New),
        }
    }

    pub fn add_sequence(&mut self, sequence: Sequence) -> Result<Added> {
        let added = self.check_sequence(&sequence)?;
        if added == Added::New {
            let handle = SequenceHandle(self.sequences.len() as u32);
            self.sequence_index.insert(sequence.id.clone(), handle);
            self.sequences.push(sequence);
        }
        Ok(added)
    }

    pub fn check_segment(&self, segment: &Segment) -> Result<Added> {
        let sequence = self
            .sequence(&segment.sequence_id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Sequence, &segment.sequence_id))?;
        if segment.start >= segment.end || segment.end > sequence.length {
            return Err(EngineError::Range {
                sequence_id: sequence.id.clone(),
                start: segment.start,
                end: segment.end,
                length: sequence.length,
            });
        }
        match self.segment(&segment.id) {
            Some(existing) if existing == segment => Ok(Added::Unchanged),
            Some(_) => Err(EngineError::duplicate(RecordKind::Segment, &segment.id)),
            None => Ok(Added::New),
        }
    }

    pub fn add_segment(&mut self, segment: Segment) -> Result<Added> {
        let added = self.check_segment(&segment)?;
        if added == Added::New {
            let handle = SegmentHandle(self.segments.len() as u32);
            let sequence = self.sequence_index[&segment.sequence_id];
            self.segment_index.insert(segment.id.clone(), handle);
            self.segment_sequence.push(sequence);
            self.segments.push(segment);
        }
        Ok(added)
    }

    pub fn check_join(&self, join: &Join) -> Result<Added> {
        self.side_handle(&join.from)?;
        self.side_handle(&join.to)?;
        if self.join_index.contains(join) {
            Ok(Added::Unchanged)
        } else {
            Ok(Added::New)
        }
    }

    pub fn add_join(&mut self, join: Join) -> Result<Added> {
        let added = self.check_join(&join)?;
        if added == Added::New {
            let from = self.side_handle(&join.from)?;
            let to = self.side_handle(&join.to)?;
            self.adjacency.entry(from).or_default().push(to);
            if from != to {
                self.adjacency.entry(to).or_default().push(from);
            }
            self.join_index.insert(join.clone());
            self.joins.push(join);
        }
        Ok(added)
    }

    //-------------------------------------------------------------------------

    pub fn sequence(&self, id: &str) -> Option<&Sequence> {
        self.sequence_index
            .get(id)
            .map(|handle| &self.sequences[handle.0 as usize])
    }

    /// Reference sequence by its flat-coordinate name.
    pub fn reference_by_name(&self, name: &str) -> Option<&Sequence> {
        self.sequences
            .iter()
            .find(|s| s.is_reference && s.reference_name() == name)
    }

    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.segment_index
            .get(id)
            .map(|handle| &self.segments[handle.0 as usize])
    }

    pub fn get_segment(&self, id: &str) -> Result<&Segment> {
        self.segment(id)
            .ok_or_else(|| EngineError::not_found(RecordKind::Segment, id))
    }

    pub fn segment_handle(&self, id: &str) -> Result<SegmentHandle> {
        self.segment_index
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::not_found(RecordKind::Segment, id))
    }

    pub fn segment_at(&self, handle: SegmentHandle) -> &Segment {
        &self.segments[handle.0 as usize]
    }

    pub fn sequence_of(&self, handle: SegmentHandle) -> &Sequence {
        let sequence = self.segment_sequence[handle.0 as usize];
        &self.sequences[sequence.0 as usize]
    }

    /// Bases of the segment in its sequence's forward frame.
    pub fn forward_bases(&self, handle: SegmentHandle) -> &str {
        let segment = self.segment_at(handle);
        let sequence = self.sequence_of(handle);
        &sequence.bases[segment.start as usize..segment.end as usize]
    }

    fn side_handle(&self, side: &SegmentSide) -> Result<SideHandle> {
        Ok((self.segment_handle(&side.segment_id)?, side.side))
    }

    /// Whether some join connects `exit` to `entry`, in either reading.
    pub fn is_joined(&self, exit: SideHandle, entry: SideHandle) -> bool {
        self.adjacency
            .get(&exit)
            .is_some_and(|sides| sides.contains(&entry))
    }

    pub fn adjacent(&self, side: SideHandle) -> &[SideHandle] {
        self.adjacency.get(&side).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Segment sides reachable from `side` through one join.
    pub fn neighbors_of(&self, side: &SegmentSide) -> Result<Vec<SegmentSide>> {
        let handle = self.side_handle(side)?;
        Ok(self
            .adjacent(handle)
            .iter()
            .map(|(segment, side)| self.segment_at(*segment).side(*side))
            .collect())
    }
}
