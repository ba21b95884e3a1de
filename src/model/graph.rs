use serde::{Deserialize, Serialize};

use crate::model::{Id, Orientation, Side};

/// A linear piece of DNA, either part of a reference assembly or novel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: Id,
    /// Reference sequences are named (e.g. `chr1`); novel ones usually are not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub length: u64,
    pub bases: String,
    #[serde(default)]
    pub is_reference: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_set_id: Option<Id>,
}

impl Sequence {
    pub fn novel(id: impl Into<Id>, bases: impl Into<String>) -> Self {
        let bases = bases.into();
        Self {
            id: id.into(),
            name: None,
            length: bases.len() as u64,
            bases,
            is_reference: false,
            reference_set_id: None,
        }
    }

    pub fn reference(
        id: impl Into<Id>,
        name: impl Into<String>,
        reference_set_id: impl Into<Id>,
        bases: impl Into<String>,
    ) -> Self {
        let bases = bases.into();
        Self {
            id: id.into(),
            name: Some(name.into()),
            length: bases.len() as u64,
            bases,
            is_reference: true,
            reference_set_id: Some(reference_set_id.into()),
        }
    }

    /// Name used for flat coordinates: the sequence name, or its id when unnamed.
    pub fn reference_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An oriented, half-open sub-range of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Id,
    pub sequence_id: Id,
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub orientation: Orientation,
}

impl Segment {
    pub fn new(
        id: impl Into<Id>,
        sequence_id: impl Into<Id>,
        start: u64,
        end: u64,
        orientation: Orientation,
    ) -> Self {
        Self {
            id: id.into(),
            sequence_id: sequence_id.into(),
            start,
            end,
            orientation,
        }
    }

    /// Forward segment with an id derived from its coordinates.
    pub fn forward(sequence_id: &str, start: u64, end: u64) -> Self {
        Self::new(
            format!("{}:{}-{}", sequence_id, start, end),
            sequence_id,
            start,
            end,
            Orientation::Forward,
        )
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn covers_whole(&self, sequence: &Sequence) -> bool {
        self.sequence_id == sequence.id && self.start == 0 && self.end == sequence.length
    }

    pub fn side(&self, side: Side) -> SegmentSide {
        SegmentSide::new(self.id.clone(), side)
    }
}

/// One end of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSide {
    pub segment_id: Id,
    pub side: Side,
}

impl SegmentSide {
    pub fn new(segment_id: impl Into<Id>, side: Side) -> Self {
        Self {
            segment_id: segment_id.into(),
            side,
        }
    }

    pub fn start(segment_id: impl Into<Id>) -> Self {
        Self::new(segment_id, Side::Start)
    }

    pub fn end(segment_id: impl Into<Id>) -> Self {
        Self::new(segment_id, Side::End)
    }
}

/// An adjacency between two segment sides.
///
/// A join from X to Y also licenses the reverse-strand reading from Y to X.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub from: SegmentSide,
    pub to: SegmentSide,
}

impl Join {
    pub fn new(from: SegmentSide, to: SegmentSide) -> Self {
        Self { from, to }
    }

    /// Join from the end of `from` to the start of `to`.
    pub fn end_to_start(from: &str, to: &str) -> Self {
        Self::new(SegmentSide::end(from), SegmentSide::start(to))
    }

    pub fn connects(&self, exit: &SegmentSide, entry: &SegmentSide) -> bool {
        (&self.from == exit && &self.to == entry) || (&self.from == entry && &self.to == exit)
    }

    /// The side across the join from `side`, if the join touches it.
    pub fn other_side(&self, side: &SegmentSide) -> Option<&SegmentSide> {
        if &self.from == side {
            Some(&self.to)
        } else if &self.to == side {
            Some(&self.from)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub segment_id: Id,
    #[serde(default)]
    pub orientation: Orientation,
}

impl PathStep {
    pub fn new(segment_id: impl Into<Id>, orientation: Orientation) -> Self {
        Self {
            segment_id: segment_id.into(),
            orientation,
        }
    }

    pub fn forward(segment_id: impl Into<Id>) -> Self {
        Self::new(segment_id, Orientation::Forward)
    }
}

/// An ordered, oriented walk over segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    pub steps: Vec<PathStep>,
}

impl Path {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    pub fn single(segment_id: impl Into<Id>) -> Self {
        Self::new(vec![PathStep::forward(segment_id)])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<PathStep> for Path {
    fn from_iter<I: IntoIterator<Item = PathStep>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
