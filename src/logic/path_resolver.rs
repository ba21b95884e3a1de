use std::collections::HashSet;

use itertools::Itertools;

use crate::error::{EngineError, RecordKind, Result};
use crate::model::{Orientation, Path, Segment, Side};
use crate::store::{SegmentHandle, SequenceGraph, SideHandle};

/// How far a path may loop back over segments it already visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
    /// Permit revisiting a segment (circular genomes), within `max_steps`.
    pub allow_circular: bool,
    pub max_steps: usize,
}

impl TraversalOptions {
    pub fn acyclic() -> Self {
        Self {
            allow_circular: false,
            max_steps: usize::MAX,
        }
    }

    pub fn bounded(max_steps: usize) -> Self {
        Self {
            allow_circular: true,
            max_steps,
        }
    }
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self::acyclic()
    }
}

/// One resolved step of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStep {
    pub segment: SegmentHandle,
    /// Orientation of the step relative to the segment.
    pub orientation: Orientation,
}

impl ResolvedStep {
    /// Side through which the walk enters the segment.
    pub fn entry(&self) -> SideHandle {
        match self.orientation {
            Orientation::Forward => (self.segment, Side::Start),
            Orientation::Reverse => (self.segment, Side::End),
        }
    }

    /// Side through which the walk leaves the segment.
    pub fn exit(&self) -> SideHandle {
        let (segment, side) = self.entry();
        (segment, side.opposite())
    }
}

/// Path as a list of arena handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub steps: Vec<ResolvedStep>,
}

/// Read-only checks and materialization of paths over a [`SequenceGraph`].
///
/// Nothing here mutates the graph, so any number of resolvers may share one snapshot.
pub struct PathResolver<'g> {
    graph: &'g SequenceGraph,
    options: TraversalOptions,
}

impl<'g> PathResolver<'g> {
    pub fn new(graph: &'g SequenceGraph, options: TraversalOptions) -> Self {
        Self { graph, options }
    }

    pub fn graph(&self) -> &'g SequenceGraph {
        self.graph
    }

    /// Maps segment ids to handles without checking connectivity.
    pub fn resolve(&self, path: &Path) -> Result<ResolvedPath> {
        let steps = path
            .steps
            .iter()
            .map(|step| {
                Ok(ResolvedStep {
                    segment: self.graph.segment_handle(&step.segment_id)?,
                    orientation: step.orientation,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ResolvedPath { steps })
    }

    /// Confirms the path is a legal walk: non-empty, every consecutive pair joined
    /// exit-to-entry, and revisits only within the traversal bound.
    pub fn validate(&self, path: &Path) -> Result<ResolvedPath> {
        if path.is_empty() {
            return Err(EngineError::InvalidRecord {
                kind: RecordKind::Allele,
                reason: "path has no steps".to_string(),
            });
        }
        let resolved = self.resolve(path)?;

        for (index, (a, b)) in resolved.steps.iter().tuple_windows().enumerate() {
            if !self.graph.is_joined(a.exit(), b.entry()) {
                return Err(EngineError::DisconnectedPath {
                    index,
                    from: path.steps[index].segment_id.clone(),
                    to: path.steps[index + 1].segment_id.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (index, step) in resolved.steps.iter().enumerate() {
            if seen.insert(step.segment) {
                continue;
            }
            let segment_id = path.steps[index].segment_id.clone();
            if !self.options.allow_circular {
                return Err(EngineError::CyclicPath {
                    segment_id,
                    index,
                    reason: "circular traversal is not enabled".to_string(),
                });
            }
            if path.len() > self.options.max_steps {
                return Err(EngineError::CyclicPath {
                    segment_id,
                    index,
                    reason: format!(
                        "circular path has {} steps, the bound is {}",
                        path.len(),
                        self.options.max_steps
                    ),
                });
            }
        }

        Ok(resolved)
    }

    /// Concatenated bases of the path, reverse-complementing reverse steps.
    pub fn materialize(&self, path: &Path) -> Result<String> {
        let resolved = self.resolve(path)?;
        Ok(self.materialize_resolved(&resolved))
    }

    pub fn materialize_resolved(&self, path: &ResolvedPath) -> String {
        let mut bases = String::new();
        for step in &path.steps {
            let forward = self.graph.forward_bases(step.segment);
            let segment = self.graph.segment_at(step.segment);
            match segment.orientation.compose(step.orientation) {
                Orientation::Forward => bases.push_str(forward),
                Orientation::Reverse => bases.push_str(&reverse_complement(forward)),
            }
        }
        bases
    }
}

/// Coordinate on the segment's sequence at which the given side lies.
pub fn side_coordinate(segment: &Segment, side: Side) -> u64 {
    match (segment.orientation, side) {
        (Orientation::Forward, Side::Start) | (Orientation::Reverse, Side::End) => segment.start,
        (Orientation::Forward, Side::End) | (Orientation::Reverse, Side::Start) => segment.end,
    }
}

pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        other => other,
    }
}

pub fn reverse_complement(bases: &str) -> String {
    bases.bytes().rev().map(|b| complement(b) as char).collect()
}
