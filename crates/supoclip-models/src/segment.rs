//! Candidate segments proposed by the selector.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A scored, time-bounded transcript excerpt chosen for clipping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
    /// Predicted standalone value in `[0, 1]`
    pub relevance_score: f64,
    /// Why the segment was included
    pub reasoning: String,
    /// Transcript text covering the segment
    pub text: String,
}

impl CandidateSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True when the two time ranges share any interval.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True when `other` lies entirely inside this segment.
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64) -> CandidateSegment {
        CandidateSegment {
            start,
            end,
            relevance_score: 0.5,
            reasoning: String::new(),
            text: String::new(),
        }
    }

    #[test]
    fn test_overlap_is_exclusive_at_edges() {
        assert!(segment(0.0, 10.0).overlaps(&segment(5.0, 15.0)));
        assert!(!segment(0.0, 10.0).overlaps(&segment(10.0, 20.0)));
    }

    #[test]
    fn test_contains() {
        assert!(segment(0.0, 30.0).contains(&segment(5.0, 20.0)));
        assert!(!segment(5.0, 20.0).contains(&segment(0.0, 30.0)));
    }
}
