use crate::hash::fingerprint;
use crate::map::MapSize;
use crate::novelty::NoveltyLevel;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Trace map is {actual} bytes but feedback expects {expected}")]
    MapSizeMismatch { expected: usize, actual: usize },
}

/// Decides whether an execution's trace map is worth keeping.
pub trait Feedback: Send + Sync {
    fn name(&self) -> &'static str;

    /// Judges `trace` (raw hit counts, possibly classified in place) and
    /// absorbs it into the feedback's state.
    fn is_interesting(&mut self, trace: &mut [u8]) -> Result<NoveltyLevel, FeedbackError>;
}

/// Deduplicates executions by fingerprint. Leaves the trace untouched.
#[derive(Debug, Clone)]
pub struct FingerprintFeedback {
    size: MapSize,
    pub known_fingerprints: HashSet<u32>,
}

impl FingerprintFeedback {
    pub fn new(size: MapSize) -> Self {
        Self {
            size,
            known_fingerprints: HashSet::new(),
        }
    }
}

impl Feedback for FingerprintFeedback {
    fn name(&self) -> &'static str {
        "FingerprintFeedback"
    }

    /// An unseen fingerprint counts as `NewCount`: the behaviour differs, but
    /// a hash cannot tell whether a whole new edge was reached.
    fn is_interesting(&mut self, trace: &mut [u8]) -> Result<NoveltyLevel, FeedbackError> {
        check_len(self.size.bytes(), trace)?;
        if self.known_fingerprints.insert(fingerprint(trace)) {
            Ok(NoveltyLevel::NewCount)
        } else {
            Ok(NoveltyLevel::None)
        }
    }
}

fn check_len(expected: usize, trace: &[u8]) -> Result<(), FeedbackError> {
    if trace.len() != expected {
        return Err(FeedbackError::MapSizeMismatch {
            expected,
            actual: trace.len(),
        });
    }
    Ok(())
}
