use crate::map::{MapSize, VirginMap};
use crate::novelty::{NoveltyLevel, detect_novelty};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Timing for [`SessionMonitor::wait_until_idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Sleep before the first sample, giving the target time to react.
    pub settle_delay: Duration,
    /// Sleep between consecutive samples that still showed activity.
    pub poll_interval: Duration,
    /// Upper bound on samples taken before giving up.
    pub max_polls: u32,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            max_polls: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The `polls`-th sample showed no new session coverage.
    Idle { polls: u32 },
    /// Every one of `polls` samples still showed new coverage.
    StillActive { polls: u32 },
}

impl IdleOutcome {
    pub fn is_idle(self) -> bool {
        matches!(self, IdleOutcome::Idle { .. })
    }
}

#[derive(Clone)]
pub struct SessionMonitor {
    virgin: VirginMap,
    sample: Box<[u8]>,
}

impl std::fmt::Debug for SessionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMonitor")
            .field("virgin", &self.virgin)
            .finish_non_exhaustive()
    }
}

impl SessionMonitor {
    pub fn new(size: MapSize) -> Self {
        Self {
            virgin: VirginMap::new(size),
            sample: vec![0u8; size.bytes()].into_boxed_slice(),
        }
    }

    /// Starts a new window: nothing has been seen in this session.
    pub fn begin(&mut self) {
        self.virgin.reset();
    }

    /// True when `trace` adds nothing to what this session has already seen.
    /// Absorbs whatever it does add.
    pub fn is_idle(&mut self, trace: &[u8]) -> bool {
        detect_novelty(&mut self.virgin, trace) == NoveltyLevel::None
    }

    pub fn virgin(&self) -> &VirginMap {
        &self.virgin
    }

    /// Begins a window and samples the trace until it goes quiet.
    ///
    /// `sample` fills the provided buffer with the current trace map. The
    /// loop always terminates after `policy.max_polls` samples.
    pub fn wait_until_idle<F>(&mut self, policy: &IdlePolicy, mut sample: F) -> IdleOutcome
    where
        F: FnMut(&mut [u8]),
    {
        thread::sleep(policy.settle_delay);
        self.begin();

        for polls in 1..=policy.max_polls {
            sample(&mut self.sample[..]);
            if detect_novelty(&mut self.virgin, &self.sample) == NoveltyLevel::None {
                debug!(polls, "Target is idle");
                return IdleOutcome::Idle { polls };
            }
            debug!(polls, "Target still producing new coverage");
            thread::sleep(policy.poll_interval);
        }

        warn!(
            max_polls = policy.max_polls,
            "Target still active after the maximum number of idle checks"
        );
        IdleOutcome::StillActive {
            polls: policy.max_polls,
        }
    }
}
