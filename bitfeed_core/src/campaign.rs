use crate::accounting::covered_edge_count_with;
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::classify::classify_with;
use crate::config::BitfeedConfig;
use crate::hash::fingerprint;
use crate::map::{MapError, MapSize, VirginMap};
use crate::novelty::{NoveltyLevel, detect_novelty_with};
use crate::progress::ProgressLog;
use crate::session::{IdleOutcome, IdlePolicy, SessionMonitor};
use crate::word::{NativeWord, WordWidth};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of evaluating one execution's trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub novelty: NoveltyLevel,
    /// Cumulative (edge, bucket) pairs discovered after this execution.
    pub covered_edges: u64,
    /// True when `covered_edges` grew past every previous evaluation.
    pub new_coverage: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignStats {
    pub executions: u64,
    /// Executions that produced any novelty.
    pub paths_found: u64,
    /// Whether the most recent novel execution reached a new edge.
    pub last_was_new_edge: bool,
    /// Highest covered-edge count observed so far.
    pub covered_edges: u64,
}

#[derive(Debug)]
pub struct Campaign {
    width: WordWidth,
    virgin: VirginMap,
    session: SessionMonitor,
    checkpoints: CheckpointStore,
    idle_policy: IdlePolicy,
    stats: CampaignStats,
    paths_log: Option<ProgressLog>,
    branches_log: Option<ProgressLog>,
}

impl Campaign {
    pub fn new(size: MapSize) -> Self {
        Self {
            width: WordWidth::Native,
            virgin: VirginMap::new(size),
            session: SessionMonitor::new(size),
            checkpoints: CheckpointStore::new(size),
            idle_policy: IdlePolicy::default(),
            stats: CampaignStats::default(),
            paths_log: None,
            branches_log: None,
        }
    }

    pub fn from_config(config: &BitfeedConfig) -> Result<Self, MapError> {
        let mut campaign = Self::new(config.map.map_size()?)
            .with_word_width(config.map.word_width.into())
            .with_idle_policy(config.session.idle_policy());
        campaign.paths_log = config.progress.paths_csv.clone().map(ProgressLog::new);
        campaign.branches_log = config.progress.branches_csv.clone().map(ProgressLog::new);
        Ok(campaign)
    }

    pub fn with_word_width(mut self, width: WordWidth) -> Self {
        self.width = width;
        self
    }

    pub fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    pub fn with_progress_logs(
        mut self,
        paths: Option<ProgressLog>,
        branches: Option<ProgressLog>,
    ) -> Self {
        self.paths_log = paths;
        self.branches_log = branches;
        self
    }

    pub fn size(&self) -> MapSize {
        self.virgin.size()
    }

    pub fn virgin(&self) -> &VirginMap {
        &self.virgin
    }

    pub fn stats(&self) -> &CampaignStats {
        &self.stats
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Classifies the live `trace` in place and folds it into the campaign.
    ///
    /// The classified values stay in `trace`, so later readers of the same
    /// buffer see buckets rather than raw counts. Progress log rows are
    /// written after all campaign state is updated; a failed write is logged
    /// and never hides the result, since the virgin bits are already gone.
    pub fn evaluate(&mut self, trace: &mut [u8]) -> Evaluation {
        self.classify(trace);
        let novelty = self.detect(trace);
        let covered_edges = self.covered_edges();

        self.stats.executions += 1;
        if novelty.is_novel() {
            self.stats.paths_found += 1;
            self.stats.last_was_new_edge = novelty == NoveltyLevel::NewEdge;
            info!(
                %novelty,
                paths_found = self.stats.paths_found,
                "Found new path"
            );
        } else {
            debug!("No new path");
        }

        let new_coverage = covered_edges > self.stats.covered_edges;
        if new_coverage {
            self.stats.covered_edges = covered_edges;
            info!(covered_edges, "New branch hit");
        }

        if novelty.is_novel() {
            append_progress(self.paths_log.as_ref(), self.stats.paths_found);
        }
        if new_coverage {
            append_progress(self.branches_log.as_ref(), covered_edges);
        }

        Evaluation {
            novelty,
            covered_edges,
            new_coverage,
        }
    }

    /// Fingerprint of the raw `trace`; the buffer is not modified.
    pub fn fingerprint(&self, trace: &[u8]) -> u32 {
        fingerprint(trace)
    }

    /// Distinct (edge, bucket) pairs discovered so far.
    pub fn covered_edges(&self) -> u64 {
        match self.width {
            WordWidth::Native => covered_edge_count_with::<NativeWord>(&self.virgin),
            WordWidth::W32 => covered_edge_count_with::<u32>(&self.virgin),
            WordWidth::W64 => covered_edge_count_with::<u64>(&self.virgin),
        }
    }

    /// Snapshots the current virgin map and iteration in memory.
    pub fn record_checkpoint(&mut self, iteration: i32) {
        self.checkpoints.record(iteration, &self.virgin);
    }

    /// Writes the last recorded snapshot to `path`.
    pub fn persist_checkpoint(&self, path: &Path) -> Result<(), CheckpointError> {
        self.checkpoints.persist(path)
    }

    /// Replaces the campaign virgin map with the one saved at `path` and
    /// returns the saved iteration.
    pub fn restore_checkpoint(&mut self, path: &Path) -> Result<i32, CheckpointError> {
        let iteration = self.checkpoints.restore(path, &mut self.virgin)?;
        self.stats.covered_edges = self.covered_edges();
        Ok(iteration)
    }

    /// Resets the session map for a new monitoring window.
    pub fn begin_session(&mut self) {
        self.session.begin();
    }

    /// True when `trace` shows nothing new for the current session.
    pub fn is_session_idle(&mut self, trace: &[u8]) -> bool {
        self.session.is_idle(trace)
    }

    /// Starts a session and samples the target until it goes idle or the
    /// configured number of checks runs out.
    pub fn wait_until_idle<F>(&mut self, sample: F) -> IdleOutcome
    where
        F: FnMut(&mut [u8]),
    {
        let policy = self.idle_policy.clone();
        self.session.wait_until_idle(&policy, sample)
    }

    fn classify(&self, trace: &mut [u8]) {
        match self.width {
            WordWidth::Native => classify_with::<NativeWord>(trace),
            WordWidth::W32 => classify_with::<u32>(trace),
            WordWidth::W64 => classify_with::<u64>(trace),
        }
    }

    fn detect(&mut self, trace: &[u8]) -> NoveltyLevel {
        match self.width {
            WordWidth::Native => detect_novelty_with::<NativeWord>(&mut self.virgin, trace),
            WordWidth::W32 => detect_novelty_with::<u32>(&mut self.virgin, trace),
            WordWidth::W64 => detect_novelty_with::<u64>(&mut self.virgin, trace),
        }
    }
}

fn append_progress(log: Option<&ProgressLog>, amount: u64) {
    if let Some(log) = log {
        if let Err(e) = log.append(amount) {
            warn!("Failed to write progress row: {e}");
        }
    }
}

/// Iteration to resume from after a restore: never later than the state the
/// checkpoint was taken at. A negative saved iteration carries no position and
/// leaves `requested_start` as it is.
pub fn resume_start(requested_start: u32, restored_iteration: i32) -> u32 {
    match u32::try_from(restored_iteration) {
        Ok(restored) => requested_start.min(restored),
        Err(_) => requested_start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn toy() -> MapSize {
        MapSize::new(8).unwrap()
    }

    #[test]
    fn evaluate_walks_through_the_bucket_scenarios() {
        let mut campaign = Campaign::new(toy());

        let mut trace = [0u8, 0, 0, 1, 0, 0, 0, 0];
        let first = campaign.evaluate(&mut trace);
        assert_eq!(first.novelty, NoveltyLevel::NewEdge);
        assert_eq!(first.covered_edges, 1);
        assert!(first.new_coverage);
        assert_eq!(campaign.virgin()[3], 0xFE);

        let mut trace = [0u8, 0, 0, 1, 0, 0, 0, 0];
        let second = campaign.evaluate(&mut trace);
        assert_eq!(second.novelty, NoveltyLevel::None);
        assert!(!second.new_coverage);

        let mut trace = [0u8, 0, 0, 2, 0, 0, 0, 0];
        let third = campaign.evaluate(&mut trace);
        assert_eq!(third.novelty, NoveltyLevel::NewCount);
        assert_eq!(campaign.virgin()[3], 0xFC);
        assert_eq!(third.covered_edges, 2);

        let stats = campaign.stats();
        assert_eq!(stats.executions, 3);
        assert_eq!(stats.paths_found, 2);
        assert!(!stats.last_was_new_edge);
        assert_eq!(stats.covered_edges, 2);
    }

    #[test]
    fn evaluate_leaves_the_trace_classified() {
        let mut campaign = Campaign::new(toy());
        let mut trace = [0u8, 7, 0, 200, 0, 0, 3, 0];
        campaign.evaluate(&mut trace);
        assert_eq!(trace, [0, 8, 0, 128, 0, 0, 4, 0]);
    }

    #[test]
    fn word_widths_produce_identical_campaigns() {
        let size = MapSize::new(64).unwrap();
        let mut narrow = Campaign::new(size).with_word_width(WordWidth::W32);
        let mut wide = Campaign::new(size).with_word_width(WordWidth::W64);

        for step in 0..32u8 {
            let mut a = vec![0u8; 64];
            a[usize::from(step) * 2 % 64] = step.wrapping_mul(37) | 1;
            let mut b = a.clone();
            assert_eq!(narrow.evaluate(&mut a), wide.evaluate(&mut b));
        }
        assert_eq!(narrow.virgin(), wide.virgin());
    }

    #[test]
    fn checkpoint_round_trip_through_campaigns() -> Result<(), CheckpointError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.bin");

        let mut original = Campaign::new(toy());
        let mut trace = [0u8, 1, 0, 0, 0, 0, 0, 9];
        original.evaluate(&mut trace);
        original.record_checkpoint(77);
        original.persist_checkpoint(&path)?;

        let mut resumed = Campaign::new(toy());
        assert_eq!(resumed.restore_checkpoint(&path)?, 77);
        assert_eq!(resumed.virgin(), original.virgin());
        assert_eq!(resumed.stats().covered_edges, 2);

        let mut trace = [0u8, 1, 0, 0, 0, 0, 0, 9];
        assert_eq!(
            resumed.evaluate(&mut trace).novelty,
            NoveltyLevel::None
        );
        Ok(())
    }

    #[test]
    fn persist_writes_the_recorded_snapshot_not_the_live_map() -> Result<(), CheckpointError> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.bin");

        let mut campaign = Campaign::new(toy());
        campaign.record_checkpoint(1);
        let mut trace = [1u8; 8];
        campaign.evaluate(&mut trace);
        campaign.persist_checkpoint(&path)?;

        let bytes = fs::read(&path).unwrap();
        assert!(bytes[4..].iter().all(|&b| b == 0xFF));
        Ok(())
    }

    #[test]
    fn session_state_is_independent_of_campaign_state() {
        let mut campaign = Campaign::new(toy());
        let mut trace = [0u8, 0, 1, 0, 0, 0, 0, 0];
        campaign.begin_session();
        assert!(!campaign.is_session_idle(&trace));
        assert!(campaign.is_session_idle(&trace));

        assert_eq!(campaign.evaluate(&mut trace).novelty, NoveltyLevel::NewEdge);
        campaign.begin_session();
        assert!(!campaign.is_session_idle(&trace));
    }

    #[test]
    fn wait_until_idle_uses_configured_policy() {
        let mut campaign = Campaign::new(toy()).with_idle_policy(IdlePolicy {
            settle_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            max_polls: 2,
        });
        let mut n = 0u8;
        let outcome = campaign.wait_until_idle(|buf| {
            buf[usize::from(n)] = 1;
            n += 1;
        });
        assert_eq!(outcome, IdleOutcome::StillActive { polls: 2 });
    }

    #[test]
    fn progress_logs_record_paths_and_branches() {
        let dir = tempdir().unwrap();
        let paths = dir.path().join("paths.csv");
        let branches = dir.path().join("branches.csv");
        let mut campaign = Campaign::new(toy()).with_progress_logs(
            Some(ProgressLog::new(&paths)),
            Some(ProgressLog::new(&branches)),
        );

        campaign.evaluate(&mut [0u8, 0, 0, 1, 0, 0, 0, 0]);
        campaign.evaluate(&mut [0u8, 0, 0, 1, 0, 0, 0, 0]);
        campaign.evaluate(&mut [0u8, 0, 0, 1, 1, 0, 0, 0]);

        let path_rows: Vec<String> = fs::read_to_string(&paths)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(path_rows.len(), 3);
        assert_eq!(path_rows[0], "Date,Amount");
        assert!(path_rows[2].ends_with(",2"));

        let branch_rows = fs::read_to_string(&branches).unwrap();
        assert!(branch_rows.lines().last().unwrap().ends_with(",2"));
    }

    #[test]
    fn failed_progress_write_still_reports_novelty() {
        let dir = tempdir().unwrap();
        let unwritable = dir.path().join("missing").join("paths.csv");
        let mut campaign = Campaign::new(toy())
            .with_progress_logs(Some(ProgressLog::new(&unwritable)), None);

        let first = campaign.evaluate(&mut [0u8, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(first.novelty, NoveltyLevel::NewEdge);
        assert!(first.new_coverage);
        assert!(!unwritable.exists());

        let stats = campaign.stats();
        assert_eq!(stats.paths_found, 1);
        assert_eq!(stats.covered_edges, 1);

        let retry = campaign.evaluate(&mut [0u8, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(retry.novelty, NoveltyLevel::None);
        assert!(!retry.new_coverage);
    }

    #[test]
    fn fingerprint_does_not_touch_the_campaign() {
        let campaign = Campaign::new(toy());
        let trace = [0u8, 5, 0, 0, 0, 0, 0, 0];
        let same_bucket = [0u8, 6, 0, 0, 0, 0, 0, 0];
        assert_eq!(campaign.fingerprint(&trace), campaign.fingerprint(&same_bucket));
        assert_eq!(campaign.virgin().popcount(), 64);
    }

    #[test]
    fn resume_start_takes_the_earlier_iteration() {
        assert_eq!(resume_start(500, 120), 120);
        assert_eq!(resume_start(10, 120), 10);
        assert_eq!(resume_start(10, -3), 10);
        assert_eq!(resume_start(0, i32::MIN), 0);
    }

    #[test]
    fn from_config_applies_sections() {
        let config = BitfeedConfig::from_toml_str(
            "[map]\nsize = 4096\nword-width = \"32\"\n[session]\nmax-polls = 3\n",
        )
        .unwrap();
        let campaign = Campaign::from_config(&config).unwrap();
        assert_eq!(campaign.size().bytes(), 4096);
        assert_eq!(campaign.idle_policy.max_polls, 3);
        assert_eq!(campaign.width, WordWidth::W32);
    }
}
