pub mod accounting;
pub mod campaign;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod feedback;
pub mod hash;
pub mod map;
pub mod novelty;
pub mod progress;
pub mod session;
#[cfg(unix)]
pub mod shmem;
pub mod word;

pub use accounting::{covered_edge_count, covered_edge_count_with};
pub use campaign::{Campaign, CampaignStats, Evaluation, resume_start};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use classify::{ClassBucketTable, classify, classify_with};
pub use config::{BitfeedConfig, DEFAULT_SHM_ENV_VAR};
pub use feedback::{Feedback, FeedbackError, FingerprintFeedback};
pub use hash::{FINGERPRINT_SEED, fingerprint, hash32};
pub use map::{CoverageMap, DEFAULT_MAP_SIZE, MapError, MapSize, VirginMap};
pub use novelty::{NoveltyLevel, detect_novelty, detect_novelty_with};
pub use progress::{ProgressError, ProgressLog};
pub use session::{IdleOutcome, IdlePolicy, SessionMonitor};
#[cfg(unix)]
pub use shmem::{SharedCoverageMap, ShmemError};
pub use word::{NativeWord, Word, WordWidth};
