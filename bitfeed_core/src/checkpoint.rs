use crate::map::{MapSize, VirginMap};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Size of the iteration counter at the head of a checkpoint file.
pub const ITERATION_BYTES: usize = std::mem::size_of::<i32>();

/// Errors raised while saving or loading a checkpoint file.
///
/// Every variant means crash recovery is unavailable for that path; none of
/// them leave the live virgin map partially overwritten.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The file could not be opened (missing, permission denied, ...).
    #[error("Cannot open checkpoint {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A write transferred fewer bytes than the section requires.
    #[error("Short write of {section} to checkpoint {path:?}: {source}")]
    ShortWrite {
        path: PathBuf,
        section: &'static str,
        #[source]
        source: io::Error,
    },

    /// The file ended before the section was complete.
    #[error("Short read of {section} from checkpoint {path:?}: {source}")]
    ShortRead {
        path: PathBuf,
        section: &'static str,
        #[source]
        source: io::Error,
    },

    /// The file is longer than `4 + map size` bytes.
    #[error("Checkpoint {path:?} has trailing data after the {expected}-byte virgin map")]
    TrailingData { path: PathBuf, expected: usize },

    /// Any other I/O failure, e.g. flushing or probing for trailing data.
    #[error("Checkpoint I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The last known-good discovery state.
#[derive(Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub iteration: i32,
    pub virgin: Box<[u8]>,
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("iteration", &self.iteration)
            .field("virgin_len", &self.virgin.len())
            .finish()
    }
}

/// Holds a snapshot of the campaign virgin map and writes it to disk on demand.
///
/// The on-disk layout is the iteration as a native-endian `i32` followed by the
/// raw virgin map, with no header or checksum: exactly `4 + map size` bytes.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    snapshot: Checkpoint,
}

impl CheckpointStore {
    /// An empty store: iteration 0 and an all-unseen virgin map.
    pub fn new(size: MapSize) -> Self {
        Self {
            snapshot: Checkpoint {
                iteration: 0,
                virgin: vec![0xFFu8; size.bytes()].into_boxed_slice(),
            },
        }
    }

    pub fn snapshot(&self) -> &Checkpoint {
        &self.snapshot
    }

    /// Copies the live map and counter into the held-back snapshot. No I/O.
    pub fn record(&mut self, iteration: i32, virgin: &VirginMap) {
        assert_eq!(
            virgin.len(),
            self.snapshot.virgin.len(),
            "virgin map is {} bytes but the checkpoint store holds {} bytes",
            virgin.len(),
            self.snapshot.virgin.len()
        );
        self.snapshot.virgin.copy_from_slice(virgin.as_bytes());
        self.snapshot.iteration = iteration;
        debug!(iteration, "Recorded in-memory checkpoint");
    }

    /// Writes the held-back snapshot to `path`, truncating any existing file.
    pub fn persist(&self, path: &Path) -> Result<(), CheckpointError> {
        let mut file = File::create(path).map_err(|source| CheckpointError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        file.write_all(&self.snapshot.iteration.to_ne_bytes())
            .map_err(|source| CheckpointError::ShortWrite {
                path: path.to_path_buf(),
                section: "iteration",
                source,
            })?;
        file.write_all(&self.snapshot.virgin)
            .map_err(|source| CheckpointError::ShortWrite {
                path: path.to_path_buf(),
                section: "virgin map",
                source,
            })?;
        file.sync_all().map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            path = %path.display(),
            iteration = self.snapshot.iteration,
            "Persisted checkpoint"
        );
        Ok(())
    }

    /// Reads a checkpoint from `path` into `virgin` and returns its iteration.
    ///
    /// The file is read completely before `virgin` is touched, so on error the
    /// live map is unchanged. The snapshot is also updated so an immediate
    /// `persist` writes back what was loaded.
    pub fn restore(&mut self, path: &Path, virgin: &mut VirginMap) -> Result<i32, CheckpointError> {
        let checkpoint = read_checkpoint(path, virgin.size())?;
        virgin.as_bytes_mut().copy_from_slice(&checkpoint.virgin);
        info!(
            path = %path.display(),
            iteration = checkpoint.iteration,
            "Restored checkpoint"
        );
        let iteration = checkpoint.iteration;
        self.snapshot = checkpoint;
        Ok(iteration)
    }
}

/// Reads and validates a checkpoint file for a map of `size` bytes.
pub fn read_checkpoint(path: &Path, size: MapSize) -> Result<Checkpoint, CheckpointError> {
    let mut file = File::open(path).map_err(|source| CheckpointError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut iteration_bytes = [0u8; ITERATION_BYTES];
    file.read_exact(&mut iteration_bytes)
        .map_err(|source| CheckpointError::ShortRead {
            path: path.to_path_buf(),
            section: "iteration",
            source,
        })?;

    let mut virgin = vec![0u8; size.bytes()].into_boxed_slice();
    file.read_exact(&mut virgin)
        .map_err(|source| CheckpointError::ShortRead {
            path: path.to_path_buf(),
            section: "virgin map",
            source,
        })?;

    let mut probe = [0u8; 1];
    let extra = file.read(&mut probe).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if extra != 0 {
        return Err(CheckpointError::TrailingData {
            path: path.to_path_buf(),
            expected: size.bytes(),
        });
    }

    Ok(Checkpoint {
        iteration: i32::from_ne_bytes(iteration_bytes),
        virgin,
    })
}
