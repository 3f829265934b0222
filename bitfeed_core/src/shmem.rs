use crate::map::MapSize;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ShmemError {
    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
    #[error("Cannot open shared memory object {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Shared memory object {path:?} holds {actual} bytes, need {expected}")]
    TooSmall {
        path: PathBuf,
        expected: usize,
        actual: u64,
    },
    #[error("Cannot map shared memory object {path:?}: {source}")]
    Map {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A coverage map living in memory shared with the target process.
///
/// Must only be read while the target is paused; the execution-control layer
/// is responsible for that ordering.
#[derive(Debug)]
pub struct SharedCoverageMap {
    ptr: NonNull<u8>,
    size: MapSize,
    path: PathBuf,
}

// The mapping is plain memory; exclusive access is enforced through `&mut`.
unsafe impl Send for SharedCoverageMap {}

impl SharedCoverageMap {
    /// Attaches to the object named by the environment variable `var`.
    pub fn attach_from_env(var: &str, size: MapSize) -> Result<Self, ShmemError> {
        let path: OsString =
            std::env::var_os(var).ok_or_else(|| ShmemError::MissingEnv(var.to_string()))?;
        Self::attach(Path::new(&path), size)
    }

    /// Attaches to the shared-memory object at `path`.
    pub fn attach(path: &Path, size: MapSize) -> Result<Self, ShmemError> {
        let file = open_rw(path)?;

        let actual = file
            .metadata()
            .map_err(|source| ShmemError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if actual < size.bytes() as u64 {
            return Err(ShmemError::TooSmall {
                path: path.to_path_buf(),
                expected: size.bytes(),
                actual,
            });
        }

        // SAFETY: fd is a valid open descriptor for at least `size` bytes; the
        // result is checked against MAP_FAILED before use. The descriptor may be
        // closed once the mapping exists.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size.bytes(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(ShmemError::Map {
                path: path.to_path_buf(),
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| ShmemError::Map {
            path: path.to_path_buf(),
            source: io::Error::other("mmap returned a null mapping"),
        })?;

        info!(path = %path.display(), size = size.bytes(), "Attached shared coverage map");
        Ok(Self {
            ptr,
            size,
            path: path.to_path_buf(),
        })
    }

    pub fn size(&self) -> MapSize {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Zeroes the buffer before the next execution.
    pub fn clear(&mut self) {
        self.as_mut_slice().fill(0);
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping is valid for `size` bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size.bytes()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` guarantees no other borrow in this process.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size.bytes()) }
    }

    /// Copies the current buffer contents into `dst`.
    pub fn snapshot_into(&self, dst: &mut [u8]) {
        dst.copy_from_slice(self.as_slice());
    }
}

impl Drop for SharedCoverageMap {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly what mmap returned and are unmapped once.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.size.bytes()) };
        if rc != 0 {
            debug!(
                path = %self.path.display(),
                error = %io::Error::last_os_error(),
                "munmap failed"
            );
        }
    }
}

fn open_rw(path: &Path) -> Result<File, ShmemError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| ShmemError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn backing_file(len: u64) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn attach_maps_the_file_shared() {
        let size = MapSize::new(64).unwrap();
        let backing = backing_file(64);

        let mut first = SharedCoverageMap::attach(backing.path(), size).unwrap();
        let second = SharedCoverageMap::attach(backing.path(), size).unwrap();
        first.as_mut_slice()[5] = 9;
        assert_eq!(second.as_slice()[5], 9);

        first.clear();
        assert!(second.as_slice().iter().all(|&b| b == 0));
        assert_eq!(std::fs::read(backing.path()).unwrap()[5], 0);
    }

    #[test]
    fn snapshot_copies_current_contents() {
        let size = MapSize::new(8).unwrap();
        let backing = backing_file(8);
        let mut shared = SharedCoverageMap::attach(backing.path(), size).unwrap();
        shared.as_mut_slice()[7] = 3;
        let mut snap = [0u8; 8];
        shared.snapshot_into(&mut snap);
        assert_eq!(snap, [0, 0, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn missing_env_var_fails_cleanly() {
        let err = SharedCoverageMap::attach_from_env(
            "BITFEED_TEST_VAR_THAT_IS_NEVER_SET",
            MapSize::new(8).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, ShmemError::MissingEnv(_)));
    }

    #[test]
    fn missing_object_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let err = SharedCoverageMap::attach(&dir.path().join("gone"), MapSize::new(8).unwrap())
            .unwrap_err();
        assert!(matches!(err, ShmemError::Open { .. }));
    }

    #[test]
    fn undersized_object_is_rejected() {
        let backing = backing_file(16);
        let err = SharedCoverageMap::attach(backing.path(), MapSize::new(64).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ShmemError::TooSmall {
                expected: 64,
                actual: 16,
                ..
            }
        ));
    }
}
