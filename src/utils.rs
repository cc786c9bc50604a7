//! Utility functions for paths, timing and host inspection

use crate::{FinemapError, FinemapResult};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Get the number of CPU cores, with a fallback default
pub fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Validate file paths and check if they exist
pub fn validate_file_exists<P: AsRef<Path>>(path: P) -> FinemapResult<()> {
    if !path.as_ref().is_file() {
        return Err(FinemapError::FileNotFound(
            path.as_ref().to_string_lossy().to_string(),
        ));
    }
    Ok(())
}

/// Append a suffix to the final component of a path without touching any
/// existing extension, so `chip.v2` + `.bed` gives `chip.v2.bed`.
pub fn append_suffix<P: AsRef<Path>>(path: P, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_ref().as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Resolve a path against the current directory. Tools run with the run
/// workspace as their working directory, so user-relative paths must be
/// fixed before the first stage starts.
pub fn absolute_path<P: AsRef<Path>>(path: P) -> FinemapResult<PathBuf> {
    Ok(std::path::absolute(path.as_ref())?)
}

/// Timer utility for measuring execution time
pub struct Timer {
    start: std::time::Instant,
    name: String,
}

impl Timer {
    pub fn new(name: &str) -> Self {
        log::debug!("Starting timer: {}", name);
        Timer {
            start: std::time::Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn log_elapsed(&self) {
        let duration = self.elapsed();
        log::info!("Timer '{}' elapsed: {:.2?}", self.name, duration);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.log_elapsed();
    }
}
