//! Per-run working directories
//!
//! Each run owns `<output-root>/<output-run-id>/`. All stage inputs and
//! outputs live there and the directory is never cleaned up, so failed runs
//! can be inspected. Two concurrent runs must use different run ids.

use crate::dataset::DatasetHandle;
use crate::{FinemapError, FinemapResult};
use std::path::{Path, PathBuf};

/// Default base directory for run workspaces
pub const DEFAULT_OUTPUT_ROOT: &str = "output";

/// Base name shared by every intermediate dataset generation
pub const INTERMEDIATE_BASE: &str = "data";

/// Isolated directory for one pipeline execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWorkspace {
    root: PathBuf,
    run_id: String,
}

impl RunWorkspace {
    /// Create (or reuse) the workspace for `run_id` under `output_root`.
    ///
    /// Safe to call repeatedly; fails if the path exists but is not a directory.
    pub fn create<P: AsRef<Path>>(output_root: P, run_id: &str) -> FinemapResult<Self> {
        let root = output_root.as_ref().join(run_id);
        let workspace_error = |source: std::io::Error| FinemapError::Workspace {
            path: root.clone(),
            source,
        };

        if root.exists() && !root.is_dir() {
            return Err(workspace_error(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "path exists and is not a directory",
            )));
        }
        std::fs::create_dir_all(&root).map_err(workspace_error)?;
        let root = std::path::absolute(&root).map_err(workspace_error)?;

        log::info!("Using workspace {:?}", root);
        Ok(Self {
            root,
            run_id: run_id.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Path of a file inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Handle for the working generation written by the QC stages
    pub fn intermediate_dataset(&self) -> DatasetHandle {
        DatasetHandle::new(self.file(INTERMEDIATE_BASE))
    }

    /// Handle carrying the run's public output name
    pub fn canonical_dataset(&self) -> DatasetHandle {
        DatasetHandle::new(self.file(&self.run_id))
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.parent() == Some(self.root.as_path())
    }

    /// Reject a genotype input that a stage of this run would overwrite
    pub fn check_input(&self, input: &DatasetHandle) -> FinemapResult<()> {
        let reserved = [self.intermediate_dataset(), self.canonical_dataset()];
        if reserved.contains(input) {
            return Err(FinemapError::InvalidParameter {
                name: crate::config::GENOTYPE_INPUT_PREFIX,
                reason: format!(
                    "{:?} would be overwritten by the run's own datasets",
                    input.prefix()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunWorkspace::create(dir.path(), "run1").unwrap();
        std::fs::write(first.file("keep.txt"), "x").unwrap();

        let second = RunWorkspace::create(dir.path(), "run1").unwrap();
        assert_eq!(first, second);
        assert!(second.path().is_dir());
        assert!(second.file("keep.txt").exists());
    }

    #[test]
    fn test_create_nested_root() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(dir.path().join("a").join("b"), "run2").unwrap();
        assert!(workspace.path().is_absolute());
        assert!(workspace.path().ends_with("a/b/run2"));
        assert_eq!(workspace.run_id(), "run2");
    }

    #[test]
    fn test_create_fails_on_file_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run1"), "not a directory").unwrap();
        assert!(matches!(
            RunWorkspace::create(dir.path(), "run1"),
            Err(FinemapError::Workspace { .. })
        ));
    }

    #[test]
    fn test_dataset_handles() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(dir.path(), "run1").unwrap();

        let data = workspace.intermediate_dataset();
        assert_eq!(data.prefix(), workspace.file("data").as_path());
        assert!(workspace.contains(data.prefix()));

        let canonical = workspace.canonical_dataset();
        assert_eq!(canonical.base_name(), Some("run1"));
        assert!(!workspace.contains(Path::new("/elsewhere/chip")));
    }

    #[test]
    fn test_check_input_rejects_reserved_names() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(dir.path(), "run1").unwrap();

        for reserved in [workspace.intermediate_dataset(), workspace.canonical_dataset()] {
            assert!(matches!(
                workspace.check_input(&reserved),
                Err(FinemapError::InvalidParameter {
                    name: "genotype-input-prefix",
                    ..
                })
            ));
        }
        workspace
            .check_input(&DatasetHandle::new(workspace.file("chip")))
            .unwrap();
        workspace
            .check_input(&DatasetHandle::new("/inputs/data"))
            .unwrap();
    }
}
