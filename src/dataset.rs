//! Dataset generations and marker metadata
//!
//! A [`DatasetHandle`] names one PLINK fileset: genotype calls (`.bed`),
//! marker metadata (`.bim`) and sample metadata (`.fam`) sharing a prefix.
//! [`DatasetStateTracker`] holds the single current generation as stages
//! replace it, and removes superseded generations once the run's canonical
//! dataset has been written.

use crate::utils::append_suffix;
use crate::{FinemapError, FinemapResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Logical reference to a `.bed`/`.bim`/`.fam` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetHandle {
    prefix: PathBuf,
}

impl DatasetHandle {
    pub fn new<P: Into<PathBuf>>(prefix: P) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn base_name(&self) -> Option<&str> {
        self.prefix.file_name().and_then(|name| name.to_str())
    }

    pub fn calls(&self) -> PathBuf {
        append_suffix(&self.prefix, ".bed")
    }

    pub fn markers(&self) -> PathBuf {
        append_suffix(&self.prefix, ".bim")
    }

    pub fn samples(&self) -> PathBuf {
        append_suffix(&self.prefix, ".fam")
    }

    pub fn files(&self) -> [PathBuf; 3] {
        [self.calls(), self.markers(), self.samples()]
    }

    pub fn exists(&self) -> bool {
        self.files().iter().all(|f| f.is_file())
    }
}

/// True if `target` is one of the marker identifiers
pub fn contains_marker<'a, I>(marker_ids: I, target: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    marker_ids.into_iter().any(|id| id == target)
}

/// Read marker identifiers (second column) from a `.bim` file
pub fn read_marker_ids<P: AsRef<Path>>(path: P) -> FinemapResult<Vec<String>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut ids = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let id = record.get(1).map(str::trim).filter(|id| !id.is_empty());
        match id {
            Some(id) => ids.push(id.to_string()),
            None => {
                return Err(FinemapError::InvalidMarkerMetadata(format!(
                    "{}: line {} has no marker identifier",
                    path.display(),
                    line + 1
                )))
            }
        }
    }
    Ok(ids)
}

/// Tracks the current dataset generation of one run
#[derive(Debug)]
pub struct DatasetStateTracker {
    workspace: PathBuf,
    input: DatasetHandle,
    current: DatasetHandle,
    superseded: Vec<DatasetHandle>,
}

impl DatasetStateTracker {
    /// Start tracking from the raw input. The input is never superseded, so
    /// it survives cleanup even when it lives inside the workspace.
    pub fn new<P: Into<PathBuf>>(workspace: P, input: DatasetHandle) -> Self {
        Self {
            workspace: workspace.into(),
            current: input.clone(),
            input,
            superseded: Vec::new(),
        }
    }

    pub fn current(&self) -> &DatasetHandle {
        &self.current
    }

    /// Make `next` the current generation. Stages may only write inside the
    /// run workspace.
    pub fn advance(&mut self, next: DatasetHandle) -> FinemapResult<()> {
        if next.prefix().parent() != Some(self.workspace.as_path()) {
            return Err(FinemapError::StateConsistency(format!(
                "dataset {:?} is not inside workspace {:?}",
                next.prefix(),
                self.workspace
            )));
        }
        if next != self.current {
            let previous = std::mem::replace(&mut self.current, next);
            if previous != self.input && !self.superseded.contains(&previous) {
                self.superseded.push(previous);
            }
        }
        log::debug!("Current dataset: {:?}", self.current.prefix());
        Ok(())
    }

    /// Advance to the run's public dataset and delete every superseded
    /// generation that lives in the workspace. Returns the removed files.
    pub fn relabel(&mut self, canonical: DatasetHandle) -> FinemapResult<Vec<PathBuf>> {
        self.advance(canonical)?;
        let canonical_base = self.current.base_name().ok_or_else(|| {
            FinemapError::StateConsistency(format!(
                "dataset {:?} has no base name",
                self.current.prefix()
            ))
        })?;

        let input_base = if self.input.prefix().parent() == Some(self.workspace.as_path()) {
            self.input.base_name()
        } else {
            None
        };
        let stale: HashSet<&str> = self
            .superseded
            .iter()
            .filter(|h| h.prefix().parent() == Some(self.workspace.as_path()))
            .filter_map(DatasetHandle::base_name)
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for entry in std::fs::read_dir(&self.workspace)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if belongs_to(name, canonical_base) {
                continue;
            }
            if input_base.is_some_and(|base| belongs_to(name, base)) {
                continue;
            }
            if stale.iter().any(|base| belongs_to(name, base)) {
                std::fs::remove_file(entry.path())?;
                removed.push(entry.path());
            }
        }
        removed.sort();
        for path in &removed {
            log::debug!("Removed superseded file {:?}", path);
        }
        self.superseded.clear();
        Ok(removed)
    }
}

/// File `name` is part of the generation with base name `base`
fn belongs_to(name: &str, base: &str) -> bool {
    name == base
        || name
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('.'))
}
