//! Stage report written next to the run's outputs

use crate::pipeline::StageResult;
use crate::FinemapResult;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Tab-separated log of stage results, one row per finished stage.
///
/// Rows are flushed as they are written so an aborted run still shows how
/// far it got.
pub struct StageReport {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl StageReport {
    pub fn create<P: AsRef<Path>>(path: P) -> FinemapResult<Self> {
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path.as_ref())?;
        Ok(Self {
            writer,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn record(&mut self, result: &StageResult) -> FinemapResult<()> {
        self.writer.serialize(result)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
