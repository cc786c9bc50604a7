//! # finemap - fine-mapping imputation workflow driver
//!
//! Narrows a PLINK genotype dataset to a window around a target variant, runs
//! marker and sample quality control, phases the window and imputes it against
//! a reference haplotype panel. All statistical work is done by external tools;
//! this crate sequences them, derives their arguments and tracks which dataset
//! generation on disk is current.

pub mod config;
pub mod dataset;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod tool;
pub mod utils;
pub mod workspace;

use std::path::PathBuf;

/// Error types for the finemap library
#[derive(Debug, thiserror::Error)]
pub enum FinemapError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Cannot read configuration file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Cannot create workspace {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {stage}: could not launch {tool}: {source}")]
    ToolLaunch {
        stage: &'static str,
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stage {step} ({stage}) failed: {tool} {}", describe_exit(.exit_code))]
    ExternalTool {
        stage: &'static str,
        step: u8,
        tool: String,
        exit_code: Option<i32>,
    },

    #[error("Stage {step} ({stage}) could not be prepared: {source}")]
    Stage {
        stage: &'static str,
        step: u8,
        #[source]
        source: Box<FinemapError>,
    },

    #[error("Internal state error: {0}")]
    StateConsistency(String),

    #[error("Invalid marker metadata: {0}")]
    InvalidMarkerMetadata(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

impl FinemapError {
    /// Process exit status reported for this error. Never zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            FinemapError::MissingParameter(_) | FinemapError::InvalidParameter { .. } => {
                exitcode::USAGE
            }
            FinemapError::ConfigFile { .. } => exitcode::CONFIG,
            FinemapError::FileNotFound(_) => exitcode::NOINPUT,
            FinemapError::Workspace { .. } => exitcode::CANTCREAT,
            FinemapError::ToolLaunch { .. } => exitcode::UNAVAILABLE,
            FinemapError::ExternalTool { step, .. } => 10 + i32::from(*step),
            FinemapError::Stage { source, .. } => source.exit_code(),
            FinemapError::StateConsistency(_) => exitcode::SOFTWARE,
            FinemapError::InvalidMarkerMetadata(_) => exitcode::DATAERR,
            FinemapError::Io(_) | FinemapError::Csv(_) => exitcode::IOERR,
        }
    }

    /// True for errors raised before any external process is started.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FinemapError::MissingParameter(_)
                | FinemapError::InvalidParameter { .. }
                | FinemapError::ConfigFile { .. }
                | FinemapError::FileNotFound(_)
        )
    }
}

pub type FinemapResult<T> = Result<T, FinemapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_nonzero() {
        let errors = vec![
            FinemapError::MissingParameter("chromosome"),
            FinemapError::InvalidParameter {
                name: "position",
                reason: "must be positive".to_string(),
            },
            FinemapError::FileNotFound("chip.bed".to_string()),
            FinemapError::ExternalTool {
                stage: "snp-qc",
                step: 1,
                tool: "plink".to_string(),
                exit_code: Some(2),
            },
            FinemapError::StateConsistency("no predecessor".to_string()),
        ];
        for error in errors {
            assert_ne!(error.exit_code(), 0, "{}", error);
        }
    }

    #[test]
    fn test_external_tool_exit_code_by_step() {
        let error = FinemapError::ExternalTool {
            stage: "phasing",
            step: 6,
            tool: "shapeit".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(error.exit_code(), 16);
        assert!(!error.is_configuration_error());
        assert_eq!(
            error.to_string(),
            "Stage 6 (phasing) failed: shapeit exited with status 1"
        );
    }

    #[test]
    fn test_signal_termination_message() {
        let error = FinemapError::ExternalTool {
            stage: "imputation",
            step: 8,
            tool: "Minimac3".to_string(),
            exit_code: None,
        };
        assert!(error.to_string().ends_with("was terminated by a signal"));
    }

    #[test]
    fn test_stage_error_names_stage_and_keeps_cause_exit_code() {
        let error = FinemapError::Stage {
            stage: "window-extraction",
            step: 3,
            source: Box::new(FinemapError::InvalidMarkerMetadata("data.bim: line 2".to_string())),
        };
        assert_eq!(error.exit_code(), exitcode::DATAERR);
        assert!(!error.is_configuration_error());
        assert_eq!(
            error.to_string(),
            "Stage 3 (window-extraction) could not be prepared: Invalid marker metadata: data.bim: line 2"
        );
    }

    #[test]
    fn test_missing_parameter_names_field() {
        let error = FinemapError::MissingParameter("window-half-width");
        assert!(error.is_configuration_error());
        assert_eq!(
            error.to_string(),
            "Missing required parameter: window-half-width"
        );
    }
}
