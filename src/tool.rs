//! External tool invocation
//!
//! Every stage runs exactly one external program through a [`ToolAdapter`].
//! The adapter trusts the exit status only: status 0 is success, anything
//! else (including death by signal) is a failure. Output streams are passed
//! through to the operator and never parsed. No invocation is retried.

use crate::{FinemapError, FinemapResult};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const DEFAULT_PLINK: &str = "plink";
pub const DEFAULT_SHAPEIT: &str = "shapeit";
pub const DEFAULT_MINIMAC: &str = "Minimac3";

/// Identity of an external collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Genotype QC and subsetting
    Plink,
    /// Haplotype phasing and haps to VCF conversion
    Shapeit,
    /// Imputation against a reference panel
    Minimac,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Plink => "plink",
            ToolKind::Shapeit => "shapeit",
            ToolKind::Minimac => "minimac",
        };
        f.write_str(name)
    }
}

/// Executables used for each tool identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
    pub plink: String,
    pub shapeit: String,
    pub minimac: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            plink: DEFAULT_PLINK.to_string(),
            shapeit: DEFAULT_SHAPEIT.to_string(),
            minimac: DEFAULT_MINIMAC.to_string(),
        }
    }
}

impl Toolchain {
    pub fn program(&self, kind: ToolKind) -> &str {
        match kind {
            ToolKind::Plink => &self.plink,
            ToolKind::Shapeit => &self.shapeit,
            ToolKind::Minimac => &self.minimac,
        }
    }
}

/// A fully built command line for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub stage: &'static str,
    pub step: u8,
    pub kind: ToolKind,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl ToolInvocation {
    /// Value following `flag` in the argument list, if present
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Incrementally builds the argument list of a [`ToolInvocation`]
pub struct InvocationBuilder {
    invocation: ToolInvocation,
}

impl InvocationBuilder {
    pub fn new(
        stage: &'static str,
        step: u8,
        kind: ToolKind,
        program: &str,
        working_dir: &Path,
    ) -> Self {
        Self {
            invocation: ToolInvocation {
                stage,
                step,
                kind,
                program: program.to_string(),
                args: Vec::new(),
                working_dir: working_dir.to_path_buf(),
            },
        }
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.invocation.args.push(flag.to_string());
        self
    }

    pub fn arg<V: fmt::Display>(mut self, flag: &str, value: V) -> Self {
        self.invocation.args.push(flag.to_string());
        self.invocation.args.push(value.to_string());
        self
    }

    pub fn path_arg<P: AsRef<Path>>(self, flag: &str, path: P) -> Self {
        let value = path.as_ref().display().to_string();
        self.arg(flag, value)
    }

    pub fn build(self) -> ToolInvocation {
        self.invocation
    }
}

/// Executes invocations and reports the raw exit status
///
/// `Ok(None)` means the process ended without an exit code (killed by a signal).
/// `Err` is reserved for processes that could not be started at all.
pub trait ToolRunner {
    fn execute(&mut self, invocation: &ToolInvocation) -> FinemapResult<Option<i32>>;
}

/// Runs invocations as child processes, blocking until each one exits
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn execute(&mut self, invocation: &ToolInvocation) -> FinemapResult<Option<i32>> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| FinemapError::ToolLaunch {
                stage: invocation.stage,
                tool: invocation.program.clone(),
                source,
            })?;
        Ok(status.code())
    }
}

/// Map a raw exit status to success (exit code 0) or an `ExternalTool` error
pub fn classify_exit(invocation: &ToolInvocation, exit_code: Option<i32>) -> FinemapResult<i32> {
    match exit_code {
        Some(0) => Ok(0),
        exit_code => Err(FinemapError::ExternalTool {
            stage: invocation.stage,
            step: invocation.step,
            tool: invocation.program.clone(),
            exit_code,
        }),
    }
}

/// Uniform wrapper used by every stage to run its external tool
pub struct ToolAdapter<R: ToolRunner> {
    runner: R,
}

impl<R: ToolRunner> ToolAdapter<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Run one invocation to completion, once, and classify its exit status
    pub fn invoke(&mut self, invocation: &ToolInvocation) -> FinemapResult<i32> {
        log::info!("[{}] Running: {}", invocation.stage, invocation);
        log::debug!("[{}] Working directory: {:?}", invocation.stage, invocation.working_dir);
        let exit_code = self.runner.execute(invocation)?;
        let result = classify_exit(invocation, exit_code);
        if let Err(ref e) = result {
            log::error!("{}", e);
        }
        result
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}
