//! Sequential stage driver
//!
//! Runs the eight stages in order against one run workspace. A stage starts
//! only after the previous one succeeded; the first failure aborts the run
//! and leaves every file written so far in place.

use crate::dataset::{DatasetHandle, DatasetStateTracker};
use crate::report::StageReport;
use crate::stages::{Stage, StageContext, StageOutput, StagePlan};
use crate::tool::{ToolAdapter, ToolInvocation, ToolRunner};
use crate::utils::Timer;
use crate::{FinemapError, FinemapResult};
use serde::Serialize;
use std::path::PathBuf;

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub step: u8,
    pub stage: &'static str,
    pub tool: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub passed_through: bool,
    /// Dataset prefix or artifact produced by the stage
    pub output: Option<PathBuf>,
}

impl StageResult {
    fn succeeded(stage: &Stage, invocation: &ToolInvocation, output: PathBuf) -> Self {
        Self {
            step: stage.step(),
            stage: stage.name(),
            tool: invocation.program.clone(),
            exit_code: Some(0),
            success: true,
            passed_through: false,
            output: Some(output),
        }
    }

    fn passed_through(stage: &Stage, current: &DatasetHandle) -> Self {
        Self {
            step: stage.step(),
            stage: stage.name(),
            tool: String::new(),
            exit_code: None,
            success: true,
            passed_through: true,
            output: Some(current.prefix().to_path_buf()),
        }
    }

    fn unprepared(stage: &Stage, tool: &str) -> Self {
        Self {
            step: stage.step(),
            stage: stage.name(),
            tool: tool.to_string(),
            exit_code: None,
            success: false,
            passed_through: false,
            output: None,
        }
    }

    fn failed(stage: &Stage, invocation: &ToolInvocation, error: &FinemapError) -> Self {
        let exit_code = match error {
            FinemapError::ExternalTool { exit_code, .. } => *exit_code,
            _ => None,
        };
        Self {
            step: stage.step(),
            stage: stage.name(),
            tool: invocation.program.clone(),
            exit_code,
            success: false,
            passed_through: false,
            output: None,
        }
    }
}

/// Everything a completed run leaves behind
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub results: Vec<StageResult>,
    /// The filtered dataset under the run's public name
    pub dataset: DatasetHandle,
    /// Prefix shared by all imputation output files
    pub imputed_prefix: PathBuf,
    pub report: PathBuf,
}

pub struct StagePipeline<R: ToolRunner> {
    context: StageContext,
    stages: Vec<Stage>,
    adapter: ToolAdapter<R>,
}

impl<R: ToolRunner> StagePipeline<R> {
    pub fn new(context: StageContext, runner: R) -> Self {
        let stages = Stage::sequence(context.config.skip_individual_qc);
        Self {
            context,
            stages,
            adapter: ToolAdapter::new(runner),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn runner(&self) -> &R {
        self.adapter.runner()
    }

    /// Run every stage once, in order, stopping at the first failure
    pub fn run(&mut self) -> FinemapResult<PipelineOutcome> {
        let context = &self.context;
        let adapter = &mut self.adapter;
        let workspace = &context.workspace;

        let raw_input = DatasetHandle::new(&context.config.genotype_input_prefix);
        workspace.check_input(&raw_input)?;
        let report_path = workspace.file(&format!("{}.stages.tsv", workspace.run_id()));
        let mut report = StageReport::create(&report_path)?;
        let mut tracker = DatasetStateTracker::new(workspace.path(), raw_input);
        let mut artifact: Option<PathBuf> = None;
        let mut results = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            log::info!("Stage {}/{}: {}", stage.step(), self.stages.len(), stage);
            let _timer = Timer::new(stage.name());

            let plan = match stage.prepare(context, tracker.current(), artifact.as_deref()) {
                Ok(plan) => plan,
                Err(source) => {
                    let error = FinemapError::Stage {
                        stage: stage.name(),
                        step: stage.step(),
                        source: Box::new(source),
                    };
                    log::error!("{}", error);
                    let tool = context.config.tools.program(stage.tool());
                    report.record(&StageResult::unprepared(stage, tool))?;
                    return Err(error);
                }
            };
            let result = match plan {
                StagePlan::PassThrough => StageResult::passed_through(stage, tracker.current()),
                StagePlan::Run { invocation, output } => {
                    if let Err(e) = adapter.invoke(&invocation) {
                        report.record(&StageResult::failed(stage, &invocation, &e))?;
                        return Err(e);
                    }
                    let produced = match output {
                        StageOutput::Dataset(handle) => {
                            tracker.advance(handle)?;
                            tracker.current().prefix().to_path_buf()
                        }
                        StageOutput::Canonical(handle) => {
                            let removed = tracker.relabel(handle)?;
                            log::info!(
                                "[{}] Filtered dataset is {:?}; removed {} intermediate files",
                                stage,
                                tracker.current().prefix(),
                                removed.len()
                            );
                            tracker.current().prefix().to_path_buf()
                        }
                        StageOutput::Artifact(path) => {
                            artifact = Some(path.clone());
                            path
                        }
                    };
                    StageResult::succeeded(stage, &invocation, produced)
                }
            };
            report.record(&result)?;
            results.push(result);
        }

        let imputed_prefix = artifact.ok_or_else(|| {
            FinemapError::StateConsistency("imputation produced no output".to_string())
        })?;
        Ok(PipelineOutcome {
            results,
            dataset: tracker.current().clone(),
            imputed_prefix,
            report: report.path().to_path_buf(),
        })
    }
}
