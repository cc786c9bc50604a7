//! Stage definitions
//!
//! Each stage turns the current dataset (or the previous stage's artifact)
//! into one external tool invocation plus a description of what that
//! invocation will produce. Stages never run anything themselves; the
//! pipeline executes the plan and updates the dataset tracker.

use crate::config::RunConfig;
use crate::dataset::{contains_marker, read_marker_ids, DatasetHandle};
use crate::tool::{InvocationBuilder, ToolInvocation, ToolKind};
use crate::utils::append_suffix;
use crate::workspace::RunWorkspace;
use crate::{FinemapError, FinemapResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// Maximum per-marker missing call rate (`--geno`)
pub const MAX_MARKER_MISSINGNESS: f64 = 0.02;
/// Maximum per-sample missing call rate (`--mind`)
pub const MAX_SAMPLE_MISSINGNESS: f64 = 0.02;
/// Minimum minor allele frequency (`--maf`)
pub const MIN_ALLELE_FREQUENCY: f64 = 0.001;
/// Hardy-Weinberg equilibrium exact test p-value threshold (`--hwe`)
pub const HWE_P_VALUE_THRESHOLD: f64 = 1e-6;

/// Single-id list passed to `--exclude` when the target is genotyped
pub const EXCLUDE_LIST: &str = "exclude_snp.txt";

/// Everything a stage needs to build its invocation
#[derive(Debug, Clone)]
pub struct StageContext {
    pub config: RunConfig,
    pub workspace: RunWorkspace,
}

impl StageContext {
    pub fn new(config: RunConfig, workspace: RunWorkspace) -> Self {
        Self { config, workspace }
    }

    /// `<run>.phased`, the haplotype output prefix of the phasing tool
    pub fn phased_haplotypes(&self) -> PathBuf {
        append_suffix(self.workspace.canonical_dataset().prefix(), ".phased")
    }

    /// `<run>.phased.vcf`
    pub fn phased_vcf(&self) -> PathBuf {
        append_suffix(self.phased_haplotypes(), ".vcf")
    }

    /// `<run>.imputed.output`, prefix of every imputation output file
    pub fn imputed_prefix(&self) -> PathBuf {
        append_suffix(self.workspace.canonical_dataset().prefix(), ".imputed.output")
    }
}

/// Whether individual-level QC filters samples or forwards the dataset untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QcMode {
    Execute,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SnpQc,
    IndividualQc(QcMode),
    WindowExtraction,
    AlleleFrequencyFilter,
    HweFilter,
    Phasing,
    FormatConversion,
    Imputation,
}

/// What a successful invocation leaves behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// A new intermediate dataset generation
    Dataset(DatasetHandle),
    /// The filtered dataset under the run's public name
    Canonical(DatasetHandle),
    /// A non-PLINK artifact consumed by the next stage
    Artifact(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePlan {
    PassThrough,
    Run {
        invocation: ToolInvocation,
        output: StageOutput,
    },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Stage {
    /// The fixed stage order of a run
    pub fn sequence(skip_individual_qc: bool) -> Vec<Stage> {
        let individual_qc = if skip_individual_qc {
            QcMode::PassThrough
        } else {
            QcMode::Execute
        };
        vec![
            Stage::SnpQc,
            Stage::IndividualQc(individual_qc),
            Stage::WindowExtraction,
            Stage::AlleleFrequencyFilter,
            Stage::HweFilter,
            Stage::Phasing,
            Stage::FormatConversion,
            Stage::Imputation,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::SnpQc => "snp-qc",
            Stage::IndividualQc(_) => "individual-qc",
            Stage::WindowExtraction => "window-extraction",
            Stage::AlleleFrequencyFilter => "maf-filter",
            Stage::HweFilter => "hwe-filter",
            Stage::Phasing => "phasing",
            Stage::FormatConversion => "format-conversion",
            Stage::Imputation => "imputation",
        }
    }

    /// 1-based position in the run
    pub fn step(&self) -> u8 {
        match self {
            Stage::SnpQc => 1,
            Stage::IndividualQc(_) => 2,
            Stage::WindowExtraction => 3,
            Stage::AlleleFrequencyFilter => 4,
            Stage::HweFilter => 5,
            Stage::Phasing => 6,
            Stage::FormatConversion => 7,
            Stage::Imputation => 8,
        }
    }

    pub fn tool(&self) -> ToolKind {
        match self {
            Stage::SnpQc
            | Stage::IndividualQc(_)
            | Stage::WindowExtraction
            | Stage::AlleleFrequencyFilter
            | Stage::HweFilter => ToolKind::Plink,
            Stage::Phasing | Stage::FormatConversion => ToolKind::Shapeit,
            Stage::Imputation => ToolKind::Minimac,
        }
    }

    /// Build this stage's plan from the current dataset and the last artifact.
    ///
    /// Window extraction reads the current marker metadata and may write the
    /// exclusion list into the workspace; no other stage touches the disk.
    pub fn prepare(
        &self,
        ctx: &StageContext,
        current: &DatasetHandle,
        artifact: Option<&Path>,
    ) -> FinemapResult<StagePlan> {
        let config = &ctx.config;
        let plan = match self {
            Stage::SnpQc => self.plink_filter(ctx, current, "--geno", MAX_MARKER_MISSINGNESS),
            Stage::IndividualQc(QcMode::Execute) => {
                self.plink_filter(ctx, current, "--mind", MAX_SAMPLE_MISSINGNESS)
            }
            Stage::IndividualQc(QcMode::PassThrough) => {
                log::info!("[{}] Skipped; dataset passes through unchanged", self);
                StagePlan::PassThrough
            }
            Stage::WindowExtraction => self.window_extraction(ctx, current)?,
            Stage::AlleleFrequencyFilter => {
                self.plink_filter(ctx, current, "--maf", MIN_ALLELE_FREQUENCY)
            }
            Stage::HweFilter => {
                let output = ctx.workspace.canonical_dataset();
                let invocation = self
                    .builder(ctx)
                    .path_arg("--bfile", current.prefix())
                    .arg("--hwe", HWE_P_VALUE_THRESHOLD)
                    .flag("--make-bed")
                    .path_arg("--out", output.prefix())
                    .build();
                StagePlan::Run {
                    invocation,
                    output: StageOutput::Canonical(output),
                }
            }
            Stage::Phasing => {
                if current != &ctx.workspace.canonical_dataset() {
                    return Err(FinemapError::StateConsistency(format!(
                        "phasing expects the filtered dataset, current is {:?}",
                        current.prefix()
                    )));
                }
                let phased = ctx.phased_haplotypes();
                let invocation = self
                    .builder(ctx)
                    .path_arg("--input-bed", current.prefix())
                    .path_arg("--input-map", &config.genetic_map)
                    .arg("--input-from", config.window.start)
                    .arg("--input-to", config.window.end)
                    .arg("--thread", config.threads)
                    .arg("--seed", config.phasing_seed)
                    .path_arg("-O", &phased)
                    .build();
                StagePlan::Run {
                    invocation,
                    output: StageOutput::Artifact(phased),
                }
            }
            Stage::FormatConversion => {
                let phased = self.expect_artifact(artifact, ctx.phased_haplotypes())?;
                let vcf = ctx.phased_vcf();
                let invocation = self
                    .builder(ctx)
                    .flag("-convert")
                    .path_arg("--input-haps", &phased)
                    .path_arg("--output-vcf", &vcf)
                    .build();
                StagePlan::Run {
                    invocation,
                    output: StageOutput::Artifact(vcf),
                }
            }
            Stage::Imputation => {
                let vcf = self.expect_artifact(artifact, ctx.phased_vcf())?;
                let range = config.imputation_range();
                let prefix = ctx.imputed_prefix();
                let invocation = self
                    .builder(ctx)
                    .path_arg("--refHaps", &config.reference_panel)
                    .path_arg("--haps", &vcf)
                    .arg("--chr", &config.chromosome)
                    .arg("--start", range.start)
                    .arg("--end", range.end)
                    .arg("--window", config.window_half_width)
                    .path_arg("--prefix", &prefix)
                    .arg("--cpus", config.threads)
                    .build();
                StagePlan::Run {
                    invocation,
                    output: StageOutput::Artifact(prefix),
                }
            }
        };
        Ok(plan)
    }

    fn builder(&self, ctx: &StageContext) -> InvocationBuilder {
        let kind = self.tool();
        InvocationBuilder::new(
            self.name(),
            self.step(),
            kind,
            ctx.config.tools.program(kind),
            ctx.workspace.path(),
        )
    }

    /// `--bfile <current> <flag> <threshold> --make-bed --out <ws>/data`
    fn plink_filter(
        &self,
        ctx: &StageContext,
        current: &DatasetHandle,
        flag: &str,
        threshold: f64,
    ) -> StagePlan {
        let output = ctx.workspace.intermediate_dataset();
        let invocation = self
            .builder(ctx)
            .path_arg("--bfile", current.prefix())
            .arg(flag, threshold)
            .flag("--make-bed")
            .path_arg("--out", output.prefix())
            .build();
        StagePlan::Run {
            invocation,
            output: StageOutput::Dataset(output),
        }
    }

    fn window_extraction(
        &self,
        ctx: &StageContext,
        current: &DatasetHandle,
    ) -> FinemapResult<StagePlan> {
        let config = &ctx.config;
        let target = config.target_variant_id.as_str();
        let output = ctx.workspace.intermediate_dataset();

        let marker_ids = read_marker_ids(current.markers())?;
        let mut builder = self
            .builder(ctx)
            .path_arg("--bfile", current.prefix())
            .arg("--chr", &config.chromosome)
            .arg("--from-bp", config.window.start)
            .arg("--to-bp", config.window.end);

        if contains_marker(marker_ids.iter().map(String::as_str), target) {
            let exclude = ctx.workspace.file(EXCLUDE_LIST);
            std::fs::write(&exclude, format!("{}\n", target))?;
            log::info!("[{}] {} is genotyped; excluding it from the window", self, target);
            builder = builder.path_arg("--exclude", &exclude);
        } else {
            log::info!("[{}] {} is not genotyped; no exclusion list", self, target);
        }

        let invocation = builder
            .flag("--make-bed")
            .path_arg("--out", output.prefix())
            .build();
        Ok(StagePlan::Run {
            invocation,
            output: StageOutput::Dataset(output),
        })
    }

    fn expect_artifact(&self, artifact: Option<&Path>, expected: PathBuf) -> FinemapResult<PathBuf> {
        match artifact {
            Some(path) if path == expected => Ok(expected),
            other => Err(FinemapError::StateConsistency(format!(
                "{} expects {:?} from the previous stage, found {:?}",
                self, expected, other
            ))),
        }
    }
}
