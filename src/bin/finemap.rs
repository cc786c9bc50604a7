//! Command-line driver for the fine-mapping imputation workflow

use clap::Parser;
use env_logger::Env;
use finemap_rs::{
    config::{load_config_file, resolve, CliOverrides, RunConfig},
    pipeline::StagePipeline,
    stages::StageContext,
    tool::ProcessRunner,
    workspace::{RunWorkspace, DEFAULT_OUTPUT_ROOT},
    FinemapError, FinemapResult,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "finemap")]
#[command(about = "Quality-control, phase and impute a genomic window around a target variant")]
#[command(long_about = "
finemap narrows a PLINK genotype dataset to a window around a target variant
and imputes it against a reference haplotype panel by running, in order:

1. Marker missingness filter (plink --geno)
2. Sample missingness filter (plink --mind, skipped with -a)
3. Window extraction, excluding the target if it is genotyped
4. Minor allele frequency filter (plink --maf)
5. Hardy-Weinberg filter (plink --hwe), written as <output-run-id>
6. Phasing (shapeit)
7. Conversion of the phased haplotypes to VCF (shapeit -convert)
8. Imputation against the reference panel (minimac)

The configuration file is flat TOML and must define target-variant-id,
chromosome, position, window-half-width and reference-panel. All outputs are
written to <output-root>/<output-run-id>/ and kept after failures.
")]
struct Args {
    /// Path to the run configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: PathBuf,

    /// Prefix of the input PLINK fileset (.bed/.bim/.fam)
    #[arg(short = 'g', long = "genotype-prefix", value_name = "PREFIX")]
    genotype_prefix: Option<String>,

    /// Identifier of this run; names the workspace and the final outputs
    #[arg(short = 'o', long = "output-run-id", value_name = "RUN_ID")]
    output_run_id: Option<String>,

    /// Skip the individual-level (sample missingness) QC stage
    #[arg(short = 'a', long = "skip-individual-qc")]
    skip_individual_qc: bool,

    /// Number of threads forwarded to phasing and imputation. Defaults to all logical cpus.
    #[arg(long, value_name = "THREAD_COUNT")]
    threads: Option<usize>,

    /// Directory under which run workspaces are created
    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUTPUT_ROOT)]
    output_root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            genotype_input_prefix: self.genotype_prefix.clone(),
            output_run_id: self.output_run_id.clone(),
            skip_individual_qc: self.skip_individual_qc,
            threads: self.threads,
        }
    }
}

/// Check the command-line identifiers before the config file is read, so a
/// missing `-g`/`-o` is reported first.
fn load_run_config(args: &Args) -> FinemapResult<RunConfig> {
    let overrides = args.overrides();
    overrides.require_identifiers()?;
    let table = load_config_file(&args.config)?;
    resolve(&table, &overrides)?.with_absolute_paths()
}

fn run(args: Args) -> FinemapResult<()> {
    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting finemap");
    log::info!("Config file: {:?}", args.config);

    let config = load_run_config(&args)?;
    config.validate_inputs()?;

    log::info!("Target variant: {}", config.target_variant_id);
    log::info!(
        "Window: chr{}:{}-{}",
        config.chromosome,
        config.window.start,
        config.window.end
    );
    log::info!("Genotype input: {:?}", config.genotype_input_prefix);
    log::info!("Reference panel: {:?}", config.reference_panel);
    log::info!("Skip individual QC: {}", config.skip_individual_qc);
    log::info!("Number of threads: {}", config.threads);

    let workspace = RunWorkspace::create(&args.output_root, &config.output_run_id)?;
    let resolved = workspace.file(&format!("{}.config.toml", config.output_run_id));
    config.write_resolved(&resolved)?;
    log::debug!("Resolved configuration written to {:?}", resolved);

    let mut pipeline = StagePipeline::new(StageContext::new(config, workspace), ProcessRunner);
    log::info!("Running {} stages", pipeline.stages().len());
    let outcome = pipeline.run()?;

    log::info!("Filtered dataset: {:?}", outcome.dataset.prefix());
    log::info!("Stage report: {:?}", outcome.report);
    println!(
        "Imputation finished. Results written to {}.*",
        outcome.imputed_prefix.display()
    );

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: FinemapError) -> ! {
    let code = error.exit_code();
    eprintln!("Error: {}", error);
    if error.is_configuration_error() {
        eprintln!("No stage was started.");
    }
    match error {
        FinemapError::MissingParameter(_) | FinemapError::InvalidParameter { .. } => {
            eprintln!("Please check the configuration file and the -g/-o arguments.");
        }
        FinemapError::ConfigFile { .. } => {
            eprintln!("The configuration file must be flat TOML, e.g. position = 100000");
        }
        FinemapError::FileNotFound(_) => {
            eprintln!("The genotype prefix must name an existing .bed/.bim/.fam fileset.");
        }
        FinemapError::Workspace { .. } => {
            eprintln!("Please check permissions on the output root directory.");
        }
        FinemapError::ToolLaunch { .. } => {
            eprintln!("Please check that the tool is installed and on PATH, or set its path in the configuration.");
        }
        FinemapError::ExternalTool { .. } => {
            eprintln!("See the tool output above. Files written so far are kept in the run workspace.");
        }
        FinemapError::Stage { .. } => {
            eprintln!("The stage report in the run workspace shows the stages that completed.");
        }
        FinemapError::StateConsistency(_) => {
            eprintln!("This is an internal error. Please report this issue.");
        }
        FinemapError::InvalidMarkerMetadata(_) => {
            eprintln!("The .bim file written by the previous stage could not be read.");
        }
        FinemapError::Io(_) | FinemapError::Csv(_) => {
            eprintln!("Please check file permissions and disk space.");
        }
    }
    std::process::exit(code);
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        handle_error(e);
    }
}
