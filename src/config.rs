//! Run parameter resolution
//!
//! A run is described by a flat TOML file (target variant, chromosome,
//! position, window half-width, reference panel) plus the identifiers given
//! on the command line. [`resolve`] turns both into a validated [`RunConfig`],
//! reporting the first missing parameter in a fixed order.

use crate::tool::Toolchain;
use crate::utils::{absolute_path, append_suffix, validate_file_exists};
use crate::workspace::INTERMEDIATE_BASE;
use crate::{FinemapError, FinemapResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const GENOTYPE_INPUT_PREFIX: &str = "genotype-input-prefix";
pub const OUTPUT_RUN_ID: &str = "output-run-id";
pub const TARGET_VARIANT_ID: &str = "target-variant-id";
pub const CHROMOSOME: &str = "chromosome";
pub const POSITION: &str = "position";
pub const WINDOW_HALF_WIDTH: &str = "window-half-width";
pub const REFERENCE_PANEL: &str = "reference-panel";
pub const REFERENCE_PANEL_ALIAS: &str = "reference-panel-path";
pub const GENETIC_MAP: &str = "genetic-map";
pub const PHASING_SEED: &str = "phasing-seed";
pub const THREADS: &str = "threads";

pub const DEFAULT_GENETIC_MAP: &str = "genetic_map_chr{chr}_combined_b37.txt";
pub const DEFAULT_PHASING_SEED: u64 = 123_456_789;

/// Inclusive genomic range around the target position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: u64,
    pub end: u64,
}

impl Window {
    /// `[position - half_width, position + half_width]`. Fails instead of
    /// clamping when the window would start before coordinate 1.
    pub fn around(position: u64, half_width: u64) -> FinemapResult<Self> {
        if half_width >= position {
            return Err(FinemapError::InvalidParameter {
                name: WINDOW_HALF_WIDTH,
                reason: format!(
                    "a half-width of {} around position {} starts before coordinate 1",
                    half_width, position
                ),
            });
        }
        let end = position
            .checked_add(half_width)
            .ok_or_else(|| FinemapError::InvalidParameter {
                name: WINDOW_HALF_WIDTH,
                reason: format!("window end overflows for position {}", position),
            })?;
        Ok(Window {
            start: position - half_width,
            end,
        })
    }

    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position <= self.end
    }

    pub fn width(&self) -> u64 {
        self.end - self.start
    }
}

/// Coordinate bounds handed to the imputation tool.
///
/// Deliberately a one-coordinate interval starting at the target position,
/// not the phasing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImputationRange {
    pub start: u64,
    pub end: u64,
}

impl ImputationRange {
    pub fn at(position: u64) -> Self {
        Self {
            start: position,
            end: position.saturating_add(1),
        }
    }
}

/// Values that come from the command line rather than the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub genotype_input_prefix: Option<String>,
    pub output_run_id: Option<String>,
    pub skip_individual_qc: bool,
    pub threads: Option<usize>,
}

impl CliOverrides {
    /// The genotype prefix and run id, the first two parameters in the
    /// resolution order. Needs no config file.
    pub fn require_identifiers(&self) -> FinemapResult<(String, String)> {
        let genotype_input_prefix = required_cli(&self.genotype_input_prefix, GENOTYPE_INPUT_PREFIX)?;
        let output_run_id = required_cli(&self.output_run_id, OUTPUT_RUN_ID)?;
        Ok((genotype_input_prefix, output_run_id))
    }
}

/// Validated, immutable parameters of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    pub genotype_input_prefix: PathBuf,
    pub output_run_id: String,
    pub target_variant_id: String,
    pub chromosome: String,
    pub position: u64,
    pub window_half_width: u64,
    pub reference_panel: PathBuf,
    pub skip_individual_qc: bool,
    pub genetic_map: PathBuf,
    pub phasing_seed: u64,
    pub threads: usize,
    pub window: Window,
    pub tools: Toolchain,
}

impl RunConfig {
    pub fn imputation_range(&self) -> ImputationRange {
        ImputationRange::at(self.position)
    }

    /// Make every user-supplied path absolute against the current directory
    pub fn with_absolute_paths(mut self) -> FinemapResult<Self> {
        self.genotype_input_prefix = absolute_path(&self.genotype_input_prefix)?;
        self.reference_panel = absolute_path(&self.reference_panel)?;
        self.genetic_map = absolute_path(&self.genetic_map)?;
        Ok(self)
    }

    /// Check that the raw genotype triple exists before anything is run
    pub fn validate_inputs(&self) -> FinemapResult<()> {
        for suffix in [".bed", ".bim", ".fam"] {
            validate_file_exists(append_suffix(&self.genotype_input_prefix, suffix))?;
        }
        Ok(())
    }

    /// Write the resolved configuration as TOML for later audit
    pub fn write_resolved(&self, path: &Path) -> FinemapResult<()> {
        let text = toml::to_string(self).map_err(|e| FinemapError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Read a flat TOML key/value file
pub fn load_config_file<P: AsRef<Path>>(path: P) -> FinemapResult<toml::Table> {
    let path = path.as_ref();
    let config_error = |reason: String| FinemapError::ConfigFile {
        path: path.display().to_string(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
    text.parse::<toml::Table>()
        .map_err(|e| config_error(e.message().to_string()))
}

/// Resolve and validate run parameters.
///
/// Required parameters are checked in this order: genotype-input-prefix,
/// output-run-id, target-variant-id, chromosome, position, window-half-width,
/// reference-panel. Keys the resolver does not know are ignored.
pub fn resolve(table: &toml::Table, cli: &CliOverrides) -> FinemapResult<RunConfig> {
    let (genotype_input_prefix, output_run_id) = cli.require_identifiers()?;
    let target_variant_id = required(scalar_text(table, TARGET_VARIANT_ID)?, TARGET_VARIANT_ID)?;
    let chromosome = required(scalar_text(table, CHROMOSOME)?, CHROMOSOME)?;
    let position = required(scalar_positive(table, POSITION)?, POSITION)?;
    let window_half_width = required(scalar_positive(table, WINDOW_HALF_WIDTH)?, WINDOW_HALF_WIDTH)?;
    let reference_panel = match scalar_text(table, REFERENCE_PANEL)? {
        Some(panel) => panel,
        None => required(scalar_text(table, REFERENCE_PANEL_ALIAS)?, REFERENCE_PANEL)?,
    };

    validate_run_id(&output_run_id)?;
    validate_token(&target_variant_id, TARGET_VARIANT_ID)?;
    validate_token(&chromosome, CHROMOSOME)?;
    let window = Window::around(position, window_half_width)?;

    let genetic_map = scalar_text(table, GENETIC_MAP)?
        .unwrap_or_else(|| DEFAULT_GENETIC_MAP.to_string())
        .replace("{chr}", &chromosome);
    let phasing_seed = scalar_positive(table, PHASING_SEED)?.unwrap_or(DEFAULT_PHASING_SEED);
    let threads = match cli.threads {
        Some(0) => {
            return Err(FinemapError::InvalidParameter {
                name: THREADS,
                reason: "must be greater than 0".to_string(),
            })
        }
        Some(count) => count,
        None => crate::utils::get_num_cpus(),
    };

    let defaults = Toolchain::default();
    let tools = Toolchain {
        plink: scalar_text(table, "plink")?.unwrap_or(defaults.plink),
        shapeit: scalar_text(table, "shapeit")?.unwrap_or(defaults.shapeit),
        minimac: scalar_text(table, "minimac")?.unwrap_or(defaults.minimac),
    };

    Ok(RunConfig {
        genotype_input_prefix: PathBuf::from(genotype_input_prefix),
        output_run_id,
        target_variant_id,
        chromosome,
        position,
        window_half_width,
        reference_panel: PathBuf::from(reference_panel),
        skip_individual_qc: cli.skip_individual_qc,
        genetic_map: PathBuf::from(genetic_map),
        phasing_seed,
        threads,
        window,
        tools,
    })
}

fn required<T>(value: Option<T>, name: &'static str) -> FinemapResult<T> {
    value.ok_or(FinemapError::MissingParameter(name))
}

fn required_cli(value: &Option<String>, name: &'static str) -> FinemapResult<String> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    required(value, name)
}

/// String or integer scalar as text; empty strings count as absent
fn scalar_text(table: &toml::Table, key: &'static str) -> FinemapResult<Option<String>> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(toml::Value::Integer(i)) => Ok(Some(i.to_string())),
        Some(other) => Err(FinemapError::InvalidParameter {
            name: key,
            reason: format!("expected a string or integer, found {}", other.type_str()),
        }),
    }
}

fn scalar_positive(table: &toml::Table, key: &'static str) -> FinemapResult<Option<u64>> {
    let Some(text) = scalar_text(table, key)? else {
        return Ok(None);
    };
    match text.parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(FinemapError::InvalidParameter {
            name: key,
            reason: format!("expected a positive integer, found {:?}", text),
        }),
    }
}

fn validate_token(value: &str, name: &'static str) -> FinemapResult<()> {
    if value.chars().any(char::is_whitespace) {
        return Err(FinemapError::InvalidParameter {
            name,
            reason: format!("{:?} must not contain whitespace", value),
        });
    }
    Ok(())
}

/// The run id names a directory under the output root and the final dataset
fn validate_run_id(run_id: &str) -> FinemapResult<()> {
    validate_token(run_id, OUTPUT_RUN_ID)?;
    let invalid = |reason: &str| FinemapError::InvalidParameter {
        name: OUTPUT_RUN_ID,
        reason: format!("{:?} {}", run_id, reason),
    };
    if run_id == "." || run_id == ".." || run_id.contains(['/', '\\']) {
        return Err(invalid("must be a single path component"));
    }
    if run_id == INTERMEDIATE_BASE {
        return Err(invalid("is reserved for intermediate datasets"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn table(text: &str) -> toml::Table {
        text.parse::<toml::Table>().unwrap()
    }

    fn example_table() -> toml::Table {
        table(
            r#"
            target-variant-id = "rsX"
            chromosome = "1"
            position = 100000
            window-half-width = 500
            reference-panel = "panelA"
            "#,
        )
    }

    fn cli() -> CliOverrides {
        CliOverrides {
            genotype_input_prefix: Some("chip".to_string()),
            output_run_id: Some("run1".to_string()),
            skip_individual_qc: false,
            threads: Some(4),
        }
    }

    #[test]
    fn test_resolve_example() {
        let config = resolve(&example_table(), &cli()).unwrap();

        assert_eq!(config.genotype_input_prefix, PathBuf::from("chip"));
        assert_eq!(config.output_run_id, "run1");
        assert_eq!(config.target_variant_id, "rsX");
        assert_eq!(config.chromosome, "1");
        assert_eq!(config.position, 100000);
        assert_eq!(config.window_half_width, 500);
        assert_eq!(config.reference_panel, PathBuf::from("panelA"));
        assert!(!config.skip_individual_qc);
        assert_eq!(config.window, Window { start: 99500, end: 100500 });
        assert_eq!(
            config.genetic_map,
            PathBuf::from("genetic_map_chr1_combined_b37.txt")
        );
        assert_eq!(config.phasing_seed, DEFAULT_PHASING_SEED);
        assert_eq!(config.threads, 4);
        assert_eq!(config.tools, Toolchain::default());
    }

    #[test]
    fn test_missing_parameters_reported_in_order() {
        let empty = toml::Table::new();
        let none = CliOverrides::default();
        let err = resolve(&empty, &none).unwrap_err();
        assert!(matches!(err, FinemapError::MissingParameter(GENOTYPE_INPUT_PREFIX)));

        let only_genotype = CliOverrides {
            genotype_input_prefix: Some("chip".to_string()),
            ..Default::default()
        };
        let err = resolve(&empty, &only_genotype).unwrap_err();
        assert!(matches!(err, FinemapError::MissingParameter(OUTPUT_RUN_ID)));

        let steps = [
            ("", TARGET_VARIANT_ID),
            ("target-variant-id = \"rsX\"", CHROMOSOME),
            ("chromosome = \"1\"", POSITION),
            ("position = 100000", WINDOW_HALF_WIDTH),
            ("window-half-width = 500", REFERENCE_PANEL),
        ];
        let mut text = String::new();
        for (line, expected) in steps {
            text.push_str(line);
            text.push('\n');
            let err = resolve(&table(&text), &cli()).unwrap_err();
            match err {
                FinemapError::MissingParameter(name) => assert_eq!(name, expected),
                other => panic!("expected missing {}, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_require_identifiers() {
        assert!(matches!(
            CliOverrides::default().require_identifiers(),
            Err(FinemapError::MissingParameter(GENOTYPE_INPUT_PREFIX))
        ));
        let (genotype, run_id) = cli().require_identifiers().unwrap();
        assert_eq!(genotype, "chip");
        assert_eq!(run_id, "run1");
    }

    #[test]
    fn test_empty_string_is_missing() {
        let mut t = example_table();
        t.insert(CHROMOSOME.to_string(), toml::Value::String("  ".to_string()));
        assert!(matches!(
            resolve(&t, &cli()),
            Err(FinemapError::MissingParameter(CHROMOSOME))
        ));

        let blank_run = CliOverrides {
            output_run_id: Some(String::new()),
            ..cli()
        };
        assert!(matches!(
            resolve(&example_table(), &blank_run),
            Err(FinemapError::MissingParameter(OUTPUT_RUN_ID))
        ));
    }

    #[test]
    fn test_unknown_keys_ignored_and_alias_accepted() {
        let t = table(
            r#"
            target-variant-id = "rs2"
            chromosome = 22
            position = "16050000"
            window-half-width = 250000
            reference-panel-path = "/panels/chr22.m3vcf.gz"
            analyst = "someone"
            "#,
        );
        let config = resolve(&t, &cli()).unwrap();
        assert_eq!(config.chromosome, "22");
        assert_eq!(config.position, 16050000);
        assert_eq!(config.reference_panel, PathBuf::from("/panels/chr22.m3vcf.gz"));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        for (key, value) in [
            (POSITION, toml::Value::Integer(0)),
            (POSITION, toml::Value::Integer(-5)),
            (WINDOW_HALF_WIDTH, toml::Value::String("wide".to_string())),
            (POSITION, toml::Value::Float(1.5)),
        ] {
            let mut t = example_table();
            t.insert(key.to_string(), value);
            match resolve(&t, &cli()) {
                Err(FinemapError::InvalidParameter { name, .. }) => assert_eq!(name, key),
                other => panic!("expected invalid {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_window_must_start_at_one_or_later() {
        let mut t = example_table();
        t.insert(POSITION.to_string(), toml::Value::Integer(400));
        assert!(matches!(
            resolve(&t, &cli()),
            Err(FinemapError::InvalidParameter { name: WINDOW_HALF_WIDTH, .. })
        ));

        t.insert(POSITION.to_string(), toml::Value::Integer(501));
        let config = resolve(&t, &cli()).unwrap();
        assert_eq!(config.window.start, 1);
    }

    #[test]
    fn test_window_bounds_property() {
        for (position, half_width) in [(2, 1), (100000, 500), (16050000, 250000), (u64::MAX / 2, 7)] {
            let window = Window::around(position, half_width).unwrap();
            assert!(window.start <= position && position <= window.end);
            assert!(window.contains(position));
            assert_eq!(window.width(), 2 * half_width);
        }
    }

    #[test]
    fn test_imputation_range_is_narrow() {
        let config = resolve(&example_table(), &cli()).unwrap();
        let range = config.imputation_range();
        assert_eq!(range, ImputationRange { start: 100000, end: 100001 });
        assert!(config.window.contains(range.start) && config.window.contains(range.end));
    }

    #[test]
    fn test_run_id_validation() {
        for bad in ["a/b", "..", ".", "data", "run 1"] {
            let overrides = CliOverrides {
                output_run_id: Some(bad.to_string()),
                ..cli()
            };
            assert!(
                matches!(
                    resolve(&example_table(), &overrides),
                    Err(FinemapError::InvalidParameter { name: OUTPUT_RUN_ID, .. })
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_zero_threads_rejected() {
        let overrides = CliOverrides {
            threads: Some(0),
            ..cli()
        };
        assert!(matches!(
            resolve(&example_table(), &overrides),
            Err(FinemapError::InvalidParameter { name: THREADS, .. })
        ));
    }

    #[test]
    fn test_optional_keys() {
        let mut t = example_table();
        t.insert(
            GENETIC_MAP.to_string(),
            toml::Value::String("/maps/chr{chr}.gmap".to_string()),
        );
        t.insert(PHASING_SEED.to_string(), toml::Value::Integer(42));
        t.insert("minimac".to_string(), toml::Value::String("minimac4".to_string()));
        let config = resolve(&t, &cli()).unwrap();
        assert_eq!(config.genetic_map, PathBuf::from("/maps/chr1.gmap"));
        assert_eq!(config.phasing_seed, 42);
        assert_eq!(config.tools.minimac, "minimac4");
        assert_eq!(config.tools.plink, "plink");
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "target-variant-id = \"rsX\"").unwrap();
        writeln!(file, "chromosome = \"1\"").unwrap();
        writeln!(file, "position = 100000").unwrap();
        let t = load_config_file(file.path()).unwrap();
        assert_eq!(t.len(), 3);

        let mut broken = NamedTempFile::new().unwrap();
        writeln!(broken, "position = = 3").unwrap();
        assert!(matches!(
            load_config_file(broken.path()),
            Err(FinemapError::ConfigFile { .. })
        ));

        assert!(matches!(
            load_config_file("/nonexistent/finemap.toml"),
            Err(FinemapError::ConfigFile { .. })
        ));
    }

    #[test]
    fn test_validate_inputs_and_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("chip");
        let overrides = CliOverrides {
            genotype_input_prefix: Some(prefix.display().to_string()),
            ..cli()
        };
        let config = resolve(&example_table(), &overrides)
            .unwrap()
            .with_absolute_paths()
            .unwrap();
        assert!(config.reference_panel.is_absolute());
        assert!(config.genetic_map.is_absolute());
        assert!(matches!(
            config.validate_inputs(),
            Err(FinemapError::FileNotFound(_))
        ));

        for suffix in [".bed", ".bim", ".fam"] {
            std::fs::write(append_suffix(&prefix, suffix), "").unwrap();
        }
        assert!(config.validate_inputs().is_ok());
    }

    #[test]
    fn test_write_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let config = resolve(&example_table(), &cli()).unwrap();
        let path = dir.path().join("run1.config.toml");
        config.write_resolved(&path).unwrap();

        let written = load_config_file(&path).unwrap();
        assert_eq!(written["target-variant-id"].as_str(), Some("rsX"));
        assert_eq!(written["position"].as_integer(), Some(100000));
        assert_eq!(written["skip-individual-qc"].as_bool(), Some(false));
    }
}
