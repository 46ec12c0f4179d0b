//! Experiment configuration.
//!
//! An experiment file ties together the sample database, the default
//! parameters, the optimized parameters with their bounds, the generator and
//! the performance measure. YAML (`.yaml`/`.yml`) and TOML (`.toml`) are
//! accepted; other extensions are parsed as YAML.
//!
//! ```yaml
//! database: { index: samples/db.json, sample_dir: samples }
//! defaults_file: defaults.yaml
//! defaults: { b: 2 }
//! parameters:
//!   a: { kind: float, min: 0.0, max: 5.0, rounding: 3 }
//! normalization: true
//! generator: { kind: synthetic, x_param: a, y_param: b }
//! measure: { kind: match_count, expected_matches: 100 }
//! logging: { level: info, format: pretty }
//! ```
//!
//! Relative paths are resolved against the directory of the experiment file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::SampleDatabase;
use crate::error::{ConfigError, Result};
use crate::generator::{PipelineConfig, PipelineGenerator, SampleGenerator, SyntheticGenerator};
use crate::logging::LogConfig;
use crate::measure::{MeasureSpec, PerformanceMeasure};
use crate::objective::{ObjectiveFunction, ParamSpec};
use crate::params::ParamSet;
use crate::sample::{MapMatcherSample, SampleOrigin};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Location of the sample database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Index file.
    pub index: PathBuf,
    /// Directory holding one payload file per sample. Created on open.
    pub sample_dir: PathBuf,
}

/// Which generator produces missing samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Pipeline(PipelineConfig),
    Synthetic(SyntheticGenerator),
}

impl GeneratorConfig {
    #[must_use]
    pub fn origin(&self) -> SampleOrigin {
        match self {
            Self::Pipeline(_) => SampleOrigin::Pipeline,
            Self::Synthetic(_) => SampleOrigin::Synthetic,
        }
    }

    #[must_use]
    pub fn build(&self) -> Box<dyn SampleGenerator<MapMatcherSample>> {
        match self {
            Self::Pipeline(config) => Box::new(PipelineGenerator::new(config.clone())),
            Self::Synthetic(generator) => Box::new(generator.clone()),
        }
    }
}

/// Database type built from an experiment file.
pub type ExperimentDatabase = SampleDatabase<MapMatcherSample, Box<dyn SampleGenerator<MapMatcherSample>>>;

/// Objective function type built from an experiment file.
pub type ExperimentObjective =
    ObjectiveFunction<MapMatcherSample, ExperimentDatabase, Box<dyn PerformanceMeasure<MapMatcherSample>>>;

/// A complete experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub database: DatabaseConfig,

    /// Default values for every parameter the generator needs. Merged over
    /// the contents of `defaults_file`.
    #[serde(default)]
    pub defaults: ParamSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults_file: Option<PathBuf>,

    /// Optimized parameters and their bounds.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,

    /// Global float rounding; `0` disables it.
    #[serde(default)]
    pub rounding_decimal_places: u32,

    #[serde(default)]
    pub normalization: bool,

    pub generator: GeneratorConfig,

    pub measure: MeasureSpec,

    #[serde(default)]
    pub logging: LogConfig,
}

impl ExperimentConfig {
    /// Load, resolve and validate an experiment file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        let mut config = Self::parse(&content, path)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.load_defaults_file()?;
        config.validate()?;
        debug!(
            experiment = %path.display(),
            optimized = config.parameters.len(),
            origin = %config.generator.origin(),
            "Loaded experiment"
        );
        Ok(config)
    }

    /// Parse an experiment document, choosing the format by the extension of `path`.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        let parsed: std::result::Result<Self, String> = if is_toml {
            toml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|reason| ConfigError::ParseFailed(format!("{}: {reason}", path.display())).into())
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.database.index);
        resolve(&mut self.database.sample_dir);
        if let Some(file) = &mut self.defaults_file {
            resolve(file);
        }
        if let Some(file) = &mut self.logging.file {
            resolve(file);
        }
        if let GeneratorConfig::Pipeline(pipeline) = &mut self.generator {
            resolve(&mut pipeline.work_dir);
            // Bare command names are looked up on PATH.
            let command = Path::new(&pipeline.command);
            if command.components().count() > 1 && command.is_relative() {
                pipeline.command = base.join(command).display().to_string();
            }
        }
    }

    /// Merge `defaults_file` under the inline defaults.
    fn load_defaults_file(&mut self) -> Result<()> {
        let Some(file) = &self.defaults_file else {
            return Ok(());
        };
        let content = std::fs::read_to_string(file)
            .map_err(|e| ConfigError::ReadFailed(file.display().to_string(), e.to_string()))?;
        let mut merged: ParamSet = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("{}: {e}", file.display())))?;
        merged.extend(std::mem::take(&mut self.defaults));
        self.defaults = merged;
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> crate::Error { ConfigError::ValidationError(msg).into() };

        for name in self.parameters.keys() {
            if !self.defaults.contains_key(name) {
                return Err(invalid(format!("parameter '{name}' has no default value")));
            }
        }
        self.measure
            .validate()
            .map_err(|e| invalid(format!("measure: {e}")))?;
        if self.database.index == self.database.sample_dir {
            return Err(invalid("database.index and database.sample_dir must differ".to_string()));
        }
        match &self.generator {
            GeneratorConfig::Pipeline(p) if p.command.trim().is_empty() => {
                Err(invalid("generator.command must not be empty".to_string()))
            }
            GeneratorConfig::Synthetic(s) if s.x_param == s.y_param => {
                Err(invalid("generator.x_param and generator.y_param must differ".to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Open the configured database, creating the sample directory if needed.
    pub fn open_database(&self) -> Result<ExperimentDatabase> {
        std::fs::create_dir_all(&self.database.sample_dir)?;
        SampleDatabase::open(
            &self.database.index,
            &self.database.sample_dir,
            self.generator.build(),
        )
    }

    /// Pipeline run directories that no sample in `db` is named after.
    ///
    /// Synthetic experiments never create run directories.
    pub fn unrecorded_runs(&self, db: &ExperimentDatabase) -> Result<Vec<PathBuf>> {
        match &self.generator {
            GeneratorConfig::Pipeline(config) => PipelineGenerator::new(config.clone())
                .unrecorded_runs(db.records().map(|(_, record)| record.sample_name.as_str())),
            GeneratorConfig::Synthetic(_) => Ok(Vec::new()),
        }
    }

    /// Open the database and wrap it in the configured objective function.
    pub fn objective(&self) -> Result<ExperimentObjective> {
        let database = self.open_database()?;
        let objective = ObjectiveFunction::new(
            database,
            self.defaults.clone(),
            self.parameters.clone(),
            self.measure.build(),
        )?
        .with_rounding(self.rounding_decimal_places)
        .with_normalization(self.normalization);
        Ok(objective)
    }
}
