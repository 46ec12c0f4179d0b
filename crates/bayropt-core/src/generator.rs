//! Sample generators: the collaborators that actually perform an evaluation.
//!
//! [`PipelineGenerator`] runs the external map-matching pipeline and reads back
//! its results directory. [`SyntheticGenerator`] computes a cheap closed-form
//! stand-in for tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::canonical::canonical_hash;
use crate::error::{GenerationError, Result};
use crate::params::{ParamSet, display_params};
use crate::sample::{MapMatcherSample, Sample, SampleOrigin};

/// Environment variable holding the path of the requested parameter file.
pub const PARAMS_FILE_ENV: &str = "BAYROPT_PARAMS_FILE";
/// Environment variable holding the directory the pipeline must write results to.
pub const RESULTS_DIR_ENV: &str = "BAYROPT_RESULTS_DIR";
/// Environment variable holding the path of the pass-through settings file.
pub const SETTINGS_FILE_ENV: &str = "BAYROPT_SETTINGS_FILE";
/// Prefix of every run directory created under the work directory.
pub const RUN_DIR_PREFIX: &str = "run_";

/// Something that can produce a sample for a full parameter set.
///
/// Generation blocks until the sample exists; there is no timeout.
pub trait SampleGenerator<S: Sample> {
    /// Origin stamped on every produced sample.
    fn origin(&self) -> SampleOrigin;

    fn generate(&mut self, params: &ParamSet) -> Result<S>;
}

impl<S: Sample, G: SampleGenerator<S> + ?Sized> SampleGenerator<S> for Box<G> {
    fn origin(&self) -> SampleOrigin {
        (**self).origin()
    }

    fn generate(&mut self, params: &ParamSet) -> Result<S> {
        (**self).generate(params)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// How to launch the evaluation pipeline.
///
/// Arguments may contain the placeholders `{params}`, `{results}` and
/// `{run_dir}`. `settings` is never interpreted here; it is written next to the
/// parameter file for the pipeline to read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory under which one run directory per evaluation is created.
    pub work_dir: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "serde_yaml::Value::is_null")]
    pub settings: serde_yaml::Value,
}

/// Generator backed by the external map-matching pipeline.
#[derive(Debug, Clone)]
pub struct PipelineGenerator {
    config: PipelineConfig,
}

/// Layout of a single pipeline run.
#[derive(Debug, Clone)]
struct RunLayout {
    run_dir: PathBuf,
    params_file: PathBuf,
    results_dir: PathBuf,
    settings_file: Option<PathBuf>,
    log_file: PathBuf,
}

/// Measurements the pipeline writes to `results.json`.
#[derive(Debug, Deserialize)]
struct RawResults {
    #[serde(default)]
    translation_errors: Vec<f64>,
    #[serde(default)]
    rotation_errors: Vec<f64>,
    #[serde(default)]
    nr_matches: Option<u64>,
    #[serde(default)]
    wall_time_secs: Option<f64>,
}

impl PipelineGenerator {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run directories that no stored sample is named after.
    ///
    /// These are left behind by runs that failed, broke the results contract
    /// or were interrupted. A missing work directory holds no runs.
    pub fn unrecorded_runs<'a>(&self, recorded: impl IntoIterator<Item = &'a str>) -> Result<Vec<PathBuf>> {
        let recorded: HashSet<&str> = recorded.into_iter().collect();
        let entries = match fs::read_dir(&self.config.work_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(RUN_DIR_PREFIX) && !recorded.contains(name) {
                runs.push(entry.path());
            }
        }
        runs.sort();
        debug!(
            work_dir = %self.config.work_dir.display(),
            unrecorded = runs.len(),
            "Scanned pipeline runs"
        );
        Ok(runs)
    }

    fn prepare_run(&self, params: &ParamSet) -> Result<RunLayout> {
        fs::create_dir_all(&self.config.work_dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let hash = canonical_hash(params);
        let base = format!("{RUN_DIR_PREFIX}{stamp}_{}", hash.short());

        let mut run_dir = self.config.work_dir.join(&base);
        let mut attempt = 1;
        while run_dir.exists() {
            run_dir = self.config.work_dir.join(format!("{base}_{attempt}"));
            attempt += 1;
        }
        let results_dir = run_dir.join("results");
        fs::create_dir_all(&results_dir)?;

        let params_file = run_dir.join("params.yaml");
        write_yaml(&params_file, params)?;

        let settings_file = if self.config.settings.is_null() {
            None
        } else {
            let path = run_dir.join("settings.yaml");
            write_yaml(&path, &self.config.settings)?;
            Some(path)
        };

        Ok(RunLayout {
            log_file: run_dir.join("pipeline.log"),
            run_dir,
            params_file,
            results_dir,
            settings_file,
        })
    }

    fn command_for(&self, layout: &RunLayout) -> Result<Command> {
        let mut cmd = Command::new(&self.config.command);
        for arg in &self.config.args {
            cmd.arg(substitute(arg, layout));
        }
        cmd.current_dir(&layout.run_dir)
            .env(PARAMS_FILE_ENV, &layout.params_file)
            .env(RESULTS_DIR_ENV, &layout.results_dir)
            .envs(&self.config.env)
            .stdin(Stdio::null());
        if let Some(settings) = &layout.settings_file {
            cmd.env(SETTINGS_FILE_ENV, settings);
        }
        let log = File::create(&layout.log_file)?;
        cmd.stdout(Stdio::from(log.try_clone()?));
        cmd.stderr(Stdio::from(log));
        Ok(cmd)
    }
}

impl SampleGenerator<MapMatcherSample> for PipelineGenerator {
    fn origin(&self) -> SampleOrigin {
        SampleOrigin::Pipeline
    }

    fn generate(&mut self, params: &ParamSet) -> Result<MapMatcherSample> {
        let layout = self.prepare_run(params)?;
        let mut cmd = self.command_for(&layout)?;

        info!(
            run_dir = %layout.run_dir.display(),
            command = %self.config.command,
            "Starting pipeline run"
        );
        let started = Instant::now();
        let status = cmd.status().map_err(|err| {
            GenerationError::PipelineFailed(format!(
                "could not start {}: {err}",
                self.config.command
            ))
        })?;
        let elapsed = started.elapsed().as_secs_f64();

        if !status.success() {
            return Err(GenerationError::PipelineFailed(format!(
                "{} {status}; see {}",
                self.config.command,
                layout.log_file.display()
            ))
            .into());
        }
        info!(
            run_dir = %layout.run_dir.display(),
            elapsed_secs = elapsed,
            "Pipeline run finished"
        );

        let (used, mut sample) = sample_from_results(&layout.results_dir)?;
        if &used != params {
            return Err(GenerationError::ContractViolation {
                requested: display_params(params),
                generated: display_params(&used),
            }
            .into());
        }
        if sample.wall_time_secs.is_none() {
            sample.wall_time_secs = Some(elapsed);
        }
        Ok(sample)
    }
}

/// Delete run directories, typically those from [`PipelineGenerator::unrecorded_runs`].
pub fn remove_runs(runs: &[PathBuf]) -> Result<usize> {
    for run in runs {
        fs::remove_dir_all(run)?;
        info!(run_dir = %run.display(), "Removed unrecorded pipeline run");
    }
    Ok(runs.len())
}

fn substitute(arg: &str, layout: &RunLayout) -> String {
    arg.replace("{params}", &layout.params_file.to_string_lossy())
        .replace("{results}", &layout.results_dir.to_string_lossy())
        .replace("{run_dir}", &layout.run_dir.to_string_lossy())
}

fn write_yaml<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_yaml::to_string(value).map_err(|err| {
        GenerationError::PipelineFailed(format!("cannot write {}: {err}", path.display()))
    })?;
    fs::write(path, text)?;
    Ok(())
}

/// Build a sample from a finished pipeline results directory.
///
/// Returns the parameters the pipeline reports having used together with the
/// sample. The sample is named after the directory, or after its parent when
/// the directory itself is called `results`.
pub fn sample_from_results(path: &Path) -> Result<(ParamSet, MapMatcherSample)> {
    let path = std::path::absolute(path)?;
    let unreadable = |reason: String| GenerationError::ResultsUnreadable {
        path: path.display().to_string(),
        reason,
    };

    let params_text = fs::read_to_string(path.join("parameters.yaml"))
        .map_err(|err| unreadable(format!("parameters.yaml: {err}")))?;
    let used: ParamSet = serde_yaml::from_str(&params_text)
        .map_err(|err| unreadable(format!("parameters.yaml: {err}")))?;

    let results_text = fs::read_to_string(path.join("results.json"))
        .map_err(|err| unreadable(format!("results.json: {err}")))?;
    let raw: RawResults = serde_json::from_str(&results_text)
        .map_err(|err| unreadable(format!("results.json: {err}")))?;

    let name = results_name(&path).ok_or_else(|| unreadable("no directory name".to_string()))?;
    debug!(results = %path.display(), sample = %name, "Read pipeline results");

    let mut sample = MapMatcherSample::new(used.clone(), SampleOrigin::Pipeline).with_name(name);
    sample.nr_matches = raw
        .nr_matches
        .unwrap_or(raw.translation_errors.len() as u64);
    sample.translation_errors = raw.translation_errors;
    sample.rotation_errors = raw.rotation_errors;
    sample.wall_time_secs = raw.wall_time_secs;
    Ok((used, sample))
}

fn results_name(path: &Path) -> Option<String> {
    let base = path.file_name()?.to_str()?;
    if base == "results" {
        path.parent()?.file_name()?.to_str().map(str::to_string)
    } else {
        Some(base.to_string())
    }
}

// =============================================================================
// Synthetic
// =============================================================================

fn default_peak_x() -> f64 {
    2.0
}

fn default_peak_y() -> f64 {
    3.0
}

fn default_width() -> f64 {
    2.0
}

fn default_max_matches() -> u64 {
    100
}

/// Closed-form stand-in for the pipeline.
///
/// The match count is a Gaussian bump over two named parameters, peaking at
/// `(peak_x, peak_y)`. Errors grow with the distance from the peak. Missing or
/// non-numeric parameters read as `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticGenerator {
    pub x_param: String,
    pub y_param: String,
    #[serde(default = "default_peak_x")]
    pub peak_x: f64,
    #[serde(default = "default_peak_y")]
    pub peak_y: f64,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_max_matches")]
    pub max_matches: u64,
}

impl SyntheticGenerator {
    #[must_use]
    pub fn new(x_param: impl Into<String>, y_param: impl Into<String>) -> Self {
        Self {
            x_param: x_param.into(),
            y_param: y_param.into(),
            peak_x: default_peak_x(),
            peak_y: default_peak_y(),
            width: default_width(),
            max_matches: default_max_matches(),
        }
    }

    fn coordinate(params: &ParamSet, name: &str) -> f64 {
        params
            .get(name)
            .and_then(crate::params::ParamValue::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    /// Squared distance from the peak in units of `width`.
    fn spread(&self, params: &ParamSet) -> f64 {
        let dx = Self::coordinate(params, &self.x_param) - self.peak_x;
        let dy = Self::coordinate(params, &self.y_param) - self.peak_y;
        let w = if self.width > 0.0 { self.width } else { 1.0 };
        (dx * dx + dy * dy) / (w * w)
    }
}

impl SampleGenerator<MapMatcherSample> for SyntheticGenerator {
    fn origin(&self) -> SampleOrigin {
        SampleOrigin::Synthetic
    }

    fn generate(&mut self, params: &ParamSet) -> Result<MapMatcherSample> {
        let spread = self.spread(params);
        let nr_matches = (self.max_matches as f64 * (-spread / 2.0).exp()).round() as u64;

        let mut sample = MapMatcherSample::new(params.clone(), SampleOrigin::Synthetic);
        sample.nr_matches = nr_matches;
        for i in 0..nr_matches {
            let jitter = 1.0 + (i % 5) as f64 * 0.1;
            sample.translation_errors.push(0.05 * (1.0 + spread) * jitter);
            sample.rotation_errors.push(0.01 * (1.0 + spread) * jitter);
        }
        sample.wall_time_secs = Some(0.0);
        debug!(nr_matches, spread, "Generated synthetic sample");
        Ok(sample)
    }
}
