//! Error types for bayropt-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bayropt-core
#[derive(Error, Debug)]
pub enum Error {
    /// Optimizer protocol violations raised by the objective function
    #[error("Objective error: {0}")]
    Objective(#[from] ObjectiveError),

    /// Index/payload consistency and misuse errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Sample generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Objective(err) => Some(err.remediation()),
            Self::Storage(err) => Some(err.remediation()),
            Self::Generation(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Check database", "bayropt verify")
                    .alternative("Verify the sample directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("A stored JSON document could not be read or written.")
                    .command("Check database", "bayropt verify")
                    .alternative("Restore the index file from a backup if it was edited by hand."),
            ),
        }
    }
}

/// Which side of a bound was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Min,
    Max,
}

impl std::fmt::Display for BoundSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
        }
    }
}

/// Objective-function errors (optimizer protocol violations and domain drift)
#[derive(Error, Debug)]
pub enum ObjectiveError {
    #[error("{param} value ({value}) violates {side} bound ({bound})")]
    BoundsViolation {
        param: String,
        value: f64,
        bound: f64,
        side: BoundSide,
    },

    #[error("{param} should get optimized, but is missing from the request")]
    MissingParameter { param: String },

    #[error("{param} is not under optimization, but was in the request")]
    OutOfScopeParameter { param: String },

    #[error("{param} has a non-finite value ({value})")]
    NonFiniteValue { param: String, value: f64 },

    #[error("sample {sample} matches the defaults but lacks optimized parameter(s): {missing}")]
    DomainInconsistency { sample: String, missing: String },

    #[error("invalid parameter schema for {param}: {reason}")]
    InvalidSchema { param: String, reason: String },
}

impl ObjectiveError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::BoundsViolation { param, .. } => Remediation::new(format!(
                "The optimizer requested {param} outside its declared bounds."
            ))
            .command("Show experiment bounds", "bayropt show-config")
            .alternative("Widen the bounds in the experiment file or fix the optimizer's space."),
            Self::MissingParameter { param } => Remediation::new(format!(
                "Include {param} in every evaluation request."
            ))
            .command("Show experiment bounds", "bayropt show-config")
            .alternative("Remove the parameter from the experiment's parameters if it is fixed."),
            Self::OutOfScopeParameter { param } => Remediation::new(format!(
                "Only optimized parameters may be requested; {param} is taken from defaults."
            ))
            .command("Show experiment bounds", "bayropt show-config")
            .alternative("Add the parameter to the experiment's parameters to optimize it."),
            Self::NonFiniteValue { .. } => {
                Remediation::new("The optimizer produced NaN or infinity. Check its inputs.")
                    .command("Show experiment bounds", "bayropt show-config")
            }
            Self::DomainInconsistency { .. } => Remediation::new(
                "Defaults and stored samples drifted apart. Patch legacy samples with the new parameter.",
            )
            .command("Patch samples", "bayropt add-param <name> <value> --yes")
            .alternative("Remove the inconsistent sample with `bayropt remove <hash>`."),
            Self::InvalidSchema { .. } => {
                Remediation::new("Fix the parameter definition in the experiment file.")
                    .command("Show experiment", "bayropt show-config")
            }
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error(
        "sample with hash {hash} was stored for different parameters (hash collision or index corruption)"
    )]
    HashCollision {
        hash: String,
        requested: String,
        stored: String,
    },

    #[error("a sample with hash {hash} already exists (stored as '{existing_name}')")]
    DuplicateKey { hash: String, existing_name: String },

    #[error("a sample payload already exists at {path}")]
    PayloadExists { path: String },

    #[error("no sample with hash {0}")]
    NotFound(String),

    #[error("payload {path} holds a '{found}' sample, expected '{expected}'")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("database holds {database} samples, refusing {requested} samples")]
    OriginMismatch { database: String, requested: String },

    #[error("database {0} is locked by another process")]
    Locked(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid sample name: {0:?}")]
    InvalidName(String),

    #[error("unsupported format version {found} in {path} (supported: {supported})")]
    UnsupportedVersion {
        path: String,
        found: u32,
        supported: u32,
    },
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::HashCollision { hash, .. } => Remediation::new(format!(
                "Index record {hash} does not match its parameters. Inspect and remove it."
            ))
            .command("Check database", "bayropt verify")
            .command("Remove record", format!("bayropt remove {hash}")),
            Self::DuplicateKey { hash, .. } => Remediation::new(
                "A sample for these parameters is already stored. Reuse it or override explicitly.",
            )
            .command("Remove record", format!("bayropt remove {hash}"))
            .alternative("Pass override_existing to replace the stored sample."),
            Self::PayloadExists { .. } => Remediation::new(
                "Another sample already uses this name on disk. Rename the results directory.",
            )
            .command("Check database", "bayropt verify"),
            Self::NotFound(_) => Remediation::new("The requested sample hash is not indexed.")
                .command("List samples", "bayropt list"),
            Self::TypeMismatch { .. } => Remediation::new(
                "The payload was written by a different sample source. Use a separate sample directory.",
            )
            .command("Check database", "bayropt verify"),
            Self::OriginMismatch { .. } => Remediation::new(
                "Synthetic and pipeline samples never share a database. Point the experiment at another index.",
            )
            .command("Show experiment", "bayropt show-config"),
            Self::Locked(_) => Remediation::new(
                "Another optimizer process uses this database. Wait for it or use a copy.",
            )
            .command("Find the holder", "lsof <index>.lock"),
            Self::InvalidPath(_) => Remediation::new(
                "Database index must be a file path and the sample directory must exist.",
            )
            .command("Show experiment", "bayropt show-config"),
            Self::InvalidName(_) => Remediation::new(
                "Sample names become file names; they must not contain path separators.",
            )
            .command("List samples", "bayropt list"),
            Self::UnsupportedVersion { .. } => Remediation::new(
                "The file was written by a newer bayropt. Upgrade before using this database.",
            )
            .command("Check version", "bayropt --version"),
        }
    }
}

/// Sample generation errors
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("sample requested with {requested} was generated with {generated}")]
    ContractViolation {
        requested: String,
        generated: String,
    },

    #[error("pipeline command failed: {0}")]
    PipelineFailed(String),

    #[error("cannot read pipeline results at {path}: {reason}")]
    ResultsUnreadable { path: String, reason: String },
}

impl GenerationError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ContractViolation { .. } => Remediation::new(
                "The pipeline did not run with the requested parameters. Check how it reads its parameter file.",
            )
            .command("Show experiment", "bayropt show-config")
            .alternative("Make sure the pipeline copies the parameters it used into parameters.yaml."),
            Self::PipelineFailed(_) => {
                Remediation::new("The evaluation pipeline exited with an error. Check its logs.")
                    .command("Show experiment", "bayropt show-config")
            }
            Self::ResultsUnreadable { path, .. } => Remediation::new(format!(
                "Results directory {path} lacks parameters.yaml or results.json."
            ))
            .command("Inspect results", format!("ls \"{path}\"")),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Experiment file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --experiment with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read experiment file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\"")),
            Self::ParseFailed(_) => {
                Remediation::new("Experiment file parse failed. Fix the syntax and retry.")
                    .command("Show experiment", "bayropt show-config")
                    .alternative("YAML files need .yaml/.yml, TOML files need .toml.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Experiment validation failed. Fix the invalid fields and retry.")
                    .command("Show experiment", "bayropt show-config")
            }
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
