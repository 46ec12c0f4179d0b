//! Samples: the recorded outcome of one evaluation.
//!
//! The cache is generic over the [`Sample`] trait; [`MapMatcherSample`] is the
//! concrete sample produced by the map-matching pipeline and by the synthetic
//! generator used in tests.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::params::ParamSet;

/// Where a sample came from.
///
/// Synthetic samples are never mixed with real pipeline results: a database
/// records the origin it was created for and refuses the other kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleOrigin {
    #[default]
    Pipeline,
    Synthetic,
}

impl SampleOrigin {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for SampleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pipeline" => Ok(Self::Pipeline),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(format!("unknown sample origin: {other}")),
        }
    }
}

/// A stored evaluation outcome.
pub trait Sample: Clone + Serialize + DeserializeOwned {
    /// Tag written into payload envelopes; a payload of another kind fails to load.
    const KIND: &'static str;

    fn name(&self) -> Option<&str>;
    fn set_name(&mut self, name: String);
    /// The full parameter set this sample was evaluated with.
    fn parameters(&self) -> &ParamSet;
    fn parameters_mut(&mut self) -> &mut ParamSet;
    fn origin(&self) -> SampleOrigin;
}

/// Outcome of one map-matcher evaluation run.
///
/// `translation_errors` and `rotation_errors` are aligned per match; both have
/// `nr_matches` entries for well-formed results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMatcherSample {
    #[serde(default)]
    pub name: Option<String>,
    pub parameters: ParamSet,
    #[serde(default)]
    pub origin: SampleOrigin,
    #[serde(default)]
    pub translation_errors: Vec<f64>,
    #[serde(default)]
    pub rotation_errors: Vec<f64>,
    #[serde(default)]
    pub nr_matches: u64,
    /// Wall-clock duration of the evaluation, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_secs: Option<f64>,
}

impl MapMatcherSample {
    /// An empty sample for `parameters` (no matches yet).
    #[must_use]
    pub fn new(parameters: ParamSet, origin: SampleOrigin) -> Self {
        Self {
            name: None,
            parameters,
            origin,
            translation_errors: Vec::new(),
            rotation_errors: Vec::new(),
            nr_matches: 0,
            wall_time_secs: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Number of matches with both errors recorded.
    #[must_use]
    pub fn paired_matches(&self) -> usize {
        self.translation_errors.len().min(self.rotation_errors.len())
    }

    #[must_use]
    pub fn mean_translation_error(&self) -> Option<f64> {
        mean(&self.translation_errors)
    }

    #[must_use]
    pub fn mean_rotation_error(&self) -> Option<f64> {
        mean(&self.rotation_errors)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

impl Sample for MapMatcherSample {
    const KIND: &'static str = "map_matcher";

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    fn parameters(&self) -> &ParamSet {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParamSet {
        &mut self.parameters
    }

    fn origin(&self) -> SampleOrigin {
        self.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_set;

    #[test]
    fn origin_roundtrips_through_text() {
        for origin in [SampleOrigin::Pipeline, SampleOrigin::Synthetic] {
            assert_eq!(origin.to_string().parse::<SampleOrigin>(), Ok(origin));
        }
        assert!("real".parse::<SampleOrigin>().is_err());
        assert_eq!(
            serde_json::to_string(&SampleOrigin::Synthetic).unwrap(),
            "\"synthetic\""
        );
    }

    #[test]
    fn legacy_payload_without_optional_fields_loads() {
        let json = r#"{"parameters":{"a":1.0},"nr_matches":3}"#;
        let sample: MapMatcherSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.origin, SampleOrigin::Pipeline);
        assert_eq!(sample.nr_matches, 3);
        assert!(sample.name.is_none());
        assert!(sample.wall_time_secs.is_none());
    }

    #[test]
    fn error_means() {
        let mut s = MapMatcherSample::new(param_set! { "a" => 1.0 }, SampleOrigin::Synthetic);
        assert_eq!(s.mean_translation_error(), None);
        s.translation_errors = vec![1.0, 3.0];
        s.rotation_errors = vec![0.5];
        assert_eq!(s.mean_translation_error(), Some(2.0));
        assert_eq!(s.mean_rotation_error(), Some(0.5));
        assert_eq!(s.paired_matches(), 1);
    }

    #[test]
    fn trait_accessors() {
        let mut s = MapMatcherSample::new(param_set! { "a" => 1.0 }, SampleOrigin::Pipeline)
            .with_name("run_1");
        assert_eq!(Sample::name(&s), Some("run_1"));
        s.parameters_mut().insert("b".into(), 2_i64.into());
        assert_eq!(s.parameters().len(), 2);
        assert_eq!(MapMatcherSample::KIND, "map_matcher");
    }
}
