//! Performance measures: scalar scores over samples.
//!
//! Every measure here maps a [`MapMatcherSample`] into `[0, 1]`; a sample
//! without matches always scores `0`.

use serde::{Deserialize, Serialize};

use crate::sample::{MapMatcherSample, Sample};

/// Scalar scoring function over a sample.
pub trait PerformanceMeasure<S: Sample> {
    fn measure(&self, sample: &S) -> f64;

    /// Inclusive range of values `measure` can return. Display metadata only.
    fn value_range(&self) -> (f64, f64);

    fn name(&self) -> String;
}

impl<S: Sample, M: PerformanceMeasure<S> + ?Sized> PerformanceMeasure<S> for Box<M> {
    fn measure(&self, sample: &S) -> f64 {
        (**self).measure(sample)
    }

    fn value_range(&self) -> (f64, f64) {
        (**self).value_range()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Serializable description of a measure, as written in experiment files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasureSpec {
    /// `min(nr_matches / expected_matches, 1)`.
    MatchCount { expected_matches: u64 },
    /// Fraction of matches with both errors inside the bounds.
    ErrorBound {
        max_translation_error: f64,
        max_rotation_error: f64,
    },
    /// Weighted mean of other measures.
    Mixer { components: Vec<WeightedMeasure> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedMeasure {
    pub weight: f64,
    pub measure: MeasureSpec,
}

impl MeasureSpec {
    /// Check the parameters for values that cannot produce a `[0, 1]` score.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::MatchCount { expected_matches } => {
                if *expected_matches == 0 {
                    return Err("match_count: expected_matches must be > 0".to_string());
                }
            }
            Self::ErrorBound {
                max_translation_error,
                max_rotation_error,
            } => {
                if !(max_translation_error.is_finite() && *max_translation_error >= 0.0)
                    || !(max_rotation_error.is_finite() && *max_rotation_error >= 0.0)
                {
                    return Err("error_bound: bounds must be finite and >= 0".to_string());
                }
            }
            Self::Mixer { components } => {
                if components.is_empty() {
                    return Err("mixer: needs at least one component".to_string());
                }
                if components
                    .iter()
                    .any(|c| !c.weight.is_finite() || c.weight < 0.0)
                {
                    return Err("mixer: weights must be finite and >= 0".to_string());
                }
                if components.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
                    return Err("mixer: weights must not all be zero".to_string());
                }
                for c in components {
                    c.measure.validate()?;
                }
            }
        }
        Ok(())
    }

    /// Instantiate the described measure.
    #[must_use]
    pub fn build(&self) -> Box<dyn PerformanceMeasure<MapMatcherSample>> {
        match self {
            Self::MatchCount { expected_matches } => Box::new(MatchCount {
                expected_matches: *expected_matches,
            }),
            Self::ErrorBound {
                max_translation_error,
                max_rotation_error,
            } => Box::new(ErrorBound {
                max_translation_error: *max_translation_error,
                max_rotation_error: *max_rotation_error,
            }),
            Self::Mixer { components } => Box::new(Mixer {
                components: components
                    .iter()
                    .map(|c| (c.weight, c.measure.build()))
                    .collect(),
            }),
        }
    }
}

/// Scores how close the match count gets to an expected number of matches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCount {
    pub expected_matches: u64,
}

impl PerformanceMeasure<MapMatcherSample> for MatchCount {
    fn measure(&self, sample: &MapMatcherSample) -> f64 {
        if sample.nr_matches == 0 || self.expected_matches == 0 {
            return 0.0;
        }
        (sample.nr_matches as f64 / self.expected_matches as f64).min(1.0)
    }

    fn value_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn name(&self) -> String {
        format!("match count (expected {})", self.expected_matches)
    }
}

/// Fraction of matches whose translation and rotation errors stay in bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorBound {
    pub max_translation_error: f64,
    pub max_rotation_error: f64,
}

impl PerformanceMeasure<MapMatcherSample> for ErrorBound {
    fn measure(&self, sample: &MapMatcherSample) -> f64 {
        let paired = sample.paired_matches();
        if sample.nr_matches == 0 || paired == 0 {
            return 0.0;
        }
        let within = sample
            .translation_errors
            .iter()
            .zip(&sample.rotation_errors)
            .filter(|(t, r)| t.abs() <= self.max_translation_error && r.abs() <= self.max_rotation_error)
            .count();
        within as f64 / paired as f64
    }

    fn value_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn name(&self) -> String {
        format!(
            "error bound (translation <= {}, rotation <= {})",
            self.max_translation_error, self.max_rotation_error
        )
    }
}

/// Weighted mean of several measures.
pub struct Mixer {
    pub components: Vec<(f64, Box<dyn PerformanceMeasure<MapMatcherSample>>)>,
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer")
            .field("components", &self.name())
            .finish()
    }
}

impl PerformanceMeasure<MapMatcherSample> for Mixer {
    fn measure(&self, sample: &MapMatcherSample) -> f64 {
        let total: f64 = self.components.iter().map(|(w, _)| *w).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = self
            .components
            .iter()
            .map(|(w, m)| w * m.measure(sample))
            .sum();
        (weighted / total).clamp(0.0, 1.0)
    }

    fn value_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn name(&self) -> String {
        let parts: Vec<String> = self
            .components
            .iter()
            .map(|(w, m)| format!("{w} x {}", m.name()))
            .collect();
        format!("mix of [{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param_set;
    use crate::sample::SampleOrigin;

    fn sample(translation: &[f64], rotation: &[f64]) -> MapMatcherSample {
        let mut s = MapMatcherSample::new(param_set! { "a" => 1.0 }, SampleOrigin::Synthetic);
        s.translation_errors = translation.to_vec();
        s.rotation_errors = rotation.to_vec();
        s.nr_matches = translation.len() as u64;
        s
    }

    #[test]
    fn match_count_saturates() {
        let m = MatchCount { expected_matches: 4 };
        assert_eq!(m.measure(&sample(&[0.1, 0.1], &[0.1, 0.1])), 0.5);
        assert_eq!(m.measure(&sample(&[0.1; 8], &[0.1; 8])), 1.0);
        assert_eq!(m.measure(&sample(&[], &[])), 0.0);
    }

    #[test]
    fn error_bound_counts_matches_within_both_limits() {
        let m = ErrorBound {
            max_translation_error: 0.5,
            max_rotation_error: 0.1,
        };
        let s = sample(&[0.1, 0.6, 0.2, 0.3], &[0.05, 0.05, 0.2, 0.1]);
        // Only the first and last pair pass both checks.
        assert_eq!(m.measure(&s), 0.5);
        assert_eq!(m.measure(&sample(&[], &[])), 0.0);
    }

    #[test]
    fn mixer_is_weighted_mean() {
        let spec = MeasureSpec::Mixer {
            components: vec![
                WeightedMeasure {
                    weight: 3.0,
                    measure: MeasureSpec::MatchCount { expected_matches: 2 },
                },
                WeightedMeasure {
                    weight: 1.0,
                    measure: MeasureSpec::ErrorBound {
                        max_translation_error: 0.0,
                        max_rotation_error: 0.0,
                    },
                },
            ],
        };
        spec.validate().unwrap();
        let m = spec.build();
        let value = m.measure(&sample(&[0.1, 0.1], &[0.1, 0.1]));
        assert!((value - 0.75).abs() < 1e-12);
        assert!(m.name().starts_with("mix of"));
        assert_eq!(m.value_range(), (0.0, 1.0));
    }

    #[test]
    fn validate_rejects_degenerate_specs() {
        assert!(MeasureSpec::MatchCount { expected_matches: 0 }.validate().is_err());
        assert!(MeasureSpec::Mixer { components: vec![] }.validate().is_err());
        assert!(MeasureSpec::ErrorBound {
            max_translation_error: f64::NAN,
            max_rotation_error: 1.0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn measure_kind_deserializes_from_yaml() {
        let yaml = "kind: error_bound\nmax_translation_error: 0.5\nmax_rotation_error: 0.1\n";
        let spec: MeasureSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            spec,
            MeasureSpec::ErrorBound {
                max_translation_error: 0.5,
                max_rotation_error: 0.1
            }
        );
    }
}
