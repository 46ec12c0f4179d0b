//! Objective-function adapter between an optimizer and the sample cache.
//!
//! The optimizer works on a reduced, bounded and possibly normalized view of
//! the parameters: an [`OptimizerPoint`] that names only the optimized
//! parameters. [`ObjectiveFunction`] validates such a point against the
//! parameter schema, casts and rounds it, merges it onto the defaults to form
//! a full [`ParamSet`], fetches the corresponding sample and scores it.
//!
//! It also goes the other way: [`ObjectiveFunction::samples`] walks the stored
//! samples that belong to the current experiment, and
//! [`ObjectiveFunction::observations`] projects them back into optimizer space
//! so an optimizer can be seeded with earlier evaluations.

use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::canonical::{ParamHash, canonical_hash};
use crate::database::SampleDatabase;
use crate::error::{BoundSide, ObjectiveError, Result};
use crate::generator::SampleGenerator;
use crate::measure::PerformanceMeasure;
use crate::params::{ParamSet, ParamValue, display_params};
use crate::sample::Sample;

/// Optimizer-facing point: optimized parameter name to raw value.
pub type OptimizerPoint = BTreeMap<String, f64>;

/// Where the adapter gets its samples from.
pub trait SampleSource<S: Sample> {
    /// Return the sample for `params`, generating it if needed. May block.
    fn fetch(&mut self, params: &ParamSet) -> Result<S>;

    /// Return the stored sample for `params`, if any, without generating.
    fn lookup(&self, params: &ParamSet) -> Result<Option<S>>;

    /// Every stored sample, read lazily.
    fn stored(&self) -> Box<dyn Iterator<Item = Result<S>> + '_>;
}

impl<S: Sample, G: SampleGenerator<S>> SampleSource<S> for SampleDatabase<S, G> {
    fn fetch(&mut self, params: &ParamSet) -> Result<S> {
        self.lookup_or_generate(params)
    }

    fn lookup(&self, params: &ParamSet) -> Result<Option<S>> {
        self.get(params)
    }

    fn stored(&self) -> Box<dyn Iterator<Item = Result<S>> + '_> {
        Box::new(self.iter())
    }
}

/// Value kind of an optimized parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    Float,
    /// Rounded to the nearest integer.
    Int,
    /// Optimized as a choice index, rounded to the nearest one.
    Enum,
}

/// Definition of one optimized parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(default)]
    pub kind: ParamKind,
    /// Inclusive lower bound. Defaults to `0` for enums.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound. Defaults to the last choice index for enums.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ParamValue>,
    /// Decimal places for float values; overrides the global setting. `0`
    /// disables rounding for this parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding: Option<u32>,
}

impl ParamSpec {
    #[must_use]
    pub fn float(min: f64, max: f64) -> Self {
        Self {
            kind: ParamKind::Float,
            min: Some(min),
            max: Some(max),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn int(min: i64, max: i64) -> Self {
        Self {
            kind: ParamKind::Int,
            min: Some(min as f64),
            max: Some(max as f64),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn choice(choices: Vec<ParamValue>) -> Self {
        Self {
            kind: ParamKind::Enum,
            choices,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_rounding(mut self, places: u32) -> Self {
        self.rounding = Some(places);
        self
    }

    /// Inclusive `(min, max)` bounds in optimizer space.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64) {
        let max_index = self.choices.len().saturating_sub(1) as f64;
        match self.kind {
            ParamKind::Enum => (self.min.unwrap_or(0.0), self.max.unwrap_or(max_index)),
            ParamKind::Float | ParamKind::Int => (
                self.min.unwrap_or(f64::NEG_INFINITY),
                self.max.unwrap_or(f64::INFINITY),
            ),
        }
    }

    fn validate(&self, name: &str, default: &ParamValue) -> std::result::Result<(), String> {
        let (min, max) = self.bounds();
        match self.kind {
            ParamKind::Float | ParamKind::Int => {
                if self.min.is_none() || self.max.is_none() {
                    return Err("min and max are required".to_string());
                }
                if default.as_f64().is_none() {
                    return Err(format!(
                        "default value {default} is a {}, not a number",
                        default.kind_name()
                    ));
                }
            }
            ParamKind::Enum => {
                if self.choices.is_empty() {
                    return Err("enum parameters need at least one choice".to_string());
                }
                if !self.choices.contains(default) {
                    return Err(format!("default value {default} is not among the choices"));
                }
                let last = (self.choices.len() - 1) as f64;
                if min < 0.0 || max > last {
                    return Err(format!("index bounds must lie within [0, {last}]"));
                }
            }
        }
        if !(min.is_finite() && max.is_finite()) {
            return Err(format!("{name} bounds must be finite"));
        }
        if min > max {
            return Err(format!("min ({min}) is greater than max ({max})"));
        }
        Ok(())
    }

    /// Optimizer-space coordinate of a stored value, if it has one.
    fn coordinate(&self, value: &ParamValue) -> Option<f64> {
        match self.kind {
            ParamKind::Float | ParamKind::Int => value.as_f64(),
            ParamKind::Enum => self
                .choices
                .iter()
                .position(|c| c == value)
                .map(|i| i as f64),
        }
    }
}

/// One stored sample that belongs to the current experiment.
#[derive(Debug, Clone)]
pub struct DomainSample<S> {
    pub params: ParamSet,
    pub value: f64,
    pub sample: S,
}

impl<S> DomainSample<S> {
    #[must_use]
    pub fn hash(&self) -> ParamHash {
        canonical_hash(&self.params)
    }
}

/// A previous evaluation expressed in optimizer space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub point: OptimizerPoint,
    pub value: f64,
    pub hash: ParamHash,
}

/// Result of one [`ObjectiveFunction::evaluate_point`] call.
#[derive(Debug, Clone)]
pub struct Evaluation<S> {
    pub params: ParamSet,
    pub hash: ParamHash,
    pub value: f64,
    pub sample: S,
}

/// Optimizer-facing objective function over a [`SampleSource`].
pub struct ObjectiveFunction<S, Src, M>
where
    S: Sample,
    Src: SampleSource<S>,
    M: PerformanceMeasure<S>,
{
    source: Src,
    defaults: ParamSet,
    schema: BTreeMap<String, ParamSpec>,
    measure: M,
    rounding_decimal_places: u32,
    normalization: bool,
    _sample: PhantomData<fn() -> S>,
}

impl<S, Src, M> ObjectiveFunction<S, Src, M>
where
    S: Sample,
    Src: SampleSource<S>,
    M: PerformanceMeasure<S>,
{
    /// Create an adapter. Every schema parameter must have a default value.
    ///
    /// Global rounding starts disabled and normalization off.
    pub fn new(
        source: Src,
        defaults: ParamSet,
        schema: BTreeMap<String, ParamSpec>,
        measure: M,
    ) -> Result<Self> {
        for (name, spec) in &schema {
            let default = defaults.get(name).ok_or_else(|| ObjectiveError::InvalidSchema {
                param: name.clone(),
                reason: "no default value".to_string(),
            })?;
            spec.validate(name, default)
                .map_err(|reason| ObjectiveError::InvalidSchema {
                    param: name.clone(),
                    reason,
                })?;
        }
        debug!(
            optimized = schema.len(),
            defaults = defaults.len(),
            measure = %measure.name(),
            "Initialized objective function"
        );
        Ok(Self {
            source,
            defaults,
            schema,
            measure,
            rounding_decimal_places: 0,
            normalization: false,
            _sample: PhantomData,
        })
    }

    /// Round float parameters to `places` decimal places; `0` disables rounding.
    #[must_use]
    pub fn with_rounding(mut self, places: u32) -> Self {
        self.rounding_decimal_places = places;
        self
    }

    /// Treat optimizer points as normalized to `[0, 1]`.
    #[must_use]
    pub fn with_normalization(mut self, enabled: bool) -> Self {
        self.normalization = enabled;
        self
    }

    #[must_use]
    pub fn defaults(&self) -> &ParamSet {
        &self.defaults
    }

    #[must_use]
    pub fn schema(&self) -> &BTreeMap<String, ParamSpec> {
        &self.schema
    }

    #[must_use]
    pub fn measure(&self) -> &M {
        &self.measure
    }

    #[must_use]
    pub fn normalization(&self) -> bool {
        self.normalization
    }

    #[must_use]
    pub fn rounding_decimal_places(&self) -> u32 {
        self.rounding_decimal_places
    }

    #[must_use]
    pub fn source(&self) -> &Src {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Src {
        &mut self.source
    }

    pub fn into_source(self) -> Src {
        self.source
    }

    /// Score the point the optimizer asks for. May block on generation.
    pub fn evaluate(&mut self, optimized: &OptimizerPoint) -> Result<f64> {
        self.evaluate_point(optimized).map(|e| e.value)
    }

    /// Like [`evaluate`](Self::evaluate), also returning the full parameter
    /// set and the sample.
    pub fn evaluate_point(&mut self, optimized: &OptimizerPoint) -> Result<Evaluation<S>> {
        let params = self.full_params(optimized)?;
        let sample = self.source.fetch(&params)?;
        let value = self.measure.measure(&sample);
        let hash = canonical_hash(&params);
        info!(
            hash = %hash,
            params = %display_params(&params),
            value,
            "Sampled objective function"
        );
        Ok(Evaluation {
            params,
            hash,
            value,
            sample,
        })
    }

    /// Validate, cast and round an optimizer point, then merge it onto the
    /// defaults.
    pub fn full_params(&self, optimized: &OptimizerPoint) -> Result<ParamSet> {
        self.check_keys(optimized)?;
        let point = if self.normalization {
            self.denormalize(optimized)?
        } else {
            optimized.clone()
        };

        let mut params = self.defaults.clone();
        for (name, spec) in &self.schema {
            let raw = point
                .get(name)
                .copied()
                .ok_or_else(|| ObjectiveError::MissingParameter { param: name.clone() })?;
            check_bounds(name, spec, raw)?;
            params.insert(name.clone(), self.cast(spec, raw));
        }
        Ok(params)
    }

    fn check_keys(&self, optimized: &OptimizerPoint) -> Result<()> {
        if let Some(unknown) = optimized.keys().find(|k| !self.schema.contains_key(*k)) {
            return Err(ObjectiveError::OutOfScopeParameter {
                param: unknown.clone(),
            }
            .into());
        }
        if let Some(missing) = self.schema.keys().find(|k| !optimized.contains_key(*k)) {
            return Err(ObjectiveError::MissingParameter {
                param: missing.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn cast(&self, spec: &ParamSpec, raw: f64) -> ParamValue {
        match spec.kind {
            ParamKind::Float => {
                let places = spec.rounding.unwrap_or(self.rounding_decimal_places);
                if places == 0 {
                    return ParamValue::Float(raw);
                }
                // Rounding must not carry a bound value outside the bounds.
                let (min, max) = spec.bounds();
                ParamValue::Float(round_to(raw, places).clamp(min, max))
            }
            ParamKind::Int => ParamValue::Int(raw.round() as i64),
            ParamKind::Enum => {
                let last = spec.choices.len().saturating_sub(1);
                let index = (raw.round().max(0.0) as usize).min(last);
                spec.choices[index].clone()
            }
        }
    }

    /// Map schema parameters from `[min, max]` into `[0, 1]`.
    ///
    /// Other entries are copied unchanged.
    pub fn normalize(&self, params: &OptimizerPoint) -> Result<OptimizerPoint> {
        let mut out = params.clone();
        for (name, spec) in &self.schema {
            let value = *params
                .get(name)
                .ok_or_else(|| ObjectiveError::MissingParameter { param: name.clone() })?;
            let (min, max) = spec.bounds();
            let range = max - min;
            let normalized = if range == 0.0 { 0.0 } else { (value - min) / range };
            out.insert(name.clone(), normalized);
        }
        Ok(out)
    }

    /// Map schema parameters from `[0, 1]` into `[min, max]`.
    ///
    /// `0` and `1` map exactly onto the bounds. Other entries are copied
    /// unchanged.
    pub fn denormalize(&self, params: &OptimizerPoint) -> Result<OptimizerPoint> {
        let mut out = params.clone();
        for (name, spec) in &self.schema {
            let value = *params
                .get(name)
                .ok_or_else(|| ObjectiveError::MissingParameter { param: name.clone() })?;
            let (min, max) = spec.bounds();
            #[allow(clippy::float_cmp)]
            let denormalized = if value == 0.0 {
                min
            } else if value == 1.0 {
                max
            } else {
                min + value * (max - min)
            };
            out.insert(name.clone(), denormalized);
        }
        Ok(out)
    }

    /// Stored samples whose non-optimized parameters all equal the defaults.
    ///
    /// A sample that matches the defaults but lacks an optimized parameter
    /// yields a [`ObjectiveError::DomainInconsistency`].
    pub fn samples(&self) -> impl Iterator<Item = Result<DomainSample<S>>> + '_ {
        self.source.stored().filter_map(move |stored| {
            let sample = match stored {
                Ok(sample) => sample,
                Err(err) => return Some(Err(err)),
            };
            match self.in_domain(sample.parameters()) {
                Ok(true) => Some(Ok(DomainSample {
                    params: sample.parameters().clone(),
                    value: self.measure.measure(&sample),
                    sample,
                })),
                Ok(false) => None,
                Err(err) => Some(Err(err)),
            }
        })
    }

    /// Like [`samples`](Self::samples), additionally requiring each parameter
    /// named in `fixed` to equal its default and every other optimized
    /// parameter to lie within its bounds.
    pub fn samples_filtered<'a>(
        &'a self,
        fixed: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = Result<DomainSample<S>>> + 'a {
        self.samples().filter(move |item| match item {
            Ok(domain) => self.matches_filter(&domain.params, fixed),
            Err(_) => true,
        })
    }

    /// Domain samples as optimizer observations, normalized when
    /// normalization is on.
    pub fn observations(&self, only_nonzero: bool) -> Result<Vec<Observation>> {
        let mut observations = Vec::new();
        for item in self.samples() {
            let domain = item?;
            if only_nonzero && domain.value == 0.0 {
                continue;
            }
            let mut point = OptimizerPoint::new();
            for (name, spec) in &self.schema {
                if let Some(x) = domain.params.get(name).and_then(|v| spec.coordinate(v)) {
                    point.insert(name.clone(), x);
                }
            }
            if point.len() != self.schema.len() {
                // A stored value that has no optimizer coordinate (e.g. a retired choice).
                continue;
            }
            if self.normalization {
                point = self.normalize(&point)?;
            }
            observations.push(Observation {
                point,
                value: domain.value,
                hash: domain.hash(),
            });
        }
        Ok(observations)
    }

    /// The domain sample with the highest measure value.
    pub fn best(&self) -> Result<Option<DomainSample<S>>> {
        let mut best: Option<DomainSample<S>> = None;
        for item in self.samples() {
            let domain = item?;
            if best.as_ref().is_none_or(|b| domain.value > b.value) {
                best = Some(domain);
            }
        }
        Ok(best)
    }

    /// The stored sample for the unmodified defaults, if it was evaluated.
    pub fn baseline(&self) -> Result<Option<S>> {
        self.source.lookup(&self.defaults)
    }

    fn in_domain(&self, params: &ParamSet) -> Result<bool> {
        let fixed_keys = self
            .defaults
            .keys()
            .chain(params.keys())
            .filter(|k| !self.schema.contains_key(*k));
        for key in fixed_keys {
            if params.get(key) != self.defaults.get(key) {
                return Ok(false);
            }
        }

        let missing: Vec<&str> = self
            .schema
            .keys()
            .filter(|k| !params.contains_key(*k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ObjectiveError::DomainInconsistency {
                sample: display_params(params),
                missing: missing.join(", "),
            }
            .into());
        }
        Ok(true)
    }

    fn matches_filter(&self, params: &ParamSet, fixed: &BTreeSet<String>) -> bool {
        for (name, spec) in &self.schema {
            let Some(value) = params.get(name) else {
                return false;
            };
            if fixed.contains(name) {
                if self.defaults.get(name) != Some(value) {
                    return false;
                }
                continue;
            }
            let (min, max) = spec.bounds();
            match spec.coordinate(value) {
                Some(x) if x >= min && x <= max => {}
                _ => return false,
            }
        }
        true
    }
}

fn check_bounds(name: &str, spec: &ParamSpec, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(ObjectiveError::NonFiniteValue {
            param: name.to_string(),
            value,
        }
        .into());
    }
    let (min, max) = spec.bounds();
    if value < min {
        return Err(ObjectiveError::BoundsViolation {
            param: name.to_string(),
            value,
            bound: min,
            side: BoundSide::Min,
        }
        .into());
    }
    if value > max {
        return Err(ObjectiveError::BoundsViolation {
            param: name.to_string(),
            value,
            bound: max,
            side: BoundSide::Max,
        }
        .into());
    }
    Ok(())
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places.min(15) as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::MatchCount;
    use crate::param_set;
    use crate::sample::{MapMatcherSample, SampleOrigin};

    /// In-memory source that fabricates samples with `nr_matches = round(10 * a)`.
    #[derive(Default)]
    struct MemorySource {
        stored: Vec<MapMatcherSample>,
    }

    impl SampleSource<MapMatcherSample> for MemorySource {
        fn fetch(&mut self, params: &ParamSet) -> Result<MapMatcherSample> {
            if let Some(found) = self.stored.iter().find(|s| &s.parameters == params) {
                return Ok(found.clone());
            }
            let mut sample = MapMatcherSample::new(params.clone(), SampleOrigin::Synthetic);
            let a = params.get("a").and_then(ParamValue::as_f64).unwrap_or(0.0);
            sample.nr_matches = (a * 10.0).round() as u64;
            self.stored.push(sample.clone());
            Ok(sample)
        }

        fn lookup(&self, params: &ParamSet) -> Result<Option<MapMatcherSample>> {
            Ok(self.stored.iter().find(|s| &s.parameters == params).cloned())
        }

        fn stored(&self) -> Box<dyn Iterator<Item = Result<MapMatcherSample>> + '_> {
            Box::new(self.stored.iter().cloned().map(Ok))
        }
    }

    type Objective = ObjectiveFunction<MapMatcherSample, MemorySource, MatchCount>;

    fn objective() -> Objective {
        let schema = BTreeMap::from([("a".to_string(), ParamSpec::float(0.0, 5.0))]);
        ObjectiveFunction::new(
            MemorySource::default(),
            param_set! { "a" => 1.0, "b" => 2_i64 },
            schema,
            MatchCount { expected_matches: 50 },
        )
        .unwrap()
    }

    fn point(pairs: &[(&str, f64)]) -> OptimizerPoint {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn evaluate_merges_defaults() {
        let mut f = objective();
        let eval = f.evaluate_point(&point(&[("a", 2.5)])).unwrap();
        assert_eq!(eval.params, param_set! { "a" => 2.5, "b" => 2_i64 });
        assert!((eval.value - 0.5).abs() < 1e-12);
        assert_eq!(eval.hash, canonical_hash(&eval.params));
    }

    #[test]
    fn out_of_scope_is_checked_before_missing() {
        let f = objective();
        let err = f.full_params(&point(&[("c", 9.0)])).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Objective(ObjectiveError::OutOfScopeParameter { ref param }) if param == "c"
        ));
        let err = f.full_params(&OptimizerPoint::new()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Objective(ObjectiveError::MissingParameter { ref param }) if param == "a"
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let f = objective();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = f.full_params(&point(&[("a", bad)])).unwrap_err();
            assert!(matches!(
                err,
                crate::Error::Objective(ObjectiveError::NonFiniteValue { .. })
            ));
        }
    }

    #[test]
    fn rounding_uses_parameter_then_global_precision() {
        let schema = BTreeMap::from([
            ("a".to_string(), ParamSpec::float(0.0, 5.0).with_rounding(1)),
            ("c".to_string(), ParamSpec::float(0.0, 5.0)),
        ]);
        let f = ObjectiveFunction::new(
            MemorySource::default(),
            param_set! { "a" => 1.0, "c" => 1.0 },
            schema,
            MatchCount { expected_matches: 1 },
        )
        .unwrap()
        .with_rounding(3);
        let params = f.full_params(&point(&[("a", 1.26), ("c", 1.23456)])).unwrap();
        assert_eq!(params["a"], ParamValue::Float(1.3));
        assert_eq!(params["c"], ParamValue::Float(1.235));
    }

    #[test]
    fn zero_parameter_rounding_disables_rounding() {
        let schema = BTreeMap::from([("a".to_string(), ParamSpec::float(0.0, 5.0).with_rounding(0))]);
        let f = ObjectiveFunction::new(
            MemorySource::default(),
            param_set! { "a" => 1.0 },
            schema,
            MatchCount { expected_matches: 1 },
        )
        .unwrap()
        .with_rounding(2);
        let params = f.full_params(&point(&[("a", 2.345)])).unwrap();
        assert_eq!(params["a"], ParamValue::Float(2.345));
    }

    #[test]
    fn rounded_values_stay_within_bounds() {
        let schema = BTreeMap::from([(
            "a".to_string(),
            ParamSpec::float(0.000_4, 1.234_56).with_rounding(3),
        )]);
        let f = ObjectiveFunction::new(
            MemorySource::default(),
            param_set! { "a" => 1.0 },
            schema,
            MatchCount { expected_matches: 1 },
        )
        .unwrap();
        let high = f.full_params(&point(&[("a", 1.234_56)])).unwrap();
        assert_eq!(high["a"], ParamValue::Float(1.234_56));
        let low = f.full_params(&point(&[("a", 0.000_4)])).unwrap();
        assert_eq!(low["a"], ParamValue::Float(0.000_4));
        let inner = f.full_params(&point(&[("a", 0.123_4)])).unwrap();
        assert_eq!(inner["a"], ParamValue::Float(0.123));
    }

    #[test]
    fn int_and_enum_parameters_are_cast() {
        let schema = BTreeMap::from([
            ("n".to_string(), ParamSpec::int(1, 10)),
            (
                "mode".to_string(),
                ParamSpec::choice(vec!["fast".into(), "exact".into(), "hybrid".into()]),
            ),
        ]);
        let f = ObjectiveFunction::new(
            MemorySource::default(),
            param_set! { "n" => 3_i64, "mode" => "fast" },
            schema,
            MatchCount { expected_matches: 1 },
        )
        .unwrap();
        let params = f.full_params(&point(&[("n", 4.6), ("mode", 1.4)])).unwrap();
        assert!(matches!(params["n"], ParamValue::Int(5)));
        assert_eq!(params["mode"], ParamValue::from("exact"));
        assert_eq!(f.schema()["mode"].bounds(), (0.0, 2.0));
        assert!(f.full_params(&point(&[("n", 4.0), ("mode", 2.5)])).is_err());
    }

    #[test]
    fn schema_is_validated_against_defaults() {
        let cases = [
            (ParamSpec::float(5.0, 0.0), param_set! { "a" => 1.0 }),
            (ParamSpec::float(0.0, 5.0), param_set! { "b" => 1.0 }),
            (ParamSpec::float(0.0, 5.0), param_set! { "a" => "text" }),
            (ParamSpec::choice(vec![]), param_set! { "a" => "x" }),
            (ParamSpec::choice(vec!["y".into()]), param_set! { "a" => "x" }),
            (
                ParamSpec {
                    kind: ParamKind::Float,
                    min: Some(0.0),
                    ..ParamSpec::default()
                },
                param_set! { "a" => 1.0 },
            ),
        ];
        for (spec, defaults) in cases {
            let schema = BTreeMap::from([("a".to_string(), spec.clone())]);
            let result = ObjectiveFunction::new(
                MemorySource::default(),
                defaults,
                schema,
                MatchCount { expected_matches: 1 },
            );
            assert!(
                matches!(
                    result,
                    Err(crate::Error::Objective(ObjectiveError::InvalidSchema { .. }))
                ),
                "accepted {spec:?}"
            );
        }
    }

    #[test]
    fn normalization_maps_bounds_exactly() {
        let f = objective().with_normalization(true);
        let low = f.denormalize(&point(&[("a", 0.0)])).unwrap();
        let high = f.denormalize(&point(&[("a", 1.0)])).unwrap();
        assert_eq!(low["a"], 0.0);
        assert_eq!(high["a"], 5.0);
        let n = f.normalize(&point(&[("a", 2.5)])).unwrap();
        assert!((n["a"] - 0.5).abs() < 1e-12);
        assert!(matches!(
            f.normalize(&OptimizerPoint::new()),
            Err(crate::Error::Objective(ObjectiveError::MissingParameter { .. }))
        ));
    }

    #[test]
    fn normalized_evaluate_denormalizes_first() {
        let mut f = objective().with_normalization(true);
        let eval = f.evaluate_point(&point(&[("a", 1.0)])).unwrap();
        assert_eq!(eval.params["a"], ParamValue::Float(5.0));
        let err = f.evaluate(&point(&[("a", 1.5)])).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Objective(ObjectiveError::BoundsViolation {
                side: BoundSide::Max,
                ..
            })
        ));
    }

    #[test]
    fn samples_follow_the_defaults() {
        let mut f = objective();
        f.evaluate(&point(&[("a", 2.0)])).unwrap();
        f.source_mut()
            .fetch(&param_set! { "a" => 3.0, "b" => 7_i64 })
            .unwrap();
        f.source_mut()
            .fetch(&param_set! { "a" => 3.0, "b" => 2_i64, "extra" => true })
            .unwrap();

        let samples: Vec<_> = f.samples().collect::<Result<_>>().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].params["a"], ParamValue::Float(2.0));
    }

    #[test]
    fn sample_missing_optimized_parameter_is_inconsistent() {
        let mut f = objective();
        f.source_mut().fetch(&param_set! { "b" => 2_i64 }).unwrap();
        let first = f.samples().next().unwrap();
        assert!(matches!(
            first,
            Err(crate::Error::Objective(ObjectiveError::DomainInconsistency { .. }))
        ));
    }

    #[test]
    fn filtered_samples_respect_fixed_and_bounds() {
        let schema = BTreeMap::from([
            ("a".to_string(), ParamSpec::float(0.0, 5.0)),
            ("c".to_string(), ParamSpec::float(0.0, 1.0)),
        ]);
        let mut f = ObjectiveFunction::new(
            MemorySource::default(),
            param_set! { "a" => 1.0, "c" => 0.5 },
            schema,
            MatchCount { expected_matches: 10 },
        )
        .unwrap();
        for (a, c) in [(2.0, 0.5), (3.0, 0.7), (4.0, 0.5)] {
            f.evaluate(&point(&[("a", a), ("c", c)])).unwrap();
        }
        // Stored before the bounds on c were narrowed.
        f.source_mut()
            .fetch(&param_set! { "a" => 4.5, "c" => 0.5 })
            .unwrap();

        let fixed = BTreeSet::from(["c".to_string()]);
        let kept: Vec<f64> = f
            .samples_filtered(&fixed)
            .map(|d| d.unwrap().params["a"].as_f64().unwrap())
            .collect();
        assert_eq!(kept, vec![2.0, 4.0, 4.5]);

        f.schema.get_mut("a").unwrap().max = Some(4.0);
        let kept: Vec<f64> = f
            .samples_filtered(&fixed)
            .map(|d| d.unwrap().params["a"].as_f64().unwrap())
            .collect();
        assert_eq!(kept, vec![2.0, 4.0]);
    }

    #[test]
    fn observations_best_and_baseline() {
        let mut f = objective().with_normalization(true);
        assert!(f.baseline().unwrap().is_none());
        assert!(f.best().unwrap().is_none());
        for a in [0.0, 0.2, 0.8] {
            f.evaluate(&point(&[("a", a)])).unwrap();
        }

        let all = f.observations(false).unwrap();
        assert_eq!(all.len(), 3);
        let nonzero = f.observations(true).unwrap();
        assert_eq!(nonzero.len(), 2);
        assert!(nonzero.iter().all(|o| o.value > 0.0));
        assert!(all.iter().any(|o| (o.point["a"] - 0.8).abs() < 1e-9));

        let best = f.best().unwrap().unwrap();
        assert_eq!(best.params["a"], ParamValue::Float(4.0));

        // a = 1.0 is the default; 0.2 normalized over [0, 5].
        let baseline = f.baseline().unwrap().unwrap();
        assert_eq!(baseline.parameters["a"], ParamValue::Float(1.0));
    }
}
