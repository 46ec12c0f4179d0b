//! Parameter sets: the full configuration of one evaluation run.
//!
//! A [`ParamSet`] maps parameter names to [`ParamValue`]s. It is a `BTreeMap`
//! so that iteration order, and with it the canonical encoding, never depends
//! on insertion order.
//!
//! Equality is insensitive to the numeric representation: `Int(3)` equals
//! `Float(3.0)`. The canonical hash (see [`crate::canonical`]) follows the same
//! rule, so equal sets always share one cache key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single parameter value.
///
/// Serialized untagged so that experiment files and stored parameter sets read
/// naturally (`a: 1.5`, `b: 2`, `mode: fast`, `window: [3, 4]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

/// Full parameter set for one evaluation run.
pub type ParamSet = BTreeMap<String, ParamValue>;

impl ParamValue {
    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Short lowercase name of the variant, used in messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }

    /// Cast `self` to the numeric kind of `template`.
    ///
    /// Floats cast to int round to the nearest integer. Non-numeric values and
    /// non-numeric templates are returned unchanged.
    #[must_use]
    pub fn cast_like(&self, template: &ParamValue) -> ParamValue {
        match (template, self.as_f64()) {
            (Self::Int(_), Some(v)) => Self::Int(v.round() as i64),
            (Self::Float(_), Some(v)) => Self::Float(v),
            _ => self.clone(),
        }
    }

    /// Parse a command-line style value: bool, int, float, `[a, b]` list, or text.
    #[must_use]
    pub fn parse_loose(raw: &str) -> ParamValue {
        let raw = raw.trim();
        if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            if inner.trim().is_empty() {
                return Self::List(Vec::new());
            }
            return Self::List(inner.split(',').map(Self::parse_loose).collect());
        }
        match raw {
            "true" | "True" => return Self::Bool(true),
            "false" | "False" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Self::Float(v);
        }
        Self::Text(raw.to_string())
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(i), Self::Float(f)) | (Self::Float(f), Self::Int(i)) => {
                int_of(*f) == Some(*i)
            }
            _ => false,
        }
    }
}

/// The `i64` an integral float represents exactly, if any.
pub(crate) fn int_of(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f >= -LIMIT && f < LIMIT {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// Render a parameter set as `{a: 1.0, b: 2}` for logs and error messages.
#[must_use]
pub fn display_params(params: &ParamSet) -> String {
    let body = params
        .iter()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{body}}}")
}

/// Build a [`ParamSet`] from `name => value` pairs.
///
/// ```
/// use bayropt_core::param_set;
/// let p = param_set! { "a" => 1.0, "b" => 2_i64 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! param_set {
    () => { $crate::params::ParamSet::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut set = $crate::params::ParamSet::new();
        $( set.insert(($key).to_string(), $crate::params::ParamValue::from($value)); )+
        set
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_integral_float_compare_equal() {
        assert_eq!(ParamValue::Int(3), ParamValue::Float(3.0));
        assert_eq!(ParamValue::Float(3.0), ParamValue::Int(3));
        assert_ne!(ParamValue::Int(3), ParamValue::Float(3.5));
        assert_ne!(ParamValue::Int(3), ParamValue::Text("3".to_string()));
    }

    #[test]
    fn nan_never_equals_anything() {
        assert_ne!(ParamValue::Float(f64::NAN), ParamValue::Float(f64::NAN));
        assert_ne!(ParamValue::Float(f64::NAN), ParamValue::Int(0));
    }

    #[test]
    fn lists_compare_elementwise_in_order() {
        let a = ParamValue::from(vec![1_i64, 2]);
        let b = ParamValue::List(vec![ParamValue::Float(1.0), ParamValue::Int(2)]);
        let c = ParamValue::from(vec![2_i64, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cast_like_follows_template_kind() {
        let v = ParamValue::Float(2.6);
        assert!(matches!(v.cast_like(&ParamValue::Int(0)), ParamValue::Int(3)));
        assert!(matches!(
            ParamValue::Int(2).cast_like(&ParamValue::Float(0.0)),
            ParamValue::Float(f) if f == 2.0
        ));
        assert!(matches!(
            ParamValue::Text("x".into()).cast_like(&ParamValue::Int(0)),
            ParamValue::Text(_)
        ));
    }

    #[test]
    fn parse_loose_recognizes_kinds() {
        assert!(matches!(ParamValue::parse_loose("3"), ParamValue::Int(3)));
        assert!(matches!(ParamValue::parse_loose("3.5"), ParamValue::Float(f) if f == 3.5));
        assert!(matches!(ParamValue::parse_loose("true"), ParamValue::Bool(true)));
        assert!(matches!(ParamValue::parse_loose("fast"), ParamValue::Text(_)));
        match ParamValue::parse_loose("[1, 2.5]") {
            ParamValue::List(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[1], ParamValue::Float(2.5));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn untagged_serde_keeps_int_and_float_apart() {
        let set = param_set! { "a" => 1.0, "b" => 2_i64 };
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"a":1.0,"b":2}"#);
        let back: ParamSet = serde_json::from_str(&json).unwrap();
        assert!(matches!(back["a"], ParamValue::Float(_)));
        assert!(matches!(back["b"], ParamValue::Int(2)));
    }

    #[test]
    fn display_params_is_ordered() {
        let set = param_set! { "b" => 2_i64, "a" => 1.0 };
        assert_eq!(display_params(&set), "{a: 1.0, b: 2}");
    }
}
