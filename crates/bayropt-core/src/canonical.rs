//! Canonical hashing of parameter sets.
//!
//! The cache key of a sample is the SHA-256 of a seed-free byte layout of its
//! parameter set, so keys are stable across processes, machines and releases.
//!
//! # Layout
//!
//! ```text
//! set    := u64 entry_count, entry*            (entries in key order)
//! entry  := u64 key_len, key_utf8, value
//! value  := 'B' u8                              bool
//!         | 'I' i64                             int, or integral float in i64 range
//!         | 'F' u64                             other float, IEEE-754 bits
//!         | 'S' u64 len, utf8                   text
//!         | 'L' u64 len, value*                 list
//! ```
//!
//! All integers are little-endian. Integral floats share the `'I'` tag with
//! ints so that `Int(3)` and `Float(3.0)`, which compare equal, also hash equal.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::params::{ParamSet, ParamValue, int_of};

/// Hex-encoded SHA-256 digest identifying an equivalence class of parameter sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamHash(String);

impl ParamHash {
    /// Wrap an existing hex digest (e.g. one typed on the command line).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display. Keys that are not plain hex
    /// (hand-edited indexes) are shown whole.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ParamHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the canonical hash of a parameter set.
#[must_use]
pub fn canonical_hash(params: &ParamSet) -> ParamHash {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(params));
    ParamHash(hex::encode(hasher.finalize()))
}

/// The canonical byte layout hashed by [`canonical_hash`].
#[must_use]
pub fn canonical_bytes(params: &ParamSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + params.len() * 24);
    put_len(&mut out, params.len());
    for (key, value) in params {
        put_len(&mut out, key.len());
        out.extend_from_slice(key.as_bytes());
        encode_value(&mut out, value);
    }
    out
}

fn put_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

fn encode_value(out: &mut Vec<u8>, value: &ParamValue) {
    match value {
        ParamValue::Bool(b) => {
            out.push(b'B');
            out.push(u8::from(*b));
        }
        ParamValue::Int(i) => encode_int(out, *i),
        ParamValue::Float(f) => match int_of(*f) {
            Some(i) => encode_int(out, i),
            None => {
                out.push(b'F');
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
        },
        ParamValue::Text(s) => {
            out.push(b'S');
            put_len(out, s.len());
            out.extend_from_slice(s.as_bytes());
        }
        ParamValue::List(items) => {
            out.push(b'L');
            put_len(out, items.len());
            for item in items {
                encode_value(out, item);
            }
        }
    }
}

fn encode_int(out: &mut Vec<u8>, i: i64) {
    out.push(b'I');
    out.extend_from_slice(&i.to_le_bytes());
}
