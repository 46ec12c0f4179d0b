//! Property-based tests for canonical parameter hashing.
//!
//! Validates:
//! 1. canonical_hash: deterministic (same set → same hash)
//! 2. canonical_hash: 64 lowercase hex chars
//! 3. canonical_hash: independent of insertion order
//! 4. canonical_hash: Int(n) and Float(n) hash the same
//! 5. canonical_hash: adding a parameter changes the hash
//! 6. canonical_hash: changing a value changes the hash
//! 7. canonical_hash: survives a JSON round trip of the set
//! 8. ParamSet equality agrees with hash equality

use proptest::prelude::*;

use bayropt_core::canonical::canonical_hash;
use bayropt_core::params::{ParamSet, ParamValue};

// =============================================================================
// Strategies
// =============================================================================

/// Floats that survive a decimal round trip exactly.
fn arb_float() -> impl Strategy<Value = f64> {
    (-8000_i32..8000).prop_map(|n| f64::from(n) / 8.0)
}

fn arb_scalar() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        any::<bool>().prop_map(ParamValue::Bool),
        (-10_000_i64..10_000).prop_map(ParamValue::Int),
        arb_float().prop_map(ParamValue::Float),
        "[a-z_]{0,8}".prop_map(ParamValue::Text),
    ]
}

fn arb_value() -> impl Strategy<Value = ParamValue> {
    prop_oneof![
        4 => arb_scalar(),
        1 => proptest::collection::vec(arb_scalar(), 0..4).prop_map(ParamValue::List),
    ]
}

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

fn arb_param_set() -> impl Strategy<Value = ParamSet> {
    proptest::collection::btree_map(arb_name(), arb_value(), 0..8)
}

// =============================================================================
// Property 1: deterministic
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn hash_deterministic(set in arb_param_set()) {
        prop_assert_eq!(canonical_hash(&set), canonical_hash(&set.clone()));
    }
}

// =============================================================================
// Property 2: fixed-width lowercase hex
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn hash_is_64_lowercase_hex(set in arb_param_set()) {
        let hash = canonical_hash(&set);
        prop_assert_eq!(hash.as_str().len(), 64);
        prop_assert!(
            hash.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)),
            "unexpected characters in {}", hash
        );
    }
}

// =============================================================================
// Property 3: insertion order does not matter
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn hash_ignores_insertion_order(set in arb_param_set()) {
        let mut reversed = ParamSet::new();
        for (k, v) in set.iter().rev() {
            reversed.insert(k.clone(), v.clone());
        }
        prop_assert_eq!(canonical_hash(&set), canonical_hash(&reversed));
    }
}

// =============================================================================
// Property 4: numeric representation does not matter
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn int_and_integral_float_hash_alike(
        set in arb_param_set(),
        name in arb_name(),
        n in -(1_i64 << 52)..(1_i64 << 52),
    ) {
        let mut as_int = set.clone();
        as_int.insert(name.clone(), ParamValue::Int(n));
        let mut as_float = set;
        as_float.insert(name, ParamValue::Float(n as f64));
        prop_assert_eq!(&as_int, &as_float);
        prop_assert_eq!(canonical_hash(&as_int), canonical_hash(&as_float));
    }
}

// =============================================================================
// Property 5: an extra parameter changes the hash
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn extra_parameter_changes_hash(
        set in arb_param_set(),
        name in arb_name(),
        value in arb_value(),
    ) {
        prop_assume!(!set.contains_key(&name));
        let mut extended = set.clone();
        extended.insert(name, value);
        prop_assert_ne!(canonical_hash(&set), canonical_hash(&extended));
    }
}

// =============================================================================
// Property 6: a changed value changes the hash
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn changed_value_changes_hash(
        set in arb_param_set(),
        name in arb_name(),
        a in arb_value(),
        b in arb_value(),
    ) {
        prop_assume!(a != b);
        let mut left = set.clone();
        left.insert(name.clone(), a);
        let mut right = set;
        right.insert(name, b);
        prop_assert_ne!(canonical_hash(&left), canonical_hash(&right));
    }
}

// =============================================================================
// Property 7: JSON round trip keeps the hash
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn json_round_trip_keeps_hash(set in arb_param_set()) {
        let json = serde_json::to_string(&set).unwrap();
        let back: ParamSet = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(&back, &set);
        prop_assert_eq!(canonical_hash(&back), canonical_hash(&set));
    }
}

// =============================================================================
// Property 8: equality agrees with hashing
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn equal_sets_iff_equal_hashes(a in arb_param_set(), b in arb_param_set()) {
        prop_assert_eq!(a == b, canonical_hash(&a) == canonical_hash(&b));
    }
}
