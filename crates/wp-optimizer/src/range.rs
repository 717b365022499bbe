//! Classification of declared parameter ranges.

use serde::{Deserialize, Serialize};

/// Shape of a declared parameter range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeType {
    /// Exactly one element.
    Constant,
    /// Constant non-zero step between adjacent elements (either direction).
    Linear,
    /// Constant non-zero step between adjacent logarithms.
    Logarithmic,
    /// Anything else, including several identical elements.
    Arbitrary,
}

const REL_TOL: f64 = 1e-5;
const ABS_TOL: f64 = 1e-8;

/// Tolerant float comparison: `|a - b| <= abs_tol + rel_tol * |b|`.
pub fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ABS_TOL + REL_TOL * b.abs()
}

fn uniform_steps(values: &[f64]) -> bool {
    let first = values[1] - values[0];
    values.windows(2).all(|w| is_close(first, w[1] - w[0]))
}

/// Classify a numeric range. The range must be sorted (ascending or
/// descending) to be detected as linear or logarithmic.
pub fn range_type(values: &[f64]) -> RangeType {
    match values.len() {
        1 => return RangeType::Constant,
        0 => return RangeType::Arbitrary,
        _ => {}
    }
    if values.iter().any(|v| !v.is_finite()) {
        return RangeType::Arbitrary;
    }
    if values.iter().all(|&v| is_close(values[0], v)) {
        return RangeType::Arbitrary;
    }
    if uniform_steps(values) {
        return RangeType::Linear;
    }
    if values.iter().any(|&v| v <= 0.0) {
        return RangeType::Arbitrary;
    }
    let logs: Vec<f64> = values.iter().map(|v| v.ln()).collect();
    if uniform_steps(&logs) {
        RangeType::Logarithmic
    } else {
        RangeType::Arbitrary
    }
}

/// Classify a range of arbitrary values. Any non-numeric element makes a
/// multi-element range arbitrary.
pub fn range_type_of_values(values: &[serde_json::Value]) -> RangeType {
    if values.len() == 1 {
        return RangeType::Constant;
    }
    let numeric: Option<Vec<f64>> = values.iter().map(|v| v.as_f64()).collect();
    match numeric {
        Some(numbers) => range_type(&numbers),
        None => RangeType::Arbitrary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_element_is_constant() {
        assert_eq!(range_type(&[5.0]), RangeType::Constant);
        assert_eq!(range_type_of_values(&[json!("adam")]), RangeType::Constant);
    }

    #[test]
    fn uniform_steps_are_linear() {
        assert_eq!(range_type(&[1.0, 2.0, 3.0, 4.0]), RangeType::Linear);
        assert_eq!(range_type(&[4.0, 3.0, 2.0, 1.0]), RangeType::Linear);
        assert_eq!(range_type(&[0.1, 0.2, 0.3]), RangeType::Linear);
        assert_eq!(range_type(&[-3.0, 0.0]), RangeType::Linear);
    }

    #[test]
    fn uniform_ratios_are_logarithmic() {
        assert_eq!(range_type(&[1.0, 10.0, 100.0, 1000.0]), RangeType::Logarithmic);
        assert_eq!(range_type(&[1.0, 2.0, 4.0, 8.0]), RangeType::Logarithmic);
        assert_eq!(range_type(&[1e-1, 1e-2, 1e-3]), RangeType::Logarithmic);
    }

    #[test]
    fn identical_elements_are_arbitrary() {
        assert_eq!(range_type(&[3.0, 3.0, 3.0]), RangeType::Arbitrary);
    }

    #[test]
    fn irregular_or_degenerate_ranges_are_arbitrary() {
        assert_eq!(range_type(&[]), RangeType::Arbitrary);
        assert_eq!(range_type(&[1.0, 2.0, 5.0]), RangeType::Arbitrary);
        assert_eq!(range_type(&[1.0, 2.0, 1.0]), RangeType::Arbitrary);
        assert_eq!(range_type(&[-1.0, -2.0, -4.0]), RangeType::Arbitrary);
        assert_eq!(range_type(&[1.0, f64::NAN]), RangeType::Arbitrary);
    }

    #[test]
    fn non_numeric_values_are_arbitrary() {
        let values = [json!("sgd"), json!("adam")];
        assert_eq!(range_type_of_values(&values), RangeType::Arbitrary);
        let mixed = [json!(1), json!(true)];
        assert_eq!(range_type_of_values(&mixed), RangeType::Arbitrary);
        let numbers = [json!(2), json!(4), json!(6)];
        assert_eq!(range_type_of_values(&numbers), RangeType::Linear);
    }

    #[test]
    fn tolerance_absorbs_rounding() {
        let values: Vec<f64> = (0..10).map(|i| 0.1 * i as f64).collect();
        assert_eq!(range_type(&values), RangeType::Linear);
        assert!(is_close(1.0, 1.0 + 1e-9));
        assert!(!is_close(1.0, 1.001));
    }
}
