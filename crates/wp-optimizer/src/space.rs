//! Parameter declarations and the latent space the surrogate operates in.
//!
//! Every parameter occupies one latent coordinate of unit width (constants
//! occupy a degenerate `[0, 0]` coordinate). Floats are divided by their span
//! so zero stays at zero and small values keep their relative precision;
//! the other kinds are normalised to `[0, 1]`, log-scaled ones in log-space.
//! Integers and categorical choices round to the nearest representable value
//! when mapped back.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wp_types::SpaceError;

use crate::range::{range_type, range_type_of_values, RangeType};

/// A single parameter dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    pub kind: ParameterKind,
}

/// Describes the declared range of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    Float { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Int { low: i64, high: i64 },
    /// Log-uniform range (uniform in log-space).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
    /// A single fixed value.
    Constant { value: serde_json::Value },
}

/// A concrete parameter value in the user-facing space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Self::Json(v) => v
                .as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Float(v) => serde_json::json!(v),
            Self::Int(v) => serde_json::json!(v),
            Self::Json(v) => v.clone(),
        }
    }

    /// Equality that treats `1`, `1.0` and `Json(1)` as the same value.
    fn matches(&self, other: &serde_json::Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self.to_json() == *other,
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One point in the user-facing parameter space.
pub type ParamConfig = HashMap<String, ParameterValue>;

/// Ordered list of parameter declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::Float { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParameterKind::Int { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.push(name, ParameterKind::Choice { values })
    }

    pub fn add_constant(self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.push(name, ParameterKind::Constant { value })
    }

    /// Declare a parameter by an explicit range of values. The range is
    /// classified and mapped to the matching parameter kind: linear ranges
    /// become uniform (integer when every value is integral), logarithmic
    /// ranges become log-uniform, and arbitrary ranges become categorical.
    pub fn add_range(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        let kind = match range_type_of_values(&values) {
            RangeType::Constant => ParameterKind::Constant {
                value: values[0].clone(),
            },
            RangeType::Linear => {
                let (low, high) = numeric_extent(&values);
                let integral: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
                match integral {
                    Some(ints) => ParameterKind::Int {
                        low: ints.iter().copied().min().unwrap_or(0),
                        high: ints.iter().copied().max().unwrap_or(0),
                    },
                    None => ParameterKind::Float { low, high },
                }
            }
            RangeType::Logarithmic => {
                let (low, high) = numeric_extent(&values);
                ParameterKind::LogUniform { low, high }
            }
            RangeType::Arbitrary => ParameterKind::Choice { values },
        };
        self.push(name, kind)
    }
}

fn numeric_extent(values: &[serde_json::Value]) -> (f64, f64) {
    values
        .iter()
        .filter_map(|v| v.as_f64())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
}

/// Whether the point `x` lies within `tol` (squared Euclidean distance) of
/// any of `points`.
pub fn close_to_any<'a>(x: &[f64], points: impl IntoIterator<Item = &'a [f64]>, tol: f64) -> bool {
    points.into_iter().any(|p| {
        p.len() == x.len() && p.iter().zip(x).map(|(a, b)| (a - b).powi(2)).sum::<f64>() <= tol
    })
}

fn linspace(low: f64, high: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![low],
        _ => (0..n)
            .map(|i| {
                if i == n - 1 {
                    high
                } else {
                    low + (high - low) * i as f64 / (n - 1) as f64
                }
            })
            .collect(),
    }
}

/// Bidirectional mapping between named parameters and flat latent vectors.
/// Read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentSpace {
    parameters: Vec<ParameterDef>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl LatentSpace {
    pub fn new(space: SearchSpace) -> Result<Self, SpaceError> {
        if space.parameters.is_empty() {
            return Err(SpaceError::EmptySpace);
        }
        let mut index = HashMap::with_capacity(space.parameters.len());
        for (i, param) in space.parameters.iter().enumerate() {
            Self::validate(param)?;
            if index.insert(param.name.clone(), i).is_some() {
                return Err(SpaceError::DuplicateParameter {
                    name: param.name.clone(),
                });
            }
        }
        Ok(Self {
            parameters: space.parameters,
            index,
        })
    }

    fn validate(param: &ParameterDef) -> Result<(), SpaceError> {
        let name = || param.name.clone();
        match &param.kind {
            ParameterKind::Float { low, high } | ParameterKind::LogUniform { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(SpaceError::NonFiniteBound { name: name() });
                }
                if low > high {
                    return Err(SpaceError::InvalidBounds {
                        name: name(),
                        low: *low,
                        high: *high,
                    });
                }
                if !(high - low).is_finite() {
                    return Err(SpaceError::NonFiniteBound { name: name() });
                }
                if matches!(param.kind, ParameterKind::LogUniform { .. }) && *low <= 0.0 {
                    return Err(SpaceError::NonPositiveLogRange {
                        name: name(),
                        low: *low,
                    });
                }
            }
            ParameterKind::Int { low, high } => {
                if low > high {
                    return Err(SpaceError::InvalidBounds {
                        name: name(),
                        low: *low as f64,
                        high: *high as f64,
                    });
                }
            }
            ParameterKind::Choice { values } => {
                if values.is_empty() {
                    return Err(SpaceError::EmptyRange { name: name() });
                }
            }
            ParameterKind::Constant { .. } => {}
        }
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameters(&self) -> &[ParameterDef] {
        &self.parameters
    }

    /// The declarations this space was built from.
    pub fn search_space(&self) -> SearchSpace {
        SearchSpace {
            parameters: self.parameters.clone(),
        }
    }

    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn param_index(&self, name: &str) -> Result<usize, SpaceError> {
        // The index is skipped by serde; fall back to a scan after deserialising.
        self.index
            .get(name)
            .copied()
            .or_else(|| self.parameters.iter().position(|p| p.name == name))
            .ok_or_else(|| SpaceError::UnknownParameter {
                name: name.to_string(),
            })
    }

    /// Classified shape of a parameter's declared range.
    pub fn range_type(&self, name: &str) -> Result<RangeType, SpaceError> {
        let param = &self.parameters[self.param_index(name)?];
        Ok(match &param.kind {
            ParameterKind::Float { low, high } => range_type(&[*low, *high]),
            ParameterKind::Int { low, high } => range_type(&[*low as f64, *high as f64]),
            ParameterKind::LogUniform { low, high } if low == high => RangeType::Arbitrary,
            ParameterKind::LogUniform { .. } => RangeType::Logarithmic,
            ParameterKind::Choice { values } => match values.len() {
                1 => RangeType::Constant,
                _ => RangeType::Arbitrary,
            },
            ParameterKind::Constant { .. } => RangeType::Constant,
        })
    }

    fn is_degenerate(kind: &ParameterKind) -> bool {
        match kind {
            ParameterKind::Float { low, high } | ParameterKind::LogUniform { low, high } => {
                low == high
            }
            ParameterKind::Int { low, high } => low == high,
            ParameterKind::Choice { values } => values.len() == 1,
            ParameterKind::Constant { .. } => true,
        }
    }

    /// `(low, high)` of every latent coordinate.
    pub fn latent_bounds(&self) -> Vec<(f64, f64)> {
        self.parameters.iter().map(|p| Self::bounds_of(&p.kind)).collect()
    }

    fn bounds_of(kind: &ParameterKind) -> (f64, f64) {
        match kind {
            _ if Self::is_degenerate(kind) => (0.0, 0.0),
            ParameterKind::Float { low, high } => {
                let span = high - low;
                (low / span, high / span)
            }
            _ => (0.0, 1.0),
        }
    }

    /// Map a user configuration into the latent space.
    pub fn to_latent(&self, config: &ParamConfig) -> Result<Vec<f64>, SpaceError> {
        if let Some(extra) = config.keys().find(|k| self.param_index(k).is_err()) {
            return Err(SpaceError::UnknownParameter {
                name: extra.clone(),
            });
        }
        self.parameters
            .iter()
            .map(|param| {
                let value = config
                    .get(&param.name)
                    .ok_or_else(|| SpaceError::MissingValue {
                        name: param.name.clone(),
                    })?;
                Self::value_to_latent(param, value)
            })
            .collect()
    }

    fn value_to_latent(param: &ParameterDef, value: &ParameterValue) -> Result<f64, SpaceError> {
        let invalid = || SpaceError::InvalidValue {
            name: param.name.clone(),
            value: value.to_string(),
        };
        let normalise = |v: f64, low: f64, high: f64| {
            if high == low {
                0.0
            } else {
                (v - low) / (high - low)
            }
        };
        match &param.kind {
            ParameterKind::Float { low, high } => {
                let v = value.as_f64().filter(|v| *v >= *low && *v <= *high).ok_or_else(invalid)?;
                Ok(if high == low { 0.0 } else { v / (high - low) })
            }
            ParameterKind::Int { low, high } => {
                let v = value.as_i64().filter(|v| v >= low && v <= high).ok_or_else(invalid)?;
                Ok(normalise(v as f64, *low as f64, *high as f64))
            }
            ParameterKind::LogUniform { low, high } => {
                let v = value.as_f64().filter(|v| *v >= *low && *v <= *high).ok_or_else(invalid)?;
                Ok(normalise(v.ln(), low.ln(), high.ln()))
            }
            ParameterKind::Choice { values } => {
                let idx = values.iter().position(|c| value.matches(c)).ok_or_else(invalid)?;
                Ok(normalise(idx as f64, 0.0, (values.len() - 1) as f64))
            }
            ParameterKind::Constant { value: constant } => {
                if value.matches(constant) {
                    Ok(0.0)
                } else {
                    Err(invalid())
                }
            }
        }
    }

    /// Map a latent vector back into a user configuration. Coordinates are
    /// clamped into their bounds.
    pub fn from_latent(&self, x: &[f64]) -> Result<ParamConfig, SpaceError> {
        if x.len() != self.dims() {
            return Err(SpaceError::DimensionMismatch {
                expected: self.dims(),
                got: x.len(),
            });
        }
        self.parameters
            .iter()
            .zip(x)
            .map(|(param, &t)| {
                if !t.is_finite() {
                    return Err(SpaceError::InvalidValue {
                        name: param.name.clone(),
                        value: t.to_string(),
                    });
                }
                let (lo, hi) = Self::bounds_of(&param.kind);
                let t = t.clamp(lo, hi);
                let value = match &param.kind {
                    ParameterKind::Float { low, high } => {
                        ParameterValue::Float((t * (high - low)).clamp(*low, *high))
                    }
                    ParameterKind::Int { low, high } => {
                        let span = *high as f64 - *low as f64;
                        let v = (*low as f64 + t * span).round();
                        // `as` saturates at the i64 limits before the clamp
                        ParameterValue::Int((v as i64).clamp(*low, *high))
                    }
                    ParameterKind::LogUniform { low, high } => {
                        let v = (low.ln() + t * (high.ln() - low.ln())).exp();
                        ParameterValue::Float(v.clamp(*low, *high))
                    }
                    ParameterKind::Choice { values } => {
                        let idx = (t * (values.len() - 1) as f64).round() as usize;
                        ParameterValue::Json(values[idx.min(values.len() - 1)].clone())
                    }
                    ParameterKind::Constant { value } => ParameterValue::Json(value.clone()),
                };
                Ok((param.name.clone(), value))
            })
            .collect()
    }

    /// `n` user-space values spanning a parameter's bounds, spaced linearly or
    /// logarithmically according to its kind.
    pub fn evenly_spaced_range(&self, name: &str, n: usize) -> Result<Vec<f64>, SpaceError> {
        let param = &self.parameters[self.param_index(name)?];
        match &param.kind {
            ParameterKind::Float { low, high } => Ok(linspace(*low, *high, n)),
            ParameterKind::Int { low, high } => Ok(linspace(*low as f64, *high as f64, n)),
            ParameterKind::LogUniform { low, high } => Ok(linspace(low.ln(), high.ln(), n)
                .into_iter()
                .map(f64::exp)
                .collect()),
            ParameterKind::Constant { value } => value
                .as_f64()
                .map(|v| vec![v; n])
                .ok_or_else(|| SpaceError::NotNumeric {
                    name: name.to_string(),
                }),
            ParameterKind::Choice { .. } => Err(SpaceError::NotNumeric {
                name: name.to_string(),
            }),
        }
    }

    /// `n` evenly spaced latent coordinates for one parameter.
    pub fn latent_range(&self, name: &str, n: usize) -> Result<Vec<f64>, SpaceError> {
        let (low, high) = self.latent_bounds()[self.param_index(name)?];
        Ok(linspace(low, high, n))
    }

    /// A uniformly random latent point.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.latent_bounds()
            .into_iter()
            .map(|(low, high)| {
                if low == high {
                    low
                } else {
                    rng.gen_range(low..=high)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn sample_space() -> LatentSpace {
        LatentSpace::new(
            SearchSpace::new()
                .add_float("momentum", -0.5, 0.9)
                .add_int("layers", 1, 8)
                .add_log_uniform("lr", 1e-5, 1e-1)
                .add_choice("optimiser", vec![json!("sgd"), json!("adam"), json!("rmsprop")])
                .add_constant("seed", json!(42)),
        )
        .unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1e-300)
    }

    #[test]
    fn round_trip_through_latent_space() {
        let space = sample_space();
        let mut config = ParamConfig::new();
        config.insert("momentum".into(), ParameterValue::Float(0.37));
        config.insert("layers".into(), ParameterValue::Int(5));
        config.insert("lr".into(), ParameterValue::Float(3.2e-4));
        config.insert("optimiser".into(), ParameterValue::Json(json!("adam")));
        config.insert("seed".into(), ParameterValue::Json(json!(42)));

        let x = space.to_latent(&config).unwrap();
        assert_eq!(x.len(), 5);
        for (v, (lo, hi)) in x.iter().zip(space.latent_bounds()) {
            assert!(*v >= lo && *v <= hi);
        }

        let back = space.from_latent(&x).unwrap();
        for name in ["momentum", "lr"] {
            let a = config[name].as_f64().unwrap();
            let b = back[name].as_f64().unwrap();
            assert!(approx(a, b), "{name}: {a} vs {b}");
        }
        assert_eq!(back["layers"], ParameterValue::Int(5));
        assert_eq!(back["optimiser"], ParameterValue::Json(json!("adam")));
        assert_eq!(back["seed"], ParameterValue::Json(json!(42)));
    }

    #[test]
    fn round_trip_holds_across_the_bounds() {
        let space = LatentSpace::new(
            SearchSpace::new()
                .add_float("a", 2.0, 7.5)
                .add_log_uniform("b", 0.01, 1000.0),
        )
        .unwrap();
        for i in 0..=20 {
            let t = i as f64 / 20.0;
            let a = 2.0 + t * 5.5;
            let b = (0.01f64.ln() + t * (1000.0f64.ln() - 0.01f64.ln())).exp();
            let mut config = ParamConfig::new();
            config.insert("a".into(), ParameterValue::Float(a));
            config.insert("b".into(), ParameterValue::Float(b.clamp(0.01, 1000.0)));
            let back = space.from_latent(&space.to_latent(&config).unwrap()).unwrap();
            assert!(approx(back["a"].as_f64().unwrap(), config["a"].as_f64().unwrap()));
            assert!(approx(back["b"].as_f64().unwrap(), config["b"].as_f64().unwrap()));
        }
    }

    #[test]
    fn small_values_round_trip_in_a_range_spanning_zero() {
        let space = LatentSpace::new(SearchSpace::new().add_float("x", -2.0, 2.0)).unwrap();
        assert_eq!(space.latent_bounds(), vec![(-0.5, 0.5)]);
        for p in [1e-12, -3e-10, 0.0, 5e-300, -2.0, 2.0, 1.234_567_891] {
            let mut config = ParamConfig::new();
            config.insert("x".into(), ParameterValue::Float(p));
            let back = space.from_latent(&space.to_latent(&config).unwrap()).unwrap();
            let back = back["x"].as_f64().unwrap();
            if p == 0.0 {
                assert_eq!(back, 0.0);
            } else {
                assert!(approx(back, p), "{p} came back as {back}");
            }
        }
    }

    #[test]
    fn full_width_integer_range_maps_without_overflow() {
        let space =
            LatentSpace::new(SearchSpace::new().add_int("n", i64::MIN, i64::MAX)).unwrap();
        assert!(space.from_latent(&[0.5]).unwrap()["n"].as_i64().is_some());
        assert_eq!(space.from_latent(&[0.0]).unwrap()["n"], ParameterValue::Int(i64::MIN));
        assert_eq!(space.from_latent(&[1.0]).unwrap()["n"], ParameterValue::Int(i64::MAX));

        let mut config = ParamConfig::new();
        config.insert("n".into(), ParameterValue::Int(0));
        let x = space.to_latent(&config).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn float_span_must_be_finite() {
        let err = LatentSpace::new(SearchSpace::new().add_float("x", -f64::MAX, f64::MAX))
            .unwrap_err();
        assert!(matches!(err, SpaceError::NonFiniteBound { .. }));
    }

    #[test]
    fn invalid_declarations_are_rejected() {
        let err = LatentSpace::new(SearchSpace::new().add_float("x", 1.0, 0.0)).unwrap_err();
        assert!(matches!(err, SpaceError::InvalidBounds { .. }));

        let err = LatentSpace::new(SearchSpace::new().add_log_uniform("x", 0.0, 1.0)).unwrap_err();
        assert!(matches!(err, SpaceError::NonPositiveLogRange { .. }));

        let err = LatentSpace::new(SearchSpace::new().add_choice("x", vec![])).unwrap_err();
        assert!(matches!(err, SpaceError::EmptyRange { .. }));

        let err = LatentSpace::new(
            SearchSpace::new().add_float("x", 0.0, 1.0).add_int("x", 0, 3),
        )
        .unwrap_err();
        assert!(matches!(err, SpaceError::DuplicateParameter { .. }));

        assert_eq!(
            LatentSpace::new(SearchSpace::new()).unwrap_err(),
            SpaceError::EmptySpace
        );
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let space = LatentSpace::new(SearchSpace::new().add_float("x", 0.0, 1.0)).unwrap();

        let mut out_of_bounds = ParamConfig::new();
        out_of_bounds.insert("x".into(), ParameterValue::Float(2.0));
        assert!(matches!(
            space.to_latent(&out_of_bounds),
            Err(SpaceError::InvalidValue { .. })
        ));

        assert!(matches!(
            space.to_latent(&ParamConfig::new()),
            Err(SpaceError::MissingValue { .. })
        ));

        let mut unknown = ParamConfig::new();
        unknown.insert("x".into(), ParameterValue::Float(0.5));
        unknown.insert("y".into(), ParameterValue::Float(0.5));
        assert!(matches!(
            space.to_latent(&unknown),
            Err(SpaceError::UnknownParameter { .. })
        ));

        assert!(matches!(
            space.from_latent(&[0.1, 0.2]),
            Err(SpaceError::DimensionMismatch { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn add_range_classifies_declarations() {
        let space = LatentSpace::new(
            SearchSpace::new()
                .add_range("c", vec![json!(5)])
                .add_range("lin", vec![json!(0.5), json!(1.0), json!(1.5)])
                .add_range("ints", vec![json!(2), json!(4), json!(6)])
                .add_range("log", vec![json!(1), json!(10), json!(100), json!(1000)])
                .add_range("arb", vec![json!(3), json!(3), json!(3)]),
        )
        .unwrap();

        let kinds: Vec<&ParameterKind> = space.parameters().iter().map(|p| &p.kind).collect();
        assert_eq!(kinds[0], &ParameterKind::Constant { value: json!(5) });
        assert_eq!(kinds[1], &ParameterKind::Float { low: 0.5, high: 1.5 });
        assert_eq!(kinds[2], &ParameterKind::Int { low: 2, high: 6 });
        assert_eq!(kinds[3], &ParameterKind::LogUniform { low: 1.0, high: 1000.0 });
        assert!(matches!(kinds[4], ParameterKind::Choice { .. }));

        assert_eq!(space.range_type("c").unwrap(), RangeType::Constant);
        assert_eq!(space.range_type("lin").unwrap(), RangeType::Linear);
        assert_eq!(space.range_type("log").unwrap(), RangeType::Logarithmic);
        assert_eq!(space.range_type("arb").unwrap(), RangeType::Arbitrary);
    }

    #[test]
    fn evenly_spaced_ranges_follow_the_scale() {
        let space = sample_space();
        let lin = space.evenly_spaced_range("momentum", 3).unwrap();
        assert_eq!(lin.len(), 3);
        assert_eq!(lin[0], -0.5);
        assert!((lin[1] - 0.2).abs() < 1e-12);
        assert_eq!(lin[2], 0.9);

        let log = space.evenly_spaced_range("lr", 5).unwrap();
        assert_eq!(log.len(), 5);
        assert!(approx(log[0], 1e-5));
        assert!(approx(log[2], 1e-3));
        assert!(approx(log[4], 1e-1));

        assert!(matches!(
            space.evenly_spaced_range("optimiser", 4),
            Err(SpaceError::NotNumeric { .. })
        ));
        assert_eq!(space.evenly_spaced_range("seed", 2).unwrap(), vec![42.0, 42.0]);
        assert_eq!(space.latent_range("layers", 3).unwrap(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn samples_stay_in_latent_bounds() {
        let space = sample_space();
        let bounds = space.latent_bounds();
        assert_eq!(bounds[4], (0.0, 0.0));
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let x = space.sample(&mut rng);
            for (v, (lo, hi)) in x.iter().zip(&bounds) {
                assert!(*v >= *lo && *v <= *hi);
            }
            assert!(space.from_latent(&x).is_ok());
        }
    }

    #[test]
    fn close_to_any_uses_squared_distance() {
        let points: Vec<Vec<f64>> = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let refs = points.iter().map(|p| p.as_slice());
        assert!(close_to_any(&[0.001, 0.0], refs.clone(), 1e-5));
        assert!(!close_to_any(&[0.5, 0.5], refs, 1e-5));
    }

    #[test]
    fn deserialised_space_still_resolves_names() {
        let space = sample_space();
        let json = serde_json::to_string(&space).unwrap();
        let back: LatentSpace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.param_index("lr").unwrap(), 2);
    }
}
