//! Declared unit transforms encoded in variable names.
//!
//! A requested variable `pib_log` is the natural log of the raw warehouse
//! quantity `pib`; `receita_asinh` is the inverse hyperbolic sine of
//! `receita`. Any other name is read as-is.

/// Transform applied to a raw warehouse quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Value used unchanged.
    Identity,
    /// Natural log; only defined for strictly positive values.
    Log,
    /// `asinh(x)`; defined everywhere, log-like for large `x`.
    Asinh,
}

/// Result of applying a transform to one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transformed {
    /// Finite transformed value.
    Value(f64),
    /// Raw value present but outside the transform's domain.
    OutOfDomain,
    /// Raw value missing or non-finite.
    Missing,
}

impl Transform {
    /// Apply to an optional raw value.
    pub fn apply(self, raw: Option<f64>) -> Transformed {
        let Some(x) = raw.filter(|v| v.is_finite()) else {
            return Transformed::Missing;
        };
        match self {
            Transform::Identity => Transformed::Value(x),
            Transform::Log if x > 0.0 => Transformed::Value(x.ln()),
            Transform::Log => Transformed::OutOfDomain,
            Transform::Asinh => Transformed::Value(x.asinh()),
        }
    }
}

/// A requested variable resolved to its raw source and transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    /// Name as requested (column name in the panel).
    pub name: String,
    /// Raw warehouse variable.
    pub source: String,
    /// Transform from `source` to `name`.
    pub transform: Transform,
}

const SUFFIXES: [(&str, Transform); 2] = [("_log", Transform::Log), ("_asinh", Transform::Asinh)];

/// Resolve a requested variable name.
pub fn resolve(name: &str) -> VariableSpec {
    for (suffix, transform) in SUFFIXES {
        if let Some(base) = name.strip_suffix(suffix)
            && !base.is_empty()
        {
            return VariableSpec { name: name.to_string(), source: base.to_string(), transform };
        }
    }
    VariableSpec { name: name.to_string(), source: name.to_string(), transform: Transform::Identity }
}
