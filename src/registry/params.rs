use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single indicator parameter value, closed over the shapes the registry's
/// builtin indicators need. `None` params are stripped before hashing (spec
/// §3, FeatureSpec equality/hashing contract) rather than represented here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(i) if *i >= 0 => Some(*i as usize),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Canonicalized parameter map: a `BTreeMap` so keys are always sorted and
/// `None` entries are simply absent, matching spec §3's canonicalization
/// contract ("None stripped, keys sorted, no float rounding") without any
/// extra bookkeeping.
pub type Params = BTreeMap<String, ParamValue>;
