use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// In-process pass/fail function over a check's scalar.
#[derive(Clone)]
pub struct CustomPredicate {
    pub name: String,
    func: Arc<dyn Fn(i64) -> bool + Send + Sync>,
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Pass/fail rule applied to the scalar returned by a quality check.
///
/// The comparator variants round-trip through pipeline definitions.
/// `Custom` only exists in process: it cannot be serialized, and a
/// definition can never produce one.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { value: i64 },
    NotEquals { value: i64 },
    GreaterThan { value: i64 },
    GreaterOrEqual { value: i64 },
    LessThan { value: i64 },
    LessOrEqual { value: i64 },
    /// Inclusive on both ends.
    InRange { min: i64, max: i64 },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl Predicate {
    pub fn equals(value: i64) -> Self {
        Self::Equals { value }
    }

    pub fn not_equals(value: i64) -> Self {
        Self::NotEquals { value }
    }

    pub fn greater_than(value: i64) -> Self {
        Self::GreaterThan { value }
    }

    pub fn less_than(value: i64) -> Self {
        Self::LessThan { value }
    }

    pub fn in_range(min: i64, max: i64) -> Self {
        Self::InRange { min, max }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(i64) -> bool + Send + Sync + 'static,
    {
        Self::Custom(CustomPredicate {
            name: name.into(),
            func: Arc::new(func),
        })
    }

    pub fn evaluate(&self, value: i64) -> bool {
        match self {
            Self::Equals { value: expected } => value == *expected,
            Self::NotEquals { value: expected } => value != *expected,
            Self::GreaterThan { value: bound } => value > *bound,
            Self::GreaterOrEqual { value: bound } => value >= *bound,
            Self::LessThan { value: bound } => value < *bound,
            Self::LessOrEqual { value: bound } => value <= *bound,
            Self::InRange { min, max } => (*min..=*max).contains(&value),
            Self::Custom(custom) => (custom.func)(value),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { value } => write!(f, "== {value}"),
            Self::NotEquals { value } => write!(f, "!= {value}"),
            Self::GreaterThan { value } => write!(f, "> {value}"),
            Self::GreaterOrEqual { value } => write!(f, ">= {value}"),
            Self::LessThan { value } => write!(f, "< {value}"),
            Self::LessOrEqual { value } => write!(f, "<= {value}"),
            Self::InRange { min, max } => write!(f, "in [{min}, {max}]"),
            Self::Custom(custom) => write!(f, "{}(..)", custom.name),
        }
    }
}
