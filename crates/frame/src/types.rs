use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Bool,
    I64,
    F64,
    Str,
}

impl DataType {
    /// Is this an integer or floating point type?
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::I64 | Self::F64)
    }

    /// The common numeric type of `self` and `other`.
    /// Mixing integers and floats widens to [DataType::F64].
    pub fn numeric_supertype(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Self::I64, Self::I64) => Some(Self::I64),
            (Self::I64 | Self::F64, Self::I64 | Self::F64) => Some(Self::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::Str => "str",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::Bool => 1,
            Self::I64 => 2,
            Self::F64 => 3,
            Self::Str => 4,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single, possibly null, cell value.
///
/// Equality and hashing are total: floats compare by their IEEE total order,
/// so values can be used as grouping and join keys.
/// Note that `Null == Null` here, which is the grouping semantics.
/// Join keys must check for nulls themselves.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Self::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The type of this value, or [None] for null.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::I64(_) => Some(DataType::I64),
            Self::F64(_) => Some(DataType::F64),
            Self::Str(_) => Some(DataType::Str),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric values widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I64(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Cast a value to `ty`, if it is representable.
    /// Used when reading results back from an engine
    /// that stores booleans as integers or integral floats as reals.
    pub fn coerce(self, ty: DataType) -> Option<Self> {
        match (self, ty) {
            (Self::Null, _) => Some(Self::Null),
            (v @ Self::Bool(_), DataType::Bool)
            | (v @ Self::I64(_), DataType::I64)
            | (v @ Self::F64(_), DataType::F64)
            | (v @ Self::Str(_), DataType::Str) => Some(v),
            (Self::I64(v), DataType::Bool) => Some(Self::Bool(v != 0)),
            (Self::I64(v), DataType::F64) => Some(Self::F64(v as f64)),
            (Self::F64(v), DataType::I64) if v.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&v) => {
                Some(Self::I64(v as i64))
            }
            (Self::Bool(b), DataType::I64) => Some(Self::I64(b as i64)),
            _ => None,
        }
    }

    /// Compare two non-null values of the same (or numerically compatible) type.
    /// Returns [None] if either side is null or the types are incomparable.
    ///
    /// Agrees with [PartialEq]: `-0.0` equals `0.0`, and NaN sorts above every other number.
    /// Integers and floats are compared exactly, without widening the integer.
    pub fn partial_cmp_non_null(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::I64(a), Self::I64(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::F64(a), Self::F64(b)) => Some(canonical_f64(*a).total_cmp(&canonical_f64(*b))),
            (Self::I64(a), Self::F64(b)) => Some(cmp_i64_f64(*a, *b)),
            (Self::F64(a), Self::I64(b)) => Some(cmp_i64_f64(*b, *a).reverse()),
            _ => None,
        }
    }

    /// Feed a canonical encoding of this value into `hasher`.
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Self::Null => {
                hasher.update(&[0]);
            }
            Self::Bool(b) => {
                hasher.update(&[DataType::Bool.tag(), *b as u8]);
            }
            Self::I64(v) => {
                hasher.update(&[DataType::I64.tag()]);
                hasher.update(&v.to_le_bytes());
            }
            Self::F64(v) => {
                hasher.update(&[DataType::F64.tag()]);
                hasher.update(&canonical_f64(*v).to_bits().to_le_bytes());
            }
            Self::Str(s) => {
                hasher.update(&[DataType::Str.tag()]);
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
        }
    }
}

/// `2^63`, the first float above every `i64`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn cmp_i64_f64(a: i64, b: f64) -> Ordering {
    if b.is_nan() || b >= I64_BOUND {
        return Ordering::Less;
    }
    if b < -I64_BOUND {
        return Ordering::Greater;
    }
    // `b` is now within range, so its integral part converts exactly.
    let whole = b.trunc();
    a.cmp(&(whole as i64)).then_with(|| match b - whole {
        fraction if fraction > 0.0 => Ordering::Less,
        fraction if fraction < 0.0 => Ordering::Greater,
        _ => Ordering::Equal,
    })
}

/// Collapse `-0.0` onto `0.0` and every NaN onto one bit pattern.
fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => canonical_f64(*a).to_bits() == canonical_f64(*b).to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::I64(v) => v.hash(state),
            Self::F64(v) => canonical_f64(*v).to_bits().hash(state),
            Self::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_is_total() {
        assert_eq!(Value::F64(0.0), Value::F64(-0.0));
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
        assert_ne!(Value::F64(1.0), Value::I64(1));
    }

    #[test]
    fn mixed_numeric_comparison() {
        assert_eq!(
            Value::I64(2).partial_cmp_non_null(&Value::F64(1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.partial_cmp_non_null(&Value::I64(1)), None);
        assert_eq!(Value::str("a").partial_cmp_non_null(&Value::I64(1)), None);
        assert_eq!(
            Value::F64(-0.5).partial_cmp_non_null(&Value::I64(0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::I64(-1).partial_cmp_non_null(&Value::F64(-1.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::I64(i64::MAX).partial_cmp_non_null(&Value::F64(f64::NAN)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn negative_zero_sorts_with_zero() {
        let zero = Value::F64(0.0);
        let negative = Value::F64(-0.0);
        assert_eq!(zero.partial_cmp_non_null(&negative), Some(Ordering::Equal));
        assert_eq!(negative.partial_cmp_non_null(&Value::I64(0)), Some(Ordering::Equal));
        assert_eq!(
            Value::F64(f64::NAN).partial_cmp_non_null(&Value::F64(f64::INFINITY)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn large_integers_compare_exactly_with_floats() {
        let two_53 = 9_007_199_254_740_992_i64;
        assert_eq!(
            Value::I64(two_53 + 1).partial_cmp_non_null(&Value::F64(two_53 as f64)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::F64(two_53 as f64).partial_cmp_non_null(&Value::I64(two_53 + 1)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::I64(two_53).partial_cmp_non_null(&Value::F64(two_53 as f64)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::I64(i64::MAX).partial_cmp_non_null(&Value::F64(i64::MAX as f64)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::I64(i64::MIN).partial_cmp_non_null(&Value::F64(i64::MIN as f64)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn coerce_engine_values() {
        assert_eq!(Value::I64(1).coerce(DataType::Bool), Some(Value::Bool(true)));
        assert_eq!(Value::F64(3.0).coerce(DataType::I64), Some(Value::I64(3)));
        assert_eq!(Value::F64(3.5).coerce(DataType::I64), None);
        assert_eq!(Value::F64(1e19).coerce(DataType::I64), None);
        assert_eq!(Value::F64(-1e19).coerce(DataType::I64), None);
        assert_eq!(Value::Null.coerce(DataType::Str), Some(Value::Null));
    }

    #[test]
    fn numeric_supertype() {
        assert_eq!(DataType::I64.numeric_supertype(DataType::F64), Some(DataType::F64));
        assert_eq!(DataType::I64.numeric_supertype(DataType::I64), Some(DataType::I64));
        assert_eq!(DataType::Str.numeric_supertype(DataType::I64), None);
    }
}
