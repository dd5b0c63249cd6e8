//! Attribute sets: the dimensional keys of a measurement.
//!
//! An [`AttributeSet`] is both the input to a recording call and the
//! identity under which the pipeline aggregates that recording. Two sets
//! holding the same key/value pairs are equal and hash identically no matter
//! the order they were built in.
//!
//! ```
//! use nebula_metrics::attributes::{AttributeSet, KeyValue};
//!
//! let a = AttributeSet::from([KeyValue::new("region", "us"), KeyValue::new("tier", 2)]);
//! let b = AttributeSet::from([KeyValue::new("tier", 2), KeyValue::new("region", "us")]);
//! assert_eq!(a, b);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Value half of an attribute pair.
///
/// Arrays are homogeneous by construction: there is one variant per element
/// type.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    /// UTF-8 string.
    String(Arc<str>),
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// Array of strings.
    StringArray(Arc<[Arc<str>]>),
    /// Array of booleans.
    BoolArray(Arc<[bool]>),
    /// Array of signed integers.
    I64Array(Arc<[i64]>),
    /// Array of floats.
    F64Array(Arc<[f64]>),
}

/// Bit pattern used for float equality and hashing.
///
/// `-0.0` folds onto `0.0` and every NaN folds onto one canonical NaN so
/// that `Eq` and `Hash` agree.
fn float_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => float_bits(*a) == float_bits(*b),
            (Self::StringArray(a), Self::StringArray(b)) => a == b,
            (Self::BoolArray(a), Self::BoolArray(b)) => a == b,
            (Self::I64Array(a), Self::I64Array(b)) => a == b,
            (Self::F64Array(a), Self::F64Array(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| float_bits(*x) == float_bits(*y))
            }
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::String(v) => v.hash(state),
            Self::Bool(v) => v.hash(state),
            Self::I64(v) => v.hash(state),
            Self::F64(v) => float_bits(*v).hash(state),
            Self::StringArray(v) => v.hash(state),
            Self::BoolArray(v) => v.hash(state),
            Self::I64Array(v) => v.hash(state),
            Self::F64Array(v) => {
                v.len().hash(state);
                for x in v.iter() {
                    float_bits(*x).hash(state);
                }
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{item}")?;
            }
            f.write_str("]")
        }

        match self {
            Self::String(v) => f.write_str(v),
            Self::Bool(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::StringArray(v) => list(f, v),
            Self::BoolArray(v) => list(f, v),
            Self::I64Array(v) => list(f, v),
            Self::F64Array(v) => list(f, v),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(v) => serializer.serialize_str(v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::I64(v) => serializer.serialize_i64(*v),
            Self::F64(v) => serializer.serialize_f64(*v),
            Self::StringArray(v) => serializer.collect_seq(v.iter().map(AsRef::<str>::as_ref)),
            Self::BoolArray(v) => serializer.collect_seq(v.iter()),
            Self::I64Array(v) => serializer.collect_seq(v.iter()),
            Self::F64Array(v) => serializer.collect_seq(v.iter()),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(Arc::from(value))
    }
}

impl From<Arc<str>> for AttributeValue {
    fn from(value: Arc<str>) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::I64(value.into())
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::I64(value.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(value: Vec<&str>) -> Self {
        Self::StringArray(value.into_iter().map(Arc::from).collect())
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        Self::StringArray(value.into_iter().map(Arc::from).collect())
    }
}

impl From<Vec<bool>> for AttributeValue {
    fn from(value: Vec<bool>) -> Self {
        Self::BoolArray(value.into())
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        Self::I64Array(value.into())
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(value: Vec<f64>) -> Self {
        Self::F64Array(value.into())
    }
}

/// A single key/value attribute pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyValue {
    /// Attribute key.
    pub key: Arc<str>,
    /// Attribute value.
    pub value: AttributeValue,
}

impl KeyValue {
    /// Create a new pair.
    pub fn new(key: impl Into<Arc<str>>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Immutable, order-independent set of attributes.
///
/// Entries are kept sorted by key with unique keys, so the derived `Eq` and
/// `Hash` implementations are insertion-order independent. Cloning is a
/// reference-count bump.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct AttributeSet {
    entries: Arc<[KeyValue]>,
}

impl AttributeSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a set pair by pair.
    pub fn builder() -> AttributesBuilder {
        AttributesBuilder::default()
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries
            .binary_search_by(|kv| kv.key.as_ref().cmp(key))
            .ok()
            .map(|idx| &self.entries[idx].value)
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no pairs.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate pairs in key order.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.entries.iter()
    }

    /// A builder pre-populated with this set's pairs.
    pub fn to_builder(&self) -> AttributesBuilder {
        AttributesBuilder {
            entries: self
                .entries
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone()))
                .collect(),
        }
    }

    /// Union of `self` and `other`; `other` wins on key collisions.
    pub fn merge(&self, other: &AttributeSet) -> AttributeSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut builder = self.to_builder();
        for kv in other.iter() {
            builder = builder.put(kv.key.clone(), kv.value.clone());
        }
        builder.build()
    }
}

impl fmt::Debug for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|kv| (&kv.key, &kv.value)))
            .finish()
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, kv) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", kv.key, kv.value)?;
        }
        f.write_str("}")
    }
}

impl Serialize for AttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for kv in self.entries.iter() {
            map.serialize_entry(kv.key.as_ref(), &kv.value)?;
        }
        map.end()
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        iter.into_iter()
            .fold(AttributesBuilder::default(), |b, kv| b.put(kv.key, kv.value))
            .build()
    }
}

impl From<Vec<KeyValue>> for AttributeSet {
    fn from(value: Vec<KeyValue>) -> Self {
        value.into_iter().collect()
    }
}

impl<const N: usize> From<[KeyValue; N]> for AttributeSet {
    fn from(value: [KeyValue; N]) -> Self {
        value.into_iter().collect()
    }
}

impl From<&[KeyValue]> for AttributeSet {
    fn from(value: &[KeyValue]) -> Self {
        value.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a AttributeSet {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Mutable accumulator for an [`AttributeSet`].
///
/// A repeated key keeps the last value put. Empty keys are ignored.
#[derive(Debug, Clone, Default)]
pub struct AttributesBuilder {
    entries: BTreeMap<Arc<str>, AttributeValue>,
}

impl AttributesBuilder {
    /// Insert or replace the value under `key`.
    pub fn put(mut self, key: impl Into<Arc<str>>, value: impl Into<AttributeValue>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.entries.insert(key, value.into());
        }
        self
    }

    /// Drop `key` if present.
    pub fn remove(mut self, key: &str) -> Self {
        self.entries.remove(key);
        self
    }

    /// Freeze into an immutable set.
    pub fn build(self) -> AttributeSet {
        AttributeSet {
            entries: self
                .entries
                .into_iter()
                .map(|(key, value)| KeyValue { key, value })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashMap;

    fn hash_of(set: &AttributeSet) -> u64 {
        let mut hasher = DefaultHasher::new();
        set.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = AttributeSet::from([KeyValue::new("a", 1), KeyValue::new("b", "x")]);
        let b = AttributeSet::from([KeyValue::new("b", "x"), KeyValue::new("a", 1)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn usable_as_map_key() {
        let mut sums: HashMap<AttributeSet, i64> = HashMap::new();
        *sums
            .entry(AttributeSet::from([KeyValue::new("host", "a")]))
            .or_default() += 1;
        *sums
            .entry(AttributeSet::from([KeyValue::new("host", "a")]))
            .or_default() += 2;
        assert_eq!(sums.len(), 1);
        assert_eq!(sums.values().copied().sum::<i64>(), 3);
    }

    #[test]
    fn repeated_key_keeps_last_value() {
        let set = AttributeSet::from([KeyValue::new("k", 1), KeyValue::new("k", 2)]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("k"), Some(&AttributeValue::I64(2)));
    }

    #[test]
    fn empty_keys_are_dropped() {
        let set = AttributeSet::builder().put("", "x").put("ok", true).build();
        assert_eq!(set.len(), 1);
        assert!(set.get("").is_none());
    }

    #[test]
    fn different_value_types_are_not_equal() {
        let a = AttributeSet::from([KeyValue::new("k", 1)]);
        let b = AttributeSet::from([KeyValue::new("k", "1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn float_zero_and_nan_are_normalised() {
        let a = AttributeSet::from([KeyValue::new("f", 0.0)]);
        let b = AttributeSet::from([KeyValue::new("f", -0.0)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let n1 = AttributeSet::from([KeyValue::new("f", f64::NAN)]);
        let n2 = AttributeSet::from([KeyValue::new("f", -f64::NAN)]);
        assert_eq!(n1, n2);
    }

    #[test]
    fn merge_prefers_other() {
        let base = AttributeSet::from([KeyValue::new("a", 1), KeyValue::new("b", 1)]);
        let over = AttributeSet::from([KeyValue::new("b", 2), KeyValue::new("c", 3)]);
        let merged = base.merge(&over);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("b"), Some(&AttributeValue::I64(2)));
    }

    #[test]
    fn builder_remove() {
        let set = AttributeSet::from([KeyValue::new("a", 1), KeyValue::new("b", 2)])
            .to_builder()
            .remove("a")
            .build();
        assert_eq!(set, AttributeSet::from([KeyValue::new("b", 2)]));
    }

    #[test]
    fn arrays_compare_by_content() {
        let a = AttributeSet::from([KeyValue::new("xs", vec![1_i64, 2, 3])]);
        let b = AttributeSet::from([KeyValue::new("xs", vec![1_i64, 2, 3])]);
        let c = AttributeSet::from([KeyValue::new("xs", vec![3_i64, 2, 1])]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_is_key_sorted() {
        let set = AttributeSet::from([KeyValue::new("z", "last"), KeyValue::new("a", true)]);
        assert_eq!(set.to_string(), "{a=true, z=last}");
    }
}
