use std::{borrow::Cow, collections::BTreeMap, fmt};

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::StaticCowStr;

/// Key/value mapping shared by the ambient context, handler-local metadata and
/// per-call metadata.
pub type Metadata = BTreeMap<StaticCowStr, MetadataValue>;

/// A metadata value: a string, or a nested list or map of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    String(StaticCowStr),
    List(Vec<MetadataValue>),
    Map(Metadata),
}

impl MetadataValue {
    /// Returns the string slice if this is a scalar value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(&**s),
            Self::List(_) | Self::Map(_) => None,
        }
    }

    pub fn as_log_value(&self) -> log::kv::Value<'_> {
        match self {
            Self::String(s) => log::kv::Value::from(&**s),
            Self::List(_) | Self::Map(_) => log::kv::Value::from_serde(self),
        }
    }
}

/// Merges per-call metadata over a base context.
///
/// Keys present on both sides take the value from `call`.
#[must_use]
pub fn merge(base: Metadata, call: Metadata) -> Metadata {
    let mut merged = base;
    merged.extend(call);
    merged
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(&**key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Human-readable rendering: strings are written as is, without quotes, lists as
/// `[a, b]` and maps as `{k: v}`. The structured form is the [`Serialize`] impl.
impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
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
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&'static str> for MetadataValue {
    fn from(value: &'static str) -> Self {
        Self::String(Cow::Borrowed(value))
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(Cow::Owned(value))
    }
}

impl From<StaticCowStr> for MetadataValue {
    fn from(value: StaticCowStr) -> Self {
        Self::String(value)
    }
}

impl From<Metadata> for MetadataValue {
    fn from(value: Metadata) -> Self {
        Self::Map(value)
    }
}

impl<T> From<Vec<T>> for MetadataValue
where
    T: Into<Self>,
{
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

macro_rules! impl_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for MetadataValue {
                fn from(value: $ty) -> Self {
                    Self::String(Cow::Owned(value.to_string()))
                }
            }
        )*
    };
}

impl_from_display!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
);

/// Strings, arrays and objects keep their shape; other JSON scalars become their
/// textual form.
impl From<serde_json::Value> for MetadataValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => s.into(),
            serde_json::Value::Array(items) => items.into(),
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
            other => other.to_string().into(),
        }
    }
}
