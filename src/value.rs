use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

/// A dynamically shaped argument or result.
///
/// This is the data model both codecs work on. Memoized functions with plain
/// Rust arguments never see it directly: their arguments are converted through
/// [`ToValue`] whenever a backend needs a normalized key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The explicit null marker.
    Null,
    /// A boolean.
    Bool(bool),
    /// A double-precision number.
    Number(f64),
    /// An integer that must not lose precision.
    BigInt(i128),
    /// A string.
    String(String),
    /// An ordered sequence.
    Array(Vec<Value>),
    /// A plain composite object.
    Object(BTreeMap<String, Value>),
    /// A raw byte buffer.
    Bytes(Vec<u8>),
    /// A fixed-width numeric buffer.
    TypedArray(TypedArray),
    /// An unordered key/value collection, stored in insertion order.
    Map(Vec<(Value, Value)>),
    /// An unordered value collection, stored in insertion order.
    Set(Vec<Value>),
    /// A pattern-matching object.
    RegExp(RegExp),
    /// A point in time.
    Date(DateTime<Utc>),
    /// A parsed URL.
    Url(Url),
    /// Query-string parameters, in order.
    Query(Vec<(String, String)>),
    /// A unique identity token.
    Token(Token),
}

impl Value {
    /// Convert any serializable value into its plain structural form.
    ///
    /// Only the JSON subset of the model is produced: `Null`, `Bool`,
    /// `Number`, `String`, `Array` and `Object`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::from)
    }

    /// Build a pattern-matching value.
    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self::RegExp(RegExp { source: source.into(), flags: flags.into() })
    }

    /// The name of this value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Bytes(_) => "bytes",
            Self::TypedArray(array) => array.name(),
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::RegExp(_) => "regexp",
            Self::Date(_) => "date",
            Self::Url(_) => "url",
            Self::Query(_) => "query",
            Self::Token(_) => "token",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(fields) => Self::Object(
                fields.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<TypedArray> for Value {
    fn from(array: TypedArray) -> Self {
        Self::TypedArray(array)
    }
}

/// A pattern-matching object: its textual pattern plus flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegExp {
    /// The pattern text.
    pub source: String,
    /// The flag letters, e.g. `gi`.
    pub flags: String,
}

/// A value that is only ever equal to itself (and its clones).
///
/// Tokens normalize to a process-unique id and cannot be serialized.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// Create a fresh token, distinct from all others in this process.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The token's process-unique id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Token(#{})", self.0)
    }
}

macro_rules! typed_arrays {
    ($($kind:ident($elem:ty) => $name:literal,)*) => {
        /// A fixed-width numeric buffer.
        #[derive(Debug, Clone, PartialEq)]
        pub enum TypedArray {
            $(
                #[doc = concat!("A `", $name, "`.")]
                $kind(Vec<$elem>),
            )*
        }

        impl TypedArray {
            /// All element kind names, e.g. `Uint8Array`.
            pub const NAMES: &'static [&'static str] = &[$($name),*];

            /// The name of this buffer's element kind.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$kind(_) => $name,)*
                }
            }

            /// The number of elements.
            pub fn len(&self) -> usize {
                match self {
                    $(Self::$kind(items) => items.len(),)*
                }
            }

            /// Whether the buffer has no elements.
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// The elements as an array of plain numbers.
            pub(crate) fn to_json(&self) -> serde_json::Value {
                match self {
                    $(Self::$kind(items) => {
                        items.iter().copied().map(serde_json::Value::from).collect()
                    })*
                }
            }

            /// Rebuild a buffer from its kind name and elements.
            ///
            /// Returns `None` if the name is not a known element kind.
            pub(crate) fn from_json(
                name: &str,
                items: serde_json::Value,
            ) -> Option<serde_json::Result<Self>> {
                match name {
                    $($name => Some(serde_json::from_value(items).map(Self::$kind)),)*
                    _ => None,
                }
            }
        }

        $(
            impl From<Vec<$elem>> for TypedArray {
                fn from(items: Vec<$elem>) -> Self {
                    Self::$kind(items)
                }
            }
        )*
    };
}

typed_arrays! {
    Int8(i8) => "Int8Array",
    Uint8(u8) => "Uint8Array",
    Int16(i16) => "Int16Array",
    Uint16(u16) => "Uint16Array",
    Int32(i32) => "Int32Array",
    Uint32(u32) => "Uint32Array",
    Float32(f32) => "Float32Array",
    Float64(f64) => "Float64Array",
}

/// Conversion into the dynamic [`Value`] model.
///
/// Argument tuples implement this for arities up to twelve, which is what
/// the default key normalizer requires of a memoized function's arguments.
pub trait ToValue {
    /// Describe `self` as a value.
    fn to_value(&self) -> Value;
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<T: ToValue + ?Sized> ToValue for Box<T> {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! number_to_value {
    ($($ty:ty),*) => {
        $(impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::Number(f64::from(*self))
            }
        })*
    };
}

number_to_value!(i8, i16, i32, u8, u16, u32, f32, f64);

// Wide integers are not representable as doubles without loss.
macro_rules! bigint_to_value {
    ($($ty:ty),*) => {
        $(impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::BigInt(*self as i128)
            }
        })*
    };
}

bigint_to_value!(i64, u64, i128, isize, usize);

impl ToValue for char {
    fn to_value(&self) -> Value {
        Value::String(self.to_string())
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::String(self.to_owned())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToValue::to_value)
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<T: ToValue, const N: usize> ToValue for [T; N] {
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<K: ToValue, V: ToValue, S> ToValue for HashMap<K, V, S> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect())
    }
}

impl<K: ToValue, V: ToValue> ToValue for BTreeMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect())
    }
}

impl<T: ToValue, S> ToValue for HashSet<T, S> {
    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for BTreeSet<T> {
    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(ToValue::to_value).collect())
    }
}

impl ToValue for TypedArray {
    fn to_value(&self) -> Value {
        Value::TypedArray(self.clone())
    }
}

impl ToValue for RegExp {
    fn to_value(&self) -> Value {
        Value::RegExp(self.clone())
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
}

impl ToValue for Url {
    fn to_value(&self) -> Value {
        Value::Url(self.clone())
    }
}

impl ToValue for Token {
    fn to_value(&self) -> Value {
        Value::Token(self.clone())
    }
}

macro_rules! tuple_to_value {
    ($($param:ident $idx:tt),*) => {
        impl<$($param: ToValue),*> ToValue for ($($param,)*) {
            fn to_value(&self) -> Value {
                Value::Array(vec![$(self.$idx.to_value()),*])
            }
        }
    };
}

tuple_to_value! {}
tuple_to_value! { A 0 }
tuple_to_value! { A 0, B 1 }
tuple_to_value! { A 0, B 1, C 2 }
tuple_to_value! { A 0, B 1, C 2, D 3 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5, G 6 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10 }
tuple_to_value! { A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9, K 10, L 11 }

/// Whether a result stands for "no result".
///
/// Nullish results are never cached, and a nullish entry read back from a
/// cache is a miss. Besides `Ok(None)` from the wrapped function, the explicit
/// [`Value::Null`] marker is nullish. Types without such a marker implement
/// this with the default method:
///
/// ```
/// struct Report(String);
///
/// impl memoria::Nullish for Report {}
/// ```
pub trait Nullish {
    /// Whether `self` is the null marker.
    fn is_nullish(&self) -> bool {
        false
    }
}

impl Nullish for Value {
    fn is_nullish(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Nullish for serde_json::Value {
    fn is_nullish(&self) -> bool {
        self.is_null()
    }
}

impl<T: Nullish> Nullish for Option<T> {
    fn is_nullish(&self) -> bool {
        self.as_ref().is_none_or(Nullish::is_nullish)
    }
}

impl<T: Nullish + ?Sized> Nullish for &T {
    fn is_nullish(&self) -> bool {
        (**self).is_nullish()
    }
}

impl<T: Nullish + ?Sized> Nullish for Box<T> {
    fn is_nullish(&self) -> bool {
        (**self).is_nullish()
    }
}

impl<T: Nullish + ?Sized> Nullish for std::sync::Arc<T> {
    fn is_nullish(&self) -> bool {
        (**self).is_nullish()
    }
}

macro_rules! never_nullish {
    ($($ty:ty),* $(,)?) => {
        $(impl Nullish for $ty {})*
    };
}

never_nullish!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    str, String, TypedArray, RegExp, Token, DateTime<Utc>, Url, std::time::Duration,
);

impl<T> Nullish for [T] {}
impl<T> Nullish for Vec<T> {}
impl<T, const N: usize> Nullish for [T; N] {}
impl<K, V, S> Nullish for HashMap<K, V, S> {}
impl<K, V> Nullish for BTreeMap<K, V> {}
impl<T, S> Nullish for HashSet<T, S> {}
impl<T> Nullish for BTreeSet<T> {}
impl<T, E> Nullish for Result<T, E> {}

macro_rules! tuple_never_nullish {
    ($($param:ident),*) => {
        impl<$($param),*> Nullish for ($($param,)*) {}
    };
}

tuple_never_nullish! { A }
tuple_never_nullish! { A, B }
tuple_never_nullish! { A, B, C }
tuple_never_nullish! { A, B, C, D }
tuple_never_nullish! { A, B, C, D, E }
tuple_never_nullish! { A, B, C, D, E, F }
