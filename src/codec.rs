use std::collections::BTreeMap;
use std::marker::PhantomData;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use thiserror::Error;

use crate::value::{RegExp, TypedArray, Value};

/// Field names of the single-field wrapper objects that carry extended types.
pub(crate) mod tag {
    pub const BIGINT: &str = "$bigint";
    pub const BYTES: &str = "$bytes";
    pub const MAP: &str = "$map";
    pub const SET: &str = "$set";
    pub const REGEXP: &str = "$regexp";
    pub const QUERY: &str = "$query";
    pub const TOKEN: &str = "$token";
    /// Typed arrays use `$` followed by their kind name, e.g. `$Uint8Array`.
    pub const TYPED_PREFIX: &str = "$";
}

/// Turns values into strings and back.
pub trait Serializer<R> {
    /// Encode a value as text.
    fn stringify(&self, value: &R) -> Result<String, CodecError>;

    /// Decode text produced by [`stringify`](Self::stringify).
    fn parse(&self, text: &str) -> Result<R, CodecError>;
}

/// Failure to encode or decode a value.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text is not valid JSON, or does not match the expected shape.
    #[error("malformed text")]
    Json(#[from] serde_json::Error),
    /// The value has no text representation.
    #[error("a {0} cannot be serialized")]
    Unserializable(&'static str),
    /// A tagged wrapper carried a payload of the wrong shape.
    #[error("malformed `{0}` payload")]
    Malformed(String),
}

/// The structural serializer for [`Value`]s.
///
/// Extends plain JSON with single-field tagged wrapper objects for the types
/// JSON cannot express:
///
/// | type          | encoding                          |
/// |---------------|-----------------------------------|
/// | `BigInt`      | `{"$bigint": "<decimal>"}`        |
/// | `Bytes`       | `{"$bytes": [..]}`                |
/// | `TypedArray`  | `{"$Uint8Array": [..]}` and kin   |
/// | `Map`         | `{"$map": [[key, value], ..]}`    |
/// | `Set`         | `{"$set": [..]}`                  |
/// | `RegExp`      | `{"$regexp": [source, flags]}`    |
/// | `Query`       | `{"$query": "a=1&b=2"}`           |
///
/// Objects without a recognized tag parse as plain objects.
///
/// Two kinds are lossy on purpose: a `Date` is written as its ISO-8601 text
/// and a `Url` as its serialized form, and both parse back as
/// [`Value::String`]. Tokens cannot be serialized at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartSerializer;

impl Serializer<Value> for SmartSerializer {
    fn stringify(&self, value: &Value) -> Result<String, CodecError> {
        stringify(value)
    }

    fn parse(&self, text: &str) -> Result<Value, CodecError> {
        parse(text)
    }
}

/// Plain JSON encoding of any serde-compatible type.
pub struct JsonSerializer<R>(PhantomData<fn() -> R>);

impl<R> JsonSerializer<R> {
    /// Create a serializer.
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<R> Default for JsonSerializer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for JsonSerializer<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for JsonSerializer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.pad("JsonSerializer")
    }
}

impl<R: Serialize + DeserializeOwned> Serializer<R> for JsonSerializer<R> {
    fn stringify(&self, value: &R) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    fn parse(&self, text: &str) -> Result<R, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Encode a value as text using the tagged structural encoding.
pub fn stringify(value: &Value) -> Result<String, CodecError> {
    Ok(encode(value)?.to_string())
}

/// Decode text produced by [`stringify`].
pub fn parse(text: &str) -> Result<Value, CodecError> {
    decode(serde_json::from_str(text)?)
}

fn encode(value: &Value) -> Result<Json, CodecError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::from(*n),
        Value::BigInt(n) => tagged(tag::BIGINT, n.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(encode).collect::<Result<_, _>>()?),
        Value::Object(fields) => Json::Object(
            fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), encode(v)?)))
                .collect::<Result<_, CodecError>>()?,
        ),
        Value::Bytes(bytes) => tagged(tag::BYTES, bytes_json(bytes)),
        Value::TypedArray(array) => typed(array),
        Value::Map(entries) => tagged(
            tag::MAP,
            entries
                .iter()
                .map(|(k, v)| Ok(Json::Array(vec![encode(k)?, encode(v)?])))
                .collect::<Result<Vec<_>, CodecError>>()?,
        ),
        Value::Set(items) => {
            tagged(tag::SET, items.iter().map(encode).collect::<Result<Vec<_>, _>>()?)
        }
        Value::RegExp(re) => regexp(re),
        Value::Date(date) => Json::String(iso(date)),
        Value::Url(url) => Json::String(url.as_str().to_owned()),
        Value::Query(pairs) => tagged(tag::QUERY, encode_query(pairs)),
        Value::Token(_) => return Err(CodecError::Unserializable("token")),
    })
}

/// Decodes the payload of a tagged wrapper.
type Decoder = fn(&str, Json) -> Result<Value, CodecError>;

/// Tagged wrappers, checked in order. Typed arrays are checked last.
const DECODERS: &[(&str, Decoder)] = &[
    (tag::BIGINT, decode_bigint),
    (tag::BYTES, decode_bytes),
    (tag::MAP, decode_map),
    (tag::SET, decode_set),
    (tag::REGEXP, decode_regexp),
    (tag::QUERY, decode_query),
];

fn find_decoder(tag: &str) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|&(_, decoder)| decoder)
        .or_else(|| {
            let kind = tag.strip_prefix(tag::TYPED_PREFIX)?;
            TypedArray::NAMES.contains(&kind).then_some(decode_typed as Decoder)
        })
}

fn decode(json: Json) -> Result<Value, CodecError> {
    Ok(match json {
        Json::Object(fields) => {
            let decoder = match fields.keys().next() {
                Some(tag) if fields.len() == 1 => find_decoder(tag).map(|d| (tag.clone(), d)),
                _ => None,
            };

            if let Some((tag, decoder)) = decoder {
                let payload = fields.into_iter().next().map_or(Json::Null, |(_, v)| v);
                return decoder(&tag, payload);
            }

            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, decode(v)?)))
                    .collect::<Result<BTreeMap<_, _>, CodecError>>()?,
            )
        }
        Json::Array(items) => {
            Value::Array(items.into_iter().map(decode).collect::<Result<_, _>>()?)
        }
        scalar => Value::from(scalar),
    })
}

fn decode_bigint(tag: &str, payload: Json) -> Result<Value, CodecError> {
    payload
        .as_str()
        .and_then(|digits| digits.parse().ok())
        .map(Value::BigInt)
        .ok_or_else(|| malformed(tag))
}

fn decode_bytes(tag: &str, payload: Json) -> Result<Value, CodecError> {
    serde_json::from_value(payload)
        .map(Value::Bytes)
        .map_err(|_| malformed(tag))
}

fn decode_typed(tag: &str, payload: Json) -> Result<Value, CodecError> {
    let kind = tag.strip_prefix(tag::TYPED_PREFIX).unwrap_or(tag);
    match TypedArray::from_json(kind, payload) {
        Some(Ok(array)) => Ok(Value::TypedArray(array)),
        _ => Err(malformed(tag)),
    }
}

fn decode_map(tag: &str, payload: Json) -> Result<Value, CodecError> {
    let entries: Vec<(Json, Json)> =
        serde_json::from_value(payload).map_err(|_| malformed(tag))?;
    entries
        .into_iter()
        .map(|(k, v)| Ok((decode(k)?, decode(v)?)))
        .collect::<Result<_, _>>()
        .map(Value::Map)
}

fn decode_set(tag: &str, payload: Json) -> Result<Value, CodecError> {
    let Json::Array(items) = payload else {
        return Err(malformed(tag));
    };
    items.into_iter().map(decode).collect::<Result<_, _>>().map(Value::Set)
}

fn decode_regexp(tag: &str, payload: Json) -> Result<Value, CodecError> {
    let (source, flags) = serde_json::from_value(payload).map_err(|_| malformed(tag))?;
    Ok(Value::RegExp(RegExp { source, flags }))
}

fn decode_query(tag: &str, payload: Json) -> Result<Value, CodecError> {
    let text = payload.as_str().ok_or_else(|| malformed(tag))?;
    Ok(Value::Query(url::form_urlencoded::parse(text.as_bytes()).into_owned().collect()))
}

fn malformed(tag: &str) -> CodecError {
    CodecError::Malformed(tag.to_owned())
}

/// Wrap a payload into a single-field tagged object.
pub(crate) fn tagged(tag: &str, payload: impl Into<Json>) -> Json {
    let mut fields = serde_json::Map::new();
    fields.insert(tag.to_owned(), payload.into());
    Json::Object(fields)
}

pub(crate) fn bytes_json(bytes: &[u8]) -> Json {
    bytes.iter().copied().map(Json::from).collect()
}

pub(crate) fn typed(array: &TypedArray) -> Json {
    tagged(&format!("{}{}", tag::TYPED_PREFIX, array.name()), array.to_json())
}

pub(crate) fn regexp(re: &RegExp) -> Json {
    tagged(tag::REGEXP, vec![re.source.as_str(), re.flags.as_str()])
}

/// The ISO-8601 text of a point in time, with millisecond precision.
pub(crate) fn iso(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn encode_query(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::value::Token;

    fn round_trip(value: &Value) -> Value {
        parse(&stringify(value).unwrap()).unwrap()
    }

    #[test]
    fn test_plain_json_passes_through() {
        let text = r#"{"a":[1.5,"x",null,true]}"#;
        let value = parse(text).unwrap();
        assert_eq!(stringify(&value).unwrap(), text);
    }

    #[test]
    fn test_bigint_round_trip() {
        let value = Value::BigInt(12345678901234567890);
        assert_eq!(stringify(&value).unwrap(), r#"{"$bigint":"12345678901234567890"}"#);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_buffers_round_trip() {
        let bytes = Value::Bytes(vec![0, 1, 255]);
        assert_eq!(round_trip(&bytes), bytes);

        let typed = Value::TypedArray(TypedArray::Int16(vec![-3, 0, 300]));
        assert_eq!(stringify(&typed).unwrap(), r#"{"$Int16Array":[-3,0,300]}"#);
        assert_eq!(round_trip(&typed), typed);
    }

    #[test]
    fn test_map_keeps_insertion_order() {
        let map = Value::Map(vec![("b".into(), Value::Number(2.0)), ("a".into(), Value::Number(1.0))]);
        assert_eq!(stringify(&map).unwrap(), r#"{"$map":[["b",2.0],["a",1.0]]}"#);
        assert_eq!(round_trip(&map), map);
    }

    #[test]
    fn test_nested_tags() {
        let value = Value::Set(vec![Value::BigInt(1), Value::regexp("a+", "gi")]);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_query_round_trip() {
        let value = Value::Query(vec![("q".into(), "a b".into()), ("page".into(), "2".into())]);
        assert_eq!(stringify(&value).unwrap(), r#"{"$query":"q=a+b&page=2"}"#);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn test_date_and_url_degrade_to_strings() {
        let date = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(round_trip(&Value::Date(date)), Value::String("2020-01-02T03:04:05.000Z".into()));

        let url = url::Url::parse("https://example.com/a?b=c").unwrap();
        assert_eq!(round_trip(&Value::Url(url)), Value::String("https://example.com/a?b=c".into()));
    }

    #[test]
    fn test_unknown_tags_pass_through() {
        let value = parse(r#"{"$unknown":1}"#).unwrap();
        let Value::Object(fields) = value else { panic!("expected an object") };
        assert_eq!(fields["$unknown"], Value::Number(1.0));

        // A known tag next to another field is a plain object, too.
        let value = parse(r#"{"$bigint":"1","other":2}"#).unwrap();
        assert!(matches!(value, Value::Object(_)));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(parse(r#"{"$bigint":12}"#), Err(CodecError::Malformed(tag)) if tag == "$bigint"));
        assert!(matches!(parse(r#"{"$Uint8Array":[-1]}"#), Err(CodecError::Malformed(_))));
        assert!(matches!(parse("{"), Err(CodecError::Json(_))));
    }

    #[test]
    fn test_tokens_are_unserializable() {
        let value = Value::Array(vec![Value::Token(Token::new())]);
        assert!(matches!(stringify(&value), Err(CodecError::Unserializable("token"))));
    }

    #[test]
    fn test_json_serializer() {
        let serializer = JsonSerializer::<Vec<(String, u32)>>::new();
        let text = serializer.stringify(&vec![("a".into(), 1)]).unwrap();
        assert_eq!(text, r#"[["a",1]]"#);
        assert_eq!(serializer.parse(&text).unwrap(), vec![("a".to_owned(), 1)]);
    }
}
