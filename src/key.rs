use serde_json::Value as Json;

use crate::codec::{self, tag};
use crate::value::{ToValue, Value};

/// Turns an argument tuple into the string a backend looks entries up by.
///
/// Two tuples that represent the same call must normalize to the same string,
/// and different calls should not. Any `Fn(&A) -> String` is a normalizer,
/// which makes overriding the default a one-liner.
pub trait Normalizer<A: ?Sized> {
    /// Produce the normalized key for `args`.
    fn normalize(&self, args: &A) -> String;
}

impl<A: ?Sized, F> Normalizer<A> for F
where
    F: Fn(&A) -> String,
{
    fn normalize(&self, args: &A) -> String {
        self(args)
    }
}

/// The default normalizer. See [`normalize`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartNormalizer;

impl<A: ToValue + ?Sized> Normalizer<A> for SmartNormalizer {
    fn normalize(&self, args: &A) -> String {
        normalize(args)
    }
}

/// Normalize an argument tuple into compact JSON text.
///
/// The encoding shares its tagged wrappers with the
/// [serializer](crate::stringify) but canonicalizes unordered collections:
/// map entries are sorted by their normalized key and set elements by their
/// normalized text, so insertion order never changes the result. Plain objects
/// keep their natural key order. Tokens normalize to their process-unique id.
pub fn normalize<A: ToValue + ?Sized>(args: &A) -> String {
    canonical(&args.to_value()).to_string()
}

fn canonical(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::from(*n),
        Value::BigInt(n) => codec::tagged(tag::BIGINT, n.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => items.iter().map(canonical).collect(),
        Value::Object(fields) => Json::Object(
            fields.iter().map(|(k, v)| (k.clone(), canonical(v))).collect(),
        ),
        Value::Bytes(bytes) => codec::tagged(tag::BYTES, codec::bytes_json(bytes)),
        Value::TypedArray(array) => codec::typed(array),
        Value::Map(entries) => {
            let mut entries: Vec<_> = entries
                .iter()
                .map(|(k, v)| {
                    let key = canonical(k);
                    (key.to_string(), key, canonical(v))
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            codec::tagged(
                tag::MAP,
                entries
                    .into_iter()
                    .map(|(_, k, v)| Json::Array(vec![k, v]))
                    .collect::<Vec<_>>(),
            )
        }
        Value::Set(items) => {
            let mut items: Vec<_> = items
                .iter()
                .map(|item| {
                    let json = canonical(item);
                    (json.to_string(), json)
                })
                .collect();
            items.sort_by(|a, b| a.0.cmp(&b.0));
            codec::tagged(tag::SET, items.into_iter().map(|(_, json)| json).collect::<Vec<_>>())
        }
        Value::RegExp(re) => codec::regexp(re),
        Value::Date(date) => Json::String(codec::iso(date)),
        Value::Url(url) => Json::String(url.as_str().to_owned()),
        Value::Query(pairs) => codec::tagged(tag::QUERY, codec::encode_query(pairs)),
        Value::Token(token) => codec::tagged(tag::TOKEN, token.id()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap, HashSet};

    use super::*;
    use crate::value::{RegExp, Token, TypedArray};

    #[test]
    fn test_tuple_shape() {
        assert_eq!(normalize(&("a", 1, true)), r#"["a",1.0,true]"#);
        assert_eq!(normalize(&()), "[]");
    }

    #[test]
    fn test_distinct_calls() {
        assert_ne!(normalize(&("a", 1, true)), normalize(&("b", 2, false)));
        assert_ne!(normalize(&(1, 2)), normalize(&(2, 1)));
        assert_ne!(normalize(&("1",)), normalize(&(1,)));
    }

    #[test]
    fn test_map_insertion_order_is_irrelevant() {
        let ab = Value::Map(vec![("a".into(), Value::Number(1.0)), ("b".into(), Value::Number(2.0))]);
        let ba = Value::Map(vec![("b".into(), Value::Number(2.0)), ("a".into(), Value::Number(1.0))]);
        assert_eq!(normalize(&(ab.clone(),)), normalize(&(ba,)));
        assert_eq!(normalize(&ab), r#"{"$map":[["a",1.0],["b",2.0]]}"#);
    }

    #[test]
    fn test_set_insertion_order_is_irrelevant() {
        let forward = Value::Set(vec![30.0.into(), 20.0.into(), 10.0.into()]);
        let backward = Value::Set(vec![10.0.into(), 20.0.into(), 30.0.into()]);
        assert_eq!(normalize(&forward), normalize(&backward));

        let hashed: HashSet<u32> = [30, 20, 10].into_iter().collect();
        let ordered: BTreeSet<u32> = [10, 20, 30].into_iter().collect();
        assert_eq!(normalize(&hashed), normalize(&ordered));
    }

    #[test]
    fn test_extended_types() {
        assert_eq!(normalize(&Value::BigInt(-5)), r#"{"$bigint":"-5"}"#);
        assert_eq!(normalize(&Value::Bytes(vec![1, 2])), r#"{"$bytes":[1,2]}"#);
        assert_eq!(
            normalize(&TypedArray::Uint8(vec![1, 2])),
            r#"{"$Uint8Array":[1,2]}"#
        );
        assert_eq!(
            normalize(&RegExp { source: "a.c".into(), flags: "i".into() }),
            r#"{"$regexp":["a.c","i"]}"#
        );
        assert_ne!(normalize(&Value::regexp("a", "g")), normalize(&Value::regexp("a", "")));
    }

    #[test]
    fn test_tokens_equal_only_themselves() {
        let token = Token::new();
        assert_eq!(normalize(&(token.clone(),)), normalize(&(token,)));
        assert_ne!(normalize(&(Token::new(),)), normalize(&(Token::new(),)));
    }

    #[test]
    fn test_custom_normalizer() {
        let by_length = |args: &(String,)| args.0.len().to_string();
        assert_eq!(by_length.normalize(&("abc".to_owned(),)), "3");
        assert_eq!(SmartNormalizer.normalize(&("abc",)), r#"["abc"]"#);
    }

    #[quickcheck_macros::quickcheck]
    fn test_map_order_quickcheck(entries: HashMap<String, i32>) -> bool {
        let forward: Vec<_> =
            entries.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect();
        let mut backward = forward.clone();
        backward.reverse();
        normalize(&Value::Map(forward)) == normalize(&Value::Map(backward))
    }

    #[quickcheck_macros::quickcheck]
    fn test_set_order_quickcheck(items: Vec<i64>) -> bool {
        let forward: Vec<_> = items.iter().map(ToValue::to_value).collect();
        let mut backward = forward.clone();
        backward.reverse();
        normalize(&Value::Set(forward)) == normalize(&Value::Set(backward))
    }

    #[quickcheck_macros::quickcheck]
    fn test_distinct_strings_quickcheck(a: String, b: String) -> bool {
        (a == b) == (normalize(&(a.as_str(),)) == normalize(&(b.as_str(),)))
    }
}
