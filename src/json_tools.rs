use onlyerror::Error;
use serde_json::Value;
use std::{fmt::Display, str::FromStr};

#[derive(Error, Debug)]
pub enum Error {
    /// Error converting JSON Value to str
    #[error("Object key `{0}` was expected to be type `{1}`")]
    UnexpectedJsonType(String, ExpectedType),

    /// Missing object key
    #[error("Object key `{0}` does not exist")]
    JsonMissingElement(String),

    /// Invalid number in JSON
    #[error("Invalid number in JSON for key `{0}`. expected `{1}`")]
    InvalidNumber(String, ExpectedInt),

    /// Expected a JSON string
    ExpectedJsonStr,

    /// Error with key operations
    Key(#[from] crate::key::Error),

    /// DID Encoding error
    DidEncoding(#[from] crate::identifier::Error),

    /// Verification Error
    Verification(#[from] crate::verification::Error),

    /// Document service endpoints error
    Service(#[from] crate::service::Error),

    /// Document beacon endpoints error
    Beacon(#[from] crate::beacon::Error),

    /// This should not happen: Only needed to satisfy `String: FromStr` trait bound
    Infallible(#[from] std::convert::Infallible),
}

#[derive(Debug)]
pub enum ExpectedType {
    Number,
    String,
    Boolean,
    Array,
    Object,
}

impl Display for ExpectedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedType::Number => write!(f, "Number"),
            ExpectedType::String => write!(f, "String"),
            ExpectedType::Boolean => write!(f, "Boolean"),
            ExpectedType::Array => write!(f, "Array"),
            ExpectedType::Object => write!(f, "Object"),
        }
    }
}

#[derive(Debug)]
pub enum ExpectedInt {
    U32,
    U64,
}

impl Display for ExpectedInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedInt::U32 => write!(f, "u32"),
            ExpectedInt::U64 => write!(f, "u64"),
        }
    }
}

pub(crate) trait ExpectedIntExt: TryFrom<u64> {
    fn from_num() -> ExpectedInt;
}

macro_rules! expected_int_ext {
    ($in:ty, $out:ident) => {
        impl ExpectedIntExt for $in {
            fn from_num() -> ExpectedInt {
                ExpectedInt::$out
            }
        }
    };
}

expected_int_ext!(u32, U32);
expected_int_ext!(u64, U64);

/// Returns value[key] as a str if it is a JSON string.
pub(crate) fn string_from_object<'value>(
    value: &'value Value,
    key: &str,
) -> Result<&'value str, Error> {
    optional_string_from_object(value, key)
        .map(|maybe_str| maybe_str.ok_or_else(|| Error::JsonMissingElement(key.into())))?
}

/// Returns value[key] as a str if it is a JSON string, or `None` if the key is missing.
pub(crate) fn optional_string_from_object<'value>(
    value: &'value Value,
    key: &str,
) -> Result<Option<&'value str>, Error> {
    let obj = &value[key];

    if obj.is_null() {
        Ok(None)
    } else {
        obj.as_str()
            .map(Option::Some)
            .ok_or_else(|| Error::UnexpectedJsonType(key.into(), ExpectedType::String))
    }
}

/// Returns value[key] as an unsigned int if it is a JSON number that fits in `T`.
pub(crate) fn uint_from_object<T: ExpectedIntExt>(value: &Value, key: &str) -> Result<T, Error> {
    let obj = &value[key];

    if obj.is_null() {
        return Err(Error::JsonMissingElement(key.into()));
    }

    let int = obj
        .as_u64()
        .ok_or_else(|| Error::UnexpectedJsonType(key.into(), ExpectedType::Number))?;

    T::try_from(int).map_err(|_| Error::InvalidNumber(key.into(), T::from_num()))
}

/// Returns value[key] as a bool if it is a JSON boolean, or `None` if the key is missing.
pub(crate) fn optional_bool_from_object(value: &Value, key: &str) -> Result<Option<bool>, Error> {
    let obj = &value[key];

    if obj.is_null() {
        Ok(None)
    } else {
        obj.as_bool()
            .map(Option::Some)
            .ok_or_else(|| Error::UnexpectedJsonType(key.into(), ExpectedType::Boolean))
    }
}

/// Create a vector of any type from `value[key]` using a map function.
pub(crate) fn vec_from_object<T, F>(value: &Value, key: &str, map_fn: F) -> Result<Vec<T>, Error>
where
    F: Fn(&Value) -> Result<T, Error>,
{
    let obj = &value[key];

    if obj.is_null() {
        Ok(Vec::new())
    } else {
        obj.as_array()
            .ok_or_else(|| Error::UnexpectedJsonType(key.into(), ExpectedType::Array))?
            .iter()
            .map(map_fn)
            .collect::<Result<Vec<_>, Error>>()
    }
}

/// Returns a string if the JSON value is a string type.
pub(crate) fn string_from_value(value: &Value) -> Result<&str, Error> {
    value.as_str().ok_or(Error::ExpectedJsonStr)
}

/// Create a vector of any type from `value[key]` if it can be parsed from a string.
pub(crate) fn vec_from_value<T>(value: &Value, key: &str) -> Result<Vec<T>, Error>
where
    T: FromStr,
    Error: From<<T as FromStr>::Err>,
{
    vec_from_object(value, key, |v| Ok(string_from_value(v)?.parse()?))
}

/// Returns value[key] as a list of strings. A single string is a list of one.
pub(crate) fn strings_from_object(value: &Value, key: &str) -> Result<Vec<String>, Error> {
    match &value[key] {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Null => Err(Error::JsonMissingElement(key.into())),
        _ => vec_from_object(value, key, |v| string_from_value(v).map(String::from)),
    }
}

/// Replace every occurrence of `from` with `to` in all strings of a JSON tree.
pub(crate) fn find_and_replace(value: &mut Value, from: &str, to: &str) {
    match value {
        Value::String(s) => {
            if s.contains(from) {
                *s = s.replace(from, to);
            }
        }
        Value::Array(array) => {
            for item in array {
                find_and_replace(item, from, to);
            }
        }
        Value::Object(obj) => {
            for (_, value) in obj {
                find_and_replace(value, from, to);
            }
        }
        _ => (),
    }
}
