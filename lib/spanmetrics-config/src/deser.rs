//! Deserialization helpers.
//!
//! Environment variables arrive as plain strings, which `figment` then parses into whatever type looks most likely,
//! so a flag set as `1` arrives as an integer. The helpers here accept those looser forms. They are meant to be used
//! with the `serde_with` crate.

use std::fmt;

use serde::{
    de::{Error, Unexpected, Visitor},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Permissively deserializes a boolean.
///
/// Accepts a native boolean, the strings `"true"` and `"false"` in any case, or the numbers `1` and `0`, whether
/// integral or floating point.
pub struct PermissiveBool;

struct PermissiveBoolVisitor;

impl PermissiveBoolVisitor {
    fn from_number<E: Error>(value: f64, unexpected: Unexpected<'_>) -> Result<bool, E> {
        if value == 0.0 {
            Ok(false)
        } else if value == 1.0 {
            Ok(true)
        } else {
            Err(E::invalid_value(unexpected, &"0 or 1"))
        }
    }
}

impl Visitor<'_> for PermissiveBoolVisitor {
    type Value = bool;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a boolean, a string, or the number 0 or 1")
    }

    fn visit_bool<E: Error>(self, value: bool) -> Result<bool, E> {
        Ok(value)
    }

    fn visit_str<E: Error>(self, value: &str) -> Result<bool, E> {
        if value.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if value.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(E::invalid_value(Unexpected::Str(value), &"\"true\" or \"false\""))
        }
    }

    fn visit_i64<E: Error>(self, value: i64) -> Result<bool, E> {
        Self::from_number(value as f64, Unexpected::Signed(value))
    }

    fn visit_u64<E: Error>(self, value: u64) -> Result<bool, E> {
        Self::from_number(value as f64, Unexpected::Unsigned(value))
    }

    fn visit_f64<E: Error>(self, value: f64) -> Result<bool, E> {
        Self::from_number(value, Unexpected::Float(value))
    }
}

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PermissiveBoolVisitor)
    }
}
