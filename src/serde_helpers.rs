//! Serde helpers for the loosely typed webcast JSON API.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A `serde_as` type that deserializes strings or integers as `String`.
///
/// Webcast ids overflow JavaScript numbers, so the API sends them as strings in some places
/// and as integers in others. Use with `#[serde_as(as = "Option<StringFromAny>")]`.
pub struct StringFromAny;

impl<'de> serde_with::DeserializeAs<'de, String> for StringFromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<String, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{self, Visitor};

        struct StringOrNumberVisitor;

        impl Visitor<'_> for StringOrNumberVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(v.to_owned())
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                Ok(v.to_string())
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(v.to_string())
            }
        }

        deserializer.deserialize_any(StringOrNumberVisitor)
    }
}

impl serde_with::SerializeAs<String> for StringFromAny {
    fn serialize_as<S>(source: &String, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(source)
    }
}

/// Deserializes `value`, logging the path of every field the target type ignores.
///
/// Webcast responses carry far more fields than the client models, so unknown fields are
/// reported at `debug` level. A failure is logged with the exact path that could not be
/// deserialized before the error is returned.
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    let original = tracing::enabled!(tracing::Level::ERROR).then(|| value.to_string());
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        let Some(json) = original.as_deref() else {
            return;
        };
        let jd = &mut serde_json::Deserializer::from_str(json);
        if let Err(path_err) = serde_path_to_error::deserialize::<_, T>(jd) {
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %path_err.path(),
                error = %path_err.inner(),
                "deserialization failed"
            );
        }
    })?;

    if !unknown_paths.is_empty() {
        tracing::debug!(
            type_name = %type_name::<T>(),
            fields = ?unknown_paths,
            "unknown fields in webcast response"
        );
    }

    Ok(result)
}
