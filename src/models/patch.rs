//! Helpers for partial-update ("patch") payloads.
//!
//! A nullable column is patched through `Option<Option<T>>`: the outer option
//! says whether the field was sent at all, the inner one whether it is null.

use serde::{Deserialize, Deserializer};

/// Deserializes a present field (including an explicit `null`) as `Some(..)`.
/// Pair with `#[serde(default)]` so an absent field stays `None`.
pub fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Rejects blank strings in a patched field.
pub fn non_blank(field: &str, value: &Option<String>) -> crate::error::CoreResult<()> {
    match value {
        Some(v) if v.trim().is_empty() => Err(crate::error::CoreError::validation(format!(
            "{} must not be empty",
            field
        ))),
        _ => Ok(()),
    }
}
