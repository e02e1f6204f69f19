use chrono::{DateTime, Duration, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Editorial overrides attached to a product (title, image, price text, ...).
pub type Overrides = serde_json::Map<String, serde_json::Value>;

/// External catalog identifier of a renewable product (e.g. an ASIN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Validate)]
#[serde(transparent)]
pub struct ProductKey(#[garde(length(min = 1, max = 64), custom(ascii_alphanumeric))] String);

fn ascii_alphanumeric(value: &str, _context: &()) -> garde::Result {
    if value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(garde::Error::new("not ascii alphanumeric"))
    }
}

impl ProductKey {
    /// Parse and validate a key; surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self, InvalidProductKey> {
        let key = Self(raw.trim().to_string());
        key.validate()
            .map_err(|report| InvalidProductKey {
                key: raw.to_string(),
                reason: report.to_string(),
            })?;
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid product key {key:?}: {reason}")]
pub struct InvalidProductKey {
    pub key: String,
    pub reason: String,
}

/// Product data as returned by the product source. Only `overrides` is
/// interpreted; everything else is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Overrides>,

    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Renewal bookkeeping for one known product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub key: ProductKey,
    /// `None` means never renewed (or reset).
    pub last_renewed_at: Option<DateTime<Utc>>,
}

impl FreshnessRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        is_stale_at(self.last_renewed_at, now, ttl)
    }
}

/// A product is stale when it was never renewed or its age reached `ttl`.
pub fn is_stale_at(last_renewed_at: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match last_renewed_at {
        None => true,
        Some(renewed) => now.signed_duration_since(renewed) >= ttl,
    }
}
