// ── Device identifier ──
//
// DeviceId is the store key of a bracelet record. Ids are assigned by the
// operator, so they are validated once at the edge and trusted afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Characters the database refuses in keys.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '$', '#', '[', ']', '/'];

/// Longest key the database accepts, in bytes.
const MAX_KEY_BYTES: usize = 768;

/// Identifier of one bracelet, usable as a store key.
///
/// Non-empty, free of surrounding whitespace, control characters and
/// `. $ # [ ] /`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(CoreError::validation("id", "device id is required"));
        }
        if trimmed.len() > MAX_KEY_BYTES {
            return Err(CoreError::validation(
                "id",
                format!("device id is longer than {MAX_KEY_BYTES} bytes"),
            ));
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_control())
        {
            return Err(CoreError::validation(
                "id",
                format!("device id may not contain {c:?}"),
            ));
        }

        if trimmed.len() == raw.len() {
            Ok(Self(raw))
        } else {
            Ok(Self(trimmed.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for DeviceId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for DeviceId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        assert_eq!(DeviceId::new("B1").unwrap().as_str(), "B1");
        assert_eq!(DeviceId::new("pulsera-01_a").unwrap(), "pulsera-01_a");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(DeviceId::new("  B1 ").unwrap(), "B1");
    }

    #[test]
    fn rejects_empty_and_blank() {
        assert!(matches!(
            DeviceId::new(""),
            Err(CoreError::Validation { ref field, .. }) if field == "id"
        ));
        assert!(DeviceId::new("   ").is_err());
    }

    #[test]
    fn rejects_key_unsafe_characters() {
        for bad in ["a.b", "a$b", "a#b", "a[b", "a]b", "a/b", "a\nb"] {
            assert!(DeviceId::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn deserialize_validates() {
        let ok: DeviceId = serde_json::from_str("\"B2\"").unwrap();
        assert_eq!(ok, "B2");
        assert!(serde_json::from_str::<DeviceId>("\"a/b\"").is_err());
    }
}
