//! Player identifier normalization.
//!
//! Raw identifiers arrive from chat commands with arbitrary case and stray
//! whitespace. [`normalize`] is the only way to turn one into an
//! [`Identifier`], so every stateful component downstream can rely on keys
//! being trimmed, lower-case and restricted to the allowlist.

use crate::error::RejectedError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Maximum length of a normalized identifier, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 32;

/// A normalized player key ("ckey").
///
/// Invariant: the wrapped string is non-empty, at most
/// [`MAX_IDENTIFIER_LEN`] characters, and made only of `a-z`, `0-9`, `_`,
/// `-` and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Returns the normalized key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier and returns the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Identifier {
    type Err = RejectedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

// Persisted keys must already be normal; anything else is treated as corruption.
impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let normalized = normalize(&raw).map_err(serde::de::Error::custom)?;
        if normalized.as_str() != raw {
            return Err(serde::de::Error::custom(format!(
                "identifier {raw:?} is not in normal form"
            )));
        }
        Ok(normalized)
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.')
}

/// Normalizes a raw identifier.
///
/// Trims surrounding whitespace, lower-cases ASCII letters, and validates
/// the result against the allowlist. Pure and thread-safe.
///
/// # Errors
///
/// * [`RejectedError::Empty`] if nothing remains after trimming
/// * [`RejectedError::InvalidCharacters`] carrying the first contiguous run
///   of disallowed characters
/// * [`RejectedError::TooLong`] if the result exceeds [`MAX_IDENTIFIER_LEN`]
///
/// # Example
///
/// ```rust
/// use bridge_core::identifier::normalize;
///
/// let id = normalize("  SomeCkey99 ").unwrap();
/// assert_eq!(id.as_str(), "someckey99");
/// ```
pub fn normalize(raw: &str) -> Result<Identifier, RejectedError> {
    // Non-ASCII must survive to the allowlist check unfolded (U+212A -> 'k').
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return Err(RejectedError::Empty);
    }

    if let Some(start) = lowered.find(|c: char| !is_allowed(c)) {
        let offending: String = lowered[start..]
            .chars()
            .take_while(|c| !is_allowed(*c))
            .collect();
        return Err(RejectedError::InvalidCharacters { offending });
    }

    let len = lowered.chars().count();
    if len > MAX_IDENTIFIER_LEN {
        return Err(RejectedError::TooLong {
            len,
            max: MAX_IDENTIFIER_LEN,
        });
    }

    Ok(Identifier(lowered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_and_lowercases() {
        let id = normalize("  SomeCkey99 ").expect("valid identifier");
        assert_eq!(id.as_str(), "someckey99");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "Joulerk",
            "\tMixed_Case-Name.1 \n",
            "a",
            "UPPER.lower_Under-Dash",
            "  0123456789  ",
        ];
        for raw in samples {
            let once = normalize(raw).expect("sample should be valid");
            let twice = normalize(once.as_str()).expect("normal form should be valid");
            assert_eq!(once, twice, "normalize not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert_eq!(normalize(""), Err(RejectedError::Empty));
        assert_eq!(normalize("   \t\n"), Err(RejectedError::Empty));
    }

    #[test]
    fn test_rejects_disallowed_characters_with_offending_run() {
        let err = normalize("good name").unwrap_err();
        assert_eq!(
            err,
            RejectedError::InvalidCharacters {
                offending: " ".to_string()
            }
        );

        let err = normalize("abc$%^def!").unwrap_err();
        assert_eq!(
            err,
            RejectedError::InvalidCharacters {
                offending: "$%^".to_string()
            }
        );
    }

    #[test]
    fn test_every_disallowed_character_is_rejected() {
        for c in ['/', '\\', '|', ',', ' ', '\0', '@', '#', 'é', 'Ж', '🎲', ':', '+'] {
            let raw = format!("player{c}name");
            match normalize(&raw) {
                Err(RejectedError::InvalidCharacters { offending }) => {
                    assert!(!offending.is_empty());
                }
                other => panic!("expected rejection for {raw:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unicode_case_folding_does_not_produce_ascii() {
        // KELVIN SIGN lower-cases to 'k' under Unicode rules.
        assert_eq!(
            normalize("\u{212A}ey"),
            Err(RejectedError::InvalidCharacters {
                offending: "\u{212A}".to_string()
            })
        );
        // LATIN CAPITAL LETTER I WITH DOT ABOVE
        assert!(matches!(
            normalize("adm\u{0130}n"),
            Err(RejectedError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_length_limit() {
        let ok = "a".repeat(MAX_IDENTIFIER_LEN);
        assert!(normalize(&ok).is_ok());

        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert_eq!(
            normalize(&long),
            Err(RejectedError::TooLong {
                len: MAX_IDENTIFIER_LEN + 1,
                max: MAX_IDENTIFIER_LEN
            })
        );
    }

    #[test]
    fn test_deserialize_requires_normal_form() {
        let id: Identifier = serde_json::from_str("\"player_1\"").expect("normal form");
        assert_eq!(id.as_str(), "player_1");

        assert!(serde_json::from_str::<Identifier>("\"Player_1\"").is_err());
        assert!(serde_json::from_str::<Identifier>("\"bad key\"").is_err());
    }
}
