//! Validated primitive types shared across the clinic workspace.
//!
//! These wrappers guarantee their invariants once constructed, so services and stores can
//! accept them without re-checking.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The input is not a plausible email address
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// The input is trimmed of leading and trailing whitespace. If the trimmed
    /// result is empty, an error is returned.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Like [`NonEmptyText::new`] but maps blank input to `None` instead of an error.
    pub fn optional(input: Option<impl AsRef<str>>) -> Option<Self> {
        input.and_then(|s| Self::new(s).ok())
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// An email address normalised to lowercase.
///
/// Validation is deliberately shallow: one `@`, a non-empty local part, and a domain
/// containing a dot with no empty labels. Patients are matched by this normalised form, so
/// `Jane@Example.com` and `jane@example.com` refer to the same patient.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }

        let normalised = trimmed.to_ascii_lowercase();
        let invalid = || TextError::InvalidEmail(trimmed.to_owned());

        let (local, domain) = normalised.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.contains('@') || normalised.contains(char::is_whitespace) {
            return Err(invalid());
        }
        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return Err(invalid());
        }

        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for EmailAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for EmailAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EmailAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  Jane  ").expect("should accept padded text");
        assert_eq!(text.as_str(), "Jane");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new(" \t ").unwrap_err(), TextError::Empty);
    }

    #[test]
    fn optional_drops_blank_values() {
        assert_eq!(NonEmptyText::optional(Some("   ")), None);
        assert_eq!(NonEmptyText::optional(None::<&str>), None);
        assert_eq!(
            NonEmptyText::optional(Some(" x ")).map(NonEmptyText::into_inner),
            Some("x".to_string())
        );
    }

    #[test]
    fn email_is_lowercased() {
        let email = EmailAddress::parse(" Jane.Doe@Example.COM ").expect("valid email");
        assert_eq!(email.as_str(), "jane.doe@example.com");
    }

    #[test]
    fn email_rejects_malformed_values() {
        for bad in ["plainaddress", "@example.com", "a@b", "a@@b.com", "a b@c.com", "a@b..com"] {
            assert!(
                matches!(EmailAddress::parse(bad), Err(TextError::InvalidEmail(_))),
                "{bad} should be rejected"
            );
        }
        assert_eq!(EmailAddress::parse("").unwrap_err(), TextError::Empty);
    }

    #[test]
    fn email_deserialises_through_validation() {
        let ok: EmailAddress = serde_json::from_str("\"A@B.CO\"").expect("valid");
        assert_eq!(ok.as_str(), "a@b.co");
        assert!(serde_json::from_str::<EmailAddress>("\"nope\"").is_err());
    }
}
