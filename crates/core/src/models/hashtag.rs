//! Membership hashtags.
//!
//! Hashtags are free-form segmentation labels stored on the patient row. They are normalised
//! on the way in so that `ActiveMember`, `#activemember` and `#ACTIVEMEMBER` are one tag.

use crate::constants::MAX_HASHTAG_LEN;
use crate::{ClinicError, ClinicResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MembershipHashtag(String);

impl MembershipHashtag {
    /// Normalise and validate a hashtag.
    ///
    /// Accepts input with or without the leading `#`. The body must be 1 to 64 ASCII
    /// alphanumerics, `_` or `-`; it is lowercased.
    pub fn parse(input: &str) -> ClinicResult<Self> {
        let body = input.trim();
        let body = body.strip_prefix('#').unwrap_or(body);

        if body.is_empty() {
            return Err(ClinicError::InvalidInput("hashtag cannot be empty".into()));
        }
        if body.len() > MAX_HASHTAG_LEN {
            return Err(ClinicError::InvalidInput(format!(
                "hashtag exceeds maximum length of {MAX_HASHTAG_LEN} characters"
            )));
        }
        if !body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'))
        {
            return Err(ClinicError::InvalidInput(format!(
                "hashtag {input:?} contains invalid characters (only alphanumeric, '_', '-' allowed)"
            )));
        }

        Ok(Self(format!("#{}", body.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MembershipHashtag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MembershipHashtag {
    type Error = ClinicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MembershipHashtag> for String {
    fn from(tag: MembershipHashtag) -> Self {
        tag.0
    }
}

/// Add `tag` to `tags` if absent, preserving order. Returns whether the set changed.
pub fn add_hashtag(tags: &mut Vec<String>, tag: &MembershipHashtag) -> bool {
    if tags.iter().any(|t| t == tag.as_str()) {
        return false;
    }
    tags.push(tag.as_str().to_string());
    true
}

/// Remove `tag` from `tags`. Returns whether the set changed.
pub fn remove_hashtag(tags: &mut Vec<String>, tag: &MembershipHashtag) -> bool {
    let before = tags.len();
    tags.retain(|t| t != tag.as_str());
    tags.len() != before
}

/// Normalise a stored tag list, dropping invalid entries and duplicates.
pub fn normalise_hashtags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = Vec::new();
    for raw in tags {
        match MembershipHashtag::parse(raw.as_ref()) {
            Ok(tag) => {
                add_hashtag(&mut out, &tag);
            }
            Err(_) => tracing::debug!("dropping invalid hashtag {:?}", raw.as_ref()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_case_and_prefix() {
        assert_eq!(
            MembershipHashtag::parse("ActiveMember").unwrap().as_str(),
            "#activemember"
        );
        assert_eq!(
            MembershipHashtag::parse(" #VIP_2026 ").unwrap().as_str(),
            "#vip_2026"
        );
    }

    #[test]
    fn parse_rejects_invalid_tags() {
        for bad in ["", "#", "Active Member", "émigré", "a/b"] {
            assert!(MembershipHashtag::parse(bad).is_err(), "{bad:?} should fail");
        }
        assert!(MembershipHashtag::parse(&"x".repeat(MAX_HASHTAG_LEN + 1)).is_err());
        assert!(MembershipHashtag::parse(&"x".repeat(MAX_HASHTAG_LEN)).is_ok());
    }

    #[test]
    fn add_and_remove_have_set_semantics() {
        let tag = MembershipHashtag::parse("activemember").unwrap();
        let mut tags = vec!["#new".to_string()];

        assert!(add_hashtag(&mut tags, &tag));
        assert!(!add_hashtag(&mut tags, &tag));
        assert_eq!(tags, vec!["#new", "#activemember"]);

        assert!(remove_hashtag(&mut tags, &tag));
        assert!(!remove_hashtag(&mut tags, &tag));
        assert_eq!(tags, vec!["#new"]);
    }

    #[test]
    fn normalise_drops_duplicates_and_garbage() {
        let tags = normalise_hashtags(["#A", "a", "bad tag", "#b"]);
        assert_eq!(tags, vec!["#a", "#b"]);
    }

    #[test]
    fn deserialises_through_validation() {
        let tag: MembershipHashtag = serde_json::from_str("\"Promo\"").unwrap();
        assert_eq!(tag.as_str(), "#promo");
        assert!(serde_json::from_str::<MembershipHashtag>("\"no spaces\"").is_err());
    }
}
