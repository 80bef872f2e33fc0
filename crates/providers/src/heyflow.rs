//! HeyFlow intake submission wire model.
//!
//! HeyFlow delivers form submissions in more than one shape depending on how the flow's
//! webhook block is configured:
//!
//! ```text
//! { "id": "...", "flowID": "...", "fields": { "email": "...", "First Name": "..." } }
//! { "id": "...", "values": [ { "variable": "email", "answer": "..." }, ... ] }
//! { "email": "...", "first_name": "...", ... }
//! ```
//!
//! All shapes are flattened into a single answer map keyed by a normalised field name
//! (lowercase ASCII alphanumerics only, so `first_name`, `firstName` and `First Name` all
//! become `firstname`), and the fields the clinic cares about are looked up by alias.

use crate::{ProviderError, ProviderResult};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const EMAIL_KEYS: &[&str] = &["email", "emailaddress", "youremail"];
const FIRST_NAME_KEYS: &[&str] = &["firstname", "givenname", "fname"];
const LAST_NAME_KEYS: &[&str] = &["lastname", "familyname", "surname", "lname"];
const FULL_NAME_KEYS: &[&str] = &["name", "fullname", "yourname"];
const PHONE_KEYS: &[&str] = &["phone", "phonenumber", "mobile", "mobilephone", "cellphone"];
const DOB_KEYS: &[&str] = &["dateofbirth", "dob", "birthdate", "birthday"];
const GENDER_KEYS: &[&str] = &["gender", "sex", "biologicalsex", "sexassignedatbirth"];
const LINE1_KEYS: &[&str] = &["address", "addressline1", "streetaddress", "street", "address1"];
const LINE2_KEYS: &[&str] = &["addressline2", "apartment", "apt", "suite", "unit", "address2"];
const CITY_KEYS: &[&str] = &["city", "town"];
const STATE_KEYS: &[&str] = &["state", "province", "region"];
const POSTAL_KEYS: &[&str] = &["zip", "zipcode", "postalcode", "postcode"];
const COUNTRY_KEYS: &[&str] = &["country"];
const HEIGHT_KEYS: &[&str] = &["height", "heightinches", "heightin"];
const HEIGHT_FEET_KEYS: &[&str] = &["heightfeet", "heightft"];
const HEIGHT_EXTRA_INCHES_KEYS: &[&str] = &["heightinchesremainder", "heightinch"];
const WEIGHT_KEYS: &[&str] = &["weight", "weightlbs", "currentweight", "weightlb"];
const QUALIFIED_KEYS: &[&str] = &["qualified", "isqualified", "eligible", "qualification"];

const SUBMISSION_ID_KEYS: &[&str] = &["id", "submissionId", "submission_id", "responseId"];
const FLOW_ID_KEYS: &[&str] = &["flowID", "flowId", "flow_id"];

static HEIGHT_FEET_INCHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(\d+)\s*(?:'|ft\.?|feet)\s*(\d+(?:\.\d+)?)?\s*(?:"|''|in\.?|inches)?\s*$"#)
        .expect("height pattern is valid")
});

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+(?:\.\d+)?)").expect("number pattern is valid")
});

/// Structured address as submitted on the form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntakeAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl IntakeAddress {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A parsed HeyFlow submission.
#[derive(Clone, Debug)]
pub struct IntakeSubmission {
    pub submission_id: Option<String>,
    pub flow_id: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: IntakeAddress,
    pub height_inches: Option<f64>,
    pub weight_lbs: Option<f64>,
    /// Explicit qualification answer, when the flow computes one itself.
    pub qualified: Option<bool>,
    /// Every answer, keyed by normalised field name.
    pub answers: BTreeMap<String, String>,
}

impl IntakeSubmission {
    /// Parse a raw HeyFlow webhook body.
    ///
    /// # Errors
    /// Returns `InvalidJson` if the body is not a JSON object and `MissingField("email")` if no
    /// email answer can be found.
    pub fn parse(body: &[u8]) -> ProviderResult<Self> {
        let root: Value = serde_json::from_slice(body)?;
        Self::from_json(&root)
    }

    /// Build a submission from an already decoded body, e.g. one stored for reprocessing.
    pub fn from_json(root: &Value) -> ProviderResult<Self> {
        let Value::Object(root) = root else {
            return Err(ProviderError::InvalidField {
                field: "body",
                reason: "expected a JSON object".into(),
            });
        };

        let answers = collect_answers(root);
        let lookup = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .find_map(|k| answers.get(*k))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let email = lookup(EMAIL_KEYS).ok_or(ProviderError::MissingField("email"))?;

        let (mut first_name, mut last_name) = (lookup(FIRST_NAME_KEYS), lookup(LAST_NAME_KEYS));
        if first_name.is_none() && last_name.is_none() {
            if let Some(full) = lookup(FULL_NAME_KEYS) {
                let (first, last) = split_full_name(&full);
                first_name = first;
                last_name = last;
            }
        }

        let date_of_birth = match lookup(DOB_KEYS) {
            Some(raw) => Some(parse_date(&raw).ok_or_else(|| ProviderError::InvalidField {
                field: "date_of_birth",
                reason: format!("unrecognised date format: {raw}"),
            })?),
            None => None,
        };

        let height_inches = match lookup(HEIGHT_KEYS) {
            Some(raw) => parse_height_inches(&raw),
            None => lookup(HEIGHT_FEET_KEYS).and_then(|feet| {
                let feet = parse_number(&feet)?;
                let inches = lookup(HEIGHT_EXTRA_INCHES_KEYS)
                    .and_then(|i| parse_number(&i))
                    .unwrap_or(0.0);
                Some(feet * 12.0 + inches)
            }),
        };

        Ok(Self {
            submission_id: first_scalar(root, SUBMISSION_ID_KEYS),
            flow_id: first_scalar(root, FLOW_ID_KEYS),
            email,
            first_name,
            last_name,
            phone: lookup(PHONE_KEYS),
            date_of_birth,
            gender: lookup(GENDER_KEYS),
            address: IntakeAddress {
                line1: lookup(LINE1_KEYS),
                line2: lookup(LINE2_KEYS),
                city: lookup(CITY_KEYS),
                state: lookup(STATE_KEYS),
                postal_code: lookup(POSTAL_KEYS),
                country: lookup(COUNTRY_KEYS),
            },
            height_inches,
            weight_lbs: lookup(WEIGHT_KEYS).and_then(|w| parse_number(&w)),
            qualified: lookup(QUALIFIED_KEYS).and_then(|q| parse_yes_no(&q)),
            answers,
        })
    }

    /// Answers as a JSON object, suitable for storing on the patient row.
    pub fn answers_json(&self) -> Value {
        Value::Object(
            self.answers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Stable idempotency key for a delivery: the submission id when HeyFlow sends one, otherwise
/// the SHA-256 of the raw body.
pub fn delivery_key(root: &Value, body: &[u8]) -> String {
    root.as_object()
        .and_then(|map| first_scalar(map, SUBMISSION_ID_KEYS))
        .unwrap_or_else(|| crate::payload_digest(body))
}

/// Lowercase ASCII alphanumerics only.
pub fn normalise_key(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn collect_answers(root: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut answers = BTreeMap::new();

    for (key, value) in root {
        if matches!(key.as_str(), "fields" | "values") {
            continue;
        }
        if let Some(text) = value_text(value) {
            answers.insert(normalise_key(key), text);
        }
    }

    for container in ["fields", "values"] {
        match root.get(container) {
            Some(Value::Object(fields)) => {
                for (key, value) in fields {
                    if let Some(text) = value_text(value) {
                        answers.insert(normalise_key(key), text);
                    }
                }
            }
            Some(Value::Array(entries)) => {
                for entry in entries {
                    let Value::Object(entry) = entry else {
                        continue;
                    };
                    let key = ["variable", "label", "name", "id"]
                        .iter()
                        .find_map(|k| entry.get(*k).and_then(Value::as_str))
                        .filter(|k| !k.trim().is_empty());
                    let value = ["answer", "value", "values"]
                        .iter()
                        .find_map(|k| entry.get(*k))
                        .and_then(value_text);
                    if let (Some(key), Some(value)) = (key, value) {
                        answers.insert(normalise_key(key), value);
                    }
                }
            }
            _ => {}
        }
    }

    answers
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(map) => ["answer", "value", "label"]
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(value_text),
        Value::Null => None,
    }
}

fn first_scalar(root: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| root.get(*k))
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
}

fn split_full_name(full: &str) -> (Option<String>, Option<String>) {
    let mut parts = full.split_whitespace();
    let first = parts.next().map(str::to_string);
    let rest: Vec<&str> = parts.collect();
    let last = (!rest.is_empty()).then(|| rest.join(" "));
    (first, last)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
        .or_else(|| {
            // ISO timestamps, e.g. "1990-04-01T00:00:00.000Z".
            raw.get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        })
}

fn parse_number(raw: &str) -> Option<f64> {
    LEADING_NUMBER
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Height in inches from `66`, `66 in`, `5'6"`, `5 ft 6 in` or `5'`.
fn parse_height_inches(raw: &str) -> Option<f64> {
    if let Some(caps) = HEIGHT_FEET_INCHES.captures(raw) {
        let feet: f64 = caps.get(1)?.as_str().parse().ok()?;
        let inches: f64 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0.0);
        return Some(feet * 12.0 + inches);
    }
    parse_number(raw)
}

fn parse_yes_no(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "qualified" | "eligible" => Some(true),
        "false" | "no" | "n" | "0" | "disqualified" | "not qualified" | "ineligible" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> ProviderResult<IntakeSubmission> {
        IntakeSubmission::parse(&serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn parses_fields_object_shape() {
        let submission = parse(json!({
            "id": "sub_abc",
            "flowID": "weight-loss-intake",
            "fields": {
                "Email": "Jane@Example.com",
                "First Name": "Jane",
                "last_name": "Doe",
                "Date of Birth": "04/01/1990",
                "Height": "5'6\"",
                "Weight": "180 lbs",
                "State": "TX"
            }
        }))
        .expect("should parse");

        assert_eq!(submission.submission_id.as_deref(), Some("sub_abc"));
        assert_eq!(submission.flow_id.as_deref(), Some("weight-loss-intake"));
        assert_eq!(submission.email, "Jane@Example.com");
        assert_eq!(submission.first_name.as_deref(), Some("Jane"));
        assert_eq!(submission.last_name.as_deref(), Some("Doe"));
        assert_eq!(
            submission.date_of_birth,
            NaiveDate::from_ymd_opt(1990, 4, 1)
        );
        assert_eq!(submission.height_inches, Some(66.0));
        assert_eq!(submission.weight_lbs, Some(180.0));
        assert_eq!(submission.address.state.as_deref(), Some("TX"));
    }

    #[test]
    fn parses_values_array_shape() {
        let submission = parse(json!({
            "id": 1234,
            "values": [
                { "variable": "email", "answer": "sam@example.com" },
                { "label": "Full Name", "value": "Sam Q Public" },
                { "variable": "goals", "answer": ["Lose weight", "Sleep better"] },
                { "variable": "qualified", "answer": "Yes" }
            ]
        }))
        .expect("should parse");

        assert_eq!(submission.submission_id.as_deref(), Some("1234"));
        assert_eq!(submission.first_name.as_deref(), Some("Sam"));
        assert_eq!(submission.last_name.as_deref(), Some("Q Public"));
        assert_eq!(submission.qualified, Some(true));
        assert_eq!(
            submission.answers.get("goals").map(String::as_str),
            Some("Lose weight, Sleep better")
        );
    }

    #[test]
    fn parses_flat_shape_with_split_height() {
        let submission = parse(json!({
            "email": "lee@example.com",
            "height_feet": "6",
            "height_inch": 1,
            "weight": 250
        }))
        .expect("should parse");

        assert_eq!(submission.height_inches, Some(73.0));
        assert_eq!(submission.weight_lbs, Some(250.0));
        assert!(submission.address.is_empty());
        assert_eq!(submission.submission_id, None);
    }

    #[test]
    fn missing_email_is_an_error() {
        let err = parse(json!({ "fields": { "First Name": "NoEmail" } })).unwrap_err();
        assert!(matches!(err, ProviderError::MissingField("email")));
    }

    #[test]
    fn invalid_birth_date_is_an_error() {
        let err = parse(json!({ "email": "a@b.co", "dob": "sometime in spring" })).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::InvalidField {
                field: "date_of_birth",
                ..
            }
        ));
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(IntakeSubmission::parse(b"[1,2,3]").is_err());
        assert!(IntakeSubmission::parse(b"not json").is_err());
    }

    #[test]
    fn delivery_key_prefers_submission_id() {
        let body = br#"{"submissionId":"s-9","email":"a@b.co"}"#;
        let root: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(delivery_key(&root, body), "s-9");

        let body = br#"{"email":"a@b.co"}"#;
        let root: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(delivery_key(&root, body), crate::payload_digest(body));
    }

    #[test]
    fn height_formats() {
        assert_eq!(parse_height_inches("66"), Some(66.0));
        assert_eq!(parse_height_inches("5 ft 10 in"), Some(70.0));
        assert_eq!(parse_height_inches("5'"), Some(60.0));
        assert_eq!(parse_height_inches("tall"), None);
    }

    #[test]
    fn keys_normalise_consistently() {
        assert_eq!(normalise_key("First Name"), "firstname");
        assert_eq!(normalise_key("first_name"), "firstname");
        assert_eq!(normalise_key("firstName"), "firstname");
    }
}
