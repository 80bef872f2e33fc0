//! Patient records.

use crate::constants::{PATIENT_ID_MIN_DIGITS, PATIENT_ID_PREFIX};
use crate::models::status::PatientStatus;
use crate::{ClinicError, ClinicResult};
use chrono::{DateTime, NaiveDate, Utc};
use clinic_types::{EmailAddress, NonEmptyText};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Postal address. Every part is optional because intake forms and Stripe collect different
/// subsets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Address {
    #[serde(default)]
    pub line1: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay the non-empty parts of `other` onto `self`.
    pub fn merge_from(&mut self, other: &Address) {
        fn take(dst: &mut Option<String>, src: &Option<String>) {
            if let Some(v) = src.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                *dst = Some(v.to_string());
            }
        }
        take(&mut self.line1, &other.line1);
        take(&mut self.line2, &other.line2);
        take(&mut self.city, &other.city);
        take(&mut self.state, &other.state);
        take(&mut self.postal_code, &other.postal_code);
        take(&mut self.country, &other.country);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Patient {
    /// Human-readable identifier, e.g. `P0001`.
    pub patient_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[schema(value_type = String)]
    pub email: EmailAddress,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Address,
    pub membership_hashtags: Vec<String>,
    pub stripe_customer_id: Option<String>,
    pub status: PatientStatus,
    /// Most recent intake answers, keyed by normalised question name.
    #[schema(value_type = Option<Object>)]
    pub intake: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(f), Some(l)) => format!("{f} {l}"),
            (Some(n), None) | (None, Some(n)) => n.to_string(),
            (None, None) => self.patient_id.clone(),
        }
    }

    /// Age in whole years on `today`, if the date of birth is known.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.date_of_birth.and_then(|dob| today.years_since(dob))
    }

    /// Apply a partial update. Absent fields are left untouched; blank strings clear the field.
    pub fn apply_update(&mut self, update: PatientUpdate) -> ClinicResult<()> {
        fn set(dst: &mut Option<String>, src: Option<String>) {
            if let Some(v) = src {
                *dst = NonEmptyText::new(v).ok().map(NonEmptyText::into_inner);
            }
        }

        if let Some(email) = update.email {
            self.email = EmailAddress::parse(email)?;
        }
        set(&mut self.first_name, update.first_name);
        set(&mut self.last_name, update.last_name);
        set(&mut self.phone, update.phone);
        set(&mut self.gender, update.gender);
        if let Some(dob) = update.date_of_birth {
            self.date_of_birth = Some(dob);
        }
        if let Some(address) = update.address {
            self.address = address;
        }
        set(&mut self.stripe_customer_id, update.stripe_customer_id);
        Ok(())
    }
}

/// Fields accepted when creating a patient.
#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewPatient {
    #[schema(value_type = String)]
    pub email: EmailAddress,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub membership_hashtags: Vec<String>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub intake: Option<serde_json::Value>,
}

impl NewPatient {
    pub fn with_email(email: EmailAddress) -> Self {
        Self {
            email,
            first_name: None,
            last_name: None,
            phone: None,
            date_of_birth: None,
            gender: None,
            address: Address::default(),
            membership_hashtags: Vec::new(),
            stripe_customer_id: None,
            intake: None,
        }
    }
}

/// Partial update of a patient's demographics.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct PatientUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub address: Option<Address>,
    pub stripe_customer_id: Option<String>,
}

/// Query options for listing patients.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PatientFilter {
    pub status: Option<PatientStatus>,
    pub hashtag: Option<String>,
    /// Case-insensitive match on name, email or patient id.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PatientFilter {
    /// Whether a patient matches the status, hashtag and search criteria (ignores paging).
    pub fn matches(&self, patient: &Patient) -> bool {
        if self.status.is_some_and(|s| s != patient.status) {
            return false;
        }
        if let Some(tag) = &self.hashtag {
            if !patient.membership_hashtags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref().map(str::to_lowercase) {
            let haystacks = [
                Some(patient.patient_id.to_lowercase()),
                Some(patient.email.as_str().to_string()),
                patient.first_name.as_deref().map(str::to_lowercase),
                patient.last_name.as_deref().map(str::to_lowercase),
            ];
            if !haystacks.iter().flatten().any(|h| h.contains(&term)) {
                return false;
            }
        }
        true
    }
}

/// Format a patient id from its sequence number: `1` → `P0001`, `12345` → `P12345`.
pub fn format_patient_id(sequence: i64) -> String {
    format!(
        "{PATIENT_ID_PREFIX}{sequence:0width$}",
        width = PATIENT_ID_MIN_DIGITS
    )
}

/// Validate an externally supplied patient id and return its canonical (uppercase) form.
pub fn parse_patient_id(input: &str) -> ClinicResult<String> {
    let trimmed = input.trim().to_ascii_uppercase();
    let digits = trimmed.strip_prefix(PATIENT_ID_PREFIX).ok_or_else(|| {
        ClinicError::InvalidInput(format!("patient id {input:?} must start with {PATIENT_ID_PREFIX}"))
    })?;
    if digits.len() < PATIENT_ID_MIN_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ClinicError::InvalidInput(format!(
            "patient id {input:?} is not of the form {}",
            format_patient_id(1)
        )));
    }
    Ok(trimmed)
}
