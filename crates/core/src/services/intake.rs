//! HeyFlow intake: qualification and patient upsert.

use super::patients::transition_or_warn;
use super::SharedStore;
use crate::constants::MINIMUM_PATIENT_AGE;
use crate::models::{Address, NewPatient, Patient, StatusEvent};
use crate::ClinicResult;
use chrono::NaiveDate;
use clinic_types::EmailAddress;
use providers::{IntakeAddress, IntakeSubmission};

/// Outcome of assessing an intake form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntakeAssessment {
    Qualified,
    Disqualified,
    /// Not enough information; the patient stays where they are.
    Undetermined,
}

impl IntakeAssessment {
    fn event(self) -> Option<StatusEvent> {
        match self {
            IntakeAssessment::Qualified => Some(StatusEvent::IntakeQualified),
            IntakeAssessment::Disqualified => Some(StatusEvent::IntakeDisqualified),
            IntakeAssessment::Undetermined => None,
        }
    }
}

/// Body mass index from imperial measurements: `703 * lb / in^2`.
pub fn bmi(height_inches: f64, weight_lbs: f64) -> Option<f64> {
    (height_inches > 0.0 && weight_lbs > 0.0)
        .then(|| 703.0 * weight_lbs / (height_inches * height_inches))
}

/// Decide whether a submission qualifies.
///
/// In order: under-age applicants are disqualified, an explicit answer on the form wins, then
/// BMI against `bmi_threshold`.
pub fn assess_intake(
    submission: &IntakeSubmission,
    today: NaiveDate,
    bmi_threshold: f64,
) -> IntakeAssessment {
    let age = submission
        .date_of_birth
        .and_then(|dob| today.years_since(dob));
    if age.is_some_and(|age| age < MINIMUM_PATIENT_AGE) {
        return IntakeAssessment::Disqualified;
    }

    match submission.qualified {
        Some(true) => return IntakeAssessment::Qualified,
        Some(false) => return IntakeAssessment::Disqualified,
        None => {}
    }

    match submission
        .height_inches
        .zip(submission.weight_lbs)
        .and_then(|(h, w)| bmi(h, w))
    {
        Some(value) if value >= bmi_threshold => IntakeAssessment::Qualified,
        Some(_) => IntakeAssessment::Disqualified,
        None => IntakeAssessment::Undetermined,
    }
}

fn address_from(intake: &IntakeAddress) -> Address {
    Address {
        line1: intake.line1.clone(),
        line2: intake.line2.clone(),
        city: intake.city.clone(),
        state: intake.state.clone(),
        postal_code: intake.postal_code.clone(),
        country: intake.country.clone(),
    }
}

fn overlay(dst: &mut Option<String>, src: &Option<String>) {
    if let Some(value) = src.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *dst = Some(value.to_string());
    }
}

/// Create or update the patient behind a submission and apply the assessment.
pub(crate) async fn apply_intake(
    store: &SharedStore,
    submission: &IntakeSubmission,
    assessment: IntakeAssessment,
) -> ClinicResult<Patient> {
    let email = EmailAddress::parse(&submission.email)?;
    let intake = submission.answers_json();

    let mut patient = match store.find_patient_by_email(&email).await? {
        Some(mut existing) => {
            overlay(&mut existing.first_name, &submission.first_name);
            overlay(&mut existing.last_name, &submission.last_name);
            overlay(&mut existing.phone, &submission.phone);
            overlay(&mut existing.gender, &submission.gender);
            if submission.date_of_birth.is_some() {
                existing.date_of_birth = submission.date_of_birth;
            }
            existing.address.merge_from(&address_from(&submission.address));
            existing.intake = Some(intake);
            existing
        }
        None => {
            let mut new = NewPatient::with_email(email);
            overlay(&mut new.first_name, &submission.first_name);
            overlay(&mut new.last_name, &submission.last_name);
            overlay(&mut new.phone, &submission.phone);
            overlay(&mut new.gender, &submission.gender);
            new.date_of_birth = submission.date_of_birth;
            new.address.merge_from(&address_from(&submission.address));
            new.intake = Some(intake);

            let created = store.insert_patient(new).await?;
            tracing::info!(patient_id = %created.patient_id, "patient created from intake");
            created
        }
    };

    if let Some(event) = assessment.event() {
        transition_or_warn(&mut patient, event);
    }
    store.save_patient(&patient).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(value: serde_json::Value) -> IntakeSubmission {
        IntakeSubmission::from_json(&value).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn bmi_uses_imperial_formula() {
        let value = bmi(66.0, 180.0).unwrap();
        assert!((value - 29.05).abs() < 0.01, "got {value}");
        assert_eq!(bmi(0.0, 180.0), None);
    }

    #[test]
    fn qualifies_on_bmi_threshold() {
        let heavy = submission(json!({"email": "a@b.co", "height": "66", "weight": "180"}));
        assert_eq!(assess_intake(&heavy, today(), 27.0), IntakeAssessment::Qualified);

        let light = submission(json!({"email": "a@b.co", "height": "70", "weight": "150"}));
        assert_eq!(assess_intake(&light, today(), 27.0), IntakeAssessment::Disqualified);
    }

    #[test]
    fn explicit_answer_overrides_bmi() {
        let s = submission(json!({
            "email": "a@b.co", "height": "70", "weight": "150", "qualified": "yes"
        }));
        assert_eq!(assess_intake(&s, today(), 27.0), IntakeAssessment::Qualified);
    }

    #[test]
    fn minors_are_disqualified() {
        let s = submission(json!({
            "email": "a@b.co", "dob": "2010-01-01", "qualified": "yes"
        }));
        assert_eq!(assess_intake(&s, today(), 27.0), IntakeAssessment::Disqualified);
    }

    #[test]
    fn missing_measurements_are_undetermined() {
        let s = submission(json!({"email": "a@b.co", "weight": "210"}));
        assert_eq!(assess_intake(&s, today(), 27.0), IntakeAssessment::Undetermined);
    }
}
