//! Patient service.

use super::SharedStore;
use crate::models::hashtag::{add_hashtag, remove_hashtag};
use crate::models::patient::parse_patient_id;
use crate::models::{
    MembershipHashtag, NewPatient, Patient, PatientFilter, PatientStatus, PatientUpdate,
    StatusEvent, TransitionError,
};
use crate::{ClinicError, ClinicResult};
use clinic_types::NonEmptyText;

/// Apply `event` to `patient` in place. Returns whether the status changed.
pub fn transition(patient: &mut Patient, event: StatusEvent) -> Result<bool, TransitionError> {
    let next = patient.status.apply(event)?;
    if next == patient.status {
        return Ok(false);
    }
    tracing::info!(
        patient_id = %patient.patient_id,
        from = %patient.status,
        to = %next,
        %event,
        "patient status changed"
    );
    patient.status = next;
    Ok(true)
}

/// Like [`transition`], but an illegal transition is logged and leaves the patient unchanged.
///
/// Used by webhook processing, where redelivering the event would not make it legal.
pub(crate) fn transition_or_warn(patient: &mut Patient, event: StatusEvent) -> bool {
    match transition(patient, event) {
        Ok(changed) => changed,
        Err(err) => {
            tracing::warn!(patient_id = %patient.patient_id, "ignoring status event: {err}");
            false
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    NonEmptyText::optional(value).map(NonEmptyText::into_inner)
}

/// Patient records, status and hashtags.
#[derive(Clone)]
pub struct PatientService {
    store: SharedStore,
}

impl PatientService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Create a patient in `pending` status.
    ///
    /// # Errors
    /// `InvalidInput` for an invalid hashtag, `Conflict` when the email or Stripe customer is
    /// already on file.
    pub async fn create(&self, new: NewPatient) -> ClinicResult<Patient> {
        let mut membership_hashtags = Vec::new();
        for raw in &new.membership_hashtags {
            add_hashtag(&mut membership_hashtags, &MembershipHashtag::parse(raw)?);
        }

        let new = NewPatient {
            first_name: trimmed(new.first_name),
            last_name: trimmed(new.last_name),
            phone: trimmed(new.phone),
            gender: trimmed(new.gender),
            stripe_customer_id: trimmed(new.stripe_customer_id),
            membership_hashtags,
            ..new
        };

        let patient = self.store.insert_patient(new).await?;
        tracing::info!(patient_id = %patient.patient_id, "patient created");
        Ok(patient)
    }

    /// Fetch a patient by id (`P0001`, case-insensitive).
    pub async fn get(&self, patient_id: &str) -> ClinicResult<Patient> {
        let patient_id = parse_patient_id(patient_id)?;
        self.store
            .get_patient(&patient_id)
            .await?
            .ok_or_else(|| ClinicError::not_found("patient", patient_id))
    }

    pub async fn list(&self, mut filter: PatientFilter) -> ClinicResult<Vec<Patient>> {
        if let Some(tag) = filter.hashtag.take() {
            filter.hashtag = Some(MembershipHashtag::parse(&tag)?.into());
        }
        filter.search = trimmed(filter.search);
        self.store.list_patients(&filter).await
    }

    pub async fn update(&self, patient_id: &str, update: PatientUpdate) -> ClinicResult<Patient> {
        let mut patient = self.get(patient_id).await?;
        patient.apply_update(update)?;
        let patient = self.store.save_patient(&patient).await?;
        tracing::info!(patient_id = %patient.patient_id, "patient updated");
        Ok(patient)
    }

    /// Delete a patient with no invoices or SOAP notes.
    pub async fn delete(&self, patient_id: &str) -> ClinicResult<()> {
        let patient_id = parse_patient_id(patient_id)?;
        if !self.store.delete_patient(&patient_id).await? {
            return Err(ClinicError::not_found("patient", patient_id));
        }
        tracing::info!(%patient_id, "patient deleted");
        Ok(())
    }

    /// Admin override: set any status regardless of the transition rules.
    pub async fn set_status(
        &self,
        patient_id: &str,
        status: PatientStatus,
        actor: &str,
    ) -> ClinicResult<Patient> {
        let mut patient = self.get(patient_id).await?;
        let previous = patient.status;
        if previous == status {
            return Ok(patient);
        }
        patient.status = status;
        let patient = self.store.save_patient(&patient).await?;
        tracing::info!(
            patient_id = %patient.patient_id,
            from = %previous,
            to = %status,
            actor,
            "patient status overridden"
        );
        Ok(patient)
    }

    /// Apply an automated status event.
    ///
    /// # Errors
    /// `InvalidTransition` when the event is not valid from the current status; the patient is
    /// left unchanged.
    pub async fn apply_event(&self, patient_id: &str, event: StatusEvent) -> ClinicResult<Patient> {
        let mut patient = self.get(patient_id).await?;
        match transition(&mut patient, event) {
            Ok(true) => self.store.save_patient(&patient).await,
            Ok(false) => Ok(patient),
            Err(err) => {
                tracing::warn!(patient_id = %patient.patient_id, "rejected status event: {err}");
                Err(err.into())
            }
        }
    }

    pub async fn add_hashtag(&self, patient_id: &str, tag: &str) -> ClinicResult<Patient> {
        let tag = MembershipHashtag::parse(tag)?;
        let mut patient = self.get(patient_id).await?;
        if !add_hashtag(&mut patient.membership_hashtags, &tag) {
            return Ok(patient);
        }
        tracing::info!(patient_id = %patient.patient_id, %tag, "hashtag added");
        self.store.save_patient(&patient).await
    }

    pub async fn remove_hashtag(&self, patient_id: &str, tag: &str) -> ClinicResult<Patient> {
        let tag = MembershipHashtag::parse(tag)?;
        let mut patient = self.get(patient_id).await?;
        if !remove_hashtag(&mut patient.membership_hashtags, &tag) {
            return Ok(patient);
        }
        tracing::info!(patient_id = %patient.patient_id, %tag, "hashtag removed");
        self.store.save_patient(&patient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use clinic_types::EmailAddress;
    use std::sync::Arc;

    fn service() -> PatientService {
        PatientService::new(Arc::new(MemoryStore::new()))
    }

    fn new_patient(email: &str) -> NewPatient {
        NewPatient::with_email(EmailAddress::parse(email).unwrap())
    }

    #[tokio::test]
    async fn create_normalises_hashtags_and_names() {
        let svc = service();
        let mut new = new_patient("jane@example.com");
        new.first_name = Some("  Jane ".into());
        new.last_name = Some(" ".into());
        new.membership_hashtags = vec!["VIP".into(), "#vip".into(), "Referral".into()];

        let patient = svc.create(new).await.unwrap();
        assert_eq!(patient.first_name.as_deref(), Some("Jane"));
        assert_eq!(patient.last_name, None);
        assert_eq!(patient.membership_hashtags, vec!["#vip", "#referral"]);
        assert_eq!(patient.status, PatientStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_invalid_hashtag() {
        let svc = service();
        let mut new = new_patient("jane@example.com");
        new.membership_hashtags = vec!["Active Member".into()];
        assert!(matches!(
            svc.create(new).await,
            Err(ClinicError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn get_accepts_lowercase_ids_and_reports_missing() {
        let svc = service();
        let created = svc.create(new_patient("a@example.com")).await.unwrap();
        assert_eq!(svc.get("p0001").await.unwrap().patient_id, created.patient_id);
        assert!(matches!(
            svc.get("P0999").await,
            Err(ClinicError::NotFound { .. })
        ));
        assert!(matches!(
            svc.get("nonsense").await,
            Err(ClinicError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn apply_event_follows_state_machine() {
        let svc = service();
        let p = svc.create(new_patient("a@example.com")).await.unwrap();

        let p = svc
            .apply_event(&p.patient_id, StatusEvent::IntakeQualified)
            .await
            .unwrap();
        assert_eq!(p.status, PatientStatus::Qualified);

        let p = svc
            .apply_event(&p.patient_id, StatusEvent::PaymentReceived)
            .await
            .unwrap();
        assert_eq!(p.status, PatientStatus::Client);

        let err = svc
            .apply_event(&p.patient_id, StatusEvent::IntakeDisqualified)
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::InvalidTransition(_)));
        assert_eq!(
            svc.get(&p.patient_id).await.unwrap().status,
            PatientStatus::Client,
            "illegal transition must leave the patient unchanged"
        );
    }

    #[tokio::test]
    async fn set_status_overrides_rules() {
        let svc = service();
        let p = svc.create(new_patient("a@example.com")).await.unwrap();
        let p = svc
            .set_status(&p.patient_id, PatientStatus::Inactive, "auth0|admin")
            .await
            .unwrap();
        assert_eq!(p.status, PatientStatus::Inactive);
    }

    #[tokio::test]
    async fn hashtags_have_set_semantics() {
        let svc = service();
        let p = svc.create(new_patient("a@example.com")).await.unwrap();

        svc.add_hashtag(&p.patient_id, "ActiveMember").await.unwrap();
        let p = svc.add_hashtag(&p.patient_id, "#activemember").await.unwrap();
        assert_eq!(p.membership_hashtags, vec!["#activemember"]);

        let tagged = svc
            .list(PatientFilter {
                hashtag: Some("ACTIVEMEMBER".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);

        let p = svc.remove_hashtag(&p.patient_id, "activemember").await.unwrap();
        assert!(p.membership_hashtags.is_empty());
    }

    #[tokio::test]
    async fn update_and_delete() {
        let svc = service();
        let p = svc.create(new_patient("a@example.com")).await.unwrap();
        let p = svc
            .update(
                &p.patient_id,
                PatientUpdate {
                    last_name: Some("Doe".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(p.last_name.as_deref(), Some("Doe"));

        svc.delete(&p.patient_id).await.unwrap();
        assert!(matches!(
            svc.delete(&p.patient_id).await,
            Err(ClinicError::NotFound { .. })
        ));
    }
}
