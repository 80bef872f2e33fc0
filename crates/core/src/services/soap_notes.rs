//! SOAP note service.

use super::{Actor, SharedStore};
use crate::constants::APPROVE_SOAP_NOTES_PERMISSION;
use crate::models::patient::parse_patient_id;
use crate::models::{NewSoapNote, SoapNote, SoapNoteUpdate};
use crate::{ClinicError, ClinicResult};
use chrono::Utc;
use uuid::Uuid;

#[derive(Clone)]
pub struct SoapNoteService {
    store: SharedStore,
}

impl SoapNoteService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        patient_id: &str,
        author: &Actor,
        new: NewSoapNote,
    ) -> ClinicResult<SoapNote> {
        new.validate()?;
        let patient_id = parse_patient_id(patient_id)?;
        let note = self
            .store
            .insert_soap_note(&patient_id, &author.subject, new)
            .await?;
        tracing::info!(note_id = %note.id, %patient_id, ai_generated = note.ai_generated, "SOAP note created");
        Ok(note)
    }

    pub async fn get(&self, id: Uuid) -> ClinicResult<SoapNote> {
        self.store
            .get_soap_note(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("SOAP note", id))
    }

    pub async fn list_for_patient(&self, patient_id: &str) -> ClinicResult<Vec<SoapNote>> {
        let patient_id = parse_patient_id(patient_id)?;
        if self.store.get_patient(&patient_id).await?.is_none() {
            return Err(ClinicError::not_found("patient", patient_id));
        }
        self.store.list_soap_notes(&patient_id).await
    }

    pub async fn update(&self, id: Uuid, update: SoapNoteUpdate) -> ClinicResult<SoapNote> {
        let mut note = self.get(id).await?;
        note.edit(update)?;
        self.store.save_soap_note(&note).await
    }

    pub async fn submit(&self, id: Uuid) -> ClinicResult<SoapNote> {
        let mut note = self.get(id).await?;
        note.submit()?;
        let note = self.store.save_soap_note(&note).await?;
        tracing::info!(note_id = %note.id, "SOAP note submitted for approval");
        Ok(note)
    }

    /// Approve a pending note. Requires the `approve:soap_notes` permission.
    pub async fn approve(&self, id: Uuid, reviewer: &Actor) -> ClinicResult<SoapNote> {
        ensure_can_review(reviewer)?;
        let mut note = self.get(id).await?;
        note.approve(&reviewer.subject, Utc::now())?;
        let note = self.store.save_soap_note(&note).await?;
        tracing::info!(note_id = %note.id, reviewer = %reviewer.subject, "SOAP note approved");
        Ok(note)
    }

    pub async fn reject(&self, id: Uuid, reviewer: &Actor, reason: &str) -> ClinicResult<SoapNote> {
        ensure_can_review(reviewer)?;
        let mut note = self.get(id).await?;
        note.reject(&reviewer.subject, reason)?;
        let note = self.store.save_soap_note(&note).await?;
        tracing::info!(note_id = %note.id, reviewer = %reviewer.subject, "SOAP note rejected");
        Ok(note)
    }
}

fn ensure_can_review(reviewer: &Actor) -> ClinicResult<()> {
    if reviewer.has_permission(APPROVE_SOAP_NOTES_PERMISSION) {
        Ok(())
    } else {
        Err(ClinicError::Forbidden(format!(
            "{APPROVE_SOAP_NOTES_PERMISSION} permission required"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPatient, SoapNoteStatus};
    use crate::store::{ClinicStore, MemoryStore};
    use clinic_types::EmailAddress;
    use std::sync::Arc;

    async fn setup() -> (SoapNoteService, String) {
        let store = Arc::new(MemoryStore::new());
        let patient = store
            .insert_patient(NewPatient::with_email(
                EmailAddress::parse("soap@example.com").unwrap(),
            ))
            .await
            .unwrap();
        (SoapNoteService::new(store), patient.patient_id)
    }

    fn scribe() -> Actor {
        Actor::new("auth0|scribe", vec![])
    }

    fn doctor() -> Actor {
        Actor::new("auth0|doctor", vec![APPROVE_SOAP_NOTES_PERMISSION.to_string()])
    }

    fn note() -> NewSoapNote {
        NewSoapNote {
            subjective: "Nausea in the first week".into(),
            plan: "Hold dose at 0.25mg".into(),
            ai_generated: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn approval_requires_permission() {
        let (svc, patient_id) = setup().await;
        let created = svc.create(&patient_id, &scribe(), note()).await.unwrap();
        assert_eq!(created.created_by, "auth0|scribe");
        svc.submit(created.id).await.unwrap();

        assert!(matches!(
            svc.approve(created.id, &scribe()).await,
            Err(ClinicError::Forbidden(_))
        ));
        let approved = svc.approve(created.id, &doctor()).await.unwrap();
        assert_eq!(approved.status, SoapNoteStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("auth0|doctor"));

        assert!(matches!(
            svc.update(created.id, SoapNoteUpdate::default()).await,
            Err(ClinicError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn rejected_note_can_be_revised_and_resubmitted() {
        let (svc, patient_id) = setup().await;
        let n = svc.create(&patient_id, &scribe(), note()).await.unwrap();
        svc.submit(n.id).await.unwrap();
        let rejected = svc.reject(n.id, &doctor(), "Add vitals").await.unwrap();
        assert_eq!(rejected.status, SoapNoteStatus::Rejected);

        let revised = svc
            .update(
                n.id,
                SoapNoteUpdate {
                    objective: Some("BP 118/76".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(revised.status, SoapNoteStatus::Draft);
        assert_eq!(svc.submit(n.id).await.unwrap().status, SoapNoteStatus::PendingApproval);
    }

    #[tokio::test]
    async fn notes_are_scoped_to_existing_patients() {
        let (svc, patient_id) = setup().await;
        svc.create(&patient_id, &scribe(), note()).await.unwrap();
        assert_eq!(svc.list_for_patient(&patient_id).await.unwrap().len(), 1);
        assert!(matches!(
            svc.list_for_patient("P0404").await,
            Err(ClinicError::NotFound { .. })
        ));
        assert!(matches!(
            svc.create("P0404", &scribe(), note()).await,
            Err(ClinicError::NotFound { .. })
        ));
        assert!(matches!(
            svc.create(&patient_id, &scribe(), NewSoapNote::default()).await,
            Err(ClinicError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn edit_racing_an_approval_cannot_reopen_the_note() {
        let store = Arc::new(MemoryStore::new());
        let patient = store
            .insert_patient(NewPatient::with_email(
                EmailAddress::parse("race@example.com").unwrap(),
            ))
            .await
            .unwrap();
        let svc = SoapNoteService::new(store.clone());
        let created = svc.create(&patient.patient_id, &scribe(), note()).await.unwrap();

        let mut stale = svc.get(created.id).await.unwrap();
        svc.submit(created.id).await.unwrap();
        svc.approve(created.id, &doctor()).await.unwrap();

        stale
            .edit(SoapNoteUpdate {
                plan: Some("Double the dose".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            store.save_soap_note(&stale).await,
            Err(ClinicError::StaleWrite { .. })
        ));
        let stored = svc.get(created.id).await.unwrap();
        assert_eq!(stored.status, SoapNoteStatus::Approved);
        assert_eq!(stored.plan, "Hold dose at 0.25mg");
    }

    #[tokio::test]
    async fn revising_a_rejected_note_clears_the_reviewer() {
        let (svc, patient_id) = setup().await;
        let n = svc.create(&patient_id, &scribe(), note()).await.unwrap();
        svc.submit(n.id).await.unwrap();
        svc.reject(n.id, &doctor(), "Add vitals").await.unwrap();
        let revised = svc
            .update(
                n.id,
                SoapNoteUpdate {
                    objective: Some("BP 118/76".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(revised.approved_by, None);
        assert_eq!(revised.rejection_reason, None);
    }
}
