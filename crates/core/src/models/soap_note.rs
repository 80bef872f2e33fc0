//! SOAP notes and their approval workflow.
//!
//! ```text
//! draft --submit--> pending_approval --approve--> approved (immutable)
//!                                    --reject---> rejected --edit--> draft
//! ```

use crate::{ClinicError, ClinicResult};
use chrono::{DateTime, Utc};
use clinic_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SoapNoteStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
}

impl SoapNoteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SoapNoteStatus::Draft => "draft",
            SoapNoteStatus::PendingApproval => "pending_approval",
            SoapNoteStatus::Approved => "approved",
            SoapNoteStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SoapNoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoapNoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SoapNoteStatus::Draft),
            "pending_approval" => Ok(SoapNoteStatus::PendingApproval),
            "approved" => Ok(SoapNoteStatus::Approved),
            "rejected" => Ok(SoapNoteStatus::Rejected),
            other => Err(format!("unknown SOAP note status: {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SoapNote {
    pub id: Uuid,
    pub patient_id: String,
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
    /// Whether the first draft was produced by an AI scribe.
    pub ai_generated: bool,
    pub status: SoapNoteStatus,
    pub created_by: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct NewSoapNote {
    #[serde(default)]
    pub subjective: String,
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub assessment: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub ai_generated: bool,
}

impl NewSoapNote {
    pub fn validate(&self) -> ClinicResult<()> {
        let sections = [&self.subjective, &self.objective, &self.assessment, &self.plan];
        if sections.iter().all(|s| s.trim().is_empty()) {
            return Err(ClinicError::InvalidInput(
                "a SOAP note needs at least one non-empty section".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct SoapNoteUpdate {
    pub subjective: Option<String>,
    pub objective: Option<String>,
    pub assessment: Option<String>,
    pub plan: Option<String>,
}

impl SoapNote {
    fn ensure_status(&self, allowed: &[SoapNoteStatus], action: &str) -> ClinicResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(ClinicError::Conflict(format!(
                "cannot {action} SOAP note {} in status {}",
                self.id, self.status
            )))
        }
    }

    /// Edit sections. A rejected note returns to draft; approved notes cannot be edited.
    ///
    /// `updated_at` is left alone: it is the version the store checks when saving.
    pub fn edit(&mut self, update: SoapNoteUpdate) -> ClinicResult<()> {
        self.ensure_status(
            &[SoapNoteStatus::Draft, SoapNoteStatus::Rejected],
            "edit",
        )?;

        if let Some(s) = update.subjective {
            self.subjective = s;
        }
        if let Some(o) = update.objective {
            self.objective = o;
        }
        if let Some(a) = update.assessment {
            self.assessment = a;
        }
        if let Some(p) = update.plan {
            self.plan = p;
        }
        if self.status == SoapNoteStatus::Rejected {
            self.status = SoapNoteStatus::Draft;
            self.approved_by = None;
            self.rejection_reason = None;
        }
        Ok(())
    }

    pub fn submit(&mut self) -> ClinicResult<()> {
        self.ensure_status(&[SoapNoteStatus::Draft], "submit")?;
        self.status = SoapNoteStatus::PendingApproval;
        Ok(())
    }

    pub fn approve(&mut self, approver: &str, now: DateTime<Utc>) -> ClinicResult<()> {
        self.ensure_status(&[SoapNoteStatus::PendingApproval], "approve")?;
        self.status = SoapNoteStatus::Approved;
        self.approved_by = Some(approver.to_string());
        self.approved_at = Some(now);
        Ok(())
    }

    /// Send a pending note back to its author. The reviewer is kept in `approved_by` until the
    /// note is edited.
    pub fn reject(&mut self, reviewer: &str, reason: &str) -> ClinicResult<()> {
        self.ensure_status(&[SoapNoteStatus::PendingApproval], "reject")?;
        let reason = NonEmptyText::new(reason)?;
        self.status = SoapNoteStatus::Rejected;
        self.approved_by = Some(reviewer.to_string());
        self.approved_at = None;
        self.rejection_reason = Some(reason.into_inner());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> SoapNote {
        let now = Utc::now();
        SoapNote {
            id: Uuid::new_v4(),
            patient_id: "P0001".into(),
            subjective: "Reports reduced appetite".into(),
            objective: "Weight 182 lb".into(),
            assessment: "Responding to therapy".into(),
            plan: "Continue current dose".into(),
            ai_generated: true,
            status: SoapNoteStatus::Draft,
            created_by: "auth0|scribe".into(),
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn full_approval_flow() {
        let mut n = note();
        n.submit().unwrap();
        assert_eq!(n.status, SoapNoteStatus::PendingApproval);
        n.approve("auth0|dr-smith", Utc::now()).unwrap();
        assert_eq!(n.status, SoapNoteStatus::Approved);
        assert_eq!(n.approved_by.as_deref(), Some("auth0|dr-smith"));
        assert!(n.approved_at.is_some());
    }

    #[test]
    fn approved_notes_are_immutable() {
        let mut n = note();
        n.submit().unwrap();
        n.approve("dr", Utc::now()).unwrap();
        let err = n
            .edit(SoapNoteUpdate {
                plan: Some("Change".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));
        assert_eq!(n.plan, "Continue current dose");
    }

    #[test]
    fn editing_a_rejected_note_returns_it_to_draft() {
        let mut n = note();
        let read_at = n.updated_at;
        n.submit().unwrap();
        n.reject("dr", "  Missing vitals ").unwrap();
        assert_eq!(n.rejection_reason.as_deref(), Some("Missing vitals"));
        assert_eq!(n.approved_by.as_deref(), Some("dr"));

        n.edit(SoapNoteUpdate {
            objective: Some("Weight 182 lb, BP 120/80".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(n.status, SoapNoteStatus::Draft);
        assert_eq!(n.rejection_reason, None);
        assert_eq!(n.approved_by, None);
        assert_eq!(n.updated_at, read_at);
    }

    #[test]
    fn cannot_approve_a_draft() {
        let mut n = note();
        assert!(n.approve("dr", Utc::now()).is_err());
        assert!(n.reject("dr", "x").is_err());
    }

    #[test]
    fn rejection_needs_a_reason() {
        let mut n = note();
        n.submit().unwrap();
        assert!(matches!(
            n.reject("dr", "  "),
            Err(ClinicError::Text(clinic_types::TextError::Empty))
        ));
        assert_eq!(n.status, SoapNoteStatus::PendingApproval);
    }

    #[test]
    fn empty_new_note_is_invalid() {
        assert!(NewSoapNote::default().validate().is_err());
        assert!(NewSoapNote {
            plan: "Follow up in 4 weeks".into(),
            ..Default::default()
        }
        .validate()
        .is_ok());
    }
}
