//! Patient status state machine.
//!
//! Every automated change to a patient's status goes through [`PatientStatus::apply`]. The only
//! other way to change status is an explicit admin override (`PatientService::set_status`).
//!
//! ```text
//! pending       --intake qualifies-->     qualified
//! pending       --intake disqualifies-->  disqualified
//! disqualified  --intake qualifies-->     qualified
//! pending       --payment received-->     client
//! qualified     --payment received-->     client
//! inactive      --payment received-->     client
//! client        --subscription ended-->   inactive
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    /// Known to the clinic (intake started or Stripe customer) but not yet assessed.
    Pending,
    /// Intake assessed as eligible for treatment.
    Qualified,
    /// Intake assessed as ineligible.
    Disqualified,
    /// Paying member.
    Client,
    /// Former client whose subscription has ended.
    Inactive,
}

/// Events that drive automated status changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    IntakeQualified,
    IntakeDisqualified,
    PaymentReceived,
    SubscriptionEnded,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusEvent::IntakeQualified => "intake qualified",
            StatusEvent::IntakeDisqualified => "intake disqualified",
            StatusEvent::PaymentReceived => "payment received",
            StatusEvent::SubscriptionEnded => "subscription ended",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply '{event}' to a patient in status '{from}'")]
pub struct TransitionError {
    pub from: PatientStatus,
    pub event: StatusEvent,
}

impl PatientStatus {
    pub const ALL: [PatientStatus; 5] = [
        PatientStatus::Pending,
        PatientStatus::Qualified,
        PatientStatus::Disqualified,
        PatientStatus::Client,
        PatientStatus::Inactive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PatientStatus::Pending => "pending",
            PatientStatus::Qualified => "qualified",
            PatientStatus::Disqualified => "disqualified",
            PatientStatus::Client => "client",
            PatientStatus::Inactive => "inactive",
        }
    }

    /// Compute the status after `event`.
    ///
    /// Returns the current status unchanged when the event is already reflected (a payment for
    /// an existing client), and `TransitionError` when the event is not valid from here.
    pub fn apply(self, event: StatusEvent) -> Result<PatientStatus, TransitionError> {
        use PatientStatus::*;
        use StatusEvent::*;

        let next = match (self, event) {
            (Pending | Disqualified | Qualified, IntakeQualified) => Qualified,
            (Pending | Disqualified, IntakeDisqualified) => Disqualified,
            (Pending | Qualified | Inactive | Client, PaymentReceived) => Client,
            (Client | Inactive, SubscriptionEnded) => Inactive,
            (from, event) => return Err(TransitionError { from, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatientStatus {
    type Err = String;

    /// Parses canonical values and the free-text variants found in older data.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "lead" | "new" => Ok(PatientStatus::Pending),
            "qualified" => Ok(PatientStatus::Qualified),
            "disqualified" | "not_qualified" | "not qualified" => Ok(PatientStatus::Disqualified),
            "client" | "active" | "member" => Ok(PatientStatus::Client),
            "inactive" | "cancelled" | "canceled" => Ok(PatientStatus::Inactive),
            other => Err(format!("unknown patient status: {other:?}")),
        }
    }
}
