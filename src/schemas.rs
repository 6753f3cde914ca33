use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub type EventId = String;
pub type ParticipantId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Finished => "finished",
        }
    }
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "pending",
            ConfirmationStatus::Confirmed => "confirmed",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ConfirmationStatus::Pending => ConfirmationStatus::Confirmed,
            ConfirmationStatus::Confirmed => ConfirmationStatus::Pending,
        }
    }
}

/// `createdAt` is stored as epoch milliseconds so that insertion order sorts
/// numerically in storage.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    /// Sequential number shown to organizers, starting at 1.
    pub number: i64,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub status: EventStatus,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_key: Option<String>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParticipant {
    pub id: String,
    pub event_id: EventId,
    pub participant_id: ParticipantId,
    pub status: ConfirmationStatus,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

// Money the participant put towards the event, not money they owe
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub id: String,
    pub event_id: EventId,
    pub participant_id: ParticipantId,
    pub amount: f64,
    pub description: String,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewEvent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EventPatch {
    pub title: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParticipant {
    pub name: String,
    #[serde(default)]
    pub contact_key: Option<String>,
}

/// A blank `contactKey` clears the stored key, an absent one leaves it alone.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact_key: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewCost {
    pub amount: f64,
    pub description: String,
}

fn required_text(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be blank")));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl NewEvent {
    pub fn validated(self) -> Result<Self, ApiError> {
        Ok(NewEvent {
            title: required_text(&self.title, "title")?,
            description: self.description.trim().to_string(),
            date: self.date,
        })
    }
}

impl EventPatch {
    pub fn validated(self) -> Result<Self, ApiError> {
        Ok(EventPatch {
            title: required_text(&self.title, "title")?,
        })
    }
}

impl NewParticipant {
    pub fn validated(self) -> Result<Self, ApiError> {
        Ok(NewParticipant {
            name: required_text(&self.name, "name")?,
            contact_key: optional_text(self.contact_key.as_deref()),
        })
    }
}

impl ParticipantPatch {
    /// Returns the trimmed name and the contact key update: `None` keeps the
    /// current key, `Some(None)` removes it.
    pub fn validated(self) -> Result<(Option<String>, Option<Option<String>>), ApiError> {
        let name = match self.name {
            Some(name) => Some(required_text(&name, "name")?),
            None => None,
        };
        let contact_key = self.contact_key.map(|key| optional_text(Some(&key)));
        if name.is_none() && contact_key.is_none() {
            return Err(ApiError::BadRequest("nothing to update".into()));
        }
        Ok((name, contact_key))
    }
}

impl NewCost {
    pub fn validated(self) -> Result<Self, ApiError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(ApiError::BadRequest(format!(
                "amount must be a positive number, got {}",
                self.amount
            )));
        }
        Ok(NewCost {
            amount: self.amount,
            description: required_text(&self.description, "description")?,
        })
    }
}
