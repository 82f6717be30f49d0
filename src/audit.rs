//! Audit Trails
//!
//! Two concerns share this module: the signing session's own append-only
//! audit log (first-class engine data, queried when building the audit
//! certificate page), and the system-wide audit sink the engines write
//! operation records to (consumed capability, persistence elsewhere).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Result;

/// Events recorded against a signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningEvent {
    Created,
    Sent,
    Viewed,
    FieldFilled,
    Signed,
    Declined,
    Cancelled,
    Expired,
    Completed,
    ReminderSent,
}

impl SigningEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::FieldFilled => "field_filled",
            Self::Signed => "signed",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Completed => "completed",
            Self::ReminderSent => "reminder_sent",
        }
    }
}

impl FromStr for SigningEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "sent" => Ok(Self::Sent),
            "viewed" => Ok(Self::Viewed),
            "field_filled" => Ok(Self::FieldFilled),
            "signed" => Ok(Self::Signed),
            "declined" => Ok(Self::Declined),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "completed" => Ok(Self::Completed),
            "reminder_sent" => Ok(Self::ReminderSent),
            _ => Err(format!("Unknown signing event: {}", s)),
        }
    }
}

impl TryFrom<String> for SigningEvent {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Network metadata of the acting party, when known. External signers act
/// over the token surface; their address/agent go on the audit row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NetworkMeta {
    pub fn new(ip: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip.into()),
            user_agent: Some(agent.into()),
        }
    }
}

/// Append-only audit row for one signing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct SigningAuditLog {
    pub log_id: Uuid,
    pub session_id: Uuid,
    pub signer_id: Option<Uuid>,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub event: SigningEvent,
    pub details: serde_json::Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SigningAuditLog {
    pub fn new(session_id: Uuid, event: SigningEvent, details: serde_json::Value) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            session_id,
            signer_id: None,
            event,
            details,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_signer(mut self, signer_id: Uuid) -> Self {
        self.signer_id = Some(signer_id);
        self
    }

    pub fn with_network(mut self, meta: &NetworkMeta) -> Self {
        self.ip_address = meta.ip_address.clone();
        self.user_agent = meta.user_agent.clone();
        self
    }
}

/// One record for the system-wide audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Dotted event name, e.g. `workflow_stage.approve`.
    pub event: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub details: serde_json::Value,
    pub actor_email: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        event: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Uuid,
    ) -> Self {
        Self {
            event: event.into(),
            resource_type: resource_type.into(),
            resource_id,
            details: serde_json::Value::Null,
            actor_email: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn by(mut self, actor_email: impl Into<String>) -> Self {
        self.actor_email = Some(actor_email.into());
        self
    }
}

/// Consumed capability: append-only system audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

/// Drops records; for embedders that wire auditing elsewhere, and tests.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn append(&self, _record: AuditRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_event_round_trip() {
        for event in [
            SigningEvent::Created,
            SigningEvent::Sent,
            SigningEvent::Viewed,
            SigningEvent::FieldFilled,
            SigningEvent::Signed,
            SigningEvent::Declined,
            SigningEvent::Cancelled,
            SigningEvent::Expired,
            SigningEvent::Completed,
            SigningEvent::ReminderSent,
        ] {
            assert_eq!(event.as_str().parse::<SigningEvent>(), Ok(event));
        }
    }

    #[test]
    fn audit_log_builder() {
        let session_id = Uuid::new_v4();
        let signer_id = Uuid::new_v4();
        let log = SigningAuditLog::new(session_id, SigningEvent::Sent, serde_json::json!({}))
            .for_signer(signer_id)
            .with_network(&NetworkMeta::new("10.0.0.1", "curl/8"));

        assert_eq!(log.signer_id, Some(signer_id));
        assert_eq!(log.ip_address.as_deref(), Some("10.0.0.1"));
    }
}
