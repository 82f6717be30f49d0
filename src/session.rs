//! Signing Session State
//!
//! The multi-party e-signature transaction for one contract document:
//! session, signers with their bearer-token credentials, and the positioned
//! fields each signer fills.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Sessions lapse 30 days after creation unless completed or cancelled.
pub const SESSION_EXPIRY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningOrder {
    /// One signer at a time, by `signing_order` index.
    Sequential,
    /// Everyone is invited at once; completion waits for all.
    Parallel,
}

impl SigningOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl FromStr for SigningOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            _ => Err(format!("Unknown signing order: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerStatus {
    Pending,
    Sent,
    Viewed,
    Signed,
    Declined,
}

impl SignerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Viewed => "viewed",
            Self::Signed => "signed",
            Self::Declined => "declined",
        }
    }

    /// Still owes a signature (drives sequential advancement).
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::Sent | Self::Viewed)
    }
}

impl FromStr for SignerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "viewed" => Ok(Self::Viewed),
            "signed" => Ok(Self::Signed),
            "declined" => Ok(Self::Declined),
            _ => Err(format!("Unknown signer status: {}", s)),
        }
    }
}

impl TryFrom<String> for SignerStatus {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    Internal,
    External,
}

impl SignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Signature,
    Initials,
    Text,
    Date,
    Checkbox,
    Dropdown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Initials => "initials",
            Self::Text => "text",
            Self::Date => "date",
            Self::Checkbox => "checkbox",
            Self::Dropdown => "dropdown",
        }
    }

    /// Field kinds rendered from the signer's signature artifact rather
    /// than a typed value.
    pub fn is_signature_like(&self) -> bool {
        matches!(self, Self::Signature | Self::Initials)
    }
}

/// The multi-party signature transaction for one contract document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct SigningSession {
    pub session_id: Uuid,
    pub contract_id: Uuid,
    pub initiated_by: Uuid,
    /// Denormalized for completion/decline notices.
    pub initiator_email: String,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub signing_order: SigningOrder,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub status: SessionStatus,
    /// SHA-256 of the source document at session creation; compared against
    /// the sealed output to detect tampering in between.
    pub document_hash: String,
    pub final_document_hash: Option<String>,
    pub final_storage_path: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SigningSession {
    pub fn new(
        contract_id: Uuid,
        initiated_by: Uuid,
        initiator_email: impl Into<String>,
        signing_order: SigningOrder,
        document_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            contract_id,
            initiated_by,
            initiator_email: initiator_email.into(),
            signing_order,
            status: SessionStatus::Active,
            document_hash,
            final_document_hash: None,
            final_storage_path: None,
            expires_at: now + Duration::days(SESSION_EXPIRY_DAYS),
            completed_at: None,
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_lapsed(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

impl TryFrom<String> for SigningOrder {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// Caller-supplied description of one signer at session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerSpec {
    pub name: String,
    pub email: String,
    pub kind: SignerKind,
}

impl SignerSpec {
    pub fn external(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            kind: SignerKind::External,
        }
    }

    pub fn internal(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            kind: SignerKind::Internal,
        }
    }
}

/// One party to a signing session. The bearer token is stored only as a
/// SHA-256 digest; the raw value surfaces exactly once at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct SessionSigner {
    pub signer_id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub email: String,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub kind: SignerKind,
    /// Position in the sequential order (0-based, stable).
    pub signing_order: i32,
    /// Hex SHA-256 digest of the bearer token. Never the raw token.
    #[serde(skip_serializing, default)]
    pub token_digest: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub status: SignerStatus,
    pub signature_path: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl SessionSigner {
    pub fn new(session_id: Uuid, spec: &SignerSpec, signing_order: i32) -> Self {
        Self {
            signer_id: Uuid::new_v4(),
            session_id,
            name: spec.name.clone(),
            email: spec.email.clone(),
            kind: spec.kind,
            signing_order,
            token_digest: None,
            token_expires_at: None,
            status: SignerStatus::Pending,
            signature_path: None,
            ip_address: None,
            user_agent: None,
            sent_at: None,
            viewed_at: None,
            signed_at: None,
        }
    }

    pub fn token_expired(&self) -> bool {
        self.token_expires_at
            .map(|t| t < Utc::now())
            .unwrap_or(false)
    }
}

impl TryFrom<String> for SignerKind {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            _ => Err(format!("Unknown signer kind: {}", s)),
        }
    }
}

/// Positioned input assigned to one signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct SigningField {
    pub field_id: Uuid,
    pub session_id: Uuid,
    pub signer_id: Uuid,
    #[cfg_attr(feature = "database", sqlx(try_from = "String"))]
    pub field_type: FieldType,
    pub page_number: i32,
    pub x_position: f64,
    pub y_position: f64,
    pub width: f64,
    pub height: f64,
    pub is_required: bool,
    pub value: Option<String>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl SigningField {
    pub fn new(
        session_id: Uuid,
        signer_id: Uuid,
        field_type: FieldType,
        page_number: i32,
        x_position: f64,
        y_position: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            field_id: Uuid::new_v4(),
            session_id,
            signer_id,
            field_type,
            page_number,
            x_position,
            y_position,
            width,
            height,
            is_required: true,
            value: None,
            filled_at: None,
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "signature" => Ok(Self::Signature),
            "initials" => Ok(Self::Initials),
            "text" => Ok(Self::Text),
            "date" => Ok(Self::Date),
            "checkbox" => Ok(Self::Checkbox),
            "dropdown" => Ok(Self::Dropdown),
            _ => Err(format!("Unknown field type: {}", s)),
        }
    }
}

/// A caller-supplied field value at signature capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_id: Uuid,
    pub value: Option<String>,
}
