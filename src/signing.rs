//! Signing Session Engine
//!
//! The sign/decline/finalize protocol. External signers act over a bearer
//! token surface, so every inbound value here is untrusted: tokens are
//! looked up by digest with constant-time comparison, signature payloads
//! are sniffed before storage, and no operation ever touches another
//! session's state.

use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{NetworkMeta, SigningAuditLog, SigningEvent};
use crate::blob_store::BlobStore;
use crate::error::{EngineError, Result};
use crate::notify::Notifier;
use crate::render::{AuditCertificate, CertificateEntry, DocumentRenderer, FieldOverlay, SignatureOverlay};
use crate::session::{
    FieldValue, SessionSigner, SessionStatus, SignerSpec, SignerStatus, SigningOrder,
    SigningSession,
};
use crate::state::Actor;
use crate::store::LifecycleStore;
use crate::token::{self, TOKEN_EXPIRY_DAYS};

pub struct SigningEngine {
    store: Arc<dyn LifecycleStore>,
    blobs: Arc<dyn BlobStore>,
    renderer: Arc<dyn DocumentRenderer>,
    notifier: Arc<dyn Notifier>,
}

impl SigningEngine {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        blobs: Arc<dyn BlobStore>,
        renderer: Arc<dyn DocumentRenderer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            blobs,
            renderer,
            notifier,
        }
    }

    /// Create an active session with a stable signer order and a content
    /// fingerprint of the source document (compared against the sealed
    /// output at finalization to detect tampering in between).
    pub async fn create_session(
        &self,
        contract_id: Uuid,
        signer_specs: &[SignerSpec],
        order: SigningOrder,
        initiator: &Actor,
        meta: &NetworkMeta,
    ) -> Result<SigningSession> {
        if signer_specs.is_empty() {
            return Err(EngineError::InvalidInput(
                "signing session needs at least one signer".to_string(),
            ));
        }

        let contract = self
            .store
            .load_contract(contract_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("contract {}", contract_id)))?;
        let storage_path = contract.storage_path.as_deref().ok_or_else(|| {
            EngineError::InvalidInput(format!("contract {} has no source document", contract_id))
        })?;

        let source = self.blobs.fetch(storage_path).await?;
        let document_hash = self.renderer.hash(&source);

        let session = SigningSession::new(
            contract_id,
            initiator.user_id,
            initiator.email.clone(),
            order,
            document_hash,
        );
        self.store.save_session(&session).await?;

        for (index, spec) in signer_specs.iter().enumerate() {
            let signer = SessionSigner::new(session.session_id, spec, index as i32);
            self.store.save_signer(&signer).await?;
        }

        self.store
            .append_signing_audit(
                &SigningAuditLog::new(
                    session.session_id,
                    SigningEvent::Created,
                    serde_json::json!({
                        "signing_order": order.as_str(),
                        "signer_count": signer_specs.len(),
                        "initiated_by": initiator.email,
                    }),
                )
                .with_network(meta),
            )
            .await?;

        tracing::info!(
            session_id = %session.session_id,
            contract_id = %contract_id,
            signers = signer_specs.len(),
            order = order.as_str(),
            "signing session created"
        );

        Ok(session)
    }

    /// Issue a fresh bearer token and hand it to the notifier. The raw
    /// token is returned exactly once; only its digest is persisted.
    pub async fn send_to_signer(&self, signer_id: Uuid, meta: &NetworkMeta) -> Result<String> {
        let mut signer = self.load_signer(signer_id).await?;
        self.active_session(signer.session_id).await?;

        match signer.status {
            SignerStatus::Signed => return Err(EngineError::AlreadySigned),
            SignerStatus::Declined => return Err(EngineError::SessionInactive),
            SignerStatus::Pending | SignerStatus::Sent | SignerStatus::Viewed => {}
        }

        let raw = self
            .issue_token(&mut signer, SigningEvent::Sent, meta)
            .await?;
        Ok(raw)
    }

    /// Re-issue a signer's link with a fresh token. Rotation invalidates
    /// any previously delivered link for this signer.
    pub async fn send_reminder(&self, signer_id: Uuid, meta: &NetworkMeta) -> Result<String> {
        let mut signer = self.load_signer(signer_id).await?;
        self.active_session(signer.session_id).await?;

        match signer.status {
            SignerStatus::Signed => return Err(EngineError::AlreadySigned),
            SignerStatus::Declined => return Err(EngineError::SessionInactive),
            SignerStatus::Pending | SignerStatus::Sent | SignerStatus::Viewed => {}
        }

        let raw = self
            .issue_token(&mut signer, SigningEvent::ReminderSent, meta)
            .await?;
        Ok(raw)
    }

    /// Resolve a presented token to its signer. Stamps the first view.
    pub async fn validate_token(&self, raw: &str, meta: &NetworkMeta) -> Result<SessionSigner> {
        let digest = token::digest(raw);
        let mut signer = self
            .store
            .find_signer_by_token_digest(&digest)
            .await?
            .ok_or(EngineError::InvalidToken)?;

        if signer.token_expired() {
            return Err(EngineError::TokenExpired);
        }

        // Session state outranks signer state: once a session is cancelled,
        // completed or expired, every token of that session is dead.
        self.active_session(signer.session_id).await?;

        match signer.status {
            SignerStatus::Signed => return Err(EngineError::AlreadySigned),
            SignerStatus::Declined => return Err(EngineError::SessionInactive),
            SignerStatus::Pending | SignerStatus::Sent | SignerStatus::Viewed => {}
        }

        if signer.viewed_at.is_none() {
            signer.viewed_at = Some(chrono::Utc::now());
            signer.status = SignerStatus::Viewed;
            self.store.save_signer(&signer).await?;

            self.store
                .append_signing_audit(
                    &SigningAuditLog::new(
                        signer.session_id,
                        SigningEvent::Viewed,
                        serde_json::json!({ "signer_name": signer.name }),
                    )
                    .for_signer(signer.signer_id)
                    .with_network(meta),
                )
                .await?;
        }

        Ok(signer)
    }

    /// Capture a signature and the signer's field values. At most once per
    /// signer.
    pub async fn capture_signature(
        &self,
        signer_id: Uuid,
        field_values: &[FieldValue],
        signature_image: &[u8],
        meta: &NetworkMeta,
    ) -> Result<()> {
        let mut signer = self.load_signer(signer_id).await?;
        self.active_session(signer.session_id).await?;

        match signer.status {
            SignerStatus::Sent | SignerStatus::Viewed => {}
            SignerStatus::Signed => return Err(EngineError::AlreadySigned),
            // A pending signer never received a token; nothing legitimate
            // reaches this path.
            SignerStatus::Pending => return Err(EngineError::InvalidToken),
            SignerStatus::Declined => return Err(EngineError::SessionInactive),
        }

        check_signature_image(signature_image)?;

        let key = format!("signing/{}/{}.png", signer.session_id, signer.signer_id);
        let blob_ref = self.blobs.store(&key, signature_image, "image/png").await?;

        let assigned = self.store.list_fields_for_signer(signer.signer_id).await?;
        let mut filled = 0usize;
        for value in field_values {
            if let Some(mut field) = assigned
                .iter()
                .find(|f| f.field_id == value.field_id)
                .cloned()
            {
                field.value = value.value.clone();
                field.filled_at = Some(chrono::Utc::now());
                self.store.save_field(&field).await?;
                filled += 1;
            }
        }

        let now = chrono::Utc::now();
        signer.signature_path = Some(blob_ref);
        signer.ip_address = meta.ip_address.clone();
        signer.user_agent = meta.user_agent.clone();
        signer.status = SignerStatus::Signed;
        signer.signed_at = Some(now);
        self.store.save_signer(&signer).await?;

        self.store
            .append_signing_audit(
                &SigningAuditLog::new(
                    signer.session_id,
                    SigningEvent::Signed,
                    serde_json::json!({
                        "signer_name": signer.name,
                        "fields_filled": filled,
                    }),
                )
                .for_signer(signer.signer_id)
                .with_network(meta),
            )
            .await?;

        tracing::info!(
            session_id = %signer.session_id,
            signer_id = %signer.signer_id,
            "signature captured"
        );

        Ok(())
    }

    /// Move the session forward: send to the next signer in sequential
    /// mode, finalize once everyone has signed.
    pub async fn advance_session(&self, session_id: Uuid) -> Result<SigningSession> {
        let session = self.active_session(session_id).await?;
        let signers = self.store.list_signers(session_id).await?;

        if session.signing_order == SigningOrder::Sequential {
            if let Some(next) = signers.iter().find(|s| s.status.is_outstanding()) {
                if next.status == SignerStatus::Pending {
                    self.send_to_signer(next.signer_id, &NetworkMeta::default())
                        .await?;
                }
                // A sent/viewed signer is still working; nothing to do.
                return self.load_session(session_id).await;
            }
        }

        if !signers.is_empty() && signers.iter().all(|s| s.status == SignerStatus::Signed) {
            return self.complete_session(session, &signers).await;
        }

        Ok(session)
    }

    /// Decline halts the whole transaction: the signer is marked declined
    /// and the session is cancelled for all parties, in either mode.
    pub async fn decline(
        &self,
        signer_id: Uuid,
        reason: Option<String>,
        meta: &NetworkMeta,
    ) -> Result<()> {
        let mut signer = self.load_signer(signer_id).await?;
        let mut session = self.active_session(signer.session_id).await?;

        if signer.status == SignerStatus::Signed {
            return Err(EngineError::AlreadySigned);
        }

        signer.status = SignerStatus::Declined;
        self.store.save_signer(&signer).await?;

        self.store
            .append_signing_audit(
                &SigningAuditLog::new(
                    session.session_id,
                    SigningEvent::Declined,
                    serde_json::json!({ "reason": reason, "signer_name": signer.name }),
                )
                .for_signer(signer.signer_id)
                .with_network(meta),
            )
            .await?;

        session.status = SessionStatus::Cancelled;
        self.store.save_session(&session).await?;

        self.store
            .append_signing_audit(&SigningAuditLog::new(
                session.session_id,
                SigningEvent::Cancelled,
                serde_json::json!({ "declined_by": signer.name }),
            ))
            .await?;

        if let Err(e) = self
            .notifier
            .send(
                &session.initiator_email,
                "Signing declined",
                &format!(
                    "Signer {} ({}) declined to sign. Reason: {}",
                    signer.name,
                    signer.email,
                    reason.as_deref().unwrap_or("none given")
                ),
            )
            .await
        {
            tracing::error!(
                session_id = %session.session_id,
                error = %e,
                "failed to send decline notification"
            );
        }

        Ok(())
    }

    /// Administrative cancel.
    pub async fn cancel_session(&self, session_id: Uuid, actor: &Actor) -> Result<SigningSession> {
        let mut session = self.active_session(session_id).await?;
        session.status = SessionStatus::Cancelled;
        self.store.save_session(&session).await?;

        self.store
            .append_signing_audit(&SigningAuditLog::new(
                session.session_id,
                SigningEvent::Cancelled,
                serde_json::json!({ "cancelled_by": actor.email }),
            ))
            .await?;

        Ok(session)
    }

    /// Audit trail for a session, oldest first.
    pub async fn audit_trail(&self, session_id: Uuid) -> Result<Vec<SigningAuditLog>> {
        self.store.list_signing_audit(session_id).await
    }

    // ── internals ──

    async fn complete_session(
        &self,
        mut session: SigningSession,
        signers: &[SessionSigner],
    ) -> Result<SigningSession> {
        let contract = self
            .store
            .load_contract(session.contract_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("contract {}", session.contract_id)))?;
        let storage_path = contract.storage_path.as_deref().ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "contract {} has no source document",
                session.contract_id
            ))
        })?;
        let source = self.blobs.fetch(storage_path).await?;

        let fields = self.store.list_fields_for_session(session.session_id).await?;

        let mut signatures = Vec::new();
        for signer in signers {
            let Some(image_ref) = signer.signature_path.as_ref() else {
                continue;
            };
            let positioned: Vec<_> = fields
                .iter()
                .filter(|f| f.signer_id == signer.signer_id && f.field_type.is_signature_like())
                .collect();
            if positioned.is_empty() {
                // No designated spot: the renderer drops it on the last page.
                signatures.push(SignatureOverlay {
                    page_number: None,
                    image_ref: image_ref.clone(),
                    x_position: 20.0,
                    y_position: 240.0 - 30.0 * signer.signing_order as f64,
                    width: 60.0,
                    height: 20.0,
                });
            } else {
                for field in positioned {
                    signatures.push(SignatureOverlay {
                        page_number: Some(field.page_number),
                        image_ref: image_ref.clone(),
                        x_position: field.x_position,
                        y_position: field.y_position,
                        width: field.width,
                        height: field.height,
                    });
                }
            }
        }

        let field_overlays: Vec<FieldOverlay> = fields
            .iter()
            .filter(|f| !f.field_type.is_signature_like())
            .filter_map(|f| {
                f.value.as_ref().map(|value| FieldOverlay {
                    page_number: f.page_number,
                    value: value.clone(),
                    x_position: f.x_position,
                    y_position: f.y_position,
                })
            })
            .collect();

        let trail = self.store.list_signing_audit(session.session_id).await?;
        let certificate = AuditCertificate {
            session_id: session.session_id,
            document_hash: session.document_hash.clone(),
            entries: trail
                .iter()
                .map(|log| CertificateEntry {
                    event: log.event.as_str().to_string(),
                    party: log
                        .signer_id
                        .and_then(|id| signers.iter().find(|s| s.signer_id == id))
                        .map(|s| s.email.clone()),
                    occurred_at: log.created_at,
                })
                .collect(),
        };

        let sealed = self
            .renderer
            .overlay(&source, &signatures, &field_overlays, &certificate)?;
        let final_hash = self.renderer.hash(&sealed);
        let final_ref = self
            .blobs
            .store(
                &format!("signing/{}/final.pdf", session.session_id),
                &sealed,
                "application/pdf",
            )
            .await?;

        session.status = SessionStatus::Completed;
        session.completed_at = Some(chrono::Utc::now());
        session.final_document_hash = Some(final_hash.clone());
        session.final_storage_path = Some(final_ref.clone());
        self.store.save_session(&session).await?;

        self.store
            .update_contract_signing_status(
                session.contract_id,
                crate::contract::ContractSigningStatus::Signed,
            )
            .await?;

        self.store
            .append_signing_audit(&SigningAuditLog::new(
                session.session_id,
                SigningEvent::Completed,
                serde_json::json!({
                    "contract_id": session.contract_id,
                    "signer_count": signers.len(),
                    "final_storage_path": final_ref,
                    "final_document_hash": final_hash,
                }),
            ))
            .await?;

        tracing::info!(
            session_id = %session.session_id,
            contract_id = %session.contract_id,
            "signing session completed"
        );

        // Completion notices go out after the state change and never undo it.
        let mut recipients: Vec<&str> = signers.iter().map(|s| s.email.as_str()).collect();
        recipients.push(session.initiator_email.as_str());
        for recipient in recipients {
            if let Err(e) = self
                .notifier
                .send(
                    recipient,
                    "Signing complete",
                    &format!("Contract {} has been signed by all parties.", contract.title),
                )
                .await
            {
                tracing::error!(
                    session_id = %session.session_id,
                    recipient,
                    error = %e,
                    "failed to send completion notice"
                );
            }
        }

        Ok(session)
    }

    async fn issue_token(
        &self,
        signer: &mut SessionSigner,
        event: SigningEvent,
        meta: &NetworkMeta,
    ) -> Result<String> {
        let raw = token::generate();
        let now = chrono::Utc::now();
        signer.token_digest = Some(token::digest(&raw));
        signer.token_expires_at = Some(now + chrono::Duration::days(TOKEN_EXPIRY_DAYS));
        if event == SigningEvent::Sent {
            signer.status = SignerStatus::Sent;
            signer.sent_at = Some(now);
        } else if signer.status == SignerStatus::Pending {
            // A reminder to a never-sent signer still counts as sending.
            signer.status = SignerStatus::Sent;
            signer.sent_at = Some(now);
        }
        self.store.save_signer(signer).await?;

        self.notifier
            .send(
                &signer.email,
                "Signature requested",
                &format!(
                    "{}, you have a document waiting for signature. Open your signing link with token {} within {} days.",
                    signer.name, raw, TOKEN_EXPIRY_DAYS
                ),
            )
            .await?;

        self.store
            .append_signing_audit(
                &SigningAuditLog::new(
                    signer.session_id,
                    event,
                    serde_json::json!({
                        "signer_name": signer.name,
                        "signer_email": signer.email,
                    }),
                )
                .for_signer(signer.signer_id)
                .with_network(meta),
            )
            .await?;

        Ok(raw)
    }

    async fn load_signer(&self, signer_id: Uuid) -> Result<SessionSigner> {
        self.store
            .load_signer(signer_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("signer {}", signer_id)))
    }

    async fn load_session(&self, session_id: Uuid) -> Result<SigningSession> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("signing session {}", session_id)))
    }

    /// Load a session and require it to be usable. A lapsed session is
    /// flipped to expired on first touch, then reported inactive like any
    /// other non-active session.
    async fn active_session(&self, session_id: Uuid) -> Result<SigningSession> {
        let mut session = self.load_session(session_id).await?;

        if session.status == SessionStatus::Active && session.is_lapsed() {
            session.status = SessionStatus::Expired;
            self.store.save_session(&session).await?;
            self.store
                .append_signing_audit(&SigningAuditLog::new(
                    session.session_id,
                    SigningEvent::Expired,
                    serde_json::json!({}),
                ))
                .await?;
            return Err(EngineError::SessionInactive);
        }

        if !session.is_active() {
            return Err(EngineError::SessionInactive);
        }

        Ok(session)
    }
}

/// Reject anything that is not a PNG or JPEG payload before it reaches the
/// blob store. Signature uploads come from untrusted parties.
fn check_signature_image(bytes: &[u8]) -> Result<()> {
    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

    if bytes.starts_with(PNG_MAGIC) || bytes.starts_with(JPEG_MAGIC) {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(
            "signature must be a PNG or JPEG image".to_string(),
        ))
    }
}
