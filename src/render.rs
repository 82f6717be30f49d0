//! Document Renderer Port
//!
//! Consumed capability: flattening captured signatures and field values onto
//! the source document and appending the audit certificate page. Rendering
//! internals (PDF manipulation) live outside the engine; the port returns
//! sealed bytes and the engine persists them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;

/// One signature image placed on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureOverlay {
    /// None = renderer places the signature on the last page (used when a
    /// signer has no positioned signature fields).
    pub page_number: Option<i32>,
    /// Blob reference of the signer's captured signature image.
    pub image_ref: String,
    pub x_position: f64,
    pub y_position: f64,
    pub width: f64,
    pub height: f64,
}

/// One typed field value placed on a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldOverlay {
    pub page_number: i32,
    pub value: String,
    pub x_position: f64,
    pub y_position: f64,
}

/// Line item on the audit certificate page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateEntry {
    pub event: String,
    pub party: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Data for the certificate page appended to the sealed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCertificate {
    pub session_id: Uuid,
    pub document_hash: String,
    pub entries: Vec<CertificateEntry>,
}

/// Consumed capability: seal a document.
pub trait DocumentRenderer: Send + Sync {
    /// Overlay signatures and field values onto the source document and
    /// append the audit certificate page. Returns the sealed bytes.
    fn overlay(
        &self,
        source: &[u8],
        signatures: &[SignatureOverlay],
        fields: &[FieldOverlay],
        certificate: &AuditCertificate,
    ) -> Result<Vec<u8>>;

    /// Content fingerprint (hex SHA-256) of document bytes.
    fn hash(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

/// Naive renderer that appends the overlay manifest and certificate as a
/// trailing JSON block. Good enough for POC storage and deterministic
/// fingerprints; production swaps in a real PDF renderer.
pub struct StampRenderer;

impl DocumentRenderer for StampRenderer {
    fn overlay(
        &self,
        source: &[u8],
        signatures: &[SignatureOverlay],
        fields: &[FieldOverlay],
        certificate: &AuditCertificate,
    ) -> Result<Vec<u8>> {
        let manifest = serde_json::json!({
            "signatures": signatures,
            "fields": fields,
            "certificate": certificate,
        });
        let mut sealed = source.to_vec();
        sealed.extend_from_slice(b"\n%%SEALED ");
        sealed.extend_from_slice(manifest.to_string().as_bytes());
        Ok(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_renderer_changes_fingerprint() {
        let renderer = StampRenderer;
        let source = b"%PDF-1.7 body";
        let certificate = AuditCertificate {
            session_id: Uuid::new_v4(),
            document_hash: renderer.hash(source),
            entries: vec![CertificateEntry {
                event: "signed".to_string(),
                party: Some("ada@x.test".to_string()),
                occurred_at: Utc::now(),
            }],
        };

        let sealed = renderer.overlay(source, &[], &[], &certificate).unwrap();
        assert!(sealed.len() > source.len());
        assert_ne!(renderer.hash(&sealed), renderer.hash(source));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let renderer = StampRenderer;
        let digest = renderer.hash(b"abc");
        assert_eq!(digest.len(), 64);
        // Known SHA-256 of "abc"
        assert!(digest.starts_with("ba7816bf"));
    }
}
