//! Contract Lifecycle Orchestration Engine
//!
//! Three tightly-coupled pieces of state-machine/protocol logic:
//!
//! - **Workflow engine**: per-contract stage traversal driven by versioned
//!   templates, with KYC and signing-authority gates in front of signing
//!   stages and an append-only action log as the audit trail.
//! - **Signing session engine**: the multi-signer e-signature protocol
//!   (sequential or parallel), bearer-token access for external parties,
//!   and document sealing on completion.
//! - **Escalation scheduler**: a bounded scan pass that turns SLA breaches
//!   on active instances into escalation events.
//!
//! Everything external is a port: persistence (`store::LifecycleStore`),
//! blobs, document rendering, notification, KYC readiness, signing
//! authority, and the system audit sink. The in-memory backends make the
//! whole engine testable without infrastructure; the `database` feature
//! adds the Postgres backend.

pub mod audit;
pub mod authority;
pub mod blob_store;
pub mod contract;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod kyc;
pub mod notify;
pub mod render;
pub mod session;
pub mod signing;
pub mod state;
pub mod store;
pub mod store_memory;
#[cfg(feature = "database")]
pub mod store_postgres;
pub mod template;
pub mod token;

pub use audit::{AuditRecord, AuditSink, NetworkMeta, NoopAuditSink, SigningAuditLog, SigningEvent};
pub use authority::{AuthorityResolver, SigningAuthority, StoreAuthorityResolver};
pub use blob_store::{BlobStore, BlobStoreError, LocalBlobStore, MemoryBlobStore};
pub use contract::{ContractRecord, ContractSigningStatus};
pub use engine::WorkflowEngine;
pub use error::{EngineError, Result};
pub use escalation::{EscalationEngine, EscalationEvent, EscalationRule, EscalationTarget};
pub use kyc::{KycGate, KycItemStatus, KycPack, KycPackItem, PackKycGate};
pub use notify::{Notifier, NoopNotifier, RecordingNotifier};
pub use render::{DocumentRenderer, StampRenderer};
pub use session::{
    FieldType, FieldValue, SessionSigner, SessionStatus, SignerKind, SignerSpec, SignerStatus,
    SigningField, SigningOrder, SigningSession,
};
pub use signing::SigningEngine;
pub use state::{Actor, InstanceState, StageAction, WorkflowInstance, WorkflowStageAction};
pub use store::LifecycleStore;
pub use store_memory::MemoryStore;
#[cfg(feature = "database")]
pub use store_postgres::PgLifecycleStore;
pub use template::{StageDef, StageType, TemplateStatus, WorkflowTemplate};
