//! KYC Readiness Gate
//!
//! A contract may carry a KYC pack, a checklist snapshot taken from a KYC
//! template at pack creation time. The workflow engine consults the gate
//! before letting a signing or countersign stage advance: no pack means
//! nothing to check, an existing pack must have every required item
//! completed or marked not-applicable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::store::LifecycleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycItemStatus {
    Pending,
    Completed,
    NotApplicable,
}

impl KycItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::NotApplicable => "not_applicable",
        }
    }

    /// A required item in this status no longer blocks signing.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Completed | Self::NotApplicable)
    }
}

impl FromStr for KycItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "not_applicable" => Ok(Self::NotApplicable),
            _ => Err(format!("Unknown KYC item status: {}", s)),
        }
    }
}

/// One checklist line in a pack. Items are snapshotted from the template at
/// pack creation and keep their label even if the template later changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycPackItem {
    pub item_id: Uuid,
    pub label: String,
    pub is_required: bool,
    pub status: KycItemStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

impl KycPackItem {
    pub fn required(label: impl Into<String>) -> Self {
        Self::new(label, true)
    }

    pub fn optional(label: impl Into<String>) -> Self {
        Self::new(label, false)
    }

    fn new(label: impl Into<String>, is_required: bool) -> Self {
        Self {
            item_id: Uuid::new_v4(),
            label: label.into(),
            is_required,
            status: KycItemStatus::Pending,
            completed_at: None,
            completed_by: None,
        }
    }
}

/// Immutable checklist snapshot attached to one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycPack {
    pub pack_id: Uuid,
    pub contract_id: Uuid,
    pub template_version: i32,
    pub items: Vec<KycPackItem>,
    pub created_at: DateTime<Utc>,
}

impl KycPack {
    pub fn new(contract_id: Uuid, template_version: i32, items: Vec<KycPackItem>) -> Self {
        Self {
            pack_id: Uuid::new_v4(),
            contract_id,
            template_version,
            items,
            created_at: Utc::now(),
        }
    }

    /// Required items still pending: the blockers reported to the caller.
    pub fn missing_items(&self) -> Vec<&KycPackItem> {
        self.items
            .iter()
            .filter(|i| i.is_required && !i.status.is_resolved())
            .collect()
    }

    pub fn is_ready_for_signing(&self) -> bool {
        self.missing_items().is_empty()
    }

    /// Resolve one item (complete or mark not-applicable).
    /// Unknown item ids are ignored; packs are small and callers hold the
    /// item list they were given.
    pub fn resolve_item(&mut self, item_id: Uuid, status: KycItemStatus, by: Option<String>) {
        if let Some(item) = self.items.iter_mut().find(|i| i.item_id == item_id) {
            item.status = status;
            if status.is_resolved() {
                item.completed_at = Some(Utc::now());
                item.completed_by = by;
            }
        }
    }
}

/// Consumed capability: is this contract clear to enter a signing stage?
#[async_trait]
pub trait KycGate: Send + Sync {
    async fn is_ready_for_signing(&self, contract_id: Uuid) -> Result<bool>;

    /// Number of required items still pending (0 when ready or no pack).
    async fn missing_count(&self, contract_id: Uuid) -> Result<usize>;
}

/// Store-backed gate: no pack passes, an existing pack must be ready.
pub struct PackKycGate {
    store: Arc<dyn LifecycleStore>,
}

impl PackKycGate {
    pub fn new(store: Arc<dyn LifecycleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KycGate for PackKycGate {
    async fn is_ready_for_signing(&self, contract_id: Uuid) -> Result<bool> {
        match self.store.load_kyc_pack(contract_id).await? {
            None => Ok(true),
            Some(pack) => Ok(pack.is_ready_for_signing()),
        }
    }

    async fn missing_count(&self, contract_id: Uuid) -> Result<usize> {
        match self.store.load_kyc_pack(contract_id).await? {
            None => Ok(0),
            Some(pack) => Ok(pack.missing_items().len()),
        }
    }
}
