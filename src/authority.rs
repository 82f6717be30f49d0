//! Signing Authority Resolution
//!
//! A signing authority asserts that someone may countersign on behalf of an
//! entity, optionally narrowed to a project and a contract-type pattern.
//! Resolution is wildcard-aware with a specificity ranking: a
//! project-specific record outranks an entity-only record, which outranks a
//! contract-type `*` match. Absence of any match blocks the countersign
//! stage until an authority is provisioned manually.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::store::LifecycleStore;

/// One provisioned authority record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct SigningAuthority {
    pub authority_id: Uuid,
    pub entity_id: Uuid,
    /// None = authority covers every project of the entity.
    pub project_id: Option<Uuid>,
    /// None or `*` = any contract type; otherwise an exact (case-insensitive)
    /// type match.
    pub contract_type_pattern: Option<String>,
    pub user_id: Uuid,
    pub user_email: String,
    pub created_at: DateTime<Utc>,
}

impl SigningAuthority {
    pub fn new(entity_id: Uuid, user_id: Uuid, user_email: impl Into<String>) -> Self {
        Self {
            authority_id: Uuid::new_v4(),
            entity_id,
            project_id: None,
            contract_type_pattern: None,
            user_id,
            user_email: user_email.into(),
            created_at: Utc::now(),
        }
    }

    pub fn for_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn for_contract_type(mut self, pattern: impl Into<String>) -> Self {
        self.contract_type_pattern = Some(pattern.into());
        self
    }

    /// Does this record cover the given contract scope at all?
    pub fn matches(&self, entity_id: Uuid, project_id: Option<Uuid>, contract_type: &str) -> bool {
        if self.entity_id != entity_id {
            return false;
        }
        // A project-scoped authority only covers that project; an
        // entity-wide one covers everything.
        if let Some(own_project) = self.project_id {
            if project_id != Some(own_project) {
                return false;
            }
        }
        match self.contract_type_pattern.as_deref() {
            None | Some("*") => true,
            Some(pattern) => pattern.eq_ignore_ascii_case(contract_type),
        }
    }

    /// Specificity ranking for tie-breaks: project match > entity-only >
    /// contract-type wildcard. Mirrors the template-matching scores used
    /// elsewhere in the system (4/2/1 weighting).
    pub fn specificity(&self, contract_type: &str) -> u8 {
        let mut score = 0;
        if self.project_id.is_some() {
            score += 4;
        }
        score += 2; // entity always matches by the time we score
        match self.contract_type_pattern.as_deref() {
            None | Some("*") => {}
            Some(pattern) if pattern.eq_ignore_ascii_case(contract_type) => score += 1,
            Some(_) => {}
        }
        score
    }
}

/// Consumed capability: does any authority cover this contract scope?
#[async_trait]
pub trait AuthorityResolver: Send + Sync {
    async fn has_authority(
        &self,
        entity_id: Uuid,
        project_id: Option<Uuid>,
        contract_type: &str,
    ) -> Result<bool>;

    /// The best-ranked matching record, if any.
    async fn resolve(
        &self,
        entity_id: Uuid,
        project_id: Option<Uuid>,
        contract_type: &str,
    ) -> Result<Option<SigningAuthority>>;
}

/// Store-backed resolver applying the specificity ranking.
pub struct StoreAuthorityResolver {
    store: Arc<dyn LifecycleStore>,
}

impl StoreAuthorityResolver {
    pub fn new(store: Arc<dyn LifecycleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuthorityResolver for StoreAuthorityResolver {
    async fn has_authority(
        &self,
        entity_id: Uuid,
        project_id: Option<Uuid>,
        contract_type: &str,
    ) -> Result<bool> {
        Ok(self
            .resolve(entity_id, project_id, contract_type)
            .await?
            .is_some())
    }

    async fn resolve(
        &self,
        entity_id: Uuid,
        project_id: Option<Uuid>,
        contract_type: &str,
    ) -> Result<Option<SigningAuthority>> {
        let records = self.store.list_authorities_for_entity(entity_id).await?;
        Ok(records
            .into_iter()
            .filter(|a| a.matches(entity_id, project_id, contract_type))
            .max_by_key(|a| a.specificity(contract_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_wide_authority_covers_any_project() {
        let entity = Uuid::new_v4();
        let auth = SigningAuthority::new(entity, Uuid::new_v4(), "gc@x.test");

        assert!(auth.matches(entity, None, "msa"));
        assert!(auth.matches(entity, Some(Uuid::new_v4()), "msa"));
        assert!(!auth.matches(Uuid::new_v4(), None, "msa"));
    }

    #[test]
    fn project_scoped_authority_only_covers_that_project() {
        let entity = Uuid::new_v4();
        let project = Uuid::new_v4();
        let auth = SigningAuthority::new(entity, Uuid::new_v4(), "gc@x.test").for_project(project);

        assert!(auth.matches(entity, Some(project), "msa"));
        assert!(!auth.matches(entity, Some(Uuid::new_v4()), "msa"));
        assert!(!auth.matches(entity, None, "msa"));
    }

    #[test]
    fn contract_type_pattern_wildcard_and_exact() {
        let entity = Uuid::new_v4();
        let star = SigningAuthority::new(entity, Uuid::new_v4(), "a@x.test").for_contract_type("*");
        let exact =
            SigningAuthority::new(entity, Uuid::new_v4(), "b@x.test").for_contract_type("NDA");

        assert!(star.matches(entity, None, "msa"));
        assert!(exact.matches(entity, None, "nda")); // case-insensitive
        assert!(!exact.matches(entity, None, "msa"));
    }

    #[test]
    fn specificity_ranks_project_over_entity_over_wildcard() {
        let entity = Uuid::new_v4();
        let project = Uuid::new_v4();

        let wildcard =
            SigningAuthority::new(entity, Uuid::new_v4(), "a@x.test").for_contract_type("*");
        let typed = SigningAuthority::new(entity, Uuid::new_v4(), "b@x.test").for_contract_type("msa");
        let scoped = SigningAuthority::new(entity, Uuid::new_v4(), "c@x.test").for_project(project);

        assert!(typed.specificity("msa") > wildcard.specificity("msa"));
        assert!(scoped.specificity("msa") > typed.specificity("msa"));
    }
}
