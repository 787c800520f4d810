#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

pub type SellerSlug = String;

pub type PolicyResult<T> = Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// The operator-tunable switches and rule tables every seller's pipeline
/// reads from: the Release Checker's bypass flag, the nightly-pipeline
/// toggle, and the vendor→CA-category lookup consumed by the Expense
/// Classifier's extensible rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalPolicy {
    /// Whether installments with no cached payment row may still be
    /// baixa'd (`ReleaseCheckResult::Bypass`) rather than left `unknown`.
    pub release_bypass_enabled: bool,
    /// Collapses the individual daily schedulers into one sequential run.
    pub nightly_pipeline_enabled: bool,
    pub sync_lookback_days: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub vendor_ca_categories: HashMap<String, String>,
}

impl Default for OperationalPolicy {
    fn default() -> Self {
        Self {
            release_bypass_enabled: false,
            nightly_pipeline_enabled: false,
            sync_lookback_days: 3,
            vendor_ca_categories: HashMap::new(),
        }
    }
}

impl OperationalPolicy {
    /// Looks up the CA category code for a known SaaS vendor key (lower-cased,
    /// as extracted from the payment description by the Expense Classifier).
    /// Unknown vendors still classify as `subscription`; this table only
    /// supplies the optional CA category, never the `expense_type` itself.
    #[must_use]
    pub fn ca_category_for_vendor(&self, vendor_key: &str) -> Option<&str> {
        self.vendor_ca_categories
            .get(vendor_key)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyBinding {
    pub seller: SellerSlug,
    pub policy: OperationalPolicy,
}

#[async_trait]
pub trait PolicyPersistence: Send + Sync {
    async fn write_policy(&self, seller: &SellerSlug, policy: &OperationalPolicy) -> PolicyResult<()>;
    async fn read_policy(&self, seller: &SellerSlug) -> PolicyResult<Option<OperationalPolicy>>;
    async fn read_all(&self) -> PolicyResult<Vec<PolicyBinding>>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn put_policy(&self, seller: SellerSlug, policy: OperationalPolicy) -> PolicyResult<()>;
    async fn get_policy(&self, seller: &SellerSlug) -> PolicyResult<Option<OperationalPolicy>>;
    async fn list_policies(&self) -> PolicyResult<HashMap<SellerSlug, OperationalPolicy>>;
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<HashMap<SellerSlug, OperationalPolicy>>,
}

impl InMemoryPolicyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn put_policy(&self, seller: SellerSlug, policy: OperationalPolicy) -> PolicyResult<()> {
        let mut guard = self.policies.write().await;
        guard.insert(seller, policy);
        Ok(())
    }

    async fn get_policy(&self, seller: &SellerSlug) -> PolicyResult<Option<OperationalPolicy>> {
        let guard = self.policies.read().await;
        Ok(guard.get(seller).cloned())
    }

    async fn list_policies(&self) -> PolicyResult<HashMap<SellerSlug, OperationalPolicy>> {
        let guard = self.policies.read().await;
        Ok(guard.clone())
    }
}

#[async_trait]
impl PolicyPersistence for InMemoryPolicyStore {
    async fn write_policy(&self, seller: &SellerSlug, policy: &OperationalPolicy) -> PolicyResult<()> {
        let mut guard = self.policies.write().await;
        guard.insert(seller.clone(), policy.clone());
        Ok(())
    }

    async fn read_policy(&self, seller: &SellerSlug) -> PolicyResult<Option<OperationalPolicy>> {
        let guard = self.policies.read().await;
        Ok(guard.get(seller).cloned())
    }

    async fn read_all(&self) -> PolicyResult<Vec<PolicyBinding>> {
        let guard = self.policies.read().await;
        Ok(guard
            .iter()
            .map(|(seller, policy)| PolicyBinding {
                seller: seller.clone(),
                policy: policy.clone(),
            })
            .collect())
    }
}

/// Write-through cache over a durable [`PolicyPersistence`] backend, so the
/// nightly pipeline never pays a round-trip for a policy flag it already
/// read this run.
#[derive(Clone)]
pub struct DurablePolicyStore<P>
where
    P: PolicyPersistence + 'static,
{
    persistence: Arc<P>,
    cache: Arc<InMemoryPolicyStore>,
}

impl<P> DurablePolicyStore<P>
where
    P: PolicyPersistence + 'static,
{
    #[must_use]
    pub fn new(persistence: Arc<P>) -> Self {
        Self {
            persistence,
            cache: Arc::new(InMemoryPolicyStore::new()),
        }
    }

    async fn load_into_cache(&self, binding: &PolicyBinding) -> PolicyResult<()> {
        PolicyStore::put_policy(&*self.cache, binding.seller.clone(), binding.policy.clone()).await
    }
}

#[async_trait]
impl<P> PolicyStore for DurablePolicyStore<P>
where
    P: PolicyPersistence + 'static,
{
    async fn put_policy(&self, seller: SellerSlug, policy: OperationalPolicy) -> PolicyResult<()> {
        self.persistence.write_policy(&seller, &policy).await?;
        PolicyStore::put_policy(&*self.cache, seller, policy).await
    }

    async fn get_policy(&self, seller: &SellerSlug) -> PolicyResult<Option<OperationalPolicy>> {
        if let Some(cached) = PolicyStore::get_policy(&*self.cache, seller).await? {
            return Ok(Some(cached));
        }
        let fetched = self.persistence.read_policy(seller).await?;
        if let Some(ref policy) = fetched {
            PolicyStore::put_policy(&*self.cache, seller.clone(), policy.clone()).await?;
        }
        Ok(fetched)
    }

    async fn list_policies(&self) -> PolicyResult<HashMap<SellerSlug, OperationalPolicy>> {
        let bindings = self.persistence.read_all().await?;
        for binding in &bindings {
            self.load_into_cache(binding).await?;
        }
        let mut output = HashMap::new();
        for binding in bindings {
            output.insert(binding.seller, binding.policy);
        }
        Ok(output)
    }
}

#[cfg(feature = "postgres-store")]
#[derive(Clone)]
pub struct PostgresPolicyStore {
    connection_string: String,
}

#[cfg(feature = "postgres-store")]
impl PostgresPolicyStore {
    /// Constructs a new Postgres-backed policy persistence stub.
    ///
    /// # Schema Draft
    /// ```sql
    /// CREATE TABLE operational_policies (
    ///     seller TEXT PRIMARY KEY,
    ///     policy JSONB NOT NULL,
    ///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    /// );
    /// ```
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

#[cfg(feature = "postgres-store")]
#[async_trait]
impl PolicyPersistence for PostgresPolicyStore {
    async fn write_policy(&self, seller: &SellerSlug, policy: &OperationalPolicy) -> PolicyResult<()> {
        let _ = (&self.connection_string, seller, policy);
        Err(PolicyError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn read_policy(&self, seller: &SellerSlug) -> PolicyResult<Option<OperationalPolicy>> {
        let _ = (&self.connection_string, seller);
        Err(PolicyError::Storage("postgres store persistence not yet implemented".into()))
    }

    async fn read_all(&self) -> PolicyResult<Vec<PolicyBinding>> {
        let _ = &self.connection_string;
        Err(PolicyError::Storage("postgres store persistence not yet implemented".into()))
    }
}

/// Facade the rest of the engine depends on: a store plus the seller-wide
/// default applied when no row has been written yet.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    default_policy: OperationalPolicy,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            default_policy: OperationalPolicy::default(),
        }
    }

    pub fn with_default(store: Arc<dyn PolicyStore>, default_policy: OperationalPolicy) -> Self {
        Self { store, default_policy }
    }

    pub async fn policy_for(&self, seller: &SellerSlug) -> PolicyResult<OperationalPolicy> {
        match self.store.get_policy(seller).await? {
            Some(policy) => Ok(policy),
            None => Ok(self.default_policy.clone()),
        }
    }

    pub async fn release_bypass_enabled(&self, seller: &SellerSlug) -> PolicyResult<bool> {
        Ok(self.policy_for(seller).await?.release_bypass_enabled)
    }
}
