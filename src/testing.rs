//! Recording fake of the Facebook API traits and a failure-injecting store
//! for unit tests.

use crate::ad_spec::{AdSetSpec, AdStatus, CampaignSpec, CreativeSpec, ImageSource};
use crate::constants::LONG_LIVED_TOKEN_TTL_SECS;
use crate::facebook::{
    AccountApi, CampaignApi, CampaignSummary, InsightsLevel, InsightsRange, LongLivedToken,
    OAuthApi, Page, RemoteUser,
};
use crate::graph::GraphError;
use crate::memory::MemoryStore;
use crate::models::{AdAccount, Connection, Credential, NewConnection};
use crate::store::{ActiveConnection, ConnectionStore, StoreError, UnreadableConnection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct FakeFacebook {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, GraphError>>,
    pub long_lived_expires_in: i64,
}

impl Default for FakeFacebook {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            long_lived_expires_in: LONG_LIVED_TOKEN_TTL_SECS,
        }
    }
}

impl FakeFacebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, method: &'static str, err: GraphError) -> Self {
        self.failures.lock().unwrap().insert(method, err);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(method))
            .count()
    }

    fn enter(&self, method: &'static str, detail: &str) -> Result<(), GraphError> {
        let call = if detail.is_empty() {
            method.to_string()
        } else {
            format!("{}:{}", method, detail)
        };
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub fn ad_accounts() -> Vec<AdAccount> {
    vec![
        AdAccount {
            id: "act_123456".to_string(),
            account_id: "123456".to_string(),
            name: "Test Ad Account 1".to_string(),
            currency: "USD".to_string(),
            timezone: Some("America/New_York".to_string()),
        },
        AdAccount {
            id: "act_789012".to_string(),
            account_id: "789012".to_string(),
            name: "Test Ad Account 2".to_string(),
            currency: "EUR".to_string(),
            timezone: Some("Europe/London".to_string()),
        },
    ]
}

#[async_trait]
impl OAuthApi for FakeFacebook {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<Credential, GraphError> {
        self.enter("exchange_code_for_token", code)?;
        Ok(Credential::new("short_lived_token_123"))
    }

    async fn exchange_for_long_lived(
        &self,
        credential: &Credential,
    ) -> Result<LongLivedToken, GraphError> {
        self.enter("exchange_for_long_lived", credential.expose())?;
        Ok(LongLivedToken {
            credential: Credential::new("long_lived_token_456"),
            token_type: "bearer".to_string(),
            expires_in: self.long_lived_expires_in,
        })
    }

    async fn verify_credential(&self, credential: &Credential) -> Result<(), GraphError> {
        self.enter("verify_credential", credential.expose())
    }
}

#[async_trait]
impl AccountApi for FakeFacebook {
    async fn fetch_remote_user(&self, _credential: &Credential) -> Result<RemoteUser, GraphError> {
        self.enter("fetch_remote_user", "")?;
        Ok(RemoteUser {
            id: "fb_user_123".to_string(),
            name: Some("Test User".to_string()),
            email: Some("test@example.com".to_string()),
        })
    }

    async fn fetch_granted_scopes(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<String>, GraphError> {
        self.enter("fetch_granted_scopes", "")?;
        Ok(vec!["ads_read".to_string(), "ads_management".to_string()])
    }

    async fn fetch_ad_accounts(
        &self,
        _credential: &Credential,
    ) -> Result<Vec<AdAccount>, GraphError> {
        self.enter("fetch_ad_accounts", "")?;
        Ok(ad_accounts())
    }

    async fn fetch_pages(&self, _credential: &Credential) -> Result<Vec<Page>, GraphError> {
        self.enter("fetch_pages", "")?;
        Ok(vec![Page {
            id: "page_1".to_string(),
            name: "Test Page".to_string(),
        }])
    }

    async fn fetch_campaigns(
        &self,
        _credential: &Credential,
        ad_account_id: &str,
        limit: u32,
    ) -> Result<Vec<CampaignSummary>, GraphError> {
        self.enter("fetch_campaigns", &format!("{}/{}", ad_account_id, limit))?;
        Ok(vec![])
    }

    async fn fetch_insights(
        &self,
        _credential: &Credential,
        ad_account_id: &str,
        _level: InsightsLevel,
        _range: &InsightsRange,
    ) -> Result<Vec<Value>, GraphError> {
        self.enter("fetch_insights", ad_account_id)?;
        Ok(vec![json!({"impressions": "120", "clicks": "7"})])
    }

    async fn fetch_ad_status(
        &self,
        _credential: &Credential,
        ad_id: &str,
    ) -> Result<String, GraphError> {
        self.enter("fetch_ad_status", ad_id)?;
        Ok("ACTIVE".to_string())
    }

    async fn update_ad_status(
        &self,
        _credential: &Credential,
        ad_id: &str,
        status: AdStatus,
    ) -> Result<(), GraphError> {
        self.enter("update_ad_status", &format!("{}={}", ad_id, status.as_str()))
    }
}

#[async_trait]
impl CampaignApi for FakeFacebook {
    async fn create_campaign(
        &self,
        _credential: &Credential,
        _ad_account_id: &str,
        _campaign: &CampaignSpec,
        _status: AdStatus,
    ) -> Result<String, GraphError> {
        self.enter("create_campaign", "")?;
        Ok("campaign_1".to_string())
    }

    async fn create_ad_set(
        &self,
        _credential: &Credential,
        _ad_account_id: &str,
        campaign_id: &str,
        _ad_set: &AdSetSpec,
        _status: AdStatus,
    ) -> Result<String, GraphError> {
        self.enter("create_ad_set", campaign_id)?;
        Ok("adset_1".to_string())
    }

    async fn upload_image(
        &self,
        _credential: &Credential,
        _ad_account_id: &str,
        _image: &ImageSource,
    ) -> Result<String, GraphError> {
        self.enter("upload_image", "")?;
        Ok("hash_1".to_string())
    }

    async fn create_creative(
        &self,
        _credential: &Credential,
        _ad_account_id: &str,
        image_hash: &str,
        _creative: &CreativeSpec,
    ) -> Result<String, GraphError> {
        self.enter("create_creative", image_hash)?;
        Ok("creative_1".to_string())
    }

    async fn create_ad(
        &self,
        _credential: &Credential,
        _ad_account_id: &str,
        ad_set_id: &str,
        creative_id: &str,
        _name: &str,
        _status: AdStatus,
    ) -> Result<String, GraphError> {
        self.enter("create_ad", &format!("{}/{}", ad_set_id, creative_id))?;
        Ok("ad_1".to_string())
    }

    async fn delete_object(
        &self,
        _credential: &Credential,
        object_id: &str,
    ) -> Result<(), GraphError> {
        self.enter("delete_object", object_id)
    }
}

/// `MemoryStore` with rows that fail to decode and a `deactivate` that can be
/// made to fail.
pub struct UnreliableStore {
    pub inner: Arc<MemoryStore>,
    unreadable: Vec<String>,
    fail_deactivate: bool,
    deactivated: Mutex<Vec<String>>,
}

impl UnreliableStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            unreadable: Vec::new(),
            fail_deactivate: false,
            deactivated: Mutex::new(Vec::new()),
        }
    }

    pub fn with_unreadable(mut self, owner_id: &str) -> Self {
        self.unreadable.push(owner_id.to_string());
        self
    }

    pub fn failing_deactivate(mut self) -> Self {
        self.fail_deactivate = true;
        self
    }

    pub fn deactivated(&self) -> Vec<String> {
        self.deactivated.lock().unwrap().clone()
    }

    fn unreadable_error() -> StoreError {
        StoreError::Corrupt("bad ciphertext".to_string())
    }
}

#[async_trait]
impl ConnectionStore for UnreliableStore {
    async fn upsert(&self, owner_id: &str, connection: NewConnection) -> Result<(), StoreError> {
        self.inner.upsert(owner_id, connection).await
    }

    async fn find(&self, owner_id: &str) -> Result<Option<Connection>, StoreError> {
        if self.unreadable.iter().any(|owner| owner == owner_id) {
            return Err(Self::unreadable_error());
        }
        self.inner.find(owner_id).await
    }

    async fn deactivate(&self, owner_id: &str) -> Result<(), StoreError> {
        self.deactivated.lock().unwrap().push(owner_id.to_string());
        if self.fail_deactivate {
            return Err(StoreError::Corrupt("db down".to_string()));
        }
        self.inner.deactivate(owner_id).await
    }

    async fn update_ad_accounts(
        &self,
        owner_id: &str,
        ad_accounts: Vec<AdAccount>,
    ) -> Result<(), StoreError> {
        self.inner.update_ad_accounts(owner_id, ad_accounts).await
    }

    async fn update_credential(
        &self,
        owner_id: &str,
        credential: &Credential,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner
            .update_credential(owner_id, credential, expires_at)
            .await
    }

    async fn list_active(&self) -> Result<Vec<ActiveConnection>, StoreError> {
        let mut listed = self.inner.list_active().await?;
        listed.extend(self.unreadable.iter().map(|owner_id| {
            Err(UnreadableConnection {
                owner_id: owner_id.clone(),
                error: Self::unreadable_error(),
            })
        }));
        Ok(listed)
    }
}
