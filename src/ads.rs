//! Account-level operations for a connected caller: status, sync, insights,
//! campaigns and audited ad status changes.

use crate::ad_spec::AdStatus;
use crate::audit::AuditLog;
use crate::constants::{DEFAULT_CAMPAIGN_LIMIT, DEFAULT_DATE_PRESET, MAX_ACTION_LOG_ENTRIES};
use crate::facebook::{AccountApi, CampaignSummary, InsightsLevel, InsightsRange, Page};
use crate::graph::GraphError;
use crate::models::{
    ActionKind, ActionLogEntry, AdAccount, Connection, ConnectionView, Identity, TargetKind,
};
use crate::store::{ConnectionStore, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdsError {
    #[error("No active Facebook connection")]
    NoActiveConnection,
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Account-level reads and single-object updates for a connected caller.
pub struct AdsService {
    api: Arc<dyn AccountApi>,
    connections: Arc<dyn ConnectionStore>,
    audit: AuditLog,
}

impl AdsService {
    pub fn new(
        api: Arc<dyn AccountApi>,
        connections: Arc<dyn ConnectionStore>,
        audit: AuditLog,
    ) -> Self {
        Self {
            api,
            connections,
            audit,
        }
    }

    pub async fn connection(&self, identity: &Identity) -> Result<Option<ConnectionView>, AdsError> {
        Ok(self.connections.get_safe_view(&identity.user_id).await?)
    }

    pub async fn has_active_connection(&self, identity: &Identity) -> Result<bool, AdsError> {
        Ok(self
            .connections
            .get_with_credential(&identity.user_id)
            .await?
            .is_some())
    }

    /// Ad accounts cached at connect or last sync; empty when not connected.
    pub async fn ad_accounts(&self, identity: &Identity) -> Result<Vec<AdAccount>, AdsError> {
        Ok(self
            .connections
            .get_safe_view(&identity.user_id)
            .await?
            .filter(|view| view.is_active)
            .map(|view| view.ad_accounts)
            .unwrap_or_default())
    }

    pub async fn disconnect(&self, identity: &Identity) -> Result<(), AdsError> {
        tracing::info!(owner_id = %identity.user_id, "disconnecting Facebook");
        self.connections.deactivate(&identity.user_id).await?;
        Ok(())
    }

    pub async fn sync_ad_accounts(&self, identity: &Identity) -> Result<Vec<AdAccount>, AdsError> {
        let connection = self.active(identity).await?;
        let result = self.api.fetch_ad_accounts(&connection.credential).await;
        let ad_accounts = self.checked(identity, result).await?;
        self.connections
            .update_ad_accounts(&identity.user_id, ad_accounts.clone())
            .await?;
        tracing::info!(owner_id = %identity.user_id, count = ad_accounts.len(), "ad accounts synced");
        Ok(ad_accounts)
    }

    pub async fn account_insights(
        &self,
        identity: &Identity,
        ad_account_id: &str,
        range: Option<InsightsRange>,
    ) -> Result<Vec<Value>, AdsError> {
        let range = range.unwrap_or_else(|| InsightsRange::Preset(DEFAULT_DATE_PRESET.to_string()));
        self.insights(identity, ad_account_id, InsightsLevel::Account, range)
            .await
    }

    pub async fn campaign_insights(
        &self,
        identity: &Identity,
        ad_account_id: &str,
        date_preset: Option<String>,
    ) -> Result<Vec<Value>, AdsError> {
        let range =
            InsightsRange::Preset(date_preset.unwrap_or_else(|| DEFAULT_DATE_PRESET.to_string()));
        self.insights(identity, ad_account_id, InsightsLevel::Campaign, range)
            .await
    }

    async fn insights(
        &self,
        identity: &Identity,
        ad_account_id: &str,
        level: InsightsLevel,
        range: InsightsRange,
    ) -> Result<Vec<Value>, AdsError> {
        let connection = self.active(identity).await?;
        let result = self
            .api
            .fetch_insights(&connection.credential, ad_account_id, level, &range)
            .await;
        self.checked(identity, result).await
    }

    pub async fn campaigns(
        &self,
        identity: &Identity,
        ad_account_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<CampaignSummary>, AdsError> {
        let connection = self.active(identity).await?;
        let result = self
            .api
            .fetch_campaigns(
                &connection.credential,
                ad_account_id,
                limit.unwrap_or(DEFAULT_CAMPAIGN_LIMIT),
            )
            .await;
        self.checked(identity, result).await
    }

    pub async fn pages(&self, identity: &Identity) -> Result<Vec<Page>, AdsError> {
        let connection = self.active(identity).await?;
        let result = self.api.fetch_pages(&connection.credential).await;
        self.checked(identity, result).await
    }

    /// Pauses or resumes one ad. Success and failure are both audited.
    pub async fn update_ad_status(
        &self,
        identity: &Identity,
        ad_id: &str,
        status: AdStatus,
        ad_account_id: &str,
        ad_name: Option<&str>,
    ) -> Result<(), AdsError> {
        let connection = self.active(identity).await?;
        let action = match status {
            AdStatus::Active => ActionKind::ResumeAd,
            AdStatus::Paused => ActionKind::PauseAd,
        };

        let mut previous_status = None;
        let result = match self.api.fetch_ad_status(&connection.credential, ad_id).await {
            Ok(previous) => {
                previous_status = Some(previous);
                self.api
                    .update_ad_status(&connection.credential, ad_id, status)
                    .await
            }
            Err(e) => Err(e),
        };

        let metadata = json!({
            "previous_status": previous_status,
            "new_status": status.as_str(),
        });
        let entry = match &result {
            Ok(()) => ActionLogEntry::success(&identity.user_id, action, TargetKind::Ad, ad_account_id),
            Err(e) => {
                ActionLogEntry::failure(&identity.user_id, action, TargetKind::Ad, ad_account_id, e)
            }
        };
        self.audit
            .record_quietly(entry.target(ad_id).named(ad_name).with_metadata(metadata))
            .await;

        self.checked(identity, result).await?;
        tracing::info!(owner_id = %identity.user_id, ad_id, status = status.as_str(), "ad status updated");
        Ok(())
    }

    pub async fn action_logs(&self, identity: &Identity) -> Result<Vec<ActionLogEntry>, AdsError> {
        Ok(self
            .audit
            .list_for_actor(&identity.user_id, MAX_ACTION_LOG_ENTRIES)
            .await?)
    }

    async fn active(&self, identity: &Identity) -> Result<Connection, AdsError> {
        self.connections
            .get_with_credential(&identity.user_id)
            .await?
            .ok_or(AdsError::NoActiveConnection)
    }

    /// Deactivates the connection when Facebook reports the token expired.
    async fn checked<T>(
        &self,
        identity: &Identity,
        result: Result<T, GraphError>,
    ) -> Result<T, AdsError> {
        match result {
            Err(e) if e.is_expired_credential() => {
                tracing::warn!(owner_id = %identity.user_id, "Facebook token expired, deactivating connection");
                if let Err(store_err) = self.connections.deactivate(&identity.user_id).await {
                    tracing::warn!(owner_id = %identity.user_id, error = %store_err, "failed to deactivate connection");
                }
                Err(e.into())
            }
            other => Ok(other?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tests::connection;
    use crate::memory::MemoryStore;
    use crate::models::{ActionResult, Expiry};
    use crate::testing::{self, FakeFacebook, UnreliableStore};
    use chrono::Utc;

    async fn setup(fake: FakeFacebook) -> (Arc<FakeFacebook>, Arc<MemoryStore>, AdsService) {
        let fake = Arc::new(fake);
        let store = Arc::new(MemoryStore::new());
        store
            .insert(connection("user_1", "token_1", Expiry::after(Utc::now(), 3600)))
            .await;
        let service = AdsService::new(fake.clone(), store.clone(), AuditLog::new(store.clone()));
        (fake, store, service)
    }

    #[tokio::test]
    async fn sync_replaces_cached_ad_accounts() {
        let (_fake, _store, service) = setup(FakeFacebook::new()).await;
        let identity = Identity::new("user_1");
        assert!(service.ad_accounts(&identity).await.unwrap().is_empty());

        let synced = service.sync_ad_accounts(&identity).await.unwrap();

        assert_eq!(synced, testing::ad_accounts());
        assert_eq!(service.ad_accounts(&identity).await.unwrap(), synced);
    }

    #[tokio::test]
    async fn disconnected_caller_gets_no_active_connection() {
        let (fake, _store, service) = setup(FakeFacebook::new()).await;
        let identity = Identity::new("user_1");

        service.disconnect(&identity).await.unwrap();
        service.disconnect(&identity).await.unwrap();

        assert!(!service.has_active_connection(&identity).await.unwrap());
        assert!(service.ad_accounts(&identity).await.unwrap().is_empty());
        assert!(matches!(
            service.pages(&identity).await.unwrap_err(),
            AdsError::NoActiveConnection
        ));
        assert!(fake.calls().is_empty());

        let view = service.connection(&identity).await.unwrap().unwrap();
        assert!(!view.is_active);
    }

    #[tokio::test]
    async fn defaults_fill_in_campaign_limit_and_date_preset() {
        let (fake, _store, service) = setup(FakeFacebook::new()).await;
        let identity = Identity::new("user_1");

        service.campaigns(&identity, "act_123456", None).await.unwrap();
        let rows = service
            .account_insights(&identity, "act_123456", None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(
            fake.calls(),
            vec![
                "fetch_campaigns:act_123456/25".to_string(),
                "fetch_insights:act_123456".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn status_change_is_audited_with_previous_status() {
        let (fake, _store, service) = setup(FakeFacebook::new()).await;
        let identity = Identity::new("user_1");

        service
            .update_ad_status(&identity, "ad_9", AdStatus::Paused, "act_123456", Some("Banner"))
            .await
            .unwrap();

        assert_eq!(fake.count("update_ad_status"), 1);
        assert!(fake.calls().contains(&"update_ad_status:ad_9=PAUSED".to_string()));

        let logs = service.action_logs(&identity).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ActionKind::PauseAd);
        assert_eq!(logs[0].target_id.as_deref(), Some("ad_9"));
        assert_eq!(logs[0].target_name.as_deref(), Some("Banner"));
        assert_eq!(
            logs[0].metadata,
            Some(json!({"previous_status": "ACTIVE", "new_status": "PAUSED"}))
        );
    }

    #[tokio::test]
    async fn failed_status_change_is_audited_as_failure() {
        let (_fake, _store, service) = setup(FakeFacebook::new().failing(
            "update_ad_status",
            GraphError::RemoteApi {
                code: 100,
                message: "Invalid ad".to_string(),
            },
        ))
        .await;
        let identity = Identity::new("user_1");

        let err = service
            .update_ad_status(&identity, "ad_9", AdStatus::Active, "act_123456", None)
            .await
            .unwrap_err();

        assert!(matches!(err, AdsError::Graph(GraphError::RemoteApi { code: 100, .. })));
        let logs = service.action_logs(&identity).await.unwrap();
        assert_eq!(logs[0].action, ActionKind::ResumeAd);
        assert_eq!(logs[0].result, ActionResult::Failure);
    }

    #[tokio::test]
    async fn expired_credential_deactivates_connection() {
        let (_fake, store, service) =
            setup(FakeFacebook::new().failing("fetch_pages", GraphError::ExpiredCredential)).await;
        let identity = Identity::new("user_1");

        let err = service.pages(&identity).await.unwrap_err();

        assert!(matches!(err, AdsError::Graph(GraphError::ExpiredCredential)));
        assert!(!store.find("user_1").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn expired_credential_survives_a_failed_deactivate() {
        let fake = Arc::new(
            FakeFacebook::new().failing("fetch_pages", GraphError::ExpiredCredential),
        );
        let memory = Arc::new(MemoryStore::new());
        memory
            .insert(connection("user_1", "token_1", Expiry::after(Utc::now(), 3600)))
            .await;
        let store = Arc::new(UnreliableStore::new(memory.clone()).failing_deactivate());
        let service = AdsService::new(fake, store.clone(), AuditLog::new(memory));

        let err = service.pages(&Identity::new("user_1")).await.unwrap_err();

        assert!(matches!(err, AdsError::Graph(GraphError::ExpiredCredential)));
        assert_eq!(store.deactivated(), vec!["user_1".to_string()]);
    }
}
