//! Creates the campaign, ad set, image, creative, then ad, with compensating deletes.
//!
//! Campaigns and ad sets are the only objects that get rolled back. Uploaded
//! images and orphaned creatives are left in the ad account.

use crate::ad_spec::AdCreationRequest;
use crate::audit::AuditLog;
use crate::facebook::CampaignApi;
use crate::graph::GraphError;
use crate::models::{
    ActionKind, ActionLogEntry, CreatedAdIds, CreatedAdRecord, Credential, Identity, TargetKind,
    ValidationError,
};
use crate::store::{ConnectionStore, CreatedAdStore, StoreError};
use chrono::Utc;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    Campaign,
    AdSet,
    Image,
    Creative,
    Ad,
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SagaStep::Campaign => "campaign",
            SagaStep::AdSet => "ad set",
            SagaStep::Image => "image upload",
            SagaStep::Creative => "creative",
            SagaStep::Ad => "ad",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum AdCreationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No active Facebook connection")]
    NoActiveConnection,
    #[error("Failed to create ad ({step} step): {source}")]
    Step {
        step: SagaStep,
        #[source]
        source: GraphError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdCreationError {
    pub fn is_expired_credential(&self) -> bool {
        matches!(self, AdCreationError::Step { source, .. } if source.is_expired_credential())
    }
}

/// Undo action for an object the saga already created.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Compensation {
    DeleteAdSet(String),
    DeleteCampaign(String),
}

impl Compensation {
    fn object_id(&self) -> &str {
        match self {
            Compensation::DeleteAdSet(id) | Compensation::DeleteCampaign(id) => id,
        }
    }

    fn audit_kind(&self) -> (ActionKind, TargetKind) {
        match self {
            Compensation::DeleteAdSet(_) => (ActionKind::DeleteAdSet, TargetKind::AdSet),
            Compensation::DeleteCampaign(_) => (ActionKind::DeleteCampaign, TargetKind::Campaign),
        }
    }
}

struct StepFailure {
    step: SagaStep,
    source: GraphError,
}

/// Per-run context threaded through the steps.
struct Run<'a> {
    actor_id: &'a str,
    credential: &'a Credential,
    request: &'a AdCreationRequest,
    compensations: Vec<Compensation>,
}

pub struct AdCreationOrchestrator {
    api: Arc<dyn CampaignApi>,
    connections: Arc<dyn ConnectionStore>,
    audit: AuditLog,
    created_ads: Arc<dyn CreatedAdStore>,
}

impl AdCreationOrchestrator {
    pub fn new(
        api: Arc<dyn CampaignApi>,
        connections: Arc<dyn ConnectionStore>,
        audit: AuditLog,
        created_ads: Arc<dyn CreatedAdStore>,
    ) -> Self {
        Self {
            api,
            connections,
            audit,
            created_ads,
        }
    }

    pub async fn create_complete_ad(
        &self,
        identity: &Identity,
        request: AdCreationRequest,
    ) -> Result<CreatedAdIds, AdCreationError> {
        request.validate()?;

        let connection = self
            .connections
            .get_with_credential(&identity.user_id)
            .await?
            .ok_or(AdCreationError::NoActiveConnection)?;

        let mut run = Run {
            actor_id: &identity.user_id,
            credential: &connection.credential,
            request: &request,
            compensations: Vec::new(),
        };

        tracing::info!(
            actor_id = run.actor_id,
            ad_account_id = %request.ad_account_id,
            campaign = %request.campaign.name,
            "creating ad"
        );

        let ids = match self.run_steps(&mut run).await {
            Ok(ids) => ids,
            Err(failure) => {
                tracing::error!(
                    actor_id = run.actor_id,
                    step = %failure.step,
                    error = %failure.source,
                    "ad creation failed, rolling back"
                );
                self.roll_back(&mut run).await;
                if failure.source.is_expired_credential() {
                    tracing::warn!(actor_id = run.actor_id, "credential expired, deactivating connection");
                    if let Err(e) = self.connections.deactivate(&identity.user_id).await {
                        tracing::warn!(actor_id = run.actor_id, error = %e, "failed to deactivate connection");
                    }
                }
                return Err(AdCreationError::Step {
                    step: failure.step,
                    source: failure.source,
                });
            }
        };

        self.created_ads
            .save_created_ad(CreatedAdRecord {
                owner_id: identity.user_id.clone(),
                ad_account_id: request.ad_account_id.clone(),
                ids: ids.clone(),
                campaign_name: request.campaign.name.clone(),
                objective: request.campaign.objective.clone(),
                status: request.status,
                budget: request.ad_set.budget.clone(),
                targeting: request.ad_set.targeting.clone(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(actor_id = run.actor_id, ad_id = %ids.ad_id, "ad created");
        Ok(ids)
    }

    pub async fn created_ads(
        &self,
        identity: &Identity,
    ) -> Result<Vec<CreatedAdRecord>, AdCreationError> {
        Ok(self.created_ads.list_created_ads(&identity.user_id).await?)
    }

    async fn run_steps(&self, run: &mut Run<'_>) -> Result<CreatedAdIds, StepFailure> {
        let request = run.request;
        let account = request.ad_account_id.as_str();

        let result = self
            .api
            .create_campaign(run.credential, account, &request.campaign, request.status)
            .await;
        let campaign_id = self
            .audited(
                run,
                SagaStep::Campaign,
                ActionKind::CreateCampaign,
                TargetKind::Campaign,
                &request.campaign.name,
                result,
            )
            .await?;
        run.compensations
            .push(Compensation::DeleteCampaign(campaign_id.clone()));

        let result = self
            .api
            .create_ad_set(
                run.credential,
                account,
                &campaign_id,
                &request.ad_set,
                request.status,
            )
            .await;
        let ad_set_id = self
            .audited(
                run,
                SagaStep::AdSet,
                ActionKind::CreateAdSet,
                TargetKind::AdSet,
                &request.ad_set.name,
                result,
            )
            .await?;
        run.compensations
            .push(Compensation::DeleteAdSet(ad_set_id.clone()));

        let image_hash = self
            .api
            .upload_image(run.credential, account, &request.image)
            .await
            .map_err(|source| StepFailure {
                step: SagaStep::Image,
                source,
            })?;

        let result = self
            .api
            .create_creative(run.credential, account, &image_hash, &request.creative)
            .await;
        let creative_id = self
            .audited(
                run,
                SagaStep::Creative,
                ActionKind::CreateCreative,
                TargetKind::Creative,
                &request.creative.name,
                result,
            )
            .await?;

        let result = self
            .api
            .create_ad(
                run.credential,
                account,
                &ad_set_id,
                &creative_id,
                &request.ad_name,
                request.status,
            )
            .await;
        let ad_id = self
            .audited(
                run,
                SagaStep::Ad,
                ActionKind::CreateAd,
                TargetKind::Ad,
                &request.ad_name,
                result,
            )
            .await?;

        Ok(CreatedAdIds {
            campaign_id,
            ad_set_id,
            image_hash,
            creative_id,
            ad_id,
        })
    }

    /// Writes the audit entry for a create step and tags a failure with its step.
    async fn audited(
        &self,
        run: &Run<'_>,
        step: SagaStep,
        action: ActionKind,
        target_type: TargetKind,
        name: &str,
        result: Result<String, GraphError>,
    ) -> Result<String, StepFailure> {
        let account = run.request.ad_account_id.as_str();
        match result {
            Ok(id) => {
                let entry = ActionLogEntry::success(run.actor_id, action, target_type, account)
                    .target(id.as_str())
                    .named(Some(name));
                self.audit.record_quietly(entry).await;
                Ok(id)
            }
            Err(source) => {
                let entry =
                    ActionLogEntry::failure(run.actor_id, action, target_type, account, &source)
                        .named(Some(name))
                        .with_metadata(json!({ "step": step.to_string() }));
                self.audit.record_quietly(entry).await;
                Err(StepFailure { step, source })
            }
        }
    }

    /// Most recent first. Cleanup failures are logged and audited, never raised.
    async fn roll_back(&self, run: &mut Run<'_>) {
        let account = run.request.ad_account_id.as_str();
        while let Some(compensation) = run.compensations.pop() {
            let object_id = compensation.object_id();
            let (action, target_type) = compensation.audit_kind();
            let entry = match self.api.delete_object(run.credential, object_id).await {
                Ok(()) => {
                    tracing::info!(object_id, action = action.as_str(), "rolled back");
                    ActionLogEntry::success(run.actor_id, action, target_type, account)
                        .target(object_id)
                }
                Err(e) => {
                    tracing::warn!(object_id, error = %e, "rollback delete failed");
                    ActionLogEntry::failure(run.actor_id, action, target_type, account, &e)
                        .target(object_id)
                }
            };
            self.audit
                .record_quietly(entry.with_metadata(json!({ "rollback": true })))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad_spec::tests::sample_request;
    use crate::memory::tests::connection;
    use crate::memory::MemoryStore;
    use crate::models::{ActionResult, Expiry};
    use crate::store::ActionLogStore;
    use crate::testing::{FakeFacebook, UnreliableStore};

    async fn setup(fake: FakeFacebook) -> (Arc<FakeFacebook>, Arc<MemoryStore>, AdCreationOrchestrator) {
        let fake = Arc::new(fake);
        let store = Arc::new(MemoryStore::new());
        store
            .insert(connection("user_1", "token_1", Expiry::after(Utc::now(), 3600)))
            .await;
        let orchestrator = AdCreationOrchestrator::new(
            fake.clone(),
            store.clone(),
            AuditLog::new(store.clone()),
            store.clone(),
        );
        (fake, store, orchestrator)
    }

    fn api_error() -> GraphError {
        GraphError::RemoteApi {
            code: 100,
            message: "Invalid parameter".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_every_object_in_order_and_records_it() {
        let (fake, store, orchestrator) = setup(FakeFacebook::new()).await;

        let ids = orchestrator
            .create_complete_ad(&Identity::new("user_1"), sample_request())
            .await
            .unwrap();

        assert_eq!(
            ids,
            CreatedAdIds {
                campaign_id: "campaign_1".to_string(),
                ad_set_id: "adset_1".to_string(),
                image_hash: "hash_1".to_string(),
                creative_id: "creative_1".to_string(),
                ad_id: "ad_1".to_string(),
            }
        );
        assert_eq!(
            fake.calls(),
            vec![
                "create_campaign".to_string(),
                "create_ad_set:campaign_1".to_string(),
                "upload_image".to_string(),
                "create_creative:hash_1".to_string(),
                "create_ad:adset_1/creative_1".to_string(),
            ]
        );

        let records = orchestrator
            .created_ads(&Identity::new("user_1"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ids, ids);
        assert_eq!(records[0].campaign_name, "Spring Sale");

        let logs = store.list_for_actor("user_1", 100).await.unwrap();
        let actions: Vec<ActionKind> = logs.iter().map(|entry| entry.action).collect();
        assert_eq!(
            actions,
            vec![
                ActionKind::CreateAd,
                ActionKind::CreateCreative,
                ActionKind::CreateAdSet,
                ActionKind::CreateCampaign,
            ]
        );
        assert!(logs.iter().all(|entry| entry.result == ActionResult::Success));
    }

    #[tokio::test]
    async fn creative_failure_rolls_back_ad_set_then_campaign() {
        let (fake, store, orchestrator) =
            setup(FakeFacebook::new().failing("create_creative", api_error())).await;

        let err = orchestrator
            .create_complete_ad(&Identity::new("user_1"), sample_request())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to create ad (creative step): Facebook API Error: Invalid parameter (code: 100)"
        );
        let calls = fake.calls();
        assert_eq!(
            calls[calls.len() - 2..],
            [
                "delete_object:adset_1".to_string(),
                "delete_object:campaign_1".to_string(),
            ]
        );
        assert_eq!(fake.count("create_ad"), 0);
        assert!(store.list_created_ads("user_1").await.unwrap().is_empty());

        let logs = store.list_for_actor("user_1", 100).await.unwrap();
        assert_eq!(logs[0].action, ActionKind::DeleteCampaign);
        assert_eq!(logs[0].target_id.as_deref(), Some("campaign_1"));
        assert_eq!(logs[1].action, ActionKind::DeleteAdSet);
        assert_eq!(logs[2].action, ActionKind::CreateCreative);
        assert_eq!(logs[2].result, ActionResult::Failure);
    }

    #[tokio::test]
    async fn campaign_failure_has_nothing_to_roll_back() {
        let (fake, _store, orchestrator) =
            setup(FakeFacebook::new().failing("create_campaign", api_error())).await;

        let err = orchestrator
            .create_complete_ad(&Identity::new("user_1"), sample_request())
            .await
            .unwrap_err();

        assert!(matches!(err, AdCreationError::Step { step: SagaStep::Campaign, .. }));
        assert_eq!(fake.count("delete_object"), 0);
    }

    #[tokio::test]
    async fn cleanup_failures_do_not_mask_the_step_error() {
        let fake = FakeFacebook::new()
            .failing("create_ad", api_error())
            .failing(
                "delete_object",
                GraphError::Transport("connection reset".to_string()),
            );
        let (fake, store, orchestrator) = setup(fake).await;

        let err = orchestrator
            .create_complete_ad(&Identity::new("user_1"), sample_request())
            .await
            .unwrap_err();

        assert!(matches!(err, AdCreationError::Step { step: SagaStep::Ad, .. }));
        assert_eq!(fake.count("delete_object"), 2);
        let logs = store.list_for_actor("user_1", 100).await.unwrap();
        assert_eq!(logs[0].result, ActionResult::Failure);
        assert_eq!(logs[0].action, ActionKind::DeleteCampaign);
    }

    #[tokio::test]
    async fn expired_credential_deactivates_connection() {
        let (fake, store, orchestrator) = setup(
            FakeFacebook::new().failing("create_ad_set", GraphError::ExpiredCredential),
        )
        .await;

        let err = orchestrator
            .create_complete_ad(&Identity::new("user_1"), sample_request())
            .await
            .unwrap_err();

        assert!(err.is_expired_credential());
        assert_eq!(fake.count("delete_object"), 1);
        assert!(!store.find("user_1").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn expired_credential_survives_a_failed_deactivate() {
        let fake = Arc::new(
            FakeFacebook::new().failing("create_creative", GraphError::ExpiredCredential),
        );
        let memory = Arc::new(MemoryStore::new());
        memory
            .insert(connection("user_1", "token_1", Expiry::after(Utc::now(), 3600)))
            .await;
        let store = Arc::new(UnreliableStore::new(memory.clone()).failing_deactivate());
        let orchestrator = AdCreationOrchestrator::new(
            fake.clone(),
            store.clone(),
            AuditLog::new(memory.clone()),
            memory,
        );

        let err = orchestrator
            .create_complete_ad(&Identity::new("user_1"), sample_request())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AdCreationError::Step {
                step: SagaStep::Creative,
                source: GraphError::ExpiredCredential
            }
        ));
        assert!(err.is_expired_credential());
        assert_eq!(store.deactivated(), vec!["user_1".to_string()]);
        assert_eq!(fake.count("delete_object"), 2);
    }

    #[tokio::test]
    async fn invalid_request_makes_no_remote_calls() {
        let (fake, _store, orchestrator) = setup(FakeFacebook::new()).await;
        let mut request = sample_request();
        request.ad_set.budget = crate::ad_spec::Budget::Daily { amount: 0 };

        let err = orchestrator
            .create_complete_ad(&Identity::new("user_1"), request)
            .await
            .unwrap_err();

        assert!(matches!(err, AdCreationError::Validation(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_connection_is_reported() {
        let (fake, _store, orchestrator) = setup(FakeFacebook::new()).await;

        let err = orchestrator
            .create_complete_ad(&Identity::new("someone_else"), sample_request())
            .await
            .unwrap_err();

        assert!(matches!(err, AdCreationError::NoActiveConnection));
        assert!(fake.calls().is_empty());
    }
}
