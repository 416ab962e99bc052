use crate::constants::MAX_ACTION_LOG_ENTRIES;
use crate::models::ActionLogEntry;
use crate::store::{ActionLogStore, StoreError};
use std::sync::Arc;

/// Append-only log of mutating Graph API actions.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn ActionLogStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ActionLogStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: ActionLogEntry) -> Result<(), StoreError> {
        self.store.append(entry).await
    }

    /// Like `record`, but a failed write is only logged. Used where the
    /// caller's own outcome must not be masked by the audit trail.
    pub async fn record_quietly(&self, entry: ActionLogEntry) {
        let action = entry.action.as_str();
        if let Err(e) = self.store.append(entry).await {
            tracing::warn!(action, error = %e, "failed to write action log entry");
        }
    }

    /// Most recent first, capped at 100 entries.
    pub async fn list_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        self.store
            .list_for_actor(actor_id, limit.min(MAX_ACTION_LOG_ENTRIES))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{ActionKind, ActionResult, TargetKind};
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn lists_newest_first_for_actor_only_and_caps_limit() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditLog::new(store);
        let start = Utc::now();

        for i in 0..120 {
            let mut entry =
                ActionLogEntry::success("user_1", ActionKind::PauseAd, TargetKind::Ad, "act_1")
                    .target(format!("ad_{}", i));
            entry.timestamp = start + Duration::seconds(i);
            audit.record(entry).await.unwrap();
        }
        audit
            .record(ActionLogEntry::failure(
                "user_2",
                ActionKind::ResumeAd,
                TargetKind::Ad,
                "act_2",
                "boom",
            ))
            .await
            .unwrap();

        let entries = audit.list_for_actor("user_1", 500).await.unwrap();
        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0].target_id.as_deref(), Some("ad_119"));
        assert!(entries.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let other = audit.list_for_actor("user_2", 10).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].result, ActionResult::Failure);
        assert_eq!(other[0].error_message.as_deref(), Some("boom"));
    }
}
