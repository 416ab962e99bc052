use crate::models::{
    ActionLogEntry, AdAccount, Connection, CreatedAdRecord, Credential, Expiry, NewConnection,
};
use crate::store::{ActionLogStore, ActiveConnection, ConnectionStore, CreatedAdStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    connections: RwLock<HashMap<String, Connection>>,
    action_logs: RwLock<Vec<ActionLogEntry>>,
    created_ads: RwLock<Vec<CreatedAdRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a connection as-is, bypassing upsert semantics.
    pub async fn insert(&self, connection: Connection) {
        self.connections
            .write()
            .await
            .insert(connection.owner_id.clone(), connection);
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn upsert(&self, owner_id: &str, connection: NewConnection) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut connections = self.connections.write().await;
        let connected_at = connections
            .get(owner_id)
            .map(|existing| existing.connected_at)
            .unwrap_or(now);

        connections.insert(
            owner_id.to_string(),
            Connection {
                owner_id: owner_id.to_string(),
                fb_user_id: connection.fb_user_id,
                credential: connection.credential,
                credential_type: connection.credential_type,
                expires_at: connection.expires_at,
                scopes: connection.scopes,
                ad_accounts: connection.ad_accounts,
                connected_at,
                last_synced_at: now,
                is_active: true,
            },
        );
        Ok(())
    }

    async fn find(&self, owner_id: &str) -> Result<Option<Connection>, StoreError> {
        Ok(self.connections.read().await.get(owner_id).cloned())
    }

    async fn deactivate(&self, owner_id: &str) -> Result<(), StoreError> {
        if let Some(connection) = self.connections.write().await.get_mut(owner_id) {
            connection.is_active = false;
        }
        Ok(())
    }

    async fn update_ad_accounts(
        &self,
        owner_id: &str,
        ad_accounts: Vec<AdAccount>,
    ) -> Result<(), StoreError> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::NotFound(owner_id.to_string()))?;
        connection.ad_accounts = ad_accounts;
        connection.last_synced_at = Utc::now();
        Ok(())
    }

    async fn update_credential(
        &self,
        owner_id: &str,
        credential: &Credential,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(owner_id)
            .ok_or_else(|| StoreError::NotFound(owner_id.to_string()))?;
        connection.credential = credential.clone();
        connection.expires_at = Expiry::At(expires_at);
        connection.last_synced_at = Utc::now();
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ActiveConnection>, StoreError> {
        let mut active: Vec<Connection> = self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.owner_id.cmp(&b.owner_id));
        Ok(active.into_iter().map(Ok).collect())
    }
}

#[async_trait]
impl ActionLogStore for MemoryStore {
    async fn append(&self, entry: ActionLogEntry) -> Result<(), StoreError> {
        self.action_logs.write().await.push(entry);
        Ok(())
    }

    async fn list_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        let logs = self.action_logs.read().await;
        // Appends are chronological; walking backwards keeps ties in reverse
        // insertion order.
        Ok(logs
            .iter()
            .rev()
            .filter(|entry| entry.actor_id == actor_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CreatedAdStore for MemoryStore {
    async fn save_created_ad(&self, record: CreatedAdRecord) -> Result<(), StoreError> {
        self.created_ads.write().await.push(record);
        Ok(())
    }

    async fn list_created_ads(&self, owner_id: &str) -> Result<Vec<CreatedAdRecord>, StoreError> {
        Ok(self
            .created_ads
            .read()
            .await
            .iter()
            .rev()
            .filter(|record| record.owner_id == owner_id)
            .cloned()
            .collect())
    }
}
