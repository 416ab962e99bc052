//! Persistence seams. `db` backs them with Postgres, `memory` with maps.

use crate::crypto::CipherError;
use crate::models::{
    ActionLogEntry, AdAccount, Connection, ConnectionView, CreatedAdRecord, Credential,
    NewConnection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),
    #[error("Token encryption error: {0}")]
    Cipher(#[from] CipherError),
    #[error("No Facebook connection found for {0}")]
    NotFound(String),
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// The row exists but cannot be decoded, e.g. sealed under a rotated key.
    pub fn is_unreadable(&self) -> bool {
        matches!(self, StoreError::Cipher(_) | StoreError::Corrupt(_))
    }
}

/// An active row that failed to decode during a scan.
#[derive(Debug)]
pub struct UnreadableConnection {
    pub owner_id: String,
    pub error: StoreError,
}

pub type ActiveConnection = Result<Connection, UnreadableConnection>;

/// One Connection per owner. Every transition is a single patch; the last
/// writer wins for a given field.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Creates or fully replaces the owner's connection; always active afterwards.
    async fn upsert(&self, owner_id: &str, connection: NewConnection) -> Result<(), StoreError>;

    /// Raw record, regardless of expiry or active flag.
    async fn find(&self, owner_id: &str) -> Result<Option<Connection>, StoreError>;

    /// Idempotent; a missing connection is not an error.
    async fn deactivate(&self, owner_id: &str) -> Result<(), StoreError>;

    async fn update_ad_accounts(
        &self,
        owner_id: &str,
        ad_accounts: Vec<AdAccount>,
    ) -> Result<(), StoreError>;

    async fn update_credential(
        &self,
        owner_id: &str,
        credential: &Credential,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Every active row, sorted by owner. Rows that fail to decode are
    /// reported individually instead of failing the whole listing.
    async fn list_active(&self) -> Result<Vec<ActiveConnection>, StoreError>;

    /// Like `find`, but an undecodable row is deactivated and reported as absent.
    async fn find_readable(&self, owner_id: &str) -> Result<Option<Connection>, StoreError> {
        match self.find(owner_id).await {
            Err(err) if err.is_unreadable() => {
                tracing::warn!(owner_id, error = %err, "stored connection is unreadable, deactivating");
                if let Err(e) = self.deactivate(owner_id).await {
                    tracing::error!(owner_id, error = %e, "failed to deactivate connection");
                }
                Ok(None)
            }
            other => other,
        }
    }

    async fn get_safe_view(&self, owner_id: &str) -> Result<Option<ConnectionView>, StoreError> {
        Ok(self.find_readable(owner_id).await?.map(|connection| connection.view()))
    }

    /// Usable connection or nothing: missing, inactive, expired and
    /// invalid-expiry connections all come back as `None`.
    async fn get_with_credential(&self, owner_id: &str) -> Result<Option<Connection>, StoreError> {
        let now = Utc::now();
        Ok(self.find_readable(owner_id).await?.filter(|connection| {
            let usable = connection.is_active && connection.expires_at.is_usable_at(now);
            if connection.is_active && !usable {
                tracing::info!(
                    owner_id,
                    expires_at = ?connection.expires_at.timestamp(),
                    "connection token expired or has no valid expiry"
                );
            }
            usable
        }))
    }
}

#[async_trait]
pub trait ActionLogStore: Send + Sync {
    async fn append(&self, entry: ActionLogEntry) -> Result<(), StoreError>;

    /// Newest first, at most `limit` entries.
    async fn list_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionLogEntry>, StoreError>;
}

#[async_trait]
pub trait CreatedAdStore: Send + Sync {
    async fn save_created_ad(&self, record: CreatedAdRecord) -> Result<(), StoreError>;

    async fn list_created_ads(&self, owner_id: &str) -> Result<Vec<CreatedAdRecord>, StoreError>;
}
