use crate::ad_spec::{AdStatus, Budget, Targeting};
use crate::crypto::TokenCipher;
use crate::models::{
    ActionLogEntry, AdAccount, Connection, CreatedAdIds, CreatedAdRecord, Credential, Expiry,
    NewConnection,
};
use crate::store::{
    ActionLogStore, ActiveConnection, ConnectionStore, CreatedAdStore, StoreError,
    UnreadableConnection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use std::str::FromStr;
use thiserror::Error;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, Config, Row};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] tokio_postgres::Error),
    #[error("SSL error: {0}")]
    SslError(#[from] openssl::error::ErrorStack),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
}

pub struct Database {
    client: Client,
    cipher: TokenCipher,
}

impl Database {
    pub async fn new(
        database_url: &str,
        accept_invalid_certs: bool,
        cipher: TokenCipher,
    ) -> Result<Self, DatabaseError> {
        // Configure SSL
        let mut builder = SslConnector::builder(SslMethod::tls())?;
        if accept_invalid_certs {
            tracing::warn!("database TLS certificate verification is disabled");
            builder.set_verify(SslVerifyMode::NONE);
        }
        let connector = MakeTlsConnector::new(builder.build());

        // Parse the connection config from URL
        let mut config = Config::from_str(database_url)
            .map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?;

        let (client, connection) = config
            .connect_timeout(std::time::Duration::from_secs(5))
            .connect(connector)
            .await
            .map_err(DatabaseError::ConnectionError)?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "database connection error");
            }
        });

        Ok(Self { client, cipher })
    }

    /// Applies the schema; every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    fn connection_from_row(&self, row: &Row) -> Result<Connection, StoreError> {
        let sealed: Vec<u8> = row.try_get("access_token_ciphertext")?;
        let Json(ad_accounts): Json<Vec<AdAccount>> = row.try_get("ad_accounts")?;
        Ok(Connection {
            owner_id: row.try_get("owner_id")?,
            fb_user_id: row.try_get("fb_user_id")?,
            credential: self.cipher.open(&sealed)?,
            credential_type: row.try_get("token_type")?,
            expires_at: Expiry::from_millis(row.try_get("expires_at_ms")?),
            scopes: row.try_get("scopes")?,
            ad_accounts,
            connected_at: row.try_get("connected_at")?,
            last_synced_at: row.try_get("last_synced_at")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

fn corrupt<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn action_log_from_row(row: &Row) -> Result<ActionLogEntry, StoreError> {
    let action: String = row.try_get("action")?;
    let target_type: String = row.try_get("target_type")?;
    let result: String = row.try_get("result")?;
    Ok(ActionLogEntry {
        actor_id: row.try_get("actor_id")?,
        action: action.parse().map_err(corrupt)?,
        target_type: target_type.parse().map_err(corrupt)?,
        target_id: row.try_get("target_id")?,
        target_name: row.try_get("target_name")?,
        ad_account_id: row.try_get("ad_account_id")?,
        result: result.parse().map_err(corrupt)?,
        error_message: row.try_get("error_message")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("logged_at")?,
    })
}

fn created_ad_from_row(row: &Row) -> Result<CreatedAdRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let Json(budget): Json<Budget> = row.try_get("budget")?;
    let Json(targeting): Json<Targeting> = row.try_get("targeting")?;
    let status = match status.as_str() {
        "ACTIVE" => AdStatus::Active,
        "PAUSED" => AdStatus::Paused,
        other => return Err(corrupt(format!("unknown ad status {}", other))),
    };
    Ok(CreatedAdRecord {
        owner_id: row.try_get("owner_id")?,
        ad_account_id: row.try_get("ad_account_id")?,
        ids: CreatedAdIds {
            campaign_id: row.try_get("campaign_id")?,
            ad_set_id: row.try_get("ad_set_id")?,
            image_hash: row.try_get("image_hash")?,
            creative_id: row.try_get("creative_id")?,
            ad_id: row.try_get("ad_id")?,
        },
        campaign_name: row.try_get("campaign_name")?,
        objective: row.try_get("objective")?,
        status,
        budget,
        targeting,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ConnectionStore for Database {
    async fn upsert(&self, owner_id: &str, connection: NewConnection) -> Result<(), StoreError> {
        let sealed = self.cipher.seal(&connection.credential)?;
        let now = Utc::now();
        self.client
            .execute(
                "INSERT INTO facebook_connections (
                    owner_id, fb_user_id, access_token_ciphertext, token_type, expires_at_ms,
                    scopes, ad_accounts, connected_at, last_synced_at, is_active
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, TRUE)
                 ON CONFLICT (owner_id) DO UPDATE SET
                    fb_user_id = EXCLUDED.fb_user_id,
                    access_token_ciphertext = EXCLUDED.access_token_ciphertext,
                    token_type = EXCLUDED.token_type,
                    expires_at_ms = EXCLUDED.expires_at_ms,
                    scopes = EXCLUDED.scopes,
                    ad_accounts = EXCLUDED.ad_accounts,
                    last_synced_at = EXCLUDED.last_synced_at,
                    is_active = TRUE",
                &[
                    &owner_id,
                    &connection.fb_user_id,
                    &sealed,
                    &connection.credential_type,
                    &connection.expires_at.as_millis(),
                    &connection.scopes,
                    &Json(&connection.ad_accounts),
                    &now,
                ],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, owner_id: &str) -> Result<Option<Connection>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM facebook_connections WHERE owner_id = $1",
                &[&owner_id],
            )
            .await?;
        row.map(|row| self.connection_from_row(&row)).transpose()
    }

    async fn deactivate(&self, owner_id: &str) -> Result<(), StoreError> {
        self.client
            .execute(
                "UPDATE facebook_connections SET is_active = FALSE WHERE owner_id = $1",
                &[&owner_id],
            )
            .await?;
        Ok(())
    }

    async fn update_ad_accounts(
        &self,
        owner_id: &str,
        ad_accounts: Vec<AdAccount>,
    ) -> Result<(), StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE facebook_connections
                 SET ad_accounts = $2, last_synced_at = $3
                 WHERE owner_id = $1",
                &[&owner_id, &Json(&ad_accounts), &Utc::now()],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(owner_id.to_string()));
        }
        Ok(())
    }

    async fn update_credential(
        &self,
        owner_id: &str,
        credential: &Credential,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sealed = self.cipher.seal(credential)?;
        let updated = self
            .client
            .execute(
                "UPDATE facebook_connections
                 SET access_token_ciphertext = $2, expires_at_ms = $3, last_synced_at = $4
                 WHERE owner_id = $1",
                &[&owner_id, &sealed, &expires_at.timestamp_millis(), &Utc::now()],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(owner_id.to_string()));
        }
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ActiveConnection>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM facebook_connections WHERE is_active = TRUE ORDER BY owner_id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                self.connection_from_row(row)
                    .map_err(|error| UnreadableConnection {
                        owner_id: row.try_get("owner_id").unwrap_or_default(),
                        error,
                    })
            })
            .collect())
    }
}

#[async_trait]
impl ActionLogStore for Database {
    async fn append(&self, entry: ActionLogEntry) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO facebook_action_logs (
                    actor_id, action, target_type, target_id, target_name, ad_account_id,
                    result, error_message, metadata, logged_at
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                &[
                    &entry.actor_id,
                    &entry.action.as_str(),
                    &entry.target_type.as_str(),
                    &entry.target_id,
                    &entry.target_name,
                    &entry.ad_account_id,
                    &entry.result.as_str(),
                    &entry.error_message,
                    &entry.metadata,
                    &entry.timestamp,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_for_actor(
        &self,
        actor_id: &str,
        limit: usize,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .client
            .query(
                "SELECT * FROM facebook_action_logs
                 WHERE actor_id = $1
                 ORDER BY logged_at DESC, id DESC
                 LIMIT $2",
                &[&actor_id, &limit],
            )
            .await?;
        rows.iter().map(action_log_from_row).collect()
    }
}

#[async_trait]
impl CreatedAdStore for Database {
    async fn save_created_ad(&self, record: CreatedAdRecord) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO facebook_created_ads (
                    owner_id, ad_account_id, campaign_id, ad_set_id, image_hash, creative_id,
                    ad_id, campaign_name, objective, status, budget, targeting, created_at
                 )
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                &[
                    &record.owner_id,
                    &record.ad_account_id,
                    &record.ids.campaign_id,
                    &record.ids.ad_set_id,
                    &record.ids.image_hash,
                    &record.ids.creative_id,
                    &record.ids.ad_id,
                    &record.campaign_name,
                    &record.objective,
                    &record.status.as_str(),
                    &Json(&record.budget),
                    &Json(&record.targeting),
                    &record.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_created_ads(&self, owner_id: &str) -> Result<Vec<CreatedAdRecord>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM facebook_created_ads WHERE owner_id = $1 ORDER BY created_at DESC",
                &[&owner_id],
            )
            .await?;
        rows.iter().map(created_ad_from_row).collect()
    }
}
