//! Daily scan that extends long-lived Facebook tokens before they expire.

use crate::constants::{REFRESH_HOUR_UTC, REFRESH_MINUTE_UTC, REFRESH_PAUSE_MS, REFRESH_WINDOW_DAYS};
use crate::facebook::OAuthApi;
use crate::graph::GraphError;
use crate::models::{Connection, Expiry};
use crate::store::{ConnectionStore, StoreError};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{self, Duration};

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Connections expiring within this many whole days get refreshed.
    pub window_days: i64,
    pub pause_between: Duration,
    pub hour: u32,
    pub minute: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            window_days: REFRESH_WINDOW_DAYS,
            pause_between: Duration::from_millis(REFRESH_PAUSE_MS),
            hour: REFRESH_HOUR_UTC,
            minute: REFRESH_MINUTE_UTC,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub total: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub invalid: usize,
}

#[derive(Error, Debug)]
enum RefreshError {
    #[error(transparent)]
    Remote(#[from] GraphError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("refreshed token has no valid expiry")]
    NoExpiry,
}

/// Proactively extends long-lived credentials before they expire.
pub struct TokenRefreshWorker {
    connections: Arc<dyn ConnectionStore>,
    oauth: Arc<dyn OAuthApi>,
    settings: RefreshSettings,
}

impl TokenRefreshWorker {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        oauth: Arc<dyn OAuthApi>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            connections,
            oauth,
            settings,
        }
    }

    /// One scan over every active connection.
    pub async fn run_once(&self) -> Result<RefreshSummary, StoreError> {
        let connections = self.connections.list_active().await?;
        let mut summary = RefreshSummary {
            total: connections.len(),
            ..RefreshSummary::default()
        };
        tracing::info!(total = summary.total, "starting token refresh scan");

        let mut attempted = false;
        for listed in &connections {
            let connection = match listed {
                Ok(connection) => connection,
                Err(unreadable) => {
                    tracing::error!(
                        owner_id = %unreadable.owner_id,
                        error = %unreadable.error,
                        "stored connection is unreadable"
                    );
                    self.deactivate(&unreadable.owner_id, "unreadable row").await;
                    summary.invalid += 1;
                    continue;
                }
            };
            let now = Utc::now();
            let days_left = match connection.expires_at.days_until(now) {
                Some(days) => days,
                None => {
                    self.deactivate(&connection.owner_id, "invalid expiry").await;
                    summary.invalid += 1;
                    continue;
                }
            };
            if days_left > self.settings.window_days {
                summary.skipped += 1;
                continue;
            }

            if attempted && !self.settings.pause_between.is_zero() {
                time::sleep(self.settings.pause_between).await;
            }
            attempted = true;

            if self.refresh(connection, days_left).await {
                summary.refreshed += 1;
            } else {
                summary.failed += 1;
            }
        }

        tracing::info!(
            total = summary.total,
            refreshed = summary.refreshed,
            failed = summary.failed,
            skipped = summary.skipped,
            invalid = summary.invalid,
            "token refresh scan finished"
        );
        Ok(summary)
    }

    /// No retry within a run; any failure deactivates the connection.
    async fn refresh(&self, connection: &Connection, days_left: i64) -> bool {
        let owner_id = connection.owner_id.as_str();
        tracing::info!(owner_id, days_left, "refreshing Facebook token");
        match self.exchange_and_store(connection).await {
            Ok(expires_at) => {
                tracing::info!(owner_id, %expires_at, "Facebook token refreshed");
                true
            }
            Err(e) => {
                tracing::error!(owner_id, error = %e, "Facebook token refresh failed");
                self.deactivate(owner_id, "refresh failed").await;
                false
            }
        }
    }

    async fn exchange_and_store(
        &self,
        connection: &Connection,
    ) -> Result<DateTime<Utc>, RefreshError> {
        let token = self
            .oauth
            .exchange_for_long_lived(&connection.credential)
            .await?;
        let expires_at = match Expiry::after(Utc::now(), token.expires_in) {
            Expiry::At(at) => at,
            Expiry::Invalid => return Err(RefreshError::NoExpiry),
        };
        self.oauth.verify_credential(&token.credential).await?;
        self.connections
            .update_credential(&connection.owner_id, &token.credential, expires_at)
            .await?;
        Ok(expires_at)
    }

    async fn deactivate(&self, owner_id: &str, reason: &str) {
        tracing::warn!(owner_id, reason, "deactivating Facebook connection");
        if let Err(e) = self.connections.deactivate(owner_id).await {
            tracing::error!(owner_id, error = %e, "failed to deactivate connection");
        }
    }

    /// Runs `run_once` every day at the configured UTC time, forever.
    pub async fn run(&self) {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.settings.hour, self.settings.minute);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(next_run = %next, "token refresh scheduled");
            time::sleep(wait).await;

            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "token refresh scan failed");
            }
        }
    }
}

/// Next `hour:minute` UTC strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}
