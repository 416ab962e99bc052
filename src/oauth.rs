//! Facebook OAuth: building the dialog URL and completing the callback.
//!
//! The callback trusts the local account id carried in `state`
//! (`<accountId>_<timestamp>`) because the redirect can arrive without the
//! caller's session. The connection is written only after every remote fetch
//! has succeeded, so a failed callback never leaves a partial record.

use crate::constants::{FALLBACK_GRANTED_SCOPES, OAUTH_SCOPES};
use crate::facebook::{AccountApi, OAuthApi};
use crate::graph::GraphError;
use crate::models::{Expiry, NewConnection, ValidationError};
use crate::store::{ConnectionStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("{0}")]
    Denied(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] GraphError),
    #[error("Failed to save Facebook connection: {0}")]
    Store(#[from] StoreError),
}

/// Query parameters the provider redirects back with.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_reason: Option<String>,
    pub error_description: Option<String>,
}

/// Extracts the local account id from `<accountId>_<timestamp>`. Account ids
/// may contain underscores, so only the last segment is dropped.
pub fn parse_state(state: &str) -> Result<String, ValidationError> {
    let parts: Vec<&str> = state.split('_').collect();
    if parts.len() < 2 {
        return Err(ValidationError::new("Invalid state parameter format"));
    }
    let owner_id = parts[..parts.len() - 1].join("_");
    if owner_id.is_empty() {
        return Err(ValidationError::new("Invalid state parameter format"));
    }
    Ok(owner_id)
}

pub fn build_state(owner_id: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}", owner_id, now.timestamp_millis())
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub app_id: String,
    pub redirect_uri: String,
    /// e.g. `https://www.facebook.com/v23.0`
    pub dialog_base_url: String,
}

pub struct OAuthFlow {
    oauth: Arc<dyn OAuthApi>,
    accounts: Arc<dyn AccountApi>,
    connections: Arc<dyn ConnectionStore>,
    settings: OAuthSettings,
}

impl OAuthFlow {
    pub fn new(
        oauth: Arc<dyn OAuthApi>,
        accounts: Arc<dyn AccountApi>,
        connections: Arc<dyn ConnectionStore>,
        settings: OAuthSettings,
    ) -> Self {
        Self {
            oauth,
            accounts,
            connections,
            settings,
        }
    }

    /// Provider dialog URL for `owner_id`.
    pub fn authorize_url(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Url, ValidationError> {
        if owner_id.is_empty() {
            return Err(ValidationError::new("Missing account id"));
        }
        let mut url = Url::parse(&format!("{}/dialog/oauth", self.settings.dialog_base_url))
            .map_err(|e| ValidationError::new(format!("Invalid dialog URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.app_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("state", &build_state(owner_id, now))
            .append_pair("scope", &OAUTH_SCOPES.join(","))
            .append_pair("response_type", "code");
        Ok(url)
    }

    /// Handles the provider redirect; returns the connected local account id.
    pub async fn complete(&self, params: CallbackParams) -> Result<String, OAuthError> {
        if let Some(error) = params.error {
            tracing::warn!(
                error,
                reason = ?params.error_reason,
                description = ?params.error_description,
                "Facebook OAuth error"
            );
            return Err(OAuthError::Denied(
                params
                    .error_description
                    .unwrap_or_else(|| "Facebook authorization failed".to_string()),
            ));
        }

        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ValidationError::new("Missing authorization code"))?;
        let state = params
            .state
            .filter(|state| !state.is_empty())
            .ok_or_else(|| ValidationError::new("Missing state parameter"))?;
        let owner_id = parse_state(&state)?;

        self.connect(&owner_id, &code).await?;
        Ok(owner_id)
    }

    async fn connect(&self, owner_id: &str, code: &str) -> Result<(), OAuthError> {
        tracing::info!(owner_id, redirect_uri = %self.settings.redirect_uri, "exchanging code for token");
        let short_lived = self
            .oauth
            .exchange_code_for_token(code, &self.settings.redirect_uri)
            .await?;

        tracing::info!(owner_id, "exchanging for long-lived token");
        let long_lived = self.oauth.exchange_for_long_lived(&short_lived).await?;

        tracing::info!(owner_id, "fetching Facebook user and ad accounts");
        let user = self.accounts.fetch_remote_user(&long_lived.credential).await?;
        let ad_accounts = self.accounts.fetch_ad_accounts(&long_lived.credential).await?;
        let mut scopes = self
            .accounts
            .fetch_granted_scopes(&long_lived.credential)
            .await?;
        if scopes.is_empty() {
            scopes = FALLBACK_GRANTED_SCOPES.iter().map(|s| s.to_string()).collect();
        }

        let expires_at = Expiry::after(Utc::now(), long_lived.expires_in);
        self.connections
            .upsert(
                owner_id,
                NewConnection {
                    fb_user_id: user.id,
                    credential: long_lived.credential,
                    credential_type: long_lived.token_type,
                    expires_at,
                    scopes,
                    ad_accounts,
                },
            )
            .await?;

        tracing::info!(
            owner_id,
            expires_at = ?expires_at.timestamp(),
            "Facebook connection saved"
        );
        Ok(())
    }
}
