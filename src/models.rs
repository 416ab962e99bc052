//! Connection, credential and audit log records.

use crate::ad_spec::{AdStatus, Budget, Targeting};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Input rejected before any remote call was made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Authenticated caller, as forwarded by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Facebook access token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Token expiry as stored. Anything that is not a positive, representable
/// millisecond timestamp is `Invalid` and must never count as "not expired".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(DateTime<Utc>),
    Invalid,
}

impl Expiry {
    pub fn from_millis(raw: Option<i64>) -> Self {
        match raw {
            Some(ms) if ms > 0 => match Utc.timestamp_millis_opt(ms).single() {
                Some(at) => Expiry::At(at),
                None => Expiry::Invalid,
            },
            _ => Expiry::Invalid,
        }
    }

    /// `now + expires_in_secs * 1000` ms.
    pub fn after(now: DateTime<Utc>, expires_in_secs: i64) -> Self {
        if expires_in_secs <= 0 {
            return Expiry::Invalid;
        }
        match chrono::Duration::try_seconds(expires_in_secs).and_then(|ttl| now.checked_add_signed(ttl)) {
            Some(at) => Expiry::At(at),
            None => Expiry::Invalid,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::At(at) => Some(*at),
            Expiry::Invalid => None,
        }
    }

    pub fn as_millis(&self) -> Option<i64> {
        self.timestamp().map(|at| at.timestamp_millis())
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, Expiry::At(at) if *at > now)
    }

    /// Whole days left, floored. `None` for an invalid expiry.
    pub fn days_until(&self, now: DateTime<Utc>) -> Option<i64> {
        self.timestamp().map(|at| {
            let remaining = at.timestamp_millis() - now.timestamp_millis();
            remaining.div_euclid(DAY_MS)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdAccount {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub currency: String,
    #[serde(default, alias = "timezone_name", skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Full connection record, credential included. Only handed to trusted callers.
#[derive(Debug, Clone)]
pub struct Connection {
    pub owner_id: String,
    pub fb_user_id: String,
    pub credential: Credential,
    pub credential_type: String,
    pub expires_at: Expiry,
    pub scopes: Vec<String>,
    pub ad_accounts: Vec<AdAccount>,
    pub connected_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Connection {
    pub fn view(&self) -> ConnectionView {
        ConnectionView {
            owner_id: self.owner_id.clone(),
            fb_user_id: self.fb_user_id.clone(),
            credential_type: self.credential_type.clone(),
            expires_at: self.expires_at.timestamp(),
            scopes: self.scopes.clone(),
            ad_accounts: self.ad_accounts.clone(),
            connected_at: self.connected_at,
            last_synced_at: self.last_synced_at,
            is_active: self.is_active,
        }
    }
}

/// What `upsert` writes.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub fb_user_id: String,
    pub credential: Credential,
    pub credential_type: String,
    pub expires_at: Expiry,
    pub scopes: Vec<String>,
    pub ad_accounts: Vec<AdAccount>,
}

/// Connection without its credential; safe to return to any caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionView {
    pub owner_id: String,
    pub fb_user_id: String,
    pub credential_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub ad_accounts: Vec<AdAccount>,
    pub connected_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    PauseAd,
    ResumeAd,
    CreateCampaign,
    CreateAdSet,
    CreateCreative,
    CreateAd,
    DeleteCampaign,
    DeleteAdSet,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::PauseAd => "pause_ad",
            ActionKind::ResumeAd => "resume_ad",
            ActionKind::CreateCampaign => "create_campaign",
            ActionKind::CreateAdSet => "create_ad_set",
            ActionKind::CreateCreative => "create_creative",
            ActionKind::CreateAd => "create_ad",
            ActionKind::DeleteCampaign => "delete_campaign",
            ActionKind::DeleteAdSet => "delete_ad_set",
        }
    }
}

impl FromStr for ActionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause_ad" => Ok(ActionKind::PauseAd),
            "resume_ad" => Ok(ActionKind::ResumeAd),
            "create_campaign" => Ok(ActionKind::CreateCampaign),
            "create_ad_set" => Ok(ActionKind::CreateAdSet),
            "create_creative" => Ok(ActionKind::CreateCreative),
            "create_ad" => Ok(ActionKind::CreateAd),
            "delete_campaign" => Ok(ActionKind::DeleteCampaign),
            "delete_ad_set" => Ok(ActionKind::DeleteAdSet),
            other => Err(ValidationError::new(format!("Unknown action: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Campaign,
    AdSet,
    Creative,
    Ad,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Campaign => "campaign",
            TargetKind::AdSet => "ad_set",
            TargetKind::Creative => "creative",
            TargetKind::Ad => "ad",
        }
    }
}

impl FromStr for TargetKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "campaign" => Ok(TargetKind::Campaign),
            "ad_set" => Ok(TargetKind::AdSet),
            "creative" => Ok(TargetKind::Creative),
            "ad" => Ok(TargetKind::Ad),
            other => Err(ValidationError::new(format!("Unknown target type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    Failure,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionResult::Success => "success",
            ActionResult::Failure => "failure",
        }
    }
}

impl FromStr for ActionResult {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ActionResult::Success),
            "failure" => Ok(ActionResult::Failure),
            other => Err(ValidationError::new(format!("Unknown result: {}", other))),
        }
    }
}

/// One immutable audit record of a mutating call against the Graph API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub actor_id: String,
    pub action: ActionKind,
    pub target_type: TargetKind,
    pub target_id: Option<String>,
    pub target_name: Option<String>,
    pub ad_account_id: String,
    pub result: ActionResult,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ActionLogEntry {
    pub fn success(
        actor_id: &str,
        action: ActionKind,
        target_type: TargetKind,
        ad_account_id: &str,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action,
            target_type,
            target_id: None,
            target_name: None,
            ad_account_id: ad_account_id.to_string(),
            result: ActionResult::Success,
            error_message: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        actor_id: &str,
        action: ActionKind,
        target_type: TargetKind,
        ad_account_id: &str,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            result: ActionResult::Failure,
            error_message: Some(error.to_string()),
            ..Self::success(actor_id, action, target_type, ad_account_id)
        }
    }

    pub fn target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn named(mut self, name: Option<&str>) -> Self {
        self.target_name = name.map(str::to_string);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Ids generated by a successful ad-creation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedAdIds {
    pub campaign_id: String,
    pub ad_set_id: String,
    pub image_hash: String,
    pub creative_id: String,
    pub ad_id: String,
}

/// Durable record of an ad created through the saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedAdRecord {
    pub owner_id: String,
    pub ad_account_id: String,
    pub ids: CreatedAdIds,
    pub campaign_name: String,
    pub objective: String,
    pub status: AdStatus,
    pub budget: Budget,
    pub targeting: Targeting,
    pub created_at: DateTime<Utc>,
}
