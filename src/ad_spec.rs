//! Request types for the ad-creation saga.
//!
//! Budget amounts are minor currency units (cents). The caller does the
//! conversion; nothing here scales them.

use crate::models::ValidationError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

const MIN_AGE: u8 = 13;
const MAX_AGE: u8 = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdStatus {
    Active,
    Paused,
}

impl AdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdStatus::Active => "ACTIVE",
            AdStatus::Paused => "PAUSED",
        }
    }
}

/// Daily xor lifetime; a lifetime budget always carries its schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Budget {
    Daily {
        amount: i64,
    },
    Lifetime {
        amount: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
}

impl Budget {
    pub fn amount(&self) -> i64 {
        match self {
            Budget::Daily { amount } | Budget::Lifetime { amount, .. } => *amount,
        }
    }

    /// Graph API fields for an ad set body.
    pub fn to_graph_fields(&self) -> Vec<(&'static str, Value)> {
        match self {
            Budget::Daily { amount } => vec![("daily_budget", json!(amount))],
            Budget::Lifetime {
                amount,
                start_time,
                end_time,
            } => vec![
                ("lifetime_budget", json!(amount)),
                ("start_time", json!(start_time.to_rfc3339())),
                ("end_time", json!(end_time.to_rfc3339())),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Targeting {
    pub age_min: u8,
    pub age_max: u8,
    /// 1 = male, 2 = female.
    pub genders: Vec<u8>,
    pub countries: Vec<String>,
}

impl Targeting {
    pub fn to_graph(&self) -> Value {
        json!({
            "age_min": self.age_min,
            "age_max": self.age_max,
            "genders": self.genders,
            "geo_locations": { "countries": self.countries },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub name: String,
    pub objective: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdSetSpec {
    pub name: String,
    pub budget: Budget,
    pub billing_event: String,
    pub optimization_goal: String,
    pub targeting: Targeting,
}

/// Image to upload: a public URL or inline base64 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Inline { base64: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreativeSpec {
    pub name: String,
    pub page_id: String,
    pub link_url: String,
    pub message: String,
    pub headline: String,
    #[serde(default)]
    pub description: Option<String>,
    pub call_to_action_type: String,
}

/// Everything needed to build campaign, ad set, image, creative and ad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdCreationRequest {
    pub ad_account_id: String,
    pub campaign: CampaignSpec,
    pub ad_set: AdSetSpec,
    pub image: ImageSource,
    pub creative: CreativeSpec,
    pub ad_name: String,
    pub status: AdStatus,
}

fn require(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!("Missing required field: {}", field)));
    }
    Ok(())
}

impl AdCreationRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.ad_account_id, "ad_account_id")?;
        require(&self.campaign.name, "campaign.name")?;
        require(&self.campaign.objective, "campaign.objective")?;
        require(&self.ad_set.name, "ad_set.name")?;
        require(&self.ad_set.billing_event, "ad_set.billing_event")?;
        require(&self.ad_set.optimization_goal, "ad_set.optimization_goal")?;
        require(&self.creative.name, "creative.name")?;
        require(&self.creative.page_id, "creative.page_id")?;
        require(&self.creative.message, "creative.message")?;
        require(&self.creative.headline, "creative.headline")?;
        require(&self.creative.call_to_action_type, "creative.call_to_action_type")?;
        require(&self.ad_name, "ad_name")?;

        self.validate_budget()?;
        self.validate_targeting()?;
        self.validate_link()?;
        self.validate_image()
    }

    fn validate_budget(&self) -> Result<(), ValidationError> {
        if self.ad_set.budget.amount() <= 0 {
            return Err(ValidationError::new("Budget must be greater than zero"));
        }
        if let Budget::Lifetime {
            start_time,
            end_time,
            ..
        } = &self.ad_set.budget
        {
            if end_time <= start_time {
                return Err(ValidationError::new(
                    "Lifetime budget end time must be after start time",
                ));
            }
        }
        Ok(())
    }

    fn validate_targeting(&self) -> Result<(), ValidationError> {
        let targeting = &self.ad_set.targeting;
        if targeting.age_min < MIN_AGE || targeting.age_max > MAX_AGE {
            return Err(ValidationError::new(format!(
                "Age range must be within {}-{}",
                MIN_AGE, MAX_AGE
            )));
        }
        if targeting.age_min > targeting.age_max {
            return Err(ValidationError::new("Minimum age exceeds maximum age"));
        }
        if targeting.genders.is_empty() {
            return Err(ValidationError::new("Select at least one gender"));
        }
        if targeting.genders.iter().any(|g| *g != 1 && *g != 2) {
            return Err(ValidationError::new("Genders must be 1 (male) or 2 (female)"));
        }
        if targeting.countries.iter().all(|c| c.trim().is_empty()) {
            return Err(ValidationError::new("Select at least one country"));
        }
        Ok(())
    }

    fn validate_link(&self) -> Result<(), ValidationError> {
        let url = Url::parse(&self.creative.link_url)
            .map_err(|e| ValidationError::new(format!("Invalid destination link: {}", e)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(ValidationError::new(format!(
                "Destination link must be http(s), got {}",
                scheme
            ))),
        }
    }

    fn validate_image(&self) -> Result<(), ValidationError> {
        match &self.image {
            ImageSource::Url { url } => {
                Url::parse(url)
                    .map_err(|e| ValidationError::new(format!("Invalid image URL: {}", e)))?;
            }
            ImageSource::Inline { base64 } => {
                let bytes = BASE64
                    .decode(base64)
                    .map_err(|e| ValidationError::new(format!("Invalid image bytes: {}", e)))?;
                if bytes.is_empty() {
                    return Err(ValidationError::new("Image is empty"));
                }
            }
        }
        Ok(())
    }
}
