use crate::ad_spec::{AdSetSpec, AdStatus, CampaignSpec, CreativeSpec, ImageSource};
use crate::constants::{
    FB_ACCOUNT_INSIGHT_FIELDS, FB_AD_ACCOUNT_FIELDS, FB_CAMPAIGN_FIELDS,
    FB_CAMPAIGN_INSIGHT_FIELDS, FB_PAGE_FIELDS, FB_USER_FIELDS, LONG_LIVED_TOKEN_TTL_SECS,
};
use crate::graph::{decode, GraphClient, GraphError};
use crate::models::{AdAccount, Credential};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LongLivedToken {
    pub credential: Credential,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub daily_budget: Option<String>,
    #[serde(default)]
    pub lifetime_budget: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightsLevel {
    Account,
    Campaign,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsightsRange {
    Preset(String),
    Between { since: NaiveDate, until: NaiveDate },
}

#[derive(Debug, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Permission {
    permission: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct UploadedImage {
    hash: String,
}

/// `/adimages` answers either with an `images` map keyed by file name or with
/// a bare `hash`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageUploadResponse {
    Images { images: BTreeMap<String, UploadedImage> },
    Direct { hash: String },
}

impl ImageUploadResponse {
    fn into_hash(self) -> Option<String> {
        match self {
            ImageUploadResponse::Images { images } => {
                images.into_values().next().map(|image| image.hash)
            }
            ImageUploadResponse::Direct { hash } => Some(hash),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusOnly {
    status: String,
}

/// Token endpoints of the OAuth dance.
#[async_trait]
pub trait OAuthApi: Send + Sync {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Credential, GraphError>;

    /// Also extends an already long-lived token.
    async fn exchange_for_long_lived(
        &self,
        credential: &Credential,
    ) -> Result<LongLivedToken, GraphError>;

    /// Lightweight probe that the credential is accepted.
    async fn verify_credential(&self, credential: &Credential) -> Result<(), GraphError>;
}

/// Reads and simple mutations on the connected account.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn fetch_remote_user(&self, credential: &Credential) -> Result<RemoteUser, GraphError>;

    async fn fetch_granted_scopes(&self, credential: &Credential)
        -> Result<Vec<String>, GraphError>;

    async fn fetch_ad_accounts(&self, credential: &Credential)
        -> Result<Vec<AdAccount>, GraphError>;

    async fn fetch_pages(&self, credential: &Credential) -> Result<Vec<Page>, GraphError>;

    async fn fetch_campaigns(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        limit: u32,
    ) -> Result<Vec<CampaignSummary>, GraphError>;

    async fn fetch_insights(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        level: InsightsLevel,
        range: &InsightsRange,
    ) -> Result<Vec<Value>, GraphError>;

    async fn fetch_ad_status(&self, credential: &Credential, ad_id: &str)
        -> Result<String, GraphError>;

    async fn update_ad_status(
        &self,
        credential: &Credential,
        ad_id: &str,
        status: AdStatus,
    ) -> Result<(), GraphError>;
}

/// Object creation used by the ad-creation saga, plus deletion for rollback.
#[async_trait]
pub trait CampaignApi: Send + Sync {
    async fn create_campaign(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        campaign: &CampaignSpec,
        status: AdStatus,
    ) -> Result<String, GraphError>;

    async fn create_ad_set(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        campaign_id: &str,
        ad_set: &AdSetSpec,
        status: AdStatus,
    ) -> Result<String, GraphError>;

    /// Returns the image hash.
    async fn upload_image(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        image: &ImageSource,
    ) -> Result<String, GraphError>;

    async fn create_creative(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        image_hash: &str,
        creative: &CreativeSpec,
    ) -> Result<String, GraphError>;

    async fn create_ad(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        ad_set_id: &str,
        creative_id: &str,
        name: &str,
        status: AdStatus,
    ) -> Result<String, GraphError>;

    async fn delete_object(&self, credential: &Credential, object_id: &str)
        -> Result<(), GraphError>;
}

pub struct FacebookAPI {
    graph: GraphClient,
    app_id: String,
    app_secret: String,
}

impl FacebookAPI {
    pub fn new(graph: GraphClient, app_id: String, app_secret: String) -> Self {
        Self {
            graph,
            app_id,
            app_secret,
        }
    }

    async fn token_request(&self, params: &[(&str, String)]) -> Result<TokenResponse, GraphError> {
        let value = self.graph.get("/oauth/access_token", None, params).await?;
        decode(value)
    }

    async fn create(
        &self,
        credential: &Credential,
        endpoint: &str,
        body: &Value,
    ) -> Result<String, GraphError> {
        let value = self.graph.post(endpoint, credential, body).await?;
        decode::<Created>(value).map(|created| created.id)
    }
}

#[async_trait]
impl OAuthApi for FacebookAPI {
    async fn exchange_code_for_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Credential, GraphError> {
        tracing::debug!(client_id = %self.app_id, redirect_uri, "exchanging authorization code");
        let response = self
            .token_request(&[
                ("client_id", self.app_id.clone()),
                ("client_secret", self.app_secret.clone()),
                ("redirect_uri", redirect_uri.to_string()),
                ("code", code.to_string()),
            ])
            .await?;
        Ok(Credential::new(response.access_token))
    }

    async fn exchange_for_long_lived(
        &self,
        credential: &Credential,
    ) -> Result<LongLivedToken, GraphError> {
        let response = self
            .token_request(&[
                ("grant_type", "fb_exchange_token".to_string()),
                ("client_id", self.app_id.clone()),
                ("client_secret", self.app_secret.clone()),
                ("fb_exchange_token", credential.expose().to_string()),
            ])
            .await?;

        let expires_in = match response.expires_in {
            Some(secs) if secs > 0 => secs,
            other => {
                tracing::warn!(
                    expires_in = ?other,
                    "long-lived token response without usable expires_in, assuming 60 days"
                );
                LONG_LIVED_TOKEN_TTL_SECS
            }
        };

        Ok(LongLivedToken {
            credential: Credential::new(response.access_token),
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_in,
        })
    }

    async fn verify_credential(&self, credential: &Credential) -> Result<(), GraphError> {
        self.graph
            .get("/me", Some(credential), &[("fields", "id".to_string())])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl AccountApi for FacebookAPI {
    async fn fetch_remote_user(&self, credential: &Credential) -> Result<RemoteUser, GraphError> {
        let value = self
            .graph
            .get("/me", Some(credential), &[("fields", FB_USER_FIELDS.to_string())])
            .await?;
        decode(value)
    }

    async fn fetch_granted_scopes(
        &self,
        credential: &Credential,
    ) -> Result<Vec<String>, GraphError> {
        let value = self.graph.get("/me/permissions", Some(credential), &[]).await?;
        let permissions: Paged<Permission> = decode(value)?;
        Ok(permissions
            .data
            .into_iter()
            .filter(|p| p.status == "granted")
            .map(|p| p.permission)
            .collect())
    }

    async fn fetch_ad_accounts(
        &self,
        credential: &Credential,
    ) -> Result<Vec<AdAccount>, GraphError> {
        let value = self
            .graph
            .get(
                "/me/adaccounts",
                Some(credential),
                &[("fields", FB_AD_ACCOUNT_FIELDS.to_string())],
            )
            .await?;
        decode::<Paged<AdAccount>>(value).map(|paged| paged.data)
    }

    async fn fetch_pages(&self, credential: &Credential) -> Result<Vec<Page>, GraphError> {
        let value = self
            .graph
            .get("/me/accounts", Some(credential), &[("fields", FB_PAGE_FIELDS.to_string())])
            .await?;
        decode::<Paged<Page>>(value).map(|paged| paged.data)
    }

    async fn fetch_campaigns(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        limit: u32,
    ) -> Result<Vec<CampaignSummary>, GraphError> {
        let value = self
            .graph
            .get(
                &format!("/{}/campaigns", ad_account_id),
                Some(credential),
                &[
                    ("fields", FB_CAMPAIGN_FIELDS.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        decode::<Paged<CampaignSummary>>(value).map(|paged| paged.data)
    }

    async fn fetch_insights(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        level: InsightsLevel,
        range: &InsightsRange,
    ) -> Result<Vec<Value>, GraphError> {
        let (fields, level) = match level {
            InsightsLevel::Account => (FB_ACCOUNT_INSIGHT_FIELDS, "account"),
            InsightsLevel::Campaign => (FB_CAMPAIGN_INSIGHT_FIELDS, "campaign"),
        };
        let mut query = vec![("fields", fields.to_string()), ("level", level.to_string())];
        match range {
            InsightsRange::Preset(preset) => query.push(("date_preset", preset.clone())),
            InsightsRange::Between { since, until } => query.push((
                "time_range",
                json!({
                    "since": since.format("%Y-%m-%d").to_string(),
                    "until": until.format("%Y-%m-%d").to_string(),
                })
                .to_string(),
            )),
        }

        let value = self
            .graph
            .get(&format!("/{}/insights", ad_account_id), Some(credential), &query)
            .await?;
        decode::<Paged<Value>>(value).map(|paged| paged.data)
    }

    async fn fetch_ad_status(
        &self,
        credential: &Credential,
        ad_id: &str,
    ) -> Result<String, GraphError> {
        let value = self
            .graph
            .get(&format!("/{}", ad_id), Some(credential), &[("fields", "status".to_string())])
            .await?;
        decode::<StatusOnly>(value).map(|s| s.status)
    }

    async fn update_ad_status(
        &self,
        credential: &Credential,
        ad_id: &str,
        status: AdStatus,
    ) -> Result<(), GraphError> {
        self.graph
            .post(&format!("/{}", ad_id), credential, &json!({ "status": status.as_str() }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl CampaignApi for FacebookAPI {
    async fn create_campaign(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        campaign: &CampaignSpec,
        status: AdStatus,
    ) -> Result<String, GraphError> {
        let body = json!({
            "name": campaign.name,
            "objective": campaign.objective,
            "status": status.as_str(),
            "special_ad_categories": [],
        });
        self.create(credential, &format!("/{}/campaigns", ad_account_id), &body)
            .await
    }

    async fn create_ad_set(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        campaign_id: &str,
        ad_set: &AdSetSpec,
        status: AdStatus,
    ) -> Result<String, GraphError> {
        let mut body = Map::new();
        body.insert("name".into(), json!(ad_set.name));
        body.insert("campaign_id".into(), json!(campaign_id));
        body.insert("billing_event".into(), json!(ad_set.billing_event));
        body.insert("optimization_goal".into(), json!(ad_set.optimization_goal));
        body.insert("bid_strategy".into(), json!("LOWEST_COST_WITHOUT_CAP"));
        body.insert("targeting".into(), ad_set.targeting.to_graph());
        body.insert("status".into(), json!(status.as_str()));
        for (key, value) in ad_set.budget.to_graph_fields() {
            body.insert(key.into(), value);
        }

        self.create(
            credential,
            &format!("/{}/adsets", ad_account_id),
            &Value::Object(body),
        )
        .await
    }

    async fn upload_image(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        image: &ImageSource,
    ) -> Result<String, GraphError> {
        let body = match image {
            ImageSource::Url { url } => json!({ "url": url }),
            ImageSource::Inline { base64 } => json!({ "bytes": base64 }),
        };
        let value = self
            .graph
            .post(&format!("/{}/adimages", ad_account_id), credential, &body)
            .await?;

        decode::<ImageUploadResponse>(value)?
            .into_hash()
            .ok_or_else(|| GraphError::Transport("Image upload response carried no hash".to_string()))
    }

    async fn create_creative(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        image_hash: &str,
        creative: &CreativeSpec,
    ) -> Result<String, GraphError> {
        let mut link_data = json!({
            "image_hash": image_hash,
            "link": creative.link_url,
            "message": creative.message,
            "name": creative.headline,
            "call_to_action": {
                "type": creative.call_to_action_type,
                "value": { "link": creative.link_url },
            },
        });
        if let Some(description) = &creative.description {
            link_data["description"] = json!(description);
        }
        let body = json!({
            "name": creative.name,
            "object_story_spec": {
                "page_id": creative.page_id,
                "link_data": link_data,
            },
        });
        self.create(credential, &format!("/{}/adcreatives", ad_account_id), &body)
            .await
    }

    async fn create_ad(
        &self,
        credential: &Credential,
        ad_account_id: &str,
        ad_set_id: &str,
        creative_id: &str,
        name: &str,
        status: AdStatus,
    ) -> Result<String, GraphError> {
        let body = json!({
            "name": name,
            "adset_id": ad_set_id,
            "creative": { "creative_id": creative_id },
            "status": status.as_str(),
        });
        self.create(credential, &format!("/{}/ads", ad_account_id), &body)
            .await
    }

    async fn delete_object(
        &self,
        credential: &Credential,
        object_id: &str,
    ) -> Result<(), GraphError> {
        self.graph
            .delete(&format!("/{}", object_id), credential)
            .await
            .map(|_| ())
    }
}
