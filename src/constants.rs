// API Versions
pub const FACEBOOK_API_VERSION: &str = "v23.0";

// API Base URLs
pub const FACEBOOK_BASE_URL: &str = "https://graph.facebook.com";
pub const FACEBOOK_DIALOG_URL: &str = "https://www.facebook.com";

// Local routes
pub const OAUTH_CALLBACK_PATH: &str = "/api/auth/facebook/callback";
pub const ADS_LIST_PATH: &str = "/ads/list";

// Defaults
pub const DEFAULT_APP_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

// OAuth
pub const OAUTH_SCOPES: &[&str] = &[
    "ads_read",
    "ads_management",
    "business_management",
    "pages_show_list",
    "pages_read_engagement",
];
pub const FALLBACK_GRANTED_SCOPES: &[&str] = &["ads_read", "ads_management"];
pub const LONG_LIVED_TOKEN_TTL_SECS: i64 = 5_184_000; // 60 days
pub const EXPIRED_TOKEN_CODE: i64 = 190;
pub const OAUTH_EXCEPTION_TYPE: &str = "OAuthException";

// HTTP retry settings
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
pub const RETRY_MAX_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

// Token refresh worker settings
pub const REFRESH_WINDOW_DAYS: i64 = 7;
pub const REFRESH_PAUSE_MS: u64 = 1000;
pub const REFRESH_HOUR_UTC: u32 = 3;
pub const REFRESH_MINUTE_UTC: u32 = 0;

// Audit log
pub const MAX_ACTION_LOG_ENTRIES: usize = 100;

// Listing defaults
pub const DEFAULT_CAMPAIGN_LIMIT: u32 = 25;
pub const DEFAULT_DATE_PRESET: &str = "last_7d";

// Facebook API Fields
pub const FB_AD_ACCOUNT_FIELDS: &str = "id,account_id,name,currency,timezone_name";
pub const FB_USER_FIELDS: &str = "id,name,email";
pub const FB_PAGE_FIELDS: &str = "id,name";
pub const FB_CAMPAIGN_FIELDS: &str = "id,name,status,objective,daily_budget,lifetime_budget";
pub const FB_ACCOUNT_INSIGHT_FIELDS: &str = "impressions,clicks,spend,ctr,cpc,cpp,cpm";
pub const FB_CAMPAIGN_INSIGHT_FIELDS: &str = "campaign_id,campaign_name,impressions,clicks,spend,ctr";
