//! Cursor usage API client
//!
//! Uses cookie-based authentication with the `WorkosCursorSessionToken`
//! cookie. Endpoints:
//! - /api/usage - Premium request counts and the account's month anchor
//! - /api/dashboard/get-monthly-invoice - Usage-based pricing line items
//! - /api/dashboard/get-hard-limit - Usage-based spending cap
//! - /api/dashboard/get-usage-based-premium-requests - Usage-based toggle

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::{Credential, CredentialSource, FetchError, UsageFetcher, UsageItem, UsageLimitStatus, UsageSnapshot};
use crate::billing::{self, BillingMonth};
use crate::debug_settings;
use crate::storage::keyring::KeyringError;
use crate::storage::SecureStorage;

const BASE_URL: &str = "https://cursor.com";
const SESSION_COOKIE: &str = "WorkosCursorSessionToken";
const TOKEN_SEPARATOR: &str = "%3A%3A";
const PREMIUM_MODEL_KEY: &str = "gpt-4";
const MID_MONTH_MARKER: &str = "mid-month usage paid";

pub const SESSION_TOKEN_ENV: &str = "CURSOR_SESSION_TOKEN";
pub const KEYCHAIN_TOKEN_KEY: &str = "cursor";

static REQUEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s.*?\*\s*(\d+(?:\.\d+)?)\s*cents?").expect("valid request line pattern")
});
static LEADING_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s").expect("valid leading count pattern"));

pub struct CursorProvider {
    client: reqwest::Client,
    base_url: String,
}

impl CursorProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T>(&self, path: &str, credential: &Credential) -> Result<T, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(&[("user", credential.user_id.as_str())])
            .header("Cookie", cookie_header(credential))
            .header("Accept", "application/json")
            .header("User-Agent", "CursorBar/1.0")
            .send()
            .await?;

        Self::decode(path, response).await
    }

    async fn post_json<T>(
        &self,
        path: &str,
        credential: &Credential,
        body: serde_json::Value,
    ) -> Result<T, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Cookie", cookie_header(credential))
            .header("Accept", "application/json")
            .header("User-Agent", "CursorBar/1.0")
            .json(&body)
            .send()
            .await?;

        Self::decode(path, response).await
    }

    async fn decode<T>(path: &str, response: reqwest::Response) -> Result<T, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(path, status = status.as_u16(), "Cursor API request failed");
            return Err(FetchError::from_status(status.as_u16()));
        }

        let raw_json = response.text().await?;
        tracing::debug!(
            "Cursor {} response: {}",
            path,
            debug_settings::redact_value(&raw_json)
        );
        Ok(serde_json::from_str(&raw_json)?)
    }

    async fn fetch_invoice(
        &self,
        credential: &Credential,
        month: BillingMonth,
    ) -> Result<CursorInvoice, FetchError> {
        self.post_json(
            "/api/dashboard/get-monthly-invoice",
            credential,
            serde_json::json!({
                "month": month.month,
                "year": month.year,
                "includeUsageEvents": false,
            }),
        )
        .await
    }
}

impl Default for CursorProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageFetcher for CursorProvider {
    async fn fetch_usage_snapshot(&self, credential: &Credential) -> Result<UsageSnapshot, FetchError> {
        tracing::debug!("Fetching Cursor usage");

        let usage: HashMap<String, serde_json::Value> = self.get_json("/api/usage", credential).await?;
        let premium = parse_premium_usage(&usage)?;

        let month = billing::current_billing_period(&chrono::Local::now(), billing::BILLING_DAY);
        let invoice = self.fetch_invoice(credential, month).await?;

        Ok(build_snapshot(premium, invoice))
    }

    async fn fetch_usage_limit_status(
        &self,
        credential: &Credential,
    ) -> Result<UsageLimitStatus, FetchError> {
        let toggle: CursorUsageBasedToggle = self
            .post_json(
                "/api/dashboard/get-usage-based-premium-requests",
                credential,
                serde_json::json!({}),
            )
            .await?;
        let hard_limit: CursorHardLimit = self
            .post_json("/api/dashboard/get-hard-limit", credential, serde_json::json!({}))
            .await?;

        let enabled = toggle.usage_based_premium_requests.unwrap_or(false)
            && !hard_limit.no_usage_based_allowed.unwrap_or(false);

        Ok(UsageLimitStatus {
            enabled,
            limit: hard_limit.hard_limit.filter(|limit| *limit > 0.0),
        })
    }
}

fn cookie_header(credential: &Credential) -> String {
    let value = format!("{}{}{}", credential.user_id, TOKEN_SEPARATOR, credential.access_token);
    cookie::Cookie::new(SESSION_COOKIE, value).to_string()
}

struct PremiumUsage {
    current: u32,
    limit: u32,
    start_of_month: DateTime<Utc>,
}

fn parse_premium_usage(usage: &HashMap<String, serde_json::Value>) -> Result<PremiumUsage, FetchError> {
    let model: CursorModelUsage = match usage.get(PREMIUM_MODEL_KEY) {
        Some(value) => serde_json::from_value(value.clone())?,
        None => CursorModelUsage::default(),
    };

    let start_of_month = usage
        .get("startOfMonth")
        .and_then(|value| value.as_str())
        .and_then(parse_iso_date)
        .unwrap_or_else(Utc::now);

    Ok(PremiumUsage {
        current: model.num_requests.unwrap_or(0),
        limit: model.max_request_usage.unwrap_or(0),
        start_of_month,
    })
}

fn build_snapshot(premium: PremiumUsage, invoice: CursorInvoice) -> UsageSnapshot {
    let mut usage_items = Vec::new();
    let mut mid_month_payment = 0.0;

    for item in invoice.items.unwrap_or_default() {
        let description = item.description.unwrap_or_default();
        let cents = item.cents.unwrap_or(0.0);

        if description.to_lowercase().contains(MID_MONTH_MARKER) {
            mid_month_payment += cents.abs() / 100.0;
            continue;
        }
        usage_items.push(parse_invoice_item(&description, cents));
    }

    UsageSnapshot {
        premium_current: premium.current,
        premium_limit: premium.limit,
        period_start: premium.start_of_month,
        usage_items,
        mid_month_payment,
        has_unpaid_invoice: invoice.has_unpaid_mid_month_invoice.unwrap_or(false),
    }
}

/// Parse lines such as `"150 extended requests * 4 cents per request"`.
pub(crate) fn parse_invoice_item(description: &str, cents: f64) -> UsageItem {
    let total_dollars = cents / 100.0;

    if let Some(captures) = REQUEST_LINE.captures(description) {
        let request_count = captures[1].parse().unwrap_or(0);
        let unit_cost_cents = captures[2].parse().unwrap_or(0.0);
        return UsageItem {
            request_count,
            unit_cost_cents,
            total_dollars,
            description: description.to_string(),
        };
    }

    // Token-based lines only carry a count and a total.
    let request_count: u32 = LEADING_COUNT
        .captures(description)
        .and_then(|captures| captures[1].parse().ok())
        .unwrap_or(0);
    let unit_cost_cents = if request_count > 0 {
        cents / f64::from(request_count)
    } else {
        0.0
    };

    UsageItem {
        request_count,
        unit_cost_cents,
        total_dollars,
        description: description.to_string(),
    }
}

fn parse_iso_date(iso_time: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso_time)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(iso_time, "%Y-%m-%dT%H:%M:%SZ")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
}

// ---- Credentials ----

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Session token is empty")]
    Empty,
    #[error("Session token is not a valid JWT")]
    MalformedJwt,
    #[error("Session token has no user id")]
    MissingUserId,
}

/// Build a credential from anything a user might paste: a full cookie
/// header, a `userId%3A%3Ajwt` session value, or a bare access token JWT.
pub fn parse_credential(raw: &str) -> Result<Credential, CredentialError> {
    let cleaned = clean_token(raw);
    if cleaned.is_empty() {
        return Err(CredentialError::Empty);
    }

    let from_cookie = cookie::Cookie::split_parse(cleaned.as_str())
        .filter_map(Result::ok)
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.value().to_string());
    let value = from_cookie.unwrap_or(cleaned);

    for separator in [TOKEN_SEPARATOR, "::"] {
        if let Some((user_id, token)) = value.split_once(separator) {
            if user_id.is_empty() {
                return Err(CredentialError::MissingUserId);
            }
            return Ok(Credential {
                user_id: user_id.to_string(),
                access_token: token.to_string(),
            });
        }
    }

    let user_id = user_id_from_jwt(&value)?;
    Ok(Credential {
        user_id,
        access_token: value,
    })
}

/// The `sub` claim looks like `auth0|user_01H...`; the part after the pipe
/// is the dashboard user id.
fn user_id_from_jwt(token: &str) -> Result<String, CredentialError> {
    let payload = token.split('.').nth(1).ok_or(CredentialError::MalformedJwt)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| CredentialError::MalformedJwt)?;
    let claims: JwtClaims = serde_json::from_slice(&bytes).map_err(|_| CredentialError::MalformedJwt)?;

    let sub = claims.sub.ok_or(CredentialError::MissingUserId)?;
    let user_id = sub.rsplit('|').next().unwrap_or_default();
    if user_id.is_empty() {
        Err(CredentialError::MissingUserId)
    } else {
        Ok(user_id.to_string())
    }
}

fn clean_token(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Reads the session from the environment, the keychain, or the session
/// file, in that order.
pub struct CursorCredentials {
    session_path: Option<PathBuf>,
}

impl CursorCredentials {
    pub fn new() -> Self {
        Self {
            session_path: session_path().ok(),
        }
    }

    pub fn with_session_path(path: PathBuf) -> Self {
        Self {
            session_path: Some(path),
        }
    }

    fn resolve_with<F>(&self, load_keychain: F) -> Option<Credential>
    where
        F: FnOnce() -> Option<String>,
    {
        if let Some(credential) = Self::accept("environment", std::env::var(SESSION_TOKEN_ENV).ok()) {
            return Some(credential);
        }
        if let Some(credential) = Self::accept("keychain", load_keychain()) {
            return Some(credential);
        }
        Self::accept("session file", self.load_session_file())
    }

    fn accept(source: &str, raw: Option<String>) -> Option<Credential> {
        match parse_credential(&raw?) {
            Ok(credential) => {
                tracing::debug!(
                    source,
                    user = %debug_settings::redact_option(Some(credential.user_id.as_str())),
                    "Resolved Cursor credential"
                );
                Some(credential)
            }
            Err(CredentialError::Empty) => None,
            Err(e) => {
                tracing::warn!(source, "Ignoring stored Cursor session: {}", e);
                None
            }
        }
    }

    fn load_keychain_token() -> Option<String> {
        match SecureStorage::new().get(KEYCHAIN_TOKEN_KEY) {
            Ok(token) => Some(token),
            Err(KeyringError::NotFound) => None,
            Err(e) => {
                tracing::debug!("Keychain unavailable: {}", e);
                None
            }
        }
    }

    fn load_session_file(&self) -> Option<String> {
        let path = self.session_path.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        let session: CursorSession = match serde_json::from_str(&content) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Unreadable Cursor session file {}: {}", path.display(), e);
                return None;
            }
        };
        session.cookie_header.or(session.access_token)
    }
}

impl Default for CursorCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSource for CursorCredentials {
    async fn get_credential(&self) -> Option<Credential> {
        self.resolve_with(Self::load_keychain_token)
    }
}

pub fn session_path() -> Result<PathBuf, anyhow::Error> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(data_dir.join(crate::APP_DIR_NAME).join("cursor-session.json"))
}

// ---- Response Types ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorSession {
    cookie_header: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: Option<String>,
}

// Note: Some fields below are unused but required for serde deserialization
#[allow(dead_code)]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorModelUsage {
    num_requests: Option<u32>,
    num_requests_total: Option<u32>,
    max_request_usage: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorInvoice {
    items: Option<Vec<CursorInvoiceItem>>,
    has_unpaid_mid_month_invoice: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CursorInvoiceItem {
    description: Option<String>,
    cents: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorHardLimit {
    hard_limit: Option<f64>,
    no_usage_based_allowed: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorUsageBasedToggle {
    usage_based_premium_requests: Option<bool>,
}
