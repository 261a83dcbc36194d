use crate::campaigns::Campaign;
use crate::config::Config;
use crate::error::Error;
use crate::insights::InsightRecord;
use crate::windows::TimeWindow;
use reqwest::{header::AUTHORIZATION, Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const CAMPAIGN_FIELDS: &str = "id,created_time,start_time,stop_time,status,objective";
const INSIGHT_FIELDS: &str =
    "account_id,campaign_id,campaign_name,spend,impressions,reach,cpc,clicks,actions,conversions,date_start,date_stop";
const PAGE_LIMIT: &str = "500";
const USAGE_HEADER: &str = "x-business-use-case-usage";

/// One page of an upstream listing, plus the cursor to the next page (when
/// one exists) and the quota usage the provider reported for the call.
#[derive(Debug)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub after: Option<String>,
    pub usage: Option<UsageHint>,
}

/// Per-call usage counters reported by the provider against the account's
/// quota key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageHint {
    pub call_count: u64,
    pub total_time: u64,
    pub total_cputime: u64,
}

impl UsageHint {
    pub fn score(&self) -> u64 {
        self.call_count + self.total_time + self.total_cputime
    }

    /// Parses the `x-business-use-case-usage` header, which maps the quota
    /// key to a list of usage entries. Only the first entry matters here.
    pub fn from_header(raw: &str) -> Option<UsageHint> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let entry = value.as_object()?.values().next()?.as_array()?.first()?;

        Some(UsageHint {
            call_count: entry.get("call_count")?.as_u64()?,
            total_time: entry.get("total_time")?.as_u64()?,
            total_cputime: entry.get("total_cputime")?.as_u64()?,
        })
    }
}

/// Cooperative rate limiting: given the usage a response reported, decide
/// how long to pause before the next call.
#[cfg_attr(test, mockall::automock)]
pub trait Throttle: Send + Sync + 'static {
    fn pause_after(&self, usage: Option<UsageHint>) -> Option<Duration>;
}

/// Pauses for a fixed duration once the usage score crosses a threshold.
/// The provider expresses usage as a percentage of quota, so throttling
/// well below 100 keeps the pipeline from ever hitting a hard limit.
pub struct UsageThrottle {
    threshold: u64,
    pause: Duration,
}

impl UsageThrottle {
    pub fn new(threshold: u64, pause: Duration) -> Self {
        UsageThrottle { threshold, pause }
    }
}

impl Default for UsageThrottle {
    fn default() -> Self {
        UsageThrottle::new(75, Duration::from_secs(6))
    }
}

impl Throttle for UsageThrottle {
    fn pause_after(&self, usage: Option<UsageHint>) -> Option<Duration> {
        match usage {
            Some(hint) if hint.score() >= self.threshold => Some(self.pause),
            _ => None,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AdsApi: Send + Sync + 'static {
    /// Fetches one page of campaigns matching the active-status filter.
    /// # Arguments
    /// * `after` - Pagination cursor from the previous page, if any.
    /// # Returns
    /// A Result containing either a [`Page`] of campaigns or an Error.
    async fn fetch_campaigns_page(&self, after: Option<String>) -> Result<Page<Campaign>, Error>;

    /// Fetches one page of campaign-level insights for a single window.
    /// # Arguments
    /// * `window` - The inclusive day range to query.
    /// * `after` - Pagination cursor from the previous page, if any.
    /// # Returns
    /// A Result containing either a [`Page`] of insight records or an Error.
    async fn fetch_insights_page(
        &self,
        window: TimeWindow,
        after: Option<String>,
    ) -> Result<Page<InsightRecord>, Error>;
}

#[derive(Clone)]
pub struct MarketingApiClient {
    client: Client,
    base_url: String,
    token: String,
    account_id: String,
}

// The derive would otherwise require `T: Default` because of the defaulted
// `data` field; only `Deserialize` is actually needed.
#[derive(Deserialize)]
#[serde(bound = "T: serde::Deserialize<'de>")]
struct Envelope<T> {
    #[serde(default)]
    data: Vec<T>,
    paging: Option<Paging>,
}

#[derive(Deserialize)]
struct Paging {
    cursors: Option<Cursors>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct Cursors {
    after: Option<String>,
}

impl MarketingApiClient {
    pub fn new(config: &Config) -> Self {
        MarketingApiClient {
            client: Client::new(),
            base_url: config.api_url.to_string(),
            token: config.access_token.to_string(),
            account_id: config.account_id.to_string(),
        }
    }

    fn account_url(&self, resource: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .push(&format!("act_{}", self.account_id))
            .push(resource);
        Ok(url)
    }

    async fn get_page<T: DeserializeOwned>(&self, url: Url) -> Result<Page<T>, Error> {
        let resp = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        let usage = resp
            .headers()
            .get(USAGE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(UsageHint::from_header);

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamStatus { status, message });
        }

        let envelope: Envelope<T> = resp.json().await?;

        // The provider includes cursors even on the last page; `next` being
        // absent is the end-of-listing signal.
        let after = envelope
            .paging
            .filter(|paging| paging.next.is_some())
            .and_then(|paging| paging.cursors)
            .and_then(|cursors| cursors.after);

        Ok(Page {
            data: envelope.data,
            after,
            usage,
        })
    }
}

#[async_trait::async_trait]
impl AdsApi for MarketingApiClient {
    async fn fetch_campaigns_page(&self, after: Option<String>) -> Result<Page<Campaign>, Error> {
        let mut url = self.account_url("campaigns")?;
        url.query_pairs_mut()
            .append_pair("fields", CAMPAIGN_FIELDS)
            .append_pair("effective_status", r#"["ACTIVE"]"#)
            .append_pair("limit", PAGE_LIMIT);

        if let Some(after) = after {
            url.query_pairs_mut().append_pair("after", &after);
        }

        self.get_page(url).await
    }

    async fn fetch_insights_page(
        &self,
        window: TimeWindow,
        after: Option<String>,
    ) -> Result<Page<InsightRecord>, Error> {
        let time_range = format!(
            r#"{{"since":"{}","until":"{}"}}"#,
            window.since, window.until
        );

        let mut url = self.account_url("insights")?;
        url.query_pairs_mut()
            .append_pair("level", "campaign")
            .append_pair("fields", INSIGHT_FIELDS)
            .append_pair("time_range", &time_range)
            .append_pair("limit", PAGE_LIMIT);

        if let Some(after) = after {
            url.query_pairs_mut().append_pair("after", &after);
        }

        self.get_page(url).await
    }
}
