use crate::api_client::{AdsApi, Throttle};
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::windows::TimeWindow;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// One `{action_type, value}` pair from the provider's repeated
/// `actions`/`conversions` collections. Values stay opaque strings: the
/// provider reports non-numeric values for some action types.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ActionEntry {
    #[serde(default)]
    pub action_type: String,
    #[serde(default)]
    pub value: String,
}

/// A raw campaign-level insight as returned by the provider. Metric values
/// arrive as strings and may be absent; absence is data, not an error.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct InsightRecord {
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub campaign_name: String,
    #[serde(default)]
    pub date_start: String,
    #[serde(default)]
    pub date_stop: String,
    pub clicks: Option<String>,
    pub impressions: Option<String>,
    pub reach: Option<String>,
    pub cpc: Option<String>,
    pub spend: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
    #[serde(default)]
    pub conversions: Vec<ActionEntry>,
}

/// Fetches every insight record for one window, following pagination
/// cursors until exhausted. Each page call is retried per `policy`; after
/// each page the throttle may ask for a cooperative pause based on the
/// usage the provider reported. Exhausted retries surface as
/// [`Error::UpstreamUnavailable`] scoped to this window.
pub async fn fetch_window(
    api: &dyn AdsApi,
    throttle: &dyn Throttle,
    policy: &RetryPolicy,
    window: TimeWindow,
) -> Result<Vec<InsightRecord>, Error> {
    let mut records = Vec::new();
    let mut after: Option<String> = None;

    loop {
        let page = policy
            .run(Error::is_transient, || {
                api.fetch_insights_page(window, after.clone())
            })
            .await
            .map_err(|err| Error::UpstreamUnavailable {
                since: window.since,
                until: window.until,
                source: Box::new(err),
            })?;

        records.extend(page.data);

        if let Some(pause) = throttle.pause_after(page.usage) {
            debug!(
                "usage near quota for window {window}; pausing {:?}",
                pause
            );
            sleep(pause).await;
        }

        match page.after {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }

    debug!("window {window}: fetched {} insight records", records.len());

    Ok(records)
}
