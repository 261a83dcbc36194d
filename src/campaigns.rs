use crate::api_client::AdsApi;
use crate::error::Error;
use crate::retry::RetryPolicy;
use log::info;
use serde::Deserialize;
use std::collections::HashMap;

/// Campaign metadata as the provider formats it. Absent fields deserialize
/// to empty strings so enrichment never has to special-case them.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub stop_time: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub objective: String,
}

/// Keyed lookup over the account's active campaigns, built once per run and
/// read-only afterwards. Insights may reference campaigns outside the
/// active-status filter; those look ups resolve to an all-blank sentinel
/// instead of failing.
#[derive(Debug)]
pub struct CampaignIndex {
    by_id: HashMap<String, Campaign>,
    missing: Campaign,
}

impl CampaignIndex {
    /// Fetches every page of active campaigns and indexes them by id.
    pub async fn build(api: &dyn AdsApi, policy: &RetryPolicy) -> Result<Self, Error> {
        let mut by_id = HashMap::new();
        let mut after: Option<String> = None;

        loop {
            let page = policy
                .run(Error::is_transient, || {
                    api.fetch_campaigns_page(after.clone())
                })
                .await?;

            for campaign in page.data {
                by_id.insert(campaign.id.clone(), campaign);
            }

            match page.after {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        info!("campaign index built with {} campaigns", by_id.len());

        Ok(CampaignIndex::from_campaigns(by_id.into_values()))
    }

    pub fn from_campaigns(campaigns: impl IntoIterator<Item = Campaign>) -> Self {
        CampaignIndex {
            by_id: campaigns
                .into_iter()
                .map(|campaign| (campaign.id.clone(), campaign))
                .collect(),
            missing: Campaign::default(),
        }
    }

    /// An index with no campaigns; every lookup yields the sentinel.
    pub fn empty() -> Self {
        CampaignIndex::from_campaigns(std::iter::empty())
    }

    pub fn lookup(&self, campaign_id: &str) -> &Campaign {
        self.by_id.get(campaign_id).unwrap_or(&self.missing)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}
