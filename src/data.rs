use crate::campaigns::CampaignIndex;
use crate::insights::{ActionEntry, InsightRecord};
use chrono::NaiveDateTime;
use serde::Serialize;

/// Format the warehouse accepts for DATETIME values.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One flat destination row per (campaign, day) insight. `inserted_at` is
/// the watermark column; `date_start`/`date_stop` carry the metric's own
/// dates and are descriptive only.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WarehouseRow {
    pub inserted_at: String,
    pub date_start: String,
    pub date_stop: String,
    pub campaign_id: String,
    pub campaign_name: String,
    pub created_time: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub objective: String,
    pub clicks: u64,
    pub impressions: u64,
    pub reach: u64,
    pub cpc: f64,
    pub spend: f64,
    pub actions: Vec<ActionEntry>,
    pub conversions: Vec<ActionEntry>,
}

/// Turns a raw insight plus the campaign index into a [`WarehouseRow`].
///
/// Never fails: unknown campaigns resolve to blank metadata, absent or
/// unparseable metrics become zero, and absent action collections become
/// empty ones. All scalar destination columns are REQUIRED, so every field
/// is always populated. `stamp` is the watermark value chosen by the
/// orchestrator for the window being loaded.
pub fn normalize(
    record: &InsightRecord,
    campaigns: &CampaignIndex,
    stamp: NaiveDateTime,
) -> WarehouseRow {
    let campaign = campaigns.lookup(&record.campaign_id);

    WarehouseRow {
        inserted_at: stamp.format(DATETIME_FORMAT).to_string(),
        date_start: record.date_start.clone(),
        date_stop: record.date_stop.clone(),
        campaign_id: record.campaign_id.clone(),
        campaign_name: record.campaign_name.clone(),
        created_time: campaign.created_time.clone(),
        start_time: campaign.start_time.clone(),
        end_time: campaign.stop_time.clone(),
        status: campaign.status.clone(),
        objective: campaign.objective.clone(),
        clicks: int_metric(&record.clicks),
        impressions: int_metric(&record.impressions),
        reach: int_metric(&record.reach),
        cpc: float_metric(&record.cpc),
        spend: float_metric(&record.spend),
        actions: record.actions.clone(),
        conversions: record.conversions.clone(),
    }
}

fn int_metric(value: &Option<String>) -> u64 {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn float_metric(value: &Option<String>) -> f64 {
    value
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}
